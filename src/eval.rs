pub mod camera;
pub mod placement;
pub mod props;
