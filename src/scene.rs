pub mod camera;
pub mod model;
pub mod project;
pub mod store;
