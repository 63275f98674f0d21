pub mod bezier;
pub mod keyframes;
