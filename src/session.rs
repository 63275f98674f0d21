pub mod orchestrator;
pub mod scheduler;
