pub mod conversation;
pub mod errors;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod registry;
