pub mod assets;
pub mod executor;
pub mod orchestrator;
pub mod replicate_client;
pub mod service;
pub mod sprite;
pub mod types;
