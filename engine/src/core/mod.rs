//! Core application infrastructure.

pub mod cli;
pub mod config;
pub mod constants;
pub mod shutdown;
pub mod storage;

pub use cli::Cli;
pub use config::EngineConfig;
pub use shutdown::ShutdownService;
pub use storage::{AppStorage, DataSubdir};
