pub mod cli;
pub mod compression;
pub mod config;
pub mod database;
pub mod error;
pub mod export;
pub mod job;
pub mod pipeline;
pub mod scheduler;
pub mod storage;
pub mod utils;

pub use error::{BackupError, Result};
