pub mod app;
pub mod assets;
pub mod cli;
pub mod config;
pub mod error;
pub mod preview;
pub mod search;
pub mod storage;
pub mod store;
pub mod sync;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
