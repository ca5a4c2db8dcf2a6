//! Server assembly: configuration and background work.
//!
//! 1. **Configuration** (`config`): `ServerConfig` built from the command line
//! 2. **Background workers** (`worker`): periodic flush of dirty buckets

pub mod config;
pub mod worker;

pub use config::{ServerConfig, StoreConfig};
pub use worker::{BackgroundRunnable, BackgroundWorker, FlushRunnable, FlushTask};
