mod config;
pub use config::{Config, LogConfig, ResilienceConfig, RpcConfig, SyncConfig};

pub mod breaker;
pub mod cache;
pub mod timeout;
