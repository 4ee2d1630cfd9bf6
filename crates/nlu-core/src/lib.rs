pub mod cache;
pub mod config;
pub mod error;
pub mod types;

pub use cache::{hash_text, Cache, CacheKey};
pub use config::{AppConfig, NlpConfig, ServerConfig};
pub use error::{CoreError, Result};
pub use types::RequestId;
