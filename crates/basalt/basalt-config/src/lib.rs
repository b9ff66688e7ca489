mod config;

pub use config::{BasaltConfig, ConfigError, GraphConfig, RetryConfig, SubscriberConfig};
