use basalt_disruptor::graph::RetryPolicy;
use basalt_disruptor::{
    GraphOptions, GraphType, Items, Layout, Shape, ShmMode, ShmOptions, Slots, WaitKind,
};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug)]
pub struct BasaltConfig {
    #[serde(default = "defaults::shm_file_path")]
    pub shm_file_path: String,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    /// mlock the shared segment.
    #[serde(default)]
    pub lock_memory: bool,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub subscriber: SubscriberConfig,
}

/// Shape of the shared graph; every process attaching must agree on it.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    #[serde(default = "defaults::kind")]
    pub kind: GraphType,
    #[serde(default = "defaults::wait")]
    pub wait: WaitKind,
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
    #[serde(default = "defaults::max_pub")]
    pub max_pub: usize,
    #[serde(default = "defaults::max_sub")]
    pub max_sub: usize,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "defaults::attach")]
    pub attach: RetryPolicy,
    #[serde(default = "defaults::update")]
    pub update: RetryPolicy,
    #[serde(default = "defaults::open")]
    pub open: RetryPolicy,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubscriberConfig {
    #[serde(default = "defaults::subscriber")]
    pub name: String,
    #[serde(default)]
    pub depends: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    use basalt_disruptor::graph::RetryPolicy;
    use basalt_disruptor::{GraphType, WaitKind};

    pub fn shm_file_path() -> String {
        "/tmp/basalt_graph".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn kind() -> GraphType {
        GraphType::Mpmc
    }

    pub fn wait() -> WaitKind {
        WaitKind::Share
    }

    pub fn capacity() -> usize {
        1 << 16 // 65536
    }

    pub fn max_pub() -> usize {
        4
    }

    pub fn max_sub() -> usize {
        4
    }

    pub fn attach() -> RetryPolicy {
        RetryPolicy::new(100, 1)
    }

    pub fn update() -> RetryPolicy {
        RetryPolicy::new(500, 1)
    }

    pub fn open() -> RetryPolicy {
        RetryPolicy::new(500, 1)
    }

    pub fn subscriber() -> String {
        "sub".into()
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            kind: defaults::kind(),
            wait: defaults::wait(),
            capacity: defaults::capacity(),
            max_pub: defaults::max_pub(),
            max_sub: defaults::max_sub(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attach: defaults::attach(),
            update: defaults::update(),
            open: defaults::open(),
        }
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            name: defaults::subscriber(),
            depends: Vec::new(),
        }
    }
}

impl BasaltConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&toml_to_str)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Layout of the configured graph carrying items of type `T`.
    pub fn layout<T: Copy>(&self) -> Layout {
        let g = &self.graph;
        Layout::new(
            Shape {
                kind: g.kind,
                wait: g.wait,
            },
            Slots {
                max_pub: g.max_pub,
                max_sub: g.max_sub,
            },
            Items::of::<T>(g.capacity),
        )
    }

    pub fn graph_options(&self) -> GraphOptions {
        GraphOptions {
            attach: self.retry.attach,
            update: self.retry.update,
        }
    }

    pub fn shm_options(&self, mode: ShmMode) -> ShmOptions {
        ShmOptions::new(&self.shm_file_path, mode)
            .locked(self.lock_memory)
            .open_retry(self.retry.open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_file_uses_defaults() {
        let config = BasaltConfig::parse("").unwrap();
        assert_eq!(config.shm_file_path, "/tmp/basalt_graph");
        assert_eq!(config.log_level, "info");
        assert!(!config.lock_memory);
        assert_eq!(config.graph, GraphConfig::default());
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.subscriber.name, "sub");
        assert!(config.subscriber.depends.is_empty());
    }

    #[test]
    fn parses_every_table() {
        let config = BasaltConfig::parse(
            r#"
            shm_file_path = "/dev/shm/ticks"
            log_level = "basalt_disruptor=debug"
            lock_memory = true

            [graph]
            kind = "spmc"
            wait = "yield"
            capacity = 1024
            max_pub = 1
            max_sub = 3

            [retry]
            attach = "10x5"
            open = "2000x1"

            [subscriber]
            name = "C3"
            depends = ["C1", "C2"]
            "#,
        )
        .unwrap();

        let layout = config.layout::<u64>();
        assert_eq!(layout.graph.kind, GraphType::Spmc);
        assert_eq!(layout.graph.wait, WaitKind::Yield);
        assert_eq!(layout.slots, Slots { max_pub: 1, max_sub: 3 });
        assert_eq!(layout.items.capacity, 1024);
        assert!(layout.validate().is_ok());

        let options = config.graph_options();
        assert_eq!(options.attach, RetryPolicy::new(10, 5));
        assert_eq!(options.update.to_string(), "500x1");

        let shm = config.shm_options(ShmMode::Attach);
        assert_eq!(shm.path, Path::new("/dev/shm/ticks"));
        assert!(shm.lock);
        assert_eq!(shm.open.delay, Duration::from_millis(1));
        assert_eq!(shm.open.attempts, 2000);
        assert_eq!(config.subscriber.depends, ["C1", "C2"]);
    }

    #[test]
    fn rejects_bad_values() {
        for bad in [
            "[retry]\nattach = \"soon\"",
            "[graph]\nkind = \"mpsc\"",
            "[graph]\nwait = \"Busy\"",
            "log_level = 3",
        ] {
            assert!(matches!(BasaltConfig::parse(bad), Err(ConfigError::Parse(_))), "{bad}");
        }
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = BasaltConfig::load("/nonexistent/basalt.toml").unwrap_err();
        assert_eq!(err.to_string(), "failed to read '/nonexistent/basalt.toml'");
    }
}
