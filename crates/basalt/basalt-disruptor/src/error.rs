use crate::graph::{RetryPolicy, State};
use std::io;

/// Error raised by handlers from `on_consume`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = DisruptorError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum DisruptorError {
    /// Capacity or ring size that cannot be masked.
    #[error("{what} must be power-of-two, value:{value}")]
    NotPowerOfTwo { what: &'static str, value: usize },

    #[error("ring storage pointer is null")]
    NullStorage,

    #[error("external storage size({size}) != capacity({capacity})")]
    ExternalStorage { size: usize, capacity: usize },

    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// Two parties disagree on the shape of one region. `detail` lists each
    /// field as `name:ours=theirs`.
    #[error("layout {section} mismatch: {detail}")]
    LayoutMismatch { section: &'static str, detail: String },

    #[error("layout requires {required} bytes, only {provided} provided")]
    SpaceTooSmall { required: usize, provided: usize },

    #[error("SPMC supports only one producer, current limit:{limit}")]
    SpmcProducers { limit: usize },

    #[error("max producer limit is reached:{max}")]
    ProducerLimit { max: usize },

    #[error("one publisher is already created for SPMC")]
    SingleProducer,

    #[error("max consumer limit is reached:{max}")]
    ConsumerLimit { max: usize },

    #[error("dependencies list exceeds limit: {max}")]
    DependencyLimit { max: usize },

    /// The master barrier has no free dependency entry left.
    #[error("exceeds subscribers limit of the master barrier")]
    GatingLimit,

    #[error("invalid slot name '{name}': {reason}")]
    SlotName { name: String, reason: &'static str },

    #[error("wait kind Block is not allowed for a layout in shared memory")]
    BlockInSharedMemory,

    /// The graph stayed in `state` for the whole retry budget.
    #[error("graph state is:{state} after {policy} retries")]
    StateTimeout { state: State, policy: RetryPolicy },

    #[error("corrupted graph region: {0}")]
    Corrupted(String),

    #[error("processor is already running")]
    AlreadyRunning,

    #[error("exception on #{sequence}: {source}")]
    Handler {
        sequence: i64,
        #[source]
        source: BoxError,
    },

    #[error("{op} failed")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("shared memory '{path}'")]
    Shm {
        path: String,
        #[source]
        source: io::Error,
    },
}
