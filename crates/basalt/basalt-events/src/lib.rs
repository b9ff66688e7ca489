mod tick;

pub use tick::{ProducerId, Tick};
