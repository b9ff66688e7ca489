//! Publishes `Tick`s into a shared-memory graph.
//!
//! ```bash
//! basalt-pub [config.toml] [name]
//! ```

use anyhow::Context;
use basalt_config::BasaltConfig;
use basalt_disruptor::{Graph, Produce, ShmMode};
use basalt_events::{ProducerId, Tick};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_nanos() as u64)
        .unwrap_or_default()
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => BasaltConfig::load(path)?,
        None => BasaltConfig::parse("")?,
    };
    let name = args.next().unwrap_or_else(|| "pub".into());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let layout = config.layout::<Tick>();
    let graph = Graph::shared(&layout, &config.shm_options(ShmMode::Attach), config.graph_options())
        .with_context(|| format!("attaching graph at {}", config.shm_file_path))?;
    let publisher = graph.publisher(&name)?;
    let ring = graph.ring::<Tick>()?;
    let producer = ProducerId(std::process::id());

    info!(%name, path = %config.shm_file_path, %layout, "publishing");

    let mut number = 0u64;
    let mut count = 0u64;
    let mut last = Instant::now();
    loop {
        let seq = publisher.claim(1) - 1;
        // SAFETY: `seq` is claimed by this publisher and not yet published.
        unsafe { *ring.get_mut(seq) = Tick::new(number, producer, now_ns()) };
        publisher.publish(seq);
        number += 1;
        count += 1;

        if last.elapsed() >= Duration::from_secs(1) {
            info!(rate = count, next = number, "publish rate ev/s");
            count = 0;
            last = Instant::now();
        }
    }
}
