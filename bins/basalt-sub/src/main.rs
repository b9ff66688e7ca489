//! Consumes `Tick`s from a shared-memory graph and verifies them.
//!
//! ```bash
//! basalt-sub [config.toml] [name] [depends...]
//! ```
//!
//! Name and dependencies default to the `[subscriber]` table.

use anyhow::Context;
use basalt_config::BasaltConfig;
use basalt_disruptor::{Batch, BoxError, Consumed, Handler, ShmMode, Graph};
use basalt_events::{ProducerId, Tick};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Checks checksums and per-producer numbering; logs rates once a second.
struct Verifier {
    expected: HashMap<ProducerId, u64>,
    count: u64,
    gaps: u64,
    last: Instant,
}

impl Verifier {
    fn new() -> Self {
        Self {
            expected: HashMap::new(),
            count: 0,
            gaps: 0,
            last: Instant::now(),
        }
    }

    fn report(&mut self) {
        if self.last.elapsed() >= Duration::from_secs(1) {
            info!(
                rate = self.count,
                producers = self.expected.len(),
                gaps = self.gaps,
                "consume rate ev/s"
            );
            self.count = 0;
            self.last = Instant::now();
        }
    }
}

impl Handler<Tick> for Verifier {
    fn on_running(&mut self, running: bool) {
        info!(running, "processor");
    }

    fn on_consume(&mut self, item: &mut Tick, seq: i64, _remaining: usize) -> Result<Consumed, BoxError> {
        if !item.is_valid() {
            return Err(format!("bad checksum from producer {}", item.producer.0).into());
        }
        // A producer first seen mid-stream starts where we joined it.
        let next = self.expected.entry(item.producer).or_insert(item.number);
        if item.number != *next {
            self.gaps += 1;
            warn!(seq, producer = item.producer.0, expected = *next, got = item.number, "numbering gap");
        }
        *next = item.number + 1;
        self.count += 1;
        self.report();
        Ok(Consumed::Release)
    }

    fn on_timeout(&mut self, seq: i64) {
        debug!(seq, "idle");
        self.report();
    }

    fn on_exception(&mut self, error: BoxError, seq: i64) -> basalt_disruptor::Result<()> {
        warn!(seq, %error, "skipping item");
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => BasaltConfig::load(path)?,
        None => BasaltConfig::parse("")?,
    };
    let name = args.next().unwrap_or_else(|| config.subscriber.name.clone());
    let mut depends: Vec<String> = args.collect();
    if depends.is_empty() {
        depends = config.subscriber.depends.clone();
    }
    let depends: Vec<&str> = depends.iter().map(String::as_str).collect();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let layout = config.layout::<Tick>();
    let graph = Graph::shared(&layout, &config.shm_options(ShmMode::Attach), config.graph_options())
        .with_context(|| format!("attaching graph at {}", config.shm_file_path))?;
    let subscriber = graph.subscriber(&name, &depends)?;
    info!(%name, ?depends, path = %config.shm_file_path, %layout, "subscribed");
    debug!(graph = %graph.description()?, "topology");

    let batch = Batch::new(&subscriber, graph.ring::<Tick>()?).with_timeout(Duration::from_secs(1));
    batch.run(&mut Verifier::new())?;
    Ok(())
}
