use basalt_events::{ProducerId, Tick};

// ─── Statistics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Stats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    pub count: usize,
}

pub fn compute_stats(samples: &mut [u64]) -> Stats {
    assert!(!samples.is_empty(), "cannot compute stats on empty samples");
    samples.sort_unstable();

    let count = samples.len();
    let sum: u64 = samples.iter().sum();

    Stats {
        min: samples[0],
        max: samples[count - 1],
        mean: sum as f64 / count as f64,
        p50: percentile_sorted(samples, 50.0),
        p90: percentile_sorted(samples, 90.0),
        p99: percentile_sorted(samples, 99.0),
        p999: percentile_sorted(samples, 99.9),
        count,
    }
}

fn percentile_sorted(sorted: &[u64], pct: f64) -> u64 {
    let len = sorted.len();
    if len == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0 * len as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(len - 1);
    sorted[idx]
}

pub fn print_stats(name: &str, unit: &str, s: &Stats) {
    eprintln!(
        "{name:<28} n={:<8} min={}{unit} p50={}{unit} p90={}{unit} p99={}{unit} p99.9={}{unit} max={}{unit} mean={:.1}{unit}",
        s.count, s.min, s.p50, s.p90, s.p99, s.p999, s.max, s.mean
    );
}

// ─── Helpers ────────────────────────────────────────────────────────────────

pub fn temp_shm_path(label: &str) -> String {
    let pid = std::process::id();
    format!("/tmp/basalt_bench_{label}_{pid}")
}

/// Tick stamped with the monotonic clock, for one-way latency.
pub fn make_tick(number: u64) -> Tick {
    Tick::new(number, ProducerId(1), mono_now_ns())
}

#[inline(always)]
pub fn mono_now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
}
