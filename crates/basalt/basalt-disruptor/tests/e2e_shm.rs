//! End-to-end two-process test of a graph in shared memory.
//!
//! The same test executable is spawned twice with a role in the environment:
//!
//! ```text
//!                    Time -->
//!
//! [Writer]  --[create]--[wait for subscriber]--[publish...]------[done]
//!                |                                 |  |  |
//!                v                                 v  v  v
//!           [segment file]                    (gated by reader)
//!                |                                 ^  ^  ^
//!                v                                 |  |  |
//! [Reader]  ----[open]--[subscribe]-----------[consume...]-------[done]
//! ```
//!
//! The reader subscribes before anything is published, so it must see every
//! tick, in order and bit-identical.
//!
//! ```bash
//! cargo test -p basalt-disruptor --test e2e_shm -- --nocapture
//! ```

use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Writes to stderr with immediate flush to bypass test output capture.
macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "BASALT_E2E_ROLE";
const ENV_PATH: &str = "BASALT_E2E_PATH";
const ROLE_WRITER: &str = "writer";
const ROLE_READER: &str = "reader";

const EVENT_COUNT: u64 = 200_000;
const RING_CAPACITY: usize = 1 << 12;
const PRODUCER: u32 = 7;

fn test_path() -> String {
    let pid = std::process::id();
    format!("/tmp/basalt_e2e_graph_{pid}")
}

fn layout() -> basalt_disruptor::Layout {
    use basalt_disruptor::{GraphType, Items, Layout, Shape, Slots, WaitKind};
    Layout::new(
        Shape {
            kind: GraphType::Spmc,
            wait: WaitKind::Share,
        },
        Slots { max_pub: 1, max_sub: 2 },
        Items::of::<basalt_events::Tick>(RING_CAPACITY),
    )
}

fn expected(number: u64) -> basalt_events::Tick {
    basalt_events::Tick::new(number, basalt_events::ProducerId(PRODUCER), number * 3)
}

fn run_writer(path: &str) {
    use basalt_disruptor::{Graph, GraphOptions, Produce, ShmMode, ShmOptions};

    log!("[WRITER] Creating graph at {path}");
    let options = ShmOptions::new(path, ShmMode::Create { purge: true });
    let graph = Graph::shared(&layout(), &options, GraphOptions::default())
        .expect("writer: failed to create graph");
    let publisher = graph.publisher("writer").expect("writer: publisher");
    let ring = graph.ring::<basalt_events::Tick>().expect("writer: ring");

    let deadline = Instant::now() + Duration::from_secs(10);
    while graph.dependencies("Master").expect("writer: dependencies").is_empty() {
        assert!(Instant::now() < deadline, "[WRITER] no subscriber showed up");
        std::thread::sleep(Duration::from_millis(1));
    }
    log!("[WRITER] Subscriber attached, publishing {EVENT_COUNT} ticks");

    let start = Instant::now();
    for number in 0..EVENT_COUNT {
        let seq = publisher.claim(1) - 1;
        unsafe { *ring.get_mut(seq) = expected(number) };
        publisher.publish(seq);
    }
    let elapsed = start.elapsed();
    log!(
        "[WRITER] Complete: {EVENT_COUNT} ticks in {elapsed:?} ({:.0} ticks/sec)",
        EVENT_COUNT as f64 / elapsed.as_secs_f64()
    );
}

fn run_reader(path: &str) {
    use basalt_disruptor::{Consume, Graph, GraphOptions, Sequence, ShmMode, ShmOptions};

    log!("[READER] Waiting for graph at {path}");
    let deadline = Instant::now() + Duration::from_secs(5);
    let graph = loop {
        match Graph::shared(&layout(), &ShmOptions::new(path, ShmMode::Open), GraphOptions::default()) {
            Ok(graph) => break graph,
            Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => panic!("[READER] Failed to open graph: {e}"),
        }
    };
    let sub = graph.subscriber("reader", &[]).expect("reader: subscriber");
    let ring = graph.ring::<basalt_events::Tick>().expect("reader: ring");
    log!("[READER] Subscribed, reading...");

    let deadline = Instant::now() + Duration::from_secs(30);
    let start = Instant::now();
    let mut next = sub.last() + 1;
    let mut read = 0u64;
    while read < EVENT_COUNT {
        let available = sub.consumable(next);
        if available == Sequence::INITIAL {
            assert!(Instant::now() < deadline, "[READER] stalled after {read} ticks");
            std::hint::spin_loop();
            continue;
        }
        for seq in next..=available {
            let tick = unsafe { *ring.get(seq) };
            assert_eq!(tick, expected(read), "[READER] mismatch at #{seq}");
            read += 1;
        }
        sub.release(available);
        next = available + 1;
    }
    let elapsed = start.elapsed();
    log!(
        "[READER] Complete: {read} ticks in {elapsed:?} ({:.0} ticks/sec)",
        read as f64 / elapsed.as_secs_f64()
    );
}

#[test]
fn e2e_two_process_graph() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let path = env::var(ENV_PATH).expect("BASALT_E2E_PATH not set");
        match role.as_str() {
            ROLE_WRITER => run_writer(&path),
            ROLE_READER => run_reader(&path),
            other => panic!("Unknown role: {other}"),
        }
        return;
    }

    let path = test_path();
    let exe = env::current_exe().expect("Failed to get current executable path");
    log!("[ORCHESTRATOR] Graph path: {path}, ticks: {EVENT_COUNT}, capacity: {RING_CAPACITY}");

    let spawn = |role: &str| {
        Command::new(&exe)
            .arg("--exact")
            .arg("e2e_two_process_graph")
            .arg("--nocapture")
            .env(ENV_ROLE, role)
            .env(ENV_PATH, &path)
            .stderr(Stdio::inherit())
            .spawn()
            .expect("Failed to spawn child process")
    };

    let mut writer = spawn(ROLE_WRITER);
    std::thread::sleep(Duration::from_millis(5));
    let mut reader = spawn(ROLE_READER);

    let writer_status = writer.wait().expect("Failed to wait for writer");
    let reader_status = reader.wait().expect("Failed to wait for reader");
    log!("[ORCHESTRATOR] Writer: {writer_status}, reader: {reader_status}");

    let _ = std::fs::remove_file(&path);
    assert!(writer_status.success(), "Writer process failed with status: {writer_status}");
    assert!(reader_status.success(), "Reader process failed with status: {reader_status}");
}
