//! # Client Benchmark Harness
//!
//! Purpose: Drive the client runtime against a live RESP2 server so async,
//! sync and looping throughput can be compared over time, with and without
//! no-wait mode.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Keys and values are pre-built from fixed seeds.
//! 2. **Completion Counting**: Async throughput is measured until the last
//!    callback runs, not until the last submit returns.
//! 3. **Clean Accounting**: Every run ends by checking that the runtime freed
//!    every command it created.
//!
//! Usage: `bench_client [host] [port] [ops] [no_wait]`

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use loopkv_client::{Client, ClientConfig, Reply, RespValue, DEFAULT_HOST, DEFAULT_PORT};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_OP_COUNT: usize = 100_000;
const KEY_COUNT: usize = 1 << 10;
const VALUE_SIZE: usize = 64;
const LOOP_PERIOD: Duration = Duration::from_millis(1);
const LOOP_RUNTIME: Duration = Duration::from_secs(1);

struct BenchConfig {
    host: String,
    port: u16,
    op_count: usize,
    no_wait: bool,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let host = args.next().unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = args
            .next()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let op_count = args
            .next()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_OP_COUNT);
        let no_wait = matches!(args.next().as_deref(), Some("1" | "true" | "no-wait"));
        BenchConfig {
            host,
            port,
            op_count,
            no_wait,
        }
    }
}

fn build_buffers(count: usize, size: usize, seed: u64) -> Vec<Vec<u8>> {
    (0..count)
        .map(|idx| {
            let mut buffer = vec![b'x'; size];
            let tag = format!("{:016x}", seed ^ idx as u64);
            let copy_len = buffer.len().min(tag.len());
            buffer[..copy_len].copy_from_slice(&tag.as_bytes()[..copy_len]);
            buffer
        })
        .collect()
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let micros_per_op = (secs * 1e6) / (ops as f64);
    println!("{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {micros_per_op:.1} us/op)");
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init();

    if let Err(err) = run() {
        eprintln!("bench_client failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = BenchConfig::from_args();
    let client = Client::with_config(ClientConfig {
        no_wait: config.no_wait,
        ..ClientConfig::default()
    });
    if !client.connect(&config.host, config.port) {
        bail!("could not connect to {}:{} ({})", config.host, config.port, client.state());
    }
    info!(host = %config.host, port = config.port, no_wait = config.no_wait, "connected");

    let keys = build_buffers(KEY_COUNT, 16, 0xA5A5_A5A5_A5A5_A5A5);
    let values = build_buffers(KEY_COUNT, VALUE_SIZE, 0x5A5A_5A5A_5A5A_5A5A);
    println!(
        "ops={}, keys={}, value_size={}, no_wait={}",
        config.op_count, KEY_COUNT, VALUE_SIZE, config.no_wait
    );

    bench_async_set(&client, &keys, &values, config.op_count)?;
    bench_sync_get(&client, &keys, config.op_count / 10)?;
    bench_loop(&client)?;

    client.disconnect();
    let stats = client.stats();
    if stats.live() != 0 {
        bail!("{} commands leaked", stats.live());
    }
    Ok(())
}

fn bench_async_set(client: &Client, keys: &[Vec<u8>], values: &[Vec<u8>], ops: usize) -> Result<()> {
    let done = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    for idx in 0..ops {
        let slot = idx % keys.len();
        let done = done.clone();
        let failed = failed.clone();
        client.submit_with(
            vec![b"SET".to_vec(), keys[slot].clone(), values[slot].clone()],
            move |reply: &Reply<RespValue>| {
                if !reply.ok() {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                done.fetch_add(1, Ordering::Release);
            },
        );
    }
    while done.load(Ordering::Acquire) < ops {
        thread::sleep(Duration::from_micros(200));
    }
    report("async SET", ops, start.elapsed());

    let failed = failed.load(Ordering::Relaxed);
    if failed > 0 {
        warn!(failed, "async SET replies were not ok");
    }
    Ok(())
}

fn bench_sync_get(client: &Client, keys: &[Vec<u8>], ops: usize) -> Result<()> {
    let ops = ops.max(1);
    let start = Instant::now();
    for idx in 0..ops {
        let value = client
            .get(&keys[idx % keys.len()])
            .with_context(|| format!("GET #{idx}"))?;
        std::hint::black_box(value);
    }
    report("sync GET", ops, start.elapsed());
    Ok(())
}

fn bench_loop(client: &Client) -> Result<()> {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let before = client.stats().overlapped_fires;

    let handle = client.submit_loop(
        ["PING"],
        move |_: &Reply<RespValue>| {
            counter.fetch_add(1, Ordering::Relaxed);
        },
        LOOP_PERIOD,
        Duration::ZERO,
    );
    thread::sleep(LOOP_RUNTIME);
    handle.release();

    let fired = fired.load(Ordering::Relaxed);
    let skipped = client.stats().overlapped_fires - before;
    println!("loop PING every {LOOP_PERIOD:?}: {fired} replies, {skipped} skipped firings in {LOOP_RUNTIME:?}");
    Ok(())
}
