/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Worker fleet and run orchestration.
//!
//! Data flow: cursor → submission → device → completion dispatch → worker →
//! SHA-1 → output map; the drained slot then recycles to submission. Hashing
//! is the bottleneck (SHA-1 sustains roughly 250 MB/s per worker), so the
//! read window is kept much deeper than the worker count: every completion
//! finds a prepared buffer and every worker finishing a hash finds another
//! completion already queued.

pub mod cursor;
pub mod engine;

use std::time::{Duration, Instant};

use sha1::{Digest, Sha1};

use disksum::{RunConfig, RunLayout, SumError, SumResult};

use crate::device;
use crate::output_map::OutputMap;
use crate::pipeline::engine::{ReadEngine, SubmitOutcome, BUFFER_ALIGNMENT};

pub use crate::pipeline::cursor::BlockCursor;

/// Totals of one completed run.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub blocks_hashed: u64,
    pub bytes_hashed: u64,
    pub digests_written: u64,
    pub elapsed: Duration,
}

/// Poisons the engine if the owning worker unwinds. A worker that dies
/// between `wait` and `submit` strands its slot in the pipeline; without the
/// poison, `active` never reaches zero and every parked worker waits forever.
struct AbortOnPanic<'a>(&'a ReadEngine);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort();
        }
    }
}

/// One worker: wait for a completed block, hash its chunks into the map,
/// re-arm the slot; exit when the pipeline drains.
fn worker_loop(engine: &ReadEngine, map: &OutputMap, layout: &RunLayout) -> SumResult<u64> {
    let mut blocks = 0u64;

    while let Some(completion) = engine.wait()? {
        let buf = engine.slot_buf(completion.slot);
        let chunk_base = layout.chunk_index_of(completion.offset);

        for (i, chunk) in buf.chunks_exact(layout.chunk_align).enumerate() {
            let digest: [u8; disksum::DIGEST_LEN] = Sha1::digest(chunk).into();
            map.write_digest(chunk_base + i as u64, &digest);
        }
        blocks += 1;

        if engine.submit(completion.slot)? == SubmitOutcome::Drained {
            break;
        }
    }

    tracing::debug!(blocks, "worker complete");
    Ok(blocks)
}

/// Execute one fingerprinting run.
///
/// Startup order: validate config → open device → discover geometry →
/// resolve layout → create and map the output → build the read engine →
/// prime the read window → launch workers → join → flush.
pub fn run(config: &RunConfig) -> SumResult<RunSummary> {
    config.validate()?;

    let device = device::open_device(&config.device_path, config.direct_io)?;
    let device_size = device::device_size(&device)?;
    let sector = device::logical_sector_size(&device)?;
    device::validate_io_block(config.io_block_sz, sector)?;

    let layout = RunLayout::resolve(config, device_size)?;

    tracing::info!(
        device = %config.device_path.display(),
        output = %config.output_path.display(),
        disk_bytes = layout.disk_bytes,
        io_block_sz = layout.io_block_sz,
        chunk_align = layout.chunk_align,
        queue_depth = config.queue_depth,
        threads = config.thread_count,
        output_size = layout.output_size(),
        "starting run"
    );

    let map = OutputMap::create(&config.output_path, layout.output_size())?;
    let engine = ReadEngine::new(device, &layout, config.queue_depth, BUFFER_ALIGNMENT.max(sector))?;
    engine.prime()?;

    let start = Instant::now();

    let blocks_hashed = std::thread::scope(|scope| -> SumResult<u64> {
        let mut handles = Vec::with_capacity(config.thread_count);
        for i in 0..config.thread_count {
            let engine = &engine;
            let map = &map;
            let layout = &layout;
            let handle = std::thread::Builder::new()
                .name(format!("hasher-{i}"))
                .spawn_scoped(scope, move || {
                    let _abort_guard = AbortOnPanic(engine);
                    worker_loop(engine, map, layout)
                })
                .map_err(|err| {
                    // Unblock already-running workers before bailing out of
                    // the scope, which joins them.
                    engine.abort();
                    SumError::thread(format!("Failed to create thread: {err}"))
                })?;
            handles.push(handle);
        }

        let mut total = 0u64;
        let mut first_error: Option<SumError> = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(blocks)) => total += blocks,
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(_) => {
                    // Same symmetry as the spawn-failure path: unblock the
                    // rest of the fleet before joining it.
                    engine.abort();
                    first_error.get_or_insert(SumError::thread("worker panicked"));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(total),
        }
    })?;

    let elapsed = start.elapsed();
    debug_assert_eq!(blocks_hashed, layout.block_count);

    map.flush()?;

    let summary = RunSummary {
        blocks_hashed,
        bytes_hashed: blocks_hashed * layout.io_block_sz as u64,
        digests_written: layout.total_chunks(),
        elapsed,
    };

    tracing::info!(
        blocks = summary.blocks_hashed,
        digests = summary.digests_written,
        elapsed_ms = elapsed.as_millis() as u64,
        throughput_mb_s = (summary.bytes_hashed as f64 / 1e6 / elapsed.as_secs_f64().max(1e-9)) as u64,
        "run complete"
    );

    Ok(summary)
}
