/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! disksum — hash aligned chunks of a raw block device into a flat manifest.
//!
//! Usage: disksum [opts]
//!
//!  + /disk:    Physical disk path.
//!  + /out:     Output manifest file.
//!  + /align:   Alignment/size of contiguous disk to hash.
//!    /bytes:   Amount of data to process, in bytes (default: whole device).
//!    /iosize:  I/O (DMA) transfer size (default 0x10000).
//!    /iodepth: I/O queue depth (default 256); hw queue depths: SATA ~32, NVMe ~256.
//!    /threads: Worker count (default: all physical cores).
//!
//!  + = required arg. Integers accept a leading 0x for hexadecimal.

use std::io::Write;
use std::process::ExitCode;

use disksum::{RunConfig, SumError, SumResult};
use disksum_disk::RunSummary;
use disksum_tools::utils::{init_subscriber, resolve_thread_count, CliArgs};

fn main() -> ExitCode {
    init_subscriber();

    match try_main() {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            // Console diagnostics are CRLF-prefixed lines on stdout.
            print!("\r\n{err}");
            let _ = std::io::stdout().flush();
            ExitCode::FAILURE
        }
    }
}

fn try_main() -> SumResult<RunSummary> {
    let args = CliArgs::parse(std::env::args().skip(1))
        .map_err(|err| SumError::config(err.to_string()))?;

    let thread_count = resolve_thread_count(args.threads)?;

    let mut config = RunConfig::new(args.disk, args.out, usize::try_from(args.align)?);
    config.io_block_sz = usize::try_from(args.io_size)?;
    config.queue_depth = usize::try_from(args.io_depth)?;
    config.thread_count = thread_count;
    config.disk_bytes = args.bytes;

    disksum_disk::run(&config)
}
