/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! disksum device I/O crate.
//!
//! Everything between the raw device and the output manifest: the aligned
//! buffer pool, the O_DIRECT device handle and its geometry, the io_uring
//! read engine with its worker fleet, and the memory-mapped digest map.

pub mod aligned;
pub mod device;
pub mod output_map;
pub mod pipeline;

pub use aligned::AlignedBuffer;
pub use output_map::OutputMap;
pub use pipeline::{run, RunSummary};
