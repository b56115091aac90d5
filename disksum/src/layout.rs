/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Resolved geometry of one run: how many blocks to read, how many chunks
//! each block carries, and how large the output manifest is.

use crate::config::RunConfig;
use crate::error::{SumError, SumResult};

/// Bytes of one SHA-1 digest, and therefore of one output slot.
pub const DIGEST_LEN: usize = 20;

/// Round `n` up to the next multiple of `m`.
fn round_up(n: u64, m: u64) -> u64 {
    n.div_ceil(m) * m
}

/// Geometry derived from a validated [`RunConfig`] and the discovered device
/// size. Immutable for the duration of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLayout {
    /// Bytes of device to process, clamped to the device size and rounded up
    /// to a multiple of `io_block_sz`.
    pub disk_bytes: u64,

    /// True size of the device; reads crossing this boundary are padded.
    pub device_size: u64,

    /// Bytes per device read.
    pub io_block_sz: usize,

    /// Bytes per hashed chunk.
    pub chunk_align: usize,

    /// Number of reads to issue: `disk_bytes / io_block_sz`.
    pub block_count: u64,

    /// Digests computed per completed read: `io_block_sz / chunk_align`.
    pub chunks_per_block: usize,
}

impl RunLayout {
    /// Clamp and round the requested byte range against the actual device
    /// size, then derive all counts.
    pub fn resolve(config: &RunConfig, device_size: u64) -> SumResult<Self> {
        if device_size == 0 {
            return Err(SumError::device("device reports zero size"));
        }

        let mut disk_bytes = config.disk_bytes;

        if disk_bytes > device_size {
            disk_bytes = device_size;
            tracing::warn!(
                requested = config.disk_bytes,
                device_size,
                "Desired size greater than actual disk size."
            );
        }

        if disk_bytes == 0 {
            disk_bytes = device_size;
        }

        let io_block_sz = config.io_block_sz as u64;
        let disk_bytes = round_up(disk_bytes, io_block_sz);

        Ok(Self {
            disk_bytes,
            device_size,
            io_block_sz: config.io_block_sz,
            chunk_align: config.chunk_align,
            block_count: disk_bytes / io_block_sz,
            chunks_per_block: config.io_block_sz / config.chunk_align,
        })
    }

    /// Total number of chunk digests in the manifest.
    pub fn total_chunks(&self) -> u64 {
        self.disk_bytes / self.chunk_align as u64
    }

    /// Size of the output manifest in bytes.
    pub fn output_size(&self) -> u64 {
        self.total_chunks() * DIGEST_LEN as u64
    }

    /// Device offset of block `idx`.
    pub fn offset_of_block(&self, idx: u64) -> u64 {
        idx * self.io_block_sz as u64
    }

    /// Index, in chunks, of the first chunk covered by the block read at
    /// `offset`.
    pub fn chunk_index_of(&self, offset: u64) -> u64 {
        offset / self.chunk_align as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config(chunk_align: usize, io_block_sz: usize, disk_bytes: u64) -> RunConfig {
        let mut config = RunConfig::new("/dev/null".into(), "/tmp/out.sum".into(), chunk_align);
        config.io_block_sz = io_block_sz;
        config.disk_bytes = disk_bytes;
        config.thread_count = 1;
        config
    }

    #[rstest]
    // 1 MiB device, 1 KiB chunks, 64 KiB reads.
    #[case(1024, 0x10000, 0, 1 << 20, 16, 64, 1024, 20480)]
    // Exactly one chunk per read.
    #[case(0x10000, 0x10000, 0, 0x10000, 1, 1, 1, 20)]
    // Byte chunks: maximum fan-out.
    #[case(1, 0x10000, 0, 0x10000, 1, 0x10000, 0x10000, 0x10000 * 20)]
    // Requested range smaller than the device.
    #[case(4096, 0x10000, 0x20000, 1 << 20, 2, 16, 32, 640)]
    fn resolves_counts(
        #[case] chunk_align: usize,
        #[case] io_block_sz: usize,
        #[case] requested: u64,
        #[case] device_size: u64,
        #[case] block_count: u64,
        #[case] chunks_per_block: usize,
        #[case] total_chunks: u64,
        #[case] output_size: u64,
    ) {
        let layout = RunLayout::resolve(&config(chunk_align, io_block_sz, requested), device_size)
            .unwrap();
        assert_eq!(layout.block_count, block_count);
        assert_eq!(layout.chunks_per_block, chunks_per_block);
        assert_eq!(layout.total_chunks(), total_chunks);
        assert_eq!(layout.output_size(), output_size);
    }

    #[test]
    fn clamps_oversized_request_to_device() {
        let layout = RunLayout::resolve(&config(4096, 0x10000, u64::MAX), 1 << 20).unwrap();
        assert_eq!(layout.disk_bytes, 1 << 20);
        assert_eq!(layout.block_count, 16);
    }

    #[test]
    fn rounds_partial_block_up() {
        // 100 KiB requested with 64 KiB reads: two blocks, tail past the
        // request but within the device.
        let layout = RunLayout::resolve(&config(4096, 0x10000, 100 * 1024), 1 << 20).unwrap();
        assert_eq!(layout.disk_bytes, 2 * 0x10000);
        assert_eq!(layout.block_count, 2);
    }

    #[test]
    fn rounds_whole_device_up_past_its_end() {
        // 100 KiB device: the rounded range extends one partial block past
        // the device end; output size reflects the rounded value.
        let device_size = 100 * 1024;
        let layout = RunLayout::resolve(&config(4096, 0x10000, 0), device_size).unwrap();
        assert_eq!(layout.disk_bytes, 2 * 0x10000);
        assert!(layout.disk_bytes > layout.device_size);
        assert_eq!(layout.output_size(), (layout.disk_bytes / 4096) * 20);
    }

    #[test]
    fn zero_device_rejected() {
        assert!(RunLayout::resolve(&config(4096, 0x10000, 0), 0).is_err());
    }

    #[test]
    fn offset_and_chunk_index_round_trip() {
        let layout = RunLayout::resolve(&config(4096, 0x10000, 0), 1 << 20).unwrap();
        for idx in 0..layout.block_count {
            let offset = layout.offset_of_block(idx);
            assert_eq!(offset % layout.io_block_sz as u64, 0);
            assert_eq!(layout.chunk_index_of(offset), idx * 16);
        }
    }
}
