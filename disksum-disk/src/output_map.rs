/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Memory-mapped digest manifest.
//!
//! # Safety model
//!
//! All workers scatter digests into the same writable mapping without any
//! locking. This is sound because the writes are positionally disjoint by
//! construction: each chunk index is covered by exactly one block, each block
//! index is handed out by the cursor exactly once, and each completed block
//! is hashed by exactly one worker. No two workers ever write the same byte.
//!
//! As with the read engine, we never form `&mut [u8]` references over the
//! shared region. The base pointer is captured once at construction and all
//! writes go through `ptr::copy_nonoverlapping` on disjoint ranges.

use std::{fs::OpenOptions, path::Path};

use memmap2::{MmapMut, MmapOptions};

use disksum::{ErrorContext, SumError, SumResult, DIGEST_LEN};

/// The output manifest: `total_chunks * DIGEST_LEN` bytes of file-backed
/// shared memory, digest `k` at byte offset `k * DIGEST_LEN`.
#[derive(Debug)]
pub struct OutputMap {
    map: MmapMut,
    base: *mut u8,
    len: usize,
}

// SAFETY: workers write through `base` to disjoint `DIGEST_LEN`-sized slots
// (see the module-level proof); the mapping itself is owned by this struct
// and outlives every worker borrow.
unsafe impl Send for OutputMap {}
unsafe impl Sync for OutputMap {}

impl OutputMap {
    /// Create (or truncate) the manifest file, size it to exactly `len`
    /// bytes, and map it writable and shared.
    pub fn create(path: &Path, len: u64) -> SumResult<Self> {
        if len == 0 {
            return Err(SumError::output_map("output manifest would be empty"));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(SumError::io)
            .with_context(|| format!("Failed to open output file '{}'", path.display()))?;

        file.set_len(len)
            .map_err(SumError::io)
            .context("Failed to size output file")?;

        // SAFETY: the mapping is private to this process in the sense that
        // no other code maps the file while the run is active; concurrent
        // in-process access is covered by the module-level disjointness
        // argument.
        let mut map = unsafe { MmapOptions::new().map_mut(&file) }
            .map_err(SumError::io)
            .context("Failed to map output file")?;

        let base = map.as_mut_ptr();
        let len = map.len();

        Ok(Self { map, base, len })
    }

    /// Write the digest of chunk `chunk_idx` to its slot.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_idx` is outside the manifest; offsets produced by the
    /// block cursor never are.
    pub fn write_digest(&self, chunk_idx: u64, digest: &[u8; DIGEST_LEN]) {
        let offset = chunk_idx as usize * DIGEST_LEN;
        assert!(
            offset + DIGEST_LEN <= self.len,
            "chunk index {chunk_idx} outside manifest of {} bytes",
            self.len
        );

        // SAFETY: range checked above; disjointness of concurrent writers is
        // established at the module level.
        unsafe {
            std::ptr::copy_nonoverlapping(digest.as_ptr(), self.base.add(offset), DIGEST_LEN);
        }
    }

    /// Flush the mapping to the backing file.
    pub fn flush(&self) -> SumResult<()> {
        self.map
            .flush()
            .map_err(SumError::io)
            .context("Failed to flush output map")
    }

    /// Size of the manifest in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn digests_land_at_positional_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.sum");

        let map = OutputMap::create(&path, 3 * DIGEST_LEN as u64).unwrap();
        map.write_digest(2, &[2u8; DIGEST_LEN]);
        map.write_digest(0, &[0u8; DIGEST_LEN]);
        map.write_digest(1, &[1u8; DIGEST_LEN]);
        map.flush().unwrap();
        drop(map);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 3 * DIGEST_LEN);
        for k in 0..3u8 {
            let slot = &bytes[k as usize * DIGEST_LEN..(k as usize + 1) * DIGEST_LEN];
            assert!(slot.iter().all(|&b| b == k), "slot {k}");
        }
    }

    #[test]
    fn create_truncates_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.sum");
        std::fs::write(&path, vec![0xFFu8; 1000]).unwrap();

        let map = OutputMap::create(&path, DIGEST_LEN as u64).unwrap();
        drop(map);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), DIGEST_LEN);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn empty_manifest_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(OutputMap::create(&dir.path().join("out.sum"), 0).is_err());
    }

    #[test]
    #[should_panic(expected = "outside manifest")]
    fn out_of_range_chunk_panics() {
        let dir = tempfile::tempdir().unwrap();
        let map = OutputMap::create(&dir.path().join("out.sum"), DIGEST_LEN as u64).unwrap();
        map.write_digest(1, &[0u8; DIGEST_LEN]);
    }

    #[test]
    fn concurrent_disjoint_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.sum");
        let chunks = 64u64;

        let map = Arc::new(OutputMap::create(&path, chunks * DIGEST_LEN as u64).unwrap());
        let handles: Vec<_> = (0..4u64)
            .map(|worker| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || {
                    for k in (worker..chunks).step_by(4) {
                        map.write_digest(k, &[k as u8; DIGEST_LEN]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        map.flush().unwrap();
        drop(map);

        let bytes = std::fs::read(&path).unwrap();
        for k in 0..chunks {
            let slot = &bytes[k as usize * DIGEST_LEN..(k as usize + 1) * DIGEST_LEN];
            assert!(slot.iter().all(|&b| b == k as u8), "slot {k}");
        }
    }
}
