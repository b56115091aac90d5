/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Device handle and geometry discovery.

use std::{
    fs::{File, OpenOptions},
    io::{Seek, SeekFrom},
    os::unix::fs::{FileTypeExt, OpenOptionsExt},
    path::Path,
};

use disksum::{ErrorContext, SumError, SumResult};

/// Sector size assumed for regular files and devices that do not answer
/// `BLKSSZGET`.
pub const FALLBACK_SECTOR_SIZE: usize = 512;

/// Open the device read-only for asynchronous reads.
///
/// `direct` applies `O_DIRECT` to bypass the page cache; reads then require
/// sector-aligned offsets, lengths, and buffers, which the pipeline
/// guarantees by construction.
pub fn open_device(path: &Path, direct: bool) -> SumResult<File> {
    let mut options = OpenOptions::new();
    options.read(true);

    if direct {
        options.custom_flags(libc::O_DIRECT);
    }

    options
        .open(path)
        .map_err(SumError::io)
        .with_context(|| format!("Failed to open disk device '{}'", path.display()))
}

/// Total size of the device (or backing file) in bytes.
///
/// Seeking to the end works uniformly for block devices and for the regular
/// files used as synthetic devices in tests, where `metadata().len()` would
/// report zero for the former.
pub fn device_size(device: &File) -> SumResult<u64> {
    let mut handle = device;
    handle
        .seek(SeekFrom::End(0))
        .map_err(SumError::io)
        .context("Failed to fetch disk geometry")
}

/// Logical sector size of a block device, or [`FALLBACK_SECTOR_SIZE`] for
/// anything that is not one.
pub fn logical_sector_size(device: &File) -> SumResult<usize> {
    let metadata = device.metadata().map_err(SumError::io)?;
    if !metadata.file_type().is_block_device() {
        return Ok(FALLBACK_SECTOR_SIZE);
    }

    let mut sector: libc::c_int = 0;
    // SAFETY: BLKSSZGET writes a c_int through the provided pointer; the fd
    // is valid for the lifetime of `device`.
    let rc = unsafe {
        libc::ioctl(
            std::os::fd::AsRawFd::as_raw_fd(device),
            libc::BLKSSZGET,
            &mut sector,
        )
    };
    if rc != 0 {
        return Err(SumError::device(format!(
            "BLKSSZGET failed -- {}",
            std::io::Error::last_os_error()
        )));
    }

    Ok(sector as usize)
}

/// Reject read sizes the device cannot serve unbuffered.
pub fn validate_io_block(io_block_sz: usize, sector: usize) -> SumResult<()> {
    if sector == 0 || io_block_sz % sector != 0 {
        return Err(SumError::device(format!(
            "I/O size must be a multiple of the device sector size ({io_block_sz} % {sector} != 0)"
        )));
    }
    Ok(())
}
