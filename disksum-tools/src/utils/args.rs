/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! The `/name:value` command-line surface.
//!
//! Every flag is a single token of the form `/<name>:<value>`; the shell has
//! already applied quote handling, so values with embedded spaces arrive as
//! one token. Integer values accept a leading `0x` for hexadecimal.

use std::path::PathBuf;

use thiserror::Error;

use disksum::{DEFAULT_IO_BLOCK_SZ, DEFAULT_QUEUE_DEPTH};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("Missing /{0}")]
    Missing(&'static str),

    #[error("Malformed argument '{0}'; expected /name:value")]
    Malformed(String),

    #[error("Invalid integer '{value}' for /{flag}")]
    InvalidInteger { flag: String, value: String },
}

/// Raw, syntactically-parsed flags. Range and consistency checks belong to
/// `RunConfig::validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// `/disk` — raw device path (required).
    pub disk: PathBuf,

    /// `/out` — output manifest path (required).
    pub out: PathBuf,

    /// `/align` — chunk alignment and size in bytes (required).
    pub align: u64,

    /// `/iosize` — bytes per device read.
    pub io_size: u64,

    /// `/iodepth` — maximum in-flight reads.
    pub io_depth: u64,

    /// `/threads` — worker count; 0 means all physical cores.
    pub threads: u64,

    /// `/bytes` — device byte range to hash; 0 means the whole device.
    pub bytes: u64,
}

impl CliArgs {
    /// Parse the program arguments (without argv[0]).
    pub fn parse<I>(tokens: I) -> Result<Self, ArgsError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut flags: Vec<(String, String)> = Vec::new();
        for token in tokens {
            let Some(rest) = token.strip_prefix('/') else {
                return Err(ArgsError::Malformed(token));
            };
            let Some((name, value)) = rest.split_once(':') else {
                return Err(ArgsError::Malformed(token));
            };
            flags.push((name.to_string(), value.to_string()));
        }

        for (name, _) in &flags {
            if !matches!(
                name.as_str(),
                "disk" | "out" | "align" | "iosize" | "iodepth" | "threads" | "bytes"
            ) {
                tracing::warn!(flag = %name, "ignoring unknown flag");
            }
        }

        let take = |flag: &'static str| -> Option<&str> {
            flags
                .iter()
                .find(|(name, _)| name == flag)
                .map(|(_, value)| value.as_str())
        };

        let disk = take("disk").ok_or(ArgsError::Missing("disk"))?;
        let out = take("out").ok_or(ArgsError::Missing("out"))?;
        let align = parse_int("align", take("align").ok_or(ArgsError::Missing("align"))?)?;

        let io_size = match take("iosize") {
            Some(value) => parse_int("iosize", value)?,
            None => DEFAULT_IO_BLOCK_SZ as u64,
        };
        let io_depth = match take("iodepth") {
            Some(value) => parse_int("iodepth", value)?,
            None => DEFAULT_QUEUE_DEPTH as u64,
        };
        let threads = match take("threads") {
            Some(value) => parse_int("threads", value)?,
            None => 0,
        };
        let bytes = match take("bytes") {
            Some(value) => parse_int("bytes", value)?,
            None => 0,
        };

        Ok(Self {
            disk: PathBuf::from(disk),
            out: PathBuf::from(out),
            align,
            io_size,
            io_depth,
            threads,
            bytes,
        })
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer.
fn parse_int(flag: &'static str, value: &str) -> Result<u64, ArgsError> {
    let (digits, radix) = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (value, 10),
    };

    u64::from_str_radix(digits, radix).map_err(|_| ArgsError::InvalidInteger {
        flag: flag.to_string(),
        value: value.to_string(),
    })
}
