/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

pub mod config;
pub mod error;
pub mod layout;

// Top level exports.
pub use config::{RunConfig, DEFAULT_IO_BLOCK_SZ, DEFAULT_QUEUE_DEPTH, MAX_QUEUE_DEPTH, MAX_THREADS};
pub use error::sum_error::{ErrorContext, SumError, SumErrorKind, SumResult};
pub use layout::{RunLayout, DIGEST_LEN};
