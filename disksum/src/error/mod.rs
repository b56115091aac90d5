/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

pub(crate) mod sum_error;
pub use sum_error::{ErrorContext, SumError, SumErrorKind, SumResult};
