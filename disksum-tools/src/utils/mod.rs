/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
pub mod args;
pub use args::{ArgsError, CliArgs};

pub mod parameter_helper;
pub use parameter_helper::resolve_thread_count;

pub mod tracing;
pub use tracing::{init_subscriber, init_test_subscriber};
