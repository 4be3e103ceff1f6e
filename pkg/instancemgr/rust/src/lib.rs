// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::string_slice)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod angel;
pub mod commands;
pub mod connection;
pub mod context;
pub mod errors;
pub mod guardian;
pub mod instance;
pub mod instance_map;
pub mod instance_options;
pub mod listener;
pub mod manager;
pub mod option_file;
pub mod options;
pub mod pid_file;
pub mod process;
pub mod protocol;
pub mod state;
pub mod thread_registry;
pub mod user_map;

#[cfg(test)]
pub(crate) mod test_utils;

pub use context::Context;
pub use errors::ErrorCode;
pub use options::Options;
pub use state::InstanceState;
