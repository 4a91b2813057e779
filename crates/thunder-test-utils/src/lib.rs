// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Thunder integration tests.
//!
//! [`TestWorker`] assembles a complete worker (block store, file system,
//! service and router) over a memory or temp-file store, so tests can drive
//! the request protocol without a host process.

pub mod harness;

pub use harness::{TestWorker, TestWorkerBuilder};
