// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Thunder SQL worker.
//!
//! Requests enter through the [`Router`], which decodes them into a closed
//! [`Request`] type and dispatches to the [`DatabaseService`]. The service
//! keeps one [`Database`] per open connection; each database serializes its
//! operations through a [`SerialExecutor`] and runs SQL on a dedicated engine
//! thread over the block-store VFS.

pub mod batch;
pub mod connection;
mod cursor;
pub mod executor;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod service;
mod session;
mod statement;

pub use batch::{BatchEntry, BatchMethod, BatchOperation, BatchOptions, OperationResult};
pub use connection::{Database, OpenOptions};
pub use executor::{ExecutorGuard, SerialExecutor, TaskId};
pub use protocol::{Envelope, Method, Outcome, Request, Response};
pub use registry::ConnectionRegistry;
pub use router::Router;
pub use service::{DatabaseService, ServiceSettings, TransactionScope};
