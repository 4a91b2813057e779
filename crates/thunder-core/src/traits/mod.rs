// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Backend trait definitions.

pub mod block_store;

pub use block_store::{BlockStore, block_offset, check_block};
