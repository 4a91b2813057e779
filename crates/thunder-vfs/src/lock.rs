// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Advisory file locks shared by every handle on one file.
//!
//! Mirrors SQLite's five-level rollback-journal locking. A request that
//! conflicts with another handle is answered with `SQLITE_BUSY`; the engine's
//! busy handler retries until the holder lets go.

use std::os::raw::c_int;

use rusqlite::ffi;

/// SQLite lock levels, weakest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    #[default]
    None,
    Shared,
    Reserved,
    Pending,
    Exclusive,
}

impl LockLevel {
    pub fn from_raw(level: c_int) -> Option<Self> {
        match level {
            ffi::SQLITE_LOCK_NONE => Some(LockLevel::None),
            ffi::SQLITE_LOCK_SHARED => Some(LockLevel::Shared),
            ffi::SQLITE_LOCK_RESERVED => Some(LockLevel::Reserved),
            ffi::SQLITE_LOCK_PENDING => Some(LockLevel::Pending),
            ffi::SQLITE_LOCK_EXCLUSIVE => Some(LockLevel::Exclusive),
            _ => None,
        }
    }
}

/// Result of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Granted(LockLevel),
    /// The request conflicts; the handle should now hold `hold`.
    Busy { hold: LockLevel },
}

/// Decides a request for `wanted` by a handle holding `held`, given the
/// levels held by every other handle on the same file.
pub fn request(held: LockLevel, wanted: LockLevel, others: &[LockLevel]) -> LockOutcome {
    if held >= wanted {
        return LockOutcome::Granted(held);
    }
    let strongest = others.iter().copied().max().unwrap_or_default();
    let busy = LockOutcome::Busy { hold: held };

    match wanted {
        LockLevel::None => LockOutcome::Granted(held),
        LockLevel::Shared if strongest >= LockLevel::Pending => busy,
        LockLevel::Shared => LockOutcome::Granted(LockLevel::Shared),
        LockLevel::Reserved | LockLevel::Pending if strongest >= LockLevel::Reserved => busy,
        LockLevel::Reserved | LockLevel::Pending => LockOutcome::Granted(wanted),
        LockLevel::Exclusive if strongest >= LockLevel::Reserved => busy,
        // Readers remain: hold PENDING so no new reader gets in while we wait.
        LockLevel::Exclusive if strongest >= LockLevel::Shared => LockOutcome::Busy {
            hold: LockLevel::Pending,
        },
        LockLevel::Exclusive => LockOutcome::Granted(LockLevel::Exclusive),
    }
}
