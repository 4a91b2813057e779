// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-at-a-time execution per connection.
//!
//! Every operation on a connection first takes an [`ExecutorGuard`]. Guards
//! are handed out in submission order; a caller that already owns the running
//! task (for example the body of a transaction) passes its [`TaskId`] and runs
//! inline instead of queueing behind itself.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use thunder_core::{ConnectionId, ThunderError};

/// Identity of the task currently allowed to run on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

struct Waiter {
    task: TaskId,
    wake: oneshot::Sender<()>,
}

#[derive(Default)]
struct ExecState {
    current: Option<TaskId>,
    waiters: VecDeque<Waiter>,
    closed: bool,
    next_task: u64,
}

impl ExecState {
    fn next_task(&mut self) -> TaskId {
        self.next_task += 1;
        TaskId(self.next_task)
    }
}

/// FIFO gate that serializes the operations of one connection.
pub struct SerialExecutor {
    connection: ConnectionId,
    state: Mutex<ExecState>,
}

impl std::fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl SerialExecutor {
    pub fn new(connection: ConnectionId) -> Self {
        Self {
            connection,
            state: Mutex::new(ExecState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ExecState> {
        // The state is only mutated under short critical sections without
        // panicking code, so a poisoned lock still holds consistent data.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn closed(&self) -> ThunderError {
        ThunderError::DatabaseClosed {
            id: self.connection,
        }
    }

    /// Waits for this caller's turn.
    ///
    /// `caller` is the task the request originates from, if any. When it is
    /// the task that currently owns the connection the guard is granted
    /// immediately and releasing it leaves ownership untouched.
    pub async fn acquire(&self, caller: Option<TaskId>) -> Result<ExecutorGuard<'_>, ThunderError> {
        let ticket = {
            let mut state = self.state();
            if let Some(caller) = caller
                && state.current == Some(caller)
            {
                trace!(connection = %self.connection, "re-entrant call runs inline");
                return Ok(ExecutorGuard::inline(self, caller));
            }
            if state.closed {
                return Err(self.closed());
            }
            let task = state.next_task();
            if state.current.is_none() {
                state.current = Some(task);
                return Ok(ExecutorGuard::owned(self, task));
            }
            self.enqueue(&mut state, task)
        };
        ticket.wait().await
    }

    /// Marks the connection closed and waits for the running task to finish.
    ///
    /// Every queued caller is rejected with [`ThunderError::DatabaseClosed`].
    /// The returned guard gives the closer exclusive access for teardown.
    pub async fn shutdown(&self) -> Result<ExecutorGuard<'_>, ThunderError> {
        let ticket = {
            let mut state = self.state();
            if state.closed {
                return Err(self.closed());
            }
            state.closed = true;
            let rejected = state.waiters.len();
            state.waiters.clear();
            if rejected > 0 {
                debug!(connection = %self.connection, rejected, "queued operations rejected");
            }
            let task = state.next_task();
            if state.current.is_none() {
                state.current = Some(task);
                return Ok(ExecutorGuard::owned(self, task));
            }
            self.enqueue(&mut state, task)
        };
        ticket.wait().await
    }

    fn enqueue<'a>(&'a self, state: &mut ExecState, task: TaskId) -> Ticket<'a> {
        let (wake, rx) = oneshot::channel();
        state.waiters.push_back(Waiter { task, wake });
        trace!(connection = %self.connection, queued = state.waiters.len(), "operation queued");
        Ticket {
            executor: self,
            task,
            rx,
            granted: false,
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Hands the connection to the next live waiter.
    fn release(&self, task: TaskId) {
        let mut state = self.state();
        if state.current != Some(task) {
            return;
        }
        state.current = None;
        while let Some(waiter) = state.waiters.pop_front() {
            state.current = Some(waiter.task);
            if waiter.wake.send(()).is_ok() {
                return;
            }
            state.current = None;
        }
    }
}

/// A queued caller. Dropping it after the hand-off but before the guard was
/// built passes the turn on instead of stalling the queue.
struct Ticket<'a> {
    executor: &'a SerialExecutor,
    task: TaskId,
    rx: oneshot::Receiver<()>,
    granted: bool,
}

impl<'a> Ticket<'a> {
    async fn wait(mut self) -> Result<ExecutorGuard<'a>, ThunderError> {
        match (&mut self.rx).await {
            Ok(()) => {
                self.granted = true;
                Ok(ExecutorGuard::owned(self.executor, self.task))
            }
            Err(_) => Err(self.executor.closed()),
        }
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            self.executor.release(self.task);
        }
    }
}

/// Exclusive right to run on a connection; the next caller proceeds when it
/// is dropped.
#[must_use = "the connection is released as soon as the guard is dropped"]
pub struct ExecutorGuard<'a> {
    executor: &'a SerialExecutor,
    task: TaskId,
    owned: bool,
}

impl<'a> ExecutorGuard<'a> {
    fn owned(executor: &'a SerialExecutor, task: TaskId) -> Self {
        Self {
            executor,
            task,
            owned: true,
        }
    }

    fn inline(executor: &'a SerialExecutor, task: TaskId) -> Self {
        Self {
            executor,
            task,
            owned: false,
        }
    }

    /// The running task; pass it back to [`SerialExecutor::acquire`] for
    /// nested calls.
    pub fn task(&self) -> TaskId {
        self.task
    }
}

impl Drop for ExecutorGuard<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.executor.release(self.task);
        }
    }
}
