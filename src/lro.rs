//! Long-running operation polling.
//!
//! Both waiters drive the same [`PollState`] machine and differ only in how
//! they sleep between polls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{AgentEngineError, AgentEngineResult};
use crate::types::Operation;

/// Where an operation stands after a poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    /// Not finished yet.
    Pending(Operation),
    /// Finished successfully.
    DoneOk(Operation),
    /// Finished with an error.
    DoneErr(Operation),
}

impl PollState {
    /// Classify a freshly polled operation.
    pub fn from_operation(operation: Operation) -> Self {
        if !operation.done {
            PollState::Pending(operation)
        } else if operation.error.is_some() {
            PollState::DoneErr(operation)
        } else {
            PollState::DoneOk(operation)
        }
    }

    /// Whether polling should stop.
    pub fn is_done(&self) -> bool {
        !matches!(self, PollState::Pending(_))
    }

    /// The operation in any state.
    pub fn operation(&self) -> &Operation {
        match self {
            PollState::Pending(op) | PollState::DoneOk(op) | PollState::DoneErr(op) => op,
        }
    }

    /// The operation in any state.
    pub fn into_operation(self) -> Operation {
        match self {
            PollState::Pending(op) | PollState::DoneOk(op) | PollState::DoneErr(op) => op,
        }
    }
}

/// Poll `name` with `get` until it is done, sleeping `poll_interval` between
/// polls.
///
/// The finished operation is returned as-is; callers surface its error with
/// [`Operation::into_result`]. When `cancel` fires the wait stops with
/// [`AgentEngineError::Cancelled`]; the remote operation keeps running.
pub async fn await_operation<F, Fut>(
    name: &str,
    mut get: F,
    poll_interval: Duration,
    cancel: Option<CancellationToken>,
) -> AgentEngineResult<Operation>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = AgentEngineResult<Operation>>,
{
    let cancel = cancel.unwrap_or_else(CancellationToken::new);
    loop {
        let state = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled(name)),
            op = get(name.to_string()) => PollState::from_operation(op?),
        };
        if state.is_done() {
            return Ok(state.into_operation());
        }
        debug!("Operation {} still running", name);
        tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled(name)),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Blocking counterpart of [`await_operation`].
pub fn await_operation_blocking<F>(
    name: &str,
    mut get: F,
    poll_interval: Duration,
) -> AgentEngineResult<Operation>
where
    F: FnMut(&str) -> AgentEngineResult<Operation>,
{
    loop {
        let state = PollState::from_operation(get(name)?);
        if state.is_done() {
            return Ok(state.into_operation());
        }
        debug!("Operation {} still running", name);
        std::thread::sleep(poll_interval);
    }
}

fn cancelled(name: &str) -> AgentEngineError {
    AgentEngineError::Cancelled(format!("stopped waiting for operation {name}"))
}
