//! Driving async calls from the synchronous API surface.

use std::future::Future;

use tokio::runtime::{Handle, Runtime, RuntimeFlavor};

use crate::error::{AgentEngineError, AgentEngineResult};

/// Where a blocking call runs its future.
#[derive(Debug)]
pub(crate) enum BlockingRuntime {
    /// No runtime on this thread: a private current-thread runtime.
    Owned(Runtime),
    /// Multi-threaded runtime on this thread. Blocking goes through
    /// `block_in_place`, which is safe on workers and on `spawn_blocking`
    /// threads alike.
    Ambient(Handle),
}

impl BlockingRuntime {
    /// Pick a runtime for the calling thread.
    ///
    /// # Errors
    ///
    /// [`AgentEngineError::Config`] with `refusal()` on a current-thread
    /// runtime, where blocking would stall the only executor thread.
    pub(crate) fn for_current_thread(
        refusal: impl FnOnce() -> String,
    ) -> AgentEngineResult<Self> {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                Ok(Self::Ambient(handle))
            }
            Ok(_) => Err(AgentEngineError::config(refusal())),
            Err(_) => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map(Self::Owned)
                .map_err(|e| AgentEngineError::Io(format!("failed to start a runtime: {e}"))),
        }
    }

    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        match self {
            Self::Owned(runtime) => runtime.block_on(future),
            Self::Ambient(handle) => tokio::task::block_in_place(|| handle.block_on(future)),
        }
    }

    /// Run a synchronous section that may sleep the thread.
    pub(crate) fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        match self {
            Self::Owned(_) => f(),
            Self::Ambient(_) => tokio::task::block_in_place(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refusal() -> String {
        "refused".to_string()
    }

    #[test]
    fn private_runtime_off_runtime() {
        let runtime = BlockingRuntime::for_current_thread(refusal).unwrap();
        assert!(matches!(runtime, BlockingRuntime::Owned(_)));
        assert_eq!(runtime.block_on(async { 7 }), 7);
    }

    #[tokio::test]
    async fn current_thread_runtime_is_refused() {
        let err = BlockingRuntime::for_current_thread(refusal).unwrap_err();
        assert!(matches!(err, AgentEngineError::Config { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn multi_thread_workers_and_blocking_pool_can_block() {
        let runtime = BlockingRuntime::for_current_thread(refusal).unwrap();
        assert_eq!(runtime.block_on(async { 1 }), 1);

        let from_pool = tokio::task::spawn_blocking(|| {
            BlockingRuntime::for_current_thread(refusal).map(|r| r.block_on(async { 2 }))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(from_pool, 2);
    }
}
