//! Fixed-size worker pool for fetches and disk I/O.
//!
//! The pool either owns a dedicated multi-threaded Tokio runtime or borrows
//! a handle to one the caller already runs. Callers never run engine I/O on
//! their own thread except through the explicit blocking entry points.

use std::future::Future;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub struct WorkerPool {
    handle: Handle,
    // Kept alive for the lifetime of the pool; shut down in `Drop`.
    runtime: Option<Runtime>,
}

impl WorkerPool {
    /// Build a dedicated runtime with `threads` worker threads.
    pub fn new(threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name("screen-config-worker")
            .enable_all()
            .build()
            .map_err(|e| Error::Config(format!("failed to start worker pool: {e}")))?;

        info!(threads, "Worker pool started");
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Run engine work on an existing runtime.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            runtime: None,
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run `future` on the pool and block the calling thread until it
    /// completes or `timeout` elapses.
    ///
    /// Safe to call from any thread, including one that drives the pool.
    pub fn block_on_timeout<F>(&self, future: F, timeout: Duration) -> Option<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        run_blocking(&self.handle, future, timeout)
    }
}

/// Run `future` somewhere it can make progress and wait for its output on a
/// dedicated channel for at most `timeout`.
///
/// A current-thread runtime only advances while its own thread polls it, so
/// when the caller may be that thread the future runs on a short-lived
/// thread of its own instead of on `handle`.
pub(crate) fn run_blocking<F>(handle: &Handle, future: F, timeout: Duration) -> Option<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let task = async move {
        // The caller may already have given up.
        let _ = tx.send(future.await);
    };

    let in_runtime = Handle::try_current().is_ok();
    if in_runtime && handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
        if !spawn_on_own_thread(task) {
            return None;
        }
    } else {
        handle.spawn(task);
    }

    wait_blocking(|| rx.recv_timeout(timeout).ok())
}

fn spawn_on_own_thread<F>(task: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name("screen-config-blocking".to_string())
        .spawn(move || match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime.block_on(task),
            Err(e) => warn!(error = %e, "Failed to start runtime for blocking call"),
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Failed to start thread for blocking call");
        return false;
    }
    true
}

/// Block on `wait`, stepping out of the async scheduler first when called
/// from a multi-threaded runtime worker.
fn wait_blocking<T>(wait: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(wait)
        }
        _ => wait(),
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Never blocks, so dropping the pool inside async code is fine.
            runtime.shutdown_background();
            debug!("Worker pool stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_timeout_returns_output() {
        let pool = WorkerPool::new(2).unwrap();
        let out = pool.block_on_timeout(async { 40 + 2 }, Duration::from_secs(5));
        assert_eq!(out, Some(42));
    }

    #[test]
    fn test_block_on_timeout_gives_up() {
        let pool = WorkerPool::new(1).unwrap();
        let out = pool.block_on_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
            },
            Duration::from_millis(50),
        );
        assert!(out.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_borrowed_handle_from_async_context() {
        let pool = WorkerPool::from_handle(Handle::current());
        let out = pool.block_on_timeout(async { "done" }, Duration::from_secs(5));
        assert_eq!(out, Some("done"));
    }

    #[tokio::test]
    async fn test_block_on_timeout_from_the_driving_thread() {
        let pool = WorkerPool::from_handle(Handle::current());
        let out = pool.block_on_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                "done"
            },
            Duration::from_secs(5),
        );
        assert_eq!(out, Some("done"));
    }
}
