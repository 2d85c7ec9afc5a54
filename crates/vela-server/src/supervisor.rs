//! Runs the server's long-lived tasks under one cancellation token.
//!
//! The first task to fail cancels the token; every other task is expected
//! to notice and return. [`Supervisor::wait`] returns once all of them have
//! stopped, with the first failure if there was one.

use anyhow::anyhow;
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct Supervisor {
    cancel: CancellationToken,
    tasks: JoinSet<(&'static str, anyhow::Result<()>)>,
}

impl Supervisor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: JoinSet::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        debug!(task = name, "starting task");
        self.tasks.spawn(async move { (name, task.await) });
    }

    /// Wait for every task to stop.
    pub async fn wait(mut self) -> anyhow::Result<()> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let (name, result) = match joined {
                Ok(finished) => finished,
                Err(e) => ("unknown", Err(anyhow!("task panicked: {}", e))),
            };

            match result {
                Ok(()) => debug!(task = name, "task stopped"),
                Err(e) => {
                    error!(task = name, error = %e, "task failed, shutting down");
                    self.cancel.cancel();
                    if first_error.is_none() {
                        first_error = Some(e.context(format!("{} failed", name)));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Cancel `cancel` on SIGINT or SIGTERM. Returns early if it is cancelled
/// by someone else.
pub async fn shutdown_signal(cancel: CancellationToken) -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
        _ = cancel.cancelled() => return Ok(()),
    }

    cancel.cancel();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_error_cancels_siblings() {
        let mut supervisor = Supervisor::new(CancellationToken::new());
        let cancel = supervisor.cancel_token();

        supervisor.spawn("loop", async move {
            cancel.cancelled().await;
            Ok(())
        });
        supervisor.spawn("http", async { Err(anyhow!("address in use")) });

        let result = tokio::time::timeout(Duration::from_secs(5), supervisor.wait())
            .await
            .unwrap();

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "http failed");
        assert_eq!(err.root_cause().to_string(), "address in use");
    }

    #[tokio::test]
    async fn test_clean_shutdown() {
        let cancel = CancellationToken::new();
        let mut supervisor = Supervisor::new(cancel.clone());
        for name in ["refresher", "evaluator", "cleanup"] {
            let token = supervisor.cancel_token();
            supervisor.spawn(name, async move {
                token.cancelled().await;
                Ok(())
            });
        }
        let signal = supervisor.cancel_token();
        supervisor.spawn("signal", shutdown_signal(signal));

        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), supervisor.wait())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_panic_is_an_error() {
        let mut supervisor = Supervisor::new(CancellationToken::new());
        let cancel = supervisor.cancel_token();
        let explode = true;
        supervisor.spawn("boom", async move {
            if explode {
                panic!("boom");
            }
            Ok(())
        });

        assert!(supervisor.wait().await.is_err());
        assert!(cancel.is_cancelled());
    }
}
