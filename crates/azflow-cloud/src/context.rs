//! Cancellation and deadline propagation for remote calls

use crate::error::{CloudError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Per-invocation context carried into every remote call
///
/// Cloning is cheap; all clones observe the same cancellation signal.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: watch::Receiver<bool>,
    deadline: Option<(Instant, Duration)>,
}

/// Handle that cancels every context derived from it
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CallContext {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self {
            cancel: rx,
            deadline: None,
        }
    }

    /// A context paired with a handle that cancels it
    pub fn with_cancel() -> (Self, Canceller) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancel: rx,
                deadline: None,
            },
            Canceller { tx },
        )
    }

    /// Derive a context whose deadline is at most `timeout` from now
    ///
    /// A timeout too large to represent leaves the deadline unchanged.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = match (self.deadline, Instant::now().checked_add(timeout)) {
            (Some((existing, budget)), Some(candidate)) if existing <= candidate => {
                Some((existing, budget))
            }
            (existing, None) => existing,
            (_, Some(candidate)) => Some((candidate, timeout)),
        };
        Self {
            cancel: self.cancel.clone(),
            deadline,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.map(|(at, _)| at)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(CloudError::Cancelled);
        }
        match self.deadline {
            Some((at, budget)) if Instant::now() >= at => Err(CloudError::DeadlineExceeded(budget)),
            _ => Ok(()),
        }
    }

    /// Run a remote call, aborting it on cancellation or deadline expiry
    ///
    /// The call future is dropped as soon as either fires, which aborts any
    /// request it has in flight.
    pub async fn run<F, T>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let mut cancel = self.cancel.clone();
        let expiry = async {
            match self.deadline {
                Some((at, budget)) => {
                    tokio::time::sleep_until(at).await;
                    budget
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => Err(CloudError::Cancelled),
            budget = expiry => Err(CloudError::DeadlineExceeded(budget)),
            result = call => result,
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        // Sender gone: nobody can cancel any more
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
