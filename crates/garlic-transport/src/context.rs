//! Dial cancellation and deadlines
//!
//! A [`DialContext`] bounds one dial: the session dial and the upgrade both
//! stop when the context's deadline passes or its [`CancelHandle`] fires.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{TransportError, TransportResult};

/// Cancellation and deadline for a dial
#[derive(Debug, Clone, Default)]
pub struct DialContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every [`DialContext`] cloned from the one that created it.
///
/// Dropping the handle does not cancel.
#[derive(Debug)]
pub struct CancelHandle {
    cancel_tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

impl DialContext {
    /// Context with no deadline that is never cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attach a cancellation signal and return the handle that fires it.
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancel = Some(cancel_rx);
        (self, CancelHandle { cancel_tx })
    }

    /// Keep an existing deadline, otherwise use `timeout` from now.
    pub fn or_timeout(self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(timeout)) => self.with_timeout(timeout),
            _ => self,
        }
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check of both the signal and the deadline
    pub fn is_cancelled(&self) -> bool {
        let signalled = self.cancel.as_ref().is_some_and(|rx| *rx.borrow());
        let expired = self.deadline.is_some_and(|deadline| deadline <= Instant::now());
        signalled || expired
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        let signal = async {
            if let Some(rx) = &self.cancel {
                let mut rx = rx.clone();
                loop {
                    if *rx.borrow_and_update() {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            }
            std::future::pending::<()>().await;
        };
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            () = signal => {}
            () = deadline => {}
        }
    }

    /// Drive `fut` unless the context is cancelled first.
    ///
    /// `stage` names the step in the returned error. A cancelled future is
    /// dropped, which releases anything it owned.
    pub async fn run<F: Future>(&self, stage: &str, fut: F) -> TransportResult<F::Output> {
        if self.is_cancelled() {
            return Err(TransportError::cancelled(format!(
                "{stage} not started, dial context already cancelled"
            )));
        }

        tokio::select! {
            biased;
            () = self.cancelled() => Err(TransportError::cancelled(format!(
                "{stage} interrupted by dial context"
            ))),
            output = fut => Ok(output),
        }
    }
}
