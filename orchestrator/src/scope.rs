//! Cancellable, deadline-bound execution scope for one pipeline run.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

/// Why a scoped operation stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct RunScope {
    token: CancellationToken,
    deadline: Instant,
    time_limit: Duration,
}

impl RunScope {
    pub fn new(time_limit: Duration) -> Self {
        Self::with_token(CancellationToken::new(), time_limit)
    }

    /// Scope cancelled whenever `parent` is.
    pub fn child_of(parent: &CancellationToken, time_limit: Duration) -> Self {
        Self::with_token(parent.child_token(), time_limit)
    }

    fn with_token(token: CancellationToken, time_limit: Duration) -> Self {
        Self {
            token,
            deadline: Instant::now() + time_limit,
            time_limit,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the scope is cancelled or its deadline passes.
    /// Cancellation wins when both are already true.
    pub async fn interrupted(&self) -> Interrupt {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Interrupt::Cancelled,
            _ = tokio::time::sleep_until(self.deadline) => Interrupt::TimedOut,
        }
    }

    /// Drive `fut` unless the scope is interrupted first; `fut` is dropped
    /// on interruption.
    pub async fn bound<F, T>(&self, fut: F) -> Result<T, Interrupt>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            interrupt = self.interrupted() => Err(interrupt),
            value = fut => Ok(value),
        }
    }

    /// Like [`RunScope::bound`] for fallible stages, folding the interruption
    /// into the stage's error.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        self.bound(fut)
            .await
            .map_err(|interrupt| self.interrupt_error(interrupt))?
    }

    pub fn interrupt_error(&self, interrupt: Interrupt) -> PipelineError {
        match interrupt {
            Interrupt::Cancelled => PipelineError::Cancelled,
            Interrupt::TimedOut => PipelineError::TimedOut(self.time_limit),
        }
    }
}
