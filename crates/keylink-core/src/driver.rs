//! Background polling for a claimed session.
//!
//! [`spawn_claimer`] moves a [`ClaimerSession`] onto a tokio task that polls
//! the relay, reports phase changes over an mpsc channel and stops on a
//! terminal phase, on cancellation, or when the handle is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::claimer::ClaimerSession;
use crate::clock::Clock;
use crate::config::{ClientConfig, RetryPolicy};
use crate::errors::{CoreError, CoreResult};
use crate::types::PairingPhase;

/// One update from a running pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingProgress {
    pub phase: PairingPhase,
    pub verification_code: Option<String>,
    /// Set when the update was caused by an error. Transient transport
    /// errors are reported with a non-terminal phase.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl From<&ClientConfig> for DriverConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            retry: config.retry_policy(),
        }
    }
}

pub struct ClaimerHandle {
    session_id: String,
    verification_code: Option<String>,
    progress: mpsc::Receiver<PairingProgress>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<CoreResult<PairingPhase>>,
}

impl ClaimerHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn verification_code(&self) -> Option<&str> {
        self.verification_code.as_deref()
    }

    /// Next progress update; `None` once the task has finished.
    pub async fn next(&mut self) -> Option<PairingProgress> {
        self.progress.recv().await
    }

    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the final phase.
    pub async fn wait(self) -> CoreResult<PairingPhase> {
        let ClaimerHandle {
            task,
            cancel,
            progress,
            ..
        } = self;
        // The task may block on a full channel; stop listening first.
        drop(progress);
        let result = task
            .await
            .map_err(|e| CoreError::Internal(format!("pairing task failed: {e}")))?;
        drop(cancel);
        result
    }
}

pub fn spawn_claimer(
    session: ClaimerSession,
    clock: Arc<dyn Clock>,
    config: DriverConfig,
) -> ClaimerHandle {
    let (progress_tx, progress_rx) = mpsc::channel(16);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let session_id = session.session_id().to_string();
    let verification_code = session.verification_code().map(str::to_string);
    let task = tokio::spawn(drive(session, clock, config, progress_tx, cancel_rx));
    ClaimerHandle {
        session_id,
        verification_code,
        progress: progress_rx,
        cancel: cancel_tx,
        task,
    }
}

fn progress(session: &ClaimerSession, error: Option<String>) -> PairingProgress {
    PairingProgress {
        phase: session.phase(),
        verification_code: session.verification_code().map(str::to_string),
        error,
    }
}

async fn emit(tx: &mpsc::Sender<PairingProgress>, update: PairingProgress) {
    if tx.send(update).await.is_err() {
        debug!("progress receiver dropped");
    }
}

async fn drive(
    mut session: ClaimerSession,
    clock: Arc<dyn Clock>,
    config: DriverConfig,
    tx: mpsc::Sender<PairingProgress>,
    mut cancel: watch::Receiver<bool>,
) -> CoreResult<PairingPhase> {
    let mut last = session.phase();
    emit(&tx, progress(&session, None)).await;

    let mut delay = config.poll_interval;
    let mut failures = 0u32;
    loop {
        tokio::select! {
            biased;
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    info!(session_id = %session.session_id(), "pairing cancelled");
                    if let Err(e) = session.cancel().await {
                        warn!(error = %e, "cancel not delivered to relay");
                    }
                    emit(&tx, progress(&session, None)).await;
                    return Ok(session.phase());
                }
                continue;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match session.poll().await {
            Ok(phase) => {
                failures = 0;
                delay = config.poll_interval;
                if phase != last {
                    last = phase;
                    emit(&tx, progress(&session, None)).await;
                }
                if phase.is_terminal() {
                    return Ok(phase);
                }
            }
            Err(e) if e.is_transport() => {
                failures += 1;
                delay = config.retry.delay_for(failures);
                let remaining = (session.expires_at() - clock.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if delay >= remaining {
                    warn!(session_id = %session.session_id(), error = %e, "relay unreachable until expiry");
                    session.expire();
                    emit(&tx, progress(&session, Some(e.to_string()))).await;
                    return Ok(session.phase());
                }
                debug!(failures, ?delay, error = %e, "poll failed, backing off");
                emit(&tx, progress(&session, Some(e.to_string()))).await;
            }
            Err(e) => {
                warn!(session_id = %session.session_id(), error = %e, "pairing stopped");
                emit(&tx, progress(&session, Some(e.to_string()))).await;
                return Err(e);
            }
        }
    }
}
