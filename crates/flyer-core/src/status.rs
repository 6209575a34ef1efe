//! Completion handles for asynchronous lifecycle operations.
//!
//! `start()` and `stop()` return a [`Status`] instead of blocking. A status
//! is either already finished (standalone channels, masters) or pending on a
//! [`StatusHandle`] held by a background task (slaves waiting on their
//! trigger line). Statuses combine with [`Status::all`], which is how a group
//! hands back one joint handle for all of its members.

use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::watch;

use crate::error::{FlyerError, Result};

/// Progress of one tracked operation.
#[derive(Debug, Clone)]
pub enum StatusState {
    /// Still running
    Pending,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed(Arc<FlyerError>),
}

impl StatusState {
    /// Whether the operation has not finished yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone)]
struct StatusPart {
    name: String,
    rx: watch::Receiver<StatusState>,
}

impl StatusPart {
    async fn wait(mut self) -> Result<()> {
        loop {
            let state = self.rx.borrow_and_update().clone();
            match state {
                StatusState::Done => return Ok(()),
                StatusState::Failed(cause) => {
                    return Err(FlyerError::StatusFailed { name: self.name, cause })
                }
                StatusState::Pending => {}
            }
            if self.rx.changed().await.is_err() && self.rx.borrow().is_pending() {
                return Err(FlyerError::StatusFailed {
                    name: self.name,
                    cause: Arc::new(FlyerError::Join("completion handle dropped".into())),
                });
            }
        }
    }
}

/// Joint completion handle for one or more operations.
#[derive(Debug, Clone, Default)]
pub struct Status {
    parts: Vec<StatusPart>,
}

impl Status {
    /// A status that is already done.
    pub fn done(name: impl Into<String>) -> Self {
        Self::finished(name, StatusState::Done)
    }

    /// A status that has already failed with `err`.
    pub fn failed(name: impl Into<String>, err: FlyerError) -> Self {
        Self::finished(name, StatusState::Failed(Arc::new(err)))
    }

    fn finished(name: impl Into<String>, state: StatusState) -> Self {
        let (_tx, rx) = watch::channel(state);
        Self {
            parts: vec![StatusPart {
                name: name.into(),
                rx,
            }],
        }
    }

    /// A pending status and the handle that completes it.
    pub fn pending(name: impl Into<String>) -> (Self, StatusHandle) {
        let name = name.into();
        let (tx, rx) = watch::channel(StatusState::Pending);
        let status = Self {
            parts: vec![StatusPart {
                name: name.clone(),
                rx,
            }],
        };
        (status, StatusHandle { name, tx: Some(tx) })
    }

    /// Combine several statuses into one that completes when all of them do.
    pub fn all(statuses: impl IntoIterator<Item = Status>) -> Self {
        Self {
            parts: statuses.into_iter().flat_map(|s| s.parts).collect(),
        }
    }

    /// Combine with another status.
    pub fn and(mut self, other: Status) -> Self {
        self.parts.extend(other.parts);
        self
    }

    /// Names of the tracked operations.
    pub fn names(&self) -> Vec<&str> {
        self.parts.iter().map(|p| p.name.as_str()).collect()
    }

    /// Current combined state: failed if any part failed, done if all are.
    pub fn state(&self) -> StatusState {
        let mut pending = false;
        for part in &self.parts {
            match &*part.rx.borrow() {
                StatusState::Failed(cause) => return StatusState::Failed(Arc::clone(cause)),
                StatusState::Pending => pending = true,
                StatusState::Done => {}
            }
        }
        if pending {
            StatusState::Pending
        } else {
            StatusState::Done
        }
    }

    /// Whether every tracked operation finished successfully.
    pub fn is_done(&self) -> bool {
        matches!(self.state(), StatusState::Done)
    }

    /// Wait for every part; fails as soon as one part fails.
    pub async fn wait(&self) -> Result<()> {
        try_join_all(self.parts.iter().cloned().map(StatusPart::wait)).await?;
        Ok(())
    }
}

/// Completes a pending [`Status`].
///
/// Dropping the handle without finishing it fails the status.
#[derive(Debug)]
pub struct StatusHandle {
    name: String,
    tx: Option<watch::Sender<StatusState>>,
}

impl StatusHandle {
    /// Name of the tracked operation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark the operation done.
    pub fn finish(mut self) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(StatusState::Done);
        }
    }

    /// Mark the operation failed.
    pub fn fail(mut self, err: FlyerError) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(StatusState::Failed(Arc::new(err)));
        }
    }
}

impl Drop for StatusHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(StatusState::Failed(Arc::new(FlyerError::Join(format!(
                "'{}' dropped before completion",
                self.name
            )))));
        }
    }
}
