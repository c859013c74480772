//! Push channel reporting batch progress to a remote observer.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Total {
        count: usize,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        current: usize,
        total: usize,
        file_name: String,
        file_size: u64,
        /// Base64 item payload, present when the observer reassembles the archive itself.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
    Error {
        message: String,
    },
    Complete,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Complete)
    }
}

/// Producer side of a progress channel.
///
/// Keeps the framing intact regardless of caller mistakes: `total` is sent once and first,
/// `complete` once and last. After the observer disconnects every call is a no-op.
pub struct ProgressReporter {
    sender: Option<mpsc::Sender<ProgressEvent>>,
    include_payloads: bool,
    total_sent: bool,
    completed: bool,
}

impl ProgressReporter {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let reporter = Self {
            sender: Some(tx),
            include_payloads: false,
            total_sent: false,
            completed: false,
        };
        (reporter, rx)
    }

    /// A reporter nobody listens to.
    pub fn disabled() -> Self {
        Self {
            sender: None,
            include_payloads: false,
            total_sent: false,
            completed: false,
        }
    }

    pub fn with_payloads(mut self, include: bool) -> Self {
        self.include_payloads = include;
        self
    }

    pub fn wants_payloads(&self) -> bool {
        self.include_payloads && self.is_connected()
    }

    pub fn is_connected(&self) -> bool {
        self.sender.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub async fn total(&mut self, count: usize) {
        if self.total_sent {
            debug!("Ignoring duplicate total event ({})", count);
            return;
        }
        self.total_sent = true;
        self.send(ProgressEvent::Total { count }).await;
    }

    pub async fn progress(
        &mut self,
        current: usize,
        total: usize,
        file_name: &str,
        file_size: u64,
        payload: Option<&[u8]>,
    ) {
        let data = if self.include_payloads {
            payload.map(|bytes| STANDARD.encode(bytes))
        } else {
            None
        };
        self.emit(ProgressEvent::Progress {
            current,
            total,
            file_name: file_name.to_string(),
            file_size,
            data,
        })
        .await;
    }

    pub async fn error(&mut self, message: impl Into<String>) {
        self.emit(ProgressEvent::Error {
            message: message.into(),
        })
        .await;
    }

    pub async fn complete(&mut self) {
        if self.completed {
            return;
        }
        if !self.total_sent {
            self.total(0).await;
        }
        self.completed = true;
        self.send(ProgressEvent::Complete).await;
        self.sender = None;
    }

    /// Report a request-level failure and close the channel.
    pub async fn fail(&mut self, message: impl Into<String>) {
        self.error(message).await;
        self.complete().await;
    }

    async fn emit(&mut self, event: ProgressEvent) {
        if self.completed {
            debug!("Dropping event after completion: {:?}", event);
            return;
        }
        if !self.total_sent {
            self.total(0).await;
        }
        self.send(event).await;
    }

    async fn send(&mut self, event: ProgressEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(event).await.is_err() {
            debug!("Progress observer disconnected; further events are dropped");
            self.sender = None;
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        // an aborted run still terminates the channel
        if !self.completed
            && self.total_sent
            && let Some(sender) = self.sender.take()
        {
            match sender.try_send(ProgressEvent::Complete) {
                Ok(()) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(event)) => match Handle::try_current() {
                    // queued behind the events already buffered
                    Ok(handle) => {
                        handle.spawn(async move {
                            let _ = sender.send(event).await;
                        });
                    }
                    Err(_) => debug!("Progress buffer full outside a runtime; complete dropped"),
                },
            }
        }
    }
}
