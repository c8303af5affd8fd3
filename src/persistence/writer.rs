use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::layer::{PersistenceLayer, SaveOutcome};
use crate::models::Activity;

enum WriterRequest {
    Save {
        activity: Activity,
        reply: Option<oneshot::Sender<SaveOutcome>>,
    },
    /// Answered once every earlier request has been applied.
    Barrier(oneshot::Sender<()>),
}

/// Background writer that applies saves one at a time in submission order.
///
/// Callers never wait on storage unless they ask to; an open record and its
/// later closed version therefore always reach the store in that order.
#[derive(Clone)]
pub struct SaveWriter {
    sender: mpsc::UnboundedSender<WriterRequest>,
}

impl SaveWriter {
    pub fn spawn(layer: PersistenceLayer) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<WriterRequest>();

        let handle = tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                match request {
                    WriterRequest::Save { activity, reply } => {
                        let outcome = layer.save(activity).await;
                        if let Some(reply) = reply {
                            // The waiter may have timed out already.
                            let _ = reply.send(outcome);
                        }
                    }
                    WriterRequest::Barrier(reply) => {
                        let _ = reply.send(());
                    }
                }
            }
            log::debug!("Save writer drained; exiting");
        });

        (Self { sender }, handle)
    }

    pub fn submit(&self, activity: Activity) {
        let request = WriterRequest::Save {
            activity,
            reply: None,
        };
        if self.sender.send(request).is_err() {
            log::error!("Save writer stopped; activity dropped");
        }
    }

    /// Submits `activity` and waits up to `timeout` for its outcome.
    ///
    /// Returns `None` if the writer is gone or the deadline passed; the save
    /// itself still completes in the background in the latter case.
    pub async fn submit_and_wait(
        &self,
        activity: Activity,
        timeout: Duration,
    ) -> Option<SaveOutcome> {
        let (reply, outcome) = oneshot::channel();
        let request = WriterRequest::Save {
            activity,
            reply: Some(reply),
        };
        if self.sender.send(request).is_err() {
            log::error!("Save writer stopped; activity dropped");
            return None;
        }

        match tokio::time::timeout(timeout, outcome).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(_)) => None,
            Err(_) => {
                log::warn!("Save did not complete within {}ms", timeout.as_millis());
                None
            }
        }
    }

    /// Resolves once every save submitted before this call has been applied.
    pub async fn settled(&self) {
        let (reply, done) = oneshot::channel();
        if self.sender.send(WriterRequest::Barrier(reply)).is_ok() {
            let _ = done.await;
        }
    }
}
