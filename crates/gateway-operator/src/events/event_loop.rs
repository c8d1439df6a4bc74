//! Batches watch events and runs one handler invocation at a time

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use super::{Event, EventBatch, FirstEventBatchPreparer};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EventLoopError {
    #[error("failed to prepare the first event batch: {0}")]
    FirstBatch(#[from] StoreError),

    #[error("event handler task failed: {0}")]
    Handler(#[from] JoinError),
}

/// Processes one batch of events at a time
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event_batch(&self, token: &CancellationToken, batch: &EventBatch);
}

/// Drains the event channel into batches and hands them to the handler
///
/// Events that arrive while a batch is being handled are collected into the
/// next batch, so the handler never runs concurrently with itself.
pub struct EventLoop<H> {
    events: mpsc::Receiver<Event>,
    handler: Arc<H>,
    preparer: Option<Box<dyn FirstEventBatchPreparer>>,
}

impl<H: EventHandler> EventLoop<H> {
    pub fn new(events: mpsc::Receiver<Event>, handler: Arc<H>) -> Self {
        Self {
            events,
            handler,
            preparer: None,
        }
    }

    /// Handle a listed snapshot of the cluster before any watch events
    pub fn with_first_batch(mut self, preparer: Box<dyn FirstEventBatchPreparer>) -> Self {
        self.preparer = Some(preparer);
        self
    }

    /// Run until the token is cancelled or every sender is dropped
    ///
    /// A batch already being handled is allowed to finish.
    pub async fn run(mut self, token: CancellationToken) -> Result<(), EventLoopError> {
        if token.is_cancelled() {
            return Ok(());
        }

        let mut batch_id: u64 = 0;
        let mut next: EventBatch = Vec::new();
        let mut handling: Option<JoinHandle<EventBatch>> = None;
        let mut closed = false;

        if let Some(preparer) = self.preparer.take() {
            let first = preparer.prepare().await?;
            info!(events = first.len(), "Prepared first event batch");
            batch_id += 1;
            handling = Some(self.spawn_handler(&token, batch_id, first));
        }

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    if let Some(in_flight) = handling.take() {
                        debug!("Waiting for the in-flight batch before stopping");
                        in_flight.await?;
                    }
                    info!("Event loop stopped");
                    return Ok(());
                }

                done = wait_for(&mut handling) => {
                    handling = None;
                    let mut finished = done?;

                    if next.is_empty() {
                        if closed {
                            info!("Event channel closed, event loop finished");
                            return Ok(());
                        }
                        finished.clear();
                        next = finished;
                    } else {
                        finished.clear();
                        let batch = std::mem::replace(&mut next, finished);
                        batch_id += 1;
                        handling = Some(self.spawn_handler(&token, batch_id, batch));
                    }
                }

                event = self.events.recv(), if !closed => {
                    match event {
                        Some(event) => {
                            next.push(event);
                            if handling.is_none() {
                                let batch = std::mem::take(&mut next);
                                batch_id += 1;
                                handling = Some(self.spawn_handler(&token, batch_id, batch));
                            }
                        }
                        None => {
                            closed = true;
                            if handling.is_none() {
                                info!("Event channel closed, event loop finished");
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    fn spawn_handler(
        &self,
        token: &CancellationToken,
        batch_id: u64,
        batch: EventBatch,
    ) -> JoinHandle<EventBatch> {
        let handler = self.handler.clone();
        let token = token.clone();
        let span = info_span!("batch", batch_id, events = batch.len());

        tokio::spawn(
            async move {
                debug!("Handling events from the batch");
                handler.handle_event_batch(&token, &batch).await;
                debug!("Finished handling the batch");
                batch
            }
            .instrument(span),
        )
    }
}

/// Resolves when the in-flight batch finishes; pending forever when idle
async fn wait_for(handling: &mut Option<JoinHandle<EventBatch>>) -> Result<EventBatch, JoinError> {
    match handling {
        Some(handle) => {
            let result = handle.await;
            if let Err(e) = &result {
                error!(error = %e, "Event handler task failed");
            }
            result
        }
        None => std::future::pending().await,
    }
}
