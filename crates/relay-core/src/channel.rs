use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    handler::OperationHandler,
    types::{Operation, OperationContext},
};

/// Errors returned by pipeline channel operations.
#[derive(Debug, Error)]
pub enum PipelineChannelError {
    /// The pipeline task is gone and no longer receives input.
    #[error("pipeline input channel is closed")]
    Closed,
}

/// Input consumed by the pipeline task, strictly in arrival order.
pub enum PipelineInput {
    /// An operation wrapped at submission time.
    Operation(OperationContext),
    /// Append a handler to the tail of the chain.
    ///
    /// Routed through the same channel as operations so installation cannot
    /// race with in-flight dispatch.
    Install(Box<dyn OperationHandler>),
}

impl fmt::Debug for PipelineInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation(ctx) => f.debug_tuple("Operation").field(ctx).finish(),
            Self::Install(handler) => f.debug_tuple("Install").field(&handler.name()).finish(),
        }
    }
}

/// Sender half used by the public ingestion surface.
///
/// Submission is fire-and-forget: the channel is unbounded so the host
/// thread never blocks on SDK I/O, and no completion signal is surfaced.
#[derive(Clone, Debug)]
pub struct PipelineChannels {
    input_tx: mpsc::UnboundedSender<PipelineInput>,
}

impl PipelineChannels {
    /// Create a new channel pair and return it with the task-side receiver.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineInput>) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        (Self { input_tx }, input_rx)
    }

    /// Enqueue one operation for processing.
    pub fn submit(&self, operation: Operation) -> Result<(), PipelineChannelError> {
        self.input_tx
            .send(PipelineInput::Operation(OperationContext::new(operation)))
            .map_err(|_| PipelineChannelError::Closed)
    }

    /// Append a handler to the tail of the chain.
    pub fn install(&self, handler: Box<dyn OperationHandler>) -> Result<(), PipelineChannelError> {
        self.input_tx
            .send(PipelineInput::Install(handler))
            .map_err(|_| PipelineChannelError::Closed)
    }
}
