//! The serial operation-processing task and its submission handle.

use relay_core::{Operation, OperationContext, OperationHandler, PipelineChannels, PipelineInput};
use tokio::sync::mpsc;

/// Handle held by the host-facing surface.
///
/// Submission is fire-and-forget: callers never learn whether an operation
/// survived the chain, and a closed pipeline only produces a log line.
#[derive(Clone, Debug)]
pub struct PipelineHandle {
    channels: PipelineChannels,
}

impl PipelineHandle {
    /// Hand one operation to the pipeline.
    pub fn submit(&self, operation: Operation) {
        if self.channels.submit(operation).is_err() {
            tracing::error!("pipeline task is gone; dropping operation");
        }
    }

    /// Append a handler behind every handler installed so far.
    ///
    /// Installation flows through the operation channel, so operations
    /// submitted before this call never see the new handler and operations
    /// submitted after it always do.
    pub fn add_handler(&self, handler: Box<dyn OperationHandler>) {
        if self.channels.install(handler).is_err() {
            tracing::error!("pipeline task is gone; dropping handler");
        }
    }
}

/// Start the pipeline task over an initial handler chain.
pub fn spawn_pipeline(handlers: Vec<Box<dyn OperationHandler>>) -> PipelineHandle {
    let (channels, input_rx) = PipelineChannels::new();
    tokio::spawn(run(handlers, input_rx));
    PipelineHandle { channels }
}

async fn run(
    mut handlers: Vec<Box<dyn OperationHandler>>,
    mut input_rx: mpsc::UnboundedReceiver<PipelineInput>,
) {
    while let Some(input) = input_rx.recv().await {
        match input {
            PipelineInput::Install(handler) => {
                tracing::debug!(handler = handler.name(), "installing pipeline handler");
                handlers.push(handler);
            }
            PipelineInput::Operation(ctx) => {
                process(&handlers, ctx).await;
            }
        }
    }
    tracing::debug!("pipeline input channel closed; stopping");
}

/// Run one operation through the chain front to back.
///
/// An `Err` or an `Ok(None)` stops this operation only; the task keeps
/// serving the next input either way.
async fn process(handlers: &[Box<dyn OperationHandler>], mut ctx: OperationContext) {
    for handler in handlers {
        match handler.handle(ctx).await {
            Ok(Some(next)) => ctx = next,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(handler = handler.name(), error = %err, "operation dropped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use relay_core::DeliveryError;

    use super::*;

    struct RecordingHandler {
        label: &'static str,
        seen: Arc<Mutex<Vec<(&'static str, Operation)>>>,
    }

    #[async_trait]
    impl OperationHandler for RecordingHandler {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn handle(
            &self,
            ctx: OperationContext,
        ) -> Result<Option<OperationContext>, DeliveryError> {
            self.seen
                .lock()
                .expect("seen lock")
                .push((self.label, ctx.operation.clone()));
            Ok(Some(ctx))
        }
    }

    struct RejectingHandler;

    #[async_trait]
    impl OperationHandler for RejectingHandler {
        fn name(&self) -> &'static str {
            "rejecting"
        }

        async fn handle(
            &self,
            ctx: OperationContext,
        ) -> Result<Option<OperationContext>, DeliveryError> {
            match ctx.operation {
                Operation::OptOut => Err(DeliveryError::Capability("mock rejection".to_owned())),
                _ => Ok(Some(ctx)),
            }
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn operations_flow_through_handlers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = spawn_pipeline(vec![
            Box::new(RecordingHandler {
                label: "first",
                seen: seen.clone(),
            }),
            Box::new(RecordingHandler {
                label: "second",
                seen: seen.clone(),
            }),
        ]);

        pipeline.submit(Operation::OptIn);
        pipeline.submit(Operation::DispatchNow);
        settle().await;

        let seen = seen.lock().expect("seen lock").clone();
        assert_eq!(
            seen,
            vec![
                ("first", Operation::OptIn),
                ("second", Operation::OptIn),
                ("first", Operation::DispatchNow),
                ("second", Operation::DispatchNow),
            ]
        );
    }

    #[tokio::test]
    async fn a_rejected_operation_does_not_stop_later_ones() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = spawn_pipeline(vec![
            Box::new(RejectingHandler),
            Box::new(RecordingHandler {
                label: "tail",
                seen: seen.clone(),
            }),
        ]);

        pipeline.submit(Operation::OptOut);
        pipeline.submit(Operation::OptIn);
        settle().await;

        let seen = seen.lock().expect("seen lock").clone();
        assert_eq!(seen, vec![("tail", Operation::OptIn)]);
    }

    #[tokio::test]
    async fn installation_is_ordered_against_submissions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = spawn_pipeline(vec![]);

        pipeline.submit(Operation::OptIn);
        pipeline.add_handler(Box::new(RecordingHandler {
            label: "late",
            seen: seen.clone(),
        }));
        pipeline.submit(Operation::DispatchNow);
        settle().await;

        let seen = seen.lock().expect("seen lock").clone();
        assert_eq!(seen, vec![("late", Operation::DispatchNow)]);
    }
}
