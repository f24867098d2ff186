use std::fmt;

use async_trait::async_trait;

use crate::{error::DeliveryError, types::OperationContext};

/// One stage of the operation pipeline.
///
/// A handler either forwards a (possibly transformed) context to the next
/// stage (`Ok(Some)`), terminates processing successfully (`Ok(None)`), or
/// rejects the operation (`Err`). Rejections are logged at the pipeline
/// boundary and stop the chain for that operation only.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Stable handler name used in logs.
    fn name(&self) -> &'static str;

    /// Process one operation-in-flight.
    async fn handle(
        &self,
        ctx: OperationContext,
    ) -> Result<Option<OperationContext>, DeliveryError>;
}

impl fmt::Debug for dyn OperationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandler")
            .field("name", &self.name())
            .finish()
    }
}
