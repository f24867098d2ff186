//! Delivery components and the terminal dispatcher stage.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{
    Configuration, DeliveryError, Event, Operation, OperationContext, OperationHandler,
};
use serde_json::json;

use crate::{
    capability::{CapabilityRequirement, DeviceCapabilityResolver},
    network::{ApiRequest, NetworkClient, send_expecting_success},
    queue::DurableEventQueue,
    registrar::{Registrar, RegistrationOperation},
};

/// Events sent per dispatch request.
const DISPATCH_BATCH_LIMIT: usize = 50;

/// One delivery destination fed by the pipeline.
///
/// Components see every operation that survives the processing stages and
/// pick the ones they care about. A component failure never reaches the
/// other components or the caller.
#[async_trait]
pub trait Component: Send + Sync {
    /// Stable component name used in logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &OperationContext) -> Result<(), DeliveryError>;
}

/// Terminal pipeline stage fanning each operation out to every component.
pub struct ComponentDispatcher {
    components: Vec<Box<dyn Component>>,
}

impl ComponentDispatcher {
    pub fn new(components: Vec<Box<dyn Component>>) -> Self {
        Self { components }
    }
}

#[async_trait]
impl OperationHandler for ComponentDispatcher {
    fn name(&self) -> &'static str {
        "component-dispatcher"
    }

    async fn handle(
        &self,
        ctx: OperationContext,
    ) -> Result<Option<OperationContext>, DeliveryError> {
        for component in &self.components {
            if let Err(err) = component.handle(&ctx).await {
                tracing::error!(
                    component = component.name(),
                    operation = ?ctx.operation,
                    error = %err,
                    "component failed to process operation"
                );
            }
        }
        Ok(None)
    }
}

/// Batching analytics destination backed by the durable queue.
///
/// Only events whose configuration marks them analytics-supported are
/// queued; the rest flow to the other components untouched.
pub struct AnalyticsComponent {
    configuration: Arc<Configuration>,
    queue: Arc<DurableEventQueue>,
    network: Arc<dyn NetworkClient>,
    tenant_id: u32,
}

impl AnalyticsComponent {
    pub fn new(
        configuration: Arc<Configuration>,
        queue: Arc<DurableEventQueue>,
        network: Arc<dyn NetworkClient>,
        tenant_id: u32,
    ) -> Self {
        Self {
            configuration,
            queue,
            network,
            tenant_id,
        }
    }

    fn accepts(&self, event: &Event) -> bool {
        self.configuration
            .event_config(&event.name)
            .is_none_or(|config| config.supported_on_analytics)
    }

    /// Drain the queue in arrival order until empty or the backend balks.
    ///
    /// Events leave the queue only after the backend acknowledged them, so
    /// a failure mid-drain keeps the unsent tail for the next flush.
    async fn flush(&self) -> Result<(), DeliveryError> {
        loop {
            let batch = self.queue.first(DISPATCH_BATCH_LIMIT);
            if batch.is_empty() {
                return Ok(());
            }

            let request = ApiRequest::new(
                format!("/tenants/{}/events", self.tenant_id),
                json!({ "events": batch }),
            );
            send_expecting_success(self.network.as_ref(), request)
                .await
                .map_err(|err| DeliveryError::Dispatch(err.to_string()))?;

            let acknowledged: Vec<String> =
                batch.iter().map(|event| event.id.clone()).collect();
            self.queue.remove_all(&acknowledged);
        }
    }
}

#[async_trait]
impl Component for AnalyticsComponent {
    fn name(&self) -> &'static str {
        "analytics"
    }

    async fn handle(&self, ctx: &OperationContext) -> Result<(), DeliveryError> {
        if let Some(event) = &ctx.normalized {
            if self.accepts(event) {
                self.queue.enqueue(event.clone());
            }
            return Ok(());
        }
        if ctx.operation == Operation::DispatchNow {
            return self.flush().await;
        }
        Ok(())
    }
}

/// Immediate destination for events flagged for realtime delivery.
pub struct RealtimeComponent {
    network: Arc<dyn NetworkClient>,
    tenant_id: u32,
}

impl RealtimeComponent {
    pub fn new(network: Arc<dyn NetworkClient>, tenant_id: u32) -> Self {
        Self { network, tenant_id }
    }

    async fn send(&self, event: &Event) -> Result<(), DeliveryError> {
        let request = ApiRequest::new(
            format!("/tenants/{}/realtime/events", self.tenant_id),
            json!({ "event": event }),
        );
        send_expecting_success(self.network.as_ref(), request)
            .await
            .map(|_| ())
            .map_err(|err| DeliveryError::Dispatch(err.to_string()))
    }
}

#[async_trait]
impl Component for RealtimeComponent {
    fn name(&self) -> &'static str {
        "realtime"
    }

    async fn handle(&self, ctx: &OperationContext) -> Result<(), DeliveryError> {
        match &ctx.normalized {
            Some(event) if event.is_realtime => self.send(event).await,
            _ => Ok(()),
        }
    }
}

/// Push destination: registration, opt state, token and topic management.
pub struct PushComponent {
    registrar: Arc<Registrar>,
    resolver: DeviceCapabilityResolver,
    network: Arc<dyn NetworkClient>,
    tenant_id: u32,
}

impl PushComponent {
    pub fn new(
        registrar: Arc<Registrar>,
        resolver: DeviceCapabilityResolver,
        network: Arc<dyn NetworkClient>,
        tenant_id: u32,
    ) -> Self {
        Self {
            registrar,
            resolver,
            network,
            tenant_id,
        }
    }

    async fn set_topic(&self, topic: &str, subscribed: bool) -> Result<(), DeliveryError> {
        let action = if subscribed { "subscribe" } else { "unsubscribe" };
        let request = ApiRequest::new(
            format!("/tenants/{}/topics/{action}", self.tenant_id),
            json!({ "topic": topic }),
        );
        send_expecting_success(self.network.as_ref(), request)
            .await
            .map(|_| ())
            .map_err(|err| DeliveryError::Dispatch(err.to_string()))
    }
}

#[async_trait]
impl Component for PushComponent {
    fn name(&self) -> &'static str {
        "push"
    }

    async fn handle(&self, ctx: &OperationContext) -> Result<(), DeliveryError> {
        match &ctx.operation {
            Operation::SetUserId { user_id } => {
                self.registrar
                    .handle(RegistrationOperation::SetUser {
                        user_id: user_id.clone(),
                    })
                    .await
            }
            Operation::DeviceToken { token } => {
                let token = token.iter().map(|byte| format!("{byte:02x}")).collect();
                self.registrar
                    .handle(RegistrationOperation::SetDeviceToken { token })
                    .await
            }
            Operation::OptIn => {
                if !self
                    .resolver
                    .status(CapabilityRequirement::NotificationPermission)
                    .await
                {
                    return Err(DeliveryError::Capability(
                        "notification permission denied".to_owned(),
                    ));
                }
                self.registrar
                    .handle(RegistrationOperation::SetOptStatus { opted_in: true })
                    .await
            }
            Operation::OptOut => {
                self.registrar
                    .handle(RegistrationOperation::SetOptStatus { opted_in: false })
                    .await
            }
            Operation::MigrateUser => self.registrar.migrate_current_user().await,
            Operation::SubscribeTopic { topic } => self.set_topic(topic, true).await,
            Operation::UnsubscribeTopic { topic } => self.set_topic(topic, false).await,
            _ => Ok(()),
        }
    }
}
