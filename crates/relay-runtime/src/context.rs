//! Runtime assembly: wires stages, components and storage into a pipeline.

use std::sync::Arc;

use relay_core::{
    Configuration, Decorator, DeviceMetadata, Normalizer, Operation, OperationHandler, Validator,
};
use relay_platform::{KeyValueStorage, RecordStorage, StorageScope};

use crate::{
    capability::{CapabilityFetcher, CapabilityRequirement, DeviceCapabilityResolver},
    components::{AnalyticsComponent, Component, ComponentDispatcher, PushComponent, RealtimeComponent},
    network::NetworkClient,
    pipeline::{PipelineHandle, spawn_pipeline},
    queue::DurableEventQueue,
    registrar::Registrar,
};

/// Everything a host shell injects before the runtime can start.
pub struct RuntimeContext {
    configuration: Arc<Configuration>,
    metadata: DeviceMetadata,
    values: Arc<dyn KeyValueStorage>,
    records: Arc<dyn RecordStorage>,
    network: Arc<dyn NetworkClient>,
    fetcher: Arc<dyn CapabilityFetcher>,
}

impl RuntimeContext {
    pub fn new(
        configuration: Arc<Configuration>,
        metadata: DeviceMetadata,
        values: Arc<dyn KeyValueStorage>,
        records: Arc<dyn RecordStorage>,
        network: Arc<dyn NetworkClient>,
        fetcher: Arc<dyn CapabilityFetcher>,
    ) -> Self {
        Self {
            configuration,
            metadata,
            values,
            records,
            network,
            fetcher,
        }
    }

    /// Bring the runtime up and return the host-facing handle.
    ///
    /// Registrations that failed on a previous launch are replayed before
    /// the pipeline accepts its first operation, so a replay and a fresh
    /// registration can never interleave.
    pub async fn start(self) -> RuntimeHandle {
        let tenant_id = self.configuration.tenant_id;

        let registrar = Arc::new(Registrar::new(
            self.network.clone(),
            self.values.clone(),
            self.records.clone(),
            tenant_id,
        ));
        registrar.retry_failed_operations_if_exist().await;

        let queue = Arc::new(DurableEventQueue::restore(
            self.records.clone(),
            StorageScope::Shared,
            tenant_id,
        ));
        let resolver = DeviceCapabilityResolver::new(self.fetcher.clone());

        let components: Vec<Box<dyn Component>> = vec![
            Box::new(AnalyticsComponent::new(
                self.configuration.clone(),
                queue.clone(),
                self.network.clone(),
                tenant_id,
            )),
            Box::new(RealtimeComponent::new(self.network.clone(), tenant_id)),
            Box::new(PushComponent::new(
                registrar,
                resolver.clone(),
                self.network.clone(),
                tenant_id,
            )),
        ];

        let handlers: Vec<Box<dyn OperationHandler>> = vec![
            Box::new(Normalizer::new(self.configuration.clone())),
            Box::new(Validator::new(self.configuration.clone())),
            Box::new(Decorator::new(self.configuration.clone(), self.metadata)),
            Box::new(ComponentDispatcher::new(components)),
        ];

        RuntimeHandle {
            pipeline: spawn_pipeline(handlers),
            resolver,
        }
    }
}

/// Running runtime: the submission surface handed to the host shell.
#[derive(Clone)]
pub struct RuntimeHandle {
    pipeline: PipelineHandle,
    resolver: DeviceCapabilityResolver,
}

impl RuntimeHandle {
    /// Hand one operation to the pipeline. Fire-and-forget.
    pub fn submit(&self, operation: Operation) {
        self.pipeline.submit(operation);
    }

    /// Append a custom handler behind the built-in chain.
    pub fn add_handler(&self, handler: Box<dyn OperationHandler>) {
        self.pipeline.add_handler(handler);
    }

    /// Drop a cached capability answer, typically on app foreground.
    pub fn refresh_capability(&self, requirement: CapabilityRequirement) {
        self.resolver.refresh(requirement);
    }

    /// User-dependent capabilities known to be denied.
    pub fn missing_permissions(&self) -> Vec<CapabilityRequirement> {
        self.resolver.missing_permissions()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{BTreeMap, HashMap},
        sync::Mutex,
        time::Duration,
    };

    use async_trait::async_trait;
    use relay_core::{
        DeliveryError, EventConfig, ParameterConfig, ParameterKind, RawEvent,
        decoration::{DEVICE_TYPE_KEY, PLATFORM_KEY},
    };
    use relay_platform::InMemoryStorage;
    use serde_json::Value;

    use super::*;
    use crate::network::{ApiRequest, ApiResponse, NetworkError};

    struct RecordingClient {
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl RecordingClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    #[async_trait]
    impl NetworkClient for RecordingClient {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, NetworkError> {
            self.requests.lock().expect("requests lock").push(request);
            Ok(ApiResponse {
                status: 200,
                body: Value::Null,
            })
        }
    }

    struct GrantAllFetcher;

    #[async_trait]
    impl CapabilityFetcher for GrantAllFetcher {
        async fn fetch(&self, _requirement: CapabilityRequirement) -> Result<bool, DeliveryError> {
            Ok(true)
        }
    }

    fn purchase_configuration() -> Arc<Configuration> {
        let mut parameters = HashMap::new();
        parameters.insert(
            "amount".to_owned(),
            ParameterConfig {
                kind: ParameterKind::Number,
                mandatory: true,
            },
        );
        parameters.insert(
            "coupon".to_owned(),
            ParameterConfig {
                kind: ParameterKind::String,
                mandatory: false,
            },
        );
        parameters.insert(
            DEVICE_TYPE_KEY.to_owned(),
            ParameterConfig {
                kind: ParameterKind::String,
                mandatory: false,
            },
        );
        parameters.insert(
            PLATFORM_KEY.to_owned(),
            ParameterConfig {
                kind: ParameterKind::String,
                mandatory: false,
            },
        );

        let mut events = HashMap::new();
        events.insert(
            "purchase".to_owned(),
            EventConfig {
                id: 1_001,
                supported_on_analytics: true,
                supported_on_realtime: true,
                parameters,
            },
        );
        Arc::new(Configuration {
            tenant_id: 7,
            events,
        })
    }

    fn runtime_context(
        client: Arc<RecordingClient>,
        storage: Arc<InMemoryStorage>,
    ) -> RuntimeContext {
        RuntimeContext::new(
            purchase_configuration(),
            DeviceMetadata::mobile("iOS", "17.4"),
            storage.clone(),
            storage,
            client,
            Arc::new(GrantAllFetcher),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn purchase_reaches_realtime_and_analytics_backends() {
        let client = RecordingClient::new();
        let storage = Arc::new(InMemoryStorage::default());
        let handle = runtime_context(client.clone(), storage).start().await;

        let mut context = BTreeMap::new();
        context.insert("Amount".to_owned(), Value::from(49.9));
        context.insert("coupon".to_owned(), Value::from("  SAVE10 "));
        handle.submit(Operation::Report {
            event: RawEvent::new("Purchase", context),
        });
        handle.submit(Operation::DispatchNow);
        settle().await;

        let requests = client.requests();
        assert_eq!(requests.len(), 2);

        assert_eq!(requests[0].path, "/tenants/7/realtime/events");
        let realtime = &requests[0].body["event"];
        assert_eq!(realtime["name"], "purchase");
        assert_eq!(realtime["context"]["amount"], 49.9);
        assert_eq!(realtime["context"]["coupon"], "SAVE10");
        assert_eq!(realtime["context"][DEVICE_TYPE_KEY], "Mobile");
        assert_eq!(realtime["context"][PLATFORM_KEY], "iOS");

        assert_eq!(requests[1].path, "/tenants/7/events");
        let batch = requests[1].body["events"]
            .as_array()
            .expect("events array");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0]["name"], "purchase");
    }

    #[tokio::test]
    async fn invalid_report_produces_no_backend_traffic() {
        let client = RecordingClient::new();
        let storage = Arc::new(InMemoryStorage::default());
        let handle = runtime_context(client.clone(), storage).start().await;

        // Mandatory "amount" missing.
        handle.submit(Operation::Report {
            event: RawEvent::new("purchase", BTreeMap::new()),
        });
        handle.submit(Operation::DispatchNow);
        settle().await;

        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn pending_events_survive_a_runtime_restart() {
        let storage = Arc::new(InMemoryStorage::default());

        let client = RecordingClient::new();
        let handle = runtime_context(client.clone(), storage.clone())
            .start()
            .await;
        let mut context = BTreeMap::new();
        context.insert("amount".to_owned(), Value::from(10));
        handle.submit(Operation::Report {
            event: RawEvent::new("purchase", context),
        });
        settle().await;
        drop(handle);

        let second_client = RecordingClient::new();
        let handle = runtime_context(second_client.clone(), storage)
            .start()
            .await;
        handle.submit(Operation::DispatchNow);
        settle().await;

        let flushes: Vec<_> = second_client
            .requests()
            .into_iter()
            .filter(|request| request.path == "/tenants/7/events")
            .collect();
        assert_eq!(flushes.len(), 1);
        assert_eq!(
            flushes[0].body["events"]
                .as_array()
                .expect("events array")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn set_user_registers_before_later_operations() {
        let client = RecordingClient::new();
        let storage = Arc::new(InMemoryStorage::default());
        let handle = runtime_context(client.clone(), storage).start().await;

        handle.submit(Operation::SetUserId {
            user_id: "customer-1".to_owned(),
        });
        handle.submit(Operation::OptIn);
        settle().await;

        let paths: Vec<_> = client
            .requests()
            .into_iter()
            .map(|request| request.path)
            .collect();
        assert_eq!(paths, vec!["/tenants/7/users", "/tenants/7/users/opt"]);
    }
}
