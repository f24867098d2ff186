//! Offline smoke run: drives the pipeline end to end against a stub
//! backend and prints every request that would go over the wire.

mod logging;

use std::{
    collections::{BTreeMap, HashMap},
    env,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use relay_core::{
    Configuration, DeliveryError, DeviceMetadata, EventConfig, Operation, ParameterConfig,
    ParameterKind, RawEvent,
};
use relay_platform::FileStorage;
use relay_runtime::{
    ApiRequest, ApiResponse, CapabilityFetcher, CapabilityRequirement, NetworkClient, NetworkError,
    RuntimeContext,
};
use serde_json::{Value, json};

struct PrintingClient;

#[async_trait]
impl NetworkClient for PrintingClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, NetworkError> {
        println!("-> {} {}", request.path, request.body);
        Ok(ApiResponse {
            status: 200,
            body: Value::Null,
        })
    }
}

struct GrantAllFetcher;

#[async_trait]
impl CapabilityFetcher for GrantAllFetcher {
    async fn fetch(&self, requirement: CapabilityRequirement) -> Result<bool, DeliveryError> {
        println!("probing capability {requirement}");
        Ok(true)
    }
}

fn smoke_configuration() -> Arc<Configuration> {
    let mut parameters = HashMap::new();
    parameters.insert(
        "amount".to_owned(),
        ParameterConfig {
            kind: ParameterKind::Number,
            mandatory: true,
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

#[tokio::main]
async fn main() {
    logging::init();

    let data_dir = env::var("RELAYKIT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.relaykit-smoke-store"));
    let storage = Arc::new(FileStorage::new(data_dir));

    let handle = RuntimeContext::new(
        smoke_configuration(),
        DeviceMetadata::mobile("iOS", "17.4"),
        storage.clone(),
        storage,
        Arc::new(PrintingClient),
        Arc::new(GrantAllFetcher),
    )
    .start()
    .await;

    handle.submit(Operation::SetUserId {
        user_id: "smoke-user".to_owned(),
    });
    handle.submit(Operation::OptIn);

    let mut context = BTreeMap::new();
    context.insert("Amount".to_owned(), json!(49.9));
    handle.submit(Operation::Report {
        event: RawEvent::new("Purchase", context),
    });
    handle.submit(Operation::DispatchNow);

    // Give the fire-and-forget pipeline time to drain before exiting.
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!(
        "missing permissions after run: {:?}",
        handle.missing_permissions()
    );
}
