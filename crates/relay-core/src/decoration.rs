use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    config::Configuration,
    error::DeliveryError,
    handler::OperationHandler,
    types::{Operation, OperationContext},
};

/// Context key carrying the reporting device class.
pub const DEVICE_TYPE_KEY: &str = "event_device_type";
/// Context key carrying the client platform name.
pub const PLATFORM_KEY: &str = "event_platform";
/// Context key carrying the operating-system version string.
pub const OS_KEY: &str = "event_os";
/// Context key marking the report as coming from a native client.
pub const NATIVE_MOBILE_KEY: &str = "event_native_mobile";

/// Facts about the running device stamped onto outgoing events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMetadata {
    /// Device class, e.g. "Mobile".
    pub device_type: String,
    /// Client platform name, e.g. "iOS".
    pub platform: String,
    /// Operating-system version string.
    pub os_version: String,
    /// Whether the report originates from a native client.
    pub native_mobile: bool,
}

impl DeviceMetadata {
    /// Metadata for a native mobile client on the given platform.
    pub fn mobile(platform: impl Into<String>, os_version: impl Into<String>) -> Self {
        Self {
            device_type: "Mobile".to_owned(),
            platform: platform.into(),
            os_version: os_version.into(),
            native_mobile: true,
        }
    }
}

/// Third pipeline stage: stamps device metadata onto normalized events.
///
/// Each metadata key is added only when the event's configuration declares
/// it as a parameter, and never overwrites a caller-supplied value. The
/// stage also resolves the event's realtime flag from configuration.
/// Non-report operations pass through.
pub struct Decorator {
    configuration: Arc<Configuration>,
    metadata: DeviceMetadata,
}

impl Decorator {
    /// Build a decorator over the active configuration and device facts.
    pub fn new(configuration: Arc<Configuration>, metadata: DeviceMetadata) -> Self {
        Self {
            configuration,
            metadata,
        }
    }
}

#[async_trait]
impl OperationHandler for Decorator {
    fn name(&self) -> &'static str {
        "decorator"
    }

    async fn handle(
        &self,
        mut ctx: OperationContext,
    ) -> Result<Option<OperationContext>, DeliveryError> {
        if !matches!(
            ctx.operation,
            Operation::Report { .. } | Operation::ReportScreenEvent { .. }
        ) {
            return Ok(Some(ctx));
        }
        let Some(event) = ctx.normalized.as_mut() else {
            return Ok(Some(ctx));
        };
        let Some(config) = self.configuration.event_config(&event.name) else {
            return Ok(Some(ctx));
        };

        let decorations = [
            (DEVICE_TYPE_KEY, Value::from(self.metadata.device_type.clone())),
            (PLATFORM_KEY, Value::from(self.metadata.platform.clone())),
            (OS_KEY, Value::from(self.metadata.os_version.clone())),
            (NATIVE_MOBILE_KEY, Value::from(self.metadata.native_mobile)),
        ];
        for (key, value) in decorations {
            if config.parameters.contains_key(key) && !event.context.contains_key(key) {
                event.context.insert(key.to_owned(), value);
            }
        }
        event.is_realtime = config.supported_on_realtime;

        Ok(Some(ctx))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::*;
    use crate::{
        config::{EventConfig, ParameterConfig, ParameterKind},
        types::{Event, RawEvent, TENANT_EVENT_CATEGORY},
    };

    fn configuration(
        realtime: bool,
        declared: Vec<(&str, ParameterKind)>,
    ) -> Arc<Configuration> {
        let parameters = declared
            .into_iter()
            .map(|(name, kind)| {
                (
                    name.to_owned(),
                    ParameterConfig {
                        kind,
                        mandatory: false,
                    },
                )
            })
            .collect::<HashMap<_, _>>();
        let mut events = HashMap::new();
        events.insert(
            "purchase".to_owned(),
            EventConfig {
                id: 3_000,
                supported_on_analytics: true,
                supported_on_realtime: realtime,
                parameters,
            },
        );
        Arc::new(Configuration {
            tenant_id: 1,
            events,
        })
    }

    fn report_ctx(context: BTreeMap<String, Value>) -> OperationContext {
        let mut ctx = OperationContext::new(Operation::Report {
            event: RawEvent::new("purchase", context.clone()),
        });
        ctx.normalized = Some(Event::new(
            "purchase",
            TENANT_EVENT_CATEGORY,
            ctx.timestamp_ms,
            context,
        ));
        ctx
    }

    fn metadata() -> DeviceMetadata {
        DeviceMetadata::mobile("iOS", "17.4")
    }

    #[tokio::test]
    async fn stamps_only_declared_metadata_keys() {
        let decorator = Decorator::new(
            configuration(
                false,
                vec![
                    (DEVICE_TYPE_KEY, ParameterKind::String),
                    (PLATFORM_KEY, ParameterKind::String),
                ],
            ),
            metadata(),
        );

        let ctx = decorator
            .handle(report_ctx(BTreeMap::new()))
            .await
            .expect("decoration should work")
            .expect("decoration should forward");
        let event = ctx.normalized.expect("event should be attached");
        assert_eq!(event.context.get(DEVICE_TYPE_KEY), Some(&Value::from("Mobile")));
        assert_eq!(event.context.get(PLATFORM_KEY), Some(&Value::from("iOS")));
        assert!(!event.context.contains_key(OS_KEY));
        assert!(!event.context.contains_key(NATIVE_MOBILE_KEY));
    }

    #[tokio::test]
    async fn never_overwrites_caller_values() {
        let decorator = Decorator::new(
            configuration(false, vec![(PLATFORM_KEY, ParameterKind::String)]),
            metadata(),
        );
        let mut context = BTreeMap::new();
        context.insert(PLATFORM_KEY.to_owned(), Value::from("custom"));

        let ctx = decorator
            .handle(report_ctx(context))
            .await
            .expect("decoration should work")
            .expect("decoration should forward");
        let event = ctx.normalized.expect("event should be attached");
        assert_eq!(event.context.get(PLATFORM_KEY), Some(&Value::from("custom")));
    }

    #[tokio::test]
    async fn resolves_realtime_flag_from_configuration() {
        let decorator = Decorator::new(configuration(true, vec![]), metadata());
        let ctx = decorator
            .handle(report_ctx(BTreeMap::new()))
            .await
            .expect("decoration should work")
            .expect("decoration should forward");
        assert!(ctx.normalized.expect("event should be attached").is_realtime);
    }

    #[tokio::test]
    async fn passes_non_report_operations_through() {
        let decorator = Decorator::new(configuration(false, vec![]), metadata());
        let ctx = decorator
            .handle(OperationContext::new(Operation::MigrateUser))
            .await
            .expect("pass-through should work")
            .expect("pass-through should forward");
        assert_eq!(ctx.operation, Operation::MigrateUser);
    }
}
