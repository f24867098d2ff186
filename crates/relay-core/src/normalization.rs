use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    config::{Configuration, ParameterKind},
    error::DeliveryError,
    handler::OperationHandler,
    types::{
        CORE_EVENT_CATEGORY, Event, OperationContext, Operation, RawEvent, SCREEN_VISIT_EVENT,
        TENANT_EVENT_CATEGORY,
    },
};

/// Context key for the screen path of a synthesized screen-visit event.
pub const SCREEN_PATH_KEY: &str = "screen_path";
/// Context key for the screen title of a synthesized screen-visit event.
pub const SCREEN_TITLE_KEY: &str = "screen_title";
/// Context key for the screen category of a synthesized screen-visit event.
pub const SCREEN_CATEGORY_KEY: &str = "screen_category";

/// First pipeline stage: turns raw report operations into normalized events.
///
/// Normalization rules:
/// - event and parameter keys are lower-cased with whitespace replaced by
///   underscores;
/// - values declared `Boolean` in configuration are coerced from numeric
///   truthy/falsy to booleans;
/// - string values are trimmed.
///
/// `ReportScreenEvent` is converted into a report of the built-in
/// [`SCREEN_VISIT_EVENT`] before normalization. Non-report operations pass
/// through unchanged. A report whose configuration is absent is rejected.
pub struct Normalizer {
    configuration: Arc<Configuration>,
}

impl Normalizer {
    /// Build a normalizer over the active tenant configuration.
    pub fn new(configuration: Arc<Configuration>) -> Self {
        Self { configuration }
    }

    fn normalize(
        &self,
        raw: &RawEvent,
        category: &str,
        timestamp_ms: u64,
    ) -> Result<Event, DeliveryError> {
        let name = normalize_key(&raw.name);
        let config = self
            .configuration
            .event_config(&name)
            .ok_or_else(|| DeliveryError::ConfigurationMissing {
                event: name.clone(),
            })?;

        let mut context = BTreeMap::new();
        for (key, value) in &raw.context {
            let key = normalize_key(key);
            let declared = config.parameters.get(&key).map(|parameter| parameter.kind);
            context.insert(key, normalize_value(value, declared));
        }

        Ok(Event::new(name, category, timestamp_ms, context))
    }
}

#[async_trait]
impl OperationHandler for Normalizer {
    fn name(&self) -> &'static str {
        "normalizer"
    }

    async fn handle(
        &self,
        mut ctx: OperationContext,
    ) -> Result<Option<OperationContext>, DeliveryError> {
        match &ctx.operation {
            Operation::Report { event } => {
                ctx.normalized =
                    Some(self.normalize(event, TENANT_EVENT_CATEGORY, ctx.timestamp_ms)?);
            }
            Operation::ReportScreenEvent {
                path,
                title,
                category,
            } => {
                let raw = screen_visit_raw_event(path, title, category.as_deref());
                ctx.normalized = Some(self.normalize(&raw, CORE_EVENT_CATEGORY, ctx.timestamp_ms)?);
            }
            _ => {}
        }
        Ok(Some(ctx))
    }
}

/// Lower-case a key and replace every whitespace character with underscore.
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

fn normalize_value(value: &Value, declared: Option<ParameterKind>) -> Value {
    match value {
        Value::Number(number) if declared == Some(ParameterKind::Boolean) => {
            Value::Bool(number.as_f64().is_some_and(|n| n != 0.0))
        }
        Value::String(string) => Value::String(string.trim().to_owned()),
        other => other.clone(),
    }
}

fn screen_visit_raw_event(path: &str, title: &str, category: Option<&str>) -> RawEvent {
    let mut context = BTreeMap::new();
    context.insert(SCREEN_PATH_KEY.to_owned(), Value::from(path));
    context.insert(SCREEN_TITLE_KEY.to_owned(), Value::from(title));
    if let Some(category) = category {
        context.insert(SCREEN_CATEGORY_KEY.to_owned(), Value::from(category));
    }
    RawEvent::new(SCREEN_VISIT_EVENT, context)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::{EventConfig, ParameterConfig};

    fn configuration(events: Vec<(&str, Vec<(&str, ParameterKind, bool)>)>) -> Arc<Configuration> {
        let events = events
            .into_iter()
            .enumerate()
            .map(|(index, (name, parameters))| {
                let parameters = parameters
                    .into_iter()
                    .map(|(parameter, kind, mandatory)| {
                        (parameter.to_owned(), ParameterConfig { kind, mandatory })
                    })
                    .collect::<HashMap<_, _>>();
                (
                    name.to_owned(),
                    EventConfig {
                        id: 1_000 + index as u32,
                        supported_on_analytics: true,
                        supported_on_realtime: false,
                        parameters,
                    },
                )
            })
            .collect();
        Arc::new(Configuration {
            tenant_id: 1,
            events,
        })
    }

    fn report(name: &str, context: BTreeMap<String, Value>) -> OperationContext {
        OperationContext::new(Operation::Report {
            event: RawEvent::new(name, context),
        })
    }

    #[tokio::test]
    async fn normalizes_keys_and_values() {
        let configuration = configuration(vec![(
            "order_completed",
            vec![
                ("is_gift", ParameterKind::Boolean, false),
                ("coupon", ParameterKind::String, false),
            ],
        )]);
        let normalizer = Normalizer::new(configuration);

        let mut context = BTreeMap::new();
        context.insert("Is Gift".to_owned(), Value::from(1));
        context.insert("coupon".to_owned(), Value::from("  SAVE10  "));

        let ctx = normalizer
            .handle(report("Order Completed", context))
            .await
            .expect("report should normalize")
            .expect("report should forward");

        let event = ctx.normalized.expect("event should be attached");
        assert_eq!(event.name, "order_completed");
        assert_eq!(event.category, TENANT_EVENT_CATEGORY);
        assert_eq!(event.context.get("is_gift"), Some(&Value::Bool(true)));
        assert_eq!(event.context.get("coupon"), Some(&Value::from("SAVE10")));
        assert!(!event.context.contains_key("Is Gift"));
    }

    #[tokio::test]
    async fn coerces_zero_to_false_for_declared_booleans() {
        let configuration = configuration(vec![(
            "order_completed",
            vec![("is_gift", ParameterKind::Boolean, false)],
        )]);
        let normalizer = Normalizer::new(configuration);

        let mut context = BTreeMap::new();
        context.insert("is_gift".to_owned(), Value::from(0));

        let ctx = normalizer
            .handle(report("order_completed", context))
            .await
            .expect("report should normalize")
            .expect("report should forward");
        let event = ctx.normalized.expect("event should be attached");
        assert_eq!(event.context.get("is_gift"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn rejects_report_without_configuration() {
        let normalizer = Normalizer::new(configuration(vec![]));
        let err = normalizer
            .handle(report("unknown", BTreeMap::new()))
            .await
            .expect_err("unknown event must be rejected");
        assert_eq!(
            err,
            DeliveryError::ConfigurationMissing {
                event: "unknown".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn converts_screen_events_into_screen_visit_reports() {
        let configuration = configuration(vec![(
            SCREEN_VISIT_EVENT,
            vec![
                (SCREEN_PATH_KEY, ParameterKind::String, true),
                (SCREEN_TITLE_KEY, ParameterKind::String, true),
            ],
        )]);
        let normalizer = Normalizer::new(configuration);

        let ctx = normalizer
            .handle(OperationContext::new(Operation::ReportScreenEvent {
                path: "checkout/payment".to_owned(),
                title: "Payment".to_owned(),
                category: None,
            }))
            .await
            .expect("screen event should normalize")
            .expect("screen event should forward");

        let event = ctx.normalized.expect("event should be attached");
        assert_eq!(event.name, SCREEN_VISIT_EVENT);
        assert_eq!(event.category, CORE_EVENT_CATEGORY);
        assert_eq!(
            event.context.get(SCREEN_PATH_KEY),
            Some(&Value::from("checkout/payment"))
        );
    }

    #[tokio::test]
    async fn passes_non_report_operations_through() {
        let normalizer = Normalizer::new(configuration(vec![]));
        let ctx = normalizer
            .handle(OperationContext::new(Operation::OptIn))
            .await
            .expect("pass-through should work")
            .expect("pass-through should forward");
        assert_eq!(ctx.operation, Operation::OptIn);
        assert_eq!(ctx.normalized, None);
    }
}
