use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    config::{Configuration, ParameterKind},
    error::{DeliveryError, ValidationError},
    handler::OperationHandler,
    types::{Event, Operation, OperationContext},
};

/// Longest legal textual value of a single parameter.
pub const MAX_PARAMETER_LENGTH: usize = 255;

/// Second pipeline stage: checks normalized events against configuration.
///
/// A report is rejected when a mandatory parameter is absent, when a
/// declared parameter carries a value of the wrong type, or when a string
/// parameter exceeds [`MAX_PARAMETER_LENGTH`]. Parameters the configuration
/// does not declare are ignored. Non-report operations pass through.
pub struct Validator {
    configuration: Arc<Configuration>,
}

impl Validator {
    /// Build a validator over the active tenant configuration.
    pub fn new(configuration: Arc<Configuration>) -> Self {
        Self { configuration }
    }

    fn validate(&self, event: &Event) -> Result<(), ValidationError> {
        let config = self.configuration.event_config(&event.name).ok_or_else(|| {
            ValidationError::InvalidEvent {
                event: event.name.clone(),
            }
        })?;

        for (name, parameter) in &config.parameters {
            let value = event.context.get(name);
            match value {
                None if parameter.mandatory => {
                    return Err(ValidationError::MandatoryParameterMissing {
                        event: event.name.clone(),
                        parameter: name.clone(),
                    });
                }
                None => {}
                Some(value) => {
                    if !matches_kind(value, parameter.kind) {
                        return Err(ValidationError::MismatchParameterType {
                            event: event.name.clone(),
                            parameter: name.clone(),
                            expected: parameter.kind,
                        });
                    }
                    if exceeds_legal_length(value) {
                        return Err(ValidationError::IllegalParameterLength {
                            event: event.name.clone(),
                            parameter: name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OperationHandler for Validator {
    fn name(&self) -> &'static str {
        "validator"
    }

    async fn handle(
        &self,
        ctx: OperationContext,
    ) -> Result<Option<OperationContext>, DeliveryError> {
        match &ctx.operation {
            Operation::Report { .. } | Operation::ReportScreenEvent { .. } => {
                let event = ctx.normalized.as_ref().ok_or_else(|| {
                    ValidationError::InvalidEvent {
                        event: String::new(),
                    }
                })?;
                self.validate(event)?;
            }
            _ => {}
        }
        Ok(Some(ctx))
    }
}

/// Textual representation longer than [`MAX_PARAMETER_LENGTH`].
fn exceeds_legal_length(value: &Value) -> bool {
    match value {
        Value::String(string) => string.chars().count() > MAX_PARAMETER_LENGTH,
        Value::Number(number) => number.to_string().chars().count() > MAX_PARAMETER_LENGTH,
        _ => false,
    }
}

fn matches_kind(value: &Value, kind: ParameterKind) -> bool {
    match kind {
        ParameterKind::Number => value.is_number(),
        ParameterKind::String => value.is_string(),
        ParameterKind::Boolean => value.is_boolean(),
    }
}
