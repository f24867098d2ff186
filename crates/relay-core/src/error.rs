use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ParameterKind;

/// Validation failures that drop a report operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A parameter the configuration marks mandatory is absent.
    #[error("mandatory parameter '{parameter}' is missing for event '{event}'")]
    MandatoryParameterMissing {
        /// Normalized event name.
        event: String,
        /// Missing parameter name.
        parameter: String,
    },
    /// A parameter's runtime type does not match its declared kind.
    #[error("parameter '{parameter}' of event '{event}' is not of declared type {expected:?}")]
    MismatchParameterType {
        /// Normalized event name.
        event: String,
        /// Offending parameter name.
        parameter: String,
        /// Kind the configuration declares.
        expected: ParameterKind,
    },
    /// A parameter's textual representation exceeds the legal length.
    #[error("parameter '{parameter}' of event '{event}' exceeds the legal parameter length")]
    IllegalParameterLength {
        /// Normalized event name.
        event: String,
        /// Offending parameter name.
        parameter: String,
    },
    /// The event reached the validator in a shape it cannot check.
    #[error("event '{event}' cannot be validated")]
    InvalidEvent {
        /// Normalized event name, empty when unavailable.
        event: String,
    },
}

/// Terminal failures inside the delivery core.
///
/// Nothing here crosses back to the host application; every variant is
/// logged at the point of detection and reflected only in internal state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Event or tenant configuration is absent; the operation is dropped.
    #[error("no configuration found for event '{event}'")]
    ConfigurationMissing {
        /// Normalized event name.
        event: String,
    },
    /// A report operation failed validation and was dropped.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A capability probe failed; the capability is cached as unavailable.
    #[error("capability probe failed: {0}")]
    Capability(String),
    /// A registration call failed; persisted as a flag for next-launch retry.
    #[error("registration failed: {0}")]
    Registration(String),
    /// Sending events to the backend failed; the batch stays queued.
    #[error("event dispatch failed: {0}")]
    Dispatch(String),
    /// A storage read or write failed; the owner falls back to memory-only.
    #[error("persistence failed: {0}")]
    Persistence(String),
}
