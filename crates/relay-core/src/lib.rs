//! Core event-delivery contract shared between the runtime and host shells.
//!
//! This crate defines the operation protocol, tenant configuration model,
//! the handler seam of the processing pipeline, and the three built-in
//! pipeline stages (normalization, validation, decoration).

/// Pipeline input channel primitives.
pub mod channel;
/// Tenant configuration model (events and declared parameters).
pub mod config;
/// Event decoration stage and device metadata.
pub mod decoration;
/// Stable delivery and validation error types.
pub mod error;
/// Pipeline handler seam.
pub mod handler;
/// Event normalization stage.
pub mod normalization;
/// Operation and event protocol types.
pub mod types;
/// Event validation stage.
pub mod validation;

pub use channel::{PipelineChannelError, PipelineChannels, PipelineInput};
pub use config::{Configuration, EventConfig, ParameterConfig, ParameterKind};
pub use decoration::{Decorator, DeviceMetadata};
pub use error::{DeliveryError, ValidationError};
pub use handler::OperationHandler;
pub use normalization::{Normalizer, normalize_key};
pub use types::{
    CORE_EVENT_CATEGORY, Event, Operation, OperationContext, RawEvent, SCREEN_VISIT_EVENT,
    TENANT_EVENT_CATEGORY,
};
pub use validation::{MAX_PARAMETER_LENGTH, Validator};
