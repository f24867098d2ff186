//! Event-delivery runtime: the pipeline task, delivery components, durable
//! queueing, capability resolution and registration retry.
//!
//! Host shells construct a [`RuntimeContext`] with their storage, network
//! and capability implementations, call [`RuntimeContext::start`], and talk
//! to the running pipeline through the returned [`RuntimeHandle`].

/// Device capability cache and coalesced probes.
pub mod capability;
/// Delivery components and the terminal dispatcher stage.
pub mod components;
/// Runtime assembly and the host-facing handle.
pub mod context;
/// Transport seam for backend calls.
pub mod network;
/// Pipeline task and submission handle.
pub mod pipeline;
/// Durable FIFO event buffer.
pub mod queue;
/// Registration calls with crash-safe retry.
pub mod registrar;

pub use capability::{CapabilityFetcher, CapabilityRequirement, DeviceCapabilityResolver};
pub use components::{
    AnalyticsComponent, Component, ComponentDispatcher, PushComponent, RealtimeComponent,
};
pub use context::{RuntimeContext, RuntimeHandle};
pub use network::{ApiRequest, ApiResponse, NetworkClient, NetworkError};
pub use pipeline::{PipelineHandle, spawn_pipeline};
pub use queue::DurableEventQueue;
pub use registrar::{Registrar, RegistrationOperation};
