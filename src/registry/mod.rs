//! Agent Registry: descriptors, health state and concurrency limits

mod descriptor;
mod registry;

pub use descriptor::{normalize_tag, AgentDescriptor, DEFAULT_HEALTH_SCORE};
pub use registry::{sort_for_routing, AgentRegistry, RegistryHealth};
