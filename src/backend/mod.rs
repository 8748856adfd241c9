mod backend;
mod registry;

pub use backend::{Backend, HealthStatus, ProbeOutcome, ProbeReason};
pub use registry::{BackendState, Registry, RegistryError};
