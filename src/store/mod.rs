//! Interfaces to the collaborators the controller depends on: the resource
//! store, the secret store and the event sink, plus in-memory backends.

pub mod error;
pub mod manifest;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryEventRecorder, MemoryResourceStore, MemorySecretStore, TracingEventRecorder};
pub use traits::{Event, EventRecorder, EventType, ResourceStore, SecretData, SecretStore};
