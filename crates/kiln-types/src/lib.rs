//! Shared runtime types for the Kiln VM and HAL.
//!
//! - `registry`: reference-counted, type-tagged resource handles
//! - `list`: kind-checked heterogeneous lists for the call boundary
//! - `value`: register/argument values and their static types
//! - `resource`: the closed set of resource kinds
//! - `sync`: lock aliases

pub mod byte_buffer;
pub mod list;
pub mod registry;
pub mod resource;
pub mod sync;
pub mod value;

// Re-exports
pub use byte_buffer::ByteBuffer;
pub use list::{ElementKind, ElementType, ListError, SharedList, TypedList};
pub use registry::{Handle, Ref, RegistryError, ResourceRegistry};
pub use resource::{Resource, ResourceKind};
pub use value::{Value, ValueType};

#[cfg(test)]
mod tests;
