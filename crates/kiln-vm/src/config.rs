//! Instance configuration

use serde::{Deserialize, Serialize};

/// Limits applied by an [`Instance`](crate::context::Instance) and the
/// fibers it runs. Missing fields take their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Maximum frames on one fiber before a stack overflow trap
    pub max_call_depth: usize,
    /// Maximum live registry entries (`None` = unbounded)
    pub registry_limit: Option<usize>,
    /// Maximum elements in a list created by bytecode (`None` = unbounded)
    pub max_list_capacity: Option<usize>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 1024,
            registry_limit: None,
            max_list_capacity: None,
        }
    }
}
