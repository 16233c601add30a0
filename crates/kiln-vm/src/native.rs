//! Native modules: Rust functions exported to bytecode by name.
//!
//! A native function receives its arguments as [`Value`]s and either
//! returns results or asks to wait. Waiting is expressed as a
//! [`Pending`]: a condition plus a continuation that produces the results
//! once the condition resolves, so no native stack is kept alive across a
//! suspension.

use crate::context::ModuleStateRef;
use crate::error::VmError;
use crate::signature::Signature;
use crate::suspension::{WaitCondition, WaitResolution};
use kiln_types::sync::Arc;
use kiln_types::{ResourceRegistry, Value};
use std::any::Any;
use std::fmt;

/// Entry point of a native export
pub type NativeFn = fn(&NativeCall<'_>, &[Value]) -> Result<NativeOutcome, VmError>;

/// Resumes a native call after its wait resolved
pub type Continuation =
    Box<dyn FnOnce(&NativeCall<'_>, WaitResolution) -> Result<Vec<Value>, VmError> + Send>;

/// Builds the per-context state of a native module
pub type StateFactory = Box<
    dyn Fn(&Arc<ResourceRegistry>) -> Result<Box<dyn Any + Send + Sync>, VmError> + Send + Sync,
>;

/// What a native call hands back to the interpreter
pub enum NativeOutcome {
    Return(Vec<Value>),
    Await(Pending),
}

impl NativeOutcome {
    pub fn values(values: impl IntoIterator<Item = Value>) -> Self {
        NativeOutcome::Return(values.into_iter().collect())
    }

    pub fn none() -> Self {
        NativeOutcome::Return(Vec::new())
    }

    pub fn await_then<F>(condition: WaitCondition, continuation: F) -> Self
    where
        F: FnOnce(&NativeCall<'_>, WaitResolution) -> Result<Vec<Value>, VmError> + Send + 'static,
    {
        NativeOutcome::Await(Pending {
            condition,
            continuation: Box::new(continuation),
        })
    }
}

impl fmt::Debug for NativeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeOutcome::Return(values) => f.debug_tuple("Return").field(values).finish(),
            NativeOutcome::Await(pending) => {
                f.debug_tuple("Await").field(&pending.condition).finish()
            }
        }
    }
}

pub struct Pending {
    pub condition: WaitCondition,
    pub continuation: Continuation,
}

/// Per-call view a native function gets of its environment.
pub struct NativeCall<'a> {
    pub(crate) registry: &'a Arc<ResourceRegistry>,
    pub(crate) state: &'a ModuleStateRef,
    pub(crate) function: &'a str,
}

impl<'a> NativeCall<'a> {
    pub fn registry(&self) -> &'a Arc<ResourceRegistry> {
        self.registry
    }

    pub fn module_state(&self) -> &'a ModuleStateRef {
        self.state
    }

    /// The module's native state, downcast to `T`.
    pub fn state<T: Any>(&self) -> Result<&'a T, VmError> {
        self.state.native::<T>().ok_or_else(|| {
            VmError::InvalidState(format!(
                "module '{}' has no state of the requested type",
                self.state.module_name()
            ))
        })
    }

    pub fn function_name(&self) -> &'a str {
        self.function
    }
}

pub struct NativeFunction {
    pub name: String,
    pub signature: Signature,
    pub func: NativeFn,
}

/// A module whose exports are Rust functions.
pub struct NativeModule {
    name: String,
    functions: Vec<NativeFunction>,
    state_factory: Option<StateFactory>,
}

impl NativeModule {
    pub fn builder(name: impl Into<String>) -> NativeModuleBuilder {
        NativeModuleBuilder {
            module: NativeModule {
                name: name.into(),
                functions: Vec::new(),
                state_factory: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn functions(&self) -> &[NativeFunction] {
        &self.functions
    }

    pub fn function(&self, ordinal: usize) -> Option<&NativeFunction> {
        self.functions.get(ordinal)
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    pub(crate) fn create_state(
        &self,
        registry: &Arc<ResourceRegistry>,
    ) -> Result<Option<Box<dyn Any + Send + Sync>>, VmError> {
        self.state_factory
            .as_ref()
            .map(|factory| factory(registry))
            .transpose()
    }
}

impl fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeModule")
            .field("name", &self.name)
            .field(
                "functions",
                &self.functions.iter().map(|f| &f.name).collect::<Vec<_>>(),
            )
            .field("stateful", &self.state_factory.is_some())
            .finish()
    }
}

pub struct NativeModuleBuilder {
    module: NativeModule,
}

impl NativeModuleBuilder {
    /// Export `func` as `name` with calling convention `cconv`
    pub fn function(mut self, name: &str, cconv: &str, func: NativeFn) -> Result<Self, VmError> {
        if self.module.lookup(name).is_some() {
            return Err(VmError::InvalidModule(format!(
                "duplicate export '{}.{}'",
                self.module.name, name
            )));
        }
        self.module.functions.push(NativeFunction {
            name: name.to_string(),
            signature: Signature::parse(cconv)?,
            func,
        });
        Ok(self)
    }

    /// State created once per context the module is loaded into
    pub fn state<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Arc<ResourceRegistry>) -> Result<Box<dyn Any + Send + Sync>, VmError>
            + Send
            + Sync
            + 'static,
    {
        self.module.state_factory = Some(Box::new(factory));
        self
    }

    pub fn build(self) -> NativeModule {
        self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
        let v = args[0].as_i32().unwrap_or_default();
        Ok(NativeOutcome::values([Value::I32(v * 2)]))
    }

    #[test]
    fn test_builder_rejects_duplicates() {
        let result = NativeModule::builder("m")
            .function("double", "0i_i", double)
            .and_then(|b| b.function("double", "0i_i", double));
        assert!(matches!(result, Err(VmError::InvalidModule(_))));
    }

    #[test]
    fn test_lookup() {
        let module = NativeModule::builder("m")
            .function("double", "0i_i", double)
            .unwrap()
            .build();
        assert_eq!(module.lookup("double"), Some(0));
        assert_eq!(module.lookup("triple"), None);
        assert_eq!(module.function(0).unwrap().signature.to_string(), "0i_i");
    }
}
