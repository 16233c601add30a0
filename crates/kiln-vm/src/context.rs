//! Instances, contexts and per-context module state.
//!
//! An [`Instance`] owns the resource registry and configuration. A
//! [`Context`] binds a set of modules: every import of every bytecode
//! module is resolved against the exports of the other modules when the
//! context is created, and each module gets exactly one state object.

use crate::bytecode::{BytecodeModule, ImportDecl};
use crate::config::VmConfig;
use crate::error::VmError;
use crate::module::Module;
use crate::signature::Signature;
use crate::verify::verify_module;
use crate::vm::Fiber;
use kiln_types::sync::{Arc, Mutex, MutexGuard};
use kiln_types::{ByteBuffer, Ref, ResourceRegistry, TypedList, Value};
use std::any::Any;
use std::fmt;
use tracing::debug;

/// Owner of the shared registry; creates contexts.
#[derive(Debug)]
pub struct Instance {
    registry: Arc<ResourceRegistry>,
    config: VmConfig,
}

impl Instance {
    pub fn new(config: VmConfig) -> Self {
        let registry = match config.registry_limit {
            Some(limit) => ResourceRegistry::with_limit(limit),
            None => ResourceRegistry::new(),
        };
        Self {
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Load `modules` into a new context, resolving all imports.
    pub fn create_context(&self, modules: Vec<Module>) -> Result<Arc<Context>, VmError> {
        for (i, module) in modules.iter().enumerate() {
            if modules[..i].iter().any(|m| m.name() == module.name()) {
                return Err(VmError::InvalidModule(format!(
                    "module '{}' loaded twice",
                    module.name()
                )));
            }
        }

        let mut loaded = Vec::with_capacity(modules.len());
        for (index, module) in modules.iter().enumerate() {
            let (state, imports) = match module {
                Module::Bytecode(bytecode) => {
                    verify_module(bytecode)?;
                    let imports = bytecode
                        .imports
                        .iter()
                        .map(|import| resolve_import(&modules, index, import))
                        .collect::<Result<Vec<_>, _>>()?;
                    let state = BytecodeState::new(&self.registry, bytecode)?;
                    (ModuleState::Bytecode(Mutex::new(state)), imports)
                }
                Module::Native(native) => (
                    ModuleState::Native(native.create_state(&self.registry)?),
                    Vec::new(),
                ),
            };
            loaded.push(LoadedModule {
                module: module.clone(),
                state: ModuleStateRef {
                    name: Arc::from(module.name()),
                    inner: Arc::new(state),
                },
                imports,
            });
        }

        debug!(
            modules = loaded.len(),
            live_resources = self.registry.live_count(),
            "context created"
        );
        Ok(Arc::new(Context {
            registry: self.registry.clone(),
            config: self.config.clone(),
            modules: loaded,
        }))
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

fn resolve_import(
    modules: &[Module],
    importer: usize,
    import: &ImportDecl,
) -> Result<Option<ResolvedImport>, VmError> {
    let target = modules
        .iter()
        .enumerate()
        .filter(|(i, m)| *i != importer && m.name() == import.module)
        .find_map(|(i, m)| m.lookup_export(&import.name).map(|(ordinal, sig)| (i, ordinal, sig)));

    match target {
        Some((module_index, function, signature)) => {
            if *signature != import.signature {
                return Err(VmError::InvalidModule(format!(
                    "import {} declared as {} but exported as {}",
                    import.full_name(),
                    import.signature,
                    signature
                )));
            }
            debug!(
                import = %import.full_name(),
                importer = %modules[importer].name(),
                "import resolved"
            );
            Ok(Some(ResolvedImport {
                module_index,
                function,
            }))
        }
        None if import.optional => {
            debug!(import = %import.full_name(), "optional import left unresolved");
            Ok(None)
        }
        None => Err(VmError::InvalidModule(format!(
            "unresolved import {} required by module '{}'",
            import.full_name(),
            modules[importer].name()
        ))),
    }
}

/// Target of a resolved import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResolvedImport {
    pub module_index: usize,
    pub function: usize,
}

pub(crate) struct LoadedModule {
    pub module: Module,
    pub state: ModuleStateRef,
    /// Parallel to the module's import table; `None` for unresolved optionals
    pub imports: Vec<Option<ResolvedImport>>,
}

/// A callable function inside a context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRef {
    pub module_index: usize,
    pub ordinal: usize,
    pub signature: Signature,
}

/// Live set of linked modules and their states.
pub struct Context {
    registry: Arc<ResourceRegistry>,
    config: VmConfig,
    modules: Vec<LoadedModule>,
}

impl Context {
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|m| m.module.name())
    }

    /// State of the module named `name`
    pub fn state(&self, name: &str) -> Option<ModuleStateRef> {
        self.modules
            .iter()
            .find(|m| m.module.name() == name)
            .map(|m| m.state.clone())
    }

    /// Look up an exported function by its `module.function` name.
    pub fn lookup_function(&self, full_name: &str) -> Result<FunctionRef, VmError> {
        let missing = || VmError::InvalidModule(format!("no exported function '{}'", full_name));
        let (module_name, function_name) = full_name.split_once('.').ok_or_else(missing)?;
        self.modules
            .iter()
            .enumerate()
            .filter(|(_, m)| m.module.name() == module_name)
            .find_map(|(module_index, m)| {
                m.module
                    .lookup_export(function_name)
                    .map(|(ordinal, signature)| FunctionRef {
                        module_index,
                        ordinal,
                        signature: signature.clone(),
                    })
            })
            .ok_or_else(missing)
    }

    /// Run `full_name` to completion on the calling thread.
    pub fn invoke(self: &Arc<Self>, full_name: &str, args: Vec<Value>) -> Result<TypedList, VmError> {
        Fiber::new(self, full_name, args)?.run_to_completion()
    }

    pub(crate) fn loaded(&self, index: usize) -> Result<&LoadedModule, VmError> {
        self.modules
            .get(index)
            .ok_or_else(|| VmError::InvalidState(format!("no module at index {}", index)))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("modules", &self.module_names().collect::<Vec<_>>())
            .field("registry", &self.registry)
            .finish()
    }
}

/// Globals and rodata refs of one bytecode module in one context.
pub(crate) struct BytecodeState {
    pub globals: Vec<Value>,
    pub rodata: Vec<Ref>,
}

impl BytecodeState {
    fn new(registry: &Arc<ResourceRegistry>, module: &BytecodeModule) -> Result<Self, VmError> {
        let rodata = module
            .rodata
            .iter()
            .map(|segment| registry.register_ref(Arc::new(ByteBuffer::new(segment.clone()))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            globals: module.globals.iter().map(|ty| ty.zero()).collect(),
            rodata,
        })
    }
}

pub(crate) enum ModuleState {
    Bytecode(Mutex<BytecodeState>),
    Native(Option<Box<dyn Any + Send + Sync>>),
}

/// Shared handle to one module's state within a context.
#[derive(Clone)]
pub struct ModuleStateRef {
    name: Arc<str>,
    inner: Arc<ModuleState>,
}

impl ModuleStateRef {
    pub fn module_name(&self) -> &str {
        &self.name
    }

    /// Native module state downcast to `T`; `None` for bytecode modules,
    /// stateless native modules, or a different type.
    pub fn native<T: Any>(&self) -> Option<&T> {
        match &*self.inner {
            ModuleState::Native(Some(state)) => state.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Current value of a bytecode global
    pub fn global(&self, index: usize) -> Option<Value> {
        self.bytecode().and_then(|state| state.globals.get(index).cloned())
    }

    pub(crate) fn bytecode(&self) -> Option<MutexGuard<'_, BytecodeState>> {
        match &*self.inner {
            ModuleState::Bytecode(state) => Some(state.lock()),
            ModuleState::Native(_) => None,
        }
    }
}

impl fmt::Debug for ModuleStateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flavour = match &*self.inner {
            ModuleState::Bytecode(_) => "bytecode",
            ModuleState::Native(_) => "native",
        };
        f.debug_struct("ModuleStateRef")
            .field("module", &self.name)
            .field("flavour", &flavour)
            .finish()
    }
}
