//! The two module flavours a context can load.

use crate::bytecode::BytecodeModule;
use crate::native::NativeModule;
use crate::signature::Signature;
use kiln_types::sync::Arc;

#[derive(Debug, Clone)]
pub enum Module {
    Bytecode(Arc<BytecodeModule>),
    Native(Arc<NativeModule>),
}

impl Module {
    pub fn name(&self) -> &str {
        match self {
            Module::Bytecode(m) => &m.name,
            Module::Native(m) => m.name(),
        }
    }

    /// Resolve an export to its function ordinal and signature
    pub fn lookup_export(&self, name: &str) -> Option<(usize, &Signature)> {
        match self {
            Module::Bytecode(m) => {
                let ordinal = m.lookup_export(name)?;
                m.function(ordinal).map(|f| (ordinal, &f.signature))
            }
            Module::Native(m) => {
                let ordinal = m.lookup(name)?;
                m.function(ordinal).map(|f| (ordinal, &f.signature))
            }
        }
    }

    pub fn export_names(&self) -> Vec<&str> {
        match self {
            Module::Bytecode(m) => m.exports.iter().map(|e| e.name.as_str()).collect(),
            Module::Native(m) => m.functions().iter().map(|f| f.name.as_str()).collect(),
        }
    }
}

impl From<BytecodeModule> for Module {
    fn from(module: BytecodeModule) -> Self {
        Module::Bytecode(Arc::new(module))
    }
}

impl From<NativeModule> for Module {
    fn from(module: NativeModule) -> Self {
        Module::Native(Arc::new(module))
    }
}
