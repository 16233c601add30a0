//! Helper functions and common imports for integration tests.

use crate::builder::{FunctionBuilder, ModuleBuilder};
use crate::config::VmConfig;
use crate::context::{Context, Instance};
use crate::error::VmError;
use crate::module::Module;
use kiln_types::sync::Arc;
use kiln_types::Value;

/// Link `modules` into a fresh context with default limits
pub fn context(modules: Vec<Module>) -> Arc<Context> {
    context_with(VmConfig::default(), modules)
}

pub fn context_with(config: VmConfig, modules: Vec<Module>) -> Arc<Context> {
    Instance::new(config).create_context(modules).unwrap()
}

/// Build a one-function module `test` exporting `name`
pub fn single_function(name: &str, build: impl FnOnce(&mut ModuleBuilder) -> FunctionBuilder) -> Module {
    let mut module = ModuleBuilder::new("test");
    let function = build(&mut module);
    let ordinal = module.function(function).unwrap();
    module.export(name, ordinal);
    module.build().unwrap().into()
}

/// Run `module.function` and unpack the result list
pub fn invoke(context: &Arc<Context>, function: &str, args: Vec<Value>) -> Result<Vec<Value>, VmError> {
    let list = context.invoke(function, args)?;
    Ok(list.into_values()?)
}

/// Single function module, run once
pub fn run(
    name: &str,
    args: Vec<Value>,
    build: impl FnOnce(&mut ModuleBuilder) -> FunctionBuilder,
) -> Result<Vec<Value>, VmError> {
    let ctx = context(vec![single_function(name, build)]);
    invoke(&ctx, &format!("test.{}", name), args)
}
