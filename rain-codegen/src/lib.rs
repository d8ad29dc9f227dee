#![forbid(unsafe_code)]

//! Lowers a validated rain module to the backend IR.
//!
//! Every function and global is declared before any body is lowered.
//! Global initializers then run at compile time in declaration order,
//! forcing the bodies they call to be lowered first, and the remaining
//! bodies are lowered last.

mod comptime;
mod error;
mod generator;
mod intrinsic;
mod lower;
mod policy;
mod types;

pub use error::CodegenError;
pub use policy::{ExternPolicy, JsMathPolicy, default_import};

use rain_ir::InterpreterLimits;
use rain_sema::ScopeTree;
use target_lexicon::{Architecture, BinaryFormat, Environment, OperatingSystem, Triple, Vendor};
use tracing::debug;

use crate::generator::Generator;

#[derive(Clone, Debug)]
pub struct CodegenOptions {
    pub module_name: String,
    pub triple: Triple,
    /// Budget for each compile-time evaluation.
    pub limits: InterpreterLimits,
}

/// `wasm32-unknown-unknown`.
pub fn default_triple() -> Triple {
    Triple {
        architecture: Architecture::Wasm32,
        vendor: Vendor::Unknown,
        operating_system: OperatingSystem::Unknown,
        environment: Environment::Unknown,
        binary_format: BinaryFormat::Wasm,
    }
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            module_name: "main".to_string(),
            triple: default_triple(),
            limits: InterpreterLimits::default(),
        }
    }
}

/// Generate the backend module for `module`, which must have been validated
/// into `tree` under the same `policy`.
pub fn compile_module(
    tree: &ScopeTree,
    module: &rain_ast::Module,
    policy: &dyn ExternPolicy,
    options: &CodegenOptions,
) -> Result<rain_ir::Module, CodegenError> {
    debug!(module = %options.module_name, target = %options.triple, "generating code");
    let mut generator = Generator::new(tree, policy, options)?;
    generator.declare_items(&module.items)?;
    generator.initialize_globals()?;
    generator.define_remaining()?;
    Ok(generator.finish())
}
