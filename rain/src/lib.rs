#![forbid(unsafe_code)]

//! The rain compiler pipeline: validate a parsed module, generate backend
//! IR for it, then optimize and verify the result.

pub mod config;

use std::path::Path;
use std::sync::Arc;

use miette::{Diagnostic, NamedSource};
use thiserror::Error;
use tracing::debug;

pub use config::{CompileOptions, ConfigError};
pub use rain_ast as ast;
pub use rain_codegen::{CodegenError, ExternPolicy, JsMathPolicy};
pub use rain_ir as ir;
pub use rain_sema::{Builtins, SemanticError};

use rain_codegen::CodegenOptions;
use rain_ir::{IrError, OptStats};

#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Semantic(#[from] SemanticError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ir(#[from] IrError),
}

impl CompileError {
    /// Attach the source text so the report can underline the span.
    pub fn with_source(self, name: impl AsRef<str>, text: impl Into<String>) -> miette::Report {
        miette::Report::new(self).with_source_code(NamedSource::new(name, text.into()))
    }
}

/// Output of a successful compilation.
#[derive(Debug)]
pub struct Compiled {
    pub module: rain_ir::Module,
    /// Present when the optimizer ran.
    pub stats: Option<OptStats>,
}

impl Compiled {
    /// Textual IR.
    pub fn emit(&self) -> String {
        self.module.to_string()
    }
}

/// Compiles modules against one shared set of builtins.
#[derive(Clone, Debug)]
pub struct Compiler<P: ExternPolicy = JsMathPolicy> {
    builtins: Arc<Builtins>,
    policy: P,
    options: CompileOptions,
}

impl Compiler<JsMathPolicy> {
    pub fn new() -> Result<Self, CompileError> {
        Self::with_policy(JsMathPolicy)
    }

    /// Compiler configured from the nearest `rain.toml` above `start`.
    pub fn from_manifest(start: &Path) -> Result<Self, CompileError> {
        let options = config::load_options(start)?;
        Ok(Self::new()?.with_options(options))
    }
}

impl<P: ExternPolicy> Compiler<P> {
    pub fn with_policy(policy: P) -> Result<Self, CompileError> {
        Ok(Self {
            builtins: Arc::new(Builtins::new()?),
            policy,
            options: CompileOptions::default(),
        })
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Validate `module` in place, then lower it into a backend module
    /// named `name`. The first error stops the pipeline.
    pub fn compile(&self, name: &str, module: &mut rain_ast::Module) -> Result<Compiled, CompileError> {
        debug!(module = name, items = module.items.len(), "compiling");
        let tree = rain_sema::validate_module(&self.builtins, module, &self.policy)?;

        let codegen = CodegenOptions {
            module_name: name.to_string(),
            triple: self.options.target.clone(),
            limits: self.options.limits(),
        };
        let mut output = rain_codegen::compile_module(&tree, module, &self.policy, &codegen)?;

        let stats = if self.options.optimize {
            let stats = rain_ir::optimize_module(&mut output)?;
            debug!(
                folded = stats.folded,
                removed_insts = stats.removed_insts,
                removed_blocks = stats.removed_blocks,
                "optimized"
            );
            Some(stats)
        } else {
            None
        };
        if self.options.verify {
            rain_ir::verify_module(&output)?;
        }
        Ok(Compiled { module: output, stats })
    }
}
