#![forbid(unsafe_code)]

//! `rain.toml` loading.
//!
//! ```toml
//! [compile]
//! target = "wasm32-unknown-unknown"
//! optimize = true
//! verify = true
//! comptime_fuel = 1000000
//! comptime_memory = 1048576
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use miette::Diagnostic;
use rain_ir::InterpreterLimits;
use target_lexicon::Triple;
use thiserror::Error;
use tracing::debug;

pub const MANIFEST_NAME: &str = "rain.toml";

#[derive(Debug, Error, Diagnostic)]
#[error("config error: {message}")]
#[diagnostic(code(rain::config))]
pub struct ConfigError {
    pub message: String,
}

/// Settings for one compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    pub target: Triple,
    /// Run the IR optimizer over the generated module.
    pub optimize: bool,
    /// Run the IR verifier over the final module.
    pub verify: bool,
    pub comptime_fuel: u64,
    /// Bytes of interpreter memory per compile-time evaluation.
    pub comptime_memory: u64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        let limits = InterpreterLimits::default();
        Self {
            target: rain_codegen::default_triple(),
            optimize: true,
            verify: true,
            comptime_fuel: limits.fuel,
            comptime_memory: limits.memory,
        }
    }
}

impl CompileOptions {
    pub fn limits(&self) -> InterpreterLimits {
        InterpreterLimits {
            fuel: self.comptime_fuel,
            memory: self.comptime_memory,
            ..InterpreterLimits::default()
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let manifest: Manifest = toml::from_str(text).map_err(|e| ConfigError {
            message: format!("failed to parse manifest: {e}"),
        })?;
        manifest.compile.unwrap_or_default().resolve()
    }
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    #[serde(default)]
    compile: Option<Compile>,
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct Compile {
    #[serde(default)]
    target: Option<String>,

    #[serde(default)]
    optimize: Option<bool>,

    #[serde(default)]
    verify: Option<bool>,

    #[serde(default)]
    comptime_fuel: Option<u64>,

    #[serde(default)]
    comptime_memory: Option<u64>,
}

impl Compile {
    fn resolve(self) -> Result<CompileOptions, ConfigError> {
        let defaults = CompileOptions::default();
        let target = match self.target {
            Some(text) => Triple::from_str(&text).map_err(|e| ConfigError {
                message: format!("unknown target `{text}`: {e}"),
            })?,
            None => defaults.target,
        };
        let comptime_fuel = self.comptime_fuel.unwrap_or(defaults.comptime_fuel);
        if comptime_fuel == 0 {
            return Err(ConfigError {
                message: "`comptime_fuel` must be at least 1".to_string(),
            });
        }
        Ok(CompileOptions {
            target,
            optimize: self.optimize.unwrap_or(defaults.optimize),
            verify: self.verify.unwrap_or(defaults.verify),
            comptime_fuel,
            comptime_memory: self.comptime_memory.unwrap_or(defaults.comptime_memory),
        })
    }
}

/// Nearest `rain.toml` in `start` or one of its ancestors.
pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    let mut cur = if start.is_file() {
        start.parent()?.to_path_buf()
    } else {
        start.to_path_buf()
    };

    loop {
        let candidate = cur.join(MANIFEST_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        match cur.parent() {
            Some(parent) => cur = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Options from the nearest manifest above `start`; defaults when there is
/// none.
pub fn load_options(start: &Path) -> Result<CompileOptions, ConfigError> {
    let Some(path) = find_manifest(start) else {
        debug!(start = %start.display(), "no manifest found, using defaults");
        return Ok(CompileOptions::default());
    };
    let raw = fs::read_to_string(&path).map_err(|e| ConfigError {
        message: format!("failed to read {}: {e}", path.display()),
    })?;
    let options = CompileOptions::from_toml(&raw).map_err(|e| ConfigError {
        message: format!("{}: {}", path.display(), e.message),
    })?;
    debug!(manifest = %path.display(), target = %options.target, "loaded compile options");
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_manifest_uses_defaults() {
        let options = CompileOptions::from_toml("").expect("parse");
        assert_eq!(options, CompileOptions::default());
        assert_eq!(options.target.to_string(), "wasm32-unknown-unknown");
    }

    #[test]
    fn compile_table_overrides_defaults() {
        let options = CompileOptions::from_toml(
            "[compile]\noptimize = false\ncomptime_fuel = 42\ntarget = \"x86_64-unknown-linux-gnu\"\n",
        )
        .expect("parse");
        assert!(!options.optimize);
        assert!(options.verify);
        assert_eq!(options.limits().fuel, 42);
        assert_eq!(options.target.to_string(), "x86_64-unknown-linux-gnu");
    }

    #[test]
    fn bad_values_are_reported() {
        assert!(CompileOptions::from_toml("[compile]\ntarget = \"not-a-real-triple-at-all\"\n").is_err());
        assert!(CompileOptions::from_toml("[compile]\ncomptime_fuel = 0\n").is_err());
        assert!(CompileOptions::from_toml("[compile]\nspeed = 11\n").is_err());
    }
}
