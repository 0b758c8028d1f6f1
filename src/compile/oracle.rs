//! The front-end compiler seam.
//!
//! Lexing, parsing, type checking and code generation live in the `smeltc`
//! front-end; this engine only sees `compile(source) -> CompiledUnit` plus a
//! diagnostic taxonomy. `ProcessOracle` talks to the real front-end over a
//! JSON pipe; tests plug in closures.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::util::exec::Cmd;

// =============================================================================
// Compiled output
// =============================================================================

/// Kind of resource a compiled unit declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Server-rendered page
    Page,
    /// HTTP API handler
    Api,
    /// Database schema declaration (migration-relevant)
    Schema,
    /// Background job
    Job,
}

/// A named resource produced by compiling one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    pub name: String,
}

/// Result of successfully compiling one source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompiledUnit {
    /// Generated backend code.
    #[serde(default)]
    pub artifact: String,
    /// Resources declared by this unit.
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Source files this unit imports (feeds the dependency graph).
    #[serde(default)]
    pub imports: Vec<PathBuf>,
    /// Non-fatal diagnostics.
    #[serde(default)]
    pub warnings: Vec<Diagnostic>,
}

impl CompiledUnit {
    /// True if any declared resource affects the database schema.
    pub fn touches_schema(&self) -> bool {
        self.resources
            .iter()
            .any(|r| r.kind == ResourceKind::Schema)
    }
}

// =============================================================================
// Diagnostics
// =============================================================================

/// Compiler phase a diagnostic originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilePhase {
    Lex,
    Parse,
    Typecheck,
    Codegen,
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A single compiler diagnostic with source position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub phase: CompilePhase,
    pub severity: Severity,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}", file.display())?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
                if let Some(column) = self.column {
                    write!(f, ":{column}")?;
                }
            }
            write!(f, ": ")?;
        }
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " [{code}]")?;
        }
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Compilation failure taxonomy.
///
/// Lex/parse errors are confined to one file and must not abort siblings in
/// the same batch. Type and codegen errors span the whole resource set and
/// abort the pass.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to read source: {0}")]
    Io(#[from] io::Error),

    #[error("lex error: {0}")]
    Lex(Diagnostic),

    #[error("parse error: {0}")]
    Parse(Diagnostic),

    #[error("type error: {0}")]
    Type(Diagnostic),

    #[error("codegen error: {0}")]
    Codegen(Diagnostic),

    #[error("missing dependency {} for {}", .dependency.display(), .file.display())]
    MissingDependency { file: PathBuf, dependency: PathBuf },

    #[error("compiler invocation failed: {0}")]
    Tool(String),
}

impl CompileError {
    /// Program-wide errors abort the whole incremental pass; per-file errors
    /// only fail their own file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Type(_) | Self::Codegen(_))
    }

    /// The underlying diagnostic, when there is one.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::Lex(d) | Self::Parse(d) | Self::Type(d) | Self::Codegen(d) => Some(d),
            _ => None,
        }
    }
}

// =============================================================================
// Oracle trait
// =============================================================================

/// The compile oracle: source bytes in, compiled unit or diagnostics out.
pub trait CompileOracle: Send + Sync {
    fn compile(&self, source: &[u8]) -> Result<CompiledUnit, CompileError>;
}

/// Closures can stand in for the front-end in tests.
impl<F> CompileOracle for F
where
    F: Fn(&[u8]) -> Result<CompiledUnit, CompileError> + Send + Sync,
{
    fn compile(&self, source: &[u8]) -> Result<CompiledUnit, CompileError> {
        self(source)
    }
}

// =============================================================================
// Subprocess oracle
// =============================================================================

/// Wire format of `smeltc compile --json -`.
#[derive(Debug, Deserialize)]
struct OracleReply {
    #[serde(default)]
    unit: Option<CompiledUnit>,
    #[serde(default)]
    diagnostics: Vec<Diagnostic>,
}

/// Oracle that shells out to the front-end compiler.
///
/// Source bytes go to stdin; the reply is a JSON document with either a
/// compiled unit or a non-empty diagnostic list.
pub struct ProcessOracle {
    command: Vec<String>,
    root: PathBuf,
}

impl ProcessOracle {
    /// Create an oracle from the configured compiler invocation.
    ///
    /// Fails early when the binary cannot be found on PATH, which beats a
    /// per-file failure storm once watching starts.
    pub fn new(command: &[String], root: &Path) -> anyhow::Result<Self> {
        let Some(program) = command.first() else {
            anyhow::bail!("compiler command is empty");
        };
        which::which(program)
            .map_err(|e| anyhow::anyhow!("compiler `{}` not found: {}", program, e))?;

        Ok(Self {
            command: command.to_vec(),
            root: root.to_path_buf(),
        })
    }

    /// Turn a diagnostic list into the matching error variant.
    fn classify(mut diagnostics: Vec<Diagnostic>) -> CompileError {
        // First error diagnostic decides the failure class
        let first = diagnostics
            .iter()
            .position(|d| d.severity == Severity::Error)
            .map(|i| diagnostics.swap_remove(i));

        match first {
            Some(d) => match d.phase {
                CompilePhase::Lex => CompileError::Lex(d),
                CompilePhase::Parse => CompileError::Parse(d),
                CompilePhase::Typecheck => CompileError::Type(d),
                CompilePhase::Codegen => CompileError::Codegen(d),
            },
            None => CompileError::Tool("compiler reported failure without diagnostics".into()),
        }
    }
}

impl CompileOracle for ProcessOracle {
    fn compile(&self, source: &[u8]) -> Result<CompiledUnit, CompileError> {
        let output = Cmd::from_slice(&self.command)
            .args(["compile", "--json", "-"])
            .cwd(&self.root)
            .stdin(source)
            .filter(&crate::util::exec::SILENT_FILTER)
            .run()
            .map_err(|e| CompileError::Tool(format!("{e:#}")))?;

        let reply: OracleReply = serde_json::from_slice(&output.stdout)
            .map_err(|e| CompileError::Tool(format!("malformed compiler reply: {e}")))?;

        match reply.unit {
            Some(unit) => Ok(unit),
            None => Err(Self::classify(reply.diagnostics)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(phase: CompilePhase) -> Diagnostic {
        Diagnostic {
            message: "boom".into(),
            file: Some(PathBuf::from("app/users.sm")),
            line: Some(3),
            column: Some(7),
            code: Some("E0412".into()),
            phase,
            severity: Severity::Error,
        }
    }

    #[test]
    fn fatal_classification() {
        assert!(!CompileError::Lex(diag(CompilePhase::Lex)).is_fatal());
        assert!(!CompileError::Parse(diag(CompilePhase::Parse)).is_fatal());
        assert!(CompileError::Type(diag(CompilePhase::Typecheck)).is_fatal());
        assert!(CompileError::Codegen(diag(CompilePhase::Codegen)).is_fatal());
    }

    #[test]
    fn diagnostic_display_has_position() {
        let rendered = diag(CompilePhase::Parse).to_string();
        assert_eq!(rendered, "app/users.sm:3:7: boom [E0412]");
    }

    #[test]
    fn schema_detection() {
        let unit = CompiledUnit {
            resources: vec![
                Resource {
                    kind: ResourceKind::Page,
                    name: "users.index".into(),
                },
                Resource {
                    kind: ResourceKind::Schema,
                    name: "users".into(),
                },
            ],
            ..Default::default()
        };
        assert!(unit.touches_schema());
    }

    #[test]
    fn reply_with_diagnostics_classifies_by_phase() {
        let err = ProcessOracle::classify(vec![diag(CompilePhase::Typecheck)]);
        assert!(matches!(err, CompileError::Type(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn closure_oracle_compiles() {
        let oracle = |source: &[u8]| -> Result<CompiledUnit, CompileError> {
            Ok(CompiledUnit {
                artifact: format!("// {} bytes", source.len()),
                ..Default::default()
            })
        };
        let unit = oracle.compile(b"page Home {}").unwrap();
        assert!(unit.artifact.contains("12 bytes"));
    }
}
