//! The `solc --standard-json` collaborator.
//!
//! Runs the external Solidity compiler as a subprocess, feeding it a
//! standard JSON input built from a [`SourceBundle`] and flattening the
//! output into per-contract artifacts.

use std::{
    collections::BTreeMap,
    io::Write,
    process::{Command, ExitStatus, Stdio},
};

use alloy::{json_abi::JsonAbi, primitives::Bytes};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Default executable name looked up in `$PATH`.
const SOLC: &str = "solc";

/// File name given to a raw source string in the standard JSON input.
const RAW_SOURCE_NAME: &str = "input.sol";

/// A Solidity source bundle: either a single raw source string or a
/// mapping from file name to source text.
#[derive(Debug, Clone)]
pub enum SourceBundle {
    Raw(String),
    Files(BTreeMap<String, String>),
}

impl SourceBundle {
    fn sources(&self) -> BTreeMap<String, SourceInput> {
        match self {
            Self::Raw(content) => BTreeMap::from([(
                RAW_SOURCE_NAME.to_string(),
                SourceInput {
                    content: content.clone(),
                },
            )]),
            Self::Files(files) => files
                .iter()
                .map(|(name, content)| {
                    (
                        name.clone(),
                        SourceInput {
                            content: content.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

impl From<&str> for SourceBundle {
    fn from(source: &str) -> Self {
        Self::Raw(source.to_string())
    }
}

impl From<String> for SourceBundle {
    fn from(source: String) -> Self {
        Self::Raw(source)
    }
}

impl From<BTreeMap<String, String>> for SourceBundle {
    fn from(files: BTreeMap<String, String>) -> Self {
        Self::Files(files)
    }
}

impl FromIterator<(String, String)> for SourceBundle {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self::Files(iter.into_iter().collect())
    }
}

/// Compiler invocation failure, distinct from errors in the compiled source.
#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("`{executable}` not found in $PATH: {source}")]
    NotFound {
        executable: String,
        #[source]
        source: which::Error,
    },
    #[error("failed to run `{executable}`: {source}")]
    Subprocess {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{executable}` exited with {status}: {stderr}")]
    Exit {
        executable: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("failed to encode compiler input: {0}")]
    InputJson(#[source] serde_json::Error),
    #[error("failed to parse compiler output: {0}")]
    OutputJson(#[source] serde_json::Error),
    #[error("invalid bytecode hex for contract `{name}`: {source}")]
    Bytecode {
        name: String,
        #[source]
        source: alloy::hex::FromHexError,
    },
    /// The source bundle itself failed to compile; carries the first
    /// error message reported by the compiler.
    #[error("{0}")]
    Source(String),
}

/// Artifact of one compiled contract.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    /// Parsed ABI description.
    pub abi: JsonAbi,
    /// Creation bytecode. Empty for interfaces and abstract contracts.
    pub bytecode: Bytes,
}

/// Flattened result of one compiler run, keyed by bare contract name.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub contracts: BTreeMap<String, ContractArtifact>,
    /// The reported `solc` version.
    pub version: Option<String>,
}

impl Compilation {
    /// Names of all compiled contracts, in sorted order.
    pub fn contract_names(&self) -> impl Iterator<Item = &str> {
        self.contracts.keys().map(String::as_str)
    }
}

/// Handle to the external `solc` executable.
#[derive(Debug, Clone)]
pub struct Compiler {
    executable: String,
}

impl Default for Compiler {
    fn default() -> Self {
        Self {
            executable: SOLC.to_string(),
        }
    }
}

impl Compiler {
    /// Use a specific executable, e.g. a versioned `solc-0.8.24` binary.
    /// Fails early if the binary is not on `$PATH`.
    pub fn new(executable: impl Into<String>) -> Result<Self, CompilerError> {
        let executable = executable.into();
        if let Err(source) = which::which(&executable) {
            return Err(CompilerError::NotFound { executable, source });
        }
        Ok(Self { executable })
    }

    /// Compile a source bundle, optionally with the optimizer enabled.
    ///
    /// Diagnostics of severity `error` fail the call with
    /// [`CompilerError::Source`] carrying the first reported message;
    /// warnings are logged and do not fail it.
    pub fn compile(
        &self,
        sources: &SourceBundle,
        optimize: bool,
    ) -> Result<Compilation, CompilerError> {
        let input = Input::new(sources, optimize);
        let input_json = serde_json::to_vec(&input).map_err(CompilerError::InputJson)?;

        let mut command = Command::new(&self.executable);
        command.arg("--standard-json");
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut process = command.spawn().map_err(|source| CompilerError::Subprocess {
            executable: self.executable.clone(),
            source,
        })?;
        let Some(stdin) = process.stdin.as_mut() else {
            return Err(CompilerError::Subprocess {
                executable: self.executable.clone(),
                source: std::io::Error::other("stdin not captured"),
            });
        };
        stdin
            .write_all(&input_json)
            .map_err(|source| CompilerError::Subprocess {
                executable: self.executable.clone(),
                source,
            })?;

        let output = process
            .wait_with_output()
            .map_err(|source| CompilerError::Subprocess {
                executable: self.executable.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(CompilerError::Exit {
                executable: self.executable.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let output: Output =
            serde_json::from_slice(&output.stdout).map_err(CompilerError::OutputJson)?;
        let compilation = into_compilation(output)?;
        debug!(
            contracts = compilation.contracts.len(),
            version = compilation.version.as_deref(),
            "compilation finished"
        );
        Ok(compilation)
    }
}

fn into_compilation(output: Output) -> Result<Compilation, CompilerError> {
    for diagnostic in &output.errors {
        match diagnostic.severity {
            Severity::Error => {
                return Err(CompilerError::Source(diagnostic.text().to_string()));
            }
            Severity::Warning => warn!("{}", diagnostic.text()),
            Severity::Info => debug!("{}", diagnostic.text()),
        }
    }

    let mut contracts = BTreeMap::new();
    for (_file, file_contracts) in output.contracts {
        for (name, contract) in file_contracts {
            let object = contract
                .evm
                .and_then(|evm| evm.bytecode)
                .map(|bytecode| bytecode.object)
                .unwrap_or_default();
            let bytecode = alloy::hex::decode(object.trim_start_matches("0x"))
                .map_err(|source| CompilerError::Bytecode {
                    name: name.clone(),
                    source,
                })?
                .into();
            contracts.insert(
                name,
                ContractArtifact {
                    abi: contract.abi,
                    bytecode,
                },
            );
        }
    }

    Ok(Compilation {
        contracts,
        version: output.version,
    })
}

#[derive(Debug, Serialize)]
struct Input {
    language: &'static str,
    sources: BTreeMap<String, SourceInput>,
    settings: Settings,
}

impl Input {
    fn new(sources: &SourceBundle, optimize: bool) -> Self {
        Self {
            language: "Solidity",
            sources: sources.sources(),
            settings: Settings {
                optimizer: Optimizer { enabled: optimize },
                output_selection: serde_json::json!({
                    "*": { "*": ["abi", "evm.bytecode.object"] }
                }),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct SourceInput {
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Settings {
    optimizer: Optimizer,
    output_selection: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct Optimizer {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct Output {
    #[serde(default)]
    contracts: BTreeMap<String, BTreeMap<String, OutputContract>>,
    #[serde(default)]
    errors: Vec<Diagnostic>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputContract {
    abi: JsonAbi,
    #[serde(default)]
    evm: Option<Evm>,
}

#[derive(Debug, Deserialize)]
struct Evm {
    #[serde(default)]
    bytecode: Option<Bytecode>,
}

#[derive(Debug, Deserialize)]
struct Bytecode {
    object: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Diagnostic {
    severity: Severity,
    message: String,
    #[serde(default)]
    formatted_message: Option<String>,
}

impl Diagnostic {
    fn text(&self) -> &str {
        self.formatted_message
            .as_deref()
            .unwrap_or(&self.message)
            .trim()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Severity {
    Error,
    Warning,
    Info,
}
