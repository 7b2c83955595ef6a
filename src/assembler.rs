//! # Assembler Module
//!
//! Boundary to the external IL assembler. The compiler core never calls
//! this; the `liac` binary hands it the written `.il` file once
//! compilation has finished.

use std::path::Path;
use std::process::Command;
use std::str::FromStr;

use crate::error::{CompileError, CompileResult, Diagnostic, DiagnosticSink, ErrorCode, WarningCode};

// -----------------------------------------------------------------------------
// BUILD SETTINGS
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildKind {
    #[default]
    Exe,
    Dll,
    /// Write the `.il` text only.
    None,
}

impl FromStr for BuildKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exe" => Ok(BuildKind::Exe),
            "dll" => Ok(BuildKind::Dll),
            "none" => Ok(BuildKind::None),
            other => Err(format!("unknown build type '{}', expected exe, dll or none", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X64,
    X86,
    Arm,
    Arm64,
    Itanium,
    Bit32Preferred,
}

impl Architecture {
    /// Assembler switch selecting this target; x86 is the default image.
    fn flag(self) -> Option<&'static str> {
        match self {
            Architecture::X64 => Some("/x64"),
            Architecture::X86 => None,
            Architecture::Arm => Some("/arm"),
            Architecture::Arm64 => Some("/arm64"),
            Architecture::Itanium => Some("/itanium"),
            Architecture::Bit32Preferred => Some("/32bitpreferred"),
        }
    }

    /// Parses `text`, reporting `InvalidArchitecture` and returning `None`
    /// when it names no known target.
    pub fn parse_or_warn(text: &str, sink: &mut dyn DiagnosticSink) -> Option<Architecture> {
        match text.parse() {
            Ok(arch) => Some(arch),
            Err(()) => {
                sink.report(Diagnostic::warning(
                    WarningCode::InvalidArchitecture,
                    format!("Unknown architecture '{}', using the assembler default", text),
                    None,
                ));
                None
            }
        }
    }
}

impl FromStr for Architecture {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x64" => Ok(Architecture::X64),
            "x86" => Ok(Architecture::X86),
            "arm" => Ok(Architecture::Arm),
            "arm64" => Ok(Architecture::Arm64),
            "itanium" => Ok(Architecture::Itanium),
            "32bitpreferred" => Ok(Architecture::Bit32Preferred),
            _ => Err(()),
        }
    }
}

// -----------------------------------------------------------------------------
// ASSEMBLER
// -----------------------------------------------------------------------------

pub struct Assembler {
    program: String,
}

impl Assembler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Command-line arguments for one assembler run.
    pub fn arguments(
        il_path: &Path,
        out_path: &Path,
        arch: Option<Architecture>,
        kind: BuildKind,
    ) -> Vec<String> {
        let mut args = vec![il_path.display().to_string()];
        match kind {
            BuildKind::Exe => args.push("/exe".to_string()),
            BuildKind::Dll => args.push("/dll".to_string()),
            BuildKind::None => {}
        }
        args.push(format!("/output={}", out_path.display()));
        if let Some(flag) = arch.and_then(Architecture::flag) {
            args.push(flag.to_string());
        }
        args
    }

    /// Runs the assembler synchronously.
    ///
    /// # Errors
    /// `IlasmNotFound` if the program cannot be spawned, `IlCompFailed`
    /// if it exits unsuccessfully.
    pub fn assemble(
        &self,
        il_path: &Path,
        out_path: &Path,
        arch: Option<Architecture>,
        kind: BuildKind,
    ) -> CompileResult<()> {
        let args = Self::arguments(il_path, out_path, arch, kind);
        tracing::info!(program = %self.program, ?args, "invoking assembler");

        let status = Command::new(&self.program).args(&args).status().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                CompileError::no_span(
                    ErrorCode::IlasmNotFound,
                    format!("The assembler '{}' was not found", self.program),
                )
            } else {
                CompileError::no_span(
                    ErrorCode::IlCompFailed,
                    format!("Could not run '{}': {}", self.program, err),
                )
            }
        })?;

        if !status.success() {
            return Err(CompileError::no_span(
                ErrorCode::IlCompFailed,
                format!("The assembler exited with {}", status),
            ));
        }
        Ok(())
    }
}
