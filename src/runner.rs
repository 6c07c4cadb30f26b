//! # Command Runner
//!
//! Executes one [`Operation`] at a time and reports the exit status plus the
//! captured output. The runner knows how to spell an invocation, never what
//! it means: the reconciler only looks at [`CommandOutput::success`] and the
//! diagnostic text.
//!
//! - [`SystemRunner`] spawns the real `aptly`/`gpg` binaries.
//! - [`PretendRunner`] logs what would run and reports success.

use std::process::Command;

use log::{debug, info, warn};

use crate::error::Result;
use crate::operation::{keyring_args, Operation, Tool};

/// Exit status and captured output of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Free-text diagnostic for a failed invocation.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Trait for executing operations - allows substituting the external tools in tests
pub trait CommandRunner: Send + Sync {
    /// Run a single operation.
    ///
    /// `Err` means the invocation could not be attempted at all (e.g. the
    /// binary is missing); a non-zero exit is an `Ok` with `success == false`.
    fn run(&self, operation: &Operation) -> Result<CommandOutput>;
}

/// Runs operations with the system `aptly` and `gpg` binaries
#[derive(Debug, Clone)]
pub struct SystemRunner {
    aptly: String,
    gpg: String,
}

impl SystemRunner {
    pub fn new(aptly: impl Into<String>, gpg: impl Into<String>) -> Self {
        Self {
            aptly: aptly.into(),
            gpg: gpg.into(),
        }
    }

    fn program(&self, tool: Tool) -> &str {
        match tool {
            Tool::Aptly => &self.aptly,
            Tool::Gpg => &self.gpg,
        }
    }

    fn exec(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!("Running {} {}", program, args.join(" "));
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Shell pipeline that downloads a key and imports it into the trusted keyring
    fn key_import_script(&self, url: &str) -> String {
        let gpg_args: Vec<String> = keyring_args().iter().map(|arg| shell_quote(arg)).collect();
        format!(
            "curl -fsSL {} | {} {} --import",
            shell_quote(url),
            shell_quote(&self.gpg),
            gpg_args.join(" ")
        )
    }

    /// Fetch a key over HTTP and pipe it into the trusted keyring.
    fn import_key_from_url(&self, url: &str) -> Result<CommandOutput> {
        let script = self.key_import_script(url);
        self.exec("bash", &["-c".to_string(), script])
    }
}

/// Single-quote a word for `bash -c`
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', "'\\''"))
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(Tool::Aptly.default_program(), Tool::Gpg.default_program())
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, operation: &Operation) -> Result<CommandOutput> {
        let output = self.exec(self.program(operation.tool()), &operation.args())?;

        if let Operation::ImportGpgKey {
            key,
            url: Some(url),
            ..
        } = operation
        {
            if !output.success {
                warn!(
                    "Keyserver import of {} failed, downloading from {}",
                    key, url
                );
                return self.import_key_from_url(url);
            }
        }

        Ok(output)
    }
}

/// Logs operations instead of executing them
#[derive(Debug, Clone, Copy, Default)]
pub struct PretendRunner;

impl CommandRunner for PretendRunner {
    fn run(&self, operation: &Operation) -> Result<CommandOutput> {
        info!("Pretending to run: {}", operation.argv().join(" "));
        Ok(CommandOutput::ok())
    }
}
