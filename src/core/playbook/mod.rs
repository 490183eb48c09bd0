use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::info;

use crate::core::error::ApiError;

/// Handle returned by a successful launch. The request path keeps the pid
/// and command line for the execution record; the exit channel feeds the
/// reaper and is never awaited on the request path.
pub struct Launched {
    pub pid: Option<u32>,
    pub command: String,
    pub exit: Option<oneshot::Receiver<Option<i32>>>,
}

/// Launches a playbook process with a set of key/value parameters without
/// waiting for completion. Errors only when the process cannot be started at
/// all; playbook-internal failure is invisible here.
#[async_trait]
pub trait PlaybookLauncher: Send + Sync {
    async fn launch(
        &self,
        playbook_name: &str,
        extra_vars: &[(String, String)],
    ) -> Result<Launched, ApiError>;
}

pub struct AnsibleRunner {
    playbooks_dir: PathBuf,
    program: String,
}

impl AnsibleRunner {
    pub fn new(playbooks_dir: PathBuf) -> Self {
        Self {
            playbooks_dir,
            program: "ansible-playbook".to_string(),
        }
    }

    /// Substitute the launched program. Used by tests to stand in a binary
    /// that exists everywhere.
    pub fn with_program(playbooks_dir: PathBuf, program: &str) -> Self {
        Self {
            playbooks_dir,
            program: program.to_string(),
        }
    }
}

#[async_trait]
impl PlaybookLauncher for AnsibleRunner {
    async fn launch(
        &self,
        playbook_name: &str,
        extra_vars: &[(String, String)],
    ) -> Result<Launched, ApiError> {
        let playbook_path = self.playbooks_dir.join(playbook_name);

        let mut args: Vec<String> = vec![playbook_path.to_string_lossy().to_string()];
        for (key, value) in extra_vars {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, shell_quote(value)));
        }

        let command_line = std::iter::once(self.program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        // Arguments go straight to execve; the quoting above only protects
        // the audited command string and any later replay through a shell.
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to start {}: {}", self.program, e))?;

        let pid = child.id();
        info!(playbook = %playbook_name, pid = ?pid, "Launched playbook");

        // The child is handed to a waiter task; it outlives the request and
        // is not killed when the handle drops.
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let code = child.wait().await.ok().and_then(|status| status.code());
            let _ = tx.send(code);
        });

        Ok(Launched {
            pid,
            command: command_line,
            exit: Some(rx),
        })
    }
}

/// POSIX single-quote escaping, applied per value. Values made only of safe
/// characters pass through unquoted.
fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
