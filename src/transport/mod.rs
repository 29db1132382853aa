//! EP-030: Transport — external compiler processes, git, and HTTP.

pub mod http;
pub mod local;

/// Output from running an external program.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stderr, or the exit code when stderr is empty.
    pub fn failure_message(&self) -> String {
        let err = self.stderr.trim();
        if err.is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            err.to_string()
        }
    }
}
