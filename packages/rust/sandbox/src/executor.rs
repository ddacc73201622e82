//! Subprocess execution with a wall-clock timeout, process-group kill, and
//! capped output capture.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use pagewise_shared::SandboxConfig;

use crate::policy::{CommandLimits, DENIED_MODULES, vet_command, vet_imports};

const OUTPUT_TRUNCATED: &str = "\n... [Output truncated]";
const ERROR_OUTPUT_TRUNCATED: &str = "\n... [Error output truncated]";

/// How long killed stragglers get to release the pipes before readers are dropped.
const KILL_DRAIN: Duration = Duration::from_millis(200);

/// Runs `user_code.py` with the data context as globals and a trimmed set of
/// builtins: no file, eval or input access, and an `__import__` that refuses
/// the denied modules. `{denied}` is replaced with a Python set literal.
const SCRIPT_RUNNER: &str = r#"import builtins as _builtins
import json as _json

_DENIED = {denied}
_REMOVED = {"open", "eval", "exec", "compile", "input", "breakpoint", "__import__"}
_real_import = _builtins.__import__


def _guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
    if name.split(".")[0] in _DENIED:
        raise ImportError(f"import of '{name}' is not allowed")
    return _real_import(name, globals, locals, fromlist, level)


_safe = {k: v for k, v in vars(_builtins).items() if k not in _REMOVED}
_safe["__import__"] = _guarded_import

with open("context.json", encoding="utf-8") as _f:
    _namespace = _json.load(_f)
with open("user_code.py", encoding="utf-8") as _f:
    _source = _f.read()

_namespace.update({"__builtins__": _safe, "__name__": "__main__"})
exec(compile(_source, "user_code.py", "exec"), _namespace)
"#;

fn script_runner() -> String {
    let denied: Vec<String> = DENIED_MODULES.iter().map(|m| format!("{m:?}")).collect();
    SCRIPT_RUNNER.replace("{denied}", &format!("{{{}}}", denied.join(", ")))
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Outcome of one sandbox invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Process exit code; `-1` for blocked, timed out, signalled or unspawnable runs.
    pub return_code: i32,
    pub elapsed_seconds: f64,
}

impl ExecutionResult {
    fn blocked(message: String) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: message,
            return_code: -1,
            elapsed_seconds: 0.0,
        }
    }

    fn error(message: impl std::fmt::Display, started: Instant) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: format!("Execution error: {message}"),
            return_code: -1,
            elapsed_seconds: started.elapsed().as_secs_f64(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

/// Runs shell commands and scripts in throwaway working directories.
///
/// Each invocation gets its own temporary directory (removed on drop, on
/// every exit path) and its own process group, so a timeout can take down
/// everything the command started.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
    /// Parent directory for per-run temp dirs; system temp dir when `None`.
    root: Option<PathBuf>,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config, root: None }
    }

    /// Create per-run working directories under `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn limits(&self) -> CommandLimits {
        CommandLimits {
            max_len: self.config.max_command_len,
            max_separators: self.config.max_separators,
        }
    }

    fn work_dir(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pagewise-exec-");
        match &self.root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    /// Vet and run a shell command via `sh -c` in a fresh working directory.
    #[instrument(skip_all, fields(command_len = command.len()))]
    pub async fn run_shell(&self, command: &str) -> ExecutionResult {
        if let Err(violation) = vet_command(command, self.limits()) {
            warn!(reason = %violation, "command blocked");
            return ExecutionResult::blocked(format!("Command blocked for security: {violation}"));
        }

        let started = Instant::now();
        let dir = match self.work_dir() {
            Ok(dir) => dir,
            Err(e) => return ExecutionResult::error(format!("failed to create working directory: {e}"), started),
        };

        self.spawn_and_wait(command, dir.path(), started).await
    }

    /// Vet and run a script with the configured interpreter.
    ///
    /// `code` is written as `user_code.py` and `context` as `context.json`. A
    /// runner script loads the context into the code's globals and executes it
    /// with restricted builtins. The run goes through the same command
    /// vetting, timeout and output capping as [`Self::run_shell`].
    #[instrument(skip_all, fields(code_len = code.len()))]
    pub async fn run_script(
        &self,
        code: &str,
        context: &serde_json::Map<String, serde_json::Value>,
    ) -> ExecutionResult {
        if let Err(violation) = vet_imports(code) {
            warn!(module = %violation, "script import blocked");
            return ExecutionResult::blocked(format!("Dangerous import blocked: {violation}"));
        }

        let started = Instant::now();
        let dir = match self.work_dir() {
            Ok(dir) => dir,
            Err(e) => return ExecutionResult::error(format!("failed to create working directory: {e}"), started),
        };

        let context_json = match serde_json::to_string(context) {
            Ok(json) => json,
            Err(e) => return ExecutionResult::error(format!("failed to encode data context: {e}"), started),
        };
        if let Err(e) = std::fs::write(dir.path().join("context.json"), context_json) {
            return ExecutionResult::error(format!("failed to write data context: {e}"), started);
        }
        if let Err(e) = std::fs::write(dir.path().join("user_code.py"), format!("{code}\n")) {
            return ExecutionResult::error(format!("failed to write script: {e}"), started);
        }
        if let Err(e) = std::fs::write(dir.path().join("script.py"), script_runner()) {
            return ExecutionResult::error(format!("failed to write script runner: {e}"), started);
        }

        let command = format!("{} script.py", self.config.interpreter);
        if let Err(violation) = vet_command(&command, self.limits()) {
            return ExecutionResult::blocked(format!("Command blocked for security: {violation}"));
        }

        self.spawn_and_wait(&command, dir.path(), started).await
    }

    /// Spawn `sh -c command` in its own process group and wait with timeout.
    async fn spawn_and_wait(&self, command: &str, dir: &Path, started: Instant) -> ExecutionResult {
        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return ExecutionResult::error(e, started),
        };

        // Process group id equals the leader's pid with process_group(0).
        let pgid = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok());
        let byte_cap = self.config.max_output_chars.saturating_mul(4).saturating_add(4);
        let mut stdout_pipe = PipeCapture::spawn(child.stdout.take(), byte_cap);
        let mut stderr_pipe = PipeCapture::spawn(child.stderr.take(), byte_cap);

        let (return_code, timed_out) = match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
            Ok(Err(e)) => return ExecutionResult::error(e, started),
            Err(_) => {
                warn!(timeout_secs = self.config.timeout.as_secs(), "execution timed out, terminating process group");
                self.terminate_group(&mut child, pgid).await;
                (-1, true)
            }
        };

        // Stragglers that inherited the pipes can keep them open after the
        // leader exits; bound the drain and kill the group if it stalls.
        let drained = tokio::time::timeout(self.config.grace, async {
            tokio::join!(stdout_pipe.finish(), stderr_pipe.finish())
        })
        .await
        .is_ok();
        if !drained {
            debug!("pipes still open after grace period, killing process group");
            if let Some(pgid) = pgid {
                signal_group(pgid, libc::SIGKILL);
            }
            let _ = tokio::time::timeout(KILL_DRAIN, async {
                tokio::join!(stdout_pipe.finish(), stderr_pipe.finish())
            })
            .await;
            stdout_pipe.abort();
            stderr_pipe.abort();
        }

        let stdout = cap_output(
            &String::from_utf8_lossy(&stdout_pipe.bytes()),
            self.config.max_output_chars,
            OUTPUT_TRUNCATED,
        );
        let mut stderr = cap_output(
            &String::from_utf8_lossy(&stderr_pipe.bytes()),
            self.config.max_output_chars,
            ERROR_OUTPUT_TRUNCATED,
        );
        if timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "Process killed due to timeout after {} seconds",
                self.config.timeout.as_secs()
            ));
        }

        let result = ExecutionResult {
            success: !timed_out && return_code == 0,
            stdout,
            stderr,
            return_code,
            elapsed_seconds: started.elapsed().as_secs_f64(),
        };
        info!(
            success = result.success,
            return_code = result.return_code,
            elapsed_ms = started.elapsed().as_millis(),
            "execution finished"
        );
        result
    }

    /// SIGTERM the group, wait out the grace period, then SIGKILL.
    async fn terminate_group(&self, child: &mut tokio::process::Child, pgid: Option<libc::pid_t>) {
        let Some(pgid) = pgid else {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return;
        };

        signal_group(pgid, libc::SIGTERM);
        if tokio::time::timeout(self.config.grace, child.wait()).await.is_ok() {
            debug!(pgid, "process group exited after SIGTERM");
            // Members other than the leader may still be alive.
            signal_group(pgid, libc::SIGKILL);
            return;
        }

        warn!(pgid, "process group ignored SIGTERM, sending SIGKILL");
        signal_group(pgid, libc::SIGKILL);
        let _ = child.wait().await;
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn signal_group(pgid: libc::pid_t, signal: libc::c_int) {
    // SAFETY: killpg only sends a signal; a stale or empty group yields ESRCH.
    let rc = unsafe { libc::killpg(pgid, signal) };
    if rc != 0 {
        debug!(pgid, signal, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}

/// A background reader for one child pipe. Bytes land in a shared buffer as
/// they arrive, so whatever was read survives the task being aborted.
struct PipeCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl PipeCapture {
    fn spawn<R>(pipe: Option<R>, cap: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let task = pipe.map(|pipe| tokio::spawn(read_capped(pipe, cap, buffer.clone())));
        Self { buffer, task }
    }

    /// Wait for the reader to hit EOF.
    async fn finish(&mut self) {
        if let Some(task) = self.task.as_mut() {
            let _ = task.await;
            self.task = None;
        }
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn bytes(&self) -> Vec<u8> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Read a pipe to EOF, keeping at most `cap` bytes and discarding the rest so
/// the writer never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize, sink: Arc<Mutex<Vec<u8>>>) {
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let mut kept = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let room = cap.saturating_sub(kept.len());
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
}

/// Keep the first `max_chars` characters, appending `marker` if cut.
fn cap_output(text: &str, max_chars: usize, marker: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}{marker}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> SandboxConfig {
        SandboxConfig {
            timeout: Duration::from_secs(10),
            grace: Duration::from_secs(1),
            max_output_chars: 10_000,
            max_command_len: 5000,
            max_separators: 10,
            interpreter: "python3".into(),
        }
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    #[tokio::test]
    async fn echo_succeeds() {
        let result = Sandbox::new(config()).run_shell("echo hello").await;
        assert!(result.success);
        assert_eq!(result.return_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn blocked_command_is_not_spawned() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(config()).with_root(root.path());
        let result = sandbox.run_shell("sudo rm -rf /").await;

        assert!(!result.success);
        assert_eq!(result.return_code, -1);
        assert_eq!(result.elapsed_seconds, 0.0);
        assert!(result.stderr.starts_with("Command blocked for security: "));
        assert!(result.stderr.contains("sudo"));
        // No working directory was ever created.
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let result = Sandbox::new(config()).run_shell("echo oops >&2; exit 3").await;
        assert!(!result.success);
        assert_eq!(result.return_code, 3);
        assert!(result.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn timeout_kills_process_group() {
        let mut cfg = config();
        cfg.timeout = Duration::from_secs(1);
        cfg.grace = Duration::from_secs(1);

        let started = Instant::now();
        let result = Sandbox::new(cfg).run_shell("sleep 30 & sleep 30").await;

        assert!(!result.success);
        assert_eq!(result.return_code, -1);
        assert!(result.stderr.contains("timeout"));
        assert!(started.elapsed() < Duration::from_millis(2200));
    }

    #[tokio::test]
    async fn sigterm_ignoring_process_is_killed_after_grace() {
        let mut cfg = config();
        cfg.timeout = Duration::from_secs(1);
        cfg.grace = Duration::from_secs(1);

        let started = Instant::now();
        let result = Sandbox::new(cfg)
            .run_shell("trap '' TERM; while true; do sleep 1; done")
            .await;

        assert!(!result.success);
        assert_eq!(result.return_code, -1);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn background_child_holding_pipes_keeps_output() {
        let mut cfg = config();
        cfg.timeout = Duration::from_secs(5);
        cfg.grace = Duration::from_secs(1);

        let started = Instant::now();
        let result = Sandbox::new(cfg).run_shell("echo visible-output; sleep 30 &").await;

        assert!(result.success, "stderr: {}", result.stderr);
        assert_eq!(result.return_code, 0);
        assert!(result.stdout.contains("visible-output"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn output_is_capped_with_markers() {
        let mut cfg = config();
        cfg.max_output_chars = 10;
        let result = Sandbox::new(cfg)
            .run_shell("printf 'abcdefghijklmnop'; printf 'zyxwvutsrqponm' >&2")
            .await;

        assert_eq!(result.stdout, "abcdefghij\n... [Output truncated]");
        assert_eq!(result.stderr, "zyxwvutsrq\n... [Error output truncated]");
    }

    #[tokio::test]
    async fn runs_in_fresh_directory_that_is_removed() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(config()).with_root(root.path());

        let result = sandbox.run_shell("pwd; touch scratch.txt").await;
        assert!(result.success);
        assert!(result.stdout.contains("pagewise-exec-"));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn denied_import_is_not_run() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(config()).with_root(root.path());
        let result = sandbox
            .run_script("import os\nos.system('rm -rf /')", &serde_json::Map::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.return_code, -1);
        assert_eq!(result.stderr, "Dangerous import blocked: os");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn script_sees_data_context() {
        if !python_available() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(config()).with_root(root.path());
        let context = json!({ "user_question": "how many?", "numbers": [1, 2, 3] });
        let context = context.as_object().cloned().unwrap();

        let result = sandbox
            .run_script("import json\nprint(user_question)\nprint(sum(numbers))", &context)
            .await;

        assert!(result.success, "stderr: {}", result.stderr);
        assert!(result.stdout.contains("how many?"));
        assert!(result.stdout.contains('6'));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn script_runtime_error_surfaces_stderr() {
        if !python_available() {
            return;
        }
        let result = Sandbox::new(config())
            .run_script("raise ValueError('bad input')", &serde_json::Map::new())
            .await;

        assert!(!result.success);
        assert_ne!(result.return_code, 0);
        assert!(result.stderr.contains("ValueError"));
    }

    #[tokio::test]
    async fn script_has_no_open_builtin() {
        if !python_available() {
            return;
        }
        let result = Sandbox::new(config())
            .run_script("print(open('context.json').read())", &serde_json::Map::new())
            .await;

        assert!(!result.success);
        assert!(result.stderr.contains("NameError"), "stderr: {}", result.stderr);
    }

    #[tokio::test]
    async fn dynamic_import_of_denied_module_fails() {
        if !python_available() {
            return;
        }
        let result = Sandbox::new(config())
            .run_script("m = __import__('o' + 's')\nprint(m.getcwd())", &serde_json::Map::new())
            .await;

        assert!(!result.success);
        assert!(result.stderr.contains("is not allowed"), "stderr: {}", result.stderr);
        assert!(!result.stdout.contains("pagewise-exec-"));
    }

    #[test]
    fn runner_lists_denied_modules() {
        let runner = script_runner();
        assert!(runner.contains(r#"_DENIED = {"os", "sys", "subprocess""#));
        assert!(!runner.contains("{denied}"));
    }

    #[test]
    fn cap_output_counts_characters() {
        assert_eq!(cap_output("héllo", 5, OUTPUT_TRUNCATED), "héllo");
        assert_eq!(cap_output("héllo!", 2, OUTPUT_TRUNCATED), "hé\n... [Output truncated]");
    }
}
