//! External process execution

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on draining output after the child exits.
///
/// A grandchild that inherited the pipes can keep them open indefinitely.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback invoked once per line of output as it arrives
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Environment variables handed to a single child process.
///
/// Never written to the daemon's own environment, so concurrent jobs holding
/// different credentials cannot observe each other's.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, SecretString>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: impl Into<String>, value: SecretString) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    fn apply(&self, cmd: &mut Command) {
        for (name, value) in &self.vars {
            cmd.env(name, value.expose_secret());
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("vars", &self.vars.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One command to execute
#[derive(Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub credentials: Credentials,
    pub on_output: Option<OutputSink>,
    pub cancel: CancellationToken,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            credentials: Credentials::default(),
            on_output: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn on_output(mut self, sink: OutputSink) -> Self {
        self.on_output = Some(sink);
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// `program arg1 arg2`, for log lines
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// First argument, i.e. the tool subcommand
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    pub(crate) fn emit(&self, line: &str) {
        if let Some(sink) = &self.on_output {
            sink(line);
        }
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("working_dir", &self.working_dir)
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Process execution failure
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{program} exited with code {exit_code}")]
    Failed {
        program: String,
        exit_code: i32,
        output: String,
    },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} was cancelled")]
    Cancelled { program: String, output: String },
}

impl ProcessError {
    /// Output captured before the failure, empty for launch failures
    pub fn output(&self) -> &str {
        match self {
            ProcessError::Failed { output, .. } | ProcessError::Cancelled { output, .. } => output,
            ProcessError::Launch { .. } => "",
        }
    }

    pub fn is_launch_failure(&self) -> bool {
        matches!(self, ProcessError::Launch { .. })
    }
}

/// Runs external commands
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, returning the combined stdout/stderr on exit code 0
    async fn run(&self, invocation: Invocation) -> Result<String, ProcessError>;
}

/// Runs commands as real child processes
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, invocation: Invocation) -> Result<String, ProcessError> {
        let program = invocation.program.clone();

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }
        invocation.credentials.apply(&mut cmd);

        debug!(
            command = %invocation.display(),
            working_dir = ?invocation.working_dir,
            "spawning process"
        );

        let mut child = cmd.spawn().map_err(|source| ProcessError::Launch {
            program: program.clone(),
            source,
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut output = String::new();
        let collect = |line: String, output: &mut String| {
            invocation.emit(&line);
            output.push_str(&line);
            output.push('\n');
        };

        let status = loop {
            tokio::select! {
                Some(line) = rx.recv() => collect(line, &mut output),
                result = child.wait() => match result {
                    Ok(status) => break status,
                    Err(source) => return Err(ProcessError::Launch { program, source }),
                },
                _ = invocation.cancel.cancelled() => {
                    debug!(command = %invocation.display(), "cancellation requested, killing process");
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill {}: {}", program, e);
                    }
                    return Err(ProcessError::Cancelled { program, output });
                }
            }
        };

        let drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
            while let Some(line) = rx.recv().await {
                collect(line, &mut output);
            }
        })
        .await;
        if drained.is_err() {
            warn!("Output of {} still open after exit, truncating", program);
        }

        match status.code() {
            Some(0) => Ok(output),
            code => Err(ProcessError::Failed {
                program,
                exit_code: code.unwrap_or(-1),
                output,
            }),
        }
    }
}

/// Consecutive read errors tolerated before a pipe is given up on
const MAX_READ_ERRORS: u32 = 3;

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut errors = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                errors = 0;
                if tx.send(decode_line(&buf)).is_err() {
                    break;
                }
            }
            Err(e) => {
                errors += 1;
                if errors >= MAX_READ_ERRORS {
                    warn!("Stopped reading process output: {}", e);
                    break;
                }
                debug!("Error reading process output, retrying: {}", e);
            }
        }
    }
}

/// One raw output line without its terminator; invalid UTF-8 is replaced, not rejected
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
