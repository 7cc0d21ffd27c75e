// clustervault/src/backup/runner.rs
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::utils::find_pg_basebackup_executable;

/// Arguments and extra environment for one invocation of the backup utility.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub args: Vec<String>,
    /// Set on the child process only.
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }
}

#[cfg(test)]
impl CommandSpec {
    /// The value following `flag`, e.g. the directory after `-D`.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

#[derive(Debug)]
pub struct ProcessExit {
    pub status: ExitStatus,
    /// Whatever output was not consumed through the progress stream.
    pub output: String,
}

/// Status lines of a running process. Lines are split on both `\n` and `\r`
/// so carriage-return progress updates arrive one by one.
pub struct ProgressStream {
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    pending: VecDeque<String>,
}

impl ProgressStream {
    pub fn new(reader: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            pending: VecDeque::new(),
        }
    }

    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            let mut buf = Vec::new();
            if self.reader.read_until(b'\n', &mut buf).await? == 0 {
                return Ok(None);
            }
            let text = String::from_utf8_lossy(&buf);
            self.pending.extend(
                text.split(['\r', '\n'])
                    .map(str::trim_end)
                    .filter(|piece| !piece.is_empty())
                    .map(str::to_string),
            );
        }
    }
}

pub trait RunningProcess: Send {
    /// Hands out the status stream once; later calls return `None`.
    fn take_progress(&mut self) -> Option<ProgressStream>;

    fn wait(self) -> impl Future<Output = io::Result<ProcessExit>> + Send;
}

/// Starts the external streaming-backup utility.
pub trait ProcessRunner {
    type Process: RunningProcess;

    fn start(&self, spec: &CommandSpec) -> io::Result<Self::Process>;
}

/// Runs a real executable through `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemProcessRunner {
    program: PathBuf,
}

impl SystemProcessRunner {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// Uses `explicit` when given, otherwise looks up `pg_basebackup` in PATH.
    pub fn locate(explicit: Option<PathBuf>) -> anyhow::Result<Self> {
        let program = match explicit {
            Some(path) => path,
            None => find_pg_basebackup_executable()?,
        };
        Ok(Self::new(program))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl ProcessRunner for SystemProcessRunner {
    type Process = SystemProcess;

    fn start(&self, spec: &CommandSpec) -> io::Result<SystemProcess> {
        let child = Command::new(&self.program)
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        Ok(SystemProcess { child })
    }
}

pub struct SystemProcess {
    child: Child,
}

impl RunningProcess for SystemProcess {
    fn take_progress(&mut self) -> Option<ProgressStream> {
        self.child
            .stderr
            .take()
            .map(|stderr| ProgressStream::new(BufReader::new(stderr)))
    }

    fn wait(self) -> impl Future<Output = io::Result<ProcessExit>> + Send {
        async move {
            let output = self.child.wait_with_output().await?;
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok(ProcessExit {
                status: output.status,
                output: text,
            })
        }
    }
}
