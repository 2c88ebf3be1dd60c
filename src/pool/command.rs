//! Child-process protocol for process-mode execution.
//!
//! The parent writes one [`Unit`] as JSON to the child's stdin and reads one
//! [`UnitOutput`] as JSON from its stdout. A non-zero exit status is a unit
//! failure carrying the child's stderr. A child still running when its pool
//! run is cancelled is killed.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::executor::CancelToken;
use super::UnitWorker;
use crate::error::{Error, Result};
use crate::model::{Unit, UnitOutput};

/// Serializable description of a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    /// Executable to run
    pub program: PathBuf,

    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Run `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Re-invoke the running executable with `args`.
    pub fn current_exe<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self::new(std::env::current_exe()?).with_args(args))
    }

    /// Append one argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Process `unit` in a child process.
    pub fn invoke(&self, unit: &Unit) -> Result<UnitOutput> {
        self.run_child(unit, None)
    }

    /// Like [`invoke`](Self::invoke), but kill the child once `cancel` trips.
    pub(crate) fn invoke_until(&self, unit: &Unit, cancel: &CancelToken) -> Result<UnitOutput> {
        self.run_child(unit, Some(cancel))
    }

    fn run_child(&self, unit: &Unit, cancel: Option<&CancelToken>) -> Result<UnitOutput> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Unit {
                index: unit.index,
                message: format!("cannot start {}: {}", self.program.display(), e),
            })?;

        let payload = serde_json::to_vec(unit)?;
        let mut stdin = child.stdin.take().ok_or_else(|| Error::Unit {
            index: unit.index,
            message: "worker stdin unavailable".into(),
        })?;
        // Pipes are serviced from their own threads so a chatty child cannot
        // deadlock us.
        let writer = thread::spawn(move || stdin.write_all(&payload));
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_reader = thread::spawn(move || read_pipe(stdout));
        let err_reader = thread::spawn(move || read_pipe(stderr));

        let status = match cancel {
            None => child.wait()?,
            Some(cancel) => loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if cancel.is_cancelled() {
                    if let Err(e) = child.kill() {
                        log::debug!("Cannot kill worker for unit {}: {}", unit.index, e);
                    }
                    child.wait()?;
                    return Err(Error::Timeout(format!(
                        "worker for unit {} killed at the deadline",
                        unit.index
                    )));
                }
                thread::sleep(CHILD_POLL_INTERVAL);
            },
        };

        if let Ok(Err(e)) = writer.join() {
            log::debug!("Writing unit {} to worker failed: {}", unit.index, e);
        }
        let stdout = out_reader.join().unwrap_or_default();
        let stderr = err_reader.join().unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(Error::Unit {
                index: unit.index,
                message: format!("worker exited with {}: {}", status, stderr.trim()),
            });
        }

        serde_json::from_slice(&stdout).map_err(|e| {
            Error::MalformedInput(format!("worker output for unit {}: {}", unit.index, e))
        })
    }
}

/// How often a cancellable child is checked for exit.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

fn read_pipe<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf) {
            log::debug!("Reading worker output failed: {}", e);
        }
    }
    buf
}

/// A [`UnitWorker`] that delegates every unit to a child process.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    spec: CommandSpec,
}

impl CommandWorker {
    /// Wrap a command.
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

impl UnitWorker for CommandWorker {
    fn process(&self, unit: &Unit) -> Result<UnitOutput> {
        self.spec.invoke(unit)
    }

    fn command(&self) -> Option<CommandSpec> {
        Some(self.spec.clone())
    }
}

/// Child side of the protocol: read a unit from stdin, write the output to stdout.
pub fn serve_stdio(worker: &dyn UnitWorker) -> Result<()> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let unit: Unit = serde_json::from_str(&input)?;

    let output = worker.process(&unit)?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer(&mut handle, &output)?;
    handle.flush()?;
    Ok(())
}
