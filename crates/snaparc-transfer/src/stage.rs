//! Pipeline stages: external byte-transform processes.
//!
//! A [`StageSpec`] names the program and arguments of one stage;
//! [`StageChainBuilder`] produces the ordered specs for a unit (serializer,
//! then optionally encryptor, then optionally meter). Spawning a spec yields a
//! running [`Stage`] whose exit status can be awaited.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use snaparc_core::ArchivalUnit;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use crate::rate::RateLimit;

/// Bytes of stderr kept per stage for error reports.
const STDERR_TAIL: usize = 4096;

/// Role of a stage within the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    /// Writes the snapshot or delta stream.
    Serializer,
    /// Encrypts the stream for a recipient.
    Encryptor,
    /// Reports progress and caps the rate.
    Meter,
}

impl StageRole {
    /// Short name used in events and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageRole::Serializer => "serializer",
            StageRole::Encryptor => "encryptor",
            StageRole::Meter => "meter",
        }
    }
}

/// Program and arguments of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    /// Role of the stage.
    pub role: StageRole,
    /// Resolved program path.
    pub program: PathBuf,
    /// Arguments, program name excluded.
    pub args: Vec<OsString>,
}

impl StageSpec {
    /// `<program> send <snapshot>` or `<program> send -p <parent> <snapshot>`.
    pub fn serializer(program: PathBuf, unit: &ArchivalUnit) -> Self {
        let mut args: Vec<OsString> = vec!["send".into()];
        match unit {
            ArchivalUnit::Full(snapshot) => {
                args.push(snapshot.abs_path.clone().into_os_string());
            }
            ArchivalUnit::Incremental { parent, snapshot } => {
                args.push("-p".into());
                args.push(parent.abs_path.clone().into_os_string());
                args.push(snapshot.abs_path.clone().into_os_string());
            }
        }
        Self {
            role: StageRole::Serializer,
            program,
            args,
        }
    }

    /// `<program> -r <recipient>`.
    pub fn encryptor(program: PathBuf, recipient: &str) -> Self {
        Self {
            role: StageRole::Encryptor,
            program,
            args: vec!["-r".into(), recipient.into()],
        }
    }

    /// `<program> -i 1 -f [-L <rate>]`: one report per second, forced even
    /// when stderr is not a terminal.
    pub fn meter(program: PathBuf, rate: Option<RateLimit>) -> Self {
        let mut args: Vec<OsString> = vec!["-i".into(), "1".into(), "-f".into()];
        if let Some(rate) = rate {
            args.push("-L".into());
            args.push(rate.to_string().into());
        }
        Self {
            role: StageRole::Meter,
            program,
            args,
        }
    }

    /// Starts the process with the given standard streams.
    ///
    /// The process is killed if the returned [`Stage`] is dropped before it
    /// exits.
    pub fn spawn(&self, stdin: Stdio, stdout: Stdio, stderr: Stdio) -> io::Result<Stage> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()?;
        Ok(Stage {
            role: self.role,
            child,
            stderr_tail: None,
        })
    }
}

/// Builds the ordered stage specs for one unit.
#[derive(Debug, Clone)]
pub struct StageChainBuilder {
    serializer: StageSpec,
    encryptor: Option<StageSpec>,
    meter: Option<StageSpec>,
}

impl StageChainBuilder {
    /// Starts a chain with the serializer for `unit`.
    pub fn new(serializer: PathBuf, unit: &ArchivalUnit) -> Self {
        Self {
            serializer: StageSpec::serializer(serializer, unit),
            encryptor: None,
            meter: None,
        }
    }

    /// Adds an encryption stage after the serializer.
    pub fn with_encryption(mut self, encryptor: PathBuf, recipient: &str) -> Self {
        self.encryptor = Some(StageSpec::encryptor(encryptor, recipient));
        self
    }

    /// Adds a metering stage at the end of the chain.
    pub fn with_metering(mut self, meter: PathBuf, rate: Option<RateLimit>) -> Self {
        self.meter = Some(StageSpec::meter(meter, rate));
        self
    }

    /// Specs in pipeline order.
    pub fn build(self) -> Vec<StageSpec> {
        let mut specs = vec![self.serializer];
        specs.extend(self.encryptor);
        specs.extend(self.meter);
        specs
    }
}

/// A running stage.
#[derive(Debug)]
pub struct Stage {
    role: StageRole,
    child: Child,
    stderr_tail: Option<JoinHandle<String>>,
}

impl Stage {
    /// Role of the stage.
    pub fn role(&self) -> StageRole {
        self.role
    }

    /// Mutable access to the underlying process, for taking its pipes.
    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Drains the stage's stderr in the background, keeping the last bytes.
    pub fn capture_stderr(&mut self) {
        if let Some(stderr) = self.child.stderr.take() {
            self.stderr_tail = Some(tokio::spawn(read_tail(stderr)));
        }
    }

    /// Waits for the process to exit.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// The captured stderr tail, once the process has exited.
    pub async fn stderr_tail(&mut self) -> String {
        match self.stderr_tail.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        }
    }
}

async fn read_tail(mut stderr: ChildStderr) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL {
                    let excess = tail.len() - STDERR_TAIL;
                    tail.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}
