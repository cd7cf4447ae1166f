//! The transfer pipeline: serialize → encrypt → meter into a local artifact.
//!
//! [`TransferPipeline::prepare`] checks every precondition, creates the target
//! file exclusively and spawns the stages, then returns at once. Draining the
//! [`PreparedTransfer`]'s progress stream yields one meter line per item and,
//! once the meter is done, waits for every stage. A non-zero exit anywhere is
//! reported as a final [`TransferError::PipelineFailure`] item; the partially
//! written artifact is left in place and must not be used.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use snaparc_core::{name, ArchivalUnit, ArchiveEvent, EventSink};
use tokio::process::ChildStderr;
use tokio_util::codec::FramedRead;

use crate::error::{StageFailure, TransferError, TransferResult};
use crate::progress::ProgressDecoder;
use crate::rate::RateLimit;
use crate::stage::{Stage, StageChainBuilder, StageRole, StageSpec};
use crate::tools::{locate_tool, ToolPaths};

/// Stream of progress lines; a final `Err` reports a failed pipeline.
pub type ProgressStream = BoxStream<'static, TransferResult<String>>;

/// Whether to pass the stream through the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metering {
    /// Meter when the tool is installed.
    #[default]
    Auto,
    /// Always meter; a missing tool is a precondition failure.
    Required,
    /// Never meter.
    Off,
}

/// Per-run pipeline options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOptions {
    /// Encrypt for this recipient when set.
    pub encrypt_recipient: Option<String>,
    /// Metering policy.
    pub metering: Metering,
    /// Transfer rate cap, in the meter's size syntax.
    pub rate_limit: Option<String>,
}

/// Builds and runs stage chains.
pub struct TransferPipeline {
    tools: ToolPaths,
    options: TransferOptions,
    sink: Arc<dyn EventSink>,
}

struct ResolvedTools {
    serializer: PathBuf,
    encryptor: Option<(PathBuf, String)>,
    meter: Option<PathBuf>,
    rate: Option<RateLimit>,
}

fn precondition(reason: impl Into<String>) -> TransferError {
    TransferError::Precondition {
        reason: reason.into(),
    }
}

fn require_tool(tool: &Path, purpose: &str) -> TransferResult<PathBuf> {
    locate_tool(tool).ok_or_else(|| {
        precondition(format!(
            "{} must be installed for {}",
            tool.display(),
            purpose
        ))
    })
}

impl TransferPipeline {
    /// Creates a pipeline with the given tools and options.
    pub fn new(tools: ToolPaths, options: TransferOptions, sink: Arc<dyn EventSink>) -> Self {
        Self {
            tools,
            options,
            sink,
        }
    }

    fn resolve_tools(&self) -> TransferResult<ResolvedTools> {
        let serializer = require_tool(&self.tools.serializer, "serialization")?;

        let encryptor = match &self.options.encrypt_recipient {
            Some(recipient) => Some((
                require_tool(&self.tools.encryptor, "encryption")?,
                recipient.clone(),
            )),
            None => None,
        };

        let meter = match self.options.metering {
            Metering::Off => None,
            Metering::Auto => locate_tool(&self.tools.meter),
            Metering::Required => Some(require_tool(&self.tools.meter, "metering")?),
        };

        let rate = match &self.options.rate_limit {
            Some(raw) => Some(raw.parse::<RateLimit>()?),
            None => None,
        };
        if rate.is_some() && meter.is_none() {
            return Err(precondition(format!(
                "rate limiting needs the meter ({})",
                self.tools.meter.display()
            )));
        }

        Ok(ResolvedTools {
            serializer,
            encryptor,
            meter,
            rate,
        })
    }

    /// Starts producing `unit` into `destination_dir`.
    ///
    /// Fails without spawning anything if the directory is missing, a tool
    /// cannot be found, the rate limit is invalid or the target file exists.
    /// If a stage cannot be started, the target file is removed again.
    pub async fn prepare(
        &self,
        unit: &ArchivalUnit,
        destination_dir: &Path,
    ) -> TransferResult<PreparedTransfer> {
        if !destination_dir.is_dir() {
            return Err(precondition(format!(
                "{} does not exist",
                destination_dir.display()
            )));
        }
        let tools = self.resolve_tools()?;

        let target = destination_dir.join(name(unit)?);
        if target.exists() {
            return Err(precondition(format!("{} already exists", target.display())));
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    precondition(format!("{} already exists", target.display()))
                }
                _ => TransferError::Io(e),
            })?;

        let mut builder = StageChainBuilder::new(tools.serializer, unit);
        if let Some((encryptor, recipient)) = tools.encryptor {
            builder = builder.with_encryption(encryptor, &recipient);
        }
        if let Some(meter) = tools.meter {
            builder = builder.with_metering(meter, tools.rate);
        }
        let specs = builder.build();

        self.sink.emit(ArchiveEvent::TransferPrepared {
            artifact: target.clone(),
            stages: specs.len(),
        });
        let (stages, meter_output) = match self.spawn_chain(&specs, file) {
            Ok(chain) => chain,
            Err(e) => {
                // Started stages are killed on drop.
                let _ = std::fs::remove_file(&target);
                return Err(e);
            }
        };

        let driver = Driver {
            lines: meter_output.map(|stderr| FramedRead::new(stderr, ProgressDecoder::new())),
            stages,
            sink: Arc::clone(&self.sink),
            finished: false,
        };
        Ok(PreparedTransfer {
            target,
            progress: driver.into_stream(),
        })
    }

    fn spawn_chain(
        &self,
        specs: &[StageSpec],
        file: std::fs::File,
    ) -> TransferResult<(Vec<Stage>, Option<ChildStderr>)> {
        let last = specs.len().saturating_sub(1);
        let mut file = Some(file);
        let mut upstream: Option<Stdio> = None;
        let mut stages = Vec::with_capacity(specs.len());
        let mut meter_output = None;

        for (i, spec) in specs.iter().enumerate() {
            let stdin = upstream.take().unwrap_or_else(Stdio::null);
            let stdout = if i == last {
                file.take().map(Stdio::from).unwrap_or_else(Stdio::null)
            } else {
                Stdio::piped()
            };

            let mut stage = spec.spawn(stdin, stdout, Stdio::piped())?;
            self.sink.emit(ArchiveEvent::StageSpawned {
                stage: spec.role.as_str(),
                program: spec.program.clone(),
            });

            if i != last {
                let out = stage.child_mut().stdout.take().ok_or_else(|| {
                    TransferError::Io(std::io::Error::new(
                        ErrorKind::BrokenPipe,
                        format!("{} has no stdout", spec.role.as_str()),
                    ))
                })?;
                upstream = Some(out.try_into()?);
            }

            if spec.role == StageRole::Meter {
                meter_output = stage.child_mut().stderr.take();
            } else {
                stage.capture_stderr();
            }
            stages.push(stage);
        }

        Ok((stages, meter_output))
    }
}

/// A pipeline that has been started.
pub struct PreparedTransfer {
    target: PathBuf,
    progress: ProgressStream,
}

impl PreparedTransfer {
    /// Path of the artifact being written.
    pub fn target_path(&self) -> &Path {
        &self.target
    }

    /// The progress stream; it must be drained before the artifact is used.
    pub fn into_progress(self) -> ProgressStream {
        self.progress
    }

    /// Drives the pipeline to completion, discarding progress lines.
    pub async fn complete(self) -> TransferResult<PathBuf> {
        let PreparedTransfer { target, mut progress } = self;
        while let Some(item) = progress.next().await {
            item?;
        }
        Ok(target)
    }
}

struct Driver {
    lines: Option<FramedRead<ChildStderr, ProgressDecoder>>,
    stages: Vec<Stage>,
    sink: Arc<dyn EventSink>,
    finished: bool,
}

impl Driver {
    fn into_stream(self) -> ProgressStream {
        stream::unfold(self, |mut driver| async move {
            if driver.finished {
                return None;
            }
            if let Some(lines) = driver.lines.as_mut() {
                match lines.next().await {
                    Some(Ok(line)) => {
                        driver.sink.emit(ArchiveEvent::ProgressLine { line: line.clone() });
                        return Some((Ok(line), driver));
                    }
                    Some(Err(e)) => driver.sink.emit(ArchiveEvent::MeterUnreadable {
                        error: e.to_string(),
                    }),
                    None => {}
                }
                driver.lines = None;
            }
            driver.finished = true;
            match driver.wait_all().await {
                Ok(()) => None,
                Err(e) => Some((Err(e), driver)),
            }
        })
        .boxed()
    }

    async fn wait_all(&mut self) -> TransferResult<()> {
        let mut failures = Vec::new();
        for stage in &mut self.stages {
            let status = stage.wait().await?;
            let role = stage.role().as_str();
            self.sink.emit(ArchiveEvent::StageExited {
                stage: role,
                code: status.code(),
            });
            if !status.success() {
                failures.push(StageFailure {
                    stage: role,
                    code: status.code(),
                    stderr: stage.stderr_tail().await,
                });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TransferError::PipelineFailure { failures })
        }
    }
}
