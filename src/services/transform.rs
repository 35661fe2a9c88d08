//! Image render/compress capabilities backed by external programs.
//!
//! Both programs read their input on stdin and write the result to stdout.
//! The renderer is invoked as `<program> <args..> <size-class>` with the
//! upstream payload as JSON; exit code 3 signals a partial render, with one
//! missing piece named per stderr line.

use crate::{
    errors::TransformError,
    models::object_key::SizeClass,
    services::capabilities::{Compressor, RenderStatus, Rendered, Renderer, UpstreamPayload},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::process::{Output, Stdio};
use tokio::{io::AsyncWriteExt, process::Command};

pub const PARTIAL_RENDER_EXIT_CODE: i32 = 3;

#[derive(Clone, Debug)]
struct ExternalCommand {
    program: String,
    args: Vec<String>,
}

impl ExternalCommand {
    fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Run with `input` on stdin, returning the raw process output.
    async fn run(&self, extra_args: &[String], input: &[u8]) -> Result<Output, TransformError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransformError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            TransformError::Io(std::io::Error::other("child stdin was not captured"))
        })?;
        let feed = async move {
            let result = stdin.write_all(input).await;
            drop(stdin);
            result
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        // A program may legitimately stop reading early; only report the
        // write failure if it also failed.
        if let Err(err) = fed {
            if !output.status.success() {
                return Err(TransformError::Io(err));
            }
        }
        Ok(output)
    }

    fn failure(&self, output: &Output) -> TransformError {
        TransformError::Failed {
            program: self.program.clone(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    fn non_empty_stdout(&self, output: Output) -> Result<Bytes, TransformError> {
        if output.stdout.is_empty() {
            return Err(TransformError::EmptyOutput {
                program: self.program.clone(),
            });
        }
        Ok(Bytes::from(output.stdout))
    }
}

#[derive(Clone, Debug)]
pub struct CommandRenderer {
    command: ExternalCommand,
}

impl CommandRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: ExternalCommand {
                program: program.into(),
                args,
            },
        }
    }

    /// Split a whitespace-separated command line. `None` if it is blank.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        ExternalCommand::parse(command_line).map(|command| Self { command })
    }
}

#[async_trait]
impl Renderer for CommandRenderer {
    async fn render(
        &self,
        payload: &UpstreamPayload,
        size: SizeClass,
    ) -> Result<Rendered, TransformError> {
        let input = serde_json::to_vec(&payload.0)
            .map_err(|err| TransformError::Io(std::io::Error::other(err)))?;
        let output = self.command.run(&[size.to_string()], &input).await?;

        match output.status.code() {
            Some(0) => Ok(Rendered {
                bytes: self.command.non_empty_stdout(output)?,
                status: RenderStatus::Complete,
            }),
            Some(PARTIAL_RENDER_EXIT_CODE) => {
                let missing = String::from_utf8_lossy(&output.stderr)
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect();
                Ok(Rendered {
                    bytes: Bytes::from(output.stdout),
                    status: RenderStatus::PartialFailure { missing },
                })
            }
            _ => Err(self.command.failure(&output)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CommandCompressor {
    command: ExternalCommand,
}

impl CommandCompressor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: ExternalCommand {
                program: program.into(),
                args,
            },
        }
    }

    pub fn from_command_line(command_line: &str) -> Option<Self> {
        ExternalCommand::parse(command_line).map(|command| Self { command })
    }
}

#[async_trait]
impl Compressor for CommandCompressor {
    async fn compress(&self, bytes: Bytes) -> Result<Bytes, TransformError> {
        let output = self.command.run(&[], &bytes).await?;
        if !output.status.success() {
            return Err(self.command.failure(&output));
        }
        self.command.non_empty_stdout(output)
    }
}
