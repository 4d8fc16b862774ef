//! Processing via an installed external executable.
//!
//! The processor materializes the acquired image to a temporary file, runs
//! the tool with `{input}`/`{output}` substituted into its argument
//! template, and polls the child while beating the keep-alive hook, killing
//! it when the configured timeout elapses.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use chain_kit_common::{BlockIdentity, OptionValue};

use crate::block::{ProcessContext, ProcessOutput, Processor};
use crate::error::ProcessingError;
use crate::options::{Constraint, DefaultSource, OptionDecl, OptionKind};

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

/// A block whose process stage is an installed command-line tool
#[derive(Debug)]
pub struct ExternalTool {
    name: String,
    bin: PathBuf,
    args: Vec<String>,
    poll_interval: Duration,
}

impl ExternalTool {
    /// Resolve `program` on `PATH`.
    ///
    /// The argument template must reference `{output}`; `{input}` is
    /// optional for tools that generate rather than transform.
    pub fn new(program: &str, args: Vec<String>) -> Result<Self, ProcessingError> {
        let bin = find_executable(program)
            .ok_or_else(|| ProcessingError::MissingBinary(program.to_string()))?;
        Self::with_path(program, bin, args)
    }

    /// Use an explicit executable path instead of searching `PATH`
    pub fn with_path(
        name: &str,
        bin: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Result<Self, ProcessingError> {
        let bin = bin.into();
        if !bin.is_file() {
            return Err(ProcessingError::MissingBinary(bin.display().to_string()));
        }
        if !args.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER)) {
            return Err(ProcessingError::Algorithm(format!(
                "argument template must reference {OUTPUT_PLACEHOLDER}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            bin,
            args,
            poll_interval: Duration::from_millis(200),
        })
    }

    /// How often the child is polled (and the keep-alive hook beaten)
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn render_args(&self, input: &str, output: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace(INPUT_PLACEHOLDER, input).replace(OUTPUT_PLACEHOLDER, output))
            .collect()
    }
}

fn find_executable(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

impl Processor for ExternalTool {
    fn identity(&self) -> BlockIdentity {
        BlockIdentity::new(self.name.clone(), "external")
    }

    fn declared_options(&self) -> Vec<OptionDecl> {
        vec![
            OptionDecl::new("timeout_secs", OptionKind::Int, "kill the tool after this long")
                .with_constraint(Constraint::Range { min: 1.0, max: 86_400.0 })
                .with_default(DefaultSource::Static(OptionValue::Int(600))),
        ]
    }

    fn process(
        &self,
        ctx: ProcessContext<'_>,
    ) -> Result<ProcessOutput, ProcessingError> {
        let limit_secs = ctx.options.require_int("timeout_secs")? as u64;

        let input_file = tempfile::Builder::new()
            .prefix(&format!("{}-in-", self.name))
            .suffix(".png")
            .tempfile()?;
        let output_file = tempfile::Builder::new()
            .prefix(&format!("{}-out-", self.name))
            .suffix(".png")
            .tempfile()?;
        ctx.image.pixels.save(input_file.path())?;

        let input_path = input_file.path().display().to_string();
        let output_path = output_file.path().display().to_string();
        let args = self.render_args(&input_path, &output_path);
        ctx.log.append(format!("$ {} {}", self.bin.display(), args.join(" ")));

        let stderr_file = tempfile::Builder::new()
            .prefix(&format!("{}-err-", self.name))
            .tempfile()?;
        let mut child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr_file.reopen()?)
            .spawn()?;

        let deadline = Instant::now() + Duration::from_secs(limit_secs);
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                child.kill()?;
                child.wait()?;
                return Err(ProcessingError::Timeout { limit_secs });
            }
            ctx.keepalive.beat();
            std::thread::sleep(self.poll_interval);
        };

        let stderr = std::fs::read_to_string(stderr_file.path()).unwrap_or_default();
        if !stderr.trim().is_empty() {
            ctx.log.append(format!("stderr: {}", stderr.trim()));
        }

        if !status.success() {
            return Err(ProcessingError::BadExit {
                command: self.name.clone(),
                status: status.code().unwrap_or(-1),
            });
        }

        let pixels = image::open(output_file.path())?;
        Ok(ProcessOutput::Image {
            pixels,
            metadata: ctx.image.metadata.derived(&self.name),
        })
    }
}
