//! Build & benchmark harness around the external toolchain.
//!
//! Both steps shell out, capture output into per-trial log files, and collapse every
//! failure mode they model (spawn error, timeout, non-zero exit, missing report row)
//! into a failed build or a zero throughput. `Err` is reserved for problems the trial
//! cannot recover from, such as an unwritable log directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::throughput::{compile_report_pattern, extract_throughput};
use crate::io::config::TunerConfig;
use crate::io::process::{CommandOutput, command_from_template, run_command_with_timeout};

#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Project root; the build runs here.
    pub workdir: PathBuf,
    /// Absolute path the build must produce.
    pub output: PathBuf,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct BenchmarkRequest {
    pub workdir: PathBuf,
    pub binary: PathBuf,
    pub iterations: u32,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

pub trait Harness {
    /// Build the mutated program. `false` means the trial scores zero.
    fn build(&self, request: &BuildRequest) -> Result<bool>;

    /// Measure the built binary. Unmeasurable runs report `0.0`.
    fn benchmark(&self, request: &BenchmarkRequest) -> Result<f64>;
}

/// Runs configured argv templates as subprocesses.
#[derive(Debug, Clone)]
pub struct CommandHarness {
    build_command: Vec<String>,
    benchmark_command: Vec<String>,
    report_pattern: Regex,
}

impl CommandHarness {
    pub fn new(
        build_command: Vec<String>,
        benchmark_command: Vec<String>,
        report_pattern: &str,
    ) -> Result<Self> {
        Ok(Self {
            build_command,
            benchmark_command,
            report_pattern: compile_report_pattern(report_pattern)?,
        })
    }

    pub fn from_config(cfg: &TunerConfig) -> Result<Self> {
        Self::new(
            cfg.build.command.clone(),
            cfg.benchmark.command.clone(),
            &cfg.benchmark.report_pattern,
        )
    }
}

impl Harness for CommandHarness {
    #[instrument(skip_all, fields(output = %request.output.display()))]
    fn build(&self, request: &BuildRequest) -> Result<bool> {
        // A stale binary must never be benchmarked as if this build produced it.
        match fs::remove_file(&request.output) {
            Ok(()) => debug!("removed stale build output"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("remove stale output {}", request.output.display()));
            }
        }

        let vars = [("output", request.output.display().to_string())];
        let cmd = command_from_template(&self.build_command, &vars, &request.workdir)?;
        let result = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes);
        write_command_log(
            &request.log_path,
            &self.build_command,
            &result,
            request.output_limit_bytes,
        )?;

        let ok = match &result {
            Ok(out) if out.succeeded() => true,
            Ok(out) if out.timed_out => {
                warn!(timeout_secs = request.timeout.as_secs(), "build timed out");
                false
            }
            Ok(out) => {
                info!(code = ?out.status.code(), "build failed");
                false
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "build command could not run");
                false
            }
        };
        Ok(ok)
    }

    #[instrument(skip_all, fields(binary = %request.binary.display(), iterations = request.iterations))]
    fn benchmark(&self, request: &BenchmarkRequest) -> Result<f64> {
        let vars = [
            ("binary", request.binary.display().to_string()),
            ("iterations", request.iterations.to_string()),
        ];
        let cmd = command_from_template(&self.benchmark_command, &vars, &request.workdir)?;
        let result = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes);
        write_command_log(
            &request.log_path,
            &self.benchmark_command,
            &result,
            request.output_limit_bytes,
        )?;

        let out = match result {
            Ok(out) => out,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "benchmark command could not run");
                return Ok(0.0);
            }
        };
        if !out.succeeded() {
            info!(code = ?out.status.code(), timed_out = out.timed_out, "benchmark failed");
            return Ok(0.0);
        }
        match extract_throughput(&self.report_pattern, &out.combined()) {
            Some(rate) => Ok(rate),
            None => {
                warn!(log = %request.log_path.display(), "benchmark report row not found");
                Ok(0.0)
            }
        }
    }
}

/// Write a command transcript in the `=== stdout === / === stderr ===` layout.
fn write_command_log(
    path: &Path,
    argv: &[String],
    result: &Result<CommandOutput>,
    output_limit: usize,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let mut buf = format!("$ {}\n", argv.join(" "));
    match result {
        Ok(out) => {
            if out.timed_out {
                buf.push_str("status: timed out\n");
            } else {
                buf.push_str(&format!("status: {}\n", out.status));
            }
            buf.push_str("=== stdout ===\n");
            buf.push_str(&String::from_utf8_lossy(&out.stdout));
            if out.stdout_truncated > 0 {
                buf.push_str(&format!("\n[stdout truncated {} bytes]", out.stdout_truncated));
            }
            buf.push_str("\n=== stderr ===\n");
            buf.push_str(&String::from_utf8_lossy(&out.stderr));
            if out.stderr_truncated > 0 {
                buf.push_str(&format!("\n[stderr truncated {} bytes]", out.stderr_truncated));
            }
        }
        Err(err) => buf.push_str(&format!("status: not started ({err:#})\n")),
    }

    if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = buf.len() - cut;
        buf.truncate(cut);
        buf.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }
    fs::write(path, buf).with_context(|| format!("write log {}", path.display()))
}
