//! The objective function: one trial from constraint check to restored artifact.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument};

use crate::core::constraints::{Constraint, Feasibility, Units, check_feasibility};
use crate::core::space::{Assignment, SearchSpace};
use crate::io::artifact::{ArtifactLease, ConfigArtifact};
use crate::io::config::TunerConfig;
use crate::io::harness::{BenchmarkRequest, BuildRequest, Harness};
use crate::io::trial_log::TrialPaths;

/// Per-trial settings resolved against the project root.
#[derive(Debug, Clone)]
pub struct EvalSettings {
    pub root: PathBuf,
    pub build_output: PathBuf,
    pub build_timeout: Duration,
    pub benchmark_iterations: u32,
    pub benchmark_timeout: Duration,
    pub output_limit_bytes: usize,
    pub logs_dir: PathBuf,
}

impl EvalSettings {
    pub fn from_config(root: &Path, cfg: &TunerConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            build_output: root.join(&cfg.build.output),
            build_timeout: Duration::from_secs(cfg.build.timeout_secs),
            benchmark_iterations: cfg.benchmark.iterations,
            benchmark_timeout: Duration::from_secs(cfg.benchmark.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
            logs_dir: root.join(&cfg.logs_dir),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Rejected by a constraint; nothing was built.
    Pruned { reason: String },
    /// `built == false` means the build failed and `reward` is zero.
    Completed { reward: f64, built: bool },
}

pub struct TrialEvaluator<'a, H: Harness> {
    pub space: &'a SearchSpace,
    pub constraints: &'a [Constraint],
    pub units: &'a Units,
    pub harness: &'a H,
    pub settings: &'a EvalSettings,
}

impl<H: Harness> TrialEvaluator<'_, H> {
    /// Evaluate `assignment` as trial `number` of `study`.
    ///
    /// The artifact is byte-identical to its pre-call content when this returns, on
    /// every path. `Err` means the trial could not be evaluated at all (bad assignment,
    /// missing anchor, I/O failure).
    #[instrument(skip_all, fields(study = %study, number = number))]
    pub fn evaluate(
        &self,
        artifact: &mut ConfigArtifact,
        study: &str,
        number: u32,
        assignment: &Assignment,
    ) -> Result<Evaluation> {
        self.space.check_assignment(assignment)?;
        if let Feasibility::Infeasible { reason } =
            check_feasibility(self.constraints, self.space, self.units, assignment)?
        {
            info!(%reason, "pruned");
            return Ok(Evaluation::Pruned { reason });
        }

        let paths = TrialPaths::new(&self.settings.logs_dir, study, number);
        let lease = artifact.backup()?;
        let outcome = self.run_mutated(&lease, &paths, assignment);
        let restored = lease.restore().context("restore artifact");
        match (outcome, restored) {
            (Ok(evaluation), Ok(())) => Ok(evaluation),
            (Err(err), Ok(())) | (Ok(_), Err(err)) => Err(err),
            (Err(err), Err(restore_err)) => {
                error!(err = %format!("{restore_err:#}"), "restore failed after trial error");
                Err(err)
            }
        }
    }

    fn run_mutated(
        &self,
        lease: &ArtifactLease<'_>,
        paths: &TrialPaths,
        assignment: &Assignment,
    ) -> Result<Evaluation> {
        lease.apply(self.space, assignment)?;

        let settings = self.settings;
        let built = self.harness.build(&BuildRequest {
            workdir: settings.root.clone(),
            output: settings.build_output.clone(),
            log_path: paths.build_log.clone(),
            timeout: settings.build_timeout,
            output_limit_bytes: settings.output_limit_bytes,
        })?;
        if !built {
            return Ok(Evaluation::Completed {
                reward: 0.0,
                built: false,
            });
        }

        let reward = self.harness.benchmark(&BenchmarkRequest {
            workdir: settings.root.clone(),
            binary: settings.build_output.clone(),
            iterations: settings.benchmark_iterations,
            log_path: paths.benchmark_log.clone(),
            timeout: settings.benchmark_timeout,
            output_limit_bytes: settings.output_limit_bytes,
        })?;
        debug!(reward, "benchmark finished");
        Ok(Evaluation::Completed {
            reward,
            built: true,
        })
    }
}
