//! Optimization driver for `tuner run`.
//!
//! Reattaches to (or creates) the persisted study, evaluates queued warm starts and then
//! sampler suggestions until the trial budget is spent or Ctrl-C is seen between trials.

use std::collections::VecDeque;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::core::space::Assignment;
use crate::core::study::{Direction, Study, Trial, TrialState};
use crate::evaluate::{Evaluation, TrialEvaluator};
use crate::io::artifact::ConfigArtifact;
use crate::io::harness::Harness;
use crate::io::interrupt::InterruptFlag;
use crate::io::journal::JournalStorage;
use crate::io::trial_log::{TrialPaths, write_trial_meta};
use crate::sampler::Sampler;

/// What to run.
#[derive(Debug, Clone)]
pub struct StudyPlan<'a> {
    pub study_name: &'a str,
    /// New trials to evaluate in this invocation.
    pub trials: u32,
    /// Assignments evaluated before the sampler is asked, skipping any the study has
    /// already evaluated.
    pub warm_start: &'a [Assignment],
}

/// Reason why `run_study` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    BudgetExhausted,
    Interrupted,
}

/// Summary of a driver invocation.
#[derive(Debug, Clone)]
pub struct DriverOutcome {
    pub study: Study,
    /// Trials already in storage when the run started.
    pub resumed_trials: usize,
    pub trials_run: u32,
    pub stop: StopReason,
    /// A leftover backup was restored before the first trial.
    pub reconciled: bool,
}

/// Run the study to completion or interruption.
///
/// Every finalized trial is persisted before the next one starts. An evaluation error
/// (missing anchor, I/O failure) is recorded as a Failed trial and then returned, ending
/// the run.
#[instrument(skip_all, fields(study = plan.study_name, trials = plan.trials))]
pub fn run_study<H: Harness, F: FnMut(&Trial)>(
    plan: &StudyPlan<'_>,
    evaluator: &TrialEvaluator<'_, H>,
    artifact: &mut ConfigArtifact,
    storage: &JournalStorage,
    sampler: &mut dyn Sampler,
    interrupt: &InterruptFlag,
    mut on_trial: F,
) -> Result<DriverOutcome> {
    let reconciled = artifact.reconcile()?;
    let pristine = artifact.fingerprint()?;

    let mut study = match storage.load(plan.study_name)? {
        Some(stored) => {
            if stored
                .artifact_sha256
                .as_deref()
                .is_some_and(|recorded| recorded != pristine)
            {
                warn!(
                    study = plan.study_name,
                    "artifact changed since the study was created; earlier rewards may not be comparable"
                );
            }
            info!(trials = stored.study.len(), "resuming study");
            stored.study
        }
        None => {
            info!("creating study");
            storage
                .create_study(plan.study_name, Direction::Maximize, Some(&pristine))?
                .study
        }
    };
    let resumed_trials = study.len();

    let mut queue = VecDeque::with_capacity(plan.warm_start.len());
    for (idx, assignment) in plan.warm_start.iter().enumerate() {
        let assignment = evaluator
            .space
            .canonicalize(assignment)
            .with_context(|| format!("warm_start[{idx}]"))?;
        if !study.has_evaluated(&assignment) {
            queue.push_back(assignment);
        }
    }
    if !queue.is_empty() {
        info!(count = queue.len(), "queued warm-start assignments");
    }

    let mut trials_run = 0u32;
    let mut stop = StopReason::BudgetExhausted;
    while trials_run < plan.trials {
        if interrupt.is_set() {
            stop = StopReason::Interrupted;
            break;
        }

        let number = study.next_number();
        let assignment = match queue.pop_front() {
            Some(assignment) => assignment,
            None => sampler.suggest(evaluator.space, study.trials())?,
        };

        let started_at = Utc::now().to_rfc3339();
        let start = Instant::now();
        let result = evaluator.evaluate(artifact, plan.study_name, number, &assignment);
        let duration_ms = start.elapsed().as_millis() as u64;

        let (mut trial, fatal) = match result {
            Ok(Evaluation::Pruned { reason }) => (Trial::pruned(number, assignment, reason), None),
            // Build and benchmark run in their own process group, so a Ctrl-C during the
            // trial did not reach them and the measurement stands.
            Ok(Evaluation::Completed { reward, .. }) => {
                (Trial::completed(number, assignment, reward), None)
            }
            Err(err) => (
                Trial::failed(number, assignment, format!("{err:#}")),
                Some(err),
            ),
        };
        trial.started_at = Some(started_at);
        trial.duration_ms = Some(duration_ms);

        storage.append_trial(plan.study_name, &trial)?;
        if trial.state != TrialState::Pruned {
            let paths = TrialPaths::new(&evaluator.settings.logs_dir, plan.study_name, number);
            write_trial_meta(&paths, &trial)?;
        }
        study.push(trial.clone())?;
        sampler.record(&trial);
        on_trial(&trial);
        trials_run += 1;

        if let Some(err) = fatal {
            return Err(err);
        }
        if artifact.fingerprint()? != pristine {
            bail!(
                "artifact {} differs from its pristine content after trial {number}",
                artifact.path().display()
            );
        }
    }

    if artifact.reconcile()? {
        warn!("backup still present after the last trial; artifact restored");
    }
    info!(trials_run, ?stop, "study finished");
    Ok(DriverOutcome {
        study,
        resumed_trials,
        trials_run,
        stop,
        reconciled,
    })
}
