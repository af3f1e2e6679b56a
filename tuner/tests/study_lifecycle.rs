//! Study-level tests driving `run_study` with the real samplers and journal.
//!
//! The harness here scores each trial from the artifact as rewritten on disk, so a
//! reward can only match the assignment if the mutation actually landed.

use std::cell::{Cell, RefCell};
use std::fs;

use anyhow::{Context, Result, bail};
use regex::Regex;

use tuner::core::constraints::Units;
use tuner::core::space::{ParamValue, SearchSpace};
use tuner::core::study::TrialState;
use tuner::driver::{DriverOutcome, StopReason, StudyPlan, run_study};
use tuner::evaluate::{EvalSettings, TrialEvaluator};
use tuner::io::artifact::ConfigArtifact;
use tuner::io::config::{SamplerConfig, TunerConfig};
use tuner::io::harness::{BenchmarkRequest, BuildRequest, Harness};
use tuner::io::interrupt::InterruptFlag;
use tuner::io::journal::JournalStorage;
use tuner::io::trial_log::TrialPaths;
use tuner::sampler::build_sampler;
use tuner::test_support::{FIXTURE_ARTIFACT, TestProject, default_constraints, default_space};

/// Reports `PerHostMax` as the throughput of whatever the artifact held at build time.
struct ArtifactScoringHarness {
    artifact: std::path::PathBuf,
    pattern: Regex,
    pending: RefCell<Option<f64>>,
    builds: Cell<usize>,
}

impl ArtifactScoringHarness {
    fn new(project: &TestProject) -> Self {
        Self {
            artifact: project.artifact.clone(),
            pattern: Regex::new(r"PerHostMax\s*=\s*(\d+)").expect("regex"),
            pending: RefCell::new(None),
            builds: Cell::new(0),
        }
    }
}

impl Harness for ArtifactScoringHarness {
    fn build(&self, _request: &BuildRequest) -> Result<bool> {
        self.builds.set(self.builds.get() + 1);
        let text = fs::read_to_string(&self.artifact).context("read artifact")?;
        let caps = self
            .pattern
            .captures(&text)
            .context("PerHostMax missing from artifact")?;
        let hosts: f64 = caps[1].parse().context("parse PerHostMax")?;
        *self.pending.borrow_mut() = Some(hosts);
        Ok(true)
    }

    fn benchmark(&self, _request: &BenchmarkRequest) -> Result<f64> {
        match self.pending.borrow_mut().take() {
            Some(rate) => Ok(rate),
            None => bail!("benchmark without a build"),
        }
    }
}

fn run(
    project: &TestProject,
    space: &SearchSpace,
    harness: &ArtifactScoringHarness,
    sampler_cfg: &SamplerConfig,
    trials: u32,
) -> Result<DriverOutcome> {
    let constraints = default_constraints();
    let units = Units::default();
    let settings = EvalSettings::from_config(project.root(), &TunerConfig::default());
    let evaluator = TrialEvaluator {
        space,
        constraints: &constraints,
        units: &units,
        harness,
        settings: &settings,
    };
    let storage = JournalStorage::open(&project.root().join("tune_study.jsonl"));
    let mut artifact = ConfigArtifact::new(&project.artifact);
    let mut sampler = build_sampler(sampler_cfg);
    run_study(
        &StudyPlan {
            study_name: "surge_tuning",
            trials,
            warm_start: &[],
        },
        &evaluator,
        &mut artifact,
        &storage,
        sampler.as_mut(),
        &InterruptFlag::never(),
        |_| {},
    )
}

fn per_host_max(value: Option<&ParamValue>) -> f64 {
    match value {
        Some(ParamValue::Choice(s)) => s.parse().expect("numeric choice"),
        Some(ParamValue::Int(n)) => *n as f64,
        None => panic!("PerHostMax missing from params"),
    }
}

#[test]
fn tpe_study_scores_the_mutated_artifact_and_resumes() {
    let project = TestProject::new().expect("project");
    let space = default_space();
    let sampler = SamplerConfig {
        n_startup_trials: 4,
        ..SamplerConfig::default()
    };

    let harness = ArtifactScoringHarness::new(&project);
    let outcome = run(&project, &space, &harness, &sampler, 8).expect("first run");
    assert_eq!(outcome.stop, StopReason::BudgetExhausted);
    assert_eq!(outcome.study.len(), 8);
    assert_eq!(
        outcome.study.count(TrialState::Completed) + outcome.study.count(TrialState::Pruned),
        8
    );
    assert_eq!(harness.builds.get(), outcome.study.count(TrialState::Completed));

    for trial in outcome.study.trials() {
        match trial.state {
            TrialState::Completed => {
                assert_eq!(trial.reward, Some(per_host_max(trial.params.get("PerHostMax"))));
                let paths = TrialPaths::new(
                    &project.root().join(".tuner/logs"),
                    "surge_tuning",
                    trial.number,
                );
                assert!(paths.meta_path.exists(), "meta for trial {}", trial.number);
            }
            TrialState::Pruned => {
                assert!(trial.reward.is_none());
                assert!(trial.note.as_deref().is_some_and(|n| n.contains("TargetChunk")));
            }
            TrialState::Failed => panic!("unexpected failed trial {}", trial.number),
        }
    }
    assert_eq!(project.read_artifact().expect("read"), FIXTURE_ARTIFACT);

    let harness = ArtifactScoringHarness::new(&project);
    let outcome = run(&project, &space, &harness, &sampler, 4).expect("second run");
    assert_eq!(outcome.resumed_trials, 8);
    assert_eq!(outcome.study.len(), 12);
    let numbers: Vec<u32> = outcome.study.trials().iter().map(|t| t.number).collect();
    assert_eq!(numbers, (0..12).collect::<Vec<_>>());
    assert_eq!(project.read_artifact().expect("read"), FIXTURE_ARTIFACT);
    assert!(!project.artifact.with_extension("go.bak").exists());
}

#[test]
fn same_seed_replays_the_same_suggestions() {
    let sampler = SamplerConfig::default();
    let mut histories = Vec::new();
    for _ in 0..2 {
        let project = TestProject::new().expect("project");
        let harness = ArtifactScoringHarness::new(&project);
        let outcome = run(&project, &default_space(), &harness, &sampler, 6).expect("run");
        let params: Vec<_> = outcome
            .study
            .trials()
            .iter()
            .map(|t| t.params.clone())
            .collect();
        histories.push(params);
    }
    assert_eq!(histories[0], histories[1]);
}
