//! Tuner configuration stored in `tune.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::core::constraints::{Comparison, Constraint, Units, validate_constraints};
use crate::core::space::{Assignment, SearchSpace, SearchSpaceParameter};
use crate::core::throughput::{DEFAULT_REPORT_PATTERN, compile_report_pattern};

pub const DEFAULT_CONFIG_FILE: &str = "tune.toml";
pub const DEFAULT_STORAGE_FILE: &str = "tune_study.jsonl";

/// Tuner configuration (TOML).
///
/// Edited by humans. Missing fields fall back to the Surge download-engine
/// tuning setup. Paths are relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TunerConfig {
    /// Study key inside the storage journal.
    pub study_name: String,

    /// Source file holding the tuned constants.
    pub artifact: PathBuf,

    /// Journal file (or `file://` / `journal://` URI) used for resume.
    pub storage: String,

    /// Per-trial build and benchmark logs live under `<logs_dir>/<study>/<trial>/`.
    pub logs_dir: PathBuf,

    /// New trials to evaluate per invocation.
    pub trials: u32,

    /// Truncate captured subprocess output beyond this many bytes.
    pub output_limit_bytes: usize,

    pub sampler: SamplerConfig,
    pub build: BuildConfig,
    pub benchmark: BenchmarkConfig,
    pub units: Units,
    pub params: Vec<ParamConfig>,
    pub constraints: Vec<Constraint>,

    /// Assignments evaluated before the sampler is consulted.
    pub warm_start: Vec<Assignment>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    Tpe,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplerConfig {
    pub kind: SamplerKind,
    pub seed: u64,
    /// Trials drawn uniformly before the TPE model kicks in.
    pub n_startup_trials: usize,
    /// Candidates drawn from l(x) per suggestion.
    pub n_candidates: usize,
    /// Fraction of completed trials treated as "good".
    pub gamma: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            kind: SamplerKind::Tpe,
            seed: 42,
            n_startup_trials: 10,
            n_candidates: 24,
            gamma: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Build argv; `{output}` expands to the absolute binary path.
    pub command: Vec<String>,
    /// Binary path relative to the project root.
    pub output: PathBuf,
    pub timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: ["go", "build", "-o", "{output}", "."]
                .into_iter()
                .map(String::from)
                .collect(),
            output: PathBuf::from("surge-tuned"),
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Benchmark argv; `{binary}` and `{iterations}` are expanded.
    pub command: Vec<String>,
    pub iterations: u32,
    pub timeout_secs: u64,
    /// Regex whose first capture group is the throughput figure.
    pub report_pattern: String,
    /// Rate unit shown in reports.
    pub unit: String,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            command: [
                "python3",
                "benchmark.py",
                "--surge-exec",
                "{binary}",
                "-n",
                "{iterations}",
                "--surge",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            iterations: 3,
            timeout_secs: 600,
            report_pattern: DEFAULT_REPORT_PATTERN.to_string(),
            unit: "MB/s".to_string(),
        }
    }
}

/// One `[[params]]` entry: either `choices`, or `min`/`max` with optional `step`/`unit`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ParamConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ParamConfig {
    pub fn categorical(name: &str, choices: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            choices: Some(choices.iter().map(|c| c.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn to_parameter(&self) -> Result<SearchSpaceParameter> {
        let param = match (&self.choices, self.min, self.max) {
            (Some(choices), None, None) => {
                if self.step.is_some() || self.unit.is_some() {
                    bail!("{}: step/unit only apply to integer ranges", self.name);
                }
                SearchSpaceParameter::categorical(&self.name, choices.iter().cloned())
            }
            (None, Some(min), Some(max)) => {
                let param =
                    SearchSpaceParameter::integer(&self.name, min, max, self.step.unwrap_or(1));
                match &self.unit {
                    Some(unit) => param.with_unit(unit),
                    None => param,
                }
            }
            _ => bail!(
                "{}: set either `choices` or both `min` and `max`",
                self.name
            ),
        };
        Ok(match &self.anchor {
            Some(anchor) => param.with_anchor(anchor),
            None => param,
        })
    }
}

fn default_params() -> Vec<ParamConfig> {
    vec![
        ParamConfig::categorical("MinChunk", &["512 * KB", "1 * MB", "2 * MB", "4 * MB"]),
        ParamConfig::categorical("MaxChunk", &["8 * MB", "16 * MB", "32 * MB", "64 * MB"]),
        ParamConfig::categorical("TargetChunk", &["4 * MB", "8 * MB", "16 * MB", "32 * MB"]),
        ParamConfig::categorical(
            "WorkerBuffer",
            &["32 * KB", "64 * KB", "128 * KB", "256 * KB", "512 * KB"],
        ),
        ParamConfig::categorical("TasksPerWorker", &["2", "4", "8", "16"]),
        ParamConfig::categorical("PerHostMax", &["8", "16", "32", "64", "128"]),
    ]
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            study_name: "surge_tuning".to_string(),
            artifact: PathBuf::from("internal/download/types/config.go"),
            storage: DEFAULT_STORAGE_FILE.to_string(),
            logs_dir: PathBuf::from(".tuner/logs"),
            trials: 50,
            output_limit_bytes: 100_000,
            sampler: SamplerConfig::default(),
            build: BuildConfig::default(),
            benchmark: BenchmarkConfig::default(),
            units: Units::default(),
            params: default_params(),
            constraints: vec![
                Constraint::new("MinChunk", Comparison::Le, "TargetChunk"),
                Constraint::new("MaxChunk", Comparison::Ge, "TargetChunk"),
            ],
            warm_start: Vec::new(),
        }
    }
}

impl TunerConfig {
    /// Build the validated search space from `[[params]]`.
    pub fn search_space(&self) -> Result<SearchSpace> {
        let params = self
            .params
            .iter()
            .map(ParamConfig::to_parameter)
            .collect::<Result<Vec<_>>>()?;
        SearchSpace::new(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.study_name.trim().is_empty() {
            return Err(anyhow!("study_name must be non-empty"));
        }
        if self.artifact.as_os_str().is_empty() {
            return Err(anyhow!("artifact must be set"));
        }
        if self.storage.trim().is_empty() {
            return Err(anyhow!("storage must be non-empty"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.build.command.is_empty() || self.build.command[0].trim().is_empty() {
            return Err(anyhow!("build.command must be a non-empty array"));
        }
        if self.build.output.as_os_str().is_empty() {
            return Err(anyhow!("build.output must be set"));
        }
        if self.build.timeout_secs == 0 {
            return Err(anyhow!("build.timeout_secs must be > 0"));
        }
        if self.benchmark.command.is_empty() || self.benchmark.command[0].trim().is_empty() {
            return Err(anyhow!("benchmark.command must be a non-empty array"));
        }
        if self.benchmark.iterations == 0 {
            return Err(anyhow!("benchmark.iterations must be > 0"));
        }
        if self.benchmark.timeout_secs == 0 {
            return Err(anyhow!("benchmark.timeout_secs must be > 0"));
        }
        compile_report_pattern(&self.benchmark.report_pattern).context("benchmark.report_pattern")?;
        if !(self.sampler.gamma > 0.0 && self.sampler.gamma < 1.0) {
            return Err(anyhow!("sampler.gamma must be in (0, 1)"));
        }
        if self.sampler.n_candidates == 0 {
            return Err(anyhow!("sampler.n_candidates must be > 0"));
        }

        let space = self.search_space().context("params")?;
        validate_constraints(&self.constraints, &space, &self.units).context("constraints")?;
        for (idx, assignment) in self.warm_start.iter().enumerate() {
            space
                .check_assignment(assignment)
                .with_context(|| format!("warm_start[{idx}]"))?;
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TunerConfig::default()`.
pub fn load_config(path: &Path) -> Result<TunerConfig> {
    if !path.exists() {
        let cfg = TunerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TunerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TunerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
