//! Test-only fixtures: a Surge-style artifact, the default space, and a scripted harness.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::core::constraints::Constraint;
use crate::core::space::{Assignment, ParamValue, SearchSpace};
use crate::io::config::{ParamConfig, TunerConfig, write_config};
use crate::io::harness::{BenchmarkRequest, BuildRequest, Harness};
use crate::io::interrupt::InterruptFlag;

/// `internal/download/types/config.go` as shipped, with every default anchor present once.
pub const FIXTURE_ARTIFACT: &str = "package types

import \"time\"

const (
\tKB = 1 << 10
\tMB = 1 << 20
)

// Chunk sizing
const (
\tMinChunk     = 2 * MB  // Minimum chunk size
\tMaxChunk     = 16 * MB // Maximum chunk size
\tTargetChunk  = 8 * MB  // Target chunk size
\tWorkerBuffer = 512 * KB

\tTasksPerWorker = 4 // Target tasks per connection
)

// Connection limits
const (
\tPerHostMax  = 64 // Max concurrent connections per host
\tDialTimeout = 10 * time.Second
)

func ChunkFits(size int64) bool {
\treturn size >= MinChunk && size <= MaxChunk
}
";

/// Write [`FIXTURE_ARTIFACT`] at the default artifact path under `root`.
pub fn write_fixture(root: &Path) -> Result<PathBuf> {
    let path = root.join(TunerConfig::default().artifact);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&path, FIXTURE_ARTIFACT).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

pub fn default_space() -> SearchSpace {
    TunerConfig::default()
        .search_space()
        .expect("default space is valid")
}

pub fn default_constraints() -> Vec<Constraint> {
    TunerConfig::default().constraints
}

/// Default space with `name`'s choices replaced.
pub fn space_with_choices(name: &str, choices: &[&str]) -> SearchSpace {
    let mut cfg = TunerConfig::default();
    for param in &mut cfg.params {
        if param.name == name {
            *param = ParamConfig::categorical(name, choices);
        }
    }
    cfg.search_space().expect("space is valid")
}

/// `{min=1MB, target=16MB, max=16MB, buffer=512KB, tasks=2, hosts=64}`.
pub fn feasible_assignment() -> Assignment {
    [
        ("MinChunk", "1 * MB"),
        ("TargetChunk", "16 * MB"),
        ("MaxChunk", "16 * MB"),
        ("WorkerBuffer", "512 * KB"),
        ("TasksPerWorker", "2"),
        ("PerHostMax", "64"),
    ]
    .into_iter()
    .collect()
}

/// Copy of `assignment` with `name` set to the choice `value`.
pub fn with_value(assignment: &Assignment, name: &str, value: &str) -> Assignment {
    assignment
        .iter()
        .map(|(k, v)| {
            let v = if k == name {
                ParamValue::from(value)
            } else {
                v.clone()
            };
            (k.clone(), v)
        })
        .collect()
}

/// A temp project root holding the fixture artifact and an optional `tune.toml`.
pub struct TestProject {
    temp: tempfile::TempDir,
    pub artifact: PathBuf,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let artifact = write_fixture(temp.path())?;
        Ok(Self { temp, artifact })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn write_config(&self, cfg: &TunerConfig) -> Result<PathBuf> {
        let path = self.root().join("tune.toml");
        write_config(&path, cfg)?;
        Ok(path)
    }

    pub fn read_artifact(&self) -> Result<String> {
        fs::read_to_string(&self.artifact)
            .with_context(|| format!("read {}", self.artifact.display()))
    }
}

/// Harness replaying queued build results and throughputs.
#[derive(Default)]
pub struct ScriptedHarness {
    builds: RefCell<VecDeque<bool>>,
    benchmarks: RefCell<VecDeque<f64>>,
    build_calls: Cell<usize>,
    benchmark_calls: Cell<usize>,
    observe: Option<PathBuf>,
    observed: RefCell<Option<String>>,
    interrupt: Option<(InterruptFlag, usize)>,
}

impl ScriptedHarness {
    pub fn new(builds: Vec<bool>, benchmarks: Vec<f64>) -> Self {
        Self {
            builds: RefCell::new(builds.into()),
            benchmarks: RefCell::new(benchmarks.into()),
            ..Self::default()
        }
    }

    /// Capture the artifact's content at build time.
    pub fn observing(mut self, artifact: &Path) -> Self {
        self.observe = Some(artifact.to_path_buf());
        self
    }

    /// Raise `flag` during the `nth` build (1-based), as a Ctrl-C mid-trial would.
    pub fn interrupting_build(mut self, flag: InterruptFlag, nth: usize) -> Self {
        self.interrupt = Some((flag, nth));
        self
    }

    pub fn observed(&self) -> Option<String> {
        self.observed.borrow().clone()
    }

    pub fn build_calls(&self) -> usize {
        self.build_calls.get()
    }

    pub fn benchmark_calls(&self) -> usize {
        self.benchmark_calls.get()
    }

    pub fn assert_drained(&self) -> Result<()> {
        let builds = self.builds.borrow().len();
        let benchmarks = self.benchmarks.borrow().len();
        if builds > 0 || benchmarks > 0 {
            bail!("scripted harness not drained: {builds} builds, {benchmarks} benchmarks left");
        }
        Ok(())
    }
}

impl Harness for ScriptedHarness {
    fn build(&self, _request: &BuildRequest) -> Result<bool> {
        self.build_calls.set(self.build_calls.get() + 1);
        if let Some(path) = &self.observe {
            let content =
                fs::read_to_string(path).with_context(|| format!("observe {}", path.display()))?;
            *self.observed.borrow_mut() = Some(content);
        }
        match &self.interrupt {
            Some((flag, nth)) if *nth == self.build_calls.get() => flag.trigger(),
            _ => {}
        }
        match self.builds.borrow_mut().pop_front() {
            Some(ok) => Ok(ok),
            None => bail!("no scripted build result left"),
        }
    }

    fn benchmark(&self, _request: &BenchmarkRequest) -> Result<f64> {
        self.benchmark_calls.set(self.benchmark_calls.get() + 1);
        match self.benchmarks.borrow_mut().pop_front() {
            Some(rate) => Ok(rate),
            None => bail!("no scripted benchmark result left"),
        }
    }
}
