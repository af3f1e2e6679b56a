//! Per-trial log layout under `<logs_dir>/<study>/<trial>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::study::Trial;

#[derive(Debug, Clone)]
pub struct TrialPaths {
    pub dir: PathBuf,
    pub build_log: PathBuf,
    pub benchmark_log: PathBuf,
    pub meta_path: PathBuf,
}

impl TrialPaths {
    pub fn new(logs_dir: &Path, study: &str, number: u32) -> Self {
        let dir = logs_dir.join(study).join(number.to_string());
        Self {
            build_log: dir.join("build.log"),
            benchmark_log: dir.join("benchmark.log"),
            meta_path: dir.join("meta.json"),
            dir,
        }
    }
}

/// Write the finalized trial next to its build and benchmark logs.
pub fn write_trial_meta(paths: &TrialPaths, trial: &Trial) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create trial dir {}", paths.dir.display()))?;
    let mut buf = serde_json::to_string_pretty(trial)?;
    buf.push('\n');
    fs::write(&paths.meta_path, buf)
        .with_context(|| format!("write {}", paths.meta_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::space::Assignment;

    #[test]
    fn trial_paths_are_stable() {
        let paths = TrialPaths::new(Path::new("/p/.tuner/logs"), "surge_tuning", 7);
        assert_eq!(paths.dir, PathBuf::from("/p/.tuner/logs/surge_tuning/7"));
        assert!(paths.build_log.ends_with("surge_tuning/7/build.log"));
        assert!(paths.benchmark_log.ends_with("benchmark.log"));
        assert!(paths.meta_path.ends_with("meta.json"));
    }

    #[test]
    fn writes_meta_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = TrialPaths::new(temp.path(), "s", 0);
        let params: Assignment = [("PerHostMax", "64")].into_iter().collect();
        write_trial_meta(&paths, &Trial::completed(0, params, 88.0)).expect("write");
        let meta = fs::read_to_string(&paths.meta_path).expect("read");
        assert!(meta.contains("\"state\": \"completed\""));
        assert!(meta.contains("\"PerHostMax\": \"64\""));
    }
}
