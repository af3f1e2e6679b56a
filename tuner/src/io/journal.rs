//! Append-only JSON-lines study storage.
//!
//! One record per line:
//!
//! ```text
//! {"op":"create_study","study":"surge_tuning","direction":"maximize",...}
//! {"op":"trial","study":"surge_tuning","trial":{"number":0,...}}
//! ```
//!
//! Several studies may share a journal. Records are only ever appended, each with a
//! single write followed by an fsync, so a crash can at worst leave an unterminated final
//! line. Such a line is never counted, whether or not it parses.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::study::{Direction, Study, Trial};

/// Resolve a `--db` argument to a journal path.
///
/// Accepts a plain path, `file://<path>` or `journal://<path>`. Relative paths are
/// resolved against `root`.
pub fn parse_db_uri(uri: &str, root: &Path) -> Result<PathBuf> {
    let raw = match uri.split_once("://") {
        None => uri,
        Some(("file" | "journal", rest)) => rest,
        Some((scheme, _)) => bail!(
            "unsupported storage '{uri}' (scheme {scheme}); use a path, file://<path> or journal://<path>"
        ),
    };
    if raw.trim().is_empty() {
        bail!("storage '{uri}' names an empty path");
    }
    let path = Path::new(raw);
    Ok(if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Record {
    CreateStudy {
        study: String,
        direction: Direction,
        created_at: String,
        artifact_sha256: Option<String>,
    },
    Trial {
        study: String,
        trial: Trial,
    },
}

/// A study reattached from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredStudy {
    pub study: Study,
    pub created_at: String,
    /// Fingerprint of the pristine artifact when the study was created.
    pub artifact_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JournalStorage {
    path: PathBuf,
}

impl JournalStorage {
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the study called `name`, or `None` if the journal has never seen it.
    pub fn load(&self, name: &str) -> Result<Option<StoredStudy>> {
        let mut stored: Option<StoredStudy> = None;
        let mut pending = Vec::new();
        for record in self.records()? {
            match record {
                Record::CreateStudy {
                    study,
                    direction,
                    created_at,
                    artifact_sha256,
                } if study == name => {
                    if stored.is_some() {
                        bail!("{}: study {name} created twice", self.path.display());
                    }
                    stored = Some(StoredStudy {
                        study: Study::new(&study, direction),
                        created_at,
                        artifact_sha256,
                    });
                }
                Record::Trial { study, trial } if study == name => match stored.as_mut() {
                    Some(s) => s
                        .study
                        .push(trial)
                        .with_context(|| format!("replay {}", self.path.display()))?,
                    None => pending.push(trial.number),
                },
                Record::CreateStudy { .. } | Record::Trial { .. } => {}
            }
        }
        if !pending.is_empty() {
            bail!(
                "{}: trials {:?} recorded for study {name} before it was created",
                self.path.display(),
                pending
            );
        }
        if let Some(s) = &stored {
            debug!(study = name, trials = s.study.len(), "study loaded");
        }
        Ok(stored)
    }

    /// Names of every study in the journal, in creation order.
    pub fn study_names(&self) -> Result<Vec<String>> {
        Ok(self
            .records()?
            .into_iter()
            .filter_map(|record| match record {
                Record::CreateStudy { study, .. } => Some(study),
                Record::Trial { .. } => None,
            })
            .collect())
    }

    pub fn create_study(
        &self,
        name: &str,
        direction: Direction,
        artifact_sha256: Option<&str>,
    ) -> Result<StoredStudy> {
        if self.load(name)?.is_some() {
            bail!("study {name} already exists in {}", self.path.display());
        }
        let created_at = Utc::now().to_rfc3339();
        self.append(&Record::CreateStudy {
            study: name.to_string(),
            direction,
            created_at: created_at.clone(),
            artifact_sha256: artifact_sha256.map(str::to_string),
        })?;
        Ok(StoredStudy {
            study: Study::new(name, direction),
            created_at,
            artifact_sha256: artifact_sha256.map(str::to_string),
        })
    }

    /// Persist one finalized trial.
    pub fn append_trial(&self, name: &str, trial: &Trial) -> Result<()> {
        self.append(&Record::Trial {
            study: name.to_string(),
            trial: trial.clone(),
        })
    }

    fn records(&self) -> Result<Vec<Record>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read journal {}", self.path.display()));
            }
        };
        // A record is committed only once its newline is on disk; `append` cuts any
        // unterminated tail, so reads must ignore it too, even when it parses.
        let committed = match contents.rfind('\n') {
            Some(pos) => &contents[..=pos],
            None => "",
        };
        if committed.len() < contents.len() {
            warn!(
                journal = %self.path.display(),
                bytes = contents.len() - committed.len(),
                "ignoring unterminated final record"
            );
        }
        let mut records = Vec::new();
        for (idx, line) in committed.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    return Err(anyhow!(err)).with_context(|| {
                        format!("corrupt journal {} at line {}", self.path.display(), idx + 1)
                    });
                }
            }
        }
        Ok(records)
    }

    fn append(&self, record: &Record) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .with_context(|| format!("open journal {}", self.path.display()))?;
        self.drop_partial_tail(&mut file)?;

        let mut line = serde_json::to_string(record).context("serialize journal record")?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .with_context(|| format!("append to {}", self.path.display()))?;
        file.flush()?;
        file.sync_data()
            .with_context(|| format!("sync {}", self.path.display()))?;
        Ok(())
    }

    /// Cut a partial final line left by a crash so the next record starts on a fresh line.
    fn drop_partial_tail(&self, file: &mut File) -> Result<()> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(());
        }
        let mut contents = Vec::with_capacity(len as usize);
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut contents)
            .with_context(|| format!("read journal {}", self.path.display()))?;
        if contents.ends_with(b"\n") {
            return Ok(());
        }
        let keep = contents
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1);
        warn!(
            journal = %self.path.display(),
            dropped = contents.len() - keep,
            "truncating partial final record"
        );
        file.set_len(keep as u64)
            .with_context(|| format!("truncate {}", self.path.display()))?;
        Ok(())
    }
}
