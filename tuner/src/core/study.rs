//! Study and trial records.
//!
//! A study is the ordered, append-only history of trials for one tuning run. Trials are
//! finalized exactly once before they are pushed.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::space::Assignment;

/// Stored with each study. Rewards are throughput and are always maximized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Maximize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialState {
    /// Evaluated; `reward` is set (zero for build or benchmark failures).
    Completed,
    /// Rejected by a feasibility constraint before building.
    Pruned,
    /// Aborted by an error outside the modeled failure paths.
    Failed,
}

/// One finalized evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub number: u32,
    pub params: Assignment,
    pub state: TrialState,
    pub reward: Option<f64>,
    /// Prune reason or failure message.
    pub note: Option<String>,
    pub started_at: Option<String>,
    pub duration_ms: Option<u64>,
}

impl Trial {
    pub fn completed(number: u32, params: Assignment, reward: f64) -> Self {
        Self {
            number,
            params,
            state: TrialState::Completed,
            reward: Some(reward),
            note: None,
            started_at: None,
            duration_ms: None,
        }
    }

    pub fn pruned(number: u32, params: Assignment, reason: impl Into<String>) -> Self {
        Self {
            number,
            params,
            state: TrialState::Pruned,
            reward: None,
            note: Some(reason.into()),
            started_at: None,
            duration_ms: None,
        }
    }

    pub fn failed(number: u32, params: Assignment, message: impl Into<String>) -> Self {
        Self {
            number,
            params,
            state: TrialState::Failed,
            reward: None,
            note: Some(message.into()),
            started_at: None,
            duration_ms: None,
        }
    }

    /// Reward if the trial completed.
    pub fn completed_reward(&self) -> Option<f64> {
        match self.state {
            TrialState::Completed => self.reward,
            TrialState::Pruned | TrialState::Failed => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Study {
    pub name: String,
    pub direction: Direction,
    trials: Vec<Trial>,
}

impl Study {
    pub fn new(name: &str, direction: Direction) -> Self {
        Self {
            name: name.to_string(),
            direction,
            trials: Vec::new(),
        }
    }

    /// Rebuild a study from persisted trials, checking numbering is contiguous.
    pub fn with_trials(name: &str, direction: Direction, trials: Vec<Trial>) -> Result<Self> {
        let mut study = Self::new(name, direction);
        for trial in trials {
            study.push(trial)?;
        }
        Ok(study)
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn next_number(&self) -> u32 {
        self.trials.len() as u32
    }

    pub fn push(&mut self, trial: Trial) -> Result<()> {
        let expected = self.next_number();
        if trial.number != expected {
            bail!(
                "study {}: trial number {} out of sequence (expected {})",
                self.name,
                trial.number,
                expected
            );
        }
        self.trials.push(trial);
        Ok(())
    }

    /// Best completed trial by reward; ties resolve to the earliest trial.
    pub fn best_trial(&self) -> Option<&Trial> {
        let mut best: Option<(&Trial, f64)> = None;
        for trial in &self.trials {
            let Some(reward) = trial.completed_reward() else {
                continue;
            };
            if best.is_none_or(|(_, current)| reward > current) {
                best = Some((trial, reward));
            }
        }
        best.map(|(trial, _)| trial)
    }

    pub fn count(&self, state: TrialState) -> usize {
        self.trials.iter().filter(|t| t.state == state).count()
    }

    /// True if some trial already evaluated exactly these params.
    pub fn has_evaluated(&self, params: &Assignment) -> bool {
        self.trials
            .iter()
            .any(|t| t.state != TrialState::Failed && &t.params == params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(v: i64) -> Assignment {
        [("x", v)].into_iter().collect()
    }

    #[test]
    fn best_trial_ignores_pruned_and_failed() {
        let mut study = Study::new("s", Direction::Maximize);
        study.push(Trial::completed(0, params(1), 10.0)).expect("push");
        study.push(Trial::pruned(1, params(2), "x > y")).expect("push");
        study.push(Trial::completed(2, params(3), 25.5)).expect("push");
        study.push(Trial::failed(3, params(4), "boom")).expect("push");
        study.push(Trial::completed(4, params(5), 0.0)).expect("push");

        let best = study.best_trial().expect("best");
        assert_eq!(best.number, 2);
        assert_eq!(best.reward, Some(25.5));
        assert_eq!(study.count(TrialState::Completed), 3);
        assert_eq!(study.count(TrialState::Pruned), 1);
    }

    #[test]
    fn ties_keep_the_earliest_trial() {
        let study = Study::with_trials(
            "s",
            Direction::Maximize,
            vec![
                Trial::completed(0, params(1), 5.0),
                Trial::completed(1, params(2), 5.0),
            ],
        )
        .expect("study");
        assert_eq!(study.best_trial().expect("best").number, 0);
    }

    #[test]
    fn no_completed_trials_means_no_best() {
        let study = Study::with_trials(
            "s",
            Direction::Maximize,
            vec![Trial::pruned(0, params(1), "infeasible")],
        )
        .expect("study");
        assert!(study.best_trial().is_none());
    }

    #[test]
    fn push_rejects_out_of_sequence_numbers() {
        let mut study = Study::new("s", Direction::Maximize);
        let err = study.push(Trial::completed(3, params(1), 1.0)).unwrap_err();
        assert!(err.to_string().contains("out of sequence"));
    }

    #[test]
    fn trial_serializes_with_lowercase_state() {
        let trial = Trial::pruned(7, params(2), "MinChunk > TargetChunk");
        let json = serde_json::to_string(&trial).expect("serialize");
        assert!(json.contains(r#""state":"pruned""#));
        let back: Trial = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, trial);
    }
}
