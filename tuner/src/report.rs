//! Human-readable progress lines and the final study report.

use std::fmt::Write as _;

use crate::core::space::{Assignment, SearchSpace};
use crate::core::study::{Study, Trial, TrialState};

const RULE: &str = "==================================================";

/// `(name, value)` pairs in the space's declaration order; names the space no longer
/// declares follow in lexicographic order.
fn ordered_params(assignment: &Assignment, space: &SearchSpace) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = space
        .params()
        .iter()
        .filter_map(|p| assignment.get(&p.name).map(|v| (p.name.clone(), v.to_string())))
        .collect();
    for (name, value) in assignment.iter() {
        if space.get(name).is_none() {
            out.push((name.clone(), value.to_string()));
        }
    }
    out
}

/// One stdout line per finalized trial.
pub fn trial_line(trial: &Trial, space: &SearchSpace, unit: &str) -> String {
    let params = ordered_params(&trial.params, space)
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(" ");
    let note = trial.note.as_deref().unwrap_or("");
    match trial.state {
        TrialState::Completed => format!(
            "trial {:>3}  completed  {:>8.2} {unit}  {params}",
            trial.number,
            trial.reward.unwrap_or(0.0)
        ),
        TrialState::Pruned => format!("trial {:>3}  pruned     {note}", trial.number),
        TrialState::Failed => format!("trial {:>3}  failed     {note}  {params}", trial.number),
    }
}

/// Final summary: trial counts, best reward and its assignment.
pub fn render_report(study: &Study, space: &SearchSpace, unit: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(
        out,
        "Study {}: {} trials ({} completed, {} pruned, {} failed)",
        study.name,
        study.len(),
        study.count(TrialState::Completed),
        study.count(TrialState::Pruned),
        study.count(TrialState::Failed)
    );
    match study.best_trial() {
        Some(best) => {
            let _ = writeln!(
                out,
                "Best Speed: {:.2} {unit} (trial {})",
                best.reward.unwrap_or(0.0),
                best.number
            );
            let _ = writeln!(out, "Best Params:");
            for (name, value) in ordered_params(&best.params, space) {
                let _ = writeln!(out, "  {name}: {value}");
            }
        }
        None => {
            let _ = writeln!(out, "No completed trials yet.");
        }
    }
    let _ = writeln!(out, "{RULE}");
    out
}
