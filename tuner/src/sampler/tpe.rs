//! Independent Tree-Parzen estimator over finite domains.
//!
//! For each parameter, completed trials are split at the `gamma` quantile of reward
//! into a good and a bad group. Each group yields a smoothed density over the
//! parameter's domain indices: l(x) from the good trials, g(x) from the bad ones.
//! Candidates are drawn from l and the one maximizing l(x) / g(x) wins.
//!
//! Categorical domains smooth with a uniform prior. Integer domains additionally spread
//! each observation over neighbouring steps with a discrete Gaussian kernel, so nearby
//! values share credit.

use anyhow::{Context, Result};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use tracing::trace;

use super::{RandomSampler, Sampler, rng_for, value_at};
use crate::core::space::{Assignment, ParamKind, SearchSpace, SearchSpaceParameter};
use crate::core::study::Trial;

/// Weight of the uniform prior, in observation equivalents.
const PRIOR_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct TpeSampler {
    seed: u64,
    n_startup_trials: usize,
    n_candidates: usize,
    gamma: f64,
}

impl TpeSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            n_startup_trials: 10,
            n_candidates: 24,
            gamma: 0.25,
        }
    }

    pub fn n_startup_trials(mut self, n: usize) -> Self {
        self.n_startup_trials = n;
        self
    }

    pub fn n_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n.max(1);
        self
    }

    pub fn gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    /// Completed trials ordered best first.
    fn ranked<'a>(&self, history: &'a [Trial]) -> Vec<(&'a Trial, f64)> {
        let mut ranked: Vec<_> = history
            .iter()
            .filter_map(|t| t.completed_reward().map(|r| (t, r)))
            .filter(|(_, r)| r.is_finite())
            .collect();
        ranked.sort_by(|(a_t, a), (b_t, b)| b.total_cmp(a).then(a_t.number.cmp(&b_t.number)));
        ranked
    }

    fn sample_param(
        &self,
        param: &SearchSpaceParameter,
        good: &[usize],
        bad: &[usize],
        rng: &mut impl Rng,
    ) -> Result<usize> {
        let l = parzen(param, good);
        let g = parzen(param, bad);
        let draw = WeightedIndex::new(&l).context("build l(x) sampling weights")?;

        let mut best: Option<(usize, f64)> = None;
        for _ in 0..self.n_candidates {
            let candidate = draw.sample(rng);
            let score = l[candidate].ln() - g[candidate].ln();
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((candidate, score));
            }
        }
        let (index, score) = best.context("no TPE candidates drawn")?;
        trace!(param = %param.name, index, score, "tpe pick");
        Ok(index)
    }
}

impl Sampler for TpeSampler {
    fn suggest(&mut self, space: &SearchSpace, history: &[Trial]) -> Result<Assignment> {
        let ranked = self.ranked(history);
        if ranked.len() < self.n_startup_trials.max(1) {
            return RandomSampler::new(self.seed).suggest(space, history);
        }

        let n_good = ((self.gamma * ranked.len() as f64).ceil() as usize).clamp(1, ranked.len());
        let trial_number = history.len();
        let mut values = Vec::with_capacity(space.params().len());
        for (idx, param) in space.params().iter().enumerate() {
            let indices: Vec<usize> = ranked
                .iter()
                .filter_map(|(t, _)| t.params.get(&param.name))
                .filter_map(|v| param.index_of(v))
                .collect();
            // Trials without a legal value for this parameter (e.g. after a space edit)
            // are dropped, so recompute the split on what remains.
            let split = n_good.min(indices.len());
            let (good, bad) = indices.split_at(split);
            let mut rng = rng_for(self.seed, trial_number, idx);
            let index = self.sample_param(param, good, bad, &mut rng)?;
            values.push((param.name.clone(), value_at(param, index)?));
        }
        Ok(values.into_iter().collect())
    }
}

/// Smoothed density over `param`'s domain indices from `observations`.
fn parzen(param: &SearchSpaceParameter, observations: &[usize]) -> Vec<f64> {
    let size = param.domain_size();
    let mut weights = vec![PRIOR_WEIGHT / size as f64; size];
    match &param.kind {
        ParamKind::Categorical { .. } => {
            for &obs in observations {
                weights[obs] += 1.0;
            }
        }
        ParamKind::Integer { .. } => {
            let sigma = (size as f64 / (observations.len() as f64 + 1.0)).max(1.0);
            let mut kernel = vec![0.0; size];
            for &obs in observations {
                for (i, k) in kernel.iter_mut().enumerate() {
                    let z = (i as f64 - obs as f64) / sigma;
                    *k = (-0.5 * z * z).exp();
                }
                let total: f64 = kernel.iter().sum();
                for (w, k) in weights.iter_mut().zip(&kernel) {
                    *w += k / total;
                }
            }
        }
    }
    let total: f64 = weights.iter().sum();
    weights.iter_mut().for_each(|w| *w /= total);
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::space::ParamValue;

    fn space() -> SearchSpace {
        SearchSpace::new(vec![
            SearchSpaceParameter::categorical("MinChunk", ["512 * KB", "1 * MB", "2 * MB", "4 * MB"]),
            SearchSpaceParameter::integer("PerHostMax", 8, 128, 8),
        ])
        .expect("space")
    }

    fn trial(n: u32, chunk: &str, hosts: i64, reward: f64) -> Trial {
        let params: Assignment = [
            ("MinChunk", ParamValue::from(chunk)),
            ("PerHostMax", ParamValue::Int(hosts)),
        ]
        .into_iter()
        .collect();
        Trial::completed(n, params, reward)
    }

    #[test]
    fn startup_phase_matches_random_sampler() {
        let space = space();
        let history = vec![trial(0, "1 * MB", 64, 10.0)];
        let mut tpe = TpeSampler::new(42).n_startup_trials(5);
        let mut random = RandomSampler::new(42);
        assert_eq!(
            tpe.suggest(&space, &history).expect("tpe"),
            random.suggest(&space, &history).expect("random")
        );
    }

    #[test]
    fn concentrates_on_high_reward_region() {
        let space = space();
        let mut history = Vec::new();
        let chunks = ["512 * KB", "1 * MB", "2 * MB", "4 * MB"];
        for n in 0..24u32 {
            let chunk = chunks[n as usize % 4];
            let hosts = 8 * (n as i64 % 16 + 1);
            let reward = if chunk == "2 * MB" { 200.0 } else { 50.0 };
            history.push(trial(n, chunk, hosts, reward));
        }

        let mut tpe = TpeSampler::new(3).n_startup_trials(10);
        let mut hits = 0;
        for extra in 0..20 {
            let mut h = history.clone();
            for k in 0..extra {
                h.push(Trial::pruned(24 + k, h[0].params.clone(), "skip"));
            }
            let a = tpe.suggest(&space, &h).expect("suggest");
            space.check_assignment(&a).expect("legal");
            if a.get("MinChunk") == Some(&ParamValue::from("2 * MB")) {
                hits += 1;
            }
        }
        assert!(hits >= 15, "expected TPE to favour the best chunk, got {hits}/20");
    }

    #[test]
    fn pruned_and_failed_trials_do_not_feed_the_model() {
        let tpe = TpeSampler::new(1);
        let history = vec![
            trial(0, "1 * MB", 8, 5.0),
            Trial::pruned(1, trial(1, "4 * MB", 8, 0.0).params, "x"),
            Trial::failed(2, trial(2, "2 * MB", 8, 0.0).params, "boom"),
        ];
        let ranked = tpe.ranked(&history);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0.number, 0);
    }

    #[test]
    fn ranking_puts_highest_reward_first_and_breaks_ties_by_number() {
        let history = vec![
            trial(0, "1 * MB", 8, 1.0),
            trial(1, "2 * MB", 8, 5.0),
            trial(2, "4 * MB", 8, 5.0),
        ];
        let order: Vec<u32> = TpeSampler::new(1)
            .ranked(&history)
            .iter()
            .map(|(t, _)| t.number)
            .collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn parzen_is_normalized_and_smooths_integers() {
        let param = SearchSpaceParameter::integer("PerHostMax", 8, 128, 8);
        let density = parzen(&param, &[7]);
        let total: f64 = density.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(density[7] > density[6]);
        assert!(density[6] > density[0]);
        assert!(density.iter().all(|p| *p > 0.0));
    }
}
