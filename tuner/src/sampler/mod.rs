//! Pluggable samplers proposing the next assignment.
//!
//! A sampler sees the search space and the full trial history and returns a complete
//! [`Assignment`]. Implementations are deterministic functions of their seed, the
//! history, and the next trial number (`history.len()`), so a resumed study continues
//! the same sequence a single uninterrupted run would have produced.
//!
//! | Sampler | Algorithm |
//! |---------|-----------|
//! | [`RandomSampler`] | Independent uniform draws |
//! | [`TpeSampler`] | Independent Tree-Parzen estimator over finite domains |

mod random;
mod tpe;

use anyhow::{Result, anyhow};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::core::space::{Assignment, ParamValue, SearchSpace, SearchSpaceParameter};
use crate::core::study::Trial;
use crate::io::config::{SamplerConfig, SamplerKind};

pub use random::RandomSampler;
pub use tpe::TpeSampler;

pub trait Sampler {
    /// Propose the assignment for trial number `history.len()`.
    fn suggest(&mut self, space: &SearchSpace, history: &[Trial]) -> Result<Assignment>;

    /// Observe a finalized trial. Samplers that derive everything from `history`
    /// can ignore this.
    fn record(&mut self, _trial: &Trial) {}
}

pub fn build_sampler(cfg: &SamplerConfig) -> Box<dyn Sampler> {
    match cfg.kind {
        SamplerKind::Random => Box::new(RandomSampler::new(cfg.seed)),
        SamplerKind::Tpe => Box::new(
            TpeSampler::new(cfg.seed)
                .n_startup_trials(cfg.n_startup_trials)
                .n_candidates(cfg.n_candidates)
                .gamma(cfg.gamma),
        ),
    }
}

/// Per-(trial, parameter) RNG derived from the base seed with a MurmurHash3 finalizer.
pub(crate) fn rng_for(seed: u64, trial_number: usize, param_index: usize) -> StdRng {
    let mut h = seed
        .wrapping_mul(0xff51_afd7_ed55_8ccd)
        .wrapping_add(trial_number as u64)
        .wrapping_mul(0xc4ce_b9fe_1a85_ec53)
        .wrapping_add(param_index as u64);
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    StdRng::seed_from_u64(h)
}

pub(crate) fn value_at(param: &SearchSpaceParameter, index: usize) -> Result<ParamValue> {
    param
        .value_at(index)
        .ok_or_else(|| anyhow!("index {index} outside the domain of {}", param.name))
}
