use anyhow::Result;
use rand::Rng;

use super::{Sampler, rng_for, value_at};
use crate::core::space::{Assignment, SearchSpace};
use crate::core::study::Trial;

/// Uniform, independent draws over every parameter's domain.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    seed: u64,
}

impl RandomSampler {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl Sampler for RandomSampler {
    fn suggest(&mut self, space: &SearchSpace, history: &[Trial]) -> Result<Assignment> {
        let trial_number = history.len();
        let mut values = Vec::with_capacity(space.params().len());
        for (idx, param) in space.params().iter().enumerate() {
            let mut rng = rng_for(self.seed, trial_number, idx);
            let index = rng.gen_range(0..param.domain_size());
            values.push((param.name.clone(), value_at(param, index)?));
        }
        Ok(values.into_iter().collect())
    }
}
