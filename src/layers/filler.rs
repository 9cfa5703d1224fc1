//! Fillers - seeded initializers for blob data.

use ndarray::{ArrayBase, DataMut, Dimension};
use rand::distributions::{Bernoulli, Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::errors::{NetError, Result};
use crate::kernel::Element;

/// How to initialize blob data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FillerConfig {
    /// Every element set to `value`.
    Constant { value: f64 },
    /// Independent draws from `[min, max]`.
    Uniform { min: f64, max: f64 },
    /// Independent draws from N(mean, std²).
    Gaussian { mean: f64, std: f64 },
    /// 1 with probability `ratio`, else 0.
    Bernoulli { ratio: f64 },
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self::Constant { value: 0.0 }
    }
}

impl FillerConfig {
    /// Uniform filler over `[0, 1]`.
    pub fn uniform() -> Self {
        Self::Uniform { min: 0.0, max: 1.0 }
    }

    /// Standard normal filler.
    pub fn gaussian() -> Self {
        Self::Gaussian { mean: 0.0, std: 1.0 }
    }

    /// Checks the parameters of the distribution.
    pub fn validate(&self) -> Result<()> {
        self.sampler().map(|_| ())
    }

    /// Builds a filler drawing from an RNG seeded with `seed`.
    pub fn build(self, seed: u64) -> Result<Filler> {
        Ok(Filler {
            sampler: self.sampler()?,
            config: self,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn sampler(&self) -> Result<Sampler> {
        let invalid = |option, message: String| NetError::config("filler", option, message);
        match *self {
            Self::Constant { value } => Ok(Sampler::Constant(value)),
            Self::Uniform { min, max } => {
                if !(min.is_finite() && max.is_finite() && min <= max) {
                    return Err(invalid("min", format!("must be finite and <= max, got [{min}, {max}]")));
                }
                Ok(Sampler::Uniform(Uniform::new_inclusive(min, max)))
            }
            Self::Gaussian { mean, std } => Normal::new(mean, std)
                .map(Sampler::Gaussian)
                .map_err(|e| invalid("std", format!("is invalid ({e}), got {std}"))),
            Self::Bernoulli { ratio } => Bernoulli::new(ratio)
                .map(Sampler::Bernoulli)
                .map_err(|_| invalid("ratio", format!("must be in [0, 1], got {ratio}"))),
        }
    }
}

#[derive(Debug, Clone)]
enum Sampler {
    Constant(f64),
    Uniform(Uniform<f64>),
    Gaussian(Normal<f64>),
    Bernoulli(Bernoulli),
}

/// A filler bound to its own random stream.
#[derive(Debug, Clone)]
pub struct Filler {
    config: FillerConfig,
    sampler: Sampler,
    rng: StdRng,
}

impl Filler {
    pub fn config(&self) -> FillerConfig {
        self.config
    }

    /// Overwrites every element of `values` with a fresh draw.
    pub fn fill<A, S, D>(&mut self, values: &mut ArrayBase<S, D>)
    where
        A: Element,
        S: DataMut<Elem = A>,
        D: Dimension,
    {
        let rng = &mut self.rng;
        match &self.sampler {
            Sampler::Constant(value) => values.fill(A::from_f64(*value)),
            Sampler::Uniform(dist) => values.mapv_inplace(|_| A::from_f64(dist.sample(rng))),
            Sampler::Gaussian(dist) => values.mapv_inplace(|_| A::from_f64(dist.sample(rng))),
            Sampler::Bernoulli(dist) => {
                values.mapv_inplace(|_| if dist.sample(rng) { A::one() } else { A::zero() })
            }
        }
    }
}
