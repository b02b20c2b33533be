use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::features::{ExpectationEngine, Features};
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::model::{Blocks, ChainModel};

/// How often the observed-labeling term enters the pseudo-likelihood.
///
/// `PerSequence` adds `E(x, y)` (and `feat(x, y)` in the gradient) once per
/// example next to one local normalizer per position. `PerPosition` adds
/// it once per position, which is the textbook sum of per-position
/// conditional negative log-likelihoods. The two differ whenever a sequence
/// is longer than one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnergyCount {
    #[default]
    PerSequence,
    PerPosition,
}

/// Training objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Exact negative log-likelihood
    FullLikelihood,
    /// Sum of per-position conditional likelihoods given the true neighbours
    PseudoLikelihood(EnergyCount),
    /// Single-example likelihood gradient for online training; defines no
    /// batch objective
    StochasticLikelihood,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::FullLikelihood => "full-likelihood",
            Strategy::PseudoLikelihood(_) => "pseudo-likelihood",
            Strategy::StochasticLikelihood => "stochastic-likelihood",
        }
    }
}

/// L2 penalty `reg * ||W||^2` added to an objective/gradient pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct L2 {
    reg: f64,
}

impl L2 {
    pub fn new(reg: f64) -> Result<Self> {
        if reg < 0.0 || reg.is_nan() {
            return Err(Error::invalid("c2 must be non-negative"));
        }
        Ok(Self { reg })
    }

    pub fn reg(&self) -> f64 {
        self.reg
    }

    pub fn objective(&self, raw: f64, w: ArrayView1<f64>) -> f64 {
        if self.reg == 0.0 {
            return raw;
        }
        raw + self.reg * w.dot(&w)
    }

    pub fn gradient(&self, mut raw: Array1<f64>, w: ArrayView1<f64>) -> Array1<f64> {
        if self.reg == 0.0 {
            return raw;
        }
        // Factor of 2 comes from derivative of reg * w[i]^2 -> 2 * reg * w[i]
        raw.zip_mut_with(&w, |g, &wi| *g += 2.0 * self.reg * wi);
        raw
    }
}

/// Objective and gradient of one strategy over a model
pub struct Objective<'a, M: ?Sized> {
    model: &'a M,
    strategy: Strategy,
    engine: &'a ExpectationEngine,
    penalty: L2,
}

impl<'a, M: ChainModel + ?Sized> Objective<'a, M> {
    pub fn new(model: &'a M, strategy: Strategy, engine: &'a ExpectationEngine) -> Self {
        Self {
            model,
            strategy,
            engine,
            penalty: L2 { reg: 0.0 },
        }
    }

    /// Add an L2 penalty to both the objective and the gradient
    pub fn regularized(mut self, penalty: L2) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn features(&self) -> Features<'a, M> {
        Features::new(self.model)
    }

    /// Objective summed over the training split
    pub fn value(&self, data: &Dataset, w: ArrayView1<f64>) -> Result<f64> {
        let ws = self.model.split_weights(w)?;
        let mut total = 0.0;
        for (x, y) in data.train_pairs() {
            total += match self.strategy {
                Strategy::FullLikelihood => {
                    self.model.energy(x, y, &ws) + self.model.log_partition(x, &ws)?
                }
                Strategy::PseudoLikelihood(count) => self.pl_value(x, y, &ws, count),
                Strategy::StochasticLikelihood => {
                    return Err(Error::ObjectiveUndefined(self.strategy.name()))
                }
            };
        }
        Ok(self.penalty.objective(total, w))
    }

    /// Gradient summed over the training split
    pub fn gradient<R: Rng + ?Sized>(
        &self,
        data: &Dataset,
        w: ArrayView1<f64>,
        rng: &mut R,
    ) -> Result<Array1<f64>> {
        if self.strategy == Strategy::StochasticLikelihood {
            return Err(Error::ObjectiveUndefined(self.strategy.name()));
        }
        let ws = self.model.split_weights(w)?;
        let mut total = Array1::zeros(self.model.n_weights());
        for (x, y) in data.train_pairs() {
            total += &self.raw_example_gradient(x, y, &ws, rng)?;
        }
        Ok(self.penalty.gradient(total, w))
    }

    /// Gradient contributed by a single example
    pub fn example_gradient<R: Rng + ?Sized>(
        &self,
        x: &Array2<f64>,
        y: &[usize],
        w: ArrayView1<f64>,
        rng: &mut R,
    ) -> Result<Array1<f64>> {
        let ws = self.model.split_weights(w)?;
        let g = self.raw_example_gradient(x, y, &ws, rng)?;
        Ok(self.penalty.gradient(g, w))
    }

    fn raw_example_gradient<R: Rng + ?Sized>(
        &self,
        x: &Array2<f64>,
        y: &[usize],
        ws: &Blocks,
        rng: &mut R,
    ) -> Result<Array1<f64>> {
        let features = self.features();
        match self.strategy {
            Strategy::FullLikelihood => {
                let expected = features.expectation(self.engine, x, ws, None, rng)?;
                Ok(features.feat(x, y) - expected)
            }
            Strategy::StochasticLikelihood => {
                let expected = features.expectation(self.engine, x, ws, Some(y), rng)?;
                Ok(features.feat(x, y) - expected)
            }
            Strategy::PseudoLikelihood(count) => Ok(self.pl_gradient(x, y, ws, count)),
        }
    }

    fn pl_value(&self, x: &Array2<f64>, y: &[usize], ws: &Blocks, count: EnergyCount) -> f64 {
        let energy = self.model.energy(x, y, ws);
        let mut s = match count {
            EnergyCount::PerSequence => energy,
            EnergyCount::PerPosition => 0.0,
        };
        for i in 0..y.len() {
            if count == EnergyCount::PerPosition {
                s += energy;
            }
            s += self.model.pl_log_partition(x, y, ws, i);
        }
        s
    }

    fn pl_gradient(
        &self,
        x: &Array2<f64>,
        y: &[usize],
        ws: &Blocks,
        count: EnergyCount,
    ) -> Array1<f64> {
        let empirical = self.features().feat(x, y);
        let mut g = match count {
            EnergyCount::PerSequence => empirical.clone(),
            EnergyCount::PerPosition => Array1::zeros(empirical.len()),
        };
        for i in 0..y.len() {
            if count == EnergyCount::PerPosition {
                g += &empirical;
            }
            g -= &self.pl_expectation(x, y, ws, i);
        }
        g
    }

    /// Statistics expected under the conditional of position `i`
    fn pl_expectation(&self, x: &Array2<f64>, y: &[usize], ws: &Blocks, i: usize) -> Array1<f64> {
        let features = self.features();
        let log_z = self.model.pl_log_partition(x, y, ws, i);
        let mut s = Array1::zeros(self.model.n_weights());
        for l in self.model.labels() {
            let p = (self.model.pl_energy(x, y, ws, i, l) - log_z).exp();
            s.scaled_add(p, &features.feat(x, &self.model.set_label(y, i, l)));
        }
        s
    }
}

/// Forward-difference approximation of the gradient of `f` at `w`
pub fn approx_gradient<F>(w: ArrayView1<f64>, mut f: F) -> Result<Array1<f64>>
where
    F: FnMut(ArrayView1<f64>) -> Result<f64>,
{
    let eps = f64::EPSILON.sqrt();
    let f0 = f(w)?;
    let mut shifted = w.to_owned();
    let mut grad = Array1::zeros(w.len());
    for k in 0..w.len() {
        shifted[k] += eps;
        grad[k] = (f(shifted.view())? - f0) / eps;
        shifted[k] = w[k];
    }
    Ok(grad)
}
