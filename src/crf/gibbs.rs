use ndarray::Array2;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use super::context::logsumexp;
use crate::error::{Error, Result};
use crate::model::{local_energy, Blocks, ChainModel, GibbsSchedule};

/// Run a single-site Gibbs chain over the labels of `x`.
///
/// After `schedule.burn` sweeps, every sample is taken after another
/// `schedule.interval` sweeps, so `burn = 0, interval = 1` seeded with the
/// true labels is one step of contrastive divergence.
pub(crate) fn sample<M, R>(
    model: &M,
    x: &Array2<f64>,
    ws: &Blocks,
    schedule: GibbsSchedule,
    init: Option<&[usize]>,
    rng: &mut R,
) -> Result<Vec<Vec<usize>>>
where
    M: ChainModel + ?Sized,
    R: Rng + ?Sized,
{
    let num_items = x.nrows();
    let num_labels = model.n_labels();
    let mut y = match init {
        Some(init) => {
            if init.len() != num_items {
                return Err(Error::invalid("Gibbs seed must match the sequence length"));
            }
            init.to_vec()
        }
        None => (0..num_items).map(|_| rng.gen_range(0..num_labels)).collect(),
    };

    let mut logits = vec![0.0; num_labels];
    for _ in 0..schedule.burn {
        sweep(model, x, ws, &mut y, &mut logits, rng)?;
    }

    let mut samples = Vec::with_capacity(schedule.n_samples);
    for _ in 0..schedule.n_samples {
        for _ in 0..schedule.interval {
            sweep(model, x, ws, &mut y, &mut logits, rng)?;
        }
        samples.push(y.clone());
    }
    Ok(samples)
}

/// Resample every position once, left to right
fn sweep<M, R>(
    model: &M,
    x: &Array2<f64>,
    ws: &Blocks,
    y: &mut [usize],
    logits: &mut [f64],
    rng: &mut R,
) -> Result<()>
where
    M: ChainModel + ?Sized,
    R: Rng + ?Sized,
{
    for i in 0..y.len() {
        for (l, logit) in logits.iter_mut().enumerate() {
            *logit = -local_energy(model, x, y, ws, i, l);
        }
        let norm = logsumexp(logits);
        if !norm.is_finite() {
            return Err(Error::Numerical(format!(
                "non-finite Gibbs conditional at position {}",
                i
            )));
        }
        let dist = WeightedIndex::new(logits.iter().map(|&v| (v - norm).exp()))
            .map_err(|e| Error::Numerical(format!("Gibbs conditional at position {}: {}", i, e)))?;
        y[i] = dist.sample(rng);
    }
    Ok(())
}
