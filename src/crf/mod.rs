//! A linear-chain CRF over dense observation vectors
//!
//! Node potentials score each position's observation row against a per-label
//! weight row; edge potentials scale a label-pair weight by an
//! [`EdgeFeature`].

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Blocks, ChainModel, GibbsSchedule};

mod context;
mod gibbs;

pub(crate) use self::context::logsumexp;
use self::context::Lattice;

/// Value of the edge feature between two adjacent positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EdgeFeature {
    /// Constant 1 for every label pair (plain transition weights)
    #[default]
    Indicator,
    /// 1 when both labels agree, 0 otherwise
    Potts,
}

/// Linear-chain CRF with exact forward inference and a Gibbs sampler
#[derive(Debug, Clone)]
pub struct ChainCrf {
    num_labels: usize,
    num_features: usize,
    edge: EdgeFeature,
}

impl ChainCrf {
    pub fn new(num_labels: usize, num_features: usize) -> Result<Self> {
        if num_labels < 1 {
            return Err(Error::invalid("num_labels must be at least 1"));
        }
        if num_features < 1 {
            return Err(Error::invalid("num_features must be at least 1"));
        }
        Ok(Self {
            num_labels,
            num_features,
            edge: EdgeFeature::default(),
        })
    }

    pub fn with_edge_feature(mut self, edge: EdgeFeature) -> Self {
        self.edge = edge;
        self
    }

    pub fn edge_feature(&self) -> EdgeFeature {
        self.edge
    }

    fn check_sequence(&self, x: &Array2<f64>) -> Result<()> {
        if x.nrows() == 0 {
            return Err(Error::invalid("empty sequences are not allowed"));
        }
        if x.ncols() != self.num_features {
            return Err(Error::invalid(format!(
                "observation has {} features, expected {}",
                x.ncols(),
                self.num_features
            )));
        }
        Ok(())
    }
}

impl ChainModel for ChainCrf {
    fn n_labels(&self) -> usize {
        self.num_labels
    }

    fn n_features(&self) -> usize {
        self.num_features
    }

    fn edge_feat(&self, _x: &Array2<f64>, _i: usize, _j: usize, li: usize, lj: usize) -> f64 {
        match self.edge {
            EdgeFeature::Indicator => 1.0,
            EdgeFeature::Potts if li == lj => 1.0,
            EdgeFeature::Potts => 0.0,
        }
    }

    fn log_partition(&self, x: &Array2<f64>, ws: &Blocks) -> Result<f64> {
        self.check_sequence(x)?;
        let log_z = Lattice::new(self, x, ws).forward(&[]);
        if !log_z.is_finite() {
            return Err(Error::Numerical(format!(
                "log partition function is {}",
                log_z
            )));
        }
        Ok(log_z)
    }

    fn log_marginal(
        &self,
        x: &Array2<f64>,
        ws: &Blocks,
        assignments: &[(usize, usize)],
    ) -> Result<f64> {
        self.check_sequence(x)?;
        if let Some(&(t, l)) = assignments
            .iter()
            .find(|&&(t, l)| t >= x.nrows() || l >= self.num_labels)
        {
            return Err(Error::invalid(format!(
                "assignment ({}, {}) is out of range",
                t, l
            )));
        }
        let log_m = Lattice::new(self, x, ws).forward(assignments);
        if log_m.is_nan() || log_m == f64::INFINITY {
            return Err(Error::Numerical(format!("log marginal is {}", log_m)));
        }
        Ok(log_m)
    }

    fn map(&self, x: &Array2<f64>, ws: &Blocks) -> Vec<usize> {
        if x.nrows() == 0 {
            return Vec::new();
        }
        Lattice::new(self, x, ws).viterbi()
    }

    fn gibbs<R: Rng + ?Sized>(
        &self,
        x: &Array2<f64>,
        ws: &Blocks,
        schedule: GibbsSchedule,
        init: Option<&[usize]>,
        rng: &mut R,
    ) -> Result<Vec<Vec<usize>>> {
        self.check_sequence(x)?;
        gibbs::sample(self, x, ws, schedule, init, rng)
    }
}
