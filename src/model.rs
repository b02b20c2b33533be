use std::ops::Range;

use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crf::logsumexp;
use crate::error::{Error, Result};

/// Node and edge blocks of a weight or sufficient-statistic vector
///
/// The flat layout is always the node block (`[L][F]`, one row per label)
/// followed by the edge block (`[L][L]`, row = left label), both row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Blocks {
    /// Node block, `[L][F]`
    pub node: Array2<f64>,
    /// Edge block, `[L][L]`
    pub edge: Array2<f64>,
}

impl Blocks {
    pub fn zeros(node_shape: (usize, usize), edge_shape: (usize, usize)) -> Self {
        Self {
            node: Array2::zeros(node_shape),
            edge: Array2::zeros(edge_shape),
        }
    }

    /// Concatenate both blocks into one flat vector
    pub fn flatten(&self) -> Array1<f64> {
        let mut flat = Vec::with_capacity(self.node.len() + self.edge.len());
        flat.extend(self.node.iter());
        flat.extend(self.edge.iter());
        Array1::from(flat)
    }
}

/// Burn-in and thinning schedule of a Gibbs chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GibbsSchedule {
    /// Number of samples to collect
    pub n_samples: usize,
    /// Sweeps discarded before the first sample
    pub burn: usize,
    /// Sweeps between consecutive samples
    pub interval: usize,
}

/// The chain-structured model a learner estimates weights for.
///
/// Implementors provide exact inference (partition function, clamped
/// marginals, MAP) and a Gibbs sampler; the energy and pseudo-likelihood
/// primitives have default implementations in terms of [`edge_feat`].
///
/// The probability of a labeling is `exp(-energy(x, y)) / exp(Z(x))`.
///
/// [`edge_feat`]: ChainModel::edge_feat
pub trait ChainModel {
    /// Number of labels `L`
    fn n_labels(&self) -> usize;

    /// Number of observation features `F` per position
    fn n_features(&self) -> usize;

    /// Scalar edge feature between positions `i` and `j` labeled `li`, `lj`
    fn edge_feat(&self, x: &Array2<f64>, i: usize, j: usize, li: usize, lj: usize) -> f64;

    /// Log partition function `log sum_y exp(-energy(x, y))`
    fn log_partition(&self, x: &Array2<f64>, ws: &Blocks) -> Result<f64>;

    /// Log of the unnormalized mass of all labelings agreeing with
    /// `assignments`, a list of `(position, label)` pairs
    fn log_marginal(&self, x: &Array2<f64>, ws: &Blocks, assignments: &[(usize, usize)])
        -> Result<f64>;

    /// Most probable labeling
    fn map(&self, x: &Array2<f64>, ws: &Blocks) -> Vec<usize>;

    /// Draw `schedule.n_samples` labelings from a Gibbs chain started at
    /// `init`, or at a uniformly random labeling when `init` is `None`
    fn gibbs<R: Rng + ?Sized>(
        &self,
        x: &Array2<f64>,
        ws: &Blocks,
        schedule: GibbsSchedule,
        init: Option<&[usize]>,
        rng: &mut R,
    ) -> Result<Vec<Vec<usize>>>;

    fn unary_shape(&self) -> (usize, usize) {
        (self.n_labels(), self.n_features())
    }

    fn pairwise_shape(&self) -> (usize, usize) {
        (self.n_labels(), self.n_labels())
    }

    /// Length of the flat weight vector
    fn n_weights(&self) -> usize {
        let (ul, uf) = self.unary_shape();
        let (bl, br) = self.pairwise_shape();
        ul * uf + bl * br
    }

    fn labels(&self) -> Range<usize> {
        0..self.n_labels()
    }

    /// Every label tuple of length `k`, in lexicographic order
    fn configs(&self, k: usize) -> Vec<Vec<usize>> {
        let n = self.n_labels();
        let mut out = vec![Vec::with_capacity(k)];
        for _ in 0..k {
            out = out
                .into_iter()
                .flat_map(|prefix| {
                    (0..n).map(move |l| {
                        let mut next = prefix.clone();
                        next.push(l);
                        next
                    })
                })
                .collect();
        }
        out
    }

    /// Reshape a flat weight vector into node and edge blocks
    fn split_weights(&self, w: ArrayView1<f64>) -> Result<Blocks> {
        if w.len() != self.n_weights() {
            return Err(Error::invalid(format!(
                "weight vector has length {}, expected {}",
                w.len(),
                self.n_weights()
            )));
        }
        let (ul, uf) = self.unary_shape();
        let offset = ul * uf;
        let (_, br) = self.pairwise_shape();
        Ok(Blocks {
            node: Array2::from_shape_fn((ul, uf), |(a, b)| w[a * uf + b]),
            edge: Array2::from_shape_fn(self.pairwise_shape(), |(a, b)| w[offset + a * br + b]),
        })
    }

    /// Copy of `y` with position `i` relabeled to `l`
    fn set_label(&self, y: &[usize], i: usize, l: usize) -> Vec<usize> {
        let mut relabeled = y.to_vec();
        relabeled[i] = l;
        relabeled
    }

    /// Energy `W . feat(x, y)` of a labeling
    fn energy(&self, x: &Array2<f64>, y: &[usize], ws: &Blocks) -> f64 {
        let mut e = 0.0;
        for (i, &label) in y.iter().enumerate() {
            e += ws.node.row(label).dot(&x.row(i));
        }
        for i in 1..y.len() {
            let (a, b) = (y[i - 1], y[i]);
            e += ws.edge[[a, b]] * self.edge_feat(x, i - 1, i, a, b);
        }
        e
    }

    /// Log-potential `-energy(x, y[i <- l])` of relabeling position `i`
    fn pl_energy(&self, x: &Array2<f64>, y: &[usize], ws: &Blocks, i: usize, l: usize) -> f64 {
        let rest = self.energy(x, y, ws) - local_energy(self, x, y, ws, i, y[i]);
        -(rest + local_energy(self, x, y, ws, i, l))
    }

    /// Log normalizer of position `i` conditioned on every other label of `y`
    fn pl_log_partition(&self, x: &Array2<f64>, y: &[usize], ws: &Blocks, i: usize) -> f64 {
        let rest = self.energy(x, y, ws) - local_energy(self, x, y, ws, i, y[i]);
        let scores: Vec<f64> = self
            .labels()
            .map(|l| -(rest + local_energy(self, x, y, ws, i, l)))
            .collect();
        logsumexp(&scores)
    }
}

/// Energy terms touching position `i` when it carries label `l` and its
/// neighbours keep their labels from `y`
pub(crate) fn local_energy<M: ChainModel + ?Sized>(
    model: &M,
    x: &Array2<f64>,
    y: &[usize],
    ws: &Blocks,
    i: usize,
    l: usize,
) -> f64 {
    let mut e = ws.node.row(l).dot(&x.row(i));
    if i > 0 {
        let prev = y[i - 1];
        e += ws.edge[[prev, l]] * model.edge_feat(x, i - 1, i, prev, l);
    }
    if i + 1 < y.len() {
        let next = y[i + 1];
        e += ws.edge[[l, next]] * model.edge_feat(x, i, i + 1, l, next);
    }
    e
}
