use ndarray::{Array2, Array3};

use crate::model::{Blocks, ChainModel};

/// Log-sum-exp trick for numerical stability.
///
/// Computes log(sum(exp(values))) in a numerically stable way.
/// Returns NEG_INFINITY for empty arrays or arrays where all values are NEG_INFINITY.
pub(crate) fn logsumexp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max_val = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    let sum: f64 = values.iter().map(|&v| (v - max_val).exp()).sum();
    max_val + sum.ln()
}

/// Score lattice of one observation sequence
///
/// Scores are negated energies, so `alpha` accumulates
/// `log sum exp(-energy)` over label prefixes.
pub(crate) struct Lattice {
    /// Number of labels
    num_labels: usize,
    /// Sequence length
    num_items: usize,
    /// State scores [time][label]
    state_scores: Array2<f64>,
    /// Transition scores [time][prev_label][label]; slot 0 is unused
    trans_scores: Array3<f64>,
    /// Forward variables (in log space) [time][label]
    alpha: Array2<f64>,
}

impl Lattice {
    /// Compute state and transition scores of `x` under weights `ws`
    pub fn new<M: ChainModel + ?Sized>(model: &M, x: &Array2<f64>, ws: &Blocks) -> Self {
        let num_labels = model.n_labels();
        let num_items = x.nrows();

        let mut state_scores = Array2::zeros((num_items, num_labels));
        for t in 0..num_items {
            for l in 0..num_labels {
                state_scores[[t, l]] = -ws.node.row(l).dot(&x.row(t));
            }
        }

        let mut trans_scores = Array3::zeros((num_items, num_labels, num_labels));
        for t in 1..num_items {
            for prev_l in 0..num_labels {
                for l in 0..num_labels {
                    let feat = model.edge_feat(x, t - 1, t, prev_l, l);
                    trans_scores[[t, prev_l, l]] = -ws.edge[[prev_l, l]] * feat;
                }
            }
        }

        Self {
            num_labels,
            num_items,
            state_scores,
            trans_scores,
            alpha: Array2::from_elem((num_items, num_labels), f64::NEG_INFINITY),
        }
    }

    /// Forward algorithm in log space.
    ///
    /// Positions listed in `clamp` may only take the paired label; every
    /// other path is excluded. An empty `clamp` yields the log partition
    /// function.
    pub fn forward(&mut self, clamp: &[(usize, usize)]) -> f64 {
        let mut allowed = vec![None; self.num_items];
        for &(t, l) in clamp {
            allowed[t] = match allowed[t] {
                // Contradicting clamps exclude every path
                Some(prev) if prev != l => Some(usize::MAX),
                _ => Some(l),
            };
        }
        let open = |t: usize, l: usize| allowed[t].map_or(true, |c| c == l);

        // Initialize at t=0
        for l in 0..self.num_labels {
            self.alpha[[0, l]] = if open(0, l) {
                self.state_scores[[0, l]]
            } else {
                f64::NEG_INFINITY
            };
        }

        // Forward recursion
        let mut log_values = Vec::with_capacity(self.num_labels);
        for t in 1..self.num_items {
            for l in 0..self.num_labels {
                if !open(t, l) {
                    self.alpha[[t, l]] = f64::NEG_INFINITY;
                    continue;
                }
                log_values.clear();
                for prev_l in 0..self.num_labels {
                    log_values.push(
                        self.alpha[[t - 1, prev_l]]
                            + self.trans_scores[[t, prev_l, l]]
                            + self.state_scores[[t, l]],
                    );
                }
                self.alpha[[t, l]] = logsumexp(&log_values);
            }
        }

        let last: Vec<f64> = self.alpha.row(self.num_items - 1).to_vec();
        logsumexp(&last)
    }

    /// Viterbi decoding; ties resolve to the smallest label index
    pub fn viterbi(&self) -> Vec<usize> {
        let l = self.num_labels;
        let t = self.num_items;
        let mut score = Array2::<f64>::zeros((t, l));
        let mut backward_edge = Array2::<usize>::zeros((t, l));

        // Compute the scores at (0, *)
        for j in 0..l {
            score[[0, j]] = self.state_scores[[0, j]];
        }

        // Compute the scores at (t, *)
        for time in 1..t {
            for j in 0..l {
                let mut max_score = f64::NEG_INFINITY;
                let mut argmax_score = 0;
                for i in 0..l {
                    // Transit from (t-1, i) to (t, j)
                    let s = score[[time - 1, i]] + self.trans_scores[[time, i, j]];
                    if max_score < s {
                        max_score = s;
                        argmax_score = i;
                    }
                }
                // Backward link (#t, #j) -> (#t-1, #i)
                backward_edge[[time, j]] = argmax_score;
                score[[time, j]] = max_score + self.state_scores[[time, j]];
            }
        }

        // Find the label at the last position with the maximum score
        let mut labels = vec![0; t];
        let mut max_score = f64::NEG_INFINITY;
        for (i, &s) in score.row(t - 1).iter().enumerate() {
            if max_score < s {
                max_score = s;
                labels[t - 1] = i;
            }
        }

        // Tag labels by tracing the backward links
        for time in (0..t - 1).rev() {
            labels[time] = backward_edge[[time + 1, labels[time + 1]]];
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logsumexp() {
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
        assert_eq!(logsumexp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
        let v = logsumexp(&[0.0, 0.0]);
        assert!((v - 2f64.ln()).abs() < 1e-12);
        let big = logsumexp(&[1000.0, 1000.0]);
        assert!((big - (1000.0 + 2f64.ln())).abs() < 1e-9);
    }
}
