use crate::error::{Error, Result};

/// Loss values produced by one evaluation, one entry per metric
pub type LossVector = Vec<f64>;

/// Scores predicted label sequences against the truth
pub trait Evaluator {
    /// Compute the loss vector of `predicted` against `truth`
    fn evaluate(&self, truth: &[&[usize]], predicted: &[Vec<usize>]) -> Result<LossVector>;

    /// Human-readable rendering of every entry of `loss`
    fn names(&self, loss: &[f64]) -> Vec<String>;
}

/// Per-position and whole-sequence error rates
#[derive(Debug, Clone, Copy, Default)]
pub struct HammingEvaluator;

impl HammingEvaluator {
    const NAMES: [&'static str; 2] = ["hamming", "sequence"];
}

impl Evaluator for HammingEvaluator {
    fn evaluate(&self, truth: &[&[usize]], predicted: &[Vec<usize>]) -> Result<LossVector> {
        if truth.len() != predicted.len() {
            return Err(Error::invalid(
                "truth and predictions must have the same number of sequences",
            ));
        }
        let mut positions = 0usize;
        let mut wrong_positions = 0usize;
        let mut wrong_sequences = 0usize;
        for (t, p) in truth.iter().zip(predicted) {
            if t.len() != p.len() {
                return Err(Error::invalid(
                    "predicted sequence length differs from the truth",
                ));
            }
            let wrong = t.iter().zip(p).filter(|(a, b)| a != b).count();
            positions += t.len();
            wrong_positions += wrong;
            if wrong > 0 {
                wrong_sequences += 1;
            }
        }
        if truth.is_empty() {
            return Ok(vec![0.0, 0.0]);
        }
        Ok(vec![
            wrong_positions as f64 / positions.max(1) as f64,
            wrong_sequences as f64 / truth.len() as f64,
        ])
    }

    fn names(&self, loss: &[f64]) -> Vec<String> {
        loss.iter()
            .enumerate()
            .map(|(i, v)| match Self::NAMES.get(i) {
                Some(name) => format!("{}={:.4}", name, v),
                None => format!("loss{}={:.4}", i, v),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_evaluator() {
        let ev = HammingEvaluator;
        let truth: Vec<&[usize]> = vec![&[0, 1, 1][..], &[1, 1][..]];
        let predicted = vec![vec![0, 1, 0], vec![1, 1]];
        let loss = ev.evaluate(&truth, &predicted).unwrap();
        assert_eq!(loss, vec![0.2, 0.5]);
        assert_eq!(ev.names(&loss), vec!["hamming=0.2000", "sequence=0.5000"]);
    }

    #[test]
    fn test_hamming_evaluator_rejects_mismatch() {
        let ev = HammingEvaluator;
        let truth: Vec<&[usize]> = vec![&[0, 1][..]];
        assert!(ev.evaluate(&truth, &[]).is_err());
        assert!(ev.evaluate(&truth, &[vec![0]]).is_err());
        assert_eq!(ev.evaluate(&[], &[]).unwrap(), vec![0.0, 0.0]);
    }
}
