use std::ops::RangeInclusive;

use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};

/// A labeled observation sequence
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    /// Observations, one row of features per position
    pub x: Array2<f64>,
    /// Label index of every position
    pub y: Vec<usize>,
}

impl Sequence {
    pub fn new(x: Array2<f64>, y: Vec<usize>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(Error::invalid("x and y must have the same length"));
        }
        if y.is_empty() {
            return Err(Error::invalid("empty sequences are not allowed"));
        }
        Ok(Self { x, y })
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Number of observation features per position
    pub fn num_features(&self) -> usize {
        self.x.ncols()
    }
}

/// Training, validation and test splits of labeled sequences
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    train: Vec<Sequence>,
    validation: Vec<Sequence>,
    test: Vec<Sequence>,
}

impl Dataset {
    pub fn new(
        train: Vec<Sequence>,
        validation: Vec<Sequence>,
        test: Vec<Sequence>,
    ) -> Result<Self> {
        if train.is_empty() {
            return Err(Error::invalid("no training data"));
        }
        let num_features = train[0].num_features();
        let consistent = train
            .iter()
            .chain(&validation)
            .chain(&test)
            .all(|seq| seq.num_features() == num_features);
        if !consistent {
            return Err(Error::invalid(
                "all sequences must have the same number of features",
            ));
        }
        Ok(Self {
            train,
            validation,
            test,
        })
    }

    /// Shuffle `examples` and carve off test and validation fractions of the
    /// total; the remainder is used for training.
    pub fn split<R: Rng + ?Sized>(
        mut examples: Vec<Sequence>,
        val_pct: f64,
        test_pct: f64,
        rng: &mut R,
    ) -> Result<Self> {
        if !(0.0..1.0).contains(&val_pct) || !(0.0..1.0).contains(&test_pct) {
            return Err(Error::invalid("split fractions must be in [0, 1)"));
        }
        if val_pct + test_pct >= 1.0 {
            return Err(Error::invalid(
                "validation and test fractions leave no training data",
            ));
        }
        examples.shuffle(rng);
        let n = examples.len() as f64;
        let num_test = (n * test_pct).round() as usize;
        let num_val = (n * val_pct).round() as usize;

        let mut rest = examples.split_off(num_test.min(examples.len()));
        let test = examples;
        let train = rest.split_off(num_val.min(rest.len()));
        let validation = rest;
        Self::new(train, validation, test)
    }

    pub fn train(&self) -> &[Sequence] {
        &self.train
    }

    pub fn validation(&self) -> &[Sequence] {
        &self.validation
    }

    pub fn test(&self) -> &[Sequence] {
        &self.test
    }

    /// Iterate over the `(x, y)` pairs of the training split
    pub fn train_pairs(&self) -> impl Iterator<Item = (&Array2<f64>, &[usize])> {
        self.train.iter().map(|seq| (&seq.x, seq.y.as_slice()))
    }

    pub fn num_train(&self) -> usize {
        self.train.len()
    }

    /// Sizes of the training, validation and test splits
    pub fn sizes(&self) -> (usize, usize, usize) {
        (self.train.len(), self.validation.len(), self.test.len())
    }

    pub fn num_features(&self) -> usize {
        self.train.first().map_or(0, Sequence::num_features)
    }

    /// Largest label index used anywhere in the dataset
    pub(crate) fn max_label(&self) -> Option<usize> {
        self.train
            .iter()
            .chain(&self.validation)
            .chain(&self.test)
            .flat_map(|seq| seq.y.iter().copied())
            .max()
    }
}

/// Generate `n` random sequences with lengths drawn from `lengths`.
///
/// Labels follow a sticky Markov chain and each observation carries a
/// unit bump on the feature assigned to its label plus uniform noise, so the
/// data is learnable by a chain CRF.
pub fn synthetic<R: Rng + ?Sized>(
    n: usize,
    lengths: RangeInclusive<usize>,
    num_features: usize,
    num_labels: usize,
    rng: &mut R,
) -> Result<Vec<Sequence>> {
    if num_features == 0 || num_labels == 0 {
        return Err(Error::invalid(
            "num_features and num_labels must be at least 1",
        ));
    }
    if *lengths.start() == 0 || lengths.is_empty() {
        return Err(Error::invalid("sequence lengths must be at least 1"));
    }

    let mut sequences = Vec::with_capacity(n);
    for _ in 0..n {
        let len = rng.gen_range(lengths.clone());
        let mut y = Vec::with_capacity(len);
        let mut label = rng.gen_range(0..num_labels);
        for _ in 0..len {
            if rng.gen::<f64>() > 0.7 {
                label = rng.gen_range(0..num_labels);
            }
            y.push(label);
        }
        let x = Array2::from_shape_fn((len, num_features), |(t, f)| {
            let bump = if f == y[t] % num_features { 1.0 } else { 0.0 };
            bump + 0.5 * rng.gen::<f64>()
        });
        sequences.push(Sequence::new(x, y)?);
    }
    Ok(sequences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sequence_rejects_mismatched_lengths() {
        let err = Sequence::new(Array2::zeros((3, 2)), vec![0, 1]).unwrap_err();
        assert_eq!(err.to_string(), "x and y must have the same length");

        let err = Sequence::new(Array2::zeros((0, 2)), vec![]).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_split_sizes() {
        let mut rng = StdRng::seed_from_u64(7);
        let examples = synthetic(20, 2..=4, 3, 2, &mut rng).unwrap();
        let data = Dataset::split(examples, 0.25, 0.25, &mut rng).unwrap();
        assert_eq!(data.sizes(), (10, 5, 5));
        assert_eq!(data.num_features(), 3);
        assert_eq!(data.train_pairs().count(), 10);
    }

    #[test]
    fn test_split_rejects_empty_training_split() {
        let mut rng = StdRng::seed_from_u64(7);
        let examples = synthetic(4, 2..=2, 3, 2, &mut rng).unwrap();
        assert!(Dataset::split(examples, 0.5, 0.5, &mut rng).is_err());
    }

    #[test]
    fn test_synthetic_shapes() {
        let mut rng = StdRng::seed_from_u64(1);
        let examples = synthetic(8, 4..=8, 10, 5, &mut rng).unwrap();
        assert_eq!(examples.len(), 8);
        for seq in &examples {
            assert!((4..=8).contains(&seq.len()));
            assert_eq!(seq.num_features(), 10);
            assert!(seq.y.iter().all(|&l| l < 5));
        }
    }
}
