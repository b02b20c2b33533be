use std::path::PathBuf;
use std::time::Instant;

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::checkpoint::{OutputLocation, ResultStore, RunRecord};
use super::features::{ExpectationEngine, Features, GibbsParams};
use super::objective::{approx_gradient, Objective, Strategy, L2};
use super::progress::{CancelToken, Observer, ProgressEvent, Reporter, Termination};
use crate::dataset::{Dataset, Sequence};
use crate::error::{Error, Result};
use crate::evaluation::{Evaluator, HammingEvaluator, LossVector};
use crate::model::ChainModel;

mod lbfgs;
mod sgd;

pub use self::lbfgs::{LbfgsParams, LineSearchAlgorithm};
pub use self::sgd::{learning_rate, SgdParams};

/// Initial weight policy, applied only when the learner has no weights yet
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WeightInit {
    /// Use this vector
    Explicit(Array1<f64>),
    /// Uniform in `[0, 1)`
    Random,
    #[default]
    Zeros,
}

/// What an optimization driver hands back
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub weights: Array1<f64>,
    pub val_loss: Vec<LossVector>,
    pub snapshots: Vec<Array1<f64>>,
    pub termination: Termination,
}

/// Result of a training entry point: optimization, test and save stages
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub outcome: TrainOutcome,
    pub test_loss: LossVector,
    pub saved_to: PathBuf,
}

/// Optimization driver of a run and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DriverParams {
    Lbfgs(LbfgsParams),
    Sgd(SgdParams),
}

/// Training configuration stored in a run's `run.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub strategy: Strategy,
    pub engine: ExpectationEngine,
    pub params: DriverParams,
}

/// Validation losses and the weights they were measured at
#[derive(Debug, Clone, Default)]
struct History {
    val_loss: Vec<LossVector>,
    snapshots: Vec<Array1<f64>>,
}

/// Chain CRF parameter learner
///
/// Owns the model, the data splits, the weight vector and the validation
/// history of one training run.
pub struct Learner<M: ChainModel, E: Evaluator = HammingEvaluator> {
    model: M,
    data: Dataset,
    strategy: Strategy,
    engine: ExpectationEngine,
    evaluator: E,
    rng: StdRng,
    cancel: CancelToken,
    reporter: Reporter,
    /// Current weights; `None` until initialized
    weights: Option<Array1<f64>>,
    /// `None` until a training driver starts
    history: Option<History>,
    test_loss: Option<LossVector>,
    /// Configuration of the last driver run
    config: Option<RunConfig>,
    /// Seconds spent in the last optimization driver
    train_time: Option<f64>,
}

impl<M: ChainModel> Learner<M> {
    /// Create a learner with exact expectations and the Hamming evaluator
    pub fn new(model: M, data: Dataset, strategy: Strategy) -> Result<Self> {
        if data.num_features() != model.n_features() {
            return Err(Error::invalid(format!(
                "data has {} features, model expects {}",
                data.num_features(),
                model.n_features()
            )));
        }
        if data.max_label().map_or(false, |l| l >= model.n_labels()) {
            return Err(Error::invalid("data uses a label outside the model's label set"));
        }
        Ok(Self {
            model,
            data,
            strategy,
            engine: ExpectationEngine::Exact,
            evaluator: HammingEvaluator,
            rng: StdRng::from_entropy(),
            cancel: CancelToken::new(),
            reporter: Reporter::default(),
            weights: None,
            history: None,
            test_loss: None,
            config: None,
            train_time: None,
        })
    }
}

impl<M: ChainModel, E: Evaluator> Learner<M, E> {
    /// Approximate expectations with Gibbs sampling
    pub fn with_gibbs(mut self, params: GibbsParams) -> Self {
        self.engine = ExpectationEngine::Gibbs(params);
        self
    }

    /// Replace the evaluator used for validation and test losses
    pub fn with_evaluator<E2: Evaluator>(self, evaluator: E2) -> Learner<M, E2> {
        Learner {
            model: self.model,
            data: self.data,
            strategy: self.strategy,
            engine: self.engine,
            evaluator,
            rng: self.rng,
            cancel: self.cancel,
            reporter: self.reporter,
            weights: self.weights,
            history: self.history,
            test_loss: self.test_loss,
            config: self.config,
            train_time: self.train_time,
        }
    }

    /// Seed the random generator used for initialization, index draws and
    /// Gibbs chains
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Subscribe to the progress-event stream
    pub fn with_observer<O: Observer + Send + 'static>(mut self, observer: O) -> Self {
        self.reporter.set_observer(Box::new(observer));
        self
    }

    /// Enable or disable per-iteration logging at info level
    pub fn verbose(&mut self, enabled: bool) -> &mut Self {
        self.reporter.set_verbose(enabled);
        self
    }

    /// Token that stops the running driver at its next loop boundary
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn data(&self) -> &Dataset {
        &self.data
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn engine(&self) -> &ExpectationEngine {
        &self.engine
    }

    pub fn weights(&self) -> Option<&Array1<f64>> {
        self.weights.as_ref()
    }

    pub fn val_loss(&self) -> &[LossVector] {
        self.history.as_ref().map_or(&[][..], |h| h.val_loss.as_slice())
    }

    pub fn snapshots(&self) -> &[Array1<f64>] {
        self.history.as_ref().map_or(&[][..], |h| h.snapshots.as_slice())
    }

    pub fn test_loss(&self) -> Option<&LossVector> {
        self.test_loss.as_ref()
    }

    pub fn config(&self) -> Option<&RunConfig> {
        self.config.as_ref()
    }

    /// Initialize the weight vector, replacing any existing one
    pub fn init_weights(&mut self, init: WeightInit) -> Result<&Array1<f64>> {
        let n = self.model.n_weights();
        let w = match init {
            WeightInit::Explicit(w) => {
                if w.len() != n {
                    return Err(Error::invalid(format!(
                        "weight vector has length {}, expected {}",
                        w.len(),
                        n
                    )));
                }
                w
            }
            WeightInit::Random => (0..n).map(|_| self.rng.gen::<f64>()).collect(),
            WeightInit::Zeros => Array1::zeros(n),
        };
        Ok(&*self.weights.insert(w))
    }

    fn ensure_weights(&mut self, init: WeightInit) -> Result<()> {
        if self.weights.is_none() {
            self.init_weights(init)?;
        } else {
            tracing::debug!("keeping existing weights, init policy ignored");
        }
        Ok(())
    }

    fn objective(&self, reg: f64) -> Result<Objective<'_, M>> {
        Ok(Objective::new(&self.model, self.strategy, &self.engine).regularized(L2::new(reg)?))
    }

    /// Check that `y` labels every row of `x` with a label of the model
    fn check_example(&self, x: &Array2<f64>, y: &[usize]) -> Result<()> {
        if x.ncols() != self.model.n_features() {
            return Err(Error::invalid(format!(
                "observation has {} features, model expects {}",
                x.ncols(),
                self.model.n_features()
            )));
        }
        if y.is_empty() {
            return Err(Error::invalid("empty sequences are not allowed"));
        }
        if y.len() != x.nrows() {
            return Err(Error::invalid("x and y must have the same length"));
        }
        if y.iter().any(|&l| l >= self.model.n_labels()) {
            return Err(Error::invalid("labeling uses a label outside the model's label set"));
        }
        Ok(())
    }

    /// Sufficient statistics of labeling `y`
    pub fn feat(&self, x: &Array2<f64>, y: &[usize]) -> Result<Array1<f64>> {
        self.check_example(x, y)?;
        Ok(Features::new(&self.model).feat(x, y))
    }

    /// Expected sufficient statistics of `x` under `w` through the
    /// configured engine
    pub fn expected_features(
        &mut self,
        x: &Array2<f64>,
        w: ArrayView1<f64>,
        seed: Option<&[usize]>,
    ) -> Result<Array1<f64>> {
        if let Some(seed) = seed {
            self.check_example(x, seed)?;
        }
        let ws = self.model.split_weights(w)?;
        Features::new(&self.model).expectation(&self.engine, x, &ws, seed, &mut self.rng)
    }

    /// Objective at `w`, with an L2 penalty when `reg > 0`
    pub fn objective_value(&self, w: ArrayView1<f64>, reg: f64) -> Result<f64> {
        self.objective(reg)?.value(&self.data, w)
    }

    /// Gradient at `w`, with an L2 penalty when `reg > 0`
    pub fn gradient(&mut self, w: ArrayView1<f64>, reg: f64) -> Result<Array1<f64>> {
        let objective = Objective::new(&self.model, self.strategy, &self.engine)
            .regularized(L2::new(reg)?);
        objective.gradient(&self.data, w, &mut self.rng)
    }

    /// Single-example gradient at `w`, with an L2 penalty when `reg > 0`
    pub fn example_gradient(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        w: ArrayView1<f64>,
        reg: f64,
    ) -> Result<Array1<f64>> {
        let objective = Objective::new(&self.model, self.strategy, &self.engine)
            .regularized(L2::new(reg)?);
        objective.example_gradient(x, y, w, &mut self.rng)
    }

    /// Finite-difference approximation of the gradient at `w`
    pub fn approx_gradient(&self, w: ArrayView1<f64>, reg: f64) -> Result<Array1<f64>> {
        let objective = self.objective(reg)?;
        approx_gradient(w, |v| objective.value(&self.data, v))
    }

    /// Compare the analytic gradient with a finite-difference one at `n`
    /// random weight vectors; returns the L2 norm of each difference
    pub fn check_gradient(&mut self, n: usize, reg: f64) -> Result<Vec<f64>> {
        let mut scores = Vec::with_capacity(n);
        for _ in 0..n {
            let w: Array1<f64> = (0..self.model.n_weights())
                .map(|_| self.rng.gen::<f64>())
                .collect();
            let analytic = self.gradient(w.view(), reg)?;
            let approx = self.approx_gradient(w.view(), reg)?;
            scores.push((&analytic - &approx).mapv(|d| d * d).sum().sqrt());
        }
        Ok(scores)
    }

    /// Batch training with L-BFGS, then test and save
    pub fn train(
        &mut self,
        init: WeightInit,
        params: &LbfgsParams,
        output: &OutputLocation,
    ) -> Result<TrainReport> {
        self.ensure_weights(init)?;
        self.config = Some(RunConfig {
            strategy: self.strategy,
            engine: self.engine.clone(),
            params: DriverParams::Lbfgs(params.clone()),
        });
        let started = Instant::now();
        let result = self.run_lbfgs(params);
        self.train_time = Some(started.elapsed().as_secs_f64());
        let termination = result?;
        self.finish(termination, output)
    }

    /// Online training with SGD, then test and save
    pub fn sgd(
        &mut self,
        init: WeightInit,
        params: &SgdParams,
        output: &OutputLocation,
    ) -> Result<TrainReport> {
        self.ensure_weights(init)?;
        self.config = Some(RunConfig {
            strategy: self.strategy,
            engine: self.engine.clone(),
            params: DriverParams::Sgd(params.clone()),
        });
        let started = Instant::now();
        let result = self.run_sgd(params);
        self.train_time = Some(started.elapsed().as_secs_f64());
        let termination = result?;
        self.finish(termination, output)
    }

    fn finish(&mut self, termination: Termination, output: &OutputLocation) -> Result<TrainReport> {
        self.cancel.reset();
        let weights = self.weights.clone().ok_or(Error::MissingWeights)?;
        let history = self.history.clone().unwrap_or_default();
        let test_loss = self.test()?;
        let saved_to = self.save_solution(output)?;
        Ok(TrainReport {
            outcome: TrainOutcome {
                weights,
                val_loss: history.val_loss,
                snapshots: history.snapshots,
                termination,
            },
            test_loss,
            saved_to,
        })
    }

    /// MAP-decode the test split with the current weights and store the loss
    pub fn test(&mut self) -> Result<LossVector> {
        let w = self.weights.as_ref().ok_or(Error::MissingWeights)?;
        let loss = predict_loss(&self.model, &self.evaluator, self.data.test(), w.view())?;
        tracing::info!(loss = ?self.evaluator.names(&loss), "test set MAP prediction");
        Ok(self.test_loss.insert(loss).clone())
    }

    /// Persist whatever the learner has produced so far.
    ///
    /// The weight vector is only written once a training driver has run.
    pub fn save_solution(&self, output: &OutputLocation) -> Result<PathBuf> {
        let record = RunRecord {
            weights: self.weights.as_ref(),
            train_time: self.train_time,
            val_loss: self.history.as_ref().map(|h| h.val_loss.as_slice()),
            test_loss: self.test_loss.as_ref(),
            snapshots: self.history.as_ref().map(|h| h.snapshots.as_slice()),
            config: self.config.as_ref(),
        };
        ResultStore::save(output, &record)
    }
}

/// MAP-decode every sequence of `split` under `w` and evaluate the result
fn predict_loss<M: ChainModel, E: Evaluator>(
    model: &M,
    evaluator: &E,
    split: &[Sequence],
    w: ArrayView1<f64>,
) -> Result<LossVector> {
    let ws = model.split_weights(w)?;
    let predicted: Vec<Vec<usize>> = split.iter().map(|seq| model.map(&seq.x, &ws)).collect();
    let truth: Vec<&[usize]> = split.iter().map(|seq| seq.y.as_slice()).collect();
    evaluator.evaluate(&truth, &predicted)
}

/// Validation step shared by both drivers: decode the validation split,
/// record the loss with a snapshot of the weights it was measured at
struct Validator<'a, M, E> {
    model: &'a M,
    evaluator: &'a E,
    split: &'a [Sequence],
}

impl<'a, M: ChainModel, E: Evaluator> Validator<'a, M, E> {
    fn run(
        &self,
        history: &mut History,
        reporter: &mut Reporter,
        iteration: usize,
        w: ArrayView1<f64>,
    ) -> Result<()> {
        let loss = predict_loss(self.model, self.evaluator, self.split, w)?;
        reporter.emit(ProgressEvent::Validation {
            iteration,
            loss: loss.clone(),
        });
        history.val_loss.push(loss);
        history.snapshots.push(w.to_owned());
        Ok(())
    }
}

/// Euclidean norm
fn norm(v: ArrayView1<f64>) -> f64 {
    v.dot(&v).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crf::ChainCrf;
    use crate::dataset::synthetic;
    use ndarray::array;

    fn learner(strategy: Strategy) -> Learner<ChainCrf> {
        let mut rng = StdRng::seed_from_u64(5);
        let examples = synthetic(12, 2..=4, 3, 2, &mut rng).unwrap();
        let data = Dataset::split(examples, 0.25, 0.25, &mut rng).unwrap();
        Learner::new(ChainCrf::new(2, 3).unwrap(), data, strategy)
            .unwrap()
            .with_seed(11)
    }

    #[test]
    fn test_new_rejects_incompatible_data() {
        let seq = Sequence::new(array![[1.0, 0.0]], vec![0]).unwrap();
        let data = Dataset::new(vec![seq], vec![], vec![]).unwrap();
        let model = ChainCrf::new(2, 3).unwrap();
        assert!(Learner::new(model, data.clone(), Strategy::FullLikelihood).is_err());

        let seq = Sequence::new(array![[1.0, 0.0]], vec![4]).unwrap();
        let data = Dataset::new(vec![seq], vec![], vec![]).unwrap();
        let model = ChainCrf::new(2, 2).unwrap();
        assert!(Learner::new(model, data, Strategy::FullLikelihood).is_err());
    }

    #[test]
    fn test_init_weights() {
        let mut learner = learner(Strategy::FullLikelihood);
        let n = learner.model().n_weights();
        assert_eq!(learner.init_weights(WeightInit::Zeros).unwrap(), &Array1::<f64>::zeros(n));
        let w = learner.init_weights(WeightInit::Random).unwrap();
        assert!(w.iter().all(|&v| (0.0..1.0).contains(&v)));
        assert!(learner
            .init_weights(WeightInit::Explicit(Array1::zeros(n + 1)))
            .is_err());
    }

    #[test]
    fn test_test_requires_weights() {
        let mut learner = learner(Strategy::FullLikelihood);
        assert!(matches!(learner.test(), Err(Error::MissingWeights)));
        learner.init_weights(WeightInit::Zeros).unwrap();
        let loss = learner.test().unwrap();
        assert_eq!(loss.len(), 2);
        assert_eq!(learner.test_loss(), Some(&loss));
    }

    struct Mislabeled;

    impl Evaluator for Mislabeled {
        fn evaluate(&self, truth: &[&[usize]], predicted: &[Vec<usize>]) -> Result<LossVector> {
            let total: usize = truth.iter().map(|t| t.len()).sum();
            let wrong: usize = truth
                .iter()
                .zip(predicted)
                .map(|(t, p)| t.iter().zip(p).filter(|(a, b)| a != b).count())
                .sum();
            Ok(vec![wrong as f64, total as f64])
        }

        fn names(&self, loss: &[f64]) -> Vec<String> {
            loss.iter().map(|v| v.to_string()).collect()
        }
    }

    #[test]
    fn test_custom_evaluator() {
        let mut learner = learner(Strategy::FullLikelihood).with_evaluator(Mislabeled);
        learner.init_weights(WeightInit::Zeros).unwrap();
        let loss = learner.test().unwrap();
        let total: usize = learner.data().test().iter().map(|s| s.len()).sum();
        assert_eq!(loss[1], total as f64);
        assert!(loss[0] <= loss[1]);
    }

    #[test]
    fn test_feat_rejects_bad_examples() {
        let learner = learner(Strategy::FullLikelihood);
        let x = array![[1.0, 0.0, 2.0], [0.0, 1.0, 0.0]];
        let stats = learner.feat(&x, &[1, 0]).unwrap();
        // node block is L x F, then one L x L edge block
        assert_eq!(stats.len(), 2 * 3 + 2 * 2);
        assert_eq!(stats.slice(ndarray::s![..6]).to_vec(), vec![0.0, 1.0, 0.0, 1.0, 0.0, 2.0]);
        assert_eq!(stats[6 + 2], 1.0);

        let narrow = array![[1.0, 0.0], [0.0, 1.0]];
        for result in [
            learner.feat(&narrow, &[0, 1]),
            learner.feat(&x, &[0, 2]),
            learner.feat(&x, &[0]),
            learner.feat(&x, &[]),
        ] {
            assert!(matches!(result, Err(Error::InvalidInput(_))));
        }
    }

    #[test]
    fn test_expected_features() {
        let mut learner = learner(Strategy::FullLikelihood);
        let x = array![[1.0, 0.0, 2.0], [0.0, 1.0, 0.0], [0.5, 0.5, 0.5]];
        let zeros = Array1::zeros(learner.model().n_weights());

        // Uniform marginals: every label gets half of each observation row,
        // every label pair a quarter of each of the two transitions
        let expected = learner.expected_features(&x, zeros.view(), None).unwrap();
        let column_sums = x.sum_axis(ndarray::Axis(0));
        for l in 0..2 {
            for f in 0..3 {
                assert!((expected[l * 3 + f] - 0.5 * column_sums[f]).abs() < 1e-12);
            }
        }
        assert!(expected.slice(ndarray::s![6..]).iter().all(|&e| (e - 0.5).abs() < 1e-12));

        let w = Array1::from_iter((0..learner.model().n_weights()).map(|k| 0.3 * k as f64));
        let ws = learner.model().split_weights(w.view()).unwrap();
        let exact = Features::new(learner.model()).exact_expectation(&x, &ws).unwrap();
        assert_eq!(learner.expected_features(&x, w.view(), None).unwrap(), exact);

        assert!(learner
            .expected_features(&x, zeros.slice(ndarray::s![1..]), None)
            .is_err());
        assert!(matches!(
            learner.expected_features(&x, zeros.view(), Some(&[0, 3, 1])),
            Err(Error::InvalidInput(_))
        ));

        // Contrastive sampling started from the seed stays a distribution
        // over labelings: node mass per position sums to the row
        let mut gibbs = GibbsParams::default();
        gibbs.set("contrastive", "true").unwrap();
        let mut learner = learner.with_gibbs(gibbs);
        let sampled = learner
            .expected_features(&x, w.view(), Some(&[0, 1, 1]))
            .unwrap();
        let node_mass: f64 = sampled.slice(ndarray::s![..6]).sum();
        assert!((node_mass - x.sum()).abs() < 1e-9);
        assert!((sampled.slice(ndarray::s![6..]).sum() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_check_gradient() {
        for strategy in [
            Strategy::FullLikelihood,
            Strategy::PseudoLikelihood(Default::default()),
        ] {
            let mut learner = learner(strategy);
            for reg in [0.0, 0.9] {
                let scores = learner.check_gradient(2, reg).unwrap();
                assert_eq!(scores.len(), 2);
                assert!(scores.iter().all(|&s| s < 1e-4), "{:?}", scores);
            }
        }
        let mut learner = learner(Strategy::StochasticLikelihood);
        assert!(matches!(
            learner.check_gradient(1, 0.0),
            Err(Error::ObjectiveUndefined(_))
        ));
    }

    #[test]
    fn test_regularized_pair_through_learner() {
        let mut learner = learner(Strategy::FullLikelihood);
        let w = Array1::from_iter((0..learner.model().n_weights()).map(|k| 0.1 * k as f64));
        let raw = learner.objective_value(w.view(), 0.0).unwrap();
        let reg = learner.objective_value(w.view(), 0.9).unwrap();
        assert_eq!(reg, raw + 0.9 * w.dot(&w));

        let raw_g = learner.gradient(w.view(), 0.0).unwrap();
        let reg_g = learner.gradient(w.view(), 0.9).unwrap();
        for k in 0..w.len() {
            assert_eq!(reg_g[k], raw_g[k] + 2.0 * 0.9 * w[k]);
        }
    }
}
