//! Pure Rust parameter learning for linear-chain Conditional Random Fields (CRF)
//!
//! This library fits the weights of a chain-structured CRF by minimizing a
//! likelihood-based objective, either in batch with L-BFGS or online with
//! SGD, validating against held-out data as it goes.
//!
//! # Examples
//!
//! ## Batch training
//!
//! ```no_run
//! use chaincrf::dataset::{synthetic, Dataset};
//! use chaincrf::train::{LbfgsParams, Learner, OutputLocation, Strategy, WeightInit};
//! use chaincrf::ChainCrf;
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let examples = synthetic(100, 3..=8, 4, 3, &mut rng)?;
//! let data = Dataset::split(examples, 0.1, 0.1, &mut rng)?;
//!
//! let mut learner = Learner::new(ChainCrf::new(3, 4)?, data, Strategy::FullLikelihood)?;
//! let mut params = LbfgsParams::default();
//! params.set("c2", "0.1")?;
//! let report = learner.train(WeightInit::Zeros, &params, &OutputLocation::new("demo", "ml_"))?;
//! println!("test loss: {:?}", report.test_loss);
//! # Ok::<(), chaincrf::Error>(())
//! ```
//!
//! ## Online training with contrastive divergence
//!
//! ```no_run
//! use chaincrf::dataset::{synthetic, Dataset};
//! use chaincrf::train::{GibbsParams, Learner, OutputLocation, SgdParams, Strategy, WeightInit};
//! use chaincrf::ChainCrf;
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let data = Dataset::split(synthetic(100, 3..=8, 4, 3, &mut rng)?, 0.1, 0.1, &mut rng)?;
//!
//! let mut gibbs = GibbsParams::default();
//! gibbs.set("burn", "0")?;
//! gibbs.set("interval", "1")?;
//! gibbs.set("n_samples", "1")?;
//! gibbs.set("contrastive", "true")?;
//!
//! let mut learner = Learner::new(ChainCrf::new(3, 4)?, data, Strategy::StochasticLikelihood)?
//!     .with_gibbs(gibbs)
//!     .with_seed(7);
//! let mut params = SgdParams::default();
//! params.set("n_iters", "2000")?;
//! params.set("val_interval", "500")?;
//! learner.sgd(WeightInit::Zeros, &params, &OutputLocation::new("demo", "cd1_"))?;
//! # Ok::<(), chaincrf::Error>(())
//! ```

mod crf;
mod error;
mod evaluation;
mod model;

/// Sequence examples and their train/validation/test splits
pub mod dataset;

/// Training module containing all components for learning CRF weights
pub mod train;

// Re-export main types
pub use self::crf::{ChainCrf, EdgeFeature};
pub use self::dataset::{Dataset, Sequence};
pub use self::error::{Error, Result};
pub use self::evaluation::{Evaluator, HammingEvaluator, LossVector};
pub use self::model::{Blocks, ChainModel, GibbsSchedule};

// Re-export training types for convenience
pub use self::train::{Learner, Strategy};
