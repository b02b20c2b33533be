//! Train a chain CRF on synthetic data with every strategy and driver.
//!
//! Run with `RUST_LOG=info cargo run --example synthetic`.

use chaincrf::dataset::{synthetic, Dataset};
use chaincrf::train::{
    GibbsParams, LbfgsParams, Learner, OutputLocation, SgdParams, Strategy, WeightInit,
};
use chaincrf::{ChainCrf, Evaluator, HammingEvaluator};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

const NUM_LABELS: usize = 4;
const NUM_FEATURES: usize = 6;

fn data(seed: u64) -> chaincrf::Result<Dataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let examples = synthetic(200, 4..=12, NUM_FEATURES, NUM_LABELS, &mut rng)?;
    Dataset::split(examples, 0.1, 0.2, &mut rng)
}

fn main() -> chaincrf::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let output = |name: &str| OutputLocation::new("synthetic", name).with_root("results");

    // Batch: full likelihood and pseudo-likelihood with L-BFGS
    for strategy in [
        Strategy::FullLikelihood,
        Strategy::PseudoLikelihood(Default::default()),
    ] {
        let model = ChainCrf::new(NUM_LABELS, NUM_FEATURES)?;
        let mut learner = Learner::new(model, data(1)?, strategy)?.with_seed(1);
        let mut params = LbfgsParams::default();
        params.set("c2", "0.1")?;
        params.set("max_iterations", "50")?;
        let report = learner.train(
            WeightInit::Zeros,
            &params,
            &output(&format!("{}_", strategy.name())),
        )?;
        println!(
            "{:>22}: {:?}, test {}",
            strategy.name(),
            report.outcome.termination,
            HammingEvaluator.names(&report.test_loss).join(" ")
        );
    }

    // Batch with sampled gradients: usually ends in a failed line search,
    // which keeps the last iterate and reports `Stopped`
    let mut gibbs = GibbsParams::default();
    gibbs.set("n_samples", "10")?;
    gibbs.set("burn", "100")?;
    gibbs.set("interval", "10")?;

    let model = ChainCrf::new(NUM_LABELS, NUM_FEATURES)?;
    let mut learner = Learner::new(model, data(1)?, Strategy::FullLikelihood)?
        .with_gibbs(gibbs)
        .with_seed(1);
    let mut params = LbfgsParams::default();
    params.set("max_iterations", "50")?;
    let report = learner.train(WeightInit::Random, &params, &output("gibbs_ml_"))?;
    println!(
        "{:>22}: {:?}, test {}",
        "gibbs l-bfgs",
        report.outcome.termination,
        HammingEvaluator.names(&report.test_loss).join(" ")
    );

    // Online: stochastic likelihood with CD-1 sampling
    let mut gibbs = GibbsParams::default();
    gibbs.set("burn", "0")?;
    gibbs.set("interval", "1")?;
    gibbs.set("n_samples", "1")?;
    gibbs.set("contrastive", "true")?;

    let model = ChainCrf::new(NUM_LABELS, NUM_FEATURES)?;
    let mut learner = Learner::new(model, data(1)?, Strategy::StochasticLikelihood)?
        .with_gibbs(gibbs)
        .with_seed(1);

    let mut params = SgdParams::default();
    params.set("c2", "0.01")?;
    params.set("lr_init", "0.05")?;
    params.set("n_iters", "5000")?;
    params.set("val_interval", "1000")?;
    let report = learner.sgd(WeightInit::Zeros, &params, &output("cd1_"))?;
    println!(
        "{:>22}: {:?}, test {}",
        "cd-1 sgd",
        report.outcome.termination,
        HammingEvaluator.names(&report.test_loss).join(" ")
    );
    println!("results under {}", report.saved_to.display());
    Ok(())
}
