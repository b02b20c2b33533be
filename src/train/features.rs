use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::parse_value;
use crate::error::{Error, Result};
use crate::model::{Blocks, ChainModel, GibbsSchedule};

/// Gibbs sampling parameters for approximate feature expectations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GibbsParams {
    n_samples: usize,
    burn: usize,
    interval: usize,
    contrastive: bool,
}

impl Default for GibbsParams {
    fn default() -> Self {
        Self {
            n_samples: 5,
            burn: 5,
            interval: 5,
            contrastive: false,
        }
    }
}

impl GibbsParams {
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn set_n_samples(&mut self, n_samples: usize) -> Result<()> {
        if n_samples == 0 {
            return Err(Error::invalid("n_samples must be positive"));
        }
        self.n_samples = n_samples;
        Ok(())
    }

    pub fn burn(&self) -> usize {
        self.burn
    }

    pub fn set_burn(&mut self, burn: usize) {
        self.burn = burn;
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    pub fn set_interval(&mut self, interval: usize) -> Result<()> {
        if interval == 0 {
            return Err(Error::invalid("interval must be positive"));
        }
        self.interval = interval;
        Ok(())
    }

    /// Whether stochastic-likelihood gradients seed the chain with the
    /// example's true labels (contrastive divergence)
    pub fn contrastive(&self) -> bool {
        self.contrastive
    }

    pub fn set_contrastive(&mut self, contrastive: bool) {
        self.contrastive = contrastive;
    }

    /// Set a parameter by name
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "n_samples" => self.set_n_samples(parse_value(name, value)?),
            "burn" => {
                self.set_burn(parse_value(name, value)?);
                Ok(())
            }
            "interval" => self.set_interval(parse_value(name, value)?),
            "contrastive" => {
                self.set_contrastive(parse_value(name, value)?);
                Ok(())
            }
            _ => Err(Error::invalid(format!("unknown parameter: {}", name))),
        }
    }

    pub(crate) fn schedule(&self) -> GibbsSchedule {
        GibbsSchedule {
            n_samples: self.n_samples,
            burn: self.burn,
            interval: self.interval,
        }
    }
}

/// How expected sufficient statistics are computed
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum ExpectationEngine {
    /// Marginals from exact inference
    #[default]
    Exact,
    /// Monte Carlo average over Gibbs samples
    Gibbs(GibbsParams),
}

/// Empirical and expected sufficient statistics of a model
pub struct Features<'a, M: ?Sized> {
    model: &'a M,
}

impl<'a, M: ChainModel + ?Sized> Features<'a, M> {
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }

    fn zeros(&self) -> Blocks {
        Blocks::zeros(self.model.unary_shape(), self.model.pairwise_shape())
    }

    /// Sufficient statistics of labeling `y`
    pub fn feat(&self, x: &Array2<f64>, y: &[usize]) -> Array1<f64> {
        let mut stats = self.zeros();
        for (i, &label) in y.iter().enumerate() {
            let mut row = stats.node.row_mut(label);
            row += &x.row(i);
        }
        for i in 1..y.len() {
            let (a, b) = (y[i - 1], y[i]);
            stats.edge[[a, b]] += self.model.edge_feat(x, i - 1, i, a, b);
        }
        stats.flatten()
    }

    /// Expected sufficient statistics under exact marginals
    pub fn exact_expectation(&self, x: &Array2<f64>, ws: &Blocks) -> Result<Array1<f64>> {
        let mut stats = self.zeros();
        let log_z = self.model.log_partition(x, ws)?;
        let num_items = x.nrows();

        for i in 0..num_items {
            for l in self.model.labels() {
                let p = (self.model.log_marginal(x, ws, &[(i, l)])? - log_z).exp();
                let mut row = stats.node.row_mut(l);
                row.scaled_add(p, &x.row(i));
            }
        }

        let pairs = self.model.configs(2);
        for i in 1..num_items {
            for pair in &pairs {
                let (m, n) = (pair[0], pair[1]);
                let ef = self.model.edge_feat(x, i - 1, i, m, n);
                let p = (self.model.log_marginal(x, ws, &[(i - 1, m), (i, n)])? - log_z).exp();
                stats.edge[[m, n]] += p * ef;
            }
        }
        Ok(stats.flatten())
    }

    /// Mean sufficient statistics over Gibbs samples, optionally seeded
    /// from `init`
    pub fn gibbs_expectation<R: Rng + ?Sized>(
        &self,
        x: &Array2<f64>,
        ws: &Blocks,
        params: &GibbsParams,
        init: Option<&[usize]>,
        rng: &mut R,
    ) -> Result<Array1<f64>> {
        let samples = self.model.gibbs(x, ws, params.schedule(), init, rng)?;
        let mut mean = Array1::zeros(self.model.n_weights());
        for s in &samples {
            mean += &self.feat(x, s);
        }
        Ok(mean / params.n_samples() as f64)
    }

    /// Expected statistics through `engine`. `seed` starts the Gibbs chain
    /// when the engine samples contrastively and is ignored otherwise.
    pub fn expectation<R: Rng + ?Sized>(
        &self,
        engine: &ExpectationEngine,
        x: &Array2<f64>,
        ws: &Blocks,
        seed: Option<&[usize]>,
        rng: &mut R,
    ) -> Result<Array1<f64>> {
        match engine {
            ExpectationEngine::Exact => self.exact_expectation(x, ws),
            ExpectationEngine::Gibbs(params) => {
                let init = if params.contrastive() { seed } else { None };
                self.gibbs_expectation(x, ws, params, init, rng)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crf::{ChainCrf, EdgeFeature};
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn brute_force_expectation(crf: &ChainCrf, x: &Array2<f64>, ws: &Blocks) -> Array1<f64> {
        let features = Features::new(crf);
        let log_z = crf.log_partition(x, ws).unwrap();
        let mut expected = Array1::zeros(crf.n_weights());
        for y in crf.configs(x.nrows()) {
            let p = (-crf.energy(x, &y, ws) - log_z).exp();
            expected.scaled_add(p, &features.feat(x, &y));
        }
        expected
    }

    #[test]
    fn test_feat_layout() {
        let crf = ChainCrf::new(2, 2).unwrap();
        let features = Features::new(&crf);
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let f = features.feat(&x, &[0, 1, 1]);
        // node row 0, node row 1, edge [[00, 01], [10, 11]]
        assert_eq!(f.to_vec(), vec![1.0, 2.0, 8.0, 10.0, 0.0, 1.0, 0.0, 1.0]);
        assert_eq!(features.feat(&x, &[0, 1, 1]), f);
    }

    #[test]
    fn test_feat_potts_edges() {
        let crf = ChainCrf::new(2, 1).unwrap().with_edge_feature(EdgeFeature::Potts);
        let features = Features::new(&crf);
        let x = array![[1.0], [1.0], [1.0]];
        let f = features.feat(&x, &[0, 1, 1]);
        assert_eq!(f.to_vec(), vec![1.0, 2.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_exact_expectation_matches_enumeration() {
        let crf = ChainCrf::new(3, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        let w: Array1<f64> = (0..crf.n_weights()).map(|_| rng.gen::<f64>() - 0.5).collect();
        let ws = crf.split_weights(w.view()).unwrap();
        let x = array![[1.0, 0.5], [0.2, 1.0], [0.0, 0.3]];

        let exact = Features::new(&crf).exact_expectation(&x, &ws).unwrap();
        let brute = brute_force_expectation(&crf, &x, &ws);
        for (a, b) in exact.iter().zip(brute.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_gibbs_expectation_converges() {
        let crf = ChainCrf::new(2, 2).unwrap();
        let w = array![0.5, -0.3, -0.2, 0.4, 0.3, -0.1, 0.0, 0.2];
        let ws = crf.split_weights(w.view()).unwrap();
        let x = array![[1.0, 0.5], [0.2, 1.0], [0.8, 0.3]];
        let features = Features::new(&crf);
        let exact = features.exact_expectation(&x, &ws).unwrap();

        let mut rng = StdRng::seed_from_u64(1234);
        let mut mean_sq_err = Vec::new();
        for &n_samples in &[2usize, 2000] {
            let mut params = GibbsParams::default();
            params.set_n_samples(n_samples).unwrap();
            params.set_interval(1).unwrap();
            let mut total = 0.0;
            let repeats = 10;
            for _ in 0..repeats {
                let est = features
                    .gibbs_expectation(&x, &ws, &params, None, &mut rng)
                    .unwrap();
                total += (&est - &exact).mapv(|v| v * v).sum();
            }
            mean_sq_err.push(total / repeats as f64);
        }
        assert!(mean_sq_err[1] < mean_sq_err[0]);
        assert!(mean_sq_err[1] < 0.05);
    }

    #[test]
    fn test_engine_seeds_only_when_contrastive() {
        let crf = ChainCrf::new(3, 1).unwrap();
        let features = Features::new(&crf);
        let x = array![[1.0], [1.0], [1.0], [1.0]];
        let y = [2, 2, 2, 2];
        let mut rng = StdRng::seed_from_u64(3);

        // Strongly attractive edges keep a seeded chain where it started
        let mut w = Array1::zeros(crf.n_weights());
        for a in 0..3 {
            w[3 + a * 3 + a] = -50.0;
        }
        let ws = crf.split_weights(w.view()).unwrap();

        let mut params = GibbsParams::default();
        params.set_n_samples(1).unwrap();
        params.set_interval(1).unwrap();
        params.set_burn(0);
        params.set_contrastive(true);
        let engine = ExpectationEngine::Gibbs(params);
        let seeded = features
            .expectation(&engine, &x, &ws, Some(&y), &mut rng)
            .unwrap();
        assert_eq!(seeded, features.feat(&x, &y));

        let zero = crf.split_weights(Array1::zeros(crf.n_weights()).view()).unwrap();
        let exact = features
            .expectation(&ExpectationEngine::Exact, &x, &zero, Some(&y), &mut rng)
            .unwrap();
        assert!((exact[0] - 4.0 / 3.0).abs() < 1e-12);
        assert!((exact[3] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_gibbs_params_validation() {
        let mut params = GibbsParams::default();
        assert!(params.set("n_samples", "10").is_ok());
        assert!(params.set("burn", "0").is_ok());
        assert!(params.set("contrastive", "true").is_ok());
        assert!(params.contrastive());
        assert_eq!(
            params.set("n_samples", "0").unwrap_err().to_string(),
            "n_samples must be positive"
        );
        assert!(params.set("interval", "0").is_err());
        assert!(params.set("interval", "abc").is_err());
        assert!(params
            .set("thinning", "1")
            .unwrap_err()
            .to_string()
            .contains("unknown parameter"));
    }
}
