use rand::Rng;
use serde::{Deserialize, Serialize};

use super::super::parse_value;
use super::{norm, History, Learner, Validator};
use crate::error::{Error, Result};
use crate::evaluation::Evaluator;
use crate::model::ChainModel;
use crate::train::objective::{Objective, L2};
use crate::train::progress::{Driver, ProgressEvent, Termination};

/// Stochastic gradient descent parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgdParams {
    c2: f64,
    lr_init: f64,
    step: usize,
    n_iters: usize,
    val_interval: usize,
}

impl Default for SgdParams {
    fn default() -> Self {
        Self {
            c2: 0.9,
            lr_init: 1.0,
            step: 2,
            n_iters: 300_000,
            val_interval: 5_000,
        }
    }
}

impl SgdParams {
    pub fn c2(&self) -> f64 {
        self.c2
    }

    pub fn set_c2(&mut self, c2: f64) -> Result<()> {
        if c2 < 0.0 || c2.is_nan() {
            return Err(Error::invalid("c2 must be non-negative"));
        }
        self.c2 = c2;
        Ok(())
    }

    pub fn lr_init(&self) -> f64 {
        self.lr_init
    }

    pub fn set_lr_init(&mut self, lr_init: f64) -> Result<()> {
        if lr_init <= 0.0 || lr_init.is_nan() {
            return Err(Error::invalid("lr_init must be positive"));
        }
        self.lr_init = lr_init;
        Ok(())
    }

    /// Number of decays over the run; 0 keeps the learning rate constant
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn set_step(&mut self, step: usize) {
        self.step = step;
    }

    pub fn n_iters(&self) -> usize {
        self.n_iters
    }

    pub fn set_n_iters(&mut self, n_iters: usize) -> Result<()> {
        if n_iters < 1 {
            return Err(Error::invalid("n_iters must be at least 1"));
        }
        self.n_iters = n_iters;
        Ok(())
    }

    pub fn val_interval(&self) -> usize {
        self.val_interval
    }

    pub fn set_val_interval(&mut self, val_interval: usize) -> Result<()> {
        if val_interval == 0 {
            return Err(Error::invalid("val_interval must be positive"));
        }
        self.val_interval = val_interval;
        Ok(())
    }

    /// Set a parameter by name
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "c2" => self.set_c2(parse_value(name, value)?),
            "lr_init" => self.set_lr_init(parse_value(name, value)?),
            "step" => {
                self.set_step(parse_value(name, value)?);
                Ok(())
            }
            "n_iters" => self.set_n_iters(parse_value(name, value)?),
            "val_interval" => self.set_val_interval(parse_value(name, value)?),
            _ => Err(Error::invalid(format!("unknown parameter: {}", name))),
        }
    }
}

/// Step-decayed learning rate after `i` iterations:
/// `lr_init * 0.1^floor(i * (step + 1) / n_iters)`, or `lr_init` when
/// `step` is 0.
pub fn learning_rate(lr_init: f64, step: usize, n_iters: usize, i: usize) -> f64 {
    if step == 0 || n_iters == 0 {
        return lr_init;
    }
    let decays = i * (step + 1) / n_iters;
    lr_init * 0.1f64.powi(decays as i32)
}

impl<M: ChainModel, E: Evaluator> Learner<M, E> {
    /// Online training: one uniformly drawn example per iteration, with
    /// periodic validation
    pub(super) fn run_sgd(&mut self, params: &SgdParams) -> Result<Termination> {
        let Self {
            model,
            data,
            strategy,
            engine,
            evaluator,
            rng,
            cancel,
            reporter,
            weights,
            history,
            ..
        } = self;
        let w = weights.as_mut().ok_or(Error::MissingWeights)?;
        let history = history.insert(History::default());
        let objective =
            Objective::new(&*model, *strategy, &*engine).regularized(L2::new(params.c2())?);
        let validator = Validator {
            model: &*model,
            evaluator: &*evaluator,
            split: data.validation(),
        };
        let num_train = data.num_train();

        reporter.emit(ProgressEvent::Started {
            driver: Driver::Sgd,
            sizes: data.sizes(),
        });

        let mut lr = params.lr_init();
        let mut termination = Termination::Completed;
        let mut iterations = 0;
        for i in 1..=params.n_iters() {
            if cancel.is_cancelled() {
                termination = Termination::Interrupted;
                break;
            }
            let seq = &data.train()[rng.gen_range(0..num_train)];
            let g = objective.example_gradient(&seq.x, &seq.y, w.view(), &mut *rng)?;
            w.scaled_add(-lr, &g);
            iterations = i;

            reporter.emit(ProgressEvent::Iteration {
                iteration: i,
                objective: None,
                grad_norm: norm(g.view()),
                weight_norm: norm(w.view()),
                learning_rate: Some(lr),
            });
            if params.step() > 0 {
                lr = learning_rate(params.lr_init(), params.step(), params.n_iters(), i);
            }
            if i % params.val_interval() == 0 {
                validator.run(history, reporter, i, w.view())?;
            }
        }

        reporter.emit(ProgressEvent::Finished {
            termination,
            iterations,
        });
        Ok(termination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learning_rate_boundaries() {
        // n_iters = 9, step = 2: decay every 3 iterations
        let lr = |i| learning_rate(1.0, 2, 9, i);
        assert_eq!(lr(0), 1.0);
        assert_eq!(lr(2), 1.0);
        assert!((lr(3) - 0.1).abs() < 1e-15);
        assert!((lr(5) - 0.1).abs() < 1e-15);
        assert!((lr(6) - 0.01).abs() < 1e-15);
        assert!((lr(9) - 0.001).abs() < 1e-15);
    }

    #[test]
    fn test_learning_rate_without_step_is_constant() {
        for i in 0..=20 {
            assert_eq!(learning_rate(0.5, 0, 10, i), 0.5);
        }
    }

    #[test]
    fn test_sgd_params_set() {
        let mut params = SgdParams::default();
        params.set("lr_init", "0.25").unwrap();
        params.set("step", "0").unwrap();
        params.set("val_interval", "10").unwrap();
        assert_eq!(params.lr_init(), 0.25);
        assert_eq!(params.step(), 0);
        assert_eq!(params.val_interval(), 10);
        assert!(params.set("lr_init", "0").is_err());
        assert!(params.set("val_interval", "0").is_err());
        assert!(params.set("n_iters", "-3").is_err());
        assert_eq!(
            params.set("momentum", "0.9").unwrap_err().to_string(),
            "unknown parameter: momentum"
        );
    }
}
