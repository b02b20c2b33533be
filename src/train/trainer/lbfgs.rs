use std::str::FromStr;

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use super::super::parse_value;
use super::{norm, History, Learner, Validator};
use crate::error::{Error, Result};
use crate::evaluation::Evaluator;
use crate::model::ChainModel;
use crate::train::objective::{Objective, Strategy, L2};
use crate::train::progress::{Driver, ProgressEvent, Termination};

/// Line search algorithm for L-BFGS optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineSearchAlgorithm {
    /// More-Thuente line search
    #[default]
    MoreThuente,
    /// Backtracking with Armijo condition
    BacktrackingArmijo,
    /// Backtracking with Wolfe condition
    BacktrackingWolfe,
    /// Backtracking with strong Wolfe condition
    BacktrackingStrongWolfe,
}

impl LineSearchAlgorithm {
    fn to_liblbfgs_str(self) -> &'static str {
        match self {
            Self::MoreThuente => "MoreThuente",
            Self::BacktrackingArmijo => "BacktrackingArmijo",
            Self::BacktrackingWolfe => "BacktrackingWolfe",
            Self::BacktrackingStrongWolfe => "BacktrackingStrongWolfe",
        }
    }
}

impl FromStr for LineSearchAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MoreThuente" => Ok(Self::MoreThuente),
            "Backtracking" | "BacktrackingArmijo" => Ok(Self::BacktrackingArmijo),
            "BacktrackingWolfe" => Ok(Self::BacktrackingWolfe),
            "BacktrackingStrongWolfe" => Ok(Self::BacktrackingStrongWolfe),
            _ => Err(Error::invalid(format!("unknown line search: {}", s))),
        }
    }
}

/// L-BFGS training parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbfgsParams {
    c2: f64,
    max_iterations: usize,
    epsilon: f64,
    period: usize,
    delta: f64,
    linesearch: LineSearchAlgorithm,
    max_linesearch: usize,
}

impl Default for LbfgsParams {
    fn default() -> Self {
        Self {
            c2: 0.9,
            max_iterations: 100,
            epsilon: 1e-5,
            period: 10,
            delta: 1e-5,
            linesearch: LineSearchAlgorithm::default(),
            max_linesearch: 20,
        }
    }
}

impl LbfgsParams {
    /// Coefficient of the L2 penalty; zero disables regularization
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

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<()> {
        if max_iterations < 1 {
            return Err(Error::invalid("max_iterations must be at least 1"));
        }
        self.max_iterations = max_iterations;
        Ok(())
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<()> {
        if epsilon < 0.0 {
            return Err(Error::invalid("epsilon must be non-negative"));
        }
        self.epsilon = epsilon;
        Ok(())
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Set the period for delta-based convergence test.
    ///
    /// Setting period to 0 disables the delta-based convergence test
    /// (only gradient-based epsilon test is used).
    pub fn set_period(&mut self, period: usize) {
        self.period = period;
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn set_delta(&mut self, delta: f64) -> Result<()> {
        if delta < 0.0 {
            return Err(Error::invalid("delta must be non-negative"));
        }
        self.delta = delta;
        Ok(())
    }

    pub fn linesearch(&self) -> LineSearchAlgorithm {
        self.linesearch
    }

    pub fn set_linesearch(&mut self, linesearch: LineSearchAlgorithm) {
        self.linesearch = linesearch;
    }

    pub fn max_linesearch(&self) -> usize {
        self.max_linesearch
    }

    pub fn set_max_linesearch(&mut self, max_linesearch: usize) -> Result<()> {
        if max_linesearch == 0 {
            return Err(Error::invalid("max_linesearch must be positive"));
        }
        self.max_linesearch = max_linesearch;
        Ok(())
    }

    /// Set a parameter by name
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "c2" => self.set_c2(parse_value(name, value)?),
            "max_iterations" => self.set_max_iterations(parse_value(name, value)?),
            "epsilon" => self.set_epsilon(parse_value(name, value)?),
            "period" => {
                self.set_period(parse_value(name, value)?);
                Ok(())
            }
            "delta" => self.set_delta(parse_value(name, value)?),
            "linesearch" => {
                self.set_linesearch(value.parse()?);
                Ok(())
            }
            "max_linesearch" => self.set_max_linesearch(parse_value(name, value)?),
            _ => Err(Error::invalid(format!("unknown parameter: {}", name))),
        }
    }
}

impl<M: ChainModel, E: Evaluator> Learner<M, E> {
    /// Minimize the batch objective with L-BFGS, validating after every
    /// optimizer iteration
    pub(super) fn run_lbfgs(&mut self, params: &LbfgsParams) -> Result<Termination> {
        if self.strategy == Strategy::StochasticLikelihood {
            return Err(Error::ObjectiveUndefined(self.strategy.name()));
        }
        let mut weights = self.weights.as_ref().ok_or(Error::MissingWeights)?.to_vec();

        let Self {
            model,
            data,
            strategy,
            engine,
            evaluator,
            rng,
            cancel,
            reporter,
            history,
            ..
        } = self;
        let history = history.insert(History::default());
        let objective =
            Objective::new(&*model, *strategy, &*engine).regularized(L2::new(params.c2())?);
        let validator = Validator {
            model: &*model,
            evaluator: &*evaluator,
            split: data.validation(),
        };
        let data = &*data;

        reporter.emit(ProgressEvent::Started {
            driver: Driver::Lbfgs,
            sizes: data.sizes(),
        });

        // Objective function: strategy objective plus the L2 penalty
        let evaluate = |x: &[f64], gx: &mut [f64]| -> Result<f64, anyhow::Error> {
            let w = ArrayView1::from(x);
            let fx = objective.value(data, w)?;
            let g = objective.gradient(data, w, &mut *rng)?;
            for (dst, src) in gx.iter_mut().zip(g.iter()) {
                *dst = *src;
            }
            Ok(fx)
        };

        // Progress callback: validate the current iterate, stop on request
        let mut iterations = 0;
        let mut failure = None;
        let progress = |prgr: &liblbfgs::Progress| -> bool {
            iterations = prgr.niter;
            let w = ArrayView1::from(prgr.x);
            reporter.emit(ProgressEvent::Iteration {
                iteration: prgr.niter,
                objective: Some(prgr.fx),
                grad_norm: prgr.gnorm,
                weight_norm: prgr.xnorm,
                learning_rate: None,
            });
            if let Err(e) = validator.run(history, reporter, prgr.niter, w) {
                failure = Some(e);
                return true;
            }
            cancel.is_cancelled()
        };

        let result = liblbfgs::lbfgs()
            .with_max_iterations(params.max_iterations())
            .with_epsilon(params.epsilon())
            .with_fx_delta(params.delta(), params.period())
            .with_max_linesearch(params.max_linesearch())
            .with_linesearch_algorithm(params.linesearch().to_liblbfgs_str())
            .minimize(&mut weights, evaluate, progress);

        if let Some(e) = failure {
            return Err(e);
        }
        let termination = if cancel.is_cancelled() {
            Termination::Interrupted
        } else {
            match result {
                Ok(report) => {
                    tracing::info!(loss = report.fx, "final loss");
                    Termination::Converged
                }
                // Objective failures are ours and abort the run; anything
                // else is liblbfgs giving up, which leaves a usable iterate
                Err(e) => match e.downcast::<Error>() {
                    Ok(e) => return Err(e),
                    Err(e) => {
                        tracing::warn!(error = %e, "L-BFGS stopped, keeping the last iterate");
                        Termination::Stopped
                    }
                },
            }
        };

        let weights = Array1::from(weights);
        tracing::debug!(weight_norm = norm(weights.view()), "L-BFGS finished");
        self.weights = Some(weights);
        self.reporter.emit(ProgressEvent::Finished {
            termination,
            iterations,
        });
        Ok(termination)
    }
}
