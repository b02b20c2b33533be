//! Training module for chain CRF models
//!
//! This module contains the expectation engines, the objective strategies,
//! the two optimization drivers and the result persistence of a training run.

use std::str::FromStr;

use crate::error::{Error, Result};

mod checkpoint;
mod features;
mod objective;
mod progress;
mod trainer;

// Re-export public types
pub use self::checkpoint::OutputLocation;
pub use self::features::{ExpectationEngine, Features, GibbsParams};
pub use self::objective::{approx_gradient, EnergyCount, Objective, Strategy, L2};
pub use self::progress::{CancelToken, Driver, Observer, ProgressEvent, Termination};
pub use self::trainer::{
    learning_rate, DriverParams, LbfgsParams, Learner, LineSearchAlgorithm, RunConfig, SgdParams,
    TrainOutcome, TrainReport, WeightInit,
};

/// Parse a string-keyed parameter value
pub(crate) fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::invalid(format!("invalid value for {}: {}", name, value)))
}
