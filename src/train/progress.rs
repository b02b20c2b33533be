//! Cooperative cancellation and the progress-event stream of a training run

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::evaluation::LossVector;

/// Shared flag polled by the optimization drivers at each loop boundary.
///
/// Clones share the same flag, so a clone handed to another thread (or to
/// an [`Observer`]) can stop a running learner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the current training loop stops
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the learner can train again
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Which optimization driver produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Lbfgs,
    Sgd,
}

/// How an optimization driver stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The quasi-Newton optimizer returned normally
    Converged,
    /// SGD ran all of its iterations
    Completed,
    /// A cancellation request stopped the loop early
    Interrupted,
    /// The quasi-Newton optimizer gave up without converging, e.g. after a
    /// failed line search; the last iterate is kept
    Stopped,
}

/// One entry of the progress stream
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started {
        driver: Driver,
        /// Sizes of the training, validation and test splits
        sizes: (usize, usize, usize),
    },
    Iteration {
        iteration: usize,
        /// Objective value; `None` for drivers without an objective
        objective: Option<f64>,
        grad_norm: f64,
        weight_norm: f64,
        /// Step size used for this iteration (SGD only)
        learning_rate: Option<f64>,
    },
    Validation {
        iteration: usize,
        loss: LossVector,
    },
    Finished {
        termination: Termination,
        iterations: usize,
    },
}

/// Receives progress events as training runs
pub trait Observer {
    fn on_event(&mut self, event: &ProgressEvent);
}

impl<F: FnMut(&ProgressEvent)> Observer for F {
    fn on_event(&mut self, event: &ProgressEvent) {
        self(event)
    }
}

/// Logs events through `tracing` and forwards them to an optional observer
#[derive(Default)]
pub(crate) struct Reporter {
    observer: Option<Box<dyn Observer + Send>>,
    verbose: bool,
}

impl Reporter {
    pub fn set_observer(&mut self, observer: Box<dyn Observer + Send>) {
        self.observer = Some(observer);
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn emit(&mut self, event: ProgressEvent) {
        match &event {
            ProgressEvent::Started { driver, sizes } => {
                tracing::info!(?driver, ?sizes, "start training");
            }
            ProgressEvent::Iteration {
                iteration,
                objective,
                grad_norm,
                weight_norm,
                learning_rate,
            } => {
                if self.verbose {
                    tracing::info!(
                        iteration,
                        ?objective,
                        grad_norm,
                        weight_norm,
                        ?learning_rate,
                        "iteration"
                    );
                } else {
                    tracing::debug!(iteration, ?objective, grad_norm, weight_norm, "iteration");
                }
            }
            ProgressEvent::Validation { iteration, loss } => {
                tracing::info!(iteration, ?loss, "validation loss");
            }
            ProgressEvent::Finished {
                termination,
                iterations,
            } => match termination {
                Termination::Interrupted => {
                    tracing::warn!(iterations, "training interrupted by cancellation request")
                }
                Termination::Stopped => {
                    tracing::warn!(iterations, "training stopped before convergence")
                }
                _ => tracing::info!(?termination, iterations, "training finished"),
            },
        }
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
    }

    #[test]
    fn test_reporter_forwards_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut reporter = Reporter::default();
        reporter.set_observer(Box::new(move |event: &ProgressEvent| {
            sink.lock().unwrap().push(event.clone());
        }));
        reporter.emit(ProgressEvent::Validation {
            iteration: 3,
            loss: vec![0.5],
        });
        reporter.emit(ProgressEvent::Finished {
            termination: Termination::Completed,
            iterations: 3,
        });
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0],
            ProgressEvent::Validation {
                iteration: 3,
                loss: vec![0.5]
            }
        );
    }
}
