use crate::config::TrainConfig;
use crate::data::ReturnMatrix;
use crate::error::AllocatorError;
use crate::models::AllocationPolicy;
use crate::objective::{clip_grad_norm, sharpe_loss};
use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TrainerState {
    Training,
    Converged,
}

#[derive(Clone, Debug, Serialize)]
pub struct EpochLogEntry {
    pub epoch: usize,
    pub loss: f64,
    pub sharpe: f64,
    /// Gradient norm before clipping.
    pub grad_norm: f64,
}

/// Summary of a finished run. Holds no parameters.
#[derive(Clone, Debug, Serialize)]
pub struct TrainingReport {
    pub epochs_requested: usize,
    pub steps: usize,
    pub learning_rate: f64,
    pub hidden_width: usize,
    pub num_assets: usize,
    pub num_rows: usize,
    pub final_sharpe: f64,
    pub best_sharpe: f64,
    pub elapsed_secs: f64,
    pub epoch_metrics: Vec<EpochLogEntry>,
}

impl TrainingReport {
    /// Average Sharpe and per-epoch Sharpe slope over the last `window` epochs.
    pub fn sharpe_trend(&self, window: usize) -> Option<(f64, f64)> {
        compute_window_trend(&self.epoch_metrics, window)
    }
}

fn compute_window_trend(epoch_metrics: &[EpochLogEntry], window: usize) -> Option<(f64, f64)> {
    if epoch_metrics.len() < window || window < 2 {
        return None;
    }
    let slice = &epoch_metrics[epoch_metrics.len() - window..];
    let avg = slice.iter().map(|e| e.sharpe).sum::<f64>() / window as f64;
    let slope = (slice[window - 1].sharpe - slice[0].sharpe) / (window as f64 - 1.0);
    Some((avg, slope))
}

/// Owns the policy and the optimizer state for one training run.
///
/// Every iteration evaluates the policy on the full return matrix, scores the
/// resulting allocations by their Sharpe ratio and takes one clipped Adam
/// step. After `epochs` steps the trainer is `Converged` and can only be
/// turned into a [`TrainedPolicy`]; the optimizer moments are dropped then.
pub struct Trainer {
    policy: AllocationPolicy,
    opt: AdamW,
    returns: Tensor,
    config: TrainConfig,
    num_rows: usize,
    state: TrainerState,
    steps: usize,
    epoch_metrics: Vec<EpochLogEntry>,
    started: Instant,
}

impl Trainer {
    pub fn new(returns: &ReturnMatrix, config: TrainConfig) -> Result<Self, AllocatorError> {
        config.validate()?;
        if returns.num_rows() == 0 || returns.num_assets() == 0 {
            return Err(AllocatorError::InsufficientData(
                "training needs at least one return row and one asset".to_string(),
            ));
        }

        let device = config.device.clone();
        let policy = AllocationPolicy::new(returns.num_assets(), config.hidden_width, config.seed, &device)?;

        // Plain Adam: the decoupled decay term is disabled.
        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let opt = AdamW::new(policy.vars().to_vec(), params)?;

        let x = returns.to_tensor(&device)?;

        debug!(
            "Trainer ready: {} rows x {} assets, {} parameters, epochs={}, lr={}",
            returns.num_rows(),
            returns.num_assets(),
            policy.num_parameters(),
            config.epochs,
            config.learning_rate
        );

        Ok(Self {
            policy,
            opt,
            returns: x,
            num_rows: returns.num_rows(),
            epoch_metrics: Vec::with_capacity(config.epochs),
            config,
            state: TrainerState::Training,
            steps: 0,
            started: Instant::now(),
        })
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    /// Number of optimizer updates applied so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn policy(&self) -> &AllocationPolicy {
        &self.policy
    }

    /// Runs one iteration. Fails if the trainer has already converged.
    pub fn step(&mut self) -> Result<&EpochLogEntry, AllocatorError> {
        if self.state == TrainerState::Converged {
            return Err(AllocatorError::Training(format!(
                "trainer already converged after {} steps",
                self.steps
            )));
        }
        let epoch = self.steps + 1;

        let weights = self.policy.evaluate(&self.returns)?;
        let loss = sharpe_loss(&weights, &self.returns, self.config.std_floor)?;
        let loss_value = loss.to_scalar::<f32>()? as f64;
        if !loss_value.is_finite() {
            return Err(AllocatorError::Training(format!(
                "non-finite loss ({}) at epoch {}",
                loss_value, epoch
            )));
        }

        let mut grads = loss.backward()?;
        let grad_norm = clip_grad_norm(&mut grads, self.policy.vars(), self.config.max_grad_norm)?;
        if !grad_norm.is_finite() {
            return Err(AllocatorError::Training(format!(
                "non-finite gradient norm ({}) at epoch {}",
                grad_norm, epoch
            )));
        }
        self.opt.step(&grads)?;
        self.steps = epoch;

        debug!(
            "Epoch {}/{}: loss={:.6}, sharpe={:.6}, grad_norm={:.6}",
            epoch, self.config.epochs, loss_value, -loss_value, grad_norm
        );
        self.epoch_metrics.push(EpochLogEntry {
            epoch,
            loss: loss_value,
            sharpe: -loss_value,
            grad_norm,
        });

        if epoch % 10 == 0 {
            if let Some((avg, slope)) = compute_window_trend(&self.epoch_metrics, 10) {
                debug!(
                    "Trend@{} (last 10): sharpe_avg={:.6}, sharpe_slope={:+.6}/epoch",
                    epoch, avg, slope
                );
            }
        }

        if self.steps >= self.config.epochs {
            self.state = TrainerState::Converged;
        }

        self.epoch_metrics
            .last()
            .ok_or_else(|| AllocatorError::Training("epoch metrics missing".to_string()))
    }

    /// Steps until converged and hands back the frozen policy.
    pub fn run(mut self) -> Result<TrainedPolicy, AllocatorError> {
        while self.state == TrainerState::Training {
            self.step()?;
        }
        self.finish()
    }

    /// Consumes a converged trainer, discarding the optimizer state.
    pub fn finish(self) -> Result<TrainedPolicy, AllocatorError> {
        if self.state != TrainerState::Converged {
            return Err(AllocatorError::Training(format!(
                "training stopped after {} of {} epochs",
                self.steps, self.config.epochs
            )));
        }

        let final_sharpe = self.epoch_metrics.last().map(|e| e.sharpe).unwrap_or(0.0);
        let best_sharpe = self
            .epoch_metrics
            .iter()
            .map(|e| e.sharpe)
            .fold(f64::NEG_INFINITY, f64::max);

        let report = TrainingReport {
            epochs_requested: self.config.epochs,
            steps: self.steps,
            learning_rate: self.config.learning_rate,
            hidden_width: self.config.hidden_width,
            num_assets: self.policy.num_assets(),
            num_rows: self.num_rows,
            final_sharpe,
            best_sharpe,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            epoch_metrics: self.epoch_metrics,
        };

        info!(
            "Training converged after {} epochs in {:.2}s: final sharpe={:.6}, best sharpe={:.6}",
            report.steps, report.elapsed_secs, report.final_sharpe, report.best_sharpe
        );

        Ok(TrainedPolicy {
            policy: self.policy.frozen(),
            device: self.config.device,
            report,
        })
    }
}

/// A policy whose parameters no longer take part in gradient tracking.
pub struct TrainedPolicy {
    pub(crate) policy: AllocationPolicy,
    pub(crate) device: candle_core::Device,
    pub report: TrainingReport,
}

impl TrainedPolicy {
    pub fn policy(&self) -> &AllocationPolicy {
        &self.policy
    }
}

/// Trains a fresh policy on `returns` for `config.epochs` iterations.
pub fn train_policy(returns: &ReturnMatrix, config: TrainConfig) -> Result<TrainedPolicy, AllocatorError> {
    Trainer::new(returns, config)?.run()
}
