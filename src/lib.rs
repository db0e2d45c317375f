//! Sharpe-maximizing portfolio allocation.
//!
//! A small feed-forward policy maps each day's log-return vector to portfolio
//! weights on the simplex. It is trained by gradient ascent on the empirical
//! Sharpe ratio of its own allocations over the history, then applied once to
//! the latest observation.
//!
//! ```no_run
//! use sharpe_allocator::{optimize_allocation, TrainConfig};
//!
//! let prices = vec![vec![100.0, 50.0], vec![101.0, 49.0], vec![103.0, 51.0]];
//! let allocation = optimize_allocation(&prices, TrainConfig::default().with_seed(7))?;
//! println!("{:?}", allocation.weights);
//! # Ok::<(), sharpe_allocator::AllocatorError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod inference;
pub mod models;
pub mod objective;
pub mod prices;
pub mod train;

pub use config::TrainConfig;
pub use data::{ReturnMatrix, log_returns};
pub use error::AllocatorError;
pub use inference::infer_allocation;
pub use models::AllocationPolicy;
pub use train::{TrainedPolicy, Trainer, TrainerState, TrainingReport, train_policy};

use serde::{Deserialize, Serialize};

/// Final weights plus the summary of the run that produced them.
#[derive(Clone, Debug)]
pub struct Allocation {
    /// One weight per asset, in input column order.
    pub weights: Vec<f64>,
    pub report: TrainingReport,
}

/// Wire shape printed by the binary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationOutput {
    pub optimal_weights: Vec<f64>,
}

impl From<&Allocation> for AllocationOutput {
    fn from(allocation: &Allocation) -> Self {
        Self { optimal_weights: allocation.weights.clone() }
    }
}

/// Prices `(T >= 2, N >= 1)` in, allocation out.
pub fn optimize_allocation(prices: &[Vec<f64>], config: TrainConfig) -> Result<Allocation, AllocatorError> {
    let returns = log_returns(prices)?;
    allocate_from_returns(&returns, config)
}

/// Trains from scratch on `returns` and allocates for its last row.
/// The trained policy is dropped before returning.
pub fn allocate_from_returns(returns: &ReturnMatrix, config: TrainConfig) -> Result<Allocation, AllocatorError> {
    let trained = train_policy(returns, config)?;
    let weights = trained.allocate(returns)?;
    Ok(Allocation { weights, report: trained.report })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_valid_allocation(weights: &[f64], n: usize) {
        assert_eq!(weights.len(), n);
        assert!(weights.iter().all(|w| w.is_finite()));
        assert!(weights.iter().all(|&w| (0.0..=1.0).contains(&w)), "{:?}", weights);
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "weights should sum to ~1.0, got {}", sum);
    }

    #[test]
    fn test_two_asset_end_to_end() {
        let prices = vec![
            vec![100.0, 50.0],
            vec![101.0, 49.0],
            vec![103.0, 51.0],
            vec![102.0, 52.0],
        ];
        let returns = log_returns(&prices).unwrap();
        assert_eq!((returns.num_rows(), returns.num_assets()), (3, 2));

        let allocation = optimize_allocation(&prices, TrainConfig::default()).unwrap();
        assert_eq!(allocation.report.steps, 50);
        assert_valid_allocation(&allocation.weights, 2);
    }

    #[test]
    fn test_single_asset_gets_everything() {
        let prices = vec![vec![10.0], vec![11.0], vec![9.0], vec![12.0]];
        for seed in [0u64, 1, 99] {
            let allocation = optimize_allocation(&prices, TrainConfig::default().with_seed(seed)).unwrap();
            assert_eq!(allocation.weights, vec![1.0]);
        }
        let allocation = optimize_allocation(&prices, TrainConfig::default()).unwrap();
        assert_eq!(allocation.weights, vec![1.0]);
    }

    #[test]
    fn test_single_price_row_is_insufficient() {
        let result = optimize_allocation(&[vec![100.0, 50.0]], TrainConfig::default());
        assert!(matches!(result, Err(AllocatorError::InsufficientData(_))));
    }

    #[test]
    fn test_non_finite_returns_do_not_reach_weights() {
        let rows = vec![
            vec![0.01, f32::NAN, -0.02],
            vec![f32::INFINITY, 0.03, 0.0],
            vec![-0.01, 0.02, f32::NEG_INFINITY],
            vec![0.02, -0.01, 0.01],
        ];
        let returns = ReturnMatrix::from_rows(&rows).unwrap();
        assert!(returns.as_slice().iter().all(|v| v.is_finite()));

        let allocation = allocate_from_returns(&returns, TrainConfig::default().with_seed(17)).unwrap();
        assert_valid_allocation(&allocation.weights, 3);
    }

    #[test]
    fn test_zero_price_is_sanitized_end_to_end() {
        let prices = vec![vec![100.0, 0.0], vec![101.0, 10.0], vec![102.0, 11.0]];
        let allocation = optimize_allocation(&prices, TrainConfig::default().with_seed(5)).unwrap();
        assert_valid_allocation(&allocation.weights, 2);
    }

    #[test]
    fn test_same_seed_same_weights() {
        let prices = vec![
            vec![100.0, 50.0, 30.0],
            vec![99.0, 51.0, 30.5],
            vec![101.5, 50.5, 29.0],
            vec![102.0, 52.5, 29.5],
            vec![100.5, 53.0, 31.0],
        ];
        let config = TrainConfig::default().with_seed(1234);
        let a = optimize_allocation(&prices, config.clone()).unwrap();
        let b = optimize_allocation(&prices, config).unwrap();
        assert_eq!(a.weights, b.weights);
    }

    #[test]
    fn test_zero_epochs_rejected_before_training() {
        let prices = vec![vec![1.0, 2.0], vec![1.1, 2.1]];
        let result = optimize_allocation(&prices, TrainConfig::default().with_epochs(0));
        assert!(matches!(result, Err(AllocatorError::InvalidConfig(_))));
    }

    #[test]
    fn test_output_json_shape() {
        let output = AllocationOutput { optimal_weights: vec![0.25, 0.75] };
        let json = serde_json::to_string(&output).unwrap();
        assert_eq!(json, r#"{"optimal_weights":[0.25,0.75]}"#);
    }
}
