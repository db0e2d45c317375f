use crate::data::ReturnMatrix;
use crate::error::AllocatorError;
use crate::models::AllocationPolicy;
use crate::train::TrainedPolicy;
use candle_core::{DType, Device};

/// Evaluates `policy` once on the most recent return row and returns one
/// weight per asset.
///
/// The observation is detached, so no gradient graph is recorded. Non-finite
/// weights come back as `0.0` and the vector is *not* renormalized afterwards,
/// so in that (rare) case the sum can fall short of one.
pub fn infer_allocation(
    policy: &AllocationPolicy,
    returns: &ReturnMatrix,
    device: &Device,
) -> Result<Vec<f64>, AllocatorError> {
    if returns.num_assets() != policy.num_assets() {
        return Err(AllocatorError::Training(format!(
            "policy was trained on {} assets but the observation has {}",
            policy.num_assets(),
            returns.num_assets()
        )));
    }

    let state = returns.last_row_tensor(device)?.detach();
    let weights = policy
        .evaluate(&state)?
        .detach()
        .squeeze(0)?
        .to_dtype(DType::F64)?
        .to_vec1::<f64>()?;

    Ok(weights
        .into_iter()
        .map(|w| if w.is_finite() { w } else { 0.0 })
        .collect())
}

impl TrainedPolicy {
    /// Allocation for the last row of `returns`.
    pub fn allocate(&self, returns: &ReturnMatrix) -> Result<Vec<f64>, AllocatorError> {
        infer_allocation(&self.policy, returns, &self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainConfig;
    use crate::data::log_returns;
    use crate::train::train_policy;

    #[test]
    fn test_allocation_matches_asset_count() {
        let returns = log_returns(&[
            vec![100.0, 50.0, 10.0],
            vec![101.0, 49.0, 10.2],
            vec![103.0, 51.0, 9.9],
        ])
        .unwrap();
        let trained = train_policy(&returns, TrainConfig::default().with_epochs(3).with_seed(4)).unwrap();
        let weights = trained.allocate(&returns).unwrap();

        assert_eq!(weights.len(), 3);
        assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_uses_only_last_row() {
        let device = Device::Cpu;
        let policy = AllocationPolicy::new(2, 8, Some(8), &device).unwrap();

        let a = ReturnMatrix::from_rows(&[vec![0.5, -0.5], vec![0.01, 0.02]]).unwrap();
        let b = ReturnMatrix::from_rows(&[vec![-0.3, 0.9], vec![0.2, 0.2], vec![0.01, 0.02]]).unwrap();
        assert_eq!(
            infer_allocation(&policy, &a, &device).unwrap(),
            infer_allocation(&policy, &b, &device).unwrap()
        );
    }

    #[test]
    fn test_asset_count_mismatch_rejected() {
        let device = Device::Cpu;
        let policy = AllocationPolicy::new(2, 8, Some(8), &device).unwrap();
        let returns = ReturnMatrix::from_rows(&[vec![0.1, 0.2, 0.3]]).unwrap();
        assert!(matches!(
            infer_allocation(&policy, &returns, &device),
            Err(AllocatorError::Training(_))
        ));
    }
}
