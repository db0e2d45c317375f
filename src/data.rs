use crate::error::AllocatorError;
use candle_core::{Device, Tensor};

/// Log returns of an aligned price panel, `rows` time steps by `assets` columns.
///
/// Stored row-major as `f32`, the dtype the policy trains in. Every entry is
/// finite: anything that is not gets replaced by `0.0` on construction.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnMatrix {
    rows: usize,
    assets: usize,
    values: Vec<f32>,
}

/// Coerces NaN and ±inf to zero.
///
/// This masks bad prices (zero, negative, missing) instead of failing the
/// run; callers that care should validate prices before getting here.
fn sanitize(v: f32) -> f32 {
    if v.is_finite() { v } else { 0.0 }
}

fn check_width<T>(rows: &[Vec<T>]) -> Result<usize, AllocatorError> {
    let assets = rows[0].len();
    if assets == 0 {
        return Err(AllocatorError::InsufficientData(
            "no assets in input (zero columns)".to_string(),
        ));
    }
    if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != assets) {
        return Err(AllocatorError::InsufficientData(format!(
            "row {} has {} columns, expected {} (misaligned input)",
            idx,
            row.len(),
            assets
        )));
    }
    Ok(assets)
}

impl ReturnMatrix {
    /// Converts aligned prices (rows ascending in time, one column per asset)
    /// into `ln(p[t+1] / p[t])`. Needs at least two rows.
    pub fn from_prices(prices: &[Vec<f64>]) -> Result<Self, AllocatorError> {
        if prices.len() < 2 {
            return Err(AllocatorError::InsufficientData(format!(
                "need at least 2 aligned price rows to compute returns, got {}",
                prices.len()
            )));
        }
        let assets = check_width(prices)?;

        let values = prices
            .windows(2)
            .flat_map(|w| {
                w[0].iter()
                    .zip(w[1].iter())
                    .map(|(prev, next)| sanitize((next / prev).ln() as f32))
            })
            .collect();

        Ok(Self { rows: prices.len() - 1, assets, values })
    }

    /// Wraps returns computed elsewhere, applying the same sanitization.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, AllocatorError> {
        if rows.is_empty() {
            return Err(AllocatorError::InsufficientData(
                "return matrix has no rows".to_string(),
            ));
        }
        let assets = check_width(rows)?;
        let values = rows.iter().flatten().map(|&v| sanitize(v)).collect();
        Ok(Self { rows: rows.len(), assets, values })
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn num_assets(&self) -> usize {
        self.assets
    }

    pub fn row(&self, t: usize) -> &[f32] {
        &self.values[t * self.assets..(t + 1) * self.assets]
    }

    /// The most recent observation.
    pub fn last_row(&self) -> &[f32] {
        self.row(self.rows - 1)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Whole matrix as a `[rows, assets]` tensor.
    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(&self.values, (self.rows, self.assets), device)
    }

    /// Last row as a `[1, assets]` batch.
    pub fn last_row_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(self.last_row(), (1, self.assets), device)
    }
}

/// Return Preprocessor entry point.
pub fn log_returns(prices: &[Vec<f64>]) -> Result<ReturnMatrix, AllocatorError> {
    ReturnMatrix::from_prices(prices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_returns_shape_and_values() {
        let prices = vec![
            vec![100.0, 50.0],
            vec![101.0, 49.0],
            vec![103.0, 51.0],
            vec![102.0, 52.0],
        ];
        let returns = log_returns(&prices).unwrap();

        assert_eq!(returns.num_rows(), 3);
        assert_eq!(returns.num_assets(), 2);
        assert!(returns.as_slice().iter().all(|v| v.is_finite()));

        let expected = (101.0f64 / 100.0).ln() as f32;
        assert!((returns.row(0)[0] - expected).abs() < 1e-7);
        let expected = (52.0f64 / 51.0).ln() as f32;
        assert!((returns.last_row()[1] - expected).abs() < 1e-7);
    }

    #[test]
    fn test_log_returns_is_pure() {
        let prices = vec![vec![10.0, 20.0, 30.0], vec![11.0, 19.5, 31.0], vec![10.5, 21.0, 29.0]];
        let a = log_returns(&prices).unwrap();
        let b = log_returns(&prices).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_single_row_is_insufficient() {
        let result = log_returns(&[vec![100.0, 50.0]]);
        assert!(matches!(result, Err(AllocatorError::InsufficientData(_))));

        let result = log_returns(&[]);
        assert!(matches!(result, Err(AllocatorError::InsufficientData(_))));
    }

    #[test]
    fn test_zero_assets_is_insufficient() {
        let result = log_returns(&[vec![], vec![]]);
        assert!(matches!(result, Err(AllocatorError::InsufficientData(_))));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = log_returns(&[vec![1.0, 2.0], vec![1.0]]);
        assert!(matches!(result, Err(AllocatorError::InsufficientData(_))));
    }

    #[test]
    fn test_bad_prices_sanitized_to_zero() {
        // zero, negative and NaN prices all produce non-finite logs
        let prices = vec![
            vec![0.0, 10.0, f64::NAN],
            vec![5.0, -10.0, 3.0],
            vec![6.0, 11.0, 3.0],
        ];
        let returns = log_returns(&prices).unwrap();
        assert_eq!(returns.row(0), &[0.0f32; 3]);
        assert_eq!(returns.row(1)[1], 0.0);
        assert!((returns.row(1)[0] - (6.0f64 / 5.0).ln() as f32).abs() < 1e-7);
        assert!(returns.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_from_rows_sanitizes() {
        let rows = vec![vec![0.01, f32::NAN], vec![f32::INFINITY, f32::NEG_INFINITY]];
        let returns = ReturnMatrix::from_rows(&rows).unwrap();
        assert_eq!(returns.as_slice(), &[0.01f32, 0.0, 0.0, 0.0]);
        assert!(matches!(
            ReturnMatrix::from_rows(&[]),
            Err(AllocatorError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_tensor_views() -> candle_core::Result<()> {
        let prices = vec![vec![1.0, 2.0], vec![2.0, 2.0], vec![4.0, 1.0]];
        let returns = log_returns(&prices).unwrap();
        let device = Device::Cpu;

        let full = returns.to_tensor(&device)?;
        assert_eq!(full.dims(), &[2, 2]);
        let last = returns.last_row_tensor(&device)?;
        assert_eq!(last.dims(), &[1, 2]);
        assert_eq!(last.to_vec2::<f32>()?[0], returns.last_row().to_vec());
        Ok(())
    }
}
