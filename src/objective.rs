use candle_core::backprop::GradStore;
use candle_core::{DType, Result, Tensor, Var};

/// Realized return of each row's allocation: `sum_a weights[t][a] * returns[t][a]`.
///
/// Both inputs are `[rows, assets]`; the result is `[rows]`.
pub fn portfolio_returns(weights: &Tensor, returns: &Tensor) -> Result<Tensor> {
    weights.mul(returns)?.sum(1)
}

/// Empirical Sharpe ratio of a `[rows]` return series, as a scalar tensor.
///
/// Uses the population standard deviation (divide by `rows`) floored at
/// `std_floor`, so a constant series gives `mean / std_floor` instead of a
/// division by zero. Outliers are not clipped.
pub fn sharpe_ratio(portfolio: &Tensor, std_floor: f64) -> Result<Tensor> {
    let mean = portfolio.mean_all()?;
    let centered = portfolio.broadcast_sub(&mean)?;
    let variance = centered.sqr()?.mean_all()?;

    // Flooring the variance at floor^2 before the sqrt equals flooring the
    // std, and keeps the sqrt backward pass away from 0/0.
    let var_floor = Tensor::new(std_floor * std_floor, portfolio.device())?.to_dtype(variance.dtype())?;
    let std = variance.maximum(&var_floor)?.sqrt()?;

    mean.div(&std)
}

/// Training loss: negated Sharpe ratio of the allocations against realized returns.
pub fn sharpe_loss(weights: &Tensor, returns: &Tensor, std_floor: f64) -> Result<Tensor> {
    let portfolio = portfolio_returns(weights, returns)?;
    sharpe_ratio(&portfolio, std_floor)?.neg()
}

/// Rescales the gradients of `vars` in place so their global L2 norm is at
/// most `max_norm`. Returns the norm measured before clipping.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let mut total_sq = 0.0f64;
    for var in vars {
        if let Some(g) = grads.get(var) {
            total_sq += g.to_dtype(DType::F64)?.sqr()?.sum_all()?.to_scalar::<f64>()?;
        }
    }
    let total_norm = total_sq.sqrt();

    let clip_coef = max_norm / (total_norm + 1e-6);
    if clip_coef < 1.0 {
        for var in vars {
            if let Some(g) = grads.remove(var) {
                grads.insert(var, g.affine(clip_coef, 0.0)?);
            }
        }
    }

    Ok(total_norm)
}
