use crate::analysis::stats::{mean, quantile, sample_std, sorted};
use crate::models::analysis::RiskMetrics;

pub const TRADING_DAYS: f64 = 252.0;

/// Largest peak-to-trough decline as a negative fraction, 0 when prices
/// never fall below a prior peak.
pub fn max_drawdown(prices: &[f64]) -> f64 {
    let Some(&first) = prices.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0_f64;
    for &p in prices {
        if p > peak {
            peak = p;
        }
        if peak > 0.0 {
            let dd = (p - peak) / peak;
            if dd < max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Historical VaR: the `1 - confidence` quantile of returns.
pub fn historical_var(returns: &[f64], confidence: f64) -> f64 {
    quantile(&sorted(returns), 1.0 - confidence)
}

/// Mean of the returns at or below the VaR (always at least the worst one).
pub fn conditional_var(returns: &[f64], var: f64) -> f64 {
    let s = sorted(returns);
    let tail: Vec<f64> = s.iter().copied().take_while(|r| *r <= var).collect();
    if tail.is_empty() {
        s.first().copied().unwrap_or(0.0)
    } else {
        mean(&tail)
    }
}

pub fn risk_metrics(symbol: &str, prices: &[f64], returns: &[f64], confidence: f64) -> RiskMetrics {
    let volatility = sample_std(returns);
    let var = historical_var(returns, confidence);
    RiskMetrics {
        symbol: symbol.to_string(),
        volatility,
        annualized_volatility: volatility * TRADING_DAYS.sqrt(),
        max_drawdown: max_drawdown(prices),
        value_at_risk: var,
        conditional_var: conditional_var(returns, var),
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drawdown_from_peak() {
        let dd = max_drawdown(&[100.0, 110.0, 90.0, 95.0]);
        assert!((dd - (90.0 - 110.0) / 110.0).abs() < 1e-12);
        assert_eq!(max_drawdown(&[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn var_and_cvar_on_uniform_returns() {
        // -0.10, -0.09, ..., 0.09 (20 values)
        let returns: Vec<f64> = (0..20).map(|i| (i as f64 - 10.0) / 100.0).collect();
        let var = historical_var(&returns, 0.95);
        // position 0.05 * 19 = 0.95 between -0.10 and -0.09
        assert!((var - (-0.0905)).abs() < 1e-12);
        let cvar = conditional_var(&returns, var);
        assert!((cvar - (-0.10)).abs() < 1e-12);
        assert!(cvar <= var);
    }

    #[test]
    fn annualized_volatility_scales_by_sqrt_252() {
        let prices = [100.0, 101.0, 99.0, 102.0, 100.0];
        let returns = crate::analysis::stats::simple_returns(&prices);
        let m = risk_metrics("AAPL", &prices, &returns, 0.95);
        assert!((m.annualized_volatility - m.volatility * 252f64.sqrt()).abs() < 1e-12);
        assert!(m.max_drawdown < 0.0);
    }
}
