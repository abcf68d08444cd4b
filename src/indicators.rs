//! Momentum oscillator (simplified RSI).
//! One window, no smoothing across successive windows.

/// Lookback window; each series fetch asks for `RSI_PERIOD + 1` candles.
pub const RSI_PERIOD: usize = 14;

/// Compute the momentum oscillator over the first `period` points of `prices`.
///
/// Bounded to [0, 100]. Returns `None` when fewer than `period` samples are
/// available. Deterministic given the window alone.
pub fn momentum(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..period {
        let delta = prices[i] - prices[i - 1];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses += -delta;
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    // All-gain window: maximal momentum, avoids the zero division
    if avg_loss == 0.0 {
        return Some(100.0);
    }

    Some(100.0 - 100.0 / (1.0 + avg_gain / avg_loss))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_few_samples() {
        let prices: Vec<f64> = (0..13).map(|i| 100.0 + i as f64).collect();
        assert!(momentum(&prices, 14).is_none());
        assert!(momentum(&[], 14).is_none());
    }

    #[test]
    fn test_all_decreasing_is_zero() {
        let prices: Vec<f64> = (0..15).map(|i| 100.0 - i as f64).collect();
        let m = momentum(&prices, 14).unwrap();
        assert!(m.abs() < 1e-9);
    }

    #[test]
    fn test_all_increasing_is_hundred() {
        let prices: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        let m = momentum(&prices, 14).unwrap();
        assert!((m - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_mixed_window() {
        // deltas: +1, -2, +3 -> avg_gain = 1.0, avg_loss = 0.5, rs = 2
        let prices = vec![10.0, 11.0, 9.0, 12.0];
        let m = momentum(&prices, 4).unwrap();
        assert!((m - 66.6667).abs() < 1e-3);
    }

    #[test]
    fn test_ignores_samples_beyond_window() {
        let prices = vec![10.0, 11.0, 9.0, 12.0];
        let mut longer = prices.clone();
        longer.push(999.0);
        assert_eq!(momentum(&prices, 4), momentum(&longer, 4));
    }
}
