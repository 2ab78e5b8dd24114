//! Rise-from-low momentum trigger.
//!
//! The multi-token scan enters when the newest price has climbed a
//! configured fraction above the lowest price seen inside the look-back
//! window. Fractional, not absolute, so one threshold works across tokens
//! with very different price levels.

use rust_decimal::Decimal;

/// Fractional rise of the newest price over the minimum of the last
/// `window` prices. Returns `None` when the history is empty or the
/// window minimum is zero.
///
/// The newest price itself participates in the minimum, so a fresh low
/// reports a rise of zero rather than a negative value.
#[must_use]
pub fn rise_from_low(prices: &[Decimal], window: usize) -> Option<Decimal> {
    let last = *prices.last()?;
    let skip = prices.len().saturating_sub(window.max(1));
    let min = prices[skip..].iter().copied().min()?;
    if min <= Decimal::ZERO {
        return None;
    }
    Some((last - min) / min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rise_measured_from_window_minimum() {
        let prices = vec![dec!(100), dec!(90), dec!(95), dec!(99)];
        // min over the full window is 90, last is 99 -> +10%.
        assert_eq!(rise_from_low(&prices, 10), Some(dec!(0.1)));
    }

    #[test]
    fn window_limits_the_minimum() {
        let prices = vec![dec!(50), dec!(100), dec!(102), dec!(104)];
        // Window of 3 excludes the 50 low.
        assert_eq!(rise_from_low(&prices, 3), Some(dec!(0.04)));
    }

    #[test]
    fn fresh_low_reports_zero() {
        let prices = vec![dec!(100), dec!(95), dec!(90)];
        assert_eq!(rise_from_low(&prices, 10), Some(dec!(0)));
    }

    #[test]
    fn empty_history_is_none() {
        assert_eq!(rise_from_low(&[], 10), None);
    }

    #[test]
    fn zero_minimum_is_none() {
        let prices = vec![dec!(0), dec!(1)];
        assert_eq!(rise_from_low(&prices, 10), None);
    }
}
