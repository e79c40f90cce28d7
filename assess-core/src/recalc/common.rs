//! Shared numeric policy for the recalculation engine.
//!
//! All derived and aggregate values go through these helpers, so the
//! rounding and coercion rules live in exactly one place.

use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Rounds a decimal value to exactly two decimal places using half-up rounding.
///
/// Values at exactly 0.005 round away from zero, following standard
/// financial conventions.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use assess_core::recalc::common::round_half_up;
///
/// assert_eq!(round_half_up(dec!(123.454)), dec!(123.45));
/// assert_eq!(round_half_up(dec!(123.455)), dec!(123.46));
/// assert_eq!(round_half_up(dec!(-123.455)), dec!(-123.46)); // Away from zero
/// ```
pub fn round_half_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
}

/// Formats a decimal as a two-decimal-place string (`"10.00"`).
///
/// Derived fields and aggregates are stored in this form so a loaded
/// record displays the same text the engine produced.
pub fn format_amount(value: Decimal) -> String {
    let mut rounded = round_half_up(value);
    rounded.rescale(2);
    rounded.to_string()
}

/// Coerces numeric entry text to a decimal, leniently.
///
/// Empty and unparseable text count as zero. Nothing is rejected: the
/// forms this engine backs must never fail on in-progress typing, so a
/// typo silently contributes zero until corrected. Negative values are
/// accepted and propagated arithmetically.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use assess_core::recalc::common::coerce_numeric;
///
/// assert_eq!(coerce_numeric("100"), dec!(100));
/// assert_eq!(coerce_numeric(" 0.10 "), dec!(0.10));
/// assert_eq!(coerce_numeric(""), dec!(0));
/// assert_eq!(coerce_numeric("abc"), dec!(0));
/// assert_eq!(coerce_numeric("-25.5"), dec!(-25.5));
/// ```
pub fn coerce_numeric(text: &str) -> Decimal {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Decimal::ZERO;
    }

    match trimmed.parse::<Decimal>() {
        Ok(value) => {
            if value < Decimal::ZERO {
                warn!(input = text, "negative numeric input accepted");
            }
            value
        }
        Err(_) => {
            debug!(input = text, "unparseable numeric input coerced to zero");
            Decimal::ZERO
        }
    }
}
