//! Exact proration in 128-bit integers

use crate::settings::Rounding;

/// `num / den` rounded per `rounding`; `den` must be positive.
///
/// `Round` is half-to-even, `Ceil` toward +∞, `Floor` toward −∞.
pub fn div_round(num: i128, den: i128, rounding: Rounding) -> i128 {
    debug_assert!(den > 0);
    let q = num.div_euclid(den);
    let r = num.rem_euclid(den);
    if r == 0 {
        return q;
    }
    match rounding {
        Rounding::Floor => q,
        Rounding::Ceil => q + 1,
        Rounding::Round => match (2 * r).cmp(&den) {
            std::cmp::Ordering::Less => q,
            std::cmp::Ordering::Greater => q + 1,
            std::cmp::Ordering::Equal if q % 2 == 0 => q,
            std::cmp::Ordering::Equal => q + 1,
        },
    }
}

/// Share of `diff` for `remaining` out of `total`. Without a usable
/// period the whole difference applies.
pub fn prorate(diff: i64, remaining: i64, total: i64, rounding: Rounding) -> i64 {
    if total <= 0 {
        return diff;
    }
    let remaining = remaining.clamp(0, total);
    let value = div_round(diff as i128 * remaining as i128, total as i128, rounding);
    i64::try_from(value).unwrap_or(diff)
}
