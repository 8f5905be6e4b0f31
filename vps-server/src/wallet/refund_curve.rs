//! Piecewise-linear refund curve
//!
//! `refund_curve_json` holds `[{"percent": 0, "ratio": 1.0}, ...]` where
//! `percent` is the elapsed share of the billing period (0-100) and
//! `ratio` the refundable share of the amount. The legacy key `hours`
//! is read as `percent`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    #[serde(alias = "hours")]
    pub percent: f64,
    pub ratio: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefundCurve {
    points: Vec<CurvePoint>,
}

impl RefundCurve {
    /// Parse and normalize; `None` for blank, invalid or empty input
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let points: Vec<CurvePoint> = match serde_json::from_str(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid refund_curve_json, ignoring");
                return None;
            }
        };
        let curve = Self::from_points(points);
        (!curve.points.is_empty()).then_some(curve)
    }

    /// Drop negative or non-finite percents, clamp ratios, keep the last
    /// point per percent, sort ascending.
    pub fn from_points(points: Vec<CurvePoint>) -> Self {
        let mut out: Vec<CurvePoint> = Vec::with_capacity(points.len());
        for p in points {
            if !p.percent.is_finite() || p.percent < 0.0 || !p.ratio.is_finite() {
                continue;
            }
            let point = CurvePoint {
                percent: p.percent,
                ratio: p.ratio.clamp(0.0, 1.0),
            };
            match out.iter_mut().find(|q| q.percent == point.percent) {
                Some(existing) => *existing = point,
                None => out.push(point),
            }
        }
        out.sort_by(|a, b| a.percent.total_cmp(&b.percent));
        Self { points: out }
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Refundable ratio at `elapsed_percent`; flat outside the first and last point
    pub fn ratio_at(&self, elapsed_percent: f64) -> f64 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return 0.0;
        };
        if elapsed_percent <= first.percent {
            return first.ratio;
        }
        if elapsed_percent >= last.percent {
            return last.ratio;
        }
        for pair in self.points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if elapsed_percent <= b.percent {
                let span = b.percent - a.percent;
                if span <= 0.0 {
                    return b.ratio;
                }
                let t = (elapsed_percent - a.percent) / span;
                return a.ratio + (b.ratio - a.ratio) * t;
            }
        }
        last.ratio
    }
}
