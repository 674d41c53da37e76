use crate::model::{DealGrade, GradeLetter, StatGroup};

pub const DEFAULT_DISCOUNT_MULTIPLIER: f64 = 0.9;
pub const DEFAULT_DISPERSION_THRESHOLD: f64 = 1.5;

/// Tunable constants of the grading ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradePolicy {
    pub discount_multiplier: f64,
    pub dispersion_threshold: f64,
}

impl Default for GradePolicy {
    fn default() -> Self {
        Self {
            discount_multiplier: DEFAULT_DISCOUNT_MULTIPLIER,
            dispersion_threshold: DEFAULT_DISPERSION_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeInput {
    pub total_cents: i64,
    pub p10: i64,
    pub p50: i64,
    pub p90: i64,
    pub dispersion_ratio: f64,
}

impl GradeInput {
    pub fn new(total_cents: i64, group: &StatGroup) -> Self {
        Self {
            total_cents,
            p10: group.p10,
            p50: group.p50,
            p90: group.p90,
            dispersion_ratio: group.dispersion_ratio,
        }
    }
}

/// Letter grade for a total against its comparison population.
///
/// A at or below p10, B at or below `discount_multiplier * p50`, C at or below p90,
/// D above. A noisy population (dispersion above the threshold) caps the grade at B.
pub fn grade_deal(input: GradeInput, policy: &GradePolicy) -> DealGrade {
    let total = input.total_cents as f64;
    let p50 = input.p50 as f64;
    if input.total_cents <= 0 || input.p50 <= 0 || !input.dispersion_ratio.is_finite() {
        return DealGrade::ungraded();
    }

    let delta_pct = (p50 - total) / p50;

    let mut letter = if input.total_cents <= input.p10 {
        GradeLetter::A
    } else if total <= policy.discount_multiplier * p50 {
        GradeLetter::B
    } else if input.total_cents <= input.p90 {
        GradeLetter::C
    } else {
        GradeLetter::D
    };

    if letter == GradeLetter::A && input.dispersion_ratio > policy.dispersion_threshold {
        letter = GradeLetter::B;
    }

    DealGrade {
        letter: Some(letter),
        label: Some(letter.label()),
        delta_pct: Some(delta_pct),
    }
}
