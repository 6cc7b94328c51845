// Geometric factors degrade to linear sums below this threshold to avoid
// dividing by a vanishing rate.
pub(crate) const RATE_EPSILON: f64 = 1e-10;

pub fn monthly_rate(annual_rate: f64) -> f64 {
    (1.0 + annual_rate).powf(1.0 / 12.0) - 1.0
}

pub(crate) fn compound(monthly_rate: f64, months: i32) -> f64 {
    if monthly_rate.abs() < RATE_EPSILON {
        return 1.0;
    }
    (1.0 + monthly_rate).powi(months)
}

pub(crate) fn annuity_pv_factor(monthly_rate: f64, months: u32) -> f64 {
    if monthly_rate.abs() < RATE_EPSILON {
        return months as f64;
    }
    (1.0 - compound(monthly_rate, -(months as i32))) / monthly_rate
}

pub(crate) fn annuity_fv_factor(monthly_rate: f64, months: u32) -> f64 {
    if monthly_rate.abs() < RATE_EPSILON {
        return months as f64;
    }
    (compound(monthly_rate, months as i32) - 1.0) / monthly_rate
}

// Year-end value of twelve level monthly payments.
pub(crate) fn annual_equivalent(monthly_value: f64, monthly_rate: f64) -> f64 {
    monthly_value * annuity_fv_factor(monthly_rate, 12)
}
