use super::rates::{RATE_EPSILON, annual_equivalent, annuity_pv_factor, compound};
use super::types::{LiquidityEvent, Recurrence};

// Lump flows (once/annual) land at the start of the year; monthly flows are
// carried as their annual equivalent, already accrued to year end.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YearEvents {
    pub lump: f64,
    pub monthly_equivalent: f64,
}

impl YearEvents {
    pub fn net(self) -> f64 {
        self.lump + self.monthly_equivalent
    }
}

fn signed(event: &LiquidityEvent, amount: f64) -> f64 {
    if event.is_positive { amount } else { -amount }
}

// Active coverage of an event, clamped so that start <= end <= cap. A malformed
// end_age below start_age collapses to a single year at start_age.
fn coverage(event: &LiquidityEvent, fallback_age: u32, cap: u32) -> Option<(u32, u32)> {
    let start = event.effective_start_age(fallback_age);
    if start > cap {
        return None;
    }
    let end = event.effective_end_age(cap).max(start);
    Some((start, end))
}

pub(crate) fn events_for_year(
    events: &[LiquidityEvent],
    age: u32,
    fallback_age: u32,
    cap: u32,
    monthly_rate: f64,
) -> YearEvents {
    let mut year = YearEvents::default();
    for event in events.iter().filter(|e| e.is_active()) {
        let Some((start, end)) = coverage(event, fallback_age, cap) else {
            continue;
        };
        match event.recurrence {
            Recurrence::Once => {
                if age == start {
                    year.lump += signed(event, event.value);
                }
            }
            Recurrence::Annual => {
                if age >= start && age <= end {
                    year.lump += signed(event, event.value);
                }
            }
            Recurrence::Monthly => {
                if age >= start && age <= end {
                    year.monthly_equivalent +=
                        signed(event, annual_equivalent(event.value, monthly_rate));
                }
            }
        }
    }
    year
}

pub(crate) fn future_value_at_retirement(
    events: &[LiquidityEvent],
    current_age: u32,
    retirement_age: u32,
    monthly_rate: f64,
) -> f64 {
    if retirement_age <= current_age {
        return 0.0;
    }
    let cap = retirement_age - 1;

    let mut total = 0.0;
    for event in events.iter().filter(|e| e.is_active()) {
        let Some((start, end)) = coverage(event, current_age, cap) else {
            continue;
        };
        let from = start.max(current_age);
        match event.recurrence {
            Recurrence::Once => {
                if start >= current_age {
                    let months = (retirement_age - start) * 12;
                    total += signed(event, event.value) * compound(monthly_rate, months as i32);
                }
            }
            Recurrence::Annual => {
                for age in from..=end {
                    let months = (retirement_age - age) * 12;
                    total += signed(event, event.value) * compound(monthly_rate, months as i32);
                }
            }
            Recurrence::Monthly => {
                for age in from..=end {
                    let months = (retirement_age - age - 1) * 12;
                    total += signed(event, annual_equivalent(event.value, monthly_rate))
                        * compound(monthly_rate, months as i32);
                }
            }
        }
    }
    total
}

pub(crate) fn present_value_at_retirement(
    events: &[LiquidityEvent],
    retirement_age: u32,
    horizon_cap: u32,
    fallback_age: u32,
    monthly_rate: f64,
) -> f64 {
    if horizon_cap < retirement_age {
        return 0.0;
    }

    let mut total = 0.0;
    for event in events.iter().filter(|e| e.is_active()) {
        let Some((start, end)) = coverage(event, fallback_age, horizon_cap) else {
            continue;
        };
        match event.recurrence {
            Recurrence::Once => {
                if start >= retirement_age {
                    let months = (start - retirement_age) * 12;
                    total += signed(event, event.value) * compound(monthly_rate, -(months as i32));
                }
            }
            Recurrence::Annual => {
                let from = start.max(retirement_age);
                for age in from..=end {
                    let months = (age - retirement_age) * 12;
                    total += signed(event, event.value) * compound(monthly_rate, -(months as i32));
                }
            }
            Recurrence::Monthly => {
                let from = start.max(retirement_age);
                if end < from {
                    continue;
                }
                let pv_at_start = if end >= horizon_cap && monthly_rate.abs() >= RATE_EPSILON {
                    // Stream runs to the horizon cap: value it as the
                    // perpetuity-equivalent capital at its first covered year.
                    event.value / monthly_rate
                } else {
                    let months = (end - from + 1) * 12;
                    event.value * annuity_pv_factor(monthly_rate, months)
                };
                let discount_months = (from - retirement_age) * 12;
                total += signed(event, pv_at_start) * compound(monthly_rate, -(discount_months as i32));
            }
        }
    }
    total
}
