// Lookup date salting
// Shifts the search window by a few random days on every run so the provider never sees
// the exact same query twice in a row

use chrono::{Days, NaiveDate, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Lookup dates as the caller sends them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LookupDate {
    pub outbound_date: String,
    pub return_date: String,
    pub salty_days: u32,
}

/// Parsed search window plus how many days of salt remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupWindow {
    pub outbound: NaiveDate,
    pub inbound: NaiveDate,
    pub salt_budget: u32,
}

/// Source of the two draws salting needs.
pub trait RandomSource {
    fn coin_flip(&mut self) -> bool;

    /// Uniform in `[0, upper)`. Returns 0 when `upper` is 0.
    fn below(&mut self, upper: u32) -> u32;
}

/// Adapts any `rand` generator into a [`RandomSource`].
#[derive(Debug, Clone)]
pub struct RngSource<R>(pub R);

impl RngSource<StdRng> {
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> RandomSource for RngSource<R> {
    fn coin_flip(&mut self) -> bool {
        self.0.gen_bool(0.5)
    }

    fn below(&mut self, upper: u32) -> u32 {
        if upper == 0 {
            return 0;
        }
        self.0.gen_range(0..upper)
    }
}

fn parse_or_today(raw: &str, field: &'static str) -> NaiveDate {
    match NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        Ok(date) => date,
        Err(e) => {
            let today = Utc::now().date_naive();
            warn!(field, raw, error = %e, %today, "unparseable lookup date, falling back to today");
            today
        }
    }
}

fn shift(date: NaiveDate, days: u32, forward: bool) -> Option<NaiveDate> {
    let days = Days::new(days as u64);
    if forward {
        date.checked_add_days(days)
    } else {
        date.checked_sub_days(days)
    }
}

impl LookupWindow {
    /// Unparseable dates degrade to today's date (UTC) with a warning instead of failing the run.
    pub fn from_lookup_date(raw: &LookupDate) -> Self {
        Self {
            outbound: parse_or_today(&raw.outbound_date, "outbound_date"),
            inbound: parse_or_today(&raw.return_date, "return_date"),
            salt_budget: raw.salty_days,
        }
    }

    /// Returns a new window with both dates moved by the same random number of days in a
    /// random direction. The budget shrinks by the magnitude of the move. A move that would
    /// leave the calendar range is not applied and costs nothing.
    pub fn apply_salt(&self, random: &mut dyn RandomSource) -> LookupWindow {
        let forward = random.coin_flip();
        let magnitude = random.below(self.salt_budget).min(self.salt_budget);

        match (
            shift(self.outbound, magnitude, forward),
            shift(self.inbound, magnitude, forward),
        ) {
            (Some(outbound), Some(inbound)) => LookupWindow {
                outbound,
                inbound,
                salt_budget: self.salt_budget - magnitude,
            },
            _ => *self,
        }
    }

    pub fn outbound_date(&self) -> String {
        self.outbound.format(DATE_FORMAT).to_string()
    }

    pub fn return_date(&self) -> String {
        self.inbound.format(DATE_FORMAT).to_string()
    }

    pub fn to_lookup_date(&self) -> LookupDate {
        LookupDate {
            outbound_date: self.outbound_date(),
            return_date: self.return_date(),
            salty_days: self.salt_budget,
        }
    }
}
