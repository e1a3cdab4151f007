//! Donation eligibility, unit freshness and stock-level rules.
//!
//! Everything here is a pure function of its inputs. Callers pass the current
//! date explicitly so that the rules can be checked against any calendar day;
//! [`today`] supplies the real one.
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Days a donated unit stays usable when no explicit expiration is given.
pub const SHELF_LIFE_DAYS: u32 = 35;
/// Minimum days between two donations from the same donor.
pub const ELIGIBILITY_INTERVAL_DAYS: u32 = 56;
/// A unit expiring within this many days is flagged as expiring soon.
pub const EXPIRING_SOON_DAYS: u32 = 7;
/// Fewer available units than this is reported as low stock.
pub const LOW_STOCK_THRESHOLD: usize = 5;
/// Fewer available units than this (but not low) is reported as medium stock.
pub const MEDIUM_STOCK_THRESHOLD: usize = 10;
/// Upper bound on units a single request may ask for.
pub const MAX_UNITS_PER_REQUEST: u8 = 10;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StockLevel {
    Low,
    Medium,
    Good,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Policy {
    pub shelf_life_days: u32,
    pub eligibility_interval_days: u32,
    pub expiring_soon_days: u32,
    pub low_stock_threshold: usize,
    pub medium_stock_threshold: usize,
    pub max_units_per_request: u8,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            shelf_life_days: SHELF_LIFE_DAYS,
            eligibility_interval_days: ELIGIBILITY_INTERVAL_DAYS,
            expiring_soon_days: EXPIRING_SOON_DAYS,
            low_stock_threshold: LOW_STOCK_THRESHOLD,
            medium_stock_threshold: MEDIUM_STOCK_THRESHOLD,
            max_units_per_request: MAX_UNITS_PER_REQUEST,
        }
    }
}

/// Current UTC calendar date.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Whole calendar days from `from` to `to`; negative when `to` is earlier.
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

impl Policy {
    pub fn is_eligible(&self, last_donation: Option<NaiveDate>, today: NaiveDate) -> bool {
        match last_donation {
            None => true,
            Some(last) => days_between(last, today) >= i64::from(self.eligibility_interval_days),
        }
    }

    pub fn days_until_eligible(&self, last_donation: Option<NaiveDate>, today: NaiveDate) -> u32 {
        let Some(last) = last_donation else {
            return 0;
        };
        let remaining = i64::from(self.eligibility_interval_days) - days_between(last, today);
        u32::try_from(remaining.max(0)).unwrap_or(u32::MAX)
    }

    /// Expiration date for a unit donated on `donation_date`.
    pub fn compute_expiration(&self, donation_date: NaiveDate) -> NaiveDate {
        donation_date
            .checked_add_days(Days::new(u64::from(self.shelf_life_days)))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Already-expired units are not "expiring soon".
    pub fn is_expiring_soon(&self, expiration: NaiveDate, today: NaiveDate) -> bool {
        let left = days_between(today, expiration);
        (0..=i64::from(self.expiring_soon_days)).contains(&left)
    }

    pub fn is_expired(&self, expiration: NaiveDate, today: NaiveDate) -> bool {
        today > expiration
    }

    pub fn stock_level(&self, available: usize) -> StockLevel {
        if available < self.low_stock_threshold {
            StockLevel::Low
        } else if available < self.medium_stock_threshold {
            StockLevel::Medium
        } else {
            StockLevel::Good
        }
    }
}
