//! Aggregated tank readings
//!
//! A `Snapshot` is built in one go from the primary payload and, when
//! available, the secondary payload. It is never mutated afterwards; a new
//! refresh produces a new value that replaces the old one wholesale.

use serde::Serialize;
use serde_json::Value;

/// Primary payload keys.
const LEVEL_KEY: &str = "remainingPercentage";
const DAYS_KEY: &str = "daysRemaining";
const CAPACITY_KEY: &str = "tankCapacity";
const READING_DATE_KEY: &str = "lastGaugeReadingDate";
const READING_DATE_ISO_KEY: &str = "lastGaugeReadingDateIso";
const MIN_ORDER_KEY: &str = "minLitres";
const MAX_ORDER_KEY: &str = "maxLitres";

/// Secondary payload keys.
const BALANCE_KEY: &str = "balance";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub tank_level_percent: Option<f64>,
    pub days_remaining: Option<i64>,
    pub tank_capacity_litres: Option<f64>,
    pub last_reading_date: Option<String>,
    pub last_reading_date_iso: Option<String>,
    pub min_order_litres: Option<f64>,
    pub max_order_litres: Option<f64>,
    pub account_balance: Option<f64>,
    /// Unix milliseconds at which the primary fetch completed.
    pub fetched_at: u64,
}

impl Snapshot {
    /// Build a snapshot from the primary payload and an optional secondary
    /// payload. Missing or malformed fields become `None`.
    pub fn from_payloads(primary: &Value, secondary: Option<&Value>, fetched_at: u64) -> Self {
        Self {
            tank_level_percent: number(primary.get(LEVEL_KEY)),
            days_remaining: integer(primary.get(DAYS_KEY)),
            tank_capacity_litres: number(primary.get(CAPACITY_KEY)),
            last_reading_date: text(primary.get(READING_DATE_KEY)),
            last_reading_date_iso: text(primary.get(READING_DATE_ISO_KEY)),
            min_order_litres: number(primary.get(MIN_ORDER_KEY)),
            max_order_litres: number(primary.get(MAX_ORDER_KEY)),
            account_balance: secondary.and_then(|s| number(s.get(BALANCE_KEY))),
            fetched_at,
        }
    }
}

/// JSON number or numeric string.
fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Whole number, possibly sent as `30`, `30.0` or `"30"`.
fn integer(value: Option<&Value>) -> Option<i64> {
    if let Some(Value::Number(n)) = value
        && let Some(i) = n.as_i64()
    {
        return Some(i);
    }
    number(value).filter(|n| n.fract() == 0.0).map(|n| n as i64)
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}
