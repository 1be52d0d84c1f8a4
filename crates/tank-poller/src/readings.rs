//! Reading descriptors
//!
//! A static table mapping each user-visible reading to how it is pulled out
//! of a `Snapshot`. The host renders readings and publishes gauges by walking
//! this table instead of hard-coding field names.

use serde::Serialize;

use crate::snapshot::Snapshot;

/// One value pulled out of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Number(f64),
    Text(String),
}

impl ReadingValue {
    /// Numeric value, for gauges. Text readings have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Number(n) => Some(*n),
            ReadingValue::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadingDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub extract: fn(&Snapshot) -> Option<ReadingValue>,
}

impl ReadingDescriptor {
    pub fn value(&self, snapshot: &Snapshot) -> Option<ReadingValue> {
        (self.extract)(snapshot)
    }

    /// Human-readable value with unit, e.g. `42.5 %` or `30 days`.
    pub fn render(&self, snapshot: &Snapshot) -> Option<String> {
        let value = match self.value(snapshot)? {
            ReadingValue::Number(n) => format_number(n),
            ReadingValue::Text(s) => s,
        };
        Some(match self.unit {
            Some(unit) => format!("{value} {unit}"),
            None => value,
        })
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

fn tank_level(s: &Snapshot) -> Option<ReadingValue> {
    s.tank_level_percent.map(ReadingValue::Number)
}

fn days_remaining(s: &Snapshot) -> Option<ReadingValue> {
    s.days_remaining.map(|d| ReadingValue::Number(d as f64))
}

fn tank_capacity(s: &Snapshot) -> Option<ReadingValue> {
    s.tank_capacity_litres.map(ReadingValue::Number)
}

fn last_reading_date(s: &Snapshot) -> Option<ReadingValue> {
    s.last_reading_date.clone().map(ReadingValue::Text)
}

fn account_balance(s: &Snapshot) -> Option<ReadingValue> {
    s.account_balance.map(ReadingValue::Number)
}

pub static READINGS: &[ReadingDescriptor] = &[
    ReadingDescriptor {
        key: "tank_level",
        name: "Tank Level",
        unit: Some("%"),
        extract: tank_level,
    },
    ReadingDescriptor {
        key: "days_remaining",
        name: "Days Remaining",
        unit: Some("days"),
        extract: days_remaining,
    },
    ReadingDescriptor {
        key: "tank_capacity",
        name: "Tank Capacity",
        unit: Some("L"),
        extract: tank_capacity,
    },
    ReadingDescriptor {
        key: "last_reading_date",
        name: "Last Reading Date",
        unit: None,
        extract: last_reading_date,
    },
    ReadingDescriptor {
        key: "account_balance",
        name: "Account Balance",
        unit: None,
        extract: account_balance,
    },
];
