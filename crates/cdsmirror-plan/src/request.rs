//! Request templates and per-partition request building

use std::collections::BTreeSet;

use chrono::Datelike;
use serde_json::{Map, Value};

use crate::granularity::Granularity;
use crate::partition::{CalendarFilter, Partition};

/// Normalized request parameters shared by every partition of a dataset.
///
/// A missing or empty `month` means all twelve months; a missing or empty
/// `day` means days 1 to 31. Both are stored back zero-padded.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTemplate {
    params: Map<String, Value>,
    months: BTreeSet<u32>,
    days: BTreeSet<u32>,
    /// Whether month/day were listed explicitly (and so restrict enumeration)
    explicit_months: bool,
    explicit_days: bool,
}

fn padded(values: impl IntoIterator<Item = u32>) -> Value {
    Value::Array(
        values
            .into_iter()
            .map(|v| Value::String(format!("{v:02}")))
            .collect(),
    )
}

/// Parse `"03"`, `3`, `["1", 2]`... into a set of numbers within `1..=max`.
fn parse_calendar_list(field: &str, value: &Value, max: u32) -> Result<BTreeSet<u32>, String> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    };
    let mut out = BTreeSet::new();
    for item in items {
        let n = match item {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse::<u32>().ok(),
            _ => None,
        };
        match n {
            Some(n) if (1..=max).contains(&n) => {
                out.insert(n);
            }
            _ => return Err(format!("invalid {field} value {item}")),
        }
    }
    Ok(out)
}

impl RequestTemplate {
    pub fn new(mut params: Map<String, Value>) -> Result<Self, String> {
        let months = match params.get("month") {
            Some(v) => parse_calendar_list("month", v, 12)?,
            None => BTreeSet::new(),
        };
        let days = match params.get("day") {
            Some(v) => parse_calendar_list("day", v, 31)?,
            None => BTreeSet::new(),
        };
        let explicit_months = !months.is_empty();
        let explicit_days = !days.is_empty();
        let months = if explicit_months { months } else { (1..=12).collect() };
        let days = if explicit_days { days } else { (1..=31).collect() };

        params.insert("month".into(), padded(months.iter().copied()));
        params.insert("day".into(), padded(days.iter().copied()));
        Ok(Self {
            params,
            months,
            days,
            explicit_months,
            explicit_days,
        })
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn months(&self) -> &BTreeSet<u32> {
        &self.months
    }

    pub fn days(&self) -> &BTreeSet<u32> {
        &self.days
    }

    /// Enumeration filter: explicit `years` plus any listed months/days.
    pub fn calendar_filter(&self, years: Option<&[i32]>) -> CalendarFilter {
        CalendarFilter {
            years: years.map(|ys| ys.iter().copied().collect()),
            months: self.explicit_months.then(|| self.months.clone()),
            days: self.explicit_days.then(|| self.days.clone()),
        }
    }

    /// Concrete request for `partition`: the template with year, month and
    /// day narrowed to the partition's clipped range.
    pub fn build(&self, partition: &Partition) -> Map<String, Value> {
        let mut params = self.params.clone();
        let days_in_range = || partition.range.days();

        params.insert(
            "year".into(),
            Value::Array(vec![Value::String(format!("{:04}", partition.year()))]),
        );
        match partition.granularity {
            Granularity::Yearly => {
                let touched: BTreeSet<u32> = days_in_range().map(|d| d.month()).collect();
                params.insert(
                    "month".into(),
                    padded(self.months.intersection(&touched).copied()),
                );
                if touched.len() == 1 {
                    let touched_days: BTreeSet<u32> = days_in_range().map(|d| d.day()).collect();
                    params.insert(
                        "day".into(),
                        padded(self.days.intersection(&touched_days).copied()),
                    );
                }
            }
            Granularity::Monthly => {
                let start = partition.period.start;
                params.insert("month".into(), padded([start.month()]));
                let touched: BTreeSet<u32> = days_in_range().map(|d| d.day()).collect();
                params.insert(
                    "day".into(),
                    padded(self.days.intersection(&touched).copied()),
                );
            }
            Granularity::Daily => {
                let start = partition.period.start;
                params.insert("month".into(), padded([start.month()]));
                params.insert("day".into(), padded([start.day()]));
            }
        }
        params
    }
}
