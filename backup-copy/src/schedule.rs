//! Cron-style schedules evaluated at day granularity.
//!
//! A schedule is written as the usual five cron fields
//! `minute hour day-of-month month day-of-week`. The process is started once
//! a day by an external scheduler, so only the date fields decide whether a
//! job is due: day-of-month, month and weekday must all match. Weekdays run
//! 1 (Monday) to 7 (Sunday); `0` is accepted as Sunday.
//!
//! An omitted schedule falls back to [`DEFAULT_SCHEDULE`], a weekly run on
//! Monday.

use crate::utils::errors::{CopyError, Result};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Schedule applied to jobs that do not set one.
pub const DEFAULT_SCHEDULE: &str = "* * * * 1";

/// How far ahead `next_due_date` searches before giving up.
const LOOKAHEAD_DAYS: i64 = 366 * 8;

/// Values allowed by one cron field, or `Any` for `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSpec {
    Any,
    Values(BTreeSet<u32>),
}

impl FieldSpec {
    pub fn matches(&self, value: u32) -> bool {
        match self {
            FieldSpec::Any => true,
            FieldSpec::Values(values) => values.contains(&value),
        }
    }

    fn parse(field: &str, min: u32, max: u32) -> std::result::Result<Self, String> {
        if field == "*" {
            return Ok(FieldSpec::Any);
        }

        let mut values = BTreeSet::new();
        for part in field.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| format!("invalid step in '{}'", part))?;
                    if step == 0 {
                        return Err(format!("zero step in '{}'", part));
                    }
                    (range, step)
                }
                None => (part, 1),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((lo, hi)) = range.split_once('-') {
                (parse_value(lo, part)?, parse_value(hi, part)?)
            } else {
                let value = parse_value(range, part)?;
                // `5/10` means "from 5 to the end of the range, every 10".
                if step > 1 {
                    (value, max)
                } else {
                    (value, value)
                }
            };

            if start < min || end > max || start > end {
                return Err(format!(
                    "'{}' is outside the allowed range {}-{}",
                    part, min, max
                ));
            }

            values.extend((start..=end).step_by(step as usize));
        }

        Ok(FieldSpec::Values(values))
    }
}

fn parse_value(text: &str, part: &str) -> std::result::Result<u32, String> {
    text.parse()
        .map_err(|_| format!("invalid value in '{}'", part))
}

/// A parsed five-field schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Schedule {
    expression: String,
    day_of_month: FieldSpec,
    month: FieldSpec,
    weekday: FieldSpec,
}

impl Schedule {
    /// Parse a schedule, validating all five fields.
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |reason: String| CopyError::Schedule {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(
                "expected 5 fields: 'minute hour day-of-month month day-of-week'".to_string(),
            ));
        }

        FieldSpec::parse(fields[0], 0, 59).map_err(invalid)?;
        FieldSpec::parse(fields[1], 0, 23).map_err(invalid)?;
        let day_of_month = FieldSpec::parse(fields[2], 1, 31).map_err(invalid)?;
        let month = FieldSpec::parse(fields[3], 1, 12).map_err(invalid)?;
        let weekday = match FieldSpec::parse(fields[4], 0, 7).map_err(invalid)? {
            FieldSpec::Any => FieldSpec::Any,
            FieldSpec::Values(values) => FieldSpec::Values(
                values
                    .into_iter()
                    .map(|day| if day == 0 { 7 } else { day })
                    .collect(),
            ),
        };

        Ok(Self {
            expression: fields.join(" "),
            day_of_month,
            month,
            weekday,
        })
    }

    /// True when the schedule matches `date`.
    pub fn is_due(&self, date: NaiveDate) -> bool {
        self.day_of_month.matches(date.day())
            && self.month.matches(date.month())
            && self.weekday.matches(date.weekday().number_from_monday())
    }

    /// First date on or after `from` on which the schedule is due.
    ///
    /// Returns `None` for schedules that can never match, e.g. `* * 31 2 *`.
    pub fn next_due_date(&self, from: NaiveDate) -> Option<NaiveDate> {
        (0..LOOKAHEAD_DAYS)
            .filter_map(|offset| from.checked_add_signed(Duration::days(offset)))
            .find(|date| self.is_due(*date))
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            expression: DEFAULT_SCHEDULE.to_string(),
            day_of_month: FieldSpec::Any,
            month: FieldSpec::Any,
            weekday: FieldSpec::Values(BTreeSet::from([1])),
        }
    }
}

impl TryFrom<String> for Schedule {
    type Error = CopyError;

    fn try_from(value: String) -> Result<Self> {
        Schedule::parse(&value)
    }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> Self {
        schedule.expression
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}
