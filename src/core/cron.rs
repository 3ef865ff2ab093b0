//! SS-003: Six-field cron expressions (minutes hours day-of-month month
//! day-of-week year), the format scheduled rules use.
//!
//! Exactly one of day-of-month and day-of-week must be `?`. Day-of-week runs
//! 1-7 with 1 = Sunday; names (`MON`, `JAN`, ...) are accepted.

use std::collections::BTreeSet;
use std::fmt;

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];
const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];
const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// One cron field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronField {
    /// `*`
    Every,
    /// `?` (day-of-month / day-of-week only)
    Unspecified,
    /// Explicit set of values
    Values(BTreeSet<u32>),
}

impl CronField {
    fn contains(&self, value: u32) -> bool {
        match self {
            Self::Every | Self::Unspecified => true,
            Self::Values(set) => set.contains(&value),
        }
    }

    fn single(&self) -> Option<u32> {
        match self {
            Self::Values(set) if set.len() == 1 => set.iter().next().copied(),
            _ => None,
        }
    }
}

#[derive(Clone, Copy)]
struct FieldSpec {
    label: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    allow_unspecified: bool,
}

const MINUTES: FieldSpec = FieldSpec {
    label: "minutes",
    min: 0,
    max: 59,
    names: &[],
    allow_unspecified: false,
};
const HOURS: FieldSpec = FieldSpec {
    label: "hours",
    min: 0,
    max: 23,
    names: &[],
    allow_unspecified: false,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    label: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    allow_unspecified: true,
};
const MONTH: FieldSpec = FieldSpec {
    label: "month",
    min: 1,
    max: 12,
    names: &MONTHS,
    allow_unspecified: false,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    label: "day-of-week",
    min: 1,
    max: 7,
    names: &WEEKDAYS,
    allow_unspecified: true,
};
const YEAR: FieldSpec = FieldSpec {
    label: "year",
    min: 1970,
    max: 2199,
    names: &[],
    allow_unspecified: false,
};

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    pub minutes: CronField,
    pub hours: CronField,
    pub day_of_month: CronField,
    pub month: CronField,
    pub day_of_week: CronField,
    pub year: CronField,
}

impl CronExpr {
    /// Parse a bare 6-field expression or one wrapped as `cron(...)`.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let trimmed = expr.trim();
        let inner = trimmed
            .strip_prefix("cron(")
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(trimmed);

        let parts: Vec<&str> = inner.split_whitespace().collect();
        if parts.len() != 6 {
            return Err(format!(
                "cron expression '{}' must have 6 fields, got {}",
                inner,
                parts.len()
            ));
        }

        let day_of_month = parse_field(parts[2], DAY_OF_MONTH)?;
        let day_of_week = parse_field(parts[4], DAY_OF_WEEK)?;
        let dom_unspecified = day_of_month == CronField::Unspecified;
        let dow_unspecified = day_of_week == CronField::Unspecified;
        if dom_unspecified == dow_unspecified {
            return Err(format!(
                "cron expression '{}': exactly one of day-of-month and day-of-week must be '?'",
                inner
            ));
        }

        Ok(Self {
            source: parts.join(" "),
            minutes: parse_field(parts[0], MINUTES)?,
            hours: parse_field(parts[1], HOURS)?,
            day_of_month,
            month: parse_field(parts[3], MONTH)?,
            day_of_week,
            year: parse_field(parts[5], YEAR)?,
        })
    }

    /// The provider-side schedule expression, `cron(...)`.
    pub fn schedule_expression(&self) -> String {
        format!("cron({})", self.source)
    }

    /// Whether the schedule fires at this instant. `weekday` is 1-7, 1 = Sunday.
    pub fn matches(
        &self,
        minute: u32,
        hour: u32,
        day: u32,
        month: u32,
        weekday: u32,
        year: u32,
    ) -> bool {
        self.minutes.contains(minute)
            && self.hours.contains(hour)
            && self.day_of_month.contains(day)
            && self.month.contains(month)
            && self.day_of_week.contains(weekday)
            && self.year.contains(year)
    }

    /// Plain-English description, e.g. "10:30, Monday through Friday".
    pub fn describe(&self) -> String {
        let time = match (self.hours.single(), self.minutes.single()) {
            (Some(h), Some(m)) => format!("{:02}:{:02}", h, m),
            _ => format!(
                "minute {} of hour {}",
                describe_values(&self.minutes, &[], 0),
                describe_values(&self.hours, &[], 0)
            ),
        };

        let mut parts = vec![time];
        match &self.day_of_week {
            CronField::Values(_) => {
                parts.push(describe_values(&self.day_of_week, &WEEKDAY_NAMES, 1));
            }
            CronField::Every => parts.push("every day".to_string()),
            CronField::Unspecified => match &self.day_of_month {
                CronField::Every => parts.push("every day".to_string()),
                other => parts.push(format!("day {} of the month", describe_values(other, &[], 0))),
            },
        }
        if let CronField::Values(_) = self.month {
            parts.push(format!("in {}", describe_values(&self.month, &MONTH_NAMES, 1)));
        }
        if let CronField::Values(_) = self.year {
            parts.push(format!("in {}", describe_values(&self.year, &[], 0)));
        }
        parts.join(", ")
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn describe_values(field: &CronField, names: &[&str], offset: u32) -> String {
    let set = match field {
        CronField::Values(set) => set,
        _ => return "every".to_string(),
    };
    let label = |v: u32| -> String {
        names
            .get((v - offset) as usize)
            .map(|s| s.to_string())
            .unwrap_or_else(|| v.to_string())
    };
    let values: Vec<u32> = set.iter().copied().collect();
    let contiguous = values.windows(2).all(|w| w[1] == w[0] + 1);
    if values.len() > 2 && contiguous {
        return format!("{} through {}", label(values[0]), label(values[values.len() - 1]));
    }
    values.iter().map(|v| label(*v)).collect::<Vec<_>>().join(", ")
}

fn parse_field(raw: &str, spec: FieldSpec) -> Result<CronField, String> {
    if raw == "*" {
        return Ok(CronField::Every);
    }
    if raw == "?" {
        if spec.allow_unspecified {
            return Ok(CronField::Unspecified);
        }
        return Err(format!("'?' is not allowed in the {} field", spec.label));
    }

    let mut values = BTreeSet::new();
    for item in raw.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| format!("invalid step '{}' in {} field", s, spec.label))?;
                if step == 0 {
                    return Err(format!("step must be positive in {} field", spec.label));
                }
                (r, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, spec)?, parse_value(b, spec)?)
        } else {
            let v = parse_value(range, spec)?;
            // `5/15` runs from 5 to the end of the field
            if step.is_some() { (v, spec.max) } else { (v, v) }
        };

        if start > end {
            return Err(format!(
                "range {}-{} is reversed in {} field",
                start, end, spec.label
            ));
        }
        values.extend((start..=end).step_by(step.unwrap_or(1) as usize));
    }

    Ok(CronField::Values(values))
}

fn parse_value(raw: &str, spec: FieldSpec) -> Result<u32, String> {
    let upper = raw.to_ascii_uppercase();
    if let Some(pos) = spec.names.iter().position(|n| *n == upper) {
        return Ok(spec.min + pos as u32);
    }
    let v: u32 = raw
        .parse()
        .map_err(|_| format!("invalid value '{}' in {} field", raw, spec.label))?;
    if v < spec.min || v > spec.max {
        return Err(format!(
            "value {} out of range {}-{} in {} field",
            v, spec.min, spec.max, spec.label
        ));
    }
    Ok(v)
}
