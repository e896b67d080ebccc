//! Timezone-aware cron evaluation (5 fields: min hour dom month dow).

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};

use oc_domain::{Error, Result};

/// Parse a timezone string, falling back to UTC.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Any,
    /// `*/N`
    Step(u32),
    /// Comma-separated values and ranges.
    List(Vec<(u32, u32)>),
}

impl Field {
    fn parse(raw: &str) -> Result<Field> {
        if raw == "*" {
            return Ok(Field::Any);
        }
        if let Some(step) = raw.strip_prefix("*/") {
            let n: u32 = step
                .parse()
                .map_err(|_| Error::Config(format!("bad cron step: {raw}")))?;
            if n == 0 {
                return Err(Error::Config("cron step must be positive".into()));
            }
            return Ok(Field::Step(n));
        }
        let mut parts = Vec::new();
        for part in raw.split(',') {
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: u32 = lo
                        .parse()
                        .map_err(|_| Error::Config(format!("bad cron range: {part}")))?;
                    let hi: u32 = hi
                        .parse()
                        .map_err(|_| Error::Config(format!("bad cron range: {part}")))?;
                    parts.push((lo, hi));
                }
                None => {
                    let v: u32 = part
                        .parse()
                        .map_err(|_| Error::Config(format!("bad cron value: {part}")))?;
                    parts.push((v, v));
                }
            }
        }
        Ok(Field::List(parts))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Step(n) => value % n == 0,
            Field::List(parts) => parts.iter().any(|(lo, hi)| value >= *lo && value <= *hi),
        }
    }
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<CronExpr> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::Config(format!(
                "cron expression needs 5 fields, got {}: `{expr}`",
                fields.len()
            )));
        }
        Ok(CronExpr {
            minute: Field::parse(fields[0])?,
            hour: Field::parse(fields[1])?,
            day_of_month: Field::parse(fields[2])?,
            month: Field::parse(fields[3])?,
            day_of_week: Field::parse(fields[4])?,
        })
    }

    /// Whether a local naive datetime matches.
    fn matches_local(&self, dt: &NaiveDateTime) -> bool {
        self.minute.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.day_of_month.matches(dt.day())
            && self.month.matches(dt.month())
            && self.day_of_week.matches(dt.weekday().num_days_from_sunday())
    }

    /// Next occurrence strictly after `after`, evaluated in `tz`, returned
    /// in UTC.
    ///
    /// DST: local times inside a spring-forward gap are skipped; fall-back
    /// overlaps resolve to the earliest (pre-transition) mapping.
    pub fn next_after(&self, after: &DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
        let local_after = after.with_timezone(&tz).naive_local();
        let to_next_minute = 60 - i64::from(local_after.second());
        let mut candidate = (local_after + chrono::Duration::seconds(to_next_minute))
            .with_second(0)
            .unwrap_or(local_after);

        // Bounded walk: one year of minutes.
        for _ in 0..(366 * 24 * 60) {
            if self.matches_local(&candidate) {
                match tz.from_local_datetime(&candidate) {
                    chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                    chrono::LocalResult::Ambiguous(earliest, _) => {
                        return Some(earliest.with_timezone(&Utc))
                    }
                    chrono::LocalResult::None => {
                        // Spring-forward gap: this local minute never exists.
                    }
                }
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }

    /// Whether a UTC instant matches when evaluated in `tz`.
    pub fn matches_at(&self, at: &DateTime<Utc>, tz: chrono_tz::Tz) -> bool {
        self.matches_local(&at.with_timezone(&tz).naive_local())
    }
}
