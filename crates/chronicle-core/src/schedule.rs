//! Scheduling arithmetic for periodic attestation.
//!
//! There is no timer here: callers ask [`is_due`] whenever they are
//! triggered, and the answer depends only on its arguments.

use std::fmt;

use chrono::{DateTime, Duration, Months, Utc};

use crate::error::{CoreError, Result};

/// A relative interval such as `"1 day"` or `"1 month 2 hours"`.
///
/// Months and years are kept apart from the fixed-length part so they can
/// be applied with calendar arithmetic (Jan 31 + 1 month = Feb 29/28).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AttestationInterval {
    months: u32,
    fixed: Duration,
}

impl AttestationInterval {
    /// An interval of fixed length.
    pub fn from_duration(fixed: Duration) -> Self {
        Self { months: 0, fixed }
    }

    /// An interval of whole calendar months.
    pub fn from_months(months: u32) -> Self {
        Self {
            months,
            fixed: Duration::zero(),
        }
    }

    /// Parse a human-readable relative interval expression.
    ///
    /// Accepts one or more `<n> <unit>` terms (`"2 hours"`, `"1 day 12 hours"`,
    /// `"+1 week"`, `"a month"`, `"90min"`). Units: seconds, minutes, hours,
    /// days, weeks, fortnights, months, years, with the usual short forms.
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: &str| CoreError::InvalidInterval {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let lowered = expr.to_ascii_lowercase();
        let mut tokens = lowered
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty() && *t != "and")
            .peekable();

        if tokens.peek().is_none() {
            return Err(invalid("empty expression"));
        }

        let mut months: u32 = 0;
        let mut fixed = Duration::zero();

        while let Some(token) = tokens.next() {
            let token = token.strip_prefix('+').unwrap_or(token);

            let (count, inline_unit) = if token == "a" || token == "an" {
                (1i64, "")
            } else {
                let digits_end = token
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(token.len());
                if digits_end == 0 {
                    return Err(invalid(&format!("expected a number, found {:?}", token)));
                }
                let count: i64 = token[..digits_end]
                    .parse()
                    .map_err(|_| invalid("number out of range"))?;
                (count, &token[digits_end..])
            };

            let unit = if inline_unit.is_empty() {
                tokens.next().ok_or_else(|| invalid("missing unit"))?
            } else {
                inline_unit
            };

            match Unit::parse(unit).ok_or_else(|| invalid(&format!("unknown unit {:?}", unit)))? {
                Unit::Months(per) => {
                    let add = u32::try_from(count)
                        .ok()
                        .and_then(|c| c.checked_mul(per))
                        .ok_or_else(|| invalid("interval too large"))?;
                    months = months
                        .checked_add(add)
                        .ok_or_else(|| invalid("interval too large"))?;
                }
                Unit::Seconds(per) => {
                    let add = count
                        .checked_mul(per)
                        .and_then(Duration::try_seconds)
                        .ok_or_else(|| invalid("interval too large"))?;
                    fixed = fixed
                        .checked_add(&add)
                        .ok_or_else(|| invalid("interval too large"))?;
                }
            }
        }

        if months == 0 && fixed <= Duration::zero() {
            return Err(invalid("interval must be positive"));
        }

        Ok(Self { months, fixed })
    }

    /// `start + self`, or `None` if the result is out of range.
    pub fn add_to(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        start
            .checked_add_months(Months::new(self.months))?
            .checked_add_signed(self.fixed)
    }

    /// Calendar months in this interval.
    pub fn months(&self) -> u32 {
        self.months
    }

    /// Fixed-length part of this interval.
    pub fn fixed(&self) -> Duration {
        self.fixed
    }
}

impl fmt::Debug for AttestationInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttestationInterval({})", self)
    }
}

impl fmt::Display for AttestationInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.months > 0 {
            parts.push(format!("{} months", self.months));
        }
        if self.fixed > Duration::zero() {
            parts.push(format!("{} seconds", self.fixed.num_seconds()));
        }
        write!(f, "{}", parts.join(" "))
    }
}

enum Unit {
    Seconds(i64),
    Months(u32),
}

impl Unit {
    fn parse(unit: &str) -> Option<Self> {
        Some(match unit {
            "s" | "sec" | "secs" | "second" | "seconds" => Unit::Seconds(1),
            "min" | "mins" | "minute" | "minutes" => Unit::Seconds(60),
            "h" | "hour" | "hours" => Unit::Seconds(3_600),
            "d" | "day" | "days" => Unit::Seconds(86_400),
            "week" | "weeks" => Unit::Seconds(7 * 86_400),
            "fortnight" | "fortnights" => Unit::Seconds(14 * 86_400),
            "month" | "months" => Unit::Months(1),
            "year" | "years" => Unit::Months(12),
            _ => return None,
        })
    }
}

/// Decide whether an attestation run is due.
///
/// Attestation is opt-in: with no configured interval, or no replication
/// sources, it is never due. Otherwise it is due when there has never been
/// a run, or once `now` reaches `last_run + interval`.
pub fn is_due(
    now: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    interval: Option<&AttestationInterval>,
    replication_sources_exist: bool,
) -> bool {
    let Some(interval) = interval else {
        return false;
    };
    if !replication_sources_exist {
        return false;
    }
    let Some(last_run) = last_run else {
        return true;
    };
    match interval.add_to(last_run) {
        Some(next_run) => now >= next_run,
        None => false,
    }
}
