//! # dcron-schedule
//!
//! Cron expression compiler and fire-time engine for dcron.
//!
//! A six-field expression (`sec min hour dom month dow`, second resolution)
//! compiles into a [`Schedule`]: one 64-bit mask per field where bit `v`
//! set means "value `v` is an allowed fire point". [`Schedule::next`]
//! walks the calendar from a given instant to the earliest following
//! instant matching every mask.
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use dcron_schedule::parse;
//!
//! let schedule = parse("*/5 * * * * *").unwrap();
//! let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let next = schedule.next(t).unwrap();
//! assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap());
//! ```

use chrono::{DateTime, Datelike, Days, Duration, Months, TimeZone, Timelike};

pub mod error;
mod parser;

pub use error::ParseError;
pub use parser::parse;

/// A compiled cron expression: one bitmask per time field.
///
/// Bits are indexed by field value (`dom` uses bits 1–31, `month` 1–12,
/// `dow` 0–6 with Sunday = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub second: u64,
    pub minute: u64,
    pub hour: u64,
    pub dom: u64,
    pub month: u64,
    pub dow: u64,
}

impl Schedule {
    /// The earliest instant strictly after `after` matching this schedule,
    /// or `None` when no match exists within five years (an unreachable
    /// date such as February 31st).
    ///
    /// The day field matches only when **both** the day-of-month and the
    /// day-of-week bits are set. This conjunction differs from classic
    /// vixie-cron and is load-bearing: `0 0 0 13 * 5` means Friday the
    /// 13th, not "the 13th or any Friday".
    pub fn next<Tz: TimeZone>(&self, after: DateTime<Tz>) -> Option<DateTime<Tz>> {
        // Start from the next whole second so a job cannot fire twice
        // within the second it just fired in.
        let mut t = after.clone()
            + Duration::nanoseconds(1_000_000_000 - i64::from(after.timestamp_subsec_nanos()));

        let year_limit = t.year() + 5;

        // Once a coarser field advances, every finer field is truncated to
        // its minimum exactly once; the flag survives restarts on purpose.
        let mut added = false;

        // Whenever a field wraps (January after December, midnight after
        // 23:00, ...) the fields above it have rolled too, so the whole
        // match restarts from the top.
        'restart: loop {
            if t.year() > year_limit {
                return None;
            }

            while self.month & (1 << t.month()) == 0 {
                if !added {
                    added = true;
                    t = rebuild(&t, t.year(), t.month(), 1, 0, 0, 0)?;
                }
                t = t.checked_add_months(Months::new(1))?;
                if t.month() == 1 {
                    continue 'restart;
                }
            }

            while !(self.dom & (1 << t.day()) != 0
                && self.dow & (1 << t.weekday().num_days_from_sunday()) != 0)
            {
                if !added {
                    added = true;
                    t = rebuild(&t, t.year(), t.month(), t.day(), 0, 0, 0)?;
                }
                t = t.checked_add_days(Days::new(1))?;
                if t.day() == 1 {
                    continue 'restart;
                }
            }

            while self.hour & (1 << t.hour()) == 0 {
                if !added {
                    added = true;
                    t = rebuild(&t, t.year(), t.month(), t.day(), t.hour(), 0, 0)?;
                }
                t = t + Duration::hours(1);
                if t.hour() == 0 {
                    continue 'restart;
                }
            }

            while self.minute & (1 << t.minute()) == 0 {
                if !added {
                    added = true;
                    t = t.clone() - Duration::seconds(i64::from(t.second()));
                }
                t = t + Duration::minutes(1);
                if t.minute() == 0 {
                    continue 'restart;
                }
            }

            while self.second & (1 << t.second()) == 0 {
                if !added {
                    added = true;
                    t = t.clone()
                        - Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()));
                }
                t = t + Duration::seconds(1);
                if t.second() == 0 {
                    continue 'restart;
                }
            }

            return Some(t);
        }
    }
}

/// Reconstruct an instant from calendar fields in the same zone, resolving
/// DST ambiguity to the earliest valid interpretation.
fn rebuild<Tz: TimeZone>(
    t: &DateTime<Tz>,
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Option<DateTime<Tz>> {
    t.timezone()
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .earliest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Utc, Weekday};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn every_five_seconds_from_midnight() {
        // S1
        let s = parse("*/5 * * * * *").unwrap();
        let next = s.next(at(2024, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 1, 0, 0, 5));

        let just_after = next + Duration::nanoseconds(1);
        assert_eq!(s.next(just_after).unwrap(), at(2024, 1, 1, 0, 0, 10));
    }

    #[test]
    fn monday_noon_from_sunday_morning() {
        // S2: Sunday 2024-06-02 11:59:59 -> Monday 2024-06-03 12:00:00
        let s = parse("0 0 12 * * MON").unwrap();
        let next = s.next(at(2024, 6, 2, 11, 59, 59)).unwrap();
        assert_eq!(next, at(2024, 6, 3, 12, 0, 0));
        assert_eq!(next.weekday(), Weekday::Mon);
    }

    #[test]
    fn unreachable_date_returns_none() {
        // S3: February 31st never exists.
        let s = parse("0 0 0 31 2 *").unwrap();
        assert_eq!(s.next(at(2024, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn dom_and_dow_are_a_conjunction() {
        // Friday the 13th only.
        let s = parse("0 0 0 13 * 5").unwrap();
        let next = s.next(at(2024, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(next.day(), 13);
        assert_eq!(next.weekday(), Weekday::Fri);
        // 2024's first Friday the 13th is in September.
        assert_eq!((next.year(), next.month()), (2024, 9));
    }

    #[test]
    fn next_is_strictly_forward() {
        let specs = ["* * * * * *", "*/7 * * * * *", "0 30 8 * * 1-5", "59 59 23 31 12 *"];
        let starts = [
            at(2024, 1, 1, 0, 0, 0),
            at(2024, 2, 29, 23, 59, 59),
            at(2025, 12, 31, 23, 59, 58),
        ];
        for spec in specs {
            let s = parse(spec).unwrap();
            for start in starts {
                let next = s.next(start).unwrap();
                assert!(next > start, "{spec} from {start}");
            }
        }
    }

    #[test]
    fn next_is_idempotent_at_the_fire_point() {
        let s = parse("0 */10 * * * *").unwrap();
        let t = at(2024, 3, 15, 9, 4, 30);
        let fire = s.next(t).unwrap();
        assert!(s.next(fire.clone()).unwrap() > fire);
        assert_eq!(s.next(fire.clone() - Duration::nanoseconds(1)).unwrap(), fire);
    }

    #[test]
    fn month_boundary_rolls_over() {
        let s = parse("0 0 0 1 * *").unwrap();
        assert_eq!(s.next(at(2024, 1, 15, 10, 0, 0)).unwrap(), at(2024, 2, 1, 0, 0, 0));
    }

    #[test]
    fn year_boundary_rolls_over() {
        let s = parse("0 0 0 1 1 *").unwrap();
        assert_eq!(s.next(at(2024, 3, 1, 0, 0, 0)).unwrap(), at(2025, 1, 1, 0, 0, 0));
    }

    #[test]
    fn leap_day_fires_in_leap_years_only() {
        let s = parse("0 0 0 29 2 *").unwrap();
        assert_eq!(s.next(at(2024, 3, 1, 0, 0, 0)).unwrap(), at(2028, 2, 29, 0, 0, 0));
    }

    #[test]
    fn finer_fields_truncate_when_a_coarse_field_advances() {
        // Next 03:00 after 04:30 is tomorrow's 03:00:00, not 03:30.
        let s = parse("0 0 3 * * *").unwrap();
        assert_eq!(s.next(at(2024, 5, 10, 4, 30, 45)).unwrap(), at(2024, 5, 11, 3, 0, 0));
    }
}
