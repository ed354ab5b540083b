//! Restriction rule tables
//!
//! Immutable value built once at startup, either from the `[calendar]` TOML
//! section or from the built-in Pasto 2025 tables. Every malformed entry is a
//! configuration error: nothing is silently dropped or defaulted.

use chrono::{NaiveDate, NaiveTime, Weekday};
use placa_common::config::CalendarSection;
use placa_common::{Error, Result};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Set of restricted last digits (0-9)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DigitSet(u16);

impl DigitSet {
    pub const EMPTY: DigitSet = DigitSet(0);

    /// Build from digits, rejecting anything above 9
    pub fn from_digits(digits: &[u8]) -> Result<Self> {
        let mut set = DigitSet::EMPTY;
        for &digit in digits {
            if digit > 9 {
                return Err(Error::Config(format!("restricted digit {} is not 0-9", digit)));
            }
            set.0 |= 1 << digit;
        }
        Ok(set)
    }

    pub fn contains(&self, digit: u8) -> bool {
        digit <= 9 && self.0 & (1 << digit) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=9u8).filter(move |d| self.contains(*d))
    }
}

impl fmt::Display for DigitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits: Vec<String> = self.iter().map(|d| d.to_string()).collect();
        write!(f, "{{{}}}", digits.join(", "))
    }
}

impl Serialize for DigitSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Daily restriction window, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestrictionWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl RestrictionWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self> {
        if start > end {
            return Err(Error::Config(format!(
                "restriction window start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

impl fmt::Display for RestrictionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// Weekday defaults, date overrides, holidays and the daily window
#[derive(Debug, Clone, PartialEq)]
pub struct RestrictionRules {
    pub(crate) window: RestrictionWindow,
    /// Indexed by `Weekday::num_days_from_monday`; weekend slots stay empty
    pub(crate) weekdays: [DigitSet; 7],
    pub(crate) overrides: BTreeMap<NaiveDate, DigitSet>,
    pub(crate) holidays: BTreeSet<NaiveDate>,
}

impl RestrictionRules {
    /// Rules with only a window; add tables with the builder methods
    pub fn new(window: RestrictionWindow) -> Self {
        Self {
            window,
            weekdays: [DigitSet::EMPTY; 7],
            overrides: BTreeMap::new(),
            holidays: BTreeSet::new(),
        }
    }

    /// Set the default digits for a weekday (Saturday/Sunday are rejected)
    pub fn with_weekday(mut self, weekday: Weekday, digits: &[u8]) -> Result<Self> {
        if is_weekend(weekday) {
            return Err(Error::Config(format!(
                "{} is a weekend day and cannot carry restricted digits",
                weekday
            )));
        }
        self.weekdays[weekday.num_days_from_monday() as usize] = DigitSet::from_digits(digits)?;
        Ok(self)
    }

    /// Replace the weekday default for one date
    pub fn with_override(mut self, date: NaiveDate, digits: &[u8]) -> Result<Self> {
        self.overrides.insert(date, DigitSet::from_digits(digits)?);
        Ok(self)
    }

    pub fn with_holiday(mut self, date: NaiveDate) -> Self {
        self.holidays.insert(date);
        self
    }

    pub fn window(&self) -> RestrictionWindow {
        self.window
    }

    pub fn weekday_digits(&self, weekday: Weekday) -> DigitSet {
        self.weekdays[weekday.num_days_from_monday() as usize]
    }

    pub fn override_for(&self, date: NaiveDate) -> Option<DigitSet> {
        self.overrides.get(&date).copied()
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    /// Validate a raw `[calendar]` section
    pub fn from_section(section: &CalendarSection) -> Result<Self> {
        let window = RestrictionWindow::new(
            parse_time(&section.window.start)?,
            parse_time(&section.window.end)?,
        )?;

        let mut rules = RestrictionRules::new(window);

        for (name, digits) in &section.weekdays {
            let weekday: Weekday = name
                .parse()
                .map_err(|_| Error::Config(format!("unknown weekday {:?}", name)))?;
            rules = rules.with_weekday(weekday, digits)?;
        }

        for (date, digits) in &section.overrides {
            rules = rules.with_override(parse_date(date)?, digits)?;
        }

        for date in &section.holidays {
            rules = rules.with_holiday(parse_date(date)?);
        }

        Ok(rules)
    }

    /// Built-in tables: Pasto (Nariño) 2025
    ///
    /// Window 07:30-19:00 Monday to Friday, Colombian national holidays, and
    /// the November-December 2025 rotation that replaces the weekday table
    /// on the dates it lists.
    pub fn pasto_2025() -> Self {
        let date = |m: u32, d: u32| NaiveDate::from_ymd_opt(2025, m, d);
        let time = |h: u32, m: u32| NaiveTime::from_hms_opt(h, m, 0);

        let window = match (time(7, 30), time(19, 0)) {
            (Some(start), Some(end)) => RestrictionWindow { start, end },
            _ => unreachable!("constant window times are valid"),
        };

        let mut rules = RestrictionRules::new(window);

        let defaults = [
            (Weekday::Mon, [0, 1]),
            (Weekday::Tue, [2, 3]),
            (Weekday::Wed, [4, 5]),
            (Weekday::Thu, [6, 7]),
            (Weekday::Fri, [8, 9]),
        ];
        for (weekday, digits) in defaults {
            rules.weekdays[weekday.num_days_from_monday() as usize] = digit_pair(digits);
        }

        const HOLIDAYS: [(u32, u32); 17] = [
            (1, 1),
            (1, 6),
            (3, 24),
            (4, 17),
            (4, 18),
            (5, 1),
            (6, 2),
            (6, 23),
            (6, 30),
            (7, 20),
            (8, 7),
            (8, 18),
            (10, 13),
            (11, 3),
            (11, 17),
            (12, 8),
            (12, 25),
        ];
        rules.holidays.extend(HOLIDAYS.iter().filter_map(|&(m, d)| date(m, d)));

        const OVERRIDES: [((u32, u32), [u8; 2]); 20] = [
            ((11, 18), [2, 3]),
            ((11, 19), [4, 5]),
            ((11, 20), [6, 7]),
            ((11, 21), [8, 9]),
            ((11, 24), [2, 3]),
            ((11, 25), [4, 5]),
            ((11, 26), [6, 7]),
            ((11, 27), [8, 9]),
            ((11, 28), [0, 1]),
            ((12, 1), [4, 5]),
            ((12, 2), [6, 7]),
            ((12, 3), [8, 9]),
            ((12, 4), [0, 1]),
            ((12, 5), [2, 3]),
            ((12, 9), [8, 9]),
            ((12, 10), [0, 1]),
            ((12, 11), [2, 3]),
            ((12, 12), [4, 5]),
            ((12, 15), [8, 9]),
            ((12, 16), [0, 1]),
        ];
        rules.overrides.extend(
            OVERRIDES
                .iter()
                .filter_map(|&((m, d), digits)| date(m, d).map(|day| (day, digit_pair(digits)))),
        );

        rules
    }
}

fn digit_pair([a, b]: [u8; 2]) -> DigitSet {
    DigitSet((1 << a) | (1 << b))
}

pub(crate) fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Sat | Weekday::Sun)
}

fn parse_time(text: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .map_err(|_| Error::Config(format!("malformed time {:?} (expected HH:MM)", text)))
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|_| Error::Config(format!("malformed date {:?} (expected YYYY-MM-DD)", text)))
}
