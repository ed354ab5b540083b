//! Restriction calendar resolution
//!
//! Decides whether a plate's last digit may circulate at a given local date
//! and time. Resolution order:
//! 1. Weekend or holiday: allowed, whatever the override calendar says
//! 2. Date override: its digit set replaces the weekday default entirely
//! 3. Otherwise the weekday default (possibly empty)
//! 4. Digit not in the day's set: allowed
//! 5. Inside the inclusive window: restricted, otherwise allowed
//!
//! Pure computation over immutable tables; share it behind an `Arc`.

pub mod rules;

pub use rules::{DigitSet, RestrictionRules, RestrictionWindow};

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use placa_common::{Plate, Result};
use serde::Serialize;
use std::fmt;

/// Why a weekday-restricted calendar does not apply at all on a date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Exemption {
    Weekend,
    Holiday,
}

/// Why a plate may circulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllowedReason {
    Exempt { exemption: Exemption },
    DigitNotRestricted { digit: u8 },
    OutsideWindow { digit: u8, window: RestrictionWindow },
}

/// Outcome of resolving one (date, time, digit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Allowed { reason: AllowedReason },
    Restricted {
        digit: u8,
        digits: DigitSet,
        window: RestrictionWindow,
    },
}

impl Resolution {
    pub fn is_restricted(&self) -> bool {
        matches!(self, Resolution::Restricted { .. })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Allowed { reason } => match reason {
                AllowedReason::Exempt {
                    exemption: Exemption::Weekend,
                } => write!(f, "weekend, no restriction today"),
                AllowedReason::Exempt {
                    exemption: Exemption::Holiday,
                } => write!(f, "holiday, no restriction today"),
                AllowedReason::DigitNotRestricted { digit } => {
                    write!(f, "digit {} not restricted today", digit)
                }
                AllowedReason::OutsideWindow { digit, window } => write!(
                    f,
                    "digit {} restricted today, but outside restricted window {}",
                    digit, window
                ),
            },
            Resolution::Restricted { digit, window, .. } => write!(
                f,
                "digit {} may not circulate today within {}",
                digit, window
            ),
        }
    }
}

/// Where a day's restricted digits come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DigitSource {
    Override,
    WeekdayDefault,
}

/// Effective rules for one date
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayRules {
    pub date: NaiveDate,
    #[serde(serialize_with = "serialize_weekday")]
    pub weekday: Weekday,
    pub exemption: Option<Exemption>,
    /// `None` when the day is exempt
    pub digit_source: Option<DigitSource>,
    /// Empty when the day is exempt
    pub digits: DigitSet,
    pub window: RestrictionWindow,
}

impl DayRules {
    /// Whether any plate is restricted on this date
    pub fn applies(&self) -> bool {
        self.exemption.is_none() && !self.digits.is_empty()
    }
}

fn serialize_weekday<S: serde::Serializer>(
    weekday: &Weekday,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(weekday)
}

/// Where a plate stands relative to today's restriction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyOutlook {
    /// Exempt day or digit not restricted
    NoRestrictionToday,
    /// Restricted today, window not started yet
    BeforeWindow,
    /// Restricted right now
    InWindow,
    /// Restricted today, window already over
    AfterWindow,
}

/// Answer to the outward "can this plate circulate now?" query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub plate: Plate,
    pub at: NaiveDateTime,
    pub can_circulate: bool,
    pub reason: String,
    pub resolution: Resolution,
}

/// Restriction calendar over immutable rule tables
#[derive(Debug, Clone)]
pub struct RestrictionCalendar {
    rules: RestrictionRules,
}

impl RestrictionCalendar {
    pub fn new(rules: RestrictionRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RestrictionRules {
        &self.rules
    }

    /// Effective rules for a date
    pub fn rules_for(&self, date: NaiveDate) -> DayRules {
        let weekday = date.weekday();
        let window = self.rules.window();

        let exemption = if rules::is_weekend(weekday) {
            Some(Exemption::Weekend)
        } else if self.rules.is_holiday(date) {
            Some(Exemption::Holiday)
        } else {
            None
        };

        let (digit_source, digits) = match exemption {
            Some(_) => (None, DigitSet::EMPTY),
            None => match self.rules.override_for(date) {
                Some(digits) => (Some(DigitSource::Override), digits),
                None => (
                    Some(DigitSource::WeekdayDefault),
                    self.rules.weekday_digits(weekday),
                ),
            },
        };

        DayRules {
            date,
            weekday,
            exemption,
            digit_source,
            digits,
            window,
        }
    }

    /// Resolve one (date, time, last digit)
    pub fn resolve(&self, date: NaiveDate, time: NaiveTime, last_digit: u8) -> Resolution {
        let day = self.rules_for(date);

        if let Some(exemption) = day.exemption {
            return Resolution::Allowed {
                reason: AllowedReason::Exempt { exemption },
            };
        }

        if !day.digits.contains(last_digit) {
            return Resolution::Allowed {
                reason: AllowedReason::DigitNotRestricted { digit: last_digit },
            };
        }

        if day.window.contains(time) {
            Resolution::Restricted {
                digit: last_digit,
                digits: day.digits,
                window: day.window,
            }
        } else {
            Resolution::Allowed {
                reason: AllowedReason::OutsideWindow {
                    digit: last_digit,
                    window: day.window,
                },
            }
        }
    }

    /// Rule query for raw plate text at a local date-time
    ///
    /// A plate without any digit is `Error::InvalidPlate`, never "allowed".
    pub fn evaluate(&self, plate: &str, at: NaiveDateTime) -> Result<Evaluation> {
        let plate = Plate::parse(plate)?;
        Ok(self.evaluate_plate(&plate, at))
    }

    /// Rule query for an already normalized plate
    pub fn evaluate_plate(&self, plate: &Plate, at: NaiveDateTime) -> Evaluation {
        let resolution = self.resolve(at.date(), at.time(), plate.last_digit());
        let reason = format!(
            "plate {} on {} {}: {}",
            plate,
            at.date().weekday(),
            at.date(),
            resolution
        );

        Evaluation {
            plate: plate.clone(),
            at,
            can_circulate: !resolution.is_restricted(),
            reason,
            resolution,
        }
    }

    /// Where a plate stands against today's window
    pub fn restriction_today(&self, plate: &Plate, at: NaiveDateTime) -> DailyOutlook {
        let day = self.rules_for(at.date());
        if !day.applies() || !day.digits.contains(plate.last_digit()) {
            return DailyOutlook::NoRestrictionToday;
        }

        let time = at.time();
        if time < day.window.start {
            DailyOutlook::BeforeWindow
        } else if time > day.window.end {
            DailyOutlook::AfterWindow
        } else {
            DailyOutlook::InWindow
        }
    }
}
