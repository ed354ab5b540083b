//! placa-enforcer - Pico y placa enforcement
//!
//! Restriction calendar resolution, the plate ledger and the sighting
//! pipeline that turns plate detections into detection and violation rows.

pub mod calendar;
pub mod cooldown;
pub mod detection;
pub mod ledger;
pub mod orchestrator;
pub mod vision;

use calendar::{DailyOutlook, Evaluation, RestrictionCalendar, RestrictionRules};
use chrono::NaiveDateTime;
use cooldown::CooldownGuard;
use ledger::{PlateLedger, PlateStatus};
use placa_common::config::TomlConfig;
use placa_common::time::parse_local_datetime;
use placa_common::{Clock, Error, FixedClock, Plate, Result, SystemClock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Restriction calendar from config, or the built-in Pasto tables
///
/// Invalid calendar entries fail here, at startup.
pub fn build_calendar(config: &TomlConfig) -> Result<RestrictionCalendar> {
    let rules = match &config.calendar {
        Some(section) => RestrictionRules::from_section(section)?,
        None => {
            tracing::debug!("No [calendar] section, using built-in Pasto 2025 rules");
            RestrictionRules::pasto_2025()
        }
    };
    Ok(RestrictionCalendar::new(rules))
}

/// System clock, or a fixed one when `demo_datetime` is set
pub fn clock_from_config(config: &TomlConfig) -> Result<Arc<dyn Clock>> {
    match config.demo_datetime.as_deref() {
        None => Ok(Arc::new(SystemClock)),
        Some(text) => {
            let at = parse_local_datetime(text).ok_or_else(|| {
                Error::Config(format!("demo_datetime {:?} is not a local date-time", text))
            })?;
            tracing::info!(demo_datetime = %at, "Clock pinned (demo mode)");
            Ok(Arc::new(FixedClock(at)))
        }
    }
}

pub fn cooldown_from_config(config: &TomlConfig) -> CooldownGuard {
    CooldownGuard::new(Duration::from_secs(config.enforcement.cooldown_secs))
}

/// Combined view of a plate: ledger snapshot plus today's rules
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateReport {
    #[serde(flatten)]
    pub status: PlateStatus,
    pub today: DailyOutlook,
    pub evaluation: Evaluation,
}

/// Status query for raw plate text at `now`
pub async fn status_of(
    ledger: &PlateLedger,
    calendar: &RestrictionCalendar,
    plate: &str,
    now: NaiveDateTime,
) -> Result<PlateReport> {
    let plate = Plate::parse(plate)?;
    let status = ledger.status(&plate).await?;

    Ok(PlateReport {
        today: calendar.restriction_today(&plate, now),
        evaluation: calendar.evaluate_plate(&plate, now),
        status,
    })
}
