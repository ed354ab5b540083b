//! Sighting orchestration
//!
//! Consumes detection events one at a time and writes the ledger.
//!
//! **Per-plate lifecycle:** Unseen → Known, on the plate's first processed
//! event; never back. The first event of an unseen plate only registers the
//! vehicle: the restriction calendar is not consulted and no violation is
//! possible. Every later event is evaluated.
//!
//! **Per event:**
//! 1. Normalize the plate (no digit → `InvalidPlate`, nothing written)
//! 2. Read the plate's ledger status (failure → `LedgerUnavailable`)
//! 3. Unseen: register + detection row, `is_violation = false`
//! 4. Known: resolve the calendar; restricted events go through the cooldown
//!    guard, which decides whether a new violation row is written
//! 5. Exactly one detection row per normalized event, in the same
//!    transaction as the vehicle upsert and any violation row

use crate::calendar::{AllowedReason, Resolution, RestrictionCalendar};
use crate::cooldown::{CooldownDecision, CooldownGuard};
use crate::detection::{DetectionEvent, DetectionSource};
use crate::ledger::{NewDetection, NewViolation, PlateLedger};
use chrono::NaiveDateTime;
use placa_common::{Clock, Error, Plate, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Reason recorded for the first detection of a plate
pub const FIRST_SIGHTING_REASON: &str = "first sighting, rule not evaluated";

/// What happened to one processed event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SightingKind {
    /// Plate registered; rules not evaluated
    FirstSighting,
    /// Known plate allowed to circulate
    Allowed { reason: AllowedReason },
    /// Restricted, new violation persisted
    ViolationRecorded { violation_id: i64 },
    /// Restricted, duplicate of the violation persisted at `since`
    ViolationSuppressed { since: NaiveDateTime },
}

impl SightingKind {
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            SightingKind::ViolationRecorded { .. } | SightingKind::ViolationSuppressed { .. }
        )
    }
}

/// Result of processing one event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedSighting {
    pub plate: Plate,
    pub timestamp: NaiveDateTime,
    pub detection_id: i64,
    pub reason: String,
    #[serde(flatten)]
    pub kind: SightingKind,
}

/// Counters for one ingest run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub received: u64,
    pub first_sightings: u64,
    pub allowed: u64,
    pub violations_recorded: u64,
    pub violations_suppressed: u64,
    pub invalid_plates: u64,
    pub malformed: u64,
    pub failed: u64,
}

impl IngestStats {
    fn count(&mut self, kind: &SightingKind) {
        match kind {
            SightingKind::FirstSighting => self.first_sightings += 1,
            SightingKind::Allowed { .. } => self.allowed += 1,
            SightingKind::ViolationRecorded { .. } => self.violations_recorded += 1,
            SightingKind::ViolationSuppressed { .. } => self.violations_suppressed += 1,
        }
    }
}

/// Single-writer sighting pipeline
pub struct SightingOrchestrator {
    ledger: PlateLedger,
    calendar: Arc<RestrictionCalendar>,
    cooldown: CooldownGuard,
    rule_clock: Option<Arc<dyn Clock>>,
}

impl SightingOrchestrator {
    pub fn new(ledger: PlateLedger, calendar: Arc<RestrictionCalendar>, cooldown: CooldownGuard) -> Self {
        Self {
            ledger,
            calendar,
            cooldown,
            rule_clock: None,
        }
    }

    /// Evaluate rules at `clock.now()` instead of each event's timestamp
    ///
    /// Demo mode: replays footage against a pinned date. Rows keep the event
    /// timestamps.
    pub fn with_rule_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.rule_clock = Some(clock);
        self
    }

    pub fn ledger(&self) -> &PlateLedger {
        &self.ledger
    }

    /// Process one detection event
    pub async fn process(&mut self, event: DetectionEvent) -> Result<ProcessedSighting> {
        let plate = Plate::parse(&event.plate)?;
        let status = self.ledger.status(&plate).await?;

        if !status.is_known() {
            return self.record_first_sighting(plate, event).await;
        }

        let rule_time = match &self.rule_clock {
            Some(clock) => clock.now(),
            None => event.timestamp,
        };
        let resolution = self
            .calendar
            .resolve(rule_time.date(), rule_time.time(), plate.last_digit());

        match resolution {
            Resolution::Allowed { reason } => {
                let text = resolution.to_string();
                let detection = new_detection(&plate, &event, false, text.clone(), None);
                let recorded = self.ledger.record_sighting(&detection, None).await?;

                debug!(plate = %plate, reason = %text, "Circulation allowed");

                Ok(ProcessedSighting {
                    plate,
                    timestamp: event.timestamp,
                    detection_id: recorded.detection_id,
                    reason: text,
                    kind: SightingKind::Allowed { reason },
                })
            }
            Resolution::Restricted { .. } => self.record_restricted(plate, event, resolution).await,
        }
    }

    async fn record_first_sighting(
        &mut self,
        plate: Plate,
        event: DetectionEvent,
    ) -> Result<ProcessedSighting> {
        let detection = new_detection(&plate, &event, false, FIRST_SIGHTING_REASON.to_string(), None);
        let recorded = self.ledger.record_sighting(&detection, None).await?;

        info!(plate = %plate, color = %event.color, source = %event.source, "First sighting, plate registered");

        Ok(ProcessedSighting {
            plate,
            timestamp: event.timestamp,
            detection_id: recorded.detection_id,
            reason: FIRST_SIGHTING_REASON.to_string(),
            kind: SightingKind::FirstSighting,
        })
    }

    async fn record_restricted(
        &mut self,
        plate: Plate,
        event: DetectionEvent,
        resolution: Resolution,
    ) -> Result<ProcessedSighting> {
        let reason = format!("restricted circulation violation: {}", resolution);

        match self.cooldown.check(&plate, event.timestamp) {
            CooldownDecision::Permit => {
                let violation = NewViolation {
                    plate: plate.clone(),
                    color: event.color.clone(),
                    timestamp: event.timestamp,
                    reason: reason.clone(),
                    photo_path: event.photo_ref.clone(),
                };
                let detection =
                    new_detection(&plate, &event, true, reason.clone(), event.photo_ref.clone());
                let recorded = self.ledger.record_sighting(&detection, Some(&violation)).await?;

                // Only a committed violation starts the cooldown
                self.cooldown.mark(&plate, event.timestamp);

                let violation_id = recorded
                    .violation_id
                    .ok_or_else(|| Error::Internal("violation row id missing".to_string()))?;

                warn!(plate = %plate, violation_id, reason = %reason, "Violation recorded");

                Ok(ProcessedSighting {
                    plate,
                    timestamp: event.timestamp,
                    detection_id: recorded.detection_id,
                    reason,
                    kind: SightingKind::ViolationRecorded { violation_id },
                })
            }
            CooldownDecision::Suppress { since } => {
                let detection = new_detection(&plate, &event, true, reason.clone(), None);
                let recorded = self.ledger.record_sighting(&detection, None).await?;

                debug!(plate = %plate, since = %since, "Violation suppressed within cooldown");

                Ok(ProcessedSighting {
                    plate,
                    timestamp: event.timestamp,
                    detection_id: recorded.detection_id,
                    reason,
                    kind: SightingKind::ViolationSuppressed { since },
                })
            }
        }
    }

    /// Drain a detection source, one event at a time
    ///
    /// Per-event failures are logged and counted; the loop always moves on
    /// to the next event.
    pub async fn run(&mut self, source: &mut dyn DetectionSource) -> IngestStats {
        let mut stats = IngestStats::default();

        while let Some(item) = source.next_event().await {
            stats.received += 1;

            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed detection event");
                    stats.malformed += 1;
                    continue;
                }
            };

            let raw_plate = event.plate.clone();
            match self.process(event).await {
                Ok(sighting) => stats.count(&sighting.kind),
                Err(Error::InvalidPlate(text)) => {
                    warn!(plate = %text, "Rejected detection: plate has no digit");
                    stats.invalid_plates += 1;
                }
                Err(e) => {
                    error!(plate = %raw_plate, error = %e, "Failed to record detection event");
                    stats.failed += 1;
                }
            }
        }

        info!(
            received = stats.received,
            first_sightings = stats.first_sightings,
            allowed = stats.allowed,
            violations_recorded = stats.violations_recorded,
            violations_suppressed = stats.violations_suppressed,
            invalid_plates = stats.invalid_plates,
            malformed = stats.malformed,
            failed = stats.failed,
            "Ingest complete"
        );

        stats
    }
}

fn new_detection(
    plate: &Plate,
    event: &DetectionEvent,
    is_violation: bool,
    reason: String,
    photo_path: Option<String>,
) -> NewDetection {
    NewDetection {
        plate: plate.clone(),
        color: event.color.clone(),
        timestamp: event.timestamp,
        source: event.source.clone(),
        bbox: event.bbox.map(|b| b.to_string()),
        is_violation,
        reason,
        photo_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{Exemption, RestrictionRules, RestrictionWindow};
    use crate::detection::{BoundingBox, VecSource};
    use crate::ledger::NewViolation;
    use async_trait::async_trait;
    use sqlx::SqlitePool;
    use std::collections::VecDeque;
    use crate::ledger::tests::setup_test_ledger;
    use chrono::{NaiveDate, NaiveTime, Weekday};
    use placa_common::FixedClock;
    use std::time::Duration;

    fn monday(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 10)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn monday_rules() -> RestrictionCalendar {
        let window = RestrictionWindow::new(
            NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        )
        .unwrap();
        RestrictionCalendar::new(
            RestrictionRules::new(window)
                .with_weekday(Weekday::Mon, &[0, 1])
                .unwrap(),
        )
    }

    async fn orchestrator(calendar: RestrictionCalendar) -> SightingOrchestrator {
        SightingOrchestrator::new(
            setup_test_ledger().await,
            Arc::new(calendar),
            CooldownGuard::new(Duration::from_secs(10)),
        )
    }

    enum Step {
        Event(DetectionEvent),
        Execute(&'static str),
    }

    /// Source that runs SQL against the ledger between events
    struct ScriptedSource {
        pool: SqlitePool,
        steps: VecDeque<Step>,
    }

    #[async_trait]
    impl DetectionSource for ScriptedSource {
        async fn next_event(&mut self) -> Option<Result<DetectionEvent>> {
            while let Some(step) = self.steps.pop_front() {
                match step {
                    Step::Event(event) => return Some(Ok(event)),
                    Step::Execute(sql) => {
                        sqlx::query(sql).execute(&self.pool).await.unwrap();
                    }
                }
            }
            None
        }
    }

    fn event(plate: &str, ts: NaiveDateTime) -> DetectionEvent {
        DetectionEvent {
            plate: plate.to_string(),
            color: "red".to_string(),
            timestamp: ts,
            source: "cam-1".to_string(),
            bbox: Some(BoundingBox {
                x1: 10,
                y1: 20,
                x2: 110,
                y2: 60,
            }),
            photo_ref: Some(format!("/photos/{}.jpg", plate)),
        }
    }

    #[tokio::test]
    async fn test_first_sighting_never_a_violation() {
        let mut orch = orchestrator(monday_rules()).await;

        // Restricted digit, inside the window: still exempt on first sight
        let sighting = orch.process(event("abc-121", monday(8, 0, 0))).await.unwrap();

        assert_eq!(sighting.kind, SightingKind::FirstSighting);
        assert_eq!(sighting.reason, FIRST_SIGHTING_REASON);

        let plate = Plate::parse("ABC121").unwrap();
        let detections = orch.ledger().detections_for(&plate, 10).await.unwrap();
        assert_eq!(detections.len(), 1);
        assert!(!detections[0].is_violation);
        assert_eq!(detections[0].photo_path, None);
        assert_eq!(orch.ledger().violation_count(&plate).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_first_sighting_independent_of_rules() {
        let window = RestrictionWindow::new(NaiveTime::MIN, NaiveTime::from_hms_opt(23, 59, 59).unwrap()).unwrap();
        let everything = RestrictionCalendar::new(
            RestrictionRules::new(window)
                .with_weekday(Weekday::Mon, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9])
                .unwrap(),
        );

        for calendar in [monday_rules(), everything] {
            let mut orch = orchestrator(calendar).await;
            let sighting = orch.process(event("XYZ987", monday(12, 0, 0))).await.unwrap();
            assert_eq!(sighting.kind, SightingKind::FirstSighting);
        }
    }

    #[tokio::test]
    async fn test_known_plate_in_window_records_violation() {
        let mut orch = orchestrator(monday_rules()).await;
        orch.process(event("ABC121", monday(7, 0, 0))).await.unwrap();

        let sighting = orch.process(event("ABC121", monday(8, 0, 0))).await.unwrap();

        assert!(matches!(sighting.kind, SightingKind::ViolationRecorded { .. }));
        let plate = Plate::parse("ABC121").unwrap();
        let violations = orch.ledger().violations_for(&plate).await.unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].timestamp, monday(8, 0, 0));
        assert_eq!(violations[0].photo_path.as_deref(), Some("/photos/ABC121.jpg"));

        // The violation's detection row exists at the same timestamp
        let detections = orch.ledger().detections_for(&plate, 1).await.unwrap();
        assert!(detections[0].is_violation);
        assert_eq!(detections[0].timestamp, monday(8, 0, 0));
    }

    #[tokio::test]
    async fn test_known_plate_outside_window_allowed() {
        let mut orch = orchestrator(monday_rules()).await;
        orch.process(event("ABC121", monday(7, 0, 0))).await.unwrap();

        let sighting = orch.process(event("ABC121", monday(19, 1, 0))).await.unwrap();

        assert!(matches!(
            sighting.kind,
            SightingKind::Allowed {
                reason: AllowedReason::OutsideWindow { digit: 1, .. }
            }
        ));
        assert!(sighting.reason.contains("outside restricted window"));
    }

    #[tokio::test]
    async fn test_repeated_violation_within_cooldown_suppressed() {
        let mut orch = orchestrator(monday_rules()).await;
        orch.process(event("ABC121", monday(8, 0, 0))).await.unwrap();

        let first = orch.process(event("ABC121", monday(8, 0, 1))).await.unwrap();
        let second = orch.process(event("ABC121", monday(8, 0, 6))).await.unwrap();

        assert!(matches!(first.kind, SightingKind::ViolationRecorded { .. }));
        assert_eq!(
            second.kind,
            SightingKind::ViolationSuppressed {
                since: monday(8, 0, 1)
            }
        );

        let plate = Plate::parse("ABC121").unwrap();
        assert_eq!(orch.ledger().violation_count(&plate).await.unwrap(), 1);

        let flagged = orch
            .ledger()
            .detections_for(&plate, 10)
            .await
            .unwrap()
            .into_iter()
            .filter(|d| d.is_violation)
            .count();
        assert_eq!(flagged, 2);
    }

    #[tokio::test]
    async fn test_violation_after_cooldown_persisted_again() {
        let mut orch = orchestrator(monday_rules()).await;
        orch.process(event("ABC121", monday(8, 0, 0))).await.unwrap();
        orch.process(event("ABC121", monday(8, 0, 1))).await.unwrap();

        let later = orch.process(event("ABC121", monday(8, 0, 12))).await.unwrap();

        assert!(matches!(later.kind, SightingKind::ViolationRecorded { .. }));
        let plate = Plate::parse("ABC121").unwrap();
        assert_eq!(orch.ledger().violation_count(&plate).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_invalid_plate_rejected_without_writes() {
        let mut orch = orchestrator(monday_rules()).await;

        let result = orch.process(event("NO-PLATE", monday(8, 0, 0))).await;

        assert!(matches!(result, Err(Error::InvalidPlate(_))));
        assert!(orch.ledger().list_vehicles().await.unwrap().is_empty());
        let detections: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM detections")
            .fetch_one(orch.ledger().pool())
            .await
            .unwrap();
        assert_eq!(detections, 0);
    }

    #[tokio::test]
    async fn test_ledger_read_failure_not_fabricated() {
        let mut orch = orchestrator(monday_rules()).await;
        sqlx::query("DROP TABLE violations")
            .execute(orch.ledger().pool())
            .await
            .unwrap();

        let result = orch.process(event("ABC121", monday(8, 0, 0))).await;

        assert!(matches!(result, Err(Error::LedgerUnavailable(_))));
        assert!(orch.ledger().list_vehicles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_violation_write_does_not_start_cooldown() {
        let mut orch = orchestrator(monday_rules()).await;
        orch.process(event("ABC121", monday(8, 0, 0))).await.unwrap();

        sqlx::query("ALTER TABLE detections RENAME TO detections_offline")
            .execute(orch.ledger().pool())
            .await
            .unwrap();
        let failed = orch.process(event("ABC121", monday(8, 0, 1))).await;
        assert!(matches!(failed, Err(Error::Database(_))));

        sqlx::query("ALTER TABLE detections_offline RENAME TO detections")
            .execute(orch.ledger().pool())
            .await
            .unwrap();
        let retried = orch.process(event("ABC121", monday(8, 0, 2))).await.unwrap();

        assert!(matches!(retried.kind, SightingKind::ViolationRecorded { .. }));
        let plate = Plate::parse("ABC121").unwrap();
        assert_eq!(orch.ledger().violation_count(&plate).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rule_clock_overrides_event_time() {
        let saturday = NaiveDate::from_ymd_opt(2025, 11, 15)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let mut orch = orchestrator(monday_rules())
            .await
            .with_rule_clock(Arc::new(FixedClock(saturday)));

        orch.process(event("ABC121", monday(8, 0, 0))).await.unwrap();
        let sighting = orch.process(event("ABC121", monday(8, 0, 1))).await.unwrap();

        assert_eq!(
            sighting.kind,
            SightingKind::Allowed {
                reason: AllowedReason::Exempt {
                    exemption: Exemption::Weekend
                }
            }
        );
        // Rows keep the event timestamp
        assert_eq!(sighting.timestamp, monday(8, 0, 1));
    }

    #[tokio::test]
    async fn test_run_counts_and_continues_past_failures() {
        let mut orch = orchestrator(monday_rules()).await;
        let mut source = VecSource::new(vec![
            event("ABC121", monday(8, 0, 0)),
            event("????", monday(8, 0, 1)),
            event("ABC121", monday(8, 0, 2)),
            event("ABC121", monday(8, 0, 3)),
            event("XYZ125", monday(8, 0, 4)),
            event("XYZ125", monday(8, 0, 5)),
        ]);

        let stats = orch.run(&mut source).await;

        assert_eq!(
            stats,
            IngestStats {
                received: 6,
                first_sightings: 2,
                allowed: 1,
                violations_recorded: 1,
                violations_suppressed: 1,
                invalid_plates: 1,
                malformed: 0,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_run_continues_after_write_failure() {
        let mut orch = orchestrator(monday_rules()).await;
        let mut source = ScriptedSource {
            pool: orch.ledger().pool().clone(),
            steps: VecDeque::from(vec![
                Step::Event(event("ABC121", monday(8, 0, 0))),
                Step::Execute("ALTER TABLE detections RENAME TO detections_offline"),
                Step::Event(event("ABC121", monday(8, 0, 1))),
                Step::Execute("ALTER TABLE detections_offline RENAME TO detections"),
                Step::Event(event("ABC121", monday(8, 0, 2))),
                Step::Event(event("XYZ987", monday(8, 0, 3))),
            ]),
        };

        let stats = orch.run(&mut source).await;

        assert_eq!(stats.received, 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.first_sightings, 2);
        // The failed violation never armed the cooldown
        assert_eq!(stats.violations_recorded, 1);
        assert_eq!(stats.violations_suppressed, 0);

        let abc = Plate::parse("ABC121").unwrap();
        let violations = orch.ledger().violations_for(&abc).await.unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].timestamp, monday(8, 0, 2));

        // Failed event left no rows behind
        let detections = orch.ledger().detections_for(&abc, 10).await.unwrap();
        assert_eq!(detections.len(), 2);
        assert!(detections.iter().all(|d| d.timestamp != monday(8, 0, 1)));

        let xyz = Plate::parse("XYZ987").unwrap();
        assert!(orch.ledger().status(&xyz).await.unwrap().is_known());
    }

    #[tokio::test]
    async fn test_violation_without_vehicle_row_still_first_sighting() {
        let mut orch = orchestrator(monday_rules()).await;
        let plate = Plate::parse("ABC121").unwrap();
        orch.ledger()
            .append_violation(&NewViolation {
                plate: plate.clone(),
                color: "red".to_string(),
                timestamp: monday(7, 0, 0),
                reason: "imported".to_string(),
                photo_path: None,
            })
            .await
            .unwrap();

        let sighting = orch.process(event("ABC121", monday(8, 0, 0))).await.unwrap();

        assert_eq!(sighting.kind, SightingKind::FirstSighting);
        let status = orch.ledger().status(&plate).await.unwrap();
        assert!(status.is_known());
        assert_eq!(status.violation_count, 1);
    }
}
