//! End-to-end ingest against an on-disk ledger

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use placa_common::db::{connect_readonly, init_database};
use placa_common::Plate;
use placa_enforcer::calendar::{AllowedReason, Exemption, RestrictionCalendar, RestrictionRules};
use placa_enforcer::cooldown::CooldownGuard;
use placa_enforcer::detection::{DetectionEvent, JsonLinesSource};
use placa_enforcer::ledger::{NewViolation, PlateLedger};
use placa_enforcer::orchestrator::{IngestStats, SightingKind, SightingOrchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 11, day)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn plate(text: &str) -> Plate {
    Plate::parse(text).unwrap()
}

fn event(plate: &str, ts: NaiveDateTime) -> DetectionEvent {
    DetectionEvent {
        plate: plate.to_string(),
        color: "blue".to_string(),
        timestamp: ts,
        source: "cam-north".to_string(),
        bbox: None,
        photo_ref: Some(format!("/evidence/{}-{}.jpg", plate, ts.format("%H%M%S"))),
    }
}

async fn orchestrator(db_path: &Path) -> SightingOrchestrator {
    let pool = init_database(db_path).await.unwrap();
    SightingOrchestrator::new(
        PlateLedger::new(pool),
        Arc::new(RestrictionCalendar::new(RestrictionRules::pasto_2025())),
        CooldownGuard::new(Duration::from_secs(10)),
    )
}

fn db_path(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("placa.db")
}

#[tokio::test]
async fn test_ingest_json_lines_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let mut orch = orchestrator(&path).await;

    // Monday 2025-11-10: digits 0 and 1 restricted 07:30-19:00
    let input = concat!(
        r#"{"plate":"ABC-121","color":"red","timestamp":"2025-11-10T08:00:00","source":"cam-north"}"#,
        "\n",
        r#"{"plate":"ABC121","color":"red","timestamp":"2025-11-10T08:00:03","source":"cam-north","bbox":{"x1":5,"y1":6,"x2":95,"y2":40},"photo_ref":"/evidence/abc121.jpg"}"#,
        "\n",
        r#"{"plate":"ABC121","color":"red","timestamp":"2025-11-10T08:00:08","source":"cam-north","photo_ref":"/evidence/dup.jpg"}"#,
        "\n",
        "{ not json\n",
        r#"{"plate":"----","timestamp":"2025-11-10T08:00:09","source":"cam-north"}"#,
        "\n",
        r#"{"plate":"XYZ987","timestamp":"2025-11-10T08:00:10","source":"cam-south"}"#,
        "\n",
        r#"{"plate":"XYZ987","timestamp":"2025-11-10T08:01:00","source":"cam-south"}"#,
        "\n",
    );
    let mut source = JsonLinesSource::new(input.as_bytes());

    let stats = orch.run(&mut source).await;

    assert_eq!(
        stats,
        IngestStats {
            received: 7,
            first_sightings: 2,
            allowed: 1,
            violations_recorded: 1,
            violations_suppressed: 1,
            invalid_plates: 1,
            malformed: 1,
            failed: 0,
        }
    );

    let reader = PlateLedger::new(connect_readonly(&path).await.unwrap());

    let vehicles = reader.list_vehicles().await.unwrap();
    assert_eq!(vehicles.len(), 2);

    let abc = reader.status(&plate("ABC121")).await.unwrap();
    assert_eq!(abc.first_seen, Some(at(10, 8, 0, 0)));
    assert_eq!(abc.last_seen, Some(at(10, 8, 0, 8)));
    assert_eq!(abc.violation_count, 1);
    assert_eq!(abc.last_violation, Some(at(10, 8, 0, 3)));

    let violations = reader.violations_for(&plate("ABC121")).await.unwrap();
    assert_eq!(violations[0].photo_path.as_deref(), Some("/evidence/abc121.jpg"));

    let detections = reader.detections_for(&plate("ABC121"), 10).await.unwrap();
    assert_eq!(detections.len(), 3);
    assert_eq!(detections.iter().filter(|d| d.is_violation).count(), 2);
    // Only the persisted violation's detection carries the photo
    let with_photo: Vec<_> = detections.iter().filter(|d| d.photo_path.is_some()).collect();
    assert_eq!(with_photo.len(), 1);
    assert_eq!(with_photo[0].timestamp, at(10, 8, 0, 3));
    assert_eq!(with_photo[0].bbox.as_deref(), Some("5,6,95,40"));

    let xyz = reader.status(&plate("XYZ987")).await.unwrap();
    assert_eq!(xyz.violation_count, 0);
}

#[tokio::test]
async fn test_reader_sees_commits_while_writer_open() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let mut orch = orchestrator(&path).await;
    let reader = PlateLedger::new(connect_readonly(&path).await.unwrap());

    orch.process(event("ABC121", at(10, 8, 0, 0))).await.unwrap();
    assert!(reader.status(&plate("ABC121")).await.unwrap().is_known());

    orch.process(event("ABC121", at(10, 8, 0, 1))).await.unwrap();
    assert_eq!(reader.violation_count(&plate("ABC121")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_restart_keeps_plates_known_but_forgets_cooldown() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);

    {
        let mut orch = orchestrator(&path).await;
        orch.process(event("ABC121", at(10, 8, 0, 0))).await.unwrap();
        let first = orch.process(event("ABC121", at(10, 8, 0, 1))).await.unwrap();
        assert!(matches!(first.kind, SightingKind::ViolationRecorded { .. }));
        orch.ledger().pool().close().await;
    }

    let mut restarted = orchestrator(&path).await;

    // Still known: the first-sighting gate does not fire again
    let again = restarted.process(event("ABC121", at(10, 8, 0, 5))).await.unwrap();
    assert!(matches!(again.kind, SightingKind::ViolationRecorded { .. }));
    assert_eq!(
        restarted
            .ledger()
            .violation_count(&plate("ABC121"))
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_holiday_exempts_known_plate() {
    let temp_dir = TempDir::new().unwrap();
    let mut orch = orchestrator(&db_path(&temp_dir)).await;

    // Monday 2025-11-17 is a national holiday
    orch.process(event("ABC121", at(17, 7, 0, 0))).await.unwrap();
    let sighting = orch.process(event("ABC121", at(17, 9, 0, 0))).await.unwrap();

    assert_eq!(
        sighting.kind,
        SightingKind::Allowed {
            reason: AllowedReason::Exempt {
                exemption: Exemption::Holiday
            }
        }
    );
}

#[tokio::test]
async fn test_override_replaces_weekday_default_during_ingest() {
    let temp_dir = TempDir::new().unwrap();
    let mut orch = orchestrator(&db_path(&temp_dir)).await;

    // Tuesday 2025-11-18 keeps {2,3} by override
    orch.process(event("DEF120", at(18, 7, 0, 0))).await.unwrap();
    orch.process(event("DEF122", at(18, 7, 0, 0))).await.unwrap();

    let zero = orch.process(event("DEF120", at(18, 9, 0, 0))).await.unwrap();
    let two = orch.process(event("DEF122", at(18, 9, 0, 0))).await.unwrap();

    assert!(matches!(
        zero.kind,
        SightingKind::Allowed {
            reason: AllowedReason::DigitNotRestricted { digit: 0 }
        }
    ));
    assert!(two.kind.is_violation());
}

#[tokio::test]
async fn test_ingest_skips_non_utf8_line_and_continues() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let mut orch = orchestrator(&path).await;

    let mut input = Vec::new();
    input.extend_from_slice(
        br#"{"plate":"AAA111","timestamp":"2025-11-10T08:00:00","source":"cam-north"}"#,
    );
    input.extend_from_slice(b"\n{\"plate\":\"\xff\xfe\"}\n");
    for (plate, second) in [("BBB222", 1), ("CCC333", 2), ("DDD444", 3)] {
        let line = format!(
            r#"{{"plate":"{}","timestamp":"2025-11-10T08:00:0{}","source":"cam-north"}}"#,
            plate, second
        );
        input.extend_from_slice(line.as_bytes());
        input.push(b'\n');
    }
    let mut source = JsonLinesSource::new(input.as_slice());

    let stats = orch.run(&mut source).await;

    assert_eq!(stats.received, 5);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.first_sightings, 4);
    assert_eq!(orch.ledger().list_vehicles().await.unwrap().len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_is_one_snapshot_under_concurrent_writes() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let writer = PlateLedger::new(init_database(&path).await.unwrap());
    let reader = PlateLedger::new(connect_readonly(&path).await.unwrap());
    let p = plate("ABC121");
    let base = at(10, 8, 0, 0);

    writer.upsert(&p, "red", base).await.unwrap();

    let writes = {
        let writer = writer.clone();
        let p = p.clone();
        tokio::spawn(async move {
            for i in 0..200 {
                writer
                    .append_violation(&NewViolation {
                        plate: p.clone(),
                        color: "red".to_string(),
                        timestamp: base + TimeDelta::seconds(i),
                        reason: "restricted".to_string(),
                        photo_path: None,
                    })
                    .await
                    .unwrap();
            }
        })
    };

    // Violation k carries base + k seconds, so count and latest must agree
    while !writes.is_finished() {
        let status = reader.status(&p).await.unwrap();
        let expected = match status.violation_count {
            0 => None,
            n => Some(base + TimeDelta::seconds(n - 1)),
        };
        assert_eq!(status.last_violation, expected);
    }
    writes.await.unwrap();

    let status = reader.status(&p).await.unwrap();
    assert_eq!(status.violation_count, 200);
    assert_eq!(status.last_violation, Some(base + TimeDelta::seconds(199)));
}
