//! Plate ledger
//!
//! Durable record of every vehicle seen, every processed detection and every
//! persisted violation. Each write is its own transaction; `record_sighting`
//! keeps the rows produced by one detection event in a single transaction so
//! a violation never lands without its detection row.
//!
//! Read failures surface as `Error::LedgerUnavailable` so callers can tell an
//! unreachable ledger from an unseen plate. Write failures surface as
//! `Error::Database`.

use chrono::NaiveDateTime;
use placa_common::db::{DetectionRow, VehicleRow, ViolationRow};
use placa_common::{Error, Plate, Result};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};

/// Detection row to append
#[derive(Debug, Clone, PartialEq)]
pub struct NewDetection {
    pub plate: Plate,
    pub color: String,
    pub timestamp: NaiveDateTime,
    pub source: String,
    pub bbox: Option<String>,
    pub is_violation: bool,
    pub reason: String,
    pub photo_path: Option<String>,
}

/// Violation row to append
#[derive(Debug, Clone, PartialEq)]
pub struct NewViolation {
    pub plate: Plate,
    pub color: String,
    pub timestamp: NaiveDateTime,
    pub reason: String,
    pub photo_path: Option<String>,
}

/// Row ids written for one detection event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedSighting {
    pub detection_id: i64,
    pub violation_id: Option<i64>,
}

/// Ledger snapshot for one plate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateStatus {
    pub plate: Plate,
    /// False iff no vehicle row and no violation exist
    pub registered: bool,
    pub color: Option<String>,
    pub first_seen: Option<NaiveDateTime>,
    pub last_seen: Option<NaiveDateTime>,
    pub violation_count: i64,
    pub last_violation: Option<NaiveDateTime>,
}

impl PlateStatus {
    /// Whether the plate has a vehicle row (the first-sighting gate has fired)
    ///
    /// Narrower than `registered`, which also counts violations: the
    /// orchestrator always writes the vehicle row in the same transaction as
    /// any violation, so a violation without a vehicle can only come from a
    /// direct `append_violation`, and that plate still gets its first sighting.
    pub fn is_known(&self) -> bool {
        self.first_seen.is_some()
    }
}

/// SQLite-backed ledger
#[derive(Debug, Clone)]
pub struct PlateLedger {
    db: SqlitePool,
}

impl PlateLedger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Register a sighting of `plate`
    ///
    /// Inserts with `first_seen = last_seen = timestamp` when unseen; otherwise
    /// updates the color and advances `last_seen` (never backwards).
    /// `first_seen` is never touched once written.
    pub async fn upsert(&self, plate: &Plate, color: &str, timestamp: NaiveDateTime) -> Result<()> {
        let mut tx = self.db.begin().await?;
        upsert_vehicle(&mut tx, plate, color, timestamp).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Append one detection row, returning its id
    pub async fn append_detection(&self, record: &NewDetection) -> Result<i64> {
        let mut tx = self.db.begin().await?;
        let id = insert_detection(&mut tx, record).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Append one violation row, returning its id
    pub async fn append_violation(&self, record: &NewViolation) -> Result<i64> {
        let mut tx = self.db.begin().await?;
        let id = insert_violation(&mut tx, record).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Upsert the vehicle, append the detection and the optional violation
    /// in one transaction
    pub async fn record_sighting(
        &self,
        detection: &NewDetection,
        violation: Option<&NewViolation>,
    ) -> Result<RecordedSighting> {
        let mut tx = self.db.begin().await?;

        upsert_vehicle(&mut tx, &detection.plate, &detection.color, detection.timestamp).await?;
        let violation_id = match violation {
            Some(record) => Some(insert_violation(&mut tx, record).await?),
            None => None,
        };
        let detection_id = insert_detection(&mut tx, detection).await?;

        tx.commit().await?;

        tracing::debug!(
            plate = %detection.plate,
            detection_id,
            violation_id = ?violation_id,
            "Recorded sighting"
        );

        Ok(RecordedSighting {
            detection_id,
            violation_id,
        })
    }

    /// Ledger snapshot for a plate
    ///
    /// All reads run in one transaction, so the vehicle row, the count and
    /// the last violation come from the same WAL snapshot even while the
    /// ingest writer commits.
    pub async fn status(&self, plate: &Plate) -> Result<PlateStatus> {
        let mut tx = self.db.begin().await.map_err(Error::ledger_read)?;

        let vehicle = fetch_vehicle(&mut tx, plate).await.map_err(Error::ledger_read)?;
        let violation_count = count_violations(&mut tx, plate)
            .await
            .map_err(Error::ledger_read)?;
        let last_violation = latest_violation(&mut tx, plate)
            .await
            .map_err(Error::ledger_read)?;

        tx.commit().await.map_err(Error::ledger_read)?;

        let registered = vehicle.is_some() || violation_count > 0;
        let (color, first_seen, last_seen) = match vehicle {
            Some(row) => (Some(row.color), Some(row.first_seen), Some(row.last_seen)),
            None => (None, None, None),
        };

        Ok(PlateStatus {
            plate: plate.clone(),
            registered,
            color,
            first_seen,
            last_seen,
            violation_count,
            last_violation,
        })
    }

    pub async fn violation_count(&self, plate: &Plate) -> Result<i64> {
        let mut conn = self.db.acquire().await.map_err(Error::ledger_read)?;
        count_violations(&mut conn, plate)
            .await
            .map_err(Error::ledger_read)
    }

    pub async fn last_violation_timestamp(&self, plate: &Plate) -> Result<Option<NaiveDateTime>> {
        let mut conn = self.db.acquire().await.map_err(Error::ledger_read)?;
        latest_violation(&mut conn, plate)
            .await
            .map_err(Error::ledger_read)
    }

    /// All vehicles, most recently seen first
    pub async fn list_vehicles(&self) -> Result<Vec<VehicleRow>> {
        sqlx::query_as(
            "SELECT plate, color, first_seen, last_seen FROM vehicles ORDER BY last_seen DESC, plate",
        )
        .fetch_all(&self.db)
        .await
        .map_err(Error::ledger_read)
    }

    /// Most recent detections of a plate, newest first
    pub async fn detections_for(&self, plate: &Plate, limit: u32) -> Result<Vec<DetectionRow>> {
        sqlx::query_as(
            r#"
            SELECT id, plate, color, timestamp, source, bbox, is_violation, reason, photo_path
            FROM detections
            WHERE plate = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(plate.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await
        .map_err(Error::ledger_read)
    }

    /// Violation history of a plate, oldest first
    pub async fn violations_for(&self, plate: &Plate) -> Result<Vec<ViolationRow>> {
        sqlx::query_as(
            r#"
            SELECT id, plate, color, timestamp, reason, photo_path
            FROM violations
            WHERE plate = ?
            ORDER BY timestamp, id
            "#,
        )
        .bind(plate.as_str())
        .fetch_all(&self.db)
        .await
        .map_err(Error::ledger_read)
    }
}

async fn fetch_vehicle(
    conn: &mut SqliteConnection,
    plate: &Plate,
) -> sqlx::Result<Option<VehicleRow>> {
    sqlx::query_as("SELECT plate, color, first_seen, last_seen FROM vehicles WHERE plate = ?")
        .bind(plate.as_str())
        .fetch_optional(&mut *conn)
        .await
}

async fn count_violations(conn: &mut SqliteConnection, plate: &Plate) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM violations WHERE plate = ?")
        .bind(plate.as_str())
        .fetch_one(&mut *conn)
        .await
}

async fn latest_violation(
    conn: &mut SqliteConnection,
    plate: &Plate,
) -> sqlx::Result<Option<NaiveDateTime>> {
    sqlx::query_scalar(
        "SELECT timestamp FROM violations WHERE plate = ? ORDER BY timestamp DESC LIMIT 1",
    )
    .bind(plate.as_str())
    .fetch_optional(&mut *conn)
    .await
}

async fn upsert_vehicle(
    conn: &mut SqliteConnection,
    plate: &Plate,
    color: &str,
    timestamp: NaiveDateTime,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO vehicles (plate, color, first_seen, last_seen)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(plate) DO UPDATE SET
            color = excluded.color,
            last_seen = MAX(vehicles.last_seen, excluded.last_seen)
        "#,
    )
    .bind(plate.as_str())
    .bind(color)
    .bind(timestamp)
    .bind(timestamp)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_detection(conn: &mut SqliteConnection, record: &NewDetection) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO detections
            (plate, color, timestamp, source, bbox, is_violation, reason, photo_path)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.plate.as_str())
    .bind(&record.color)
    .bind(record.timestamp)
    .bind(&record.source)
    .bind(record.bbox.as_deref())
    .bind(record.is_violation)
    .bind(&record.reason)
    .bind(record.photo_path.as_deref())
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn insert_violation(conn: &mut SqliteConnection, record: &NewViolation) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO violations (plate, color, timestamp, reason, photo_path)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.plate.as_str())
    .bind(&record.color)
    .bind(record.timestamp)
    .bind(&record.reason)
    .bind(record.photo_path.as_deref())
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}
