use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{now_millis, AttendanceRecord, Student, WeightAdjustment};

const STUDENT_COLUMNS: &str = "id, name, weight, status, created_at, updated_at";
const RECORD_COLUMNS: &str =
    "id, student_id, student_name, record_type, status, note, recorded_at";

/// Durable store for the `students` and `records` collections.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (or create) the database file and bring the schema up to date.
    pub async fn init(db_path: &Path) -> Result<Self, StorageError> {
        let newly_created = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::OpenFailed(sqlx::Error::Io(e)))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::OpenFailed)?;

        if newly_created {
            info!("Initialized new database: {}", db_path.display());
        } else {
            info!("Opened existing database: {}", db_path.display());
        }

        Self::migrate(pool).await
    }

    /// A private in-memory database. One connection, kept alive for the pool's lifetime.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(StorageError::OpenFailed)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::OpenFailed)?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Close every connection; later calls fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn add_student(&self, student: &Student) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await?;
        insert_student(&mut conn, student).await
    }

    /// Insert a batch in one transaction. Any failure rolls back the whole batch.
    pub async fn add_students(&self, students: &[Student]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        for student in students {
            insert_student(&mut tx, student).await?;
        }

        tx.commit().await?;
        debug!("Inserted {} students", students.len());
        Ok(())
    }

    pub async fn get_all_students(&self) -> Result<Vec<Student>, StorageError> {
        let query = format!("SELECT {STUDENT_COLUMNS} FROM students ORDER BY created_at, rowid");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(student_from_row).collect()
    }

    pub async fn get_student(&self, id: Uuid) -> Result<Option<Student>, StorageError> {
        let query = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1");
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(student_from_row).transpose()
    }

    pub async fn count_students(&self) -> Result<i64, StorageError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM students")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Insert or replace by id.
    pub async fn update_student(&self, student: &Student) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO students (id, name, weight, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (id) DO UPDATE
            SET name = excluded.name,
                weight = excluded.weight,
                status = excluded.status,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(student.id.to_string())
        .bind(&student.name)
        .bind(i64::from(student.weight))
        .bind(student.status.as_str())
        .bind(student.created_at)
        .bind(student.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Set a student's weight. Returns `false` when no such student exists.
    pub async fn update_student_weight(&self, id: Uuid, weight: u32) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE students SET weight = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(i64::from(weight))
            .bind(now_millis())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns `false` when no such student exists.
    pub async fn delete_student(&self, id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM students WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear_students(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM students").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn add_record(&self, record: &AttendanceRecord) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await?;
        insert_record(&mut conn, record).await
    }

    /// Store a confirmed outcome together with the student's new status and weight.
    ///
    /// Returns the updated student, or `None` if it was deleted after the draw
    /// (the record is kept either way).
    pub async fn record_attendance(
        &self,
        record: &AttendanceRecord,
        adjustment: WeightAdjustment,
    ) -> Result<Option<Student>, StorageError> {
        let mut tx = self.pool.begin().await?;

        insert_record(&mut tx, record).await?;

        let query = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1");
        let current = sqlx::query(&query)
            .bind(record.student_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;

        let updated = match current.as_ref().map(student_from_row).transpose()? {
            Some(mut student) => {
                student.weight = adjustment.apply(student.weight);
                student.status = record.status.into();
                student.updated_at = now_millis();

                sqlx::query(
                    "UPDATE students SET weight = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
                )
                .bind(i64::from(student.weight))
                .bind(student.status.as_str())
                .bind(student.updated_at)
                .bind(student.id.to_string())
                .execute(&mut *tx)
                .await?;

                Some(student)
            }
            None => None,
        };

        tx.commit().await?;
        Ok(updated)
    }

    pub async fn get_all_records(&self) -> Result<Vec<AttendanceRecord>, StorageError> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM records");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Records with `start <= timestamp <= end`.
    pub async fn get_records_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AttendanceRecord>, StorageError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM records \
             WHERE recorded_at >= ?1 AND recorded_at <= ?2 \
             ORDER BY recorded_at"
        );
        let rows = sqlx::query(&query)
            .bind(start.timestamp_millis())
            .bind(end.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Up to `limit` records, most recent first.
    pub async fn get_recent_records(
        &self,
        limit: usize,
    ) -> Result<Vec<AttendanceRecord>, StorageError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM records ORDER BY recorded_at DESC, rowid DESC LIMIT ?1"
        );
        let rows = sqlx::query(&query)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    pub async fn count_records(&self) -> Result<i64, StorageError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn delete_record(&self, id: Uuid) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM records WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_records(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM records").execute(&self.pool).await?;
        Ok(())
    }
}

async fn insert_student(conn: &mut SqliteConnection, student: &Student) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO students (id, name, weight, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(student.id.to_string())
    .bind(&student.name)
    .bind(i64::from(student.weight))
    .bind(student.status.as_str())
    .bind(student.created_at)
    .bind(student.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_record(
    conn: &mut SqliteConnection,
    record: &AttendanceRecord,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO records
        (id, student_id, student_name, record_type, status, note, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(record.id.to_string())
    .bind(record.student_id.to_string())
    .bind(&record.student_name)
    .bind(record.record_type.as_str())
    .bind(record.status.as_str())
    .bind(record.note.as_deref())
    .bind(record.timestamp)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn corrupt(table: &'static str, detail: impl Into<String>) -> StorageError {
    StorageError::Corrupt {
        table,
        detail: detail.into(),
    }
}

fn parse_id(table: &'static str, raw: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw).map_err(|e| corrupt(table, format!("bad id '{raw}': {e}")))
}

fn student_from_row(row: &SqliteRow) -> Result<Student, StorageError> {
    let id: String = row.try_get("id")?;
    let weight: i64 = row.try_get("weight")?;
    let status: String = row.try_get("status")?;

    Ok(Student {
        id: parse_id("students", &id)?,
        name: row.try_get("name")?,
        weight: u32::try_from(weight)
            .map_err(|_| corrupt("students", format!("weight {weight} out of range")))?,
        status: status.parse().map_err(|e: String| corrupt("students", e))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<AttendanceRecord, StorageError> {
    let id: String = row.try_get("id")?;
    let student_id: String = row.try_get("student_id")?;
    let record_type: String = row.try_get("record_type")?;
    let status: String = row.try_get("status")?;

    Ok(AttendanceRecord {
        id: parse_id("records", &id)?,
        student_id: parse_id("records", &student_id)?,
        student_name: row.try_get("student_name")?,
        record_type: record_type.parse().map_err(|e: String| corrupt("records", e))?,
        status: status.parse().map_err(|e: String| corrupt("records", e))?,
        note: row.try_get("note")?,
        timestamp: row.try_get("recorded_at")?,
    })
}
