// Result sink - persists completed counting runs and the training log

use crate::core::database::Database;
use crate::models::exercise::{ProgressionEntry, RepCountRecord};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    #[error("Invalid progression entry: {0}")]
    InvalidEntry(String),
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Destination for the aggregate result of each successful run
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(&self, record: &RepCountRecord) -> SinkResult<()>;
}

#[derive(Debug, sqlx::FromRow)]
struct RepCountRow {
    id: String,
    exercise_id: String,
    filename: String,
    reps: i64,
    processed_at: i64,
}

impl TryFrom<RepCountRow> for RepCountRecord {
    type Error = SinkError;

    fn try_from(row: RepCountRow) -> SinkResult<Self> {
        let reps = u32::try_from(row.reps).map_err(|_| SinkError::CorruptRecord {
            id: row.id.clone(),
            reason: format!("repetition count {} out of range", row.reps),
        })?;

        Ok(RepCountRecord {
            id: row.id,
            exercise_id: row.exercise_id,
            filename: row.filename,
            reps,
            processed_at: row.processed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProgressionRow {
    id: String,
    exercise_id: String,
    weight_kg: f64,
    reps: i64,
    sets: i64,
    notes: Option<String>,
    recorded_at: i64,
}

impl TryFrom<ProgressionRow> for ProgressionEntry {
    type Error = SinkError;

    fn try_from(row: ProgressionRow) -> SinkResult<Self> {
        let corrupt = |field: &str, value: i64| SinkError::CorruptRecord {
            id: row.id.clone(),
            reason: format!("{} {} out of range", field, value),
        };
        let reps = u32::try_from(row.reps).map_err(|_| corrupt("reps", row.reps))?;
        let sets = u32::try_from(row.sets).map_err(|_| corrupt("sets", row.sets))?;

        Ok(ProgressionEntry {
            id: row.id,
            exercise_id: row.exercise_id,
            weight_kg: row.weight_kg,
            reps,
            sets,
            notes: row.notes,
            recorded_at: row.recorded_at,
        })
    }
}

fn validate_progression(entry: &ProgressionEntry) -> SinkResult<()> {
    if entry.exercise_id.trim().is_empty() {
        return Err(SinkError::InvalidEntry("exercise id cannot be empty".to_string()));
    }
    if !entry.weight_kg.is_finite() || entry.weight_kg < 0.0 {
        return Err(SinkError::InvalidEntry(format!(
            "weight {} must be a non-negative number",
            entry.weight_kg
        )));
    }
    if entry.sets == 0 {
        return Err(SinkError::InvalidEntry("at least one set is required".to_string()));
    }
    Ok(())
}

/// Stores results in the `rep_counts` table and the training log in
/// `progression_history`
#[derive(Debug, Clone)]
pub struct SqliteResultSink {
    db: Database,
}

impl SqliteResultSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Most recent results for an exercise, newest first
    pub async fn recent(&self, exercise_id: &str, limit: u32) -> SinkResult<Vec<RepCountRecord>> {
        let rows = sqlx::query_as::<_, RepCountRow>(
            "SELECT id, exercise_id, filename, reps, processed_at FROM rep_counts
             WHERE exercise_id = ?
             ORDER BY processed_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(exercise_id)
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(RepCountRecord::try_from).collect()
    }

    /// Sum of all recorded repetitions for an exercise
    pub async fn total_reps(&self, exercise_id: &str) -> SinkResult<u64> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(reps), 0) FROM rep_counts WHERE exercise_id = ?",
        )
        .bind(exercise_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(total.max(0) as u64)
    }

    pub async fn record_progression(&self, entry: &ProgressionEntry) -> SinkResult<()> {
        validate_progression(entry)?;

        sqlx::query(
            "INSERT INTO progression_history (id, exercise_id, weight_kg, reps, sets, notes, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.exercise_id)
        .bind(entry.weight_kg)
        .bind(i64::from(entry.reps))
        .bind(i64::from(entry.sets))
        .bind(&entry.notes)
        .bind(entry.recorded_at)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Logged sets for an exercise, newest first
    pub async fn progression_history(&self, exercise_id: &str, limit: u32) -> SinkResult<Vec<ProgressionEntry>> {
        let rows = sqlx::query_as::<_, ProgressionRow>(
            "SELECT id, exercise_id, weight_kg, reps, sets, notes, recorded_at FROM progression_history
             WHERE exercise_id = ?
             ORDER BY recorded_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(exercise_id)
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(ProgressionEntry::try_from).collect()
    }

    /// The latest logged set for an exercise, if any
    pub async fn last_progression(&self, exercise_id: &str) -> SinkResult<Option<ProgressionEntry>> {
        Ok(self.progression_history(exercise_id, 1).await?.into_iter().next())
    }
}

#[async_trait]
impl ResultSink for SqliteResultSink {
    async fn record(&self, record: &RepCountRecord) -> SinkResult<()> {
        sqlx::query(
            "INSERT INTO rep_counts (id, exercise_id, filename, reps, processed_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.exercise_id)
        .bind(&record.filename)
        .bind(i64::from(record.reps))
        .bind(record.processed_at)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }
}
