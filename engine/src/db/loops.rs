/// Research loop persistence
///
/// A loop is stored as one `loops` row plus one `branches` row per branch.
/// Branch rows carry the full branch as JSON so a save always captures a
/// complete branch, never a partial mutation. Snapshots store the whole loop
/// state as one JSON document addressed by a content hash.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::orchestration::models::{Branch, LoopState};

/// Listing entry for a stored loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopSummary {
    pub loop_id: String,
    pub loop_number: u32,
    pub branch_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotInfo {
    pub snapshot_id: String,
    pub loop_id: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RepositoryStats {
    pub loops: i64,
    pub branches: i64,
    pub active_branches: i64,
    pub snapshots: i64,
}

/// Loop state repository for database operations
pub struct LoopRepository {
    pool: SqlitePool,
}

fn timestamp_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

impl LoopRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Save a whole loop state in one transaction
    pub async fn save_state(&self, state: &LoopState) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO loops (loop_id, loop_number, created_at, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(loop_id) DO UPDATE SET loop_number = excluded.loop_number, updated_at = excluded.updated_at",
        )
        .bind(&state.loop_id)
        .bind(state.loop_number as i64)
        .bind(state.created_at.timestamp())
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to save loop")?;

        for branch in state.branches.values() {
            let record = serde_json::to_string(branch).context("Failed to serialize branch")?;
            sqlx::query(
                "INSERT INTO branches (loop_id, branch_id, status, sequence, record, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(loop_id, branch_id) DO UPDATE SET
                    status = excluded.status, sequence = excluded.sequence,
                    record = excluded.record, updated_at = excluded.updated_at",
            )
            .bind(&state.loop_id)
            .bind(&branch.id)
            .bind(branch.status.as_str())
            .bind(branch.sequence as i64)
            .bind(record)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to save branch {}", branch.id))?;
        }

        tx.commit().await.context("Failed to commit loop state")?;

        debug!(loop_id = %state.loop_id, branches = state.branches.len(), "Saved loop state");
        Ok(())
    }

    /// Upsert a single branch of an already saved loop
    pub async fn save_branch(&self, loop_id: &str, branch: &Branch) -> Result<()> {
        let now = Utc::now().timestamp();
        let record = serde_json::to_string(branch).context("Failed to serialize branch")?;
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let updated = sqlx::query("UPDATE loops SET updated_at = ? WHERE loop_id = ?")
            .bind(now)
            .bind(loop_id)
            .execute(&mut *tx)
            .await
            .context("Failed to touch loop")?;
        if updated.rows_affected() == 0 {
            return Err(EngineError::LoopNotFound(loop_id.to_string()).into());
        }

        sqlx::query(
            "INSERT INTO branches (loop_id, branch_id, status, sequence, record, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(loop_id, branch_id) DO UPDATE SET
                status = excluded.status, sequence = excluded.sequence,
                record = excluded.record, updated_at = excluded.updated_at",
        )
        .bind(loop_id)
        .bind(&branch.id)
        .bind(branch.status.as_str())
        .bind(branch.sequence as i64)
        .bind(record)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to save branch {}", branch.id))?;

        tx.commit().await.context("Failed to commit branch")?;
        Ok(())
    }

    pub async fn load_state(&self, loop_id: &str) -> Result<Option<LoopState>> {
        let row = sqlx::query("SELECT loop_number, created_at FROM loops WHERE loop_id = ?")
            .bind(loop_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load loop")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut state = LoopState::new(loop_id, row.get::<i64, _>("loop_number") as u32);
        state.created_at = timestamp_to_datetime(row.get("created_at"));

        let rows = sqlx::query("SELECT record FROM branches WHERE loop_id = ? ORDER BY sequence")
            .bind(loop_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load branches")?;

        for row in rows {
            let record: String = row.get("record");
            let branch: Branch =
                serde_json::from_str(&record).context("Failed to deserialize branch")?;
            state.next_sequence = state.next_sequence.max(branch.sequence + 1);
            state.branches.insert(branch.id.clone(), branch);
        }

        Ok(Some(state))
    }

    pub async fn get_branch(&self, loop_id: &str, branch_id: &str) -> Result<Option<Branch>> {
        let row = sqlx::query("SELECT record FROM branches WHERE loop_id = ? AND branch_id = ?")
            .bind(loop_id)
            .bind(branch_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load branch")?;

        row.map(|row| {
            let record: String = row.get("record");
            serde_json::from_str(&record).context("Failed to deserialize branch")
        })
        .transpose()
    }

    /// All stored loops, most recently updated first
    pub async fn list_loops(&self) -> Result<Vec<LoopSummary>> {
        let rows = sqlx::query(
            "SELECT l.loop_id, l.loop_number, l.created_at, l.updated_at, COUNT(b.branch_id) AS branch_count
             FROM loops l LEFT JOIN branches b ON b.loop_id = l.loop_id
             GROUP BY l.loop_id
             ORDER BY l.updated_at DESC, l.loop_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list loops")?;

        Ok(rows
            .into_iter()
            .map(|row| LoopSummary {
                loop_id: row.get("loop_id"),
                loop_number: row.get::<i64, _>("loop_number") as u32,
                branch_count: row.get("branch_count"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Store a point-in-time copy of a loop and return its id.
    ///
    /// The id is the blake3 hash of the loop id, the creation time and the
    /// serialized state.
    pub async fn create_snapshot(&self, loop_id: &str) -> Result<String> {
        let state = self
            .load_state(loop_id)
            .await?
            .ok_or_else(|| EngineError::LoopNotFound(loop_id.to_string()))?;

        let now = Utc::now();
        let document = serde_json::to_string(&state).context("Failed to serialize loop state")?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(loop_id.as_bytes());
        hasher.update(&now.timestamp_micros().to_le_bytes());
        hasher.update(document.as_bytes());
        let snapshot_id = hasher.finalize().to_hex().to_string();

        sqlx::query("INSERT INTO snapshots (snapshot_id, loop_id, created_at, state) VALUES (?, ?, ?, ?)")
            .bind(&snapshot_id)
            .bind(loop_id)
            .bind(now.timestamp())
            .bind(document)
            .execute(&self.pool)
            .await
            .context("Failed to create snapshot")?;

        info!(loop_id, snapshot_id = %snapshot_id, "Created snapshot");
        Ok(snapshot_id)
    }

    /// Snapshots of a loop, newest first
    pub async fn list_snapshots(&self, loop_id: &str) -> Result<Vec<SnapshotInfo>> {
        let rows = sqlx::query(
            "SELECT snapshot_id, loop_id, created_at FROM snapshots WHERE loop_id = ?
             ORDER BY created_at DESC, snapshot_id",
        )
        .bind(loop_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list snapshots")?;

        Ok(rows
            .into_iter()
            .map(|row| SnapshotInfo {
                snapshot_id: row.get("snapshot_id"),
                loop_id: row.get("loop_id"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    pub async fn load_snapshot(&self, snapshot_id: &str) -> Result<Option<LoopState>> {
        let row = sqlx::query("SELECT state FROM snapshots WHERE snapshot_id = ?")
            .bind(snapshot_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load snapshot")?;

        row.map(|row| {
            let document: String = row.get("state");
            serde_json::from_str(&document).context("Failed to deserialize snapshot")
        })
        .transpose()
    }

    /// Delete a loop with its branches and snapshots. Returns false if it did not exist.
    pub async fn delete_state(&self, loop_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM loops WHERE loop_id = ?")
            .bind(loop_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete loop")?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(loop_id, "Deleted loop state");
        }
        Ok(deleted)
    }

    pub async fn stats(&self) -> Result<RepositoryStats> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM loops) AS loops,
                (SELECT COUNT(*) FROM branches) AS branches,
                (SELECT COUNT(*) FROM branches WHERE status IN ('pending', 'running')) AS active_branches,
                (SELECT COUNT(*) FROM snapshots) AS snapshots",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute stats")?;

        Ok(RepositoryStats {
            loops: row.get("loops"),
            branches: row.get("branches"),
            active_branches: row.get("active_branches"),
            snapshots: row.get("snapshots"),
        })
    }
}
