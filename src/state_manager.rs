// State Manager
// SQLite-based persistence with JSON backup
//
// Stores position records and adaptive-state checkpoints so a restarted
// engine recovers its history and loss counters.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::oms::PositionRecord;
use crate::risk::{AdaptiveState, PauseState};

// =============================================================================
// Data Models
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub timestamp: String,
    pub balance: f64,
    pub open_positions: i64,
    pub consecutive_losses: u32,
    pub consecutive_wins: u32,
    pub pause_bars_elapsed: u32,
    pub paused: bool,
    pub config_hash: String,
}

impl Checkpoint {
    pub fn new(
        state: &AdaptiveState,
        balance: f64,
        open_positions: usize,
        config_hash: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            balance,
            open_positions: open_positions as i64,
            consecutive_losses: state.consecutive_losses,
            consecutive_wins: state.consecutive_wins,
            pause_bars_elapsed: state.pause_bars_elapsed,
            paused: state.is_paused(),
            config_hash: config_hash.to_string(),
        }
    }

    pub fn adaptive_state(&self) -> AdaptiveState {
        AdaptiveState {
            consecutive_losses: self.consecutive_losses,
            consecutive_wins: self.consecutive_wins,
            pause_bars_elapsed: self.pause_bars_elapsed,
            pause: if self.paused {
                PauseState::Paused
            } else {
                PauseState::Active
            },
        }
    }
}

// =============================================================================
// State Manager Implementation
// =============================================================================

pub struct SqliteStateManager {
    conn: Arc<Mutex<Connection>>,
    json_backup_path: Option<PathBuf>,
}

impl SqliteStateManager {
    pub fn new<P: AsRef<Path>>(db_path: P, json_backup_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = json_backup_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
            json_backup_path: Some(json_backup_path.as_ref().to_path_buf()),
        };
        manager.create_tables()?;
        info!(db = %db_path.display(), "SQLite state manager initialized");

        Ok(manager)
    }

    /// Database held in memory, without JSON backup
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
            json_backup_path: None,
        };
        manager.create_tables()?;
        Ok(manager)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("state database lock poisoned"))
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY,
                side TEXT NOT NULL,
                status TEXT NOT NULL,
                open_time TEXT NOT NULL,
                close_time TEXT,
                profit TEXT,
                record TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                balance REAL NOT NULL,
                open_positions INTEGER NOT NULL,
                consecutive_losses INTEGER NOT NULL,
                consecutive_wins INTEGER NOT NULL,
                pause_bars_elapsed INTEGER NOT NULL,
                paused INTEGER NOT NULL,
                config_hash TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status)",
            [],
        )?;

        Ok(())
    }

    pub fn save_record(&self, record: &PositionRecord) -> Result<()> {
        let conn = self.lock()?;
        let json = serde_json::to_string(record)?;
        let status = if record.is_open() { "open" } else { "closed" };

        conn.execute(
            "INSERT OR REPLACE INTO positions
             (id, side, status, open_time, close_time, profit, record, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, CURRENT_TIMESTAMP)",
            params![
                record.id as i64,
                record.side.to_string(),
                status,
                record.open_time.to_rfc3339(),
                record.close_time().map(|t| t.to_rfc3339()),
                record.close.as_ref().map(|c| c.profit.to_string()),
                json,
            ],
        )?;

        debug!(position_id = record.id, status, "Position record saved");
        Ok(())
    }

    pub fn load_records(&self) -> Result<Vec<PositionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT record FROM positions ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let records = rows
            .iter()
            .map(|json| serde_json::from_str(json).context("Corrupt position record"))
            .collect::<Result<Vec<PositionRecord>>>()?;

        debug!(count = records.len(), "Loaded position records");
        Ok(records)
    }

    pub fn save_checkpoint(&self, ckpt: &Checkpoint) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO checkpoints
             (timestamp, balance, open_positions, consecutive_losses,
              consecutive_wins, pause_bars_elapsed, paused, config_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                ckpt.timestamp,
                ckpt.balance,
                ckpt.open_positions,
                ckpt.consecutive_losses,
                ckpt.consecutive_wins,
                ckpt.pause_bars_elapsed,
                if ckpt.paused { 1 } else { 0 },
                ckpt.config_hash,
            ],
        )?;

        debug!(
            losses = ckpt.consecutive_losses,
            wins = ckpt.consecutive_wins,
            balance = ckpt.balance,
            "Checkpoint saved"
        );
        Ok(())
    }

    pub fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, balance, open_positions, consecutive_losses,
                    consecutive_wins, pause_bars_elapsed, paused, config_hash
             FROM checkpoints ORDER BY id DESC LIMIT 1",
        )?;

        let ckpt = stmt.query_row([], |row| {
            Ok(Checkpoint {
                timestamp: row.get(0)?,
                balance: row.get(1)?,
                open_positions: row.get(2)?,
                consecutive_losses: row.get(3)?,
                consecutive_wins: row.get(4)?,
                pause_bars_elapsed: row.get(5)?,
                paused: row.get::<_, i32>(6)? != 0,
                config_hash: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            })
        });

        match ckpt {
            Ok(c) => {
                info!(
                    losses = c.consecutive_losses,
                    wins = c.consecutive_wins,
                    timestamp = %c.timestamp,
                    "Loaded checkpoint"
                );
                Ok(Some(c))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                debug!("No checkpoint found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write records and the latest checkpoint to the JSON backup file
    pub fn export_json(&self) -> Result<()> {
        let Some(path) = &self.json_backup_path else {
            return Ok(());
        };

        let records = self.load_records()?;
        let checkpoint = self.load_checkpoint()?;

        let state = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "positions": records,
            "checkpoint": checkpoint,
        });

        std::fs::write(path, serde_json::to_string_pretty(&state)?)
            .with_context(|| format!("Failed to write state backup {}", path.display()))?;
        debug!(path = %path.display(), "State exported");
        Ok(())
    }
}

// =============================================================================
// Factory Function
// =============================================================================

pub fn create_state_manager<P: AsRef<Path>>(state_dir: P) -> Result<SqliteStateManager> {
    let state_dir = state_dir.as_ref();
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create state dir {}", state_dir.display()))?;

    let db_path = state_dir.join("liquidity_trap.db");
    let json_path = state_dir.join("liquidity_trap.json");

    SqliteStateManager::new(db_path, json_path)
}
