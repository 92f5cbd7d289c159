//! SQLite persistence for simulation runs: run metadata, progress, and the
//! per-block snapshots the runner decides to keep.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::logging::{log, obj, v_str, Domain, Level};
use crate::snapshot::{NetworkState, ParticipantState, PoolState, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Created,
    Running,
    Completed,
    Failed,
    Interrupted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(RunStatus::Created),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "interrupted" => Ok(RunStatus::Interrupted),
            other => Err(anyhow!("unknown run status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub id: String,
    pub status: RunStatus,
    pub blocks: Option<u64>,
    /// Blocks completed, clamped to `blocks`
    pub current_block: u64,
    pub percentage: f64,
}

impl Progress {
    pub fn label(&self) -> String {
        format!("{}/{}", self.current_block, self.blocks.unwrap_or(0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub total_blocks: Option<u64>,
    pub logged_blocks: usize,
    pub log_interval: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub status: RunStatus,
    pub blocks: BTreeMap<u64, Snapshot>,
    pub metadata: RunMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub status: RunStatus,
    pub total_blocks: Option<u64>,
    pub current_block: u64,
}

/// Persistence contract the runner writes through: run lifecycle, progress
/// and snapshots keyed by `(sim_id, block)`.
pub trait SnapshotSink {
    fn create_simulation(&mut self, name: &str) -> Result<String>;
    fn update_status(&mut self, sim_id: &str, status: RunStatus) -> Result<()>;
    fn update_config(&mut self, sim_id: &str, blocks: u64, tao_supply: f64) -> Result<()>;
    /// Record that `block` has finished.
    fn update_progress(&mut self, sim_id: &str, block: u64) -> Result<()>;
    fn store_snapshot(&mut self, sim_id: &str, snapshot: &Snapshot) -> Result<()>;
    fn progress(&self, sim_id: &str) -> Result<Option<Progress>>;
}

pub struct StateStore {
    conn: Connection,
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub fn new_sim_id() -> String {
    format!("sim-{}", hex::encode(rand::random::<[u8; 8]>()))
}

impl StateStore {
    pub fn new(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Ok(Self { conn })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS simulations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL,
                blocks INTEGER,
                tao_supply REAL,
                current_block INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS account_states (
                simulation_id TEXT NOT NULL REFERENCES simulations(id),
                block INTEGER NOT NULL,
                account_id INTEGER NOT NULL,
                free_balance REAL NOT NULL,
                market_value REAL NOT NULL,
                alpha_stakes TEXT NOT NULL,
                PRIMARY KEY (simulation_id, block, account_id)
            );
            CREATE TABLE IF NOT EXISTS subnet_states (
                simulation_id TEXT NOT NULL REFERENCES simulations(id),
                block INTEGER NOT NULL,
                subnet_id INTEGER NOT NULL,
                tao_in REAL NOT NULL,
                alpha_in REAL NOT NULL,
                alpha_out REAL NOT NULL,
                k REAL NOT NULL,
                exchange_rate REAL NOT NULL,
                emission_rate REAL NOT NULL,
                dividends TEXT NOT NULL,
                PRIMARY KEY (simulation_id, block, subnet_id)
            );
            CREATE TABLE IF NOT EXISTS network_states (
                simulation_id TEXT NOT NULL REFERENCES simulations(id),
                block INTEGER NOT NULL,
                tao_supply REAL NOT NULL,
                sum_prices REAL NOT NULL,
                PRIMARY KEY (simulation_id, block)
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn get_progress(&self, sim_id: &str) -> Result<Option<Progress>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, status, blocks, current_block FROM simulations WHERE id = ?1",
                params![sim_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, status, blocks, current)) = row else {
            return Ok(None);
        };
        let blocks = blocks.map(|b| b as u64);
        let current_block = match blocks {
            Some(total) if total > 0 => (current as u64).min(total),
            _ => 0,
        };
        let percentage = match blocks {
            Some(total) if total > 0 => current_block as f64 / total as f64 * 100.0,
            _ => 0.0,
        };
        Ok(Some(Progress {
            id,
            status: status.parse()?,
            blocks,
            current_block,
            percentage,
        }))
    }

    pub fn get_simulation(&self, sim_id: &str) -> Result<Option<SimulationRecord>> {
        let Some(summary) = self.summary(sim_id)? else {
            return Ok(None);
        };
        let mut blocks = BTreeMap::new();
        for block in self.logged_blocks(sim_id)? {
            blocks.insert(block, self.load_snapshot(sim_id, block)?);
        }
        let log_interval = match (summary.total_blocks, blocks.len()) {
            (Some(total), n) if n > 0 => Some(total / n as u64),
            _ => None,
        };
        Ok(Some(SimulationRecord {
            id: summary.id,
            name: summary.name,
            created_at: summary.created_at,
            status: summary.status,
            metadata: RunMetadata {
                total_blocks: summary.total_blocks,
                logged_blocks: blocks.len(),
                log_interval,
            },
            blocks,
        }))
    }

    /// Most recent runs first, without block data.
    pub fn list_simulations(&self, limit: usize) -> Result<Vec<SimulationSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, created_at, status, blocks, current_block
             FROM simulations ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], summary_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            let (summary, status) = row?;
            out.push(SimulationSummary { status: status.parse()?, ..summary });
        }
        Ok(out)
    }

    pub fn load_snapshot(&self, sim_id: &str, block: u64) -> Result<Snapshot> {
        let network = self
            .conn
            .query_row(
                "SELECT tao_supply, sum_prices FROM network_states
                 WHERE simulation_id = ?1 AND block = ?2",
                params![sim_id, block as i64],
                |row| Ok(NetworkState { tao_supply: row.get(0)?, sum_prices: row.get(1)? }),
            )
            .optional()?
            .ok_or_else(|| anyhow!("no snapshot for {} at block {}", sim_id, block))?;

        let mut stmt = self.conn.prepare(
            "SELECT account_id, free_balance, market_value, alpha_stakes FROM account_states
             WHERE simulation_id = ?1 AND block = ?2 ORDER BY account_id",
        )?;
        let rows = stmt.query_map(params![sim_id, block as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut participants = Vec::new();
        for row in rows {
            let (id, free_balance, market_value, stakes) = row?;
            participants.push(ParticipantState {
                id: id as u32,
                free_balance,
                market_value,
                alpha_stakes: serde_json::from_str(&stakes)?,
            });
        }

        let mut stmt = self.conn.prepare(
            "SELECT subnet_id, tao_in, alpha_in, alpha_out, k, exchange_rate, emission_rate, dividends
             FROM subnet_states WHERE simulation_id = ?1 AND block = ?2 ORDER BY subnet_id",
        )?;
        let rows = stmt.query_map(params![sim_id, block as i64], |row| {
            Ok((
                PoolState {
                    id: row.get::<_, i64>(0)? as u32,
                    tao_in: row.get(1)?,
                    alpha_in: row.get(2)?,
                    alpha_out: row.get(3)?,
                    k: row.get(4)?,
                    price: row.get(5)?,
                    emission_rate: row.get(6)?,
                    dividends: BTreeMap::new(),
                },
                row.get::<_, String>(7)?,
            ))
        })?;
        let mut pools = Vec::new();
        for row in rows {
            let (pool, dividends) = row?;
            pools.push(PoolState { dividends: serde_json::from_str(&dividends)?, ..pool });
        }

        Ok(Snapshot { block, participants, pools, network })
    }

    fn summary(&self, sim_id: &str) -> Result<Option<SimulationSummary>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, created_at, status, blocks, current_block
                 FROM simulations WHERE id = ?1",
                params![sim_id],
                summary_from_row,
            )
            .optional()?;
        match row {
            Some((summary, status)) => Ok(Some(SimulationSummary { status: status.parse()?, ..summary })),
            None => Ok(None),
        }
    }

    fn logged_blocks(&self, sim_id: &str) -> Result<Vec<u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT block FROM network_states WHERE simulation_id = ?1 ORDER BY block",
        )?;
        let rows = stmt.query_map(params![sim_id], |row| row.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row? as u64);
        }
        Ok(out)
    }
}

/// Summary row plus the raw status text, parsed by the caller.
fn summary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(SimulationSummary, String)> {
    let status: String = row.get(3)?;
    Ok((
        SimulationSummary {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
            status: RunStatus::Created,
            total_blocks: row.get::<_, Option<i64>>(4)?.map(|b| b as u64),
            current_block: row.get::<_, i64>(5)? as u64,
        },
        status,
    ))
}

impl SnapshotSink for StateStore {
    fn create_simulation(&mut self, name: &str) -> Result<String> {
        let sim_id = new_sim_id();
        self.conn.execute(
            "INSERT INTO simulations (id, name, created_at, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                sim_id,
                name,
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                RunStatus::Created.as_str()
            ],
        )?;
        log(
            Level::Info,
            Domain::Storage,
            "simulation_created",
            obj(&[("sim_id", v_str(&sim_id)), ("name", v_str(name))]),
        );
        Ok(sim_id)
    }

    fn update_status(&mut self, sim_id: &str, status: RunStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE simulations SET status = ?1 WHERE id = ?2",
            params![status.as_str(), sim_id],
        )?;
        Ok(())
    }

    fn update_config(&mut self, sim_id: &str, blocks: u64, tao_supply: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE simulations SET blocks = ?1, tao_supply = ?2 WHERE id = ?3",
            params![blocks as i64, tao_supply, sim_id],
        )?;
        Ok(())
    }

    fn update_progress(&mut self, sim_id: &str, block: u64) -> Result<()> {
        self.conn.execute(
            "UPDATE simulations SET current_block = ?1 WHERE id = ?2",
            params![(block + 1) as i64, sim_id],
        )?;
        Ok(())
    }

    fn store_snapshot(&mut self, sim_id: &str, snapshot: &Snapshot) -> Result<()> {
        let block = snapshot.block as i64;
        let tx = self.conn.transaction()?;
        for p in &snapshot.participants {
            tx.execute(
                "INSERT INTO account_states
                 (simulation_id, block, account_id, free_balance, market_value, alpha_stakes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    sim_id,
                    block,
                    p.id as i64,
                    p.free_balance,
                    p.market_value,
                    serde_json::to_string(&p.alpha_stakes)?
                ],
            )?;
        }
        for pool in &snapshot.pools {
            tx.execute(
                "INSERT INTO subnet_states
                 (simulation_id, block, subnet_id, tao_in, alpha_in, alpha_out, k,
                  exchange_rate, emission_rate, dividends)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    sim_id,
                    block,
                    pool.id as i64,
                    pool.tao_in,
                    pool.alpha_in,
                    pool.alpha_out,
                    pool.k,
                    pool.price,
                    pool.emission_rate,
                    serde_json::to_string(&pool.dividends)?
                ],
            )?;
        }
        tx.execute(
            "INSERT INTO network_states (simulation_id, block, tao_supply, sum_prices)
             VALUES (?1, ?2, ?3, ?4)",
            params![sim_id, block, snapshot.network.tao_supply, snapshot.network.sum_prices],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn progress(&self, sim_id: &str) -> Result<Option<Progress>> {
        self.get_progress(sim_id)
    }
}
