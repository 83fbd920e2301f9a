// =============================================================================
// Store — durable persistence for trades, snapshots, patterns, and sessions
// =============================================================================
//
// Single-file SQLite database. The schema below is created idempotently on
// startup; snapshot records keep their indexed key columns relational and
// carry the full record as a JSON payload so a persisted snapshot reads
// back field-equal.
//
// Access pattern: short transactions only, connection behind a mutex, no
// long-held locks. Trade-row updates and snapshot insertion for the same
// trade happen inside one transaction.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::learning::DetectedPattern;
use crate::opportunity::{Opportunity, StateTransition};
use crate::snapshots::{EntrySnapshot, ExitSnapshot, PositionSnapshot};
use crate::types::{ExitReason, OpportunitySource};

// =============================================================================
// Trade record
// =============================================================================

/// A realised short-put position. Never deleted; completed in place when the
/// exit fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub symbol: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub contracts: u32,
    pub entry_premium: f64,
    pub entry_date: NaiveDate,
    pub exit_date: Option<NaiveDate>,
    pub exit_premium: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub profit_loss: Option<f64>,
    pub profit_pct: Option<f64>,
    pub data_source: OpportunitySource,
    pub entry_snapshot_id: Option<i64>,
    pub exit_snapshot_id: Option<i64>,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.exit_date.is_some()
    }

    /// The exit columns are all null or all set; anything else is corrupt.
    pub fn exit_fields_consistent(&self) -> bool {
        let set = [
            self.exit_date.is_some(),
            self.exit_premium.is_some(),
            self.exit_reason.is_some(),
            self.profit_loss.is_some(),
        ];
        set.iter().all(|&s| s) || set.iter().all(|&s| !s)
    }
}

/// Fields needed to open a new trade row.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub symbol: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub contracts: u32,
    pub entry_premium: f64,
    pub entry_date: NaiveDate,
    pub data_source: OpportunitySource,
}

/// Recovery record for an in-flight trading cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub phase: String,
    pub payload: serde_json::Value,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A closed trade joined with its snapshots, the learning engine's unit of
/// observation.
#[derive(Debug, Clone)]
pub struct CompletedTrade {
    pub trade: Trade,
    pub entry: Option<EntrySnapshot>,
    pub exit: Option<ExitSnapshot>,
}

// =============================================================================
// Store
// =============================================================================

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS trades (
    id                 INTEGER PRIMARY KEY,
    symbol             TEXT NOT NULL,
    strike             REAL NOT NULL,
    expiration         TEXT NOT NULL,
    contracts          INTEGER NOT NULL,
    entry_premium      REAL NOT NULL,
    entry_date         TEXT NOT NULL,
    exit_date          TEXT,
    exit_premium       REAL,
    exit_reason        TEXT,
    profit_loss        REAL,
    profit_pct         REAL,
    data_source        TEXT NOT NULL,
    entry_snapshot_id  INTEGER,
    exit_snapshot_id   INTEGER
);

CREATE TABLE IF NOT EXISTS entry_snapshots (
    id                   INTEGER PRIMARY KEY,
    trade_id             INTEGER NOT NULL UNIQUE REFERENCES trades(id),
    captured_at          TEXT,
    data_quality_score   REAL NOT NULL,
    critical_field_count INTEGER NOT NULL,
    payload              TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS position_snapshots (
    id            INTEGER PRIMARY KEY,
    trade_id      INTEGER NOT NULL REFERENCES trades(id),
    snapshot_date TEXT NOT NULL,
    payload       TEXT NOT NULL,
    UNIQUE(trade_id, snapshot_date)
);

CREATE TABLE IF NOT EXISTS exit_snapshots (
    id          INTEGER PRIMARY KEY,
    trade_id    INTEGER NOT NULL UNIQUE REFERENCES trades(id),
    captured_at TEXT,
    payload     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS opportunities (
    id               INTEGER PRIMARY KEY,
    opportunity_hash TEXT NOT NULL UNIQUE,
    symbol           TEXT NOT NULL,
    strike           REAL NOT NULL,
    expiration       TEXT NOT NULL,
    source           TEXT NOT NULL,
    state            TEXT NOT NULL,
    created_on       TEXT NOT NULL,
    payload          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS opportunity_transitions (
    id               INTEGER PRIMARY KEY,
    opportunity_hash TEXT NOT NULL,
    from_state       TEXT NOT NULL,
    to_state         TEXT NOT NULL,
    at               TEXT NOT NULL,
    reason           TEXT,
    actor            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS detected_patterns (
    id                INTEGER PRIMARY KEY,
    pattern_type      TEXT NOT NULL,
    pattern_name      TEXT NOT NULL,
    sample_size       INTEGER NOT NULL,
    win_rate          REAL NOT NULL,
    avg_roi           REAL NOT NULL,
    baseline_win_rate REAL NOT NULL,
    baseline_roi      REAL NOT NULL,
    p_value           REAL NOT NULL,
    confidence        REAL NOT NULL,
    effect_size       REAL NOT NULL,
    predicates        TEXT NOT NULL,
    significant       INTEGER NOT NULL,
    detected_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS parameter_changes (
    id           INTEGER PRIMARY KEY,
    version      INTEGER NOT NULL,
    parameter    TEXT NOT NULL,
    old_value    TEXT NOT NULL,
    new_value    TEXT NOT NULL,
    confidence   REAL NOT NULL,
    auto_applied INTEGER NOT NULL,
    approved     INTEGER NOT NULL,
    rolled_back  INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id         TEXT PRIMARY KEY,
    phase      TEXT NOT NULL,
    payload    TEXT NOT NULL,
    completed  INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Thread-safe handle to the SQLite database.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;
        conn.execute_batch(SCHEMA).context("failed to apply schema")?;
        info!(path, "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        conn.execute_batch(SCHEMA).context("failed to apply schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // -------------------------------------------------------------------------
    // Trades
    // -------------------------------------------------------------------------

    pub fn insert_trade(&self, new: &NewTrade) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trades (symbol, strike, expiration, contracts, entry_premium,
                                 entry_date, data_source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.symbol,
                new.strike,
                date_str(new.expiration),
                new.contracts,
                new.entry_premium,
                date_str(new.entry_date),
                new.data_source.as_str(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(trade_id = id, symbol = %new.symbol, "trade row created");
        Ok(id)
    }

    pub fn get_trade(&self, id: i64) -> Result<Option<Trade>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM trades WHERE id = ?1",
            params![id],
            trade_from_row,
        )
        .optional()
        .context("failed to read trade")
    }

    pub fn open_trades(&self) -> Result<Vec<Trade>> {
        self.trades_where("exit_date IS NULL")
    }

    pub fn closed_trades(&self) -> Result<Vec<Trade>> {
        self.trades_where("exit_date IS NOT NULL")
    }

    fn trades_where(&self, predicate: &str) -> Result<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT * FROM trades WHERE {predicate} ORDER BY id"))?;
        let rows = stmt
            .query_map([], trade_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Atomically record the exit: update the trade row, insert the exit
    /// snapshot, and link it — one transaction, so the store can never show
    /// a closed trade without its snapshot or vice versa.
    pub fn close_trade(
        &self,
        trade_id: i64,
        exit_date: NaiveDate,
        exit_premium: f64,
        exit_reason: ExitReason,
        profit_loss: f64,
        profit_pct: f64,
        snapshot: &ExitSnapshot,
    ) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE trades
             SET exit_date = ?1, exit_premium = ?2, exit_reason = ?3,
                 profit_loss = ?4, profit_pct = ?5
             WHERE id = ?6",
            params![
                date_str(exit_date),
                exit_premium,
                exit_reason.as_str(),
                profit_loss,
                profit_pct,
                trade_id,
            ],
        )?;

        tx.execute(
            "INSERT INTO exit_snapshots (trade_id, captured_at, payload)
             VALUES (?1, ?2, ?3)",
            params![
                trade_id,
                snapshot.captured_at.map(ts_str),
                serde_json::to_string(snapshot)?,
            ],
        )?;
        let snapshot_id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE trades SET exit_snapshot_id = ?1 WHERE id = ?2",
            params![snapshot_id, trade_id],
        )?;

        tx.commit()?;
        info!(trade_id, snapshot_id, reason = %exit_reason, "trade closed in store");
        Ok(snapshot_id)
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Insert the entry snapshot and link it to its trade in one transaction.
    pub fn set_entry_snapshot(&self, snapshot: &EntrySnapshot) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO entry_snapshots
                 (trade_id, captured_at, data_quality_score, critical_field_count, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                snapshot.trade_id,
                snapshot.captured_at.map(ts_str),
                snapshot.data_quality_score,
                snapshot.critical_field_count,
                serde_json::to_string(snapshot)?,
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE trades SET entry_snapshot_id = ?1 WHERE id = ?2",
            params![id, snapshot.trade_id],
        )?;

        tx.commit()?;
        Ok(id)
    }

    pub fn entry_snapshot(&self, trade_id: i64) -> Result<Option<EntrySnapshot>> {
        self.snapshot_payload("entry_snapshots", trade_id)
    }

    pub fn exit_snapshot(&self, trade_id: i64) -> Result<Option<ExitSnapshot>> {
        self.snapshot_payload("exit_snapshots", trade_id)
    }

    fn snapshot_payload<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        trade_id: i64,
    ) -> Result<Option<T>> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                &format!("SELECT payload FROM {table} WHERE trade_id = ?1"),
                params![trade_id],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Insert a daily position snapshot. Returns `false` when a snapshot for
    /// (trade_id, snapshot_date) already exists.
    pub fn insert_position_snapshot(&self, snapshot: &PositionSnapshot) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO position_snapshots (trade_id, snapshot_date, payload)
             VALUES (?1, ?2, ?3)",
            params![
                snapshot.trade_id,
                date_str(snapshot.snapshot_date),
                serde_json::to_string(snapshot)?,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn position_snapshots(&self, trade_id: i64) -> Result<Vec<PositionSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT payload FROM position_snapshots WHERE trade_id = ?1 ORDER BY snapshot_date",
        )?;
        let payloads = stmt
            .query_map(params![trade_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        payloads
            .iter()
            .map(|json| serde_json::from_str(json).context("corrupt position snapshot payload"))
            .collect()
    }

    /// All closed trades joined with their snapshots.
    pub fn completed_trades(&self) -> Result<Vec<CompletedTrade>> {
        let trades = self.closed_trades()?;
        trades
            .into_iter()
            .map(|trade| {
                let entry = self.entry_snapshot(trade.id)?;
                let exit = self.exit_snapshot(trade.id)?;
                Ok(CompletedTrade { trade, entry, exit })
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Opportunities
    // -------------------------------------------------------------------------

    /// Insert or update by hash; duplicate candidates merge rather than
    /// duplicate. Returns the row id.
    pub fn upsert_opportunity(&self, opp: &Opportunity) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO opportunities
                 (opportunity_hash, symbol, strike, expiration, source, state, created_on, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(opportunity_hash) DO UPDATE SET
                 source = excluded.source,
                 state = excluded.state,
                 payload = excluded.payload",
            params![
                opp.opportunity_hash,
                opp.symbol,
                opp.strike,
                date_str(opp.expiration),
                opp.source.as_str(),
                opp.state.as_str(),
                date_str(opp.created_on),
                serde_json::to_string(opp)?,
            ],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM opportunities WHERE opportunity_hash = ?1",
            params![opp.opportunity_hash],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_opportunity(&self, hash: &str) -> Result<Option<Opportunity>> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM opportunities WHERE opportunity_hash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn record_transition(&self, hash: &str, transition: &StateTransition) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO opportunity_transitions
                 (opportunity_hash, from_state, to_state, at, reason, actor)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                hash,
                transition.from.as_str(),
                transition.to.as_str(),
                ts_str(transition.at),
                transition.reason,
                transition.actor,
            ],
        )?;
        Ok(())
    }

    pub fn transition_count(&self, hash: &str) -> Result<u32> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM opportunity_transitions WHERE opportunity_hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Learning output
    // -------------------------------------------------------------------------

    pub fn insert_pattern(&self, pattern: &DetectedPattern) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO detected_patterns
                 (pattern_type, pattern_name, sample_size, win_rate, avg_roi,
                  baseline_win_rate, baseline_roi, p_value, confidence, effect_size,
                  predicates, significant, detected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                pattern.pattern_type,
                pattern.pattern_name,
                pattern.sample_size as i64,
                pattern.win_rate,
                pattern.avg_roi,
                pattern.baseline_win_rate,
                pattern.baseline_roi,
                pattern.p_value,
                pattern.confidence,
                pattern.effect_size,
                serde_json::to_string(&pattern.predicates)?,
                pattern.is_significant(),
                ts_str(Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn significant_patterns(&self) -> Result<Vec<DetectedPattern>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT pattern_type, pattern_name, sample_size, win_rate, avg_roi,
                    baseline_win_rate, baseline_roi, p_value, confidence, effect_size,
                    predicates
             FROM detected_patterns WHERE significant = 1 ORDER BY confidence DESC",
        )?;
        let rows = stmt
            .query_map([], pattern_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Record a versioned parameter change; returns the assigned version.
    pub fn record_parameter_change(
        &self,
        parameter: &str,
        old_value: &str,
        new_value: &str,
        confidence: f64,
        auto_applied: bool,
        approved: bool,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        let version: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM parameter_changes WHERE parameter = ?1",
            params![parameter],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO parameter_changes
                 (version, parameter, old_value, new_value, confidence,
                  auto_applied, approved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                version,
                parameter,
                old_value,
                new_value,
                confidence,
                auto_applied,
                approved,
                ts_str(Utc::now()),
            ],
        )?;
        Ok(version)
    }

    /// Latest non-rolled-back change for a parameter, as
    /// (version, old_value, new_value).
    pub fn latest_parameter_change(&self, parameter: &str) -> Result<Option<(i64, String, String)>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT version, old_value, new_value FROM parameter_changes
             WHERE parameter = ?1 AND rolled_back = 0
             ORDER BY version DESC LIMIT 1",
            params![parameter],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .context("failed to read parameter change")
    }

    /// Mark the newest change for `parameter` rolled back; returns the old
    /// value to restore.
    pub fn rollback_parameter(&self, parameter: &str) -> Result<Option<String>> {
        let latest = self.latest_parameter_change(parameter)?;
        let Some((version, old_value, _)) = latest else {
            return Ok(None);
        };
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE parameter_changes SET rolled_back = 1
             WHERE parameter = ?1 AND version = ?2",
            params![parameter, version],
        )?;
        Ok(Some(old_value))
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    pub fn save_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (id, phase, payload, completed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 phase = excluded.phase,
                 payload = excluded.payload,
                 completed = excluded.completed,
                 updated_at = excluded.updated_at",
            params![
                session.id,
                session.phase,
                serde_json::to_string(&session.payload)?,
                session.completed,
                ts_str(session.created_at),
                ts_str(session.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Mark a session complete (the logical rename that hides it from
    /// recovery enumeration).
    pub fn complete_session(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions SET completed = 1, updated_at = ?1 WHERE id = ?2",
            params![ts_str(Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn incomplete_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, phase, payload, completed, created_at, updated_at
             FROM sessions WHERE completed = 0 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let payload: String = row.get(2)?;
                let created: String = row.get(4)?;
                let updated: String = row.get(5)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    payload,
                    row.get::<_, bool>(3)?,
                    created,
                    updated,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, phase, payload, completed, created, updated)| {
                Ok(Session {
                    id,
                    phase,
                    payload: serde_json::from_str(&payload)?,
                    completed,
                    created_at: parse_ts(&created)?,
                    updated_at: parse_ts(&updated)?,
                })
            })
            .collect()
    }
}

// =============================================================================
// Row mapping & date helpers
// =============================================================================

fn date_str(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn ts_str(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp: {s}"))?
        .with_timezone(&Utc))
}

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<Trade> {
    let expiration: String = row.get("expiration")?;
    let entry_date: String = row.get("entry_date")?;
    let exit_date: Option<String> = row.get("exit_date")?;
    let exit_reason: Option<String> = row.get("exit_reason")?;
    let data_source: String = row.get("data_source")?;

    Ok(Trade {
        id: row.get("id")?,
        symbol: row.get("symbol")?,
        strike: row.get("strike")?,
        expiration: NaiveDate::parse_from_str(&expiration, "%Y-%m-%d")
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        contracts: row.get("contracts")?,
        entry_premium: row.get("entry_premium")?,
        entry_date: NaiveDate::parse_from_str(&entry_date, "%Y-%m-%d")
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        exit_date: exit_date
            .map(|s| {
                NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
            })
            .transpose()?,
        exit_premium: row.get("exit_premium")?,
        exit_reason: exit_reason.and_then(|s| ExitReason::parse(&s)),
        profit_loss: row.get("profit_loss")?,
        profit_pct: row.get("profit_pct")?,
        data_source: OpportunitySource::parse(&data_source)
            .unwrap_or(OpportunitySource::ManualWeb),
        entry_snapshot_id: row.get("entry_snapshot_id")?,
        exit_snapshot_id: row.get("exit_snapshot_id")?,
    })
}

fn pattern_from_row(row: &Row<'_>) -> rusqlite::Result<DetectedPattern> {
    let predicates: String = row.get(10)?;
    Ok(DetectedPattern {
        pattern_type: row.get(0)?,
        pattern_name: row.get(1)?,
        sample_size: row.get::<_, i64>(2)? as usize,
        win_rate: row.get(3)?,
        avg_roi: row.get(4)?,
        baseline_win_rate: row.get(5)?,
        baseline_roi: row.get(6)?,
        p_value: row.get(7)?,
        confidence: row.get(8)?,
        effect_size: row.get(9)?,
        predicates: serde_json::from_str(&predicates).unwrap_or_default(),
        min_samples: 30,
    })
}
