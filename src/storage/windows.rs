//! SQLite-backed store of aggregated traffic windows. Training reads its rows back through
//! [`RowSource`]; indicator columns are derived in Rust from `dst_port`/`proto`, never in SQL.

use crate::error::AnomalyError;
use crate::features::{FeatureSchema, Field, RawFeatures, RecordLookup};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const WINDOWS_TABLE: &str = "anomaly_windows";

/// Anything that can hand the training pipeline every historical window as raw features.
pub trait RowSource {
    fn load_rows(&self, schema: &FeatureSchema) -> Result<Vec<RawFeatures>, AnomalyError>;
}

/// One aggregated window for one remote address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRecord {
    pub ip: String,
    /// Unix seconds
    pub window_start: f64,
    pub dst_port: i64,
    pub proto: i64,
    pub total_bytes: f64,
    pub total_packets: f64,
    pub unique_src_ports: f64,
    pub flow_count: f64,
    pub avg_pkt_size: f64,
    pub bytes_per_flow: f64,
    pub pkts_per_flow: f64,
    pub burstiness: f64,
    pub is_new_dst: bool,
    pub is_rare_dst: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl RecordLookup for WindowRecord {
    fn field(&self, column: &str) -> Field {
        let v = match column {
            "dst_port" => self.dst_port as f64,
            "proto" => self.proto as f64,
            "total_bytes" => self.total_bytes,
            "total_packets" => self.total_packets,
            "unique_src_ports" => self.unique_src_ports,
            "flow_count" => self.flow_count,
            "avg_pkt_size" => self.avg_pkt_size,
            "bytes_per_flow" => self.bytes_per_flow,
            "pkts_per_flow" => self.pkts_per_flow,
            "burstiness" => self.burstiness,
            _ => return Field::Missing,
        };
        Field::Number(v)
    }

    fn record_id(&self) -> String {
        format!("{}@{}", self.ip, self.window_start)
    }
}

impl RowSource for [WindowRecord] {
    fn load_rows(&self, schema: &FeatureSchema) -> Result<Vec<RawFeatures>, AnomalyError> {
        self.iter()
            .map(|w| schema.derive(w).map_err(AnomalyError::from))
            .collect()
    }
}

impl RowSource for Vec<WindowRecord> {
    fn load_rows(&self, schema: &FeatureSchema) -> Result<Vec<RawFeatures>, AnomalyError> {
        self.as_slice().load_rows(schema)
    }
}

/// A stored row: nullable values keyed by column name.
struct StoredRow {
    id: i64,
    values: Vec<(String, Option<f64>)>,
}

impl RecordLookup for StoredRow {
    fn field(&self, column: &str) -> Field {
        match self.values.iter().find(|(name, _)| name == column) {
            Some((_, Some(v))) => Field::Number(*v),
            _ => Field::Missing,
        }
    }

    fn record_id(&self) -> String {
        format!("{} row {}", WINDOWS_TABLE, self.id)
    }
}

pub struct WindowStore {
    conn: Mutex<Connection>,
}

impl WindowStore {
    /// Open or create DB at path.
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS anomaly_windows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ip TEXT NOT NULL,
                window_start REAL NOT NULL,
                dst_port INTEGER,
                proto INTEGER,
                total_bytes REAL,
                total_packets REAL,
                unique_src_ports REAL,
                flow_count REAL,
                avg_pkt_size REAL,
                bytes_per_flow REAL,
                pkts_per_flow REAL,
                burstiness REAL,
                is_new_dst INTEGER NOT NULL DEFAULT 0,
                is_rare_dst INTEGER NOT NULL DEFAULT 0,
                score REAL
            );
            CREATE INDEX IF NOT EXISTS idx_windows_ip ON anomaly_windows(ip);
            CREATE INDEX IF NOT EXISTS idx_windows_start ON anomaly_windows(window_start);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one window; returns its row id.
    pub fn record_window(&self, w: &WindowRecord) -> Result<i64, rusqlite::Error> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO anomaly_windows (ip, window_start, dst_port, proto, total_bytes, total_packets, \
             unique_src_ports, flow_count, avg_pkt_size, bytes_per_flow, pkts_per_flow, burstiness, \
             is_new_dst, is_rare_dst, score) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                w.ip,
                w.window_start,
                w.dst_port,
                w.proto,
                w.total_bytes,
                w.total_packets,
                w.unique_src_ports,
                w.flow_count,
                w.avg_pkt_size,
                w.bytes_per_flow,
                w.pkts_per_flow,
                w.burstiness,
                w.is_new_dst,
                w.is_rare_dst,
                w.score,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Number of windows already recorded for `ip`.
    pub fn seen_count(&self, ip: &str) -> Result<u64, rusqlite::Error> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM anomaly_windows WHERE ip = ?1",
            params![ip],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn row_count(&self) -> Result<u64, rusqlite::Error> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM anomaly_windows", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Retention: delete windows that started before `window_start`.
    pub fn prune_before(&self, window_start: f64) -> Result<u64, rusqlite::Error> {
        let n = self.conn().execute(
            "DELETE FROM anomaly_windows WHERE window_start < ?1",
            params![window_start],
        )?;
        Ok(n as u64)
    }
}

/// Column names are spliced into SQL, so only plain identifiers are allowed.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl RowSource for WindowStore {
    fn load_rows(&self, schema: &FeatureSchema) -> Result<Vec<RawFeatures>, AnomalyError> {
        let mut columns: Vec<&str> = schema.continuous.iter().map(String::as_str).collect();
        columns.push(crate::features::DST_PORT_FIELD);
        columns.push(crate::features::PROTO_FIELD);
        if let Some(bad) = columns.iter().find(|c| !is_identifier(c)) {
            return Err(AnomalyError::InvalidInput(format!(
                "column name `{}` is not a plain identifier",
                bad
            )));
        }

        let sql = format!(
            "SELECT id, {} FROM {} ORDER BY id",
            columns.join(", "),
            WINDOWS_TABLE
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let mut values = Vec::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                values.push((name.to_string(), row.get::<_, Option<f64>>(i + 1)?));
            }
            Ok(StoredRow { id, values })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(schema.derive(&row?)?);
        }
        Ok(out)
    }
}
