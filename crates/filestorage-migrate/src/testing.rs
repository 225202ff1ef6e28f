//! In-memory implementations of the database seams, and a log file builder.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use chrono::NaiveDate;
use tempfile::NamedTempFile;

use crate::core::{
    ColumnSet, HistoryCounts, HistoryStore, HistoryStoreFactory, Row, RowBatch, SessionProfile,
    TableSink, TableSource, Tid, TransactionRecord, TransactionStatus,
};
use crate::core::Oid;
use crate::error::{MigrateError, Result};
use crate::filestorage::format::{DataHeader, StatusByte, TxnHeader, DATA_HDR_LEN, TRANS_HDR_LEN};
use crate::transcode::parse_insert;

fn columns_of(names: &[&str]) -> Vec<String> {
    names.iter().map(|c| c.to_string()).collect()
}

// ===== Table source =====

#[derive(Default)]
pub struct MemorySource {
    tables: BTreeMap<String, (ColumnSet, Vec<Row>)>,
    failing_fetch: HashSet<String>,
    fail_ping: bool,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, name: &str, columns: &[&str], rows: Vec<Row>) {
        let set = columns_of(columns).into_iter().collect();
        self.tables.insert(name.to_string(), (set, rows));
    }

    pub fn fail_fetch(&mut self, table: &str) {
        self.failing_fetch.insert(table.to_string());
    }

    pub fn fail_ping(&mut self) {
        self.fail_ping = true;
    }
}

#[async_trait]
impl TableSource for MemorySource {
    async fn column_set(&self, table: &str) -> Result<ColumnSet> {
        Ok(self
            .tables
            .get(table)
            .map(|(cols, _)| cols.clone())
            .unwrap_or_default())
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        Ok(self.tables.get(table).map_or(0, |(_, rows)| rows.len() as u64))
    }

    async fn fetch_window(&self, table: &str, offset: u64, limit: usize) -> Result<RowBatch> {
        if self.failing_fetch.contains(table) {
            return Err(MigrateError::transfer(table, "simulated read failure"));
        }
        let rows = self
            .tables
            .get(table)
            .map(|(_, rows)| {
                rows.iter()
                    .skip(offset as usize)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(RowBatch::new(offset, rows))
    }

    async fn ping(&self) -> Result<()> {
        if self.fail_ping {
            return Err(MigrateError::pool("connection refused", "memory source"));
        }
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}

// ===== Table sink =====

struct MemTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

/// Sink that executes `INSERT` statements by parsing them.
///
/// The first declared column acts as the primary key.
pub struct MemorySink {
    tables: BTreeMap<String, MemTable>,
    fk_checks: bool,
    fk_toggles: Vec<bool>,
    introspections: usize,
    rejects: Vec<String>,
    executed: Vec<String>,
    fail_ping: bool,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
            fk_checks: true,
            fk_toggles: Vec::new(),
            introspections: 0,
            rejects: Vec::new(),
            executed: Vec::new(),
            fail_ping: false,
        }
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, name: &str, columns: &[&str]) {
        self.tables.insert(
            name.to_string(),
            MemTable {
                columns: columns_of(columns),
                rows: Vec::new(),
            },
        );
    }

    pub fn insert_row(&mut self, table: &str, row: Row) {
        if let Some(t) = self.tables.get_mut(table) {
            t.rows.push(row);
        }
    }

    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map_or(&[], |t| t.rows.as_slice())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    pub fn foreign_key_checks(&self) -> bool {
        self.fk_checks
    }

    pub fn fk_toggles(&self) -> Vec<bool> {
        self.fk_toggles.clone()
    }

    pub fn introspections(&self) -> usize {
        self.introspections
    }

    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Fail every statement whose text contains `needle`.
    pub fn reject_statements_containing(&mut self, needle: &str) {
        self.rejects.push(needle.to_string());
    }

    pub fn fail_ping(&mut self) {
        self.fail_ping = true;
    }

    fn apply_insert(&mut self, sql: &str) -> Result<u64> {
        let stmt = parse_insert(sql)?;
        let table = self
            .tables
            .get_mut(&stmt.table)
            .ok_or_else(|| MigrateError::transfer(&stmt.table, "table doesn't exist"))?;
        let columns = if stmt.columns.is_empty() {
            table.columns.clone()
        } else {
            stmt.columns.clone()
        };
        if let Some(unknown) = columns.iter().find(|c| !table.columns.contains(c)) {
            return Err(MigrateError::transfer(
                &stmt.table,
                format!("Unknown column '{}'", unknown),
            ));
        }

        let pk = table.columns.first().cloned().unwrap_or_default();
        let mut pending: Vec<Row> = Vec::new();
        for values in stmt.rows {
            if values.len() != columns.len() {
                return Err(MigrateError::transfer(&stmt.table, "column count mismatch"));
            }
            let row: Row = columns
                .iter()
                .zip(values)
                .filter_map(|(c, v)| v.into_value().map(|v| (c.clone(), v)))
                .collect();
            let key = row.get(&pk);
            let duplicate = key.is_some()
                && table
                    .rows
                    .iter()
                    .chain(pending.iter())
                    .any(|existing| existing.get(&pk) == key);
            if duplicate {
                if stmt.ignore {
                    continue;
                }
                return Err(MigrateError::transfer(&stmt.table, "Duplicate entry"));
            }
            pending.push(row);
        }

        let inserted = pending.len() as u64;
        table.rows.extend(pending);
        Ok(inserted)
    }
}

#[async_trait]
impl TableSink for MemorySink {
    async fn column_set(&mut self, table: &str) -> Result<ColumnSet> {
        self.introspections += 1;
        Ok(self
            .tables
            .get(table)
            .map(|t| t.columns.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn has_rows(&mut self, table: &str) -> Result<bool> {
        match self.tables.get(table) {
            Some(t) => Ok(!t.rows.is_empty()),
            None => Err(MigrateError::transfer(table, "table doesn't exist")),
        }
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    async fn execute_raw(&mut self, sql: &str) -> Result<u64> {
        self.executed.push(sql.to_string());
        if self.rejects.iter().any(|needle| sql.contains(needle.as_str())) {
            return Err(MigrateError::transfer("memory", "statement rejected"));
        }
        let is_insert = sql
            .trim_start()
            .get(..6)
            .is_some_and(|w| w.eq_ignore_ascii_case("INSERT"));
        if is_insert {
            self.apply_insert(sql)
        } else {
            Ok(0)
        }
    }

    async fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()> {
        self.fk_checks = enabled;
        self.fk_toggles.push(enabled);
        Ok(())
    }

    async fn delete_all(&mut self, table: &str) -> Result<u64> {
        let t = self
            .tables
            .get_mut(table)
            .ok_or_else(|| MigrateError::transfer(table, "table doesn't exist"))?;
        let n = t.rows.len() as u64;
        t.rows.clear();
        Ok(n)
    }

    async fn ping(&mut self) -> Result<()> {
        if self.fail_ping {
            return Err(MigrateError::pool("connection refused", "memory sink"));
        }
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

// ===== History store =====

#[derive(Debug, Clone, PartialEq)]
pub struct StateRow {
    pub prev_tid: i64,
    pub state: Option<Vec<u8>>,
}

/// Shared state behind every store a [`MemoryHistoryFactory`] opens.
#[derive(Debug, Default)]
pub struct HistoryState {
    pub schema_created: bool,
    pub transactions: BTreeMap<i64, (bool, Vec<u8>, Vec<u8>)>,
    pub object_states: BTreeMap<(i64, i64), StateRow>,
    pub current: BTreeMap<i64, i64>,
    pub opened: Vec<(String, SessionProfile)>,
    /// Tuned sessions fail after this many stored transactions.
    pub fail_tuned_after: Option<usize>,
    pub fail_minimal: bool,
    pub fail_open: bool,
}

#[derive(Clone, Default)]
pub struct MemoryHistoryFactory {
    state: Arc<Mutex<HistoryState>>,
}

impl MemoryHistoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HistoryStoreFactory for MemoryHistoryFactory {
    async fn open(&self, database: &str, profile: SessionProfile) -> Result<Box<dyn HistoryStore>> {
        let mut state = self.state();
        state.opened.push((database.to_string(), profile));
        if state.fail_open {
            return Err(MigrateError::Connection {
                endpoint: format!("memory/{}", database),
                message: "connection refused".to_string(),
                hint: "start the server".to_string(),
            });
        }
        drop(state);
        Ok(Box::new(MemoryHistoryStore {
            state: Arc::clone(&self.state),
            profile,
            stored: 0,
        }))
    }
}

pub struct MemoryHistoryStore {
    state: Arc<Mutex<HistoryState>>,
    profile: SessionProfile,
    stored: usize,
}

impl MemoryHistoryStore {
    fn lock(&self) -> MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn prepare(&mut self, create_schema: bool) -> Result<()> {
        let mut state = self.lock();
        if create_schema {
            state.schema_created = true;
        }
        if !state.schema_created {
            return Err(MigrateError::Validation(
                "history tables are missing".to_string(),
            ));
        }
        Ok(())
    }

    async fn last_committed_tid(&mut self) -> Result<Option<Tid>> {
        Ok(self.lock().transactions.keys().next_back().map(|t| Tid::from_i64(*t)))
    }

    async fn store_transaction(&mut self, txn: &TransactionRecord) -> Result<()> {
        let stored = self.stored;
        let profile = self.profile;
        let mut state = self.lock();
        let fail = match profile {
            SessionProfile::Tuned => state.fail_tuned_after.is_some_and(|n| stored >= n),
            SessionProfile::Minimal => state.fail_minimal,
        };
        if fail {
            return Err(MigrateError::transfer("object_state", "simulated write failure"));
        }

        let tid = txn.tid.as_i64();
        state.transactions.entry(tid).or_insert((
            txn.status == TransactionStatus::Packed,
            txn.user.clone(),
            txn.description.clone(),
        ));
        for delta in &txn.deltas {
            state
                .object_states
                .entry((delta.oid.as_i64(), tid))
                .or_insert(StateRow {
                    prev_tid: delta.prev_tid.as_i64(),
                    state: delta.state.clone(),
                });
        }
        for delta in &txn.deltas {
            let key = (delta.oid.as_i64(), tid);
            if !state.object_states.contains_key(&key) {
                return Err(MigrateError::transfer(
                    "current_object",
                    "foreign key violation",
                ));
            }
            state.current.insert(delta.oid.as_i64(), tid);
        }
        drop(state);
        self.stored += 1;
        Ok(())
    }

    async fn count_rows(&mut self) -> Result<HistoryCounts> {
        let state = self.lock();
        Ok(HistoryCounts {
            transactions: state.transactions.len() as i64,
            object_states: state.object_states.len() as i64,
            current_objects: state.current.len() as i64,
        })
    }

    async fn database_size(&mut self) -> Result<Option<String>> {
        let state = self.lock();
        let bytes: usize = state
            .object_states
            .values()
            .map(|r| r.state.as_ref().map_or(0, Vec::len))
            .sum();
        Ok(Some(format!("{} bytes", bytes)))
    }
}

// ===== Transaction log builder =====

enum Payload<'a> {
    State(&'a [u8]),
    Back(u64),
}

/// Writes a valid transaction log for tests.
pub struct LogBuilder {
    buf: BytesMut,
    next_tid: Tid,
    latest: HashMap<u64, u64>,
    first: HashMap<u64, u64>,
}

impl Default for LogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuilder {
    pub fn new() -> Self {
        let mut buf = BytesMut::new();
        buf.put_slice(b"FS21");
        let start = NaiveDate::from_ymd_opt(2020, 3, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .and_then(Tid::from_datetime)
            .unwrap_or(Tid(1 << 40));
        Self {
            buf,
            next_tid: start,
            latest: HashMap::new(),
            first: HashMap::new(),
        }
    }

    fn take_tid(&mut self) -> Tid {
        let tid = self.next_tid;
        // One minute per transaction.
        self.next_tid = Tid(tid.0 + (1 << 32));
        tid
    }

    /// Commit a transaction storing `(oid, state)` pairs.
    pub fn commit(&mut self, user: &str, description: &str, objects: &[(u64, &[u8])]) -> Tid {
        let tid = self.take_tid();
        let records = objects.iter().map(|(oid, s)| (*oid, Payload::State(s))).collect();
        self.append(tid, StatusByte::Status(TransactionStatus::Committed), user, description, records);
        tid
    }

    /// Commit with an explicit TID.
    pub fn commit_with_tid(&mut self, tid: Tid, objects: &[(u64, &[u8])]) -> Tid {
        let records = objects.iter().map(|(oid, s)| (*oid, Payload::State(s))).collect();
        self.append(tid, StatusByte::Status(TransactionStatus::Committed), "", "", records);
        tid
    }

    /// Transaction restoring the first revision of `oid` through a backpointer.
    pub fn undo_to_first_revision(&mut self, oid: u64) -> Tid {
        let tid = self.take_tid();
        let back = self.first.get(&oid).copied().unwrap_or(0);
        self.append(
            tid,
            StatusByte::Status(TransactionStatus::Committed),
            "",
            "undo",
            vec![(oid, Payload::Back(back))],
        );
        tid
    }

    /// Transaction undoing the creation of `oid` (zero backpointer).
    pub fn undo_creation(&mut self, oid: u64) -> Tid {
        let tid = self.take_tid();
        self.append(
            tid,
            StatusByte::Status(TransactionStatus::Committed),
            "",
            "undo",
            vec![(oid, Payload::Back(0))],
        );
        tid
    }

    /// Uncommitted checkpoint record.
    pub fn checkpoint(&mut self, objects: &[(u64, &[u8])]) -> Tid {
        let tid = self.take_tid();
        let records = objects.iter().map(|(oid, s)| (*oid, Payload::State(s))).collect();
        self.append(tid, StatusByte::Checkpoint, "", "", records);
        tid
    }

    fn append(
        &mut self,
        tid: Tid,
        status: StatusByte,
        user: &str,
        description: &str,
        records: Vec<(u64, Payload<'_>)>,
    ) {
        let pos = self.buf.len() as u64;
        let data_len: u64 = records
            .iter()
            .map(|(_, p)| {
                DATA_HDR_LEN as u64
                    + match p {
                        Payload::State(s) => s.len() as u64,
                        Payload::Back(_) => 8,
                    }
            })
            .sum();
        let header = TxnHeader {
            tid,
            tlen: TRANS_HDR_LEN as u64 + user.len() as u64 + description.len() as u64 + data_len,
            status: status.to_byte(),
            ulen: user.len() as u16,
            dlen: description.len() as u16,
            elen: 0,
        };
        header.encode(&mut self.buf);
        self.buf.put_slice(user.as_bytes());
        self.buf.put_slice(description.as_bytes());

        for (oid, payload) in records {
            let dpos = self.buf.len() as u64;
            let plen = match payload {
                Payload::State(s) => s.len() as u64,
                Payload::Back(_) => 0,
            };
            DataHeader {
                oid: Oid(oid),
                tid,
                prev: self.latest.get(&oid).copied().unwrap_or(0),
                tloc: pos,
                vlen: 0,
                plen,
            }
            .encode(&mut self.buf);
            match payload {
                Payload::State(s) => {
                    self.buf.put_slice(s);
                    self.first.entry(oid).or_insert(dpos);
                }
                Payload::Back(back) => self.buf.put_u64(back),
            }
            self.latest.insert(oid, dpos);
        }

        self.buf.put_u64(header.tlen);
    }

    /// Raw file contents.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Write the log to a temporary file.
    pub fn write(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&self.buf).unwrap();
        file.flush().unwrap();
        file
    }
}
