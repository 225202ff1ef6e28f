//! History-preserving object store on PostgreSQL.
//!
//! Every stored transaction keeps all of its object states. `current_object`
//! references `object_state`, so the states of a transaction are written
//! before the pointers that name them, inside one database transaction.

use async_trait::async_trait;
use tokio_postgres::{Client, Statement};
use tracing::{debug, info, warn};

use crate::config::{AdminConfig, DestinationConfig};
use crate::core::{
    HistoryCounts, HistoryStore, HistoryStoreFactory, SessionProfile, Tid, TransactionRecord,
};
use crate::error::{MigrateError, Result};

/// Tables every history-preserving destination must have.
pub const HISTORY_TABLES: [&str; 3] = ["transaction", "object_state", "current_object"];

/// DDL for the history-preserving layout.
pub const HISTORY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transaction (
    tid         BIGINT NOT NULL PRIMARY KEY,
    packed      BOOLEAN NOT NULL DEFAULT FALSE,
    is_empty    BOOLEAN NOT NULL DEFAULT FALSE,
    username    BYTEA NOT NULL,
    description BYTEA NOT NULL,
    extension   BYTEA
);

CREATE TABLE IF NOT EXISTS object_state (
    zoid        BIGINT NOT NULL,
    tid         BIGINT NOT NULL REFERENCES transaction,
    prev_tid    BIGINT NOT NULL,
    md5         CHAR(32),
    state_size  BIGINT NOT NULL CHECK (state_size >= 0),
    state       BYTEA,
    PRIMARY KEY (zoid, tid)
);

CREATE INDEX IF NOT EXISTS object_state_tid ON object_state (tid);
CREATE INDEX IF NOT EXISTS object_state_prev_tid ON object_state (prev_tid);

CREATE TABLE IF NOT EXISTS current_object (
    zoid        BIGINT NOT NULL PRIMARY KEY,
    tid         BIGINT NOT NULL,
    FOREIGN KEY (zoid, tid) REFERENCES object_state
);
";

const INSERT_TRANSACTION: &str = "INSERT INTO transaction \
     (tid, packed, is_empty, username, description, extension) \
     VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (tid) DO NOTHING";

const INSERT_STATE: &str = "INSERT INTO object_state \
     (zoid, tid, prev_tid, state_size, state) \
     VALUES ($1, $2, $3, $4, $5) ON CONFLICT (zoid, tid) DO NOTHING";

const UPSERT_CURRENT: &str = "INSERT INTO current_object (zoid, tid) VALUES ($1, $2) \
     ON CONFLICT (zoid) DO UPDATE SET tid = EXCLUDED.tid";

struct Prepared {
    transaction: Statement,
    state: Statement,
    current: Statement,
}

/// One session on a migrated database, connected as the owner role.
pub struct PgHistoryStore {
    client: Client,
    database: String,
    prepared: Option<Prepared>,
}

impl PgHistoryStore {
    /// Connect as the owner role. A tuned session runs `tuned_session` first.
    pub async fn open(
        admin: &AdminConfig,
        dest: &DestinationConfig,
        database: &str,
        profile: SessionProfile,
        tuned_session: &[String],
    ) -> Result<Self> {
        let client = super::connect(&dest.role_connection(admin, database)).await?;
        if profile == SessionProfile::Tuned {
            for setting in tuned_session {
                client.batch_execute(setting).await?;
            }
            debug!("{}: applied {} session settings", database, tuned_session.len());
        }
        Ok(Self {
            client,
            database: database.to_string(),
            prepared: None,
        })
    }

    async fn missing_tables(&self) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name::text = ANY($1::text[])",
                &[&HISTORY_TABLES.as_slice()],
            )
            .await?;
        let present: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
        Ok(HISTORY_TABLES
            .iter()
            .filter(|t| !present.iter().any(|p| p == *t))
            .map(|t| t.to_string())
            .collect())
    }

    fn statements(&self) -> Result<&Prepared> {
        self.prepared.as_ref().ok_or_else(|| {
            MigrateError::Validation(format!("{}: history store used before prepare", self.database))
        })
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn prepare(&mut self, create_schema: bool) -> Result<()> {
        if create_schema {
            self.client.batch_execute(HISTORY_SCHEMA).await?;
            debug!("{}: history schema ensured", self.database);
        }
        let missing = self.missing_tables().await?;
        if !missing.is_empty() {
            return Err(MigrateError::Validation(format!(
                "{}: history tables missing: {}",
                self.database,
                missing.join(", ")
            )));
        }
        self.prepared = Some(Prepared {
            transaction: self.client.prepare(INSERT_TRANSACTION).await?,
            state: self.client.prepare(INSERT_STATE).await?,
            current: self.client.prepare(UPSERT_CURRENT).await?,
        });
        Ok(())
    }

    async fn last_committed_tid(&mut self) -> Result<Option<Tid>> {
        let row = self
            .client
            .query_one("SELECT max(tid) FROM transaction", &[])
            .await?;
        Ok(row.get::<_, Option<i64>>(0).map(Tid::from_i64))
    }

    async fn store_transaction(&mut self, txn: &TransactionRecord) -> Result<()> {
        let (transaction, state, current) = {
            let p = self.statements()?;
            (p.transaction.clone(), p.state.clone(), p.current.clone())
        };

        let tx = self.client.transaction().await?;
        let tid = txn.tid.as_i64();
        tx.execute(
            &transaction,
            &[
                &tid,
                &txn.status.is_packed(),
                &txn.deltas.is_empty(),
                &txn.user,
                &txn.description,
                &txn.extension,
            ],
        )
        .await?;
        for delta in &txn.deltas {
            tx.execute(
                &state,
                &[
                    &delta.oid.as_i64(),
                    &tid,
                    &delta.prev_tid.as_i64(),
                    &delta.state_size(),
                    &delta.state,
                ],
            )
            .await?;
        }
        for delta in &txn.deltas {
            tx.execute(&current, &[&delta.oid.as_i64(), &tid]).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count_rows(&mut self) -> Result<HistoryCounts> {
        let row = self
            .client
            .query_one(
                "SELECT (SELECT count(*) FROM transaction), \
                        (SELECT count(*) FROM object_state), \
                        (SELECT count(*) FROM current_object)",
                &[],
            )
            .await?;
        Ok(HistoryCounts {
            transactions: row.get(0),
            object_states: row.get(1),
            current_objects: row.get(2),
        })
    }

    async fn database_size(&mut self) -> Result<Option<String>> {
        let row = self
            .client
            .query_one(
                "SELECT pg_size_pretty(pg_database_size(current_database()))",
                &[],
            )
            .await?;
        Ok(row.get(0))
    }
}

/// Opens [`PgHistoryStore`] sessions for the drainer.
#[derive(Debug, Clone)]
pub struct PgHistoryFactory {
    admin: AdminConfig,
    destination: DestinationConfig,
    tuned_session: Vec<String>,
}

impl PgHistoryFactory {
    pub fn new(admin: AdminConfig, destination: DestinationConfig, tuned_session: Vec<String>) -> Self {
        Self {
            admin,
            destination,
            tuned_session,
        }
    }
}

#[async_trait]
impl HistoryStoreFactory for PgHistoryFactory {
    async fn open(&self, database: &str, profile: SessionProfile) -> Result<Box<dyn HistoryStore>> {
        let store = PgHistoryStore::open(
            &self.admin,
            &self.destination,
            database,
            profile,
            &self.tuned_session,
        )
        .await;
        match store {
            Ok(store) => {
                info!(
                    "{}: opened history-preserving session ({:?})",
                    database, profile
                );
                Ok(Box::new(store))
            }
            Err(e) => {
                warn!("{}: could not open history session: {}", database, e);
                Err(e)
            }
        }
    }
}
