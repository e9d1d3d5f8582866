//! PostgreSQL outbox store.
//!
//! Claims run on the write pool at `READ COMMITTED` with
//! `FOR UPDATE SKIP LOCKED`, so concurrent relays split the pending rows
//! between them instead of blocking on each other. Lookups run on the read
//! pool.

use crate::error::{OutboxError, OutboxResult};
use crate::record::{OutboxRecord, OutboxStatus};
use crate::store::{OUTBOX_TABLE, OutboxStore, OutboxTransaction, ensure_terminal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::QueryableByName;
use diesel::sql_types::{BigInt, Double, Nullable, Text, Timestamptz, Uuid as SqlUuid};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use waybill_cqrs::Role;
use waybill_diesel::{IsolationLevel, RoutedPool, qualified_table, quote_schema};
use waybill_log::{debug, info, warn};

const RETURNING: &str =
    "o.id, o.content::text AS content, o.aggregate_id, o.status, o.created_at, o.type AS event_type, o.claimed_at";

#[derive(Debug, QueryableByName)]
struct OutboxRow {
    #[diesel(sql_type = SqlUuid)]
    id: Uuid,
    #[diesel(sql_type = Text)]
    content: String,
    #[diesel(sql_type = SqlUuid)]
    aggregate_id: Uuid,
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Text)]
    event_type: String,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    claimed_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = OutboxError;

    fn try_from(row: OutboxRow) -> OutboxResult<Self> {
        Ok(Self {
            id: row.id,
            content: row.content,
            aggregate_id: row.aggregate_id,
            status: row.status.parse()?,
            created_at: row.created_at,
            event_type: row.event_type,
            claimed_at: row.claimed_at,
        })
    }
}

fn into_records(rows: Vec<OutboxRow>) -> OutboxResult<Vec<OutboxRecord>> {
    rows.into_iter().map(OutboxRecord::try_from).collect()
}

/// DDL for `schema`'s outbox table. Safe to run repeatedly.
pub fn outbox_ddl(schema: &str) -> OutboxResult<String> {
    let quoted = quote_schema(schema)?;
    let table = qualified_table(schema, OUTBOX_TABLE)?;
    Ok(format!(
        "CREATE SCHEMA IF NOT EXISTS {quoted};
CREATE TABLE IF NOT EXISTS {table} (
    id uuid PRIMARY KEY,
    content jsonb NOT NULL,
    aggregate_id uuid NOT NULL,
    status varchar(20) NOT NULL DEFAULT 'NEW',
    created_at timestamptz NOT NULL,
    type varchar(50) NOT NULL,
    claimed_at timestamptz NULL
);
CREATE INDEX IF NOT EXISTS outbox_status_created_at_idx ON {table} (status, created_at);"
    ))
}

/// Outbox store over routed PostgreSQL pools.
#[derive(Clone)]
pub struct PgOutboxStore {
    pools: Arc<RoutedPool>,
}

impl PgOutboxStore {
    pub fn new(pools: Arc<RoutedPool>) -> Self {
        Self { pools }
    }

    pub fn pools(&self) -> &Arc<RoutedPool> {
        &self.pools
    }

    /// Create `schema`'s outbox table if it does not exist.
    pub async fn migrate(&self, schema: &str) -> OutboxResult<()> {
        let ddl = outbox_ddl(schema)?;
        let mut conn = self.pools.resolve(Role::Write).get().await?;
        let conn: &mut AsyncPgConnection = &mut conn;
        conn.batch_execute(&ddl).await?;
        info!({ "schema" => schema }, "Outbox table ready");
        Ok(())
    }
}

impl std::fmt::Debug for PgOutboxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgOutboxStore")
            .field("mode", &self.pools.mode())
            .finish()
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn claim_batch(&self, schema: &str, batch_size: usize) -> OutboxResult<Vec<OutboxRecord>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let table = qualified_table(schema, OUTBOX_TABLE)?;
        let sql = format!(
            "WITH claimed AS (
                SELECT id FROM {table}
                WHERE status = 'NEW'
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE {table} AS o
            SET status = 'PROCESSING', claimed_at = now()
            FROM claimed
            WHERE o.id = claimed.id
            RETURNING {RETURNING}"
        );
        let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);

        let pool = self.pools.resolve(Role::Write);
        let status = pool.status();
        if status.is_under_pressure() {
            warn!(
                { "schema" => schema, "pool" => status, "utilization" => format!("{:.0}%", status.utilization()) },
                "Write pool under pressure"
            );
        }

        let rows = pool
            .transaction_with_isolation::<_, OutboxError, _>(IsolationLevel::ReadCommitted, move |conn| {
                async move {
                    let rows = diesel::sql_query(sql)
                        .bind::<BigInt, _>(limit)
                        .load::<OutboxRow>(conn)
                        .await?;
                    Ok(rows)
                }
                .scope_boxed()
            })
            .await?;

        // UPDATE ... RETURNING does not keep the CTE's order.
        let mut records = into_records(rows)?;
        records.sort_by_key(|r| r.created_at);

        debug!({ "schema" => schema, "claimed" => records.len() }, "Claimed outbox records");
        Ok(records)
    }

    async fn finalize(&self, schema: &str, id: Uuid, terminal: OutboxStatus) -> OutboxResult<bool> {
        ensure_terminal(terminal)?;

        let table = qualified_table(schema, OUTBOX_TABLE)?;
        let sql = format!("UPDATE {table} SET status = $1 WHERE id = $2 AND status = 'PROCESSING'");

        let updated = self
            .pools
            .resolve(Role::Write)
            .transaction::<_, OutboxError, _>(move |conn| {
                async move {
                    let updated = diesel::sql_query(sql)
                        .bind::<Text, _>(terminal.as_str())
                        .bind::<SqlUuid, _>(id)
                        .execute(conn)
                        .await?;
                    Ok(updated)
                }
                .scope_boxed()
            })
            .await?;

        Ok(updated > 0)
    }

    async fn find(&self, schema: &str, id: Uuid) -> OutboxResult<Option<OutboxRecord>> {
        let table = qualified_table(schema, OUTBOX_TABLE)?;
        let sql = format!("SELECT {RETURNING} FROM {table} AS o WHERE o.id = $1");

        let mut conn = self.pools.resolve(Role::Read).get().await?;
        let conn: &mut AsyncPgConnection = &mut conn;
        let rows = diesel::sql_query(sql)
            .bind::<SqlUuid, _>(id)
            .load::<OutboxRow>(conn)
            .await?;

        Ok(into_records(rows)?.into_iter().next())
    }

    async fn find_by_aggregate(
        &self,
        schema: &str,
        aggregate_id: Uuid,
    ) -> OutboxResult<Vec<OutboxRecord>> {
        let table = qualified_table(schema, OUTBOX_TABLE)?;
        let sql = format!(
            "SELECT {RETURNING} FROM {table} AS o WHERE o.aggregate_id = $1 ORDER BY o.created_at"
        );

        let mut conn = self.pools.resolve(Role::Read).get().await?;
        let conn: &mut AsyncPgConnection = &mut conn;
        let rows = diesel::sql_query(sql)
            .bind::<SqlUuid, _>(aggregate_id)
            .load::<OutboxRow>(conn)
            .await?;

        into_records(rows)
    }

    async fn reclaim_stale(&self, schema: &str, older_than: Duration) -> OutboxResult<u64> {
        let table = qualified_table(schema, OUTBOX_TABLE)?;
        // claimed_at is stamped by now() in claim_batch; compare on the same clock.
        let sql = format!(
            "UPDATE {table} SET status = 'NEW', claimed_at = NULL
             WHERE status = 'PROCESSING' AND claimed_at < now() - make_interval(secs => $1)"
        );

        let mut conn = self.pools.resolve(Role::Write).get().await?;
        let conn: &mut AsyncPgConnection = &mut conn;
        let reset = diesel::sql_query(sql)
            .bind::<Double, _>(older_than.as_secs_f64())
            .execute(conn)
            .await?;

        Ok(reset as u64)
    }
}

/// Lets the writer insert into the caller's own diesel transaction.
#[async_trait]
impl OutboxTransaction for AsyncPgConnection {
    async fn insert_records(&mut self, schema: &str, records: &[OutboxRecord]) -> OutboxResult<u64> {
        let table = qualified_table(schema, OUTBOX_TABLE)?;
        let sql = format!(
            "INSERT INTO {table} (id, content, aggregate_id, status, created_at, type)
             VALUES ($1, $2::jsonb, $3, $4, $5, $6)"
        );

        let mut inserted = 0u64;
        for record in records {
            inserted += diesel::sql_query(sql.as_str())
                .bind::<SqlUuid, _>(record.id)
                .bind::<Text, _>(&record.content)
                .bind::<SqlUuid, _>(record.aggregate_id)
                .bind::<Text, _>(record.status.as_str())
                .bind::<Timestamptz, _>(record.created_at)
                .bind::<Text, _>(&record.event_type)
                .execute(&mut *self)
                .await? as u64;
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_targets_schema() {
        let ddl = outbox_ddl("company").unwrap();
        assert!(ddl.contains("CREATE SCHEMA IF NOT EXISTS \"company\""));
        assert!(ddl.contains("\"company\".outbox"));
        assert!(ddl.contains("status varchar(20) NOT NULL DEFAULT 'NEW'"));
        assert!(ddl.contains("type varchar(50) NOT NULL"));
        assert!(ddl.contains("(status, created_at)"));
    }

    #[test]
    fn test_ddl_rejects_bad_schema() {
        assert!(outbox_ddl("company\"; DROP").is_err());
    }

    #[test]
    fn test_row_conversion_rejects_unknown_status() {
        let row = OutboxRow {
            id: Uuid::new_v4(),
            content: "{}".into(),
            aggregate_id: Uuid::new_v4(),
            status: "SENT".into(),
            created_at: Utc::now(),
            event_type: "CompanyCreated".into(),
            claimed_at: None,
        };
        assert!(matches!(
            OutboxRecord::try_from(row),
            Err(OutboxError::InvalidRecord(_))
        ));
    }
}
