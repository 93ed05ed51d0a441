// III-IV
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! SQLite backend, used by tests and by local runs that do not need a real server.

use crate::db::{Db, DbError, DbResult, Executor, TxExecutor};
use async_trait::async_trait;
use futures::TryStreamExt;
use log::{debug, warn};
use sqlx::Transaction;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use time::OffsetDateTime;

/// Nanoseconds in one second.
const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Translates a `sqlx` error into a `DbError`.
pub fn map_sqlx_error(e: sqlx::Error) -> DbError {
    match e {
        sqlx::Error::RowNotFound => DbError::NotFound,
        sqlx::Error::ColumnDecode { source, .. } => DbError::DataIntegrityError(source.to_string()),
        e => DbError::BackendError(e.to_string()),
    }
}

/// Opens the SQLite database at `path`, which is created when missing.
///
/// The special `:memory:` path yields a database that is private to the returned pool and that
/// disappears with it.
pub async fn connect(path: &str) -> DbResult<SqliteDb> {
    let options = SqliteConnectOptions::from_str(path)
        .map_err(map_sqlx_error)?
        .create_if_missing(true)
        .foreign_keys(true);

    debug!("Opening SQLite database {}", path);
    let pool = SqlitePoolOptions::new().connect_with(options).await.map_err(map_sqlx_error)?;
    Ok(SqliteDb { pool })
}

/// Executor for SQLite, either straight from the pool or inside a transaction.
#[derive(Debug)]
pub enum SqliteExecutor {
    /// A connection checked out of the pool.  Each statement commits on its own.
    PoolExec(PoolConnection<Sqlite>),

    /// An open transaction that is rolled back unless committed.
    TxExec(Transaction<'static, Sqlite>),
}

impl SqliteExecutor {
    /// Gives access to the connection that queries must run on.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        match self {
            SqliteExecutor::PoolExec(conn) => conn,
            SqliteExecutor::TxExec(tx) => tx,
        }
    }

    /// Commits the wrapped transaction.  Panics if there is none.
    pub(super) async fn commit(self) -> DbResult<()> {
        let SqliteExecutor::TxExec(tx) = self else {
            unreachable!("Direct executors have nothing to commit");
        };
        tx.commit().await.map_err(map_sqlx_error)
    }
}

/// Connection pool to an SQLite database.
pub struct SqliteDb {
    /// Pool shared by all requests.
    pool: SqlitePool,
}

impl Drop for SqliteDb {
    fn drop(&mut self) {
        if !self.pool.is_closed() {
            warn!("SQLite pool dropped without calling close()");
        }
    }
}

#[async_trait]
impl Db for SqliteDb {
    async fn ex(&self) -> DbResult<Executor> {
        let conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        Ok(Executor::Sqlite(SqliteExecutor::PoolExec(conn)))
    }

    /// Transactions take the write lock upfront.  Two deferred transactions that read and then
    /// write the same table would otherwise wait for each other and fail as deadlocked.
    async fn begin(&self) -> DbResult<TxExecutor> {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await.map_err(map_sqlx_error)?;
        Ok(TxExecutor(Executor::Sqlite(SqliteExecutor::TxExec(tx))))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Runs every statement in `schema`, which SQLite can process in one go.
pub async fn run_schema(e: &mut SqliteExecutor, schema: &str) -> DbResult<()> {
    sqlx::raw_sql(schema)
        .execute_many(e.conn())
        .try_for_each(|_| futures::future::ready(Ok(())))
        .await
        .map_err(map_sqlx_error)
}

/// Reassembles a timestamp stored as separate seconds and nanoseconds columns.
///
/// Both columns are signed because SQLite only has signed integers, but negative values never
/// get written by `unpack_timestamp` and are reported as corrupt data.
pub fn build_timestamp(sec: i64, nsec: i64) -> DbResult<OffsetDateTime> {
    if sec < 0 || nsec < 0 {
        return Err(DbError::DataIntegrityError(format!(
            "Negative timestamp component (sec={}, nsec={})",
            sec, nsec
        )));
    }

    let nanos = i128::from(sec) * NANOS_PER_SEC + i128::from(nsec);
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|e| DbError::DataIntegrityError(format!("Timestamp out of range: {}", e)))
}

/// Splits `ts` into the seconds and nanoseconds columns read back by `build_timestamp`.
///
/// Panics if `ts` predates the Unix epoch.
pub fn unpack_timestamp(ts: OffsetDateTime) -> (i64, i64) {
    let nanos = ts.unix_timestamp_nanos();
    assert!(nanos >= 0, "Timestamps before the epoch cannot be stored");
    let sec = nanos / NANOS_PER_SEC;
    let nsec = nanos % NANOS_PER_SEC;
    // Any non-negative `OffsetDateTime` has less than 2^63 seconds.
    (sec as i64, nsec as i64)
}

/// Test utilities for the SQLite backend.
#[cfg(any(feature = "testutils", test))]
pub mod testutils {
    use super::*;

    /// Opens a fresh in-memory database.  Panics on any error.
    pub async fn setup() -> SqliteDb {
        let _can_fail = env_logger::builder().is_test(true).try_init();
        connect(":memory:").await.unwrap()
    }
}
