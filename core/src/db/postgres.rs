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

//! PostgreSQL backend, used in production.

use crate::db::{Db, DbError, DbResult, Executor, TxExecutor};
use crate::env::{get_optional_var, get_required_var};
use async_trait::async_trait;
use derivative::Derivative;
use log::warn;
use sqlx::Transaction;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, Postgres};
use std::future::Future;
use std::time::Duration;

/// Number of times to retry acquiring a connection when the server is busy, unless configured.
const DEFAULT_MAX_RETRIES: u16 = 60;

/// Upper bound for the pause between two connection attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Translates a `sqlx` error into a `DbError`, treating a server out of connections as busy.
pub fn map_sqlx_error(e: sqlx::Error) -> DbError {
    match e {
        sqlx::Error::RowNotFound => DbError::NotFound,
        sqlx::Error::PoolTimedOut => DbError::Unavailable,
        sqlx::Error::ColumnDecode { source, .. } => DbError::DataIntegrityError(source.to_string()),
        sqlx::Error::Database(db_error) => {
            let code = db_error.code().map(|c| c.into_owned()).unwrap_or_default();
            match code.as_str() {
                "53300" => DbError::Unavailable,
                _ => DbError::BackendError(format!("PostgreSQL error {}: {}", code, db_error)),
            }
        }
        e => DbError::BackendError(e.to_string()),
    }
}

/// Connection settings for a PostgreSQL server.
#[derive(Derivative)]
#[derivative(Debug, Default)]
pub struct PostgresOptions {
    /// Name or address of the server.
    pub host: String,

    /// TCP port of the server.
    pub port: u16,

    /// Name of the database to use.
    pub database: String,

    /// Role to log in as.
    pub username: String,

    /// Password of `username`.
    #[derivative(Debug = "ignore")]
    pub password: String,

    /// Connections the pool keeps open even when idle.  Uses the `sqlx` default when unset.
    pub min_connections: Option<u32>,

    /// Connections the pool can open at most.  Uses the `sqlx` default when unset.
    pub max_connections: Option<u32>,

    /// How many times to retry acquiring a connection while the server reports that it is busy.
    pub max_retries: u16,
}

impl PostgresOptions {
    /// Reads the options from the `<prefix>_HOST`, `<prefix>_PORT`, `<prefix>_DATABASE`,
    /// `<prefix>_USERNAME` and `<prefix>_PASSWORD` variables, which are required, and from the
    /// optional `<prefix>_MIN_CONNECTIONS`, `<prefix>_MAX_CONNECTIONS` and `<prefix>_MAX_RETRIES`.
    pub fn from_env(prefix: &str) -> Result<Self, String> {
        let max_retries = get_optional_var(prefix, "MAX_RETRIES")?.unwrap_or(DEFAULT_MAX_RETRIES);
        Ok(Self {
            host: get_required_var(prefix, "HOST")?,
            port: get_required_var(prefix, "PORT")?,
            database: get_required_var(prefix, "DATABASE")?,
            username: get_required_var(prefix, "USERNAME")?,
            password: get_required_var(prefix, "PASSWORD")?,
            min_connections: get_optional_var(prefix, "MIN_CONNECTIONS")?,
            max_connections: get_optional_var(prefix, "MAX_CONNECTIONS")?,
            max_retries,
        })
    }
}

/// Executor for PostgreSQL, either straight from the pool or inside a transaction.
#[derive(Debug)]
pub enum PostgresExecutor {
    /// A connection checked out of the pool.  Each statement commits on its own.
    PoolExec(PoolConnection<Postgres>),

    /// An open transaction that is rolled back unless committed.
    TxExec(Transaction<'static, Postgres>),
}

impl PostgresExecutor {
    /// Gives access to the connection that queries must run on.
    pub fn conn(&mut self) -> &mut PgConnection {
        match self {
            PostgresExecutor::PoolExec(conn) => conn,
            PostgresExecutor::TxExec(tx) => tx,
        }
    }

    /// Commits the wrapped transaction.  Panics if there is none.
    pub(super) async fn commit(self) -> DbResult<()> {
        let PostgresExecutor::TxExec(tx) = self else {
            unreachable!("Direct executors have nothing to commit");
        };
        tx.commit().await.map_err(map_sqlx_error)
    }
}

/// Randomized, growing pauses between attempts to reach a busy server.
struct Backoff {
    /// Pause to apply before the next attempt.
    delay: Duration,

    /// Attempts that may still be made after the current one.
    remaining: u16,
}

impl Backoff {
    /// Creates a backoff that allows `retries` extra attempts.
    fn new(retries: u16) -> Self {
        Self { delay: Self::jitter(100), remaining: retries }
    }

    /// Returns a random duration of at least `base_ms` milliseconds.
    fn jitter(base_ms: u64) -> Duration {
        Duration::from_millis(base_ms + rand::random_range(0..1000))
    }

    /// Sleeps before the next attempt, or returns false if no attempts are left.
    async fn pause(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        warn!(
            "Database is busy; retrying in {}ms ({} attempts left)",
            self.delay.as_millis(),
            self.remaining
        );
        tokio::time::sleep(self.delay).await;
        if self.delay < MAX_RETRY_DELAY {
            self.delay += Self::jitter(0);
        }
        true
    }
}

/// Runs `op` until it succeeds, fails with something other than `Unavailable`, or runs out of
/// `retries`.
async fn with_retries<Op, Fut, T>(op: Op, retries: u16) -> DbResult<T>
where
    Op: Fn() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut backoff = Backoff::new(retries);
    loop {
        match op().await.map_err(map_sqlx_error) {
            Err(DbError::Unavailable) if backoff.pause().await => continue,
            result => return result,
        }
    }
}

/// Connection pool to a PostgreSQL database.
pub struct PostgresDb {
    /// Pool shared by all requests.
    pool: PgPool,

    /// Value of `PostgresOptions::max_retries`.
    max_retries: u16,
}

impl Drop for PostgresDb {
    fn drop(&mut self) {
        if !self.pool.is_closed() {
            warn!("PostgreSQL pool dropped without calling close()");
        }
    }
}

impl PostgresDb {
    /// Prepares a pool configured by `opts`.  Connections are opened on first use.
    pub fn connect(opts: PostgresOptions) -> DbResult<Self> {
        let connect_options = PgConnectOptions::new()
            .host(&opts.host)
            .port(opts.port)
            .database(&opts.database)
            .username(&opts.username)
            .password(&opts.password);

        let mut pool_options = PgPoolOptions::new().acquire_timeout(Duration::from_secs(2));
        if let Some(n) = opts.min_connections {
            pool_options = pool_options.min_connections(n);
        }
        if let Some(n) = opts.max_connections {
            pool_options = pool_options.max_connections(n);
        }

        let pool = pool_options.connect_lazy_with(connect_options);
        Ok(Self { pool, max_retries: opts.max_retries })
    }

    /// Checks a connection out of the pool without wrapping it in the generic `Executor`.
    pub async fn typed_ex(&self) -> DbResult<PostgresExecutor> {
        let conn = with_retries(|| self.pool.acquire(), self.max_retries).await?;
        Ok(PostgresExecutor::PoolExec(conn))
    }
}

#[async_trait]
impl Db for PostgresDb {
    async fn ex(&self) -> DbResult<Executor> {
        Ok(Executor::Postgres(self.typed_ex().await?))
    }

    async fn begin(&self) -> DbResult<TxExecutor> {
        let tx = with_retries(|| self.pool.begin(), self.max_retries).await?;
        Ok(TxExecutor(Executor::Postgres(PostgresExecutor::TxExec(tx))))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Runs every statement in `schema`, which may contain `--` comments.
///
/// PostgreSQL does not accept several statements in one prepared query, so the schema is split
/// at semicolons once comments are gone.
pub async fn run_schema(e: &mut PostgresExecutor, schema: &str) -> DbResult<()> {
    let comment = regex::Regex::new(r"(?m)--.*$").map_err(|e| DbError::BackendError(e.to_string()))?;
    let schema = comment.replace_all(schema, "");

    for statement in schema.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(e.conn()).await.map_err(map_sqlx_error)?;
    }
    Ok(())
}

/// Test utilities for the PostgreSQL backend.
#[cfg(any(feature = "testutils", test))]
pub mod testutils {
    use super::*;

    /// Connects to the database described by the `PGSQL_TEST_*` variables.
    ///
    /// The pool holds exactly one connection whose `search_path` points at `pg_temp`, so every
    /// table a test creates vanishes when the pool closes.  Panics on any error.
    pub async fn setup() -> PostgresDb {
        let _can_fail = env_logger::builder().is_test(true).try_init();

        let mut opts = PostgresOptions::from_env("PGSQL_TEST").unwrap();
        opts.min_connections = Some(1);
        opts.max_connections = Some(1);
        let db = PostgresDb::connect(opts).unwrap();

        let mut ex = db.typed_ex().await.unwrap();
        sqlx::query("SET search_path TO pg_temp").execute(ex.conn()).await.unwrap();
        db
    }
}

#[cfg(test)]
mod tests {
    use super::testutils::*;
    use super::*;
    use crate::db::tests::generate_db_rw_tests;
    use std::sync::Arc;

    generate_db_rw_tests!(
        {
            let db: Arc<dyn Db + Send + Sync> = Arc::new(setup().await);
            db
        },
        #[ignore = "Requires environment configuration and is expensive"]
    );

    /// Variables that make up a complete configuration under the `PGCFG` prefix.
    const REQUIRED: [(&str, Option<&str>); 5] = [
        ("PGCFG_HOST", Some("db.internal")),
        ("PGCFG_PORT", Some("6543")),
        ("PGCFG_DATABASE", Some("tweets")),
        ("PGCFG_USERNAME", Some("service")),
        ("PGCFG_PASSWORD", Some("hunter2")),
    ];

    #[test]
    fn test_options_from_env_defaults() {
        let unset = [
            ("PGCFG_MIN_CONNECTIONS", None),
            ("PGCFG_MAX_CONNECTIONS", None),
            ("PGCFG_MAX_RETRIES", None),
        ];
        temp_env::with_vars([&REQUIRED[..], &unset[..]].concat(), || {
            let opts = PostgresOptions::from_env("PGCFG").unwrap();
            assert_eq!("db.internal", opts.host);
            assert_eq!(6543, opts.port);
            assert_eq!("tweets", opts.database);
            assert_eq!("service", opts.username);
            assert_eq!("hunter2", opts.password);
            assert_eq!(None, opts.min_connections);
            assert_eq!(None, opts.max_connections);
            assert_eq!(DEFAULT_MAX_RETRIES, opts.max_retries);
        });
    }

    #[test]
    fn test_options_from_env_pool_settings() {
        let pool = [
            ("PGCFG_MIN_CONNECTIONS", Some("2")),
            ("PGCFG_MAX_CONNECTIONS", Some("8")),
            ("PGCFG_MAX_RETRIES", Some("0")),
        ];
        temp_env::with_vars([&REQUIRED[..], &pool[..]].concat(), || {
            let opts = PostgresOptions::from_env("PGCFG").unwrap();
            assert_eq!(Some(2), opts.min_connections);
            assert_eq!(Some(8), opts.max_connections);
            assert_eq!(0, opts.max_retries);
        });
    }

    #[test]
    fn test_options_from_env_missing_password() {
        let vars = [&REQUIRED[..4], &[("PGCFG_PASSWORD", None)][..]].concat();
        temp_env::with_vars(vars, || {
            assert_eq!(
                "Required environment variable PGCFG_PASSWORD not present",
                PostgresOptions::from_env("PGCFG").unwrap_err()
            );
        });
    }

    #[test]
    fn test_options_from_env_bad_port() {
        let vars = [&REQUIRED[..], &[("PGCFG_PORT", Some("fivefourthreetwo"))][..]].concat();
        temp_env::with_vars(vars, || {
            let err = PostgresOptions::from_env("PGCFG").unwrap_err();
            assert!(err.contains("PGCFG_PORT"), "Unexpected error: {}", err);
        });
    }

    #[test]
    fn test_options_debug_hides_password() {
        let opts = PostgresOptions { password: "hunter2".to_owned(), ..Default::default() };
        assert!(!format!("{:?}", opts).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_with_retries_gives_up_on_other_errors() {
        let attempts = std::sync::atomic::AtomicU16::new(0);
        let result: DbResult<()> = with_retries(
            || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(sqlx::Error::RowNotFound) }
            },
            5,
        )
        .await;
        assert_eq!(Err(DbError::NotFound), result);
        assert_eq!(1, attempts.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_with_retries_stops_after_limit() {
        let attempts = std::sync::atomic::AtomicU16::new(0);
        let result: DbResult<()> = with_retries(
            || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(sqlx::Error::PoolTimedOut) }
            },
            0,
        )
        .await;
        assert_eq!(Err(DbError::Unavailable), result);
        assert_eq!(1, attempts.load(std::sync::atomic::Ordering::SeqCst));
    }
}
