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

//! Database access shared by every backend.
//!
//! Production deployments talk to PostgreSQL.  SQLite backs the tests and local runs.  Queries
//! are written per backend by matching on `Executor`, since placeholders and column types differ
//! between the two dialects.

use async_trait::async_trait;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Failures reported by the database layer.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DbError {
    /// Anything the backend reported that does not fit the other variants.
    #[error("Database error: {0}")]
    BackendError(String),

    /// A row exists but its contents cannot be turned into a model type.
    #[error("Data integrity error: {0}")]
    DataIntegrityError(String),

    /// The row a query targeted does not exist.
    #[error("Entity not found")]
    NotFound,

    /// The backend cannot take more work right now.
    #[error("Unavailable")]
    Unavailable,
}

/// Result type for this module.
pub type DbResult<T> = Result<T, DbError>;

/// Handle to run queries on, for whichever backend is compiled in.
///
/// Wraps either a pooled connection or an open transaction.
#[derive(Debug)]
pub enum Executor {
    /// Executor for the PostgreSQL backend.
    #[cfg(feature = "postgres")]
    Postgres(postgres::PostgresExecutor),

    /// Executor for the SQLite backend.
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteExecutor),
}

/// An `Executor` that holds an open transaction.  Dropping it without `commit` rolls back.
#[derive(Debug)]
pub struct TxExecutor(pub(crate) Executor);

impl TxExecutor {
    /// Borrows the executor to run queries inside the transaction.
    pub fn ex(&mut self) -> &mut Executor {
        &mut self.0
    }

    /// Makes the changes done in the transaction visible to others.
    pub async fn commit(self) -> DbResult<()> {
        match self.0 {
            #[cfg(feature = "postgres")]
            Executor::Postgres(ex) => ex.commit().await,

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(ex) => ex.commit().await,
        }
    }
}

/// A connection pool to some database.
#[async_trait]
pub trait Db {
    /// Checks out a connection on which every statement commits on its own.
    async fn ex(&self) -> DbResult<Executor>;

    /// Opens a transaction that the caller must `commit`.
    async fn begin(&self) -> DbResult<TxExecutor>;

    /// Shuts the pool down once all checked out connections are back.
    async fn close(&self);
}

/// Macros to run one set of database tests against every backend.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    pub use paste::paste;

    /// Defines a `#[tokio::test]` named `name` that calls `module::name` with the database
    /// returned by `setup`, optionally adding the `extra` attribute.
    #[macro_export]
    macro_rules! generate_one_test [
        ( $name:ident, $setup:expr, $module:path $(, #[$extra:meta] )? ) => {
            #[tokio::test]
            $(#[$extra])?
            async fn $name() {
                $crate::db::testutils::paste! {
                    $module :: [< $name >]($setup).await;
                }
            }
        }
    ];

    pub use generate_one_test;

    /// Calls `generate_one_test` for every `name`.
    #[macro_export]
    macro_rules! generate_tests [
        ( #[$extra:meta], $setup:expr, $module:path $(, $name:ident)+ ) => {
            $( $crate::db::testutils::generate_one_test!($name, $setup, $module, #[$extra]); )+
        };

        ( $setup:expr, $module:path $(, $name:ident)+ ) => {
            $( $crate::db::testutils::generate_one_test!($name, $setup, $module); )+
        };
    ];

    pub use generate_tests;
}

#[cfg(all(test, any(feature = "postgres", feature = "sqlite")))]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Runs `sql`, which must be valid in every dialect, and panics on failure.
    async fn run(ex: &mut Executor, sql: &str) {
        match ex {
            #[cfg(feature = "postgres")]
            Executor::Postgres(ex) => {
                sqlx::query(sql).execute(ex.conn()).await.unwrap();
            }

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(ex) => {
                sqlx::query(sql).execute(ex.conn()).await.unwrap();
            }
        }
    }

    /// Returns how many rows the `numbers` table holds.
    async fn count_numbers(ex: &mut Executor) -> i64 {
        let sql = "SELECT COUNT(*) FROM numbers";
        match ex {
            #[cfg(feature = "postgres")]
            Executor::Postgres(ex) => sqlx::query_scalar(sql).fetch_one(ex.conn()).await.unwrap(),

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(ex) => sqlx::query_scalar(sql).fetch_one(ex.conn()).await.unwrap(),
        }
    }

    pub(super) async fn test_autocommit(db: Arc<dyn Db + Send + Sync>) {
        run(&mut db.ex().await.unwrap(), "CREATE TABLE numbers (n INTEGER)").await;
        run(&mut db.ex().await.unwrap(), "INSERT INTO numbers (n) VALUES (1)").await;
        run(&mut db.ex().await.unwrap(), "INSERT INTO numbers (n) VALUES (2)").await;
        assert_eq!(2, count_numbers(&mut db.ex().await.unwrap()).await);
        db.close().await;
    }

    pub(super) async fn test_tx_commit(db: Arc<dyn Db + Send + Sync>) {
        run(&mut db.ex().await.unwrap(), "CREATE TABLE numbers (n INTEGER)").await;

        let mut tx = db.begin().await.unwrap();
        run(tx.ex(), "INSERT INTO numbers (n) VALUES (5)").await;
        assert_eq!(1, count_numbers(tx.ex()).await);
        tx.commit().await.unwrap();

        assert_eq!(1, count_numbers(&mut db.ex().await.unwrap()).await);
        db.close().await;
    }

    pub(super) async fn test_consecutive_txs(db: Arc<dyn Db + Send + Sync>) {
        for _ in 0..3 {
            db.begin().await.unwrap().commit().await.unwrap();
        }
        db.close().await;
    }

    /// Instantiates the backend-independent tests above for the database returned by `setup`.
    #[macro_export]
    macro_rules! generate_db_rw_tests [
        ( $setup:expr $(, #[$extra:meta])? ) => {
            $crate::db::testutils::generate_tests!(
                $( #[$extra], )?
                $setup,
                $crate::db::tests,
                test_autocommit,
                test_tx_commit,
                test_consecutive_txs
            );
        }
    ];

    pub(super) use generate_db_rw_tests;
}
