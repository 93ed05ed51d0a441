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

//! Database abstraction in terms of the operations needed by the server.

use crate::model::{Tweet, TweetId};
use futures::TryStreamExt;
#[cfg(feature = "postgres")]
use sqlx::postgres::PgRow;
#[cfg(any(feature = "sqlite", test))]
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use time::OffsetDateTime;
#[cfg(feature = "postgres")]
use tweets_core::db::postgres;
#[cfg(any(feature = "sqlite", test))]
use tweets_core::db::sqlite::{self, build_timestamp, unpack_timestamp};
use tweets_core::db::{DbError, DbResult, Executor};


/// Initializes the database schema.
pub async fn init_schema(ex: &mut Executor) -> DbResult<()> {
    match ex {
        #[cfg(feature = "postgres")]
        Executor::Postgres(ex) => postgres::run_schema(ex, include_str!("postgres.sql")).await,

        #[cfg(any(feature = "sqlite", test))]
        Executor::Sqlite(ex) => sqlite::run_schema(ex, include_str!("sqlite.sql")).await,

        #[allow(unused)]
        _ => unreachable!(),
    }
}

#[cfg(feature = "postgres")]
impl TryFrom<PgRow> for Tweet {
    type Error = DbError;

    fn try_from(row: PgRow) -> DbResult<Self> {
        let id: i64 = row.try_get("id").map_err(postgres::map_sqlx_error)?;
        let message: String = row.try_get("message").map_err(postgres::map_sqlx_error)?;
        let created_at: OffsetDateTime =
            row.try_get("created_at").map_err(postgres::map_sqlx_error)?;
        let updated_at: OffsetDateTime =
            row.try_get("updated_at").map_err(postgres::map_sqlx_error)?;

        Ok(Tweet::new(TweetId::from(id), message, created_at, updated_at))
    }
}

#[cfg(any(feature = "sqlite", test))]
impl TryFrom<SqliteRow> for Tweet {
    type Error = DbError;

    fn try_from(row: SqliteRow) -> DbResult<Self> {
        let id: i64 = row.try_get("id").map_err(sqlite::map_sqlx_error)?;
        let message: String = row.try_get("message").map_err(sqlite::map_sqlx_error)?;
        let created_at_sec: i64 = row.try_get("created_at_sec").map_err(sqlite::map_sqlx_error)?;
        let created_at_nsec: i64 =
            row.try_get("created_at_nsec").map_err(sqlite::map_sqlx_error)?;
        let updated_at_sec: i64 = row.try_get("updated_at_sec").map_err(sqlite::map_sqlx_error)?;
        let updated_at_nsec: i64 =
            row.try_get("updated_at_nsec").map_err(sqlite::map_sqlx_error)?;

        let created_at = build_timestamp(created_at_sec, created_at_nsec)?;
        let updated_at = build_timestamp(updated_at_sec, updated_at_nsec)?;

        Ok(Tweet::new(TweetId::from(id), message, created_at, updated_at))
    }
}

/// Validates that a statement that targets tweet `id` touched exactly one row.
fn ensure_one_row(id: TweetId, affected: u64) -> DbResult<()> {
    match affected {
        0 => Err(DbError::NotFound),
        1 => Ok(()),
        _ => Err(DbError::BackendError(format!("Change to tweet {} affected {} rows", id, affected))),
    }
}

/// Gets all existing tweets, sorted by their identifier.
pub(crate) async fn get_tweets(ex: &mut Executor) -> DbResult<Vec<Tweet>> {
    let mut tweets = vec![];
    match ex {
        #[cfg(feature = "postgres")]
        Executor::Postgres(ex) => {
            let query_str = "SELECT * FROM tweets ORDER BY id";
            let mut rows = sqlx::query(query_str).fetch(ex.conn());
            while let Some(row) = rows.try_next().await.map_err(postgres::map_sqlx_error)? {
                tweets.push(Tweet::try_from(row)?);
            }
        }

        #[cfg(any(feature = "sqlite", test))]
        Executor::Sqlite(ex) => {
            let query_str = "SELECT * FROM tweets ORDER BY id";
            let mut rows = sqlx::query(query_str).fetch(ex.conn());
            while let Some(row) = rows.try_next().await.map_err(sqlite::map_sqlx_error)? {
                tweets.push(Tweet::try_from(row)?);
            }
        }

        #[allow(unused)]
        _ => unreachable!(),
    }
    Ok(tweets)
}

/// Gets the tweet identified by `id`.
pub(crate) async fn get_tweet(ex: &mut Executor, id: TweetId) -> DbResult<Tweet> {
    match ex {
        #[cfg(feature = "postgres")]
        Executor::Postgres(ex) => {
            let query_str = "SELECT * FROM tweets WHERE id = $1";
            let row = sqlx::query(query_str)
                .bind(id.as_i64())
                .fetch_one(ex.conn())
                .await
                .map_err(postgres::map_sqlx_error)?;
            Tweet::try_from(row)
        }

        #[cfg(any(feature = "sqlite", test))]
        Executor::Sqlite(ex) => {
            let query_str = "SELECT * FROM tweets WHERE id = ?";
            let row = sqlx::query(query_str)
                .bind(id.as_i64())
                .fetch_one(ex.conn())
                .await
                .map_err(sqlite::map_sqlx_error)?;
            Tweet::try_from(row)
        }

        #[allow(unused)]
        _ => unreachable!(),
    }
}

/// Stores a new tweet with `message`, created at `now`, and returns it with the identifier
/// assigned by the database.
pub(crate) async fn put_tweet(
    ex: &mut Executor,
    message: &str,
    now: OffsetDateTime,
) -> DbResult<Tweet> {
    let id: i64 = match ex {
        #[cfg(feature = "postgres")]
        Executor::Postgres(ex) => {
            let query_str = "
                INSERT INTO tweets (message, created_at, updated_at)
                VALUES ($1, $2, $2)
                RETURNING id
            ";
            let row = sqlx::query(query_str)
                .bind(message)
                .bind(now)
                .fetch_one(ex.conn())
                .await
                .map_err(postgres::map_sqlx_error)?;
            row.try_get("id").map_err(postgres::map_sqlx_error)?
        }

        #[cfg(any(feature = "sqlite", test))]
        Executor::Sqlite(ex) => {
            let (now_sec, now_nsec) = unpack_timestamp(now);

            let query_str = "
                INSERT INTO tweets
                    (message, created_at_sec, created_at_nsec, updated_at_sec, updated_at_nsec)
                VALUES (?, ?, ?, ?, ?)
            ";
            let done = sqlx::query(query_str)
                .bind(message)
                .bind(now_sec)
                .bind(now_nsec)
                .bind(now_sec)
                .bind(now_nsec)
                .execute(ex.conn())
                .await
                .map_err(sqlite::map_sqlx_error)?;
            if done.rows_affected() != 1 {
                return Err(DbError::BackendError(format!(
                    "Insert created {} rows",
                    done.rows_affected()
                )));
            }
            done.last_insert_rowid()
        }

        #[allow(unused)]
        _ => unreachable!(),
    };
    Ok(Tweet::new(TweetId::from(id), message.to_owned(), now, now))
}

/// Stores the message and modification time of an existing `tweet`.
pub(crate) async fn update_tweet(ex: &mut Executor, tweet: &Tweet) -> DbResult<()> {
    let affected = match ex {
        #[cfg(feature = "postgres")]
        Executor::Postgres(ex) => {
            let query_str = "UPDATE tweets SET message = $1, updated_at = $2 WHERE id = $3";
            sqlx::query(query_str)
                .bind(tweet.message())
                .bind(*tweet.updated_at())
                .bind(tweet.id().as_i64())
                .execute(ex.conn())
                .await
                .map_err(postgres::map_sqlx_error)?
                .rows_affected()
        }

        #[cfg(any(feature = "sqlite", test))]
        Executor::Sqlite(ex) => {
            let (updated_sec, updated_nsec) = unpack_timestamp(*tweet.updated_at());

            let query_str = "
                UPDATE tweets
                SET message = ?, updated_at_sec = ?, updated_at_nsec = ?
                WHERE id = ?
            ";
            sqlx::query(query_str)
                .bind(tweet.message())
                .bind(updated_sec)
                .bind(updated_nsec)
                .bind(tweet.id().as_i64())
                .execute(ex.conn())
                .await
                .map_err(sqlite::map_sqlx_error)?
                .rows_affected()
        }

        #[allow(unused)]
        _ => unreachable!(),
    };
    ensure_one_row(*tweet.id(), affected)
}

/// Deletes the tweet identified by `id`.
pub(crate) async fn delete_tweet(ex: &mut Executor, id: TweetId) -> DbResult<()> {
    let affected = match ex {
        #[cfg(feature = "postgres")]
        Executor::Postgres(ex) => {
            let query_str = "DELETE FROM tweets WHERE id = $1";
            sqlx::query(query_str)
                .bind(id.as_i64())
                .execute(ex.conn())
                .await
                .map_err(postgres::map_sqlx_error)?
                .rows_affected()
        }

        #[cfg(any(feature = "sqlite", test))]
        Executor::Sqlite(ex) => {
            let query_str = "DELETE FROM tweets WHERE id = ?";
            sqlx::query(query_str)
                .bind(id.as_i64())
                .execute(ex.conn())
                .await
                .map_err(sqlite::map_sqlx_error)?
                .rows_affected()
        }

        #[allow(unused)]
        _ => unreachable!(),
    };
    ensure_one_row(id, affected)
}
