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

//! REST service to publish, edit and delete short messages.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

use axum::Router;
use log::info;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tweets_core::clocks::SystemClock;
#[cfg(feature = "postgres")]
use tweets_core::db::postgres::{PostgresDb, PostgresOptions};
#[cfg(any(feature = "sqlite", test))]
use tweets_core::db::sqlite;
use tweets_core::db::{Db, DbError};
use tweets_core::env::get_optional_var;

mod db;
mod driver;
use driver::Driver;
mod model;
mod rest;
use rest::app;

/// Default port to listen on when none is configured.
const DEFAULT_PORT: u16 = 3000;

/// Errors that prevent the server from starting or from continuing to run.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Indicates a problem in the configuration of the server.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Indicates a failure to talk to the database.
    #[error("{0}")]
    Db(#[from] DbError),

    /// Indicates a failure in the network listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for this module.
pub type ServerResult<T> = Result<T, ServerError>;

/// Database that backs the server.
#[derive(Debug)]
pub enum DatabaseOptions {
    /// Use the PostgreSQL database described by the options.
    #[cfg(feature = "postgres")]
    Postgres(PostgresOptions),

    /// Use the SQLite database stored in the given path, which may be `:memory:`.
    #[cfg(any(feature = "sqlite", test))]
    Sqlite(String),
}

impl DatabaseOptions {
    /// Opens the database described by these options.
    pub async fn connect(self) -> ServerResult<Arc<dyn Db + Send + Sync>> {
        match self {
            #[cfg(feature = "postgres")]
            DatabaseOptions::Postgres(opts) => Ok(Arc::new(PostgresDb::connect(opts)?)),

            #[cfg(any(feature = "sqlite", test))]
            DatabaseOptions::Sqlite(path) => Ok(Arc::new(sqlite::connect(&path).await?)),
        }
    }
}

/// Configuration of the server.
#[derive(Debug)]
pub struct ServerOptions {
    /// Address to bind the listening socket to.
    pub bind_address: IpAddr,

    /// Port to listen on.
    pub port: u16,

    /// Database to store tweets in.
    pub database: DatabaseOptions,
}

impl ServerOptions {
    /// Initializes the server options from environment variables whose name is prefixed with
    /// `prefix`, falling back to a PostgreSQL database configured by the variables prefixed with
    /// `pg_prefix`.
    ///
    /// This will use variables such as `<prefix>_BIND_ADDRESS`, `<prefix>_PORT` and
    /// `<prefix>_SQLITE_PATH`.  The latter selects SQLite as the database when present.
    pub fn from_env(prefix: &str, pg_prefix: &str) -> Result<Self, String> {
        let bind_address = get_optional_var::<IpAddr>(prefix, "BIND_ADDRESS")?
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let port = get_optional_var::<u16>(prefix, "PORT")?.unwrap_or(DEFAULT_PORT);

        let database = match get_optional_var::<String>(prefix, "SQLITE_PATH")? {
            #[cfg(any(feature = "sqlite", test))]
            Some(path) => DatabaseOptions::Sqlite(path),

            #[cfg(not(any(feature = "sqlite", test)))]
            Some(_) => {
                return Err(format!("{}_SQLITE_PATH is set but SQLite is not supported", prefix));
            }

            #[cfg(feature = "postgres")]
            None => DatabaseOptions::Postgres(PostgresOptions::from_env(pg_prefix)?),

            #[cfg(not(feature = "postgres"))]
            None => {
                let _ = pg_prefix;
                return Err(format!(
                    "Required environment variable {}_SQLITE_PATH not present",
                    prefix
                ));
            }
        };

        Ok(Self { bind_address, port, database })
    }

    /// Returns the socket address to listen on.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// A server ready to accept requests.
///
/// The server owns the database handle and the routing table, and releases the database once
/// `listen` returns.
pub struct Server {
    /// Database that backs the service.
    db: Arc<dyn Db + Send + Sync>,

    /// Socket on which the server accepts connections.
    listener: TcpListener,

    /// Router for all the APIs offered by the service.
    app: Router,
}

impl Server {
    /// Prepares `db` to hold tweets and binds the listening socket to `addr`.
    pub async fn build(addr: SocketAddr, db: Arc<dyn Db + Send + Sync>) -> ServerResult<Self> {
        let mut ex = db.ex().await?;
        db::init_schema(&mut ex).await?;
        drop(ex);

        let listener = TcpListener::bind(addr).await?;

        let driver = Driver::new(db.clone(), Arc::new(SystemClock::default()));
        let app = app(driver);
        Ok(Self { db, listener, app })
    }

    /// Returns the address the server is listening on.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves requests until `shutdown` completes, then waits for in-flight requests to finish
    /// and closes the database.
    pub async fn listen<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Listening on {}", self.local_addr()?);
        let result = axum::serve(self.listener, self.app).with_graceful_shutdown(shutdown).await;
        info!("Server stopped; closing database");
        self.db.close().await;
        result?;
        Ok(())
    }
}
