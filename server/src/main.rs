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

//! Entry point to the tweets service.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

use log::{error, info};
use std::process;
use tweets_server::{Server, ServerError, ServerOptions, ServerResult};

/// Waits until the process is asked to terminate.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received termination request"),
        Err(e) => {
            error!("Cannot listen for termination requests: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Configures the server from the environment and runs it until termination.
async fn run() -> ServerResult<()> {
    let opts = ServerOptions::from_env("TWEETS", "PGSQL_PROD").map_err(ServerError::Config)?;
    let addr = opts.socket_addr();
    let db = opts.database.connect().await?;
    let server = Server::build(addr, db).await?;
    server.listen(shutdown_signal()).await
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        error!("{}", e);
        process::exit(1);
    }
}
