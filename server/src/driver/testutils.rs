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

//! Test utilities for the business layer.

use crate::db::init_schema;
use crate::driver::Driver;
use crate::model::Tweet;
use std::sync::Arc;
use time::OffsetDateTime;
use time::macros::datetime;
use tweets_core::clocks::Clock;
use tweets_core::clocks::testutils::ManualClock;
use tweets_core::db::{Db, Executor, sqlite};

/// State of a running test of the business layer.
pub(crate) struct TestContext {
    db: Arc<dyn Db + Send + Sync>,
    clock: Arc<ManualClock>,
    driver: Driver,
}

impl TestContext {
    /// Initializes an in-memory database with the schema and a driver on top of it.
    pub(crate) async fn setup() -> Self {
        let db: Arc<dyn Db + Send + Sync> = Arc::new(sqlite::testutils::setup().await);
        init_schema(&mut db.ex().await.unwrap()).await.unwrap();
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-01 12:00:00 UTC)));
        let driver = Driver::new(db.clone(), clock.clone());
        Self { db, clock, driver }
    }

    pub(crate) fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub(crate) fn driver(&self) -> Driver {
        self.driver.clone()
    }

    /// Gets a direct executor against the database.
    pub(crate) async fn ex(&self) -> Executor {
        self.db.ex().await.unwrap()
    }

    /// Inserts a tweet with `message` timestamped at the current fake time.
    pub(crate) async fn put_tweet(&self, message: &str) -> Tweet {
        crate::db::put_tweet(&mut self.ex().await, message, self.now()).await.unwrap()
    }

    /// Returns the current fake time.
    pub(crate) fn now(&self) -> OffsetDateTime {
        self.clock.now_utc()
    }
}
