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

//! Test utilities for the REST API.

use crate::db;
use crate::driver::Driver;
use crate::model::{Tweet, TweetId};
use crate::rest::app;
use axum::Router;
use std::sync::Arc;
use time::OffsetDateTime;
use time::macros::datetime;
use tweets_core::clocks::Clock;
use tweets_core::clocks::testutils::ManualClock;
use tweets_core::db::{Db, DbError, sqlite};

pub(crate) struct TestContext {
    db: Arc<dyn Db + Send + Sync>,
    clock: Arc<ManualClock>,
    app: Router,
}

impl TestContext {
    pub(crate) async fn setup() -> Self {
        let db: Arc<dyn Db + Send + Sync> = Arc::new(sqlite::testutils::setup().await);
        db::init_schema(&mut db.ex().await.unwrap()).await.unwrap();
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-01 12:00:00 UTC)));
        let driver = Driver::new(db.clone(), clock.clone());
        let app = app(driver);
        Self { db, clock, app }
    }

    pub(crate) fn app(&self) -> Router {
        self.app.clone()
    }

    pub(crate) fn into_app(self) -> Router {
        self.app
    }

    pub(crate) fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub(crate) fn now(&self) -> OffsetDateTime {
        self.clock.now_utc()
    }

    pub(crate) async fn put_tweet<M: AsRef<str>>(&self, message: M) -> Tweet {
        db::put_tweet(&mut self.db.ex().await.unwrap(), message.as_ref(), self.now()).await.unwrap()
    }

    pub(crate) async fn get_tweet(&self, id: TweetId) -> Option<Tweet> {
        match db::get_tweet(&mut self.db.ex().await.unwrap(), id).await {
            Ok(tweet) => Some(tweet),
            Err(DbError::NotFound) => None,
            Err(e) => panic!("{:?}", e),
        }
    }

    pub(crate) async fn get_tweets(&self) -> Vec<Tweet> {
        db::get_tweets(&mut self.db.ex().await.unwrap()).await.unwrap()
    }
}
