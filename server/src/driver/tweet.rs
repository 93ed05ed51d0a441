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

//! Operations on one tweet.

use crate::db;
use crate::driver::Driver;
use crate::model::{Tweet, TweetId};
use tweets_core::driver::DriverResult;

impl Driver {
    /// Gets the tweet identified by `id`.
    pub(crate) async fn get_tweet(self, id: TweetId) -> DriverResult<Tweet> {
        let tweet = db::get_tweet(&mut self.db.ex().await?, id).await?;
        Ok(tweet)
    }

    /// Replaces the message of the existing tweet `id` with `message`.
    ///
    /// Storing the same message that the tweet already has leaves the tweet untouched, including
    /// its modification time.
    pub(crate) async fn update_tweet(self, id: TweetId, message: String) -> DriverResult<Tweet> {
        let mut tx = self.db.begin().await?;
        let tweet = db::get_tweet(tx.ex(), id).await?;
        let (tweet, changed) = tweet.with_message(message, self.clock.now_utc());
        if changed {
            db::update_tweet(tx.ex(), &tweet).await?;
        }
        tx.commit().await?;
        Ok(tweet)
    }

    /// Deletes the existing tweet `id`.
    pub(crate) async fn delete_tweet(self, id: TweetId) -> DriverResult<()> {
        let mut tx = self.db.begin().await?;
        db::get_tweet(tx.ex(), id).await?;
        db::delete_tweet(tx.ex(), id).await?;
        tx.commit().await?;
        Ok(())
    }
}
