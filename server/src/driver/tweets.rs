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

//! Operations on the collection of tweets.

use crate::db;
use crate::driver::Driver;
use crate::model::Tweet;
use tweets_core::driver::DriverResult;

impl Driver {
    /// Gets all existing tweets, sorted by their identifier.
    pub(crate) async fn get_tweets(self) -> DriverResult<Vec<Tweet>> {
        let tweets = db::get_tweets(&mut self.db.ex().await?).await?;
        Ok(tweets)
    }

    /// Publishes a new tweet with `message`.
    pub(crate) async fn create_tweet(self, message: String) -> DriverResult<Tweet> {
        let now = self.clock.now_utc();
        let tweet = db::put_tweet(&mut self.db.ex().await?, &message, now).await?;
        Ok(tweet)
    }
}
