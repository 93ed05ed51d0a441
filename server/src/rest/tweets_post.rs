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

//! API to publish a new tweet.

use crate::driver::Driver;
use crate::rest::{TWEET_RULES, TweetRequest, TweetResponse};
use axum::Json;
use axum::extract::State;
use tweets_core::rest::{JsonPayload, RestResult};
use tweets_core::validation::validate;

/// API handler.
pub(crate) async fn handler(
    State(driver): State<Driver>,
    JsonPayload(payload): JsonPayload<serde_json::Value>,
) -> RestResult<Json<TweetResponse>> {
    validate(&TWEET_RULES, &payload)?;
    let request: TweetRequest = serde_json::from_value(payload)?;

    let tweet = driver.create_tweet(request.message).await?;
    Ok(Json(TweetResponse { tweet }))
}
