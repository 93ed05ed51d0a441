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

//! API to delete a tweet.

use crate::driver::Driver;
use crate::rest::{MessageResponse, parse_tweet_id, tweet_error};
use axum::Json;
use axum::extract::{Path, State};
use tweets_core::rest::{EmptyBody, RestResult};

/// API handler.
pub(crate) async fn handler(
    State(driver): State<Driver>,
    Path(raw_id): Path<String>,
    _: EmptyBody,
) -> RestResult<Json<MessageResponse>> {
    let id = parse_tweet_id(&raw_id)?;
    driver.delete_tweet(id).await.map_err(|e| tweet_error(&raw_id, e))?;
    Ok(Json(MessageResponse { message: format!("Deleted tweet with id of {}.", raw_id) }))
}
