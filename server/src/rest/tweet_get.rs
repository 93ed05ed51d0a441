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

//! API to get one tweet.

use crate::driver::Driver;
use crate::rest::{TweetResponse, parse_tweet_id, tweet_error};
use axum::Json;
use axum::extract::{Path, State};
use tweets_core::rest::{EmptyBody, RestResult};

/// API handler.
pub(crate) async fn handler(
    State(driver): State<Driver>,
    Path(raw_id): Path<String>,
    _: EmptyBody,
) -> RestResult<Json<TweetResponse>> {
    let id = parse_tweet_id(&raw_id)?;
    let tweet = driver.get_tweet(id).await.map_err(|e| tweet_error(&raw_id, e))?;
    Ok(Json(TweetResponse { tweet }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::testutils::*;
    use axum::http;
    use std::fmt::Display;
    use tweets_core::rest::testutils::*;

    fn route<I: Display>(id: I) -> (http::Method, String) {
        (http::Method::GET, format!("/tweets/{}", id))
    }

    #[tokio::test]
    async fn test_ok() {
        let context = TestContext::setup().await;

        context.put_tweet("first").await;
        let tweet = context.put_tweet("second").await;

        let response = OneShotBuilder::new(context.into_app(), route(tweet.id()))
            .send_empty()
            .await
            .expect_json::<TweetResponse>()
            .await;
        assert_eq!(TweetResponse { tweet }, response);
    }

    #[tokio::test]
    async fn test_not_found() {
        let context = TestContext::setup().await;

        context.put_tweet("exists").await;

        OneShotBuilder::new(context.into_app(), route(999999))
            .send_empty()
            .await
            .expect_status(http::StatusCode::NOT_FOUND)
            .expect_error("Tweet not found.", &["Tweet with id of 999999 could not be found."])
            .await;
    }

    #[tokio::test]
    async fn test_invalid_id() {
        let context = TestContext::setup().await;

        OneShotBuilder::new(context.into_app(), route("first"))
            .send_empty()
            .await
            .expect_status(http::StatusCode::NOT_FOUND)
            .expect_error("Tweet not found.", &["Tweet with id of first could not be found."])
            .await;
    }

    #[tokio::test]
    async fn test_not_found_echoes_requested_id() {
        let context = TestContext::setup().await;

        for raw_id in ["+999", "0999"] {
            let exp_error = format!("Tweet with id of {} could not be found.", raw_id);
            OneShotBuilder::new(context.app(), route(raw_id))
                .send_empty()
                .await
                .expect_status(http::StatusCode::NOT_FOUND)
                .expect_error("Tweet not found.", &[exp_error.as_str()])
                .await;
        }
    }

    test_payload_must_be_empty!(TestContext::setup().await.into_app(), route(1));
}
