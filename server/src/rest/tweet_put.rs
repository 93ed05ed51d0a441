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

//! API to modify the message of an existing tweet.

use crate::driver::Driver;
use crate::rest::{TWEET_RULES, TweetRequest, TweetResponse, parse_tweet_id, tweet_error};
use axum::Json;
use axum::extract::{Path, State};
use tweets_core::rest::{JsonPayload, RestResult};
use tweets_core::validation::validate;

/// API handler.
pub(crate) async fn handler(
    State(driver): State<Driver>,
    Path(raw_id): Path<String>,
    JsonPayload(payload): JsonPayload<serde_json::Value>,
) -> RestResult<Json<TweetResponse>> {
    validate(&TWEET_RULES, &payload)?;
    let request: TweetRequest = serde_json::from_value(payload)?;

    let id = parse_tweet_id(&raw_id)?;
    let tweet =
        driver.update_tweet(id, request.message).await.map_err(|e| tweet_error(&raw_id, e))?;
    Ok(Json(TweetResponse { tweet }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tweet;
    use crate::rest::testutils::*;
    use axum::http;
    use serde_json::json;
    use std::fmt::Display;
    use std::time::Duration;
    use tweets_core::rest::BAD_REQUEST_TITLE;
    use tweets_core::rest::testutils::*;

    fn route<I: Display>(id: I) -> (http::Method, String) {
        (http::Method::PUT, format!("/tweets/{}", id))
    }

    #[tokio::test]
    async fn test_ok() {
        let context = TestContext::setup().await;

        let before = context.put_tweet("before").await;
        let other = context.put_tweet("other").await;
        context.clock().advance(Duration::from_secs(3600));

        let response = OneShotBuilder::new(context.app(), route(before.id()))
            .send_json(json!({"message": "after"}))
            .await
            .expect_json::<TweetResponse>()
            .await;
        let exp_tweet =
            Tweet::new(*before.id(), "after".to_owned(), *before.created_at(), context.now());
        assert_eq!(TweetResponse { tweet: exp_tweet.clone() }, response);

        assert_eq!(vec![exp_tweet, other], context.get_tweets().await);
    }

    #[tokio::test]
    async fn test_same_message_twice() {
        let context = TestContext::setup().await;

        let before = context.put_tweet("original").await;
        OneShotBuilder::new(context.app(), route(before.id()))
            .send_json(json!({"message": "changed"}))
            .await
            .expect_json::<TweetResponse>()
            .await;

        context.clock().advance(Duration::from_secs(10));
        let first = OneShotBuilder::new(context.app(), route(before.id()))
            .send_json(json!({"message": "changed"}))
            .await
            .expect_json::<TweetResponse>()
            .await;
        let stored_first = context.get_tweets().await;

        context.clock().advance(Duration::from_secs(10));
        let second = OneShotBuilder::new(context.app(), route(before.id()))
            .send_json(json!({"message": "changed"}))
            .await
            .expect_json::<TweetResponse>()
            .await;
        let stored_second = context.get_tweets().await;

        assert_eq!(first, second);
        assert_eq!(stored_first, stored_second);
        assert_eq!(vec![first.tweet], stored_second);
    }

    #[tokio::test]
    async fn test_not_found() {
        let context = TestContext::setup().await;

        let tweet = context.put_tweet("untouched").await;

        OneShotBuilder::new(context.app(), route(12345))
            .send_json(json!({"message": "new"}))
            .await
            .expect_status(http::StatusCode::NOT_FOUND)
            .expect_error("Tweet not found.", &["Tweet with id of 12345 could not be found."])
            .await;

        assert_eq!(vec![tweet], context.get_tweets().await);
    }

    #[tokio::test]
    async fn test_invalid_id() {
        let context = TestContext::setup().await;

        OneShotBuilder::new(context.app(), route("latest"))
            .send_json(json!({"message": "new"}))
            .await
            .expect_status(http::StatusCode::NOT_FOUND)
            .expect_error("Tweet not found.", &["Tweet with id of latest could not be found."])
            .await;
    }

    #[tokio::test]
    async fn test_validation_before_lookup() {
        let context = TestContext::setup().await;

        OneShotBuilder::new(context.app(), route(12345))
            .send_json(json!({"message": ""}))
            .await
            .expect_status(http::StatusCode::BAD_REQUEST)
            .expect_error(BAD_REQUEST_TITLE, &["Tweet can't be empty."])
            .await;
    }

    #[tokio::test]
    async fn test_empty_message() {
        for payload in [json!({}), json!({"message": ""}), json!({"message": null})] {
            let context = TestContext::setup().await;

            let tweet = context.put_tweet("keep me").await;

            OneShotBuilder::new(context.app(), route(tweet.id()))
                .send_json(payload)
                .await
                .expect_status(http::StatusCode::BAD_REQUEST)
                .expect_error(BAD_REQUEST_TITLE, &["Tweet can't be empty."])
                .await;

            assert_eq!(Some(tweet.clone()), context.get_tweet(*tweet.id()).await);
        }
    }

    #[tokio::test]
    async fn test_too_long() {
        let context = TestContext::setup().await;

        let tweet = context.put_tweet("short").await;

        OneShotBuilder::new(context.app(), route(tweet.id()))
            .send_json(json!({"message": "y".repeat(300)}))
            .await
            .expect_status(http::StatusCode::BAD_REQUEST)
            .expect_error(BAD_REQUEST_TITLE, &["Tweet can't be longer than 280 characters."])
            .await;

        assert_eq!(Some(tweet.clone()), context.get_tweet(*tweet.id()).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates() {
        let context = TestContext::setup().await;

        let tweet = context.put_tweet("v0").await;

        let mut handles = Vec::new();
        for i in 1..=32 {
            let app = context.app();
            let route = route(tweet.id());
            handles.push(tokio::spawn(async move {
                OneShotBuilder::new(app, route)
                    .send_json(json!({"message": format!("v{}", i)}))
                    .await
                    .expect_json::<TweetResponse>()
                    .await
            }));
        }

        let mut messages = Vec::new();
        for handle in handles {
            let response = handle.await.unwrap();
            assert_eq!(tweet.id(), response.tweet.id());
            messages.push(response.tweet.message().to_owned());
        }

        let stored = context.get_tweet(*tweet.id()).await.unwrap();
        assert!(messages.contains(stored.message()));
    }

    test_payload_must_be_json!(TestContext::setup().await.into_app(), route(1));
}
