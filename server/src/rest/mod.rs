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

//! Entry point to the REST server.

use crate::driver::Driver;
use crate::model::{MAX_MESSAGE_LENGTH, Tweet, TweetId};
use axum::Router;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tweets_core::driver::DriverError;
use tweets_core::rest::{NormalizedError, RestError, RestResult, fault_adapter, route_not_found};
use tweets_core::validation::{Check, Rule};

mod tweet_delete;
mod tweet_get;
mod tweet_put;
mod tweets_get;
mod tweets_post;
#[cfg(test)]
mod testutils;

/// Rules that every tweet submitted for creation or modification must satisfy.
pub(crate) const TWEET_RULES: [Rule; 2] = [
    Rule::new("message", Check::Truthy, "Tweet can't be empty."),
    Rule::new(
        "message",
        Check::MaxLength(MAX_MESSAGE_LENGTH),
        "Tweet can't be longer than 280 characters.",
    ),
];

/// Constructs the error returned when the tweet `id` does not exist.
pub(crate) fn tweet_not_found<I: Display>(id: I) -> NormalizedError {
    NormalizedError::new(
        "Tweet not found.",
        StatusCode::NOT_FOUND,
        vec![format!("Tweet with id of {} could not be found.", id)],
    )
}

/// Parses the `raw` identifier of a tweet as received in a request path.
///
/// Identifiers that are not integers cannot name any tweet, so they are reported as missing.
fn parse_tweet_id(raw: &str) -> RestResult<TweetId> {
    raw.parse::<TweetId>().map_err(|_| RestError::from(tweet_not_found(raw)))
}

/// Converts a driver error `e` raised while operating on the tweet that the client named `raw_id`
/// into a REST error.
fn tweet_error(raw_id: &str, e: DriverError) -> RestError {
    match e {
        DriverError::NotFound(_) => tweet_not_found(raw_id).into(),
        e => e.into(),
    }
}

/// Message payload accepted by the APIs that create or modify tweets.
#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct TweetRequest {
    /// Contents of the tweet.
    pub(crate) message: String,
}

/// Response carrying a single tweet.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub(crate) struct TweetResponse {
    /// The tweet affected by the request.
    pub(crate) tweet: Tweet,
}

/// Response carrying the collection of all tweets.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub(crate) struct TweetsResponse {
    /// All existing tweets, sorted by identifier.
    pub(crate) tweets: Vec<Tweet>,
}

/// Response confirming an operation that produces no data.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub(crate) struct MessageResponse {
    /// Human-readable summary of the operation.
    pub(crate) message: String,
}

/// Creates the router for the application.
pub(crate) fn app(driver: Driver) -> Router {
    use axum::middleware::from_fn;
    use axum::routing::get;

    let mut router = Router::new();
    for prefix in ["/tweets", "/api/tweets"] {
        router = router
            .route(prefix, get(tweets_get::handler).post(tweets_post::handler))
            .route(
                &format!("{}/:id", prefix),
                get(tweet_get::handler).put(tweet_put::handler).delete(tweet_delete::handler),
            );
    }
    router.fallback(route_not_found).layer(from_fn(fault_adapter)).with_state(driver)
}
