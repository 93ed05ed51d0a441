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

//! High-level data types.

use derive_getters::Getters;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;
use tweets_core::model::{ModelError, ModelResult};

/// Maximum number of characters in the message of a tweet.
pub(crate) const MAX_MESSAGE_LENGTH: usize = 280;

/// Identifier of a tweet, assigned by the database when the tweet is created.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, From, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub(crate) struct TweetId(i64);

impl TweetId {
    /// Returns the identifier as an `i64` for storage purposes.
    pub(crate) fn as_i64(self) -> i64 {
        self.0
    }
}

impl FromStr for TweetId {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        match s.parse::<i64>() {
            Ok(id) => Ok(TweetId(id)),
            Err(e) => Err(ModelError(format!("Invalid tweet id '{}': {}", s, e))),
        }
    }
}

/// A tweet as stored in the database.
#[derive(Clone, Debug, Deserialize, Getters, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Tweet {
    /// Unique identifier of the tweet.
    id: TweetId,

    /// Contents of the tweet.
    message: String,

    /// Time at which the tweet was created.
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,

    /// Time at which the tweet was last modified.
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
}

impl Tweet {
    /// Creates a new tweet from its raw parts.
    pub(crate) fn new(
        id: TweetId,
        message: String,
        created_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> Self {
        Self { id, message, created_at, updated_at }
    }

    /// Replaces the message of the tweet with `message`, recording the change at `now`.
    ///
    /// Returns the tweet unmodified if `message` matches the current message, in which case there
    /// is nothing to store.
    pub(crate) fn with_message(self, message: String, now: OffsetDateTime) -> (Self, bool) {
        if self.message == message {
            (self, false)
        } else {
            (Self { message, updated_at: now, ..self }, true)
        }
    }
}
