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

//! Typed access to configuration stored in environment variables.
//!
//! Variables are grouped under a common prefix and named `<prefix>_<suffix>`, so that several
//! components (the server, the production database, the test database) can be configured side by
//! side.  Values are parsed with `FromStr` into the type the caller asks for.

use std::env::{self, VarError};
use std::fmt::Display;
use std::str::FromStr;

/// Result type for configuration lookups.  Errors are ready to be shown to the user.
pub type EnvResult<T> = Result<T, String>;

/// Reads `<prefix>_<suffix>` and parses it as a `T`, returning `None` if the variable is unset.
pub fn get_optional_var<T>(prefix: &str, suffix: &str) -> EnvResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let name = format!("{}_{}", prefix, suffix);
    let raw = match env::var(&name) {
        Ok(raw) => raw,
        Err(VarError::NotPresent) => return Ok(None),
        Err(VarError::NotUnicode(_)) => {
            return Err(format!("Environment variable {} is not valid UTF-8", name));
        }
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| format!("Invalid value in environment variable {}: {}", name, e))
}

/// Reads `<prefix>_<suffix>` and parses it as a `T`, failing if the variable is unset.
pub fn get_required_var<T>(prefix: &str, suffix: &str) -> EnvResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    get_optional_var(prefix, suffix)?.ok_or_else(|| {
        format!("Required environment variable {}_{} not present", prefix, suffix)
    })
}
