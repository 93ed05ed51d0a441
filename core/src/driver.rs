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

//! Generic business logic types.
//!
//! The service implements its own `Driver` type, which owns the handle to the database and any
//! other injected collaborators (such as a `Clock`):
//!
//! ```rust
//! use std::sync::Arc;
//! use tweets_core::db::Db;
//!
//! #[derive(Clone)]
//! pub(crate) struct Driver {
//!     /// The database that the driver uses for persistence.
//!     db: Arc<dyn Db + Send + Sync>,
//! }
//! ```
//!
//! Driver operations take `self` by value.  One operation maps to one transaction, and a caller
//! that wants to chain two operations has to clone the driver explicitly.

use crate::db::DbError;

/// Failures of a business operation.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum DriverError {
    /// The store failed in a way the caller cannot fix.
    #[error("{0}")]
    BackendError(String),

    /// The entity the operation targets does not exist.
    #[error("{0}")]
    NotFound(String),
}

impl From<DbError> for DriverError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound => DriverError::NotFound(e.to_string()),
            DbError::BackendError(_) | DbError::DataIntegrityError(_) | DbError::Unavailable => {
                DriverError::BackendError(e.to_string())
            }
        }
    }
}

/// Result type for this module.
pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_db_error() {
        assert_eq!(
            DriverError::NotFound("Entity not found".to_owned()),
            DriverError::from(DbError::NotFound)
        );
        assert_eq!(
            DriverError::BackendError("Unavailable".to_owned()),
            DriverError::from(DbError::Unavailable)
        );
        assert_eq!(
            DriverError::BackendError("Data integrity error: bad row".to_owned()),
            DriverError::from(DbError::DataIntegrityError("bad row".to_owned()))
        );
    }
}
