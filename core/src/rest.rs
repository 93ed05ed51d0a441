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

//! Plumbing shared by the REST handlers of every service.
//!
//! Services expose their `Router` through an `app` function in their own `rest` module and keep
//! each API in a separate `<entity>_<method>.rs` file.  The tests of an API module obtain the
//! method and path they exercise from a local `route` function so that they cannot accidentally
//! hit a different API.
//!
//! Handlers never write error responses themselves: they return a `RestError`, which is the only
//! channel through which failures reach the client.  Its `IntoResponse` implementation renders
//! every failure with the same envelope, carrying the title, the HTTP status and the list of
//! individual error messages of a `NormalizedError`.

use crate::driver::DriverError;
use async_trait::async_trait;
use axum::Json;
use axum::body::HttpBody;
use axum::extract::{FromRequest, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use http::StatusCode;
use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Title of all errors caused by invalid requests.
pub const BAD_REQUEST_TITLE: &str = "Bad request.";

/// Title of errors caused by faults we did not anticipate.
pub const SERVER_ERROR_TITLE: &str = "Server error.";

/// Detail shown to clients for faults we did not anticipate.  The real cause only goes to the log.
pub const SERVER_ERROR_DETAIL: &str = "Unexpected failure while handling the request";

/// A classified error, ready to be shown to the client.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedError {
    /// Short summary of the problem.
    title: String,

    /// HTTP status code to respond with.
    status: StatusCode,

    /// Individual problems that caused the failure, in the order in which they were detected.
    errors: Vec<String>,
}

impl NormalizedError {
    /// Creates a new error with a `title`, an HTTP `status` code and a list of `errors`.
    pub fn new<T: Into<String>>(title: T, status: StatusCode, errors: Vec<String>) -> Self {
        Self { title: title.into(), status, errors }
    }

    /// Creates a new error that reports invalid input details in `errors`.
    pub fn bad_request(errors: Vec<String>) -> Self {
        Self::new(BAD_REQUEST_TITLE, StatusCode::BAD_REQUEST, errors)
    }

    /// Returns the short summary of the problem.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the HTTP status code for this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the individual problems that caused this error.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// Failures of a request, all of which end up in front of the client.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum RestError {
    /// A fault nobody classified, reported as a server error.
    #[error("{0}")]
    InternalError(String),

    /// A fault that has already been classified and shaped for the client.
    #[error("{}", .0.title())]
    Normalized(NormalizedError),

    /// A request that must not have a body came with one.
    #[error("Content should be empty")]
    PayloadNotEmpty,
}

impl From<NormalizedError> for RestError {
    fn from(e: NormalizedError) -> Self {
        RestError::Normalized(e)
    }
}

impl From<DriverError> for RestError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::BackendError(_) => RestError::InternalError(e.to_string()),
            DriverError::NotFound(_) => {
                NormalizedError::new("Not found.", StatusCode::NOT_FOUND, vec![e.to_string()])
                    .into()
            }
        }
    }
}

impl From<serde_json::Error> for RestError {
    fn from(e: serde_json::Error) -> Self {
        NormalizedError::bad_request(vec![e.to_string()]).into()
    }
}

impl RestError {
    /// Converts this error into the envelope that is sent to the client.
    ///
    /// Unexpected faults are not classified by handlers, so they are shaped here and lose their
    /// details.
    fn normalize(self) -> NormalizedError {
        match self {
            RestError::InternalError(_) => NormalizedError::new(
                SERVER_ERROR_TITLE,
                StatusCode::INTERNAL_SERVER_ERROR,
                vec![SERVER_ERROR_DETAIL.to_owned()],
            ),
            RestError::Normalized(e) => e,
            RestError::PayloadNotEmpty => NormalizedError::new(
                "Payload too large.",
                StatusCode::PAYLOAD_TOO_LARGE,
                vec!["Content should be empty".to_owned()],
            ),
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        if let RestError::InternalError(cause) = &self {
            error!("Request failed: {}", cause);
        }

        let e = self.normalize();
        if !e.status.is_server_error() {
            warn!("Request rejected with status {}: {}: {:?}", e.status, e.title, e.errors);
        }

        let response = ErrorResponse {
            message: e.title.clone(),
            title: e.title,
            status: e.status.as_u16(),
            errors: e.errors,
        };

        (e.status, Json(response)).into_response()
    }
}

/// Result type for this module.
pub type RestResult<T> = Result<T, RestError>;

/// JSON body of every error response.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct ErrorResponse {
    /// Short summary of the problem.
    pub title: String,

    /// Numeric HTTP status code of the response.
    pub status: u16,

    /// Copy of `title`.
    pub message: String,

    /// Individual problems that caused the failure.
    pub errors: Vec<String>,
}

/// A request body extractor that forbids any content.
///
/// APIs without input take this so that clients cannot send data that would be silently dropped.
pub struct EmptyBody {}

#[async_trait]
impl<S> FromRequest<S> for EmptyBody
where
    S: Send + Sync,
{
    type Rejection = RestError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        if req.into_body().is_end_stream() {
            Ok(EmptyBody {})
        } else {
            Err(RestError::PayloadNotEmpty)
        }
    }
}

/// A request body extractor for JSON documents.
///
/// This behaves like `axum::Json` but funnels any rejection (missing content type, syntax errors,
/// type mismatches) through `RestError` so that clients get the uniform error envelope.
pub struct JsonPayload<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonPayload<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = RestError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonPayload(value)),
            Err(rejection) => Err(NormalizedError::bad_request(vec![rejection.body_text()]).into()),
        }
    }
}

/// Extracts a printable message from the payload of a panic.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Runs the request-handling future `fut` and captures any fault it raises.
///
/// Errors returned by `fut` are converted into a `RestError`, and a panic raised while `fut` is
/// being polled becomes a `RestError::InternalError`.  Either way, the caller always gets a value
/// that it can turn into a response.
pub async fn run_guarded<F, T, E>(fut: F) -> RestResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<RestError>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.into()),
        Err(payload) => Err(RestError::InternalError(format!(
            "Request handler panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Middleware that guards every request handled by the router it is attached to.
///
/// Install with `axum::middleware::from_fn(fault_adapter)`.
pub async fn fault_adapter(req: Request, next: Next) -> Response {
    match run_guarded(async move { Ok::<_, RestError>(next.run(req).await) }).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Handler for requests that do not match any known route.
pub async fn route_not_found() -> RestError {
    NormalizedError::new(
        "Resource not found.",
        StatusCode::NOT_FOUND,
        vec!["The requested resource couldn't be found.".to_owned()],
    )
    .into()
}

/// Helpers to drive a `Router` from tests.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    use super::*;
    use axum::Router;
    use axum::http::{self, HeaderName, HeaderValue};
    use tower::util::ServiceExt;

    /// Largest response body that tests read.
    const MAX_BODY_SIZE: usize = 64 * 1024;

    /// Fluent builder that sends one request straight into a `Router`.
    #[must_use]
    pub struct OneShotBuilder {
        /// Router that receives the request.
        app: Router,

        /// Request under construction.
        builder: axum::http::request::Builder,
    }

    impl OneShotBuilder {
        /// Starts a request for `method` and `uri` that `app` will serve.
        pub fn new<U: AsRef<str>>(app: Router, (method, uri): (http::Method, U)) -> Self {
            let builder = Request::builder().method(method).uri(uri.as_ref());
            Self { app, builder }
        }

        /// Adds the `name: value` header to the request.
        pub fn with_header<K, V>(mut self, name: K, value: V) -> Self
        where
            HeaderName: TryFrom<K>,
            <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
            HeaderValue: TryFrom<V>,
            <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
        {
            self.builder = self.builder.header(name, value);
            self
        }

        /// Sends the request without a body.
        pub async fn send_empty(self) -> ResponseChecker {
            let request = self.builder.body(axum::body::Body::empty()).unwrap();
            ResponseChecker::from(self.app.oneshot(request).await.unwrap())
        }

        /// Sends the request with `text` as a `text/plain` body.
        pub async fn send_text<T: Into<String>>(self, text: T) -> ResponseChecker {
            let request = self
                .builder
                .header(http::header::CONTENT_TYPE, mime::TEXT_PLAIN.as_ref())
                .body(axum::body::Body::from(text.into()))
                .unwrap();
            ResponseChecker::from(self.app.oneshot(request).await.unwrap())
        }

        /// Sends the request with `request` serialized as its JSON body.
        pub async fn send_json<T: Serialize>(self, request: T) -> ResponseChecker {
            let request = self
                .builder
                .header(http::header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
                .body(axum::body::Body::from(serde_json::to_vec(&request).unwrap()))
                .unwrap();
            ResponseChecker::from(self.app.oneshot(request).await.unwrap())
        }
    }

    /// Assertions over the response to a `OneShotBuilder` request.
    #[must_use]
    pub struct ResponseChecker {
        /// Response returned by the router.
        response: Response,

        /// Status that `response` must have.
        exp_status: http::StatusCode,
    }

    impl From<Response> for ResponseChecker {
        fn from(response: Response) -> Self {
            Self { response, exp_status: http::StatusCode::OK }
        }
    }

    impl ResponseChecker {
        /// Expects the response to carry `status` instead of 200.
        pub fn expect_status(mut self, status: http::StatusCode) -> Self {
            self.exp_status = status;
            self
        }

        /// Checks the response status.
        pub fn verify(&self) {
            assert_eq!(self.exp_status, self.response.status());
        }

        /// Finishes checking the response and returns its body as an `ErrorResponse`.
        ///
        /// Also checks that the envelope is consistent with the HTTP status of the response.
        pub async fn take_error(self) -> ErrorResponse {
            self.verify();

            let body =
                axum::body::to_bytes(self.response.into_body(), MAX_BODY_SIZE).await.unwrap();
            let response: ErrorResponse = match serde_json::from_slice(&body) {
                Ok(response) => response,
                Err(e) => {
                    let body = String::from_utf8(body.to_vec()).unwrap();
                    panic!("Body is not an error envelope ({}): {}", e, body);
                }
            };
            assert_eq!(self.exp_status.as_u16(), response.status);
            assert_eq!(response.title, response.message);
            assert!(!response.errors.is_empty(), "Error responses must carry details");
            response
        }

        /// Finishes checking the response and expects its body to be an `ErrorResponse` with the
        /// given `exp_title` and `exp_errors`.
        pub async fn expect_error(self, exp_title: &str, exp_errors: &[&str]) {
            let response = self.take_error().await;
            assert_eq!(exp_title, response.title);
            assert_eq!(exp_errors, response.errors.as_slice());
        }

        /// Finishes checking the response and expects its body to be an `ErrorResponse` with the
        /// given `exp_title` and with one error that matches `exp_re`.
        pub async fn expect_error_re(self, exp_title: &str, exp_re: &str) {
            let response = self.take_error().await;
            assert_eq!(exp_title, response.title);
            let re = regex::Regex::new(exp_re).unwrap();
            assert!(
                response.errors.iter().any(|e| re.is_match(e)),
                "Response content '{:?}' does not match re '{}'",
                response,
                exp_re
            );
        }

        /// Checks the status and deserializes the body into a `T`.
        pub async fn expect_json<T: DeserializeOwned>(self) -> T {
            self.verify();

            let body =
                axum::body::to_bytes(self.response.into_body(), MAX_BODY_SIZE).await.unwrap();
            serde_json::from_slice::<T>(&body).unwrap()
        }
    }

    /// Defines a test that sends plain text to an API that takes JSON and expects a 400.
    #[macro_export]
    macro_rules! test_payload_must_be_json {
        ( $app:expr, $route:expr ) => {
            #[tokio::test]
            async fn test_payload_must_be_json() {
                $crate::rest::testutils::OneShotBuilder::new($app, $route)
                    .send_text("this is not json")
                    .await
                    .expect_status(axum::http::StatusCode::BAD_REQUEST)
                    .expect_error_re($crate::rest::BAD_REQUEST_TITLE, "Content-Type")
                    .await;

                $crate::rest::testutils::OneShotBuilder::new($app, $route)
                    .with_header(axum::http::header::CONTENT_TYPE, "application/json")
                    .send_text("this is not json")
                    .await
                    .expect_status(axum::http::StatusCode::BAD_REQUEST)
                    .expect_error_re($crate::rest::BAD_REQUEST_TITLE, "expected ident")
                    .await;
            }
        };
    }

    pub use test_payload_must_be_json;

    /// Defines a test that sends a body to an API that takes none and expects a 413.
    #[macro_export]
    macro_rules! test_payload_must_be_empty {
        ( $app:expr, $route:expr ) => {
            #[tokio::test]
            async fn test_payload_must_be_empty() {
                $crate::rest::testutils::OneShotBuilder::new($app, $route)
                    .send_text("should not be here")
                    .await
                    .expect_status(axum::http::StatusCode::PAYLOAD_TOO_LARGE)
                    .expect_error("Payload too large.", &["Content should be empty"])
                    .await;
            }
        };
    }

    pub use test_payload_must_be_empty;
}
