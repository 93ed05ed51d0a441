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

//! Declarative validation of request payloads.
//!
//! A service declares the constraints of a payload as a list of `Rule`s, each of which binds a
//! `Check` to a field of a JSON object together with the message to report when the check fails.
//! Rules do not know about routes, so the same list can be shared by several handlers.
//!
//! `validate` evaluates all rules, without stopping at the first failure, and turns the failures
//! into a single `NormalizedError` so that the client learns about every problem at once.

use crate::rest::{NormalizedError, RestResult};
use serde_json::Value;

/// A predicate over the value of a payload field.
///
/// The value is `None` when the field is not present in the payload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Check {
    /// The field must be present and its value must not be falsy.  Falsy values are `null`,
    /// `false`, zero and the empty string.
    Truthy,

    /// The textual form of the field must have at most this many characters.  A missing or null
    /// field has no length and passes.
    MaxLength(usize),
}

/// Returns true if `value` is considered "truthy".
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Returns the number of characters in the textual form of `value`.
fn text_length(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    }
}

impl Check {
    /// Evaluates the check against the optional `value` of a field.
    pub fn passes(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (Check::Truthy, Some(value)) => is_truthy(value),
            (Check::Truthy, None) => false,
            (Check::MaxLength(_), None | Some(Value::Null)) => true,
            (Check::MaxLength(max), Some(value)) => text_length(value) <= *max,
        }
    }
}

/// A single constraint on a payload field.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rule {
    /// Name of the top-level field of the payload this rule applies to.
    field: &'static str,

    /// Condition that the field must satisfy.
    check: Check,

    /// Message to report when the check fails.
    message: &'static str,
}

impl Rule {
    /// Creates a new rule that applies `check` to `field` and reports `message` on failure.
    pub const fn new(field: &'static str, check: Check, message: &'static str) -> Self {
        Self { field, check, message }
    }

    /// Evaluates the rule against `payload`, returning the failure if the check does not pass.
    ///
    /// Payloads that are not JSON objects have no fields, so every field is treated as missing.
    pub fn evaluate(&self, payload: &Value) -> Option<ValidationFailure> {
        if self.check.passes(payload.get(self.field)) {
            None
        } else {
            Some(ValidationFailure { field: self.field, message: self.message })
        }
    }
}

/// Details about a rule that did not pass.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationFailure {
    /// Name of the field that failed validation.
    pub field: &'static str,

    /// Message describing the failure.
    pub message: &'static str,
}

/// Evaluates every rule in `rules` against `payload` and returns all failures in the order in
/// which the rules were declared.
pub fn check_all(rules: &[Rule], payload: &Value) -> Vec<ValidationFailure> {
    rules.iter().filter_map(|rule| rule.evaluate(payload)).collect()
}

/// Validates `payload` against `rules`, collecting all failures into a single error.
pub fn validate(rules: &[Rule], payload: &Value) -> RestResult<()> {
    let failures = check_all(rules, payload);
    if failures.is_empty() {
        return Ok(());
    }
    let errors = failures.into_iter().map(|f| f.message.to_owned()).collect();
    Err(NormalizedError::bad_request(errors).into())
}
