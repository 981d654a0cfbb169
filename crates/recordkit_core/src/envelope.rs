//! Result envelopes returned by CRUD functions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-field validation messages, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    /// Creates an empty set of validation errors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message for a field.
    pub fn insert(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    /// Removes every message recorded against `field`.
    ///
    /// Returns true if anything was removed.
    pub fn remove_field(&mut self, field: &str) -> bool {
        self.0.remove(field).is_some()
    }

    /// Returns the messages recorded against `field`.
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// Returns true if no field carries a message.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of fields carrying at least one message.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates fields and their messages in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Field names carrying messages.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for ValidationErrors
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut errors = Self::new();
        for (field, message) in iter {
            errors.insert(field, message);
        }
        errors
    }
}

impl From<BTreeMap<String, Vec<String>>> for ValidationErrors {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        Self(map)
    }
}

/// Outcome of a single CRUD call, produced by the service.
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope<T> {
    content: Option<T>,
    is_success: bool,
    status_code: u16,
    error_message: Option<String>,
    validation_errors: Option<ValidationErrors>,
    id: Option<i64>,
}

impl<T> ResultEnvelope<T> {
    /// Creates a successful envelope carrying `content`.
    pub fn success(content: T) -> Self {
        Self {
            content: Some(content),
            is_success: true,
            status_code: 200,
            error_message: None,
            validation_errors: None,
            id: None,
        }
    }

    /// Creates a successful envelope without content.
    pub fn empty() -> Self {
        Self {
            content: None,
            is_success: true,
            status_code: 204,
            error_message: None,
            validation_errors: None,
            id: None,
        }
    }

    /// Creates a failed envelope.
    pub fn failure(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            content: None,
            is_success: false,
            status_code,
            error_message: Some(message.into()),
            validation_errors: None,
            id: None,
        }
    }

    /// Builds a failed envelope from a structured error body.
    ///
    /// The message is taken from `detail`, falling back to `title`. The
    /// `errors` object is read as field validation messages only when the
    /// status is a client error (400..=499); each entry may be a string or an
    /// array of strings.
    pub fn from_problem(status_code: u16, body: &Value) -> Self {
        let message = body
            .get("detail")
            .and_then(Value::as_str)
            .or_else(|| body.get("title").and_then(Value::as_str))
            .map(str::to_owned)
            .unwrap_or_else(|| format!("request failed with status {status_code}"));

        let mut envelope = Self::failure(status_code, message);
        if !(400..=499).contains(&status_code) {
            return envelope;
        }

        if let Some(Value::Object(map)) = body.get("errors") {
            let mut errors = ValidationErrors::new();
            for (field, messages) in map {
                match messages {
                    Value::String(text) => errors.insert(field.as_str(), text.as_str()),
                    Value::Array(items) => {
                        for text in items.iter().filter_map(Value::as_str) {
                            errors.insert(field.as_str(), text);
                        }
                    }
                    _ => {}
                }
            }
            if !errors.is_empty() {
                envelope.validation_errors = Some(errors);
            }
        }
        envelope
    }

    /// Attaches validation errors.
    #[must_use]
    pub fn with_validation_errors(mut self, errors: ValidationErrors) -> Self {
        self.validation_errors = Some(errors);
        self
    }

    /// Attaches a server-assigned identifier.
    #[must_use]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Overrides the status code.
    #[must_use]
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    /// Returns true if the operation succeeded.
    pub fn is_success(&self) -> bool {
        self.is_success
    }

    /// Returns the status code.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Returns true for 400..=499 statuses.
    pub fn is_client_error(&self) -> bool {
        (400..=499).contains(&self.status_code)
    }

    /// Returns the content, if any.
    pub fn content(&self) -> Option<&T> {
        self.content.as_ref()
    }

    /// Consumes the envelope and returns its content.
    pub fn into_content(self) -> Option<T> {
        self.content
    }

    /// Returns the error message, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns the validation errors, if any.
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        self.validation_errors.as_ref()
    }

    /// Returns the server-assigned identifier, if any.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Splits the envelope into its message and validation map.
    pub(crate) fn into_failure_parts(self) -> (String, Option<ValidationErrors>) {
        let message = self
            .error_message
            .unwrap_or_else(|| format!("status {}", self.status_code));
        (message, self.validation_errors)
    }
}
