use std::collections::{BTreeMap, HashMap};

use validator::ValidateEmail;

/// Patterns a form field can be checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Email,
}

impl Pattern {
    fn matches(self, value: &str) -> bool {
        match self {
            Pattern::Email => value.validate_email(),
        }
    }
}

/// Field name → human readable messages, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    /// First message recorded for `field`.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(|m| m.first()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for m in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{field}: {m}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Submitted form values plus the errors found by the checks run against them.
///
/// Pattern and length checks skip empty values; `required` is what reports them.
#[derive(Debug, Clone, Default)]
pub struct FormValidator {
    values: HashMap<String, String>,
    errors: FieldErrors,
}

impl FormValidator {
    pub fn new<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            errors: FieldErrors::default(),
        }
    }

    pub fn add(&mut self, field: &str, value: impl Into<String>) {
        self.values.insert(field.to_string(), value.into());
    }

    /// Submitted value with surrounding whitespace removed; empty when absent.
    pub fn get(&self, field: &str) -> &str {
        self.values.get(field).map(|v| v.trim()).unwrap_or("")
    }

    pub fn required(&mut self, fields: &[&str]) -> &mut Self {
        for field in fields {
            if self.get(field).is_empty() {
                self.errors.add(field, "This field cannot be blank");
            }
        }
        self
    }

    pub fn matches_pattern(&mut self, field: &str, pattern: Pattern) -> &mut Self {
        let value = self.get(field);
        if !value.is_empty() && !pattern.matches(value) {
            self.errors.add(field, "This field is invalid");
        }
        self
    }

    pub fn min_length(&mut self, field: &str, min: usize) -> &mut Self {
        let len = self.get(field).chars().count();
        if len > 0 && len < min {
            self.errors.add(
                field,
                format!("This field is too short (minimum is {min} characters)"),
            );
        }
        self
    }

    pub fn max_length(&mut self, field: &str, max: usize) -> &mut Self {
        let len = self.get(field).chars().count();
        if len > max {
            self.errors.add(
                field,
                format!("This field is too long (maximum is {max} characters)"),
            );
        }
        self
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn into_errors(self) -> FieldErrors {
        self.errors
    }
}
