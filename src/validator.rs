use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::{ApiError, FieldErrors};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    )
    .unwrap();
}

/// Collects field-level validation messages. The first message recorded for a
/// field wins.
#[derive(Debug, Default)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: &str, message: &str) {
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.to_string());
    }

    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add_error(field, message);
        }
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn into_errors(self) -> FieldErrors {
        self.errors
    }

    /// `Ok` when nothing was recorded, the collected messages otherwise.
    pub fn finish(self) -> Result<(), ApiError> {
        if self.valid() {
            Ok(())
        } else {
            Err(ApiError::FailedValidation(self.errors))
        }
    }
}

pub fn matches_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

pub fn permitted_value<T: PartialEq>(value: &T, permitted: &[T]) -> bool {
    permitted.contains(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_per_field_is_kept() {
        let mut v = Validator::new();
        v.check(false, "email", "must be provided");
        v.check(false, "email", "must be a valid email address");
        v.check(true, "password", "never recorded");
        assert!(!v.valid());
        assert_eq!(v.errors().len(), 1);
        assert_eq!(v.errors()["email"], "must be provided");
    }

    #[test]
    fn finish_reports_collected_errors() {
        assert!(Validator::new().finish().is_ok());
        let mut v = Validator::new();
        v.check(false, "token", "must be provided");
        match v.finish() {
            Err(ApiError::FailedValidation(errors)) => {
                assert_eq!(errors["token"], "must be provided")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn email_regex() {
        assert!(matches_email("alice@x.com"));
        assert!(matches_email("first.last+tag@example.co.uk"));
        assert!(!matches_email("not-an-email"));
        assert!(!matches_email("missing-domain@"));
    }

    #[test]
    fn permitted_values() {
        assert!(permitted_value(&"user", &["user", "admin"]));
        assert!(!permitted_value(&"root", &["user", "admin"]));
    }
}
