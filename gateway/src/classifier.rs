//! Classification of failed upstream responses.
//!
//! Upstream error bodies name the same information inconsistently
//! (`error`/`message`/`details`/`detail`, `emailVerified`/`email_verified`/
//! `verified`). [`FailureFields`] folds them into one shape at the boundary,
//! and [`classify`] evaluates an ordered rule table over it. Classification
//! is a pure function of the status, the body and the submitted identifier.

use bytes::Bytes;
use http::StatusCode;
use serde_json::{Map, Value};

/// Bumped whenever a rule or keyword is added, removed or reordered.
pub const RULESET_VERSION: u32 = 2;

/// Message used when the upstream body names no error at all.
pub const GENERIC_FAILURE_MESSAGE: &str = "Request failed";

/// Lower-case substrings that mark a verification failure.
pub const VERIFICATION_KEYWORDS: &[&str] = &[
    "verify",
    "verification",
    "unverified",
    "not verified",
    "account is not verified",
    "token expired",
    "verification token expired",
    "link has expired",
    "chưa xác thực",
    "chưa được xác thực",
    "cần được xác thực",
];

/// Statuses the backend uses for accounts that must be verified first.
const UNVERIFIED_STATUSES: &[StatusCode] = &[StatusCode::FORBIDDEN, StatusCode::LOCKED];

/// Failure body fields under a single naming scheme.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureFields {
    pub error: Option<String>,
    pub message: Option<String>,
    /// `details` or `detail`; may be structured.
    pub details: Option<Value>,
    pub email: Option<String>,
    /// `emailVerified`, `email_verified` or `verified`; `false` if any alias is.
    pub email_verified: Option<bool>,
}

impl FailureFields {
    pub fn from_body(body: &Value) -> Self {
        let Some(object) = body.as_object() else {
            return match body {
                Value::String(text) if !text.is_empty() => FailureFields {
                    message: Some(text.clone()),
                    ..Default::default()
                },
                _ => FailureFields::default(),
            };
        };

        FailureFields {
            error: string_field(object, &["error"]),
            message: string_field(object, &["message"]),
            details: ["details", "detail"]
                .iter()
                .filter_map(|key| object.get(*key))
                .find(|value| !value.is_null())
                .cloned(),
            email: string_field(object, &["email"]),
            email_verified: verified_flag(object),
        }
    }

    /// Parses a raw body; non-JSON text is treated as a bare message.
    pub fn from_raw(body: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => Self::from_body(&value),
            Err(_) => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                FailureFields {
                    message: (!text.is_empty()).then_some(text),
                    ..Default::default()
                }
            }
        }
    }

    /// String form of `details`, if any.
    fn details_text(&self) -> Option<String> {
        match &self.details {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::String(_)) | None => None,
            Some(other) => Some(other.to_string()),
        }
    }

    /// details/detail, then message, then error.
    pub fn best_message(&self) -> Option<String> {
        self.details_text()
            .or_else(|| self.message.clone())
            .or_else(|| self.error.clone())
    }

    /// Lower-cased concatenation of every textual field, used for keyword rules.
    pub fn search_text(&self) -> String {
        [self.error.clone(), self.message.clone(), self.details_text()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

fn string_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(|value| value.as_str().filter(|s| !s.is_empty()).map(String::from))
}

/// A `false` under any alias wins over a `true` under another.
fn verified_flag(object: &Map<String, Value>) -> Option<bool> {
    let flags: Vec<bool> = ["emailVerified", "email_verified", "verified"]
        .iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_bool))
        .collect();
    if flags.contains(&false) {
        Some(false)
    } else {
        flags.first().copied()
    }
}

/// Inputs visible to a rule.
pub struct RuleInput<'a> {
    pub status: StatusCode,
    pub fields: &'a FailureFields,
    /// `fields.search_text()`, computed once per classification.
    pub search_text: &'a str,
}

/// One predicate of the email-unverified rule table.
pub struct Rule {
    pub name: &'static str,
    pub matches: fn(&RuleInput<'_>) -> bool,
}

/// Evaluated in order; the first match decides the reported rule.
pub static EMAIL_UNVERIFIED_RULES: &[Rule] = &[
    Rule {
        name: "unverified_status",
        matches: |input| UNVERIFIED_STATUSES.contains(&input.status),
    },
    Rule {
        name: "verified_flag_false",
        matches: |input| input.fields.email_verified == Some(false),
    },
    Rule {
        name: "verification_keyword",
        matches: |input| {
            VERIFICATION_KEYWORDS
                .iter()
                .any(|keyword| input.search_text.contains(keyword))
        },
    },
];

/// A failed upstream response annotated with its category.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedFailure {
    pub status: StatusCode,
    pub raw_body: Bytes,
    pub is_email_unverified: bool,
    /// Name of the rule that marked the failure as unverified.
    pub matched_rule: Option<&'static str>,
    /// [`RULESET_VERSION`] of the table that produced this classification.
    pub ruleset_version: u32,
    pub email: Option<String>,
    /// Best message found in the body, if any. See [`Self::error_message`].
    pub error: Option<String>,
    /// `details`/`detail` as sent by the upstream, possibly structured.
    pub details: Option<Value>,
}

impl ClassifiedFailure {
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string())
    }

    pub fn detail_value(&self) -> Value {
        self.details
            .clone()
            .unwrap_or_else(|| Value::String(self.error_message()))
    }

    /// Fills fields this failure lacks from an earlier one. Status and
    /// classification stay those of `self`.
    pub fn or_fields_from(mut self, earlier: &ClassifiedFailure) -> Self {
        if self.error.is_none() {
            self.error = earlier.error.clone();
        }
        if self.details.is_none() {
            self.details = earlier.details.clone();
        }
        if self.is_email_unverified && self.email.is_none() {
            self.email = earlier.email.clone();
        }
        self
    }
}

/// Classifies a failed upstream response.
///
/// `submitted_identifier` is what the user typed as login name; it is used
/// as the email when the body names none and it looks like an address.
pub fn classify(
    status: StatusCode,
    raw_body: &Bytes,
    submitted_identifier: Option<&str>,
) -> ClassifiedFailure {
    let fields = FailureFields::from_raw(raw_body);
    let search_text = fields.search_text();
    let input = RuleInput {
        status,
        fields: &fields,
        search_text: &search_text,
    };

    let matched_rule = EMAIL_UNVERIFIED_RULES
        .iter()
        .find(|rule| (rule.matches)(&input))
        .map(|rule| rule.name);
    let is_email_unverified = matched_rule.is_some();

    let email = is_email_unverified
        .then(|| {
            fields.email.clone().or_else(|| {
                submitted_identifier
                    .filter(|id| id.contains('@'))
                    .map(String::from)
            })
        })
        .flatten();

    ClassifiedFailure {
        status,
        raw_body: raw_body.clone(),
        is_email_unverified,
        matched_rule,
        ruleset_version: RULESET_VERSION,
        email,
        error: fields.best_message(),
        details: fields.details.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Bytes {
        Bytes::from(value.to_string())
    }

    #[test]
    fn test_status_rules() {
        for status in [StatusCode::FORBIDDEN, StatusCode::LOCKED] {
            let failure = classify(status, &body(json!({})), None);
            assert!(failure.is_email_unverified);
            assert_eq!(failure.matched_rule, Some("unverified_status"));
            assert_eq!(failure.ruleset_version, RULESET_VERSION);
        }

        let failure = classify(
            StatusCode::UNAUTHORIZED,
            &body(json!({"message": "Invalid credentials"})),
            None,
        );
        assert!(!failure.is_email_unverified);
        assert_eq!(failure.matched_rule, None);
        assert_eq!(failure.error_message(), "Invalid credentials");
    }

    #[test]
    fn test_verified_flag_aliases() {
        for key in ["emailVerified", "email_verified", "verified"] {
            let mut object = Map::new();
            object.insert(key.to_string(), json!(false));
            object.insert("message".to_string(), json!("Login refused"));

            let failure = classify(StatusCode::UNAUTHORIZED, &body(Value::Object(object)), None);
            assert!(failure.is_email_unverified, "{key} should be honoured");
            assert_eq!(failure.matched_rule, Some("verified_flag_false"));
        }

        let failure = classify(
            StatusCode::UNAUTHORIZED,
            &body(json!({ "emailVerified": true, "message": "Wrong password" })),
            None,
        );
        assert!(!failure.is_email_unverified);

        // Mixed aliases: any false flag marks the account unverified.
        let failure = classify(
            StatusCode::UNAUTHORIZED,
            &body(json!({ "emailVerified": true, "verified": false, "message": "Login refused" })),
            None,
        );
        assert!(failure.is_email_unverified);
        assert_eq!(failure.matched_rule, Some("verified_flag_false"));
    }

    #[test]
    fn test_keywords() {
        let cases = [
            json!({"error": "Please VERIFY your email"}),
            json!({"message": "Account is not verified"}),
            json!({"details": "Verification token expired"}),
            json!({"detail": "This link has expired"}),
            json!({"message": "Tài khoản chưa xác thực"}),
            json!({"message": "Email chưa được xác thực"}),
            json!({"message": "Tài khoản cần được xác thực"}),
            json!({"details": {"reason": "unverified"}}),
        ];

        for case in cases {
            let failure = classify(StatusCode::BAD_REQUEST, &body(case.clone()), None);
            assert!(failure.is_email_unverified, "{case} should match");
            assert_eq!(failure.matched_rule, Some("verification_keyword"));
        }

        let failure = classify(
            StatusCode::INTERNAL_SERVER_ERROR,
            &body(json!({"error": "db down"})),
            None,
        );
        assert!(!failure.is_email_unverified);
    }

    #[test]
    fn test_message_priority() {
        let failure = classify(
            StatusCode::BAD_REQUEST,
            &body(json!({"error": "Bad Request", "message": "Invalid input", "details": "Password too short"})),
            None,
        );
        assert_eq!(failure.error_message(), "Password too short");
        assert_eq!(failure.detail_value(), json!("Password too short"));

        let failure = classify(
            StatusCode::BAD_REQUEST,
            &body(json!({"error": "Bad Request", "message": "Invalid input"})),
            None,
        );
        assert_eq!(failure.error_message(), "Invalid input");

        let failure = classify(StatusCode::BAD_REQUEST, &body(json!({"error": "db down"})), None);
        assert_eq!(failure.error_message(), "db down");

        let failure = classify(StatusCode::BAD_REQUEST, &body(json!({"code": 7})), None);
        assert_eq!(failure.error_message(), GENERIC_FAILURE_MESSAGE);
        assert_eq!(failure.detail_value(), json!(GENERIC_FAILURE_MESSAGE));
    }

    #[test]
    fn test_structured_details_are_kept() {
        let failure = classify(
            StatusCode::BAD_REQUEST,
            &body(json!({"details": {"field": "password"}})),
            None,
        );
        assert_eq!(failure.detail_value(), json!({"field": "password"}));
        assert_eq!(failure.error_message(), r#"{"field":"password"}"#);
    }

    #[test]
    fn test_email_derivation() {
        let failure = classify(
            StatusCode::FORBIDDEN,
            &body(json!({"email": "owner@example.com"})),
            Some("typed@example.com"),
        );
        assert_eq!(failure.email.as_deref(), Some("owner@example.com"));

        let failure = classify(StatusCode::FORBIDDEN, &body(json!({})), Some("typed@example.com"));
        assert_eq!(failure.email.as_deref(), Some("typed@example.com"));

        let failure = classify(StatusCode::FORBIDDEN, &body(json!({})), Some("username"));
        assert_eq!(failure.email, None);

        // Only reported for unverified failures
        let failure = classify(
            StatusCode::UNAUTHORIZED,
            &body(json!({"email": "owner@example.com"})),
            Some("typed@example.com"),
        );
        assert_eq!(failure.email, None);
    }

    #[test]
    fn test_non_json_body() {
        let failure = classify(
            StatusCode::BAD_GATEWAY,
            &Bytes::from_static(b"<html>upstream broke</html>"),
            None,
        );
        assert!(!failure.is_email_unverified);
        assert_eq!(failure.error_message(), "<html>upstream broke</html>");

        let failure = classify(StatusCode::INTERNAL_SERVER_ERROR, &Bytes::new(), None);
        assert_eq!(failure.error_message(), GENERIC_FAILURE_MESSAGE);
    }

    #[test]
    fn test_classification_is_pure() {
        let raw = body(json!({"message": "Email chưa được xác thực"}));
        let first = classify(StatusCode::FORBIDDEN, &raw, Some("a@b.c"));
        let second = classify(StatusCode::FORBIDDEN, &raw, Some("a@b.c"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_or_fields_from() {
        let primary = classify(
            StatusCode::INTERNAL_SERVER_ERROR,
            &body(json!({"error": "db down", "details": "connection pool exhausted"})),
            None,
        );
        let fallback = classify(StatusCode::NOT_FOUND, &Bytes::new(), None);

        let merged = fallback.or_fields_from(&primary);
        assert_eq!(merged.status, StatusCode::NOT_FOUND);
        assert_eq!(merged.error_message(), "connection pool exhausted");
        assert_eq!(merged.detail_value(), json!("connection pool exhausted"));

        // The later failure's own fields win
        let fallback = classify(
            StatusCode::UNAUTHORIZED,
            &body(json!({"message": "Invalid credentials"})),
            None,
        );
        let merged = fallback.or_fields_from(&primary);
        assert_eq!(merged.error_message(), "Invalid credentials");
        assert_eq!(merged.detail_value(), json!("connection pool exhausted"));
    }
}
