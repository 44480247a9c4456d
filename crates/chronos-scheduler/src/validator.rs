//! The Validator (C8): a pure function with no I/O. Every rule here is
//! drawn directly from §4.8 and the validation matrix in §8.6; nothing in
//! this module talks to the store, cache, or queue.

use std::sync::OnceLock;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chronos_common::{Channel, EMPTY_MESSAGE_PLACEHOLDER, MAX_TEXT_RUNES};
use regex::Regex;
use thiserror::Error;

/// Recipients (and subjects/messages) are capped at this many bytes for
/// the email channel specifically, separately from the rune cap used for
/// subject/message (§3: "length ≤ 254").
pub const MAX_RECIPIENT_BYTES: usize = 254;
const MAX_SEND_AT_HORIZON_DAYS: i64 = 365;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("channel is required")]
    MissingChannel,
    #[error("unsupported channel: {0}")]
    UnsupportedChannel(String),
    #[error("message exceeds {MAX_TEXT_RUNES} runes")]
    MessageTooLong,
    #[error("send_at is required")]
    MissingSendAt,
    #[error("send_at is not a valid RFC3339 timestamp")]
    InvalidSendAt,
    #[error("send_at must be strictly in the future")]
    SendAtInPast,
    #[error("send_at must be no more than {MAX_SEND_AT_HORIZON_DAYS} days ahead")]
    SendAtTooFar,
    #[error("at least one recipient is required for the email channel")]
    MissingSendTo,
    #[error("subject is required for the email channel")]
    MissingEmailSubject,
    #[error("subject exceeds {MAX_TEXT_RUNES} runes")]
    EmailSubjectTooLong,
    #[error("recipient is not a valid email address: {0}")]
    InvalidEmailFormat(String),
    #[error("recipient exceeds {MAX_RECIPIENT_BYTES} bytes: {0}")]
    RecipientTooLong(String),
}

/// The validated, ready-to-persist shape of a create request. Distinct
/// from any HTTP DTO — this is the core's own boundary type.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub channel: Channel,
    pub subject: Option<String>,
    pub message: String,
    pub send_at: DateTime<Utc>,
    pub recipients: Vec<String>,
}

/// Raw, unvalidated create-request fields, borrowed from whatever DTO the
/// HTTP layer decoded. `send_at` is a raw string so this function owns its
/// own RFC3339 parsing and can distinguish "missing" from "malformed".
#[derive(Debug, Clone, Copy)]
pub struct CreateNotificationInput<'a> {
    pub channel: &'a str,
    pub subject: Option<&'a str>,
    pub message: &'a str,
    pub send_at: &'a str,
    pub recipients: &'a [String],
}

fn email_regex() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email regex is valid")
    })
}

pub fn validate(
    input: CreateNotificationInput,
    now: DateTime<Utc>,
) -> Result<NewNotification, ValidationError> {
    if input.channel.trim().is_empty() {
        return Err(ValidationError::MissingChannel);
    }
    let channel: Channel = input
        .channel
        .parse()
        .map_err(|_| ValidationError::UnsupportedChannel(input.channel.to_string()))?;

    let message = if input.message.is_empty() {
        EMPTY_MESSAGE_PLACEHOLDER.to_string()
    } else {
        input.message.to_string()
    };
    if message.chars().count() > MAX_TEXT_RUNES {
        return Err(ValidationError::MessageTooLong);
    }

    if input.send_at.trim().is_empty() {
        return Err(ValidationError::MissingSendAt);
    }
    let send_at = DateTime::parse_from_rfc3339(input.send_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValidationError::InvalidSendAt)?;
    if send_at <= now {
        return Err(ValidationError::SendAtInPast);
    }
    if send_at > now + ChronoDuration::days(MAX_SEND_AT_HORIZON_DAYS) {
        return Err(ValidationError::SendAtTooFar);
    }

    let subject = input.subject.filter(|s| !s.is_empty()).map(str::to_string);
    let recipients = input.recipients.to_vec();

    if channel == Channel::Email {
        if recipients.is_empty() {
            return Err(ValidationError::MissingSendTo);
        }
        let subject_text = subject.clone().ok_or(ValidationError::MissingEmailSubject)?;
        if subject_text.chars().count() > MAX_TEXT_RUNES {
            return Err(ValidationError::EmailSubjectTooLong);
        }
        for recipient in &recipients {
            if recipient.len() > MAX_RECIPIENT_BYTES {
                return Err(ValidationError::RecipientTooLong(recipient.clone()));
            }
            if !email_regex().is_match(recipient) {
                return Err(ValidationError::InvalidEmailFormat(recipient.clone()));
            }
        }
    }

    Ok(NewNotification {
        channel,
        subject,
        message,
        send_at,
        recipients,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input<'a>(channel: &'a str, send_at: &'a str, recipients: &'a [String]) -> CreateNotificationInput<'a> {
        CreateNotificationInput {
            channel,
            subject: None,
            message: "hi",
            send_at,
            recipients,
        }
    }

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn empty_channel_is_rejected() {
        let empty = vec![];
        let result = validate(base_input("", "2026-01-01T01:00:00Z", &empty), now());
        assert_eq!(result.unwrap_err(), ValidationError::MissingChannel);
    }

    #[test]
    fn unsupported_channel_is_rejected() {
        let empty = vec![];
        let result = validate(base_input("fax", "2026-01-01T01:00:00Z", &empty), now());
        assert_eq!(
            result.unwrap_err(),
            ValidationError::UnsupportedChannel("fax".to_string())
        );
    }

    #[test]
    fn channel_is_case_insensitive() {
        let empty = vec![];
        let result = validate(base_input("STDOUT", "2026-01-01T01:00:00Z", &empty), now());
        assert!(result.is_ok());
    }

    #[test]
    fn message_too_long_is_rejected() {
        let empty = vec![];
        let long_message = "a".repeat(255);
        let input = CreateNotificationInput {
            channel: "stdout",
            subject: None,
            message: &long_message,
            send_at: "2026-01-01T01:00:00Z",
            recipients: &empty,
        };
        assert_eq!(validate(input, now()).unwrap_err(), ValidationError::MessageTooLong);
    }

    #[test]
    fn empty_message_is_replaced_with_placeholder() {
        let empty = vec![];
        let input = CreateNotificationInput {
            channel: "stdout",
            subject: None,
            message: "",
            send_at: "2026-01-01T01:00:00Z",
            recipients: &empty,
        };
        let result = validate(input, now()).unwrap();
        assert_eq!(result.message, EMPTY_MESSAGE_PLACEHOLDER);
    }

    #[test]
    fn missing_send_at_is_rejected() {
        let empty = vec![];
        assert_eq!(
            validate(base_input("stdout", "", &empty), now()).unwrap_err(),
            ValidationError::MissingSendAt
        );
    }

    #[test]
    fn malformed_send_at_is_rejected() {
        let empty = vec![];
        assert_eq!(
            validate(base_input("stdout", "not-a-timestamp", &empty), now()).unwrap_err(),
            ValidationError::InvalidSendAt
        );
    }

    #[test]
    fn past_send_at_is_rejected() {
        let empty = vec![];
        assert_eq!(
            validate(base_input("stdout", "2020-01-01T00:00:00Z", &empty), now()).unwrap_err(),
            ValidationError::SendAtInPast
        );
    }

    #[test]
    fn send_at_too_far_ahead_is_rejected() {
        let empty = vec![];
        assert_eq!(
            validate(base_input("stdout", "2028-01-01T00:00:00Z", &empty), now()).unwrap_err(),
            ValidationError::SendAtTooFar
        );
    }

    #[test]
    fn email_without_recipients_is_rejected() {
        let empty = vec![];
        assert_eq!(
            validate(base_input("email", "2026-01-01T01:00:00Z", &empty), now()).unwrap_err(),
            ValidationError::MissingSendTo
        );
    }

    #[test]
    fn email_without_subject_is_rejected() {
        let recipients = vec!["a@example.com".to_string()];
        assert_eq!(
            validate(base_input("email", "2026-01-01T01:00:00Z", &recipients), now()).unwrap_err(),
            ValidationError::MissingEmailSubject
        );
    }

    #[test]
    fn invalid_recipient_format_is_rejected() {
        let recipients = vec!["invalid.com".to_string()];
        let input = CreateNotificationInput {
            channel: "email",
            subject: Some("hello"),
            message: "hi",
            send_at: "2026-01-01T01:00:00Z",
            recipients: &recipients,
        };
        assert_eq!(
            validate(input, now()).unwrap_err(),
            ValidationError::InvalidEmailFormat("invalid.com".to_string())
        );
    }

    #[test]
    fn valid_email_submission_passes() {
        let recipients = vec!["a@example.com".to_string()];
        let input = CreateNotificationInput {
            channel: "email",
            subject: Some("hello"),
            message: "hi",
            send_at: "2026-01-01T01:00:00Z",
            recipients: &recipients,
        };
        let result = validate(input, now()).unwrap();
        assert_eq!(result.channel, Channel::Email);
        assert_eq!(result.subject.as_deref(), Some("hello"));
    }
}
