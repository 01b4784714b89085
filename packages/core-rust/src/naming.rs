//! Topic-name sanitisation and identifier generation.
//!
//! Broker topic names are derived from HTTP paths (`/v1/users/:id/mail`), so
//! they must be reduced to a conservative alphabet before they reach a broker
//! that rejects slashes, colons, or upper-case characters.

use std::sync::LazyLock;

use regex::Regex;

/// Longest topic name a broker is guaranteed to accept.
pub const MAX_NAME_LEN: usize = 250;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-zA-Z0-9]+").expect("static regex is valid"));

/// Joins `tokens` into one broker-safe name.
///
/// Each token is lower-cased, every run of non-alphanumeric characters
/// becomes a single `-`, and dashes at either end of the token are dropped.
/// Tokens that sanitise to nothing are skipped. The result is truncated to
/// [`MAX_NAME_LEN`].
///
/// # Examples
///
/// ```
/// use relay_core::naming::escape_name;
///
/// assert_eq!(escape_name(&["ptask", "/v1/batch/Process"]), "ptask-v1-batch-process");
/// assert_eq!(escape_name(&["/mail"]), "mail");
/// ```
#[must_use]
pub fn escape_name<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        let lowered = token.as_ref().to_lowercase();
        let escaped = NON_ALPHANUMERIC.replace_all(&lowered, "-");
        let escaped = escaped.trim_matches('-');
        if !escaped.is_empty() {
            parts.push(escaped.to_owned());
        }
    }

    let mut name = parts.join("-");
    // Sanitised names are pure ASCII, so byte truncation is char-safe.
    name.truncate(MAX_NAME_LEN);
    name
}

/// Returns a fresh random identifier (hyphen-free UUID v4).
#[must_use]
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn path_becomes_dashed_lowercase() {
        assert_eq!(escape_name(&["/v1/Users/:id"]), "v1-users-id");
    }

    #[test]
    fn tokens_are_joined_with_dash() {
        assert_eq!(escape_name(&["ptask", "/batch"]), "ptask-batch");
    }

    #[test]
    fn empty_tokens_are_skipped() {
        assert_eq!(escape_name(&["", "mail", ""]), "mail");
        assert_eq!(escape_name::<&str>(&[]), "");
    }

    #[test]
    fn runs_of_symbols_collapse() {
        assert_eq!(escape_name(&["a//__b"]), "a-b");
        assert_eq!(escape_name(&["/mail/", "--x--"]), "mail-x");
    }

    #[test]
    fn long_names_are_truncated() {
        let long = "x".repeat(400);
        assert_eq!(escape_name(&[long.as_str()]).len(), MAX_NAME_LEN);
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    proptest! {
        #[test]
        fn escaped_names_use_safe_alphabet(tokens in proptest::collection::vec(".{0,40}", 0..6)) {
            let name = escape_name(&tokens);
            prop_assert!(name.len() <= MAX_NAME_LEN);
            prop_assert!(!name.starts_with('-'));
            prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }

        #[test]
        fn escaping_is_idempotent(token in "[a-zA-Z0-9/_ -]{0,60}") {
            let once = escape_name(&[token.as_str()]);
            prop_assert_eq!(escape_name(&[once.as_str()]), once.clone());
        }
    }
}
