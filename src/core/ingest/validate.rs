// src/core/ingest/validate.rs

//! Identifier validation and generation (§4.5, §6 "Identifiers").

use crate::core::errors::IngestError;

const MAX_RUN_ID_LEN: usize = 200;
const MAX_TC_ID_LEN: usize = 20;

/// `run_id` — URL-safe plus percent-encoded sequences, no raw `/` or `\`,
/// no `..`, ≤200 chars (§6).
pub fn validate_run_id(run_id: &str) -> Result<(), IngestError> {
    if run_id.is_empty() || run_id.len() > MAX_RUN_ID_LEN {
        return Err(IngestError::RunIdInvalid(run_id.to_string()));
    }
    if run_id.contains('/') || run_id.contains('\\') || run_id.contains("..") {
        return Err(IngestError::RunIdInvalid(run_id.to_string()));
    }
    let mut chars = run_id.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            let h1 = chars.next();
            let h2 = chars.next();
            match (h1, h2) {
                (Some(a), Some(b)) if a.is_ascii_hexdigit() && b.is_ascii_hexdigit() => continue,
                _ => return Err(IngestError::RunIdInvalid(run_id.to_string())),
            }
        }
        if !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~')) {
            return Err(IngestError::RunIdInvalid(run_id.to_string()));
        }
    }
    Ok(())
}

/// Generated `run_id`s are 12 hex characters (§4.5).
pub fn generate_run_id() -> String {
    let mut bytes = [0u8; 6];
    getrandom::fill(&mut bytes).expect("system RNG unavailable");
    hex::encode(bytes)
}

/// `tc_id` — alphanumeric + hyphen, ≤20 chars (§3, §6).
pub fn validate_tc_id(tc_id: &str) -> Result<(), IngestError> {
    let ok = !tc_id.is_empty()
        && tc_id.len() <= MAX_TC_ID_LEN
        && tc_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if ok {
        Ok(())
    } else {
        Err(IngestError::TestCaseIdInvalid(tc_id.to_string()))
    }
}

/// HTML-entity-normalizes a free-form `tc_full_name` (§3: "may contain
/// characters needing HTML-entity normalization").
pub fn html_entity_normalize(name: &str) -> String {
    name.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_rejects_path_traversal_and_separators() {
        assert!(validate_run_id("../etc/passwd").is_err());
        assert!(validate_run_id("a/b").is_err());
        assert!(validate_run_id("a\\b").is_err());
    }

    #[test]
    fn run_id_accepts_percent_encoding() {
        assert!(validate_run_id("run%2Dfoo").is_ok());
        assert!(validate_run_id("run%2").is_err());
    }

    #[test]
    fn generated_run_id_is_12_hex_chars() {
        let id = generate_run_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tc_id_rejects_non_alphanumeric_hyphen() {
        assert!(validate_tc_id("0-1").is_ok());
        assert!(validate_tc_id("tc_1").is_err());
        assert!(validate_tc_id(&"a".repeat(21)).is_err());
    }

    #[test]
    fn entity_normalize_escapes_reserved_characters() {
        assert_eq!(html_entity_normalize("a&b<c>\"d\""), "a&amp;b&lt;c&gt;&quot;d&quot;");
    }
}
