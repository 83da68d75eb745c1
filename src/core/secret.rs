//! Credential masking for logs and error messages
//!
//! Token endpoint bodies, server error text and header dumps pass through
//! here before they reach a log line or an error string.

use std::borrow::Cow;

use regex::Regex;

/// Patterns for credentials that show up around MCP servers and OAuth endpoints
const SECRET_PATTERNS: &[(&str, &str)] = &[
    // Authorization header values
    (r"(?i)bearer\s+[a-zA-Z0-9._~+/=-]+", "Bearer [MASKED]"),
    (r"(?i)basic\s+[a-zA-Z0-9+/=]{8,}", "Basic [MASKED]"),
    // JSON token endpoint fields
    (
        r#""(access_token|refresh_token|id_token|client_secret|code_verifier)"\s*:\s*"[^"]*""#,
        r#""$1":"[MASKED]""#,
    ),
    // Form-encoded bodies
    (
        r"\b(access_token|refresh_token|id_token|client_secret|code_verifier|code)=[^&\s]+",
        "$1=[MASKED]",
    ),
    // JWT
    (
        r"eyJ[a-zA-Z0-9_-]+\.eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+",
        "[MASKED_JWT]",
    ),
    // Generic key/secret assignments
    (r"(?i)(api[_-]?key|secret|password)\s*[=:]\s*[a-zA-Z0-9_-]{8,}", "$1=[MASKED]"),
];

/// Compiled masking patterns
pub struct SecretMasker {
    patterns: Vec<(Regex, &'static str)>,
}

impl Default for SecretMasker {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretMasker {
    #[must_use]
    pub fn new() -> Self {
        let patterns = SECRET_PATTERNS
            .iter()
            .filter_map(|(pattern, replacement)| {
                Regex::new(pattern).ok().map(|re| (re, *replacement))
            })
            .collect();

        Self { patterns }
    }

    /// Mask every credential in `text`
    #[must_use]
    pub fn mask<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut result = Cow::Borrowed(text);

        for (pattern, replacement) in &self.patterns {
            if pattern.is_match(&result) {
                result = Cow::Owned(pattern.replace_all(&result, *replacement).into_owned());
            }
        }

        result
    }
}

static MASKER: std::sync::LazyLock<SecretMasker> = std::sync::LazyLock::new(SecretMasker::new);

/// Mask credentials in a string using the shared masker
#[must_use]
pub fn mask_secrets(text: &str) -> Cow<'_, str> {
    MASKER.mask(text)
}

/// Mask and shorten remote text before embedding it in an error
#[must_use]
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let masked = mask_secrets(text.trim());
    if masked.chars().count() <= max_chars {
        return masked.into_owned();
    }
    let mut short: String = masked.chars().take(max_chars).collect();
    short.push_str("...");
    short
}
