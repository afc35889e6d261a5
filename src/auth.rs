use std::fmt;

/// Personal access token for a source platform.
///
/// Tokens copied out of web consoles sometimes carry a byte-order mark or
/// trailing newline; both are stripped on construction.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(raw: &str) -> Self {
        Self(raw.trim().trim_start_matches('\u{feff}').trim().to_string())
    }
}

// Never print secrets in debug logs.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}
