//! Response matching.
//!
//! Preserves the asymmetry from `original_source/bootymapper.c`: a cheap
//! substring containment check runs in the hot read-accumulation path
//! (`hot_path_hit`), while the full compiled regex runs exactly once per
//! task, at termination (`terminal_hit`). The two are never unified;
//! doing so would mean running the regex engine on every read event
//! instead of once per connection. Unlike the C original, matching
//! here is done directly against the accumulated byte slice: Rust byte
//! slices carry their own length, so there is no NUL terminator to
//! exclude from the search.

use regex::{Regex, RegexBuilder};

/// Compiled matcher state, resolved once at startup.
pub enum Matcher {
    /// `-s` was not given: every task with output (or a clean non-connect
    /// termination) is considered a match.
    Disabled,
    /// `-s PATTERN` was given, with `regex` compiled from the CLI's
    /// case-insensitive (`-i`) and extended (`-x`) flags.
    Enabled { pattern: String, regex: Regex },
}

/// Error compiling the search pattern (fatal at startup).
#[derive(Debug)]
pub struct PatternError(pub regex::Error);

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to compile search pattern: {}", self.0)
    }
}

impl std::error::Error for PatternError {}

impl Matcher {
    pub fn disabled() -> Self {
        Matcher::Disabled
    }

    /// `extended` has no BRE/ERE distinction in the `regex` crate (it is
    /// always ERE-like); the flag is accepted for CLI parity with
    /// `original_source/bootymapper.c` but does not change compilation.
    pub fn enabled(pattern: &str, case_insensitive: bool, _extended: bool) -> Result<Self, PatternError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(PatternError)?;
        Ok(Matcher::Enabled {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Matcher::Enabled { .. })
    }

    pub fn pattern(&self) -> Option<&str> {
        match self {
            Matcher::Disabled => None,
            Matcher::Enabled { pattern, .. } => Some(pattern),
        }
    }

    /// Cheap substring containment test, called only when the response
    /// buffer has just crossed `max_read_size` in the hot accumulation
    /// path, on a mid-stream early match.
    pub fn hot_path_hit(&self, buf: &[u8]) -> bool {
        match self {
            Matcher::Disabled => true,
            Matcher::Enabled { pattern, .. } => contains_subslice(buf, pattern.as_bytes()),
        }
    }

    /// Full regex match against the accumulated response, called once
    /// per task at non-length-triggered termination, matching the full
    /// accumulated response at end of stream. `buf` carries its own
    /// length, so anchors like `$` see the true end of the response.
    pub fn terminal_hit(&self, buf: &[u8]) -> bool {
        match self {
            Matcher::Disabled => true,
            Matcher::Enabled { regex, .. } => match std::str::from_utf8(buf) {
                Ok(s) => regex.is_match(s),
                Err(_) => regex.is_match(&String::from_utf8_lossy(buf)),
            },
        }
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_matches_everything() {
        let m = Matcher::disabled();
        assert!(m.hot_path_hit(b"anything"));
        assert!(m.terminal_hit(b"anything"));
    }

    #[test]
    fn hot_path_is_substring_not_regex() {
        let m = Matcher::enabled("2..", false, false).unwrap();
        // Literal substring "2.." does not appear, even though the regex
        // "2.." would match "200" via the dot-wildcard.
        assert!(!m.hot_path_hit(b"HTTP/1.0 200 OK"));
        assert!(m.terminal_hit(b"HTTP/1.0 200 OK"));
    }

    #[test]
    fn case_insensitive_flag_applies_to_regex() {
        let m = Matcher::enabled("ok", true, false).unwrap();
        assert!(m.terminal_hit(b"ALL OK"));
        let m = Matcher::enabled("ok", false, false).unwrap();
        assert!(!m.terminal_hit(b"ALL OK"));
    }

    #[test]
    fn bad_pattern_is_an_error() {
        assert!(Matcher::enabled("(unclosed", false, false).is_err());
    }

    #[test]
    fn terminal_hit_respects_end_anchor() {
        // A trailing sentinel byte would make "OK$" fail to match the
        // true end of the response; there is none here to trip over.
        let m = Matcher::enabled("OK$", false, false).unwrap();
        assert!(m.terminal_hit(b"HTTP/1.0 200 OK"));
        assert!(!m.terminal_hit(b"HTTP/1.0 200 OK\nextra"));
    }
}
