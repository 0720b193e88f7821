//! Element configuration arguments.
//!
//! The router hands each element its configuration as an opaque string; this
//! module gives elements a common way to resolve it. The format is a
//! comma-separated argument list where each argument is either positional or
//! an upper-case `KEYWORD value` pair:
//!
//! ```text
//! 14
//! LENGTH 64, LIMIT 3, ACTIVE true
//! ```
//!
//! The textual router description language itself is out of scope; whatever
//! parses it produces these per-element strings.

use std::str::FromStr;

use crate::error::ErrorSink;

/// Parsed configuration arguments for one element.
#[derive(Debug, Clone, Default)]
pub struct Config {
    positional: Vec<String>,
    keywords: Vec<(String, String)>,
}

fn is_keyword(word: &str) -> bool {
    !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && word.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

impl Config {
    /// An empty argument list.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Split a configuration string into positional and keyword arguments.
    pub fn parse(s: &str) -> Self {
        let mut cfg = Config::default();
        for arg in s.split(',') {
            let arg = arg.trim();
            if arg.is_empty() {
                continue;
            }
            match arg.split_once(char::is_whitespace) {
                Some((head, rest)) if is_keyword(head) => {
                    cfg.keywords.push((head.to_string(), rest.trim().to_string()));
                }
                _ => cfg.positional.push(arg.to_string()),
            }
        }
        cfg
    }

    /// Number of positional arguments.
    pub fn len(&self) -> usize {
        self.positional.len()
    }

    /// True if there are no arguments at all.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    /// The `i`th positional argument, verbatim.
    pub fn arg(&self, i: usize) -> Option<&str> {
        self.positional.get(i).map(|s| s.as_str())
    }

    /// The raw value of a keyword argument.
    pub fn keyword_str(&self, keyword: &str) -> Option<&str> {
        self.keywords
            .iter()
            .find(|(k, _)| k == keyword)
            .map(|(_, v)| v.as_str())
    }

    /// Parse a required positional argument. Records an error and returns
    /// `None` when absent or malformed.
    pub fn require<T: FromStr>(&self, i: usize, name: &str, errh: &mut ErrorSink) -> Option<T> {
        match self.arg(i) {
            None => {
                errh.error(format!("missing required argument {name}"));
                None
            }
            Some(raw) => match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    errh.error(format!("argument {name}: cannot parse '{raw}'"));
                    None
                }
            },
        }
    }

    /// Parse an optional keyword argument, falling back to `default` when the
    /// keyword is absent. Records an error on a malformed value.
    pub fn keyword_or<T: FromStr>(&self, keyword: &str, default: T, errh: &mut ErrorSink) -> T {
        match self.keyword_str(keyword) {
            None => default,
            Some(raw) => match raw.parse() {
                Ok(v) => v,
                Err(_) => {
                    errh.error(format!("keyword {keyword}: cannot parse '{raw}'"));
                    default
                }
            },
        }
    }

    /// Parse an optional keyword argument.
    pub fn keyword<T: FromStr>(&self, keyword: &str, errh: &mut ErrorSink) -> Option<T> {
        match self.keyword_str(keyword) {
            None => None,
            Some(raw) => match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    errh.error(format!("keyword {keyword}: cannot parse '{raw}'"));
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positional_and_keywords() {
        let cfg = Config::parse("14, LENGTH 64, LIMIT 3");
        assert_eq!(cfg.len(), 1);
        assert_eq!(cfg.arg(0), Some("14"));
        assert_eq!(cfg.keyword_str("LENGTH"), Some("64"));
        assert_eq!(cfg.keyword_str("LIMIT"), Some("3"));
        assert_eq!(cfg.keyword_str("ACTIVE"), None);
    }

    #[test]
    fn test_empty_string_has_no_args() {
        let cfg = Config::parse("   ");
        assert!(cfg.is_empty());
    }

    #[test]
    fn test_typed_getters() {
        let mut errh = ErrorSink::new();
        let cfg = Config::parse("20, ACTIVE true, BURST 8");
        assert_eq!(cfg.require::<usize>(0, "LENGTH", &mut errh), Some(20));
        assert!(cfg.keyword_or::<bool>("ACTIVE", false, &mut errh));
        assert_eq!(cfg.keyword_or::<u32>("BURST", 1, &mut errh), 8);
        assert_eq!(cfg.keyword_or::<u32>("MISSING", 7, &mut errh), 7);
        assert_eq!(errh.nerrors(), 0);
    }

    #[test]
    fn test_malformed_values_record_errors() {
        let mut errh = ErrorSink::new();
        let cfg = Config::parse("LENGTH banana");
        assert_eq!(cfg.keyword_or::<usize>("LENGTH", 5, &mut errh), 5);
        assert_eq!(cfg.require::<usize>(0, "N", &mut errh), None);
        assert_eq!(errh.nerrors(), 2);
    }

    #[test]
    fn test_lowercase_word_is_positional() {
        let cfg = Config::parse("foo bar");
        assert_eq!(cfg.arg(0), Some("foo bar"));
        assert!(cfg.keyword_str("foo").is_none());
    }
}
