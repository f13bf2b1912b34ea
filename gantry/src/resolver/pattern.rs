//! Index expression parsing
//!
//! An index expression is either a concrete name (`logs`) or a pattern: a
//! comma separated list (`logs,metrics`) and/or names containing `*`.

use regex::Regex;

use super::decision::Decision;
use crate::error::ResolveError;

/// Prefix of Elasticsearch/Kibana internal indices.
pub const INTERNAL_PREFIX: &str = ".";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPattern {
    pub source: String,
    pub is_pattern: bool,
    pub parts: Vec<String>,
}

impl ParsedPattern {
    pub fn parse(source: &str) -> Self {
        let parts: Vec<String> = source
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
        let is_pattern = parts.len() > 1 || source.contains('*');
        Self {
            source: source.to_string(),
            is_pattern,
            parts,
        }
    }

    /// A single part re-parsed on its own.
    pub fn single(part: &str) -> Self {
        Self {
            source: part.to_string(),
            is_pattern: part.contains('*'),
            parts: vec![part.to_string()],
        }
    }

    /// The concrete name, when this is not a pattern.
    pub fn name(&self) -> Option<&str> {
        if self.is_pattern {
            None
        } else {
            self.parts.first().map(String::as_str)
        }
    }
}

pub fn is_internal_index(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX)
}

/// Matches index names against a wildcard pattern (`*` = any characters).
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    regex: Option<Regex>,
}

impl GlobMatcher {
    pub fn new(pattern: &str) -> Self {
        let body: Vec<String> = pattern.split('*').map(regex::escape).collect();
        let source = format!("^{}$", body.join(".*"));
        Self {
            regex: Regex::new(&source).ok(),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(name),
            None => false,
        }
    }
}

/// Turns an index expression into the parts the rule ladder evaluates.
pub trait PatternSplitter: Send + Sync {
    fn split(&self, pattern: &str) -> Result<Vec<ParsedPattern>, Decision>;
}

/// Ingest always targets one concrete index.
pub struct SingleIndexSplitter;

impl PatternSplitter for SingleIndexSplitter {
    fn split(&self, pattern: &str) -> Result<Vec<ParsedPattern>, Decision> {
        let parsed = ParsedPattern::parse(pattern);
        if parsed.is_pattern {
            return Err(Decision::error(
                ResolveError::PatternNotAllowed(pattern.to_string()),
                "Pattern is not allowed.",
            ));
        }
        Ok(vec![parsed])
    }
}

/// Query expressions are evaluated part by part; wildcard parts are
/// matched against the inventory by the rules themselves.
pub struct WildcardSplitter;

impl PatternSplitter for WildcardSplitter {
    fn split(&self, pattern: &str) -> Result<Vec<ParsedPattern>, Decision> {
        let parsed = ParsedPattern::parse(pattern);
        let mut seen = Vec::with_capacity(parsed.parts.len());
        for part in parsed.parts {
            if !seen.contains(&part) {
                seen.push(part);
            }
        }
        Ok(seen.iter().map(|p| ParsedPattern::single(p)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_concrete() {
        let p = ParsedPattern::parse("logs");
        assert!(!p.is_pattern);
        assert_eq!(p.name(), Some("logs"));
    }

    #[test]
    fn test_parse_comma_and_wildcard() {
        let p = ParsedPattern::parse("logs, metrics");
        assert!(p.is_pattern);
        assert_eq!(p.parts, vec!["logs", "metrics"]);
        assert_eq!(p.name(), None);

        assert!(ParsedPattern::parse("logs-*").is_pattern);
    }

    #[test]
    fn test_glob_matcher() {
        assert!(GlobMatcher::new("logs-*").matches("logs-2026.01.29"));
        assert!(GlobMatcher::new("logs-*").matches("logs-"));
        assert!(!GlobMatcher::new("logs-*").matches("log-2026"));
        assert!(GlobMatcher::new("*-logs").matches("my-logs"));
        assert!(GlobMatcher::new("*").matches("anything"));
        // regex metacharacters are literal
        assert!(GlobMatcher::new("a.b*").matches("a.bc"));
        assert!(!GlobMatcher::new("a.b*").matches("axbc"));
    }

    #[test]
    fn test_ingest_splitter_rejects_patterns() {
        let decision = SingleIndexSplitter.split("logs-*").unwrap_err();
        assert_eq!(
            decision.err,
            Some(ResolveError::PatternNotAllowed("logs-*".into()))
        );
        assert!(SingleIndexSplitter.split("a,b").is_err());
        assert_eq!(SingleIndexSplitter.split("logs").unwrap().len(), 1);
    }

    #[test]
    fn test_wildcard_splitter_dedups_parts() {
        let parts = WildcardSplitter.split("a*,b,a*").unwrap();
        let sources: Vec<&str> = parts.iter().map(|p| p.source.as_str()).collect();
        assert_eq!(sources, vec!["a*", "b"]);
        assert!(parts[0].is_pattern);
        assert!(!parts[1].is_pattern);
    }

    #[test]
    fn test_internal_index() {
        assert!(is_internal_index(".kibana"));
        assert!(!is_internal_index("kibana"));
    }
}
