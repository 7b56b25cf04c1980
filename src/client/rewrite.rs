//! URL rewriting applied before origin selection.

use http::Uri;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::ProxyRequest;

/// Configuration form of a rewrite rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteConfig {
    pub url_pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Group(usize),
}

/// Rewrites URLs matching a pattern.
///
/// The pattern must match the whole path and query. The replacement may
/// refer to captured groups as `$1`, `$2`...; groups that did not take part
/// in the match expand to nothing.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pattern: Regex,
    replacement: Vec<Segment>,
}

impl RewriteRule {
    pub fn new(url_pattern: &str, replacement: &str) -> Result<Self, ConfigError> {
        let pattern = Regex::new(&format!("^(?:{url_pattern})$")).map_err(|source| {
            ConfigError::InvalidRewrite {
                pattern: url_pattern.to_string(),
                source,
            }
        })?;
        Ok(Self {
            pattern,
            replacement: parse_replacement(replacement),
        })
    }

    pub fn rewrite(&self, url: &str) -> Option<String> {
        let captures = self.pattern.captures(url)?;
        Some(self.substitute(&captures))
    }

    fn substitute(&self, captures: &Captures<'_>) -> String {
        let mut out = String::new();
        for segment in &self.replacement {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Group(n) => {
                    if let Some(group) = captures.get(*n) {
                        out.push_str(group.as_str());
                    }
                }
            }
        }
        out
    }
}

impl TryFrom<&RewriteConfig> for RewriteRule {
    type Error = ConfigError;

    fn try_from(config: &RewriteConfig) -> Result<Self, Self::Error> {
        RewriteRule::new(&config.url_pattern, &config.replacement)
    }
}

fn parse_replacement(replacement: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = replacement.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek().is_some_and(|next| next.is_ascii_digit()) {
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            // Digit runs too long for usize name a group that cannot exist.
            segments.push(Segment::Group(digits.parse().unwrap_or(usize::MAX)));
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Ordered rewrite rules; the first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct RewriteRuleset {
    rules: Vec<RewriteRule>,
}

impl RewriteRuleset {
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(configs: &[RewriteConfig]) -> Result<Self, ConfigError> {
        let rules = configs
            .iter()
            .map(RewriteRule::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rewrite_url(&self, url: &str) -> Option<String> {
        self.rules.iter().find_map(|rule| rule.rewrite(url))
    }

    /// Rewrites the request target. Requests that match no rule pass unchanged.
    pub fn apply(&self, mut request: ProxyRequest) -> ProxyRequest {
        let Some(url) = request.uri().path_and_query().map(|pq| pq.as_str().to_string()) else {
            return request;
        };
        let Some(rewritten) = self.rewrite_url(&url) else {
            return request;
        };

        let mut parts = request.uri().clone().into_parts();
        match rewritten.parse() {
            Ok(path_and_query) => {
                parts.path_and_query = Some(path_and_query);
                match Uri::from_parts(parts) {
                    Ok(uri) => *request.uri_mut() = uri,
                    Err(e) => tracing::warn!(url = %rewritten, error = %e, "rewritten url rejected"),
                }
            }
            Err(e) => tracing::warn!(url = %rewritten, error = %e, "rewritten url rejected"),
        }
        request
    }
}
