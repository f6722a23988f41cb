//! Request classification — map URL patterns to caching strategies.
//!
//! This module provides [`RouteTable`], an ordered list of [`RouteRule`]s. Three pattern
//! styles are supported, all matched against the URL *path* (query string and
//! fragment excluded):
//!
//! | Pattern                         | Example match           | Semantics               |
//! |---------------------------------|-------------------------|-------------------------|
//! | `prefix = "/assets/"`           | `/assets/logo.png`      | path starts with        |
//! | `extensions = ["css", "js"]`    | `/site.css`             | path ends with `.<ext>` |
//! | `regex = "^/blog/\\d+$"`         | `/blog/42`              | regex search in path    |
//!
//! Rules are evaluated in table order; the first rule whose pattern matches wins. The
//! order is a designed priority: `/assets/logo.png` is cache-first because the
//! `/assets/` prefix rule precedes the image-extension rule. When no rule matches, the
//! table's default strategy (network-first unless configured otherwise) applies.

use regex::Regex;
use thiserror::Error;

use crate::http::url_path;
use crate::strategy::Strategy;

/// Errors produced while compiling a route rule.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("route prefix must not be empty")]
    EmptyPrefix,
}

/// Compiled representation of a route pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches any path that starts with the given string, e.g. `/api/`.
    Prefix(String),
    /// Matches any path ending in `.` followed by one of the listed extensions.
    Extensions(Vec<String>),
    /// Matches any path in which the regex finds a match, e.g. `^/blog/\d+$`.
    Regex(Regex),
}

impl Pattern {
    /// Builds a prefix pattern.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::EmptyPrefix`] for `""`, which would shadow every later rule.
    pub fn prefix(prefix: impl Into<String>) -> Result<Self, RouteError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(RouteError::EmptyPrefix);
        }
        Ok(Self::Prefix(prefix))
    }

    /// Builds an extension pattern. Leading dots are stripped, so `".css"` and
    /// `"css"` are equivalent.
    pub fn extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Extensions(
            extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_owned())
                .filter(|e| !e.is_empty())
                .collect(),
        )
    }

    /// Compiles a regex pattern.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidRegex`] if `pattern` is not valid [`regex`] syntax.
    pub fn regex(pattern: &str) -> Result<Self, RouteError> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|source| RouteError::InvalidRegex {
                pattern: pattern.to_owned(),
                source,
            })
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Pattern::Extensions(exts) => path
                .rsplit_once('.')
                .filter(|(_, ext)| !ext.contains('/'))
                .is_some_and(|(_, ext)| exts.iter().any(|e| e == ext)),
            Pattern::Regex(re) => re.is_match(path),
        }
    }

    /// Returns the pattern source for display.
    pub fn describe(&self) -> String {
        match self {
            Pattern::Prefix(prefix) => prefix.clone(),
            Pattern::Extensions(exts) => format!(".{}", exts.join("|.")),
            Pattern::Regex(re) => re.as_str().to_owned(),
        }
    }

    /// Returns `"prefix"`, `"extensions"`, or `"regex"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Pattern::Prefix(_) => "prefix",
            Pattern::Extensions(_) => "extensions",
            Pattern::Regex(_) => "regex",
        }
    }
}

/// A single (pattern, strategy) pair.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pattern: Pattern,
    strategy: Strategy,
}

impl RouteRule {
    pub fn new(pattern: Pattern, strategy: Strategy) -> Self {
        Self { pattern, strategy }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
}

/// Ordered route table that picks exactly one [`Strategy`] per URL.
///
/// # Examples
///
/// ```rust
/// use cacheroute::router::RouteTable;
/// use cacheroute::strategy::Strategy;
///
/// let table = RouteTable::builtin();
/// assert_eq!(table.classify("/assets/logo.png"), Strategy::CacheFirst);
/// assert_eq!(table.classify("http://localhost/api/contact"), Strategy::NetworkFirst);
/// assert_eq!(table.classify("/img/hero.webp"), Strategy::StaleWhileRevalidate);
/// assert_eq!(table.classify("/about"), Strategy::NetworkFirst);
/// ```
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
    default: Strategy,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RouteTable {
    /// Create an empty table that answers `default` for every URL.
    pub fn new(default: Strategy) -> Self {
        Self {
            rules: Vec::new(),
            default,
        }
    }

    /// The stock portfolio-site table:
    ///
    /// 1. `/assets/` prefix → cache-first
    /// 2. `/api/` prefix → network-first
    /// 3. images (`jpg jpeg png gif webp svg`) → stale-while-revalidate
    /// 4. fonts (`woff woff2 ttf eot`) → cache-first
    /// 5. stylesheets and scripts (`css js`) → stale-while-revalidate
    ///
    /// Anything else → network-first.
    pub fn builtin() -> Self {
        let rules = [
            (Pattern::Prefix("/assets/".to_owned()), Strategy::CacheFirst),
            (Pattern::Prefix("/api/".to_owned()), Strategy::NetworkFirst),
            (
                Pattern::extensions(["jpg", "jpeg", "png", "gif", "webp", "svg"]),
                Strategy::StaleWhileRevalidate,
            ),
            (
                Pattern::extensions(["woff", "woff2", "ttf", "eot"]),
                Strategy::CacheFirst,
            ),
            (Pattern::extensions(["css", "js"]), Strategy::StaleWhileRevalidate),
        ];

        let mut table = Self::new(Strategy::NetworkFirst);
        for (pattern, strategy) in rules {
            table.push(RouteRule::new(pattern, strategy));
        }
        table
    }

    /// Appends a rule at the lowest priority.
    pub fn push(&mut self, rule: RouteRule) {
        self.rules.push(rule);
    }

    /// Returns the strategy used when no rule matches.
    pub fn default_strategy(&self) -> Strategy {
        self.default
    }

    /// Returns the rules in priority order.
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Return the number of rules in this table.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Return `true` if the table has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Pick the strategy for `url`, which may be absolute or a bare path.
    pub fn classify(&self, url: &str) -> Strategy {
        let path = url_path(url);
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(path))
            .map_or(self.default, |rule| rule.strategy)
    }
}
