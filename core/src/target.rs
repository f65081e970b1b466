//! Request target construction.
//!
//! The final URL is built in two steps. [`build_target`] appends the
//! serialized payload, the callback parameter placeholder and the optional
//! cache-busting nonce; [`RequestTarget::resolve`] then substitutes the
//! callback name into the placeholder. Keeping the unresolved form around
//! lets the runtime derive both the cache key (logical callback name) and the
//! wire URL (possibly a unique per-request callback name) from one build.

use std::fmt;

/// Placeholder the callback name is substituted into
const PLACEHOLDER: &str = "=?";

/// Name of the cache-busting query parameter
pub const NONCE_PARAMETER: &str = "_";

/// Payload sent along with the request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestData {
    /// No payload
    #[default]
    Empty,
    /// Pre-serialized query string, used verbatim
    Text(String),
    /// Key/value pairs, percent-encoded and joined in insertion order
    Pairs(Vec<(String, String)>),
}

impl RequestData {
    /// Build key/value data from any iterator of pairs
    ///
    /// # Example
    ///
    /// ```
    /// use jsonp_core::target::RequestData;
    ///
    /// let data = RequestData::pairs([("q", "rust lang"), ("page", "2")]);
    /// assert_eq!(data.serialize(), "q=rust%20lang&page=2");
    /// ```
    #[must_use]
    pub fn pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        Self::Pairs(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.to_string()))
                .collect(),
        )
    }

    /// Serialize into a query string fragment (without leading joiner)
    #[must_use]
    pub fn serialize(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(text) => text.clone(),
            Self::Pairs(pairs) => pairs
                .iter()
                .map(|(key, value)| {
                    format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
                })
                .collect::<Vec<_>>()
                .join("&"),
        }
    }

    /// Whether serialization yields nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.is_empty(),
            Self::Pairs(pairs) => pairs.is_empty(),
        }
    }
}

impl From<&str> for RequestData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for RequestData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// A built request target whose callback placeholder may still be open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    unresolved: String,
}

impl RequestTarget {
    /// Wrap an already built URL
    #[must_use]
    pub fn new(unresolved: impl Into<String>) -> Self {
        Self {
            unresolved: unresolved.into(),
        }
    }

    /// The URL before callback substitution
    #[must_use]
    pub fn unresolved(&self) -> &str {
        &self.unresolved
    }

    /// Whether [`resolve`](Self::resolve) would substitute a callback name
    #[must_use]
    pub fn has_placeholder(&self) -> bool {
        self.placeholder_at().is_some()
    }

    /// Substitute `callback` into the last `=?` that ends the URL or precedes `&`
    ///
    /// Without a placeholder the URL is returned unchanged; the endpoint is
    /// then expected to know the callback name by convention.
    #[must_use]
    pub fn resolve(&self, callback: &str) -> String {
        let Some(index) = self.placeholder_at() else {
            return self.unresolved.clone();
        };

        let tail = &self.unresolved[index + PLACEHOLDER.len()..];
        let mut url = String::with_capacity(self.unresolved.len() + callback.len());
        url.push_str(&self.unresolved[..index]);
        url.push('=');
        url.push_str(callback);
        url.push_str(tail);
        url
    }

    fn placeholder_at(&self) -> Option<usize> {
        self.unresolved
            .match_indices(PLACEHOLDER)
            .map(|(index, _)| index)
            .filter(|index| {
                let rest = &self.unresolved[index + PLACEHOLDER.len()..];
                rest.is_empty() || rest.starts_with('&')
            })
            .last()
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unresolved)
    }
}

/// Joiner for appending a parameter to `url`
#[must_use]
pub fn joiner(url: &str) -> char {
    if url.contains('?') { '&' } else { '?' }
}

/// Build a request target
///
/// # Arguments
///
/// - `base`: Target URL, passed through even when malformed
/// - `data`: Payload to append
/// - `callback_parameter`: Query parameter the endpoint reads the callback name from
/// - `nonce`: Cache-busting value, `None` when caching is enabled
#[must_use]
pub fn build_target(
    base: &str,
    data: &RequestData,
    callback_parameter: Option<&str>,
    nonce: Option<i64>,
) -> RequestTarget {
    let mut url = base.to_string();

    let serialized = data.serialize();
    if !serialized.is_empty() {
        url.push(joiner(&url));
        url.push_str(&serialized);
    }

    if let Some(parameter) = callback_parameter {
        url.push(joiner(&url));
        url.push_str(&urlencoding::encode(parameter));
        url.push_str(PLACEHOLDER);
    }

    if let Some(nonce) = nonce {
        url.push(joiner(&url));
        url.push_str(NONCE_PARAMETER);
        url.push('=');
        url.push_str(&nonce.to_string());
    }

    RequestTarget::new(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn builds_pairs_callback_and_nonce() {
        let data = RequestData::pairs([("a", 1), ("b", 2)]);
        let target = build_target("http://x", &data, Some("cb"), Some(1_700_000_000_000));
        let url = target.resolve("foo");

        assert!(url.contains("a=1&b=2"));
        assert!(url.contains("cb=foo"));
        assert!(!url.contains("cb=?"));
        assert!(url.ends_with("&_=1700000000000"));
    }

    #[test]
    fn no_nonce_when_caching() {
        let data = RequestData::pairs([("a", 1), ("b", 2)]);
        let url = build_target("http://x", &data, Some("cb"), None).resolve("foo");
        assert_eq!(url, "http://x?a=1&b=2&cb=foo");
    }

    #[test]
    fn existing_query_uses_ampersand() {
        let url = build_target("http://x/api?v=2", &"q=1".into(), None, None).resolve("cb");
        assert_eq!(url, "http://x/api?v=2&q=1");
    }

    #[test]
    fn empty_payload_is_skipped() {
        let url = build_target("http://x", &RequestData::Empty, Some("callback"), None)
            .resolve("_jsonp");
        assert_eq!(url, "http://x?callback=_jsonp");
    }

    #[test]
    fn placeholder_in_caller_url_is_resolved() {
        let target = build_target("http://x?callback=?", &RequestData::Empty, None, Some(5));
        assert!(target.has_placeholder());
        assert_eq!(target.resolve("f"), "http://x?callback=f&_=5");
    }

    #[test]
    fn last_placeholder_wins() {
        let target = RequestTarget::new("http://x?a=?&b=?");
        assert_eq!(target.resolve("f"), "http://x?a=?&b=f");
    }

    #[test]
    fn placeholder_must_end_a_parameter() {
        let target = RequestTarget::new("http://x?a=?b");
        assert!(!target.has_placeholder());
        assert_eq!(target.resolve("f"), "http://x?a=?b");
    }

    #[test]
    fn without_callback_parameter_resolution_is_noop() {
        let target = build_target("http://x/feed.js", &RequestData::Empty, None, None);
        assert!(!target.has_placeholder());
        assert_eq!(target.resolve("anything"), "http://x/feed.js");
    }

    #[test]
    fn keys_and_values_are_percent_encoded() {
        let data = RequestData::pairs([("a b", "c&d")]);
        assert_eq!(data.serialize(), "a%20b=c%26d");
    }

    #[test]
    fn text_payload_is_verbatim() {
        let data = RequestData::from("x=%41&y");
        assert_eq!(data.serialize(), "x=%41&y");
    }

    proptest! {
        #[test]
        fn resolved_target_carries_callback_and_nonce_iff_requested(
            keys in proptest::collection::vec("[a-z]{1,6}", 0..4),
            callback in "[A-Za-z_][A-Za-z0-9_]{0,10}",
            nonce in proptest::option::of(0i64..i64::MAX),
        ) {
            let data = RequestData::pairs(keys.iter().map(|k| (k.clone(), k.len())));
            let target = build_target("http://host/path", &data, Some("cb"), nonce);
            let url = target.resolve(&callback);
            let expected_callback = format!("cb={callback}");

            prop_assert!(url.contains(&expected_callback));
            prop_assert!(!url.contains("=?"));
            prop_assert_eq!(url.contains("&_="), nonce.is_some());
            prop_assert_eq!(url.matches('?').count(), 1);
        }
    }
}
