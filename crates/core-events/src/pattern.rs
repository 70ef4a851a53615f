//! Topic subscription grammar.
//!
//! Three pattern forms, nothing more:
//! - exact match: `"console:input"` matches only that topic;
//! - prefix wildcard: `"element:*"` matches any topic starting `element:`;
//! - lone `*`: matches every topic.
//!
//! The `*` is only meaningful as the final character; an embedded `*` is
//! treated literally.

/// Returns true when `pattern` matches `topic` under the subscription grammar.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return topic.starts_with(prefix);
    }
    pattern == topic
}

/// Returns true when any pattern in `patterns` matches `topic`.
pub fn any_topic_matches<'a, I>(patterns: I, topic: &str) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    patterns.into_iter().any(|p| topic_matches(p, topic))
}
