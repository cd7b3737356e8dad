//! Topic pattern matching
//!
//! A pattern is a `/`-delimited list of segments. A segment that is exactly
//! `*` matches any single topic segment. A pattern whose last character is
//! `>` is a prefix: the rest of the pattern must match the start of the topic
//! and anything may follow, so `a/>` matches `a/b/c` and `a/b>` matches
//! `a/bc`. Any other `*` or `>` is literal.
//! Patterns are compiled once into a [`TopicPattern`] and reused for every
//! inbound message.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

impl Segment {
    fn accepts(&self, topic_segment: &str) -> bool {
        match self {
            Segment::Any => true,
            Segment::Literal(literal) => literal == topic_segment,
        }
    }

    fn accepts_prefix(&self, topic_segment: &str) -> bool {
        match self {
            Segment::Any => true,
            Segment::Literal(literal) => topic_segment.starts_with(literal.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
    /// The last segment is a prefix of the topic segment and anything may
    /// follow it.
    trailing: bool,
}

impl TopicPattern {
    pub fn new(pattern: &str) -> Self {
        let (body, trailing) = match pattern.strip_suffix('>') {
            Some(prefix) => (prefix, true),
            None => (pattern, false),
        };

        let segments = body
            .split('/')
            .map(|part| match part {
                "*" => Segment::Any,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();

        Self {
            raw: pattern.to_string(),
            segments,
            trailing,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.trailing || self.segments.contains(&Segment::Any)
    }

    pub fn matches(&self, topic: &str) -> bool {
        if self.raw.is_empty() || topic.is_empty() {
            return false;
        }

        let mut topic_segments = topic.split('/');
        let last = self.segments.len().saturating_sub(1);
        for (i, segment) in self.segments.iter().enumerate() {
            let Some(topic_segment) = topic_segments.next() else {
                return false;
            };
            let accepted = if self.trailing && i == last {
                segment.accepts_prefix(topic_segment)
            } else {
                segment.accepts(topic_segment)
            };
            if !accepted {
                return false;
            }
        }

        self.trailing || topic_segments.next().is_none()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Compiles `pattern` and tests it against `topic` in one go.
pub fn matches(pattern: &str, topic: &str) -> bool {
    TopicPattern::new(pattern).matches(topic)
}
