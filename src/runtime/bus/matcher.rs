// src/runtime/bus/matcher.rs
//! Topic pattern matching rules.
//!
//! A pattern without `*` always requires exact equality with the topic; the
//! matchers only differ in how wildcard patterns are interpreted.
use std::fmt;

pub const WILDCARD: char = '*';

pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains(WILDCARD)
}

pub trait TopicMatcher: Send + Sync + fmt::Debug {
    fn matches(&self, pattern: &str, topic: &str) -> bool;

    fn name(&self) -> &'static str;
}

/// Each non-empty piece between `*`s must occur in the topic as a substring,
/// in order. Pieces are not anchored and need not align with dot segments,
/// so `alert.*` matches `xalertyz`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringMatcher;

impl TopicMatcher for SubstringMatcher {
    fn matches(&self, pattern: &str, topic: &str) -> bool {
        substring_match(pattern, topic)
    }

    fn name(&self) -> &'static str {
        "substring"
    }
}

pub fn substring_match(pattern: &str, topic: &str) -> bool {
    if !is_wildcard(pattern) {
        return pattern == topic;
    }
    let mut rest = topic;
    for piece in pattern.split(WILDCARD) {
        let piece = piece.trim_matches('.');
        if piece.is_empty() {
            continue;
        }
        match rest.find(piece) {
            Some(at) => rest = &rest[at + piece.len()..],
            None => return false,
        }
    }
    true
}

/// Anchored, segment-aware matching: a `*` segment matches exactly one topic
/// segment, except in last position where it matches one or more.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentMatcher;

impl TopicMatcher for SegmentMatcher {
    fn matches(&self, pattern: &str, topic: &str) -> bool {
        if !is_wildcard(pattern) {
            return pattern == topic;
        }
        let pattern: Vec<&str> = pattern.split('.').collect();
        let topic: Vec<&str> = topic.split('.').collect();
        for (i, segment) in pattern.iter().enumerate() {
            let last = i + 1 == pattern.len();
            match (*segment, topic.get(i)) {
                (_, None) => return false,
                ("*", Some(_)) if last => return true,
                ("*", Some(_)) => {}
                (s, Some(t)) if s == *t => {}
                _ => return false,
            }
        }
        pattern.len() == topic.len()
    }

    fn name(&self) -> &'static str {
        "segment"
    }
}
