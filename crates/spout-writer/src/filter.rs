// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Applies a [`RuleMatcher`] to each line of a raw bus message.

use std::sync::Arc;

use crate::rules::RuleMatcher;

/// Splits messages into lines and keeps the ones the rules accept.
#[derive(Clone)]
pub struct LineFilter {
    rules: Arc<dyn RuleMatcher>,
}

impl LineFilter {
    pub fn new(rules: Arc<dyn RuleMatcher>) -> Self {
        Self { rules }
    }

    /// Whether payloads are split at all. Without rules the payload is passed on
    /// untouched as a single unit, saving a scan over every message.
    #[must_use]
    pub fn is_bypassed(&self) -> bool {
        self.rules.rule_count() == 0
    }

    /// Accepted lines of `payload` in their original order. Each line keeps its
    /// trailing `\n` so that concatenating the output needs no separators.
    pub fn lines<'a>(&'a self, payload: &'a [u8]) -> Box<dyn Iterator<Item = &'a [u8]> + 'a> {
        if self.is_bypassed() {
            return Box::new(std::iter::once(payload));
        }
        Box::new(
            payload
                .split_inclusive(|&b| b == b'\n')
                .filter(move |line| !line.is_empty() && self.rules.accept(line)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Kind, RuleConfig, RuleSet};

    fn filter_for(patterns: &[&str]) -> LineFilter {
        let configs: Vec<RuleConfig> = patterns
            .iter()
            .map(|p| RuleConfig {
                kind: Kind::Basic,
                pattern: p.to_string(),
            })
            .collect();
        #[allow(clippy::unwrap_used)]
        LineFilter::new(Arc::new(RuleSet::from_config(&configs).unwrap()))
    }

    #[test]
    fn test_keeps_accepted_lines_in_order() {
        let filter = filter_for(&["cpu", "disk"]);
        let payload = b"cpu value=1\nmem value=2\ndisk value=3\ncpu value=4\n";

        let lines: Vec<&[u8]> = filter.lines(payload).collect();
        assert_eq!(
            lines,
            vec![
                &b"cpu value=1\n"[..],
                &b"disk value=3\n"[..],
                &b"cpu value=4\n"[..],
            ]
        );
    }

    #[test]
    fn test_final_line_without_newline() {
        let filter = filter_for(&["cpu"]);
        let lines: Vec<&[u8]> = filter.lines(b"mem value=2\ncpu value=1").collect();
        assert_eq!(lines, vec![&b"cpu value=1"[..]]);
    }

    #[test]
    fn test_never_yields_empty_fragments() {
        let filter = LineFilter::new(Arc::new(AcceptAll));
        let lines: Vec<&[u8]> = filter.lines(b"a\n\nb\n").collect();
        assert_eq!(lines, vec![&b"a\n"[..], &b"\n"[..], &b"b\n"[..]]);
        assert_eq!(filter.lines(b"").count(), 0);
    }

    #[test]
    fn test_no_rules_passes_payload_through() {
        let filter = LineFilter::new(Arc::new(RuleSet::default()));
        assert!(filter.is_bypassed());

        let payload = b"cpu value=1\nmem value=2\n";
        let lines: Vec<&[u8]> = filter.lines(payload).collect();
        assert_eq!(lines, vec![&payload[..]]);
    }

    struct AcceptAll;

    impl RuleMatcher for AcceptAll {
        fn accept(&self, _line: &[u8]) -> bool {
            true
        }

        fn rule_count(&self) -> usize {
            1
        }
    }
}
