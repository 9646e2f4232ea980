// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rules deciding which lines of line protocol the writer keeps.
//!
//! Rules are configured as JSON, for example from `SPOUT_RULES`:
//!
//! ```json
//! [
//!   {"type": "basic", "match": "cpu"},
//!   {"type": "regex", "match": "host=web-\\d+"},
//!   {"type": "negregex", "match": "^debug_"}
//! ]
//! ```
//!
//! A line is accepted when any rule accepts it. An empty rule set disables filtering
//! altogether.

use regex::bytes::Regex;
use serde::Deserialize;

use crate::errors::RuleError;

/// Decides whether a single line is kept.
pub trait RuleMatcher: Send + Sync {
    fn accept(&self, line: &[u8]) -> bool;

    /// Zero means filtering is disabled and payloads are written untouched.
    fn rule_count(&self) -> usize;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Measurement name equals `match` exactly.
    Basic,
    /// Line matches the regular expression.
    Regex,
    /// Line does not match the regular expression.
    Negregex,
}

/// A rule as it appears in configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RuleConfig {
    #[serde(rename = "type")]
    pub kind: Kind,
    #[serde(rename = "match")]
    pub pattern: String,
}

#[derive(Debug)]
enum Rule {
    Basic(Vec<u8>),
    Regex(Regex),
    NegRegex(Regex),
}

impl Rule {
    fn compile(index: usize, config: &RuleConfig) -> Result<Self, RuleError> {
        if config.pattern.is_empty() {
            return Err(RuleError::EmptyMatch { index });
        }
        let regex = || {
            Regex::new(&config.pattern).map_err(|source| RuleError::InvalidRegex {
                index,
                pattern: config.pattern.clone(),
                source,
            })
        };
        Ok(match config.kind {
            Kind::Basic => Rule::Basic(config.pattern.as_bytes().to_vec()),
            Kind::Regex => Rule::Regex(regex()?),
            Kind::Negregex => Rule::NegRegex(regex()?),
        })
    }

    fn matches(&self, line: &[u8]) -> bool {
        match self {
            Rule::Basic(name) => measurement(line) == name.as_slice(),
            Rule::Regex(re) => re.is_match(line),
            Rule::NegRegex(re) => !re.is_match(line),
        }
    }
}

/// Compiled, ordered rules.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_config(configs: &[RuleConfig]) -> Result<Self, RuleError> {
        let rules = configs
            .iter()
            .enumerate()
            .map(|(index, config)| Rule::compile(index, config))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Index of the first rule accepting `line`.
    #[must_use]
    pub fn lookup(&self, line: &[u8]) -> Option<usize> {
        self.rules.iter().position(|rule| rule.matches(line))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleMatcher for RuleSet {
    fn accept(&self, line: &[u8]) -> bool {
        self.lookup(line).is_some()
    }

    fn rule_count(&self) -> usize {
        self.len()
    }
}

/// Measurement name of a line protocol line: everything up to the first unescaped
/// comma or space.
fn measurement(line: &[u8]) -> &[u8] {
    let mut escaped = false;
    for (i, &b) in line.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b',' | b' ' => return &line[..i],
            _ => {}
        }
    }
    line
}
