//! Per-rule match counters.

use std::collections::HashMap;

use super::MatchRule;

/// Match count of one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleStat {
    pub rule: String,
    pub matches: u64,
}

/// Counts how often each rule decided a path.
#[derive(Debug, Default)]
pub struct RuleStats {
    enabled: bool,
    order: Vec<(String, usize, String)>,
    counts: HashMap<(String, usize), u64>,
}

impl RuleStats {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Register every rule so unused ones show up in the report.
    pub fn register<'a>(&mut self, rules: impl IntoIterator<Item = &'a MatchRule>) {
        if !self.enabled {
            return;
        }
        for rule in rules {
            let key = (rule.file.clone(), rule.line);
            if !self.counts.contains_key(&key) {
                self.counts.insert(key, 0);
                self.order.push((rule.file.clone(), rule.line, rule.info()));
            }
        }
    }

    pub fn record(&mut self, rule: &MatchRule) {
        if !self.enabled {
            return;
        }
        *self.counts.entry((rule.file.clone(), rule.line)).or_insert(0) += 1;
    }

    /// Counts in declaration order.
    pub fn report(&self) -> Vec<RuleStat> {
        self.order
            .iter()
            .map(|(file, line, info)| RuleStat {
                rule: info.clone(),
                matches: self.counts.get(&(file.clone(), *line)).copied().unwrap_or(0),
            })
            .collect()
    }

    /// Rules that never matched anything.
    pub fn unused(&self) -> Vec<String> {
        self.report()
            .into_iter()
            .filter(|stat| stat.matches == 0)
            .map(|stat| stat.rule)
            .collect()
    }
}
