//! Rule store: rules indexed by name and arity, plus the source units they
//! were loaded from.

use std::{collections::HashMap, sync::Arc};

use log::debug;

use crate::rules::Rule;

type RuleKey = (String, usize);

#[derive(Debug, Default)]
pub struct KnowledgeBase {
    rules: HashMap<RuleKey, Vec<Arc<Rule>>>,
    /// Source id → filename for file-backed units.
    sources: HashMap<u64, Option<String>>,
    next_source_id: u64,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Rule) {
        let key = (rule.name.clone(), rule.arity());
        self.rules.entry(key).or_default().push(Arc::new(rule));
    }

    /// Drops every rule and every source.
    pub fn clear(&mut self) {
        debug!("clearing {} rule sets", self.rules.len());
        self.rules.clear();
        self.sources.clear();
    }

    /// Alternative set for `name/arity` in load order. Unknown names yield an
    /// empty set.
    pub fn lookup(&self, name: &str, arity: usize) -> Vec<Arc<Rule>> {
        self.rules
            .get(&(name.to_string(), arity))
            .cloned()
            .unwrap_or_default()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Registers a new source unit and returns its id.
    pub fn add_source(&mut self, filename: Option<&str>) -> u64 {
        let id = self.next_source_id;
        self.next_source_id += 1;
        self.sources.insert(id, filename.map(str::to_string));
        id
    }

    /// Removes a source unit and every rule it contributed.
    pub fn remove_source(&mut self, id: u64) {
        self.sources.remove(&id);
        self.rules.retain(|_, alternatives| {
            alternatives.retain(|r| r.source != Some(id));
            !alternatives.is_empty()
        });
    }

    /// Takes out whatever a file previously contributed, if it was loaded.
    /// The rules can be put back with [`KnowledgeBase::restore`].
    pub fn detach_file(&mut self, filename: &str) -> Option<Detached> {
        let id = self
            .sources
            .iter()
            .find(|(_, f)| f.as_deref() == Some(filename))
            .map(|(id, _)| *id)?;
        debug!("unloading {} (source {})", filename, id);
        self.sources.remove(&id);
        let mut rules = vec![];
        self.rules.retain(|key, alternatives| {
            let mut position = 0;
            alternatives.retain(|rule| {
                let keep = rule.source != Some(id);
                if !keep {
                    rules.push((key.clone(), position, rule.clone()));
                }
                position += 1;
                keep
            });
            !alternatives.is_empty()
        });
        Some(Detached {
            source: id,
            filename: filename.to_string(),
            rules,
        })
    }

    /// Puts detached rules back at their old positions.
    pub fn restore(&mut self, detached: Detached) {
        debug!(
            "restoring {} (source {})",
            detached.filename, detached.source
        );
        self.sources
            .insert(detached.source, Some(detached.filename));
        // positions ascend within each rule set
        for (key, position, rule) in detached.rules {
            let alternatives = self.rules.entry(key).or_default();
            alternatives.insert(position.min(alternatives.len()), rule);
        }
    }
}

/// Rules taken out of the store by [`KnowledgeBase::detach_file`], each with
/// its position in its alternative set.
#[derive(Debug)]
pub struct Detached {
    source: u64,
    filename: String,
    rules: Vec<(RuleKey, usize, Arc<Rule>)>,
}

impl Detached {
    pub fn source(&self) -> u64 {
        self.source
    }
}
