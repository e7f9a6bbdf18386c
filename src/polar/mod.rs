//! Embedding entry point: load policies, register classes, run queries.


use std::{collections::HashMap, path::Path, sync::Arc};

use log::{debug, info};
use parking_lot::RwLock;

use crate::{
    config::EngineConfig,
    error::{Error, Result},
    host::{Class, Host, HostSession, Instance, Value},
    kb::KnowledgeBase,
    lang,
    query::Query,
    rules::{fmt_body, Body, Expr},
    terms::{Predicate, Term},
    vm::Vm,
};

/// A policy engine instance.
///
/// Queries share the rule store and the host; each one owns its own
/// evaluation state, so several queries may run at once on different
/// threads. Loading and clearing take the rule store's write lock.
#[derive(Debug, Default)]
pub struct Polar {
    kb: Arc<RwLock<KnowledgeBase>>,
    host: Arc<Host>,
    config: EngineConfig,
}

impl Polar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    #[cfg(test)]
    pub(crate) fn kb(&self) -> Arc<RwLock<KnowledgeBase>> {
        self.kb.clone()
    }

    pub fn register_class(&self, class: Class) -> Result<()> {
        self.host.register_class(class)
    }

    /// Loads policy text. Rules add to whatever is already loaded.
    pub fn load_str(&self, source: &str) -> Result<()> {
        self.load(lang::parse_program(source)?, None)
    }

    /// Loads a `.polar` file. Loading the same path again replaces the rules
    /// it contributed before.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.extension().and_then(|e| e.to_str()) != Some("polar") {
            return Err(Error::FileExtension(path.display().to_string()));
        }
        let source = std::fs::read_to_string(path)?;
        self.load(lang::parse_program(&source)?, Some(&path.display().to_string()))
    }

    fn load(&self, program: lang::Program, filename: Option<&str>) -> Result<()> {
        let (source_id, previous) = {
            let mut kb = self.kb.write();
            let previous = filename.and_then(|filename| kb.detach_file(filename));
            let source_id = kb.add_source(filename);
            for mut rule in program.rules {
                rule.source = Some(source_id);
                kb.add_rule(rule);
            }
            (source_id, previous)
        };
        debug!(
            "loaded source {} ({})",
            source_id,
            filename.unwrap_or("<string>")
        );

        for body in program.inline_queries {
            let query = fmt_body(&body);
            let outcome = match self.query(body).next_solution() {
                Ok(Some(_)) => continue,
                Ok(None) => Error::InlineQueryFailed { query },
                Err(e) => e,
            };
            // abort the unit: a reloaded file keeps its previous rules
            let mut kb = self.kb.write();
            kb.remove_source(source_id);
            if let Some(previous) = previous {
                kb.restore(previous);
            }
            return Err(outcome);
        }
        Ok(())
    }

    /// Drops every loaded rule. Registered classes and cached instances stay.
    pub fn clear(&self) {
        info!("clearing all rules");
        self.kb.write().clear();
    }

    /// Starts a query from query text, e.g. `allow(actor, "read", x)`.
    pub fn query_str(&self, source: &str) -> Result<Query> {
        let body = lang::parse_query(source)?;
        Ok(self.query(body))
    }

    /// Starts a query for one predicate. [`Value::Variable`] arguments are
    /// left open and reported in the solutions.
    pub fn query_pred(&self, name: &str, args: Vec<Value>) -> Result<Query> {
        let args = args
            .iter()
            .map(|v| self.host.to_term(v))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.query(vec![Expr::Call(Predicate::new(name, args))]))
    }

    pub fn query(&self, body: Body) -> Query {
        let session = HostSession::new(self.host.clone());
        Query::new(Vm::new(self.kb.clone(), session, self.config.clone(), body))
    }

    pub fn to_term(&self, value: &Value) -> Result<Term> {
        self.host.to_term(value)
    }

    pub fn to_value(&self, term: &Term) -> Result<Value> {
        self.host.to_value(term)
    }

    /// Constructs an instance of a registered class and returns it as a
    /// host value.
    pub fn make_instance(&self, alias: &str, fields: HashMap<String, Value>) -> Result<Value> {
        let id = self.host.make_instance(alias, fields, None)?;
        Ok(Value::Instance(self.host.instance(id)?))
    }

    /// Caches a host object under `id`, or under a fresh id.
    pub fn cache_instance(&self, instance: Instance, id: Option<u64>) -> Result<u64> {
        self.host.cache_instance(instance, id)
    }
}
