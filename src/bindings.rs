//! Binding environment: variable id → term, with a trail for rollback.
//!
//! Bindings are append-only. A [`Checkpoint`] is the length of the trail at
//! some point; [`Bindings::rollback`] undoes every binding made after it,
//! which is how the query engine backtracks.

use std::collections::HashMap;

use log::trace;

use crate::{
    error::{Error, Result},
    terms::{Term, VarId, Variable},
};

pub type Checkpoint = usize;

#[derive(Clone, Debug, Default)]
pub struct Bindings {
    values: HashMap<VarId, Term>,
    trail: Vec<Variable>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.trail.len()
    }

    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        while self.trail.len() > checkpoint {
            if let Some(var) = self.trail.pop() {
                self.values.remove(&var.id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.trail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trail.is_empty()
    }

    pub fn lookup(&self, var: &Variable) -> Option<&Term> {
        self.values.get(&var.id)
    }

    pub fn is_bound(&self, var: &Variable) -> bool {
        self.values.contains_key(&var.id)
    }

    /// Binds an unbound variable. Rebinding is an error: use unification.
    pub fn bind(&mut self, var: &Variable, value: Term) -> Result<()> {
        if self.is_bound(var) {
            return Err(Error::AlreadyBound(var.name.clone()));
        }
        trace!("bind {}#{} = {}", var.name, var.id, value);
        self.values.insert(var.id, value);
        self.trail.push(var.clone());
        Ok(())
    }

    /// Bindings made after `checkpoint`, oldest first.
    pub fn bound_since(&self, checkpoint: Checkpoint) -> impl Iterator<Item = (&Variable, &Term)> {
        self.trail
            .get(checkpoint..)
            .unwrap_or_default()
            .iter()
            .filter_map(|var| self.values.get(&var.id).map(|value| (var, value)))
    }

    /// Follows variable chains to the first non-variable or unbound variable.
    pub fn resolve(&self, term: &Term) -> Term {
        let mut current = term;
        while let Term::Variable(v) = current {
            match self.values.get(&v.id) {
                Some(next) => current = next,
                None => break,
            }
        }
        current.clone()
    }

    /// Resolves a term and, recursively, everything inside it.
    pub fn deep_resolve(&self, term: &Term) -> Term {
        match self.resolve(term) {
            Term::Variable(v) => Term::Variable(v),
            resolved => resolved.map_variables(&mut |v| match self.lookup(v) {
                Some(t) => self.deep_resolve(t),
                None => Term::Variable(v.clone()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn var(name: &str, id: VarId) -> Variable {
        Variable::new(name, id)
    }

    #[test]
    fn test_resolve_follows_chains() {
        let mut b = Bindings::new();
        b.bind(&var("x", 1), Term::from(var("y", 2))).unwrap();
        b.bind(&var("y", 2), Term::from(var("z", 3))).unwrap();
        assert_eq!(b.resolve(&Term::from(var("x", 1))), Term::from(var("z", 3)));
        b.bind(&var("z", 3), Term::from(42)).unwrap();
        assert_eq!(b.resolve(&Term::from(var("x", 1))), Term::from(42));
    }

    #[test]
    fn test_bind_is_append_only() {
        let mut b = Bindings::new();
        b.bind(&var("x", 1), Term::from(1)).unwrap();
        assert!(matches!(
            b.bind(&var("x", 1), Term::from(2)),
            Err(Error::AlreadyBound(_))
        ));
        assert_eq!(b.resolve(&Term::from(var("x", 1))), Term::from(1));
    }

    #[test]
    fn test_rollback_to_checkpoint() {
        let mut b = Bindings::new();
        b.bind(&var("x", 1), Term::from(1)).unwrap();
        let checkpoint = b.checkpoint();
        b.bind(&var("y", 2), Term::from(2)).unwrap();
        b.bind(&var("z", 3), Term::from(3)).unwrap();
        let names: Vec<_> = b.bound_since(checkpoint).map(|(v, _)| v.name.clone()).collect();
        assert_eq!(names, vec!["y", "z"]);
        b.rollback(checkpoint);
        assert!(b.is_bound(&var("x", 1)));
        assert!(!b.is_bound(&var("y", 2)));
        assert!(!b.is_bound(&var("z", 3)));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_deep_resolve() {
        let mut b = Bindings::new();
        b.bind(
            &var("x", 1),
            Term::List(vec![Term::from(var("y", 2)), Term::from(var("w", 4))]),
        )
        .unwrap();
        b.bind(&var("y", 2), Term::from("hi")).unwrap();
        assert_eq!(
            b.deep_resolve(&Term::from(var("x", 1))),
            Term::List(vec![Term::from("hi"), Term::from(var("w", 4))])
        );
    }
}
