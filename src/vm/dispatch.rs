//! Rule dispatch: selecting the rules that apply to a call, ordering them by
//! specificity, and the `isa` checks behind parameter specializers.

use std::{cmp::Ordering, collections::BTreeMap, sync::Arc};

use log::trace;

use super::{
    goal::{body_goals, Goal},
    rename_vars, Vm,
};
use crate::{
    error::{Error, Result},
    host::ExternalBridge,
    rules::{Expr, Rule, Specializer},
    terms::{ExternalInstance, Predicate, Term, BUILTIN_CLASSES},
    unify::unify,
};

/// `isa` for the builtin classes.
fn builtin_isa(class: &str, term: &Term) -> bool {
    matches!(
        (class, term),
        ("Boolean", Term::Boolean(_))
            | ("Integer", Term::Integer(_))
            | ("Float", Term::Float(_))
            | ("Number", Term::Integer(_) | Term::Float(_))
            | ("String", Term::String(_))
            | ("List", Term::List(_))
            | ("Dictionary", Term::Dictionary(_))
            | ("Predicate", Term::Predicate(_))
    )
}

/// `Integer` and `Float` are narrower than `Number`.
fn builtin_order(left: &str, right: &str) -> Option<Ordering> {
    match (left, right) {
        ("Integer" | "Float", "Number") => Some(Ordering::Less),
        ("Number", "Integer" | "Float") => Some(Ordering::Greater),
        _ => None,
    }
}

impl<B: ExternalBridge> Vm<B> {
    /// Calls the rules named by `pred`, one branch per applicable rule, most
    /// specific first.
    pub(super) fn query_call(&mut self, pred: &Predicate) -> Result<bool> {
        let rules = self.kb.read().lookup(&pred.name, pred.args.len());
        if rules.is_empty() {
            trace!("no rules for {}/{}", pred.name, pred.args.len());
            return Ok(false);
        }

        let mut applicable: Vec<Arc<Rule>> = vec![];
        for rule in rules {
            let rule = {
                let mut rename = rename_vars(&mut self.next_var_id);
                Arc::new(rule.map_variables(&mut rename))
            };
            if self.is_applicable(&rule, &pred.args)? {
                applicable.push(rule);
            }
        }
        let sorted = self.sort_rules(applicable, &pred.args)?;

        let barrier = self.choices.len();
        let tracing = self.tracer.is_enabled();
        let call_trace = self.tracer.last_goal();
        let alternatives = sorted
            .into_iter()
            .map(|rule| {
                let mut goals = vec![];
                if tracing {
                    goals.push(Arc::new(Goal::TraceRule {
                        rule: rule.clone(),
                        parent: call_trace,
                    }));
                }
                for (param, arg) in rule.params.iter().zip(&pred.args) {
                    goals.push(Arc::new(Goal::Unify(arg.clone(), param.term.clone())));
                    if let Some(specializer) = &param.specializer {
                        goals.push(Arc::new(Goal::Expr {
                            expr: Expr::Isa(param.term.clone(), specializer.clone()),
                            cut_barrier: barrier,
                        }));
                    }
                }
                goals.extend(body_goals(&rule.body, barrier));
                if tracing {
                    goals.push(Arc::new(Goal::TracePop));
                }
                goals
            })
            .collect();
        self.choose(alternatives)
    }

    /// True if every argument unifies with its parameter and satisfies its
    /// specializer. Leaves no bindings behind.
    fn is_applicable(&mut self, rule: &Rule, args: &[Term]) -> Result<bool> {
        let checkpoint = self.bindings.checkpoint();
        let mut result = Ok(true);
        for (param, arg) in rule.params.iter().zip(args) {
            if !unify(arg, &param.term, &mut self.bindings) {
                result = Ok(false);
                break;
            }
            if let Some(specializer) = &param.specializer {
                match self.isa(&param.term, specializer) {
                    Ok(true) => {}
                    other => {
                        result = other;
                        break;
                    }
                }
            }
        }
        self.bindings.rollback(checkpoint);
        result
    }

    /// Stable insertion sort: a rule goes before the first rule it is
    /// strictly more specific than, so ties keep load order.
    fn sort_rules(&self, rules: Vec<Arc<Rule>>, args: &[Term]) -> Result<Vec<Arc<Rule>>> {
        let mut sorted: Vec<Arc<Rule>> = Vec::with_capacity(rules.len());
        for rule in rules {
            let mut position = sorted.len();
            for (i, other) in sorted.iter().enumerate() {
                if self.is_more_specific(&rule, other, args)? {
                    position = i;
                    break;
                }
            }
            sorted.insert(position, rule);
        }
        Ok(sorted)
    }

    /// Compares parameters left to right; the first position that differs
    /// decides.
    fn is_more_specific(&self, left: &Rule, right: &Rule, args: &[Term]) -> Result<bool> {
        for ((l, r), arg) in left.params.iter().zip(&right.params).zip(args) {
            match (&l.specializer, &r.specializer) {
                (None, None) => continue,
                (None, Some(_)) => return Ok(false),
                (Some(_), None) => return Ok(true),
                (Some(l), Some(r)) => match self.compare_specializers(l, r, arg)? {
                    Ordering::Less => return Ok(true),
                    Ordering::Greater => return Ok(false),
                    Ordering::Equal => continue,
                },
            }
        }
        Ok(false)
    }

    /// `Less` if `left` is the more specific match for `arg`.
    fn compare_specializers(
        &self,
        left: &Specializer,
        right: &Specializer,
        arg: &Term,
    ) -> Result<Ordering> {
        let by_field_count = |l: &Specializer, r: &Specializer| {
            let count = |s: &Specializer| s.fields().map_or(0, BTreeMap::len);
            count(r).cmp(&count(l))
        };
        match (left.class_tag(), right.class_tag()) {
            (None, None) => Ok(by_field_count(left, right)),
            (Some(_), None) => Ok(Ordering::Less),
            (None, Some(_)) => Ok(Ordering::Greater),
            (Some(l), Some(r)) if l == r => Ok(by_field_count(left, right)),
            (Some(l), Some(r)) => {
                if let Some(ordering) = builtin_order(l, r) {
                    return Ok(ordering);
                }
                match self.bindings.resolve(arg) {
                    Term::ExternalInstance(instance)
                        if self.bridge.is_class(l) && self.bridge.is_class(r) =>
                    {
                        self.bridge.is_subspecializer(&instance, l, r)
                    }
                    _ => Ok(Ordering::Equal),
                }
            }
        }
    }

    /// Checks `term` against a specializer. Field patterns are unified, so
    /// a successful check may bind variables.
    pub(super) fn isa(&mut self, term: &Term, specializer: &Specializer) -> Result<bool> {
        let term = self.bindings.resolve(term);
        if let Some(class) = specializer.class_tag() {
            if !self.isa_class(&term, class)? {
                return Ok(false);
            }
        }
        match specializer.fields() {
            Some(fields) => self.match_fields(&term, fields),
            None => Ok(true),
        }
    }

    fn isa_class(&self, term: &Term, class: &str) -> Result<bool> {
        if BUILTIN_CLASSES.contains(&class) {
            return Ok(builtin_isa(class, term));
        }
        if !self.bridge.is_class(class) {
            return Err(Error::UnregisteredClass(class.to_string()));
        }
        match term {
            Term::ExternalInstance(instance) => self.bridge.isa(instance, class),
            _ => Ok(false),
        }
    }

    fn match_fields(&mut self, term: &Term, fields: &BTreeMap<String, Term>) -> Result<bool> {
        match term {
            Term::Dictionary(values) => {
                for (key, pattern) in fields {
                    match values.get(key) {
                        Some(value) if unify(pattern, value, &mut self.bindings) => {}
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
            Term::ExternalInstance(instance) => {
                for (key, pattern) in fields {
                    match self.first_attribute(instance, key) {
                        Ok(Some(value)) if unify(pattern, &value, &mut self.bindings) => {}
                        Ok(_) => return Ok(false),
                        Err(e) if e.is_branch_local() => return Ok(false),
                        Err(e) => return Err(e),
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// First result of `instance.key`; the call is released right after.
    fn first_attribute(&mut self, instance: &ExternalInstance, key: &str) -> Result<Option<Term>> {
        let receiver = Term::ExternalInstance(instance.clone());
        let call_id = self.bridge.get_attribute(&receiver, key)?;
        let first = self.bridge.next_result(call_id);
        self.bridge.release_call(call_id);
        first
    }
}
