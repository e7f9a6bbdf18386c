//! Structural unification of two terms under a binding environment.

use crate::{
    bindings::Bindings,
    terms::{Term, Variable},
};

/// Unifies `left` with `right`, extending `bindings` on success.
///
/// On failure the environment is rolled back to where it was before the
/// call, so no partial bindings are left behind.
pub fn unify(left: &Term, right: &Term, bindings: &mut Bindings) -> bool {
    let checkpoint = bindings.checkpoint();
    let unified = unify_inner(left, right, bindings);
    if !unified {
        bindings.rollback(checkpoint);
    }
    unified
}

fn unify_inner(left: &Term, right: &Term, bindings: &mut Bindings) -> bool {
    let left = bindings.resolve(left);
    let right = bindings.resolve(right);
    match (&left, &right) {
        (Term::Variable(l), Term::Variable(r)) => {
            if l.id == r.id {
                return true;
            }
            // The lower id always points at the higher one.
            let (lower, higher) = if l.id < r.id {
                (l, &right)
            } else {
                (r, &left)
            };
            bindings.bind(lower, higher.clone()).is_ok()
        }
        (Term::Variable(var), value) | (value, Term::Variable(var)) => {
            if occurs(var, value, bindings) {
                return false;
            }
            bindings.bind(var, value.clone()).is_ok()
        }
        (Term::Boolean(l), Term::Boolean(r)) => l == r,
        (Term::Integer(l), Term::Integer(r)) => l == r,
        (Term::Float(l), Term::Float(r)) => l == r,
        (Term::String(l), Term::String(r)) => l == r,
        (Term::List(l), Term::List(r)) => {
            l.len() == r.len()
                && l.iter()
                    .zip(r.iter())
                    .all(|(l, r)| unify_inner(l, r, bindings))
        }
        (Term::Dictionary(l), Term::Dictionary(r)) => {
            l.len() == r.len()
                && l.keys().all(|k| r.contains_key(k))
                && l.iter().all(|(k, v)| unify_inner(v, &r[k], bindings))
        }
        (Term::ExternalInstance(l), Term::ExternalInstance(r)) => l.instance_id == r.instance_id,
        (Term::Predicate(l), Term::Predicate(r)) => {
            l.name == r.name
                && l.args.len() == r.args.len()
                && l.args
                    .iter()
                    .zip(r.args.iter())
                    .all(|(l, r)| unify_inner(l, r, bindings))
        }
        _ => false,
    }
}

/// True if `var` appears inside `term`; binding it would create a cycle.
fn occurs(var: &Variable, term: &Term, bindings: &Bindings) -> bool {
    let mut found = false;
    term.walk(&mut |t| {
        if let Term::Variable(v) = t {
            if v.id == var.id {
                found = true;
            } else if let Some(bound) = bindings.lookup(v) {
                if !found && occurs(var, bound, bindings) {
                    found = true;
                }
            }
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::terms::{ExternalInstance, Predicate};

    fn var(name: &str, id: u64) -> Term {
        Term::Variable(Variable::new(name, id))
    }

    fn dict(fields: &[(&str, Term)]) -> Term {
        Term::Dictionary(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn test_unify_constants() {
        let mut b = Bindings::new();
        assert!(unify(&Term::from(1), &Term::from(1), &mut b));
        assert!(unify(&Term::from("a"), &Term::from("a"), &mut b));
        assert!(!unify(&Term::from(1), &Term::from(2), &mut b));
        assert!(!unify(&Term::from(true), &Term::from(1), &mut b));
    }

    #[test]
    fn test_integer_never_unifies_with_float() {
        let mut b = Bindings::new();
        assert!(!unify(&Term::from(1), &Term::from(1.0), &mut b));
        assert!(unify(&Term::from(1.5), &Term::from(1.5), &mut b));
    }

    #[test]
    fn test_variable_binds_to_resolved_value() {
        let mut b = Bindings::new();
        assert!(unify(&var("x", 1), &Term::from(1), &mut b));
        assert_eq!(b.resolve(&var("x", 1)), Term::from(1));
        assert!(unify(&var("x", 1), &Term::from(1), &mut b));
        assert!(!unify(&var("x", 1), &Term::from(2), &mut b));
    }

    #[test]
    fn test_two_unbound_variables_lower_binds_to_higher() {
        let mut b = Bindings::new();
        assert!(unify(&var("y", 9), &var("x", 3), &mut b));
        assert_eq!(b.lookup(&Variable::new("x", 3)), Some(&var("y", 9)));
        assert!(b.lookup(&Variable::new("y", 9)).is_none());
    }

    #[test]
    fn test_lists_propagate_bindings_left_to_right() {
        let mut b = Bindings::new();
        let left = Term::List(vec![var("x", 1), var("x", 1)]);
        assert!(unify(&left, &Term::List(vec![Term::from(1), Term::from(1)]), &mut b));

        let mut b = Bindings::new();
        assert!(!unify(
            &left,
            &Term::List(vec![Term::from(1), Term::from(2)]),
            &mut b
        ));
        assert!(!unify(&left, &Term::List(vec![Term::from(1)]), &mut b));
    }

    #[test]
    fn test_failure_rolls_back_partial_bindings() {
        let mut b = Bindings::new();
        let left = Term::List(vec![var("x", 1), var("y", 2), Term::from(3)]);
        let right = Term::List(vec![Term::from(1), Term::from(2), Term::from(4)]);
        assert!(!unify(&left, &right, &mut b));
        assert!(b.is_empty());
    }

    #[test]
    fn test_dictionaries_compare_key_sets_unordered() {
        let mut b = Bindings::new();
        let left = dict(&[("a", var("x", 1)), ("b", Term::from(2))]);
        let right = dict(&[("b", Term::from(2)), ("a", Term::from(1))]);
        assert!(unify(&left, &right, &mut b));
        assert_eq!(b.resolve(&var("x", 1)), Term::from(1));

        let mut b = Bindings::new();
        let missing = dict(&[("a", Term::from(1)), ("c", Term::from(2))]);
        assert!(!unify(&right, &missing, &mut b));
    }

    #[test]
    fn test_external_instances_by_handle() {
        let mut b = Bindings::new();
        let a = Term::ExternalInstance(ExternalInstance {
            instance_id: 1,
            class_tag: Some("A".to_string()),
        });
        let a2 = Term::ExternalInstance(ExternalInstance {
            instance_id: 1,
            class_tag: Some("A".to_string()),
        });
        let c = Term::ExternalInstance(ExternalInstance {
            instance_id: 2,
            class_tag: Some("A".to_string()),
        });
        assert!(unify(&a, &a2, &mut b));
        assert!(!unify(&a, &c, &mut b));
        assert!(unify(&var("x", 1), &c, &mut b));
    }

    #[test]
    fn test_predicates() {
        let mut b = Bindings::new();
        let left = Term::from(Predicate::new("f", vec![var("x", 1), Term::from(2)]));
        let right = Term::from(Predicate::new("f", vec![Term::from(1), Term::from(2)]));
        assert!(unify(&left, &right, &mut b));
        let other_name = Term::from(Predicate::new("g", vec![Term::from(1), Term::from(2)]));
        assert!(!unify(&right, &other_name, &mut b));
        let other_arity = Term::from(Predicate::new("f", vec![Term::from(1)]));
        assert!(!unify(&right, &other_arity, &mut b));
    }

    #[test]
    fn test_occurs_check() {
        let mut b = Bindings::new();
        assert!(!unify(&var("x", 1), &Term::List(vec![var("x", 1)]), &mut b));
    }
}
