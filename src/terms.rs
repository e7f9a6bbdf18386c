//! The term model: every value that flows through the engine is a [`Term`].
//!
//! Terms are immutable. Variables are never mutated in place; their values
//! live in a [`crate::bindings::Bindings`] environment and are looked up
//! through it.

use std::{collections::BTreeMap, fmt};

use itertools::Itertools;

/// Identifier that makes a variable unique within one query.
pub type VarId = u64;

/// Names of the classes that are understood without registration.
pub const BUILTIN_CLASSES: [&str; 8] = [
    "Boolean",
    "Integer",
    "Float",
    "Number",
    "String",
    "List",
    "Dictionary",
    "Predicate",
];

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable {
    pub name: String,
    pub id: VarId,
}

impl Variable {
    pub fn new(name: impl Into<String>, id: VarId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    /// Variables starting with `_` are never rendered into results.
    pub fn is_anonymous(&self) -> bool {
        self.name.starts_with('_')
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Opaque reference to a value owned by the host application.
///
/// Two external instances are the same term iff they carry the same
/// `instance_id`; the class tag is informational.
#[derive(Clone, Debug)]
pub struct ExternalInstance {
    pub instance_id: u64,
    pub class_tag: Option<String>,
}

impl PartialEq for ExternalInstance {
    fn eq(&self, other: &Self) -> bool {
        self.instance_id == other.instance_id
    }
}

impl Eq for ExternalInstance {}

impl std::hash::Hash for ExternalInstance {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.instance_id.hash(state)
    }
}

impl fmt::Display for ExternalInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.class_tag {
            Some(tag) => write!(f, "^{{{} id={}}}", tag, self.instance_id),
            None => write!(f, "^{{id={}}}", self.instance_id),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub name: String,
    pub args: Vec<Term>,
}

impl Predicate {
    pub fn new(name: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.args.iter().join(", "))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Term>),
    Dictionary(BTreeMap<String, Term>),
    Variable(Variable),
    ExternalInstance(ExternalInstance),
    Predicate(Predicate),
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Term::Variable(Variable::new(name, 0))
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Term::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Name of the builtin class this term belongs to.
    pub fn type_name(&self) -> &'static str {
        match self {
            Term::Boolean(_) => "Boolean",
            Term::Integer(_) => "Integer",
            Term::Float(_) => "Float",
            Term::String(_) => "String",
            Term::List(_) => "List",
            Term::Dictionary(_) => "Dictionary",
            Term::Variable(_) => "Variable",
            Term::ExternalInstance(_) => "ExternalInstance",
            Term::Predicate(_) => "Predicate",
        }
    }

    /// Calls `f` on this term and every subterm, depth first.
    pub fn walk(&self, f: &mut impl FnMut(&Term)) {
        f(self);
        match self {
            Term::List(items) => items.iter().for_each(|t| t.walk(f)),
            Term::Dictionary(fields) => fields.values().for_each(|t| t.walk(f)),
            Term::Predicate(p) => p.args.iter().for_each(|t| t.walk(f)),
            _ => {}
        }
    }

    /// Rebuilds the term bottom-up, replacing every variable with `f(var)`.
    pub fn map_variables(&self, f: &mut impl FnMut(&Variable) -> Term) -> Term {
        match self {
            Term::Variable(v) => f(v),
            Term::List(items) => Term::List(items.iter().map(|t| t.map_variables(f)).collect()),
            Term::Dictionary(fields) => Term::Dictionary(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.map_variables(f)))
                    .collect(),
            ),
            Term::Predicate(p) => Term::Predicate(Predicate {
                name: p.name.clone(),
                args: p.args.iter().map(|t| t.map_variables(f)).collect(),
            }),
            other => other.clone(),
        }
    }

    /// Collects the distinct variables of this term in order of appearance.
    pub fn variables(&self, out: &mut Vec<Variable>) {
        self.walk(&mut |t| {
            if let Term::Variable(v) = t {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
        });
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Boolean(b) => write!(f, "{}", b),
            Term::Integer(i) => write!(f, "{}", i),
            Term::Float(x) => write!(f, "{:?}", x),
            Term::String(s) => write_string(f, s),
            Term::List(items) => write!(f, "[{}]", items.iter().join(", ")),
            Term::Dictionary(fields) => write!(
                f,
                "{{{}}}",
                fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .join(", ")
            ),
            Term::Variable(v) => write!(f, "{}", v),
            Term::ExternalInstance(i) => write!(f, "{}", i),
            Term::Predicate(p) => write!(f, "{}", p),
        }
    }
}

impl From<bool> for Term {
    fn from(b: bool) -> Self {
        Term::Boolean(b)
    }
}

impl From<i64> for Term {
    fn from(i: i64) -> Self {
        Term::Integer(i)
    }
}

impl From<f64> for Term {
    fn from(x: f64) -> Self {
        Term::Float(x)
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term::String(s.to_string())
    }
}

impl From<String> for Term {
    fn from(s: String) -> Self {
        Term::String(s)
    }
}

impl From<Vec<Term>> for Term {
    fn from(items: Vec<Term>) -> Self {
        Term::List(items)
    }
}

impl From<Variable> for Term {
    fn from(v: Variable) -> Self {
        Term::Variable(v)
    }
}

impl From<Predicate> for Term {
    fn from(p: Predicate) -> Self {
        Term::Predicate(p)
    }
}

impl From<ExternalInstance> for Term {
    fn from(i: ExternalInstance) -> Self {
        Term::ExternalInstance(i)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_integer_and_float_are_distinct() {
        assert_ne!(Term::Integer(1), Term::Float(1.0));
        assert_eq!(Term::Integer(1), Term::from(1));
    }

    #[test]
    fn test_external_instances_compare_by_id() {
        let a = ExternalInstance {
            instance_id: 7,
            class_tag: Some("User".to_string()),
        };
        let b = ExternalInstance {
            instance_id: 7,
            class_tag: None,
        };
        assert_eq!(Term::from(a.clone()), Term::from(b));
        assert_ne!(
            Term::from(a),
            Term::from(ExternalInstance {
                instance_id: 8,
                class_tag: Some("User".to_string()),
            })
        );
    }

    #[test]
    fn test_display() {
        let pred = Predicate::new(
            "allow",
            vec![
                Term::var("actor"),
                Term::from("read"),
                Term::List(vec![Term::from(1), Term::from(2.5)]),
            ],
        );
        assert_eq!(Term::from(pred).to_string(), "allow(actor, \"read\", [1, 2.5])");
    }

    #[test]
    fn test_variables_in_order_of_appearance() {
        let t = Term::List(vec![
            Term::var("x"),
            Term::Dictionary(BTreeMap::from([("k".to_string(), Term::var("y"))])),
            Term::var("x"),
        ]);
        let mut vars = vec![];
        t.variables(&mut vars);
        assert_eq!(
            vars.iter().map(|v| v.name.as_str()).collect::<Vec<_>>(),
            vec!["x", "y"]
        );
    }
}
