//! Rule data model: rules, parameters, specializers and body expressions.

use std::{collections::BTreeMap, fmt};

use itertools::Itertools;
use strum_macros::Display;

use crate::terms::{Predicate, Term, Variable};

/// Type constraint attached to a rule parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum Specializer {
    /// `x: Foo`
    Class(String),
    /// `x: {a: 1}`
    Fields(BTreeMap<String, Term>),
    /// `x: Foo{a: 1}`
    Instance {
        class: String,
        fields: BTreeMap<String, Term>,
    },
}

impl Specializer {
    pub fn class_tag(&self) -> Option<&str> {
        match self {
            Specializer::Class(c) | Specializer::Instance { class: c, .. } => Some(c),
            Specializer::Fields(_) => None,
        }
    }

    pub fn fields(&self) -> Option<&BTreeMap<String, Term>> {
        match self {
            Specializer::Class(_) => None,
            Specializer::Fields(f) | Specializer::Instance { fields: f, .. } => Some(f),
        }
    }

    pub fn map_variables(&self, f: &mut impl FnMut(&Variable) -> Term) -> Self {
        match self {
            Specializer::Class(c) => Specializer::Class(c.clone()),
            Specializer::Fields(fields) => Specializer::Fields(map_fields(fields, f)),
            Specializer::Instance { class, fields } => Specializer::Instance {
                class: class.clone(),
                fields: map_fields(fields, f),
            },
        }
    }

    fn variables(&self, out: &mut Vec<Variable>) {
        if let Some(fields) = self.fields() {
            fields.values().for_each(|t| t.variables(out));
        }
    }
}

fn map_fields(
    fields: &BTreeMap<String, Term>,
    f: &mut impl FnMut(&Variable) -> Term,
) -> BTreeMap<String, Term> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), v.map_variables(f)))
        .collect()
}

fn fmt_fields(fields: &BTreeMap<String, Term>) -> String {
    format!(
        "{{{}}}",
        fields.iter().map(|(k, v)| format!("{}: {}", k, v)).join(", ")
    )
}

impl fmt::Display for Specializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Specializer::Class(c) => write!(f, "{}", c),
            Specializer::Fields(fields) => write!(f, "{}", fmt_fields(fields)),
            Specializer::Instance { class, fields } => {
                write!(f, "{}{}", class, fmt_fields(fields))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub term: Term,
    pub specializer: Option<Specializer>,
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.term)?;
        if let Some(s) = &self.specializer {
            write!(f, ": {}", s)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum CompareOp {
    #[strum(to_string = "==")]
    Eq,
    #[strum(to_string = "!=")]
    Neq,
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = "<=")]
    Leq,
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = ">=")]
    Geq,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum ArithOp {
    #[strum(to_string = "+")]
    Add,
    #[strum(to_string = "-")]
    Sub,
    #[strum(to_string = "*")]
    Mul,
    #[strum(to_string = "/")]
    Div,
}

pub type Body = Vec<Expr>;

/// One goal of a rule body or query.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Unify(Term, Term),
    Compare(CompareOp, Term, Term),
    Arithmetic {
        op: ArithOp,
        left: Term,
        right: Term,
        result: Term,
    },
    Call(Predicate),
    /// `receiver.field` or `receiver.field(args)`; unifies every result with
    /// `result`, one solution branch per result.
    Lookup {
        receiver: Term,
        field: String,
        args: Option<Vec<Term>>,
        result: Term,
    },
    New {
        class: String,
        fields: BTreeMap<String, Term>,
        result: Term,
    },
    In {
        item: Term,
        collection: Term,
    },
    Isa(Term, Specializer),
    Not(Body),
    Or(Vec<Body>),
    Cut,
    Print(Vec<Term>),
}

impl Expr {
    pub fn map_variables(&self, f: &mut impl FnMut(&Variable) -> Term) -> Self {
        match self {
            Expr::Unify(l, r) => Expr::Unify(l.map_variables(f), r.map_variables(f)),
            Expr::Compare(op, l, r) => Expr::Compare(*op, l.map_variables(f), r.map_variables(f)),
            Expr::Arithmetic {
                op,
                left,
                right,
                result,
            } => Expr::Arithmetic {
                op: *op,
                left: left.map_variables(f),
                right: right.map_variables(f),
                result: result.map_variables(f),
            },
            Expr::Call(p) => Expr::Call(Predicate {
                name: p.name.clone(),
                args: p.args.iter().map(|t| t.map_variables(f)).collect(),
            }),
            Expr::Lookup {
                receiver,
                field,
                args,
                result,
            } => Expr::Lookup {
                receiver: receiver.map_variables(f),
                field: field.clone(),
                args: args
                    .as_ref()
                    .map(|args| args.iter().map(|t| t.map_variables(f)).collect()),
                result: result.map_variables(f),
            },
            Expr::New {
                class,
                fields,
                result,
            } => Expr::New {
                class: class.clone(),
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.map_variables(f)))
                    .collect(),
                result: result.map_variables(f),
            },
            Expr::In { item, collection } => Expr::In {
                item: item.map_variables(f),
                collection: collection.map_variables(f),
            },
            Expr::Isa(t, s) => Expr::Isa(t.map_variables(f), s.map_variables(f)),
            Expr::Not(body) => Expr::Not(body.iter().map(|e| e.map_variables(f)).collect()),
            Expr::Or(branches) => Expr::Or(
                branches
                    .iter()
                    .map(|b| b.iter().map(|e| e.map_variables(f)).collect())
                    .collect(),
            ),
            Expr::Cut => Expr::Cut,
            Expr::Print(args) => Expr::Print(args.iter().map(|t| t.map_variables(f)).collect()),
        }
    }

    /// Collects the distinct variables of the expression in order of appearance.
    pub fn variables(&self, out: &mut Vec<Variable>) {
        match self {
            Expr::Unify(l, r) | Expr::Compare(_, l, r) => {
                l.variables(out);
                r.variables(out);
            }
            Expr::Arithmetic {
                left,
                right,
                result,
                ..
            } => {
                left.variables(out);
                right.variables(out);
                result.variables(out);
            }
            Expr::Call(p) => p.args.iter().for_each(|t| t.variables(out)),
            Expr::Lookup {
                receiver,
                args,
                result,
                ..
            } => {
                receiver.variables(out);
                args.iter().flatten().for_each(|t| t.variables(out));
                result.variables(out);
            }
            Expr::New { fields, result, .. } => {
                fields.values().for_each(|t| t.variables(out));
                result.variables(out);
            }
            Expr::In { item, collection } => {
                item.variables(out);
                collection.variables(out);
            }
            Expr::Isa(t, s) => {
                t.variables(out);
                s.variables(out);
            }
            Expr::Not(body) => body.iter().for_each(|e| e.variables(out)),
            Expr::Or(branches) => branches.iter().flatten().for_each(|e| e.variables(out)),
            Expr::Cut => {}
            Expr::Print(args) => args.iter().for_each(|t| t.variables(out)),
        }
    }
}

pub fn fmt_body(body: &[Expr]) -> String {
    if body.is_empty() {
        "true".to_string()
    } else {
        body.iter().join(" and ")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Unify(l, r) => write!(f, "{} = {}", l, r),
            Expr::Compare(op, l, r) => write!(f, "{} {} {}", l, op, r),
            Expr::Arithmetic {
                op,
                left,
                right,
                result,
            } => write!(f, "{} = {} {} {}", result, left, op, right),
            Expr::Call(p) => write!(f, "{}", p),
            Expr::Lookup {
                receiver,
                field,
                args,
                result,
            } => match args {
                Some(args) => write!(
                    f,
                    "{} = {}.{}({})",
                    result,
                    receiver,
                    field,
                    args.iter().join(", ")
                ),
                None => write!(f, "{} = {}.{}", result, receiver, field),
            },
            Expr::New {
                class,
                fields,
                result,
            } => write!(f, "{} = new {}{}", result, class, fmt_fields(fields)),
            Expr::In { item, collection } => write!(f, "{} in {}", item, collection),
            Expr::Isa(t, s) => write!(f, "{} matches {}", t, s),
            Expr::Not(body) => write!(f, "not ({})", fmt_body(body)),
            Expr::Or(branches) if branches.is_empty() => write!(f, "false"),
            Expr::Or(branches) => write!(
                f,
                "({})",
                branches.iter().map(|b| fmt_body(b)).join(" or ")
            ),
            Expr::Cut => write!(f, "cut"),
            Expr::Print(args) => write!(f, "print({})", args.iter().join(", ")),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub name: String,
    pub params: Vec<Parameter>,
    pub body: Body,
    /// Source unit the rule was loaded from.
    pub source: Option<u64>,
}

impl Rule {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn map_variables(&self, f: &mut impl FnMut(&Variable) -> Term) -> Self {
        Self {
            name: self.name.clone(),
            params: self
                .params
                .iter()
                .map(|p| Parameter {
                    term: p.term.map_variables(f),
                    specializer: p.specializer.as_ref().map(|s| s.map_variables(f)),
                })
                .collect(),
            body: self.body.iter().map(|e| e.map_variables(f)).collect(),
            source: self.source,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params.iter().join(", "))?;
        if !self.body.is_empty() {
            write!(f, " if {}", fmt_body(&self.body))?;
        }
        write!(f, ";")
    }
}
