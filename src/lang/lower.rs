//! Lowering of pest pairs into the rule model.
//!
//! Nested dot accesses, constructors and arithmetic are flattened: each one
//! becomes its own goal whose result is a fresh temporary variable, and the
//! temporary takes its place in the enclosing term.

use std::collections::BTreeMap;

use pest::iterators::{Pair, Pairs};

use super::{
    error::{Location, ParseError},
    parser::Rule,
};
use crate::{
    rules::{self, ArithOp, Body, CompareOp, Expr, Parameter, Specializer},
    terms::{Predicate, Term},
};

/// A lowered policy document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    pub rules: Vec<rules::Rule>,
    pub inline_queries: Vec<Body>,
}

type Result<T> = std::result::Result<T, ParseError>;

fn loc(pair: &Pair<'_, Rule>) -> Location {
    let (line, column) = pair.line_col();
    Location::new(line, column)
}

fn invalid(at: Location, message: impl Into<String>) -> ParseError {
    ParseError::InvalidExpression {
        message: message.into(),
        loc: at,
    }
}

fn unexpected(pair: &Pair<'_, Rule>) -> ParseError {
    invalid(loc(pair), format!("unexpected {:?}", pair.as_rule()))
}

fn next<'i>(pairs: &mut Pairs<'i, Rule>, at: Location) -> Result<Pair<'i, Rule>> {
    pairs
        .next()
        .ok_or_else(|| invalid(at, "incomplete expression"))
}

fn first_inner(pair: Pair<'_, Rule>) -> Result<Pair<'_, Rule>> {
    let at = loc(&pair);
    next(&mut pair.into_inner(), at)
}

/// Follows `depth` levels of single-child nesting.
fn only_descendant<'i>(pair: &Pair<'i, Rule>, depth: usize) -> Option<Pair<'i, Rule>> {
    let mut pair = pair.clone();
    for _ in 0..depth {
        let mut inner = pair.into_inner();
        let only = inner.next()?;
        if inner.next().is_some() {
            return None;
        }
        pair = only;
    }
    Some(pair)
}

fn arith_op(pair: &Pair<'_, Rule>) -> Result<ArithOp> {
    match pair.as_str() {
        "+" => Ok(ArithOp::Add),
        "-" => Ok(ArithOp::Sub),
        "*" => Ok(ArithOp::Mul),
        "/" => Ok(ArithOp::Div),
        _ => Err(unexpected(pair)),
    }
}

fn unescape(pair: Pair<'_, Rule>) -> Result<String> {
    let at = loc(&pair);
    let raw = match pair.into_inner().next() {
        Some(inner) => inner.as_str(),
        None => "",
    };
    let mut result = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => result.push('"'),
            Some('\\') => result.push('\\'),
            Some('/') => result.push('/'),
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some('0') => result.push('\0'),
            Some(other) => {
                return Err(invalid(
                    at,
                    format!("invalid escape character '{}'", other.escape_default()),
                ))
            }
            None => return Err(invalid(at, "string ends with backslash escape")),
        }
    }
    Ok(result)
}

#[derive(Debug, Default)]
pub struct Lowerer {
    temps: usize,
}

impl Lowerer {
    /// A fresh variable whose name no policy can spell.
    fn temp(&mut self, prefix: &str) -> Term {
        self.temps += 1;
        Term::var(format!("_${}_{}", prefix, self.temps))
    }

    pub fn document(&mut self, pairs: Pairs<'_, Rule>) -> Result<Program> {
        let mut program = Program::default();
        for pair in pairs {
            if pair.as_rule() != Rule::document {
                return Err(unexpected(&pair));
            }
            for item in pair.into_inner() {
                match item.as_rule() {
                    Rule::rule_def => program.rules.push(self.rule(item)?),
                    Rule::inline_query => {
                        let body = first_inner(item)?;
                        program.inline_queries.push(self.body(body)?);
                    }
                    Rule::EOI => {}
                    _ => return Err(unexpected(&item)),
                }
            }
        }
        Ok(program)
    }

    pub fn query(&mut self, pairs: Pairs<'_, Rule>) -> Result<Body> {
        let mut body = vec![];
        for pair in pairs.flat_map(|p| p.into_inner()) {
            match pair.as_rule() {
                Rule::body => body = self.body(pair)?,
                Rule::EOI => {}
                _ => return Err(unexpected(&pair)),
            }
        }
        Ok(body)
    }

    fn rule(&mut self, pair: Pair<'_, Rule>) -> Result<rules::Rule> {
        let mut name = String::new();
        let mut params = vec![];
        let mut body = vec![];
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::name => name = inner.as_str().to_string(),
                Rule::parameters => {
                    params = inner
                        .into_inner()
                        .map(|p| self.parameter(p))
                        .collect::<Result<_>>()?
                }
                Rule::kw_if => {}
                Rule::body => body = self.body(inner)?,
                _ => return Err(unexpected(&inner)),
            }
        }
        Ok(rules::Rule {
            name,
            params,
            body,
            source: None,
        })
    }

    fn parameter(&mut self, pair: Pair<'_, Rule>) -> Result<Parameter> {
        let at = loc(&pair);
        let mut inner = pair.into_inner();
        let term = self.plain_term(next(&mut inner, at)?)?;
        let specializer = inner.next().map(|s| self.specializer(s)).transpose()?;
        Ok(Parameter { term, specializer })
    }

    /// A term that needs no supporting goals.
    fn plain_term(&mut self, pair: Pair<'_, Rule>) -> Result<Term> {
        let at = loc(&pair);
        let mut goals = vec![];
        let term = self.sum(pair, &mut goals)?;
        if !goals.is_empty() {
            return Err(invalid(at, "expected a plain term"));
        }
        Ok(term)
    }

    fn specializer(&mut self, pair: Pair<'_, Rule>) -> Result<Specializer> {
        let inner = first_inner(pair)?;
        match inner.as_rule() {
            Rule::name => Ok(Specializer::Class(inner.as_str().to_string())),
            Rule::dict => Ok(Specializer::Fields(self.pattern_fields(inner)?)),
            Rule::instance_pattern => {
                let at = loc(&inner);
                let mut parts = inner.into_inner();
                let class = next(&mut parts, at)?.as_str().to_string();
                let fields = self.pattern_fields(next(&mut parts, at)?)?;
                Ok(Specializer::Instance { class, fields })
            }
            _ => Err(unexpected(&inner)),
        }
    }

    fn pattern_fields(&mut self, pair: Pair<'_, Rule>) -> Result<BTreeMap<String, Term>> {
        let at = loc(&pair);
        let mut goals = vec![];
        let fields = self.dict_fields(pair, &mut goals)?;
        if !goals.is_empty() {
            return Err(invalid(at, "patterns may only contain plain terms"));
        }
        Ok(fields)
    }

    fn dict_fields(
        &mut self,
        pair: Pair<'_, Rule>,
        goals: &mut Body,
    ) -> Result<BTreeMap<String, Term>> {
        let mut fields = BTreeMap::new();
        for entry in pair.into_inner() {
            let at = loc(&entry);
            let mut parts = entry.into_inner();
            let key = next(&mut parts, at)?;
            let key = match key.as_rule() {
                Rule::string => unescape(key)?,
                _ => key.as_str().to_string(),
            };
            let value = self.sum(next(&mut parts, at)?, goals)?;
            fields.insert(key, value);
        }
        Ok(fields)
    }

    fn body(&mut self, pair: Pair<'_, Rule>) -> Result<Body> {
        let disjunction = first_inner(pair)?;
        let mut branches = disjunction
            .into_inner()
            .filter(|p| p.as_rule() == Rule::conjunction)
            .map(|p| self.conjunction(p))
            .collect::<Result<Vec<_>>>()?;
        if branches.len() == 1 {
            Ok(branches.remove(0))
        } else {
            Ok(vec![Expr::Or(branches)])
        }
    }

    fn conjunction(&mut self, pair: Pair<'_, Rule>) -> Result<Body> {
        let mut body = vec![];
        for negation in pair
            .into_inner()
            .filter(|p| p.as_rule() == Rule::negation)
        {
            body.extend(self.negation(negation)?);
        }
        Ok(body)
    }

    fn negation(&mut self, pair: Pair<'_, Rule>) -> Result<Body> {
        let at = loc(&pair);
        let mut inner = pair.into_inner();
        let first = next(&mut inner, at)?;
        match first.as_rule() {
            Rule::kw_not => {
                let negated = self.negation(next(&mut inner, at)?)?;
                Ok(vec![Expr::Not(negated)])
            }
            Rule::comparison => self.comparison(first),
            _ => Err(unexpected(&first)),
        }
    }

    fn comparison(&mut self, pair: Pair<'_, Rule>) -> Result<Body> {
        let at = loc(&pair);
        let mut inner = pair.into_inner();
        let left = next(&mut inner, at)?;
        let Some(op) = inner.next() else {
            return self.goal(left);
        };
        let mut goals = vec![];
        if op.as_rule() == Rule::kw_matches {
            let specializer = self.specializer(next(&mut inner, at)?)?;
            let term = self.sum(left, &mut goals)?;
            goals.push(Expr::Isa(term, specializer));
            return Ok(goals);
        }
        let l = self.sum(left, &mut goals)?;
        let r = self.sum(next(&mut inner, at)?, &mut goals)?;
        let expr = match op.as_str() {
            "=" => Expr::Unify(l, r),
            "in" => Expr::In {
                item: l,
                collection: r,
            },
            "==" => Expr::Compare(CompareOp::Eq, l, r),
            "!=" => Expr::Compare(CompareOp::Neq, l, r),
            "<" => Expr::Compare(CompareOp::Lt, l, r),
            "<=" => Expr::Compare(CompareOp::Leq, l, r),
            ">" => Expr::Compare(CompareOp::Gt, l, r),
            ">=" => Expr::Compare(CompareOp::Geq, l, r),
            _ => return Err(unexpected(&op)),
        };
        goals.push(expr);
        Ok(goals)
    }

    /// A term standing on its own as a goal.
    fn goal(&mut self, sum: Pair<'_, Rule>) -> Result<Body> {
        // sum → product → postfix → primary
        if let Some(primary) = only_descendant(&sum, 3) {
            let inner = first_inner(primary)?;
            match inner.as_rule() {
                Rule::call => {
                    let mut goals = vec![];
                    let pred = self.call(inner, &mut goals)?;
                    goals.push(if pred.name == "print" {
                        Expr::Print(pred.args)
                    } else {
                        Expr::Call(pred)
                    });
                    return Ok(goals);
                }
                Rule::kw_cut => return Ok(vec![Expr::Cut]),
                Rule::group => return self.body(first_inner(inner)?),
                Rule::boolean if inner.as_str() == "true" => return Ok(vec![]),
                Rule::boolean => return Ok(vec![Expr::Or(vec![])]),
                _ => {}
            }
        }
        let mut goals = vec![];
        let term = self.sum(sum, &mut goals)?;
        goals.push(Expr::Unify(term, Term::Boolean(true)));
        Ok(goals)
    }

    fn call(&mut self, pair: Pair<'_, Rule>, goals: &mut Body) -> Result<Predicate> {
        let at = loc(&pair);
        let mut parts = pair.into_inner();
        let name = next(&mut parts, at)?.as_str().to_string();
        let args = self.args(next(&mut parts, at)?, goals)?;
        Ok(Predicate::new(name, args))
    }

    fn args(&mut self, pair: Pair<'_, Rule>, goals: &mut Body) -> Result<Vec<Term>> {
        pair.into_inner().map(|s| self.sum(s, goals)).collect()
    }

    fn sum(&mut self, pair: Pair<'_, Rule>, goals: &mut Body) -> Result<Term> {
        let at = loc(&pair);
        let mut inner = pair.into_inner();
        let mut acc = self.product(next(&mut inner, at)?, goals)?;
        while let Some(op) = inner.next() {
            let op = arith_op(&op)?;
            let right = self.product(next(&mut inner, at)?, goals)?;
            acc = self.arithmetic(op, acc, right, goals);
        }
        Ok(acc)
    }

    fn product(&mut self, pair: Pair<'_, Rule>, goals: &mut Body) -> Result<Term> {
        let at = loc(&pair);
        let mut inner = pair.into_inner();
        let mut acc = self.postfix(next(&mut inner, at)?, goals)?;
        while let Some(op) = inner.next() {
            let op = arith_op(&op)?;
            let right = self.postfix(next(&mut inner, at)?, goals)?;
            acc = self.arithmetic(op, acc, right, goals);
        }
        Ok(acc)
    }

    fn arithmetic(&mut self, op: ArithOp, left: Term, right: Term, goals: &mut Body) -> Term {
        let result = self.temp("value");
        goals.push(Expr::Arithmetic {
            op,
            left,
            right,
            result: result.clone(),
        });
        result
    }

    fn postfix(&mut self, pair: Pair<'_, Rule>, goals: &mut Body) -> Result<Term> {
        let at = loc(&pair);
        let mut inner = pair.into_inner();
        let mut acc = self.primary(next(&mut inner, at)?, goals)?;
        for access in inner {
            let at = loc(&access);
            let mut parts = access.into_inner();
            let field = next(&mut parts, at)?.as_str().to_string();
            let args = parts.next().map(|a| self.args(a, goals)).transpose()?;
            let result = self.temp("value");
            goals.push(Expr::Lookup {
                receiver: acc,
                field,
                args,
                result: result.clone(),
            });
            acc = result;
        }
        Ok(acc)
    }

    fn primary(&mut self, pair: Pair<'_, Rule>, goals: &mut Body) -> Result<Term> {
        let inner = first_inner(pair)?;
        let at = loc(&inner);
        match inner.as_rule() {
            Rule::constructor => {
                let mut parts = inner.into_inner().filter(|p| p.as_rule() != Rule::kw_new);
                let class = parts
                    .next()
                    .ok_or_else(|| invalid(at, "missing class name"))?
                    .as_str()
                    .to_string();
                let dict = parts
                    .next()
                    .ok_or_else(|| invalid(at, "missing constructor fields"))?;
                let fields = self.dict_fields(dict, goals)?;
                let result = self.temp("instance");
                goals.push(Expr::New {
                    class,
                    fields,
                    result: result.clone(),
                });
                Ok(result)
            }
            Rule::float => inner
                .as_str()
                .parse::<f64>()
                .map(Term::Float)
                .map_err(|_| ParseError::InvalidFloat {
                    token: inner.as_str().to_string(),
                    loc: at,
                }),
            Rule::integer => inner
                .as_str()
                .parse::<i64>()
                .map(Term::Integer)
                .map_err(|_| ParseError::IntegerOverflow {
                    token: inner.as_str().to_string(),
                    loc: at,
                }),
            Rule::string => Ok(Term::String(unescape(inner)?)),
            Rule::boolean => Ok(Term::Boolean(inner.as_str() == "true")),
            Rule::list => Ok(Term::List(
                inner
                    .into_inner()
                    .map(|s| self.sum(s, goals))
                    .collect::<Result<_>>()?,
            )),
            Rule::dict => Ok(Term::Dictionary(self.dict_fields(inner, goals)?)),
            Rule::call => Ok(Term::Predicate(self.call(inner, goals)?)),
            Rule::variable if inner.as_str() == "_" => Ok(self.temp("anon")),
            Rule::variable => Ok(Term::var(inner.as_str())),
            Rule::group => {
                // group → body → disjunction → conjunction → negation → comparison → sum
                let sum = only_descendant(&inner, 6)
                    .filter(|p| p.as_rule() == Rule::sum)
                    .ok_or_else(|| invalid(at, "expected a term inside parentheses"))?;
                self.sum(sum, goals)
            }
            Rule::kw_cut => Err(invalid(at, "cut is only allowed as a goal")),
            _ => Err(unexpected(&inner)),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::lang::{parse_program, parse_query};

    fn var(name: &str) -> Term {
        Term::var(name)
    }

    #[test]
    fn test_lower_fact() {
        let program = parse_program("f(1);").unwrap();
        assert_eq!(program.rules.len(), 1);
        let rule = &program.rules[0];
        assert_eq!(rule.name, "f");
        assert_eq!(rule.params[0].term, Term::from(1));
        assert!(rule.body.is_empty());
    }

    #[test]
    fn test_lower_flattens_constructor_and_lookup() {
        let program =
            parse_program("id(x) if x = new MyClass{name: \"test\", id: 1}.id;").unwrap();
        assert_eq!(
            program.rules[0].body,
            vec![
                Expr::New {
                    class: "MyClass".to_string(),
                    fields: BTreeMap::from([
                        ("id".to_string(), Term::from(1)),
                        ("name".to_string(), Term::from("test")),
                    ]),
                    result: var("_$instance_1"),
                },
                Expr::Lookup {
                    receiver: var("_$instance_1"),
                    field: "id".to_string(),
                    args: None,
                    result: var("_$value_2"),
                },
                Expr::Unify(var("x"), var("_$value_2")),
            ]
        );
    }

    #[test]
    fn test_temporaries_do_not_capture_policy_variables() {
        let body = parse_query("_value_1 = 2 and x = c.id").unwrap();
        assert_eq!(
            body,
            vec![
                Expr::Unify(var("_value_1"), Term::from(2)),
                Expr::Lookup {
                    receiver: var("c"),
                    field: "id".to_string(),
                    args: None,
                    result: var("_$value_1"),
                },
                Expr::Unify(var("x"), var("_$value_1")),
            ]
        );
    }

    #[test]
    fn test_lower_method_call_arguments() {
        let body = parse_query("x = c.mySubClass(c.name, c.id)").unwrap();
        assert_eq!(
            body,
            vec![
                Expr::Lookup {
                    receiver: var("c"),
                    field: "name".to_string(),
                    args: None,
                    result: var("_$value_1"),
                },
                Expr::Lookup {
                    receiver: var("c"),
                    field: "id".to_string(),
                    args: None,
                    result: var("_$value_2"),
                },
                Expr::Lookup {
                    receiver: var("c"),
                    field: "mySubClass".to_string(),
                    args: Some(vec![var("_$value_1"), var("_$value_2")]),
                    result: var("_$value_3"),
                },
                Expr::Unify(var("x"), var("_$value_3")),
            ]
        );
    }

    #[test]
    fn test_lower_arithmetic_precedence() {
        let body = parse_query("x = 1 + 2 * y").unwrap();
        assert_eq!(
            body,
            vec![
                Expr::Arithmetic {
                    op: ArithOp::Mul,
                    left: Term::from(2),
                    right: var("y"),
                    result: var("_$value_1"),
                },
                Expr::Arithmetic {
                    op: ArithOp::Add,
                    left: Term::from(1),
                    right: var("_$value_1"),
                    result: var("_$value_2"),
                },
                Expr::Unify(var("x"), var("_$value_2")),
            ]
        );
    }

    #[test]
    fn test_lower_control_goals() {
        let body = parse_query("x = 1 or not (x = 2 and cut) or print(x)").unwrap();
        assert_eq!(
            body,
            vec![Expr::Or(vec![
                vec![Expr::Unify(var("x"), Term::from(1))],
                vec![Expr::Not(vec![
                    Expr::Unify(var("x"), Term::from(2)),
                    Expr::Cut
                ])],
                vec![Expr::Print(vec![var("x")])],
            ])]
        );
        assert_eq!(parse_query("true").unwrap(), vec![]);
        assert_eq!(parse_query("false").unwrap(), vec![Expr::Or(vec![])]);
    }

    #[test]
    fn test_lower_specializers() {
        let program =
            parse_program("f(a: Sub, b: {x: 1}, c: Foo{y: z}, _) if a matches Base;").unwrap();
        let params = &program.rules[0].params;
        assert_eq!(
            params[0].specializer,
            Some(Specializer::Class("Sub".to_string()))
        );
        assert_eq!(
            params[1].specializer,
            Some(Specializer::Fields(BTreeMap::from([(
                "x".to_string(),
                Term::from(1)
            )])))
        );
        assert_eq!(
            params[2].specializer,
            Some(Specializer::Instance {
                class: "Foo".to_string(),
                fields: BTreeMap::from([("y".to_string(), var("z"))]),
            })
        );
        assert!(params[3].term.as_variable().unwrap().is_anonymous());
        assert_eq!(
            program.rules[0].body,
            vec![Expr::Isa(var("a"), Specializer::Class("Base".to_string()))]
        );
    }

    #[test]
    fn test_lower_inline_queries() {
        let program = parse_program("f(1); ?= f(1);").unwrap();
        assert_eq!(program.rules.len(), 1);
        assert_eq!(
            program.inline_queries,
            vec![vec![Expr::Call(Predicate::new("f", vec![Term::from(1)]))]]
        );
    }

    #[test]
    fn test_lower_strings_and_membership() {
        let body = parse_query(r#""a\"b" in ["a\"b", 2.5, -3]"#).unwrap();
        assert_eq!(
            body,
            vec![Expr::In {
                item: Term::from("a\"b"),
                collection: Term::List(vec![
                    Term::from("a\"b"),
                    Term::from(2.5),
                    Term::from(-3)
                ]),
            }]
        );
    }

    #[test]
    fn test_integer_overflow() {
        let err = parse_program("f(x) if x = 18446744073709551616;").unwrap_err();
        assert_eq!(
            err,
            ParseError::IntegerOverflow {
                token: "18446744073709551616".to_string(),
                loc: Location::new(1, 13),
            }
        );
        assert_eq!(
            err.to_string(),
            "'18446744073709551616' caused an integer overflow at line 1, column 13"
        );
    }

    #[test]
    fn test_parameters_must_be_plain_terms() {
        let err = parse_program("f(x.y);").unwrap_err();
        assert!(matches!(err, ParseError::InvalidExpression { .. }));
    }
}
