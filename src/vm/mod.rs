//! The query engine: a goal stack and a choice stack driven one solution at
//! a time.
//!
//! Goals are popped from the top of `goals`. A goal that fails rewinds the
//! machine to the most recent choice point: bindings are rolled back to the
//! choice's checkpoint, the goal stack is restored from its snapshot and the
//! next alternative is pushed on top. Solutions are produced lazily, each
//! call to [`Vm::next`] resumes where the previous one stopped.

mod dispatch;
mod goal;
pub mod trace;

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use itertools::Itertools;
use log::{debug, info, trace, warn};
use parking_lot::RwLock;
use strum_macros::Display;

use self::{
    goal::{body_goals, Goal},
    trace::{TraceEvent, Tracer},
};
use crate::{
    bindings::{Bindings, Checkpoint},
    config::EngineConfig,
    error::{Error, Result},
    host::{CallId, ExternalBridge, Receiver},
    kb::KnowledgeBase,
    rules::{ArithOp, Body, CompareOp, Expr},
    terms::{Term, VarId, Variable},
    unify::unify,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum QueryState {
    Ready,
    Running,
    /// Waiting on the host for the next result of an external call.
    SuspendedOnExternal,
    Solution,
    Backtrack,
    Done,
}

/// A point the machine can rewind to.
struct Choice {
    /// Remaining alternatives, the next one last.
    alternatives: Vec<Vec<Arc<Goal>>>,
    bindings: Checkpoint,
    goals: Vec<Arc<Goal>>,
    trace_stack: Vec<trace::TraceId>,
}

pub struct Vm<B: ExternalBridge> {
    kb: Arc<RwLock<KnowledgeBase>>,
    bridge: B,
    config: EngineConfig,
    goals: Vec<Arc<Goal>>,
    choices: Vec<Choice>,
    bindings: Bindings,
    next_var_id: VarId,
    /// Variables of the query, in order of appearance, reported in solutions.
    query_vars: Vec<Variable>,
    state: QueryState,
    tracer: Tracer,
}

/// Returns a renaming that maps every variable name to one fresh variable.
fn rename_vars(next_var_id: &mut VarId) -> impl FnMut(&Variable) -> Term + '_ {
    let mut renames: HashMap<String, Variable> = HashMap::new();
    move |v| {
        let fresh = renames.entry(v.name.clone()).or_insert_with(|| {
            *next_var_id += 1;
            Variable::new(v.name.clone(), *next_var_id)
        });
        Term::Variable(fresh.clone())
    }
}

impl<B: ExternalBridge> Vm<B> {
    pub fn new(kb: Arc<RwLock<KnowledgeBase>>, bridge: B, config: EngineConfig, body: Body) -> Self {
        let mut next_var_id = 0;
        let body: Body = {
            let mut rename = rename_vars(&mut next_var_id);
            body.iter().map(|e| e.map_variables(&mut rename)).collect()
        };
        let mut vars = vec![];
        body.iter().for_each(|e| e.variables(&mut vars));
        // An unbound variable named after a class is a class reference.
        let query_vars = vars
            .into_iter()
            .filter(|v| !v.is_anonymous() && !bridge.is_class(&v.name))
            .collect();
        debug!("query: {}", crate::rules::fmt_body(&body));

        let mut vm = Self {
            kb,
            bridge,
            tracer: Tracer::new(config.tracing),
            config,
            goals: vec![],
            choices: vec![],
            bindings: Bindings::new(),
            next_var_id,
            query_vars,
            state: QueryState::Ready,
        };
        vm.push_goals(body_goals(&body, 0));
        vm
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn trace(&self) -> &[TraceEvent] {
        self.tracer.events()
    }

    pub fn trace_json(&self) -> Result<String> {
        Ok(self.tracer.to_json()?)
    }

    /// Produces the next solution, `None` once the query is exhausted.
    ///
    /// A fatal error ends the query: every later call returns `Ok(None)`.
    pub fn next(&mut self) -> Result<Option<HashMap<String, Term>>> {
        match self.run() {
            Ok(solution) => Ok(solution),
            Err(e) => {
                debug!("query aborted: {}", e);
                self.goals.clear();
                self.choices.clear();
                self.state = QueryState::Done;
                Err(e)
            }
        }
    }

    fn run(&mut self) -> Result<Option<HashMap<String, Term>>> {
        match self.state {
            QueryState::Done => return Ok(None),
            QueryState::Solution => {
                self.state = QueryState::Backtrack;
                if !self.backtrack("next solution") {
                    return Ok(self.finish());
                }
            }
            _ => {}
        }
        self.state = QueryState::Running;

        while let Some(goal) = self.goals.pop() {
            if self.step(&goal)? {
                if self.goals.len() > self.config.max_goals {
                    return Err(Error::StackOverflow(format!(
                        "more than {} pending goals",
                        self.config.max_goals
                    )));
                }
            } else {
                self.state = QueryState::Backtrack;
                if !self.backtrack("goal failed") {
                    return Ok(self.finish());
                }
                self.state = QueryState::Running;
            }
        }

        self.state = QueryState::Solution;
        let solution: HashMap<String, Term> = self
            .query_vars
            .iter()
            .map(|v| {
                let value = self.bindings.deep_resolve(&Term::Variable(v.clone()));
                (v.name.clone(), value)
            })
            .collect();
        if self.tracer.is_enabled() {
            self.tracer.result(
                solution
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            );
        }
        Ok(Some(solution))
    }

    fn finish(&mut self) -> Option<HashMap<String, Term>> {
        self.state = QueryState::Done;
        self.tracer.done();
        None
    }

    /// Pushes goals given in execution order.
    fn push_goals(&mut self, goals: Vec<Arc<Goal>>) {
        self.goals.extend(goals.into_iter().rev());
    }

    fn push_goal(&mut self, goal: Goal) {
        self.goals.push(Arc::new(goal));
    }

    fn push_choice(&mut self, mut alternatives: Vec<Vec<Arc<Goal>>>) -> Result<()> {
        if self.choices.len() >= self.config.max_choices {
            return Err(Error::StackOverflow(format!(
                "more than {} open choice points",
                self.config.max_choices
            )));
        }
        self.tracer.choice_push(alternatives.len());
        alternatives.reverse();
        self.choices.push(Choice {
            alternatives,
            bindings: self.bindings.checkpoint(),
            goals: self.goals.clone(),
            trace_stack: self.tracer.stack(),
        });
        Ok(())
    }

    /// Continues with the first alternative, keeping the rest as a choice
    /// point. Fails when there are no alternatives.
    fn choose(&mut self, mut alternatives: Vec<Vec<Arc<Goal>>>) -> Result<bool> {
        match alternatives.len() {
            0 => Ok(false),
            1 => {
                self.push_goals(alternatives.remove(0));
                Ok(true)
            }
            _ => {
                self.push_choice(alternatives)?;
                Ok(self.next_alternative())
            }
        }
    }

    fn backtrack(&mut self, reason: &str) -> bool {
        trace!("backtrack: {}", reason);
        self.tracer.backtrack(reason);
        self.next_alternative()
    }

    /// Rewinds to the most recent choice point with an alternative left.
    fn next_alternative(&mut self) -> bool {
        loop {
            let Some(choice) = self.choices.last_mut() else {
                return false;
            };
            let Some(alternative) = choice.alternatives.pop() else {
                self.choices.pop();
                continue;
            };
            let checkpoint = choice.bindings;
            let (goals, trace_stack) = if choice.alternatives.is_empty() {
                match self.choices.pop() {
                    Some(spent) => (spent.goals, spent.trace_stack),
                    None => return false,
                }
            } else {
                (choice.goals.clone(), choice.trace_stack.clone())
            };
            self.bindings.rollback(checkpoint);
            self.goals = goals;
            self.tracer.restore_stack(trace_stack);
            self.tracer.execute_choice();
            self.push_goals(alternative);
            return true;
        }
    }

    /// Runs one goal. `Ok(false)` fails the current branch.
    fn step(&mut self, goal: &Goal) -> Result<bool> {
        if !self.tracer.is_enabled() {
            return self.run_goal(goal);
        }
        let checkpoint = self.bindings.checkpoint();
        let succeeded = self.run_goal(goal)?;
        if succeeded && self.bindings.checkpoint() > checkpoint {
            let bound = self
                .bindings
                .bound_since(checkpoint)
                .map(|(var, value)| (var.name.clone(), value.to_string()))
                .collect();
            self.tracer.bindings(bound);
        }
        Ok(succeeded)
    }

    fn run_goal(&mut self, goal: &Goal) -> Result<bool> {
        match goal {
            Goal::Expr { expr, cut_barrier } => {
                trace!("goal: {}", expr);
                self.tracer.execute_goal(|| expr.to_string());
                self.query_expr(expr, *cut_barrier)
            }
            Goal::Unify(left, right) => Ok(unify(left, right, &mut self.bindings)),
            Goal::NextExternal { call_id, result } => self.next_external(*call_id, result),
            Goal::Cut(depth) => {
                self.choices.truncate(*depth);
                Ok(true)
            }
            Goal::Backtrack => Ok(false),
            Goal::TraceRule { rule, parent } => {
                self.tracer.push_rule(&rule.to_string(), *parent);
                Ok(true)
            }
            Goal::TracePop => {
                self.tracer.pop_rule();
                Ok(true)
            }
        }
    }

    fn query_expr(&mut self, expr: &Expr, cut_barrier: usize) -> Result<bool> {
        match expr {
            Expr::Unify(left, right) => Ok(unify(left, right, &mut self.bindings)),
            Expr::Compare(op, left, right) => self.compare(*op, left, right),
            Expr::Arithmetic {
                op,
                left,
                right,
                result,
            } => {
                let value = self.arithmetic(*op, left, right)?;
                Ok(unify(result, &value, &mut self.bindings))
            }
            Expr::Call(pred) => self.query_call(pred),
            Expr::Lookup {
                receiver,
                field,
                args,
                result,
            } => self.lookup(receiver, field, args.as_deref(), result),
            Expr::New {
                class,
                fields,
                result,
            } => self.construct(class, fields, result),
            Expr::In { item, collection } => self.member(item, collection),
            Expr::Isa(term, specializer) => self.isa(term, specializer),
            Expr::Not(body) => self.negate(body),
            Expr::Or(branches) => {
                let alternatives = branches
                    .iter()
                    .map(|branch| body_goals(branch, cut_barrier))
                    .collect();
                self.choose(alternatives)
            }
            Expr::Cut => {
                self.choices.truncate(cut_barrier);
                Ok(true)
            }
            Expr::Print(args) => {
                info!(
                    "{}",
                    args.iter()
                        .map(|a| self.bindings.deep_resolve(a))
                        .join(", ")
                );
                Ok(true)
            }
        }
    }

    /// Negation as failure: succeeds iff `body` has no solution, and never
    /// binds anything.
    fn negate(&mut self, body: &[Expr]) -> Result<bool> {
        let barrier = self.choices.len();
        // taken when the body fails: carry on with the remaining goals
        self.push_choice(vec![vec![]])?;
        let mut goals = body_goals(body, barrier + 1);
        goals.push(Arc::new(Goal::Cut(barrier)));
        goals.push(Arc::new(Goal::Backtrack));
        self.push_goals(goals);
        Ok(true)
    }

    fn compare(&mut self, op: CompareOp, left: &Term, right: &Term) -> Result<bool> {
        let left = self.bindings.deep_resolve(left);
        let right = self.bindings.deep_resolve(right);
        let ordering = match op {
            CompareOp::Eq => return Ok(left == right),
            CompareOp::Neq => return Ok(left != right),
            _ => compare_terms(&left, &right)?,
        };
        // NaN compares false against everything
        let Some(ordering) = ordering else {
            return Ok(false);
        };
        Ok(match op {
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Leq => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Geq => ordering != Ordering::Less,
            CompareOp::Eq | CompareOp::Neq => false,
        })
    }

    fn arithmetic(&mut self, op: ArithOp, left: &Term, right: &Term) -> Result<Term> {
        let left = self.bindings.resolve(left);
        let right = self.bindings.resolve(right);
        match (&left, &right) {
            (Term::Integer(a), Term::Integer(b)) => {
                let (a, b) = (*a, *b);
                let value = match op {
                    ArithOp::Add => a.checked_add(b),
                    ArithOp::Sub => a.checked_sub(b),
                    ArithOp::Mul => a.checked_mul(b),
                    ArithOp::Div if b == 0 => return Err(Error::runtime("division by zero")),
                    ArithOp::Div => a.checked_div(b),
                };
                value
                    .map(Term::Integer)
                    .ok_or_else(|| Error::runtime(format!("integer overflow: {} {} {}", a, op, b)))
            }
            (Term::Integer(_) | Term::Float(_), Term::Integer(_) | Term::Float(_)) => {
                let (a, b) = (as_f64(&left), as_f64(&right));
                Ok(Term::Float(match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                }))
            }
            _ => Err(Error::runtime(format!(
                "cannot apply `{}` to {} and {}",
                op, left, right
            ))),
        }
    }

    fn lookup(
        &mut self,
        receiver: &Term,
        field: &str,
        args: Option<&[Term]>,
        result: &Term,
    ) -> Result<bool> {
        let args: Option<Vec<Term>> =
            args.map(|args| args.iter().map(|a| self.bindings.deep_resolve(a)).collect());
        let call = match self.bindings.resolve(receiver) {
            Term::Variable(v) if self.bridge.is_class(&v.name) => self.bridge.call_method(
                Receiver::Class(&v.name),
                field,
                args.as_deref().unwrap_or_default(),
            ),
            Term::Variable(v) => {
                return Err(Error::runtime(format!(
                    "cannot look up `{}` on unbound variable `{}`",
                    field, v.name
                )))
            }
            target => {
                let target = self.bindings.deep_resolve(&target);
                match &args {
                    Some(args) => self.bridge.call_method(Receiver::Term(&target), field, args),
                    None => self.bridge.get_attribute(&target, field),
                }
            }
        };
        match call {
            Ok(call_id) => {
                self.push_goal(Goal::NextExternal {
                    call_id,
                    result: result.clone(),
                });
                Ok(true)
            }
            Err(e) if e.is_branch_local() => {
                warn!("{}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Unifies `result` with the next value of an open call. While the call
    /// has more results, leaves a choice point that polls again on
    /// backtracking.
    fn next_external(&mut self, call_id: CallId, result: &Term) -> Result<bool> {
        self.state = QueryState::SuspendedOnExternal;
        let next = self.bridge.next_result(call_id);
        self.state = QueryState::Running;
        match next {
            Ok(Some(value)) => {
                if self.bridge.is_open(call_id) {
                    self.push_choice(vec![vec![Arc::new(Goal::NextExternal {
                        call_id,
                        result: result.clone(),
                    })]])?;
                }
                Ok(unify(result, &value, &mut self.bindings))
            }
            Ok(None) => Ok(false),
            Err(e) if e.is_branch_local() => {
                warn!("{}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn construct(
        &mut self,
        class: &str,
        fields: &BTreeMap<String, Term>,
        result: &Term,
    ) -> Result<bool> {
        let fields: BTreeMap<String, Term> = fields
            .iter()
            .map(|(k, v)| (k.clone(), self.bindings.deep_resolve(v)))
            .collect();
        match self.bridge.make_instance(class, &fields) {
            Ok(instance) => Ok(unify(result, &instance, &mut self.bindings)),
            Err(e) if e.is_branch_local() => {
                warn!("{}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// `item in collection`: one branch per element of a list, or per
    /// `[key, value]` pair of a dictionary.
    fn member(&mut self, item: &Term, collection: &Term) -> Result<bool> {
        let elements: Vec<Term> = match self.bindings.resolve(collection) {
            Term::List(items) => items,
            Term::Dictionary(fields) => fields
                .into_iter()
                .map(|(k, v)| Term::List(vec![Term::String(k), v]))
                .collect(),
            Term::Variable(v) => {
                return Err(Error::runtime(format!(
                    "cannot iterate over unbound variable `{}`",
                    v.name
                )))
            }
            other => return Err(Error::runtime(format!("cannot iterate over {}", other))),
        };
        let alternatives = elements
            .into_iter()
            .map(|element| vec![Arc::new(Goal::Unify(item.clone(), element))])
            .collect();
        self.choose(alternatives)
    }
}

fn as_f64(term: &Term) -> f64 {
    match term {
        Term::Integer(i) => *i as f64,
        Term::Float(x) => *x,
        _ => f64::NAN,
    }
}

/// Orders numbers (integers and floats mixed) and strings. `None` for NaN.
fn compare_terms(left: &Term, right: &Term) -> Result<Option<Ordering>> {
    Ok(match (left, right) {
        (Term::Integer(a), Term::Integer(b)) => Some(a.cmp(b)),
        (Term::Integer(_) | Term::Float(_), Term::Integer(_) | Term::Float(_)) => {
            as_f64(left).partial_cmp(&as_f64(right))
        }
        (Term::String(a), Term::String(b)) => Some(a.cmp(b)),
        _ => {
            return Err(Error::runtime(format!(
                "cannot compare {} and {}",
                left, right
            )))
        }
    })
}
