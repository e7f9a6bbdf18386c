use std::sync::Arc;

use super::trace::TraceId;
use crate::{
    host::CallId,
    rules::{Expr, Rule},
    terms::Term,
};

/// Unit of work on the goal stack.
#[derive(Clone, Debug)]
pub enum Goal {
    /// A body expression. `cut_barrier` is the choice depth a `cut` in it
    /// returns to.
    Expr { expr: Expr, cut_barrier: usize },
    Unify(Term, Term),
    /// Poll an open external call and unify its next result with `result`.
    NextExternal { call_id: CallId, result: Term },
    /// Drop every choice above this depth.
    Cut(usize),
    Backtrack,
    /// Start tracing `rule`, evaluated for the call goal `parent`.
    TraceRule { rule: Arc<Rule>, parent: TraceId },
    TracePop,
}

/// Goals for `body` in execution order.
pub fn body_goals(body: &[Expr], cut_barrier: usize) -> Vec<Arc<Goal>> {
    body.iter()
        .map(|expr| {
            Arc::new(Goal::Expr {
                expr: expr.clone(),
                cut_barrier,
            })
        })
        .collect()
}
