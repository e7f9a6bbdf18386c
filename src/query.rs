//! Lazy query results as host values.

use std::collections::HashMap;

use crate::{
    error::Result,
    host::{HostSession, Value},
    vm::{trace::TraceEvent, QueryState, Vm},
};

/// One solution: query variable name → value.
pub type Solution = HashMap<String, Value>;

/// A running query. Each call to [`Iterator::next`] resumes evaluation until
/// the next solution; the iterator ends after the last solution or after the
/// first error.
pub struct Query {
    vm: Vm<HostSession>,
    failed: bool,
}

impl Query {
    pub(crate) fn new(vm: Vm<HostSession>) -> Self {
        Self { vm, failed: false }
    }

    pub fn next_solution(&mut self) -> Result<Option<Solution>> {
        if self.failed {
            return Ok(None);
        }
        let solution = match self.vm.next() {
            Ok(Some(solution)) => solution,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.failed = true;
                return Err(e);
            }
        };
        let host = self.vm.bridge().host();
        solution
            .iter()
            .map(|(name, term)| Ok((name.clone(), host.to_value(term)?)))
            .collect::<Result<Solution>>()
            .map(Some)
    }

    /// Drains the query.
    pub fn results(mut self) -> Result<Vec<Solution>> {
        let mut results = vec![];
        while let Some(solution) = self.next_solution()? {
            results.push(solution);
        }
        Ok(results)
    }

    pub fn state(&self) -> QueryState {
        self.vm.state()
    }

    /// Events recorded so far; empty unless tracing is enabled.
    pub fn trace(&self) -> &[TraceEvent] {
        self.vm.trace()
    }

    pub fn trace_json(&self) -> Result<String> {
        self.vm.trace_json()
    }
}

impl Iterator for Query {
    type Item = Result<Solution>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_solution().transpose()
    }
}

impl std::iter::FusedIterator for Query {}
