//! The capability interface the query engine uses to reach the host, and
//! the per-query implementation of it.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    iter::Peekable,
    sync::Arc,
};

use log::trace;

use super::{
    value::{CallResult, Value},
    Host,
};
use crate::{
    error::{Error, Result},
    terms::{ExternalInstance, Term},
};

pub type CallId = u64;

/// Target of a method call.
#[derive(Clone, Copy, Debug)]
pub enum Receiver<'a> {
    /// A resolved value, including external instances.
    Term(&'a Term),
    /// A registered class, for class methods.
    Class(&'a str),
}

/// What the engine may ask of the host.
///
/// Attribute accesses and method calls are not answered directly: they open
/// a call whose results are drained one at a time with
/// [`ExternalBridge::next_result`].
pub trait ExternalBridge {
    fn isa(&self, instance: &ExternalInstance, class_tag: &str) -> Result<bool>;

    fn is_subspecializer(
        &self,
        instance: &ExternalInstance,
        left: &str,
        right: &str,
    ) -> Result<Ordering>;

    fn is_class(&self, name: &str) -> bool;

    fn get_attribute(&mut self, receiver: &Term, name: &str) -> Result<CallId>;

    fn call_method(&mut self, receiver: Receiver<'_>, name: &str, args: &[Term])
        -> Result<CallId>;

    fn make_instance(&mut self, alias: &str, fields: &BTreeMap<String, Term>) -> Result<Term>;

    /// Next result of an open call, `None` once it is exhausted. A call is
    /// closed as soon as its last result has been handed out.
    fn next_result(&mut self, call_id: CallId) -> Result<Option<Term>>;

    /// True while a call may still have results.
    fn is_open(&self, call_id: CallId) -> bool;

    /// Drops an open call without draining it.
    fn release_call(&mut self, call_id: CallId);
}

/// Bridge owned by a single query. Dropping it drops every open call.
pub struct HostSession {
    host: Arc<Host>,
    calls: HashMap<CallId, Peekable<Box<dyn Iterator<Item = Value> + Send>>>,
    next_call_id: CallId,
}

impl HostSession {
    pub fn new(host: Arc<Host>) -> Self {
        Self {
            host,
            calls: HashMap::new(),
            next_call_id: 1,
        }
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn open_calls(&self) -> usize {
        self.calls.len()
    }

    fn open(&mut self, result: CallResult) -> CallId {
        let id = self.next_call_id;
        self.next_call_id += 1;
        self.calls.insert(id, result.into_values().peekable());
        id
    }

    fn args(&self, args: &[Term]) -> Result<Vec<Value>> {
        args.iter().map(|t| self.host.to_value(t)).collect()
    }
}

impl ExternalBridge for HostSession {
    fn isa(&self, instance: &ExternalInstance, class_tag: &str) -> Result<bool> {
        self.host.isa(instance.instance_id, class_tag)
    }

    fn is_subspecializer(
        &self,
        instance: &ExternalInstance,
        left: &str,
        right: &str,
    ) -> Result<Ordering> {
        self.host
            .is_subspecializer(instance.instance_id, left, right)
    }

    fn is_class(&self, name: &str) -> bool {
        self.host.is_class(name)
    }

    fn get_attribute(&mut self, receiver: &Term, name: &str) -> Result<CallId> {
        let receiver = self.host.to_value(receiver)?;
        let result = self.host.get_attribute(&receiver, name)?;
        let id = self.open(result);
        trace!("call {}: get_attribute {}", id, name);
        Ok(id)
    }

    fn call_method(
        &mut self,
        receiver: Receiver<'_>,
        name: &str,
        args: &[Term],
    ) -> Result<CallId> {
        let args = self.args(args)?;
        let result = match receiver {
            Receiver::Term(term) => {
                let receiver = self.host.to_value(term)?;
                self.host.call_method(&receiver, name, args)?
            }
            Receiver::Class(alias) => self.host.call_class_method(alias, name, args)?,
        };
        let id = self.open(result);
        trace!("call {}: call_method {}", id, name);
        Ok(id)
    }

    fn make_instance(&mut self, alias: &str, fields: &BTreeMap<String, Term>) -> Result<Term> {
        let fields = fields
            .iter()
            .map(|(k, t)| Ok((k.clone(), self.host.to_value(t)?)))
            .collect::<Result<HashMap<_, _>>>()?;
        let instance_id = self.host.make_instance(alias, fields, None)?;
        Ok(Term::ExternalInstance(ExternalInstance {
            instance_id,
            class_tag: Some(alias.to_string()),
        }))
    }

    fn next_result(&mut self, call_id: CallId) -> Result<Option<Term>> {
        let values = self
            .calls
            .get_mut(&call_id)
            .ok_or(Error::InvalidCallId(call_id))?;
        let next = values.next();
        if next.is_none() || values.peek().is_none() {
            trace!("call {} exhausted", call_id);
            self.calls.remove(&call_id);
        }
        next.map(|value| self.host.to_term(&value)).transpose()
    }

    fn is_open(&self, call_id: CallId) -> bool {
        self.calls.contains_key(&call_id)
    }

    fn release_call(&mut self, call_id: CallId) {
        self.calls.remove(&call_id);
    }
}
