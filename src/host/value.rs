//! Host-side values: what crosses the boundary between the application and
//! the engine.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use anyhow::anyhow;

/// An application object that policies can reference.
///
/// Attribute and method hooks default to failing; implement the ones the
/// policy needs.
pub trait ExternalObject: Any + Send + Sync + fmt::Debug {
    fn get_attribute(&self, name: &str) -> anyhow::Result<CallResult> {
        Err(anyhow!("no attribute `{}` on {:?}", name, self))
    }

    fn call_method(&self, name: &str, _args: Vec<Value>) -> anyhow::Result<CallResult> {
        Err(anyhow!("no method `{}` on {:?}", name, self))
    }

    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to an application object.
#[derive(Clone, Debug)]
pub struct Instance(Arc<dyn ExternalObject>);

impl Instance {
    pub fn new<T: ExternalObject>(object: T) -> Self {
        Self(Arc::new(object))
    }

    pub fn object(&self) -> &dyn ExternalObject {
        self.0.as_ref()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }

    pub fn type_id(&self) -> TypeId {
        self.0.as_any().type_id()
    }

    /// Address of the shared object; identical for every clone.
    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Dictionary(HashMap<String, Value>),
    Instance(Instance),
    Predicate { name: String, args: Vec<Value> },
    /// Placeholder that becomes a query variable.
    Variable(String),
}

impl Value {
    pub fn instance<T: ExternalObject>(object: T) -> Self {
        Value::Instance(Instance::new(object))
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Value::Variable(name.into())
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Value::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<Instance> for Value {
    fn from(i: Instance) -> Self {
        Value::Instance(i)
    }
}

/// What an attribute access or method call produced.
pub enum CallResult {
    Single(Value),
    /// One solution per element, in iteration order.
    Many(Box<dyn Iterator<Item = Value> + Send>),
}

impl CallResult {
    pub fn single(value: impl Into<Value>) -> Self {
        CallResult::Single(value.into())
    }

    pub fn many<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        CallResult::Many(Box::new(values.into_iter()))
    }

    pub fn into_values(self) -> Box<dyn Iterator<Item = Value> + Send> {
        match self {
            CallResult::Single(v) => Box::new(std::iter::once(v)),
            CallResult::Many(values) => values,
        }
    }
}

impl From<Value> for CallResult {
    fn from(v: Value) -> Self {
        CallResult::Single(v)
    }
}

impl fmt::Debug for CallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallResult::Single(v) => f.debug_tuple("Single").field(v).finish(),
            CallResult::Many(_) => f.write_str("Many(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug)]
    struct Widget(i64);

    impl ExternalObject for Widget {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_instance_identity() {
        let a = Instance::new(Widget(1));
        let b = Instance::new(Widget(1));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.downcast_ref::<Widget>().map(|w| w.0), Some(1));
        assert_eq!(a.type_id(), TypeId::of::<Widget>());
    }

    #[test]
    fn test_default_hooks_fail() {
        let w = Widget(1);
        assert!(w.get_attribute("x").is_err());
        assert!(w.call_method("m", vec![]).is_err());
    }

    #[test]
    fn test_call_result_values() {
        let single: Vec<_> = CallResult::single(1).into_values().collect();
        assert_eq!(single, vec![Value::Integer(1)]);
        let many: Vec<_> = CallResult::many(vec![Value::from("a"), Value::from("b")])
            .into_values()
            .collect();
        assert_eq!(many, vec![Value::from("a"), Value::from("b")]);
    }
}
