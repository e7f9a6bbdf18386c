//! The embedding side of the engine: class registrations, the instance
//! cache, and conversion between host values and terms.

pub mod bridge;
pub mod builtins;
pub mod class;
pub mod value;

use std::{
    any::TypeId,
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicU64, Ordering as AtomicOrdering},
};

use log::debug;
use parking_lot::RwLock;

pub use bridge::{CallId, ExternalBridge, HostSession, Receiver};
pub use class::{Class, ClassBuilder};
pub use value::{CallResult, ExternalObject, Instance, Value};

use crate::{
    error::{Error, Result},
    terms::{ExternalInstance, Predicate, Term},
};

#[derive(Debug, Default)]
struct Registry {
    classes: HashMap<String, Class>,
    aliases: HashMap<TypeId, String>,
}

impl Registry {
    /// Aliases of `type_id` and its registered ancestors, most specific first.
    fn mro(&self, type_id: TypeId) -> Vec<&str> {
        let mut chain = vec![];
        let mut current = Some(type_id);
        while let Some(id) = current {
            let Some(alias) = self.aliases.get(&id) else {
                break;
            };
            if chain.contains(&alias.as_str()) {
                break;
            }
            chain.push(alias.as_str());
            current = self.classes.get(alias).and_then(|c| c.parent);
        }
        chain
    }
}

#[derive(Debug, Default)]
struct InstanceCache {
    by_id: HashMap<u64, Instance>,
    by_address: HashMap<usize, u64>,
}

/// Shared host state. Read-shared by every query; registrations and cache
/// insertions go through interior locks.
#[derive(Debug)]
pub struct Host {
    registry: RwLock<Registry>,
    instances: RwLock<InstanceCache>,
    next_instance_id: AtomicU64,
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

impl Host {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            instances: RwLock::new(InstanceCache::default()),
            next_instance_id: AtomicU64::new(1),
        }
    }

    /// Registers a class. Reusing an alias or registering the same type twice
    /// fails and keeps the existing registration.
    pub fn register_class(&self, class: Class) -> Result<()> {
        let mut registry = self.registry.write();
        if registry.classes.contains_key(&class.alias) {
            return Err(Error::duplicate_alias(
                &class.alias,
                "alias is already registered",
            ));
        }
        if let Some(existing) = registry.aliases.get(&class.type_id) {
            return Err(Error::duplicate_alias(
                &class.alias,
                format!("{} is already registered as `{}`", class.type_name, existing),
            ));
        }
        debug!("registering {} as `{}`", class.type_name, class.alias);
        registry.aliases.insert(class.type_id, class.alias.clone());
        registry.classes.insert(class.alias.clone(), class);
        Ok(())
    }

    pub fn is_class(&self, alias: &str) -> bool {
        self.registry.read().classes.contains_key(alias)
    }

    fn class_tag(&self, instance: &Instance) -> Option<String> {
        self.registry.read().aliases.get(&instance.type_id()).cloned()
    }

    /// Caches an instance and returns its handle. The same object always gets
    /// the same handle; `id` requests a specific handle for a new object.
    pub fn cache_instance(&self, instance: Instance, id: Option<u64>) -> Result<u64> {
        let mut cache = self.instances.write();
        if let Some(existing) = cache.by_address.get(&instance.address()) {
            return match id {
                Some(id) if id != *existing => Err(Error::runtime(format!(
                    "instance is already cached with id {}",
                    existing
                ))),
                _ => Ok(*existing),
            };
        }
        let id = match id {
            Some(id) if cache.by_id.contains_key(&id) => {
                return Err(Error::runtime(format!("instance id {} is already in use", id)))
            }
            Some(id) => id,
            None => loop {
                let id = self.next_instance_id.fetch_add(1, AtomicOrdering::Relaxed);
                if !cache.by_id.contains_key(&id) {
                    break id;
                }
            },
        };
        cache.by_address.insert(instance.address(), id);
        cache.by_id.insert(id, instance);
        Ok(id)
    }

    pub fn instance(&self, id: u64) -> Result<Instance> {
        self.instances
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownInstance(id))
    }

    pub fn to_term(&self, value: &Value) -> Result<Term> {
        Ok(match value {
            Value::Boolean(b) => Term::Boolean(*b),
            Value::Integer(i) => Term::Integer(*i),
            Value::Float(x) => Term::Float(*x),
            Value::String(s) => Term::String(s.clone()),
            Value::List(items) => Term::List(
                items
                    .iter()
                    .map(|v| self.to_term(v))
                    .collect::<Result<_>>()?,
            ),
            Value::Dictionary(fields) => Term::Dictionary(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.to_term(v)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?,
            ),
            Value::Instance(instance) => Term::ExternalInstance(ExternalInstance {
                class_tag: self.class_tag(instance),
                instance_id: self.cache_instance(instance.clone(), None)?,
            }),
            Value::Predicate { name, args } => Term::Predicate(Predicate::new(
                name.clone(),
                args.iter()
                    .map(|v| self.to_term(v))
                    .collect::<Result<_>>()?,
            )),
            Value::Variable(name) => Term::var(name.clone()),
        })
    }

    pub fn to_value(&self, term: &Term) -> Result<Value> {
        Ok(match term {
            Term::Boolean(b) => Value::Boolean(*b),
            Term::Integer(i) => Value::Integer(*i),
            Term::Float(x) => Value::Float(*x),
            Term::String(s) => Value::String(s.clone()),
            Term::List(items) => Value::List(
                items
                    .iter()
                    .map(|t| self.to_value(t))
                    .collect::<Result<_>>()?,
            ),
            Term::Dictionary(fields) => Value::Dictionary(
                fields
                    .iter()
                    .map(|(k, t)| Ok((k.clone(), self.to_value(t)?)))
                    .collect::<Result<HashMap<_, _>>>()?,
            ),
            Term::ExternalInstance(i) => Value::Instance(self.instance(i.instance_id)?),
            Term::Predicate(p) => Value::Predicate {
                name: p.name.clone(),
                args: p
                    .args
                    .iter()
                    .map(|t| self.to_value(t))
                    .collect::<Result<_>>()?,
            },
            Term::Variable(v) => Value::Variable(v.name.clone()),
        })
    }

    /// True if the cached instance is of class `alias` or one of its
    /// registered subclasses.
    pub fn isa(&self, instance_id: u64, alias: &str) -> Result<bool> {
        let instance = self.instance(instance_id)?;
        let registry = self.registry.read();
        if !registry.classes.contains_key(alias) {
            return Err(Error::UnregisteredClass(alias.to_string()));
        }
        Ok(registry.mro(instance.type_id()).contains(&alias))
    }

    /// Orders two class aliases by how closely they match the instance's
    /// type. `Less` means `left` is more specific.
    pub fn is_subspecializer(&self, instance_id: u64, left: &str, right: &str) -> Result<Ordering> {
        let instance = self.instance(instance_id)?;
        let registry = self.registry.read();
        let mro = registry.mro(instance.type_id());
        let position = |alias: &str| mro.iter().position(|a| *a == alias);
        Ok(match (position(left), position(right)) {
            (Some(l), Some(r)) => l.cmp(&r),
            _ => Ordering::Equal,
        })
    }

    /// Runs the registered constructor of `alias` and caches the result.
    pub fn make_instance(
        &self,
        alias: &str,
        fields: HashMap<String, Value>,
        id: Option<u64>,
    ) -> Result<u64> {
        let constructor = {
            let registry = self.registry.read();
            let class = registry
                .classes
                .get(alias)
                .ok_or_else(|| Error::UnregisteredClass(alias.to_string()))?;
            class
                .constructor
                .clone()
                .ok_or_else(|| Error::runtime(format!("class `{}` has no constructor", alias)))?
        };
        let instance = constructor(fields).map_err(|e| Error::external_call(alias, e))?;
        self.cache_instance(instance, id)
    }

    pub fn get_attribute(&self, receiver: &Value, name: &str) -> Result<CallResult> {
        let result = match receiver {
            Value::Instance(i) => i.object().get_attribute(name),
            other => builtins::get_attribute(other, name),
        };
        result.map_err(|e| Error::external_call(name, e))
    }

    pub fn call_method(&self, receiver: &Value, name: &str, args: Vec<Value>) -> Result<CallResult> {
        let result = match receiver {
            Value::Instance(i) => i.object().call_method(name, args),
            other => builtins::call_method(other, name, args),
        };
        result.map_err(|e| Error::external_call(name, e))
    }

    pub fn call_class_method(&self, alias: &str, name: &str, args: Vec<Value>) -> Result<CallResult> {
        let method = {
            let registry = self.registry.read();
            let class = registry
                .classes
                .get(alias)
                .ok_or_else(|| Error::UnregisteredClass(alias.to_string()))?;
            class.class_methods.get(name).cloned().ok_or_else(|| Error::ExternalCall {
                name: name.to_string(),
                message: format!("no class method `{}` on `{}`", name, alias),
            })?
        };
        method(args).map_err(|e| Error::external_call(name, e))
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug)]
    struct Base;
    #[derive(Debug)]
    struct Sub;
    #[derive(Debug)]
    struct Unregistered;

    impl ExternalObject for Base {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
    impl ExternalObject for Sub {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
    impl ExternalObject for Unregistered {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn host() -> Host {
        let host = Host::new();
        host.register_class(Class::builder::<Base>("Base").constructor(|_| Ok(Base)).build())
            .unwrap();
        host.register_class(Class::builder::<Sub>("Sub").extends::<Base>().build())
            .unwrap();
        host
    }

    #[test]
    fn test_duplicate_registration_keeps_original() {
        let host = host();
        let err = host
            .register_class(Class::builder::<Unregistered>("Base").build())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateClassAlias { .. }));
        let err = host
            .register_class(Class::builder::<Base>("Other").build())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateClassAlias { .. }));
        assert!(!host.is_class("Other"));
        let id = host.make_instance("Base", HashMap::new(), None).unwrap();
        assert!(host.isa(id, "Base").unwrap());
    }

    #[test]
    fn test_isa_walks_parents() {
        let host = host();
        let sub = host.cache_instance(Instance::new(Sub), None).unwrap();
        let base = host.cache_instance(Instance::new(Base), None).unwrap();
        assert!(host.isa(sub, "Sub").unwrap());
        assert!(host.isa(sub, "Base").unwrap());
        assert!(!host.isa(base, "Sub").unwrap());
        assert!(matches!(
            host.isa(base, "Missing"),
            Err(Error::UnregisteredClass(_))
        ));
        assert_eq!(
            host.is_subspecializer(sub, "Sub", "Base").unwrap(),
            Ordering::Less
        );
        assert_eq!(
            host.is_subspecializer(sub, "Base", "Sub").unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            host.is_subspecializer(base, "Sub", "Base").unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn test_cache_dedupes_by_identity() {
        let host = host();
        let a = Instance::new(Base);
        let first = host.cache_instance(a.clone(), None).unwrap();
        assert_eq!(host.cache_instance(a.clone(), None).unwrap(), first);
        let other = host.cache_instance(Instance::new(Base), None).unwrap();
        assert_ne!(first, other);
        assert_eq!(host.instance(first).unwrap(), a);
        assert!(matches!(host.instance(999), Err(Error::UnknownInstance(999))));
        assert!(host.cache_instance(Instance::new(Base), Some(first)).is_err());
    }

    #[test]
    fn test_term_round_trip() {
        let host = host();
        let instance = Instance::new(Sub);
        let values = vec![
            Value::Boolean(true),
            Value::Integer(1),
            Value::Float(1.0),
            Value::from("hello"),
            Value::from(vec![Value::Integer(1), Value::from("two")]),
            Value::Dictionary(HashMap::from([
                ("a".to_string(), Value::Integer(1)),
                ("b".to_string(), Value::Float(2.5)),
            ])),
            Value::Instance(instance.clone()),
            Value::Predicate {
                name: "name".to_string(),
                args: vec![Value::Integer(1), Value::from("hello")],
            },
        ];
        for value in values {
            let term = host.to_term(&value).unwrap();
            assert_eq!(host.to_value(&term).unwrap(), value);
        }
        assert_eq!(host.to_term(&Value::Integer(1)).unwrap(), Term::Integer(1));
        assert_eq!(host.to_term(&Value::Float(1.0)).unwrap(), Term::Float(1.0));
        let Term::ExternalInstance(cached) = host.to_term(&Value::Instance(instance)).unwrap()
        else {
            panic!("expected an external instance");
        };
        assert_eq!(cached.class_tag.as_deref(), Some("Sub"));
    }

    #[test]
    fn test_make_instance_requires_registration() {
        let host = host();
        assert!(matches!(
            host.make_instance("Missing", HashMap::new(), None),
            Err(Error::UnregisteredClass(_))
        ));
        assert!(matches!(
            host.make_instance("Sub", HashMap::new(), None),
            Err(Error::Runtime(_))
        ));
    }
}
