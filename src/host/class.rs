use std::{
    any::{type_name, TypeId},
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::Arc,
};

use super::value::{CallResult, ExternalObject, Instance, Value};

pub type Constructor =
    Arc<dyn Fn(HashMap<String, Value>) -> anyhow::Result<Instance> + Send + Sync>;
pub type ClassMethod = Arc<dyn Fn(Vec<Value>) -> anyhow::Result<CallResult> + Send + Sync>;

/// Registration record of an application type.
#[derive(Clone)]
pub struct Class {
    pub alias: String,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub constructor: Option<Constructor>,
    pub parent: Option<TypeId>,
    pub class_methods: HashMap<String, ClassMethod>,
}

impl Class {
    pub fn builder<T: ExternalObject>(alias: impl Into<String>) -> ClassBuilder<T> {
        ClassBuilder::new(alias)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("alias", &self.alias)
            .field("type_name", &self.type_name)
            .field("has_constructor", &self.constructor.is_some())
            .field("parent", &self.parent)
            .field("class_methods", &self.class_methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct ClassBuilder<T> {
    class: Class,
    _type: PhantomData<T>,
}

impl<T: ExternalObject> ClassBuilder<T> {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            class: Class {
                alias: alias.into(),
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                constructor: None,
                parent: None,
                class_methods: HashMap::new(),
            },
            _type: PhantomData,
        }
    }

    /// Builds instances for `new Alias{...}` from the given fields.
    pub fn constructor<F>(mut self, f: F) -> Self
    where
        F: Fn(HashMap<String, Value>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.class.constructor = Some(Arc::new(move |fields| f(fields).map(Instance::new)));
        self
    }

    /// Declares `P` as the parent type for specializer checks.
    pub fn extends<P: ExternalObject>(mut self) -> Self {
        self.class.parent = Some(TypeId::of::<P>());
        self
    }

    pub fn class_method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<CallResult> + Send + Sync + 'static,
    {
        self.class.class_methods.insert(name.into(), Arc::new(f));
        self
    }

    pub fn build(self) -> Class {
        self.class
    }
}
