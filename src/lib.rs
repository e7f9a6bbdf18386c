#![allow(clippy::new_without_default)]

pub mod bindings;
pub mod config;
mod error;
pub use error::{Error, Result};
pub mod host;
pub mod kb;
pub mod lang;
pub mod polar;
pub mod query;
pub mod rules;
pub mod terms;
pub mod unify;
pub mod vm;

pub use config::EngineConfig;
pub use host::{CallResult, Class, ExternalObject, Instance, Value};
pub use polar::Polar;
pub use query::{Query, Solution};
