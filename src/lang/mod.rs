//! Policy language front-end: parsing and lowering into rules.
//!
//! - [`parse_program`]: a policy document of rules and `?=` inline queries.
//! - [`parse_query`]: a standalone query body such as `f(x) and x > 1`.
//!
//! Both go through the pest grammar in `grammar.pest` and then through
//! [`lower::Lowerer`], which flattens nested expressions into goals.
pub mod error;
pub mod lower;
pub mod parser;

pub use error::{Location, ParseError};
pub use lower::Program;

use crate::rules::Body;

/// Parses and lowers a policy document.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let pairs = parser::parse_document(source)?;
    lower::Lowerer::default().document(pairs)
}

/// Parses and lowers a query.
pub fn parse_query(source: &str) -> Result<Body, ParseError> {
    let pairs = parser::parse_query(source)?;
    lower::Lowerer::default().query(pairs)
}
