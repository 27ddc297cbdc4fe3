//! weft — an expression engine and reactive scope graph for data binding.
//!
//! Two tightly coupled halves:
//!
//! * a small dynamically-typed expression language, compiled into reusable
//!   evaluators with dependency metadata and sandbox enforcement;
//! * a tree of mutable contexts ("scopes") hosting watchers that a
//!   fixed-point digest re-evaluates until the model settles.
//!
//! ```
//! use weft_lang::{Scope, Value};
//!
//! let root = Scope::root();
//! root.set("price", Value::Number(2.0));
//! root.set("qty", Value::Number(3.0));
//!
//! let seen = std::rc::Rc::new(std::cell::Cell::new(0.0));
//! let out = seen.clone();
//! root.watch("price * qty", move |new, _, _| {
//!     out.set(new.to_number());
//!     Ok(())
//! }).unwrap();
//!
//! root.digest().unwrap();
//! assert_eq!(seen.get(), 6.0);
//! ```

pub mod analysis;
pub mod error;
pub mod filters;
pub mod runtime;
pub mod scope;
pub mod syntax;

pub use error::{DigestError, Error, ErrorCode, ErrorSink, EvalError, TracingSink, WeftError};
pub use filters::{FilterFn, FilterRegistry};
pub use runtime::compiler::{CompiledExpr, WatchMode};
pub use runtime::value::{deep_clone, deep_eq, ref_eq, shallow_clone, Value};
pub use scope::events::{Event, ListenerHandle};
pub use scope::watch::WatchHandle;
pub use scope::{RootOptions, Scope};
pub use syntax::token::{Token, TokenKind};

use std::cell::RefCell;
use std::rc::Rc;

/// Compile a standalone expression against the standard filter registry.
/// Expressions meant to share a scope tree's registry and cache should go
/// through [`Scope::compile`] instead.
pub fn parse(src: &str) -> Result<CompiledExpr, Vec<Error>> {
    CompiledExpr::compile(src, Rc::new(RefCell::new(FilterRegistry::standard())))
}
