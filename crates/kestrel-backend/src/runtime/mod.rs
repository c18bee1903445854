//! Runtime types shared between the compiler and the execution engine.

pub mod scope_chain;
pub mod value;

pub use scope_chain::ScopeChain;
pub use value::Value;
