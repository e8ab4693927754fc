//! Object model of a managed language VM: tagged values, the object heap,
//! classes and functions, canonicalized types with subtyping and
//! instantiation, and the call site caches the runtime dispatches through.

mod arguments;
mod call_cache;
mod canonical;
mod class;
mod class_finalizer;
mod code;
mod descriptors;
mod error;
mod exceptions;
mod field;
mod function;
mod header;
mod heap;
mod ic_data;
mod instance;
mod isolate;
mod library;
mod megamorphic;
mod names;
mod numbers;
mod object;
mod printing;
mod script;
mod strings;
mod subtype_test_cache;
mod tagged;
mod types;
mod visitor;

#[cfg(test)]
mod testing;

pub use arguments::*;
pub use call_cache::*;
pub use canonical::*;
pub use class::*;
pub use class_finalizer::*;
pub use code::*;
pub use descriptors::*;
pub use error::*;
pub use exceptions::*;
pub use field::*;
pub use function::*;
pub use header::*;
pub use heap::*;
pub use ic_data::*;
pub use instance::*;
pub use isolate::*;
pub use library::*;
pub use megamorphic::*;
pub use names::*;
pub use numbers::*;
pub use object::*;
pub use script::*;
pub use strings::*;
pub use subtype_test_cache::*;
pub use tagged::*;
pub use types::*;
pub use visitor::*;
