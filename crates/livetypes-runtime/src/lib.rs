//! Livetypes Runtime - marshalling between host values and native memory
//!
//! This library provides:
//! - A registry of named native type descriptors (C scalars and strings)
//! - Typed pointers and fixed-length arrays over raw memory
//! - Structure and union layouts with named and typed field access
//! - Callback trampolines exposing host functions to native callers
//! - Thin bindings for calling exports of shared libraries
//!
//! # Example
//!
//! ```no_run
//! use livetypes_runtime::{CTypes, Value};
//!
//! let ct = CTypes::new();
//! let point = ct.structure("Point", &[("x", "c_int32"), ("y", "c_int32")]).unwrap();
//! let p = point.alloc(ct.memory()).unwrap();
//! p.set_field("x", &Value::Int(10)).unwrap();
//! assert_eq!(p.get_field("x").unwrap(), Value::Int(10));
//! ```

/// Livetypes runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod array;
pub mod binding;
mod builtins;
pub mod callbacks;
pub mod ctypes;
pub mod diagnostics;
pub mod error;
pub mod layout;
pub mod loader;
pub mod memory;
pub mod native;
pub mod pointer;
pub mod registry;
pub mod text;
pub mod value;

pub use array::FixedArray;
pub use binding::{ExportedFunction, LibraryBinding};
pub use callbacks::{
    Callback, CallbackFailure, CallbackTrampoline, CallingConvention, FunctionType, HostCallable,
};
pub use ctypes::CTypes;
pub use diagnostics::{
    CallbackDiagnostic, DiagnosticSink, FailureStage, MemorySink, NullSink, TracingSink,
};
pub use error::{Error, MarshalError, Result};
pub use layout::{Aggregate, AggregateLayout, Field, FieldId, LayoutKind};
pub use loader::{LibraryLoader, LoadError};
pub use memory::{Address, RawMemory, SystemMemory};
pub use native::{FfiClosurePrimitive, FrameHandler, NativeCallPrimitive, NativeStub};
pub use pointer::TypedPointer;
pub use registry::{TypeDescriptor, TypeRegistry};
pub use text::{TextCodec, Utf8Codec};
pub use value::Value;
