//! Entry point tying the pieces together
//!
//! `CTypes` owns the type registry and the collaborators every operation
//! needs (allocator, diagnostic sink, native call primitive, library
//! loader). Create one at startup, adjust it with the builder methods, and
//! share it by reference.

use crate::array::FixedArray;
use crate::binding::LibraryBinding;
use crate::callbacks::{Callback, CallbackTrampoline, CallingConvention, FunctionType};
use crate::diagnostics::{DiagnosticSink, NullSink, TracingSink};
use crate::error::Result;
use crate::layout::AggregateLayout;
use crate::loader::LibraryLoader;
use crate::memory::{Address, RawMemory, SystemMemory};
use crate::native::{FfiClosurePrimitive, NativeCallPrimitive};
use crate::pointer::TypedPointer;
use crate::registry::{TypeDescriptor, TypeRegistry};
use crate::text::Utf8Codec;
use crate::value::Value;
use livetypes_config::LivetypesConfig;
use std::sync::{Arc, Mutex};

pub struct CTypes {
    registry: TypeRegistry,
    memory: Arc<dyn RawMemory>,
    sink: Arc<dyn DiagnosticSink>,
    primitive: Arc<dyn NativeCallPrimitive>,
    loader: Mutex<LibraryLoader>,
    default_convention: CallingConvention,
    log_arguments: bool,
}

impl CTypes {
    /// Built-in types, process heap, diagnostics through `tracing`
    pub fn new() -> Self {
        Self {
            registry: TypeRegistry::with_builtins(Arc::new(Utf8Codec)),
            memory: Arc::new(SystemMemory),
            sink: Arc::new(TracingSink),
            primitive: Arc::new(FfiClosurePrimitive),
            loader: Mutex::new(LibraryLoader::new()),
            default_convention: CallingConvention::Cdecl,
            log_arguments: false,
        }
    }

    /// Apply loaded settings on top of `new()`
    pub fn with_config(config: &LivetypesConfig) -> Result<Self> {
        let default_convention: CallingConvention = config.default_convention().parse()?;
        let sink: Arc<dyn DiagnosticSink> = if config.diagnostics_enabled() {
            Arc::new(TracingSink)
        } else {
            Arc::new(NullSink)
        };
        tracing::debug!(
            convention = %default_convention,
            search_paths = config.search_paths().len(),
            "configured ctypes"
        );

        Ok(Self {
            loader: Mutex::new(LibraryLoader::with_search_paths(config.search_paths())),
            default_convention,
            log_arguments: config.log_arguments(),
            sink,
            ..Self::new()
        })
    }

    pub fn with_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn RawMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_primitive(mut self, primitive: Arc<dyn NativeCallPrimitive>) -> Self {
        self.primitive = primitive;
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// For registering additional types
    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    pub fn memory(&self) -> &Arc<dyn RawMemory> {
        &self.memory
    }

    pub fn default_convention(&self) -> CallingConvention {
        self.default_convention
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<TypeDescriptor>> {
        self.registry.lookup(name)
    }

    /// `sizeof(type)`, with unsized types reported as 1
    pub fn sizeof(&self, name: &str) -> Result<usize> {
        Ok(self.lookup(name)?.size())
    }

    pub fn construct(&self, name: &str, args: &[Value]) -> Result<TypedPointer> {
        self.registry.construct(&self.memory, name, args)
    }

    pub fn malloc(&self, name: &str, count: usize) -> Result<TypedPointer> {
        self.lookup(name)?.malloc(&self.memory, count)
    }

    /// `type * count`
    pub fn array(&self, name: &str, count: usize) -> Result<FixedArray> {
        self.lookup(name)?.multiply(&self.memory, count)
    }

    /// View native memory at `address` as the named type
    ///
    /// # Safety
    ///
    /// See `TypedPointer::from_address`.
    pub unsafe fn pointer(&self, name: &str, address: Address) -> Result<TypedPointer> {
        Ok(TypedPointer::from_address(
            self.lookup(name)?,
            address,
            self.memory.clone(),
        ))
    }

    pub fn structure(&self, name: &str, fields: &[(&str, &str)]) -> Result<Arc<AggregateLayout>> {
        Ok(Arc::new(AggregateLayout::structure(name, &self.registry, fields)?))
    }

    pub fn union(&self, name: &str, fields: &[(&str, &str)]) -> Result<Arc<AggregateLayout>> {
        Ok(Arc::new(AggregateLayout::union(name, &self.registry, fields)?))
    }

    /// Function type under an explicit convention
    pub fn functype(
        &self,
        convention: CallingConvention,
        return_type: &str,
        param_types: &[&str],
    ) -> Result<FunctionType> {
        FunctionType::resolve(convention, &self.registry, return_type, param_types)
    }

    /// `CFUNCTYPE(ret, params...)`
    pub fn cfunctype(&self, return_type: &str, param_types: &[&str]) -> Result<FunctionType> {
        self.functype(CallingConvention::Cdecl, return_type, param_types)
    }

    /// `WINFUNCTYPE(ret, params...)`
    pub fn winfunctype(&self, return_type: &str, param_types: &[&str]) -> Result<FunctionType> {
        self.functype(CallingConvention::Stdcall, return_type, param_types)
    }

    /// Trampoline without a native stub, using this instance's sink
    pub fn trampoline<F>(&self, function_type: &FunctionType, callable: F) -> CallbackTrampoline
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        function_type
            .trampoline(callable, self.memory.clone(), self.sink.clone())
            .with_argument_logging(self.log_arguments)
    }

    /// Trampoline plus native entry point
    pub fn callback<F>(&self, function_type: &FunctionType, callable: F) -> Result<Callback>
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.trampoline(function_type, callable)
            .into_callback(self.primitive.as_ref())
    }

    /// Bind a library under an explicit convention
    pub fn dll(&self, name: &str, convention: CallingConvention) -> Result<LibraryBinding> {
        let mut loader = match self.loader.lock() {
            Ok(loader) => loader,
            Err(poisoned) => poisoned.into_inner(),
        };
        LibraryBinding::open(&mut loader, name, convention)
    }

    /// Bind a library under the configured default convention
    pub fn open(&self, name: &str) -> Result<LibraryBinding> {
        self.dll(name, self.default_convention)
    }

    pub fn cdll(&self, name: &str) -> Result<LibraryBinding> {
        self.dll(name, CallingConvention::Cdecl)
    }

    pub fn windll(&self, name: &str) -> Result<LibraryBinding> {
        self.dll(name, CallingConvention::Stdcall)
    }
}

impl Default for CTypes {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CTypes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CTypes")
            .field("registry", &self.registry)
            .field("default_convention", &self.default_convention)
            .field("log_arguments", &self.log_arguments)
            .finish()
    }
}
