//! Type descriptors and the registry that interns them by name
//!
//! A `TypeDescriptor` knows how many bytes a native type occupies and how
//! to move a `Value` in and out of those bytes. The registry maps names to
//! descriptors; registering an existing name replaces the previous entry
//! (last registration wins).

use crate::builtins;
use crate::error::{Error, MarshalError, Result};
use crate::memory::{Address, RawMemory};
use crate::pointer::TypedPointer;
use crate::text::TextCodec;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Reads a value of the described type at an address
pub type DecodeFn =
    Arc<dyn Fn(&dyn RawMemory, Address) -> std::result::Result<Value, MarshalError> + Send + Sync>;

/// Writes a value of the described type at an address
pub type EncodeFn = Arc<
    dyn Fn(&dyn RawMemory, Address, &Value) -> std::result::Result<(), MarshalError> + Send + Sync,
>;

/// Custom initialization for `construct`; may retarget the pointer
pub type ConstructFn = Arc<dyn Fn(&mut TypedPointer, Option<&Value>) -> Result<()> + Send + Sync>;

/// Size and codec of one native type
pub struct TypeDescriptor {
    name: String,
    declared_size: usize,
    decode: DecodeFn,
    encode: EncodeFn,
    constructor: Option<ConstructFn>,
}

impl TypeDescriptor {
    /// Create a descriptor
    ///
    /// A `size` of 0 marks a pointer-like or unsized type; `size()` reports
    /// it as 1.
    pub fn new<D, E>(name: impl Into<String>, size: usize, decode: D, encode: E) -> Self
    where
        D: Fn(&dyn RawMemory, Address) -> std::result::Result<Value, MarshalError>
            + Send
            + Sync
            + 'static,
        E: Fn(&dyn RawMemory, Address, &Value) -> std::result::Result<(), MarshalError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            declared_size: size,
            decode: Arc::new(decode),
            encode: Arc::new(encode),
            constructor: None,
        }
    }

    pub fn with_constructor<C>(mut self, constructor: C) -> Self
    where
        C: Fn(&mut TypedPointer, Option<&Value>) -> Result<()> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(constructor));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size as registered, possibly 0
    pub fn declared_size(&self) -> usize {
        self.declared_size
    }

    /// Byte size with 0 normalized to 1; also the indexing stride
    pub fn size(&self) -> usize {
        self.declared_size.max(1)
    }

    pub fn has_constructor(&self) -> bool {
        self.constructor.is_some()
    }

    /// Decode the value stored at `address`
    ///
    /// # Safety
    ///
    /// `address` must be readable for the bytes this type's codec reads.
    pub unsafe fn decode(
        &self,
        memory: &dyn RawMemory,
        address: Address,
    ) -> std::result::Result<Value, MarshalError> {
        (self.decode)(memory, address)
    }

    /// Encode `value` at `address`
    ///
    /// # Safety
    ///
    /// `address` must be writable for the bytes this type's codec writes.
    pub unsafe fn encode(
        &self,
        memory: &dyn RawMemory,
        address: Address,
        value: &Value,
    ) -> std::result::Result<(), MarshalError> {
        (self.encode)(memory, address, value)
    }

    /// Allocate one element and initialize it from `args`
    ///
    /// With a constructor, initialization is delegated to it (first
    /// argument, if any). Otherwise a single argument is encoded and any
    /// other argument count zero-fills the allocation.
    pub fn instantiate(
        self: &Arc<Self>,
        memory: &Arc<dyn RawMemory>,
        args: &[Value],
    ) -> Result<TypedPointer> {
        let size = self.size();
        let placeholder = memory.alloc(size)?;
        let mut pointer = TypedPointer::owned(self.clone(), placeholder, memory.clone());

        let init = match (&self.constructor, args) {
            (Some(constructor), _) => {
                // SAFETY: placeholder was just allocated with `size` bytes
                unsafe { memory.fill(placeholder, size, 0) };
                constructor(&mut pointer, args.first())
            }
            (None, [value]) => pointer.assign(value),
            (None, _) => {
                // SAFETY: as above
                unsafe { memory.fill(placeholder, size, 0) };
                Ok(())
            }
        };

        match init {
            Ok(()) => {
                if pointer.address_of() != placeholder {
                    // SAFETY: the constructor retargeted away from our allocation
                    unsafe { memory.free(placeholder) };
                }
                Ok(pointer)
            }
            Err(e) => {
                // SAFETY: nothing outside this function has seen the allocation
                unsafe { memory.free(placeholder) };
                Err(e)
            }
        }
    }

    /// Allocate `count` uninitialized elements
    pub fn malloc(self: &Arc<Self>, memory: &Arc<dyn RawMemory>, count: usize) -> Result<TypedPointer> {
        let address = memory.alloc(count.saturating_mul(self.size()))?;
        Ok(TypedPointer::owned(self.clone(), address, memory.clone()))
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("size", &self.declared_size)
            .field("constructor", &self.constructor.is_some())
            .finish()
    }
}

/// Name → descriptor table
///
/// One registry is normally created at startup and shared by reference for
/// the life of the process; descriptors handed out stay valid even if the
/// name is later re-registered.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<TypeDescriptor>>,
}

impl TypeRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in C scalar and string types
    pub fn with_builtins(text: Arc<dyn TextCodec>) -> Self {
        let mut registry = Self::new();
        builtins::install(&mut registry, text);
        registry
    }

    /// Insert or replace a descriptor
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        let descriptor = Arc::new(descriptor);
        if let Some(previous) = self
            .types
            .insert(descriptor.name().to_string(), descriptor.clone())
        {
            tracing::debug!(
                name = descriptor.name(),
                previous_size = previous.declared_size(),
                size = descriptor.declared_size(),
                "type re-registered, replacing previous descriptor"
            );
        }
        descriptor
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<TypeDescriptor>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Allocate and initialize one value of the named type
    pub fn construct(
        &self,
        memory: &Arc<dyn RawMemory>,
        name: &str,
        args: &[Value],
    ) -> Result<TypedPointer> {
        self.lookup(name)?.instantiate(memory, args)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.names())
            .finish()
    }
}
