//! Typed pointers: a descriptor paired with a native address
//!
//! A `TypedPointer` never owns the memory it points at. Cloning one makes
//! an alias; dropping one frees nothing. `free` is an explicit,
//! caller-owned operation.
//!
//! # Safety
//!
//! Pointer arithmetic is unchecked, matching native pointer semantics.
//! `index` and friends are `unsafe` because the resulting address may lie
//! outside any allocation; dereferencing such a pointer is undefined
//! behavior.

use crate::error::Result;
use crate::memory::{Address, RawMemory};
use crate::registry::TypeDescriptor;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct TypedPointer {
    descriptor: Arc<TypeDescriptor>,
    address: Address,
    memory: Arc<dyn RawMemory>,
}

impl TypedPointer {
    /// Pointer to memory the crate itself just allocated or laid out
    pub(crate) fn owned(
        descriptor: Arc<TypeDescriptor>,
        address: Address,
        memory: Arc<dyn RawMemory>,
    ) -> Self {
        Self {
            descriptor,
            address,
            memory,
        }
    }

    /// View existing native memory through `descriptor`
    ///
    /// # Safety
    ///
    /// `address` must be valid for reads and writes of the descriptor's
    /// size for as long as the pointer is dereferenced or assigned.
    pub unsafe fn from_address(
        descriptor: Arc<TypeDescriptor>,
        address: Address,
        memory: Arc<dyn RawMemory>,
    ) -> Self {
        Self::owned(descriptor, address, memory)
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn memory(&self) -> &Arc<dyn RawMemory> {
        &self.memory
    }

    pub fn address_of(&self) -> Address {
        self.address
    }

    /// Distance between consecutive elements, never 0
    pub fn stride(&self) -> usize {
        self.descriptor.size()
    }

    /// Point somewhere else (used by custom constructors)
    ///
    /// # Safety
    ///
    /// Same contract as `from_address`.
    pub unsafe fn set_address(&mut self, address: Address) {
        self.address = address;
    }

    pub fn dereference(&self) -> Result<Value> {
        // SAFETY: upheld by whoever produced this pointer
        Ok(unsafe { self.descriptor.decode(self.memory.as_ref(), self.address) }?)
    }

    pub fn assign(&self, value: &Value) -> Result<()> {
        // SAFETY: upheld by whoever produced this pointer
        Ok(unsafe {
            self.descriptor
                .encode(self.memory.as_ref(), self.address, value)
        }?)
    }

    /// Pointer `i` elements away: `address + i * stride`
    ///
    /// # Safety
    ///
    /// The result is only dereferenceable if it stays inside the
    /// allocation this pointer belongs to.
    pub unsafe fn index(&self, i: isize) -> TypedPointer {
        let bytes = i.wrapping_mul(self.stride() as isize);
        Self::owned(
            self.descriptor.clone(),
            self.address.offset_signed(bytes),
            self.memory.clone(),
        )
    }

    /// # Safety
    ///
    /// See `index`.
    pub unsafe fn index_get(&self, i: isize) -> Result<Value> {
        self.index(i).dereference()
    }

    /// # Safety
    ///
    /// See `index`.
    pub unsafe fn index_assign(&self, i: isize, value: &Value) -> Result<()> {
        self.index(i).assign(value)
    }

    /// Release the allocation this pointer addresses
    ///
    /// # Safety
    ///
    /// The address must be the start of a live allocation from this
    /// pointer's memory, and no alias may be used afterwards.
    pub unsafe fn free(self) {
        self.memory.free(self.address);
    }
}

impl fmt::Display for TypedPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dereference() {
            Ok(value) => write!(f, "{}({})", self.descriptor.name(), value),
            Err(e) => write!(f, "{}(<{}>)", self.descriptor.name(), e),
        }
    }
}

impl fmt::Debug for TypedPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedPointer")
            .field("type", &self.descriptor.name())
            .field("address", &self.address)
            .finish()
    }
}
