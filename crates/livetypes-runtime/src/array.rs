//! Fixed arrays: `descriptor * count`
//!
//! The length is informational. Element access is plain pointer indexing
//! and is not checked against it.

use crate::error::Result;
use crate::memory::{Address, RawMemory};
use crate::pointer::TypedPointer;
use crate::registry::TypeDescriptor;
use crate::value::Value;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct FixedArray {
    base: TypedPointer,
    length: usize,
}

impl TypeDescriptor {
    /// Allocate room for `count` contiguous elements of this type
    pub fn multiply(
        self: &Arc<Self>,
        memory: &Arc<dyn RawMemory>,
        count: usize,
    ) -> Result<FixedArray> {
        Ok(FixedArray {
            base: self.malloc(memory, count)?,
            length: count,
        })
    }
}

impl FixedArray {
    /// Treat existing memory as an array
    ///
    /// # Safety
    ///
    /// Same contract as `TypedPointer::from_address`, for every element
    /// that will be touched.
    pub unsafe fn from_pointer(base: TypedPointer, length: usize) -> Self {
        Self { base, length }
    }

    /// Write `values` to elements `0..values.len()`
    ///
    /// # Safety
    ///
    /// `values.len()` must not exceed the allocated element count.
    pub unsafe fn init(&self, values: &[Value]) -> Result<&Self> {
        for (i, value) in values.iter().enumerate() {
            self.set(i, value)?;
        }
        Ok(self)
    }

    /// # Safety
    ///
    /// `i` must be inside the allocation.
    pub unsafe fn get(&self, i: usize) -> Result<Value> {
        self.base.index_get(i as isize)
    }

    /// # Safety
    ///
    /// `i` must be inside the allocation.
    pub unsafe fn set(&self, i: usize, value: &Value) -> Result<()> {
        self.base.index_assign(i as isize, value)
    }

    /// # Safety
    ///
    /// See `TypedPointer::index`.
    pub unsafe fn index(&self, i: usize) -> TypedPointer {
        self.base.index(i as isize)
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// `len() * stride`
    pub fn byte_size(&self) -> usize {
        self.length * self.base.stride()
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        self.base.descriptor()
    }

    pub fn as_pointer(&self) -> &TypedPointer {
        &self.base
    }

    pub fn address_of(&self) -> Address {
        self.base.address_of()
    }

    /// # Safety
    ///
    /// See `TypedPointer::free`.
    pub unsafe fn free(self) {
        self.base.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SystemMemory;
    use crate::registry::TypeRegistry;
    use crate::text::Utf8Codec;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn int_array(count: usize) -> FixedArray {
        let registry = TypeRegistry::with_builtins(Arc::new(Utf8Codec));
        let memory: Arc<dyn RawMemory> = Arc::new(SystemMemory);
        registry.lookup("c_int32").unwrap().multiply(&memory, count).unwrap()
    }

    #[test]
    fn test_multiply_sizes() {
        let array = int_array(5);
        assert_eq!(array.len(), 5);
        assert_eq!(array.byte_size(), 20);
        unsafe { array.free() };
    }

    #[test]
    fn test_init_then_read() {
        let array = int_array(5);
        let values: Vec<Value> = [10, 20, 30, 40, 50].into_iter().map(Value::Int).collect();
        unsafe {
            array.init(&values).unwrap();
            assert_eq!(array.index(2).dereference().unwrap(), Value::Int(30));
            assert_eq!(array.get(4).unwrap(), Value::Int(50));
            array.free();
        }
    }

    #[test]
    fn test_set_overwrites_single_element() {
        let array = int_array(3);
        unsafe {
            array
                .init(&[Value::Int(1), Value::Int(2), Value::Int(3)])
                .unwrap();
            array.set(1, &Value::Int(-2)).unwrap();
            assert_eq!(array.get(0).unwrap(), Value::Int(1));
            assert_eq!(array.get(1).unwrap(), Value::Int(-2));
            assert_eq!(array.get(2).unwrap(), Value::Int(3));
            array.free();
        }
    }

    proptest! {
        #[test]
        fn prop_array_round_trip(values in prop::collection::vec(any::<i32>(), 1..32)) {
            let array = int_array(values.len());
            let encoded: Vec<Value> = values.iter().map(|v| Value::Int(*v as i64)).collect();
            unsafe {
                array.init(&encoded).unwrap();
                for (i, v) in values.iter().enumerate() {
                    prop_assert_eq!(array.get(i).unwrap(), Value::Int(*v as i64));
                }
                array.free();
            }
        }
    }
}
