//! Aggregate layouts: structures (sequential fields) and unions (overlaid fields)
//!
//! A layout is a fixed schema of named fields. Offsets are computed once
//! when the layout is defined; field access builds a `TypedPointer` at
//! `base + offset` and goes through it.
//!
//! Fields are packed: no alignment padding is inserted between them.

use crate::error::{Error, Result};
use crate::memory::{Address, RawMemory};
use crate::pointer::TypedPointer;
use crate::registry::{TypeDescriptor, TypeRegistry};
use crate::value::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LAYOUT_ID: AtomicU64 = AtomicU64::new(1);

/// How field offsets are assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutKind {
    /// Structure: each field follows the previous one
    Sequential,
    /// Union: every field starts at offset 0
    Overlaid,
}

/// Pre-resolved handle to a field of one particular layout
///
/// Carries the identity of the layout that issued it, so a handle from a
/// different layout never aliases a field that happens to share its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId {
    layout: u64,
    index: usize,
}

#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    descriptor: Arc<TypeDescriptor>,
    offset: usize,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

#[derive(Debug)]
pub struct AggregateLayout {
    id: u64,
    name: String,
    kind: LayoutKind,
    fields: Vec<Field>,
    size: usize,
}

impl AggregateLayout {
    /// Define a layout from already-resolved descriptors
    pub fn new(
        name: impl Into<String>,
        kind: LayoutKind,
        fields: Vec<(String, Arc<TypeDescriptor>)>,
    ) -> Result<Self> {
        let name = name.into();
        let mut seen = HashSet::new();
        let mut laid_out = Vec::with_capacity(fields.len());
        let mut cursor = 0usize;
        let mut widest = 0usize;

        for (field_name, descriptor) in fields {
            if !seen.insert(field_name.clone()) {
                return Err(Error::InvalidLayout(format!(
                    "duplicate field '{}' in {}",
                    field_name, name
                )));
            }
            let offset = match kind {
                LayoutKind::Sequential => cursor,
                LayoutKind::Overlaid => 0,
            };
            cursor += descriptor.size();
            widest = widest.max(descriptor.size());
            laid_out.push(Field {
                name: field_name,
                descriptor,
                offset,
            });
        }

        let size = match kind {
            LayoutKind::Sequential => cursor,
            LayoutKind::Overlaid => widest,
        };

        Ok(Self {
            id: NEXT_LAYOUT_ID.fetch_add(1, Ordering::Relaxed),
            name,
            kind,
            fields: laid_out,
            size: size.max(1),
        })
    }

    /// Define a layout by resolving `(field, type name)` pairs
    pub fn resolve(
        name: impl Into<String>,
        kind: LayoutKind,
        registry: &TypeRegistry,
        fields: &[(&str, &str)],
    ) -> Result<Self> {
        let resolved = fields
            .iter()
            .map(|(field, type_name)| Ok((field.to_string(), registry.lookup(type_name)?)))
            .collect::<Result<Vec<_>>>()?;
        Self::new(name, kind, resolved)
    }

    pub fn structure(
        name: impl Into<String>,
        registry: &TypeRegistry,
        fields: &[(&str, &str)],
    ) -> Result<Self> {
        Self::resolve(name, LayoutKind::Sequential, registry, fields)
    }

    pub fn union(
        name: impl Into<String>,
        registry: &TypeRegistry,
        fields: &[(&str, &str)],
    ) -> Result<Self> {
        Self::resolve(name, LayoutKind::Overlaid, registry, fields)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LayoutKind {
        self.kind
    }

    /// Total byte size, at least 1
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Resolve a field name once for repeated typed access
    pub fn field(&self, name: &str) -> Result<FieldId> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .map(|index| FieldId {
                layout: self.id,
                index,
            })
            .ok_or_else(|| Error::UnknownField {
                layout: self.name.clone(),
                field: name.to_string(),
            })
    }

    pub fn offset_of(&self, name: &str) -> Result<usize> {
        let id = self.field(name)?;
        Ok(self.fields[id.index].offset)
    }

    /// Allocate zero-filled storage for one instance
    pub fn alloc(self: &Arc<Self>, memory: &Arc<dyn RawMemory>) -> Result<Aggregate> {
        let base = memory.alloc(self.size)?;
        // SAFETY: base was just allocated with `size` bytes
        unsafe { memory.fill(base, self.size, 0) };
        Ok(Aggregate {
            layout: self.clone(),
            base,
            memory: memory.clone(),
        })
    }

    /// Overlay this layout on existing memory
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `size()` bytes.
    pub unsafe fn from_address(
        self: &Arc<Self>,
        memory: &Arc<dyn RawMemory>,
        base: Address,
    ) -> Aggregate {
        Aggregate {
            layout: self.clone(),
            base,
            memory: memory.clone(),
        }
    }
}

/// One instance of a layout at a base address
#[derive(Clone)]
pub struct Aggregate {
    layout: Arc<AggregateLayout>,
    base: Address,
    memory: Arc<dyn RawMemory>,
}

impl Aggregate {
    pub fn layout(&self) -> &Arc<AggregateLayout> {
        &self.layout
    }

    pub fn address_of(&self) -> Address {
        self.base
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }

    pub fn offset_of(&self, name: &str) -> Result<usize> {
        self.layout.offset_of(name)
    }

    /// Typed pointer to a field
    ///
    /// A `FieldId` that did not come from this layout is reported as an
    /// unknown field.
    pub fn pointer(&self, id: FieldId) -> Result<TypedPointer> {
        let field = if id.layout == self.layout.id {
            self.layout.fields.get(id.index)
        } else {
            None
        };
        let field = field.ok_or_else(|| Error::UnknownField {
            layout: self.layout.name.clone(),
            field: format!("#{}", id.index),
        })?;
        Ok(TypedPointer::owned(
            field.descriptor.clone(),
            self.base.offset(field.offset),
            self.memory.clone(),
        ))
    }

    pub fn member(&self, name: &str) -> Result<TypedPointer> {
        self.pointer(self.layout.field(name)?)
    }

    pub fn get(&self, id: FieldId) -> Result<Value> {
        self.pointer(id)?.dereference()
    }

    pub fn set(&self, id: FieldId, value: &Value) -> Result<()> {
        self.pointer(id)?.assign(value)
    }

    pub fn get_field(&self, name: &str) -> Result<Value> {
        self.member(name)?.dereference()
    }

    pub fn set_field(&self, name: &str, value: &Value) -> Result<()> {
        self.member(name)?.assign(value)
    }

    /// Name-based access in accessor form
    ///
    /// `"x"` reads field `x`; `"x="` writes the first argument to it and
    /// returns the value written. Unknown names fail, fields are never
    /// created on the fly.
    pub fn dispatch(&self, selector: &str, args: &[Value]) -> Result<Value> {
        match selector.strip_suffix('=') {
            Some(name) => {
                let value = args.first().cloned().unwrap_or(Value::Null);
                self.set_field(name, &value)?;
                Ok(value)
            }
            None => self.get_field(selector),
        }
    }

    /// # Safety
    ///
    /// The aggregate must own its storage (from `alloc`) and no alias may
    /// be used afterwards.
    pub unsafe fn free(self) {
        self.memory.free(self.base);
    }
}

impl fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregate")
            .field("layout", &self.layout.name)
            .field("base", &self.base)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SystemMemory;
    use crate::text::Utf8Codec;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn registry() -> TypeRegistry {
        TypeRegistry::with_builtins(Arc::new(Utf8Codec))
    }

    fn memory() -> Arc<dyn RawMemory> {
        Arc::new(SystemMemory)
    }

    #[rstest]
    #[case("c_int", "c_double", 4, 12)]
    #[case("c_byte", "c_int16", 1, 3)]
    #[case("c_char_p", "c_int", 1, 5)]
    fn test_sequential_offsets(
        #[case] first: &str,
        #[case] second: &str,
        #[case] offset_b: usize,
        #[case] size: usize,
    ) {
        let layout =
            AggregateLayout::structure("S", &registry(), &[("a", first), ("b", second)]).unwrap();
        assert_eq!(layout.offset_of("a").unwrap(), 0);
        assert_eq!(layout.offset_of("b").unwrap(), offset_b);
        assert_eq!(layout.size(), size);
    }

    #[rstest]
    #[case("c_int", "c_double", 8)]
    #[case("c_byte", "c_int16", 2)]
    fn test_overlaid_offsets(#[case] first: &str, #[case] second: &str, #[case] size: usize) {
        let layout =
            AggregateLayout::union("U", &registry(), &[("a", first), ("b", second)]).unwrap();
        assert_eq!(layout.offset_of("a").unwrap(), 0);
        assert_eq!(layout.offset_of("b").unwrap(), 0);
        assert_eq!(layout.size(), size);
    }

    #[test]
    fn test_empty_layout_has_size_one() {
        let layout = AggregateLayout::structure("Empty", &registry(), &[]).unwrap();
        assert_eq!(layout.size(), 1);
        let union = AggregateLayout::union("Empty", &registry(), &[]).unwrap();
        assert_eq!(union.size(), 1);
    }

    #[test]
    fn test_unknown_field_type_propagates() {
        let err = AggregateLayout::structure("S", &registry(), &[("a", "c_nope")]).unwrap_err();
        assert!(matches!(err, Error::UnknownType(_)));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = AggregateLayout::structure("S", &registry(), &[("a", "c_int"), ("a", "c_int")])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLayout(_)));
    }

    #[test]
    fn test_union_fields_share_storage() {
        let layout = Arc::new(
            AggregateLayout::union("U", &registry(), &[("word", "c_uint32"), ("low", "c_uint8")])
                .unwrap(),
        );
        let u = layout.alloc(&memory()).unwrap();
        u.set_field("word", &Value::UInt(0x1234_5678)).unwrap();
        assert_eq!(u.get_field("low").unwrap(), Value::UInt(0x78));
        unsafe { u.free() };
    }

    #[test]
    fn test_typed_field_access() {
        let layout = Arc::new(
            AggregateLayout::structure("P", &registry(), &[("x", "c_int"), ("y", "c_float")])
                .unwrap(),
        );
        let y = layout.field("y").unwrap();
        let p = layout.alloc(&memory()).unwrap();
        p.set(y, &Value::Float(5.0)).unwrap();
        assert_eq!(p.get(y).unwrap(), Value::Float(5.0));
        assert_eq!(p.get_field("x").unwrap(), Value::Int(0));
        unsafe { p.free() };
    }

    #[test]
    fn test_dispatch_reads_and_writes() {
        let layout = Arc::new(
            AggregateLayout::structure("P", &registry(), &[("x", "c_int"), ("y", "c_float")])
                .unwrap(),
        );
        let p = layout.alloc(&memory()).unwrap();
        assert_eq!(p.dispatch("x=", &[Value::Int(3)]).unwrap(), Value::Int(3));
        p.dispatch("y=", &[Value::Int(5)]).unwrap();
        assert_eq!(p.dispatch("x", &[]).unwrap(), Value::Int(3));
        assert_eq!(p.dispatch("y", &[]).unwrap(), Value::Float(5.0));
        assert!(matches!(
            p.dispatch("z=", &[Value::Int(1)]),
            Err(Error::UnknownField { .. })
        ));
        assert!(matches!(
            p.dispatch("z", &[]),
            Err(Error::UnknownField { .. })
        ));
        unsafe { p.free() };
    }

    #[test]
    fn test_foreign_field_id_is_unknown() {
        let small = Arc::new(AggregateLayout::structure("A", &registry(), &[("a", "c_int")]).unwrap());
        let big = AggregateLayout::structure("B", &registry(), &[("a", "c_int"), ("b", "c_int")])
            .unwrap();
        let foreign = big.field("b").unwrap();
        let a = small.alloc(&memory()).unwrap();
        assert!(matches!(a.get(foreign), Err(Error::UnknownField { .. })));
        unsafe { a.free() };
    }

    #[test]
    fn test_field_id_from_same_shaped_layout_is_rejected() {
        let fields = [("b", "c_int"), ("r", "c_int")];
        let a_layout = Arc::new(AggregateLayout::structure("A", &registry(), &fields).unwrap());
        let b_layout = AggregateLayout::structure("B", &registry(), &fields).unwrap();
        let b_r = b_layout.field("r").unwrap();
        let a = a_layout.alloc(&memory()).unwrap();

        assert!(matches!(
            a.set(b_r, &Value::Int(1)),
            Err(Error::UnknownField { .. })
        ));
        assert!(matches!(a.get(b_r), Err(Error::UnknownField { .. })));
        assert_eq!(a.get_field("b").unwrap(), Value::Int(0));
        assert_eq!(a.get_field("r").unwrap(), Value::Int(0));
        assert_ne!(a_layout.field("r").unwrap(), b_r);
        unsafe { a.free() };
    }
}
