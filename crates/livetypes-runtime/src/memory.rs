//! Raw native memory: addresses, allocation and byte access
//!
//! The marshalling layer never owns native memory. Everything it reads or
//! writes goes through a `RawMemory` implementation handed to it by the
//! caller; `SystemMemory` is the process heap via `malloc`/`free`.
//!
//! # Safety
//!
//! No access is bounds checked. Reads and writes are `unsafe` and require
//! the address range to be valid for the requested length, exactly like a
//! native pointer dereference.

use crate::error::{Error, Result};
use std::fmt;

/// Opaque native location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(usize);

impl Address {
    pub const NULL: Address = Address(0);

    pub const fn from_raw(raw: usize) -> Self {
        Address(raw)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Address(ptr as usize)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub fn as_ptr(self) -> *mut u8 {
        self.0 as *mut u8
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` further on (wrapping, like native pointer math)
    pub fn offset(self, bytes: usize) -> Address {
        Address(self.0.wrapping_add(bytes))
    }

    /// Address moved by a signed byte count
    pub fn offset_signed(self, bytes: isize) -> Address {
        Address(self.0.wrapping_add_signed(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Allocator plus byte-level accessor over native addresses
pub trait RawMemory: Send + Sync {
    /// Allocate `size` bytes (0 is treated as 1). Contents are unspecified.
    fn alloc(&self, size: usize) -> Result<Address>;

    /// Release an allocation made by `alloc`
    ///
    /// # Safety
    ///
    /// `address` must come from this allocator and not have been freed.
    unsafe fn free(&self, address: Address);

    /// Copy `buf.len()` bytes starting at `address` into `buf`
    ///
    /// # Safety
    ///
    /// The source range must be readable.
    unsafe fn read_into(&self, address: Address, buf: &mut [u8]);

    /// Copy `bytes` to `address`
    ///
    /// # Safety
    ///
    /// The destination range must be writable and at least `bytes.len()` long.
    unsafe fn write_bytes(&self, address: Address, bytes: &[u8]);

    /// # Safety
    ///
    /// Same contract as `read_into`.
    unsafe fn read_bytes(&self, address: Address, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.read_into(address, &mut buf);
        buf
    }

    /// # Safety
    ///
    /// Same contract as `write_bytes`.
    unsafe fn fill(&self, address: Address, len: usize, byte: u8) {
        self.write_bytes(address, &vec![byte; len]);
    }

    /// Read `unit`-sized elements until an all-zero element, excluding it
    ///
    /// # Safety
    ///
    /// Memory must be readable up to and including the terminator.
    unsafe fn read_until_nul(&self, address: Address, unit: usize) -> Vec<u8> {
        let unit = unit.max(1);
        let mut out = Vec::new();
        let mut element = vec![0u8; unit];
        let mut cursor = address;
        loop {
            self.read_into(cursor, &mut element);
            if element.iter().all(|b| *b == 0) {
                return out;
            }
            out.extend_from_slice(&element);
            cursor = cursor.offset(unit);
        }
    }
}

/// Process heap through the C allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl RawMemory for SystemMemory {
    fn alloc(&self, size: usize) -> Result<Address> {
        let size = size.max(1);
        // SAFETY: malloc has no preconditions; null is handled below
        let ptr = unsafe { libc::malloc(size) };
        if ptr.is_null() {
            return Err(Error::AllocationFailure(size));
        }
        Ok(Address::from_ptr(ptr))
    }

    unsafe fn free(&self, address: Address) {
        libc::free(address.as_ptr() as *mut libc::c_void);
    }

    unsafe fn read_into(&self, address: Address, buf: &mut [u8]) {
        std::ptr::copy_nonoverlapping(address.as_ptr() as *const u8, buf.as_mut_ptr(), buf.len());
    }

    unsafe fn write_bytes(&self, address: Address, bytes: &[u8]) {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), address.as_ptr(), bytes.len());
    }
}
