//! Native entry points for callbacks
//!
//! A `NativeCallPrimitive` turns a `FrameHandler` into machine code that a
//! native caller can jump to. Each stub ends in a small patchable tail
//! (`STUB_TAIL_LEN` bytes) where the declared parameter count is recorded.
//!
//! `FfiClosurePrimitive` builds stubs from libffi closures. The closure
//! receives its arguments as 32-bit words and lays them out in a synthetic
//! frame (`FRAME_ARGS_OFFSET` bytes of header, then one slot per argument,
//! zero-padded to the handler's `frame_len`) before handing the frame base
//! to the handler. A parameter wider than a slot takes its upper bytes from
//! the following slot, or from the zero padding after the last one.

use crate::callbacks::{CallingConvention, ARG_SLOT_SIZE, FRAME_ARGS_OFFSET};
use crate::error::{Error, Result};
use crate::memory::Address;
use libffi::low;
use libffi::middle::{Cif, Closure, FfiAbi, Type};
use std::ffi::c_void;
use std::sync::Arc;

/// Bytes reserved at the end of every stub for the parameter count
pub const STUB_TAIL_LEN: usize = 2;

/// Receives control when native code calls a stub
pub trait FrameHandler: Send + Sync {
    /// Bytes the handler may read starting at the frame base
    fn frame_len(&self) -> usize;

    /// Handle one call and produce the raw return word
    ///
    /// # Safety
    ///
    /// `frame_base` must address at least `frame_len()` readable bytes laid
    /// out as a call frame for the handler's signature.
    unsafe fn on_call(&self, frame_base: Address) -> u32;
}

/// Executable entry point plus its patchable tail
pub trait NativeStub: Send + Sync {
    fn entry_point(&self) -> *const c_void;
    fn tail(&self) -> &[u8];
    fn tail_mut(&mut self) -> &mut [u8];
}

pub trait NativeCallPrimitive: Send + Sync {
    fn create(
        &self,
        convention: CallingConvention,
        param_count: usize,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Box<dyn NativeStub>>;
}

/// libffi ABI for a calling convention
///
/// Only 32-bit Windows distinguishes stdcall; elsewhere both conventions
/// map to the platform default.
pub(crate) fn ffi_abi(convention: CallingConvention) -> FfiAbi {
    match convention {
        #[cfg(all(target_arch = "x86", windows))]
        CallingConvention::Stdcall => libffi::raw::ffi_abi_FFI_STDCALL,
        _ => libffi::middle::ffi_abi_FFI_DEFAULT_ABI,
    }
}

struct BridgeData {
    handler: Arc<dyn FrameHandler>,
    param_count: usize,
}

unsafe extern "C" fn bridge(
    _cif: &low::ffi_cif,
    result: &mut u32,
    args: *const *const c_void,
    data: &BridgeData,
) {
    let slots = FRAME_ARGS_OFFSET + data.param_count * ARG_SLOT_SIZE;
    let mut frame = vec![0u8; data.handler.frame_len().max(slots)];
    for i in 0..data.param_count {
        let word = *(*args.add(i) as *const u32);
        let slot = FRAME_ARGS_OFFSET + i * ARG_SLOT_SIZE;
        frame[slot..slot + ARG_SLOT_SIZE].copy_from_slice(&word.to_le_bytes());
    }
    *result = data.handler.on_call(Address::from_ptr(frame.as_ptr()));
}

/// Stub backed by a libffi closure
///
/// The closure borrows `data` for as long as native code may call it.
/// `closure` is declared first so it is dropped before the box it points
/// into, and the box is never moved out or replaced while the stub lives.
pub struct FfiStub {
    closure: Closure<'static>,
    #[allow(dead_code)]
    data: Box<BridgeData>,
    tail: [u8; STUB_TAIL_LEN],
}

// SAFETY: the closure's code and userdata are immutable after creation and
// the handler inside is Send + Sync
unsafe impl Send for FfiStub {}
unsafe impl Sync for FfiStub {}

impl NativeStub for FfiStub {
    fn entry_point(&self) -> *const c_void {
        *self.closure.code_ptr() as *const c_void
    }

    fn tail(&self) -> &[u8] {
        &self.tail
    }

    fn tail_mut(&mut self) -> &mut [u8] {
        &mut self.tail
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FfiClosurePrimitive;

impl NativeCallPrimitive for FfiClosurePrimitive {
    fn create(
        &self,
        convention: CallingConvention,
        param_count: usize,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Box<dyn NativeStub>> {
        let cif = Cif::try_new_with_abi(
            (0..param_count).map(|_| Type::u32()),
            Type::u32(),
            ffi_abi(convention),
        )
        .map_err(|e| Error::Stub(format!("failed to prepare call interface: {:?}", e)))?;

        let data = Box::new(BridgeData {
            handler,
            param_count,
        });
        // SAFETY: the box's heap allocation never moves and is owned by the
        // stub alongside the closure, which is dropped first
        let userdata: &'static BridgeData = unsafe { &*(data.as_ref() as *const BridgeData) };
        let closure = Closure::try_new(cif, bridge, userdata)
            .map_err(|e| Error::Stub(format!("failed to allocate closure: {:?}", e)))?;

        let stub = FfiStub {
            closure,
            data,
            tail: [0; STUB_TAIL_LEN],
        };
        if stub.entry_point().is_null() {
            return Err(Error::Stub("libffi returned a null code pointer".to_string()));
        }
        tracing::trace!(%convention, param_count, entry = ?stub.entry_point(), "created native stub");
        Ok(Box::new(stub))
    }
}
