//! Callback trampolines: native code calling host functions
//!
//! A `FunctionType` describes a native signature (return type, parameter
//! types, calling convention). Binding a host callable to it yields a
//! `CallbackTrampoline`, and handing the trampoline to a
//! `NativeCallPrimitive` yields a `Callback` with a native entry point.
//!
//! Per call, the trampoline receives the base of the native call frame.
//! Argument slots are `ARG_SLOT_SIZE` bytes wide and start
//! `FRAME_ARGS_OFFSET` bytes past the frame base (saved frame pointer and
//! return address). The return value is encoded and handed back as one
//! 32-bit word. Failures never reach the native caller: they are reported
//! to the diagnostic sink and the word is 0.

use crate::diagnostics::{CallbackDiagnostic, DiagnosticSink, FailureStage};
use crate::error::{Error, MarshalError, Result};
use crate::memory::{Address, RawMemory};
use crate::native::{FrameHandler, NativeCallPrimitive, NativeStub, STUB_TAIL_LEN};
use crate::registry::{TypeDescriptor, TypeRegistry};
use crate::value::Value;
use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Offset of the first argument slot from the frame base
pub const FRAME_ARGS_OFFSET: usize = 8;

/// Width of one argument slot
pub const ARG_SLOT_SIZE: usize = 4;

/// Width of the raw return word
pub const RETURN_WORD_SIZE: usize = 4;

/// Host function invoked by a trampoline
pub type HostCallable = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    /// Caller removes the arguments
    Cdecl,
    /// Callee removes the arguments
    Stdcall,
}

impl CallingConvention {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallingConvention::Cdecl => "cdecl",
            CallingConvention::Stdcall => "stdcall",
        }
    }

    /// Bytes the callee pops on return
    pub fn cleanup_bytes(&self, param_count: usize) -> usize {
        match self {
            CallingConvention::Cdecl => 0,
            CallingConvention::Stdcall => param_count * ARG_SLOT_SIZE,
        }
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallingConvention {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cdecl" => Ok(CallingConvention::Cdecl),
            "stdcall" => Ok(CallingConvention::Stdcall),
            _ => Err(Error::InvalidConvention(s.to_string())),
        }
    }
}

/// Why one trampoline invocation failed
#[derive(Error, Debug)]
pub enum CallbackFailure {
    #[error("Failed to decode argument {index} as {type_name}: {source}")]
    Decode {
        index: usize,
        type_name: String,
        source: MarshalError,
    },

    #[error("Host callable failed: {0:#}")]
    Host(anyhow::Error),

    #[error("Callback panicked: {0}")]
    Panic(String),

    #[error("Failed to encode return value as {type_name}: {source}")]
    Encode { type_name: String, source: Error },
}

impl CallbackFailure {
    pub fn stage(&self) -> FailureStage {
        match self {
            CallbackFailure::Decode { .. } => FailureStage::DecodeArgument,
            CallbackFailure::Host(_) => FailureStage::Invoke,
            CallbackFailure::Panic(_) => FailureStage::Panic,
            CallbackFailure::Encode { .. } => FailureStage::EncodeReturn,
        }
    }

    fn argument(&self) -> Option<usize> {
        match self {
            CallbackFailure::Decode { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Native function signature (`CFUNCTYPE` / `WINFUNCTYPE`)
#[derive(Debug, Clone)]
pub struct FunctionType {
    convention: CallingConvention,
    return_type: Arc<TypeDescriptor>,
    param_types: Vec<Arc<TypeDescriptor>>,
}

impl FunctionType {
    pub fn new(
        convention: CallingConvention,
        return_type: Arc<TypeDescriptor>,
        param_types: Vec<Arc<TypeDescriptor>>,
    ) -> Self {
        Self {
            convention,
            return_type,
            param_types,
        }
    }

    /// Resolve type names through the registry
    pub fn resolve(
        convention: CallingConvention,
        registry: &TypeRegistry,
        return_type: &str,
        param_types: &[&str],
    ) -> Result<Self> {
        let return_type = registry.lookup(return_type)?;
        let param_types = param_types
            .iter()
            .map(|name| registry.lookup(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(convention, return_type, param_types))
    }

    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    pub fn return_type(&self) -> &Arc<TypeDescriptor> {
        &self.return_type
    }

    pub fn param_types(&self) -> &[Arc<TypeDescriptor>] {
        &self.param_types
    }

    /// `ret(p0, p1, ...)`
    pub fn signature(&self) -> String {
        let params = self
            .param_types
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.return_type.name(), params)
    }

    /// Bytes a call frame for this signature must provide
    ///
    /// Covers every argument slot, the widest read starting at any slot
    /// (an 8-byte parameter reads past its own 4-byte slot), and one
    /// trailing zero slot that terminates text read in place.
    pub fn frame_len(&self) -> usize {
        let reads = self
            .param_types
            .iter()
            .enumerate()
            .map(|(i, descriptor)| i * ARG_SLOT_SIZE + descriptor.size().max(ARG_SLOT_SIZE))
            .max()
            .unwrap_or(0);
        FRAME_ARGS_OFFSET + reads + ARG_SLOT_SIZE
    }

    /// Bind a host callable to this signature
    pub fn trampoline<F>(
        &self,
        callable: F,
        memory: Arc<dyn RawMemory>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> CallbackTrampoline
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        CallbackTrampoline {
            signature: self.clone(),
            callable: Arc::new(callable),
            memory,
            sink,
            log_arguments: false,
        }
    }
}

/// Marshalling half of a callback; holds no per-call state
pub struct CallbackTrampoline {
    signature: FunctionType,
    callable: HostCallable,
    memory: Arc<dyn RawMemory>,
    sink: Arc<dyn DiagnosticSink>,
    log_arguments: bool,
}

impl CallbackTrampoline {
    /// Include decoded arguments in diagnostics
    pub fn with_argument_logging(mut self, enabled: bool) -> Self {
        self.log_arguments = enabled;
        self
    }

    pub fn function_type(&self) -> &FunctionType {
        &self.signature
    }

    /// Decode every parameter from its frame slot
    ///
    /// # Safety
    ///
    /// `frame_base` must address at least `FunctionType::frame_len` readable
    /// bytes, and each slot must satisfy its descriptor's read contract.
    pub unsafe fn decode_arguments(
        &self,
        frame_base: Address,
    ) -> std::result::Result<Vec<Value>, CallbackFailure> {
        let args = frame_base.offset(FRAME_ARGS_OFFSET);
        self.signature
            .param_types
            .iter()
            .enumerate()
            .map(|(index, descriptor)| {
                descriptor
                    .decode(self.memory.as_ref(), args.offset(index * ARG_SLOT_SIZE))
                    .map_err(|source| CallbackFailure::Decode {
                        index,
                        type_name: descriptor.name().to_string(),
                        source,
                    })
            })
            .collect()
    }

    /// Encode a host return value into the raw return word
    pub fn encode_return(&self, value: &Value) -> std::result::Result<u32, CallbackFailure> {
        let descriptor = &self.signature.return_type;
        let failure = |source: Error| CallbackFailure::Encode {
            type_name: descriptor.name().to_string(),
            source,
        };

        if descriptor.declared_size() == 0 {
            // Unsized (pointer-like) results have no fixed encoding; the word
            // is the address of a value built through the type's constructor
            // and must fit in 32 bits.
            let pointer = descriptor
                .instantiate(&self.memory, std::slice::from_ref(value))
                .map_err(failure)?;
            let address = pointer.address_of();
            return u32::try_from(address.as_usize()).map_err(|_| {
                failure(MarshalError::out_of_range(address, descriptor.name()).into())
            });
        }

        let scratch_len = descriptor.size().max(RETURN_WORD_SIZE);
        let scratch = self.memory.alloc(scratch_len).map_err(failure)?;
        let mut word = [0u8; RETURN_WORD_SIZE];
        // SAFETY: scratch holds scratch_len >= RETURN_WORD_SIZE bytes and is
        // at least as large as the descriptor
        let encoded = unsafe {
            self.memory.fill(scratch, scratch_len, 0);
            let encoded = descriptor.encode(self.memory.as_ref(), scratch, value);
            if encoded.is_ok() {
                self.memory.read_into(scratch, &mut word);
            }
            self.memory.free(scratch);
            encoded
        };
        encoded.map_err(|e| failure(e.into()))?;
        Ok(u32::from_le_bytes(word))
    }

    /// Run the full protocol, surfacing failures
    ///
    /// A panic anywhere in the protocol (descriptor codecs included) is
    /// caught and returned as `CallbackFailure::Panic`.
    ///
    /// # Safety
    ///
    /// See `decode_arguments`.
    pub unsafe fn try_invoke(&self, frame_base: Address) -> std::result::Result<u32, CallbackFailure> {
        panic::catch_unwind(AssertUnwindSafe(|| self.run(frame_base)))
            .unwrap_or_else(|payload| Err(CallbackFailure::Panic(panic_message(payload.as_ref()))))
    }

    unsafe fn run(&self, frame_base: Address) -> std::result::Result<u32, CallbackFailure> {
        let args = self.decode_arguments(frame_base)?;
        let result = (self.callable)(&args).map_err(CallbackFailure::Host)?;
        self.encode_return(&result)
    }

    /// Run the protocol as native code sees it: failures become 0
    ///
    /// # Safety
    ///
    /// See `decode_arguments`.
    pub unsafe fn invoke(&self, frame_base: Address) -> u32 {
        match self.try_invoke(frame_base) {
            Ok(word) => word,
            Err(failure) => {
                let arguments = if self.log_arguments {
                    panic::catch_unwind(AssertUnwindSafe(|| self.decode_arguments(frame_base).ok()))
                        .ok()
                        .flatten()
                } else {
                    None
                };
                // a panicking sink must not unwind into the native caller either
                let _ = panic::catch_unwind(AssertUnwindSafe(|| self.report(&failure, arguments)));
                0
            }
        }
    }

    fn report(&self, failure: &CallbackFailure, arguments: Option<Vec<Value>>) {
        self.sink.report(&CallbackDiagnostic {
            convention: self.signature.convention,
            signature: self.signature.signature(),
            stage: failure.stage(),
            argument: failure.argument(),
            message: failure.to_string(),
            arguments,
        });
    }

    /// Generate the native entry point
    ///
    /// The declared parameter count is written into the stub's patchable
    /// tail as a little-endian `u16`, for both conventions.
    pub fn into_callback(self, primitive: &dyn NativeCallPrimitive) -> Result<Callback> {
        let param_count = self.signature.param_types.len();
        let recorded = u16::try_from(param_count)
            .map_err(|_| Error::Stub(format!("too many parameters: {}", param_count)))?;
        let convention = self.signature.convention;
        let trampoline = Arc::new(self);

        let mut stub = primitive.create(convention, param_count, trampoline.clone())?;
        let tail = stub.tail_mut();
        if tail.len() < STUB_TAIL_LEN {
            return Err(Error::Stub(format!(
                "patchable tail is {} bytes, need {}",
                tail.len(),
                STUB_TAIL_LEN
            )));
        }
        let start = tail.len() - STUB_TAIL_LEN;
        tail[start..].copy_from_slice(&recorded.to_le_bytes());

        Ok(Callback { trampoline, stub })
    }
}

impl FrameHandler for CallbackTrampoline {
    fn frame_len(&self) -> usize {
        self.signature.frame_len()
    }

    unsafe fn on_call(&self, frame_base: Address) -> u32 {
        self.invoke(frame_base)
    }
}

impl fmt::Debug for CallbackTrampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTrampoline")
            .field("convention", &self.signature.convention)
            .field("signature", &self.signature.signature())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A trampoline together with its native stub
///
/// The entry point is valid only while the `Callback` is alive.
pub struct Callback {
    trampoline: Arc<CallbackTrampoline>,
    stub: Box<dyn NativeStub>,
}

impl Callback {
    pub fn entry_point(&self) -> *const c_void {
        self.stub.entry_point()
    }

    pub fn convention(&self) -> CallingConvention {
        self.trampoline.signature.convention
    }

    /// Parameter count as recorded in the stub tail
    pub fn param_count(&self) -> usize {
        let tail = self.stub.tail();
        let start = tail.len().saturating_sub(STUB_TAIL_LEN);
        match tail.get(start..) {
            Some([lo, hi]) => u16::from_le_bytes([*lo, *hi]) as usize,
            _ => 0,
        }
    }

    /// Stack bytes removed by the callee on return
    pub fn cleanup_bytes(&self) -> usize {
        self.convention().cleanup_bytes(self.param_count())
    }

    pub fn trampoline(&self) -> &CallbackTrampoline {
        &self.trampoline
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("trampoline", &self.trampoline)
            .field("entry_point", &self.entry_point())
            .finish()
    }
}
