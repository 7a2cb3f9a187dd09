//! Diagnostic sink for callback failures
//!
//! A trampoline cannot report errors to its native caller, so failures are
//! routed here instead.

use crate::callbacks::CallingConvention;
use crate::value::Value;
use std::fmt;
use std::sync::Mutex;

/// Where in the callback protocol a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureStage {
    DecodeArgument,
    Invoke,
    Panic,
    EncodeReturn,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStage::DecodeArgument => "decode-argument",
            FailureStage::Invoke => "invoke",
            FailureStage::Panic => "panic",
            FailureStage::EncodeReturn => "encode-return",
        };
        f.write_str(s)
    }
}

/// One failed callback invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackDiagnostic {
    pub convention: CallingConvention,
    /// Rendered signature, e.g. `c_int(c_int, c_int)`
    pub signature: String,
    pub stage: FailureStage,
    /// Index of the offending parameter, for decode failures
    pub argument: Option<usize>,
    pub message: String,
    /// Decoded arguments, when argument logging is enabled
    pub arguments: Option<Vec<Value>>,
}

pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: &CallbackDiagnostic);
}

/// Emits each diagnostic as a `tracing` error event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, d: &CallbackDiagnostic) {
        tracing::error!(
            target: "livetypes::callback",
            convention = %d.convention,
            signature = %d.signature,
            stage = %d.stage,
            argument = ?d.argument,
            arguments = ?d.arguments,
            "callback failed: {}",
            d.message
        );
    }
}

/// Drops every diagnostic
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn report(&self, _diagnostic: &CallbackDiagnostic) {}
}

/// Keeps diagnostics in memory for inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<CallbackDiagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return everything recorded so far
    pub fn take(&self) -> Vec<CallbackDiagnostic> {
        match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, diagnostic: &CallbackDiagnostic) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push(diagnostic.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CallbackDiagnostic {
        CallbackDiagnostic {
            convention: CallingConvention::Stdcall,
            signature: "c_int(c_int)".to_string(),
            stage: FailureStage::Invoke,
            argument: None,
            message: "boom".to_string(),
            arguments: None,
        }
    }

    #[test]
    fn test_memory_sink_collects_and_drains() {
        let sink = MemorySink::new();
        sink.report(&sample());
        sink.report(&sample());
        assert_eq!(sink.len(), 2);
        let taken = sink.take();
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].message, "boom");
        assert!(sink.is_empty());
    }

    #[test]
    fn test_tracing_sink_does_not_panic_without_subscriber() {
        TracingSink.report(&sample());
    }

    #[test]
    fn test_tracing_sink_under_subscriber() {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("livetypes=error"))
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || TracingSink.report(&sample()));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(FailureStage::DecodeArgument.to_string(), "decode-argument");
        assert_eq!(FailureStage::EncodeReturn.to_string(), "encode-return");
    }
}
