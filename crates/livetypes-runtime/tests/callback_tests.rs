//! Callback Tests
//!
//! Native code calling host functions through generated entry points.

use livetypes_runtime::{
    Address, CTypes, CallingConvention, FailureStage, MarshalError, MemorySink, RawMemory,
    TypeDescriptor, Value,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn add(args: &[Value]) -> anyhow::Result<Value> {
    let a = args[0].as_i128().unwrap_or(0);
    let b = args[1].as_i128().unwrap_or(0);
    Ok(Value::Int((a + b) as i64))
}

fn with_sink() -> (CTypes, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (CTypes::new().with_sink(sink.clone()), sink)
}

// ===== Simulated Frames =====

#[test]
fn test_trampoline_reads_frame_slots() {
    let (ct, sink) = with_sink();
    let ftype = ct.cfunctype("c_int", &["c_int", "c_int"]).unwrap();
    let tramp = ct.trampoline(&ftype, add);

    // saved frame pointer, return address, then two argument slots
    let mut frame = vec![0xAAu8; 8];
    frame.extend_from_slice(&3u32.to_le_bytes());
    frame.extend_from_slice(&4u32.to_le_bytes());

    let word = unsafe { tramp.invoke(Address::from_ptr(frame.as_ptr())) };
    assert_eq!(word, 7);
    assert!(sink.is_empty());
}

#[test]
fn test_failures_report_call_context() {
    let (ct, sink) = with_sink();
    let ftype = ct.winfunctype("c_int", &["c_int", "c_int"]).unwrap();
    let tramp = ct.trampoline(&ftype, |_args: &[Value]| -> anyhow::Result<Value> {
        Err(anyhow::anyhow!("lookup failed").context("handling event"))
    });

    let frame = [0u8; 16];
    let word = unsafe { tramp.invoke(Address::from_ptr(frame.as_ptr())) };
    assert_eq!(word, 0);

    let reports = sink.take();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.convention, CallingConvention::Stdcall);
    assert_eq!(report.stage, FailureStage::Invoke);
    assert_eq!(report.signature, "c_int(c_int, c_int)");
    assert!(report.message.contains("handling event"));
    assert!(report.message.contains("lookup failed"));
}

// ===== Native Entry Points =====

#[test]
fn test_native_caller_receives_sum() {
    let (ct, sink) = with_sink();
    let ftype = ct.cfunctype("c_int", &["c_int", "c_int"]).unwrap();
    let callback = ct.callback(&ftype, add).unwrap();
    assert!(!callback.entry_point().is_null());
    assert_eq!(callback.param_count(), 2);
    assert_eq!(callback.cleanup_bytes(), 0);

    let f: extern "C" fn(i32, i32) -> i32 =
        unsafe { std::mem::transmute(callback.entry_point()) };
    assert_eq!(f(3, 4), 7);
    assert_eq!(f(-10, 4), -6);
    assert!(sink.is_empty());
}

#[test]
fn test_native_caller_sees_zero_on_panic() {
    let (ct, sink) = with_sink();
    let ftype = ct.cfunctype("c_int", &["c_int"]).unwrap();
    let callback = ct
        .callback(&ftype, |_args: &[Value]| -> anyhow::Result<Value> {
            panic!("host callable panicked")
        })
        .unwrap();

    let f: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(callback.entry_point()) };
    assert_eq!(f(1), 0);
    assert_eq!(sink.take()[0].stage, FailureStage::Panic);
}

#[test]
fn test_stdcall_records_cleanup() {
    let (ct, _sink) = with_sink();
    let ftype = ct
        .winfunctype("c_int", &["c_int", "c_int", "c_int"])
        .unwrap();
    let callback = ct.callback(&ftype, |_args: &[Value]| Ok(Value::Int(0))).unwrap();
    assert_eq!(callback.convention(), CallingConvention::Stdcall);
    assert_eq!(callback.param_count(), 3);
    assert_eq!(callback.cleanup_bytes(), 12);
}

#[test]
fn test_callback_is_reentrant() {
    let (ct, _sink) = with_sink();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let ftype = ct.cfunctype("c_uint32", &["c_uint32"]).unwrap();
    let callback = ct
        .callback(&ftype, move |args: &[Value]| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(args[0].clone())
        })
        .unwrap();

    let f: extern "C" fn(u32) -> u32 = unsafe { std::mem::transmute(callback.entry_point()) };
    let handles: Vec<_> = (0..4u32)
        .map(|i| std::thread::spawn(move || f(i * 100)))
        .collect();
    let mut results: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    results.sort_unstable();
    assert_eq!(results, vec![0, 100, 200, 300]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_native_caller_with_trailing_wide_parameter() {
    let (ct, sink) = with_sink();
    let ftype = ct.cfunctype("c_int32", &["c_int32", "c_int64"]).unwrap();
    let callback = ct
        .callback(&ftype, |args: &[Value]| Ok(args[1].clone()))
        .unwrap();

    let f: extern "C" fn(u32, u32) -> u32 =
        unsafe { std::mem::transmute(callback.entry_point()) };
    assert_eq!(f(1, 5), 5);
    assert_eq!(f(9, 0x7FFF_FFFF), 0x7FFF_FFFF);
    assert!(sink.is_empty());
}

#[test]
fn test_native_caller_sees_zero_when_codec_panics() {
    let (mut ct, sink) = with_sink();
    ct.registry_mut().register(TypeDescriptor::new(
        "exploding",
        4,
        |_mem: &dyn RawMemory, _addr| -> Result<Value, MarshalError> {
            panic!("cannot decode")
        },
        |_mem: &dyn RawMemory, _addr, _value: &Value| -> Result<(), MarshalError> {
            panic!("cannot encode")
        },
    ));
    let ftype = ct.cfunctype("c_int", &["exploding"]).unwrap();
    let callback = ct
        .callback(&ftype, |_args: &[Value]| Ok(Value::Int(1)))
        .unwrap();

    let f: extern "C" fn(u32) -> u32 = unsafe { std::mem::transmute(callback.entry_point()) };
    assert_eq!(f(3), 0);
    let reports = sink.take();
    assert_eq!(reports[0].stage, FailureStage::Panic);
    assert!(reports[0].message.contains("cannot decode"));
}
