//! Built-in C types
//!
//! Installed in registration order. `c_long` and `c_longlong` are each
//! registered twice, signed first and unsigned second, so the unsigned
//! codecs are the ones that end up in the registry.

use crate::error::{MarshalError, Result};
use crate::memory::{Address, RawMemory};
use crate::pointer::TypedPointer;
use crate::registry::{TypeDescriptor, TypeRegistry};
use crate::text::TextCodec;
use crate::value::Value;
use std::sync::Arc;

type CodecResult<T> = std::result::Result<T, MarshalError>;
type ScalarDecode = fn(&dyn RawMemory, Address) -> CodecResult<Value>;
type ScalarEncode = fn(&dyn RawMemory, Address, &Value) -> CodecResult<()>;

macro_rules! int_codec {
    ($decode:ident, $encode:ident, $ty:ty, $variant:ident) => {
        fn $decode(memory: &dyn RawMemory, address: Address) -> CodecResult<Value> {
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            // SAFETY: caller of TypeDescriptor::decode guarantees the range
            unsafe { memory.read_into(address, &mut buf) };
            Ok(Value::$variant(<$ty>::from_le_bytes(buf) as _))
        }

        fn $encode(memory: &dyn RawMemory, address: Address, value: &Value) -> CodecResult<()> {
            let wide = value
                .as_i128()
                .ok_or_else(|| MarshalError::mismatch(stringify!($ty), value))?;
            let narrow = <$ty>::try_from(wide)
                .map_err(|_| MarshalError::out_of_range(wide, stringify!($ty)))?;
            // SAFETY: caller of TypeDescriptor::encode guarantees the range
            unsafe { memory.write_bytes(address, &narrow.to_le_bytes()) };
            Ok(())
        }
    };
}

int_codec!(decode_i8, encode_i8, i8, Int);
int_codec!(decode_i16, encode_i16, i16, Int);
int_codec!(decode_i32, encode_i32, i32, Int);
int_codec!(decode_i64, encode_i64, i64, Int);
int_codec!(decode_u8, encode_u8, u8, UInt);
int_codec!(decode_u16, encode_u16, u16, UInt);
int_codec!(decode_u32, encode_u32, u32, UInt);
int_codec!(decode_u64, encode_u64, u64, UInt);

fn decode_f32(memory: &dyn RawMemory, address: Address) -> CodecResult<Value> {
    let mut buf = [0u8; 4];
    unsafe { memory.read_into(address, &mut buf) };
    Ok(Value::Float(f32::from_le_bytes(buf) as f64))
}

fn encode_f32(memory: &dyn RawMemory, address: Address, value: &Value) -> CodecResult<()> {
    let f = value
        .as_f64()
        .ok_or_else(|| MarshalError::mismatch("f32", value))?;
    unsafe { memory.write_bytes(address, &(f as f32).to_le_bytes()) };
    Ok(())
}

fn decode_f64(memory: &dyn RawMemory, address: Address) -> CodecResult<Value> {
    let mut buf = [0u8; 8];
    unsafe { memory.read_into(address, &mut buf) };
    Ok(Value::Float(f64::from_le_bytes(buf)))
}

fn encode_f64(memory: &dyn RawMemory, address: Address, value: &Value) -> CodecResult<()> {
    let f = value
        .as_f64()
        .ok_or_else(|| MarshalError::mismatch("f64", value))?;
    unsafe { memory.write_bytes(address, &f.to_le_bytes()) };
    Ok(())
}

/// One byte as a one-character text, mapping bytes to U+0000..=U+00FF
fn decode_char(memory: &dyn RawMemory, address: Address) -> CodecResult<Value> {
    let mut buf = [0u8; 1];
    unsafe { memory.read_into(address, &mut buf) };
    Ok(Value::Text(char::from(buf[0]).to_string()))
}

fn encode_char(memory: &dyn RawMemory, address: Address, value: &Value) -> CodecResult<()> {
    let byte = match value {
        Value::Text(s) => match s.chars().next() {
            None => 0,
            Some(c) => u8::try_from(c)
                .map_err(|_| MarshalError::out_of_range(format!("U+{:04X}", c as u32), "c_char"))?,
        },
        other => {
            let n = other
                .as_i128()
                .ok_or_else(|| MarshalError::mismatch("c_char", other))?;
            u8::try_from(n).map_err(|_| MarshalError::out_of_range(n, "c_char"))?
        }
    };
    unsafe { memory.write_bytes(address, &[byte]) };
    Ok(())
}

/// First character of `text` as one UTF-16 code unit; empty text is unit 0
fn wide_unit(text: &dyn TextCodec, s: &str) -> CodecResult<[u8; 2]> {
    match s.chars().next() {
        None | Some('\0') => Ok([0, 0]),
        Some(c) if u32::from(c) > 0xFFFF => Err(MarshalError::out_of_range(
            format!("U+{:04X}", c as u32),
            "c_wchar",
        )),
        Some(c) => {
            let wide = text.to_wide(c.encode_utf8(&mut [0u8; 4]))?;
            match wide.as_slice() {
                [lo, hi] => Ok([*lo, *hi]),
                _ => Err(MarshalError::InvalidText(format!(
                    "{:?} is not a single UTF-16 code unit",
                    c
                ))),
            }
        }
    }
}

/// Text pointer constructor: an integer retargets the pointer to that
/// address, text is copied into a fresh NUL-terminated buffer
fn text_constructor(
    text: Arc<dyn TextCodec>,
    wide: bool,
) -> impl Fn(&mut TypedPointer, Option<&Value>) -> Result<()> + Send + Sync + 'static {
    move |pointer: &mut TypedPointer, arg: Option<&Value>| {
        let target = match arg {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::Text(s)) => {
                let mut bytes = if wide {
                    text.to_wide(s)?
                } else {
                    text.to_multibyte(s)?
                };
                bytes.extend(std::iter::repeat(0u8).take(if wide { 2 } else { 1 }));
                let memory = pointer.memory().clone();
                let buffer = memory.alloc(bytes.len())?;
                // SAFETY: buffer was allocated with bytes.len() bytes
                unsafe { memory.write_bytes(buffer, &bytes) };
                buffer
            }
            Some(other) => {
                let raw = other.as_i128().ok_or_else(|| {
                    MarshalError::mismatch(pointer.descriptor().name(), other)
                })?;
                let raw = usize::try_from(raw)
                    .map_err(|_| MarshalError::out_of_range(raw, pointer.descriptor().name()))?;
                Address::from_raw(raw)
            }
        };
        // SAFETY: the caller asked for this address, or we allocated it
        unsafe { pointer.set_address(target) };
        Ok(())
    }
}

pub(crate) fn install(registry: &mut TypeRegistry, text: Arc<dyn TextCodec>) {
    let scalars: &[(&str, usize, ScalarDecode, ScalarEncode)] = &[
        ("c_byte", 1, decode_u8, encode_u8),
        ("c_char", 1, decode_char, encode_char),
        ("c_double", 8, decode_f64, encode_f64),
        ("c_float", 4, decode_f32, encode_f32),
        ("c_int", 4, decode_i32, encode_i32),
        ("c_int8", 1, decode_i8, encode_i8),
        ("c_int16", 2, decode_i16, encode_i16),
        ("c_int32", 4, decode_i32, encode_i32),
        ("c_int64", 8, decode_i64, encode_i64),
        ("c_long", 4, decode_i32, encode_i32),
        ("c_longlong", 8, decode_i64, encode_i64),
        ("c_short", 2, decode_i16, encode_i16),
        ("c_sizet", 4, decode_u32, encode_u32),
        // declared as 4 bytes but only the first byte is read and written
        ("c_ubyte", 4, decode_u8, encode_u8),
        ("c_uint8", 1, decode_u8, encode_u8),
        ("c_uint16", 2, decode_u16, encode_u16),
        ("c_uint32", 4, decode_u32, encode_u32),
        ("c_uint64", 8, decode_u64, encode_u64),
        ("c_long", 4, decode_u32, encode_u32),
        ("c_longlong", 8, decode_u64, encode_u64),
    ];
    for &(name, size, decode, encode) in scalars {
        registry.register(TypeDescriptor::new(name, size, decode, encode));
    }

    let codec = text.clone();
    let encode_codec = text.clone();
    registry.register(TypeDescriptor::new(
        "c_wchar",
        2,
        move |memory, address| {
            let mut buf = [0u8; 2];
            unsafe { memory.read_into(address, &mut buf) };
            codec.from_wide(&buf).map(Value::Text)
        },
        move |memory, address, value| {
            let s = value
                .as_text()
                .ok_or_else(|| MarshalError::mismatch("c_wchar", value))?;
            let unit = wide_unit(encode_codec.as_ref(), s)?;
            unsafe { memory.write_bytes(address, &unit) };
            Ok(())
        },
    ));

    for (name, wide) in [("c_char_p", false), ("c_wchar_p", true)] {
        let codec = text.clone();
        let encode_codec = text.clone();
        let unit = if wide { 2 } else { 1 };
        registry.register(
            TypeDescriptor::new(
                name,
                0,
                move |memory, address| {
                    if address.is_null() {
                        return Err(MarshalError::NullPointer);
                    }
                    let bytes = unsafe { memory.read_until_nul(address, unit) };
                    if wide {
                        codec.from_wide(&bytes).map(Value::Text)
                    } else {
                        codec.from_multibyte(&bytes).map(Value::Text)
                    }
                },
                move |memory, address, value| {
                    if address.is_null() {
                        return Err(MarshalError::NullPointer);
                    }
                    let s = value
                        .as_text()
                        .ok_or_else(|| MarshalError::mismatch(name, value))?;
                    let mut bytes = if wide {
                        encode_codec.to_wide(s)?
                    } else {
                        encode_codec.to_multibyte(s)?
                    };
                    bytes.extend(std::iter::repeat(0u8).take(unit));
                    unsafe { memory.write_bytes(address, &bytes) };
                    Ok(())
                },
            )
            .with_constructor(text_constructor(text.clone(), wide)),
        );
    }
}
