pub mod v3;

pub use v3::{
    ArrayMetadata, ChunkGrid, ChunkKeyEncoding, ConsolidatedEntry, ConsolidatedMetadata,
    GroupMetadata, NodeMetadata,
};

use crate::types::{DataType, FillValue, ZarrValue, default_fill_value};
use half::f16;
use num_complex::Complex;
use serde_json::Value;

/// Parse a fill value from a JSON value, given the target data type.
///
/// Handles the special strings `"NaN"`, `"Infinity"` and `"-Infinity"`,
/// hex-encoded float bit patterns (`"0x7fc00000"`), `[re, im]` pairs for
/// complex types and plain numbers or booleans. `null` means the data
/// type's zero value.
pub fn parse_fill_value(dtype: DataType, value: &Value) -> Result<FillValue, String> {
    match value {
        Value::Null => Ok(default_fill_value(dtype)),

        Value::String(s) => match s.as_str() {
            "NaN" if dtype.is_float() => Ok(FillValue::NaN),
            "Infinity" if dtype.is_float() => Ok(FillValue::Infinity),
            "-Infinity" if dtype.is_float() => Ok(FillValue::NegativeInfinity),
            hex if hex.starts_with("0x") && dtype.is_float() => parse_hex_fill(dtype, hex),
            _ => Err(format!("Invalid {dtype} fill value: {s:?}")),
        },

        Value::Bool(b) => match dtype {
            DataType::Bool => Ok(FillValue::Value(ZarrValue::Bool(*b))),
            _ => Err(format!("Expected {dtype}, got bool")),
        },

        Value::Number(n) => parse_numeric_fill(dtype, n),

        Value::Array(parts) if parts.len() == 2 => {
            let component = |v: &Value| -> Result<f64, String> {
                match v {
                    Value::Number(n) => n
                        .as_f64()
                        .ok_or_else(|| format!("Invalid complex component: {n}")),
                    Value::String(s) => match s.as_str() {
                        "NaN" => Ok(f64::NAN),
                        "Infinity" => Ok(f64::INFINITY),
                        "-Infinity" => Ok(f64::NEG_INFINITY),
                        _ => Err(format!("Invalid complex component: {s:?}")),
                    },
                    _ => Err(format!("Invalid complex component: {v}")),
                }
            };
            let (re, im) = (component(&parts[0])?, component(&parts[1])?);
            match dtype {
                DataType::Complex64 => Ok(FillValue::Value(ZarrValue::Complex64(Complex::new(
                    re as f32, im as f32,
                )))),
                DataType::Complex128 => {
                    Ok(FillValue::Value(ZarrValue::Complex128(Complex::new(re, im))))
                }
                _ => Err(format!("Expected {dtype}, got a complex pair")),
            }
        }

        _ => Err(format!("Unexpected fill_value JSON: {value}")),
    }
}

fn parse_hex_fill(dtype: DataType, hex: &str) -> Result<FillValue, String> {
    let bits = u64::from_str_radix(&hex[2..], 16)
        .map_err(|e| format!("Invalid hex fill value {hex}: {e}"))?;
    let value = match dtype {
        DataType::Float16 => u16::try_from(bits)
            .map(|b| ZarrValue::Float16(f16::from_bits(b)))
            .map_err(|_| format!("{hex} does not fit float16"))?,
        DataType::Float32 => u32::try_from(bits)
            .map(|b| ZarrValue::Float32(f32::from_bits(b)))
            .map_err(|_| format!("{hex} does not fit float32"))?,
        DataType::Float64 => ZarrValue::Float64(f64::from_bits(bits)),
        _ => return Err(format!("Hex fill values are not supported for {dtype}")),
    };
    Ok(FillValue::Value(value))
}

fn parse_numeric_fill(dtype: DataType, n: &serde_json::Number) -> Result<FillValue, String> {
    let int = || n.as_i64().ok_or_else(|| format!("Expected int for {dtype}, got {n}"));
    let uint = || n.as_u64().ok_or_else(|| format!("Expected uint for {dtype}, got {n}"));
    let float = || n.as_f64().ok_or_else(|| format!("Expected float for {dtype}, got {n}"));
    let range = |v: &dyn std::fmt::Display| format!("Value {v} out of range for {dtype}");

    let value = match dtype {
        DataType::Bool => ZarrValue::Bool(int()? != 0),
        DataType::Int8 => {
            let i = int()?;
            ZarrValue::Int8(i8::try_from(i).map_err(|_| range(&i))?)
        }
        DataType::Int16 => {
            let i = int()?;
            ZarrValue::Int16(i16::try_from(i).map_err(|_| range(&i))?)
        }
        DataType::Int32 => {
            let i = int()?;
            ZarrValue::Int32(i32::try_from(i).map_err(|_| range(&i))?)
        }
        DataType::Int64 => ZarrValue::Int64(int()?),
        DataType::UInt8 => {
            let u = uint()?;
            ZarrValue::UInt8(u8::try_from(u).map_err(|_| range(&u))?)
        }
        DataType::UInt16 => {
            let u = uint()?;
            ZarrValue::UInt16(u16::try_from(u).map_err(|_| range(&u))?)
        }
        DataType::UInt32 => {
            let u = uint()?;
            ZarrValue::UInt32(u32::try_from(u).map_err(|_| range(&u))?)
        }
        DataType::UInt64 => ZarrValue::UInt64(uint()?),
        DataType::Float16 => ZarrValue::Float16(f16::from_f64(float()?)),
        DataType::Float32 => ZarrValue::Float32(float()? as f32),
        DataType::Float64 => ZarrValue::Float64(float()?),
        DataType::Complex64 => ZarrValue::Complex64(Complex::new(float()? as f32, 0.0)),
        DataType::Complex128 => ZarrValue::Complex128(Complex::new(float()?, 0.0)),
    };
    Ok(FillValue::Value(value))
}

/// JSON form of a fill value as written to `zarr.json`.
///
/// A NaN held as a concrete value came from a hex bit pattern and is
/// written back in hex so its payload survives.
pub fn fill_value_to_json(fill: &FillValue) -> Value {
    match fill {
        FillValue::NaN => Value::from("NaN"),
        FillValue::Infinity => Value::from("Infinity"),
        FillValue::NegativeInfinity => Value::from("-Infinity"),
        FillValue::Value(v) => match v {
            ZarrValue::Bool(b) => Value::from(*b),
            ZarrValue::Int8(i) => Value::from(*i),
            ZarrValue::Int16(i) => Value::from(*i),
            ZarrValue::Int32(i) => Value::from(*i),
            ZarrValue::Int64(i) => Value::from(*i),
            ZarrValue::UInt8(u) => Value::from(*u),
            ZarrValue::UInt16(u) => Value::from(*u),
            ZarrValue::UInt32(u) => Value::from(*u),
            ZarrValue::UInt64(u) => Value::from(*u),
            ZarrValue::Float16(f) if f.is_nan() => Value::from(format!("0x{:04x}", f.to_bits())),
            ZarrValue::Float32(f) if f.is_nan() => Value::from(format!("0x{:08x}", f.to_bits())),
            ZarrValue::Float64(f) if f.is_nan() => Value::from(format!("0x{:016x}", f.to_bits())),
            ZarrValue::Float16(f) => float_to_json(f.to_f64()),
            ZarrValue::Float32(f) => float_to_json(*f as f64),
            ZarrValue::Float64(f) => float_to_json(*f),
            ZarrValue::Complex64(c) => {
                Value::Array(vec![float_to_json(c.re as f64), float_to_json(c.im as f64)])
            }
            ZarrValue::Complex128(c) => {
                Value::Array(vec![float_to_json(c.re), float_to_json(c.im)])
            }
        },
    }
}

fn float_to_json(f: f64) -> Value {
    if f.is_nan() {
        Value::from("NaN")
    } else if f == f64::INFINITY {
        Value::from("Infinity")
    } else if f == f64::NEG_INFINITY {
        Value::from("-Infinity")
    } else {
        Value::from(f)
    }
}
