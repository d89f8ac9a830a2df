use byteorder::{BigEndian, ByteOrder, LittleEndian};
use half::f16;
use num_complex::Complex;
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Endian
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
    NotApplicable,
}

// ---------------------------------------------------------------------------
// DataType
// ---------------------------------------------------------------------------

/// Fixed-size Zarr V3 core data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    Complex64,
    Complex128,
}

impl DataType {
    /// Number of bytes per element.
    pub fn byte_size(&self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 | DataType::Float16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 | DataType::Complex64 => 8,
            DataType::Complex128 => 16,
        }
    }

    /// Name used in `zarr.json`.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float16 => "float16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Complex64 => "complex64",
            DataType::Complex128 => "complex128",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(DataType::Bool),
            "int8" => Some(DataType::Int8),
            "int16" => Some(DataType::Int16),
            "int32" => Some(DataType::Int32),
            "int64" => Some(DataType::Int64),
            "uint8" => Some(DataType::UInt8),
            "uint16" => Some(DataType::UInt16),
            "uint32" => Some(DataType::UInt32),
            "uint64" => Some(DataType::UInt64),
            "float16" => Some(DataType::Float16),
            "float32" => Some(DataType::Float32),
            "float64" => Some(DataType::Float64),
            "complex64" => Some(DataType::Complex64),
            "complex128" => Some(DataType::Complex128),
            _ => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            DataType::Float16
                | DataType::Float32
                | DataType::Float64
                | DataType::Complex64
                | DataType::Complex128
        )
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for DataType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DataType::from_name(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("Unsupported data type: {s}")))
    }
}

// ---------------------------------------------------------------------------
// ZarrValue  (scalar)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ZarrValue {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float16(f16),
    Float32(f32),
    Float64(f64),
    Complex64(Complex<f32>),
    Complex128(Complex<f64>),
}

impl ZarrValue {
    /// Return the [`DataType`] that this value belongs to.
    pub fn data_type(&self) -> DataType {
        match self {
            ZarrValue::Bool(_) => DataType::Bool,
            ZarrValue::Int8(_) => DataType::Int8,
            ZarrValue::Int16(_) => DataType::Int16,
            ZarrValue::Int32(_) => DataType::Int32,
            ZarrValue::Int64(_) => DataType::Int64,
            ZarrValue::UInt8(_) => DataType::UInt8,
            ZarrValue::UInt16(_) => DataType::UInt16,
            ZarrValue::UInt32(_) => DataType::UInt32,
            ZarrValue::UInt64(_) => DataType::UInt64,
            ZarrValue::Float16(_) => DataType::Float16,
            ZarrValue::Float32(_) => DataType::Float32,
            ZarrValue::Float64(_) => DataType::Float64,
            ZarrValue::Complex64(_) => DataType::Complex64,
            ZarrValue::Complex128(_) => DataType::Complex128,
        }
    }

    /// Encode this scalar as element bytes in the given byte order.
    pub fn to_bytes(&self, endian: Endian) -> Vec<u8> {
        let mut out = vec![0u8; self.data_type().byte_size()];
        match endian {
            Endian::Big => write_scalar::<BigEndian>(self, &mut out),
            Endian::Little | Endian::NotApplicable => write_scalar::<LittleEndian>(self, &mut out),
        }
        out
    }
}

fn write_scalar<B: ByteOrder>(value: &ZarrValue, out: &mut [u8]) {
    match value {
        ZarrValue::Bool(b) => out[0] = u8::from(*b),
        ZarrValue::Int8(v) => out[0] = *v as u8,
        ZarrValue::UInt8(v) => out[0] = *v,
        ZarrValue::Int16(v) => B::write_i16(out, *v),
        ZarrValue::Int32(v) => B::write_i32(out, *v),
        ZarrValue::Int64(v) => B::write_i64(out, *v),
        ZarrValue::UInt16(v) => B::write_u16(out, *v),
        ZarrValue::UInt32(v) => B::write_u32(out, *v),
        ZarrValue::UInt64(v) => B::write_u64(out, *v),
        ZarrValue::Float16(v) => B::write_u16(out, v.to_bits()),
        ZarrValue::Float32(v) => B::write_f32(out, *v),
        ZarrValue::Float64(v) => B::write_f64(out, *v),
        ZarrValue::Complex64(c) => {
            B::write_f32(&mut out[..4], c.re);
            B::write_f32(&mut out[4..], c.im);
        }
        ZarrValue::Complex128(c) => {
            B::write_f64(&mut out[..8], c.re);
            B::write_f64(&mut out[8..], c.im);
        }
    }
}

// ---------------------------------------------------------------------------
// FillValue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FillValue {
    Value(ZarrValue),
    NaN,
    Infinity,
    NegativeInfinity,
}

impl FillValue {
    /// Return a concrete [`ZarrValue`] for the given dtype (used when filling
    /// chunks that are absent from storage).
    pub fn to_zarr_value(&self, dtype: DataType) -> ZarrValue {
        match self {
            FillValue::Value(v) if v.data_type() == dtype => v.clone(),
            FillValue::Value(_) => default_scalar(dtype),
            FillValue::NaN => special_float(dtype, f64::NAN),
            FillValue::Infinity => special_float(dtype, f64::INFINITY),
            FillValue::NegativeInfinity => special_float(dtype, f64::NEG_INFINITY),
        }
    }

    /// Element bytes of the fill value for `dtype`.
    pub fn to_bytes(&self, dtype: DataType, endian: Endian) -> Vec<u8> {
        self.to_zarr_value(dtype).to_bytes(endian)
    }
}

fn special_float(dtype: DataType, value: f64) -> ZarrValue {
    match dtype {
        DataType::Float16 => ZarrValue::Float16(f16::from_f64(value)),
        DataType::Float32 => ZarrValue::Float32(value as f32),
        DataType::Float64 => ZarrValue::Float64(value),
        DataType::Complex64 => ZarrValue::Complex64(Complex::new(value as f32, 0.0)),
        DataType::Complex128 => ZarrValue::Complex128(Complex::new(value, 0.0)),
        _ => default_scalar(dtype),
    }
}

/// Default zero/false scalar for a data type.
pub fn default_scalar(dtype: DataType) -> ZarrValue {
    match dtype {
        DataType::Bool => ZarrValue::Bool(false),
        DataType::Int8 => ZarrValue::Int8(0),
        DataType::Int16 => ZarrValue::Int16(0),
        DataType::Int32 => ZarrValue::Int32(0),
        DataType::Int64 => ZarrValue::Int64(0),
        DataType::UInt8 => ZarrValue::UInt8(0),
        DataType::UInt16 => ZarrValue::UInt16(0),
        DataType::UInt32 => ZarrValue::UInt32(0),
        DataType::UInt64 => ZarrValue::UInt64(0),
        DataType::Float16 => ZarrValue::Float16(f16::ZERO),
        DataType::Float32 => ZarrValue::Float32(0.0),
        DataType::Float64 => ZarrValue::Float64(0.0),
        DataType::Complex64 => ZarrValue::Complex64(Complex::new(0.0f32, 0.0)),
        DataType::Complex128 => ZarrValue::Complex128(Complex::new(0.0f64, 0.0)),
    }
}

/// Default fill value for a data type.
pub fn default_fill_value(dtype: DataType) -> FillValue {
    FillValue::Value(default_scalar(dtype))
}

/// Create a buffer of `count` elements, each holding the fill value.
pub fn fill_bytes(element: &[u8], count: usize) -> Vec<u8> {
    element.repeat(count)
}
