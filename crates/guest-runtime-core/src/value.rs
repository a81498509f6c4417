//! Host-native and guest-encoded value representations.
//!
//! [`NativeValue`] is the closed set of host values the runtime knows how to
//! marshal. [`GuestValue`] is what a parameter becomes once it is encoded:
//! either a machine word or a reference to bytes staged in guest memory.

use std::fmt;

use serde::Serialize;
use wasmtime::Val;

/// A host-side value crossing the guest boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NativeValue {
    /// No value (a guest function without results).
    Unit,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Text.
    Text(String),
    /// Typed integer array (result only).
    I32Array(Vec<i32>),
    /// Array of strings (result only).
    TextArray(Vec<String>),
}

impl NativeValue {
    /// Name of the value kind, used in errors and traces.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Bool(_) => "bool",
            Self::I8(_) => "i8",
            Self::U8(_) => "u8",
            Self::I16(_) => "i16",
            Self::U16(_) => "u16",
            Self::I32(_) => "i32",
            Self::U32(_) => "u32",
            Self::I64(_) => "i64",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::I32Array(_) => "i32 array",
            Self::TextArray(_) => "text array",
        }
    }

    /// Convert a raw engine value into a host value.
    ///
    /// Reference types have no host counterpart and yield `None`.
    pub fn from_val(val: &Val) -> Option<Self> {
        match val {
            Val::I32(v) => Some(Self::I32(*v)),
            Val::I64(v) => Some(Self::I64(*v)),
            Val::F32(bits) => Some(Self::F32(f32::from_bits(*bits))),
            Val::F64(bits) => Some(Self::F64(f64::from_bits(*bits))),
            _ => None,
        }
    }
}

macro_rules! native_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for NativeValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

native_from! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    Vec<u8> => Bytes,
    String => Text,
    Vec<i32> => I32Array,
    Vec<String> => TextArray,
}

impl From<&str> for NativeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<&[u8]> for NativeValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

/// Element kind of a typed array in guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// Packed little-endian 4-byte words (`i32` elements or string pointers).
    I32,
}

impl ElementKind {
    /// Size of one element in bytes.
    pub fn width(self) -> i32 {
        match self {
            Self::I32 => 4,
        }
    }
}

/// A parameter after encoding for the guest.
///
/// Scalars are machine words; references point at bytes written through
/// the arena, `len` being the encoded size in bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GuestValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    StringRef { ptr: i32, len: i32 },
    BytesRef { ptr: i32, len: i32 },
    /// Typed array reference. No host parameter kind stages one yet:
    /// `I32Array` and `TextArray` are result-only and rejected as
    /// parameters, so this variant only flows in from embedders building
    /// their own encodings.
    ArrayRef { ptr: i32, len: i32, element: ElementKind },
}

impl GuestValue {
    /// The machine word passed to the guest for this value.
    pub fn to_val(self) -> Val {
        match self {
            Self::I32(v) => Val::I32(v),
            Self::I64(v) => Val::I64(v),
            Self::F32(v) => Val::F32(v.to_bits()),
            Self::F64(v) => Val::F64(v.to_bits()),
            Self::StringRef { ptr, .. } | Self::BytesRef { ptr, .. } | Self::ArrayRef { ptr, .. } => {
                Val::I32(ptr)
            }
        }
    }

    /// Encoded size of a staged reference, `None` for scalars.
    pub fn staged_len(self) -> Option<i32> {
        match self {
            Self::StringRef { len, .. } | Self::BytesRef { len, .. } | Self::ArrayRef { len, .. } => {
                Some(len)
            }
            _ => None,
        }
    }
}

/// Display wrapper rendering engine values as `(i32 (= 5), f64 (= 1.5))`.
pub struct ValSet<'a>(pub &'a [Val]);

impl fmt::Display for ValSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, val) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match val {
                Val::I32(v) => write!(f, "i32 (= {v})")?,
                Val::I64(v) => write!(f, "i64 (= {v})")?,
                Val::F32(bits) => write!(f, "f32 (= {})", f32::from_bits(*bits))?,
                Val::F64(bits) => write!(f, "f64 (= {})", f64::from_bits(*bits))?,
                _ => write!(f, "<ref>")?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions() {
        assert_eq!(NativeValue::from(true), NativeValue::Bool(true));
        assert_eq!(NativeValue::from(-3_i8), NativeValue::I8(-3));
        assert_eq!(NativeValue::from("abc"), NativeValue::Text("abc".into()));
        assert_eq!(
            NativeValue::from(&[1_u8, 2][..]),
            NativeValue::Bytes(vec![1, 2])
        );
    }

    #[test]
    fn test_from_val() {
        assert_eq!(NativeValue::from_val(&Val::I32(42)), Some(NativeValue::I32(42)));
        assert_eq!(NativeValue::from_val(&Val::I64(-20)), Some(NativeValue::I64(-20)));
        assert_eq!(
            NativeValue::from_val(&Val::F32(1.5_f32.to_bits())),
            Some(NativeValue::F32(1.5))
        );
        assert_eq!(
            NativeValue::from_val(&Val::F64(2.25_f64.to_bits())),
            Some(NativeValue::F64(2.25))
        );
    }

    #[test]
    fn test_guest_value_words() {
        assert!(matches!(GuestValue::F64(0.5).to_val(), Val::F64(bits) if bits == 0.5_f64.to_bits()));
        assert!(matches!(
            GuestValue::StringRef { ptr: 64, len: 18 }.to_val(),
            Val::I32(64)
        ));
        assert_eq!(GuestValue::BytesRef { ptr: 8, len: 7 }.staged_len(), Some(7));
        assert_eq!(GuestValue::I32(8).staged_len(), None);
    }

    #[test]
    fn test_array_ref_words() {
        let array = GuestValue::ArrayRef {
            ptr: 256,
            len: 12,
            element: ElementKind::I32,
        };

        assert!(matches!(array.to_val(), Val::I32(256)));
        assert_eq!(array.staged_len(), Some(12));
        assert_eq!(ElementKind::I32.width(), 4);
    }

    #[test]
    fn test_serialize_untagged() {
        assert_eq!(serde_json::to_string(&NativeValue::Text("hi".into())).unwrap(), "\"hi\"");
        assert_eq!(serde_json::to_string(&NativeValue::I32(42)).unwrap(), "42");
        assert_eq!(serde_json::to_string(&NativeValue::Unit).unwrap(), "null");
        assert_eq!(
            serde_json::to_string(&NativeValue::I32Array(vec![1, 2])).unwrap(),
            "[1,2]"
        );
    }

    #[test]
    fn test_val_set_display() {
        let vals = [Val::I32(5), Val::I64(-1), Val::F64(1.5_f64.to_bits())];
        assert_eq!(
            ValSet(&vals).to_string(),
            "(i32 (= 5), i64 (= -1), f64 (= 1.5))"
        );
        assert_eq!(ValSet(&[]).to_string(), "()");
    }
}
