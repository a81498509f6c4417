//! Encoding host values into guest memory and decoding guest results.
//!
//! # Heap layouts
//!
//! Strings (header layout): a little-endian `u32` count of UTF-16 code units
//! followed by the code units, each stored as two little-endian bytes.
//!
//! Bytes come in two layouts that are never auto-detected; the caller picks
//! the one matching the guest toolchain through [`ArrayLayout`]:
//!
//! - [`ArrayLayout::LengthPrefixed`]: a `u32` byte count followed by the bytes.
//! - [`ArrayLayout::Indirect`]: a three word header `[buffer_offset,
//!   data_start, data_size]`; the bytes live at `buffer_offset + data_start`.
//!
//! Typed arrays (`i32` elements or string pointers) use a two word header
//! `[array_offset, length]`. At `array_offset` an 8-byte field is skipped,
//! then `length` packed 4-byte words follow.
//!
//! Segments addressed by an explicit `(ptr, len)` pair are UTF-8.

use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;
use wasmtime::{AsContext, AsContextMut, Val};

use guest_runtime_common::{CallingConvention, ResultExt, RuntimeError};

use crate::arena::Arena;
use crate::memory::MemoryView;
use crate::value::{ElementKind, GuestValue, NativeValue};

/// Size of a length prefix or header word.
const WORD: i32 = 4;

/// Bytes skipped at the start of a typed array's element buffer.
const TYPED_ARRAY_SKIP: i32 = 8;

/// Layout of a byte array referenced by a header pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArrayLayout {
    /// `u32` length followed by the bytes.
    #[default]
    LengthPrefixed,
    /// `[buffer_offset, data_start, data_size]` header pointing elsewhere.
    Indirect,
}

/// Where the length of a string or byte result comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultLocator {
    /// The single result points at a heap header.
    #[default]
    Header,
    /// The function returns `(ptr, len)`.
    SecondResult,
    /// The caller stages an 8-byte slot, passed as the last parameter, in
    /// which the guest writes `ptr` then `len`.
    ReturnSlot,
}

/// How the raw results of a guest call are turned into a host value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultDecoding {
    /// Pass a single scalar through; no result decodes as `Unit`.
    #[default]
    Scalar,
    /// Decode a string.
    String(ResultLocator),
    /// Decode bytes. `layout` only applies to [`ResultLocator::Header`].
    Bytes {
        locator: ResultLocator,
        layout: ArrayLayout,
    },
    /// Decode a typed `i32` array header.
    I32Array,
    /// Decode an array of string pointers.
    StringArray,
}

impl ResultDecoding {
    /// Whether the caller has to stage a return slot before the call.
    pub fn needs_return_slot(&self) -> bool {
        matches!(
            self,
            Self::String(ResultLocator::ReturnSlot)
                | Self::Bytes {
                    locator: ResultLocator::ReturnSlot,
                    ..
                }
        )
    }
}

/// Encode a string in the header layout.
///
/// # Errors
///
/// Returns an allocation error when the code-unit count does not fit the
/// `u32` length prefix.
pub fn encode_string(value: &str) -> Result<Vec<u8>, RuntimeError> {
    let units: Vec<u16> = value.encode_utf16().collect();
    let count = length_prefix(units.len(), "string")?;
    let mut out = vec![0; 4 + units.len() * 2];
    LittleEndian::write_u32(&mut out[..4], count);
    LittleEndian::write_u16_into(&units, &mut out[4..]);
    Ok(out)
}

/// Encode bytes in the length-prefixed layout.
///
/// # Errors
///
/// Returns an allocation error when the length does not fit the `u32`
/// length prefix.
pub fn encode_bytes(value: &[u8]) -> Result<Vec<u8>, RuntimeError> {
    let length = length_prefix(value.len(), "bytes")?;
    let mut out = Vec::with_capacity(4 + value.len());
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(value);
    Ok(out)
}

fn length_prefix(len: usize, what: &str) -> Result<u32, RuntimeError> {
    u32::try_from(len)
        .map_err(|_| RuntimeError::allocation(format!("{what} of {len} elements overflows the u32 length prefix")))
}

/// Decode a header-layout string at `ptr`.
///
/// Unpaired surrogates are replaced with U+FFFD rather than rejected.
pub fn read_string(view: &MemoryView, store: impl AsContext, ptr: i32) -> Result<String, RuntimeError> {
    let count = view.read_u32(&store, ptr).context("read string length")?;
    let length = i32::try_from(u64::from(count) * 2)
        .map_err(|_| RuntimeError::decode("string length", format!("{count} code units at {ptr}")))?;
    let content_ptr = offset_by(ptr, WORD, "string content")?;

    let bytes = view
        .read_segment(&store, content_ptr, length)
        .context("read string content")?;
    trace!(ptr, count, bytes = %hex::encode(&bytes), "string content");

    let mut units = vec![0_u16; count as usize];
    LittleEndian::read_u16_into(&bytes, &mut units);
    Ok(String::from_utf16_lossy(&units))
}

/// Decode `len` bytes at `ptr` as UTF-8.
pub fn read_utf8(
    view: &MemoryView,
    store: impl AsContext,
    ptr: i32,
    len: i32,
) -> Result<String, RuntimeError> {
    let bytes = view.read_segment(store, ptr, len).context("read utf-8 segment")?;
    String::from_utf8(bytes)
        .map_err(|e| RuntimeError::decode("utf-8 string", format!("at {ptr}: {e}")))
}

/// Decode length-prefixed bytes at `ptr`.
pub fn read_prefixed_bytes(
    view: &MemoryView,
    store: impl AsContext,
    ptr: i32,
) -> Result<Vec<u8>, RuntimeError> {
    let length = view.read_i32(&store, ptr).context("read bytes length")?;
    if length < 0 {
        return Err(RuntimeError::decode("bytes length", format!("negative length {length} at {ptr}")));
    }
    let content_ptr = offset_by(ptr, WORD, "bytes content")?;
    view.read_segment(&store, content_ptr, length)
        .context("read bytes content")
}

/// Decode bytes referenced through an indirect header at `ptr`.
pub fn read_indirect_bytes(
    view: &MemoryView,
    store: impl AsContext,
    ptr: i32,
) -> Result<Vec<u8>, RuntimeError> {
    let buffer_offset = view.read_i32(&store, ptr).context("read array buffer offset")?;
    let data_start = view
        .read_i32(&store, offset_by(ptr, WORD, "array data start")?)
        .context("read array data start")?;
    let data_size = view
        .read_i32(&store, offset_by(ptr, 2 * WORD, "array data size")?)
        .context("read array data size")?;

    view.log_segment(&store, "array header", ptr, 3 * WORD);

    if data_size < 0 {
        return Err(RuntimeError::decode("array data size", format!("negative size {data_size} at {ptr}")));
    }
    let data_ptr = offset_by(buffer_offset, data_start, "array data")?;
    view.read_segment(&store, data_ptr, data_size)
        .context("read array data")
}

/// Decode a typed `i32` array header at `ptr`.
pub fn read_i32_array(
    view: &MemoryView,
    store: impl AsContext,
    ptr: i32,
) -> Result<Vec<i32>, RuntimeError> {
    read_typed_array_words(view, store, ptr, "i32 array")
}

/// Decode an array of header-layout string pointers at `ptr`.
pub fn read_string_array(
    view: &MemoryView,
    store: impl AsContext,
    ptr: i32,
) -> Result<Vec<String>, RuntimeError> {
    read_typed_array_words(view, &store, ptr, "string array")?
        .into_iter()
        .enumerate()
        .map(|(i, string_ptr)| {
            read_string(view, &store, string_ptr).with_context(|| format!("read string array index #{i}"))
        })
        .collect()
}

fn read_typed_array_words(
    view: &MemoryView,
    store: impl AsContext,
    ptr: i32,
    what: &str,
) -> Result<Vec<i32>, RuntimeError> {
    let array_offset = view
        .read_i32(&store, ptr)
        .with_context(|| format!("read {what} offset"))?;
    let length = view
        .read_i32(&store, offset_by(ptr, WORD, what)?)
        .with_context(|| format!("read {what} length"))?;
    if length < 0 {
        return Err(RuntimeError::decode(
            format!("{what} length"),
            format!("negative length {length} at {ptr}"),
        ));
    }
    trace!(ptr, array_offset, length, "resolving {what}");

    let skipped = view
        .read_i64(&store, array_offset)
        .with_context(|| format!("read {what} field"))?;
    trace!(skipped, "{what} leading field");

    let elements_ptr = offset_by(array_offset, TYPED_ARRAY_SKIP, what)?;
    let byte_len = length
        .checked_mul(ElementKind::I32.width())
        .ok_or_else(|| RuntimeError::decode(format!("{what} length"), format!("{length} elements overflow")))?;
    let bytes = view
        .read_segment(&store, elements_ptr, byte_len)
        .with_context(|| format!("read {what} elements"))?;

    let mut words = vec![0_i32; bytes.len() / 4];
    LittleEndian::read_i32_into(&bytes, &mut words);
    Ok(words)
}

/// Convert a host value into its guest encoding, staging references in `arena`.
///
/// Unsigned values keep their bit pattern in the signed word of the same width.
#[allow(clippy::cast_possible_wrap)]
pub fn to_guest_value(
    value: &NativeValue,
    arena: &mut Arena,
    mut store: impl AsContextMut,
    view: &MemoryView,
) -> Result<GuestValue, RuntimeError> {
    let encoded = match value {
        NativeValue::Bool(v) => GuestValue::I32(i32::from(*v)),
        NativeValue::I8(v) => GuestValue::I32(i32::from(*v)),
        NativeValue::U8(v) => GuestValue::I32(i32::from(*v)),
        NativeValue::I16(v) => GuestValue::I32(i32::from(*v)),
        NativeValue::U16(v) => GuestValue::I32(i32::from(*v)),
        NativeValue::I32(v) => GuestValue::I32(*v),
        NativeValue::U32(v) => GuestValue::I32(*v as i32),
        NativeValue::I64(v) => GuestValue::I64(*v),
        NativeValue::U64(v) => GuestValue::I64(*v as i64),
        NativeValue::F32(v) => GuestValue::F32(*v),
        NativeValue::F64(v) => GuestValue::F64(*v),
        NativeValue::Bytes(bytes) => {
            let encoded = encode_bytes(bytes)?;
            let ptr = arena.write(&mut store, view, &encoded).context("stage bytes parameter")?;
            GuestValue::BytesRef {
                ptr,
                len: staged_len(&encoded)?,
            }
        }
        NativeValue::Text(text) => {
            let encoded = encode_string(text)?;
            let ptr = arena.write(&mut store, view, &encoded).context("stage string parameter")?;
            GuestValue::StringRef {
                ptr,
                len: staged_len(&encoded)?,
            }
        }
        NativeValue::Unit | NativeValue::I32Array(_) | NativeValue::TextArray(_) => {
            return Err(RuntimeError::unsupported_type(value.kind_name()));
        }
    };
    Ok(encoded)
}

/// Flatten encoded parameters into engine words.
///
/// With [`CallingConvention::PointerWithLength`] every staged reference is
/// followed by its encoded size.
pub fn flatten_params(values: &[GuestValue], convention: CallingConvention) -> Vec<Val> {
    let mut words = Vec::with_capacity(values.len() * 2);
    for value in values {
        words.push(value.to_val());
        if convention == CallingConvention::PointerWithLength {
            if let Some(len) = value.staged_len() {
                words.push(Val::I32(len));
            }
        }
    }
    words
}

/// Decode the raw results of a guest call.
///
/// `return_slot` is the pointer staged for [`ResultLocator::ReturnSlot`].
pub fn decode_result(
    view: &MemoryView,
    store: impl AsContext,
    decoding: &ResultDecoding,
    results: &[Val],
    return_slot: Option<i32>,
) -> Result<NativeValue, RuntimeError> {
    match decoding {
        ResultDecoding::Scalar => match results {
            [] => Ok(NativeValue::Unit),
            [val] => NativeValue::from_val(val)
                .ok_or_else(|| RuntimeError::decode("scalar result", "reference results are not supported")),
            _ => Err(RuntimeError::decode(
                "scalar result",
                format!("expected at most one result, got {}", results.len()),
            )),
        },
        ResultDecoding::String(ResultLocator::Header) => {
            let ptr = pointer_result(results, 0)?;
            read_string(view, &store, ptr).map(NativeValue::Text)
        }
        ResultDecoding::String(locator) => {
            let (ptr, len) = locate_segment(view, &store, *locator, results, return_slot)?;
            read_utf8(view, &store, ptr, len).map(NativeValue::Text)
        }
        ResultDecoding::Bytes {
            locator: ResultLocator::Header,
            layout,
        } => {
            let ptr = pointer_result(results, 0)?;
            let bytes = match layout {
                ArrayLayout::LengthPrefixed => read_prefixed_bytes(view, &store, ptr)?,
                ArrayLayout::Indirect => read_indirect_bytes(view, &store, ptr)?,
            };
            Ok(NativeValue::Bytes(bytes))
        }
        ResultDecoding::Bytes { locator, .. } => {
            let (ptr, len) = locate_segment(view, &store, *locator, results, return_slot)?;
            Ok(NativeValue::Bytes(
                view.read_segment(&store, ptr, len).context("read bytes result")?,
            ))
        }
        ResultDecoding::I32Array => {
            let ptr = pointer_result(results, 0)?;
            read_i32_array(view, &store, ptr).map(NativeValue::I32Array)
        }
        ResultDecoding::StringArray => {
            let ptr = pointer_result(results, 0)?;
            read_string_array(view, &store, ptr).map(NativeValue::TextArray)
        }
    }
}

/// Resolve `(ptr, len)` for the explicit-length locators.
fn locate_segment(
    view: &MemoryView,
    store: impl AsContext,
    locator: ResultLocator,
    results: &[Val],
    return_slot: Option<i32>,
) -> Result<(i32, i32), RuntimeError> {
    match locator {
        ResultLocator::SecondResult => Ok((pointer_result(results, 0)?, pointer_result(results, 1)?)),
        ResultLocator::ReturnSlot => {
            let slot = return_slot
                .ok_or_else(|| RuntimeError::decode("return slot", "no return slot was staged"))?;
            let ptr = view.read_i32(&store, slot).context("read return slot pointer")?;
            let len = view
                .read_i32(&store, offset_by(slot, WORD, "return slot")?)
                .context("read return slot length")?;
            Ok((ptr, len))
        }
        ResultLocator::Header => Err(RuntimeError::decode(
            "result locator",
            "header results carry no explicit length",
        )),
    }
}

fn pointer_result(results: &[Val], index: usize) -> Result<i32, RuntimeError> {
    match results.get(index) {
        Some(Val::I32(v)) => Ok(*v),
        Some(other) => Err(RuntimeError::decode(
            format!("result #{index}"),
            format!("expected an i32 word, got {other:?}"),
        )),
        None => Err(RuntimeError::decode(
            format!("result #{index}"),
            format!("function returned {} results", results.len()),
        )),
    }
}

fn offset_by(ptr: i32, delta: i32, what: &str) -> Result<i32, RuntimeError> {
    ptr.checked_add(delta)
        .ok_or_else(|| RuntimeError::decode(what, format!("offset {ptr} + {delta} overflows")))
}

fn staged_len(encoded: &[u8]) -> Result<i32, RuntimeError> {
    i32::try_from(encoded.len())
        .map_err(|_| RuntimeError::allocation(format!("{} bytes exceed the guest address space", encoded.len())))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use wasmtime::{Engine, Memory, MemoryType, Store};

    use super::*;
    use crate::memory::WASM_PAGE_SIZE;

    fn setup() -> (Store<()>, MemoryView, Arena) {
        let engine = Engine::default();
        let mut store = Store::new(&engine, ());
        let memory = Memory::new(&mut store, MemoryType::new(1, None)).unwrap();
        let view = MemoryView::new(memory);
        // Leave the first kilobyte for hand-written fixtures.
        let arena = Arena::new(1024, WASM_PAGE_SIZE - 1024);
        (store, view, arena)
    }

    fn put_words(store: &mut Store<()>, view: &MemoryView, offset: i32, words: &[i32]) {
        let mut bytes = vec![0; words.len() * 4];
        LittleEndian::write_i32_into(words, &mut bytes);
        view.write_segment(store, offset, &bytes).unwrap();
    }

    #[test]
    fn test_encode_string_layout() {
        assert_eq!(
            encode_string("hi").unwrap(),
            vec![0x02, 0x00, 0x00, 0x00, b'h', 0x00, b'i', 0x00]
        );
        assert_eq!(encode_string("").unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_length_prefix_overflow_is_allocation_error() {
        assert_eq!(length_prefix(7, "string").unwrap(), 7);
        assert_eq!(length_prefix(u32::MAX as usize, "bytes").unwrap(), u32::MAX);

        let err = length_prefix(u32::MAX as usize + 1, "bytes").unwrap_err();
        assert!(matches!(err, RuntimeError::Allocation { .. }));
    }

    #[rstest]
    #[case("")]
    #[case("Charles")]
    #[case("log error abc - 123")]
    #[case("éàç ÿ ñ")]
    #[case("日本語のテキスト")]
    fn test_string_round_trip(#[case] text: &str) {
        let (mut store, view, mut arena) = setup();

        let ptr = arena.write(&mut store, &view, &encode_string(text).unwrap()).unwrap();

        assert_eq!(read_string(&view, &store, ptr).unwrap(), text);
    }

    #[test]
    fn test_string_round_trip_whole_bmp() {
        // Char ranges skip the surrogate block.
        let text: String = ('\u{0}'..='\u{FFFF}').collect();
        assert_eq!(text.chars().count(), 0x1_0000 - 0x800);
        let (mut store, view, mut arena) = setup();

        let ptr = arena.write(&mut store, &view, &encode_string(&text).unwrap()).unwrap();

        assert_eq!(read_string(&view, &store, ptr).unwrap(), text);
    }

    #[test]
    fn test_unpaired_surrogate_is_replaced() {
        let (mut store, view, _) = setup();
        view.write_segment(&mut store, 0, &[1, 0, 0, 0, 0x00, 0xD8]).unwrap();

        assert_eq!(read_string(&view, &store, 0).unwrap(), "\u{FFFD}");
    }

    #[test]
    fn test_string_length_past_memory_is_bounds_error() {
        let (mut store, view, _) = setup();
        put_words(&mut store, &view, 0, &[40_000]);

        let err = read_string(&view, &store, 0).unwrap_err();
        assert!(err.is_bounds());
        assert!(err.to_string().starts_with("read string content"));
    }

    #[test]
    fn test_read_utf8() {
        let (mut store, view, _) = setup();
        view.write_segment(&mut store, 16, "héllo".as_bytes()).unwrap();

        assert_eq!(read_utf8(&view, &store, 16, 6).unwrap(), "héllo");

        view.write_segment(&mut store, 32, &[0xFF, 0xFE]).unwrap();
        let err = read_utf8(&view, &store, 32, 2).unwrap_err();
        assert!(matches!(err, RuntimeError::Decode { .. }));
    }

    #[test]
    fn test_prefixed_bytes() {
        let (mut store, view, mut arena) = setup();

        let ptr = arena.write(&mut store, &view, &encode_bytes(&[0xE6, 0xF5, 0xAF]).unwrap()).unwrap();

        assert_eq!(read_prefixed_bytes(&view, &store, ptr).unwrap(), vec![0xE6, 0xF5, 0xAF]);
    }

    #[test]
    fn test_negative_bytes_length_is_decode_error() {
        let (mut store, view, _) = setup();
        put_words(&mut store, &view, 0, &[-3]);

        let err = read_prefixed_bytes(&view, &store, 0).unwrap_err();
        assert!(matches!(err, RuntimeError::Decode { .. }));
    }

    #[test]
    fn test_indirect_bytes() {
        let (mut store, view, _) = setup();
        // header at 0 points into a buffer at 100, data starts 8 bytes in
        put_words(&mut store, &view, 0, &[100, 8, 3]);
        view.write_segment(&mut store, 108, &[0xE6, 0xF5, 0xAF]).unwrap();

        assert_eq!(read_indirect_bytes(&view, &store, 0).unwrap(), vec![0xE6, 0xF5, 0xAF]);
    }

    #[test]
    fn test_i32_array() {
        let (mut store, view, _) = setup();
        put_words(&mut store, &view, 0, &[64, 3]);
        put_words(&mut store, &view, 64, &[8, 0, 1, -2, 300]);

        assert_eq!(read_i32_array(&view, &store, 0).unwrap(), vec![1, -2, 300]);
    }

    #[test]
    fn test_string_array() {
        let (mut store, view, mut arena) = setup();
        let first = arena.write(&mut store, &view, &encode_string("alpha").unwrap()).unwrap();
        let second = arena.write(&mut store, &view, &encode_string("beta").unwrap()).unwrap();
        put_words(&mut store, &view, 0, &[64, 2]);
        put_words(&mut store, &view, 64, &[8, 0, first, second]);

        assert_eq!(
            read_string_array(&view, &store, 0).unwrap(),
            vec!["alpha".to_string(), "beta".to_string()]
        );
    }

    #[test]
    fn test_string_array_bad_element_names_index() {
        let (mut store, view, _) = setup();
        put_words(&mut store, &view, 0, &[64, 1]);
        put_words(&mut store, &view, 64, &[8, 0, -5]);

        let err = read_string_array(&view, &store, 0).unwrap_err();
        assert!(err.to_string().starts_with("read string array index #0"));
        assert!(err.is_bounds());
    }

    #[rstest]
    #[case::bool_true(NativeValue::Bool(true), GuestValue::I32(1))]
    #[case::bool_false(NativeValue::Bool(false), GuestValue::I32(0))]
    #[case::i8(NativeValue::I8(-5), GuestValue::I32(-5))]
    #[case::u8(NativeValue::U8(200), GuestValue::I32(200))]
    #[case::i16(NativeValue::I16(-300), GuestValue::I32(-300))]
    #[case::u16(NativeValue::U16(60_000), GuestValue::I32(60_000))]
    #[case::i32(NativeValue::I32(-20), GuestValue::I32(-20))]
    #[case::u32(NativeValue::U32(u32::MAX), GuestValue::I32(-1))]
    #[case::i64(NativeValue::I64(-20), GuestValue::I64(-20))]
    #[case::u64(NativeValue::U64(u64::MAX), GuestValue::I64(-1))]
    #[case::f32(NativeValue::F32(1.5), GuestValue::F32(1.5))]
    #[case::f64(NativeValue::F64(-2.25), GuestValue::F64(-2.25))]
    fn test_scalar_conversion(#[case] native: NativeValue, #[case] expected: GuestValue) {
        let (mut store, view, mut arena) = setup();
        let cursor = arena.start();

        assert_eq!(to_guest_value(&native, &mut arena, &mut store, &view).unwrap(), expected);
        assert_eq!(arena.start(), cursor);
    }

    #[test]
    fn test_text_conversion_stages_in_arena() {
        let (mut store, view, mut arena) = setup();

        let value = to_guest_value(&NativeValue::from("Charles"), &mut arena, &mut store, &view).unwrap();

        assert_eq!(value, GuestValue::StringRef { ptr: 1024, len: 18 });
        assert_eq!(read_string(&view, &store, 1024).unwrap(), "Charles");
        assert_eq!(arena.start(), 1042);
    }

    #[test]
    fn test_bytes_conversion_stages_in_arena() {
        let (mut store, view, mut arena) = setup();

        let value = to_guest_value(&NativeValue::Bytes(vec![1, 2, 3]), &mut arena, &mut store, &view).unwrap();

        assert_eq!(value, GuestValue::BytesRef { ptr: 1024, len: 7 });
        assert_eq!(read_prefixed_bytes(&view, &store, 1024).unwrap(), vec![1, 2, 3]);
    }

    #[rstest]
    #[case(NativeValue::Unit)]
    #[case(NativeValue::I32Array(vec![1]))]
    #[case(NativeValue::TextArray(vec!["a".into()]))]
    fn test_unsupported_parameter(#[case] native: NativeValue) {
        let (mut store, view, mut arena) = setup();

        let err = to_guest_value(&native, &mut arena, &mut store, &view).unwrap_err();
        assert!(matches!(err, RuntimeError::UnsupportedType { .. }));
    }

    #[test]
    fn test_flatten_params() {
        let values = [
            GuestValue::StringRef { ptr: 16, len: 18 },
            GuestValue::I64(7),
            GuestValue::BytesRef { ptr: 40, len: 7 },
        ];

        let pointer_only = flatten_params(&values, CallingConvention::PointerOnly);
        assert_eq!(pointer_only.len(), 3);
        assert!(matches!(pointer_only[0], Val::I32(16)));
        assert!(matches!(pointer_only[1], Val::I64(7)));
        assert!(matches!(pointer_only[2], Val::I32(40)));

        let with_length = flatten_params(&values, CallingConvention::PointerWithLength);
        assert_eq!(with_length.len(), 5);
        assert!(matches!(with_length[1], Val::I32(18)));
        assert!(matches!(with_length[2], Val::I64(7)));
        assert!(matches!(with_length[4], Val::I32(7)));
    }

    #[test]
    fn test_decode_scalar_results() {
        let (store, view, _) = setup();
        let scalar = ResultDecoding::Scalar;

        assert_eq!(decode_result(&view, &store, &scalar, &[], None).unwrap(), NativeValue::Unit);
        assert_eq!(
            decode_result(&view, &store, &scalar, &[Val::I32(42)], None).unwrap(),
            NativeValue::I32(42)
        );
        assert!(decode_result(&view, &store, &scalar, &[Val::I32(1), Val::I32(2)], None).is_err());
    }

    #[test]
    fn test_decode_string_locators() {
        let (mut store, view, _) = setup();
        view.write_segment(&mut store, 200, b"hello").unwrap();
        put_words(&mut store, &view, 300, &[200, 5]);

        let second = decode_result(
            &view,
            &store,
            &ResultDecoding::String(ResultLocator::SecondResult),
            &[Val::I32(200), Val::I32(5)],
            None,
        )
        .unwrap();
        assert_eq!(second, NativeValue::Text("hello".into()));

        let slot = decode_result(
            &view,
            &store,
            &ResultDecoding::String(ResultLocator::ReturnSlot),
            &[],
            Some(300),
        )
        .unwrap();
        assert_eq!(slot, NativeValue::Text("hello".into()));

        let missing = decode_result(
            &view,
            &store,
            &ResultDecoding::String(ResultLocator::ReturnSlot),
            &[],
            None,
        );
        assert!(matches!(missing, Err(RuntimeError::Decode { .. })));
    }

    #[test]
    fn test_decode_result_rejects_non_pointer() {
        let (store, view, _) = setup();

        let err = decode_result(
            &view,
            &store,
            &ResultDecoding::String(ResultLocator::Header),
            &[Val::F64(0)],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::Decode { .. }));
    }

    #[test]
    fn test_needs_return_slot() {
        assert!(ResultDecoding::String(ResultLocator::ReturnSlot).needs_return_slot());
        assert!(ResultDecoding::Bytes {
            locator: ResultLocator::ReturnSlot,
            layout: ArrayLayout::LengthPrefixed
        }
        .needs_return_slot());
        assert!(!ResultDecoding::String(ResultLocator::Header).needs_return_slot());
        assert!(!ResultDecoding::Scalar.needs_return_slot());
    }
}
