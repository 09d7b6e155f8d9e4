//! Avro binary primitives.
//!
//! Only the subset the Fluid schemas need: zig-zag varint `int`/`long`,
//! length-prefixed `string`/`bytes`, and union branch indexes.

use tokio_util::bytes::{Buf, BufMut, Bytes, BytesMut};

use super::DecodeError;

/// A zig-zag encoded 64-bit value never needs more than ten varint bytes.
const MAX_VARINT_LEN: usize = 10;

/// Append-only Avro encoder. Encoding cannot fail.
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_long(&mut self, value: i64) {
        let mut n = ((value << 1) ^ (value >> 63)) as u64;
        while n >= 0x80 {
            self.buf.put_u8((n as u8 & 0x7f) | 0x80);
            n >>= 7;
        }
        self.buf.put_u8(n as u8);
    }

    /// Avro `int` shares the `long` encoding; 32-bit zig-zag of a sign-extended
    /// value is bit-identical.
    pub fn put_int(&mut self, value: i32) {
        self.put_long(i64::from(value));
    }

    pub fn put_bytes(&mut self, value: &[u8]) {
        self.put_long(value.len() as i64);
        self.buf.put_slice(value);
    }

    pub fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }

    pub fn put_union_index(&mut self, index: usize) {
        self.put_long(index as i64);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over a borrowed envelope.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn get_long(&mut self) -> Result<i64, DecodeError> {
        let mut n: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            if !self.buf.has_remaining() {
                return Err(DecodeError::UnexpectedEof);
            }
            let byte = self.buf.get_u8();
            n |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(((n >> 1) as i64) ^ -((n & 1) as i64));
            }
        }
        Err(DecodeError::VarintOverflow)
    }

    pub fn get_int(&mut self) -> Result<i32, DecodeError> {
        let value = self.get_long()?;
        i32::try_from(value).map_err(|_| DecodeError::IntOutOfRange(value))
    }

    fn get_len(&mut self) -> Result<usize, DecodeError> {
        let len = self.get_long()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::NegativeLength(len))?;
        if len > self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(len)
    }

    pub fn get_bytes(&mut self) -> Result<Bytes, DecodeError> {
        let len = self.get_len()?;
        Ok(self.buf.copy_to_bytes(len))
    }

    pub fn get_string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = self.get_len()?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(len);
        let value = std::str::from_utf8(head)
            .map_err(|_| DecodeError::InvalidUtf8 { field })?
            .to_owned();
        self.buf = tail;
        Ok(value)
    }

    /// Read a union branch index, rejecting anything outside `0..variants`.
    pub fn get_union_index(&mut self, variants: usize) -> Result<usize, DecodeError> {
        let index = self.get_long()?;
        match usize::try_from(index) {
            Ok(i) if i < variants => Ok(i),
            _ => Err(DecodeError::UnknownUnionVariant { index, variants }),
        }
    }

    /// Envelopes are self-delimiting; leftover bytes mean a schema mismatch.
    pub fn finish(self) -> Result<(), DecodeError> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn long_bytes(value: i64) -> String {
        let mut w = Writer::new();
        w.put_long(value);
        hex(&w.finish())
    }

    #[test]
    fn zigzag_varints_match_avro() {
        insta::assert_snapshot!(long_bytes(0), @"00");
        insta::assert_snapshot!(long_bytes(-1), @"01");
        insta::assert_snapshot!(long_bytes(1), @"02");
        insta::assert_snapshot!(long_bytes(-64), @"7f");
        insta::assert_snapshot!(long_bytes(64), @"8001");
        insta::assert_snapshot!(long_bytes(300), @"d804");
    }

    #[test]
    fn long_extremes_roundtrip() {
        for value in [i64::MIN, i64::MAX, -1, 0, 1] {
            let mut w = Writer::new();
            w.put_long(value);
            let bytes = w.finish();
            assert!(bytes.len() <= MAX_VARINT_LEN);
            let mut r = Reader::new(&bytes);
            assert_eq!(r.get_long().unwrap(), value);
            r.finish().unwrap();
        }
    }

    #[test]
    fn string_is_length_prefixed() {
        let mut w = Writer::new();
        w.put_str("abc");
        insta::assert_snapshot!(hex(&w.finish()), @"06616263");
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let bytes = [0xffu8; 11];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_long(), Err(DecodeError::VarintOverflow));
    }

    #[test]
    fn truncated_varint_is_eof() {
        let mut r = Reader::new(&[0x80]);
        assert_eq!(r.get_long(), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn int_out_of_range() {
        let mut w = Writer::new();
        w.put_long(i64::from(i32::MAX) + 1);
        let bytes = w.finish();
        let mut r = Reader::new(&bytes);
        assert_eq!(
            r.get_int(),
            Err(DecodeError::IntOutOfRange(i64::from(i32::MAX) + 1))
        );
    }

    #[test]
    fn negative_length_is_rejected() {
        // zig-zag 0x01 == -1
        let mut r = Reader::new(&[0x01, 0x61]);
        assert_eq!(r.get_bytes(), Err(DecodeError::NegativeLength(-1)));
    }

    #[test]
    fn length_past_end_is_eof() {
        let mut r = Reader::new(&[0x06, 0x61]);
        assert_eq!(r.get_string("uuid"), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn invalid_utf8_names_the_field() {
        let mut r = Reader::new(&[0x02, 0xff]);
        assert_eq!(
            r.get_string("function"),
            Err(DecodeError::InvalidUtf8 { field: "function" })
        );
    }

    #[test]
    fn union_index_bounds() {
        let mut r = Reader::new(&[0x00]);
        assert_eq!(r.get_union_index(1), Ok(0));

        let mut r = Reader::new(&[0x02]);
        assert_eq!(
            r.get_union_index(1),
            Err(DecodeError::UnknownUnionVariant {
                index: 1,
                variants: 1
            })
        );

        let mut r = Reader::new(&[0x01]);
        assert_eq!(
            r.get_union_index(1),
            Err(DecodeError::UnknownUnionVariant {
                index: -1,
                variants: 1
            })
        );
    }

    #[test]
    fn trailing_bytes_reported() {
        let r = Reader::new(&[0x00, 0x00]);
        assert_eq!(r.finish(), Err(DecodeError::TrailingBytes(2)));
    }
}
