use glam::Vec3;
use num_bigint::BigInt;

pub const MAX_VARINT_BYTES: usize = 5;
pub const MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame length is zero")]
    EmptyFrame,
    #[error("frame length {0} exceeds limit of {MAX_FRAME_SIZE} bytes")]
    FrameTooLarge(usize),
    #[error("unknown packet id {0:#04x}")]
    UnknownPacket(i32),
    #[error("unexpected end of packet data")]
    UnexpectedEof,
    #[error("negative length {0}")]
    NegativeLength(i32),
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

pub fn encode_varint(value: i32, out: &mut Vec<u8>) {
    let mut value = value as u32;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn varint_len(value: i32) -> usize {
    let mut value = value as u32;
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Decodes a varint from the front of `buf`, returning the value and the
/// number of bytes consumed, or `None` if `buf` ends mid-varint.
///
/// Overflow policy: at most five bytes are consumed. If the fifth byte still
/// has its continuation bit set, the error is logged and the bits gathered
/// so far are returned; the bytes that follow are left for the next read.
pub fn peek_varint(buf: &[u8]) -> Option<(i32, usize)> {
    let mut result: u32 = 0;
    for (index, &byte) in buf.iter().take(MAX_VARINT_BYTES).enumerate() {
        result |= ((byte & 0x7F) as u32).wrapping_shl(7 * index as u32);
        if byte & 0x80 == 0 {
            return Some((result as i32, index + 1));
        }
        if index + 1 == MAX_VARINT_BYTES {
            log::error!("varint longer than {MAX_VARINT_BYTES} bytes, clamping to {result:#x}");
            return Some((result as i32, MAX_VARINT_BYTES));
        }
    }
    None
}

#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_varint(&mut self, value: i32) {
        encode_varint(value, &mut self.buf);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_varint(&mut self) -> Result<i32, CodecError> {
        let (value, used) = peek_varint(&self.data[self.pos..]).ok_or(CodecError::UnexpectedEof)?;
        self.pos += used;
        Ok(value)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_len(&mut self) -> Result<usize, CodecError> {
        let len = self.read_varint()?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        Ok(len as usize)
    }
}

/// A value with a fixed wire encoding.
pub trait Wire: Sized {
    fn write(&self, writer: &mut PacketWriter);
    fn read(reader: &mut PacketReader<'_>) -> Result<Self, CodecError>;
}

impl Wire for bool {
    fn write(&self, writer: &mut PacketWriter) {
        writer.write_bytes(&[*self as u8]);
    }

    fn read(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(reader.read_array::<1>()?[0] != 0)
    }
}

macro_rules! impl_wire_be {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Wire for $ty {
                fn write(&self, writer: &mut PacketWriter) {
                    writer.write_bytes(&self.to_be_bytes());
                }

                fn read(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
                    Ok(<$ty>::from_be_bytes(reader.read_array()?))
                }
            }
        )*
    };
}

impl_wire_be!(u8, i8, i16, u16, i32, u32, i64, u64, f32, f64);

/// Varint-encoded 32-bit integer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VarInt(pub i32);

impl Wire for VarInt {
    fn write(&self, writer: &mut PacketWriter) {
        writer.write_varint(self.0);
    }

    fn read(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_varint().map(VarInt)
    }
}

impl Wire for String {
    fn write(&self, writer: &mut PacketWriter) {
        writer.write_varint(self.len() as i32);
        writer.write_bytes(self.as_bytes());
    }

    fn read(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        let len = reader.read_len()?;
        let bytes = reader.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

impl Wire for BigInt {
    fn write(&self, writer: &mut PacketWriter) {
        let bytes = self.to_signed_bytes_be();
        writer.write_varint(bytes.len() as i32);
        writer.write_bytes(&bytes);
    }

    fn read(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        let len = reader.read_len()?;
        Ok(BigInt::from_signed_bytes_be(reader.read_bytes(len)?))
    }
}

impl Wire for Vec3 {
    fn write(&self, writer: &mut PacketWriter) {
        self.x.write(writer);
        self.y.write(writer);
        self.z.write(writer);
    }

    fn read(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Vec3::new(f32::read(reader)?, f32::read(reader)?, f32::read(reader)?))
    }
}

/// Fixed-count array: no length prefix on the wire.
impl<const N: usize> Wire for [u8; N] {
    fn write(&self, writer: &mut PacketWriter) {
        writer.write_bytes(self);
    }

    fn read(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_array()
    }
}

/// Counted sequence: a varint element count followed by the elements.
impl<T: Wire> Wire for Vec<T> {
    fn write(&self, writer: &mut PacketWriter) {
        writer.write_varint(self.len() as i32);
        for item in self {
            item.write(writer);
        }
    }

    fn read(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        let count = reader.read_len()?;
        // Each element takes at least one byte, so a count beyond what is
        // left in the frame cannot be honest.
        if count > reader.remaining() {
            return Err(CodecError::UnexpectedEof);
        }
        (0..count).map(|_| T::read(reader)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: i32,
    pub origin: i32,
    pub payload: Vec<u8>,
}

pub fn encode_frame(id: i32, origin: i32, payload: &[u8]) -> Vec<u8> {
    let body_len = varint_len(id) + varint_len(origin) + payload.len();
    let mut out = Vec::with_capacity(varint_len(body_len as i32) + body_len);
    encode_varint(body_len as i32, &mut out);
    encode_varint(id, &mut out);
    encode_varint(origin, &mut out);
    out.extend_from_slice(payload);
    out
}

/// Splits one complete frame off the front of `buf`. Returns `Ok(None)`
/// when more bytes are needed.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, CodecError> {
    let Some((length, prefix)) = peek_varint(buf) else {
        return Ok(None);
    };
    if length == 0 {
        return Err(CodecError::EmptyFrame);
    }
    let length = length as u32 as usize;
    if length > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(length));
    }
    if buf.len() < prefix + length {
        return Ok(None);
    }

    let mut reader = PacketReader::new(&buf[prefix..prefix + length]);
    let id = reader.read_varint()?;
    let origin = reader.read_varint()?;
    let payload = reader.read_bytes(reader.remaining())?.to_vec();

    Ok(Some((Frame { id, origin, payload }, prefix + length)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Wire + PartialEq + std::fmt::Debug>(value: T) {
        let mut writer = PacketWriter::new();
        value.write(&mut writer);
        let bytes = writer.into_inner();
        let mut reader = PacketReader::new(&bytes);
        assert_eq!(T::read(&mut reader).unwrap(), value);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_varint_round_trip_28_bits() {
        let samples = [0, 1, 127, 128, 255, 300, 16_383, 16_384, 2_097_151, 2_097_152, (1 << 28) - 1];
        for value in samples {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf);
            assert!(buf.len() <= 4);
            assert_eq!(buf.len(), varint_len(value));
            assert_eq!(peek_varint(&buf), Some((value, buf.len())));
        }
    }

    #[test]
    fn test_varint_negative_uses_five_bytes() {
        let mut buf = Vec::new();
        encode_varint(-1, &mut buf);
        assert_eq!(buf, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(peek_varint(&buf), Some((-1, 5)));
    }

    #[test]
    fn test_varint_incomplete() {
        assert_eq!(peek_varint(&[]), None);
        assert_eq!(peek_varint(&[0x80, 0x80]), None);
    }

    #[test]
    fn test_varint_overflow_clamps_deterministically() {
        let input = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let first = peek_varint(&input);
        assert_eq!(first, Some((-1, 5)));
        for _ in 0..10 {
            assert_eq!(peek_varint(&input), first);
        }

        let input = [0x81, 0x80, 0x80, 0x80, 0x80, 0x80, 0x00];
        assert_eq!(peek_varint(&input), Some((1, 5)));
    }

    #[test]
    fn test_primitive_round_trips() {
        round_trip(true);
        round_trip(false);
        round_trip(0u8);
        round_trip(255u8);
        round_trip(-1i8);
        round_trip(i16::MIN);
        round_trip(-1i16);
        round_trip(u16::MAX);
        round_trip(-1i32);
        round_trip(i32::MAX);
        round_trip(u32::MAX);
        round_trip(-1i64);
        round_trip(i64::MIN);
        round_trip(0u64);
        round_trip(-0.5f32);
        round_trip(f64::MAX);
        round_trip(String::new());
        round_trip(String::from("Ash Ketchum"));
        round_trip("x".repeat(MAX_FRAME_SIZE / 4));
        round_trip(BigInt::from(0));
        round_trip(BigInt::from(-1));
        round_trip(BigInt::from(i64::MAX) * BigInt::from(i64::MAX));
        round_trip(VarInt(-7));
        round_trip(Vec3::new(1.5, -2.0, 1024.25));
        round_trip([1u8, 2, 3, 4]);
        round_trip(vec![String::from("a"), String::from("bc")]);
    }

    #[test]
    fn test_integers_are_big_endian() {
        let mut writer = PacketWriter::new();
        0x0102_0304i32.write(&mut writer);
        0x0506i16.write(&mut writer);
        assert_eq!(writer.into_inner(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_bigint_is_twos_complement() {
        let mut writer = PacketWriter::new();
        BigInt::from(-2).write(&mut writer);
        assert_eq!(writer.into_inner(), vec![1, 0xFE]);
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(3, -1, &[9, 9]);
        assert_eq!(frame[0] as usize, frame.len() - 1);
        let (decoded, used) = decode_frame(&frame).unwrap().unwrap();
        assert_eq!(used, frame.len());
        assert_eq!(decoded, Frame { id: 3, origin: -1, payload: vec![9, 9] });
    }

    #[test]
    fn test_partial_frame_waits() {
        let frame = encode_frame(1, 0, b"hello");
        for cut in 0..frame.len() {
            assert_eq!(decode_frame(&frame[..cut]).unwrap(), None);
        }
    }

    #[test]
    fn test_zero_length_frame_rejected() {
        assert_eq!(decode_frame(&[0x00]), Err(CodecError::EmptyFrame));
    }

    #[test]
    fn test_truncated_string_is_error() {
        let mut reader = PacketReader::new(&[5, b'a', b'b']);
        assert_eq!(String::read(&mut reader), Err(CodecError::UnexpectedEof));
    }
}
