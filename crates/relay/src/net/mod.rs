mod cipher;
mod codec;
mod packet;
pub mod pipe;
mod transport;

pub use cipher::{InvalidSecret, StreamCipher, SHARED_SECRET_LEN};
pub use codec::{
    decode_frame, encode_frame, encode_varint, peek_varint, varint_len, CodecError, Frame,
    PacketReader, PacketWriter, VarInt, Wire, MAX_FRAME_SIZE, MAX_VARINT_BYTES,
};
pub use packet::{Message, Packet, SERVER_ORIGIN};
pub use pipe::MemoryPipe;
pub use transport::{ByteStream, Transport, TransportError, TransportStats};
