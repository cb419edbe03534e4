use std::fmt;

use super::codec::{encode_frame, CodecError, Frame, PacketReader, PacketWriter};

/// Origin used for packets generated by the server itself.
pub const SERVER_ORIGIN: i32 = -1;

/// A protocol's packet set. Each protocol variant has its own id space.
pub trait Message: Clone + fmt::Debug + Send + Sync + 'static {
    fn id(&self) -> i32;
    fn encode(&self, writer: &mut PacketWriter);
    fn decode(id: i32, reader: &mut PacketReader<'_>) -> Result<Self, CodecError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet<M> {
    pub origin: i32,
    pub message: M,
}

impl<M: Message> Packet<M> {
    pub fn new(origin: i32, message: M) -> Self {
        Self { origin, message }
    }

    pub fn server(message: M) -> Self {
        Self::new(SERVER_ORIGIN, message)
    }

    pub fn id(&self) -> i32 {
        self.message.id()
    }

    pub fn to_frame_bytes(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        self.message.encode(&mut writer);
        encode_frame(self.message.id(), self.origin, &writer.into_inner())
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, CodecError> {
        let mut reader = PacketReader::new(&frame.payload);
        let message = M::decode(frame.id, &mut reader)?;
        if reader.remaining() > 0 {
            log::trace!(
                "packet {:#04x} left {} trailing bytes",
                frame.id,
                reader.remaining()
            );
        }
        Ok(Self::new(frame.origin, message))
    }
}

/// Declares a protocol's packet enum together with its `Message` impl.
///
/// Every field type must implement `Wire`; fields are encoded in
/// declaration order with no additional framing.
#[macro_export]
macro_rules! packets {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $id:path => $variant:ident { $( $field:ident : $ty:ty ),* $(,)? }
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant { $( $field: $ty ),* }
            ),*
        }

        impl $crate::net::Message for $name {
            fn id(&self) -> i32 {
                match self {
                    $( Self::$variant { .. } => $id, )*
                }
            }

            #[allow(unused_variables)]
            fn encode(&self, writer: &mut $crate::net::PacketWriter) {
                match self {
                    $(
                        Self::$variant { $( $field ),* } => {
                            $( $crate::net::Wire::write($field, writer); )*
                        }
                    )*
                }
            }

            #[allow(unused_variables)]
            fn decode(
                id: i32,
                reader: &mut $crate::net::PacketReader<'_>,
            ) -> Result<Self, $crate::net::CodecError> {
                match id {
                    $(
                        $id => Ok(Self::$variant {
                            $( $field: <$ty as $crate::net::Wire>::read(reader)? ),*
                        }),
                    )*
                    other => Err($crate::net::CodecError::UnknownPacket(other)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::VarInt;

    mod ids {
        pub const PING: i32 = 0x01;
        pub const SAY: i32 = 0x02;
    }

    crate::packets! {
        enum TestPacket {
            ids::PING => Ping {},
            ids::SAY => Say { text: String, count: VarInt },
        }
    }

    #[test]
    fn test_packet_round_trip() {
        let packet = Packet::new(
            7,
            TestPacket::Say {
                text: "hi".into(),
                count: VarInt(3),
            },
        );
        let bytes = packet.to_frame_bytes();
        let (frame, _) = crate::net::decode_frame(&bytes).unwrap().unwrap();
        assert_eq!(frame.id, ids::SAY);
        assert_eq!(frame.origin, 7);
        assert_eq!(Packet::<TestPacket>::from_frame(&frame).unwrap(), packet);
    }

    #[test]
    fn test_unknown_id_rejected() {
        let frame = Frame {
            id: 0x7F,
            origin: 0,
            payload: Vec::new(),
        };
        assert_eq!(
            Packet::<TestPacket>::from_frame(&frame),
            Err(CodecError::UnknownPacket(0x7F))
        );
    }

    #[test]
    fn test_server_origin() {
        let packet = Packet::server(TestPacket::Ping {});
        assert_eq!(packet.origin, SERVER_ORIGIN);
        assert_eq!(packet.id(), ids::PING);
    }
}
