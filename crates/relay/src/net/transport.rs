use std::io::{self, Read, Write};
use std::marker::PhantomData;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use super::cipher::{InvalidSecret, StreamCipher};
use super::codec::{decode_frame, CodecError, MAX_FRAME_SIZE};
use super::packet::{Message, Packet};

const READ_CHUNK: usize = 4096;
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw byte stream under a transport. Reads must not block: an idle stream
/// reports `WouldBlock`.
pub trait ByteStream: Read + Write + Send {
    fn peer_addr(&self) -> Option<SocketAddr>;
    fn shutdown(&mut self);
}

impl ByteStream for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    fn shutdown(&mut self) {
        let _ = TcpStream::shutdown(self, Shutdown::Both);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("framing error: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

pub struct Transport<M> {
    stream: Box<dyn ByteStream>,
    peer: Option<SocketAddr>,
    inbound: Vec<u8>,
    cipher: Option<StreamCipher>,
    connected: bool,
    stats: TransportStats,
    _message: PhantomData<fn() -> M>,
}

impl<M: Message> Transport<M> {
    pub fn new(stream: Box<dyn ByteStream>) -> Self {
        let peer = stream.peer_addr();
        Self {
            stream,
            peer,
            inbound: Vec::new(),
            cipher: None,
            connected: true,
            stats: TransportStats::default(),
            _message: PhantomData,
        }
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    pub fn encryption_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Bytes received but not yet consumed as packets.
    pub fn bytes_available(&mut self) -> usize {
        if let Err(e) = self.poll() {
            log::debug!("read from {:?} failed: {}", self.peer, e);
        }
        self.inbound.len()
    }

    /// Returns the next complete packet, or `None` if a whole frame has not
    /// arrived yet.
    pub fn read_packet(&mut self) -> Result<Option<Packet<M>>, TransportError> {
        self.poll()?;
        let Some((frame, used)) = decode_frame(&self.inbound)? else {
            return Ok(None);
        };
        self.inbound.drain(..used);
        self.stats.packets_received += 1;
        Ok(Some(Packet::from_frame(&frame)?))
    }

    pub fn write_packet(&mut self, packet: &Packet<M>) -> io::Result<()> {
        if !self.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let mut bytes = packet.to_frame_bytes();
        if let Some(cipher) = &mut self.cipher {
            cipher.encrypt(&mut bytes);
        }
        if let Err(e) = self.write_all(&bytes) {
            self.connected = false;
            return Err(e);
        }
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes.len() as u64;
        Ok(())
    }

    /// Routes all further traffic in both directions through the stream
    /// cipher. Bytes already buffered but not yet framed arrived after the
    /// peer switched over, so they are decrypted in place.
    pub fn enable_encryption(&mut self, secret: &[u8]) -> Result<(), InvalidSecret> {
        let mut cipher = StreamCipher::new(secret)?;
        cipher.decrypt(&mut self.inbound);
        self.cipher = Some(cipher);
        Ok(())
    }

    pub fn shutdown(&mut self) {
        if self.connected {
            self.stream.shutdown();
            self.connected = false;
        }
    }

    fn poll(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        while self.connected && self.inbound.len() < MAX_FRAME_SIZE {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.connected = false;
                }
                Ok(n) => {
                    let start = self.inbound.len();
                    self.inbound.extend_from_slice(&chunk[..n]);
                    if let Some(cipher) = &mut self.cipher {
                        cipher.decrypt(&mut self.inbound[start..]);
                    }
                    self.stats.bytes_received += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.connected = false;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn write_all(&mut self, mut bytes: &[u8]) -> io::Result<()> {
        let started = Instant::now();
        while !bytes.is_empty() {
            match self.stream.write(bytes) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => bytes = &bytes[n..],
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if started.elapsed() > WRITE_TIMEOUT {
                        return Err(io::ErrorKind::TimedOut.into());
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.stream.flush()
    }
}
