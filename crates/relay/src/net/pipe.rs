use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use super::transport::ByteStream;

#[derive(Debug, Default)]
struct Buffer {
    data: VecDeque<u8>,
    closed: bool,
}

type Shared = Arc<Mutex<Buffer>>;

fn lock(buffer: &Shared) -> MutexGuard<'_, Buffer> {
    buffer.lock().unwrap_or_else(|e| e.into_inner())
}

/// One end of an in-memory, non-blocking duplex byte stream. Reads on an
/// empty, still-open pipe report `WouldBlock`, like a non-blocking socket.
#[derive(Debug)]
pub struct MemoryPipe {
    incoming: Shared,
    outgoing: Shared,
    peer: Option<SocketAddr>,
}

impl MemoryPipe {
    pub fn pair() -> (MemoryPipe, MemoryPipe) {
        let a: Shared = Arc::default();
        let b: Shared = Arc::default();
        (
            MemoryPipe {
                incoming: Arc::clone(&a),
                outgoing: Arc::clone(&b),
                peer: None,
            },
            MemoryPipe {
                incoming: b,
                outgoing: a,
                peer: None,
            },
        )
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn available(&self) -> usize {
        lock(&self.incoming).data.len()
    }

    pub fn is_closed(&self) -> bool {
        let incoming = lock(&self.incoming).closed;
        let outgoing = lock(&self.outgoing).closed;
        incoming || outgoing
    }

    pub fn close(&self) {
        lock(&self.incoming).closed = true;
        lock(&self.outgoing).closed = true;
    }
}

impl Read for MemoryPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut incoming = lock(&self.incoming);
        if incoming.data.is_empty() {
            if incoming.closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let count = buf.len().min(incoming.data.len());
        for (slot, byte) in buf.iter_mut().zip(incoming.data.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl Write for MemoryPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut outgoing = lock(&self.outgoing);
        if outgoing.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        outgoing.data.extend(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for MemoryPipe {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn shutdown(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_duplex() {
        let (mut a, mut b) = MemoryPipe::pair();
        a.write_all(b"ping").unwrap();
        assert_eq!(b.available(), 4);

        let mut buf = [0u8; 8];
        assert_eq!(b.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(
            b.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn test_pipe_close_is_eof() {
        let (mut a, mut b) = MemoryPipe::pair();
        a.shutdown();
        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf).unwrap(), 0);
        assert!(b.write(b"x").is_err());
    }
}
