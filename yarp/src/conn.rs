// yarp/src/conn.rs

use crate::base::RithmicError;
use crate::framer::{self, FrameReader};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Duplex, frame-oriented byte transport underneath a session.
///
/// Implementations serialize writes internally; `recv_frame` is only ever called from
/// the session's single receive loop.
pub trait Transport: Send + Sync {
  /// Write one payload as a frame.
  fn send_frame(&self, payload: &[u8]) -> Result<(), RithmicError>;

  /// Wait up to `timeout` for the next complete frame. `Ok(None)` means the wait
  /// elapsed with no complete frame.
  fn recv_frame(&self, timeout: Duration) -> Result<Option<Vec<u8>>, RithmicError>;

  /// Whether the underlying connection is still believed to be usable.
  fn is_open(&self) -> bool;

  /// Close the connection. Blocked readers wake up with `ConnectionClosed`.
  fn close(&self);

  /// Description of the remote end, for logs.
  fn peer(&self) -> String {
    "unknown".to_string()
  }
}

/// TCP transport. The reader half is a clone of the writer's socket.
pub struct SocketTransport {
  writer: Mutex<TcpStream>,
  reader: Mutex<FrameReader<TcpStream>>,
  open: AtomicBool,
  peer: String,
}

impl SocketTransport {
  /// Resolve `addr` (host:port) and connect with a timeout.
  pub fn connect(addr: &str, timeout: Duration) -> Result<Self, RithmicError> {
    info!("Connecting to {}", addr);
    let socket_addrs: Vec<_> = addr
      .to_socket_addrs()
      .map_err(|e| RithmicError::ConfigurationError(format!("Invalid address {}: {}", addr, e)))?
      .collect();

    let mut last_err = None;
    for socket_addr in socket_addrs {
      match TcpStream::connect_timeout(&socket_addr, timeout) {
        Ok(stream) => return Self::from_stream(stream, timeout),
        Err(e) => {
          warn!("Connect to {} failed: {}", socket_addr, e);
          last_err = Some(e);
        }
      }
    }
    Err(RithmicError::ConnectionFailed(match last_err {
      Some(e) => format!("Connect to {} failed: {}", addr, e),
      None => format!("No addresses resolved for {}", addr),
    }))
  }

  /// Wrap an already connected stream.
  pub fn from_stream(stream: TcpStream, write_timeout: Duration) -> Result<Self, RithmicError> {
    stream.set_nodelay(true)
      .map_err(|e| RithmicError::SocketError(format!("Failed to set nodelay: {}", e)))?;
    stream.set_write_timeout(Some(write_timeout))
      .map_err(|e| RithmicError::SocketError(format!("Failed to set write timeout: {}", e)))?;
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
    let reader_stream = stream.try_clone()
      .map_err(|e| RithmicError::SocketError(format!("Cloning stream for reader: {}", e)))?;

    debug!("Socket transport ready for {}", peer);
    Ok(SocketTransport {
      writer: Mutex::new(stream),
      reader: Mutex::new(FrameReader::new(reader_stream)),
      open: AtomicBool::new(true),
      peer,
    })
  }
}

impl Transport for SocketTransport {
  fn send_frame(&self, payload: &[u8]) -> Result<(), RithmicError> {
    if !self.open.load(Ordering::SeqCst) {
      return Err(RithmicError::ConnectionClosed("Transport closed".to_string()));
    }
    let mut stream = self.writer.lock();
    let result = framer::write_frame(&mut *stream, payload);
    if let Err(RithmicError::ConnectionClosed(_)) = &result {
      self.open.store(false, Ordering::SeqCst);
    }
    result
  }

  fn recv_frame(&self, timeout: Duration) -> Result<Option<Vec<u8>>, RithmicError> {
    let mut reader = self.reader.lock();
    // A zero timeout would mean "block forever" to the OS.
    let timeout = timeout.max(Duration::from_millis(1));
    reader.get_ref().set_read_timeout(Some(timeout))
      .map_err(|e| RithmicError::SocketError(format!("Setting read timeout: {}", e)))?;
    let result = reader.poll_frame();
    if let Err(e) = &result {
      if e.is_fatal() {
        self.open.store(false, Ordering::SeqCst);
      }
    }
    result
  }

  fn is_open(&self) -> bool {
    self.open.load(Ordering::SeqCst)
  }

  fn close(&self) {
    if self.open.swap(false, Ordering::SeqCst) {
      debug!("Closing socket to {}", self.peer);
    }
    let stream = self.writer.lock();
    if let Err(e) = stream.shutdown(Shutdown::Both) {
      // Ignore "NotConnected" errors, log others
      if e.kind() != std::io::ErrorKind::NotConnected {
        warn!("Error shutting down socket: {}", e);
      }
    }
  }

  fn peer(&self) -> String {
    self.peer.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::TcpListener;
  use std::thread;

  #[test]
  fn socket_round_trip_and_close() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = thread::spawn(move || {
      let (mut stream, _) = listener.accept().unwrap();
      let payload = framer::read_frame(&mut stream).unwrap();
      framer::write_frame(&mut stream, &payload).unwrap();
    });

    let transport = SocketTransport::connect(&addr, Duration::from_secs(2)).unwrap();
    assert!(transport.is_open());
    assert_eq!(transport.recv_frame(Duration::from_millis(20)).unwrap(), None);
    transport.send_frame(b"18\x00").unwrap();
    let mut echoed = None;
    for _ in 0..100 {
      if let Some(p) = transport.recv_frame(Duration::from_millis(50)).unwrap() {
        echoed = Some(p);
        break;
      }
    }
    assert_eq!(echoed, Some(b"18\x00".to_vec()));
    server.join().unwrap();

    // Server hung up after echoing.
    let mut outcome = Ok(None);
    for _ in 0..100 {
      outcome = transport.recv_frame(Duration::from_millis(50));
      if outcome.is_err() {
        break;
      }
    }
    assert!(matches!(outcome, Err(RithmicError::ConnectionClosed(_))));
    assert!(!transport.is_open());
    transport.close();
  }
}
