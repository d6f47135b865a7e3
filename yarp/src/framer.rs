// yarp/src/framer.rs
// Length-prefixed framing: a 4-byte big-endian header whose low 3 bytes carry the
// payload length, followed by the payload.

use crate::base::RithmicError;
use byteorder::{BigEndian, ByteOrder};
use std::io::{ErrorKind, Read, Write};

pub const HEADER_LEN: usize = 4;

/// Largest payload the header can describe.
pub const MAX_WIRE_LEN: usize = 0x00FF_FFFF;

/// Largest payload accepted from the wire. Anything above this is treated as a
/// desynchronized stream.
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024; // 10 MB limit

const READ_CHUNK: usize = 8192;

fn encode_header(len: usize) -> Result<[u8; HEADER_LEN], RithmicError> {
  if len > MAX_WIRE_LEN {
    return Err(RithmicError::FramingError(format!(
      "Payload of {} bytes exceeds the 24-bit length header", len
    )));
  }
  let mut header = [0u8; HEADER_LEN];
  BigEndian::write_u32(&mut header, len as u32);
  Ok(header)
}

fn decode_header(header: &[u8]) -> Result<usize, RithmicError> {
  let len = (BigEndian::read_u32(header) & 0x00FF_FFFF) as usize;
  if len > MAX_FRAME_LEN {
    return Err(RithmicError::FramingError(format!("Declared frame length too large: {}", len)));
  }
  Ok(len)
}

/// Prepend the length header to a payload.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, RithmicError> {
  let header = encode_header(payload.len())?;
  let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
  out.extend_from_slice(&header);
  out.extend_from_slice(payload);
  Ok(out)
}

/// Strip the header from exactly one complete frame.
pub fn unframe(bytes: &[u8]) -> Result<Vec<u8>, RithmicError> {
  if bytes.len() < HEADER_LEN {
    return Err(RithmicError::FramingError(format!("Truncated length header ({} bytes)", bytes.len())));
  }
  let len = decode_header(&bytes[..HEADER_LEN])?;
  let body = &bytes[HEADER_LEN..];
  if body.len() != len {
    return Err(RithmicError::FramingError(format!(
      "Declared length {} does not match body of {} bytes", len, body.len()
    )));
  }
  Ok(body.to_vec())
}

/// Write one frame with a single write so concurrent writers sharing a lock never
/// interleave a header with another frame's body.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), RithmicError> {
  let bytes = frame(payload)?;
  writer.write_all(&bytes).map_err(map_write_error)?;
  writer.flush().map_err(map_write_error)?;
  Ok(())
}

fn map_write_error(e: std::io::Error) -> RithmicError {
  match e.kind() {
    ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::NotConnected => {
      RithmicError::ConnectionClosed(format!("Write failed: {}", e))
    }
    _ => RithmicError::SocketError(format!("Write failed: {}", e)),
  }
}

/// Blocking read of exactly one frame.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, RithmicError> {
  let mut framed = FrameReader::new(reader);
  loop {
    if let Some(payload) = framed.poll_frame()? {
      return Ok(payload);
    }
  }
}

/// Buffered frame reader.
///
/// A read timeout on the underlying stream surfaces as `Ok(None)` and keeps any partial
/// frame buffered, so the caller can use read timeouts as an idle clock without losing
/// stream alignment.
pub struct FrameReader<R> {
  inner: R,
  buf: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
  pub fn new(inner: R) -> Self {
    FrameReader { inner, buf: Vec::new() }
  }

  pub fn get_ref(&self) -> &R {
    &self.inner
  }

  /// Bytes read from the stream but not yet returned as a frame.
  pub fn buffered(&self) -> usize {
    self.buf.len()
  }

  fn take_frame(&mut self) -> Result<Option<Vec<u8>>, RithmicError> {
    if self.buf.len() < HEADER_LEN {
      return Ok(None);
    }
    let len = decode_header(&self.buf[..HEADER_LEN])?;
    if self.buf.len() < HEADER_LEN + len {
      return Ok(None);
    }
    let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
    self.buf.drain(..HEADER_LEN + len);
    Ok(Some(payload))
  }

  /// Return the next complete frame, or `None` if the stream timed out first.
  pub fn poll_frame(&mut self) -> Result<Option<Vec<u8>>, RithmicError> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
      if let Some(payload) = self.take_frame()? {
        return Ok(Some(payload));
      }
      match self.inner.read(&mut chunk) {
        Ok(0) => return Err(self.eof_error()),
        Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
        Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => return Ok(None),
        Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
        Err(e) => return Err(RithmicError::ConnectionClosed(format!("Read failed: {}", e))),
      }
    }
  }

  fn eof_error(&self) -> RithmicError {
    match self.buf.len() {
      0 => RithmicError::ConnectionClosed("Stream closed".to_string()),
      n if n < HEADER_LEN => RithmicError::FramingError(format!("Stream closed inside length header ({} of {} bytes)", n, HEADER_LEN)),
      n => RithmicError::ConnectionClosed(format!("Stream closed mid-frame ({} bytes buffered)", n)),
    }
  }
}
