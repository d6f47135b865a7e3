// yarp/src/conn_mock.rs
// In-memory transport for driving a session without a plant.

use crate::base::RithmicError;
use crate::protocol_decoder::decode_record;
use crate::protocol_encoder::encode_record;
use crate::record::Record;
use crate::conn::Transport;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Session side of an in-memory connection.
pub struct MockTransport {
  inbound: Receiver<Vec<u8>>,
  outbound: Sender<Vec<u8>>,
  open: Arc<AtomicBool>,
}

/// Plant side of an in-memory connection: pushes frames to the session and observes
/// what the session sent. Dropping the peer closes the stream.
pub struct MockPeer {
  inbound: Sender<Vec<u8>>,
  outbound: Receiver<Vec<u8>>,
  open: Arc<AtomicBool>,
}

/// Create a connected transport/peer pair.
pub fn mock_pair() -> (Arc<MockTransport>, MockPeer) {
  let (in_tx, in_rx) = unbounded();
  let (out_tx, out_rx) = unbounded();
  let open = Arc::new(AtomicBool::new(true));
  let transport = MockTransport { inbound: in_rx, outbound: out_tx, open: open.clone() };
  let peer = MockPeer { inbound: in_tx, outbound: out_rx, open };
  (Arc::new(transport), peer)
}

impl Transport for MockTransport {
  fn send_frame(&self, payload: &[u8]) -> Result<(), RithmicError> {
    if !self.open.load(Ordering::SeqCst) {
      return Err(RithmicError::ConnectionClosed("Mock transport closed".to_string()));
    }
    self.outbound
      .send(payload.to_vec())
      .map_err(|_| RithmicError::ConnectionClosed("Mock peer gone".to_string()))
  }

  fn recv_frame(&self, timeout: Duration) -> Result<Option<Vec<u8>>, RithmicError> {
    match self.inbound.recv_timeout(timeout) {
      Ok(payload) => Ok(Some(payload)),
      Err(RecvTimeoutError::Timeout) => Ok(None),
      Err(RecvTimeoutError::Disconnected) => {
        self.open.store(false, Ordering::SeqCst);
        Err(RithmicError::ConnectionClosed("Mock peer gone".to_string()))
      }
    }
  }

  fn is_open(&self) -> bool {
    self.open.load(Ordering::SeqCst)
  }

  fn close(&self) {
    self.open.store(false, Ordering::SeqCst);
  }

  fn peer(&self) -> String {
    "mock".to_string()
  }
}

impl MockPeer {
  /// Deliver a raw payload to the session.
  pub fn push_raw(&self, payload: Vec<u8>) {
    if self.inbound.send(payload).is_err() {
      warn!("Mock transport dropped, frame discarded");
    }
  }

  /// Encode and deliver a record to the session.
  pub fn push(&self, record: &Record) -> Result<(), RithmicError> {
    let payload = encode_record(record)?;
    self.push_raw(payload);
    Ok(())
  }

  /// Next payload the session wrote, decoded. Undecodable payloads are logged and skipped.
  pub fn next_sent(&self, timeout: Duration) -> Option<Record> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
      let remaining = deadline.saturating_duration_since(std::time::Instant::now());
      let payload = self.outbound.recv_timeout(remaining).ok()?;
      match decode_record(&payload) {
        Ok(record) => return Some(record),
        Err(e) => warn!("Session sent an undecodable payload: {}", e),
      }
    }
  }

  /// Next payload the session wrote with the given template, skipping others.
  pub fn next_sent_of(&self, template_id: i32, timeout: Duration) -> Option<Record> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
      let remaining = deadline.saturating_duration_since(std::time::Instant::now());
      let record = self.next_sent(remaining)?;
      if record.template_id == template_id {
        return Some(record);
      }
      debug!("Mock peer skipping sent template {}", record.template_id);
    }
  }

  /// All payloads written so far that have not been consumed.
  pub fn drain_sent(&self) -> Vec<Record> {
    self.outbound.try_iter().filter_map(|p| decode_record(&p).ok()).collect()
  }

  /// Flip what the transport reports from `is_open` without hanging up.
  pub fn set_open(&self, open: bool) {
    self.open.store(open, Ordering::SeqCst);
  }

  /// Answer every request the session sends using `respond`, on a background thread.
  /// The thread ends when the session side goes away.
  pub fn spawn_responder<F>(self, respond: F) -> thread::JoinHandle<()>
  where
    F: Fn(&Record) -> Vec<Record> + Send + 'static,
  {
    thread::spawn(move || {
      while let Ok(payload) = self.outbound.recv() {
        let request = match decode_record(&payload) {
          Ok(r) => r,
          Err(e) => {
            warn!("Mock responder cannot decode request: {}", e);
            continue;
          }
        };
        for reply in respond(&request) {
          if let Err(e) = self.push(&reply) {
            warn!("Mock responder cannot encode reply: {}", e);
          }
        }
      }
    })
  }
}

/// Records the plant would send, for tests.
#[cfg(test)]
pub(crate) mod fixtures {
  use crate::record::Record;
  use crate::template::template;

  fn codes(code: &str) -> Vec<String> {
    vec![code.to_string()]
  }

  pub fn login_response(code: &str) -> Record {
    Record::new(template::LOGIN_RESPONSE)
      .with("template_version", "3.9")
      .with("rp_code", codes(code))
      .with("fcm_id", "FCM")
      .with("ib_id", "IB")
      .with("unique_user_id", "user-1")
      .with("heartbeat_interval", 60.0)
  }

  pub fn logout_response() -> Record {
    Record::new(template::LOGOUT_RESPONSE).with("rp_code", codes("0"))
  }

  pub fn login_info_response() -> Record {
    Record::new(template::LOGIN_INFO_RESPONSE)
      .with("rp_code", codes("0"))
      .with("fcm_id", "FCM")
      .with("ib_id", "IB")
      .with("first_name", "Ada")
      .with("last_name", "L")
      .with("user_type", 3i64)
  }

  pub fn account_row(account_id: &str) -> Record {
    Record::new(template::ACCOUNT_LIST_RESPONSE)
      .with("fcm_id", "FCM")
      .with("ib_id", "IB")
      .with("account_id", account_id)
      .with("account_name", format!("{} name", account_id))
      .with("account_currency", "USD")
  }

  pub fn trade_route_row(exchange: &str, route: &str) -> Record {
    Record::new(template::TRADE_ROUTES_RESPONSE)
      .with("fcm_id", "FCM")
      .with("ib_id", "IB")
      .with("exchange", exchange)
      .with("trade_route", route)
      .with("status", "UP")
      .with("is_default", true)
  }

  /// Terminal marker of a streamed list.
  pub fn list_end(template_id: i32) -> Record {
    Record::new(template_id).with("rp_code", codes("0"))
  }

  pub fn reference_data(symbol: &str, exchange: &str, tick: f64) -> Record {
    Record::new(template::REFERENCE_DATA_RESPONSE)
      .with("rp_code", codes("0"))
      .with("symbol", symbol)
      .with("exchange", exchange)
      .with("symbol_name", "E-mini")
      .with("product_code", "ES")
      .with("instrument_type", "Future")
      .with("currency", "USD")
      .with("single_point_value", 50.0)
      .with("min_qprice_change", tick)
  }

  pub fn rms_info(account_id: &str) -> Record {
    Record::new(template::ACCOUNT_RMS_INFO_RESPONSE)
      .with("rp_code", codes("0"))
      .with("fcm_id", "FCM")
      .with("ib_id", "IB")
      .with("account_id", account_id)
      .with("currency", "USD")
      .with("status", "active")
      .with("loss_limit", 5000.0)
      .with("max_order_quantity", 20i64)
  }

  pub fn simple_ok(template_id: i32) -> Record {
    Record::new(template_id).with("rp_code", codes("0"))
  }
}
