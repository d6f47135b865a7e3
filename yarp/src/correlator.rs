// yarp/src/correlator.rs
// Matches responses to in-flight requests by response template, first come first served.

use crate::base::RithmicError;
use crate::protocol_decoder::decode_record;
use crate::record::Record;
use crate::session::Session;
use crate::template::template;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
  /// Exactly one frame answers the request.
  Single,
  /// Data rows until a frame carrying a response code.
  Stream,
}

struct Waiter {
  id: u64,
  kind: ReplyKind,
  tx: Sender<Result<Record, RithmicError>>,
}

struct PendingState {
  open: bool,
  next_id: u64,
  waiters: HashMap<i32, VecDeque<Waiter>>,
}

/// Pending correlation slots, shared between request callers and the receive loop.
pub struct PendingRequests {
  state: Mutex<PendingState>,
}

impl Default for PendingRequests {
  fn default() -> Self {
    Self::new()
  }
}

impl PendingRequests {
  pub fn new() -> Self {
    PendingRequests {
      state: Mutex::new(PendingState { open: false, next_id: 1, waiters: HashMap::new() }),
    }
  }

  /// Queue a slot for `response_template`. Must happen before the request is written.
  pub fn register(
    &self,
    response_template: i32,
    kind: ReplyKind,
  ) -> Result<(u64, Receiver<Result<Record, RithmicError>>), RithmicError> {
    let mut state = self.state.lock();
    if !state.open {
      return Err(RithmicError::ConnectionClosed("Session is not logged in".to_string()));
    }
    let id = state.next_id;
    state.next_id += 1;
    let (tx, rx) = unbounded();
    state.waiters.entry(response_template).or_default().push_back(Waiter { id, kind, tx });
    debug!("Registered {:?} slot {} for template {}", kind, id, response_template);
    Ok((id, rx))
  }

  /// Drop a slot (timeout or send failure). Returns whether it was still queued.
  pub fn cancel(&self, response_template: i32, id: u64) -> bool {
    let mut state = self.state.lock();
    let Some(queue) = state.waiters.get_mut(&response_template) else {
      return false;
    };
    let before = queue.len();
    queue.retain(|w| w.id != id);
    let removed = queue.len() != before;
    if queue.is_empty() {
      state.waiters.remove(&response_template);
    }
    removed
  }

  /// Offer an inbound frame. Returns false when nobody waits for this template, in
  /// which case the caller routes the frame elsewhere.
  pub fn offer(&self, template_id: i32, payload: &[u8]) -> bool {
    let mut state = self.state.lock();
    let Some(queue) = state.waiters.get_mut(&template_id) else {
      return false;
    };
    let Some(front) = queue.front() else {
      return false;
    };

    let decoded = decode_record(payload);
    let finished = match (&decoded, front.kind) {
      (_, ReplyKind::Single) => true,
      (Ok(record), ReplyKind::Stream) => !record.rp_code().is_empty(),
      // A row that cannot be decoded ends the stream with the error.
      (Err(_), ReplyKind::Stream) => true,
    };

    if front.tx.send(decoded).is_err() {
      debug!("Waiter for template {} went away", template_id);
    }
    if finished {
      queue.pop_front();
      if queue.is_empty() {
        state.waiters.remove(&template_id);
      }
    }
    true
  }

  /// Fail every queued slot and refuse new ones until `reopen`.
  pub fn fail_all(&self, error: RithmicError) {
    let mut state = self.state.lock();
    state.open = false;
    let count: usize = state.waiters.values().map(|q| q.len()).sum();
    if count > 0 {
      warn!("Failing {} pending request(s): {}", count, error);
    }
    for (_, queue) in state.waiters.drain() {
      for waiter in queue {
        let _ = waiter.tx.send(Err(error.clone()));
      }
    }
  }

  pub fn reopen(&self) {
    self.state.lock().open = true;
  }

  pub fn pending_count(&self) -> usize {
    self.state.lock().waiters.values().map(|q| q.len()).sum()
  }
}

/// Request/response helper over a logged-in session.
pub struct Correlator<'a> {
  session: &'a Session,
}

impl<'a> Correlator<'a> {
  pub fn new(session: &'a Session) -> Self {
    Correlator { session }
  }

  /// Send `request` and wait for its single response.
  pub fn request_single(&self, request: &Record, timeout: Duration) -> Result<Record, RithmicError> {
    let response_template = template::response_for(request.template_id);
    let pending = self.session.pending();
    let (id, rx) = pending.register(response_template, ReplyKind::Single)?;
    if let Err(e) = self.session.send(request) {
      pending.cancel(response_template, id);
      return Err(e);
    }

    match rx.recv_timeout(timeout) {
      Ok(result) => result,
      Err(RecvTimeoutError::Timeout) => {
        if pending.cancel(response_template, id) {
          return Err(RithmicError::Timeout(format!(
            "No response {} to request {} within {:?}", response_template, request.template_id, timeout
          )));
        }
        // Answered between the timeout and the cancel.
        rx.try_recv().unwrap_or_else(|_| Err(RithmicError::Timeout(format!("Request {}", request.template_id))))
      }
      Err(RecvTimeoutError::Disconnected) => {
        Err(RithmicError::ConnectionClosed("Pending request dropped".to_string()))
      }
    }
  }

  /// Send `request` and collect the streamed rows. The terminal frame carrying the
  /// response code is not part of the result.
  pub fn request_list(&self, request: &Record, timeout: Duration) -> Result<Vec<Record>, RithmicError> {
    let response_template = template::response_for(request.template_id);
    let pending = self.session.pending();
    let (id, rx) = pending.register(response_template, ReplyKind::Stream)?;
    if let Err(e) = self.session.send(request) {
      pending.cancel(response_template, id);
      return Err(e);
    }

    let deadline = Instant::now() + timeout;
    let mut rows = Vec::new();
    loop {
      let remaining = deadline.saturating_duration_since(Instant::now());
      match rx.recv_timeout(remaining) {
        Ok(Ok(record)) => {
          if record.rp_code().is_empty() {
            rows.push(record);
            continue;
          }
          if !record.rp_code_ok() {
            warn!(
              "List request {} ended with rp_code {}",
              request.template_id, record.rp_code_text()
            );
          }
          debug!("List request {} returned {} row(s)", request.template_id, rows.len());
          return Ok(rows);
        }
        Ok(Err(e)) => return Err(e),
        Err(RecvTimeoutError::Timeout) => {
          pending.cancel(response_template, id);
          return Err(RithmicError::Timeout(format!(
            "List {} incomplete after {:?} ({} row(s) received)", response_template, timeout, rows.len()
          )));
        }
        Err(RecvTimeoutError::Disconnected) => {
          return Err(RithmicError::ConnectionClosed("Pending request dropped".to_string()));
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::conn_mock::{fixtures, mock_pair};
  use crate::protocol_encoder::encode_record;
  use crate::session::SessionConfig;
  use std::sync::Arc;

  fn encoded(record: &Record) -> Vec<u8> {
    encode_record(record).unwrap()
  }

  #[test]
  fn single_slots_are_fifo() {
    let pending = PendingRequests::new();
    pending.reopen();
    let (_, first) = pending.register(301, ReplyKind::Single).unwrap();
    let (_, second) = pending.register(301, ReplyKind::Single).unwrap();

    let mut a = fixtures::login_info_response();
    a.set("first_name", "first");
    let mut b = fixtures::login_info_response();
    b.set("first_name", "second");
    assert!(pending.offer(301, &encoded(&a)));
    assert!(pending.offer(301, &encoded(&b)));
    assert!(!pending.offer(301, &encoded(&b)));

    assert_eq!(first.try_recv().unwrap().unwrap().get_str("first_name"), Some("first"));
    assert_eq!(second.try_recv().unwrap().unwrap().get_str("first_name"), Some("second"));
  }

  #[test]
  fn stream_slot_stays_until_terminal_frame() {
    let pending = PendingRequests::new();
    pending.reopen();
    let (_, rx) = pending.register(303, ReplyKind::Stream).unwrap();
    assert!(pending.offer(303, &encoded(&fixtures::account_row("A1"))));
    assert_eq!(pending.pending_count(), 1);
    assert!(pending.offer(303, &encoded(&fixtures::list_end(303))));
    assert_eq!(pending.pending_count(), 0);
    assert_eq!(rx.try_iter().count(), 2);
  }

  #[test]
  fn fail_all_closes_until_reopened() {
    let pending = PendingRequests::new();
    assert!(matches!(pending.register(11, ReplyKind::Single), Err(RithmicError::ConnectionClosed(_))));
    pending.reopen();
    let (_, rx) = pending.register(11, ReplyKind::Single).unwrap();
    pending.fail_all(RithmicError::ConnectionClosed("gone".to_string()));
    assert!(matches!(rx.try_recv().unwrap(), Err(RithmicError::ConnectionClosed(_))));
    assert!(pending.register(11, ReplyKind::Single).is_err());
  }

  #[test]
  fn cancel_removes_only_that_slot() {
    let pending = PendingRequests::new();
    pending.reopen();
    let (a, _rx_a) = pending.register(305, ReplyKind::Single).unwrap();
    let (_b, rx_b) = pending.register(305, ReplyKind::Single).unwrap();
    assert!(pending.cancel(305, a));
    assert!(!pending.cancel(305, a));
    assert!(pending.offer(305, &encoded(&fixtures::rms_info("A1"))));
    assert!(rx_b.try_recv().unwrap().is_ok());
  }

  fn logged_in_session() -> (Session, crate::conn_mock::MockPeer) {
    let (transport, peer) = mock_pair();
    peer.push(&fixtures::login_response("0")).unwrap();
    let session = Session::new(SessionConfig { logout_timeout_ms: 100, ..SessionConfig::default() });
    session.connect(transport).unwrap();
    // Consume the login request.
    assert!(peer.next_sent_of(template::LOGIN_REQUEST, Duration::from_secs(1)).is_some());
    (session, peer)
  }

  #[test]
  fn list_request_excludes_terminal_frame() {
    let (session, peer) = logged_in_session();
    let peer = Arc::new(peer);
    let responder = {
      let peer = peer.clone();
      std::thread::spawn(move || {
        let request = peer.next_sent_of(template::ACCOUNT_LIST_REQUEST, Duration::from_secs(2)).unwrap();
        assert_eq!(request.get_str("fcm_id"), Some("FCM"));
        for id in ["A1", "A2", "A3"] {
          peer.push(&fixtures::account_row(id)).unwrap();
        }
        peer.push(&fixtures::list_end(template::ACCOUNT_LIST_RESPONSE)).unwrap();
      })
    };

    let request = Record::new(template::ACCOUNT_LIST_REQUEST)
      .with("fcm_id", "FCM")
      .with("ib_id", "IB")
      .with("user_type", 3i64);
    let rows = Correlator::new(&session).request_list(&request, Duration::from_secs(2)).unwrap();
    responder.join().unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r.get_str("account_id").unwrap_or_default().to_string()).collect();
    assert_eq!(ids, vec!["A1", "A2", "A3"]);
  }

  #[test]
  fn empty_list_is_ok() {
    let (session, peer) = logged_in_session();
    let peer = Arc::new(peer);
    let responder = {
      let peer = peer.clone();
      std::thread::spawn(move || {
        peer.next_sent_of(template::TRADE_ROUTES_REQUEST, Duration::from_secs(2)).unwrap();
        peer.push(&fixtures::list_end(template::TRADE_ROUTES_RESPONSE)).unwrap();
      })
    };
    let request = Record::new(template::TRADE_ROUTES_REQUEST).with("subscribe_for_updates", false);
    let rows = Correlator::new(&session).request_list(&request, Duration::from_secs(2)).unwrap();
    responder.join().unwrap();
    assert!(rows.is_empty());
  }

  #[test]
  fn single_request_times_out_and_clears_slot() {
    let (session, _peer) = logged_in_session();
    let request = Record::new(template::LOGIN_INFO_REQUEST);
    let result = Correlator::new(&session).request_single(&request, Duration::from_millis(50));
    assert!(matches!(result, Err(RithmicError::Timeout(_))));
    assert_eq!(session.pending().pending_count(), 0);
  }
}
