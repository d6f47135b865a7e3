// yarp/src/session.rs
// Connection lifecycle against one plant: login, the receive loop, heartbeats, logout.

use crate::base::RithmicError;
use crate::conn::Transport;
use crate::conn_log::{ConnectionLogger, LogDirection};
use crate::correlator::PendingRequests;
use crate::dispatcher::Dispatcher;
use crate::order_builder;
use crate::protocol::InfraType;
use crate::protocol_decoder::{decode_record, peek_template_id};
use crate::protocol_encoder::encode_record;
use crate::record::Record;
use crate::template::template;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Login identity and timing knobs for a session.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
  pub user: String,
  pub password: String,
  pub app_name: String,
  pub app_version: String,
  pub system_name: String,
  pub template_version: String,
  pub infra_type: InfraType,
  /// Send a heartbeat after this long without inbound traffic.
  pub heartbeat_idle_ms: u64,
  pub request_timeout_ms: u64,
  pub logout_timeout_ms: u64,
  pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
  fn default() -> Self {
    SessionConfig {
      user: String::new(),
      password: String::new(),
      app_name: "yarp".to_string(),
      app_version: env!("CARGO_PKG_VERSION").to_string(),
      system_name: "Rithmic Test".to_string(),
      template_version: "3.9".to_string(),
      infra_type: InfraType::OrderPlant,
      heartbeat_idle_ms: 5_000,
      request_timeout_ms: 10_000,
      logout_timeout_ms: 5_000,
      connect_timeout_ms: 10_000,
    }
  }
}

impl fmt::Debug for SessionConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SessionConfig")
      .field("user", &self.user)
      .field("password", &"***")
      .field("app_name", &self.app_name)
      .field("app_version", &self.app_version)
      .field("system_name", &self.system_name)
      .field("template_version", &self.template_version)
      .field("infra_type", &self.infra_type)
      .field("heartbeat_idle_ms", &self.heartbeat_idle_ms)
      .field("request_timeout_ms", &self.request_timeout_ms)
      .field("logout_timeout_ms", &self.logout_timeout_ms)
      .field("connect_timeout_ms", &self.connect_timeout_ms)
      .finish()
  }
}

impl SessionConfig {
  pub fn heartbeat_idle(&self) -> Duration {
    Duration::from_millis(self.heartbeat_idle_ms)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }

  pub fn logout_timeout(&self) -> Duration {
    Duration::from_millis(self.logout_timeout_ms)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Disconnected,
  Connecting,
  LoggedIn,
  Closing,
}

/// What the login response told us about this session.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginInfo {
  pub fcm_id: Option<String>,
  pub ib_id: Option<String>,
  pub unique_user_id: Option<String>,
  pub heartbeat_interval: Option<f64>,
  pub logged_in_at: DateTime<Utc>,
}

/// State shared with the receive loop thread.
struct Shared {
  state: RwLock<SessionState>,
  transport: RwLock<Option<Arc<dyn Transport>>>,
  pending: PendingRequests,
  dispatcher: RwLock<Option<Arc<Dispatcher>>>,
  logger: RwLock<Option<ConnectionLogger>>,
}

impl Shared {
  fn set_state(&self, state: SessionState) {
    let mut guard = self.state.write();
    if *guard != state {
      debug!("Session state {:?} -> {:?}", *guard, state);
      *guard = state;
    }
  }

  fn log_frame(&self, direction: LogDirection, payload: &[u8]) {
    if let Some(logger) = self.logger.read().as_ref() {
      logger.log_frame(direction, payload);
    }
  }

  fn write(&self, transport: &dyn Transport, record: &Record) -> Result<(), RithmicError> {
    let payload = encode_record(record)?;
    self.log_frame(LogDirection::Send, &payload);
    trace!("Sending {}", record);
    transport.send_frame(&payload)
  }

  fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
    self.dispatcher.read().clone()
  }
}

struct ReaderHandle {
  thread: JoinHandle<()>,
  logout_ack: Receiver<()>,
}

/// A session with one order plant.
///
/// `connect` performs the login handshake on the caller's thread, then hands the
/// transport to a single receive loop thread, the only reader of the connection.
pub struct Session {
  config: SessionConfig,
  shared: Arc<Shared>,
  reader: Mutex<Option<ReaderHandle>>,
  // Serializes connect/disconnect/reconnect.
  lifecycle: Mutex<()>,
  login: RwLock<Option<LoginInfo>>,
}

impl Session {
  pub fn new(config: SessionConfig) -> Self {
    Session {
      config,
      shared: Arc::new(Shared {
        state: RwLock::new(SessionState::Disconnected),
        transport: RwLock::new(None),
        pending: PendingRequests::new(),
        dispatcher: RwLock::new(None),
        logger: RwLock::new(None),
      }),
      reader: Mutex::new(None),
      lifecycle: Mutex::new(()),
      login: RwLock::new(None),
    }
  }

  pub fn config(&self) -> &SessionConfig {
    &self.config
  }

  pub fn state(&self) -> SessionState {
    *self.shared.state.read()
  }

  pub fn is_logged_in(&self) -> bool {
    self.state() == SessionState::LoggedIn
  }

  pub fn login_info(&self) -> Option<LoginInfo> {
    self.login.read().clone()
  }

  pub(crate) fn pending(&self) -> &PendingRequests {
    &self.shared.pending
  }

  /// Frames nobody is waiting for go here. Without a dispatcher they are dropped.
  pub fn set_dispatcher(&self, dispatcher: Arc<Dispatcher>) {
    *self.shared.dispatcher.write() = Some(dispatcher);
  }

  pub fn clear_dispatcher(&self) {
    self.shared.dispatcher.write().take();
  }

  /// Capture every frame of subsequent traffic.
  pub fn set_logger(&self, logger: Option<ConnectionLogger>) {
    *self.shared.logger.write() = logger;
  }

  /// Log in over `transport` and start the receive loop.
  pub fn connect(&self, transport: Arc<dyn Transport>) -> Result<LoginInfo, RithmicError> {
    let _lifecycle = self.lifecycle.lock();
    self.connect_locked(transport)
  }

  fn connect_locked(&self, transport: Arc<dyn Transport>) -> Result<LoginInfo, RithmicError> {
    {
      let mut state = self.shared.state.write();
      if *state != SessionState::Disconnected {
        return Err(RithmicError::AlreadyConnected);
      }
      *state = SessionState::Connecting;
    }
    // A loop that ended on its own still has to be reaped.
    self.join_reader();

    info!("Logging in as '{}' to {}", self.config.user, transport.peer());
    let login = match self.login(transport.as_ref()) {
      Ok(login) => login,
      Err(e) => {
        error!("Login failed: {}", e);
        transport.close();
        self.shared.set_state(SessionState::Disconnected);
        return Err(e);
      }
    };

    *self.shared.transport.write() = Some(transport.clone());
    *self.login.write() = Some(login.clone());
    self.shared.pending.reopen();
    self.shared.set_state(SessionState::LoggedIn);

    let (ack_tx, ack_rx) = bounded(1);
    let shared = self.shared.clone();
    let idle = self.config.heartbeat_idle();
    let spawned = thread::Builder::new()
      .name("rithmic-recv".to_string())
      .spawn(move || receive_loop(shared, transport, idle, ack_tx));
    match spawned {
      Ok(thread) => {
        *self.reader.lock() = Some(ReaderHandle { thread, logout_ack: ack_rx });
      }
      Err(e) => {
        self.teardown(&RithmicError::InternalError(format!("Failed to spawn receive loop: {}", e)));
        return Err(RithmicError::InternalError(format!("Failed to spawn receive loop: {}", e)));
      }
    }
    info!("Logged in (fcm={:?}, ib={:?})", login.fcm_id, login.ib_id);
    Ok(login)
  }

  /// Send the login request and read frames on this thread until its response arrives.
  fn login(&self, transport: &dyn Transport) -> Result<LoginInfo, RithmicError> {
    let request = order_builder::login(&self.config);
    self.shared.write(transport, &request)?;

    let response = self.read_response(transport, template::LOGIN_RESPONSE)?;
    if !response.rp_code_ok() {
      let code = response.rp_code_text();
      return Err(RithmicError::AuthenticationFailure(if code.is_empty() {
        "missing response code".to_string()
      } else {
        code
      }));
    }
    Ok(LoginInfo {
      fcm_id: response.get_str("fcm_id").map(str::to_string),
      ib_id: response.get_str("ib_id").map(str::to_string),
      unique_user_id: response.get_str("unique_user_id").map(str::to_string),
      heartbeat_interval: response.get_float("heartbeat_interval").filter(|v| *v > 0.0),
      logged_in_at: Utc::now(),
    })
  }

  /// Read frames on the calling thread until `response_id` arrives. Only used while no
  /// receive loop owns the transport.
  fn read_response(&self, transport: &dyn Transport, response_id: i32) -> Result<Record, RithmicError> {
    let deadline = Instant::now() + self.config.request_timeout();
    loop {
      let remaining = deadline.saturating_duration_since(Instant::now());
      if remaining.is_zero() {
        return Err(RithmicError::Timeout(format!(
          "No {} response",
          template::name(response_id).unwrap_or("unknown")
        )));
      }
      let Some(payload) = transport.recv_frame(remaining)? else {
        continue;
      };
      self.shared.log_frame(LogDirection::Recv, &payload);
      match peek_template_id(&payload) {
        Ok(id) if id == response_id => return decode_record(&payload),
        Ok(other) => debug!("Ignoring template {} while waiting for {}", other, response_id),
        Err(e) => warn!("Ignoring unreadable frame while waiting for {}: {}", response_id, e),
      }
    }
  }

  /// Ask a gateway which systems it serves, for picking `system_name`. Takes a fresh
  /// transport, which is closed afterwards; the session must not be connected.
  pub fn list_systems(&self, transport: &dyn Transport) -> Result<Vec<String>, RithmicError> {
    let _lifecycle = self.lifecycle.lock();
    if self.state() != SessionState::Disconnected {
      return Err(RithmicError::AlreadyConnected);
    }
    let result = self
      .shared
      .write(transport, &order_builder::system_info())
      .and_then(|_| self.read_response(transport, template::SYSTEM_INFO_RESPONSE));
    transport.close();

    let response = result?;
    if !response.rp_code_ok() {
      return Err(RithmicError::RequestRejected { template_id: response.template_id, code: response.rp_code_text() });
    }
    let systems = response.get_str_list("system_name").to_vec();
    info!("{} serves {:?}", transport.peer(), systems);
    Ok(systems)
  }

  /// Encode and write a record. Only the logout request may be written while closing.
  pub fn send(&self, record: &Record) -> Result<(), RithmicError> {
    match self.state() {
      SessionState::LoggedIn => {}
      SessionState::Closing if record.template_id == template::LOGOUT_REQUEST => {}
      _ => return Err(RithmicError::NotConnected),
    }
    let transport = self.shared.transport.read().clone().ok_or(RithmicError::NotConnected)?;
    self.shared.write(transport.as_ref(), record)
  }

  /// Log out, close the transport and stop the receive loop. A no-op when already
  /// disconnected.
  pub fn disconnect(&self) -> Result<(), RithmicError> {
    let _lifecycle = self.lifecycle.lock();
    self.disconnect_locked()
  }

  fn disconnect_locked(&self) -> Result<(), RithmicError> {
    {
      let mut state = self.shared.state.write();
      if *state != SessionState::LoggedIn {
        drop(state);
        self.join_reader();
        return Ok(());
      }
      *state = SessionState::Closing;
    }

    info!("Logging out");
    let ack = self.reader.lock().as_ref().map(|r| r.logout_ack.clone());
    match self.send(&order_builder::logout()) {
      Ok(()) => {
        if let Some(ack) = ack {
          match ack.recv_timeout(self.config.logout_timeout()) {
            Ok(()) => debug!("Logout acknowledged"),
            Err(RecvTimeoutError::Timeout) => warn!("No logout acknowledgement within {:?}", self.config.logout_timeout()),
            Err(RecvTimeoutError::Disconnected) => debug!("Receive loop ended before the logout acknowledgement"),
          }
        }
      }
      Err(e) => warn!("Failed to send logout: {}", e),
    }

    self.teardown(&RithmicError::ConnectionClosed("Session disconnected".to_string()));
    self.join_reader();
    info!("Disconnected");
    Ok(())
  }

  /// Drop the current connection (if any), failing in-flight requests, and log in again
  /// over `transport`.
  pub fn reconnect(&self, transport: Arc<dyn Transport>) -> Result<LoginInfo, RithmicError> {
    let _lifecycle = self.lifecycle.lock();
    self.disconnect_locked()?;
    self.connect_locked(transport)
  }

  fn teardown(&self, reason: &RithmicError) {
    if let Some(transport) = self.shared.transport.write().take() {
      transport.close();
    }
    self.shared.set_state(SessionState::Disconnected);
    self.shared.pending.fail_all(reason.clone());
  }

  fn join_reader(&self) {
    let handle = self.reader.lock().take();
    if let Some(handle) = handle {
      if handle.thread.join().is_err() {
        error!("Receive loop thread panicked");
      }
    }
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    if let Err(e) = self.disconnect() {
      warn!("Error while dropping session: {}", e);
    }
  }
}

fn heartbeat(shared: &Shared, transport: &dyn Transport) -> Result<(), RithmicError> {
  shared.write(transport, &order_builder::heartbeat(Utc::now()))
}

/// The single reader of a logged-in connection.
fn receive_loop(shared: Arc<Shared>, transport: Arc<dyn Transport>, idle: Duration, logout_ack: Sender<()>) {
  debug!("Receive loop started for {}", transport.peer());
  let outcome: Result<(), RithmicError> = loop {
    let payload = match transport.recv_frame(idle) {
      Ok(Some(payload)) => payload,
      Ok(None) => {
        if !transport.is_open() {
          break Err(RithmicError::ConnectionClosed("Transport reported closed while idle".to_string()));
        }
        trace!("Idle for {:?}, sending heartbeat", idle);
        if let Err(e) = heartbeat(&shared, transport.as_ref()) {
          break Err(e);
        }
        continue;
      }
      Err(e) => break Err(e),
    };

    shared.log_frame(LogDirection::Recv, &payload);
    let template_id = match peek_template_id(&payload) {
      Ok(id) => id,
      Err(e) => {
        warn!("Unreadable frame: {}", e);
        if let Some(dispatcher) = shared.dispatcher() {
          dispatcher.report_error(&e);
        }
        continue;
      }
    };

    match template_id {
      template::HEARTBEAT_RESPONSE => trace!("Heartbeat acknowledged"),
      template::LOGOUT_RESPONSE => {
        let _ = logout_ack.try_send(());
        break Ok(());
      }
      _ => {
        if shared.pending.offer(template_id, &payload) {
          continue;
        }
        match shared.dispatcher() {
          // Decode failures were already reported; they never end the loop.
          Some(dispatcher) => {
            let _ = dispatcher.dispatch(&payload);
          }
          None => debug!("No dispatcher, dropping template {}", template_id),
        }
      }
    }
  };

  transport.close();
  {
    let mut current = shared.transport.write();
    if current.as_ref().map(|t| Arc::ptr_eq(t, &transport)).unwrap_or(false) {
      *current = None;
    }
  }
  shared.set_state(SessionState::Disconnected);

  let reason = match outcome {
    Ok(()) => {
      info!("Receive loop ended by logout");
      RithmicError::ConnectionClosed("Logged out".to_string())
    }
    Err(e) => {
      error!("Receive loop failed: {}", e);
      if let Some(dispatcher) = shared.dispatcher() {
        dispatcher.report_error(&e);
      }
      match e {
        RithmicError::ConnectionClosed(_) => e,
        other => RithmicError::ConnectionClosed(other.to_string()),
      }
    }
  };
  shared.pending.fail_all(reason.clone());
  if let Some(dispatcher) = shared.dispatcher() {
    dispatcher.connection_closed(&reason);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::conn_mock::{fixtures, mock_pair};
  use crate::handler::{ErrorObserver, MockOrderHandler};

  fn test_config() -> SessionConfig {
    SessionConfig {
      user: "trader".to_string(),
      password: "secret".to_string(),
      heartbeat_idle_ms: 50,
      request_timeout_ms: 1_000,
      logout_timeout_ms: 200,
      ..SessionConfig::default()
    }
  }

  struct CollectErrors(Arc<Mutex<Vec<RithmicError>>>);

  impl ErrorObserver for CollectErrors {
    fn on_error(&self, error: &RithmicError) {
      self.0.lock().push(error.clone());
    }
  }

  fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
      if cond() {
        return true;
      }
      thread::sleep(Duration::from_millis(5));
    }
    cond()
  }

  #[test]
  fn login_sends_credentials_and_reaches_logged_in() {
    let (transport, peer) = mock_pair();
    peer.push(&fixtures::login_response("0")).unwrap();
    let session = Session::new(test_config());
    let info = session.connect(transport).unwrap();
    assert_eq!(info.fcm_id.as_deref(), Some("FCM"));
    assert_eq!(info.heartbeat_interval, Some(60.0));
    assert_eq!(session.state(), SessionState::LoggedIn);

    let login = peer.next_sent_of(template::LOGIN_REQUEST, Duration::from_secs(1)).unwrap();
    assert_eq!(login.get_str("user"), Some("trader"));
    assert_eq!(login.get_str("password"), Some("secret"));
    assert_eq!(login.get_int("infra_type"), Some(2));
    assert!(matches!(session.connect(mock_pair().0), Err(RithmicError::AlreadyConnected)));
  }

  #[test]
  fn rejected_login_is_authentication_failure() {
    let (transport, peer) = mock_pair();
    peer.push(&fixtures::login_response("7")).unwrap();
    let session = Session::new(test_config());
    match session.connect(transport.clone()) {
      Err(RithmicError::AuthenticationFailure(code)) => assert!(code.contains('7')),
      other => panic!("unexpected {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!transport.is_open());
  }

  #[test]
  fn login_without_response_code_fails() {
    let (transport, peer) = mock_pair();
    peer.push(&Record::new(template::LOGIN_RESPONSE)).unwrap();
    let session = Session::new(test_config());
    assert!(matches!(session.connect(transport), Err(RithmicError::AuthenticationFailure(_))));
  }

  #[test]
  fn idle_open_transport_sends_one_heartbeat_per_window() {
    let (transport, peer) = mock_pair();
    peer.push(&fixtures::login_response("0")).unwrap();
    let session = Session::new(SessionConfig { heartbeat_idle_ms: 150, ..test_config() });
    session.connect(transport).unwrap();
    peer.next_sent_of(template::LOGIN_REQUEST, Duration::from_secs(1)).unwrap();

    // Nothing during the first part of the window.
    assert!(peer.next_sent(Duration::from_millis(60)).is_none());
    let hb = peer.next_sent(Duration::from_millis(500)).unwrap();
    assert_eq!(hb.template_id, template::HEARTBEAT_REQUEST);
    assert!(hb.get_int("ssboe").unwrap_or(0) > 0);
    // Exactly one per window.
    assert!(peer.next_sent(Duration::from_millis(60)).is_none());
  }

  #[test]
  fn idle_closed_transport_ends_loop_with_connection_closed() {
    let (transport, peer) = mock_pair();
    peer.push(&fixtures::login_response("0")).unwrap();
    let session = Session::new(test_config());
    let mut mock = MockOrderHandler::new();
    mock.expect_connection_closed()
      .withf(|e: &RithmicError| matches!(e, RithmicError::ConnectionClosed(_)))
      .times(1)
      .return_const(());
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(mock)));
    let errors = Arc::new(Mutex::new(Vec::new()));
    dispatcher.add_error_observer(CollectErrors(errors.clone()));
    session.set_dispatcher(dispatcher);
    session.connect(transport).unwrap();

    peer.set_open(false);
    assert!(wait_for(|| session.state() == SessionState::Disconnected));
    assert!(wait_for(|| !errors.lock().is_empty()));
    assert!(matches!(errors.lock()[0], RithmicError::ConnectionClosed(_)));
    assert!(matches!(session.send(&order_builder::logout()), Err(RithmicError::NotConnected)));
  }

  #[test]
  fn heartbeat_ack_is_dropped_and_other_frames_dispatched() {
    let (transport, peer) = mock_pair();
    peer.push(&fixtures::login_response("0")).unwrap();
    let session = Session::new(SessionConfig { heartbeat_idle_ms: 5_000, ..test_config() });
    let mut mock = MockOrderHandler::new();
    mock.expect_on_trade_route().times(1).return_const(());
    mock.expect_connection_closed().return_const(());
    session.set_dispatcher(Arc::new(Dispatcher::new(Arc::new(mock))));
    session.connect(transport).unwrap();

    peer.push(&Record::new(template::HEARTBEAT_RESPONSE)).unwrap();
    peer.push(&Record::new(template::TRADE_ROUTE).with("exchange", "CME").with("trade_route", "globex")).unwrap();
    thread::sleep(Duration::from_millis(100));
    drop(peer);
    assert!(wait_for(|| session.state() == SessionState::Disconnected));
  }

  #[test]
  fn undecodable_frame_is_reported_and_loop_keeps_running() {
    let (transport, peer) = mock_pair();
    peer.push(&fixtures::login_response("0")).unwrap();
    let session = Session::new(SessionConfig { heartbeat_idle_ms: 5_000, ..test_config() });
    let (tx, rx) = bounded(1);
    let mut mock = MockOrderHandler::new();
    mock.expect_on_order_notification()
      .withf(|r: &Record| r.get_str("basket_id") == Some("B1"))
      .times(1)
      .returning(move |_| {
        let _ = tx.try_send(());
      });
    mock.expect_connection_closed().return_const(());
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(mock)));
    let errors = Arc::new(Mutex::new(Vec::new()));
    dispatcher.add_error_observer(CollectErrors(errors.clone()));
    session.set_dispatcher(dispatcher);
    session.connect(transport).unwrap();

    // Cut short: the notification table has many more fields.
    peer.push_raw(b"351\x00o1\x00".to_vec());
    peer
      .push(&Record::new(template::RITHMIC_ORDER_NOTIFICATION).with("user_tag", "o1").with("status", "open").with("basket_id", "B1"))
      .unwrap();

    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(matches!(errors.lock()[0], RithmicError::MessageDecodeError { template_id: 351, .. }));
    assert_eq!(session.state(), SessionState::LoggedIn);
    drop(peer);
    assert!(wait_for(|| session.state() == SessionState::Disconnected));
  }

  #[test]
  fn list_systems_before_login() {
    let (transport, peer) = mock_pair();
    peer.push(&fixtures::simple_ok(template::HEARTBEAT_RESPONSE)).unwrap();
    peer
      .push(
        &Record::new(template::SYSTEM_INFO_RESPONSE)
          .with("rp_code", vec!["0".to_string()])
          .with("system_name", vec!["Rithmic Test".to_string(), "Rithmic Paper Trading".to_string()]),
      )
      .unwrap();
    let session = Session::new(test_config());
    let systems = session.list_systems(transport.as_ref()).unwrap();
    assert_eq!(systems, vec!["Rithmic Test", "Rithmic Paper Trading"]);
    assert_eq!(peer.next_sent(Duration::from_secs(1)).unwrap().template_id, template::SYSTEM_INFO_REQUEST);
    assert!(!transport.is_open());
    assert_eq!(session.state(), SessionState::Disconnected);

    let (transport, _peer) = mock_pair();
    let session = Session::new(SessionConfig { request_timeout_ms: 50, ..test_config() });
    assert!(matches!(session.list_systems(transport.as_ref()), Err(RithmicError::Timeout(_))));
  }

  #[test]
  fn logout_waits_for_ack_and_joins() {
    let (transport, peer) = mock_pair();
    peer.push(&fixtures::login_response("0")).unwrap();
    let session = Session::new(SessionConfig { logout_timeout_ms: 2_000, ..test_config() });
    session.connect(transport.clone()).unwrap();

    let responder = peer.spawn_responder(|request| match request.template_id {
      template::LOGOUT_REQUEST => vec![fixtures::logout_response()],
      _ => Vec::new(),
    });
    let started = Instant::now();
    session.disconnect().unwrap();
    assert!(started.elapsed() < Duration::from_millis(1_500));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!transport.is_open());
    // The responder stops once every handle to the session side is gone.
    drop(session);
    drop(transport);
    responder.join().unwrap();
  }

  #[test]
  fn reconnect_fails_in_flight_requests_and_logs_in_again() {
    let (first, peer1) = mock_pair();
    peer1.push(&fixtures::login_response("0")).unwrap();
    let session = Session::new(test_config());
    session.connect(first).unwrap();

    let (_, rx) = session.pending().register(template::LOGIN_INFO_RESPONSE, crate::correlator::ReplyKind::Single).unwrap();

    let (second, peer2) = mock_pair();
    peer2.push(&fixtures::login_response("0")).unwrap();
    session.reconnect(second).unwrap();
    assert!(matches!(rx.try_recv().unwrap(), Err(RithmicError::ConnectionClosed(_))));
    assert_eq!(session.state(), SessionState::LoggedIn);
    assert!(peer2.next_sent_of(template::LOGIN_REQUEST, Duration::from_secs(1)).is_some());
  }

  #[test]
  fn config_debug_masks_password() {
    let text = format!("{:?}", test_config());
    assert!(!text.contains("secret"));
    let parsed: SessionConfig = serde_json::from_str(r#"{"user": "u", "heartbeat_idle_ms": 1000}"#).unwrap();
    assert_eq!(parsed.heartbeat_idle(), Duration::from_secs(1));
    assert_eq!(parsed.request_timeout(), Duration::from_secs(10));
  }
}
