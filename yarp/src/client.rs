// yarp/src/client.rs

use crate::base::RithmicError;
use crate::conn::{SocketTransport, Transport};
use crate::conn_log::ConnectionLogger;
use crate::correlator::Correlator;
use crate::dispatcher::Dispatcher;
use crate::handler::ErrorObserver;
use crate::order_builder;
use crate::order_manager::OrderManager;
use crate::record::Record;
use crate::reference::ReferenceData;
use crate::session::{LoginInfo, Session, SessionConfig};
use log::{debug, info, warn};
use std::sync::Arc;

/// An order plant connection with its order book and reference data wired together.
pub struct RithmicClient {
  session: Arc<Session>,
  reference: Arc<ReferenceData>,
  order_mgr: Arc<OrderManager>,
  dispatcher: Arc<Dispatcher>,
  log_config: Option<(String, String)>,
}

impl RithmicClient {
  /// `log_config` is `(db_path, session_name)`; when set, every frame is captured.
  pub fn new(config: SessionConfig, log_config: Option<(String, String)>) -> Self {
    Self::with_reference(config, Arc::new(ReferenceData::new()), log_config)
  }

  /// Use a pre-populated (or shared) reference data registry.
  pub fn with_reference(
    config: SessionConfig,
    reference: Arc<ReferenceData>,
    log_config: Option<(String, String)>,
  ) -> Self {
    let session = Arc::new(Session::new(config));
    let order_mgr = OrderManager::new(session.clone(), reference.clone());
    let dispatcher = Arc::new(Dispatcher::new(order_mgr.clone()));
    session.set_dispatcher(dispatcher.clone());
    RithmicClient { session, reference, order_mgr, dispatcher, log_config }
  }

  pub fn session(&self) -> Arc<Session> {
    self.session.clone()
  }

  pub fn orders(&self) -> Arc<OrderManager> {
    self.order_mgr.clone()
  }

  pub fn reference(&self) -> Arc<ReferenceData> {
    self.reference.clone()
  }

  /// Connect over TCP to `addr` (host:port) and run [`connect_with`](Self::connect_with).
  pub fn connect(&self, addr: &str) -> Result<LoginInfo, RithmicError> {
    let transport = SocketTransport::connect(addr, self.session.config().connect_timeout())?;
    self.connect_with(Arc::new(transport))
  }

  /// Log in, load the trading config if not yet known, fetch risk limits and subscribe
  /// to order and bracket updates for the primary account.
  pub fn connect_with(&self, transport: Arc<dyn Transport>) -> Result<LoginInfo, RithmicError> {
    self.install_logger(transport.as_ref())?;
    let login = self.session.connect(transport)?;
    if let Err(e) = self.after_login() {
      warn!("Post-login setup failed: {}", e);
      if let Err(close_err) = self.session.disconnect() {
        warn!("Error while disconnecting: {}", close_err);
      }
      return Err(e);
    }
    Ok(login)
  }

  /// Ask the gateway at `addr` which systems it serves. Uses its own short-lived
  /// connection, so it works whether or not this client is logged in.
  pub fn list_systems(&self, addr: &str) -> Result<Vec<String>, RithmicError> {
    let config = self.session.config().clone();
    let transport = SocketTransport::connect(addr, config.connect_timeout())?;
    Session::new(config).list_systems(&transport)
  }

  pub fn reconnect(&self, addr: &str) -> Result<LoginInfo, RithmicError> {
    let transport = SocketTransport::connect(addr, self.session.config().connect_timeout())?;
    self.reconnect_with(Arc::new(transport))
  }

  /// Drop the current connection, failing whatever is in flight, and set up again.
  pub fn reconnect_with(&self, transport: Arc<dyn Transport>) -> Result<LoginInfo, RithmicError> {
    self.session.disconnect()?;
    self.connect_with(transport)
  }

  pub fn disconnect(&self) -> Result<(), RithmicError> {
    self.session.disconnect()
  }

  fn install_logger(&self, transport: &dyn Transport) -> Result<(), RithmicError> {
    if let Some((db_path, session_name)) = &self.log_config {
      let logger = ConnectionLogger::new(db_path, session_name, &transport.peer())?;
      self.session.set_logger(Some(logger));
    }
    Ok(())
  }

  fn after_login(&self) -> Result<(), RithmicError> {
    let timeout = self.session.config().request_timeout();
    let correlator = Correlator::new(&self.session);
    let config = self.reference.load_trading_config(&correlator, timeout)?;
    let account = config.primary_account()?;

    match self.reference.fetch_account_rms_info(&correlator, timeout) {
      Ok(rms) => debug!("Account {} loss limit {}", rms.account_id, rms.loss_limit),
      Err(e) => warn!("No RMS info for {}: {}", account.account_id, e),
    }

    self.session.send(&order_builder::subscribe_order_updates(config, &account.account_id))?;
    self.session.send(&order_builder::subscribe_bracket_updates(config, &account.account_id))?;
    info!("Subscribed to order and bracket updates for {}", account.account_id);
    Ok(())
  }

  /// Called with the decoded record after the order book has processed it. Ids without
  /// a built-in route are decoded generically.
  pub fn register_callback<F>(&self, template_id: i32, callback: F)
  where
    F: Fn(&Record) + Send + Sync + 'static,
  {
    self.dispatcher.register_callback(template_id, callback);
  }

  pub fn remove_callback(&self, template_id: i32) -> bool {
    self.dispatcher.remove_callback(template_id)
  }

  pub fn add_error_observer<T: ErrorObserver + 'static>(&self, observer: T) -> usize {
    self.dispatcher.add_error_observer(observer)
  }

  pub fn remove_error_observer(&self, observer_id: usize) -> bool {
    self.dispatcher.remove_error_observer(observer_id)
  }
}

impl Drop for RithmicClient {
  fn drop(&mut self) {
    if let Err(e) = self.session.disconnect() {
      warn!("Error while dropping client: {}", e);
    }
    // The dispatcher points back at the order manager, which holds the session.
    self.session.clear_dispatcher();
  }
}
