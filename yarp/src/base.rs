// yarp/src/base.rs
// Error definitions shared by every layer of the client.

use thiserror::Error;

/// Errors that can occur while talking to an R|Protocol plant.
///
/// Connection-level variants (`ConnectionClosed`, `FramingError`) are fatal to the
/// session that produced them. `MessageDecodeError` is scoped to a single frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RithmicError {
  #[error("Configuration error: {0}")]
  ConfigurationError(String),

  #[error("Connection failed: {0}")]
  ConnectionFailed(String),

  #[error("Connection closed: {0}")]
  ConnectionClosed(String),

  #[error("Framing error: {0}")]
  FramingError(String),

  #[error("Authentication failed: rp_code={0}")]
  AuthenticationFailure(String),

  #[error("Not connected")]
  NotConnected,

  #[error("Already connected")]
  AlreadyConnected,

  #[error("Already running: {0}")]
  AlreadyRunning(String),

  #[error("Socket error: {0}")]
  SocketError(String),

  #[error("Failed to decode template {template_id}: {detail}")]
  MessageDecodeError { template_id: i32, detail: String },

  #[error("Request timeout: {0}")]
  Timeout(String),

  #[error("Request rejected: template={template_id}, rp_code={code}")]
  RequestRejected { template_id: i32, code: String },

  #[error("No trading config loaded")]
  NoTradingConfig,

  #[error("No valid trading account")]
  NoValidTradingAccount,

  #[error("No valid trade route for exchange {0}")]
  NoValidTradeRoute(String),

  #[error("Order not found: {0}")]
  OrderNotFound(String),

  #[error("Basket id not yet assigned for order {0}")]
  BasketIdNotYetAssigned(String),

  #[error("Amendment timed out: {0}")]
  AmendmentTimeout(String),

  #[error("Invalid order: {0}")]
  InvalidOrder(String),

  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),

  #[error("Logging error: {0}")]
  LoggingError(String),

  #[error("Snapshot error: {0}")]
  SnapshotError(String),

  #[error("Internal error: {0}")]
  InternalError(String),
}

impl RithmicError {
  /// True for errors that end the receive loop of a session.
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      RithmicError::ConnectionClosed(_) | RithmicError::FramingError(_) | RithmicError::SocketError(_)
    )
  }
}

pub type Result<T> = std::result::Result<T, RithmicError>;
