// yarp/src/handler.rs
// Handlers for messages routed by the dispatcher.

use crate::base::RithmicError;
use crate::record::Record;

/// Order plant traffic that is not an answer to a correlated request.
///
/// Implemented by the order manager. Every method receives the decoded record; the
/// dispatcher has already checked the template id.
#[cfg_attr(test, mockall::automock)]
pub trait OrderHandler: Send + Sync {
  /// Rithmic order notification (351).
  fn on_order_notification(&self, record: &Record);

  /// Exchange order notification (352).
  fn on_exchange_notification(&self, record: &Record);

  /// Response to a new order (313).
  fn on_new_order_response(&self, record: &Record);

  /// Response to a bracket order (331).
  fn on_bracket_order_response(&self, record: &Record);

  /// Responses to modify, cancel, bracket level updates and update subscriptions
  /// (315, 317, 333, 335, 309, 337).
  fn on_command_response(&self, record: &Record);

  /// Trade route status update (350).
  fn on_trade_route(&self, record: &Record);

  /// The receive loop ended. Anything waiting on the plant must give up.
  fn connection_closed(&self, error: &RithmicError);
}

/// Receives errors that have no caller to return to: decode failures and the fatal
/// error that ended a receive loop.
pub trait ErrorObserver: Send + Sync {
  fn on_error(&self, error: &RithmicError);
}
