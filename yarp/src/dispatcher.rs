// yarp/src/dispatcher.rs
// Routes unsolicited and fire-and-forget response frames to the order handler and to
// user callbacks.

use crate::base::RithmicError;
use crate::handler::{ErrorObserver, OrderHandler};
use crate::protocol_decoder::{decode_record, peek_template_id};
use crate::record::Record;
use crate::template::template;
use log::{debug, error, trace, warn};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// User callback invoked with the canonical record after the handler ran.
pub type Callback = Arc<dyn Fn(&Record) + Send + Sync>;

struct Route {
  name: &'static str,
  decode: fn(&[u8]) -> Result<Record, RithmicError>,
  handle: fn(&dyn OrderHandler, &Record),
}

fn route(name: &'static str, handle: fn(&dyn OrderHandler, &Record)) -> Route {
  Route { name, decode: decode_record, handle }
}

static ROUTES: Lazy<HashMap<i32, Route>> = Lazy::new(|| {
  let mut m: HashMap<i32, Route> = HashMap::new();
  m.insert(template::NEW_ORDER_RESPONSE, route("new_order_response", |h, r| h.on_new_order_response(r)));
  m.insert(template::MODIFY_ORDER_RESPONSE, route("modify_order_response", |h, r| h.on_command_response(r)));
  m.insert(template::CANCEL_ORDER_RESPONSE, route("cancel_order_response", |h, r| h.on_command_response(r)));
  m.insert(template::BRACKET_ORDER_RESPONSE, route("bracket_order_response", |h, r| h.on_bracket_order_response(r)));
  m.insert(
    template::UPDATE_TARGET_BRACKET_LEVEL_RESPONSE,
    route("update_target_bracket_level_response", |h, r| h.on_command_response(r)),
  );
  m.insert(
    template::UPDATE_STOP_BRACKET_LEVEL_RESPONSE,
    route("update_stop_bracket_level_response", |h, r| h.on_command_response(r)),
  );
  m.insert(
    template::SUBSCRIBE_ORDER_UPDATES_RESPONSE,
    route("subscribe_order_updates_response", |h, r| h.on_command_response(r)),
  );
  m.insert(
    template::SUBSCRIBE_BRACKET_UPDATES_RESPONSE,
    route("subscribe_bracket_updates_response", |h, r| h.on_command_response(r)),
  );
  m.insert(template::TRADE_ROUTE, route("trade_route", |h, r| h.on_trade_route(r)));
  m.insert(template::RITHMIC_ORDER_NOTIFICATION, route("rithmic_order_notification", |h, r| h.on_order_notification(r)));
  m.insert(template::EXCHANGE_ORDER_NOTIFICATION, route("exchange_order_notification", |h, r| h.on_exchange_notification(r)));
  m
});

/// Template ids with a built-in route.
pub fn routed_templates() -> Vec<i32> {
  let mut ids: Vec<i32> = ROUTES.keys().copied().collect();
  ids.sort_unstable();
  ids
}

pub struct Dispatcher {
  handler: Arc<dyn OrderHandler>,
  callbacks: RwLock<HashMap<i32, Callback>>,
  error_observers: RwLock<HashMap<usize, Box<dyn ErrorObserver>>>,
  next_observer_id: AtomicUsize,
}

impl Dispatcher {
  pub fn new(handler: Arc<dyn OrderHandler>) -> Self {
    Dispatcher {
      handler,
      callbacks: RwLock::new(HashMap::new()),
      error_observers: RwLock::new(HashMap::new()),
      next_observer_id: AtomicUsize::new(1),
    }
  }

  /// Register (or replace) the user callback for a template id. Callbacks may also be
  /// registered for ids without a built-in route; those frames are decoded generically.
  pub fn register_callback<F>(&self, template_id: i32, callback: F)
  where
    F: Fn(&Record) + Send + Sync + 'static,
  {
    if self.callbacks.write().insert(template_id, Arc::new(callback)).is_some() {
      debug!("Replaced callback for template {}", template_id);
    }
  }

  pub fn remove_callback(&self, template_id: i32) -> bool {
    self.callbacks.write().remove(&template_id).is_some()
  }

  pub fn add_error_observer<T: ErrorObserver + 'static>(&self, observer: T) -> usize {
    let observer_id = self.next_observer_id.fetch_add(1, Ordering::SeqCst);
    self.error_observers.write().insert(observer_id, Box::new(observer));
    debug!("Added error observer with ID: {}", observer_id);
    observer_id
  }

  pub fn remove_error_observer(&self, observer_id: usize) -> bool {
    self.error_observers.write().remove(&observer_id).is_some()
  }

  pub fn report_error(&self, error: &RithmicError) {
    let observers = self.error_observers.read();
    if observers.is_empty() {
      warn!("Unobserved error: {}", error);
    }
    for observer in observers.values() {
      observer.on_error(error);
    }
  }

  /// The receive loop ended with `error`.
  pub fn connection_closed(&self, error: &RithmicError) {
    self.handler.connection_closed(error);
  }

  fn callback_for(&self, template_id: i32) -> Option<Callback> {
    self.callbacks.read().get(&template_id).cloned()
  }

  /// Route one inbound payload. Unknown ids without a callback are dropped. A decode
  /// failure is reported to the error observers and returned; the caller keeps going.
  pub fn dispatch(&self, payload: &[u8]) -> Result<(), RithmicError> {
    let template_id = match peek_template_id(payload) {
      Ok(id) => id,
      Err(e) => {
        self.report_error(&e);
        return Err(e);
      }
    };

    match ROUTES.get(&template_id) {
      Some(route) => {
        let record = match (route.decode)(payload) {
          Ok(r) => r,
          Err(e) => {
            error!("Dropping {} frame: {}", route.name, e);
            self.report_error(&e);
            return Err(e);
          }
        };
        trace!("Dispatching {}: {}", route.name, record);
        (route.handle)(self.handler.as_ref(), &record);
        if let Some(callback) = self.callback_for(template_id) {
          callback(&record);
        }
      }
      None => match self.callback_for(template_id) {
        Some(callback) => {
          let record = decode_record(payload).map_err(|e| {
            self.report_error(&e);
            e
          })?;
          callback(&record);
        }
        None => debug!("Ignoring template {} with no route", template_id),
      },
    }
    Ok(())
  }
}
