// yarp/src/order_manager.rs

//! Tracks every order and bracket submitted through this client.
//!
//! Local state changes in two ways only: caller operations (`submit_*`, `submit_cancel`,
//! `amend_*`) create orders and move them from `Created` to `Submitted`; everything after
//! that comes from plant messages delivered by the dispatcher through [`OrderHandler`].
//!
//! # Correlation
//!
//! Callers address orders by their own `order_id`, sent to the plant as the user tag.
//! The plant answers with a basket id, which is what cancels and modifies are sent
//! against. Inbound messages are matched by basket id first, then by user tag. When a
//! message for a bracket carries a child bracket type, it is matched to a single leg of
//! that group (see [`OrderManager::resolved_basket_id`] for how legs without their own
//! basket id are addressed).
//!
//! # Bulk amendments
//!
//! `amend_all_stop_losses` / `amend_all_take_profits` send one modify per open leg and
//! block until every leg's modify count reaches the expected value, or the timeout
//! elapses. Completion is signalled from the notification path.

use crate::base::RithmicError;
use crate::correlator::Correlator;
use crate::handler::OrderHandler;
use crate::order::{
  timestamp_from_wire, AmendmentEntry, BracketOrder, Fill, ModifyEntry, Order, OrderKind, OrderObserver,
  OrderSide, OrderStatus, UpdateRecord,
};
use crate::order_builder::{self, BracketOrderParams, ModifyOrder, NewOrder, Routing};
use crate::protocol::{ChildLegType, ExchangeNotifyType, PriceType};
use crate::record::Record;
use crate::reference::ReferenceData;
use crate::session::Session;
use crate::template::template;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Parameters for [`OrderManager::submit_bracket`].
#[derive(Debug, Clone, PartialEq)]
pub struct BracketRequest {
  pub order_id: String,
  pub security_code: String,
  pub exchange_code: String,
  pub quantity: u32,
  pub is_buy: bool,
  pub limit_price: f64,
  pub target_ticks: u32,
  pub stop_ticks: u32,
  /// Quantities of the take-profit legs; one leg with the full quantity when empty.
  pub take_profit_quantities: Vec<u32>,
  /// Quantities of the stop-loss legs; one leg with the full quantity when empty.
  pub stop_loss_quantities: Vec<u32>,
}

impl BracketRequest {
  pub fn new(
    order_id: &str,
    security_code: &str,
    exchange_code: &str,
    quantity: u32,
    is_buy: bool,
    limit_price: f64,
    target_ticks: u32,
    stop_ticks: u32,
  ) -> Self {
    BracketRequest {
      order_id: order_id.to_string(),
      security_code: security_code.to_string(),
      exchange_code: exchange_code.to_string(),
      quantity,
      is_buy,
      limit_price,
      target_ticks,
      stop_ticks,
      take_profit_quantities: Vec::new(),
      stop_loss_quantities: Vec::new(),
    }
  }

  pub fn with_take_profit_legs(mut self, quantities: Vec<u32>) -> Self {
    self.take_profit_quantities = quantities;
    self
  }

  pub fn with_stop_loss_legs(mut self, quantities: Vec<u32>) -> Self {
    self.stop_loss_quantities = quantities;
    self
  }

  fn leg_quantities(&self, kind: ChildLegType) -> Result<Vec<u32>, RithmicError> {
    let given = match kind {
      ChildLegType::TakeProfit => &self.take_profit_quantities,
      ChildLegType::StopLoss => &self.stop_loss_quantities,
    };
    if given.is_empty() {
      return Ok(vec![self.quantity]);
    }
    if given.iter().any(|q| *q == 0) {
      return Err(RithmicError::InvalidParameter(format!("Zero quantity {} leg", kind)));
    }
    let total: u32 = given.iter().sum();
    if total != self.quantity {
      return Err(RithmicError::InvalidParameter(format!(
        "{} legs total {} but the order quantity is {}", kind, total, self.quantity
      )));
    }
    Ok(given.clone())
  }
}

/// Derived fill and cancel state of a bracket's children.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketSummary {
  pub parent_status: OrderStatus,
  pub children_in_market: bool,
  pub all_children_cancelled: bool,
  pub stop_loss_filled_quantity: u32,
  pub take_profit_filled_quantity: u32,
  /// Some position from the parent is still unprotected or unclosed.
  pub is_open: bool,
}

/// Versioned, serializable copy of the whole order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
  pub version: u32,
  pub taken_at: DateTime<Utc>,
  pub orders: Vec<Order>,
  pub brackets: Vec<BracketOrder>,
  pub updates: Vec<UpdateRecord>,
}

impl OrderBookSnapshot {
  pub fn to_json(&self) -> Result<String, RithmicError> {
    serde_json::to_string_pretty(self).map_err(|e| RithmicError::SnapshotError(format!("Serializing snapshot: {}", e)))
  }

  pub fn from_json(text: &str) -> Result<Self, RithmicError> {
    serde_json::from_str(text).map_err(|e| RithmicError::SnapshotError(format!("Parsing snapshot: {}", e)))
  }
}

struct PendingAmendment {
  generation: u64,
  /// Leg order id -> modify count that acknowledges this amendment.
  expected: HashMap<String, u32>,
  old_value: f64,
  new_value: f64,
  tx: Sender<Result<AmendmentEntry, RithmicError>>,
}

struct BracketState {
  bracket: BracketOrder,
  pending: HashMap<ChildLegType, PendingAmendment>,
}

type OrderRef = Arc<RwLock<Order>>;
type BracketRef = Arc<Mutex<BracketState>>;

/// A level update (332/334) waiting for its response.
#[derive(Debug, Clone)]
struct PendingLevel {
  order_id: String,
  kind: ChildLegType,
  new_ticks: u32,
}

/// Where an inbound message landed.
struct Resolved {
  order_id: String,
  order: OrderRef,
  /// Bracket the order belongs to (as parent or leg) and the leg group, for legs.
  bracket: Option<(BracketRef, Option<ChildLegType>)>,
}

/// Result of applying one message to one order.
struct Applied {
  snapshot: Order,
  fill: Option<Fill>,
  modified: bool,
  changed: bool,
}

pub struct OrderManager {
  session: Arc<Session>,
  reference: Arc<ReferenceData>,
  order_book: RwLock<HashMap<String, OrderRef>>,
  brackets: RwLock<HashMap<String, BracketRef>>,
  basket_index: RwLock<HashMap<String, String>>,
  updates: RwLock<Vec<UpdateRecord>>,
  pending_levels: Mutex<VecDeque<PendingLevel>>,
  observers: RwLock<HashMap<usize, Box<dyn OrderObserver>>>,
  next_observer_id: AtomicUsize,
  amendment_generation: AtomicU64,
}

impl OrderManager {
  pub fn new(session: Arc<Session>, reference: Arc<ReferenceData>) -> Arc<Self> {
    Arc::new(OrderManager {
      session,
      reference,
      order_book: RwLock::new(HashMap::new()),
      brackets: RwLock::new(HashMap::new()),
      basket_index: RwLock::new(HashMap::new()),
      updates: RwLock::new(Vec::new()),
      pending_levels: Mutex::new(VecDeque::new()),
      observers: RwLock::new(HashMap::new()),
      next_observer_id: AtomicUsize::new(1),
      amendment_generation: AtomicU64::new(1),
    })
  }

  /// A fresh unique order id.
  pub fn generate_order_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
  }

  // --- Observers ---

  pub fn add_observer<T: OrderObserver + 'static>(&self, observer: T) -> usize {
    let observer_id = self.next_observer_id.fetch_add(1, Ordering::SeqCst);
    self.observers.write().insert(observer_id, Box::new(observer));
    debug!("Added order observer with ID: {}", observer_id);
    observer_id
  }

  pub fn remove_observer(&self, observer_id: usize) -> bool {
    let removed = self.observers.write().remove(&observer_id).is_some();
    if !removed {
      warn!("Attempted to remove non-existent observer ID: {}", observer_id);
    }
    removed
  }

  fn notify_update(&self, order: &Order) {
    for observer in self.observers.read().values() {
      observer.on_order_update(order);
    }
  }

  fn notify_fill(&self, order: &Order, fill: &Fill) {
    for observer in self.observers.read().values() {
      observer.on_fill(order, fill);
    }
  }

  fn notify_error(&self, order_id: &str, error: &RithmicError) {
    for observer in self.observers.read().values() {
      observer.on_order_error(order_id, error);
    }
  }

  // --- Lookups ---

  fn order_ref(&self, order_id: &str) -> Option<OrderRef> {
    self.order_book.read().get(order_id).cloned()
  }

  fn bracket_ref(&self, order_id: &str) -> Option<BracketRef> {
    self.brackets.read().get(order_id).cloned()
  }

  fn require_order(&self, order_id: &str) -> Result<OrderRef, RithmicError> {
    self.order_ref(order_id).ok_or_else(|| RithmicError::OrderNotFound(order_id.to_string()))
  }

  fn require_bracket(&self, order_id: &str) -> Result<BracketRef, RithmicError> {
    match self.bracket_ref(order_id) {
      Some(b) => Ok(b),
      None if self.order_book.read().contains_key(order_id) => {
        Err(RithmicError::InvalidOrder(format!("{} is not a bracket order", order_id)))
      }
      None => Err(RithmicError::OrderNotFound(order_id.to_string())),
    }
  }

  pub fn get_order(&self, order_id: &str) -> Option<Order> {
    self.order_ref(order_id).map(|o| o.read().clone())
  }

  pub fn get_bracket(&self, order_id: &str) -> Option<BracketOrder> {
    self.bracket_ref(order_id).map(|b| b.lock().bracket.clone())
  }

  /// Every order, oldest first.
  pub fn list_orders(&self) -> Vec<Order> {
    let refs: Vec<OrderRef> = self.order_book.read().values().cloned().collect();
    let mut orders: Vec<Order> = refs.iter().map(|o| o.read().clone()).collect();
    orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.order_id.cmp(&b.order_id)));
    orders
  }

  pub fn open_orders(&self) -> Vec<Order> {
    self.list_orders().into_iter().filter(|o| o.is_open()).collect()
  }

  /// Every recorded inbound message, in arrival order.
  pub fn updates(&self) -> Vec<UpdateRecord> {
    self.updates.read().clone()
  }

  pub fn updates_for(&self, order_id: &str) -> Vec<UpdateRecord> {
    self.updates.read().iter().filter(|u| u.order_id.as_deref() == Some(order_id)).cloned().collect()
  }

  /// The basket id commands for `order_id` are sent against: the order's own basket id,
  /// or for a bracket leg without one, its parent's.
  pub fn resolved_basket_id(&self, order_id: &str) -> Result<Option<String>, RithmicError> {
    let order = self.require_order(order_id)?;
    let (own, parent) = {
      let o = order.read();
      (o.basket_id.clone(), o.parent_order_id.clone())
    };
    if own.is_some() {
      return Ok(own);
    }
    match parent {
      Some(parent_id) => Ok(self.order_ref(&parent_id).and_then(|p| p.read().basket_id.clone())),
      None => Ok(None),
    }
  }

  fn require_basket_id(&self, order_id: &str) -> Result<String, RithmicError> {
    self.resolved_basket_id(order_id)?
      .ok_or_else(|| RithmicError::BasketIdNotYetAssigned(order_id.to_string()))
  }

  pub fn bracket_summary(&self, order_id: &str) -> Option<BracketSummary> {
    let bracket = self.get_bracket(order_id)?;
    let parent = self.get_order(order_id)?;
    let legs = |kind: ChildLegType| -> Vec<Order> {
      bracket.legs(kind).iter().filter_map(|id| self.get_order(id)).collect()
    };
    let stops = legs(ChildLegType::StopLoss);
    let targets = legs(ChildLegType::TakeProfit);
    let children: Vec<&Order> = stops.iter().chain(targets.iter()).collect();

    let stop_loss_filled_quantity: u32 = stops.iter().map(|o| o.filled_quantity()).sum();
    let take_profit_filled_quantity: u32 = targets.iter().map(|o| o.filled_quantity()).sum();
    let children_in_market = children.iter().any(|o| o.acknowledged_at.is_some() && o.is_open());
    let all_children_cancelled = !children.is_empty() && children.iter().all(|o| o.status == OrderStatus::Cancelled);
    let closed = stop_loss_filled_quantity + take_profit_filled_quantity;
    let is_open = match parent.status {
      OrderStatus::Rejected | OrderStatus::Cancelled => parent.filled_quantity() > closed,
      _ => !all_children_cancelled && closed < parent.quantity,
    };
    Some(BracketSummary {
      parent_status: parent.status,
      children_in_market,
      all_children_cancelled,
      stop_loss_filled_quantity,
      take_profit_filled_quantity,
      is_open,
    })
  }

  fn request_timeout(&self) -> Duration {
    self.session.config().request_timeout()
  }

  fn send_command(&self, order_id: &str, request: &Record) -> Result<(), RithmicError> {
    debug!("Sending {} for order {}", request.template_id, order_id);
    self.session.send(request).map_err(|e| {
      error!("Failed to send {} for order {}: {}", request.template_id, order_id, e);
      self.notify_error(order_id, &e);
      e
    })
  }

  /// Drop orders whose command never left, so the same ids can be submitted again.
  fn forget_unsent(&self, order_ids: &[String], bracket_id: Option<&str>) {
    let mut book = self.order_book.write();
    for id in order_ids {
      book.remove(id);
    }
    if let Some(bracket_id) = bracket_id {
      self.brackets.write().remove(bracket_id);
    }
    debug!("Removed unsent orders {:?}", order_ids);
  }

  /// `Created -> Submitted`; anything the plant already reported wins.
  fn mark_submitted(&self, order: &OrderRef) -> Order {
    let mut o = order.write();
    if o.status == OrderStatus::Created {
      o.apply_status(OrderStatus::Submitted);
    }
    o.clone()
  }

  // --- Submission ---

  pub fn submit_market(
    &self,
    order_id: &str,
    security_code: &str,
    exchange_code: &str,
    quantity: u32,
    is_buy: bool,
  ) -> Result<Order, RithmicError> {
    self.submit_single(
      NewOrder {
        order_id: order_id.to_string(),
        security_code: security_code.to_string(),
        exchange_code: exchange_code.to_string(),
        quantity,
        is_buy,
        price_type: PriceType::Market,
        price: None,
        trigger_price: None,
      },
      OrderKind::Market,
    )
  }

  pub fn submit_limit(
    &self,
    order_id: &str,
    security_code: &str,
    exchange_code: &str,
    quantity: u32,
    is_buy: bool,
    limit_price: f64,
  ) -> Result<Order, RithmicError> {
    self.submit_single(
      NewOrder {
        order_id: order_id.to_string(),
        security_code: security_code.to_string(),
        exchange_code: exchange_code.to_string(),
        quantity,
        is_buy,
        price_type: PriceType::Limit,
        price: Some(limit_price),
        trigger_price: None,
      },
      OrderKind::Limit,
    )
  }

  fn submit_single(&self, params: NewOrder, kind: OrderKind) -> Result<Order, RithmicError> {
    if params.quantity == 0 {
      return Err(RithmicError::InvalidParameter("Order quantity must be positive".to_string()));
    }
    let config = self.reference.trading_config()?;
    let routing = Routing::resolve(config, &params.exchange_code)?;

    let mut order = Order::new(
      &params.order_id,
      &params.security_code,
      &params.exchange_code,
      params.quantity,
      OrderSide::from_is_buy(params.is_buy),
      kind,
    );
    order.limit_price = params.price;
    let handle = Arc::new(RwLock::new(order));
    {
      let mut book = self.order_book.write();
      if book.contains_key(&params.order_id) {
        return Err(RithmicError::InvalidOrder(format!("Duplicate order id {}", params.order_id)));
      }
      book.insert(params.order_id.clone(), handle.clone());
    }

    let request = order_builder::new_order(&routing, &params);
    if let Err(e) = self.send_command(&params.order_id, &request) {
      self.forget_unsent(&[params.order_id.clone()], None);
      return Err(e);
    }
    let snapshot = self.mark_submitted(&handle);
    info!("Submitted {}", snapshot);
    self.notify_update(&snapshot);
    Ok(snapshot)
  }

  fn tick_multiplier(&self, security_code: &str, exchange_code: &str) -> Result<f64, RithmicError> {
    let info = match self.reference.cached_instrument(security_code, exchange_code) {
      Some(info) => info,
      None => self.reference.instrument(
        &Correlator::new(&self.session),
        security_code,
        exchange_code,
        self.request_timeout(),
      )?,
    };
    if info.tick_multiplier <= 0.0 {
      return Err(RithmicError::InvalidParameter(format!(
        "No tick size for {}@{}", security_code, exchange_code
      )));
    }
    Ok(info.tick_multiplier)
  }

  /// Submit a limit entry with take-profit and stop-loss groups. The parent and every
  /// leg exist locally before the command is written.
  pub fn submit_bracket(&self, request: BracketRequest) -> Result<BracketOrder, RithmicError> {
    if request.quantity == 0 {
      return Err(RithmicError::InvalidParameter("Order quantity must be positive".to_string()));
    }
    let config = self.reference.trading_config()?;
    let routing = Routing::resolve(config, &request.exchange_code)?;
    if self.order_book.read().contains_key(&request.order_id) {
      return Err(RithmicError::InvalidOrder(format!("Duplicate order id {}", request.order_id)));
    }
    let take_profit_quantities = request.leg_quantities(ChildLegType::TakeProfit)?;
    let stop_loss_quantities = request.leg_quantities(ChildLegType::StopLoss)?;
    let tick = self.tick_multiplier(&request.security_code, &request.exchange_code)?;

    // Stops sit below a long entry and above a short one; targets mirror them.
    let direction = if request.is_buy { -1.0 } else { 1.0 };
    let stop_loss_price = request.limit_price + request.stop_ticks as f64 * direction * tick;
    let take_profit_price = request.limit_price - request.target_ticks as f64 * direction * tick;

    let side = OrderSide::from_is_buy(request.is_buy);
    let mut parent = Order::new(
      &request.order_id, &request.security_code, &request.exchange_code, request.quantity, side, OrderKind::Bracket,
    );
    parent.limit_price = Some(request.limit_price);

    let mut children = Vec::new();
    let mut make_legs = |kind: ChildLegType, quantities: &[u32]| -> Vec<String> {
      quantities
        .iter()
        .enumerate()
        .map(|(i, qty)| {
          let id = BracketOrder::child_id(&request.order_id, kind, i);
          let mut leg = Order::new(
            &id, &request.security_code, &request.exchange_code, *qty, side.opposite(), OrderKind::from(kind),
          );
          leg.parent_order_id = Some(request.order_id.clone());
          match kind {
            ChildLegType::StopLoss => leg.trigger_price = Some(stop_loss_price),
            ChildLegType::TakeProfit => leg.limit_price = Some(take_profit_price),
          }
          children.push(leg);
          id
        })
        .collect()
    };
    let stop_loss_legs = make_legs(ChildLegType::StopLoss, &stop_loss_quantities);
    let take_profit_legs = make_legs(ChildLegType::TakeProfit, &take_profit_quantities);

    let bracket = BracketOrder {
      order_id: request.order_id.clone(),
      target_ticks: request.target_ticks,
      stop_ticks: request.stop_ticks,
      tick_multiplier: tick,
      stop_loss_price,
      take_profit_price,
      stop_loss_legs,
      take_profit_legs,
      stop_loss_history: Default::default(),
      take_profit_history: Default::default(),
    };

    let parent_ref = Arc::new(RwLock::new(parent));
    let child_refs: Vec<OrderRef> = children.into_iter().map(|c| Arc::new(RwLock::new(c))).collect();
    {
      let mut book = self.order_book.write();
      let mut brackets = self.brackets.write();
      let ids = std::iter::once(request.order_id.clone()).chain(bracket.all_legs().cloned());
      for id in ids {
        if book.contains_key(&id) {
          return Err(RithmicError::InvalidOrder(format!("Duplicate order id {}", id)));
        }
      }
      book.insert(request.order_id.clone(), parent_ref.clone());
      for child in &child_refs {
        let id = child.read().order_id.clone();
        book.insert(id, child.clone());
      }
      brackets.insert(
        request.order_id.clone(),
        Arc::new(Mutex::new(BracketState { bracket: bracket.clone(), pending: HashMap::new() })),
      );
    }

    let params = BracketOrderParams {
      order_id: request.order_id.clone(),
      security_code: request.security_code.clone(),
      exchange_code: request.exchange_code.clone(),
      quantity: request.quantity,
      is_buy: request.is_buy,
      limit_price: request.limit_price,
      take_profit_legs: take_profit_quantities.iter().map(|q| (*q, request.target_ticks)).collect(),
      stop_loss_legs: stop_loss_quantities.iter().map(|q| (*q, request.stop_ticks)).collect(),
    };
    if let Err(e) = self.send_command(&request.order_id, &order_builder::bracket_order(&routing, &params)) {
      let ids: Vec<String> = std::iter::once(request.order_id.clone()).chain(bracket.all_legs().cloned()).collect();
      self.forget_unsent(&ids, Some(&request.order_id));
      return Err(e);
    }

    let parent_snapshot = self.mark_submitted(&parent_ref);
    let child_snapshots: Vec<Order> = child_refs.iter().map(|c| self.mark_submitted(c)).collect();
    info!(
      "Submitted bracket {} (stop {} x{}, target {} x{})",
      parent_snapshot, stop_loss_price, stop_loss_quantities.len(), take_profit_price, take_profit_quantities.len()
    );
    self.notify_update(&parent_snapshot);
    for child in &child_snapshots {
      self.notify_update(child);
    }
    Ok(bracket)
  }

  // --- Cancellation ---

  pub fn submit_cancel(&self, order_id: &str) -> Result<(), RithmicError> {
    let order = self.require_order(order_id)?;
    {
      let o = order.read();
      if o.kind == OrderKind::Market {
        return Err(RithmicError::InvalidOrder(format!("Market order {} cannot be cancelled", order_id)));
      }
      if !o.is_open() {
        warn!("Cancelling order {} already {}", order_id, o.status);
      }
    }
    let basket_id = self.require_basket_id(order_id)?;
    let config = self.reference.trading_config()?;
    let account = config.primary_account()?;
    let request = order_builder::cancel_order(config, &account.account_id, &basket_id);
    self.send_command(order_id, &request)?;
    info!("Cancel sent for {} (basket {})", order_id, basket_id);
    Ok(())
  }

  /// Cancel every open leg of a bracket. Legs sharing a basket id get one cancel.
  /// Returns the number of cancels sent.
  pub fn cancel_bracket_children(&self, order_id: &str) -> Result<usize, RithmicError> {
    let state = self.require_bracket(order_id)?;
    let legs: Vec<String> = state.lock().bracket.all_legs().cloned().collect();

    let mut baskets = Vec::new();
    let mut seen = HashSet::new();
    for leg_id in &legs {
      let open = self.order_ref(leg_id).map(|o| o.read().is_open()).unwrap_or(false);
      if !open {
        continue;
      }
      let basket_id = self.require_basket_id(leg_id)?;
      if seen.insert(basket_id.clone()) {
        baskets.push((leg_id.clone(), basket_id));
      }
    }

    let config = self.reference.trading_config()?;
    let account = config.primary_account()?;
    for (leg_id, basket_id) in &baskets {
      self.send_command(leg_id, &order_builder::cancel_order(config, &account.account_id, basket_id))?;
    }
    info!("Sent {} cancel(s) for children of {}", baskets.len(), order_id);
    Ok(baskets.len())
  }

  // --- Amendments ---

  fn modify_request(&self, order: &Order, basket_id: String, level: f64) -> ModifyOrder {
    let (price_type, price, trigger_price) = match order.kind {
      OrderKind::StopLoss => (PriceType::StopMarket, None, Some(level)),
      _ => (PriceType::Limit, Some(level), None),
    };
    ModifyOrder {
      basket_id,
      security_code: order.security_code.clone(),
      exchange_code: order.exchange_code.clone(),
      quantity: order.unfilled_quantity().max(1),
      price_type,
      price,
      trigger_price,
    }
  }

  fn amend_single(&self, order_id: &str, level: f64, allowed: &[OrderKind]) -> Result<(), RithmicError> {
    let order = self.require_order(order_id)?.read().clone();
    if !allowed.contains(&order.kind) {
      return Err(RithmicError::InvalidOrder(format!("Order {} is a {} order", order_id, order.kind)));
    }
    if !order.is_open() {
      return Err(RithmicError::InvalidOrder(format!("Order {} is {}", order_id, order.status)));
    }
    let basket_id = self.require_basket_id(order_id)?;
    let config = self.reference.trading_config()?;
    let account = config.primary_account()?;
    let request = order_builder::modify_order(config, &account.account_id, &self.modify_request(&order, basket_id, level));
    self.send_command(order_id, &request)
  }

  /// Move the trigger of one stop-loss order.
  pub fn amend_stop_loss(&self, order_id: &str, trigger_price: f64) -> Result<(), RithmicError> {
    self.amend_single(order_id, trigger_price, &[OrderKind::StopLoss])
  }

  /// Move the limit of one take-profit or plain limit order.
  pub fn amend_take_profit(&self, order_id: &str, limit_price: f64) -> Result<(), RithmicError> {
    self.amend_single(order_id, limit_price, &[OrderKind::TakeProfit, OrderKind::Limit])
  }

  /// Move every stop-loss leg of a bracket to `trigger_price`, waiting for all of them.
  pub fn amend_all_stop_losses(
    &self,
    order_id: &str,
    trigger_price: f64,
    timeout: Duration,
  ) -> Result<AmendmentEntry, RithmicError> {
    self.amend_group(order_id, ChildLegType::StopLoss, trigger_price, timeout)
  }

  /// Move every take-profit leg of a bracket to `limit_price`, waiting for all of them.
  pub fn amend_all_take_profits(
    &self,
    order_id: &str,
    limit_price: f64,
    timeout: Duration,
  ) -> Result<AmendmentEntry, RithmicError> {
    self.amend_group(order_id, ChildLegType::TakeProfit, limit_price, timeout)
  }

  fn amend_group(
    &self,
    order_id: &str,
    kind: ChildLegType,
    new_value: f64,
    timeout: Duration,
  ) -> Result<AmendmentEntry, RithmicError> {
    let state_ref = self.require_bracket(order_id)?;
    let config = self.reference.trading_config()?;
    let account = config.primary_account()?;

    let (rx, generation) = {
      let mut state = state_ref.lock();
      if state.pending.contains_key(&kind) {
        return Err(RithmicError::AlreadyRunning(format!("{} amendment of {}", kind, order_id)));
      }

      let mut expected = HashMap::new();
      let mut commands = Vec::new();
      for leg_id in state.bracket.legs(kind) {
        let leg = self.require_order(leg_id)?.read().clone();
        if !leg.is_open() {
          debug!("Skipping {} leg {}", leg.status, leg_id);
          continue;
        }
        let basket_id = self.require_basket_id(leg_id)?;
        expected.insert(leg_id.clone(), leg.modify_count + 1);
        commands.push((
          leg_id.clone(),
          order_builder::modify_order(config, &account.account_id, &self.modify_request(&leg, basket_id, new_value)),
        ));
      }
      if commands.is_empty() {
        return Err(RithmicError::InvalidOrder(format!("No open {} legs on {}", kind, order_id)));
      }

      let (tx, rx) = bounded(1);
      let generation = self.amendment_generation.fetch_add(1, Ordering::SeqCst);
      let old_value = state.bracket.group_price(kind);
      state.pending.insert(kind, PendingAmendment { generation, expected, old_value, new_value, tx });

      // Sent while holding the bracket, so no acknowledgement is evaluated before
      // every leg has its expectation.
      for (leg_id, command) in &commands {
        if let Err(e) = self.send_command(leg_id, command) {
          state.pending.remove(&kind);
          return Err(e);
        }
      }
      info!("Amending {} {} leg(s) of {}: {} -> {}", commands.len(), kind, order_id, old_value, new_value);
      (rx, generation)
    };

    match rx.recv_timeout(timeout) {
      Ok(result) => result,
      Err(RecvTimeoutError::Timeout) => {
        {
          let mut state = state_ref.lock();
          if state.pending.get(&kind).map(|p| p.generation) == Some(generation) {
            state.pending.remove(&kind);
          }
        }
        // Completed between the timeout and taking the lock.
        if let Ok(result) = rx.try_recv() {
          return result;
        }
        warn!("{} amendment of {} timed out after {:?}", kind, order_id, timeout);
        Err(RithmicError::AmendmentTimeout(format!("{} amendment of {}", kind, order_id)))
      }
      Err(RecvTimeoutError::Disconnected) => {
        Err(RithmicError::InternalError("Amendment completion dropped".to_string()))
      }
    }
  }

  fn check_amendment(&self, state: &mut BracketState, kind: ChildLegType) {
    let complete = match state.pending.get(&kind) {
      None => return,
      Some(p) => p.expected.iter().all(|(leg_id, expected)| {
        self.order_ref(leg_id).map(|o| o.read().modify_count == *expected).unwrap_or(false)
      }),
    };
    if !complete {
      return;
    }
    if let Some(p) = state.pending.remove(&kind) {
      state.bracket.set_group_price(kind, p.new_value);
      let entry = state.bracket.history_mut(kind).record(p.old_value, p.new_value);
      info!(
        "{} amendment #{} of {} complete: {} -> {}",
        kind, entry.sequence, state.bracket.order_id, p.old_value, p.new_value
      );
      if p.tx.send(Ok(entry)).is_err() {
        debug!("Amendment waiter for {} already gone", state.bracket.order_id);
      }
    }
  }

  fn amend_bracket_level(&self, order_id: &str, kind: ChildLegType, old_ticks: u32, new_ticks: u32) -> Result<(), RithmicError> {
    let _state = self.require_bracket(order_id)?;
    let basket_id = self.require_basket_id(order_id)?;
    let config = self.reference.trading_config()?;
    let account = config.primary_account()?;
    let request = match kind {
      ChildLegType::StopLoss => {
        order_builder::update_stop_bracket_level(config, &account.account_id, &basket_id, old_ticks, new_ticks)
      }
      ChildLegType::TakeProfit => {
        order_builder::update_target_bracket_level(config, &account.account_id, &basket_id, old_ticks, new_ticks)
      }
    };
    let mut levels = self.pending_levels.lock();
    self.send_command(order_id, &request)?;
    levels.push_back(PendingLevel { order_id: order_id.to_string(), kind, new_ticks });
    Ok(())
  }

  /// Ask the plant to move the bracket's stop legs from `old_ticks` to `new_ticks`.
  /// The bracket's recorded stop ticks change once the plant accepts.
  pub fn amend_bracket_stop_ticks(&self, order_id: &str, old_ticks: u32, new_ticks: u32) -> Result<(), RithmicError> {
    self.amend_bracket_level(order_id, ChildLegType::StopLoss, old_ticks, new_ticks)
  }

  pub fn amend_bracket_target_ticks(&self, order_id: &str, old_ticks: u32, new_ticks: u32) -> Result<(), RithmicError> {
    self.amend_bracket_level(order_id, ChildLegType::TakeProfit, old_ticks, new_ticks)
  }

  // --- Notification ingestion ---

  fn append_update(&self, record: &Record, order_id: Option<String>) {
    let mut updates = self.updates.write();
    let sequence = updates.len() as u64 + 1;
    updates.push(UpdateRecord {
      sequence,
      received_at: Utc::now(),
      update_time: timestamp_from_wire(record.get_int("ssboe").unwrap_or(0), record.get_int("usecs").unwrap_or(0)),
      template_id: record.template_id,
      order_id,
      record: record.clone(),
    });
  }

  /// The leg of `kind` a message for the bracket in `state` refers to. While a bulk
  /// amendment of that group is pending, a modify acknowledgement goes to the first leg
  /// still short of its expected modify count, so legs sharing a basket id each get one.
  fn pick_leg(&self, state: &BracketState, kind: ChildLegType, basket_id: Option<&str>, modify: bool) -> Option<String> {
    let legs: Vec<(String, Option<String>, u32)> = state
      .bracket
      .legs(kind)
      .iter()
      .filter_map(|id| {
        self.order_ref(id).map(|o| {
          let o = o.read();
          (id.clone(), o.basket_id.clone(), o.modify_count)
        })
      })
      .collect();

    if modify {
      if let Some(pending) = state.pending.get(&kind) {
        let waiting = legs.iter().find(|(id, basket, count)| {
          pending.expected.get(id).map_or(false, |expected| count < expected)
            && (basket.is_none() || basket.as_deref() == basket_id)
        });
        if let Some((id, _, _)) = waiting {
          return Some(id.clone());
        }
      }
    }
    if let Some(basket_id) = basket_id {
      let holders: Vec<&String> =
        legs.iter().filter(|(_, b, _)| b.as_deref() == Some(basket_id)).map(|(id, _, _)| id).collect();
      if holders.len() == 1 {
        return Some(holders[0].clone());
      }
    }
    if let Some((id, _, _)) = legs.iter().find(|(_, b, _)| b.is_none()) {
      return Some(id.clone());
    }
    if legs.len() == 1 {
      return Some(legs[0].0.clone());
    }
    warn!("Cannot tell which {} leg of {} basket {:?} refers to", kind, state.bracket.order_id, basket_id);
    None
  }

  fn resolve(&self, record: &Record) -> Option<Resolved> {
    let basket_id = record.get_str("basket_id");
    let by_basket = basket_id.and_then(|b| self.basket_index.read().get(b).cloned());
    let base_id = match by_basket {
      Some(id) => id,
      None => {
        let tag = record.get_str("user_tag")?;
        if !self.order_book.read().contains_key(tag) {
          debug!("No order for tag {} (template {})", tag, record.template_id);
          return None;
        }
        tag.to_string()
      }
    };
    let base = self.order_ref(&base_id)?;
    let (kind, parent_id) = {
      let o = base.read();
      (o.kind, o.parent_order_id.clone())
    };

    let own_leg_kind = match kind {
      OrderKind::StopLoss => Some(ChildLegType::StopLoss),
      OrderKind::TakeProfit => Some(ChildLegType::TakeProfit),
      _ => None,
    };
    let bracket_id = match kind {
      OrderKind::Bracket => Some(base_id.clone()),
      _ if own_leg_kind.is_some() => parent_id,
      _ => None,
    };
    let Some(state) = bracket_id.and_then(|id| self.bracket_ref(&id)) else {
      return Some(Resolved { order_id: base_id, order: base, bracket: None });
    };
    // Without a child bracket type the message is about the order the lookup found.
    let Some(leg_kind) = record.get_int("bracket_type").and_then(ChildLegType::from_wire) else {
      return Some(Resolved { order_id: base_id, order: base, bracket: Some((state, own_leg_kind)) });
    };

    let modify = record.template_id == template::EXCHANGE_ORDER_NOTIFICATION
      && record.get_int("notify_type") == Some(i64::from(ExchangeNotifyType::Modify));
    let leg_id = {
      let guard = state.lock();
      self.pick_leg(&guard, leg_kind, basket_id, modify)
    }?;
    let leg = self.order_ref(&leg_id)?;
    Some(Resolved { order_id: leg_id, order: leg, bracket: Some((state, Some(leg_kind))) })
  }

  fn assign_basket(&self, order: &mut Order, basket_id: &str) -> bool {
    if order.basket_id.as_deref() == Some(basket_id) {
      return false;
    }
    if !order.assign_basket_id(basket_id) {
      warn!(
        "Order {} already has basket {:?}, ignoring {}",
        order.order_id, order.basket_id, basket_id
      );
      return false;
    }
    self.basket_index.write().entry(basket_id.to_string()).or_insert_with(|| order.order_id.clone());
    debug!("Order {} assigned basket {}", order.order_id, basket_id);
    true
  }

  fn apply_rithmic_status(order: &mut Order, record: &Record) -> bool {
    let Some(status) = record.get_str("status") else {
      return false;
    };
    let target = match status.to_ascii_lowercase().as_str() {
      "open" | "trigger pending" | "partially filled" => Some(OrderStatus::Acknowledged),
      "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
      "rejected" | "reject" => Some(OrderStatus::Rejected),
      "filled" => Some(OrderStatus::Filled),
      "complete" => match record.get_str("completion_reason").map(|r| r.to_ascii_uppercase()) {
        Some(reason) if reason == "F" || reason.starts_with("FILL") => Some(OrderStatus::Filled),
        Some(reason) if reason == "C" || reason.starts_with("CANCEL") => Some(OrderStatus::Cancelled),
        Some(reason) if reason == "R" || reason.starts_with("REJECT") || reason == "FA" => Some(OrderStatus::Rejected),
        other => {
          debug!("Order {} complete with reason {:?}", order.order_id, other);
          None
        }
      },
      _ => None,
    };
    let Some(target) = target else {
      trace!("Order {} status '{}' has no local transition", order.order_id, status);
      return false;
    };
    let changed = order.apply_status(target);
    if changed {
      match target {
        OrderStatus::Acknowledged => {
          order.acknowledged_at.get_or_insert_with(Utc::now);
        }
        OrderStatus::Cancelled => order.cancelled_at = Some(Utc::now()),
        OrderStatus::Rejected => order.rejection_reason = record.get_str("text").map(str::to_string),
        _ => {}
      }
    }
    changed
  }

  fn apply_exchange(order: &mut Order, record: &Record, at: DateTime<Utc>) -> (bool, bool, Option<Fill>) {
    let notify = record.get_int("notify_type").and_then(|v| ExchangeNotifyType::try_from(v).ok());
    let Some(notify) = notify else {
      trace!("Exchange notification for {} without a known type", order.order_id);
      return (false, false, None);
    };
    match notify {
      ExchangeNotifyType::Status => {
        let changed = order.apply_status(OrderStatus::Acknowledged);
        if changed {
          order.acknowledged_at.get_or_insert(at);
        }
        (changed, false, None)
      }
      ExchangeNotifyType::Modify => {
        let positive = |name: &str| record.get_float(name).filter(|v| *v > 0.0);
        let old_level = order.modify_level();
        let new_level = match order.kind {
          OrderKind::StopLoss => positive("trigger_price").or_else(|| positive("price")),
          _ => positive("price"),
        };
        match (order.kind, new_level) {
          (OrderKind::StopLoss, Some(level)) => order.trigger_price = Some(level),
          (_, Some(level)) => order.limit_price = Some(level),
          (_, None) => {}
        }
        order.modify_count += 1;
        order.modify_history.push(ModifyEntry {
          modify_count: order.modify_count,
          time: at,
          old_level,
          new_level,
        });
        order.updated_at = Utc::now();
        (true, true, None)
      }
      ExchangeNotifyType::Cancel => {
        let changed = order.apply_status(OrderStatus::Cancelled);
        if changed {
          order.cancelled_at = Some(at);
        }
        (changed, false, None)
      }
      ExchangeNotifyType::Trigger => {
        let changed = !order.stop_triggered;
        order.stop_triggered = true;
        (changed, false, None)
      }
      ExchangeNotifyType::Fill => {
        let size = match u32::try_from(record.get_int("fill_size").unwrap_or(0)) {
          Ok(size) if size > 0 => size,
          _ => {
            warn!("Fill for {} without a usable size: {:?}", order.order_id, record.get_int("fill_size"));
            return (false, false, None);
          }
        };
        let fill = Fill {
          fill_id: record.get_str("fill_id").map(str::to_string),
          price: record.get_float("fill_price").unwrap_or(0.0),
          quantity: size,
          time: at,
        };
        order.fills.push(fill.clone());
        order.updated_at = Utc::now();
        if order.filled_quantity() >= order.quantity {
          order.apply_status(OrderStatus::Filled);
        } else {
          order.apply_status(OrderStatus::Acknowledged);
        }
        (true, false, Some(fill))
      }
      ExchangeNotifyType::Reject => {
        let changed = order.apply_status(OrderStatus::Rejected);
        if changed {
          order.rejection_reason = record.get_str("text").map(str::to_string);
        }
        (changed, false, None)
      }
      ExchangeNotifyType::NotModified | ExchangeNotifyType::NotCancelled => {
        warn!("{:?} for {}: {}", notify, order.order_id, record.get_str("text").unwrap_or(""));
        (false, false, None)
      }
      ExchangeNotifyType::Generic => {
        debug!("Generic notification for {}: {}", order.order_id, record.get_str("text").unwrap_or(""));
        (false, false, None)
      }
    }
  }

  fn apply(&self, order: &OrderRef, record: &Record, exchange: bool) -> Applied {
    let at = timestamp_from_wire(record.get_int("ssboe").unwrap_or(0), record.get_int("usecs").unwrap_or(0))
      .unwrap_or_else(Utc::now);
    let mut o = order.write();
    let mut changed = false;
    if let Some(basket_id) = record.get_str("basket_id") {
      changed |= self.assign_basket(&mut o, basket_id);
    }
    let (status_changed, modified, fill) = if exchange {
      Self::apply_exchange(&mut o, record, at)
    } else {
      (Self::apply_rithmic_status(&mut o, record), false, None)
    };
    changed |= status_changed;
    Applied { snapshot: o.clone(), fill, modified, changed }
  }

  fn ingest_notification(&self, record: &Record, exchange: bool) {
    let resolved = self.resolve(record);
    self.append_update(record, resolved.as_ref().map(|r| r.order_id.clone()));
    let Some(resolved) = resolved else {
      return;
    };

    let applied = match &resolved.bracket {
      Some((state_ref, leg_kind)) => {
        let mut state = state_ref.lock();
        let applied = self.apply(&resolved.order, record, exchange);
        if applied.modified {
          if let Some(kind) = leg_kind {
            self.check_amendment(&mut state, *kind);
          }
        }
        applied
      }
      None => self.apply(&resolved.order, record, exchange),
    };

    trace!("Order {} after {}: {}", resolved.order_id, record.template_id, applied.snapshot);
    if let Some(fill) = &applied.fill {
      self.notify_fill(&applied.snapshot, fill);
    }
    if applied.changed {
      self.notify_update(&applied.snapshot);
    }
  }

  fn ingest_order_response(&self, record: &Record) {
    let order_id = record.get_str("user_tag").filter(|tag| self.order_book.read().contains_key(*tag)).map(str::to_string);
    self.append_update(record, order_id.clone());
    let Some(order_id) = order_id else {
      debug!("Response {} for unknown tag {:?}", record.template_id, record.get_str("user_tag"));
      return;
    };
    let Some(order) = self.order_ref(&order_id) else {
      return;
    };

    let rejected = !record.rp_code().is_empty() && !record.rp_code_ok();
    let snapshot = {
      let mut o = order.write();
      let mut changed = false;
      if let Some(basket_id) = record.get_str("basket_id") {
        changed |= self.assign_basket(&mut o, basket_id);
      }
      if rejected && o.apply_status(OrderStatus::Rejected) {
        o.rejection_reason = Some(record.rp_code_text());
        changed = true;
      }
      if changed { Some(o.clone()) } else { None }
    };
    if rejected {
      warn!("Order {} rejected: rp_code {}", order_id, record.rp_code_text());
      let error = RithmicError::RequestRejected { template_id: record.template_id, code: record.rp_code_text() };
      self.notify_error(&order_id, &error);
    }
    if let Some(snapshot) = snapshot {
      self.notify_update(&snapshot);
    }
  }

  fn apply_level_response(&self, record: &Record, kind: ChildLegType) {
    let pending = {
      let mut levels = self.pending_levels.lock();
      let position = levels.iter().position(|l| l.kind == kind);
      position.and_then(|i| levels.remove(i))
    };
    let Some(pending) = pending else {
      debug!("Level response {} with nothing pending", record.template_id);
      return;
    };
    if !record.rp_code_ok() {
      warn!("{} level change of {} refused: {}", kind, pending.order_id, record.rp_code_text());
      return;
    }
    if let Some(state) = self.bracket_ref(&pending.order_id) {
      let mut state = state.lock();
      match kind {
        ChildLegType::StopLoss => state.bracket.stop_ticks = pending.new_ticks,
        ChildLegType::TakeProfit => state.bracket.target_ticks = pending.new_ticks,
      }
      info!("Bracket {} {} ticks now {}", pending.order_id, kind, pending.new_ticks);
    }
  }

  // --- Snapshot ---

  pub fn snapshot(&self) -> OrderBookSnapshot {
    let brackets: Vec<BracketRef> = self.brackets.read().values().cloned().collect();
    let mut brackets: Vec<BracketOrder> = brackets.iter().map(|b| b.lock().bracket.clone()).collect();
    brackets.sort_by(|a, b| a.order_id.cmp(&b.order_id));
    OrderBookSnapshot {
      version: SNAPSHOT_VERSION,
      taken_at: Utc::now(),
      orders: self.list_orders(),
      brackets,
      updates: self.updates(),
    }
  }

  /// Replace all local state with `snapshot`. In-flight bulk amendments are failed.
  pub fn restore(&self, snapshot: OrderBookSnapshot) -> Result<(), RithmicError> {
    if snapshot.version != SNAPSHOT_VERSION {
      return Err(RithmicError::SnapshotError(format!(
        "Unsupported snapshot version {} (expected {})", snapshot.version, SNAPSHOT_VERSION
      )));
    }
    for bracket in &snapshot.brackets {
      let known = |id: &String| snapshot.orders.iter().any(|o| &o.order_id == id);
      if !known(&bracket.order_id) || !bracket.all_legs().all(known) {
        return Err(RithmicError::SnapshotError(format!("Bracket {} references missing orders", bracket.order_id)));
      }
    }
    self.fail_pending_amendments(&RithmicError::SnapshotError("Order book restored".to_string()));

    let mut book = self.order_book.write();
    let mut brackets = self.brackets.write();
    let mut index = self.basket_index.write();
    let mut updates = self.updates.write();
    book.clear();
    brackets.clear();
    index.clear();

    // Parents are listed before their legs, so the index keeps parents on shared baskets.
    let mut orders = snapshot.orders;
    orders.sort_by_key(|o| o.parent_order_id.is_some());
    for order in orders {
      if let Some(basket_id) = &order.basket_id {
        index.entry(basket_id.clone()).or_insert_with(|| order.order_id.clone());
      }
      book.insert(order.order_id.clone(), Arc::new(RwLock::new(order)));
    }
    for bracket in snapshot.brackets {
      brackets.insert(bracket.order_id.clone(), Arc::new(Mutex::new(BracketState { bracket, pending: HashMap::new() })));
    }
    *updates = snapshot.updates;
    self.pending_levels.lock().clear();
    info!("Restored {} orders and {} brackets", book.len(), brackets.len());
    Ok(())
  }

  fn fail_pending_amendments(&self, error: &RithmicError) {
    let states: Vec<BracketRef> = self.brackets.read().values().cloned().collect();
    for state in states {
      let mut state = state.lock();
      for (kind, pending) in state.pending.drain() {
        warn!("Abandoning {} amendment: {}", kind, error);
        let _ = pending.tx.send(Err(error.clone()));
      }
    }
  }
}

impl OrderHandler for OrderManager {
  fn on_order_notification(&self, record: &Record) {
    self.ingest_notification(record, false);
  }

  fn on_exchange_notification(&self, record: &Record) {
    self.ingest_notification(record, true);
  }

  fn on_new_order_response(&self, record: &Record) {
    self.ingest_order_response(record);
  }

  fn on_bracket_order_response(&self, record: &Record) {
    self.ingest_order_response(record);
  }

  fn on_command_response(&self, record: &Record) {
    match record.template_id {
      template::UPDATE_STOP_BRACKET_LEVEL_RESPONSE => self.apply_level_response(record, ChildLegType::StopLoss),
      template::UPDATE_TARGET_BRACKET_LEVEL_RESPONSE => self.apply_level_response(record, ChildLegType::TakeProfit),
      _ if !record.rp_code().is_empty() && !record.rp_code_ok() => {
        warn!("Command response {} refused: {}", record.template_id, record.rp_code_text());
      }
      _ => debug!("Command response {}: {}", record.template_id, record.rp_code_text()),
    }
  }

  fn on_trade_route(&self, record: &Record) {
    info!(
      "Trade route {} on {} is {}",
      record.get_str("trade_route").unwrap_or("?"),
      record.get_str("exchange").unwrap_or("?"),
      record.get_str("status").unwrap_or("?")
    );
  }

  fn connection_closed(&self, error: &RithmicError) {
    self.fail_pending_amendments(&RithmicError::ConnectionClosed(error.to_string()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::conn_mock::{fixtures, mock_pair, MockPeer};
  use crate::reference::test_support;
  use crate::session::SessionConfig;
  use std::thread;

  const WAIT: Duration = Duration::from_secs(2);

  fn setup_with(reference: ReferenceData) -> (Arc<OrderManager>, MockPeer) {
    let (transport, peer) = mock_pair();
    peer.push(&fixtures::login_response("0")).unwrap();
    let session = Arc::new(Session::new(SessionConfig {
      heartbeat_idle_ms: 10_000,
      logout_timeout_ms: 50,
      ..SessionConfig::default()
    }));
    session.connect(transport).unwrap();
    peer.next_sent_of(template::LOGIN_REQUEST, WAIT).unwrap();
    (OrderManager::new(session, Arc::new(reference)), peer)
  }

  fn setup() -> (Arc<OrderManager>, MockPeer) {
    let reference = ReferenceData::new();
    reference.set_trading_config(test_support::trading_config()).unwrap();
    reference.insert_instrument(test_support::es_future(0.25));
    setup_with(reference)
  }

  fn ok() -> Vec<String> {
    vec!["0".to_string()]
  }

  fn order_response(template_id: i32, tag: &str, basket: &str) -> Record {
    Record::new(template_id).with("user_tag", tag).with("basket_id", basket).with("rp_code", ok())
  }

  fn exchange(notify: ExchangeNotifyType, tag: &str, basket: &str) -> Record {
    Record::new(template::EXCHANGE_ORDER_NOTIFICATION)
      .with("user_tag", tag)
      .with("notify_type", i64::from(notify))
      .with("basket_id", basket)
  }

  fn leg_exchange(notify: ExchangeNotifyType, parent: &str, basket: &str, kind: ChildLegType) -> Record {
    exchange(notify, parent, basket).with("bracket_type", kind.to_wire())
  }

  struct Recorder(Arc<Mutex<Vec<String>>>);

  impl OrderObserver for Recorder {
    fn on_order_update(&self, order: &Order) {
      self.0.lock().push(format!("update:{}:{}", order.order_id, order.status));
    }

    fn on_fill(&self, order: &Order, fill: &Fill) {
      self.0.lock().push(format!("fill:{}:{}", order.order_id, fill.quantity));
    }
  }

  #[test]
  fn bracket_prices_are_tick_offsets_from_the_limit() {
    let (manager, peer) = setup();
    let bracket = manager
      .submit_bracket(BracketRequest::new("b1", "ESZ4", "CME", 5, true, 4000.0, 10, 10))
      .unwrap();

    assert_eq!(bracket.stop_loss_price, 3997.5);
    assert_eq!(bracket.take_profit_price, 4002.5);
    assert_eq!(bracket.stop_loss_legs, vec!["b1_stop_loss_0"]);
    assert_eq!(bracket.take_profit_legs, vec!["b1_take_profit_0"]);

    let stop = manager.get_order("b1_stop_loss_0").unwrap();
    assert_eq!((stop.side, stop.kind, stop.quantity), (OrderSide::Sell, OrderKind::StopLoss, 5));
    assert_eq!(stop.trigger_price, Some(3997.5));
    assert_eq!(stop.parent_order_id.as_deref(), Some("b1"));
    let target = manager.get_order("b1_take_profit_0").unwrap();
    assert_eq!(target.limit_price, Some(4002.5));
    assert_eq!(manager.list_orders().len(), 3);
    assert!(manager.list_orders().iter().all(|o| o.status == OrderStatus::Submitted));

    let sent = peer.next_sent_of(template::BRACKET_ORDER_REQUEST, WAIT).unwrap();
    assert_eq!(sent.get_str("user_tag"), Some("b1"));
    assert_eq!(sent.get_int_list("stop_ticks"), &[10]);
    assert_eq!(sent.get_int_list("target_quantity"), &[5]);
  }

  #[test]
  fn sell_bracket_is_mirrored() {
    let (manager, _peer) = setup();
    let bracket = manager
      .submit_bracket(BracketRequest::new("s1", "ESZ4", "CME", 1, false, 4000.0, 8, 4))
      .unwrap();
    assert_eq!(bracket.stop_loss_price, 4001.0);
    assert_eq!(bracket.take_profit_price, 3998.0);
    assert_eq!(manager.get_order("s1_stop_loss_0").unwrap().side, OrderSide::Buy);
  }

  #[test]
  fn bracket_leg_quantities_must_add_up() {
    let (manager, peer) = setup();
    let request = BracketRequest::new("b1", "ESZ4", "CME", 5, true, 4000.0, 10, 10).with_stop_loss_legs(vec![2, 2]);
    assert!(matches!(manager.submit_bracket(request), Err(RithmicError::InvalidParameter(_))));
    assert!(manager.get_order("b1").is_none());
    assert!(peer.next_sent_of(template::BRACKET_ORDER_REQUEST, Duration::from_millis(100)).is_none());
  }

  #[test]
  fn child_legs_resolve_to_parent_basket_after_ack() {
    let (manager, _peer) = setup();
    manager.submit_bracket(BracketRequest::new("b1", "ESZ4", "CME", 5, true, 4000.0, 10, 10)).unwrap();
    assert_eq!(manager.resolved_basket_id("b1_stop_loss_0").unwrap(), None);

    manager.on_bracket_order_response(&order_response(template::BRACKET_ORDER_RESPONSE, "b1", "B1"));
    assert_eq!(manager.get_order("b1").unwrap().basket_id.as_deref(), Some("B1"));
    for leg in ["b1_stop_loss_0", "b1_take_profit_0"] {
      assert_eq!(manager.resolved_basket_id(leg).unwrap().as_deref(), Some("B1"));
    }
    assert!(matches!(manager.resolved_basket_id("nope"), Err(RithmicError::OrderNotFound(_))));
  }

  #[test]
  fn leg_notifications_assign_their_own_baskets() {
    let (manager, _peer) = setup();
    manager
      .submit_bracket(BracketRequest::new("b1", "ESZ4", "CME", 5, true, 4000.0, 10, 10).with_stop_loss_legs(vec![3, 2]))
      .unwrap();
    manager.on_bracket_order_response(&order_response(template::BRACKET_ORDER_RESPONSE, "b1", "B1"));
    manager.on_exchange_notification(&leg_exchange(ExchangeNotifyType::Status, "b1", "S1", ChildLegType::StopLoss));
    manager.on_exchange_notification(&leg_exchange(ExchangeNotifyType::Status, "b1", "S2", ChildLegType::StopLoss));

    assert_eq!(manager.resolved_basket_id("b1_stop_loss_0").unwrap().as_deref(), Some("S1"));
    assert_eq!(manager.resolved_basket_id("b1_stop_loss_1").unwrap().as_deref(), Some("S2"));
    assert_eq!(manager.resolved_basket_id("b1_take_profit_0").unwrap().as_deref(), Some("B1"));
    assert_eq!(manager.get_order("b1_stop_loss_1").unwrap().status, OrderStatus::Acknowledged);
    // The parent itself is untouched by leg traffic.
    assert_eq!(manager.get_order("b1").unwrap().status, OrderStatus::Submitted);
    assert_eq!(manager.updates_for("b1_stop_loss_0").len(), 1);
  }

  fn two_leg_bracket(manager: &OrderManager) {
    manager
      .submit_bracket(BracketRequest::new("b1", "ESZ4", "CME", 5, true, 4000.0, 10, 10).with_stop_loss_legs(vec![3, 2]))
      .unwrap();
    manager.on_bracket_order_response(&order_response(template::BRACKET_ORDER_RESPONSE, "b1", "B1"));
    manager.on_exchange_notification(&leg_exchange(ExchangeNotifyType::Status, "b1", "S1", ChildLegType::StopLoss));
    manager.on_exchange_notification(&leg_exchange(ExchangeNotifyType::Status, "b1", "S2", ChildLegType::StopLoss));
  }

  fn modify_ack(basket: &str, trigger: f64) -> Record {
    leg_exchange(ExchangeNotifyType::Modify, "b1", basket, ChildLegType::StopLoss).with("trigger_price", trigger)
  }

  #[test]
  fn bulk_stop_amendment_completes_after_every_leg() {
    let (manager, peer) = setup();
    two_leg_bracket(&manager);

    let worker = {
      let manager = manager.clone();
      thread::spawn(move || manager.amend_all_stop_losses("b1", 3996.0, WAIT))
    };
    let first = peer.next_sent_of(template::MODIFY_ORDER_REQUEST, WAIT).unwrap();
    let second = peer.next_sent_of(template::MODIFY_ORDER_REQUEST, WAIT).unwrap();
    let mut baskets = vec![
      first.get_str("basket_id").unwrap_or_default().to_string(),
      second.get_str("basket_id").unwrap_or_default().to_string(),
    ];
    baskets.sort();
    assert_eq!(baskets, vec!["S1", "S2"]);
    assert_eq!(first.get_int("price_type"), Some(4));
    assert_eq!(first.get_float("trigger_price"), Some(3996.0));

    manager.on_exchange_notification(&modify_ack("S1", 3996.0));
    thread::sleep(Duration::from_millis(50));
    assert!(!worker.is_finished());

    manager.on_exchange_notification(&modify_ack("S2", 3996.0));
    let entry = worker.join().unwrap().unwrap();
    assert_eq!(entry.sequence, 1);
    assert_eq!((entry.old_value, entry.new_value), (3997.5, 3996.0));

    let bracket = manager.get_bracket("b1").unwrap();
    assert_eq!(bracket.stop_loss_price, 3996.0);
    assert_eq!(bracket.stop_loss_history.len(), 1);
    for leg in ["b1_stop_loss_0", "b1_stop_loss_1"] {
      let order = manager.get_order(leg).unwrap();
      assert_eq!(order.modify_count, 1);
      assert_eq!(order.trigger_price, Some(3996.0));
    }

    // The next amendment continues the sequence.
    let worker = {
      let manager = manager.clone();
      thread::spawn(move || manager.amend_all_stop_losses("b1", 3995.0, WAIT))
    };
    peer.next_sent_of(template::MODIFY_ORDER_REQUEST, WAIT).unwrap();
    peer.next_sent_of(template::MODIFY_ORDER_REQUEST, WAIT).unwrap();
    manager.on_exchange_notification(&modify_ack("S2", 3995.0));
    manager.on_exchange_notification(&modify_ack("S1", 3995.0));
    let entry = worker.join().unwrap().unwrap();
    assert_eq!(entry.sequence, 2);
    assert_eq!(entry.old_value, 3996.0);
  }

  #[test]
  fn bulk_amendment_timeout_keeps_partial_state() {
    let (manager, peer) = setup();
    two_leg_bracket(&manager);

    let worker = {
      let manager = manager.clone();
      thread::spawn(move || manager.amend_all_stop_losses("b1", 3996.0, Duration::from_millis(200)))
    };
    peer.next_sent_of(template::MODIFY_ORDER_REQUEST, WAIT).unwrap();
    manager.on_exchange_notification(&modify_ack("S1", 3996.0));
    assert!(matches!(worker.join().unwrap(), Err(RithmicError::AmendmentTimeout(_))));

    assert_eq!(manager.get_order("b1_stop_loss_0").unwrap().modify_count, 1);
    assert_eq!(manager.get_order("b1_stop_loss_1").unwrap().modify_count, 0);
    let bracket = manager.get_bracket("b1").unwrap();
    assert!(bracket.stop_loss_history.is_empty());
    assert_eq!(bracket.stop_loss_price, 3997.5);
  }

  #[test]
  fn bulk_amendment_on_shared_parent_basket() {
    let (manager, peer) = setup();
    manager
      .submit_bracket(BracketRequest::new("b1", "ESZ4", "CME", 5, true, 4000.0, 10, 10).with_stop_loss_legs(vec![3, 2]))
      .unwrap();
    // The legs never report their own basket ids.
    manager.on_bracket_order_response(&order_response(template::BRACKET_ORDER_RESPONSE, "b1", "B1"));

    let worker = {
      let manager = manager.clone();
      thread::spawn(move || manager.amend_all_stop_losses("b1", 3996.0, WAIT))
    };
    let first = peer.next_sent_of(template::MODIFY_ORDER_REQUEST, WAIT).unwrap();
    let second = peer.next_sent_of(template::MODIFY_ORDER_REQUEST, WAIT).unwrap();
    assert_eq!(first.get_str("basket_id"), Some("B1"));
    assert_eq!(second.get_str("basket_id"), Some("B1"));

    manager.on_exchange_notification(&modify_ack("B1", 3996.0));
    manager.on_exchange_notification(&modify_ack("B1", 3996.0));
    let entry = worker.join().unwrap().unwrap();
    assert_eq!(entry.sequence, 1);
    for leg in ["b1_stop_loss_0", "b1_stop_loss_1"] {
      let order = manager.get_order(leg).unwrap();
      assert_eq!(order.modify_count, 1, "{}", leg);
      assert_eq!(order.trigger_price, Some(3996.0));
    }
    assert_eq!(manager.get_bracket("b1").unwrap().stop_loss_history.len(), 1);
  }

  #[test]
  fn concurrent_bulk_amendment_is_refused_and_disconnect_fails_waiter() {
    let (manager, peer) = setup();
    two_leg_bracket(&manager);

    let worker = {
      let manager = manager.clone();
      thread::spawn(move || manager.amend_all_stop_losses("b1", 3996.0, Duration::from_secs(10)))
    };
    peer.next_sent_of(template::MODIFY_ORDER_REQUEST, WAIT).unwrap();
    assert!(matches!(
      manager.amend_all_stop_losses("b1", 3990.0, WAIT),
      Err(RithmicError::AlreadyRunning(_))
    ));
    // The other group is independent.
    let worker_tp = {
      let manager = manager.clone();
      thread::spawn(move || manager.amend_all_take_profits("b1", 4003.0, Duration::from_secs(10)))
    };
    peer.next_sent_of(template::MODIFY_ORDER_REQUEST, WAIT).unwrap();
    peer.next_sent_of(template::MODIFY_ORDER_REQUEST, WAIT).unwrap();

    manager.connection_closed(&RithmicError::ConnectionClosed("eof".to_string()));
    assert!(matches!(worker.join().unwrap(), Err(RithmicError::ConnectionClosed(_))));
    assert!(matches!(worker_tp.join().unwrap(), Err(RithmicError::ConnectionClosed(_))));
  }

  #[test]
  fn cancel_unknown_order_sends_nothing() {
    let (manager, peer) = setup();
    assert!(matches!(manager.submit_cancel("ghost"), Err(RithmicError::OrderNotFound(_))));
    assert!(peer.next_sent(Duration::from_millis(100)).is_none());
  }

  #[test]
  fn cancel_needs_a_basket() {
    let (manager, peer) = setup();
    manager.submit_limit("l1", "ESZ4", "CME", 1, true, 3990.0).unwrap();
    peer.next_sent_of(template::NEW_ORDER_REQUEST, WAIT).unwrap();
    assert!(matches!(manager.submit_cancel("l1"), Err(RithmicError::BasketIdNotYetAssigned(_))));

    manager.on_new_order_response(&order_response(template::NEW_ORDER_RESPONSE, "l1", "B9"));
    manager.submit_cancel("l1").unwrap();
    let cancel = peer.next_sent_of(template::CANCEL_ORDER_REQUEST, WAIT).unwrap();
    assert_eq!(cancel.get_str("basket_id"), Some("B9"));
    assert_eq!(cancel.get_str("account_id"), Some("ACC1"));
  }

  #[test]
  fn market_orders_are_not_cancellable() {
    let (manager, _peer) = setup();
    manager.submit_market("m1", "ESZ4", "CME", 1, false).unwrap();
    manager.on_new_order_response(&order_response(template::NEW_ORDER_RESPONSE, "m1", "B2"));
    assert!(matches!(manager.submit_cancel("m1"), Err(RithmicError::InvalidOrder(_))));
  }

  #[test]
  fn validation_happens_before_any_frame() {
    let (manager, peer) = setup_with(ReferenceData::new());
    assert!(matches!(manager.submit_market("m1", "ESZ4", "CME", 1, true), Err(RithmicError::NoTradingConfig)));

    let (manager, peer2) = setup();
    assert!(matches!(
      manager.submit_limit("l1", "ESZ4", "EUREX", 1, true, 1.0),
      Err(RithmicError::NoValidTradeRoute(_))
    ));
    manager.submit_limit("l1", "ESZ4", "CME", 1, true, 1.0).unwrap();
    assert!(matches!(manager.submit_limit("l1", "ESZ4", "CME", 1, true, 1.0), Err(RithmicError::InvalidOrder(_))));
    assert!(peer.next_sent(Duration::from_millis(50)).is_none());
    assert_eq!(peer2.drain_sent().iter().filter(|r| r.template_id == template::NEW_ORDER_REQUEST).count(), 1);
  }

  #[test]
  fn failed_send_leaves_ids_free() {
    let reference = ReferenceData::new();
    reference.set_trading_config(test_support::trading_config()).unwrap();
    reference.insert_instrument(test_support::es_future(0.25));
    let session = Arc::new(Session::new(SessionConfig::default()));
    let manager = OrderManager::new(session, Arc::new(reference));

    for _ in 0..2 {
      assert!(matches!(
        manager.submit_limit("l1", "ESZ4", "CME", 1, true, 3990.0),
        Err(RithmicError::NotConnected)
      ));
      assert!(matches!(
        manager.submit_bracket(BracketRequest::new("b1", "ESZ4", "CME", 2, true, 4000.0, 4, 4)),
        Err(RithmicError::NotConnected)
      ));
    }
    assert!(manager.get_order("l1").is_none());
    assert!(manager.get_order("b1").is_none());
    assert!(manager.get_order("b1_stop_loss_0").is_none());
    assert!(manager.get_bracket("b1").is_none());
    assert!(manager.list_orders().is_empty());
  }

  #[test]
  fn fill_with_unusable_size_is_ignored() {
    let (manager, _peer) = setup();
    manager.submit_limit("l1", "ESZ4", "CME", 3, true, 3990.0).unwrap();
    manager.on_new_order_response(&order_response(template::NEW_ORDER_RESPONSE, "l1", "B1"));
    for size in [i64::from(u32::MAX) + 1, -2] {
      manager.on_exchange_notification(
        &exchange(ExchangeNotifyType::Fill, "l1", "B1").with("fill_size", size).with("fill_price", 3990.0),
      );
    }
    let order = manager.get_order("l1").unwrap();
    assert_eq!(order.filled_quantity(), 0);
    assert_eq!(order.status, OrderStatus::Submitted);
  }

  #[test]
  fn fills_and_sticky_terminal_state() {
    let (manager, _peer) = setup();
    let events = Arc::new(Mutex::new(Vec::new()));
    manager.add_observer(Recorder(events.clone()));
    manager.submit_limit("l1", "ESZ4", "CME", 3, true, 3990.0).unwrap();
    manager.on_new_order_response(&order_response(template::NEW_ORDER_RESPONSE, "l1", "B1"));
    manager.on_exchange_notification(&exchange(ExchangeNotifyType::Status, "l1", "B1"));
    assert_eq!(manager.get_order("l1").unwrap().status, OrderStatus::Acknowledged);

    let fill = |size: i64, price: f64| {
      exchange(ExchangeNotifyType::Fill, "l1", "B1").with("fill_size", size).with("fill_price", price)
    };
    manager.on_exchange_notification(&fill(1, 3990.0));
    assert_eq!(manager.get_order("l1").unwrap().status, OrderStatus::Acknowledged);
    manager.on_exchange_notification(&fill(2, 3989.75));
    let order = manager.get_order("l1").unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_quantity(), 3);

    manager.on_exchange_notification(&exchange(ExchangeNotifyType::Cancel, "l1", "B1"));
    assert_eq!(manager.get_order("l1").unwrap().status, OrderStatus::Filled);
    assert!(manager.open_orders().is_empty());

    let events = events.lock();
    assert_eq!(events.iter().filter(|e| e.starts_with("fill:")).count(), 2);
    assert_eq!(events.last().map(String::as_str), Some("update:l1:Filled"));
  }

  #[test]
  fn rithmic_status_strings() {
    let (manager, _peer) = setup();
    manager.submit_limit("l1", "ESZ4", "CME", 1, true, 3990.0).unwrap();
    let notification = |status: &str, reason: &str| {
      Record::new(template::RITHMIC_ORDER_NOTIFICATION)
        .with("user_tag", "l1")
        .with("basket_id", "B1")
        .with("status", status)
        .with("completion_reason", reason)
    };
    manager.on_order_notification(&notification("open pending", ""));
    assert_eq!(manager.get_order("l1").unwrap().status, OrderStatus::Submitted);
    assert_eq!(manager.get_order("l1").unwrap().basket_id.as_deref(), Some("B1"));
    manager.on_order_notification(&notification("open", ""));
    assert_eq!(manager.get_order("l1").unwrap().status, OrderStatus::Acknowledged);
    manager.on_order_notification(&notification("complete", "C"));
    let order = manager.get_order("l1").unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(order.cancelled_at.is_some());
  }

  #[test]
  fn unknown_tags_are_recorded_only() {
    let (manager, _peer) = setup();
    manager.on_exchange_notification(&exchange(ExchangeNotifyType::Fill, "stranger", "X1").with("fill_size", 1i64));
    let updates = manager.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].order_id, None);
    assert_eq!(updates[0].sequence, 1);
    assert!(manager.list_orders().is_empty());
  }

  #[test]
  fn rejected_response_marks_rejected() {
    let (manager, _peer) = setup();
    manager.submit_limit("l1", "ESZ4", "CME", 1, true, 3990.0).unwrap();
    let response = Record::new(template::NEW_ORDER_RESPONSE)
      .with("user_tag", "l1")
      .with("rp_code", vec!["3".to_string(), "bad price".to_string()]);
    manager.on_new_order_response(&response);
    let order = manager.get_order("l1").unwrap();
    assert_eq!(order.status, OrderStatus::Rejected);
    assert_eq!(order.rejection_reason.as_deref(), Some("3, bad price"));
  }

  #[test]
  fn single_leg_amendments() {
    let (manager, peer) = setup();
    manager.submit_bracket(BracketRequest::new("b1", "ESZ4", "CME", 2, true, 4000.0, 4, 4)).unwrap();
    assert!(matches!(manager.amend_stop_loss("b1_stop_loss_0", 3998.0), Err(RithmicError::BasketIdNotYetAssigned(_))));
    manager.on_bracket_order_response(&order_response(template::BRACKET_ORDER_RESPONSE, "b1", "B1"));

    manager.amend_stop_loss("b1_stop_loss_0", 3998.0).unwrap();
    let modify = peer.next_sent_of(template::MODIFY_ORDER_REQUEST, WAIT).unwrap();
    assert_eq!(modify.get_str("basket_id"), Some("B1"));
    assert_eq!(modify.get_float("trigger_price"), Some(3998.0));

    manager.amend_take_profit("b1_take_profit_0", 4002.0).unwrap();
    let modify = peer.next_sent_of(template::MODIFY_ORDER_REQUEST, WAIT).unwrap();
    assert_eq!(modify.get_int("price_type"), Some(1));
    assert_eq!(modify.get_float("price"), Some(4002.0));

    assert!(matches!(manager.amend_stop_loss("b1_take_profit_0", 1.0), Err(RithmicError::InvalidOrder(_))));
  }

  #[test]
  fn bracket_level_update_applies_on_acceptance() {
    let (manager, peer) = setup();
    manager.submit_bracket(BracketRequest::new("b1", "ESZ4", "CME", 2, true, 4000.0, 4, 4)).unwrap();
    manager.on_bracket_order_response(&order_response(template::BRACKET_ORDER_RESPONSE, "b1", "B1"));
    manager.amend_bracket_stop_ticks("b1", 4, 6).unwrap();
    let request = peer.next_sent_of(template::UPDATE_STOP_BRACKET_LEVEL_REQUEST, WAIT).unwrap();
    assert_eq!((request.get_int("level"), request.get_int("stop_ticks")), (Some(4), Some(6)));
    assert_eq!(manager.get_bracket("b1").unwrap().stop_ticks, 4);

    manager.on_command_response(&fixtures::simple_ok(template::UPDATE_STOP_BRACKET_LEVEL_RESPONSE));
    assert_eq!(manager.get_bracket("b1").unwrap().stop_ticks, 6);
  }

  #[test]
  fn cancel_bracket_children_dedupes_shared_basket() {
    let (manager, peer) = setup();
    manager.submit_bracket(BracketRequest::new("b1", "ESZ4", "CME", 2, true, 4000.0, 4, 4)).unwrap();
    manager.on_bracket_order_response(&order_response(template::BRACKET_ORDER_RESPONSE, "b1", "B1"));
    assert_eq!(manager.cancel_bracket_children("b1").unwrap(), 1);
    assert_eq!(peer.next_sent_of(template::CANCEL_ORDER_REQUEST, WAIT).unwrap().get_str("basket_id"), Some("B1"));
    assert!(matches!(manager.cancel_bracket_children("nope"), Err(RithmicError::OrderNotFound(_))));
  }

  #[test]
  fn bracket_summary_tracks_children() {
    let (manager, _peer) = setup();
    manager.submit_bracket(BracketRequest::new("b1", "ESZ4", "CME", 2, true, 4000.0, 4, 4)).unwrap();
    manager.on_bracket_order_response(&order_response(template::BRACKET_ORDER_RESPONSE, "b1", "B1"));
    let summary = manager.bracket_summary("b1").unwrap();
    assert!(summary.is_open);
    assert!(!summary.children_in_market);

    manager.on_exchange_notification(&leg_exchange(ExchangeNotifyType::Status, "b1", "T1", ChildLegType::TakeProfit));
    manager.on_exchange_notification(
      &leg_exchange(ExchangeNotifyType::Fill, "b1", "T1", ChildLegType::TakeProfit).with("fill_size", 2i64).with("fill_price", 4001.0),
    );
    let summary = manager.bracket_summary("b1").unwrap();
    assert_eq!(summary.take_profit_filled_quantity, 2);
    assert!(!summary.is_open);
  }

  #[test]
  fn snapshot_round_trip_and_version_check() {
    let (manager, _peer) = setup();
    manager.submit_bracket(BracketRequest::new("b1", "ESZ4", "CME", 2, true, 4000.0, 4, 4)).unwrap();
    manager.on_bracket_order_response(&order_response(template::BRACKET_ORDER_RESPONSE, "b1", "B1"));

    let text = manager.snapshot().to_json().unwrap();
    let snapshot = OrderBookSnapshot::from_json(&text).unwrap();
    assert_eq!(snapshot.orders.len(), 3);
    assert_eq!(snapshot.updates.len(), 1);

    let (restored, _peer2) = setup();
    restored.restore(snapshot.clone()).unwrap();
    assert_eq!(restored.get_bracket("b1"), manager.get_bracket("b1"));
    assert_eq!(restored.get_order("b1_stop_loss_0"), manager.get_order("b1_stop_loss_0"));
    assert_eq!(restored.resolved_basket_id("b1_take_profit_0").unwrap().as_deref(), Some("B1"));
    // Index rebuilt: a notification on the parent basket finds the parent.
    restored.on_exchange_notification(&exchange(ExchangeNotifyType::Status, "", "B1"));
    assert_eq!(restored.get_order("b1").unwrap().status, OrderStatus::Acknowledged);

    let mut future = snapshot;
    future.version = SNAPSHOT_VERSION + 1;
    assert!(matches!(restored.restore(future), Err(RithmicError::SnapshotError(_))));
  }

  #[test]
  fn generated_ids_are_unique() {
    assert_ne!(OrderManager::generate_order_id(), OrderManager::generate_order_id());
  }
}
