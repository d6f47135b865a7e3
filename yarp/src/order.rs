// yarp/src/order.rs
// Order data structures tracked by the order manager.

use crate::base::RithmicError;
use crate::protocol::ChildLegType;
use crate::record::Record;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
  Buy,
  Sell,
}

impl OrderSide {
  pub fn from_is_buy(is_buy: bool) -> Self {
    if is_buy { OrderSide::Buy } else { OrderSide::Sell }
  }

  pub fn is_buy(&self) -> bool {
    *self == OrderSide::Buy
  }

  pub fn opposite(&self) -> Self {
    match self {
      OrderSide::Buy => OrderSide::Sell,
      OrderSide::Sell => OrderSide::Buy,
    }
  }
}

impl fmt::Display for OrderSide {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OrderSide::Buy => write!(f, "BUY"),
      OrderSide::Sell => write!(f, "SELL"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
  Market,
  Limit,
  StopLoss,
  TakeProfit,
  Bracket,
}

impl fmt::Display for OrderKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      OrderKind::Market => "MARKET",
      OrderKind::Limit => "LIMIT",
      OrderKind::StopLoss => "STOP_LOSS",
      OrderKind::TakeProfit => "TAKE_PROFIT",
      OrderKind::Bracket => "BRACKET",
    };
    write!(f, "{}", s)
  }
}

impl From<ChildLegType> for OrderKind {
  fn from(kind: ChildLegType) -> Self {
    match kind {
      ChildLegType::StopLoss => OrderKind::StopLoss,
      ChildLegType::TakeProfit => OrderKind::TakeProfit,
    }
  }
}

/// Order status. `Filled`, `Cancelled` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
  Created,
  Submitted,
  Acknowledged,
  Filled,
  Cancelled,
  Rejected,
}

impl OrderStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected)
  }
}

impl fmt::Display for OrderStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      OrderStatus::Created => "Created",
      OrderStatus::Submitted => "Submitted",
      OrderStatus::Acknowledged => "Acknowledged",
      OrderStatus::Filled => "Filled",
      OrderStatus::Cancelled => "Cancelled",
      OrderStatus::Rejected => "Rejected",
    };
    write!(f, "{}", s)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillStatus {
  Unfilled,
  Partial,
  Filled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
  pub fill_id: Option<String>,
  pub price: f64,
  pub quantity: u32,
  pub time: DateTime<Utc>,
}

/// One acknowledged modification of a single order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyEntry {
  pub modify_count: u32,
  pub time: DateTime<Utc>,
  pub old_level: Option<f64>,
  pub new_level: Option<f64>,
}

/// An order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
  pub order_id: String,
  /// Broker-assigned id; set once, never changed afterwards.
  pub basket_id: Option<String>,
  pub security_code: String,
  pub exchange_code: String,
  pub quantity: u32,
  pub side: OrderSide,
  pub kind: OrderKind,
  pub status: OrderStatus,
  pub modify_count: u32,
  pub limit_price: Option<f64>,
  pub trigger_price: Option<f64>,
  /// Set on bracket child legs.
  pub parent_order_id: Option<String>,
  pub fills: Vec<Fill>,
  pub modify_history: Vec<ModifyEntry>,
  pub stop_triggered: bool,
  pub rejection_reason: Option<String>,
  pub acknowledged_at: Option<DateTime<Utc>>,
  pub cancelled_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Order {
  pub fn new(
    order_id: &str,
    security_code: &str,
    exchange_code: &str,
    quantity: u32,
    side: OrderSide,
    kind: OrderKind,
  ) -> Self {
    let now = Utc::now();
    Order {
      order_id: order_id.to_string(),
      basket_id: None,
      security_code: security_code.to_string(),
      exchange_code: exchange_code.to_string(),
      quantity,
      side,
      kind,
      status: OrderStatus::Created,
      modify_count: 0,
      limit_price: None,
      trigger_price: None,
      parent_order_id: None,
      fills: Vec::new(),
      modify_history: Vec::new(),
      stop_triggered: false,
      rejection_reason: None,
      acknowledged_at: None,
      cancelled_at: None,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn filled_quantity(&self) -> u32 {
    self.fills.iter().map(|f| f.quantity).sum()
  }

  pub fn unfilled_quantity(&self) -> u32 {
    self.quantity.saturating_sub(self.filled_quantity())
  }

  pub fn fill_status(&self) -> FillStatus {
    let filled = self.filled_quantity();
    if filled == 0 {
      FillStatus::Unfilled
    } else if filled >= self.quantity {
      FillStatus::Filled
    } else {
      FillStatus::Partial
    }
  }

  /// Quantity-weighted average fill price, `None` without fills.
  pub fn average_fill_price(&self) -> Option<f64> {
    let filled = self.filled_quantity();
    if filled == 0 {
      return None;
    }
    let notional: f64 = self.fills.iter().map(|f| f.price * f.quantity as f64).sum();
    Some(notional / filled as f64)
  }

  pub fn is_open(&self) -> bool {
    !self.status.is_terminal()
  }

  pub fn is_child(&self) -> bool {
    self.parent_order_id.is_some()
  }

  /// The level a modification changes: trigger price for stops, limit price otherwise.
  pub fn modify_level(&self) -> Option<f64> {
    match self.kind {
      OrderKind::StopLoss => self.trigger_price,
      _ => self.limit_price,
    }
  }

  /// Move to `status` unless the order is already terminal. Returns whether it changed.
  pub fn apply_status(&mut self, status: OrderStatus) -> bool {
    if self.status.is_terminal() || self.status == status {
      return false;
    }
    self.status = status;
    self.updated_at = Utc::now();
    true
  }

  /// Assign the broker basket id. Returns false if a different id was already set.
  pub fn assign_basket_id(&mut self, basket_id: &str) -> bool {
    match &self.basket_id {
      Some(existing) => existing == basket_id,
      None => {
        self.basket_id = Some(basket_id.to_string());
        self.updated_at = Utc::now();
        true
      }
    }
  }
}

impl fmt::Display for Order {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} {} {} {} x {}@{} status={} filled={}",
      self.order_id, self.kind, self.side, self.quantity, self.security_code, self.exchange_code,
      self.status, self.filled_quantity()
    )
  }
}

/// One completed bulk amendment of a bracket group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmendmentEntry {
  pub sequence: u32,
  pub timestamp: DateTime<Utc>,
  pub old_value: f64,
  pub new_value: f64,
}

/// Append-only history keyed by sequence number, starting at 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmendmentHistory {
  entries: BTreeMap<u32, AmendmentEntry>,
}

impl AmendmentHistory {
  pub fn last_sequence(&self) -> u32 {
    self.entries.keys().next_back().copied().unwrap_or(0)
  }

  pub fn record(&mut self, old_value: f64, new_value: f64) -> AmendmentEntry {
    let entry = AmendmentEntry {
      sequence: self.last_sequence() + 1,
      timestamp: Utc::now(),
      old_value,
      new_value,
    };
    self.entries.insert(entry.sequence, entry.clone());
    entry
  }

  pub fn get(&self, sequence: u32) -> Option<&AmendmentEntry> {
    self.entries.get(&sequence)
  }

  pub fn latest(&self) -> Option<&AmendmentEntry> {
    self.entries.values().next_back()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &AmendmentEntry> {
    self.entries.values()
  }
}

/// A bracket: the parent order id plus its two child groups. The orders themselves
/// live in the order book under their own ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketOrder {
  pub order_id: String,
  pub target_ticks: u32,
  pub stop_ticks: u32,
  pub tick_multiplier: f64,
  pub stop_loss_price: f64,
  pub take_profit_price: f64,
  pub stop_loss_legs: Vec<String>,
  pub take_profit_legs: Vec<String>,
  pub stop_loss_history: AmendmentHistory,
  pub take_profit_history: AmendmentHistory,
}

impl BracketOrder {
  pub fn legs(&self, kind: ChildLegType) -> &[String] {
    match kind {
      ChildLegType::StopLoss => &self.stop_loss_legs,
      ChildLegType::TakeProfit => &self.take_profit_legs,
    }
  }

  pub fn all_legs(&self) -> impl Iterator<Item = &String> {
    self.stop_loss_legs.iter().chain(self.take_profit_legs.iter())
  }

  pub fn group_price(&self, kind: ChildLegType) -> f64 {
    match kind {
      ChildLegType::StopLoss => self.stop_loss_price,
      ChildLegType::TakeProfit => self.take_profit_price,
    }
  }

  pub fn set_group_price(&mut self, kind: ChildLegType, price: f64) {
    match kind {
      ChildLegType::StopLoss => self.stop_loss_price = price,
      ChildLegType::TakeProfit => self.take_profit_price = price,
    }
  }

  pub fn history(&self, kind: ChildLegType) -> &AmendmentHistory {
    match kind {
      ChildLegType::StopLoss => &self.stop_loss_history,
      ChildLegType::TakeProfit => &self.take_profit_history,
    }
  }

  pub fn history_mut(&mut self, kind: ChildLegType) -> &mut AmendmentHistory {
    match kind {
      ChildLegType::StopLoss => &mut self.stop_loss_history,
      ChildLegType::TakeProfit => &mut self.take_profit_history,
    }
  }

  pub fn child_id(order_id: &str, kind: ChildLegType, index: usize) -> String {
    format!("{}_{}_{}", order_id, kind, index)
  }
}

/// Immutable record of one inbound order-related message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
  pub sequence: u64,
  pub received_at: DateTime<Utc>,
  /// Broker timestamp (ssboe/usecs) when the message carried one.
  pub update_time: Option<DateTime<Utc>>,
  pub template_id: i32,
  /// The order the message was resolved to, if any.
  pub order_id: Option<String>,
  pub record: Record,
}

/// Seconds since epoch plus microseconds, as stamped on broker messages.
pub fn timestamp_from_wire(ssboe: i64, usecs: i64) -> Option<DateTime<Utc>> {
  if ssboe <= 0 {
    return None;
  }
  Utc.timestamp_opt(ssboe, (usecs.clamp(0, 999_999) * 1000) as u32).single()
}

/// Observer trait for order notifications
pub trait OrderObserver: Send + Sync {
  fn on_order_update(&self, order: &Order);

  fn on_fill(&self, _order: &Order, _fill: &Fill) {}

  fn on_order_error(&self, _order_id: &str, _error: &RithmicError) {}
}
