// yarp/src/protocol.rs
// Enumerated wire values carried in order plant messages.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which plant a login targets. Only the order plant is driven by this crate,
/// the others are accepted so a config can name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize)]
#[repr(i64)]
pub enum InfraType {
  TickerPlant = 1,
  OrderPlant = 2,
  HistoryPlant = 3,
  PnlPlant = 4,
  RepositoryPlant = 5,
}

impl Default for InfraType {
  fn default() -> Self {
    InfraType::OrderPlant
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize)]
#[repr(i64)]
pub enum UserType {
  Admin = 0,
  Fcm = 1,
  Ib = 2,
  Trader = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize)]
#[repr(i64)]
pub enum TransactionType {
  Buy = 1,
  Sell = 2,
}

impl TransactionType {
  pub fn from_is_buy(is_buy: bool) -> Self {
    if is_buy { TransactionType::Buy } else { TransactionType::Sell }
  }
}

impl fmt::Display for TransactionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TransactionType::Buy => write!(f, "BUY"),
      TransactionType::Sell => write!(f, "SELL"),
    }
  }
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize)]
#[repr(i64)]
pub enum OrderDuration {
  Day = 1,
  Gtc = 2,
  Ioc = 3,
  Fok = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize)]
#[repr(i64)]
pub enum PriceType {
  Limit = 1,
  Market = 2,
  StopLimit = 3,
  StopMarket = 4,
}

impl fmt::Display for PriceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      PriceType::Limit => "LIMIT",
      PriceType::Market => "MARKET",
      PriceType::StopLimit => "STOP_LIMIT",
      PriceType::StopMarket => "STOP_MARKET",
    };
    write!(f, "{}", s)
  }
}

/// Manual or automated order entry flag required on every order command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize)]
#[repr(i64)]
pub enum OrderPlacement {
  Manual = 1,
  Auto = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize)]
#[repr(i64)]
pub enum BracketType {
  StopOnly = 1,
  TargetOnly = 2,
  TargetAndStop = 3,
  StopOnlyStatic = 4,
  TargetOnlyStatic = 5,
  TargetAndStopStatic = 6,
}

/// Kind of an exchange order notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize)]
#[repr(i64)]
pub enum ExchangeNotifyType {
  Status = 1,
  Modify = 2,
  Cancel = 3,
  Trigger = 4,
  Fill = 5,
  Reject = 6,
  NotModified = 7,
  NotCancelled = 8,
  Generic = 9,
}

/// Which child group of a bracket a notification refers to, as carried in the
/// `bracket_type` field of order notifications for child legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChildLegType {
  TakeProfit,
  StopLoss,
}

impl ChildLegType {
  pub fn from_wire(value: i64) -> Option<Self> {
    match value {
      1 => Some(ChildLegType::TakeProfit),
      4 => Some(ChildLegType::StopLoss),
      _ => None,
    }
  }

  pub fn to_wire(self) -> i64 {
    match self {
      ChildLegType::TakeProfit => 1,
      ChildLegType::StopLoss => 4,
    }
  }
}

impl fmt::Display for ChildLegType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChildLegType::TakeProfit => write!(f, "take_profit"),
      ChildLegType::StopLoss => write!(f, "stop_loss"),
    }
  }
}
