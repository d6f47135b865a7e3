// yarp/src/order_builder.rs
// Builds the request records sent to the order plant. Nothing here touches the network.

use crate::base::RithmicError;
use crate::protocol::{BracketType, OrderDuration, OrderPlacement, PriceType, TransactionType, UserType};
use crate::record::Record;
use crate::reference::TradingConfig;
use crate::session::SessionConfig;
use crate::template::template;
use chrono::{DateTime, Utc};

/// Who an order command is placed for and where it is routed.
#[derive(Debug, Clone, Copy)]
pub struct Routing<'a> {
  pub config: &'a TradingConfig,
  pub account_id: &'a str,
  pub trade_route: &'a str,
}

impl<'a> Routing<'a> {
  /// Primary account and the route for `exchange`.
  pub fn resolve(config: &'a TradingConfig, exchange: &str) -> Result<Self, RithmicError> {
    let account = config.primary_account()?;
    let route = config.trade_route(exchange)?;
    Ok(Routing { config, account_id: &account.account_id, trade_route: &route.trade_route })
  }
}

/// Parameters of a single new order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
  pub order_id: String,
  pub security_code: String,
  pub exchange_code: String,
  pub quantity: u32,
  pub is_buy: bool,
  pub price_type: PriceType,
  pub price: Option<f64>,
  pub trigger_price: Option<f64>,
}

/// Parameters of a bracket: an entry limit order with take-profit and stop-loss groups.
/// Each group is a list of `(quantity, ticks)` legs.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketOrderParams {
  pub order_id: String,
  pub security_code: String,
  pub exchange_code: String,
  pub quantity: u32,
  pub is_buy: bool,
  pub limit_price: f64,
  pub take_profit_legs: Vec<(u32, u32)>,
  pub stop_loss_legs: Vec<(u32, u32)>,
}

/// Parameters of a modify command against an existing basket.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyOrder {
  pub basket_id: String,
  pub security_code: String,
  pub exchange_code: String,
  pub quantity: u32,
  pub price_type: PriceType,
  pub price: Option<f64>,
  pub trigger_price: Option<f64>,
}

fn identity(record: Record, config: &TradingConfig, account_id: &str) -> Record {
  record
    .with("fcm_id", config.fcm_id.as_str())
    .with("ib_id", config.ib_id.as_str())
    .with("account_id", account_id)
}

fn with_opt_price(record: Record, name: &str, value: Option<f64>) -> Record {
  match value {
    Some(v) => record.with(name, v),
    None => record,
  }
}

fn placement() -> i64 {
  OrderPlacement::Manual.into()
}

/// New order (312).
pub fn new_order(routing: &Routing<'_>, order: &NewOrder) -> Record {
  let record = identity(Record::new(template::NEW_ORDER_REQUEST), routing.config, routing.account_id)
    .with("user_tag", order.order_id.as_str())
    .with("symbol", order.security_code.as_str())
    .with("exchange", order.exchange_code.as_str())
    .with("quantity", order.quantity)
    .with("transaction_type", i64::from(TransactionType::from_is_buy(order.is_buy)))
    .with("duration", i64::from(OrderDuration::Day))
    .with("price_type", i64::from(order.price_type))
    .with("trade_route", routing.trade_route)
    .with("manual_or_auto", placement());
  let record = with_opt_price(record, "price", order.price);
  with_opt_price(record, "trigger_price", order.trigger_price)
}

/// Bracket order (330): limit entry with static target and stop legs.
pub fn bracket_order(routing: &Routing<'_>, order: &BracketOrderParams) -> Record {
  let split = |legs: &[(u32, u32)]| -> (Vec<i64>, Vec<i64>) {
    legs.iter().map(|(qty, ticks)| (*qty as i64, *ticks as i64)).unzip()
  };
  let (target_quantity, target_ticks) = split(order.take_profit_legs.as_slice());
  let (stop_quantity, stop_ticks) = split(order.stop_loss_legs.as_slice());

  identity(Record::new(template::BRACKET_ORDER_REQUEST), routing.config, routing.account_id)
    .with("user_tag", order.order_id.as_str())
    .with("symbol", order.security_code.as_str())
    .with("exchange", order.exchange_code.as_str())
    .with("quantity", order.quantity)
    .with("price", order.limit_price)
    .with("transaction_type", i64::from(TransactionType::from_is_buy(order.is_buy)))
    .with("duration", i64::from(OrderDuration::Day))
    .with("bracket_type", i64::from(BracketType::TargetAndStopStatic))
    .with("price_type", i64::from(PriceType::Limit))
    .with("trade_route", routing.trade_route)
    .with("manual_or_auto", placement())
    .with("user_type", i64::from(UserType::Trader))
    .with("target_quantity", target_quantity)
    .with("target_ticks", target_ticks)
    .with("stop_quantity", stop_quantity)
    .with("stop_ticks", stop_ticks)
}

/// Cancel (316).
pub fn cancel_order(config: &TradingConfig, account_id: &str, basket_id: &str) -> Record {
  identity(Record::new(template::CANCEL_ORDER_REQUEST), config, account_id)
    .with("basket_id", basket_id)
    .with("manual_or_auto", placement())
}

/// Modify (314).
pub fn modify_order(config: &TradingConfig, account_id: &str, order: &ModifyOrder) -> Record {
  let record = identity(Record::new(template::MODIFY_ORDER_REQUEST), config, account_id)
    .with("basket_id", order.basket_id.as_str())
    .with("symbol", order.security_code.as_str())
    .with("exchange", order.exchange_code.as_str())
    .with("quantity", order.quantity)
    .with("price_type", i64::from(order.price_type))
    .with("manual_or_auto", placement());
  let record = with_opt_price(record, "price", order.price);
  with_opt_price(record, "trigger_price", order.trigger_price)
}

/// Move every stop leg of a bracket from `level` ticks to `stop_ticks` (334).
pub fn update_stop_bracket_level(
  config: &TradingConfig,
  account_id: &str,
  basket_id: &str,
  level: u32,
  stop_ticks: u32,
) -> Record {
  identity(Record::new(template::UPDATE_STOP_BRACKET_LEVEL_REQUEST), config, account_id)
    .with("basket_id", basket_id)
    .with("level", level)
    .with("stop_ticks", stop_ticks)
}

/// Move every target leg of a bracket from `level` ticks to `target_ticks` (332).
pub fn update_target_bracket_level(
  config: &TradingConfig,
  account_id: &str,
  basket_id: &str,
  level: u32,
  target_ticks: u32,
) -> Record {
  identity(Record::new(template::UPDATE_TARGET_BRACKET_LEVEL_REQUEST), config, account_id)
    .with("basket_id", basket_id)
    .with("level", level)
    .with("target_ticks", target_ticks)
}

// --- Session and reference requests ---

pub fn login(config: &SessionConfig) -> Record {
  Record::new(template::LOGIN_REQUEST)
    .with("template_version", config.template_version.as_str())
    .with("user", config.user.as_str())
    .with("password", config.password.as_str())
    .with("app_name", config.app_name.as_str())
    .with("app_version", config.app_version.as_str())
    .with("system_name", config.system_name.as_str())
    .with("infra_type", i64::from(config.infra_type))
}

pub fn logout() -> Record {
  Record::new(template::LOGOUT_REQUEST)
}

pub fn heartbeat(now: DateTime<Utc>) -> Record {
  Record::new(template::HEARTBEAT_REQUEST)
    .with("ssboe", now.timestamp())
    .with("usecs", now.timestamp_subsec_micros())
}

/// Lists the systems a gateway serves; the only request accepted before login.
pub fn system_info() -> Record {
  Record::new(template::SYSTEM_INFO_REQUEST)
}

pub fn login_info() -> Record {
  Record::new(template::LOGIN_INFO_REQUEST)
}

pub fn account_list(fcm_id: &str, ib_id: &str, user_type: UserType) -> Record {
  Record::new(template::ACCOUNT_LIST_REQUEST)
    .with("fcm_id", fcm_id)
    .with("ib_id", ib_id)
    .with("user_type", i64::from(user_type))
}

pub fn account_rms(fcm_id: &str, ib_id: &str, user_type: UserType) -> Record {
  Record::new(template::ACCOUNT_RMS_INFO_REQUEST)
    .with("fcm_id", fcm_id)
    .with("ib_id", ib_id)
    .with("user_type", i64::from(user_type))
}

pub fn trade_routes() -> Record {
  Record::new(template::TRADE_ROUTES_REQUEST).with("subscribe_for_updates", true)
}

pub fn reference_data(symbol: &str, exchange: &str) -> Record {
  Record::new(template::REFERENCE_DATA_REQUEST)
    .with("symbol", symbol)
    .with("exchange", exchange)
}

pub fn subscribe_order_updates(config: &TradingConfig, account_id: &str) -> Record {
  identity(Record::new(template::SUBSCRIBE_ORDER_UPDATES_REQUEST), config, account_id)
}

pub fn subscribe_bracket_updates(config: &TradingConfig, account_id: &str) -> Record {
  identity(Record::new(template::SUBSCRIBE_BRACKET_UPDATES_REQUEST), config, account_id)
}
