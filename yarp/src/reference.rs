// yarp/src/reference.rs
// Trading configuration and instrument reference data, loaded from the plant and cached.

use crate::base::RithmicError;
use crate::correlator::Correlator;
use crate::order_builder;
use crate::protocol::UserType;
use crate::record::Record;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
  pub account_id: String,
  pub account_name: Option<String>,
  pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRoute {
  pub exchange: String,
  pub trade_route: String,
  pub status: Option<String>,
  pub is_default: bool,
}

/// Identity and routing for order commands. Loaded once after the first login and
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingConfig {
  pub fcm_id: String,
  pub ib_id: String,
  pub user_type: UserType,
  pub accounts: Vec<Account>,
  pub trade_routes: Vec<TradeRoute>,
}

impl TradingConfig {
  /// The account orders are placed against.
  pub fn primary_account(&self) -> Result<&Account, RithmicError> {
    self.accounts.first().ok_or(RithmicError::NoValidTradingAccount)
  }

  /// Route for `exchange`, preferring the one flagged as default.
  pub fn trade_route(&self, exchange: &str) -> Result<&TradeRoute, RithmicError> {
    let mut matching = self.trade_routes.iter().filter(|r| r.exchange == exchange);
    let first = matching.next().ok_or_else(|| RithmicError::NoValidTradeRoute(exchange.to_string()))?;
    if first.is_default {
      return Ok(first);
    }
    Ok(matching.find(|r| r.is_default).unwrap_or(first))
  }
}

/// Reference data for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInfo {
  pub symbol: String,
  pub exchange: String,
  pub symbol_name: Option<String>,
  pub product_code: Option<String>,
  pub instrument_type: Option<String>,
  pub expiration_date: Option<String>,
  pub currency: Option<String>,
  pub point_value: f64,
  /// Minimum price increment; bracket tick offsets are multiples of this.
  pub tick_multiplier: f64,
}

impl InstrumentInfo {
  /// Currency value of one tick.
  pub fn tick_value(&self) -> f64 {
    self.tick_multiplier * self.point_value
  }

  fn from_record(record: &Record) -> Self {
    InstrumentInfo {
      symbol: record.get_str("symbol").unwrap_or_default().to_string(),
      exchange: record.get_str("exchange").unwrap_or_default().to_string(),
      symbol_name: record.get_str("symbol_name").map(str::to_string),
      product_code: record.get_str("product_code").map(str::to_string),
      instrument_type: record.get_str("instrument_type").map(str::to_string),
      expiration_date: record.get_str("expiration_date").map(str::to_string),
      currency: record.get_str("currency").map(str::to_string),
      point_value: record.get_float("single_point_value").unwrap_or(0.0),
      tick_multiplier: record.get_float("min_qprice_change").unwrap_or(0.0),
    }
  }
}

/// Risk limits configured for an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRmsInfo {
  pub account_id: String,
  pub currency: Option<String>,
  pub status: Option<String>,
  pub algorithm: Option<String>,
  pub min_account_balance: f64,
  pub min_margin_balance: f64,
  pub loss_limit: f64,
  pub max_order_quantity: i64,
  pub check_min_account_balance: bool,
}

impl AccountRmsInfo {
  fn from_record(record: &Record) -> Self {
    AccountRmsInfo {
      account_id: record.get_str("account_id").unwrap_or_default().to_string(),
      currency: record.get_str("currency").map(str::to_string),
      status: record.get_str("status").map(str::to_string),
      algorithm: record.get_str("algorithm").map(str::to_string),
      min_account_balance: record.get_float("min_account_balance").unwrap_or(0.0),
      min_margin_balance: record.get_float("min_margin_balance").unwrap_or(0.0),
      loss_limit: record.get_float("loss_limit").unwrap_or(0.0),
      max_order_quantity: record.get_int("max_order_quantity").unwrap_or(0),
      check_min_account_balance: record.get_bool("check_min_account_balance").unwrap_or(false),
    }
  }
}

fn ensure_ok(record: &Record) -> Result<(), RithmicError> {
  if record.rp_code_ok() {
    Ok(())
  } else {
    Err(RithmicError::RequestRejected { template_id: record.template_id, code: record.rp_code_text() })
  }
}

/// Registry injected into the order manager and the client.
#[derive(Default)]
pub struct ReferenceData {
  trading_config: OnceCell<TradingConfig>,
  instruments: RwLock<HashMap<(String, String), InstrumentInfo>>,
  rms: RwLock<Option<AccountRmsInfo>>,
}

impl ReferenceData {
  pub fn new() -> Self {
    Self::default()
  }

  /// Install a config directly. Fails if one is already set.
  pub fn set_trading_config(&self, config: TradingConfig) -> Result<(), RithmicError> {
    self.trading_config
      .set(config)
      .map_err(|_| RithmicError::AlreadyRunning("Trading config already loaded".to_string()))
  }

  pub fn trading_config(&self) -> Result<&TradingConfig, RithmicError> {
    self.trading_config.get().ok_or(RithmicError::NoTradingConfig)
  }

  pub fn has_trading_config(&self) -> bool {
    self.trading_config.get().is_some()
  }

  /// Login info, then the account list, then the trade routes. A no-op when a config
  /// is already loaded.
  pub fn load_trading_config(&self, correlator: &Correlator<'_>, timeout: Duration) -> Result<&TradingConfig, RithmicError> {
    if let Some(config) = self.trading_config.get() {
      return Ok(config);
    }

    let login_info = correlator.request_single(&order_builder::login_info(), timeout)?;
    ensure_ok(&login_info)?;
    let fcm_id = login_info.get_str("fcm_id").unwrap_or_default().to_string();
    let ib_id = login_info.get_str("ib_id").unwrap_or_default().to_string();
    let user_type = login_info
      .get_int("user_type")
      .and_then(|v| UserType::try_from(v).ok())
      .unwrap_or(UserType::Trader);

    let accounts = correlator
      .request_list(&order_builder::account_list(&fcm_id, &ib_id, user_type), timeout)?
      .iter()
      .filter_map(|row| {
        let account_id = row.get_str("account_id")?;
        Some(Account {
          account_id: account_id.to_string(),
          account_name: row.get_str("account_name").map(str::to_string),
          currency: row.get_str("account_currency").map(str::to_string),
        })
      })
      .collect::<Vec<_>>();
    if accounts.is_empty() {
      warn!("No accounts returned for fcm={} ib={}", fcm_id, ib_id);
    }

    let trade_routes = correlator
      .request_list(&order_builder::trade_routes(), timeout)?
      .iter()
      .filter(|row| row.get_str("fcm_id").map_or(true, |f| f == fcm_id))
      .filter_map(|row| {
        Some(TradeRoute {
          exchange: row.get_str("exchange")?.to_string(),
          trade_route: row.get_str("trade_route")?.to_string(),
          status: row.get_str("status").map(str::to_string),
          is_default: row.get_bool("is_default").unwrap_or(false),
        })
      })
      .collect::<Vec<_>>();

    info!(
      "Loaded trading config: fcm={} ib={} accounts={} routes={}",
      fcm_id, ib_id, accounts.len(), trade_routes.len()
    );
    let config = TradingConfig { fcm_id, ib_id, user_type, accounts, trade_routes };
    // A concurrent loader may have won; either way there is exactly one config.
    Ok(self.trading_config.get_or_init(|| config))
  }

  pub fn cached_instrument(&self, symbol: &str, exchange: &str) -> Option<InstrumentInfo> {
    self.instruments.read().get(&(symbol.to_string(), exchange.to_string())).cloned()
  }

  pub fn insert_instrument(&self, info: InstrumentInfo) {
    self.instruments.write().insert((info.symbol.clone(), info.exchange.clone()), info);
  }

  /// Cached reference data, fetched on a miss.
  pub fn instrument(
    &self,
    correlator: &Correlator<'_>,
    symbol: &str,
    exchange: &str,
    timeout: Duration,
  ) -> Result<InstrumentInfo, RithmicError> {
    if let Some(info) = self.cached_instrument(symbol, exchange) {
      return Ok(info);
    }
    debug!("Fetching reference data for {}@{}", symbol, exchange);
    let record = correlator.request_single(&order_builder::reference_data(symbol, exchange), timeout)?;
    ensure_ok(&record)?;
    let mut info = InstrumentInfo::from_record(&record);
    if info.symbol.is_empty() {
      info.symbol = symbol.to_string();
    }
    if info.exchange.is_empty() {
      info.exchange = exchange.to_string();
    }
    self.insert_instrument(info.clone());
    Ok(info)
  }

  pub fn account_rms_info(&self) -> Option<AccountRmsInfo> {
    self.rms.read().clone()
  }

  /// Risk limits for the primary account.
  pub fn fetch_account_rms_info(&self, correlator: &Correlator<'_>, timeout: Duration) -> Result<AccountRmsInfo, RithmicError> {
    let config = self.trading_config()?;
    let request = order_builder::account_rms(&config.fcm_id, &config.ib_id, config.user_type);
    let record = correlator.request_single(&request, timeout)?;
    ensure_ok(&record)?;
    let info = AccountRmsInfo::from_record(&record);
    debug!("RMS info for {}: loss_limit={} max_qty={}", info.account_id, info.loss_limit, info.max_order_quantity);
    *self.rms.write() = Some(info.clone());
    Ok(info)
  }
}

#[cfg(test)]
pub(crate) mod test_support {
  use super::*;

  pub fn trading_config() -> TradingConfig {
    TradingConfig {
      fcm_id: "FCM".to_string(),
      ib_id: "IB".to_string(),
      user_type: UserType::Trader,
      accounts: vec![Account {
        account_id: "ACC1".to_string(),
        account_name: None,
        currency: Some("USD".to_string()),
      }],
      trade_routes: vec![TradeRoute {
        exchange: "CME".to_string(),
        trade_route: "globex".to_string(),
        status: Some("UP".to_string()),
        is_default: true,
      }],
    }
  }

  pub fn es_future(tick: f64) -> InstrumentInfo {
    InstrumentInfo {
      symbol: "ESZ4".to_string(),
      exchange: "CME".to_string(),
      symbol_name: None,
      product_code: Some("ES".to_string()),
      instrument_type: Some("Future".to_string()),
      expiration_date: None,
      currency: Some("USD".to_string()),
      point_value: 50.0,
      tick_multiplier: tick,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::conn_mock::{fixtures, mock_pair};
  use crate::session::{Session, SessionConfig};
  use crate::template::template;

  fn route(exchange: &str, name: &str, is_default: bool) -> TradeRoute {
    TradeRoute { exchange: exchange.to_string(), trade_route: name.to_string(), status: None, is_default }
  }

  #[test]
  fn trade_route_prefers_default() {
    let mut config = test_support::trading_config();
    config.trade_routes = vec![route("CME", "a", false), route("CME", "b", true), route("NYMEX", "c", false)];
    assert_eq!(config.trade_route("CME").unwrap().trade_route, "b");
    assert_eq!(config.trade_route("NYMEX").unwrap().trade_route, "c");
    assert!(matches!(config.trade_route("EUREX"), Err(RithmicError::NoValidTradeRoute(_))));
  }

  #[test]
  fn missing_config_and_account() {
    let reference = ReferenceData::new();
    assert!(matches!(reference.trading_config(), Err(RithmicError::NoTradingConfig)));
    let mut config = test_support::trading_config();
    config.accounts.clear();
    assert!(matches!(config.primary_account(), Err(RithmicError::NoValidTradingAccount)));
    reference.set_trading_config(config).unwrap();
    assert!(reference.set_trading_config(test_support::trading_config()).is_err());
  }

  #[test]
  fn tick_value() {
    assert_eq!(test_support::es_future(0.25).tick_value(), 12.5);
  }

  #[test]
  fn loads_config_and_caches_instruments() {
    let (transport, peer) = mock_pair();
    peer.push(&fixtures::login_response("0")).unwrap();
    let session = Session::new(SessionConfig { logout_timeout_ms: 100, ..SessionConfig::default() });
    session.connect(transport).unwrap();

    let responder = peer.spawn_responder(|request| match request.template_id {
      template::LOGIN_INFO_REQUEST => vec![fixtures::login_info_response()],
      template::ACCOUNT_LIST_REQUEST => vec![
        fixtures::account_row("ACC1"),
        fixtures::account_row("ACC2"),
        fixtures::list_end(template::ACCOUNT_LIST_RESPONSE),
      ],
      template::TRADE_ROUTES_REQUEST => vec![
        fixtures::trade_route_row("CME", "globex"),
        fixtures::list_end(template::TRADE_ROUTES_RESPONSE),
      ],
      template::REFERENCE_DATA_REQUEST => vec![fixtures::reference_data("ESZ4", "CME", 0.25)],
      template::ACCOUNT_RMS_INFO_REQUEST => vec![fixtures::rms_info("ACC1")],
      _ => Vec::new(),
    });

    let reference = ReferenceData::new();
    let correlator = Correlator::new(&session);
    let timeout = Duration::from_secs(2);
    let config = reference.load_trading_config(&correlator, timeout).unwrap();
    assert_eq!(config.fcm_id, "FCM");
    assert_eq!(config.user_type, UserType::Trader);
    assert_eq!(config.primary_account().unwrap().account_id, "ACC1");
    assert_eq!(config.accounts.len(), 2);
    assert_eq!(config.trade_route("CME").unwrap().trade_route, "globex");

    let es = reference.instrument(&correlator, "ESZ4", "CME", timeout).unwrap();
    assert_eq!(es.tick_multiplier, 0.25);
    assert!(reference.cached_instrument("ESZ4", "CME").is_some());

    let rms = reference.fetch_account_rms_info(&correlator, timeout).unwrap();
    assert_eq!(rms.max_order_quantity, 20);
    assert_eq!(reference.account_rms_info(), Some(rms));

    drop(session);
    responder.join().unwrap();
  }
}
