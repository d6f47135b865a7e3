// yarp/src/template.rs
// Message-type (template) ids used on the order plant.

/// Template ids. Requests are even, their responses are the next odd id.
#[allow(dead_code)]
pub mod template {
  pub const LOGIN_REQUEST: i32 = 10;
  pub const LOGIN_RESPONSE: i32 = 11;
  pub const LOGOUT_REQUEST: i32 = 12;
  pub const LOGOUT_RESPONSE: i32 = 13;
  pub const REFERENCE_DATA_REQUEST: i32 = 14;
  pub const REFERENCE_DATA_RESPONSE: i32 = 15;
  pub const SYSTEM_INFO_REQUEST: i32 = 16;
  pub const SYSTEM_INFO_RESPONSE: i32 = 17;
  pub const HEARTBEAT_REQUEST: i32 = 18;
  pub const HEARTBEAT_RESPONSE: i32 = 19;

  pub const LOGIN_INFO_REQUEST: i32 = 300;
  pub const LOGIN_INFO_RESPONSE: i32 = 301;
  pub const ACCOUNT_LIST_REQUEST: i32 = 302;
  pub const ACCOUNT_LIST_RESPONSE: i32 = 303;
  pub const ACCOUNT_RMS_INFO_REQUEST: i32 = 304;
  pub const ACCOUNT_RMS_INFO_RESPONSE: i32 = 305;
  pub const SUBSCRIBE_ORDER_UPDATES_REQUEST: i32 = 308;
  pub const SUBSCRIBE_ORDER_UPDATES_RESPONSE: i32 = 309;
  pub const TRADE_ROUTES_REQUEST: i32 = 310;
  pub const TRADE_ROUTES_RESPONSE: i32 = 311;
  pub const NEW_ORDER_REQUEST: i32 = 312;
  pub const NEW_ORDER_RESPONSE: i32 = 313;
  pub const MODIFY_ORDER_REQUEST: i32 = 314;
  pub const MODIFY_ORDER_RESPONSE: i32 = 315;
  pub const CANCEL_ORDER_REQUEST: i32 = 316;
  pub const CANCEL_ORDER_RESPONSE: i32 = 317;
  pub const BRACKET_ORDER_REQUEST: i32 = 330;
  pub const BRACKET_ORDER_RESPONSE: i32 = 331;
  pub const UPDATE_TARGET_BRACKET_LEVEL_REQUEST: i32 = 332;
  pub const UPDATE_TARGET_BRACKET_LEVEL_RESPONSE: i32 = 333;
  pub const UPDATE_STOP_BRACKET_LEVEL_REQUEST: i32 = 334;
  pub const UPDATE_STOP_BRACKET_LEVEL_RESPONSE: i32 = 335;
  pub const SUBSCRIBE_BRACKET_UPDATES_REQUEST: i32 = 336;
  pub const SUBSCRIBE_BRACKET_UPDATES_RESPONSE: i32 = 337;

  pub const TRADE_ROUTE: i32 = 350;
  pub const RITHMIC_ORDER_NOTIFICATION: i32 = 351;
  pub const EXCHANGE_ORDER_NOTIFICATION: i32 = 352;

  /// The response template a request template is answered with.
  pub fn response_for(request: i32) -> i32 {
    request + 1
  }

  /// Human readable name, used by the frame logger and in log lines.
  pub fn name(id: i32) -> Option<&'static str> {
    let n = match id {
      LOGIN_REQUEST => "REQUEST_LOGIN",
      LOGIN_RESPONSE => "RESPONSE_LOGIN",
      LOGOUT_REQUEST => "REQUEST_LOGOUT",
      LOGOUT_RESPONSE => "RESPONSE_LOGOUT",
      REFERENCE_DATA_REQUEST => "REQUEST_REFERENCE_DATA",
      REFERENCE_DATA_RESPONSE => "RESPONSE_REFERENCE_DATA",
      SYSTEM_INFO_REQUEST => "REQUEST_RITHMIC_SYSTEM_INFO",
      SYSTEM_INFO_RESPONSE => "RESPONSE_RITHMIC_SYSTEM_INFO",
      HEARTBEAT_REQUEST => "REQUEST_HEARTBEAT",
      HEARTBEAT_RESPONSE => "RESPONSE_HEARTBEAT",
      LOGIN_INFO_REQUEST => "REQUEST_LOGIN_INFO",
      LOGIN_INFO_RESPONSE => "RESPONSE_LOGIN_INFO",
      ACCOUNT_LIST_REQUEST => "REQUEST_ACCOUNT_LIST",
      ACCOUNT_LIST_RESPONSE => "RESPONSE_ACCOUNT_LIST",
      ACCOUNT_RMS_INFO_REQUEST => "REQUEST_ACCOUNT_RMS_INFO",
      ACCOUNT_RMS_INFO_RESPONSE => "RESPONSE_ACCOUNT_RMS_INFO",
      SUBSCRIBE_ORDER_UPDATES_REQUEST => "REQUEST_SUBSCRIBE_FOR_ORDER_UPDATES",
      SUBSCRIBE_ORDER_UPDATES_RESPONSE => "RESPONSE_SUBSCRIBE_FOR_ORDER_UPDATES",
      TRADE_ROUTES_REQUEST => "REQUEST_TRADE_ROUTES",
      TRADE_ROUTES_RESPONSE => "RESPONSE_TRADE_ROUTES",
      NEW_ORDER_REQUEST => "REQUEST_NEW_ORDER",
      NEW_ORDER_RESPONSE => "RESPONSE_NEW_ORDER",
      MODIFY_ORDER_REQUEST => "REQUEST_MODIFY_ORDER",
      MODIFY_ORDER_RESPONSE => "RESPONSE_MODIFY_ORDER",
      CANCEL_ORDER_REQUEST => "REQUEST_CANCEL_ORDER",
      CANCEL_ORDER_RESPONSE => "RESPONSE_CANCEL_ORDER",
      BRACKET_ORDER_REQUEST => "REQUEST_BRACKET_ORDER",
      BRACKET_ORDER_RESPONSE => "RESPONSE_BRACKET_ORDER",
      UPDATE_TARGET_BRACKET_LEVEL_REQUEST => "REQUEST_UPDATE_TARGET_BRACKET_LEVEL",
      UPDATE_TARGET_BRACKET_LEVEL_RESPONSE => "RESPONSE_UPDATE_TARGET_BRACKET_LEVEL",
      UPDATE_STOP_BRACKET_LEVEL_REQUEST => "REQUEST_UPDATE_STOP_BRACKET_LEVEL",
      UPDATE_STOP_BRACKET_LEVEL_RESPONSE => "RESPONSE_UPDATE_STOP_BRACKET_LEVEL",
      SUBSCRIBE_BRACKET_UPDATES_REQUEST => "REQUEST_SUBSCRIBE_TO_BRACKET_UPDATES",
      SUBSCRIBE_BRACKET_UPDATES_RESPONSE => "RESPONSE_SUBSCRIBE_TO_BRACKET_UPDATES",
      TRADE_ROUTE => "TRADE_ROUTE",
      RITHMIC_ORDER_NOTIFICATION => "RITHMIC_ORDER_NOTIFICATION",
      EXCHANGE_ORDER_NOTIFICATION => "EXCHANGE_ORDER_NOTIFICATION",
      _ => return None,
    };
    Some(n)
  }
}
