// yarp/src/schema.rs
// Positional field tables: the versioned wire contract for every template this client
// sends or understands.

use crate::template::template::*;

/// Version of the field tables below. Bumped whenever a table changes shape.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
  Str,
  Int,
  Float,
  Bool,
  /// Count-prefixed repeated string.
  StrList,
  /// Count-prefixed repeated integer.
  IntList,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
  pub name: &'static str,
  pub kind: FieldKind,
}

const fn f(name: &'static str, kind: FieldKind) -> FieldSpec {
  FieldSpec { name, kind }
}

use FieldKind::*;

const LOGIN_REQUEST_FIELDS: &[FieldSpec] = &[
  f("template_version", Str),
  f("user_msg", StrList),
  f("user", Str),
  f("password", Str),
  f("app_name", Str),
  f("app_version", Str),
  f("system_name", Str),
  f("infra_type", Int),
];

const LOGIN_RESPONSE_FIELDS: &[FieldSpec] = &[
  f("template_version", Str),
  f("user_msg", StrList),
  f("rp_code", StrList),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("country_code", Str),
  f("state_code", Str),
  f("unique_user_id", Str),
  f("heartbeat_interval", Float),
];

const LOGOUT_REQUEST_FIELDS: &[FieldSpec] = &[f("user_msg", StrList)];

const SIMPLE_RESPONSE_FIELDS: &[FieldSpec] = &[f("user_msg", StrList), f("rp_code", StrList)];

const REFERENCE_DATA_REQUEST_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("symbol", Str),
  f("exchange", Str),
];

const REFERENCE_DATA_RESPONSE_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("rp_code", StrList),
  f("symbol", Str),
  f("exchange", Str),
  f("symbol_name", Str),
  f("product_code", Str),
  f("instrument_type", Str),
  f("expiration_date", Str),
  f("currency", Str),
  f("single_point_value", Float),
  f("min_qprice_change", Float),
];

const SYSTEM_INFO_REQUEST_FIELDS: &[FieldSpec] = &[f("user_msg", StrList)];

/// Answered before login; one entry per system the gateway serves.
const SYSTEM_INFO_RESPONSE_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("rp_code", StrList),
  f("system_name", StrList),
];

const HEARTBEAT_REQUEST_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("ssboe", Int),
  f("usecs", Int),
];

const HEARTBEAT_RESPONSE_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("rp_code", StrList),
  f("ssboe", Int),
  f("usecs", Int),
];

const LOGIN_INFO_REQUEST_FIELDS: &[FieldSpec] = &[f("user_msg", StrList)];

const LOGIN_INFO_RESPONSE_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("rp_code", StrList),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("first_name", Str),
  f("last_name", Str),
  f("user_type", Int),
];

const ACCOUNT_REQUEST_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("user_type", Int),
];

const ACCOUNT_LIST_RESPONSE_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("rq_handler_rp_code", StrList),
  f("rp_code", StrList),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("account_id", Str),
  f("account_name", Str),
  f("account_currency", Str),
];

const ACCOUNT_RMS_INFO_RESPONSE_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("rq_handler_rp_code", StrList),
  f("rp_code", StrList),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("account_id", Str),
  f("currency", Str),
  f("status", Str),
  f("algorithm", Str),
  f("min_account_balance", Float),
  f("min_margin_balance", Float),
  f("loss_limit", Float),
  f("max_order_quantity", Int),
  f("check_min_account_balance", Bool),
];

const ACCOUNT_SUBSCRIPTION_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("account_id", Str),
];

const TRADE_ROUTES_REQUEST_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("subscribe_for_updates", Bool),
];

const TRADE_ROUTES_RESPONSE_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("rq_handler_rp_code", StrList),
  f("rp_code", StrList),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("exchange", Str),
  f("trade_route", Str),
  f("status", Str),
  f("is_default", Bool),
];

const NEW_ORDER_REQUEST_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("user_tag", Str),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("account_id", Str),
  f("symbol", Str),
  f("exchange", Str),
  f("quantity", Int),
  f("price", Float),
  f("trigger_price", Float),
  f("transaction_type", Int),
  f("duration", Int),
  f("price_type", Int),
  f("trade_route", Str),
  f("manual_or_auto", Int),
];

const ORDER_COMMAND_RESPONSE_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("user_tag", Str),
  f("rq_handler_rp_code", StrList),
  f("rp_code", StrList),
  f("basket_id", Str),
  f("ssboe", Int),
  f("usecs", Int),
];

const MODIFY_ORDER_REQUEST_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("account_id", Str),
  f("basket_id", Str),
  f("symbol", Str),
  f("exchange", Str),
  f("quantity", Int),
  f("price", Float),
  f("trigger_price", Float),
  f("price_type", Int),
  f("manual_or_auto", Int),
];

const CANCEL_ORDER_REQUEST_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("account_id", Str),
  f("basket_id", Str),
  f("manual_or_auto", Int),
];

const BRACKET_ORDER_REQUEST_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("user_tag", Str),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("account_id", Str),
  f("symbol", Str),
  f("exchange", Str),
  f("quantity", Int),
  f("price", Float),
  f("transaction_type", Int),
  f("duration", Int),
  f("bracket_type", Int),
  f("price_type", Int),
  f("trade_route", Str),
  f("manual_or_auto", Int),
  f("user_type", Int),
  f("target_quantity", IntList),
  f("target_ticks", IntList),
  f("stop_quantity", IntList),
  f("stop_ticks", IntList),
];

const UPDATE_TARGET_LEVEL_REQUEST_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("account_id", Str),
  f("basket_id", Str),
  f("level", Int),
  f("target_ticks", Int),
];

const UPDATE_STOP_LEVEL_REQUEST_FIELDS: &[FieldSpec] = &[
  f("user_msg", StrList),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("account_id", Str),
  f("basket_id", Str),
  f("level", Int),
  f("stop_ticks", Int),
];

const TRADE_ROUTE_FIELDS: &[FieldSpec] = &[
  f("fcm_id", Str),
  f("ib_id", Str),
  f("exchange", Str),
  f("trade_route", Str),
  f("status", Str),
  f("is_default", Bool),
];

const RITHMIC_ORDER_NOTIFICATION_FIELDS: &[FieldSpec] = &[
  f("user_tag", Str),
  f("notify_type", Int),
  f("is_snapshot", Bool),
  f("status", Str),
  f("basket_id", Str),
  f("original_basket_id", Str),
  f("fcm_id", Str),
  f("ib_id", Str),
  f("account_id", Str),
  f("symbol", Str),
  f("exchange", Str),
  f("trade_route", Str),
  f("quantity", Int),
  f("price", Float),
  f("trigger_price", Float),
  f("transaction_type", Int),
  f("price_type", Int),
  f("bracket_type", Int),
  f("completion_reason", Str),
  f("text", Str),
  f("ssboe", Int),
  f("usecs", Int),
];

const EXCHANGE_ORDER_NOTIFICATION_FIELDS: &[FieldSpec] = &[
  f("user_tag", Str),
  f("notify_type", Int),
  f("is_snapshot", Bool),
  f("report_type", Str),
  f("status", Str),
  f("basket_id", Str),
  f("original_basket_id", Str),
  f("symbol", Str),
  f("exchange", Str),
  f("quantity", Int),
  f("price", Float),
  f("trigger_price", Float),
  f("transaction_type", Int),
  f("price_type", Int),
  f("bracket_type", Int),
  f("confirmed_size", Int),
  f("fill_price", Float),
  f("fill_size", Int),
  f("fill_id", Str),
  f("text", Str),
  f("ssboe", Int),
  f("usecs", Int),
];

/// Field table for a template id, or `None` if this client does not know it.
pub fn fields_for(template_id: i32) -> Option<&'static [FieldSpec]> {
  let fields = match template_id {
    LOGIN_REQUEST => LOGIN_REQUEST_FIELDS,
    LOGIN_RESPONSE => LOGIN_RESPONSE_FIELDS,
    LOGOUT_REQUEST => LOGOUT_REQUEST_FIELDS,
    LOGOUT_RESPONSE => SIMPLE_RESPONSE_FIELDS,
    REFERENCE_DATA_REQUEST => REFERENCE_DATA_REQUEST_FIELDS,
    REFERENCE_DATA_RESPONSE => REFERENCE_DATA_RESPONSE_FIELDS,
    SYSTEM_INFO_REQUEST => SYSTEM_INFO_REQUEST_FIELDS,
    SYSTEM_INFO_RESPONSE => SYSTEM_INFO_RESPONSE_FIELDS,
    HEARTBEAT_REQUEST => HEARTBEAT_REQUEST_FIELDS,
    HEARTBEAT_RESPONSE => HEARTBEAT_RESPONSE_FIELDS,
    LOGIN_INFO_REQUEST => LOGIN_INFO_REQUEST_FIELDS,
    LOGIN_INFO_RESPONSE => LOGIN_INFO_RESPONSE_FIELDS,
    ACCOUNT_LIST_REQUEST | ACCOUNT_RMS_INFO_REQUEST => ACCOUNT_REQUEST_FIELDS,
    ACCOUNT_LIST_RESPONSE => ACCOUNT_LIST_RESPONSE_FIELDS,
    ACCOUNT_RMS_INFO_RESPONSE => ACCOUNT_RMS_INFO_RESPONSE_FIELDS,
    SUBSCRIBE_ORDER_UPDATES_REQUEST | SUBSCRIBE_BRACKET_UPDATES_REQUEST => ACCOUNT_SUBSCRIPTION_FIELDS,
    SUBSCRIBE_ORDER_UPDATES_RESPONSE
    | SUBSCRIBE_BRACKET_UPDATES_RESPONSE
    | UPDATE_TARGET_BRACKET_LEVEL_RESPONSE
    | UPDATE_STOP_BRACKET_LEVEL_RESPONSE => SIMPLE_RESPONSE_FIELDS,
    TRADE_ROUTES_REQUEST => TRADE_ROUTES_REQUEST_FIELDS,
    TRADE_ROUTES_RESPONSE => TRADE_ROUTES_RESPONSE_FIELDS,
    NEW_ORDER_REQUEST => NEW_ORDER_REQUEST_FIELDS,
    NEW_ORDER_RESPONSE
    | MODIFY_ORDER_RESPONSE
    | CANCEL_ORDER_RESPONSE
    | BRACKET_ORDER_RESPONSE => ORDER_COMMAND_RESPONSE_FIELDS,
    MODIFY_ORDER_REQUEST => MODIFY_ORDER_REQUEST_FIELDS,
    CANCEL_ORDER_REQUEST => CANCEL_ORDER_REQUEST_FIELDS,
    BRACKET_ORDER_REQUEST => BRACKET_ORDER_REQUEST_FIELDS,
    UPDATE_TARGET_BRACKET_LEVEL_REQUEST => UPDATE_TARGET_LEVEL_REQUEST_FIELDS,
    UPDATE_STOP_BRACKET_LEVEL_REQUEST => UPDATE_STOP_LEVEL_REQUEST_FIELDS,
    TRADE_ROUTE => TRADE_ROUTE_FIELDS,
    RITHMIC_ORDER_NOTIFICATION => RITHMIC_ORDER_NOTIFICATION_FIELDS,
    EXCHANGE_ORDER_NOTIFICATION => EXCHANGE_ORDER_NOTIFICATION_FIELDS,
    _ => return None,
  };
  Some(fields)
}
