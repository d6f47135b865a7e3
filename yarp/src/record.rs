// yarp/src/record.rs
// Canonical, schema-agnostic representation of one decoded message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
  StrList(Vec<String>),
  IntList(Vec<i64>),
}

impl From<&str> for FieldValue {
  fn from(v: &str) -> Self { FieldValue::Str(v.to_string()) }
}

impl From<String> for FieldValue {
  fn from(v: String) -> Self { FieldValue::Str(v) }
}

impl From<i64> for FieldValue {
  fn from(v: i64) -> Self { FieldValue::Int(v) }
}

impl From<u32> for FieldValue {
  fn from(v: u32) -> Self { FieldValue::Int(v as i64) }
}

impl From<f64> for FieldValue {
  fn from(v: f64) -> Self { FieldValue::Float(v) }
}

impl From<bool> for FieldValue {
  fn from(v: bool) -> Self { FieldValue::Bool(v) }
}

impl From<Vec<String>> for FieldValue {
  fn from(v: Vec<String>) -> Self { FieldValue::StrList(v) }
}

impl From<Vec<i64>> for FieldValue {
  fn from(v: Vec<i64>) -> Self { FieldValue::IntList(v) }
}

impl fmt::Display for FieldValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FieldValue::Bool(b) => write!(f, "{}", b),
      FieldValue::Int(i) => write!(f, "{}", i),
      FieldValue::Float(x) => write!(f, "{}", x),
      FieldValue::Str(s) => write!(f, "{}", s),
      FieldValue::StrList(items) => write!(f, "[{}]", items.join(", ")),
      FieldValue::IntList(items) => {
        let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
      }
    }
  }
}

/// An ordered mapping from field name to value, tagged with its template id.
///
/// Records are what the dispatcher hands to handlers and user callbacks, and what the
/// command builder produces for the encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub template_id: i32,
  fields: Vec<(String, FieldValue)>,
}

impl Record {
  pub fn new(template_id: i32) -> Self {
    Record { template_id, fields: Vec::new() }
  }

  /// Builder-style setter. Replaces an existing value of the same name in place.
  pub fn with<V: Into<FieldValue>>(mut self, name: &str, value: V) -> Self {
    self.set(name, value);
    self
  }

  pub fn set<V: Into<FieldValue>>(&mut self, name: &str, value: V) {
    let value = value.into();
    if let Some(slot) = self.fields.iter_mut().find(|(n, _)| n == name) {
      slot.1 = value;
    } else {
      self.fields.push((name.to_string(), value));
    }
  }

  pub fn get(&self, name: &str) -> Option<&FieldValue> {
    self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
  }

  pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
    self.fields.iter().map(|(n, v)| (n.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  /// String field, `None` when absent or empty.
  pub fn get_str(&self, name: &str) -> Option<&str> {
    match self.get(name) {
      Some(FieldValue::Str(s)) if !s.is_empty() => Some(s.as_str()),
      _ => None,
    }
  }

  pub fn get_int(&self, name: &str) -> Option<i64> {
    match self.get(name) {
      Some(FieldValue::Int(i)) => Some(*i),
      _ => None,
    }
  }

  pub fn get_float(&self, name: &str) -> Option<f64> {
    match self.get(name) {
      Some(FieldValue::Float(x)) => Some(*x),
      Some(FieldValue::Int(i)) => Some(*i as f64),
      _ => None,
    }
  }

  pub fn get_bool(&self, name: &str) -> Option<bool> {
    match self.get(name) {
      Some(FieldValue::Bool(b)) => Some(*b),
      _ => None,
    }
  }

  pub fn get_str_list(&self, name: &str) -> &[String] {
    match self.get(name) {
      Some(FieldValue::StrList(items)) => items.as_slice(),
      _ => &[],
    }
  }

  pub fn get_int_list(&self, name: &str) -> &[i64] {
    match self.get(name) {
      Some(FieldValue::IntList(items)) => items.as_slice(),
      _ => &[],
    }
  }

  /// The repeated response code carried by responses. Empty for streamed data rows.
  pub fn rp_code(&self) -> &[String] {
    self.get_str_list("rp_code")
  }

  /// True when the response code signals success (first element starts with `0`).
  pub fn rp_code_ok(&self) -> bool {
    self.rp_code().first().map(|c| c.starts_with('0')).unwrap_or(false)
  }

  /// Response code joined for error messages.
  pub fn rp_code_text(&self) -> String {
    self.rp_code().join(", ")
  }
}

impl fmt::Display for Record {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}]", self.template_id)?;
    for (name, value) in &self.fields {
      write!(f, " {}={}", name, value)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_replaces_in_place() {
    let mut r = Record::new(312).with("symbol", "ESZ4").with("quantity", 2i64);
    r.set("symbol", "NQZ4");
    let names: Vec<&str> = r.fields().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["symbol", "quantity"]);
    assert_eq!(r.get_str("symbol"), Some("NQZ4"));
  }

  #[test]
  fn rp_code_semantics() {
    let ok = Record::new(11).with("rp_code", vec!["0".to_string()]);
    assert!(ok.rp_code_ok());

    let failed = Record::new(11).with("rp_code", vec!["7".to_string(), "an error occurred".to_string()]);
    assert!(!failed.rp_code_ok());
    assert_eq!(failed.rp_code_text(), "7, an error occurred");

    let row = Record::new(303);
    assert!(row.rp_code().is_empty());
    assert!(!row.rp_code_ok());
  }

  #[test]
  fn empty_string_reads_as_absent() {
    let r = Record::new(351).with("basket_id", "");
    assert_eq!(r.get_str("basket_id"), None);
  }
}
