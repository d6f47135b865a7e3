// yarp/src/protocol_encoder.rs
// Encodes canonical records into NUL-delimited payloads following the field tables.

use crate::base::RithmicError;
use crate::record::{FieldValue, Record};
use crate::schema::{self, FieldKind, FieldSpec};
use log::{trace, warn};
use std::io::{Cursor, Write};

pub struct Encoder {
  cursor: Cursor<Vec<u8>>,
  template_id: i32,
}

impl Encoder {
  fn start_encoding(template_id: i32) -> Result<Self, RithmicError> {
    let mut encoder = Encoder { cursor: Cursor::new(Vec::new()), template_id };
    encoder.write_str(&template_id.to_string())?;
    Ok(encoder)
  }

  fn finish_encoding(self) -> Vec<u8> {
    self.cursor.into_inner()
  }

  fn invalid(&self, detail: String) -> RithmicError {
    RithmicError::InvalidParameter(format!("template {}: {}", self.template_id, detail))
  }

  fn write_str(&mut self, s: &str) -> Result<(), RithmicError> {
    if s.as_bytes().contains(&0) {
      return Err(self.invalid(format!("field value contains NUL: {:?}", s)));
    }
    self.cursor.write_all(s.as_bytes()).map_err(|e| RithmicError::InternalError(format!("Buffer write failed: {}", e)))?;
    self.cursor.write_all(&[0]).map_err(|e| RithmicError::InternalError(format!("Buffer write failed: {}", e)))?;
    Ok(())
  }

  fn write_int(&mut self, val: i64) -> Result<(), RithmicError> {
    self.write_str(&val.to_string())
  }

  fn write_double(&mut self, val: f64) -> Result<(), RithmicError> {
    if !val.is_finite() {
      warn!("Attempting to encode non-finite double {} in template {}. Sending empty field.", val, self.template_id);
      return self.write_str("");
    }
    self.write_str(&val.to_string())
  }

  fn write_bool(&mut self, val: bool) -> Result<(), RithmicError> {
    self.write_int(if val { 1 } else { 0 })
  }

  fn write_field(&mut self, spec: &FieldSpec, value: Option<&FieldValue>) -> Result<(), RithmicError> {
    match (spec.kind, value) {
      (FieldKind::Str, None) | (FieldKind::Int, None) | (FieldKind::Float, None) => self.write_str(""),
      (FieldKind::Bool, None) => self.write_bool(false),
      (FieldKind::StrList, None) | (FieldKind::IntList, None) => self.write_int(0),
      (FieldKind::Str, Some(FieldValue::Str(s))) => self.write_str(s),
      (FieldKind::Int, Some(FieldValue::Int(i))) => self.write_int(*i),
      (FieldKind::Float, Some(FieldValue::Float(x))) => self.write_double(*x),
      (FieldKind::Float, Some(FieldValue::Int(i))) => self.write_double(*i as f64),
      (FieldKind::Bool, Some(FieldValue::Bool(b))) => self.write_bool(*b),
      (FieldKind::StrList, Some(FieldValue::StrList(items))) => {
        self.write_int(items.len() as i64)?;
        for item in items {
          self.write_str(item)?;
        }
        Ok(())
      }
      (FieldKind::IntList, Some(FieldValue::IntList(items))) => {
        self.write_int(items.len() as i64)?;
        for item in items {
          self.write_int(*item)?;
        }
        Ok(())
      }
      (kind, Some(other)) => Err(self.invalid(format!("field '{}' expects {:?}, got {:?}", spec.name, kind, other))),
    }
  }
}

/// Encode a record as a payload (without the frame header).
///
/// Fields are written in table order; fields absent from the record are written empty.
/// A record field that the table does not define is rejected.
pub fn encode_record(record: &Record) -> Result<Vec<u8>, RithmicError> {
  let specs = schema::fields_for(record.template_id).ok_or_else(|| {
    RithmicError::InvalidParameter(format!("No field table for template {}", record.template_id))
  })?;

  for (name, _) in record.fields() {
    if !specs.iter().any(|s| s.name == name) {
      return Err(RithmicError::InvalidParameter(format!(
        "template {}: unknown field '{}'", record.template_id, name
      )));
    }
  }

  let mut encoder = Encoder::start_encoding(record.template_id)?;
  for spec in specs {
    encoder.write_field(spec, record.get(spec.name))?;
  }
  let payload = encoder.finish_encoding();
  trace!("Encoded template {} ({} bytes)", record.template_id, payload.len());
  Ok(payload)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::template::template;

  #[test]
  fn encodes_in_table_order_with_defaults() {
    let record = Record::new(template::CANCEL_ORDER_REQUEST)
      .with("basket_id", "B1")
      .with("account_id", "ACC1")
      .with("manual_or_auto", 1i64);
    let payload = encode_record(&record).unwrap();
    // user_msg count, fcm_id, ib_id empty
    assert_eq!(payload, b"316\x000\x00\x00\x00ACC1\x00B1\x001\x00".to_vec());
  }

  #[test]
  fn repeated_fields_are_count_prefixed() {
    let record = Record::new(template::LOGOUT_REQUEST)
      .with("user_msg", vec!["hello".to_string(), "world".to_string()]);
    assert_eq!(encode_record(&record).unwrap(), b"12\x002\x00hello\x00world\x00".to_vec());
  }

  #[test]
  fn rejects_unknown_field_and_type_mismatch() {
    let unknown = Record::new(template::LOGOUT_REQUEST).with("bogus", "x");
    assert!(matches!(encode_record(&unknown), Err(RithmicError::InvalidParameter(_))));

    let mismatch = Record::new(template::CANCEL_ORDER_REQUEST).with("manual_or_auto", "MANUAL");
    assert!(matches!(encode_record(&mismatch), Err(RithmicError::InvalidParameter(_))));
  }

  #[test]
  fn rejects_unknown_template() {
    assert!(encode_record(&Record::new(4242)).is_err());
  }
}
