// yarp/src/protocol_dec_parser.rs
// Cursor over the NUL-terminated fields of a payload.

use crate::base::RithmicError;

pub struct FieldParser<'a> {
  data: &'a [u8],
  fields: Vec<(usize, usize)>, // (start, end) indices for each field
  current_field: usize,
  template_id: i32,
}

impl<'a> FieldParser<'a> {
  /// Create a new field parser
  pub fn new(data: &'a [u8]) -> Self {
    let mut parser = Self {
      data,
      fields: Vec::new(),
      current_field: 0,
      template_id: 0,
    };

    // Pre-parse all fields
    parser.parse_fields();

    parser
  }

  /// Parse all fields in the message. Bytes after the last NUL are not a field.
  fn parse_fields(&mut self) {
    let mut start = 0;

    for i in 0..self.data.len() {
      if self.data[i] == 0 {
        self.fields.push((start, i));
        start = i + 1;
      }
    }
  }

  fn error(&self, detail: String) -> RithmicError {
    RithmicError::MessageDecodeError { template_id: self.template_id, detail }
  }

  /// Read the leading template id. Later errors are reported against it.
  pub fn read_template_id(&mut self) -> Result<i32, RithmicError> {
    let s = self.read_string()?;
    let id = s
      .parse::<i32>()
      .map_err(|e| self.error(format!("Invalid template id '{}': {}", s, e)))?;
    self.template_id = id;
    Ok(id)
  }

  /// Read a string field
  pub fn read_string(&mut self) -> Result<String, RithmicError> {
    if self.current_field >= self.fields.len() {
      return Err(self.error(format!("Unexpected end of message at field {}", self.current_field)));
    }

    let (start, end) = self.fields[self.current_field];
    self.current_field += 1;

    if start >= end {
      return Ok(String::new());
    }

    std::str::from_utf8(&self.data[start..end])
      .map(|s| s.to_string())
      .map_err(|e| self.error(format!("Failed to parse string: {}", e)))
  }

  /// Read an integer field. Empty decodes as 0.
  pub fn read_int(&mut self) -> Result<i64, RithmicError> {
    let s = self.read_string()?;

    if s.is_empty() {
      return Ok(0);
    }

    s.parse::<i64>()
      .map_err(|e| self.error(format!("Failed to parse integer '{}': {}", s, e)))
  }

  /// Read a double field. Empty decodes as 0.0.
  pub fn read_double(&mut self) -> Result<f64, RithmicError> {
    let s = self.read_string()?;

    if s.is_empty() {
      return Ok(0.0);
    }

    s.parse::<f64>()
      .map_err(|e| self.error(format!("Failed to parse double '{}': {}", s, e)))
  }

  /// Read a boolean field (as 0 or 1)
  pub fn read_bool(&mut self) -> Result<bool, RithmicError> {
    let val = self.read_int()?;
    Ok(val != 0)
  }

  fn read_count(&mut self) -> Result<usize, RithmicError> {
    let count = self.read_int()?;
    if count < 0 || count as usize > self.remaining_fields() {
      return Err(self.error(format!("Invalid repeated field count {}", count)));
    }
    Ok(count as usize)
  }

  /// Read a count-prefixed list of strings
  pub fn read_string_list(&mut self) -> Result<Vec<String>, RithmicError> {
    let count = self.read_count()?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
      items.push(self.read_string()?);
    }
    Ok(items)
  }

  /// Read a count-prefixed list of integers
  pub fn read_int_list(&mut self) -> Result<Vec<i64>, RithmicError> {
    let count = self.read_count()?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
      items.push(self.read_int()?);
    }
    Ok(items)
  }

  /// Skip a field
  pub fn skip_field(&mut self) -> Result<(), RithmicError> {
    if self.current_field >= self.fields.len() {
      return Err(self.error("Unexpected end of message".to_string()));
    }

    self.current_field += 1;
    Ok(())
  }

  /// Get the number of remaining fields
  pub fn remaining_fields(&self) -> usize {
    self.fields.len().saturating_sub(self.current_field)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reads_scalars_and_lists() {
    let data = b"313\x002\x00a\x00b\x00\x004.25\x001\x00";
    let mut p = FieldParser::new(data);
    assert_eq!(p.read_template_id().unwrap(), 313);
    assert_eq!(p.read_string_list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(p.read_int().unwrap(), 0);
    assert_eq!(p.read_double().unwrap(), 4.25);
    assert!(p.read_bool().unwrap());
    assert_eq!(p.remaining_fields(), 0);
  }

  #[test]
  fn errors_carry_template_id() {
    let mut p = FieldParser::new(b"351\x00x\x00");
    p.read_template_id().unwrap();
    match p.read_int() {
      Err(RithmicError::MessageDecodeError { template_id, .. }) => assert_eq!(template_id, 351),
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn list_count_beyond_payload_is_rejected() {
    let mut p = FieldParser::new(b"11\x005\x00a\x00");
    p.read_template_id().unwrap();
    assert!(p.read_string_list().is_err());
  }
}
