// yarp/src/protocol_decoder.rs
// Decodes payloads into canonical records.

use crate::base::RithmicError;
use crate::protocol_dec_parser::FieldParser;
use crate::record::{FieldValue, Record};
use crate::schema::{self, FieldKind};

/// Read only the template id from the front of a payload, without parsing the rest.
pub fn peek_template_id(payload: &[u8]) -> Result<i32, RithmicError> {
  let end = payload.iter().position(|&b| b == 0).ok_or_else(|| RithmicError::MessageDecodeError {
    template_id: 0,
    detail: format!("No terminated template id in {} byte payload", payload.len()),
  })?;
  std::str::from_utf8(&payload[..end])
    .ok()
    .and_then(|s| s.parse::<i32>().ok())
    .ok_or_else(|| RithmicError::MessageDecodeError {
      template_id: 0,
      detail: format!("Invalid template id field {:02X?}", &payload[..end]),
    })
}

/// Fully decode a payload using the field table for its template.
///
/// Trailing fields beyond the table are ignored so that a plant running a newer
/// message version can still be understood. Missing fields are an error.
pub fn decode_record(payload: &[u8]) -> Result<Record, RithmicError> {
  let mut parser = FieldParser::new(payload);
  let template_id = parser.read_template_id()?;
  let specs = schema::fields_for(template_id).ok_or_else(|| RithmicError::MessageDecodeError {
    template_id,
    detail: "No field table for template".to_string(),
  })?;

  let mut record = Record::new(template_id);
  for spec in specs {
    let value = match spec.kind {
      FieldKind::Str => FieldValue::Str(parser.read_string()?),
      FieldKind::Int => FieldValue::Int(parser.read_int()?),
      FieldKind::Float => FieldValue::Float(parser.read_double()?),
      FieldKind::Bool => FieldValue::Bool(parser.read_bool()?),
      FieldKind::StrList => FieldValue::StrList(parser.read_string_list()?),
      FieldKind::IntList => FieldValue::IntList(parser.read_int_list()?),
    };
    record.set(spec.name, value);
  }

  if parser.remaining_fields() > 0 {
    log::trace!("Template {}: ignoring {} trailing fields", template_id, parser.remaining_fields());
  }
  Ok(record)
}
