// yarp/src/lib.rs
// Main entry point for the R|Protocol order plant library

//! # YARP - Yet Another R|Protocol client
//!
//! A threaded Rust client for Rithmic order plants that provides:
//!
//! - Length-prefixed framing and a positional, template-driven field codec
//! - A logged-in session with idle heartbeats, logout and reconnect
//! - Request/response correlation, including streamed lists
//! - An order book that follows every order and bracket leg through its lifecycle,
//!   with bulk amendment of all stop or target legs of a bracket
//! - Optional SQLite capture of every frame
//!
//! Start with [`client::RithmicClient`].

mod base;
mod protocol_dec_parser;
mod protocol_encoder;
mod protocol_decoder;
mod schema;
pub mod template;
pub mod record;
pub mod protocol;
pub mod framer;
pub mod conn;
pub mod conn_log;
pub mod conn_mock;
pub mod session;
pub mod correlator;
pub mod handler;
pub mod dispatcher;
pub mod reference;
pub mod order;
pub mod order_builder;
pub mod order_manager;
pub mod client;

pub use base::RithmicError;
pub use protocol_decoder::{decode_record, peek_template_id};
pub use protocol_encoder::encode_record;
pub use record::{FieldValue, Record};
pub use template::template as templates;
pub use schema::SCHEMA_VERSION;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const TEMPLATE_VERSION: &str = "3.9"; // R|Protocol template version spoken
