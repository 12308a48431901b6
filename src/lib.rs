//! Zapdesk: a WhatsApp front desk for a small-business management backend.
//!
//! Keeps one WhatsApp session alive through a local bridge, filters inbound
//! traffic down to direct text messages, and runs a per-contact
//! conversation state machine that turns free text into confirmed business
//! actions ("cadastrar cliente ...", then "sim").
//!
//! See `DESIGN.md` for the module map.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod store;
pub mod whatsapp;

pub mod actions;
pub mod conversation;
pub mod nlu;
