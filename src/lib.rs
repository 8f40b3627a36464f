//! GUS/REGON Lookup Library
//!
//! This library provides the REST proxy in front of the GUS BIR SOAP registry
//! and the widget-side orchestration that writes registry data back to CRM
//! records.
//!
//! # Modules
//!
//! - `app`: Router assembly (CORS, rate limiting, HTTPS redirect, JSON guard).
//! - `backend_client`: Client for the proxy endpoints, used from the widget side.
//! - `config`: Configuration management.
//! - `context`: Record context discovery and organization variables.
//! - `crm`: CRM record store seam, duplicate check and registry module write-back.
//! - `diagnostics`: Best-effort registry status codes for "no data" answers.
//! - `envelopes`: SOAP 1.2 envelopes for the BIR operations.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `lookup`: Search, full report and PKD aggregation.
//! - `mapper`: Registry data to CRM field maps and history entries.
//! - `models`: Core data models.
//! - `normalizer`: MTOM stripping, inner XML decoding and record extraction.
//! - `reports`: Report allow-list and selection.
//! - `services`: Registry operations (search, full report).
//! - `session`: BIR login and session id.
//! - `transport`: SOAP over HTTP.
//! - `validators`: NIP and text helpers.
//! - `widget`: Widget session tying lookup and write-back together.

pub mod app;
pub mod backend_client;
pub mod config;
pub mod context;
pub mod crm;
pub mod diagnostics;
pub mod envelopes;
pub mod errors;
pub mod handlers;
pub mod lookup;
pub mod mapper;
pub mod models;
pub mod normalizer;
pub mod reports;
pub mod services;
pub mod session;
pub mod transport;
pub mod validators;
pub mod widget;
