//! Clients for the services around a tidemark run.
//!
//! - [`HttpLedger`] and [`FileLedger`] read prior build outcomes
//! - [`HttpJobMonitor`] asks whether an external build job is still running
//! - [`WebhookSink`] posts status events to an event stream

pub mod error;
pub mod event;
pub mod file;
pub mod http;
pub mod webhook;

pub use error::LedgerError;
pub use event::{LedgerEvent, latest_per_package};
pub use file::FileLedger;
pub use http::{HttpJobMonitor, HttpLedger};
pub use webhook::WebhookSink;
