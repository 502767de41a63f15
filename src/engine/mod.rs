//! Antivirus engine adapters.
//!
//! ## Available Engines
//!
//! - [`mock`] - A mock engine printing real engine-formatted output
//! - [`clamav`] - ClamAV via `clamdscan` and a managed `clamd` daemon
//!   (requires `clamav` feature)
//!
//! Engine output is parsed by [`report`] into per-file verdicts.

pub mod mime;
pub mod mock;
pub mod report;
mod traits;

#[cfg(feature = "clamav")]
pub mod clamav;

pub use mime::{detect_mime, MimeValidation};
pub use mock::{MockEngine, MockTimeout};
pub use report::{parse_scan_output, BatchFindings, EngineExit, EngineReport};
pub use traits::{ArcEngine, AvEngine};

#[cfg(feature = "clamav")]
pub use clamav::{ClamAvConfig, ClamdScan, DaemonHandle};
