//! daqstream - decoders for neutron and muon acquisition data
//!
//! Binary building blocks plus the formats built on them:
//!
//! - [`stream`]: byte cursors over memory or files, typed stream readers and
//!   writers, fixed-offset record decoding
//! - [`formats`]: PSI muon `.bin` histograms, nGEM `.edb` and DNS `.mdat`
//!   event files
//! - [`idc`]: the IDC/ISISDS request/reply protocol spoken by live DAE
//!   servers
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use daqstream::formats::{ngem, CancelFlag};
//!
//! let run = ngem::decode_files(&["run1.edb", "run2.edb"], ngem::NgemConfig::default(), CancelFlag::new())?;
//! println!("{} good frames of {}", run.good_frames, run.raw_frames);
//! let spectra = run.histograms();
//! # let _ = spectra;
//! # Ok::<(), daqstream::Error>(())
//! ```
//!
//! # Features
//!
//! - `rayon` - bin channels and parse DNS buffers in parallel
//! - `serde` - serialisable configs, headers and counters

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod error;
pub mod formats;
pub mod idc;
pub mod metrics;
pub mod stream;

pub use error::{Error, Result};
pub use idc::{DEFAULT_PORT, ProtocolError};
pub use metrics::{MetricsSnapshot, snapshot};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
