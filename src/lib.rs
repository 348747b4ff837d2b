//! # L-Band Correction Relay
//!
//! Configures and operates a two-receiver GNSS correction chain: a correction
//! receiver tunes the L-Band correction signal and forwards the demodulated
//! packets over a serial link to a position receiver, which decrypts them with
//! time-bounded keys and computes a high-precision fix reported as NMEA.
//!
//! ## Quick Start
//!
//! ```rust
//! use lband_relay::deployment::Deployment;
//! use lband_relay::pipeline::{Configurator, CorrectionChain};
//! use lband_relay::poll_loop::PollLoop;
//! use lband_relay::retry::RetryPolicy;
//! use lband_relay::sim::{RecordingSleeper, SimulatedBus};
//!
//! let mut chain = CorrectionChain::new(SimulatedBus::default(), Deployment::default()).unwrap();
//!
//! let mut configurator = Configurator::new(RetryPolicy::unbounded(), RecordingSleeper::new());
//! let result = configurator.run(&mut chain);
//! assert!(result.is_success());
//!
//! let mut poll_loop = PollLoop::default();
//! assert!(poll_loop.run_after(&result, &mut chain, &mut RecordingSleeper::new(), Some(10)));
//! ```
//!
//! ## Architecture
//!
//! - [`device`] - Device handle contract shared by both receivers
//! - [`receiver`] - Handle implementation over the framed [`protocol`]
//! - [`transport`] - Shared bus boundary
//! - [`keys`] - Current/next decryption key pair
//! - [`deployment`] - Compiled-in addresses, frequencies, rates and keys
//! - [`pipeline`] - Setup state machine and result aggregation
//! - [`poll_loop`] - Steady-state servicing of both receivers
//! - [`status`] - Console rendering
//! - [`sim`] - In-process bus with simulated receivers

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod deployment;
pub mod device;
pub mod keys;
pub mod pipeline;
pub mod poll_loop;
pub mod protocol;
pub mod receiver;
pub mod retry;
pub mod sim;
pub mod status;
pub mod transport;

// Re-export main public types for convenience
pub use device::{DeviceAddress, DeviceHandle, DeviceRole};
pub use keys::{KeyMaterial, KeyStore};
pub use pipeline::{Configurator, CorrectionChain, PipelineResult, PipelineState};
pub use poll_loop::PollLoop;
pub use receiver::Receiver;
