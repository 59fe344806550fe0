//! Courier: HTTP request orchestration
//!
//! Issues data, download and upload requests through a pluggable transport
//! engine, refreshes OAuth2 credentials single-flight while queuing the
//! requests that arrive meanwhile, and delivers every outcome exactly once
//! on a configurable callback executor with retry/cancel recovery options.
//!
//! # Quick Start
//!
//! ```no_run
//! use courier::prelude::*;
//!
//! # async fn example() -> courier::Result<()> {
//! let controller = RequestController::new(ControllerConfig::new("https://api.example.com"))?;
//! let descriptor = controller.descriptor(HttpMethod::Get, "users/1", &[("verbose", "true")])?;
//! let outcome = controller.send(descriptor).await;
//! match outcome.into_result() {
//!     Ok(response) => println!("{}", response.text()),
//!     Err(error) => eprintln!("{error}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod controller;
pub mod error;
pub mod prelude;
pub mod request;
pub mod transport;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{CourierError, Result};
