#![deny(missing_docs)]

//! This crate relays hydroponics sensor readings to websocket subscribers.
//!
//! Readings come from a serial device as lines such as
//! `pH:6.20,temp:23.20,water:medium,tds:652`.
//! Each valid line is sent as JSON to everyone connected at `/ws`.
//!
//! The device may be absent, busy, unplugged or silent.
//! The relay keeps retrying it, and after too many failures
//! relays plausible synthetic readings instead.
//! A status endpoint tells which is the case.

/// Parsing device lines into readings.
pub mod reading;

/// Synthetic readings.
pub mod synthetic;

/// Serial port driver.
pub mod serial;

/// The live subscribers, and delivering to them.
pub mod registry;

/// What the relay is up to.
pub mod status;

/// Where readings come from at any given time.
pub(crate) mod source;

/// Owns the device connection and feeds the registry.
pub(crate) mod acquisition;

/// Code relating to setting up the server which sets up connections and spawns handlers for subscribers.
pub mod server;

/// Handles incoming websockets.
pub(crate) mod websocket;

/// Clients.
pub mod client;

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;
