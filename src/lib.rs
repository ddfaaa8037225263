//! # Train IO Bridge Library
//!
//! Connect home-built train cab controls to a train simulator.
//!
//! Boards with levers, buttons, button matrices and haptic motor levers talk
//! to the host over a COBS framed serial link. This library discovers and
//! configures those boards, keeps each connection alive, calibrates analog
//! levers and turns reported input values into simulator commands.
//!
//! ## Layers
//!
//! - [`framing`] and [`protocol`]: the wire format
//! - [`session`]: one task per serial port, built on [`serial`]
//! - [`calibration`]: pure lever calibration math
//! - [`controller`]: input bindings and button repeat timers
//! - [`simulator`] and [`telemetry`]: where commands go
//! - [`profile`] and [`config`]: persisted records and runtime settings

pub mod calibration;
pub mod config;
pub mod controller;
pub mod error;
pub mod framing;
pub mod profile;
pub mod protocol;
pub mod serial;
pub mod session;
pub mod simulator;
pub mod telemetry;
