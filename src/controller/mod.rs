//! Interactive device controller
//!
//! Implements the operator-facing side of the client:
//!
//! 1. [`command`] - Input normalization and the command set
//! 2. [`device_controller`] - Connection state, inbound routing and publishes
//! 3. [`interpreter`] - Prompt loop tying operator input to the controller
//!
//! # Architecture
//!
//! ```text
//! stdin ──► Interpreter ──► DeviceController ──► Transport ──► broker
//!                                 ▲
//! broker ──► event loop ──────────┘ (SessionEvents)
//! ```
//!
//! Only the interpreter publishes and only the event loop changes the
//! connection state.

pub mod command;
pub mod device_controller;
pub mod interpreter;
