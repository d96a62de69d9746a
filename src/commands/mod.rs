//! Command channel between the controller and its devices.
//!
//! One file:
//! - **envelope.rs**: the typed command envelope ([`Cmd`]), the
//!   multi-command frame ([`CmdBundle`]), and the wire codec.
//!
//! The wire format is an implementation detail of this module; the rest of
//! the crate only sees strictly typed commands in and out.

mod envelope;

pub use envelope::{Cmd, CmdBundle, CmdResult, CodecError};
