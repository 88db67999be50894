//! Copy standard input into the X11 `CLIPBOARD` selection.
//!
//! The crate drives a small selection owner: a hidden window that answers
//! `TARGETS` and text conversion requests until another client claims the
//! selection. When a restore duration is given, the previous clipboard
//! contents are snapshotted before ownership is taken and written back once
//! the deadline passes, unless ownership was lost in the meantime.

pub mod detach;
mod error;
pub mod responder;

pub use error::Error;
pub use responder::Responder;
