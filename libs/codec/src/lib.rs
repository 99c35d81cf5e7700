//! # Dispatch Wire Codec
//!
//! ## Purpose
//!
//! Pure encoding and decoding of the two fixed binary frames exchanged over
//! the dispatcher's Unix socket:
//! - **Request envelope**: edge gateway → dispatcher (and dispatcher → engine)
//! - **Response frame**: dispatcher → edge gateway (and engine → dispatcher)
//!
//! ## Architecture Role
//!
//! ```text
//! Edge Gateway → [codec] → Connection Handler → Manager → Workflow
//!     ↑             ↓              ↓
//! Unix socket   Envelope /     fixed 400 frame
//! frames        Response       on ProtocolError
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Socket management or connection handling (belongs in the dispatcher)
//! - Request validation beyond framing (the workflow validates envelopes)
//!
//! All functions are side-effect free; decoding either returns a complete
//! value or a [`ProtocolError`], never partial state.

pub mod builder;
pub mod constants;
pub mod error;
pub mod frame;
pub mod parser;

pub use builder::{encode_request, encode_response, response_frame_len};
pub use constants::*;
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{Envelope, Response};
pub use parser::{decode_request, decode_response};
