//! Client for the Milestone ImageServer protocol (TCP port 7563).
//!
//! The Recording Server speaks a proprietary framed protocol: outbound
//! messages are single-line XML `methodcall` documents terminated by
//! `\r\n\r\n`; inbound messages are either XML responses with the same
//! terminator or image responses (ASCII header block, exact-length binary
//! payload, then a mandatory `\r\n\r\n` trailer).
//!
//! Three layers live here:
//! - [`codec`]: message serialization and parsing, including the 36-byte
//!   proprietary header in front of raw codec payloads
//! - [`connection`]: one TCP socket with strict framing and a sticky
//!   broken state
//! - [`pipeline`]: the windowed frame reader that keeps several `next`
//!   requests in flight and yields frames in timestamp order

pub mod codec;
pub mod connection;
pub mod error;
pub mod pipeline;

pub use codec::{ImageHeader, MethodCall, XmlResponse};
pub use connection::{Connection, Response};
pub use error::{ProtoError, ProtoResult};
pub use pipeline::{FramePipeline, PipelineConfig};
