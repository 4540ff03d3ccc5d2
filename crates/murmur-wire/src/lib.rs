//! Murmur Wire - message kinds and their compact binary codec
//!
//! Every mesh payload is one `Message`: a type tag byte followed by
//! little-endian fields. Strings are u16-length-prefixed UTF-8. The codec
//! never allocates past the declared field limits, and malformed input
//! decodes to an error the runtime counts and discards.

pub mod message;

pub use message::*;
