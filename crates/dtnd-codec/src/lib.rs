//! Byte-exact bundle serialization for dtnd.
//!
//! The frame format keeps the metadata header parseable without touching
//! body bytes, so a disk-backed storage can rebuild its index from a
//! directory of persisted bundles by reading a small prefix of each file.
//! Both the header and the body are CRC32-protected; a torn or corrupted
//! file decodes to an error, never to a wrong bundle.

pub mod error;
pub mod frame;

pub use error::{CodecError, CodecResult};
pub use frame::{decode, decode_header, encode, encoded_len, read_header, MAGIC};
