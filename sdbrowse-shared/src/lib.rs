#![warn(rust_2018_idioms)]

pub mod error;
pub(crate) mod transport;

pub use transport::{TaggedBytesMut, TransportContext, TransportMessage};
