//! Push-protocol encoding of generation events as Server-Sent Events.

mod encoder;

pub use encoder::{Frame, StreamEncoder, DONE_DATA, DONE_EVENT};
