//! Wire protocol of the streaming chat endpoint.
//!
//! The response body is a sequence of newline-terminated records:
//!
//! ```text
//! data: {"content": "Hi", "done": false}
//!
//! data: {"content": " there", "done": false}
//!
//! data: {"done": true, "thread_id": "abc"}
//! ```
//!
//! - [`frame`] classifies a single line into a [`StreamEvent`]
//! - [`decoder`] turns an arbitrarily-chunked byte stream into events

pub mod decoder;
pub mod frame;

pub use decoder::{EventStream, FrameDecoder, decode_stream};
pub use frame::{StreamEvent, parse_line};
