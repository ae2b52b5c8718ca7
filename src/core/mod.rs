//! # Core Protocol Components
//!
//! Low-level frame layout and stream framing.
//!
//! ## Components
//! - **Frame**: header layout, message types and the decoded [`Frame`](frame::Frame)
//! - **Codec**: Tokio codec that splits a byte stream into whole frames
//!
//! ## Wire Format
//! ```text
//! [Magic(2)] [Size(2)] [Marker(1)] [Pad|Type(1)] [Sequence(2)] [Body(N)]
//! ```
//!
//! ## Security
//! - Maximum frame size follows from the 16-bit size field
//! - Length validation before buffering

pub mod codec;
pub mod frame;
