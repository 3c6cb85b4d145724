//! The client/daemon wire protocol: a fixed frame header (§6) wrapping a
//! tagged-field request or response payload.

pub mod fields;
pub mod frame;
pub mod request;
pub mod response;

pub use frame::{Frame, MessageType, HEADER_LEN};
pub use request::{Choice, DecodeRequest, EncodeRequest};
pub use response::{DecodeMetadata, DecodeResponse, EncodeResponse};
