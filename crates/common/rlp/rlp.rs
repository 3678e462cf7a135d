//! Recursive Length Prefix (RLP) encoding for the relayer's L1 transaction
//! assembly.
//!
//! Only the encode half of RLP lives here: the relayer signs and broadcasts
//! EIP-1559 transactions but never needs to decode raw RLP off the wire, so
//! there is no decoder.
//!
//! - [`encode::RLPEncode`]: trait for types that can be RLP-encoded
//! - [`structs::Encoder`]: fluent API for encoding structs field by field
//! - [`constants`]: RLP protocol constants (`RLP_NULL`, `RLP_EMPTY_LIST`)

pub mod constants;
pub mod encode;
pub mod structs;
