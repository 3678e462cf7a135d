use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use thiserror::Error;

/// A Solidity ABI value, written the way call sites read: the variant names
/// follow the ABI type grammar.
#[derive(Debug, PartialEq, Clone)]
pub enum Value {
    Address(Address),
    Uint(U256),
    Int(U256),
    Bool(bool),
    Bytes(Bytes),
    String(String),
    Array(Vec<Value>),
    Tuple(Vec<Value>),
    FixedArray(Vec<Value>),
    FixedBytes(Bytes),
}

#[derive(Debug, Error)]
pub enum CalldataEncodeError {
    #[error("Failed to parse function signature: {0}")]
    ParseError(String),
    #[error("Wrong number of arguments provided for calldata: {0}")]
    WrongArgumentLength(String),
    #[error("FixedBytes value longer than 32 bytes")]
    FixedBytesTooLong,
}

#[derive(Debug, Error)]
pub enum CalldataDecodeError {
    #[error("Return data too short: expected at least {expected} bytes, got {got}")]
    TooShort { expected: usize, got: usize },
}

fn is_dynamic(value: &Value) -> bool {
    match value {
        Value::Bytes(_) | Value::String(_) | Value::Array(_) => true,
        Value::Tuple(values) | Value::FixedArray(values) => values.iter().any(is_dynamic),
        _ => false,
    }
}

/// Bytes this value occupies in its enclosing head section. Dynamic values
/// occupy one pointer word; static tuples inline their full content.
fn head_size(value: &Value) -> usize {
    if is_dynamic(value) {
        return 32;
    }
    match value {
        Value::Tuple(values) | Value::FixedArray(values) => values.iter().map(head_size).sum(),
        _ => 32,
    }
}

fn encode_word(value: U256, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.to_big_endian());
}

fn encode_padded_bytes(raw: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(raw);
    let remainder = raw.len() % 32;
    if remainder != 0 {
        out.extend_from_slice(&vec![0u8; 32 - remainder]);
    }
}

fn encode_value(value: &Value, out: &mut Vec<u8>) -> Result<(), CalldataEncodeError> {
    match value {
        Value::Address(address) => {
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(address.as_bytes());
            out.extend_from_slice(&word);
        }
        Value::Uint(v) | Value::Int(v) => encode_word(*v, out),
        Value::Bool(b) => encode_word(U256::from(u8::from(*b)), out),
        Value::FixedBytes(raw) => {
            if raw.len() > 32 {
                return Err(CalldataEncodeError::FixedBytesTooLong);
            }
            let mut word = [0u8; 32];
            word[..raw.len()].copy_from_slice(raw);
            out.extend_from_slice(&word);
        }
        Value::Bytes(raw) => {
            encode_word(U256::from(raw.len()), out);
            encode_padded_bytes(raw, out);
        }
        Value::String(s) => {
            encode_word(U256::from(s.len()), out);
            encode_padded_bytes(s.as_bytes(), out);
        }
        Value::Array(values) => {
            encode_word(U256::from(values.len()), out);
            encode_sequence(values, out)?;
        }
        Value::Tuple(values) | Value::FixedArray(values) => {
            encode_sequence(values, out)?;
        }
    }
    Ok(())
}

/// Standard head/tail ABI encoding of a value sequence: static values and
/// dynamic-value offsets first, dynamic content after.
fn encode_sequence(values: &[Value], out: &mut Vec<u8>) -> Result<(), CalldataEncodeError> {
    let heads_len: usize = values.iter().map(head_size).sum();
    let mut heads = Vec::with_capacity(heads_len);
    let mut tail: Vec<u8> = Vec::new();

    for value in values {
        if is_dynamic(value) {
            encode_word(U256::from(heads_len + tail.len()), &mut heads);
            encode_value(value, &mut tail)?;
        } else {
            encode_value(value, &mut heads)?;
        }
    }

    out.extend_from_slice(&heads);
    out.extend_from_slice(&tail);
    Ok(())
}

/// Splits a parameter list on depth-0 commas, so tuple types survive intact.
fn split_params(params: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in params.chars() {
        match c {
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                out.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

fn parse_signature(signature: &str) -> Result<(String, Vec<String>), CalldataEncodeError> {
    let sig = signature.trim().trim_start_matches("function ");
    let (name, rest) = sig
        .split_once('(')
        .ok_or_else(|| CalldataEncodeError::ParseError(signature.to_string()))?;
    let params = rest
        .strip_suffix(')')
        .ok_or_else(|| CalldataEncodeError::ParseError(signature.to_string()))?;
    Ok((name.to_string(), split_params(params)))
}

/// Encodes a function call: 4-byte keccak selector followed by the
/// ABI-encoded arguments. `signature` must use canonical types
/// (e.g. `finalizeDeposit(uint256)`).
pub fn encode_calldata(signature: &str, values: &[Value]) -> Result<Vec<u8>, CalldataEncodeError> {
    let (name, params) = parse_signature(signature)?;

    if params.len() != values.len() {
        return Err(CalldataEncodeError::WrongArgumentLength(format!(
            "{} != {}",
            params.len(),
            values.len()
        )));
    }

    let normalized = format!("{name}({})", params.join(","));
    let selector = keccak(normalized.as_bytes());

    let mut calldata = selector.as_bytes()[..4].to_vec();
    encode_sequence(values, &mut calldata)?;
    Ok(calldata)
}

/// Reads the `index`-th 32-byte word of ABI return data as a U256.
pub fn decode_uint(data: &[u8], index: usize) -> Result<U256, CalldataDecodeError> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return Err(CalldataDecodeError::TooShort {
            expected: end,
            got: data.len(),
        });
    }
    Ok(U256::from_big_endian(&data[start..end]))
}

/// Reads the `index`-th 32-byte word of ABI return data as an address.
pub fn decode_address(data: &[u8], index: usize) -> Result<Address, CalldataDecodeError> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return Err(CalldataDecodeError::TooShort {
            expected: end,
            got: data.len(),
        });
    }
    Ok(Address::from_slice(&data[start + 12..end]))
}

/// Reads the `index`-th 32-byte word as a fixed hash.
pub fn decode_h256(data: &[u8], index: usize) -> Result<H256, CalldataDecodeError> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return Err(CalldataDecodeError::TooShort {
            expected: end,
            got: data.len(),
        });
    }
    Ok(H256::from_slice(&data[start..end]))
}

// 0x08c379a0 == Error(String)
pub const ERROR_FUNCTION_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Extracts the human-readable reason from `Error(string)` revert data, if
/// the payload carries one.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 + 64 || data[..4] != ERROR_FUNCTION_SELECTOR {
        return None;
    }
    let body = &data[4..];
    let offset = decode_uint(body, 0).ok()?;
    if offset > U256::from(u32::MAX) {
        return None;
    }
    let offset = offset.as_usize();
    let length = U256::from_big_endian(body.get(offset..offset + 32)?);
    if length > U256::from(u32::MAX) {
        return None;
    }
    let length = length.as_usize();
    let raw = body.get(offset + 32..offset + 32 + length)?;
    String::from_utf8(raw.to_vec()).ok()
}
