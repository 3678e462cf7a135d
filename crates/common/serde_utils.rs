use serde::{Deserialize, Deserializer, Serializer, de::Error};

fn decode_hex<E: Error>(value: &str) -> Result<Vec<u8>, E> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| E::custom(format!("invalid hex string: {e}")))
}

/// 0x-prefixed hex (de)serialization for `bytes::Bytes` fields.
pub mod bytes {
    use super::*;
    use ::bytes::Bytes;

    pub fn deserialize<'de, D>(d: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(d)?;
        decode_hex(&value).map(Bytes::from)
    }

    pub fn serialize<S>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }
}

/// 0x-prefixed hex (de)serialization for `Option<Bytes>` fields.
pub mod bytes_opt {
    use super::*;
    use ::bytes::Bytes;

    pub fn deserialize<'de, D>(d: D) -> Result<Option<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(d)?;
        match value {
            Some(s) => decode_hex(&s).map(Bytes::from).map(Some),
            None => Ok(None),
        }
    }

    pub fn serialize<S>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&format!("0x{}", hex::encode(bytes))),
            None => serializer.serialize_none(),
        }
    }
}

/// 0x-prefixed hex (de)serialization for fixed-size byte arrays.
pub mod hex_array {
    use super::*;

    pub fn deserialize<'de, D, const N: usize>(d: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(d)?;
        let raw = decode_hex(&value)?;
        raw.try_into()
            .map_err(|_| D::Error::custom(format!("expected {N} bytes")))
    }

    pub fn serialize<S, const N: usize>(value: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }
}

/// Decimal-string (de)serialization for u64 fields whose wire form is a
/// string (e.g. fee amounts carried through env configuration).
pub mod u64_dec_str {
    use super::*;

    pub fn deserialize<'de, D>(d: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(d)?;
        value
            .parse::<u64>()
            .map_err(|e| D::Error::custom(format!("invalid decimal string: {e}")))
    }

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use ::bytes::Bytes;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super::bytes")]
        data: Bytes,
        #[serde(with = "super::hex_array")]
        tag: [u8; 4],
    }

    #[test]
    fn hex_round_trip() {
        let value = Wrapper {
            data: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
            tag: [1, 2, 3, 4],
        };
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("0xdeadbeef"));
        assert!(json.contains("0x01020304"));
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn rejects_wrong_length() {
        let json = r#"{"data":"0x00","tag":"0x0102"}"#;
        assert!(serde_json::from_str::<Wrapper>(json).is_err());
    }
}
