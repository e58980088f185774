use std::fmt;

use bytesize::ByteSize;
use serde::{
    Deserializer, Serializer,
    de::{self, Visitor},
};

/// Writes sizes the way people read them, like `"256.0 MiB"`.
pub fn serialize_bytesize<S>(size: &ByteSize, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&size.to_string_as(true))
}

/// Accepts a human readable size (`"256 MiB"`, `"1GB"`) or a plain number of bytes.
pub fn deserialize_bytesize<'de, D>(deserializer: D) -> Result<ByteSize, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(ByteSizeVisitor)
}

struct ByteSizeVisitor;

impl Visitor<'_> for ByteSizeVisitor {
    type Value = ByteSize;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a byte size like \"256 MiB\" or a number of bytes")
    }

    fn visit_u64<E: de::Error>(self, bytes: u64) -> Result<ByteSize, E> {
        Ok(ByteSize::b(bytes))
    }

    fn visit_i64<E: de::Error>(self, bytes: i64) -> Result<ByteSize, E> {
        u64::try_from(bytes)
            .map(ByteSize::b)
            .map_err(|_| E::custom(format!("negative byte size: {bytes}")))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<ByteSize, E> {
        s.trim().parse::<ByteSize>().map_err(E::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Limits {
        #[serde(
            serialize_with = "serialize_bytesize",
            deserialize_with = "deserialize_bytesize"
        )]
        limit: ByteSize,
    }

    #[test]
    fn parses_human_readable_sizes() {
        let limits: Limits = serde_json::from_str(r#"{"limit": "256 MiB"}"#).unwrap();
        assert_eq!(limits.limit, ByteSize::mib(256));
    }

    #[test]
    fn parses_plain_byte_counts() {
        let limits: Limits = serde_json::from_str(r#"{"limit": 4096}"#).unwrap();
        assert_eq!(limits.limit, ByteSize::kib(4));
        assert!(serde_json::from_str::<Limits>(r#"{"limit": -1}"#).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_str::<Limits>(r#"{"limit": "lots"}"#).is_err());
    }
}
