//! Binary codec for values shipped between the coordinator and workers.
//!
//! Schema snapshots, configuration maps, compiler connection states and
//! request payloads are all MessagePack-encoded with named fields, so a
//! struct can grow optional fields without breaking older peers.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_bytes::ByteBuf;

use crate::error::CodecResult;

/// Encode a value into its wire form.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Encode a value into a [`ByteBuf`], ready to be embedded in another
/// wire value as an opaque blob.
pub fn encode_blob<T: Serialize + ?Sized>(value: &T) -> CodecResult<ByteBuf> {
    encode(value).map(ByteBuf::from)
}

/// Decode a value from its wire form.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde::Deserialize;

    use super::*;
    use crate::error::CodecError;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        version: u64,
        modules: BTreeMap<String, Vec<String>>,
        comment: Option<String>,
    }

    #[test]
    fn nested_value_survives_encoding() {
        let mut modules = BTreeMap::new();
        modules.insert("default".to_string(), vec!["User".into(), "Post".into()]);
        modules.insert("std".to_string(), vec![]);
        let snapshot = Snapshot {
            version: 7,
            modules,
            comment: None,
        };

        let bytes = encode(&snapshot).unwrap();
        let back: Snapshot = decode(&bytes).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn blob_matches_plain_encoding() {
        let blob = encode_blob(&vec![1u32, 2, 3]).unwrap();
        assert_eq!(blob.as_slice(), encode(&vec![1u32, 2, 3]).unwrap().as_slice());
    }

    #[test]
    fn garbage_input_is_a_decode_error() {
        let result: CodecResult<Snapshot> = decode(&[0xc1, 0x00, 0xff]);
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn type_mismatch_is_a_decode_error() {
        let bytes = encode(&"not a snapshot").unwrap();
        let result: CodecResult<Snapshot> = decode(&bytes);
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }
}
