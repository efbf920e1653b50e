//! Key translation between the abstract path model and backend keys.
//!
//! Abstract keys are root-to-leaf token lists; backend keys are leaf nodes
//! linked to their ancestors through parent pointers. Translation is
//! lossless in both directions for the path, the identifiers and the
//! namespace. The app id is not carried by backend keys and is supplied by
//! the bound datastore when decoding.

use entitystore::{DatastoreResult, Key, KeyTok};

use crate::native::NativeKey;

/// Encodes an abstract key, ancestors first.
///
/// Every level carries the key's own namespace.
pub(crate) fn encode_key(key: &Key) -> NativeKey {
    let (_, namespace, toks) = key.split();
    let mut native: Option<NativeKey> = None;
    for tok in toks {
        native = Some(NativeKey::new(
            tok.kind.as_str(),
            tok.string_id.as_str(),
            tok.int_id,
            native.take(),
            namespace,
        ));
    }
    // `Key` guarantees at least one token.
    native.unwrap_or_else(|| NativeKey::new("", "", 0, None, namespace))
}

/// Encodes every key of a batch.
pub(crate) fn encode_keys(keys: &[Key]) -> Vec<NativeKey> {
    keys.iter().map(encode_key).collect()
}

/// Decodes a backend key under `app_id`.
///
/// # Errors
///
/// Returns [`DatastoreError::InvalidKey`](entitystore::DatastoreError::InvalidKey)
/// when the backend key has an incomplete ancestor or a malformed element.
pub(crate) fn decode_key(app_id: &str, key: &NativeKey) -> DatastoreResult<Key> {
    let mut toks = Vec::new();
    let mut cur = Some(key);
    while let Some(k) = cur {
        toks.push(KeyTok { kind: k.kind().to_owned(), string_id: k.name().to_owned(), int_id: k.id() });
        cur = k.parent();
    }
    toks.reverse();
    Key::from_toks(app_id, key.namespace(), toks)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use entitystore::DatastoreError;
    use proptest::prelude::*;

    use super::*;

    fn arb_tok() -> impl Strategy<Value = KeyTok> {
        prop_oneof![
            ("[A-Z][a-z]{0,8}", 1..i64::MAX).prop_map(|(kind, id)| KeyTok::with_int_id(kind, id)),
            ("[A-Z][a-z]{0,8}", "[a-z0-9]{1,8}")
                .prop_map(|(kind, name)| KeyTok::with_string_id(kind, name)),
        ]
    }

    proptest! {
        /// Decoding an encoded key must reproduce its path, identifiers and namespace.
        #[test]
        fn encode_decode_preserves_key(
            toks in proptest::collection::vec(arb_tok(), 1..6),
            namespace in "[a-z]{0,6}",
        ) {
            let key = Key::from_toks("app", namespace, toks).expect("generated keys are valid");
            let decoded = decode_key("app", &encode_key(&key)).expect("decode should succeed");
            prop_assert_eq!(decoded, key);
        }

        /// The encoded chain is as deep as the token path.
        #[test]
        fn encoded_depth_matches_path(toks in proptest::collection::vec(arb_tok(), 1..6)) {
            let key = Key::from_toks("app", "", toks.clone()).expect("generated keys are valid");
            let native = encode_key(&key);
            let mut depth = 0;
            let mut cur = Some(&native);
            while let Some(k) = cur {
                depth += 1;
                cur = k.parent();
            }
            prop_assert_eq!(depth, toks.len());
        }
    }

    #[test]
    fn test_encode_links_parents_leaf_first() {
        let key = Key::from_toks(
            "app",
            "ns",
            vec![KeyTok::with_string_id("Root", "r"), KeyTok::with_int_id("Leaf", 9)],
        )
        .unwrap();
        let native = encode_key(&key);

        assert_eq!(native.kind(), "Leaf");
        assert_eq!(native.id(), 9);
        assert_eq!(native.namespace(), "ns");
        let parent = native.parent().unwrap();
        assert_eq!(parent.kind(), "Root");
        assert_eq!(parent.name(), "r");
        assert_eq!(parent.namespace(), "ns");
        assert!(parent.parent().is_none());
    }

    #[test]
    fn test_incomplete_leaf_round_trips() {
        let key = Key::from_toks("app", "", vec![KeyTok::incomplete("Kind")]).unwrap();
        let native = encode_key(&key);
        assert!(native.incomplete());
        assert_eq!(decode_key("app", &native).unwrap(), key);
    }

    #[test]
    fn test_decode_rejects_incomplete_ancestor() {
        let parent = NativeKey::new("Parent", "", 0, None, "");
        let child = NativeKey::new("Child", "c", 0, Some(parent), "");
        assert!(matches!(decode_key("app", &child), Err(DatastoreError::InvalidKey)));
    }

    #[test]
    fn test_decode_uses_supplied_app_id() {
        let native = NativeKey::new("Kind", "", 3, None, "");
        assert_eq!(decode_key("other-app", &native).unwrap().app_id(), "other-app");
    }
}
