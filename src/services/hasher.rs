//! Canonical HMAC over flat option sets.
//!
//! This is the only trust boundary between a query string a client can forge
//! and one the server issued. Values are serialized as compact JSON with keys
//! in lexicographic order, so insertion order never changes the digest.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::Sha256;
use std::{collections::BTreeMap, fmt};

type HmacSha256 = Hmac<Sha256>;

/// Leaf values allowed in a signed payload. Nested structures are not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl Scalar {
    fn to_json(&self) -> Value {
        match self {
            Scalar::Str(value) => Value::String(value.clone()),
            Scalar::Int(value) => Value::from(*value),
            Scalar::Bool(value) => Value::Bool(*value),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

/// Field name → value, kept sorted by the map itself.
pub type CanonicalFields = BTreeMap<String, Scalar>;

/// Shared HMAC secret. Never printed.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct HashSecret(String);

impl HashSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for HashSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashSecret(***)")
    }
}

/// Compact JSON with sorted keys, e.g. `{"a":1,"b":"x"}`.
pub fn canonical_json(fields: &CanonicalFields) -> String {
    // Built from an ordered iterator so the output stays sorted even if the
    // map type preserves insertion order.
    let object: Map<String, Value> = fields
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    Value::Object(object).to_string()
}

/// Hex-encoded HMAC-SHA256 of the canonical form of `fields`.
pub fn generate_hash(secret: &HashSecret, fields: &CanonicalFields) -> String {
    let mut mac = keyed(secret);
    mac.update(canonical_json(fields).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Recompute and compare in constant time. Malformed hex never verifies.
pub fn verify_hash(secret: &HashSecret, fields: &CanonicalFields, hash: &str) -> bool {
    let Ok(expected) = hex::decode(hash) else {
        return false;
    };
    let mut mac = keyed(secret);
    mac.update(canonical_json(fields).as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Fresh per-issuance salt: a random decimal string.
pub fn mint_salt() -> String {
    rand::random::<u64>().to_string()
}

fn keyed(secret: &HashSecret) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CanonicalFields {
        let mut fields = CanonicalFields::new();
        fields.insert("size".into(), Scalar::Int(3));
        fields.insert("mime".into(), "text/plain".into());
        fields.insert("access".into(), "private".into());
        fields.insert("key".into(), "a/b".into());
        fields.insert("salt".into(), "12345".into());
        fields
    }

    #[test]
    fn canonical_form_is_sorted_compact_json() {
        let mut fields = CanonicalFields::new();
        fields.insert("b".into(), "x".into());
        fields.insert("c".into(), Scalar::Bool(true));
        fields.insert("a".into(), Scalar::Int(1));
        assert_eq!(canonical_json(&fields), r#"{"a":1,"b":"x","c":true}"#);
    }

    #[test]
    fn generated_hash_verifies() {
        let secret = HashSecret::new("s3cret");
        let hash = generate_hash(&secret, &sample());
        assert_eq!(hash.len(), 64);
        assert!(verify_hash(&secret, &sample(), &hash));
    }

    #[test]
    fn any_changed_field_breaks_verification() {
        let secret = HashSecret::new("s3cret");
        let hash = generate_hash(&secret, &sample());

        for (name, value) in [
            ("size", Scalar::Int(4)),
            ("mime", "text/html".into()),
            ("access", "public-read".into()),
            ("key", "a/c".into()),
            ("salt", "12346".into()),
        ] {
            let mut changed = sample();
            changed.insert(name.into(), value);
            assert!(!verify_hash(&secret, &changed, &hash), "{name}");
        }

        let mut extra = sample();
        extra.insert("sha256".into(), "00".into());
        assert!(!verify_hash(&secret, &extra, &hash));
    }

    #[test]
    fn field_order_does_not_affect_digest() {
        let secret = HashSecret::new("s3cret");
        let forward: CanonicalFields = [("key", "a/b"), ("mime", "text/plain"), ("salt", "9")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), Scalar::from(v)))
            .collect();
        let backward: CanonicalFields = [("salt", "9"), ("mime", "text/plain"), ("key", "a/b")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), Scalar::from(v)))
            .collect();
        assert_eq!(generate_hash(&secret, &forward), generate_hash(&secret, &backward));
    }

    #[test]
    fn secret_and_encoding_matter() {
        let hash = generate_hash(&HashSecret::new("one"), &sample());
        assert!(!verify_hash(&HashSecret::new("two"), &sample(), &hash));
        assert!(!verify_hash(&HashSecret::new("one"), &sample(), "not-hex"));
        assert!(!verify_hash(&HashSecret::new("one"), &sample(), ""));
    }

    #[test]
    fn salts_are_decimal_and_fresh() {
        let a = mint_salt();
        let b = mint_salt();
        assert!(a.bytes().all(|c| c.is_ascii_digit()));
        assert_ne!(a, b);
    }

    #[test]
    fn secret_is_redacted() {
        assert_eq!(format!("{:?}", HashSecret::new("hunter2")), "HashSecret(***)");
    }
}
