//! Metadata sidecar persisted next to (not inside) each object's payload.

use crate::models::access::Access;
use serde::{Deserialize, Serialize};

/// Authoritative record of an object's access tier and checksum.
///
/// Stored as pretty JSON at `{meta_path}/{key}.json`. The gateway consults
/// this record, never the payload's file name, to decide how to serve a key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub access: Access,

    /// Lowercase hex SHA-256 of the published payload.
    pub sha256: String,
}
