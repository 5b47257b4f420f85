//! Result of a signed upload URL request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A capability URL plus any headers the client must send with it.
///
/// The filesystem backend embeds all authorization in the URL and leaves
/// `headers` empty; the S3 backend returns the headers it signed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub headers: BTreeMap<String, String>,
}
