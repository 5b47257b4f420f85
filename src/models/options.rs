//! Upload/download option schema.
//!
//! Options travel as query-string values, so parsing works from string maps
//! and coerces numbers. The issuer and the gateway both go through
//! [`PutOptions::canonical_fields`] / [`GetOptions::canonical_fields`], which
//! keeps the signed payload byte-identical on both sides.

use crate::{
    models::access::Access,
    services::hasher::{CanonicalFields, Scalar},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

pub const MAX_PUT_SIZE: u64 = 32 * 1024 * 1024;
pub const MIN_EXPIRES: u32 = 1;
pub const MAX_EXPIRES: u32 = 604_800;
pub const DEFAULT_EXPIRES: u32 = 3600;
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// One failed check, addressed by field path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldIssue {
    pub path: String,
    pub message: String,
}

/// Every issue found while validating one input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![FieldIssue {
                path: path.into(),
                message: message.into(),
            }],
        }
    }

    fn push(&mut self, path: &str, message: impl Into<String>) {
        self.issues.push(FieldIssue {
            path: path.to_string(),
            message: message.into(),
        });
    }

    pub fn merge(&mut self, other: ValidationError) {
        self.issues.extend(other.issues);
    }

    fn into_result(self) -> Result<(), ValidationError> {
        if self.issues.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .issues
            .iter()
            .map(|issue| format!("[{}] {}", issue.path, issue.message))
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&rendered)
    }
}

impl std::error::Error for ValidationError {}

/// Parameters authorizing a single upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PutOptions {
    /// Exact body length in bytes.
    pub size: u64,
    pub mime: String,
    /// Lifetime of the capability in seconds.
    pub expires: u32,
    pub access: Access,
    /// Expected SHA-256 of the body, hex encoded.
    pub sha256: Option<String>,
}

impl PutOptions {
    /// Options for a `size`-byte upload with every other field defaulted.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            mime: DEFAULT_MIME.to_string(),
            expires: DEFAULT_EXPIRES,
            access: Access::default(),
            sha256: None,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = mime.into();
        self
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = expires;
        self
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    /// Parse query-string values, applying defaults and coercions.
    ///
    /// Empty values count as absent. All issues are collected before failing.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let mut errors = ValidationError { issues: Vec::new() };

        let size = match present(query, "size") {
            None => {
                errors.push("size", "Required");
                None
            }
            Some(raw) => coerce_int(raw, "size", &mut errors),
        };
        let expires = match present(query, "expires") {
            None => Some(i64::from(DEFAULT_EXPIRES)),
            Some(raw) => coerce_int(raw, "expires", &mut errors),
        };
        let access = match present(query, "access") {
            None => Some(Access::default()),
            Some(raw) => match raw.parse::<Access>() {
                Ok(access) => Some(access),
                Err(message) => {
                    errors.push("access", message);
                    None
                }
            },
        };
        let mime = present(query, "mime").unwrap_or(DEFAULT_MIME).to_string();
        let sha256 = present(query, "sha256").map(str::to_string);

        let (Some(size), Some(expires), Some(access)) = (size, expires, access) else {
            return Err(errors);
        };
        errors.into_result()?;

        let size = check_size(size)?;
        let expires = check_expires(expires)?;
        let options = Self {
            size,
            mime,
            expires,
            access,
            sha256,
        };
        options.validate()?;
        Ok(options)
    }

    /// Range and format checks for options built in code.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError { issues: Vec::new() };
        if self.size > MAX_PUT_SIZE {
            errors.push("size", format!("Number must be less than or equal to {}", MAX_PUT_SIZE));
        }
        if self.mime.is_empty() {
            errors.push("mime", "String must contain at least 1 character(s)");
        }
        if let Err(err) = check_expires(i64::from(self.expires)) {
            errors.merge(err);
        }
        if let Some(sha256) = &self.sha256 {
            if let Err(err) = check_sha256(sha256) {
                errors.merge(err);
            }
        }
        errors.into_result()
    }

    /// The option half of the signed payload.
    pub fn canonical_fields(&self) -> CanonicalFields {
        let mut fields = CanonicalFields::new();
        fields.insert("size".into(), Scalar::Int(self.size as i64));
        fields.insert("mime".into(), Scalar::Str(self.mime.clone()));
        fields.insert("expires".into(), Scalar::Int(i64::from(self.expires)));
        fields.insert("access".into(), Scalar::Str(self.access.as_str().into()));
        if let Some(sha256) = &self.sha256 {
            fields.insert("sha256".into(), Scalar::Str(sha256.clone()));
        }
        fields
    }

    /// Query-string pairs that [`PutOptions::from_query`] parses back into `self`.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("size", self.size.to_string()),
            ("mime", self.mime.clone()),
            ("expires", self.expires.to_string()),
            ("access", self.access.as_str().to_string()),
        ];
        if let Some(sha256) = &self.sha256 {
            pairs.push(("sha256", sha256.clone()));
        }
        pairs
    }
}

/// Parameters for a download capability.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub expires: Option<u32>,
}

impl GetOptions {
    pub fn with_expires(expires: u32) -> Self {
        Self {
            expires: Some(expires),
        }
    }

    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let mut errors = ValidationError { issues: Vec::new() };
        let expires = match present(query, "expires") {
            None => return Ok(Self::default()),
            Some(raw) => coerce_int(raw, "expires", &mut errors),
        };
        errors.into_result()?;
        match expires {
            Some(expires) => Ok(Self {
                expires: Some(check_expires(expires)?),
            }),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.expires {
            Some(expires) => check_expires(i64::from(expires)).map(|_| ()),
            None => Ok(()),
        }
    }

    pub fn canonical_fields(&self) -> CanonicalFields {
        let mut fields = CanonicalFields::new();
        if let Some(expires) = self.expires {
            fields.insert("expires".into(), Scalar::Int(i64::from(expires)));
        }
        fields
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        self.expires
            .map(|expires| vec![("expires", expires.to_string())])
            .unwrap_or_default()
    }
}

fn present<'a>(query: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    query
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn coerce_int(raw: &str, path: &str, errors: &mut ValidationError) -> Option<i64> {
    match raw.trim().parse::<i64>() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.push(path, format!("Expected integer, received '{}'", raw));
            None
        }
    }
}

fn check_size(size: i64) -> Result<u64, ValidationError> {
    if size < 0 {
        return Err(ValidationError::single(
            "size",
            "Number must be greater than or equal to 0",
        ));
    }
    let size = size as u64;
    if size > MAX_PUT_SIZE {
        return Err(ValidationError::single(
            "size",
            format!("Number must be less than or equal to {}", MAX_PUT_SIZE),
        ));
    }
    Ok(size)
}

fn check_expires(expires: i64) -> Result<u32, ValidationError> {
    if expires < i64::from(MIN_EXPIRES) {
        return Err(ValidationError::single(
            "expires",
            format!("Number must be greater than or equal to {}", MIN_EXPIRES),
        ));
    }
    if expires > i64::from(MAX_EXPIRES) {
        return Err(ValidationError::single(
            "expires",
            format!("Number must be less than or equal to {}", MAX_EXPIRES),
        ));
    }
    Ok(expires as u32)
}

fn check_sha256(sha256: &str) -> Result<(), ValidationError> {
    if sha256.len() != 64 {
        return Err(ValidationError::single(
            "sha256",
            "String must contain exactly 64 character(s)",
        ));
    }
    if !sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ValidationError::single("sha256", "Invalid"));
    }
    Ok(())
}
