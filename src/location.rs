use std::fmt;

const SCHEME: &str = "s3://";

/// A bucket and key prefix parsed from `s3://bucket/prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub prefix: String,
}

impl S3Location {
    /// Parse a location. The bucket is the first path segment and the prefix
    /// is everything after it, slashes included; both must be non-empty.
    pub fn parse(input: &str) -> Option<Self> {
        let rest = input.strip_prefix(SCHEME)?;
        let (bucket, prefix) = rest.split_once('/')?;
        if bucket.is_empty() || prefix.is_empty() {
            return None;
        }
        Some(Self {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }
}

impl fmt::Display for S3Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.bucket, self.prefix)
    }
}
