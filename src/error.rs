use std::fmt;

use thiserror::Error;

use crate::policy::Role;

/// Problems with the command line, detected before any network call.
#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("malformed source location '{0}', expected s3://bucket/prefix")]
    MalformedSource(String),

    #[error("malformed destination location '{0}', expected s3://bucket/prefix")]
    MalformedDestination(String),

    #[error("{0} access key and secret key must be given together")]
    IncompleteCredentials(Role),

    #[error("concurrency must be between 1 and {max}, got {value}")]
    Concurrency { value: usize, max: usize },
}

impl ArgumentError {
    /// Process exit code reported for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::IncompleteCredentials(Role::Destination) => 3,
            Self::IncompleteCredentials(Role::Source) => 4,
            Self::MalformedSource(_) => 5,
            Self::Concurrency { .. } => PARSE_FAILURE_EXIT_CODE,
            Self::MalformedDestination(_) => 7,
        }
    }
}

pub const PARSE_FAILURE_EXIT_CODE: u8 = 6;
pub const FATAL_EXIT_CODE: u8 = 8;
pub const PARTIAL_FAILURE_EXIT_CODE: u8 = 9;
pub const CANCELLED_EXIT_CODE: u8 = 130;

/// Enumerating the source prefix failed; no copy can start.
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("failed to list s3://{bucket}/{prefix}")]
    Request {
        bucket: String,
        prefix: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("listing of s3://{bucket}/{prefix} reported more pages without a continuation token")]
    MissingContinuationToken { bucket: String, prefix: String },
}

/// The step of a single object transfer that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    GetObject,
    ReadBody,
    PutEmpty,
    CreateUpload,
    UploadPart(i32),
    Complete,
    LengthMismatch,
    Cancelled,
    Panicked,
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetObject => write!(f, "get object"),
            Self::ReadBody => write!(f, "read source body"),
            Self::PutEmpty => write!(f, "put empty object"),
            Self::CreateUpload => write!(f, "create multipart upload"),
            Self::UploadPart(n) => write!(f, "upload part {n}"),
            Self::Complete => write!(f, "complete multipart upload"),
            Self::LengthMismatch => write!(f, "verify content length"),
            Self::Cancelled => write!(f, "copy"),
            Self::Panicked => write!(f, "copy task"),
        }
    }
}

/// Failure of one object transfer. Never aborts sibling transfers.
#[derive(Debug, Error)]
#[error("{stage} failed: {source:#}")]
pub struct TransferError {
    pub stage: TransferStage,
    #[source]
    source: anyhow::Error,
}

impl TransferError {
    pub fn new(stage: TransferStage, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(
            TransferStage::Cancelled,
            anyhow::anyhow!("cancelled before completion"),
        )
    }

    pub fn length_mismatch(declared: i64, transferred: i64) -> Self {
        Self::new(
            TransferStage::LengthMismatch,
            anyhow::anyhow!("declared {declared} byte(s) but the stream produced {transferred}"),
        )
    }
}
