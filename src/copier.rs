use aws_sdk_s3::types::CompletedPart;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{TransferError, TransferStage};
use crate::keymap::CopyTask;
use crate::store::{BodyReader, BucketAccess};

pub const MIB: i64 = 1024 * 1024;
/// Smallest part S3 accepts for any part but the last.
pub const S3_MIN_PART_SIZE: i64 = 5 * MIB;
pub const S3_MAX_PART_SIZE: i64 = 5 * 1024 * MIB;
pub const S3_MAX_PARTS: i64 = 10_000;

/// Result of copying one object.
#[derive(Debug)]
pub struct TransferOutcome {
    pub task: CopyTask,
    pub bytes_transferred: i64,
    pub error: Option<TransferError>,
}

impl TransferOutcome {
    pub fn success(task: CopyTask, bytes_transferred: i64) -> Self {
        Self {
            task,
            bytes_transferred,
            error: None,
        }
    }

    pub fn failure(task: CopyTask, error: TransferError) -> Self {
        Self {
            task,
            bytes_transferred: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Part size to use for an object of `content_length` bytes.
///
/// Starts from `chunk_size` and grows, in whole MiB, only when the object
/// would otherwise need more parts than S3 allows.
pub fn part_size_for(content_length: i64, chunk_size: i64) -> i64 {
    if (content_length + chunk_size - 1) / chunk_size <= S3_MAX_PARTS {
        return chunk_size;
    }
    let per_part = (content_length + S3_MAX_PARTS - 1) / S3_MAX_PARTS;
    let min_adaptive_size = (per_part + MIB - 1) / MIB * MIB;
    chunk_size.max(min_adaptive_size)
}

/// Streams one object from the source bucket into a multipart upload on the
/// destination bucket, one chunk in memory at a time.
#[derive(Debug, Clone)]
pub struct StreamingCopier {
    chunk_size: i64,
}

impl StreamingCopier {
    /// `chunk_size` is the size of every part but the last. Callers copying to
    /// S3 must keep it at or above [`S3_MIN_PART_SIZE`].
    pub fn new(chunk_size: i64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn copy(
        &self,
        task: CopyTask,
        source: &BucketAccess,
        dest: &BucketAccess,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        match self.transfer(&task, source, dest, cancel).await {
            Ok(bytes) => TransferOutcome::success(task, bytes),
            Err(e) => TransferOutcome::failure(task, e),
        }
    }

    async fn transfer(
        &self,
        task: &CopyTask,
        source: &BucketAccess,
        dest: &BucketAccess,
        cancel: &CancellationToken,
    ) -> Result<i64, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::cancelled());
        }

        let object = source
            .store
            .get_object(&source.bucket, &task.source_key, source.payer())
            .await
            .map_err(|e| TransferError::new(TransferStage::GetObject, e))?;
        let declared = object.content_length;

        if declared == 0 {
            drop(object);
            dest.store
                .put_empty(&dest.bucket, &task.dest_key, dest.payer())
                .await
                .map_err(|e| TransferError::new(TransferStage::PutEmpty, e))?;
            return Ok(0);
        }

        let upload_id = dest
            .store
            .create_upload(&dest.bucket, &task.dest_key, dest.payer())
            .await
            .map_err(|e| TransferError::new(TransferStage::CreateUpload, e))?;
        debug!(key = %task.dest_key, %upload_id, "multipart upload started");

        // Wrap the upload logic to ensure cleanup on failure
        let upload_result: Result<i64, TransferError> = async {
            let (parts, transferred) = self
                .upload_parts(object.reader, declared, &upload_id, task, dest, cancel)
                .await?;
            if transferred != declared {
                return Err(TransferError::length_mismatch(declared, transferred));
            }
            dest.store
                .complete_upload(&dest.bucket, &task.dest_key, &upload_id, parts, dest.payer())
                .await
                .map_err(|e| TransferError::new(TransferStage::Complete, e))?;
            Ok(transferred)
        }
        .await;

        if upload_result.is_err() {
            if let Err(abort_err) = dest
                .store
                .abort_upload(&dest.bucket, &task.dest_key, &upload_id, dest.payer())
                .await
            {
                warn!(
                    key = %task.dest_key,
                    %upload_id,
                    error = %format!("{abort_err:#}"),
                    "failed to abort multipart upload"
                );
            }
        }
        upload_result
    }

    /// Read the body chunk by chunk, uploading each chunk as the next part.
    /// Reading and uploading alternate, so at most one chunk is held.
    async fn upload_parts(
        &self,
        mut reader: BodyReader,
        declared: i64,
        upload_id: &str,
        task: &CopyTask,
        dest: &BucketAccess,
        cancel: &CancellationToken,
    ) -> Result<(Vec<CompletedPart>, i64), TransferError> {
        let part_size = part_size_for(declared, self.chunk_size);
        let mut parts = Vec::new();
        let mut transferred = 0i64;
        let mut part_number = 1i32;

        loop {
            if cancel.is_cancelled() {
                return Err(TransferError::cancelled());
            }

            let remaining = (declared - transferred).max(0) as u64;
            let chunk = read_chunk(&mut reader, part_size as u64, remaining)
                .await
                .map_err(|e| TransferError::new(TransferStage::ReadBody, e))?;
            if chunk.is_empty() {
                break;
            }

            let length = chunk.len() as i64;
            let part = dest
                .store
                .upload_part(
                    &dest.bucket,
                    &task.dest_key,
                    upload_id,
                    part_number,
                    chunk,
                    dest.payer(),
                )
                .await
                .map_err(|e| TransferError::new(TransferStage::UploadPart(part_number), e))?;
            debug!(key = %task.dest_key, part_number, length, "part uploaded");

            parts.push(part);
            transferred += length;
            part_number += 1;
        }

        Ok((parts, transferred))
    }
}

/// Read up to `limit` bytes, stopping early only at end of stream.
/// `expected` only sizes the initial allocation.
async fn read_chunk(reader: &mut BodyReader, limit: u64, expected: u64) -> std::io::Result<Bytes> {
    let mut chunk = Vec::with_capacity(limit.min(expected) as usize);
    (&mut *reader).take(limit).read_to_end(&mut chunk).await?;
    Ok(Bytes::from(chunk))
}
