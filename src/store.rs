use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, RequestPayer};
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::lister::ObjectSummary;
use crate::policy::AccessPolicy;

pub type BodyReader = Pin<Box<dyn AsyncRead + Send>>;

/// One page of a prefix listing.
#[derive(Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub truncated: bool,
    pub next_token: Option<String>,
}

/// An open source object: its declared length and a stream over its bytes.
pub struct ObjectBody {
    pub content_length: i64,
    pub reader: BodyReader,
}

/// The S3 operations the copy pipeline needs.
///
/// Every request takes the request payer of the side it is issued against, so
/// billing mode is threaded explicitly through each call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
        payer: Option<RequestPayer>,
    ) -> Result<ListPage>;

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        payer: Option<RequestPayer>,
    ) -> Result<ObjectBody>;

    async fn put_empty(&self, bucket: &str, key: &str, payer: Option<RequestPayer>) -> Result<()>;

    async fn create_upload(
        &self,
        bucket: &str,
        key: &str,
        payer: Option<RequestPayer>,
    ) -> Result<String>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        payer: Option<RequestPayer>,
    ) -> Result<CompletedPart>;

    async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
        payer: Option<RequestPayer>,
    ) -> Result<()>;

    async fn abort_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        payer: Option<RequestPayer>,
    ) -> Result<()>;
}

/// A bucket on one side of the copy, with the store and policy used to reach it.
#[derive(Clone)]
pub struct BucketAccess {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
    pub policy: AccessPolicy,
}

impl BucketAccess {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        policy: AccessPolicy,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            policy,
        }
    }

    pub fn payer(&self) -> Option<RequestPayer> {
        self.policy.request_payer()
    }
}

/// [`ObjectStore`] backed by the AWS SDK client.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
        payer: Option<RequestPayer>,
    ) -> Result<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation_token)
            .set_request_payer(payer)
            .send()
            .await
            .with_context(|| format!("ListObjectsV2 on s3://{}/{}", bucket, prefix))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|o| {
                o.key()
                    .map(|key| ObjectSummary::new(key, o.size().unwrap_or(0)))
            })
            .collect();

        Ok(ListPage {
            objects,
            truncated: output.is_truncated().unwrap_or(false),
            next_token: output.next_continuation_token().map(str::to_owned),
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        payer: Option<RequestPayer>,
    ) -> Result<ObjectBody> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_request_payer(payer)
            .send()
            .await
            .with_context(|| format!("GetObject s3://{}/{}", bucket, key))?;

        let content_length = output
            .content_length()
            .with_context(|| format!("s3://{}/{} has no declared content length", bucket, key))?;

        Ok(ObjectBody {
            content_length,
            reader: Box::pin(output.body.into_async_read()),
        })
    }

    async fn put_empty(&self, bucket: &str, key: &str, payer: Option<RequestPayer>) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from_static(b""))
            .content_length(0)
            .set_request_payer(payer)
            .send()
            .await
            .with_context(|| format!("PutObject s3://{}/{}", bucket, key))?;
        Ok(())
    }

    async fn create_upload(
        &self,
        bucket: &str,
        key: &str,
        payer: Option<RequestPayer>,
    ) -> Result<String> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_request_payer(payer)
            .send()
            .await
            .with_context(|| {
                format!("Failed to initiate multipart upload to s3://{}/{}", bucket, key)
            })?;

        response
            .upload_id()
            .map(str::to_owned)
            .with_context(|| format!("no upload id returned for s3://{}/{}", bucket, key))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        payer: Option<RequestPayer>,
    ) -> Result<CompletedPart> {
        let length = body.len() as i64;
        let response = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(length)
            .body(ByteStream::from(body))
            .set_request_payer(payer)
            .send()
            .await
            .with_context(|| format!("Failed to upload part {} ({} bytes)", part_number, length))?;

        Ok(CompletedPart::builder()
            .part_number(part_number)
            .set_e_tag(response.e_tag)
            .build())
    }

    async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
        payer: Option<RequestPayer>,
    ) -> Result<()> {
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .set_request_payer(payer)
            .send()
            .await
            .with_context(|| {
                format!("Failed to complete multipart upload for s3://{}/{}", bucket, key)
            })?;
        Ok(())
    }

    async fn abort_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        payer: Option<RequestPayer>,
    ) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .set_request_payer(payer)
            .send()
            .await
            .with_context(|| {
                format!("Failed to abort multipart upload for s3://{}/{}", bucket, key)
            })?;
        Ok(())
    }
}
