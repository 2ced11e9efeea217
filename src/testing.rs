//! In-memory object store for exercising the copy pipeline in tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use aws_sdk_s3::types::{CompletedPart, RequestPayer};
use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};

use crate::lister::ObjectSummary;
use crate::store::{ListPage, ObjectBody, ObjectStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    ListPage,
    GetObject,
    PutEmpty,
    CreateUpload,
    UploadPart,
    CompleteUpload,
    AbortUpload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: Op,
    pub bucket: String,
    pub key: String,
    pub payer: Option<RequestPayer>,
}

/// Reader whose every read fails, like a dropped connection.
pub struct FailingReader;

impl AsyncRead for FailingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Ready(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))
    }
}

struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, Bytes>,
}

/// Buckets held in memory. Listing is sorted by key and paginated with
/// `page_size`; multipart uploads only become objects on completion.
pub struct MemoryStore {
    page_size: usize,
    objects: Mutex<BTreeMap<(String, String), Bytes>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    failing_reads: Mutex<HashSet<String>>,
    panicking_reads: Mutex<HashSet<String>>,
    part_sizes: Mutex<Vec<usize>>,
    calls: Mutex<Vec<Call>>,
    next_upload: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_page_size(1000)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            objects: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(HashMap::new()),
            failing_reads: Mutex::new(HashSet::new()),
            panicking_reads: Mutex::new(HashSet::new()),
            part_sizes: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            next_upload: AtomicUsize::new(1),
        }
    }

    pub fn insert(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), Bytes::from(data));
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|b| b.to_vec())
    }

    /// All objects of a bucket, sorted by key.
    pub fn contents(&self, bucket: &str) -> Vec<(String, Vec<u8>)> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, _), _)| b == bucket)
            .map(|((_, k), v)| (k.clone(), v.to_vec()))
            .collect()
    }

    /// Make every read of `key` fail mid-stream.
    pub fn fail_reads_of(&self, key: &str) {
        self.failing_reads.lock().unwrap().insert(key.to_string());
    }

    /// Make `get_object` of `key` panic, like a bug in a worker.
    pub fn panic_on_read_of(&self, key: &str) {
        self.panicking_reads.lock().unwrap().insert(key.to_string());
    }

    pub fn part_sizes(&self) -> Vec<usize> {
        self.part_sizes.lock().unwrap().clone()
    }

    pub fn pending_uploads(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: Op, bucket: &str, key: &str, payer: &Option<RequestPayer>) {
        self.calls.lock().unwrap().push(Call {
            op,
            bucket: bucket.to_string(),
            key: key.to_string(),
            payer: payer.clone(),
        });
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
        payer: Option<RequestPayer>,
    ) -> Result<ListPage> {
        self.record(Op::ListPage, bucket, prefix, &payer);
        let start: usize = match continuation_token {
            Some(token) => token.parse()?,
            None => 0,
        };
        let matching: Vec<ObjectSummary> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), v)| ObjectSummary::new(k.clone(), v.len() as i64))
            .collect();

        let end = (start + self.page_size).min(matching.len());
        let truncated = end < matching.len();
        Ok(ListPage {
            objects: matching[start.min(end)..end].to_vec(),
            truncated,
            next_token: truncated.then(|| end.to_string()),
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        payer: Option<RequestPayer>,
    ) -> Result<ObjectBody> {
        self.record(Op::GetObject, bucket, key, &payer);
        let explode = self.panicking_reads.lock().unwrap().contains(key);
        if explode {
            panic!("worker crashed reading {key}");
        }
        let data = self
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchKey: s3://{bucket}/{key}"))?;

        if self.failing_reads.lock().unwrap().contains(key) {
            return Ok(ObjectBody {
                content_length: data.len() as i64,
                reader: Box::pin(FailingReader),
            });
        }
        Ok(ObjectBody {
            content_length: data.len() as i64,
            reader: Box::pin(Cursor::new(data)),
        })
    }

    async fn put_empty(&self, bucket: &str, key: &str, payer: Option<RequestPayer>) -> Result<()> {
        self.record(Op::PutEmpty, bucket, key, &payer);
        self.insert(bucket, key, Vec::new());
        Ok(())
    }

    async fn create_upload(
        &self,
        bucket: &str,
        key: &str,
        payer: Option<RequestPayer>,
    ) -> Result<String> {
        self.record(Op::CreateUpload, bucket, key, &payer);
        let upload_id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        self.uploads.lock().unwrap().insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
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
        self.record(Op::UploadPart, bucket, key, &payer);
        let mut uploads = self.uploads.lock().unwrap();
        let Some(upload) = uploads.get_mut(upload_id) else {
            bail!("NoSuchUpload: {upload_id}");
        };
        self.part_sizes.lock().unwrap().push(body.len());
        upload.parts.insert(part_number, body);
        Ok(CompletedPart::builder()
            .part_number(part_number)
            .e_tag(format!("etag-{part_number}"))
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
        self.record(Op::CompleteUpload, bucket, key, &payer);
        let upload = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| anyhow!("NoSuchUpload: {upload_id}"))?;

        let mut data = Vec::new();
        for part in parts {
            let number = part.part_number().unwrap_or_default();
            let bytes = upload
                .parts
                .get(&number)
                .ok_or_else(|| anyhow!("InvalidPart: {number}"))?;
            data.extend_from_slice(bytes);
        }
        self.insert(&upload.bucket, &upload.key, data);
        Ok(())
    }

    async fn abort_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        payer: Option<RequestPayer>,
    ) -> Result<()> {
        self.record(Op::AbortUpload, bucket, key, &payer);
        self.uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }
}

/// Counts objects between their source read and their destination write.
///
/// Only empty objects pass through it cleanly: `get_object` opens the window
/// and `put_empty` closes it after a short pause, so overlapping copies show
/// up in `max_in_flight`.
pub struct InFlightStore {
    inner: Arc<MemoryStore>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl InFlightStore {
    /// A source and a destination view over `inner` sharing one gauge.
    pub fn pair(inner: Arc<MemoryStore>) -> (Arc<Self>, Arc<Self>) {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let make = || {
            Arc::new(Self {
                inner: inner.clone(),
                in_flight: in_flight.clone(),
                max_in_flight: max_in_flight.clone(),
            })
        };
        (make(), make())
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InFlightStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
        payer: Option<RequestPayer>,
    ) -> Result<ListPage> {
        self.inner
            .list_page(bucket, prefix, continuation_token, payer)
            .await
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        payer: Option<RequestPayer>,
    ) -> Result<ObjectBody> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.inner.get_object(bucket, key, payer).await
    }

    async fn put_empty(&self, bucket: &str, key: &str, payer: Option<RequestPayer>) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = self.inner.put_empty(bucket, key, payer).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn create_upload(
        &self,
        bucket: &str,
        key: &str,
        payer: Option<RequestPayer>,
    ) -> Result<String> {
        self.inner.create_upload(bucket, key, payer).await
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
        self.inner
            .upload_part(bucket, key, upload_id, part_number, body, payer)
            .await
    }

    async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
        payer: Option<RequestPayer>,
    ) -> Result<()> {
        self.inner
            .complete_upload(bucket, key, upload_id, parts, payer)
            .await
    }

    async fn abort_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        payer: Option<RequestPayer>,
    ) -> Result<()> {
        self.inner.abort_upload(bucket, key, upload_id, payer).await
    }
}
