use aws_sdk_s3::types::RequestPayer;
use tracing::debug;

use crate::error::ListingError;
use crate::store::ObjectStore;

/// An object seen by a listing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
}

impl ObjectSummary {
    pub fn new(key: impl Into<String>, size: i64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// Every object under a prefix at listing time, in listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    objects: Vec<ObjectSummary>,
}

impl Inventory {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Sum of the declared sizes.
    pub fn total_bytes(&self) -> i64 {
        self.iter().map(|o| o.size).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectSummary> {
        self.objects.iter()
    }
}

impl From<Vec<ObjectSummary>> for Inventory {
    fn from(objects: Vec<ObjectSummary>) -> Self {
        Self { objects }
    }
}

impl IntoIterator for Inventory {
    type Item = ObjectSummary;
    type IntoIter = std::vec::IntoIter<ObjectSummary>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.into_iter()
    }
}

/// List every object under `prefix`, following continuation tokens until the
/// store reports the last page. An empty prefix lists the whole bucket.
pub async fn list_objects(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    payer: Option<RequestPayer>,
) -> Result<Inventory, ListingError> {
    let mut objects = Vec::new();
    let mut continuation_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = store
            .list_page(bucket, prefix, continuation_token.take(), payer.clone())
            .await
            .map_err(|source| ListingError::Request {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                source,
            })?;
        pages += 1;
        objects.extend(page.objects);

        if !page.truncated {
            break;
        }
        match page.next_token {
            Some(token) => continuation_token = Some(token),
            None => {
                return Err(ListingError::MissingContinuationToken {
                    bucket: bucket.to_string(),
                    prefix: prefix.to_string(),
                });
            }
        }
    }

    debug!(bucket, prefix, pages, objects = objects.len(), "listing complete");
    Ok(Inventory::from(objects))
}
