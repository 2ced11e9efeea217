use anyhow::{Result, anyhow, bail};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;

const BUCKET_REGION_HEADER: &str = "x-amz-bucket-region";

/// Detect the region of an S3 bucket with HeadBucket.
///
/// S3 sends the `x-amz-bucket-region` header on redirects and access-denied
/// responses too, so buckets owned by other accounts still resolve.
pub async fn get_bucket_region(client: &Client, bucket: &str) -> Result<String> {
    match client.head_bucket().bucket(bucket).send().await {
        Ok(output) => region_from_header(output.bucket_region())
            .ok_or_else(|| anyhow!("no region reported for bucket '{}'", bucket)),
        Err(e) => {
            let response = e.raw_response();
            let header = response.and_then(|r| r.headers().get(BUCKET_REGION_HEADER));
            if let Some(region) = region_from_header(header) {
                return Ok(region);
            }

            match response.map(|r| r.status().as_u16()) {
                Some(404) => bail!("bucket '{}' does not exist", bucket),
                Some(403) => bail!("access denied reading the region of bucket '{}'", bucket),
                _ => bail!(
                    "could not read the region of bucket '{}': {}",
                    bucket,
                    DisplayErrorContext(&e)
                ),
            }
        }
    }
}

/// Region named by a `x-amz-bucket-region` value, if any.
fn region_from_header(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|region| !region.is_empty())
        .map(str::to_string)
}
