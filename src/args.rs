use std::num::NonZeroUsize;

use clap::Parser;

use crate::copier::{MIB, S3_MAX_PART_SIZE, S3_MIN_PART_SIZE};
use crate::error::ArgumentError;
use crate::location::S3Location;
use crate::policy::{AccessPolicy, ClientOptions, Role};

pub const MIN_PART_SIZE_MB: i64 = S3_MIN_PART_SIZE / MIB;
pub const DEFAULT_PART_SIZE_MB: i64 = 15;
pub const MAX_PART_SIZE_MB: i64 = S3_MAX_PART_SIZE / MIB; // 5GB maximum in MB
pub const MAX_CONCURRENT_OBJECTS: usize = 1000;

/// CLI arguments for the S3 prefix copy tool
#[derive(Parser, Debug)]
#[command(name = "s3_prefixcopy")]
#[command(version, about = "S3 to S3 copy utility", long_about = None)]
pub struct Args {
    /// S3 key prefix to copy from (s3://source-bucket/path/from)
    #[arg(short = 'k', long = "from", value_name = "S3_URL")]
    pub from: String,

    /// S3 key prefix to copy to (s3://dest-bucket/path/to)
    #[arg(short = 'K', long = "to", value_name = "S3_URL")]
    pub to: String,

    /// AWS access key for the source bucket
    #[arg(short = 'a', long)]
    pub source_access_key: Option<String>,

    /// AWS secret key for the source bucket
    #[arg(short = 's', long)]
    pub source_secret_key: Option<String>,

    /// AWS access key for the destination bucket
    #[arg(short = 'A', long)]
    pub dest_access_key: Option<String>,

    /// AWS secret key for the destination bucket
    #[arg(short = 'S', long)]
    pub dest_secret_key: Option<String>,

    /// Pay for requests and transfer out of the source bucket
    #[arg(short = 'p', long, default_value_t = false)]
    pub source_requester_pays: bool,

    /// Pay for requests to the destination bucket
    #[arg(short = 'P', long, default_value_t = false)]
    pub dest_requester_pays: bool,

    /// Source region (detected from the bucket if not specified)
    #[arg(long)]
    pub source_region: Option<String>,

    /// Destination region (detected from the bucket if not specified)
    #[arg(long)]
    pub dest_region: Option<String>,

    /// Custom endpoint for the source, e.g. an S3-compatible store
    #[arg(long)]
    pub source_endpoint: Option<String>,

    /// Custom endpoint for the destination
    #[arg(long)]
    pub dest_endpoint: Option<String>,

    /// Number of objects copied at once (default: available parallelism)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Part size in MB (default: 15, min: 5, max: 5120)
    #[arg(long, value_parser = clap::value_parser!(i64).range(MIN_PART_SIZE_MB..=MAX_PART_SIZE_MB))]
    pub part_size: Option<i64>,

    /// Show some stats during copy process
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// Validated settings for one run.
#[derive(Debug)]
pub struct CopyConfig {
    pub source: S3Location,
    pub dest: S3Location,
    pub source_policy: AccessPolicy,
    pub dest_policy: AccessPolicy,
    pub source_client: ClientOptions,
    pub dest_client: ClientOptions,
    pub concurrency: usize,
    pub part_size: i64,
    pub verbose: bool,
}

impl Args {
    /// Check locations and credentials, in source-then-destination order, and
    /// fill in defaults.
    pub fn into_config(self) -> Result<CopyConfig, ArgumentError> {
        let source = S3Location::parse(&self.from)
            .ok_or_else(|| ArgumentError::MalformedSource(self.from.clone()))?;
        let source_policy = AccessPolicy::resolve(
            Role::Source,
            self.source_access_key,
            self.source_secret_key,
            self.source_requester_pays,
        )?;

        let dest = S3Location::parse(&self.to)
            .ok_or_else(|| ArgumentError::MalformedDestination(self.to.clone()))?;
        let dest_policy = AccessPolicy::resolve(
            Role::Destination,
            self.dest_access_key,
            self.dest_secret_key,
            self.dest_requester_pays,
        )?;

        let concurrency = self.concurrency.unwrap_or_else(default_concurrency);
        if concurrency == 0 || concurrency > MAX_CONCURRENT_OBJECTS {
            return Err(ArgumentError::Concurrency {
                value: concurrency,
                max: MAX_CONCURRENT_OBJECTS,
            });
        }

        let part_size_mb = self.part_size.unwrap_or(DEFAULT_PART_SIZE_MB);

        Ok(CopyConfig {
            source,
            dest,
            source_policy,
            dest_policy,
            source_client: ClientOptions {
                region: self.source_region,
                endpoint: self.source_endpoint,
                pool_size: concurrency,
            },
            dest_client: ClientOptions {
                region: self.dest_region,
                endpoint: self.dest_endpoint,
                pool_size: concurrency,
            },
            concurrency,
            part_size: part_size_mb * MIB,
            verbose: self.verbose,
        })
    }
}

/// One in-flight object per available execution unit.
fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .min(MAX_CONCURRENT_OBJECTS)
}
