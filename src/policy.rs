use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::types::RequestPayer;
use aws_smithy_runtime::client::http::hyper_014::HyperClientBuilder;
use aws_smithy_types::retry::RetryConfig;
use tracing::{debug, warn};

use crate::error::ArgumentError;
use crate::s3_utils::get_bucket_region;

const FALLBACK_REGION: &str = "us-east-1";
const MAX_ATTEMPTS: u32 = 5;

/// Which end of the copy a policy belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Destination,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Destination => write!(f, "destination"),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    access_key: String,
    secret_key: String,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"** redacted **")
            .finish()
    }
}

/// Credentials and billing mode for one side of the copy.
///
/// Each side owns its own policy so the requester-pays flag of the source can
/// never end up on a destination request, and the other way around.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    credentials: Option<StaticCredentials>,
    requester_pays: bool,
}

impl AccessPolicy {
    /// Build a policy from the optional key pair given on the command line.
    ///
    /// No keys selects the SDK default credential chain. Exactly one half of
    /// the pair is rejected.
    pub fn resolve(
        role: Role,
        access_key: Option<String>,
        secret_key: Option<String>,
        requester_pays: bool,
    ) -> Result<Self, ArgumentError> {
        let credentials = match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Some(StaticCredentials {
                access_key,
                secret_key,
            }),
            (None, None) => None,
            _ => return Err(ArgumentError::IncompleteCredentials(role)),
        };
        Ok(Self {
            credentials,
            requester_pays,
        })
    }

    pub fn requester_pays(&self) -> bool {
        self.requester_pays
    }

    /// Value for the `x-amz-request-payer` field of every request on this side.
    pub fn request_payer(&self) -> Option<RequestPayer> {
        self.requester_pays.then_some(RequestPayer::Requester)
    }

    pub fn has_static_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Build the long-lived client used for every request on this side.
    ///
    /// Without a region or endpoint override the bucket's own region is
    /// looked up first, so buckets in any region are reachable.
    pub async fn connect(&self, bucket: &str, options: &ClientOptions) -> Result<Client> {
        // Idle pool sized to the number of objects in flight
        let mut hyper_builder = hyper::Client::builder();
        hyper_builder.pool_max_idle_per_host(options.pool_size);
        hyper_builder.retry_canceled_requests(true);
        hyper_builder.http2_only(false);
        hyper_builder.pool_idle_timeout(Duration::from_secs(90));

        let http_client = HyperClientBuilder::new()
            .hyper_builder(hyper_builder)
            .build_https();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .http_client(http_client)
            .retry_config(RetryConfig::standard().with_max_attempts(MAX_ATTEMPTS));

        if let Some(creds) = &self.credentials {
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key.clone(),
                creds.secret_key.clone(),
                None,
                None,
                "s3_prefixcopy",
            ));
        }
        if let Some(r) = &options.region {
            loader = loader.region(Region::new(r.clone()));
        }

        debug!(
            bucket,
            static_credentials = self.has_static_credentials(),
            requester_pays = self.requester_pays(),
            "building client"
        );
        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &options.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
            if sdk_config.region().is_none() {
                builder = builder.region(Region::new(FALLBACK_REGION));
            }
        } else if options.region.is_none() {
            let probe_region = sdk_config
                .region()
                .cloned()
                .unwrap_or_else(|| Region::new(FALLBACK_REGION));
            let probe = Client::from_conf(builder.clone().region(probe_region.clone()).build());
            let region = match get_bucket_region(&probe, bucket).await {
                Ok(region) => Region::new(region),
                Err(e) => {
                    warn!(
                        bucket,
                        error = %format!("{e:#}"),
                        "could not detect bucket region, using {probe_region}"
                    );
                    probe_region
                }
            };
            debug!(bucket, %region, "resolved bucket region");
            builder = builder.region(region);
        }

        let config = builder.build();
        config
            .region()
            .with_context(|| format!("no region available for bucket '{bucket}'"))?;
        Ok(Client::from_conf(config))
    }
}

/// Connection settings for one side's client.
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub pool_size: usize,
}
