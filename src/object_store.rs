use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Storage-level failures, classified for retry purposes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested object does not exist. Never retried.
    #[error("object not found")]
    NotFound,

    /// Network or backend hiccup; safe to retry the idempotent call.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// Anything else (auth, bad request, unexpected backend response).
    #[error("storage failure: {0}")]
    Other(String),
}

/// Thin adapter over the storage backend. No business logic lives here;
/// the production implementation owns retry/backoff for transient errors.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List all keys under a prefix, in the backend's native listing order.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Fetch the full body of one object.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Write an object, overwriting any existing object at the key.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;
}

/// Bounded exponential backoff for transient storage errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying on `StoreError::Transient` with doubling delays.
    /// `NotFound` and `Other` propagate immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(StoreError::Transient(message)) if attempt < self.max_attempts => {
                    let delay = self.base_delay * 2u32.pow(attempt - 1);
                    warn!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Transient storage error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// S3-backed object store.
pub struct S3ObjectStore {
    client: S3Client,
    retry: RetryPolicy,
}

impl S3ObjectStore {
    /// Build the S3 client from configuration, supporting custom endpoints
    /// and path-style access for MinIO/LocalStack.
    pub async fn new(config: &S3Config, retry: RetryPolicy) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(region = %config.region, "S3 object store initialized");

        Self { client, retry }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        // Drain every page; an aggregate built from a truncated listing
        // would silently drop rows.
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix);
            if let Some(ref token) = continuation {
                request = request.continuation_token(token);
            }

            let response = self
                .retry
                .run(|| {
                    let request = request.clone();
                    async move {
                        request
                            .send()
                            .await
                            .map_err(|err| classify_sdk_error("list", err))
                    }
                })
                .await?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(String::from)),
            );

            continuation = response.next_continuation_token().map(String::from);
            if !response.is_truncated().unwrap_or(false) || continuation.is_none() {
                break;
            }
        }

        debug!(prefix = %prefix, count = keys.len(), "Listed objects");
        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let request = self.client.get_object().bucket(bucket).key(key);

        let response = self
            .retry
            .run(|| {
                let request = request.clone();
                async move {
                    request.send().await.map_err(|err| {
                        if err
                            .as_service_error()
                            .map(GetObjectError::is_no_such_key)
                            .unwrap_or(false)
                        {
                            StoreError::NotFound
                        } else {
                            classify_sdk_error("get", err)
                        }
                    })
                }
            })
            .await?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|err| StoreError::Transient(format!("get body for {key:?}: {err}")))?;

        Ok(data.into_bytes().to_vec())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.retry
            .run(|| {
                let request = self
                    .client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .content_type(content_type)
                    .body(ByteStream::from(body.clone()));
                async move {
                    request
                        .send()
                        .await
                        .map(|_| ())
                        .map_err(|err| classify_sdk_error("put", err))
                }
            })
            .await?;

        debug!(key = %key, size_bytes = body.len(), "Object written");
        Ok(())
    }
}

/// Service error codes S3 reports for conditions worth retrying.
const TRANSIENT_CODES: [&str; 4] = [
    "InternalError",
    "ServiceUnavailable",
    "SlowDown",
    "RequestTimeout",
];

fn classify_sdk_error<E, R>(op: &'static str, err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StoreError::Transient(format!("{op}: {}", DisplayErrorContext(&err)))
        }
        SdkError::ServiceError(ctx) => {
            let code = ctx.err().code().unwrap_or_default();
            if TRANSIENT_CODES.contains(&code) {
                StoreError::Transient(format!("{op}: {code}"))
            } else {
                StoreError::Other(format!("{op}: {}", DisplayErrorContext(&err)))
            }
        }
        _ => StoreError::Other(format!("{op}: {}", DisplayErrorContext(&err))),
    }
}

/// In-memory object store for tests and local development.
///
/// Keys list in lexicographic order per bucket, mirroring S3. Supports an
/// artificial per-get delay, injected get failures, and tracking of the
/// maximum number of concurrent in-flight gets.
#[derive(Default)]
pub struct InMemoryStore {
    objects: RwLock<BTreeMap<(String, String), Vec<u8>>>,
    failing_keys: RwLock<Vec<String>>,
    get_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_get_delay(mut self, delay: Duration) -> Self {
        self.get_delay = Some(delay);
        self
    }

    /// Seed an object.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.objects
            .write()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    /// Make every subsequent `get` for `key` fail with a transient error.
    pub fn fail_gets_for(&self, key: &str) {
        self.failing_keys.write().unwrap().push(key.to_string());
    }

    /// Read back an object, if present.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Highest number of concurrently in-flight `get` calls observed.
    pub fn max_in_flight_gets(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let objects = self.objects.read().unwrap();
        Ok(objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let result = self.get_inner(bucket, key).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StoreError> {
        self.insert(bucket, key, body);
        Ok(())
    }
}

impl InMemoryStore {
    async fn get_inner(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        if let Some(delay) = self.get_delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_keys.read().unwrap().iter().any(|k| k == key) {
            return Err(StoreError::Transient(format!("injected failure for {key:?}")));
        }

        self.object(bucket, key).ok_or(StoreError::NotFound)
    }
}
