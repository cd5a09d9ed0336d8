//! Amazon S3 (and S3-compatible) object client
//!
//! The SDK is async; the rest of dvom is not. Each client owns a
//! current-thread tokio runtime and blocks on every request. Downloads are
//! streamed into an anonymous temp file so the caller gets a plain `Read`.

use std::io::{Seek, SeekFrom, Write};

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::runtime::Runtime;

use super::object::{ObjectClient, ObjectPage, ObjectSource};
use super::{DataReader, S3Config};
use crate::error::{DvomError, DvomResult};

pub struct S3Client {
    runtime: Runtime,
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl S3Client {
    /// Build a client from explicit config; credentials fall back to the
    /// default AWS provider chain
    pub fn connect(config: &S3Config) -> DvomResult<Self> {
        if config.bucket.is_empty() {
            return Err(DvomError::Config("S3 bucket is required".into()));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DvomError::Storage(format!("Failed to start S3 runtime: {}", e)))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.as_str().to_string(),
                None,
                None,
                "dvom",
            ));
        }

        let sdk_config = runtime.block_on(loader.load());
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        // MinIO and most self-hosted services need path-style addressing
        if config.endpoint.is_some() {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            runtime,
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }
}

impl ObjectClient for S3Client {
    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    fn put_object(&self, key: &str, source: ObjectSource<'_>) -> DvomResult<()> {
        self.runtime.block_on(async {
            let body = match source {
                ObjectSource::Bytes(bytes) => ByteStream::from(bytes.to_vec()),
                ObjectSource::File { path, .. } => ByteStream::from_path(path).await.map_err(|e| {
                    DvomError::Storage(format!("Failed to open upload source: {}", e))
                })?,
            };

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_length(source.len() as i64)
                .body(body)
                .send()
                .await
                .map_err(|e| {
                    DvomError::Storage(format!(
                        "Failed to upload s3://{}/{}: {}",
                        self.bucket,
                        key,
                        e.into_service_error()
                    ))
                })?;
            Ok(())
        })
    }

    fn get_object(&self, key: &str) -> DvomResult<Option<DataReader>> {
        self.runtime.block_on(async {
            let output = match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(output) => output,
                Err(e) => {
                    let service_error = e.into_service_error();
                    if service_error.is_no_such_key() {
                        return Ok(None);
                    }
                    return Err(DvomError::Storage(format!(
                        "Failed to download s3://{}/{}: {}",
                        self.bucket, key, service_error
                    )));
                }
            };

            let mut file = tempfile::tempfile()
                .map_err(|e| DvomError::Storage(format!("Failed to create temp file: {}", e)))?;
            let mut body = output.body;
            while let Some(chunk) = body.try_next().await.map_err(|e| {
                DvomError::Storage(format!("Failed to read s3://{}/{}: {}", self.bucket, key, e))
            })? {
                file.write_all(&chunk)
                    .map_err(|e| DvomError::Storage(format!("Failed to spool download: {}", e)))?;
            }
            file.seek(SeekFrom::Start(0))
                .map_err(|e| DvomError::Storage(format!("Failed to rewind download: {}", e)))?;

            Ok(Some(Box::new(file) as DataReader))
        })
    }

    fn head_object(&self, key: &str) -> DvomResult<bool> {
        self.runtime.block_on(async {
            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(_) => Ok(true),
                Err(e) => {
                    let service_error = e.into_service_error();
                    if service_error.is_not_found() {
                        Ok(false)
                    } else {
                        Err(DvomError::Storage(format!(
                            "Failed to check s3://{}/{}: {}",
                            self.bucket, key, service_error
                        )))
                    }
                }
            }
        })
    }

    fn delete_object(&self, key: &str) -> DvomResult<()> {
        // S3 reports success for keys that do not exist
        self.runtime.block_on(async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    DvomError::Storage(format!(
                        "Failed to delete s3://{}/{}: {}",
                        self.bucket,
                        key,
                        e.into_service_error()
                    ))
                })?;
            Ok(())
        })
    }

    fn list_page(&self, token: Option<&str>) -> DvomResult<ObjectPage> {
        self.runtime.block_on(async {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(token.map(String::from))
                .send()
                .await
                .map_err(|e| {
                    DvomError::Storage(format!(
                        "Failed to list s3://{}: {}",
                        self.bucket,
                        e.into_service_error()
                    ))
                })?;

            let keys = output
                .contents()
                .iter()
                .filter_map(|object| object.key().map(String::from))
                .collect();
            let next_token = if output.is_truncated().unwrap_or(false) {
                output.next_continuation_token().map(String::from)
            } else {
                None
            };
            Ok(ObjectPage { keys, next_token })
        })
    }
}
