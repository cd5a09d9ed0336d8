//! Google Cloud Storage object client
//!
//! Talks to the GCS JSON API with a blocking `reqwest` client and an OAuth
//! bearer token (for example from `gcloud auth print-access-token`).

use std::fs::File;

use reqwest::blocking::{Body, Client, Response};
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use super::object::{ObjectClient, ObjectPage, ObjectSource};
use super::{DataReader, GcsConfig};
use crate::crypto::SecureString;
use crate::error::{DvomError, DvomResult};

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Debug)]
pub struct GcsClient {
    http: Client,
    endpoint: Url,
    bucket: String,
    token: Option<SecureString>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
}

impl GcsClient {
    pub fn connect(config: &GcsConfig) -> DvomResult<Self> {
        if config.bucket.is_empty() {
            return Err(DvomError::Config("GCS bucket is required".into()));
        }
        let endpoint = config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let endpoint = Url::parse(endpoint)
            .map_err(|e| DvomError::Config(format!("Invalid GCS endpoint {}: {}", endpoint, e)))?;

        // Uploads of large archives can take a long time
        let http = Client::builder()
            .timeout(None)
            .build()
            .map_err(|e| DvomError::Storage(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            bucket: config.bucket.clone(),
            token: config.token.clone(),
        })
    }

    /// `<endpoint>/<prefix...>/b/<bucket>/o[/<key>]` with each segment encoded
    fn object_url(&self, prefix: &[&str], key: Option<&str>) -> DvomResult<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| DvomError::Config("GCS endpoint cannot be a base URL".into()))?;
            segments.pop_if_empty();
            segments.extend(prefix);
            segments.extend(["b", self.bucket.as_str(), "o"]);
            if let Some(key) = key {
                segments.push(key);
            }
        }
        Ok(url)
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.as_str()),
            None => request,
        }
    }

    fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
        action: &str,
        key: &str,
    ) -> DvomResult<Response> {
        self.authorize(request).send().map_err(|e| {
            DvomError::Storage(format!(
                "Failed to {} gs://{}/{}: {}",
                action, self.bucket, key, e
            ))
        })
    }

    fn check(&self, response: Response, action: &str, key: &str) -> DvomResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(DvomError::Storage(format!(
            "Failed to {} gs://{}/{}: HTTP {} {}",
            action,
            self.bucket,
            key,
            status,
            body.trim()
        )))
    }
}

impl ObjectClient for GcsClient {
    fn location(&self) -> String {
        format!("gs://{}", self.bucket)
    }

    fn put_object(&self, key: &str, source: ObjectSource<'_>) -> DvomResult<()> {
        let mut url = self.object_url(&["upload", "storage", "v1"], None)?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);

        let body = match source {
            ObjectSource::Bytes(bytes) => Body::from(bytes.to_vec()),
            ObjectSource::File { path, len } => {
                let file = File::open(path).map_err(|e| {
                    DvomError::Storage(format!("Failed to open upload source: {}", e))
                })?;
                Body::sized(file, len)
            }
        };

        let request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);
        let response = self.send(request, "upload", key)?;
        self.check(response, "upload", key)?;
        Ok(())
    }

    fn get_object(&self, key: &str) -> DvomResult<Option<DataReader>> {
        let mut url = self.object_url(&["storage", "v1"], Some(key))?;
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self.send(self.http.get(url), "download", key)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.check(response, "download", key)?;
        Ok(Some(Box::new(response)))
    }

    fn head_object(&self, key: &str) -> DvomResult<bool> {
        let url = self.object_url(&["storage", "v1"], Some(key))?;
        let response = self.send(self.http.get(url), "check", key)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        self.check(response, "check", key)?;
        Ok(true)
    }

    fn delete_object(&self, key: &str) -> DvomResult<()> {
        let url = self.object_url(&["storage", "v1"], Some(key))?;
        let response = self.send(self.http.delete(url), "delete", key)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.check(response, "delete", key)?;
        Ok(())
    }

    fn list_page(&self, token: Option<&str>) -> DvomResult<ObjectPage> {
        let mut url = self.object_url(&["storage", "v1"], None)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("fields", "items(name),nextPageToken");
            if let Some(token) = token {
                query.append_pair("pageToken", token);
            }
        }

        let response = self.send(self.http.get(url), "list", "")?;
        let page: ListResponse = self
            .check(response, "list", "")?
            .json()
            .map_err(|e| DvomError::Storage(format!("Invalid GCS list response: {}", e)))?;

        Ok(ObjectPage {
            keys: page.items.into_iter().map(|item| item.name).collect(),
            next_token: page.next_page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str) -> GcsClient {
        GcsClient::connect(&GcsConfig {
            bucket: "backups".into(),
            endpoint: Some(endpoint.into()),
            token: None,
        })
        .unwrap()
    }

    #[test]
    fn test_object_url_encodes_key() {
        let client = client("https://storage.example.com");
        let url = client
            .object_url(&["storage", "v1"], Some("db@20240101-000000.json"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.example.com/storage/v1/b/backups/o/db@20240101-000000.json"
        );
    }

    #[test]
    fn test_missing_bucket_is_config_error() {
        let err = GcsClient::connect(&GcsConfig {
            bucket: String::new(),
            endpoint: None,
            token: None,
        })
        .unwrap_err();
        assert!(matches!(err, DvomError::Config(_)));
    }
}
