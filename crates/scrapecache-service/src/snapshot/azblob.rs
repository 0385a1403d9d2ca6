//! Snapshot storage in an Azure Storage blob container.
//!
//! This talks to the plain Blob REST API: a snapshot is one block blob that is downloaded with
//! `GET` and overwritten with `PUT`. Credentials are acquired elsewhere and handed in as a
//! [`BlobCredential`].

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use url::Url;

use super::{ConfigurationError, StoreError};

/// The Blob service REST API version we speak.
const API_VERSION: &str = "2021-08-06";

/// Environment variable holding a shared access signature for the container.
pub const SAS_TOKEN_ENV: &str = "AZURE_STORAGE_SAS_TOKEN";

/// Environment variable holding an OAuth bearer token for the storage account.
pub const BEARER_TOKEN_ENV: &str = "AZURE_STORAGE_BEARER_TOKEN";

/// How requests to the storage account are authorized.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum BlobCredential {
    /// No authorization, for public containers and local emulators.
    #[default]
    Anonymous,
    /// An OAuth bearer token, sent in the `Authorization` header.
    BearerToken(Arc<str>),
    /// A shared access signature, appended as query string.
    SasToken(Arc<str>),
}

impl fmt::Debug for BlobCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::BearerToken(_) => write!(f, "BearerToken(<redacted>)"),
            Self::SasToken(_) => write!(f, "SasToken(<redacted>)"),
        }
    }
}

impl BlobCredential {
    /// Picks up a credential from the environment.
    ///
    /// A SAS token takes precedence over a bearer token. Without either, requests are sent
    /// anonymously.
    pub fn from_env() -> Self {
        if let Some(token) = non_empty_var(SAS_TOKEN_ENV) {
            Self::SasToken(token.into())
        } else if let Some(token) = non_empty_var(BEARER_TOKEN_ENV) {
            Self::BearerToken(token.into())
        } else {
            Self::Anonymous
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// A snapshot store keeping the snapshot as a single blob in a storage container.
pub struct AzureBlobStore {
    client: Client,
    url: Url,
    credential: BlobCredential,
}

impl fmt::Debug for AzureBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBlobStore")
            .field("url", &self.blob_url().as_str())
            .field("credential", &self.credential)
            .finish()
    }
}

impl AzureBlobStore {
    /// Creates a store for `container/blob` on the storage account served at `endpoint`.
    pub fn new(
        endpoint: &Url,
        container: &str,
        blob: &str,
        credential: BlobCredential,
        connect_timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        let mut url = endpoint
            .join(&format!("{container}/{blob}"))
            .map_err(|_| ConfigurationError::malformed(endpoint.as_str(), "invalid blob url"))?;
        if let BlobCredential::SasToken(ref token) = credential {
            url.set_query(Some(token.trim_start_matches('?')));
        }

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(ConfigurationError::Client)?;

        Ok(Self {
            client,
            url,
            credential,
        })
    }

    /// The blob url, without any credentials.
    pub fn blob_url(&self) -> Url {
        let mut url = self.url.clone();
        url.set_query(None);
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("x-ms-version", API_VERSION);
        match self.credential {
            BlobCredential::BearerToken(ref token) => request.bearer_auth(token),
            _ => request,
        }
    }

    /// Downloads the blob, or `None` if it does not exist.
    ///
    /// Any other failure is an error, an unreachable or misconfigured storage account is never
    /// mistaken for a missing snapshot.
    pub async fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let response = self
            .authorize(self.client.get(self.url.clone()))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                tracing::trace!(url = %self.blob_url(), "Downloaded snapshot blob");
                Ok(Some(response.bytes().await?.to_vec()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(self.error_from_response(response).await),
        }
    }

    /// Uploads `content` as a block blob, overwriting any existing blob.
    pub async fn write(&self, content: &[u8]) -> Result<(), StoreError> {
        let response = self
            .authorize(self.client.put(self.url.clone()))
            .header("x-ms-blob-type", "BlockBlob")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(content.to_vec())
            .send()
            .await?;

        if response.status().is_success() {
            tracing::trace!(url = %self.blob_url(), "Uploaded snapshot blob");
            Ok(())
        } else {
            Err(self.error_from_response(response).await)
        }
    }

    async fn error_from_response(&self, response: Response) -> StoreError {
        let status = response.status();
        // The storage service explains itself in the `x-ms-error-code` header.
        let code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        // Consume the body to be nice to the server, it is only a bit of XML.
        response.bytes().await.ok();

        let details = match code {
            Some(code) => format!("{status} ({code})"),
            None => status.to_string(),
        };
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                StoreError::PermissionDenied(details)
            }
            _ => StoreError::Unavailable(details),
        }
    }
}
