use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use casekit_http::{HttpClient, HttpClientBuilder, HttpError, HttpResponse};
use casekit_utils::SecretString;
use serde::Serialize;
use serde::de::DeserializeOwned;
use storage_gateway_sdk::{Entry, FileContent, SearchMatch};

use super::errors::classify;
use super::wire::{
    CreateFolderArg, FileMetadata, FolderResult, FullAccount, GetMetadataArg, ListFolderArg,
    ListFolderContinueArg, ListFolderResult, MatchFieldOptions, Metadata, MetadataResult, PathArg,
    SearchArg, SearchOptions, SearchResult, UploadArg, WriteMode,
};
use crate::config::DropboxConfig;
use crate::domain::ports::{AccountInfo, BackendConnector, ClassifiedError, StorageBackend};

const API_ARG_HEADER: &str = "Dropbox-API-Arg";
const API_RESULT_HEADER: &str = "Dropbox-API-Result";
const LIST_PAGE_LIMIT: u32 = 2000;

/// Builds [`DropboxBackend`] handles over one shared HTTP client.
#[derive(Clone)]
pub struct DropboxConnector {
    client: HttpClient,
    api_base: Arc<str>,
    content_base: Arc<str>,
}

impl DropboxConnector {
    /// # Errors
    /// `HttpError` if the HTTP client cannot be built.
    pub fn new(config: &DropboxConfig) -> Result<Self, HttpError> {
        let client = HttpClientBuilder::new()
            .timeout(config.request_timeout)
            .max_body_size(config.max_body_size)
            .tls_roots(config.tls_roots)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Use a preconfigured client, e.g. one that allows plain HTTP in tests.
    #[must_use]
    pub fn with_client(client: HttpClient, config: &DropboxConfig) -> Self {
        Self {
            client,
            api_base: Arc::from(config.api_base.trim_end_matches('/')),
            content_base: Arc::from(config.content_base.trim_end_matches('/')),
        }
    }
}

impl BackendConnector for DropboxConnector {
    fn connect(&self, token: SecretString) -> Arc<dyn StorageBackend> {
        Arc::new(DropboxBackend {
            connector: self.clone(),
            token,
        })
    }
}

/// Dropbox API v2 bound to one access token.
pub struct DropboxBackend {
    connector: DropboxConnector,
    token: SecretString,
}

impl DropboxBackend {
    fn api_url(&self, route: &str) -> String {
        format!("{}/2/{route}", self.connector.api_base)
    }

    fn content_url(&self, route: &str) -> String {
        format!("{}/2/{route}", self.connector.content_base)
    }

    async fn rpc<A, R>(&self, route: &str, arg: &A) -> Result<R, ClassifiedError>
    where
        A: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        self.connector
            .client
            .post(&self.api_url(route))
            .bearer(self.token.expose())
            .json(arg)
            .map_err(classify)?
            .send()
            .await
            .map_err(classify)?
            .json()
            .await
            .map_err(classify)
    }

    async fn content_call(
        &self,
        route: &str,
        arg: &impl Serialize,
        body: Option<Bytes>,
    ) -> Result<HttpResponse, ClassifiedError> {
        let arg = serde_json::to_string(arg)
            .map_err(|e| ClassifiedError::new(Some(400), "invalid_request", e.to_string()))?;
        let mut request = self
            .connector
            .client
            .post(&self.content_url(route))
            .bearer(self.token.expose())
            .header(API_ARG_HEADER, &arg);
        if let Some(bytes) = body {
            request = request
                .header("Content-Type", "application/octet-stream")
                .body_bytes(bytes);
        }
        request.send().await.map_err(classify)
    }
}

#[async_trait]
impl StorageBackend for DropboxBackend {
    async fn list_folder(&self, path: &str) -> Result<Vec<Entry>, ClassifiedError> {
        let mut page: ListFolderResult = self
            .rpc(
                "files/list_folder",
                &ListFolderArg {
                    path,
                    recursive: false,
                    include_deleted: false,
                    limit: LIST_PAGE_LIMIT,
                },
            )
            .await?;

        let mut entries = Vec::with_capacity(page.entries.len());
        loop {
            entries.extend(page.entries.into_iter().filter_map(Metadata::into_entry));
            if !page.has_more {
                break;
            }
            tracing::trace!(path, fetched = entries.len(), "continuing folder listing");
            page = self
                .rpc(
                    "files/list_folder/continue",
                    &ListFolderContinueArg {
                        cursor: &page.cursor,
                    },
                )
                .await?;
        }
        Ok(entries)
    }

    async fn download(&self, path: &str) -> Result<FileContent, ClassifiedError> {
        let response = self
            .content_call("files/download", &PathArg { path }, None)
            .await?;

        let metadata = response
            .header_str(API_RESULT_HEADER)
            .map(serde_json::from_str::<FileMetadata>)
            .transpose()
            .map_err(|e| ClassifiedError::new(None, "invalid_response", e.to_string()))?;

        let bytes = response.checked_bytes().await.map_err(classify)?;
        let metadata = metadata.ok_or_else(|| {
            ClassifiedError::new(None, "invalid_response", "download returned no metadata")
        })?;
        Ok(FileContent {
            bytes,
            metadata: metadata.into(),
        })
    }

    async fn upload(
        &self,
        path: &str,
        bytes: Bytes,
        overwrite: bool,
    ) -> Result<Entry, ClassifiedError> {
        let arg = UploadArg {
            path,
            mode: if overwrite {
                WriteMode::Overwrite
            } else {
                WriteMode::Add
            },
            autorename: false,
            mute: true,
        };
        let metadata: FileMetadata = self
            .content_call("files/upload", &arg, Some(bytes))
            .await?
            .json()
            .await
            .map_err(classify)?;
        Ok(metadata.into())
    }

    async fn create_folder(&self, path: &str) -> Result<Entry, ClassifiedError> {
        let result: FolderResult = self
            .rpc(
                "files/create_folder_v2",
                &CreateFolderArg {
                    path,
                    autorename: false,
                },
            )
            .await?;
        Ok(result.metadata.into())
    }

    async fn delete(&self, path: &str) -> Result<(), ClassifiedError> {
        let _: MetadataResult = self.rpc("files/delete_v2", &PathArg { path }).await?;
        Ok(())
    }

    async fn get_metadata(&self, path: &str) -> Result<Entry, ClassifiedError> {
        let metadata: Metadata = self
            .rpc(
                "files/get_metadata",
                &GetMetadataArg {
                    path,
                    include_deleted: false,
                },
            )
            .await?;
        metadata
            .into_entry()
            .ok_or_else(|| ClassifiedError::http(404, "not_found"))
    }

    async fn search(
        &self,
        query: &str,
        scope: &str,
        max_results: u32,
    ) -> Result<Vec<SearchMatch>, ClassifiedError> {
        let result: SearchResult = self
            .rpc(
                "files/search_v2",
                &SearchArg {
                    query,
                    options: SearchOptions {
                        path: scope,
                        max_results,
                        file_status: "active",
                    },
                    match_field_options: MatchFieldOptions {
                        include_highlights: true,
                    },
                },
            )
            .await?;
        Ok(result
            .matches
            .into_iter()
            .filter_map(super::wire::SearchMatchV2::into_match)
            .collect())
    }

    async fn current_account(&self) -> Result<AccountInfo, ClassifiedError> {
        let account: FullAccount = self
            .rpc("users/get_current_account", &serde_json::Value::Null)
            .await?;
        Ok(AccountInfo {
            account_id: account.account_id,
            display_name: account.name.display_name,
            email: account.email,
        })
    }
}
