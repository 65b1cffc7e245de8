// API client module: talks to the drive backend over HTTP. The
// `DriveApi` trait is the seam the uploader works against; `ApiClient`
// is the reqwest implementation used by the binary.

use crate::config::Config;
use crate::error::UploadError;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Response, StatusCode, Url};
use serde::{Deserialize, Deserializer, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

pub const SESSION_COOKIE: &str = "user-session";
pub const LIST_PAGE_SIZE: u32 = 500;

/// Streamed bytes of one part.
pub type PartBody = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Decode `null` as the field's default, the way missing fields already are.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Server-side record of one uploaded part.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PartResult {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub part_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub part_no: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub total_parts: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub channel_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub size: u64,
}

/// Part reference sent when the file is finalized.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub id: i64,
    pub part_no: u32,
}

/// Create-file request body.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub parts: Vec<Part>,
    pub mime_type: String,
    pub path: String,
    pub size: u64,
}

/// Remote directory entry. Only `name` matters to the uploader; the rest
/// is kept for logging.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FileInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub mime_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub size: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub parent_id: String,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(deserialize_with = "null_as_default")]
    pub mod_time: String,
}

/// One page of a directory listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ListPage {
    #[serde(deserialize_with = "null_as_default")]
    pub results: Vec<FileInfo>,
    #[serde(deserialize_with = "null_as_default")]
    pub next_page_token: String,
}

#[derive(Serialize, Debug)]
struct CreateDirRequest<'a> {
    path: &'a str,
}

/// Query parameters of a part upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRequest {
    pub file_name: String,
    pub part_no: u32,
    pub total_parts: u32,
    pub channel_id: Option<i64>,
    pub content_length: u64,
}

/// Operations the uploader needs from the backend.
pub trait DriveApi: Send + Sync + 'static {
    fn make_dir(&self, path: &str) -> impl Future<Output = Result<(), UploadError>> + Send;

    fn list_page(
        &self,
        path: &str,
        page_token: Option<&str>,
    ) -> impl Future<Output = Result<ListPage, UploadError>> + Send;

    fn upload_part(
        &self,
        session: &str,
        part: &PartRequest,
        body: PartBody,
    ) -> impl Future<Output = Result<PartResult, UploadError>> + Send;

    fn create_file(&self, payload: &FilePayload) -> impl Future<Output = Result<(), UploadError>> + Send;

    fn delete_session(&self, session: &str) -> impl Future<Output = Result<(), UploadError>> + Send;
}

/// Prefix `path` with `/` when it is not already absolute.
pub fn absolute_remote_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Join a remote directory and an entry name with `/`.
pub fn join_remote_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    format!("{}/{}", parent, name.trim_start_matches('/'))
}

fn session_path(session: &str) -> String {
    format!("/api/uploads/{}", session)
}

/// reqwest-backed client. The session token travels as a cookie in a jar
/// scoped to the API URL.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self, UploadError> {
        let url: Url = config
            .api_url
            .parse()
            .map_err(|e| UploadError::Config(format!("invalid API_URL '{}': {}", config.api_url, e)))?;

        let jar = Jar::default();
        jar.add_cookie_str(&format!("{}={}", SESSION_COOKIE, config.session_token), &url);

        let client = Client::builder().cookie_provider(Arc::new(jar)).build()?;
        Ok(ApiClient {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Turn a non-success response into `UploadError::Status`, keeping the body
/// for the log.
async fn check_status(res: Response) -> Result<Response, UploadError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(UploadError::Status { status, body })
}

impl DriveApi for ApiClient {
    async fn make_dir(&self, path: &str) -> Result<(), UploadError> {
        let path = absolute_remote_path(path);
        let res = self
            .client
            .post(self.url("/api/files/makedir"))
            .json(&CreateDirRequest { path: &path })
            .send()
            .await?;
        check_status(res).await?;
        Ok(())
    }

    async fn list_page(&self, path: &str, page_token: Option<&str>) -> Result<ListPage, UploadError> {
        let mut query: Vec<(&str, String)> = vec![
            ("path", absolute_remote_path(path)),
            ("perPage", LIST_PAGE_SIZE.to_string()),
            ("sort", "name".into()),
            ("order", "asc".into()),
            ("op", "list".into()),
        ];
        if let Some(token) = page_token.filter(|t| !t.is_empty()) {
            query.push(("nextPageToken", token.to_string()));
        }
        let res = self.client.get(self.url("/api/files")).query(&query).send().await?;
        let page = check_status(res).await?.json::<ListPage>().await?;
        Ok(page)
    }

    async fn upload_part(
        &self,
        session: &str,
        part: &PartRequest,
        body: PartBody,
    ) -> Result<PartResult, UploadError> {
        let mut query: Vec<(&str, String)> = vec![
            ("fileName", part.file_name.clone()),
            ("partNo", part.part_no.to_string()),
            ("totalparts", part.total_parts.to_string()),
        ];
        if let Some(channel_id) = part.channel_id {
            query.push(("channelId", channel_id.to_string()));
        }

        let res = self
            .client
            .post(self.url(&session_path(session)))
            .query(&query)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, part.content_length)
            .body(Body::wrap_stream(ReaderStream::new(body)))
            .send()
            .await?;

        if res.status() != StatusCode::OK {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(UploadError::Status { status, body });
        }
        Ok(res.json::<PartResult>().await?)
    }

    async fn create_file(&self, payload: &FilePayload) -> Result<(), UploadError> {
        let res = self.client.post(self.url("/api/files")).json(payload).send().await?;
        check_status(res).await?;
        Ok(())
    }

    async fn delete_session(&self, session: &str) -> Result<(), UploadError> {
        let res = self.client.delete(self.url(&session_path(session))).send().await?;
        check_status(res).await?;
        Ok(())
    }
}
