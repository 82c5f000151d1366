//! Invoice history stored as JSON files in the user's Google Drive.
//!
//! Every item lives in one app folder as `invoice-<id>.json`. The caller
//! supplies an OAuth access token; obtaining and refreshing it is the
//! frontend's job.

use std::time::Duration;

use futures::future::join_all;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::InvoiceHistoryItem;

pub const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
pub const UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3";
pub const APP_FOLDER_NAME: &str = "pharma-receipt-data";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const MULTIPART_BOUNDARY: &str = "-------pharmareceipt_boundary";
const LIST_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub modified_time: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct CreatedFile {
    id: String,
}

pub struct DriveClient {
    http: Client,
    access_token: String,
    api_base: String,
    upload_base: String,
    folder_id: OnceCell<String>,
}

impl DriveClient {
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self::with_http(http, access_token))
    }

    pub fn with_http(http: Client, access_token: impl Into<String>) -> Self {
        Self {
            http,
            access_token: access_token.into(),
            api_base: DRIVE_API.to_string(),
            upload_base: UPLOAD_API.to_string(),
            folder_id: OnceCell::new(),
        }
    }

    pub fn with_base_urls(mut self, api_base: &str, upload_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.upload_base = upload_base.trim_end_matches('/').to_string();
        self
    }

    /// Id of the app folder, created on first use and cached for this client.
    pub async fn app_folder_id(&self) -> Result<&str> {
        let id = self
            .folder_id
            .get_or_try_init(|| self.find_or_create_folder())
            .await?;
        Ok(id.as_str())
    }

    async fn find_or_create_folder(&self) -> Result<String> {
        let response = self
            .http
            .get(format!("{}/files", self.api_base))
            .bearer_auth(&self.access_token)
            .query(&[
                ("q", folder_query()),
                ("fields", "files(id,name)".to_string()),
                ("spaces", "drive".to_string()),
            ])
            .send()
            .await?;
        let found: FileList = ensure_success(response, "Failed to search Drive folders")
            .await?
            .json()
            .await?;
        if let Some(folder) = found.files.into_iter().next() {
            debug!(folder_id = %folder.id, "Found Drive app folder");
            return Ok(folder.id);
        }

        let response = self
            .http
            .post(format!("{}/files", self.api_base))
            .bearer_auth(&self.access_token)
            .json(&json!({ "name": APP_FOLDER_NAME, "mimeType": FOLDER_MIME }))
            .send()
            .await?;
        let created: CreatedFile = ensure_success(response, "Failed to create Drive folder")
            .await?
            .json()
            .await?;
        debug!(folder_id = %created.id, "Created Drive app folder");
        Ok(created.id)
    }

    /// Upload `item`, creating a new file or overwriting `existing_file_id`. Returns the file id.
    pub async fn save_item(
        &self,
        item: &InvoiceHistoryItem,
        existing_file_id: Option<&str>,
    ) -> Result<String> {
        let folder_id = self.app_folder_id().await?;
        let metadata = file_metadata(item, existing_file_id.is_none().then_some(folder_id));

        let mut stored = item.clone();
        stored.drive_file_id = None;
        let content = serde_json::to_string_pretty(&stored)?;
        let body = multipart_body(MULTIPART_BOUNDARY, &metadata, &content);

        let request = match existing_file_id {
            Some(file_id) => self
                .http
                .patch(format!("{}/files/{}", self.upload_base, file_id)),
            None => self.http.post(format!("{}/files", self.upload_base)),
        };
        let response = request
            .bearer_auth(&self.access_token)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(body)
            .send()
            .await?;
        let saved: CreatedFile = ensure_success(response, "Failed to save to Drive")
            .await?
            .json()
            .await?;
        Ok(saved.id)
    }

    /// Invoice files in the app folder, most recently modified first. Follows every result page.
    pub async fn list_files(&self) -> Result<Vec<DriveFile>> {
        let folder_id = self.app_folder_id().await?;
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("q", invoice_files_query(folder_id)),
                ("fields", "nextPageToken,files(id,name,modifiedTime)".to_string()),
                ("orderBy", "modifiedTime desc".to_string()),
                ("pageSize", LIST_PAGE_SIZE.to_string()),
                ("spaces", "drive".to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }
            let response = self
                .http
                .get(format!("{}/files", self.api_base))
                .bearer_auth(&self.access_token)
                .query(&query)
                .send()
                .await?;
            let page: FileList = ensure_success(response, "Failed to list Drive files")
                .await?
                .json()
                .await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!(count = files.len(), "Listed Drive invoice files");
        Ok(files)
    }

    pub async fn get_item(&self, file_id: &str) -> Result<InvoiceHistoryItem> {
        let response = self
            .http
            .get(format!("{}/files/{}", self.api_base, file_id))
            .bearer_auth(&self.access_token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        let body = ensure_success(response, "Failed to read Drive file")
            .await?
            .text()
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetch every item concurrently. Files that fail to download or parse are skipped.
    pub async fn list_all(&self) -> Result<Vec<InvoiceHistoryItem>> {
        let files = self.list_files().await?;
        let fetches = files.iter().map(|file| async move {
            match self.get_item(&file.id).await {
                Ok(mut item) => {
                    item.drive_file_id = Some(file.id.clone());
                    Some(item)
                }
                Err(e) => {
                    warn!(file = %file.name, error = %e, "Skipping unreadable Drive file");
                    None
                }
            }
        });
        Ok(join_all(fetches).await.into_iter().flatten().collect())
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/files/{}", self.api_base, file_id))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        ensure_success(response, "Failed to delete Drive file").await?;
        Ok(())
    }
}

async fn ensure_success(response: Response, context: &'static str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Drive {
        context,
        status: status.as_u16(),
        body: if body.is_empty() {
            status.canonical_reason().unwrap_or("").to_string()
        } else {
            body
        },
    })
}

fn folder_query() -> String {
    format!(
        "name='{}' and mimeType='{}' and trashed=false",
        APP_FOLDER_NAME, FOLDER_MIME
    )
}

fn invoice_files_query(folder_id: &str) -> String {
    format!(
        "'{}' in parents and mimeType='application/json' and trashed=false",
        folder_id
    )
}

pub fn file_name_for(item: &InvoiceHistoryItem) -> String {
    format!("invoice-{}.json", item.id)
}

/// Upload metadata. `parents` is only sent on creation; Drive rejects it on PATCH.
fn file_metadata(item: &InvoiceHistoryItem, parent: Option<&str>) -> Value {
    let mut metadata = json!({
        "name": file_name_for(item),
        "mimeType": "application/json",
    });
    if let Some(folder_id) = parent {
        metadata["parents"] = json!([folder_id]);
    }
    metadata
}

fn multipart_body(boundary: &str, metadata: &Value, content: &str) -> String {
    format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: application/json\r\n\r\n{content}\r\n--{b}--",
        b = boundary,
        meta = metadata,
        content = content,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        target: String,
        head: String,
        body: String,
    }

    impl Seen {
        fn is_folder_search(&self) -> bool {
            self.method == "GET" && self.target.contains("google-apps.folder")
        }
    }

    /// Minimal HTTP/1.1 responder on a random local port. `route` maps each request to a status and JSON body.
    async fn serve<F>(route: F) -> (String, Arc<Mutex<Vec<Seen>>>)
    where
        F: Fn(&Seen) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let route = Arc::new(route);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let log = log.clone();
                let route = route.clone();
                tokio::spawn(async move {
                    let request = read_request(&mut socket).await;
                    let (status, body) = route(&request);
                    log.lock().unwrap().push(request);
                    let response = format!(
                        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        (base, seen)
    }

    async fn read_request(socket: &mut TcpStream) -> Seen {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break buf.len();
            }
            buf.extend_from_slice(&chunk[..n]);
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < head_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let request_line = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let mut parts = request_line.split_whitespace();
        Seen {
            method: parts.next().unwrap_or_default().to_string(),
            target: parts.next().unwrap_or_default().to_string(),
            head,
            body: String::from_utf8_lossy(&buf[head_end..]).to_string(),
        }
    }

    fn stub_client(base: &str) -> DriveClient {
        let http = Client::builder().no_proxy().build().unwrap();
        DriveClient::with_http(http, "token")
            .with_base_urls(&format!("{base}/drive/v3"), &format!("{base}/upload/drive/v3"))
    }

    fn item() -> InvoiceHistoryItem {
        InvoiceHistoryItem {
            id: "1b4e28ba-2fa1-11d2-883f-0016d3cca427".to_string(),
            file_name: "factura.pdf".to_string(),
            processed_at: "2024-04-01T12:00:00+00:00".to_string(),
            invoices: vec![],
            drive_file_id: Some("old".to_string()),
        }
    }

    #[test]
    fn metadata_sets_parents_only_on_create() {
        let created = file_metadata(&item(), Some("folder-1"));
        assert_eq!(created["name"], "invoice-1b4e28ba-2fa1-11d2-883f-0016d3cca427.json");
        assert_eq!(created["parents"], json!(["folder-1"]));

        let updated = file_metadata(&item(), None);
        assert!(updated.get("parents").is_none());
    }

    #[test]
    fn multipart_body_has_two_parts_and_closing_boundary() {
        let body = multipart_body("B", &json!({"name": "x"}), "{\"id\":\"1\"}");
        assert_eq!(
            body,
            "--B\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"name\":\"x\"}\r\n--B\r\nContent-Type: application/json\r\n\r\n{\"id\":\"1\"}\r\n--B--"
        );
    }

    #[test]
    fn queries_scope_to_app_folder() {
        assert_eq!(
            folder_query(),
            "name='pharma-receipt-data' and mimeType='application/vnd.google-apps.folder' and trashed=false"
        );
        assert!(invoice_files_query("abc").starts_with("'abc' in parents"));
    }

    #[test]
    fn file_list_tolerates_missing_fields() {
        let list: FileList =
            serde_json::from_str(r#"{"files": [{"id": "f1", "modifiedTime": "2024-01-01T00:00:00Z"}]}"#)
                .unwrap();
        assert_eq!(list.files[0].id, "f1");
        assert_eq!(list.files[0].name, "");
        let empty: FileList = serde_json::from_str("{}").unwrap();
        assert!(empty.files.is_empty());
    }

    #[tokio::test]
    async fn unreachable_drive_reports_error() {
        let client = DriveClient::with_http(Client::new(), "token")
            .with_base_urls("http://127.0.0.1:9", "http://127.0.0.1:9");
        assert!(client.list_all().await.is_err());
    }

    #[tokio::test]
    async fn list_all_skips_unreadable_files_and_tags_drive_ids() {
        let mut stored = item();
        stored.id = "good-item".to_string();
        stored.drive_file_id = None;
        let good = serde_json::to_string(&stored).unwrap();
        let (base, seen) = serve(move |req| {
            if req.is_folder_search() {
                (200, r#"{"files":[{"id":"folder-1","name":"pharma-receipt-data"}]}"#.to_string())
            } else if req.target.starts_with("/drive/v3/files?") {
                (
                    200,
                    r#"{"files":[{"id":"good","name":"invoice-good-item.json"},{"id":"bad","name":"invoice-bad.json"}]}"#.to_string(),
                )
            } else if req.target.starts_with("/drive/v3/files/good?") {
                (200, good.clone())
            } else {
                (500, r#"{"error":{"code":500,"message":"Backend Error"}}"#.to_string())
            }
        })
        .await;
        let client = stub_client(&base);

        let items = client.list_all().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "good-item");
        assert_eq!(items[0].drive_file_id.as_deref(), Some("good"));

        let again = client.list_all().await.unwrap();
        assert_eq!(again, items);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().filter(|r| r.is_folder_search()).count(), 1);
        assert!(seen
            .iter()
            .any(|r| r.target.starts_with("/drive/v3/files/bad?") && r.target.contains("alt=media")));
        assert!(seen.iter().all(|r| r.head.contains("authorization: bearer token")));
    }

    #[tokio::test]
    async fn save_creates_with_parents_then_patches_without() {
        let (base, seen) = serve(|req| match req.method.as_str() {
            "GET" if req.is_folder_search() => (200, r#"{"files":[]}"#.to_string()),
            "POST" if req.target == "/drive/v3/files" => (200, r#"{"id":"folder-new"}"#.to_string()),
            "POST" | "PATCH" => (200, r#"{"id":"file-1"}"#.to_string()),
            _ => (404, String::new()),
        })
        .await;
        let client = stub_client(&base);

        let created = client.save_item(&item(), None).await.unwrap();
        assert_eq!(created, "file-1");
        let updated = client.save_item(&item(), Some(&created)).await.unwrap();
        assert_eq!(updated, "file-1");

        let seen = seen.lock().unwrap();
        let methods: Vec<&str> = seen.iter().map(|r| r.method.as_str()).collect();
        assert_eq!(methods, vec!["GET", "POST", "POST", "PATCH"]);

        let folder = &seen[1];
        assert!(folder.body.contains(r#""mimeType":"application/vnd.google-apps.folder""#));
        assert!(folder.body.contains(r#""name":"pharma-receipt-data""#));

        let create = &seen[2];
        assert!(create.target.starts_with("/upload/drive/v3/files?"));
        assert!(create.target.contains("uploadType=multipart"));
        assert!(create.head.contains("multipart/related; boundary="));
        assert!(create.body.contains(r#""parents":["folder-new"]"#));
        assert!(create.body.contains("invoice-1b4e28ba-2fa1-11d2-883f-0016d3cca427.json"));
        assert!(!create.body.contains("driveFileId"));

        let update = &seen[3];
        assert!(update.target.starts_with("/upload/drive/v3/files/file-1?"));
        assert!(update.target.contains("uploadType=multipart"));
        assert!(!update.body.contains("parents"));
        assert!(update.body.contains("invoice-1b4e28ba-2fa1-11d2-883f-0016d3cca427.json"));
    }

    #[tokio::test]
    async fn list_files_follows_page_tokens() {
        let (base, seen) = serve(|req| {
            if req.is_folder_search() {
                (200, r#"{"files":[{"id":"folder-1"}]}"#.to_string())
            } else if req.target.contains("pageToken=page-2") {
                (200, r#"{"files":[{"id":"c"}]}"#.to_string())
            } else {
                (200, r#"{"files":[{"id":"a"},{"id":"b"}],"nextPageToken":"page-2"}"#.to_string())
            }
        })
        .await;
        let client = stub_client(&base);

        let ids: Vec<String> = client
            .list_files()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let seen = seen.lock().unwrap();
        let pages: Vec<&Seen> = seen.iter().filter(|r| !r.is_folder_search()).collect();
        assert_eq!(pages.len(), 2);
        assert!(!pages[0].target.contains("pageToken="));
        assert!(pages[0].target.contains("pageSize=1000"));
    }
}
