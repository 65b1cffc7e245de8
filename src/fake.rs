// In-memory backend used by the unit tests. Records every call in order.

use crate::api::{DriveApi, FileInfo, FilePayload, ListPage, PartBody, PartRequest, PartResult};
use crate::error::UploadError;
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncReadExt;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    MakeDir(String),
    ListPage { path: String, token: Option<String> },
    UploadPart { session: String, request: PartRequest, bytes: Vec<u8> },
    CreateFile(FilePayload),
    DeleteSession(String),
}

#[derive(Default)]
pub struct FakeDrive {
    calls: Mutex<Vec<Call>>,
    listings: HashMap<String, Vec<String>>,
    page_size: usize,
    failing_parts: HashSet<u32>,
    failing_dirs: HashSet<String>,
    failing_listings: HashSet<String>,
    reverse_completion: bool,
    busy_finalizes: AtomicU32,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

fn status(code: StatusCode) -> UploadError {
    UploadError::Status {
        status: code,
        body: "fake".into(),
    }
}

impl FakeDrive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries the remote directory `path` already holds.
    pub fn with_listing(mut self, path: &str, names: &[&str]) -> Self {
        self.listings
            .insert(path.to_string(), names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Split listings into pages of `size` entries.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Answer part `part_no` with HTTP 500.
    pub fn fail_part(mut self, part_no: u32) -> Self {
        self.failing_parts.insert(part_no);
        self
    }

    /// Answer mkdir of `path` with HTTP 403.
    pub fn fail_dir(mut self, path: &str) -> Self {
        self.failing_dirs.insert(path.to_string());
        self
    }

    pub fn fail_listing(mut self, path: &str) -> Self {
        self.failing_listings.insert(path.to_string());
        self
    }

    /// Make lower-numbered parts finish last.
    pub fn reverse_completion(mut self) -> Self {
        self.reverse_completion = true;
        self
    }

    /// Answer the next `count` finalize calls with HTTP 503.
    pub fn busy_finalizes(self, count: u32) -> Self {
        self.busy_finalizes.store(count, Ordering::SeqCst);
        self
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<(String, PartRequest, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::UploadPart { session, request, bytes } => Some((session, request, bytes)),
                _ => None,
            })
            .collect()
    }

    pub fn finalized(&self) -> Vec<FilePayload> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateFile(payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::DeleteSession(session) => Some(session),
                _ => None,
            })
            .collect()
    }

    /// Most part uploads that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn made_dirs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::MakeDir(path) => Some(path),
                _ => None,
            })
            .collect()
    }
}

impl DriveApi for FakeDrive {
    async fn make_dir(&self, path: &str) -> Result<(), UploadError> {
        self.record(Call::MakeDir(path.to_string()));
        if self.failing_dirs.contains(path) {
            return Err(status(StatusCode::FORBIDDEN));
        }
        Ok(())
    }

    async fn list_page(&self, path: &str, page_token: Option<&str>) -> Result<ListPage, UploadError> {
        self.record(Call::ListPage {
            path: path.to_string(),
            token: page_token.map(str::to_string),
        });
        if self.failing_listings.contains(path) {
            return Err(status(StatusCode::NOT_FOUND));
        }

        let names = self.listings.get(path).cloned().unwrap_or_default();
        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let size = if self.page_size == 0 { names.len().max(1) } else { self.page_size };
        let end = (offset + size).min(names.len());

        let results = names[offset.min(end)..end]
            .iter()
            .map(|name| FileInfo {
                name: name.clone(),
                kind: "file".into(),
                ..FileInfo::default()
            })
            .collect();
        let next_page_token = if end < names.len() { end.to_string() } else { String::new() };
        Ok(ListPage {
            results,
            next_page_token,
        })
    }

    async fn upload_part(
        &self,
        session: &str,
        part: &PartRequest,
        mut body: PartBody,
    ) -> Result<PartResult, UploadError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        let mut bytes = Vec::new();
        let read = body.read_to_end(&mut bytes).await;

        if self.reverse_completion {
            let delay = u64::from(part.total_parts - part.part_no) * 15;
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        read?;

        let size = bytes.len() as u64;
        self.record(Call::UploadPart {
            session: session.to_string(),
            request: part.clone(),
            bytes,
        });
        if self.failing_parts.contains(&part.part_no) {
            return Err(status(StatusCode::INTERNAL_SERVER_ERROR));
        }

        Ok(PartResult {
            id: session.to_string(),
            name: part.file_name.clone(),
            part_id: 1000 + i64::from(part.part_no),
            part_no: part.part_no,
            total_parts: part.total_parts,
            channel_id: part.channel_id.unwrap_or_default(),
            size,
        })
    }

    async fn create_file(&self, payload: &FilePayload) -> Result<(), UploadError> {
        let busy = self
            .busy_finalizes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if busy {
            return Err(status(StatusCode::SERVICE_UNAVAILABLE));
        }
        self.record(Call::CreateFile(payload.clone()));
        Ok(())
    }

    async fn delete_session(&self, session: &str) -> Result<(), UploadError> {
        self.record(Call::DeleteSession(session.to_string()));
        Ok(())
    }
}
