// Upload orchestration for a single file: split it into parts, push the
// parts through a bounded pool of concurrent tasks, check that every part
// arrived, then register the file and discard the upload session.

use crate::api::{DriveApi, FileInfo, FilePayload, Part, PartResult};
use crate::config::Config;
use crate::error::UploadError;
use crate::pacer::Pacer;
use crate::part::{plan_parts, PartUploader};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, instrument, warn, Instrument};

/// Deterministic id of the remote upload session for one file:
/// lowercase hex MD5 of `name:dest:size`.
pub fn session_fingerprint(file_name: &str, dest: &str, file_size: u64) -> String {
    format!("{:x}", md5::compute(format!("{}:{}:{}", file_name, dest, file_size)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub part_size: u64,
    pub workers: usize,
    pub channel_id: Option<i64>,
    pub show_progress: bool,
}

impl From<&Config> for UploadOptions {
    fn from(config: &Config) -> Self {
        Self {
            part_size: config.part_size,
            workers: config.workers,
            channel_id: config.channel_id,
            show_progress: true,
        }
    }
}

/// A file registered on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub size: u64,
    pub parts: usize,
}

pub struct Uploader<A> {
    api: Arc<A>,
    pacer: Pacer,
    options: UploadOptions,
    cancel: CancellationToken,
}

impl<A: DriveApi> Uploader<A> {
    pub fn new(api: Arc<A>, options: UploadOptions, cancel: CancellationToken) -> Self {
        Self {
            api,
            pacer: Pacer::default(),
            options,
            cancel,
        }
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Create a remote directory. Succeeds whether or not it already existed.
    pub async fn make_dir(&self, path: &str) -> Result<(), UploadError> {
        let api = &*self.api;
        self.pacer.call(&self.cancel, move || api.make_dir(path)).await
    }

    /// Full listing of a remote directory, following page tokens.
    pub async fn list_dir(&self, path: &str) -> Result<Vec<FileInfo>, UploadError> {
        let api = &*self.api;
        let mut entries = Vec::new();
        let mut token = String::new();
        loop {
            let page_token = Some(token.as_str()).filter(|t| !t.is_empty());
            let page = self
                .pacer
                .call(&self.cancel, move || api.list_page(path, page_token))
                .await?;
            entries.extend(page.results);
            if page.next_page_token.is_empty() {
                return Ok(entries);
            }
            token = page.next_page_token;
        }
    }

    fn progress_bar(&self, size: u64, name: &str) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(size);
        if let Ok(style) = ProgressStyle::with_template(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        ) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(name.to_string());
        bar
    }

    /// Upload one local file into the remote directory `dest`.
    #[instrument(skip_all, fields(file = %path.display(), dest = %dest))]
    pub async fn upload_file(&self, path: &Path, dest: &str) -> Result<UploadedFile, UploadError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::Config(format!("{} has no file name", path.display())))?;
        let file_size = tokio::fs::metadata(path).await?.len();
        let mime_type = mime_guess::from_path(path).first_or_octet_stream().to_string();

        let session = session_fingerprint(&file_name, dest, file_size);
        let tasks = plan_parts(&file_name, file_size, self.options.part_size)?;
        let total = tasks.len();
        debug!(session = %session, parts = total, size = file_size, "split file into parts");

        let progress = self.progress_bar(file_size, &file_name);
        let uploader = Arc::new(PartUploader::new(
            self.api.clone(),
            path.to_path_buf(),
            session.clone(),
            total as u32,
            self.options.channel_id,
            progress.clone(),
        ));

        // The semaphore bounds running parts; the channel is sized so a
        // finished part never waits for the collector.
        let slots = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let (results_tx, mut results_rx) = mpsc::channel::<PartResult>(total);

        for task in tasks {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(part = task.part_no, "cancelled, not starting remaining parts");
                    break;
                }
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let results_tx = results_tx.clone();
            let uploader = uploader.clone();
            tokio::spawn(
                async move {
                    let _permit = permit;
                    match uploader.upload(&task).await {
                        Ok(part) => {
                            debug!(part = part.part_no, size = part.size, "part uploaded");
                            let _ = results_tx.send(part).await;
                        }
                        Err(err) => warn!(part = task.part_no, error = %err, "part upload failed, dropping it"),
                    }
                }
                .in_current_span()
                .with_current_subscriber(),
            );
        }
        // Once every task has dropped its sender the receiver drains and ends.
        drop(results_tx);

        let mut parts = Vec::with_capacity(total);
        while let Some(part) = results_rx.recv().await {
            parts.push(part);
        }
        progress.finish_and_clear();

        if parts.len() != total {
            // The session keeps the parts that did arrive; it is not deleted here.
            return Err(UploadError::Incomplete {
                name: file_name,
                uploaded: parts.len(),
                expected: total,
            });
        }
        parts.sort_by_key(|p| p.part_no);

        let payload = FilePayload {
            name: file_name.clone(),
            kind: "file".into(),
            parts: parts
                .iter()
                .map(|p| Part {
                    id: p.part_id,
                    part_no: p.part_no,
                })
                .collect(),
            mime_type,
            path: dest.to_string(),
            size: file_size,
        };

        let api = &*self.api;
        let payload_ref = &payload;
        self.pacer
            .call(&self.cancel, move || api.create_file(payload_ref))
            .await?;

        let session_ref = session.as_str();
        if let Err(err) = self
            .pacer
            .call(&self.cancel, move || api.delete_session(session_ref))
            .await
        {
            warn!(session = %session, error = %err, "file registered but upload session was not discarded");
        }

        info!(parts = total, size = file_size, "uploaded");
        Ok(UploadedFile {
            name: file_name,
            size: file_size,
            parts: total,
        })
    }
}
