// Parts: splitting a file into byte ranges and uploading one range as one
// HTTP request. Every part task opens its own file handle; the progress
// bar is the only thing the tasks share.

use crate::api::{DriveApi, PartRequest, PartResult};
use crate::error::UploadError;
use indicatif::ProgressBar;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, ReadBuf};

/// One contiguous byte range `[start, end)` of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTask {
    /// 1-based
    pub part_no: u32,
    pub start: u64,
    pub end: u64,
    pub name: String,
}

impl PartTask {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// `ceil(file_size / part_size)`, with an empty file still taking one part.
pub fn part_count(file_size: u64, part_size: u64) -> u64 {
    if file_size == 0 {
        1
    } else {
        file_size.div_ceil(part_size)
    }
}

/// Name sent for a part: the file name itself when there is only one part,
/// otherwise `<name>.part.NNN`.
pub fn part_name(file_name: &str, part_no: u32, total_parts: u32) -> String {
    if total_parts > 1 {
        format!("{}.part.{:03}", file_name, part_no)
    } else {
        file_name.to_string()
    }
}

/// Split `file_size` bytes into parts of `part_size` bytes; the last part
/// may be shorter.
pub fn plan_parts(file_name: &str, file_size: u64, part_size: u64) -> Result<Vec<PartTask>, UploadError> {
    if part_size == 0 {
        return Err(UploadError::Config("part size must be greater than zero".into()));
    }
    let total = u32::try_from(part_count(file_size, part_size)).map_err(|_| {
        UploadError::Config(format!(
            "{} needs more parts than supported with a part size of {} bytes",
            file_name, part_size
        ))
    })?;

    Ok((1..=total)
        .map(|part_no| {
            let start = u64::from(part_no - 1) * part_size;
            let end = (start + part_size).min(file_size);
            PartTask {
                part_no,
                start,
                end,
                name: part_name(file_name, part_no, total),
            }
        })
        .collect())
}

/// Reader that advances a progress bar by every byte it hands out.
pub struct ProgressReader<R> {
    inner: R,
    progress: ProgressBar,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, progress: ProgressBar) -> Self {
        Self { inner, progress }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            let read = buf.filled().len() - before;
            if read > 0 {
                self.progress.inc(read as u64);
            }
        }
        poll
    }
}

/// Uploads parts of one file into one upload session.
pub struct PartUploader<A> {
    api: Arc<A>,
    path: PathBuf,
    session: String,
    total_parts: u32,
    channel_id: Option<i64>,
    progress: ProgressBar,
}

impl<A: DriveApi> PartUploader<A> {
    pub fn new(
        api: Arc<A>,
        path: PathBuf,
        session: String,
        total_parts: u32,
        channel_id: Option<i64>,
        progress: ProgressBar,
    ) -> Self {
        Self {
            api,
            path,
            session,
            total_parts,
            channel_id,
            progress,
        }
    }

    /// Stream the byte range of `task` to the session. Progress counts the
    /// bytes read from disk whether or not the request then succeeds.
    pub async fn upload(&self, task: &PartTask) -> Result<PartResult, UploadError> {
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(task.start)).await?;
        let body = ProgressReader::new(file, self.progress.clone()).take(task.len());

        let request = PartRequest {
            file_name: task.name.clone(),
            part_no: task.part_no,
            total_parts: self.total_parts,
            channel_id: self.channel_id,
            content_length: task.len(),
        };
        self.api.upload_part(&self.session, &request, Box::new(body)).await
    }
}
