// Directory mode: mirror a local tree under a remote directory, one file at
// a time, skipping files whose name the remote directory already lists.

use crate::api::{join_remote_path, DriveApi};
use crate::error::UploadError;
use crate::upload::Uploader;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use std::fs::FileType;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Outcome counts of one walk. A subtree that could not be entered counts
/// as one failure.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkSummary {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct DirectoryWalker<'a, A> {
    uploader: &'a Uploader<A>,
}

struct LocalEntry {
    name: String,
    path: PathBuf,
    file_type: FileType,
}

async fn read_sorted_entries(dir: &Path) -> Result<Vec<LocalEntry>, UploadError> {
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        entries.push(LocalEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path(),
            file_type: entry.file_type().await?,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

enum EntryKind {
    Dir,
    File,
    Other,
}

// Symlinks are followed only to find regular files; a link to a directory
// is never descended into.
async fn classify(entry: &LocalEntry) -> std::io::Result<EntryKind> {
    if entry.file_type.is_dir() {
        return Ok(EntryKind::Dir);
    }
    if entry.file_type.is_file() {
        return Ok(EntryKind::File);
    }
    if entry.file_type.is_symlink() && tokio::fs::metadata(&entry.path).await?.is_file() {
        return Ok(EntryKind::File);
    }
    Ok(EntryKind::Other)
}

impl<'a, A: DriveApi> DirectoryWalker<'a, A> {
    pub fn new(uploader: &'a Uploader<A>) -> Self {
        Self { uploader }
    }

    /// Upload the contents of `local` into the remote directory `dest`,
    /// which must already exist. Counts land in `summary` as the walk goes,
    /// so they survive an error that ends the walk early.
    pub async fn walk(&self, local: &Path, dest: &str, summary: &mut WalkSummary) -> Result<(), UploadError> {
        self.walk_dir(local.to_path_buf(), dest.to_string(), summary).await
    }

    async fn remote_names(&self, dest: &str) -> Result<HashSet<String>, UploadError> {
        let entries = self.uploader.list_dir(dest).await?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }

    fn walk_dir<'b>(
        &'b self,
        local: PathBuf,
        dest: String,
        summary: &'b mut WalkSummary,
    ) -> BoxFuture<'b, Result<(), UploadError>> {
        async move {
            let entries = read_sorted_entries(&local).await?;
            // Fetched on the first file so a directory costs one listing.
            let mut existing: Option<HashSet<String>> = None;

            for entry in entries {
                if self.uploader.is_cancelled() {
                    return Err(UploadError::Cancelled);
                }
                let LocalEntry { ref name, ref path, .. } = entry;

                let kind = match classify(&entry).await {
                    Ok(kind) => kind,
                    Err(err) => {
                        error!(path = %path.display(), error = %err, "cannot stat local entry");
                        summary.failed += 1;
                        continue;
                    }
                };

                match kind {
                    EntryKind::Dir => {
                        let remote = join_remote_path(&dest, name);
                        if let Err(err) = self.uploader.make_dir(&remote).await {
                            if matches!(err, UploadError::Cancelled) {
                                return Err(err);
                            }
                            error!(path = %remote, error = %err, "cannot create remote directory, skipping subtree");
                            summary.failed += 1;
                            continue;
                        }
                        match self.walk_dir(path.clone(), remote, summary).await {
                            Ok(()) => {}
                            Err(UploadError::Cancelled) => return Err(UploadError::Cancelled),
                            Err(err) => {
                                error!(path = %path.display(), error = %err, "abandoned directory");
                                summary.failed += 1;
                            }
                        }
                    }
                    EntryKind::File => {
                        if existing.is_none() {
                            existing = Some(self.remote_names(&dest).await?);
                        }
                        if existing.as_ref().is_some_and(|names| names.contains(name)) {
                            info!(file = %name, dest = %dest, "already uploaded, skipping");
                            summary.skipped += 1;
                            continue;
                        }

                        match self.uploader.upload_file(path, &dest).await {
                            Ok(_) => summary.uploaded += 1,
                            Err(UploadError::Cancelled) => return Err(UploadError::Cancelled),
                            Err(err) => {
                                error!(file = %path.display(), error = %err, "upload failed");
                                summary.failed += 1;
                            }
                        }
                    }
                    EntryKind::Other => {
                        warn!(path = %path.display(), "not a regular file or directory, skipping");
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }
}
