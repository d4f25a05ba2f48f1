//! Response body that streams a render file and releases it when dropped.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use super::lifecycle::{FileLifecycle, FingerprintGuard};

/// Streams a local render file.
///
/// Dropping the body (stream finished, errored or the client went away)
/// hands the file to the [`FileLifecycle`] and frees the fingerprint.
pub struct TempFileBody {
    stream: ReaderStream<File>,
    path: PathBuf,
    release: Option<(Arc<FileLifecycle>, FingerprintGuard)>,
}

impl TempFileBody {
    pub fn new(
        file: File,
        path: PathBuf,
        lifecycle: Arc<FileLifecycle>,
        guard: FingerprintGuard,
    ) -> Self {
        Self {
            stream: ReaderStream::new(file),
            path,
            release: Some((lifecycle, guard)),
        }
    }
}

impl Stream for TempFileBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

impl Drop for TempFileBody {
    fn drop(&mut self) {
        if let Some((lifecycle, guard)) = self.release.take() {
            lifecycle.release_blocking(&self.path, guard);
        }
    }
}
