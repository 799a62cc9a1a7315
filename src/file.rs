//! Completed file uploads.

use std::{
    io,
    path::Path,
    pin::Pin,
    task::{Context, Poll},
};

use actix_web::web::Bytes;
use futures_core::Stream;
use tempfile::TempPath;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// A file part that was fully written to temporary storage.
///
/// The temporary file is deleted when the record is dropped, unless it has been moved out with
/// [`persist`](Self::persist) or handed over with [`into_stream`](Self::into_stream).
#[derive(Debug)]
pub struct FileRecord {
    /// Name of the form field the file was sent under.
    pub field_name: String,

    /// Client supplied file name, without any directory components.
    pub original_name: Option<String>,

    /// The `content-type` declared by the client. Defaults to `text/plain`.
    pub client_mime_type: String,

    /// Extension of `original_name` including the leading dot, or empty.
    pub client_extension: String,

    /// The `content-transfer-encoding` declared by the client. Defaults to `7bit`.
    pub encoding: String,

    /// MIME type detected from the file's content.
    pub detected_mime_type: Option<String>,

    /// Extension matching the detected type including the leading dot, or empty.
    pub detected_extension: String,

    /// Size of the file in bytes.
    pub size: u64,

    /// Location of the temporary file.
    pub path: TempPath,
}

impl FileRecord {
    /// Opens the temporary file for reading.
    pub async fn open(&self) -> io::Result<File> {
        File::open(&self.path).await
    }

    /// Converts the record into a stream of the file's content.
    ///
    /// The temporary file is deleted once the stream is dropped.
    pub async fn into_stream(self) -> io::Result<FileStream> {
        let file = File::open(&self.path).await?;

        Ok(FileStream {
            reader: ReaderStream::new(file),
            path: self.path,
        })
    }

    /// Moves the file to `to`, keeping it after the record is gone.
    pub fn persist(self, to: impl AsRef<Path>) -> io::Result<()> {
        self.path.persist(to).map_err(|err| err.error)
    }
}

/// Returns the last path segment of a client supplied file name.
pub(crate) fn basename(name: &str) -> &str {
    name.rsplit(&['/', '\\'][..]).next().unwrap_or(name)
}

/// Returns the extension of `name` including the leading dot.
///
/// Leading dots do not start an extension, so `.profile` has none.
pub(crate) fn extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => "",
        Some(_) if name == ".." => "",
        Some(dot) => &name[dot..],
    }
}

/// Stream of a file's content returned by [`FileRecord::into_stream`].
#[derive(Debug)]
pub struct FileStream {
    // field order matters: the file is closed before the path is removed
    reader: ReaderStream<File>,
    path: TempPath,
}

impl FileStream {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Stream for FileStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.reader).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use futures_util::TryStreamExt as _;
    use tempfile::NamedTempFile;
    use tokio::io::AsyncReadExt as _;

    use super::*;

    fn record(content: &[u8]) -> FileRecord {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();

        FileRecord {
            field_name: "doc".to_owned(),
            original_name: Some("notes.txt".to_owned()),
            client_mime_type: "text/plain".to_owned(),
            client_extension: ".txt".to_owned(),
            encoding: "7bit".to_owned(),
            detected_mime_type: None,
            detected_extension: String::new(),
            size: content.len() as u64,
            path: file.into_temp_path(),
        }
    }

    #[test]
    fn basenames() {
        assert_eq!(basename("photo.png"), "photo.png");
        assert_eq!(basename("C:\\Users\\me\\photo.png"), "photo.png");
        assert_eq!(basename("../../etc/passwd"), "passwd");
        assert_eq!(basename("dir/"), "");
        assert_eq!(basename(""), "");
    }

    #[test]
    fn extensions() {
        assert_eq!(extension("photo.png"), ".png");
        assert_eq!(extension("archive.tar.gz"), ".gz");
        assert_eq!(extension("README"), "");
        assert_eq!(extension(".profile"), "");
        assert_eq!(extension("trailing."), ".");
        assert_eq!(extension(".."), "");
        assert_eq!(extension(""), "");
    }

    #[actix_rt::test]
    async fn drop_deletes_file() {
        let record = record(b"hello");
        let path = record.path.to_path_buf();
        assert!(path.exists());

        let mut content = String::new();
        record
            .open()
            .await
            .unwrap()
            .read_to_string(&mut content)
            .await
            .unwrap();
        assert_eq!(content, "hello");

        drop(record);
        assert!(!path.exists());
    }

    #[actix_rt::test]
    async fn stream_owns_file() {
        let record = record(b"streamed content");
        let path = record.path.to_path_buf();

        let stream = record.into_stream().await.unwrap();
        assert_eq!(stream.path(), path);
        assert!(path.exists());

        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"streamed content");

        // consumed by `try_collect`
        assert!(!path.exists());
    }

    #[test]
    fn persist_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("kept.txt");

        let record = record(b"keep me");
        let path = record.path.to_path_buf();
        record.persist(&target).unwrap();

        assert!(!path.exists());
        assert_eq!(std::fs::read(&target).unwrap(), b"keep me");
    }
}
