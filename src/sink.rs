//! Streams file parts to temporary storage.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use actix_multipart::MultipartError;
use actix_web::web::Bytes;
use futures_core::Stream;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt as _;
use tokio_util::sync::CancellationToken;

use crate::{
    file::{basename, extension},
    reader::{next_chunk, TaskError},
    sniff::{sniff, FileKind},
    FileRecord, UploadError,
};

const TEMP_PREFIX: &str = "upload-";

/// Where temporary files are created.
#[derive(Debug, Clone, Default)]
pub struct TempStorage {
    directory: Option<Arc<Path>>,
}

impl TempStorage {
    /// Creates temporary files in the OS default location.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates temporary files in `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(Arc::from(dir.into())),
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    fn create(&self) -> io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX);

        if let Some(ref dir) = self.directory {
            builder.tempfile_in(dir)
        } else {
            builder.tempfile()
        }
    }
}

/// A file part approved by the limit guard, still streaming from the decoder.
pub(crate) struct FilePart<S> {
    pub(crate) field_name: String,
    pub(crate) file_name: Option<String>,
    pub(crate) content_type: String,
    pub(crate) encoding: String,
    pub(crate) stream: S,
}

/// Writes `part` to a new temporary file and returns its record.
///
/// Fails with [`UploadError::FileSize`] as soon as more than `file_size` bytes arrive.
pub(crate) async fn sink_file<S>(
    part: FilePart<S>,
    storage: &TempStorage,
    file_size: u64,
    cancel: &CancellationToken,
) -> Result<FileRecord, TaskError>
where
    S: Stream<Item = Result<Bytes, MultipartError>> + Unpin,
{
    let FilePart {
        field_name,
        file_name,
        content_type,
        encoding,
        stream,
    } = part;

    let (file, path) = storage.create()?.into_parts();

    let (size, kind) = match write_part(stream, file, &field_name, file_size, cancel).await {
        Ok(written) => written,
        Err(err) => {
            remove(path);
            return Err(err);
        }
    };

    let original_name = file_name.map(|name| basename(&name).to_owned());
    let client_extension = original_name
        .as_deref()
        .map(extension)
        .unwrap_or_default()
        .to_owned();

    log::trace!("stored {size} bytes of field {field_name:?} at {}", path.display());

    Ok(FileRecord {
        field_name,
        original_name,
        client_mime_type: content_type,
        client_extension,
        encoding,
        detected_extension: kind
            .as_ref()
            .map(|kind| kind.extension.clone())
            .unwrap_or_default(),
        detected_mime_type: kind.map(|kind| kind.mime_type),
        size,
        path,
    })
}

/// Streams `stream` into `file`, then closes the file and awaits the sniffed kind.
async fn write_part<S>(
    stream: S,
    file: std::fs::File,
    field_name: &str,
    file_size: u64,
    cancel: &CancellationToken,
) -> Result<(u64, Option<FileKind>), TaskError>
where
    S: Stream<Item = Result<Bytes, MultipartError>> + Unpin,
{
    let mut file = tokio::fs::File::from_std(file);

    let (mut stream, detection) = sniff(stream);
    let mut size = 0_u64;

    while let Some(chunk) = next_chunk(&mut stream, cancel).await? {
        size += chunk.len() as u64;

        if size > file_size {
            return Err(UploadError::FileSize {
                field: field_name.to_owned(),
            }
            .into());
        }

        file.write_all(&chunk).await?;
    }

    // release the decoder before the slower tail work
    drop(stream);

    file.flush().await?;
    drop(file.into_std().await);

    Ok((size, detection.await))
}

fn remove(path: TempPath) {
    let display = path.display().to_string();

    if let Err(err) = path.close() {
        log::warn!("failed to remove temporary file {display}: {err}");
    }
}
