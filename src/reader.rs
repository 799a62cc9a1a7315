//! Reads a `multipart/form-data` body into text fields and stored files.
//!
//! One decoder drives the body. Each decoded part is checked against the limits and then handed
//! to its own task: text parts are collected in memory and file parts are streamed to temporary
//! storage. Tasks run concurrently with the decoder within the calling task. The first error from
//! any source cancels the remaining tasks and the rest of the body is drained before it is
//! returned.

use std::pin::pin;

use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::{
    error::PayloadError,
    http::header::{self, HeaderMap},
    web::{Bytes, BytesMut},
};
use futures_core::{future::LocalBoxFuture, Stream};
use futures_util::{
    future::{self, Either},
    stream::FuturesUnordered,
    FutureExt as _, StreamExt as _,
};
use tokio_util::sync::CancellationToken;

use crate::{
    guard::{FileGroup, LimitGuard},
    limits::Limits,
    sink::{sink_file, FilePart, TempStorage},
    transport::Transport,
    FileRecord, UploadError,
};

const DEFAULT_CONTENT_TYPE: &str = "text/plain";
const DEFAULT_ENCODING: &str = "7bit";

/// Everything a body read needs to know about the form it is reading.
#[derive(Debug, Clone)]
pub struct ReadContext {
    pub limits: Limits,

    /// Field names accepting files; `None` accepts files under any name.
    pub groups: Option<Vec<FileGroup>>,

    pub storage: TempStorage,

    file_cap: u64,
}

impl ReadContext {
    pub fn new(limits: Limits, groups: Option<Vec<FileGroup>>, storage: TempStorage) -> Self {
        let file_cap = limits.file_cap(groups.as_deref());

        Self {
            limits,
            groups,
            storage,
            file_cap,
        }
    }

    /// Request-wide file cap. See [`Limits::file_cap`].
    pub fn file_cap(&self) -> u64 {
        self.file_cap
    }
}

/// Text fields and files of a body, each in arrival order.
#[derive(Debug, Default)]
pub struct RawBody {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FileRecord>,
}

/// Failure of a part task.
#[derive(Debug)]
pub(crate) enum TaskError {
    Failed(UploadError),

    /// The read was cancelled because another source failed first.
    Cancelled,
}

impl From<UploadError> for TaskError {
    fn from(err: UploadError) -> Self {
        TaskError::Failed(err)
    }
}

impl From<MultipartError> for TaskError {
    fn from(err: MultipartError) -> Self {
        TaskError::Failed(err.into())
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        TaskError::Failed(err.into())
    }
}

/// Reads the next chunk of a part, or fails with [`TaskError::Cancelled`] once `cancel` fires.
pub(crate) async fn next_chunk<S, E>(
    stream: &mut S,
    cancel: &CancellationToken,
) -> Result<Option<Bytes>, TaskError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    UploadError: From<E>,
{
    let cancelled = pin!(cancel.cancelled());

    match future::select(cancelled, stream.next()).await {
        Either::Left(_) => Err(TaskError::Cancelled),
        Either::Right((None, _)) => Ok(None),
        Either::Right((Some(Ok(chunk)), _)) => Ok(Some(chunk)),
        Either::Right((Some(Err(err)), _)) => Err(TaskError::Failed(err.into())),
    }
}

enum PartOutput {
    Text(String, String),
    File(FileRecord),
}

/// Part task output tagged with the part's arrival index.
type PartResult = (usize, Result<PartOutput, TaskError>);

enum Event {
    Part(Option<Result<Field, MultipartError>>),
    Task(Option<PartResult>),
}

/// Per-run counters and checks. Only touched between polls, in arrival order.
struct Dispatcher<'a> {
    ctx: &'a ReadContext,
    guard: Option<LimitGuard>,
    cancel: CancellationToken,
    parts: usize,
    files: u64,
    fields: u64,
}

impl<'a> Dispatcher<'a> {
    fn new(ctx: &'a ReadContext, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            guard: ctx.groups.as_deref().map(LimitGuard::new),
            cancel,
            parts: 0,
            files: 0,
            fields: 0,
        }
    }

    /// Checks `field` against the limits and returns the task that reads it.
    fn dispatch(
        &mut self,
        field: Field,
    ) -> Result<LocalBoxFuture<'static, PartResult>, UploadError> {
        let ctx = self.ctx;
        let limits = &ctx.limits;
        let idx = self.parts;
        self.parts += 1;

        if field.headers().len() as u64 > limits.header_pairs {
            return Err(UploadError::HeaderPairs);
        }

        let name = field.name().unwrap_or_default().to_owned();
        if name.len() as u64 > limits.field_name_size {
            return Err(UploadError::FieldKey);
        }

        let file_name = field.content_disposition().and_then(|cd| {
            cd.get_filename_ext()
                .map(|ext| String::from_utf8_lossy(&ext.value).into_owned())
                .or_else(|| cd.get_filename().map(ToOwned::to_owned))
        });

        let content_type = field
            .content_type()
            .map(|ct| ct.essence_str().to_owned())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned());

        let is_file =
            file_name.is_some() || content_type == mime::APPLICATION_OCTET_STREAM.essence_str();

        if !is_file {
            self.fields += 1;
            if self.fields > limits.fields {
                return Err(UploadError::FieldCount);
            }

            log::trace!("reading text field #{idx} {name:?}");

            let limit = limits.field_size;
            let cancel = self.cancel.clone();

            return Ok(async move { (idx, read_text(field, name, limit, &cancel).await) }
                .boxed_local());
        }

        self.files += 1;
        if self.files > ctx.file_cap {
            return Err(UploadError::FileCount { field: None });
        }

        if let Some(ref mut guard) = self.guard {
            guard.check(&name)?;
        }

        let encoding = field
            .headers()
            .get("content-transfer-encoding")
            .and_then(|enc| enc.to_str().ok())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| DEFAULT_ENCODING.to_owned());

        log::trace!("storing file #{idx} {name:?} ({content_type})");

        let part = FilePart {
            field_name: name,
            file_name,
            content_type,
            encoding,
            stream: field,
        };

        let storage = ctx.storage.clone();
        let file_size = limits.file_size;
        let cancel = self.cancel.clone();

        Ok(async move {
            let res = sink_file(part, &storage, file_size, &cancel).await;
            (idx, res.map(PartOutput::File))
        }
        .boxed_local())
    }
}

async fn read_text(
    mut field: Field,
    name: String,
    limit: u64,
    cancel: &CancellationToken,
) -> Result<PartOutput, TaskError> {
    let mut buf = BytesMut::new();

    while let Some(chunk) = next_chunk(&mut field, cancel).await? {
        if (buf.len() + chunk.len()) as u64 > limit {
            return Err(UploadError::FieldValue { field: name }.into());
        }

        buf.extend_from_slice(&chunk);
    }

    Ok(PartOutput::Text(name, String::from_utf8_lossy(&buf).into_owned()))
}

fn boundary(headers: &HeaderMap) -> Option<String> {
    let content_type: mime::Mime = headers
        .get(&header::CONTENT_TYPE)?
        .to_str()
        .ok()?
        .parse()
        .ok()?;

    content_type
        .get_param(mime::BOUNDARY)
        .map(|boundary| boundary.as_str().to_owned())
}

/// Reads a whole `multipart/form-data` body.
///
/// On success, fields and files are returned in the order their parts appeared in the body. On
/// failure, every file stored so far is removed and the rest of `payload` is read and discarded
/// before the first error is returned.
pub async fn read_body<S>(
    headers: &HeaderMap,
    payload: S,
    ctx: &ReadContext,
) -> Result<RawBody, UploadError>
where
    S: Stream<Item = Result<Bytes, PayloadError>> + 'static,
{
    let boundary = boundary(headers);
    let (transport, reader) = Transport::new(payload, boundary.as_deref());
    let mut decoder = Multipart::new(headers, reader);
    let cancel = CancellationToken::new();

    let mut dispatcher = Dispatcher::new(ctx, cancel.clone());
    let mut tasks = FuturesUnordered::new();
    let mut outputs = Vec::new();
    let mut decoder_done = false;

    let failure = loop {
        let next_event = async {
            if decoder_done {
                tasks.next().await.map(|res| Event::Task(Some(res)))
            } else if tasks.is_empty() {
                Some(Event::Part(decoder.next().await))
            } else {
                match future::select(decoder.next(), tasks.next()).await {
                    Either::Left((part, _)) => Some(Event::Part(part)),
                    Either::Right((res, _)) => Some(Event::Task(res)),
                }
            }
        };

        // the decoder stalls on a payload cut short, so watch for it separately
        let event = match future::select(pin!(next_event), pin!(transport.truncated())).await {
            Either::Left((Some(event), _)) => event,
            Either::Left((None, _)) => break None,
            Either::Right(_) => break Some(MultipartError::Incomplete.into()),
        };

        match event {
            Event::Part(Some(Ok(field))) => match dispatcher.dispatch(field) {
                Ok(task) => tasks.push(task),
                Err(err) => break Some(err),
            },

            // a body holding only the closing delimiter has no parts
            Event::Part(Some(Err(MultipartError::Incomplete)))
                if dispatcher.parts == 0 && transport.close_seen() =>
            {
                decoder_done = true;
            }

            Event::Part(Some(Err(err))) => break Some(err.into()),
            Event::Part(None) => decoder_done = true,

            Event::Task(Some((idx, Ok(output)))) => outputs.push((idx, output)),
            Event::Task(Some((_, Err(TaskError::Failed(err))))) => break Some(err),
            Event::Task(Some((_, Err(TaskError::Cancelled)))) | Event::Task(None) => {}
        }
    };

    let Some(err) = failure else {
        outputs.sort_by_key(|(idx, _)| *idx);

        let mut body = RawBody::default();
        for (_, output) in outputs {
            match output {
                PartOutput::Text(name, value) => body.fields.push((name, value)),
                PartOutput::File(record) => body.files.push(record),
            }
        }

        return Ok(body);
    };

    log::debug!("multipart read failed: {err}");

    cancel.cancel();
    while let Some((idx, res)) = tasks.next().await {
        if let Err(TaskError::Failed(err)) = res {
            log::debug!("ignoring error from part #{idx}: {err}");
        }
    }

    // removes stored files
    drop(outputs);

    drop(decoder);
    transport.detach();

    let drained = transport.drain().await;
    log::debug!("drained {drained} bytes of unread payload");

    Err(err)
}
