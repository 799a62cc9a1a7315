//! Form parsers and their configuration.

use std::path::PathBuf;

use actix_multipart::MultipartError;
use actix_web::{
    error::PayloadError,
    http::header::{self, HeaderMap},
    web::Bytes,
};
use futures_core::Stream;
use mime::Mime;

use crate::{
    assemble::{assemble, ParsedForm, Strategy},
    error::InvalidLimit,
    guard::FileGroup,
    limits::{Limits, LimitsConfig},
    reader::{read_body, ReadContext},
    sink::TempStorage,
    UploadError,
};

/// Configuration for an [`Uploader`].
///
/// ```
/// use actix_form_upload::{LimitsConfig, UploadConfig, Uploader};
///
/// let uploader = Uploader::new(
///     UploadConfig::default()
///         .limits(LimitsConfig::default().file_size("2MiB").files(4))
///         .directory(std::env::temp_dir()),
/// )
/// .unwrap();
///
/// assert_eq!(uploader.limits().file_size, 2 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, Default)]
pub struct UploadConfig {
    limits: LimitsConfig,
    directory: Option<PathBuf>,
}

impl UploadConfig {
    /// Sets the limits applied to every request.
    pub fn limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the directory to create temporary files in. By default the OS temporary directory is
    /// used.
    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = Some(dir.into());
        self
    }
}

/// Validated upload configuration that hands out per-route [`FormParser`]s.
#[derive(Debug, Clone, Default)]
pub struct Uploader {
    limits: Limits,
    storage: TempStorage,
}

impl Uploader {
    /// Validates `config`.
    ///
    /// # Errors
    /// Returns an error if any limit is not a finite, non-negative integer.
    pub fn new(config: UploadConfig) -> Result<Self, InvalidLimit> {
        let limits = config.limits.normalize()?;

        let storage = match config.directory {
            Some(dir) => TempStorage::in_dir(dir),
            None => TempStorage::new(),
        };

        Ok(Self { limits, storage })
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn storage(&self) -> &TempStorage {
        &self.storage
    }

    /// Accepts a single file under `name`.
    pub fn single(&self, name: impl Into<String>) -> FormParser {
        self.parser(
            Strategy::Single,
            Some(vec![FileGroup::new(name).max_count(1)]),
        )
    }

    /// Accepts files under `name`, optionally at most `max_count` of them.
    pub fn array(&self, name: impl Into<String>, max_count: Option<usize>) -> FormParser {
        let mut group = FileGroup::new(name);
        group.max_count = max_count;

        self.parser(Strategy::List, Some(vec![group]))
    }

    /// Accepts files under each of the `groups`' names, grouping them by name.
    pub fn groups(&self, groups: impl IntoIterator<Item = FileGroup>) -> FormParser {
        let groups: Vec<_> = groups.into_iter().collect();
        let names = groups.iter().map(|group| group.name.clone()).collect();

        self.parser(Strategy::Groups(names), Some(groups))
    }

    /// Accepts text fields only. Any file is unexpected.
    pub fn none(&self) -> FormParser {
        self.parser(Strategy::None, Some(Vec::new()))
    }

    /// Same as [`none`](Self::none).
    pub fn text_fields(&self) -> FormParser {
        self.none()
    }

    /// Accepts files under any field name.
    pub fn any(&self) -> FormParser {
        self.parser(Strategy::List, None)
    }

    fn parser(&self, strategy: Strategy, groups: Option<Vec<FileGroup>>) -> FormParser {
        FormParser {
            ctx: ReadContext::new(self.limits, groups, self.storage.clone()),
            strategy,
        }
    }
}

/// Result of [`FormParser::parse`].
#[derive(Debug)]
pub enum ParseOutcome {
    /// The request has no body.
    NoBody,

    /// The request body is not multipart. The payload was not read.
    NotMultipart,

    Form(ParsedForm),
}

/// Parses `multipart/form-data` request bodies for one route.
///
/// Add to your app data to have it picked up by the [`UploadedForm`](crate::UploadedForm)
/// extractor.
#[derive(Debug, Clone)]
pub struct FormParser {
    ctx: ReadContext,
    strategy: Strategy,
}

impl FormParser {
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn context(&self) -> &ReadContext {
        &self.ctx
    }

    /// Reads the request body described by `headers`.
    ///
    /// Requests without a body or without a `multipart/*` content type are passed over without
    /// reading `payload`. Other multipart subtypes are rejected.
    pub async fn parse<S>(&self, headers: &HeaderMap, payload: S) -> Result<ParseOutcome, UploadError>
    where
        S: Stream<Item = Result<Bytes, PayloadError>> + 'static,
    {
        if !has_body(headers) {
            return Ok(ParseOutcome::NoBody);
        }

        let Some(content_type) = content_type(headers).filter(|ct| ct.type_() == mime::MULTIPART)
        else {
            return Ok(ParseOutcome::NotMultipart);
        };

        if content_type.subtype() != mime::FORM_DATA {
            return Err(MultipartError::ContentTypeIncompatible.into());
        }

        let body = read_body(headers, payload, &self.ctx).await?;
        Ok(ParseOutcome::Form(assemble(&self.strategy, body.fields, body.files)))
    }
}

fn content_type(headers: &HeaderMap) -> Option<Mime> {
    headers
        .get(&header::CONTENT_TYPE)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Returns true if the headers announce a request body.
pub fn has_body(headers: &HeaderMap) -> bool {
    headers.contains_key(header::TRANSFER_ENCODING)
        || headers
            .get(header::CONTENT_LENGTH)
            .and_then(|len| len.to_str().ok())
            .is_some_and(|len| len.trim().parse::<u64>().is_ok())
}

/// Returns true if the content type is `multipart/*`.
pub fn is_multipart(headers: &HeaderMap) -> bool {
    content_type(headers).is_some_and(|ct| ct.type_() == mime::MULTIPART)
}

#[cfg(test)]
mod tests {
    use actix_web::http::header::HeaderValue;
    use assert_matches::assert_matches;
    use futures_util::stream;

    use super::*;
    use crate::{test::FormBuilder, ErrorCode, UploadedFiles};

    fn payload(body: Bytes) -> impl Stream<Item = Result<Bytes, PayloadError>> {
        stream::iter([Ok(body)])
    }

    async fn parse(parser: &FormParser, form: FormBuilder) -> Result<ParseOutcome, UploadError> {
        let (body, headers) = form.finish();
        parser.parse(&headers, payload(body)).await
    }

    fn into_form(outcome: ParseOutcome) -> ParsedForm {
        match outcome {
            ParseOutcome::Form(form) => form,
            outcome => panic!("expected a form, got {outcome:?}"),
        }
    }

    #[test]
    fn invalid_limits_fail_at_construction() {
        let err = Uploader::new(
            UploadConfig::default().limits(LimitsConfig::default().file_size("lots")),
        )
        .unwrap_err();

        assert_eq!(err.to_string(), "Invalid limit \"fileSize\" given: lots");
    }

    #[test]
    fn body_detection() {
        let mut headers = HeaderMap::new();
        assert!(!has_body(&headers));

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("abc"));
        assert!(!has_body(&headers));

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        assert!(has_body(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        assert!(has_body(&headers));
    }

    #[test]
    fn multipart_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_multipart(&headers));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_multipart(&headers));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/mixed; boundary=abc"),
        );
        assert!(is_multipart(&headers));
    }

    #[actix_rt::test]
    async fn no_body() {
        let parser = Uploader::default().any();
        let outcome = parser
            .parse(&HeaderMap::new(), stream::empty())
            .await
            .unwrap();

        assert_matches!(outcome, ParseOutcome::NoBody);
    }

    #[actix_rt::test]
    async fn not_multipart() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("2"));

        // the payload is never polled
        let payload = stream::poll_fn(|_| -> std::task::Poll<Option<Result<Bytes, PayloadError>>> {
            panic!("payload should not be read")
        });

        let outcome = Uploader::default()
            .any()
            .parse(&headers, payload)
            .await
            .unwrap();

        assert_matches!(outcome, ParseOutcome::NotMultipart);
    }

    #[actix_rt::test]
    async fn other_multipart_subtype() {
        let (body, mut headers) = FormBuilder::new().text("a", "b").finish();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/mixed; boundary=abc"),
        );

        let err = Uploader::default()
            .any()
            .parse(&headers, payload(body))
            .await
            .unwrap_err();

        assert_matches!(
            err,
            UploadError::Multipart(MultipartError::ContentTypeIncompatible)
        );
    }

    #[actix_rt::test]
    async fn single_file() {
        let parser = Uploader::default().single("avatar");
        assert_eq!(parser.strategy(), &Strategy::Single);

        let outcome = parse(
            &parser,
            FormBuilder::new()
                .text("name", "Ferris")
                .file("avatar", Some("crab.txt"), None, Bytes::from_static(b"crab")),
        )
        .await
        .unwrap();

        let form = into_form(outcome);
        assert_eq!(form.fields.get("name").unwrap().as_text(), Some("Ferris"));
        assert_eq!(
            form.files.single().unwrap().original_name.as_deref(),
            Some("crab.txt")
        );

        let err = parse(
            &parser,
            FormBuilder::new()
                .file("avatar", Some("1.txt"), None, Bytes::from_static(b"1"))
                .file("avatar", Some("2.txt"), None, Bytes::from_static(b"2")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::LimitFileCount));
        assert_eq!(err.field(), Some("avatar"));

        let outcome = parse(&parser, FormBuilder::new().text("name", "Ferris"))
            .await
            .unwrap();
        assert_matches!(into_form(outcome).files, UploadedFiles::Single(None));
    }

    #[actix_rt::test]
    async fn array_of_files() {
        let parser = Uploader::default().array("photos", Some(2));

        let outcome = parse(
            &parser,
            FormBuilder::new()
                .file("photos", Some("1.txt"), None, Bytes::from_static(b"1"))
                .file("photos", Some("2.txt"), None, Bytes::from_static(b"2")),
        )
        .await
        .unwrap();
        assert_eq!(into_form(outcome).files.list().unwrap().len(), 2);

        let err = parse(
            &parser,
            FormBuilder::new().file("other", Some("1.txt"), None, Bytes::from_static(b"1")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::LimitUnexpectedFile));
    }

    #[actix_rt::test]
    async fn grouped_files() {
        let parser = Uploader::default().groups([
            FileGroup::new("cv").max_count(1),
            FileGroup::new("photos").max_count(3),
            FileGroup::new("extra"),
        ]);

        let outcome = parse(
            &parser,
            FormBuilder::new()
                .file("photos", Some("1.txt"), None, Bytes::from_static(b"1"))
                .file("cv", Some("cv.txt"), None, Bytes::from_static(b"cv"))
                .file("photos", Some("2.txt"), None, Bytes::from_static(b"2")),
        )
        .await
        .unwrap();

        let files = into_form(outcome).files;
        assert_eq!(files.group("photos").unwrap().len(), 2);
        assert_eq!(files.group("cv").unwrap().len(), 1);
        assert!(files.group("extra").unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn text_only() {
        let parser = Uploader::default().text_fields();

        let outcome = parse(&parser, FormBuilder::new().text("a[]", "1").text("a[]", "2"))
            .await
            .unwrap();
        let form = into_form(outcome);
        assert_matches!(form.files, UploadedFiles::None);
        assert_eq!(form.fields.get("a").unwrap().as_list().unwrap().len(), 2);

        let err = parse(
            &parser,
            FormBuilder::new().file("f", Some("f.txt"), None, Bytes::from_static(b"f")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::LimitUnexpectedFile));
    }

    #[actix_rt::test]
    async fn any_field_name() {
        let parser = Uploader::default().any();

        let outcome = parse(
            &parser,
            FormBuilder::new()
                .file("x", Some("x.txt"), None, Bytes::from_static(b"x"))
                .file("y", Some("y.txt"), None, Bytes::from_static(b"y")),
        )
        .await
        .unwrap();

        let files = into_form(outcome).files.into_vec();
        let names: Vec<_> = files.iter().map(|file| file.field_name.as_str()).collect();
        assert_eq!(names, ["x", "y"]);
    }

    #[actix_rt::test]
    async fn custom_directory() {
        let dir = tempfile::tempdir().unwrap();
        let uploader = Uploader::new(UploadConfig::default().directory(dir.path())).unwrap();
        assert_eq!(uploader.storage().directory(), Some(dir.path()));

        let outcome = parse(
            &uploader.single("doc"),
            FormBuilder::new().file("doc", Some("d.txt"), None, Bytes::from_static(b"d")),
        )
        .await
        .unwrap();

        let form = into_form(outcome);
        let file = form.files.single().unwrap();
        assert!(file.path.starts_with(dir.path()));
    }
}
