//! Error and Result module

use std::{fmt, io};

use actix_multipart::MultipartError;
use actix_web::{error::PayloadError, http::StatusCode, ResponseError};
use derive_more::{Display, Error};

/// Stable, machine-readable codes for the failures a caller is expected to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ClientAborted,
    LimitFileSize,
    LimitFileCount,
    LimitFieldKey,
    LimitFieldValue,
    LimitFieldCount,
    LimitUnexpectedFile,
}

impl ErrorCode {
    /// Returns the code as it appears on the wire, e.g. `LIMIT_FILE_SIZE`.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ClientAborted => "CLIENT_ABORTED",
            ErrorCode::LimitFileSize => "LIMIT_FILE_SIZE",
            ErrorCode::LimitFileCount => "LIMIT_FILE_COUNT",
            ErrorCode::LimitFieldKey => "LIMIT_FIELD_KEY",
            ErrorCode::LimitFieldValue => "LIMIT_FIELD_VALUE",
            ErrorCode::LimitFieldCount => "LIMIT_FIELD_COUNT",
            ErrorCode::LimitUnexpectedFile => "LIMIT_UNEXPECTED_FILE",
        }
    }

    /// Returns the fixed human-readable message for this code.
    pub const fn message(self) -> &'static str {
        match self {
            ErrorCode::ClientAborted => "Client aborted",
            ErrorCode::LimitFileSize => "File too large",
            ErrorCode::LimitFileCount => "Too many files",
            ErrorCode::LimitFieldKey => "Field name too long",
            ErrorCode::LimitFieldValue => "Field value too long",
            ErrorCode::LimitFieldCount => "Too many fields",
            ErrorCode::LimitUnexpectedFile => "Unexpected file field",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of errors that can occur while reading a `multipart/form-data` body.
#[derive(Debug, Display, Error)]
#[non_exhaustive]
pub enum UploadError {
    /// The client went away before the body was complete.
    #[display("Client aborted")]
    ClientAborted,

    /// A file part was larger than the `fileSize` limit.
    #[display("File too large")]
    FileSize { field: String },

    /// Too many files, either for one field or for the whole request.
    ///
    /// `field` is `None` when the request-wide `files` cap was hit.
    #[display("Too many files")]
    FileCount { field: Option<String> },

    /// A part's name was longer than the `fieldNameSize` limit.
    #[display("Field name too long")]
    FieldKey,

    /// A text field's value was longer than the `fieldSize` limit.
    #[display("Field value too long")]
    FieldValue { field: String },

    /// More text fields than the `fields` limit.
    #[display("Too many fields")]
    FieldCount,

    /// A file arrived under a field name that does not accept files.
    #[display("Unexpected file field")]
    UnexpectedFile { field: String },

    /// A part carried more header lines than the `headerPairs` limit.
    #[display("Too many header pairs in part")]
    HeaderPairs,

    /// Error reported by the multipart decoder.
    #[display("{_0}")]
    Multipart(MultipartError),

    /// Error reported by the request payload stream.
    #[display("{_0}")]
    Payload(PayloadError),

    /// Temporary file I/O error.
    #[display("File storage error: {_0}")]
    Storage(io::Error),

    /// Request does not carry a `multipart/form-data` body.
    #[display("Request is not multipart/form-data")]
    NotMultipart,
}

impl UploadError {
    /// Returns the stable code for this error, if it has one.
    ///
    /// Decoder, transport and storage failures are passed through as-is and have no code.
    pub fn code(&self) -> Option<ErrorCode> {
        Some(match self {
            UploadError::ClientAborted => ErrorCode::ClientAborted,
            UploadError::FileSize { .. } => ErrorCode::LimitFileSize,
            UploadError::FileCount { .. } => ErrorCode::LimitFileCount,
            UploadError::FieldKey => ErrorCode::LimitFieldKey,
            UploadError::FieldValue { .. } => ErrorCode::LimitFieldValue,
            UploadError::FieldCount => ErrorCode::LimitFieldCount,
            UploadError::UnexpectedFile { .. } => ErrorCode::LimitUnexpectedFile,
            _ => return None,
        })
    }

    /// Returns the name of the form field this error is attributed to, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            UploadError::FileSize { field }
            | UploadError::FieldValue { field }
            | UploadError::UnexpectedFile { field } => Some(field),
            UploadError::FileCount { field } => field.as_deref(),
            _ => None,
        }
    }
}

impl From<MultipartError> for UploadError {
    fn from(err: MultipartError) -> Self {
        match err {
            // the h1 dispatcher reports a dropped connection as an incomplete payload
            MultipartError::Payload(PayloadError::Incomplete(_)) => UploadError::ClientAborted,
            MultipartError::Payload(err) => UploadError::Payload(err),
            err => UploadError::Multipart(err),
        }
    }
}

impl From<PayloadError> for UploadError {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::Incomplete(_) => UploadError::ClientAborted,
            err => UploadError::Payload(err),
        }
    }
}

impl From<io::Error> for UploadError {
    fn from(err: io::Error) -> Self {
        UploadError::Storage(err)
    }
}

/// Return `BadRequest` for most `UploadError`s.
impl ResponseError for UploadError {
    fn status_code(&self) -> StatusCode {
        match self {
            UploadError::FileSize { .. }
            | UploadError::FieldKey
            | UploadError::FieldValue { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::Multipart(err) => err.status_code(),
            UploadError::Payload(err) => err.status_code(),
            UploadError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            UploadError::NotMultipart => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// A limit could not be normalized to a finite, non-negative integer.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("Invalid limit \"{key}\" given: {value}")]
pub struct InvalidLimit {
    pub key: &'static str,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_codes() {
        let errors = [
            UploadError::ClientAborted,
            UploadError::FileSize {
                field: "avatar".to_owned(),
            },
            UploadError::FileCount { field: None },
            UploadError::FieldKey,
            UploadError::FieldValue {
                field: "bio".to_owned(),
            },
            UploadError::FieldCount,
            UploadError::UnexpectedFile {
                field: "other".to_owned(),
            },
        ];

        for err in errors {
            let code = err.code().unwrap();
            assert_eq!(err.to_string(), code.message());
        }
    }

    #[test]
    fn field_attribution() {
        let err = UploadError::FileSize {
            field: "avatar".to_owned(),
        };
        assert_eq!(err.field(), Some("avatar"));
        assert_eq!(err.code().unwrap().as_str(), "LIMIT_FILE_SIZE");

        assert_eq!(UploadError::FileCount { field: None }.field(), None);
        assert_eq!(UploadError::FieldKey.field(), None);
    }

    #[test]
    fn decoder_errors_have_no_code() {
        let err = UploadError::from(MultipartError::Incomplete);
        assert!(err.code().is_none());
        assert!(err.field().is_none());
        assert_eq!(err.to_string(), MultipartError::Incomplete.to_string());
    }

    #[test]
    fn incomplete_payload_is_client_abort() {
        let err = UploadError::from(MultipartError::Payload(PayloadError::Incomplete(None)));
        assert_eq!(err.code(), Some(ErrorCode::ClientAborted));

        let err = UploadError::from(PayloadError::Overflow);
        assert!(err.code().is_none());
    }

    #[test]
    fn status_codes() {
        let err = UploadError::FileSize {
            field: "f".to_owned(),
        };
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            UploadError::UnexpectedFile {
                field: "f".to_owned()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            UploadError::NotMultipart.status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
    }

    #[test]
    fn invalid_limit_message() {
        let err = InvalidLimit {
            key: "files",
            value: "3.14".to_owned(),
        };
        assert_eq!(err.to_string(), "Invalid limit \"files\" given: 3.14");
    }
}
