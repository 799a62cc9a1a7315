//! Streaming `multipart/form-data` uploads for Actix Web.
//!
//! Request bodies are read part by part. Text fields are collected into nested [`FormFields`],
//! files are streamed to temporary files while their content type is sniffed from the first
//! bytes. Limits on field and file sizes and counts are enforced as the body arrives; on the first
//! violation every partially written file is removed and the rest of the body is drained.
//!
//! # Examples
//! ```no_run
//! use actix_form_upload::{LimitsConfig, UploadConfig, UploadedForm, Uploader};
//! use actix_web::{web, App, HttpServer, Responder};
//!
//! async fn upload(form: UploadedForm) -> impl Responder {
//!     match form.files.single() {
//!         Some(file) => format!("stored {} bytes at {}", file.size, file.path.display()),
//!         None => "no file".to_owned(),
//!     }
//! }
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let uploader = Uploader::new(
//!         UploadConfig::default().limits(LimitsConfig::default().file_size("5MB")),
//!     )
//!     .unwrap();
//!
//!     HttpServer::new(move || {
//!         App::new()
//!             .app_data(uploader.single("avatar"))
//!             .route("/", web::post().to(upload))
//!     })
//!     .bind(("127.0.0.1", 8080))?
//!     .run()
//!     .await
//! }
//! ```

#![deny(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

mod assemble;
mod error;
mod extractor;
mod fields;
mod file;
mod guard;
mod limits;
mod parser;
mod reader;
mod sink;
mod sniff;
mod transport;

pub use self::assemble::{assemble, ParsedForm, Strategy, UploadedFiles};
pub use self::error::{ErrorCode, InvalidLimit, UploadError};
pub use self::extractor::UploadedForm;
pub use self::fields::{FieldValue, FormFields};
pub use self::file::{FileRecord, FileStream};
pub use self::guard::{FileGroup, LimitGuard};
pub use self::limits::{LimitValue, Limits, LimitsConfig};
pub use self::parser::{has_body, is_multipart, FormParser, ParseOutcome, UploadConfig, Uploader};
pub use self::reader::{read_body, RawBody, ReadContext};
pub use self::sink::TempStorage;
pub use self::sniff::{sniff, Detection, FileKind, SniffStream, SAMPLE_LEN};
