//! Request extractor for uploaded forms.

use actix_web::{dev, web, FromRequest, HttpRequest};
use derive_more::{Deref, DerefMut};
use futures_core::future::LocalBoxFuture;

use crate::{FormParser, ParseOutcome, ParsedForm, UploadError, Uploader};

/// Extracts a `multipart/form-data` body with the [`FormParser`] found in app data.
///
/// The parser is looked up as `FormParser` and then as `Data<FormParser>`. Without one, only
/// text fields are accepted, under the default limits.
///
/// Requests without a body or with a content type other than `multipart/form-data` are rejected
/// with [`UploadError::NotMultipart`].
///
/// # Examples
/// ```
/// use actix_form_upload::{FileGroup, UploadedForm, Uploader};
/// use actix_web::{web, App, Responder};
///
/// async fn upload(form: UploadedForm) -> impl Responder {
///     let files = form.files.group("photos").map_or(0, |photos| photos.len());
///     format!("{} fields, {files} photos", form.fields.len())
/// }
///
/// let uploader = Uploader::default();
///
/// App::new().service(
///     web::resource("/upload")
///         .app_data(uploader.groups([FileGroup::new("photos").max_count(5)]))
///         .route(web::post().to(upload)),
/// );
/// ```
#[derive(Debug, Deref, DerefMut)]
pub struct UploadedForm(pub ParsedForm);

impl UploadedForm {
    /// Unwraps into the inner parsed form.
    pub fn into_inner(self) -> ParsedForm {
        self.0
    }
}

impl FromRequest for UploadedForm {
    type Error = UploadError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    #[inline]
    fn from_request(req: &HttpRequest, payload: &mut dev::Payload) -> Self::Future {
        let parser = parser_from_req(req);
        let payload = payload.take();
        let req = req.clone();

        Box::pin(async move {
            match parser.parse(req.headers(), payload).await? {
                ParseOutcome::Form(form) => Ok(UploadedForm(form)),
                ParseOutcome::NoBody | ParseOutcome::NotMultipart => {
                    Err(UploadError::NotMultipart)
                }
            }
        })
    }
}

fn parser_from_req(req: &HttpRequest) -> FormParser {
    req.app_data::<FormParser>()
        .or_else(|| req.app_data::<web::Data<FormParser>>().map(|d| d.as_ref()))
        .cloned()
        .unwrap_or_else(|| Uploader::default().none())
}
