use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;

use bytes::Bytes;
use image::ImageFormat;
use multer::{Constraints, Multipart, SizeLimit};
use spin_sdk::http::Request;
use tracing::debug;

use crate::core::errors::ApiError;
use crate::core::query_params::parse_urlencoded;

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Submitted form fields and files.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, UploadedFile>,
}

impl FormData {
    pub fn from_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            files: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Field value with surrounding whitespace removed; missing fields are empty.
    pub fn text(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().trim().to_string()
    }

    /// Checkbox semantics: present and not explicitly off.
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(v) if v != "off" && v != "false")
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        self.files.remove(name)
    }
}

/// Field name -> messages. Ordered so rendering is stable.
#[derive(Debug, Default, Clone)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
}

/// Parse an urlencoded or multipart request body.
pub fn parse_form(req: &Request, max_upload_bytes: u64) -> Result<FormData, ApiError> {
    let content_type = req
        .header("content-type")
        .and_then(|h| h.as_str())
        .unwrap_or_default()
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        parse_multipart(&content_type, req.body().to_vec(), max_upload_bytes)
    } else {
        let body = std::str::from_utf8(req.body())
            .map_err(|_| ApiError::BadRequest("form body is not valid UTF-8".to_string()))?;
        Ok(FormData {
            fields: parse_urlencoded(body),
            files: HashMap::new(),
        })
    }
}

fn parse_multipart(content_type: &str, body: Vec<u8>, max_upload_bytes: u64) -> Result<FormData, ApiError> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|_| ApiError::BadRequest("invalid multipart boundary".to_string()))?;

    let constraints = Constraints::new().size_limit(SizeLimit::new().whole_stream(max_upload_bytes));
    let stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(Bytes::from(body)) });
    let mut multipart = Multipart::with_constraints(stream, boundary, constraints);

    futures::executor::block_on(async move {
        let mut form = FormData::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let file_name = field.file_name().map(str::to_string);
            let field_type = field.content_type().map(|m| m.essence_str().to_string());
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?;

            match file_name {
                // browsers send an empty part for an untouched file input
                Some(file_name) if file_name.is_empty() && data.is_empty() => {}
                Some(file_name) => {
                    form.files.insert(
                        name,
                        UploadedFile {
                            file_name,
                            content_type: field_type.unwrap_or_else(|| "application/octet-stream".to_string()),
                            data: data.to_vec(),
                        },
                    );
                }
                None => {
                    let value = String::from_utf8(data.to_vec())
                        .map_err(|_| ApiError::BadRequest(format!("field {} is not valid UTF-8", name)))?;
                    form.fields.insert(name, value);
                }
            }
        }
        Ok::<FormData, ApiError>(form)
    })
}

const ACCEPTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Gif,
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::WebP,
    ImageFormat::Bmp,
];

/// Format of an uploaded image, or `None` unless the bytes fully decode as one
/// of the accepted formats.
pub fn detect_image(data: &[u8]) -> Option<ImageFormat> {
    let format = image::guess_format(data).ok()?;
    if !ACCEPTED_FORMATS.contains(&format) {
        debug!(?format, "upload format not accepted");
        return None;
    }
    match image::load_from_memory_with_format(data, format) {
        Ok(_) => Some(format),
        Err(e) => {
            debug!(?format, error = %e, "upload failed to decode");
            None
        }
    }
}
