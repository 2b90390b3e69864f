//! Outbound request envelope.
//!
//! An [`ApiRequest`] owns everything needed to send the same request twice:
//! method, path, query, caller headers and a re-playable body. The
//! credential retry counter lives on the envelope so "retry at most once"
//! is visible instead of hidden in the request object.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;

use super::error::ApiError;

/// How many times a request may be resent after a credential rejection.
pub const MAX_CREDENTIAL_RETRIES: u8 = 1;

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    /// Raw payload with the caller's content type, if any.
    Bytes {
        content_type: Option<String>,
        data: Vec<u8>,
    },
    /// Multipart form. The encoder picks the content type and boundary.
    Multipart(MultipartBody),
}

#[derive(Debug, Clone)]
enum PartData {
    Text(String),
    File {
        data: Vec<u8>,
        file_name: Option<String>,
        mime: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct MultipartField {
    name: String,
    data: PartData,
}

/// Multipart form that can be rebuilt for a resend.
#[derive(Debug, Clone, Default)]
pub struct MultipartBody {
    fields: Vec<MultipartField>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(MultipartField {
            name: name.into(),
            data: PartData::Text(value.into()),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: Option<&str>,
        data: Vec<u8>,
    ) -> Self {
        self.fields.push(MultipartField {
            name: name.into(),
            data: PartData::File {
                data,
                file_name: Some(file_name.into()),
                mime: mime.map(str::to_string),
            },
        });
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn to_form(&self) -> Result<Form, ApiError> {
        let mut form = Form::new();
        for field in &self.fields {
            form = match &field.data {
                PartData::Text(value) => form.text(field.name.clone(), value.clone()),
                PartData::File {
                    data,
                    file_name,
                    mime,
                } => {
                    let mut part = Part::bytes(data.clone());
                    if let Some(file_name) = file_name {
                        part = part.file_name(file_name.clone());
                    }
                    if let Some(mime) = mime {
                        part = part.mime_str(mime).map_err(|e| {
                            ApiError::InvalidRequest(format!("bad content type for {}: {}", field.name, e))
                        })?;
                    }
                    form.part(field.name.clone(), part)
                }
            };
        }
        Ok(form)
    }
}

/// A request travelling through the pipeline.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: RequestBody,
    credential_retries: u8,
    renewed_credential: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            credential_retries: 0,
            renewed_credential: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a caller header. A caller-supplied `Authorization` wins over the
    /// stored credential on the first attempt.
    pub fn header(mut self, name: HeaderName, value: &str) -> Result<Self, ApiError> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::InvalidRequest(format!("bad value for header {}: {}", name, e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("failed to encode JSON body: {}", e)))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn bytes(mut self, content_type: Option<&str>, data: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes {
            content_type: content_type.map(str::to_string),
            data,
        };
        self
    }

    pub fn multipart(mut self, form: MultipartBody) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn credential_retries(&self) -> u8 {
        self.credential_retries
    }

    pub fn can_retry(&self) -> bool {
        self.credential_retries < MAX_CREDENTIAL_RETRIES
    }

    /// Record the retry and the credential the resend must carry.
    pub(crate) fn mark_retried(&mut self, credential: String) {
        self.credential_retries += 1;
        self.renewed_credential = Some(credential);
    }

    /// Build the wire request. `stored_access` is the store's access
    /// credential at send time.
    pub(crate) fn build(
        &self,
        client: &Client,
        base_url: &str,
        stored_access: Option<&str>,
    ) -> Result<RequestBuilder, ApiError> {
        let mut headers = self.headers.clone();

        // A renewed credential always replaces whatever was sent the first time
        let bearer = match (&self.renewed_credential, headers.contains_key(AUTHORIZATION)) {
            (Some(renewed), _) => Some(renewed.as_str()),
            (None, false) => stored_access,
            (None, true) => None,
        };
        if let Some(token) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidRequest("access credential is not a valid header value".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        match &self.body {
            // The multipart encoder owns the content type and boundary
            RequestBody::Multipart(_) => {
                headers.remove(CONTENT_TYPE);
            }
            RequestBody::Bytes {
                content_type: Some(ct),
                ..
            } => {
                let value = HeaderValue::from_str(ct)
                    .map_err(|e| ApiError::InvalidRequest(format!("bad content type {}: {}", ct, e)))?;
                headers.insert(CONTENT_TYPE, value);
            }
            _ => {}
        }

        let mut builder = client
            .request(self.method.clone(), join_url(base_url, &self.path))
            .headers(headers);
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }

        builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Bytes { data, .. } => builder.body(data.clone()),
            RequestBody::Multipart(form) => builder.multipart(form.to_form()?),
        };
        Ok(builder)
    }
}

/// Join a base URL and a path; absolute URLs pass through untouched.
pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
