//! Replayable request descriptions
//!
//! A request that hits an expired credential is sent a second time after the
//! refresh, so requests are described as data and rebuilt per attempt rather
//! than held as a consumed `reqwest::RequestBuilder`.

use crate::error::{ClientError, ClientResult};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Url};
use serde_json::Value;
use std::path::Path;

/// File content to upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content: Vec<u8>,
    pub mime_type: Option<String>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Read a file from disk, guessing the MIME type from its extension
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());

        let mime_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| mime_for_extension(&ext.to_ascii_lowercase()))
            .map(str::to_string);

        Ok(Self {
            file_name,
            content,
            mime_type,
        })
    }
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "pdf" => Some("application/pdf"),
        "xlsx" => Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        "xls" => Some("application/vnd.ms-excel"),
        "csv" => Some("text/csv"),
        "json" => Some("application/json"),
        _ => None,
    }
}

/// Request body variants
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart {
        file: UploadFile,
        fields: Vec<(String, String)>,
    },
}

/// One outbound call to the service, relative to the configured base URL
///
/// The path is kept as raw segments; each one is percent-encoded when the URL
/// is built, so an identifier can never add segments or a query string.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    /// `route` is a fixed path such as `/documents/upload`
    pub fn new(method: Method, route: &str) -> Self {
        Self {
            method,
            segments: route
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(route: &str) -> Self {
        Self::new(Method::GET, route)
    }

    pub fn post(route: &str) -> Self {
        Self::new(Method::POST, route)
    }

    /// Append one path segment taken verbatim (e.g. a work item id)
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Unencoded path, for logs
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, file: UploadFile, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Multipart { file, fields };
        self
    }

    /// Build a fresh `reqwest` request for one attempt
    pub(crate) fn build(
        &self,
        http: &reqwest::Client,
        base_url: &str,
    ) -> ClientResult<reqwest::RequestBuilder> {
        let invalid_base = |reason: String| {
            ClientError::Store(fdash_common::Error::Config(format!(
                "invalid service URL {}: {}",
                base_url, reason
            )))
        };

        let mut url = Url::parse(base_url).map_err(|e| invalid_base(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid_base("cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(&self.segments);

        let mut builder = http.request(self.method.clone(), url);

        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }

        builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart { file, fields } => {
                let mut part = Part::bytes(file.content.clone()).file_name(file.file_name.clone());
                if let Some(mime) = &file.mime_type {
                    part = part.mime_str(mime)?;
                }

                let mut form = Form::new().part("file", part);
                for (name, value) in fields {
                    form = form.text(name.clone(), value.clone());
                }
                builder.multipart(form)
            }
        };

        Ok(builder)
    }
}
