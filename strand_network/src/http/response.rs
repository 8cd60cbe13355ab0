use super::{Code, HttpError};

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

/// A response to an inbound request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub code: Code,
    pub headers: Vec<(String, String)>,
    pub content: Bytes,
}

impl Response {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            headers: Vec::new(),
            content: Bytes::new(),
        }
    }

    /// A response whose content is `value` as JSON
    pub fn json<T: Serialize + ?Sized>(code: Code, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(content) => Self::new(code).with_content("application/json", content),
            Err(e) => Self::error(&HttpError::internal(e.to_string())),
        }
    }

    /// The standard error document for `error`
    pub fn error(error: &HttpError) -> Self {
        let errcode = match error.code {
            Code::NOT_FOUND => "M_NOT_FOUND",
            Code::FORBIDDEN => "M_FORBIDDEN",
            Code::UNAUTHORIZED => "M_UNAUTHORIZED",
            Code::TOO_MANY_REQUESTS => "M_LIMIT_EXCEEDED",
            Code::PAYLOAD_TOO_LARGE => "M_TOO_LARGE",
            Code::BAD_REQUEST => "M_BAD_JSON",
            _ => "M_UNKNOWN",
        };
        let body = serde_json::json!({
            "errcode": errcode,
            "error": error.content,
        });
        Self::new(error.code).with_content("application/json", body.to_string())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_content(mut self, content_type: &str, content: impl Into<Bytes>) -> Self {
        self.headers
            .retain(|(n, _)| !n.eq_ignore_ascii_case("content-type"));
        self.headers
            .push(("Content-Type".to_string(), content_type.to_string()));
        self.content = content.into();
        self
    }

    /// The status line and headers, including `Content-Length`
    pub fn head_bytes(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(128);
        out.put_slice(format!("HTTP/1.1 {} {}\r\n", self.code.0, self.code.reason()).as_bytes());
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            out.put_slice(name.as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }
        out.put_slice(format!("Content-Length: {}\r\n\r\n", self.content.len()).as_bytes());
        out
    }

    /// The whole response as it goes on the wire
    pub fn to_bytes(&self) -> Bytes {
        let mut out = self.head_bytes();
        out.put_slice(&self.content);
        out.freeze()
    }
}

impl From<HttpError> for Response {
    fn from(e: HttpError) -> Self {
        Self::error(&e)
    }
}
