use super::{Code, FramingError};

/// Most header lines accepted in one head
pub const MAX_HEADERS: usize = 64;

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn owned_headers(headers: &[httparse::Header<'_>]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect()
}

fn parse_content_length(headers: &[(String, String)]) -> Result<Option<usize>, FramingError> {
    match find_header(headers, "content-length") {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| FramingError::ContentLength),
        None => Ok(None),
    }
}

fn is_chunked(headers: &[(String, String)]) -> bool {
    find_header(headers, "transfer-encoding")
        .map_or(false, |v| v.to_ascii_lowercase().contains("chunked"))
}

/// A parsed request line and header block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Minor version: 0 for HTTP/1.0, 1 for HTTP/1.1
    pub version: u8,
    pub headers: Vec<(String, String)>,
    pub content_length: usize,
    /// Bytes the head occupied on the wire, including the terminating blank line
    pub head_len: usize,
}

impl RequestHead {
    /// Parse a request head from the front of `buf`. `Ok(None)` means more
    /// bytes are needed.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, FramingError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        let head_len = match req.parse(buf) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(FramingError::Malformed(e.to_string())),
        };

        let target = req.path.unwrap_or_default();
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };

        let headers = owned_headers(req.headers);
        if is_chunked(&headers) {
            return Err(FramingError::Unsupported("chunked request content"));
        }
        let content_length = parse_content_length(&headers)?.unwrap_or(0);

        Ok(Some(Self {
            method: req.method.unwrap_or_default().to_string(),
            path,
            query,
            version: req.version.unwrap_or(1),
            headers,
            content_length,
            head_len,
        }))
    }

    /// Look up a header, ignoring case
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Whether the client expects the connection to stay open after this request
    pub fn keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version >= 1,
        }
    }
}

/// How the content following a response head is delimited
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    Length(usize),
    Chunked,
    /// Content runs until the remote closes the connection
    UntilClose,
}

/// A parsed status line and header block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHead {
    pub code: Code,
    pub reason: String,
    pub version: u8,
    pub headers: Vec<(String, String)>,
    pub content_length: Option<usize>,
    pub chunked: bool,
    pub head_len: usize,
}

impl ResponseHead {
    /// Parse a response head from the front of `buf`. `Ok(None)` means more
    /// bytes are needed.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, FramingError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut headers);

        let head_len = match resp.parse(buf) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(FramingError::Malformed(e.to_string())),
        };

        let headers = owned_headers(resp.headers);
        let chunked = is_chunked(&headers);
        let content_length = parse_content_length(&headers)?;

        Ok(Some(Self {
            code: Code(resp.code.unwrap_or_default()),
            reason: resp.reason.unwrap_or_default().to_string(),
            version: resp.version.unwrap_or(1),
            headers,
            content_length,
            chunked,
            head_len,
        }))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn framing(&self) -> Framing {
        if self.code.is_bodiless() {
            Framing::Length(0)
        } else if self.chunked {
            Framing::Chunked
        } else {
            match self.content_length {
                Some(len) => Framing::Length(len),
                None => Framing::UntilClose,
            }
        }
    }

    /// Whether the remote will accept another request on this connection
    pub fn keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            _ => self.version >= 1 && self.framing() != Framing::UntilClose,
        }
    }
}

/// Serialise an outbound request head
pub fn build_request_head(
    method: &str,
    host: &str,
    path: &str,
    headers: &[(String, String)],
    content_length: usize,
) -> Vec<u8> {
    let mut head = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", method, path, host);
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    if content_length > 0 || !matches!(method, "GET" | "HEAD") {
        head.push_str(&format!("Content-Length: {}\r\n", content_length));
    }
    head.push_str("\r\n");
    head.into_bytes()
}
