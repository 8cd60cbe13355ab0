use serde::{Deserialize, Serialize};
use std::fmt;

/// An HTTP status code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Code(pub u16);

impl Code {
    pub const CONTINUE: Code = Code(100);
    pub const OK: Code = Code(200);
    pub const CREATED: Code = Code(201);
    pub const ACCEPTED: Code = Code(202);
    pub const NO_CONTENT: Code = Code(204);
    pub const MOVED_PERMANENTLY: Code = Code(301);
    pub const FOUND: Code = Code(302);
    pub const NOT_MODIFIED: Code = Code(304);
    pub const BAD_REQUEST: Code = Code(400);
    pub const UNAUTHORIZED: Code = Code(401);
    pub const FORBIDDEN: Code = Code(403);
    pub const NOT_FOUND: Code = Code(404);
    pub const METHOD_NOT_ALLOWED: Code = Code(405);
    pub const REQUEST_TIMEOUT: Code = Code(408);
    pub const CONFLICT: Code = Code(409);
    pub const PAYLOAD_TOO_LARGE: Code = Code(413);
    pub const URI_TOO_LONG: Code = Code(414);
    pub const TOO_MANY_REQUESTS: Code = Code(429);
    pub const REQUEST_HEADER_FIELDS_TOO_LARGE: Code = Code(431);
    pub const INTERNAL_SERVER_ERROR: Code = Code(500);
    pub const NOT_IMPLEMENTED: Code = Code(501);
    pub const BAD_GATEWAY: Code = Code(502);
    pub const SERVICE_UNAVAILABLE: Code = Code(503);
    pub const GATEWAY_TIMEOUT: Code = Code(504);

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn reason(self) -> &'static str {
        match self.0 {
            100 => "Continue",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            409 => "Conflict",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "Unknown",
        }
    }

    pub fn is_informational(self) -> bool {
        (100..200).contains(&self.0)
    }

    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }

    pub fn is_client_error(self) -> bool {
        (400..500).contains(&self.0)
    }

    pub fn is_server_error(self) -> bool {
        (500..600).contains(&self.0)
    }

    /// Whether answering an inbound request with this code ends the
    /// connection. Codes not listed here, including unrecognised ones, keep
    /// it open.
    pub fn closes_connection(self) -> bool {
        matches!(self, Self::BAD_REQUEST | Self::REQUEST_TIMEOUT | Self::PAYLOAD_TOO_LARGE)
            || self.is_server_error()
    }

    /// Whether a response with this code carries no content regardless of
    /// its headers
    pub fn is_bodiless(self) -> bool {
        self.is_informational() || self == Self::NO_CONTENT || self == Self::NOT_MODIFIED
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason())
    }
}

impl From<u16> for Code {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Code::OK.is_success());
        assert!(Code::NOT_FOUND.is_client_error());
        assert!(!Code::NOT_FOUND.closes_connection());
        assert!(Code::BAD_REQUEST.closes_connection());
        assert!(Code::REQUEST_TIMEOUT.closes_connection());
        assert!(Code::BAD_GATEWAY.closes_connection());
        assert!(!Code(299).closes_connection());
        assert!(!Code(499).closes_connection());
        assert_eq!(Code(299).reason(), "Unknown");
        assert_eq!(Code::NOT_FOUND.to_string(), "404 Not Found");
    }
}
