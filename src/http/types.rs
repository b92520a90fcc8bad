//! Status table and byte-level helpers shared by the parser and the responder.

use crate::errors::BuildError;

// ASCII FOLD

const ASCII_FOLD: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let byte = i as u8;
        // Only letters are folded; `@` and `[` keep their identity.
        table[i] = if byte.is_ascii_uppercase() { byte | 0x20 } else { byte };
        i += 1;
    }
    table
};

/// Folds one byte to ASCII lowercase (letters only).
#[inline(always)]
pub(crate) const fn fold(byte: u8) -> u8 {
    ASCII_FOLD[byte as usize]
}

/// Byte-wise, ASCII case-insensitive equality.
#[inline]
pub(crate) fn eq_folded(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| fold(x) == fold(y))
}

/// Parses an unsigned decimal. Rejects empty input, signs and overflow.
#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

/// Writes `n` as ASCII decimal into a fixed buffer.
///
/// Returns the buffer and the index of the first significant digit.
#[inline]
pub(crate) const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
    let mut buffer = [b'0'; 39];
    let mut i = 39;

    if n == 0 {
        return (buffer, 38);
    }

    while n > 0 {
        i -= 1;
        buffer[i] = b'0' + (n % 10) as u8;
        n /= 10;
    }

    (buffer, i)
}

// STATUS_CODE

macro_rules! status_table {
    ($(
        $(#[$docs:meta])*
        $name:ident = ($num:literal, $reason:literal);
    )+) => {
        /// HTTP status codes understood by the response builder.
        ///
        /// The table covers `100 Continue` through
        /// `511 Network Authentication Required`. Codes outside it cannot be
        /// represented, so the builder can never emit a malformed status line.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum StatusCode { $(
            #[doc = concat!("`", stringify!($num), " ", $reason, "`")]
            $(#[$docs])*
            $name = $num,
        )+ }

        impl StatusCode {
            /// Numeric value of the code.
            #[inline]
            pub const fn as_u16(self) -> u16 {
                self as u16
            }

            /// Standard reason phrase, e.g. `"Not Found"`.
            #[inline]
            pub const fn reason(self) -> &'static str {
                match self { $(
                    StatusCode::$name => $reason,
                )+ }
            }

            /// Complete status line, e.g. `b"HTTP/1.1 200 OK\r\n"`.
            #[inline]
            pub(crate) const fn status_line(self) -> &'static [u8] {
                match self { $(
                    StatusCode::$name => {
                        concat!("HTTP/1.1 ", $num, " ", $reason, "\r\n").as_bytes()
                    },
                )+ }
            }

            #[inline]
            const fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $($num => Some(StatusCode::$name),)+
                    _ => None,
                }
            }
        }
    }
}

status_table! {
    Continue = (100, "Continue");
    SwitchingProtocols = (101, "Switching Protocols");
    Processing = (102, "Processing");
    EarlyHints = (103, "Early Hints");

    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NonAuthoritativeInformation = (203, "Non-Authoritative Information");
    NoContent = (204, "No Content");
    ResetContent = (205, "Reset Content");
    PartialContent = (206, "Partial Content");
    MultiStatus = (207, "Multi-Status");
    AlreadyReported = (208, "Already Reported");
    ImUsed = (226, "IM Used");

    MultipleChoices = (300, "Multiple Choices");
    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    UseProxy = (305, "Use Proxy");
    TemporaryRedirect = (307, "Temporary Redirect");
    PermanentRedirect = (308, "Permanent Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    PaymentRequired = (402, "Payment Required");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    NotAcceptable = (406, "Not Acceptable");
    ProxyAuthenticationRequired = (407, "Proxy Authentication Required");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    Gone = (410, "Gone");
    LengthRequired = (411, "Length Required");
    PreconditionFailed = (412, "Precondition Failed");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    RangeNotSatisfiable = (416, "Range Not Satisfiable");
    ExpectationFailed = (417, "Expectation Failed");
    /// Kept for compatibility with clients that still send it.
    ImATeapot = (418, "I'm a teapot");
    MisdirectedRequest = (421, "Misdirected Request");
    UnprocessableEntity = (422, "Unprocessable Entity");
    Locked = (423, "Locked");
    FailedDependency = (424, "Failed Dependency");
    TooEarly = (425, "Too Early");
    UpgradeRequired = (426, "Upgrade Required");
    PreconditionRequired = (428, "Precondition Required");
    TooManyRequests = (429, "Too Many Requests");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");
    UnavailableForLegalReasons = (451, "Unavailable For Legal Reasons");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Timeout");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
    VariantAlsoNegotiates = (506, "Variant Also Negotiates");
    InsufficientStorage = (507, "Insufficient Storage");
    LoopDetected = (508, "Loop Detected");
    NotExtended = (510, "Not Extended");
    NetworkAuthenticationRequired = (511, "Network Authentication Required");
}

impl TryFrom<u16> for StatusCode {
    type Error = BuildError;

    #[inline]
    fn try_from(code: u16) -> Result<Self, Self::Error> {
        StatusCode::from_u16(code).ok_or(BuildError::UnknownResponseCode(code))
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_letters_only() {
        assert!(eq_folded(b"Content-Length", b"CONTENT-LENGTH"));
        assert!(eq_folded(b"content-length", b"Content-Length"));
        assert!(!eq_folded(b"content-length", b"content-lengt"));
        assert!(!eq_folded(b"@", b"`"));
        assert!(!eq_folded(b"[", b"{"));
        assert_eq!(fold(b'Z'), b'z');
        assert_eq!(fold(b'-'), b'-');
    }

    #[test]
    fn parse_usize() {
        #[rustfmt::skip]
        let cases: [(&[u8], Option<usize>); 7] = [
            (b"0",                         Some(0)),
            (b"13",                        Some(13)),
            (b"30000000",                  Some(30_000_000)),
            (b"",                          None),
            (b"-1",                        None),
            (b"12a",                       None),
            (b"999999999999999999999999",  None),
        ];

        for (input, expected) in cases {
            assert_eq!(slice_to_usize(input), expected, "{:?}", input);
        }
    }

    #[test]
    fn numbers() {
        for n in [0u128, 7, 13, 4096, u64::MAX as u128, u128::MAX] {
            let (buf, start) = number_to_bytes(n);
            assert_eq!(&buf[start..], n.to_string().as_bytes());
        }
    }

    #[test]
    fn status_lines() {
        #[rustfmt::skip]
        let cases: [(StatusCode, &[u8]); 5] = [
            (StatusCode::Continue,            b"HTTP/1.1 100 Continue\r\n"),
            (StatusCode::Ok,                  b"HTTP/1.1 200 OK\r\n"),
            (StatusCode::NonAuthoritativeInformation,
                b"HTTP/1.1 203 Non-Authoritative Information\r\n"),
            (StatusCode::NotFound,            b"HTTP/1.1 404 Not Found\r\n"),
            (StatusCode::NetworkAuthenticationRequired,
                b"HTTP/1.1 511 Network Authentication Required\r\n"),
        ];

        for (status, line) in cases {
            assert_eq!(status.status_line(), line);
        }
    }

    #[test]
    fn from_u16() {
        assert_eq!(StatusCode::try_from(200), Ok(StatusCode::Ok));
        assert_eq!(StatusCode::try_from(418), Ok(StatusCode::ImATeapot));
        assert_eq!(StatusCode::try_from(511).map(StatusCode::as_u16), Ok(511));

        for code in [0, 99, 209, 299, 306, 419, 509, 512, 600, u16::MAX] {
            assert_eq!(
                StatusCode::try_from(code),
                Err(BuildError::UnknownResponseCode(code))
            );
        }
    }

    #[test]
    fn display() {
        assert_eq!(StatusCode::BadRequest.to_string(), "400 Bad Request");
    }
}
