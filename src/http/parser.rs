//! Incremental HTTP/1.1 request parser.
//!
//! The parser is fed the bytes of one request as they arrive and resumes
//! where the previous call stopped:
//!
//! ```text
//!  [ RequestLine ] --line--> [ HeadersParsing ] --empty line--> [ BodyParsing ]
//!         |                      |        ^                           |
//!         |                      \-line---/               Content-Length bytes
//!         |                      |                                    |
//!         \------ error ---------+----------> [ Failed ]              v
//!                                \--- Content-Length == 0 ----> [ Finished ]
//! ```
//!
//! Lines end at `LF`; a `CR` before it is dropped. A line split between two
//! chunks is carried over, and only newly arrived bytes are scanned for the
//! terminator, so no byte is examined twice.
//!
//! # Request format
//! ```text
//! METHOD SP ROUTE SP VERSION CRLF
//! *(NAME ":" OWS VALUE OWS CRLF)
//! CRLF
//! [Content-Length bytes of body]
//! ```
//!
//! Failures map to stable [`ErrorCode`](crate::ErrorCode)s:
//!
//! | Input                                        | Code                   |
//! |----------------------------------------------|------------------------|
//! | request line without two separating spaces   | `RequestLineSyntax`    |
//! | header without a colon, or with empty value  | `HeaderSyntax`         |
//! | header name already seen (any case)          | `DuplicateHeader`      |
//! | `Content-Length` that is not a decimal       | `InvalidHeaderValue`   |

use crate::{
    errors::ParseError,
    http::{
        context::HttpContext,
        types::{eq_folded, slice_to_usize},
    },
};
use memchr::memchr;
use std::mem;

const CONTENT_LENGTH: &[u8] = b"content-length";

// Upper bound on the body allocation made before any body byte arrives.
const BODY_PREALLOC: usize = 64 * 1024;

/// Where the parser currently is within a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserState {
    /// Waiting for the end of the request line.
    RequestLine,
    /// Reading header lines until the empty line.
    HeadersParsing,
    /// Collecting `Content-Length` body bytes.
    BodyParsing,
    /// The request is complete; further input is ignored.
    Finished,
    /// The request was rejected; every further call returns this error.
    Failed(ParseError),
}

/// Result of feeding one chunk to the [`Parser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// More bytes are needed.
    Partial,
    /// The request is complete and available via [`Parser::context`].
    Complete,
}

/// Resumable request parser.
///
/// One instance serves one connection at a time. Call [`reset`](Parser::reset)
/// before reusing it for an unrelated request.
///
/// # Examples
/// ```
/// use spindle_web::{ParseStatus, Parser};
///
/// let mut parser = Parser::new();
///
/// assert_eq!(parser.parse(b"GET / HTTP/1.1\r\nHost: te"), Ok(ParseStatus::Partial));
/// assert_eq!(parser.parse(b"st.com\r\n\r\n"), Ok(ParseStatus::Complete));
///
/// let request = parser.context();
/// assert_eq!(request.method(), b"GET");
/// assert_eq!(request.header("host"), Some(&b"test.com"[..]));
/// ```
#[derive(Debug)]
pub struct Parser {
    state: ParserState,
    carry: Vec<u8>,
    content_length: usize,
    context: HttpContext,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self::with_header_capacity(16)
    }

    /// Creates a parser whose header list is preallocated for `capacity` entries.
    pub fn with_header_capacity(capacity: usize) -> Self {
        Self {
            state: ParserState::RequestLine,
            carry: Vec::new(),
            content_length: 0,
            context: HttpContext::with_header_capacity(capacity),
        }
    }

    /// Feeds the next chunk of the request.
    ///
    /// Returns [`ParseStatus::Complete`] once the header block and the full
    /// body have been read. Bytes after the end of the request are ignored.
    ///
    /// # Errors
    /// A malformed request yields a coded [`ParseError`]. The parser then
    /// stays failed and returns the same error on every call until
    /// [`reset`](Parser::reset).
    pub fn parse(&mut self, chunk: &[u8]) -> Result<ParseStatus, ParseError> {
        match &self.state {
            ParserState::Failed(err) => return Err(err.clone()),
            ParserState::Finished => return Ok(ParseStatus::Complete),
            _ => {}
        }

        if let Err(err) = self.advance(chunk) {
            self.state = ParserState::Failed(err.clone());
            return Err(err);
        }

        Ok(match self.state {
            ParserState::Finished => ParseStatus::Complete,
            _ => ParseStatus::Partial,
        })
    }

    /// The request parsed so far. Complete once [`parse`](Parser::parse)
    /// returned [`ParseStatus::Complete`].
    #[inline]
    pub fn context(&self) -> &HttpContext {
        &self.context
    }

    /// Moves the parsed request out, leaving an empty one behind.
    #[inline]
    pub fn take_context(&mut self) -> HttpContext {
        mem::take(&mut self.context)
    }

    #[inline]
    pub fn state(&self) -> &ParserState {
        &self.state
    }

    /// Prepares the parser for an unrelated request, keeping allocations.
    pub fn reset(&mut self) {
        self.state = ParserState::RequestLine;
        self.carry.clear();
        self.content_length = 0;
        self.context.clear();
    }

    fn advance(&mut self, mut rest: &[u8]) -> Result<(), ParseError> {
        while !rest.is_empty() {
            match self.state {
                ParserState::RequestLine | ParserState::HeadersParsing => {
                    let Some(end) = memchr(b'\n', rest) else {
                        self.carry.extend_from_slice(rest);
                        return Ok(());
                    };

                    let (head, tail) = (&rest[..end], &rest[end + 1..]);
                    rest = tail;

                    let mut carry = mem::take(&mut self.carry);
                    let line = match carry.is_empty() {
                        true => head,
                        false => {
                            carry.extend_from_slice(head);
                            carry.as_slice()
                        }
                    };

                    let result = self.on_line(strip_cr(line));
                    carry.clear();
                    self.carry = carry;
                    result?;
                }
                ParserState::BodyParsing => rest = self.on_body(rest),
                ParserState::Finished | ParserState::Failed(_) => break,
            }
        }

        Ok(())
    }

    #[inline]
    fn on_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        match self.state {
            ParserState::RequestLine => self.on_request_line(line),
            _ if line.is_empty() => {
                self.on_headers_end();
                Ok(())
            }
            _ => self.on_header(line),
        }
    }

    fn on_request_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let first = memchr(b' ', line)
            .ok_or(ParseError::request_line("missing space after method"))?;
        let second = memchr(b' ', &line[first + 1..])
            .map(|pos| first + 1 + pos)
            .ok_or(ParseError::request_line("missing space after route"))?;

        let method = &line[..first];
        let route = &line[first + 1..second];
        let version = trim_end(&line[second + 1..]);

        if method.is_empty() || route.is_empty() || version.is_empty() {
            return Err(ParseError::request_line("empty request line component"));
        }

        self.context.method.extend_from_slice(method);
        self.context.route.extend_from_slice(route);
        self.context.version.extend_from_slice(version);
        self.state = ParserState::HeadersParsing;
        Ok(())
    }

    fn on_header(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let colon = memchr(b':', line).ok_or(ParseError::header_syntax("missing colon"))?;

        let name = &line[..colon];
        let value = trim(&line[colon + 1..]);

        if name.is_empty() {
            return Err(ParseError::header_syntax("empty header name"));
        }
        if value.is_empty() {
            return Err(ParseError::header_syntax("empty header value"));
        }

        self.context.headers.insert(name, value)?;

        if eq_folded(name, CONTENT_LENGTH) {
            self.content_length = slice_to_usize(value).ok_or(
                ParseError::invalid_header_value("content-length is not a decimal integer"),
            )?;
        }

        Ok(())
    }

    fn on_headers_end(&mut self) {
        if self.content_length == 0 {
            self.state = ParserState::Finished;
            return;
        }

        self.context.body = Some(Vec::with_capacity(self.content_length.min(BODY_PREALLOC)));
        self.state = ParserState::BodyParsing;
    }

    /// Consumes body bytes and returns what is left of `rest`.
    fn on_body<'a>(&mut self, mut rest: &'a [u8]) -> &'a [u8] {
        let body = self.context.body.get_or_insert_with(Vec::new);

        if body.is_empty() {
            let skip = rest
                .iter()
                .position(|&b| b != b'\r' && b != b'\n')
                .unwrap_or(rest.len());
            rest = &rest[skip..];
        }

        let take = (self.content_length - body.len()).min(rest.len());
        body.extend_from_slice(&rest[..take]);

        if body.len() == self.content_length {
            self.state = ParserState::Finished;
        }

        &rest[take..]
    }
}

#[inline]
fn strip_cr(line: &[u8]) -> &[u8] {
    match line {
        [head @ .., b'\r'] => head,
        _ => line,
    }
}

#[inline]
fn is_trimmed(byte: u8) -> bool {
    matches!(byte, b' ' | b'\r' | b'\n')
}

#[inline]
fn trim_end(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| !is_trimmed(b)).map_or(0, |i| i + 1);
    &bytes[..end]
}

#[inline]
fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| !is_trimmed(b)).unwrap_or(bytes.len());
    trim_end(&bytes[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use std::time::{Duration, Instant};

    const SIMPLE: &[u8] = b"GET / HTTP/1.1\r\nHost: test.com\r\n\r\n";
    const WITH_BODY: &[u8] = b"PUT / HTTP/1.1\r\nHost: test.com\r\n\
        Content-Type: text/plain\r\nContent-Length: 13\r\n\r\nHello, World!";

    fn parse_chunks(chunks: &[&[u8]]) -> (Parser, Result<ParseStatus, ParseError>) {
        let mut parser = Parser::new();
        let mut result = Ok(ParseStatus::Partial);

        for chunk in chunks {
            result = parser.parse(chunk);
            if result.is_err() {
                break;
            }
        }

        (parser, result)
    }

    fn code_of(input: &[u8]) -> Option<ErrorCode> {
        parse_chunks(&[input]).1.err().map(|err| err.code())
    }

    #[test]
    fn simple_request() {
        let (parser, result) = parse_chunks(&[SIMPLE]);
        let ctx = parser.context();

        assert_eq!(result, Ok(ParseStatus::Complete));
        assert_eq!(ctx.method(), b"GET");
        assert_eq!(ctx.route(), b"/");
        assert_eq!(ctx.version(), b"HTTP/1.1");
        assert_eq!(ctx.headers().len(), 1);
        assert_eq!(ctx.header("Host"), Some(&b"test.com"[..]));
        assert_eq!(ctx.body(), None);
    }

    #[test]
    fn terminator_split() {
        let split = SIMPLE.len() - 2;
        let (whole, _) = parse_chunks(&[SIMPLE]);

        #[rustfmt::skip]
        let cases: [&[&[u8]]; 3] = [
            &[&SIMPLE[..split], &SIMPLE[split..]],
            &[&SIMPLE[..split + 1], &SIMPLE[split + 1..]],
            &[&SIMPLE[..split - 1], &SIMPLE[split - 1..split], &SIMPLE[split..]],
        ];

        for chunks in cases {
            let (parser, result) = parse_chunks(chunks);
            assert_eq!(result, Ok(ParseStatus::Complete));
            assert_eq!(parser.context(), whole.context());
        }
    }

    #[test]
    fn byte_by_byte() {
        for input in [SIMPLE, WITH_BODY] {
            let (whole, _) = parse_chunks(&[input]);

            let mut parser = Parser::new();
            for (i, byte) in input.iter().enumerate() {
                let expected = match i + 1 == input.len() {
                    true => ParseStatus::Complete,
                    false => ParseStatus::Partial,
                };
                assert_eq!(parser.parse(&[*byte]), Ok(expected), "byte {i}");
            }

            assert_eq!(parser.context(), whole.context());
        }
    }

    #[test]
    fn with_body() {
        let (parser, result) = parse_chunks(&[WITH_BODY]);
        let ctx = parser.context();

        assert_eq!(result, Ok(ParseStatus::Complete));
        assert_eq!(ctx.method(), b"PUT");
        assert_eq!(ctx.headers().len(), 3);
        assert_eq!(ctx.header_str("host"), Some("test.com"));
        assert_eq!(ctx.header_str("content-type"), Some("text/plain"));
        assert_eq!(ctx.header_str("CONTENT-LENGTH"), Some("13"));
        assert_eq!(ctx.body_str(), Some("Hello, World!"));
    }

    #[test]
    fn body_across_chunks() {
        let (head, body) = WITH_BODY.split_at(WITH_BODY.len() - 13);
        let mut parser = Parser::new();

        assert_eq!(parser.parse(head), Ok(ParseStatus::Partial));
        assert_eq!(parser.state(), &ParserState::BodyParsing);
        assert_eq!(parser.parse(&body[..5]), Ok(ParseStatus::Partial));
        assert_eq!(parser.parse(&body[5..]), Ok(ParseStatus::Complete));
        assert_eq!(parser.context().body(), Some(&b"Hello, World!"[..]));
    }

    #[test]
    fn body_skips_stray_line_breaks() {
        let input = b"POST /echo HTTP/1.1\r\nContent-Length: 2\r\n\r\n\r\nok";
        let (parser, result) = parse_chunks(&[input]);

        assert_eq!(result, Ok(ParseStatus::Complete));
        assert_eq!(parser.context().body(), Some(&b"ok"[..]));
    }

    #[test]
    fn trailing_bytes_ignored() {
        let input = b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nokGET / HTTP/1.1\r\n";
        let (mut parser, result) = parse_chunks(&[input]);

        assert_eq!(result, Ok(ParseStatus::Complete));
        assert_eq!(parser.context().body(), Some(&b"ok"[..]));
        assert_eq!(parser.parse(b"garbage"), Ok(ParseStatus::Complete));
    }

    #[test]
    fn zero_content_length() {
        let input = b"DELETE /item HTTP/1.1\r\nContent-Length: 0\r\n\r\n";
        let (parser, result) = parse_chunks(&[input]);

        assert_eq!(result, Ok(ParseStatus::Complete));
        assert_eq!(parser.context().body(), None);
        assert_eq!(parser.context().header("content-length"), Some(&b"0"[..]));
    }

    #[test]
    fn value_trimming() {
        let input = b"GET / HTTP/1.1  \r\nX-Name:    spaced out   \r\nX-Tight:v\n\r\n";
        let (parser, result) = parse_chunks(&[input]);
        let ctx = parser.context();

        assert_eq!(result, Ok(ParseStatus::Complete));
        assert_eq!(ctx.version(), b"HTTP/1.1");
        assert_eq!(ctx.header("x-name"), Some(&b"spaced out"[..]));
        assert_eq!(ctx.header("x-tight"), Some(&b"v"[..]));
    }

    #[test]
    fn errors() {
        #[rustfmt::skip]
        let cases: [(&[u8], ErrorCode); 14] = [
            (b"GET /\r\nHost: test.com",                      ErrorCode::RequestLineSyntax),
            (b"/ HTTP/1.0\r\nHost: test.com\r\n\r\n",          ErrorCode::RequestLineSyntax),
            (b"GET/HTTP/1.0\r\nHost: test.com\r\n\r\n",        ErrorCode::RequestLineSyntax),
            (b" / HTTP/1.1\r\n\r\n",                          ErrorCode::RequestLineSyntax),
            (b"GET  HTTP/1.1\r\n\r\n",                        ErrorCode::RequestLineSyntax),
            (b"GET / \r\n\r\n",                               ErrorCode::RequestLineSyntax),
            (b"\r\n",                                         ErrorCode::RequestLineSyntax),
            (b"GET / HTTP/1.1\r\nHost test.com\r\n\r\n",       ErrorCode::HeaderSyntax),
            (b"GET / HTTP/1.1\r\nHost:\r\n\r\n",               ErrorCode::HeaderSyntax),
            (b"GET / HTTP/1.1\r\nHost:   \r\n\r\n",            ErrorCode::HeaderSyntax),
            (b"GET / HTTP/1.1\r\n: value\r\n\r\n",             ErrorCode::HeaderSyntax),
            (b"GET / HTTP/1.1\r\nHost: a\r\nhost: b\r\n\r\n",  ErrorCode::DuplicateHeader),
            (b"GET / HTTP/1.1\r\nContent-Length: 1x\r\n\r\n",  ErrorCode::InvalidHeaderValue),
            (b"GET / HTTP/1.1\r\ncontent-length: -5\r\n\r\n",  ErrorCode::InvalidHeaderValue),
        ];

        for (input, expected) in cases {
            assert_eq!(
                code_of(input),
                Some(expected),
                "{:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn missing_version_is_reported_on_line_end() {
        let mut parser = Parser::new();

        assert_eq!(parser.parse(b"GET /"), Ok(ParseStatus::Partial));
        let err = parser.parse(b"\r\n").unwrap_err();
        assert_eq!(err.code(), ErrorCode::RequestLineSyntax);
    }

    #[test]
    fn many_headers_in_chunks() {
        let mut request = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..20_000 {
            request.extend_from_slice(format!("h{i}: v{i}\r\n").as_bytes());
        }
        request.extend_from_slice(b"\r\n");

        let started = Instant::now();
        let mut parser = Parser::new();
        let mut result = Ok(ParseStatus::Partial);
        for chunk in request.chunks(4096) {
            result = parser.parse(chunk);
        }
        let elapsed = started.elapsed();

        assert_eq!(result, Ok(ParseStatus::Complete));
        assert!(elapsed < Duration::from_secs(2), "parsing took {elapsed:?}");

        let ctx = parser.context();
        assert_eq!(ctx.headers().len(), 20_000);
        assert_eq!(ctx.header_str("H0"), Some("v0"));
        assert_eq!(ctx.header_str("h19999"), Some("v19999"));
        assert_eq!(ctx.header("h20000"), None);
    }

    #[test]
    fn failure_is_sticky() {
        let mut parser = Parser::new();
        let err = parser.parse(b"GET / HTTP/1.1\r\nbroken\r\n").unwrap_err();

        assert_eq!(parser.state(), &ParserState::Failed(err.clone()));
        assert_eq!(parser.parse(b"Host: test.com\r\n\r\n"), Err(err.clone()));
        assert_eq!(parser.parse(b""), Err(err));
        assert_eq!(parser.context().headers().len(), 0);
    }

    #[test]
    fn reset_allows_reuse() {
        let mut parser = Parser::new();
        assert!(parser.parse(b"BROKEN\r\n").is_err());

        parser.reset();
        assert_eq!(parser.state(), &ParserState::RequestLine);
        assert_eq!(parser.parse(WITH_BODY), Ok(ParseStatus::Complete));

        let taken = parser.take_context();
        assert_eq!(taken.body_str(), Some("Hello, World!"));
        assert_eq!(parser.context(), &HttpContext::default());

        parser.reset();
        assert_eq!(parser.parse(SIMPLE), Ok(ParseStatus::Complete));
        assert_eq!(parser.context().method(), b"GET");
        assert_eq!(parser.context().body(), None);
    }
}
