//! Response serialization straight into the connection buffer.
//!
//! Every response has the same shape:
//!
//! ```text
//! HTTP/1.1 <code> <reason>\r\n
//! Host: <address>:<port>\r\n
//! Content-Type: text/plain\r\n      (only with a payload)
//! Content-Length: <decimal>\r\n     (only with a payload)
//! \r\n
//! <payload>
//! ```

use crate::{
    errors::{BuildError, ConfigError},
    http::types::StatusCode,
    WriteBuffer,
};
use arc_swap::ArcSwap;
use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

// ACTION RESULT

/// What a route handler returns: a status and an optional payload.
///
/// The payload is serialized once, when the result is created, using
/// [`WriteBuffer`].
///
/// # Examples
/// ```
/// use spindle_web::{ActionResult, StatusCode};
///
/// let empty = ActionResult::new(StatusCode::NoContent);
/// assert_eq!(empty.payload(), None);
///
/// let text = ActionResult::with_payload(StatusCode::Ok, "Hello, World!");
/// assert_eq!(text.payload(), Some(&b"Hello, World!"[..]));
///
/// let number = ActionResult::with_payload(StatusCode::Ok, -42);
/// assert_eq!(number.payload(), Some(&b"-42"[..]));
///
/// let joined = ActionResult::with_body(StatusCode::Ok, |w| {
///     w.write("id=");
///     w.write(7u8);
/// });
/// assert_eq!(joined.payload(), Some(&b"id=7"[..]));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    status: StatusCode,
    payload: Option<Vec<u8>>,
}

impl ActionResult {
    /// A result without a body.
    #[inline]
    pub const fn new(status: StatusCode) -> Self {
        Self {
            status,
            payload: None,
        }
    }

    /// A result whose body is `value` rendered as text.
    pub fn with_payload<T: WriteBuffer>(status: StatusCode, value: T) -> Self {
        let mut payload = Vec::new();
        value.write_to(&mut payload);

        Self {
            status,
            payload: Some(payload),
        }
    }

    /// A result whose body is assembled piece by piece.
    pub fn with_body<F: FnOnce(&mut BodyWriter)>(status: StatusCode, f: F) -> Self {
        let mut payload = Vec::new();
        f(&mut BodyWriter(&mut payload));

        Self {
            status,
            payload: Some(payload),
        }
    }

    #[inline]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

impl From<StatusCode> for ActionResult {
    #[inline]
    fn from(status: StatusCode) -> Self {
        Self::new(status)
    }
}

// HOST CONFIG

/// The address advertised in every response's `Host` header.
///
/// The header line is rendered once per change and cached. Changing the
/// address is refused while the listener is bound.
#[derive(Debug)]
pub struct HostConfig {
    current: ArcSwap<HostLine>,
    listening: AtomicBool,
}

#[derive(Debug)]
struct HostLine {
    addr: SocketAddr,
    line: Box<[u8]>,
}

impl HostLine {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            line: format!("Host: {addr}\r\n").into_bytes().into_boxed_slice(),
        }
    }
}

impl HostConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            current: ArcSwap::from_pointee(HostLine::new(addr)),
            listening: AtomicBool::new(false),
        }
    }

    /// Address currently advertised.
    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.current.load().addr
    }

    /// Changes the advertised address.
    ///
    /// # Errors
    /// [`ConfigError::ListenerActive`] while the listener is bound.
    pub fn set_address(&self, ip: IpAddr, port: u16) -> Result<(), ConfigError> {
        if self.is_listening() {
            return Err(ConfigError::ListenerActive);
        }

        self.refresh(SocketAddr::new(ip, port));
        Ok(())
    }

    #[inline]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    // Bypasses the listening check; used by the listener itself once the
    // real bound port is known.
    pub(crate) fn refresh(&self, addr: SocketAddr) {
        self.current.store(Arc::new(HostLine::new(addr)));
    }

    pub(crate) fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::Release);
    }

    #[inline]
    fn write_line(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.current.load().line);
    }
}

// RESPONDER

/// Stateless response serializer shared by every connection.
///
/// Output is appended to the caller's buffer; nothing is allocated apart
/// from buffer growth.
///
/// # Examples
/// ```
/// use spindle_web::{ActionResult, HostConfig, Responder, StatusCode};
/// use std::sync::Arc;
///
/// let responder = Responder::new(Arc::new(HostConfig::new("127.0.0.1:8080".parse().unwrap())));
/// let mut out = Vec::new();
///
/// responder.build(&ActionResult::new(StatusCode::Ok), &mut out);
/// assert_eq!(out, b"HTTP/1.1 200 OK\r\nHost: 127.0.0.1:8080\r\n\r\n");
/// ```
#[derive(Debug, Clone)]
pub struct Responder {
    host: Arc<HostConfig>,
}

impl Responder {
    pub fn new(host: Arc<HostConfig>) -> Self {
        Self { host }
    }

    #[inline]
    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    /// Serializes `result` into `out`.
    #[inline]
    pub fn build(&self, result: &ActionResult, out: &mut Vec<u8>) {
        self.write(result.status(), result.payload(), out);
    }

    /// Serializes a bare status into `out`.
    #[inline]
    pub fn build_status(&self, status: StatusCode, out: &mut Vec<u8>) {
        self.write(status, None, out);
    }

    /// Serializes a numeric status code and optional body into `out`.
    ///
    /// # Errors
    /// [`BuildError::UnknownResponseCode`] when `code` is not in the status
    /// table. Nothing is written in that case.
    pub fn build_code(&self, code: u16, body: Option<&[u8]>, out: &mut Vec<u8>) -> Result<(), BuildError> {
        let status = StatusCode::try_from(code)?;
        self.write(status, body, out);
        Ok(())
    }

    fn write(&self, status: StatusCode, body: Option<&[u8]>, out: &mut Vec<u8>) {
        out.extend_from_slice(status.status_line());
        self.host.write_line(out);

        match body {
            Some(body) => {
                out.extend_from_slice(b"Content-Type: text/plain\r\nContent-Length: ");
                body.len().write_to(out);
                out.extend_from_slice(b"\r\n\r\n");
                out.extend_from_slice(body);
            }
            None => out.extend_from_slice(b"\r\n"),
        }
    }
}

pub use write::BodyWriter;

pub mod write {
    use crate::http::types::number_to_bytes;
    use std::{borrow::Cow, rc::Rc, sync::Arc};

    /// Incremental payload writer used by
    /// [`ActionResult::with_body`](super::ActionResult::with_body).
    ///
    /// Accepts [`WriteBuffer`] values and implements [`std::io::Write`], so
    /// `write!` works too:
    /// ```
    /// use spindle_web::{ActionResult, StatusCode};
    /// use std::io::Write;
    ///
    /// let result = ActionResult::with_body(StatusCode::Ok, |w| {
    ///     let _ = write!(w, "{} - {} = {}", 6, 2, 4);
    /// });
    /// assert_eq!(result.payload(), Some(&b"6 - 2 = 4"[..]));
    /// ```
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Values that can be rendered as a response payload.
    ///
    /// Implemented for strings, byte slices, integers, `bool` and `char`.
    /// Floats are left out on purpose: their textual form depends on
    /// precision choices the caller should make explicitly.
    ///
    /// # Example
    /// ```
    /// use spindle_web::WriteBuffer;
    ///
    /// struct Celsius(i16);
    ///
    /// impl WriteBuffer for Celsius {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         self.0.write_to(buffer);
    ///         buffer.extend_from_slice("°C".as_bytes());
    ///     }
    /// }
    ///
    /// let mut out = Vec::new();
    /// Celsius(-3).write_to(&mut out);
    /// assert_eq!(out, "-3°C".as_bytes());
    /// ```
    pub trait WriteBuffer {
        /// Appends the value's text form to `buffer`.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conv:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let conv = $conv;
                    conv(self, buffer);
                }
            })*
        };
        (number($type:ty), $conv:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conv(*self as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => str, String, Box<str>, Cow<'_, str>, Arc<str>, Rc<str>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => [u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]>, Rc<[u8]>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), write_unsigned => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        number(i128), write_signed => i8, i16, i32, i64, i128, isize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline(always)]
    fn write_unsigned(value: u128, buffer: &mut Vec<u8>) {
        let (digits, start) = number_to_bytes(value);
        buffer.extend_from_slice(&digits[start..]);
    }

    #[inline(always)]
    fn write_signed(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }
        write_unsigned(value.unsigned_abs(), buffer);
    }
}
