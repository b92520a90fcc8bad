//! The parsed form of one request.

use crate::{
    errors::ParseError,
    http::types::{eq_folded, fold},
};
use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    hash::{Hash, Hasher},
};

// HEADER NAME

/// A header name compared and hashed ASCII case-insensitively.
///
/// `content-length`, `Content-Length` and `CONTENT-LENGTH` are the same
/// header: they are equal and produce the same hash. Only ASCII letters are
/// folded, so `@` and `` ` `` stay distinct.
///
/// # Examples
/// ```
/// use spindle_web::HeaderName;
///
/// assert_eq!(HeaderName::new("Content-Length"), HeaderName::new("CONTENT-LENGTH"));
/// assert_eq!(HeaderName::new("Host").as_bytes(), b"Host");
/// ```
#[derive(Clone)]
pub struct HeaderName(Box<[u8]>);

impl HeaderName {
    /// Creates a name, keeping the original spelling for display.
    #[inline]
    pub fn new(name: impl AsRef<[u8]>) -> Self {
        Self(name.as_ref().into())
    }

    /// The name as it appeared on the wire.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Case-insensitive comparison against raw bytes.
    #[inline]
    pub fn matches(&self, other: &[u8]) -> bool {
        eq_folded(&self.0, other)
    }
}

impl PartialEq for HeaderName {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl Eq for HeaderName {}

impl Hash for HeaderName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.0.len());
        for &byte in self.0.iter() {
            state.write_u8(fold(byte));
        }
    }
}

impl fmt::Debug for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

// HEADER MAP

/// Request headers in arrival order.
///
/// Names are unique under case-insensitive comparison; the parser rejects a
/// repeated name before it reaches the map. Lookups and the duplicate check go
/// through a hashed index, so the cost of a lookup does not grow with the
/// number of headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(HeaderName, Vec<u8>)>,
    index: HashMap<HeaderName, usize>,
}

impl HeaderMap {
    #[inline]
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Adds a header, rejecting a name that is already present.
    pub(crate) fn insert(&mut self, name: &[u8], value: &[u8]) -> Result<(), ParseError> {
        let name = HeaderName::new(name);

        match self.index.entry(name.clone()) {
            Entry::Occupied(_) => Err(ParseError::duplicate_header()),
            Entry::Vacant(slot) => {
                slot.insert(self.entries.len());
                self.entries.push((name, value.to_vec()));
                Ok(())
            }
        }
    }

    #[inline]
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Value of the header named `name`, compared case-insensitively.
    #[inline]
    pub fn get(&self, name: impl AsRef<[u8]>) -> Option<&[u8]> {
        let position = *self.index.get(&HeaderName::new(name))?;
        self.entries.get(position).map(|(_, value)| value.as_slice())
    }

    #[inline]
    pub fn contains(&self, name: impl AsRef<[u8]>) -> bool {
        self.index.contains_key(&HeaderName::new(name))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(name, value)` pairs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &[u8])> {
        self.entries.iter().map(|(name, value)| (name, value.as_slice()))
    }
}

// HTTP CONTEXT

/// Everything the parser extracted from one request.
///
/// Produced once per request and handed to the route handler by reference.
/// Byte accessors return the raw wire bytes; the `*_str` variants return
/// `None` when the bytes are not valid UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpContext {
    pub(crate) method: Vec<u8>,
    pub(crate) route: Vec<u8>,
    pub(crate) version: Vec<u8>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<Vec<u8>>,
}

impl HttpContext {
    pub(crate) fn with_header_capacity(capacity: usize) -> Self {
        Self {
            headers: HeaderMap::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Clears every field while keeping allocations.
    pub(crate) fn clear(&mut self) {
        self.method.clear();
        self.route.clear();
        self.version.clear();
        self.headers.clear();
        self.body = None;
    }

    /// Request method, e.g. `b"GET"`.
    #[inline]
    pub fn method(&self) -> &[u8] {
        &self.method
    }

    /// Request target exactly as sent, e.g. `b"/api/users"`.
    #[inline]
    pub fn route(&self) -> &[u8] {
        &self.route
    }

    /// Protocol version, e.g. `b"HTTP/1.1"`.
    #[inline]
    pub fn version(&self) -> &[u8] {
        &self.version
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Shorthand for `headers().get(name)`.
    #[inline]
    pub fn header(&self, name: impl AsRef<[u8]>) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Body bytes; `None` when `Content-Length` was absent or zero.
    #[inline]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    #[inline]
    pub fn method_str(&self) -> Option<&str> {
        as_str(&self.method)
    }

    #[inline]
    pub fn route_str(&self) -> Option<&str> {
        as_str(&self.route)
    }

    #[inline]
    pub fn header_str(&self, name: impl AsRef<[u8]>) -> Option<&str> {
        self.header(name).and_then(as_str)
    }

    #[inline]
    pub fn body_str(&self) -> Option<&str> {
        self.body().and_then(as_str)
    }
}

#[inline]
fn as_str(bytes: &[u8]) -> Option<&str> {
    simdutf8::basic::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(name: &HeaderName) -> u64 {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn header_name_case() {
        let names = ["content-length", "Content-Length", "CONTENT-LENGTH"].map(HeaderName::new);

        for name in &names {
            assert_eq!(name, &names[0]);
            assert_eq!(hash_of(name), hash_of(&names[0]));
        }

        assert_ne!(HeaderName::new("content-length"), HeaderName::new("content-type"));
        assert_ne!(HeaderName::new("x@"), HeaderName::new("x`"));
        assert_eq!(names[1].as_bytes(), b"Content-Length");
    }

    #[test]
    fn header_map() {
        let mut map = HeaderMap::default();
        map.insert(b"Host", b"test.com").unwrap();
        map.insert(b"Content-Type", b"text/plain").unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("host"), Some(&b"test.com"[..]));
        assert_eq!(map.get(b"CONTENT-TYPE"), Some(&b"text/plain"[..]));
        assert_eq!(map.get("Accept"), None);

        let err = map.insert(b"HOST", b"other.com").unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateHeader);
        assert_eq!(map.get("host"), Some(&b"test.com"[..]));

        let order: Vec<&[u8]> = map.iter().map(|(name, _)| name.as_bytes()).collect();
        assert_eq!(order, [&b"Host"[..], b"Content-Type"]);

        map.clear();
        assert!(map.is_empty());
        assert!(!map.contains("host"));
        map.insert(b"host", b"again.com").unwrap();
        assert_eq!(map.get("HOST"), Some(&b"again.com"[..]));
    }

    #[test]
    fn many_headers() {
        let mut map = HeaderMap::default();
        for i in 0..20_000 {
            map.insert(format!("X-Header-{i}").as_bytes(), i.to_string().as_bytes()).unwrap();
        }

        assert_eq!(map.len(), 20_000);
        assert_eq!(map.get("x-header-0"), Some(&b"0"[..]));
        assert_eq!(map.get("X-HEADER-19999"), Some(&b"19999"[..]));
        assert!(map.insert(b"x-header-12345", b"dup").is_err());
        assert_eq!(map.iter().nth(7).map(|(name, _)| name.as_bytes()), Some(&b"X-Header-7"[..]));
    }

    #[test]
    fn str_accessors() {
        let mut ctx = HttpContext::default();
        ctx.method = b"GET".to_vec();
        ctx.route = b"/\xFF".to_vec();
        ctx.headers.insert(b"Host", b"test.com").unwrap();
        ctx.body = Some(b"Hello".to_vec());

        assert_eq!(ctx.method_str(), Some("GET"));
        assert_eq!(ctx.route_str(), None);
        assert_eq!(ctx.header_str("host"), Some("test.com"));
        assert_eq!(ctx.body_str(), Some("Hello"));

        ctx.clear();
        assert_eq!(ctx, HttpContext::default());
    }
}
