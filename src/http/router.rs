//! Exact-match routing from `(method, path)` to a handler.
//!
//! Routes are collected in a [`RouteTableBuilder`] during setup and then
//! frozen into a [`RouteTable`]. Freezing consumes the builder, so the table
//! the server reads from can never be mutated:
//!
//! ```compile_fail
//! use spindle_web::{ActionResult, RouteTableBuilder, StatusCode};
//!
//! let mut builder = RouteTableBuilder::new();
//! let table = builder.freeze();
//! builder.map_get("/", || ActionResult::new(StatusCode::Ok)); // moved
//! ```
//!
//! Matching is byte-exact and case-sensitive on both method and path. There
//! are no wildcards or parameterized segments.

use crate::http::{context::HttpContext, response::ActionResult};
use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};
use tracing::warn;

/// A route handler. Receives the parsed request and produces a result.
pub type Handler = Arc<dyn Fn(&HttpContext) -> ActionResult + Send + Sync>;

const HASH_SEED: u64 = 0xcbf2_9ce4_8422_2325;
const HASH_PRIME: u64 = 0x0000_0100_0000_01b3;

// ENDPOINT

/// A routing key: request path plus method.
///
/// Equality is byte-for-byte on both fields, so `/api` and `/API` are
/// different endpoints. Both fields are fixed at construction.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    path: Box<[u8]>,
    method: Box<[u8]>,
}

impl Endpoint {
    pub fn new(path: impl AsRef<[u8]>, method: impl AsRef<[u8]>) -> Self {
        Self {
            path: path.as_ref().into(),
            method: method.as_ref().into(),
        }
    }

    #[inline]
    pub fn path(&self) -> &[u8] {
        &self.path
    }

    #[inline]
    pub fn method(&self) -> &[u8] {
        &self.method
    }

    /// Seeded hash of method then path, each prefixed with its length.
    #[inline]
    pub fn hash_code(&self) -> u64 {
        endpoint_hash(&self.method, &self.path)
    }

    #[inline]
    fn matches(&self, method: &[u8], path: &[u8]) -> bool {
        *self.method == *method && *self.path == *path
    }
}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code());
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            String::from_utf8_lossy(&self.method),
            String::from_utf8_lossy(&self.path)
        )
    }
}

#[inline]
fn endpoint_hash(method: &[u8], path: &[u8]) -> u64 {
    mix_bytes(mix_bytes(HASH_SEED, method), path)
}

#[inline]
fn mix_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    hash = mix(hash, bytes.len() as u64);
    for &byte in bytes {
        hash = mix(hash, byte as u64);
    }
    hash
}

#[inline(always)]
const fn mix(hash: u64, value: u64) -> u64 {
    (hash ^ value).wrapping_mul(HASH_PRIME)
}

// BUILDER

/// Mutable route collection used during setup.
///
/// Registering the same `(method, path)` twice keeps the first handler and
/// ignores the later one.
///
/// # Examples
/// ```
/// use spindle_web::{ActionResult, RouteTableBuilder, StatusCode};
///
/// let mut routes = RouteTableBuilder::new();
/// routes
///     .map_get("/", || ActionResult::with_payload(StatusCode::Ok, "index"))
///     .map_delete("/", || ActionResult::new(StatusCode::NoContent));
///
/// let table = routes.freeze();
/// assert_eq!(table.len(), 2);
/// assert!(table.lookup(b"GET", b"/").is_some());
/// assert!(table.lookup(b"POST", b"/").is_none());
/// ```
#[derive(Default)]
pub struct RouteTableBuilder {
    routes: HashMap<Endpoint, Handler>,
}

impl RouteTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` and `path`.
    ///
    /// A pair that is already registered is left untouched.
    pub fn add_endpoint(
        &mut self,
        path: impl AsRef<[u8]>,
        method: impl AsRef<[u8]>,
        handler: Handler,
    ) -> &mut Self {
        match self.routes.entry(Endpoint::new(path, method)) {
            Entry::Vacant(entry) => {
                entry.insert(handler);
            }
            Entry::Occupied(entry) => {
                warn!(endpoint = ?entry.key(), "duplicate endpoint ignored, first registration wins");
            }
        }
        self
    }

    /// Registers a handler that reads the request.
    pub fn map<F>(&mut self, method: impl AsRef<[u8]>, path: impl AsRef<[u8]>, handler: F) -> &mut Self
    where
        F: Fn(&HttpContext) -> ActionResult + Send + Sync + 'static,
    {
        self.add_endpoint(path, method, Arc::new(handler))
    }

    pub fn map_get<F>(&mut self, path: impl AsRef<[u8]>, handler: F) -> &mut Self
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        self.map(b"GET", path, move |_: &HttpContext| handler())
    }

    pub fn map_post<F>(&mut self, path: impl AsRef<[u8]>, handler: F) -> &mut Self
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        self.map(b"POST", path, move |_: &HttpContext| handler())
    }

    pub fn map_put<F>(&mut self, path: impl AsRef<[u8]>, handler: F) -> &mut Self
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        self.map(b"PUT", path, move |_: &HttpContext| handler())
    }

    pub fn map_patch<F>(&mut self, path: impl AsRef<[u8]>, handler: F) -> &mut Self
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        self.map(b"PATCH", path, move |_: &HttpContext| handler())
    }

    pub fn map_delete<F>(&mut self, path: impl AsRef<[u8]>, handler: F) -> &mut Self
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        self.map(b"DELETE", path, move |_: &HttpContext| handler())
    }

    /// Moves every route of `other` into this builder. Routes already
    /// registered here are kept.
    pub fn extend(&mut self, other: RouteTableBuilder) -> &mut Self {
        for (endpoint, handler) in other.routes {
            match self.routes.entry(endpoint) {
                Entry::Vacant(entry) => {
                    entry.insert(handler);
                }
                Entry::Occupied(entry) => {
                    warn!(endpoint = ?entry.key(), "duplicate endpoint ignored, first registration wins");
                }
            }
        }
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Converts the collection into the read-only lookup table.
    pub fn freeze(self) -> RouteTable {
        let len = self.routes.len();
        let bucket_count = (len * 2).max(1).next_power_of_two();

        let mut buckets: Vec<Vec<(Endpoint, Handler)>> =
            (0..bucket_count).map(|_| Vec::new()).collect();

        for (endpoint, handler) in self.routes {
            let index = endpoint.hash_code() as usize & (bucket_count - 1);
            buckets[index].push((endpoint, handler));
        }

        RouteTable {
            buckets: buckets.into_boxed_slice(),
            mask: bucket_count - 1,
            len,
        }
    }
}

impl fmt::Debug for RouteTableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.routes.keys()).finish()
    }
}

// TABLE

/// Frozen, read-only routing table.
///
/// Shared between connections without synchronization. Lookups never
/// allocate.
pub struct RouteTable {
    buckets: Box<[Vec<(Endpoint, Handler)>]>,
    mask: usize,
    len: usize,
}

impl RouteTable {
    /// Handler registered for the request's method and route.
    #[inline]
    pub fn get_action(&self, ctx: &HttpContext) -> Option<&Handler> {
        self.lookup(ctx.method(), ctx.route())
    }

    /// Handler registered for `method` and `path`.
    pub fn lookup(&self, method: &[u8], path: &[u8]) -> Option<&Handler> {
        let index = endpoint_hash(method, path) as usize & self.mask;

        self.buckets[index]
            .iter()
            .find(|(endpoint, _)| endpoint.matches(method, path))
            .map(|(_, handler)| handler)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Every registered endpoint, in no particular order.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.buckets.iter().flatten().map(|(endpoint, _)| endpoint)
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.endpoints()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::types::StatusCode;

    fn status_of(table: &RouteTable, method: &[u8], path: &[u8]) -> Option<StatusCode> {
        let ctx = HttpContext::default();
        table.lookup(method, path).map(|handler| handler(&ctx).status())
    }

    #[test]
    fn exact_match() {
        let mut routes = RouteTableBuilder::new();
        routes
            .map_get("/", || ActionResult::new(StatusCode::Ok))
            .map_get("/api/test", || ActionResult::new(StatusCode::Accepted));
        let table = routes.freeze();

        #[rustfmt::skip]
        let cases: [(&[u8], &[u8], Option<StatusCode>); 7] = [
            (b"GET",  b"/",          Some(StatusCode::Ok)),
            (b"GET",  b"/api/test",  Some(StatusCode::Accepted)),
            (b"POST", b"/",          None),
            (b"get",  b"/",          None),
            (b"GET",  b"/API/TEST",  None),
            (b"GET",  b"/api/test/", None),
            (b"GET",  b"",           None),
        ];

        for (method, path, expected) in cases {
            assert_eq!(status_of(&table, method, path), expected);
        }
    }

    #[test]
    fn first_registration_wins() {
        let mut routes = RouteTableBuilder::new();
        routes
            .map_get("/dup", || ActionResult::new(StatusCode::Ok))
            .map_get("/dup", || ActionResult::new(StatusCode::Gone))
            .add_endpoint("/dup", "GET", Arc::new(|_: &HttpContext| ActionResult::new(StatusCode::Conflict)));

        assert_eq!(routes.len(), 1);
        let table = routes.freeze();
        assert_eq!(status_of(&table, b"GET", b"/dup"), Some(StatusCode::Ok));
    }

    #[test]
    fn map_methods() {
        let mut routes = RouteTableBuilder::new();
        routes
            .map_get("/r", || ActionResult::new(StatusCode::Ok))
            .map_post("/r", || ActionResult::new(StatusCode::Created))
            .map_put("/r", || ActionResult::new(StatusCode::Accepted))
            .map_patch("/r", || ActionResult::new(StatusCode::ResetContent))
            .map_delete("/r", || ActionResult::new(StatusCode::NoContent))
            .map("OPTIONS", "/r", |_| ActionResult::new(StatusCode::NotImplemented));
        let table = routes.freeze();

        #[rustfmt::skip]
        let cases: [(&[u8], StatusCode); 6] = [
            (b"GET",     StatusCode::Ok),
            (b"POST",    StatusCode::Created),
            (b"PUT",     StatusCode::Accepted),
            (b"PATCH",   StatusCode::ResetContent),
            (b"DELETE",  StatusCode::NoContent),
            (b"OPTIONS", StatusCode::NotImplemented),
        ];

        assert_eq!(table.len(), cases.len());
        for (method, expected) in cases {
            assert_eq!(status_of(&table, method, b"/r"), Some(expected));
        }
    }

    #[test]
    fn handler_reads_context() {
        let mut routes = RouteTableBuilder::new();
        routes.map("POST", "/len", |ctx| {
            ActionResult::with_payload(StatusCode::Ok, ctx.body().map_or(0, <[u8]>::len))
        });
        let table = routes.freeze();

        let ctx = HttpContext {
            method: b"POST".to_vec(),
            route: b"/len".to_vec(),
            body: Some(b"12345".to_vec()),
            ..HttpContext::default()
        };

        let result = table.get_action(&ctx).map(|handler| handler(&ctx));
        assert_eq!(result.and_then(|r| r.payload().map(<[u8]>::to_vec)), Some(b"5".to_vec()));
    }

    #[test]
    fn many_routes() {
        let mut routes = RouteTableBuilder::new();
        for i in 0..200 {
            routes.map_get(format!("/item/{i}"), || ActionResult::new(StatusCode::Ok));
        }
        let table = routes.freeze();

        assert_eq!(table.len(), 200);
        assert_eq!(table.endpoints().count(), 200);
        for i in 0..200 {
            let path = format!("/item/{i}");
            assert!(table.lookup(b"GET", path.as_bytes()).is_some());
        }
        assert!(table.lookup(b"GET", b"/item/200").is_none());
    }

    #[test]
    fn empty_table() {
        let table = RouteTableBuilder::new().freeze();

        assert!(table.is_empty());
        assert!(table.lookup(b"GET", b"/").is_none());
    }

    #[test]
    fn endpoint_identity() {
        let a = Endpoint::new("/api", "GET");
        let b = Endpoint::new(String::from("/api"), b"GET");

        assert_eq!(a, b);
        assert_eq!(a.hash_code(), b.hash_code());
        assert_ne!(a, Endpoint::new("/API", "GET"));
        assert_ne!(a, Endpoint::new("/api", "get"));
        // Length prefixes keep the method/path boundary significant.
        assert_ne!(
            Endpoint::new("T/", "GE").hash_code(),
            Endpoint::new("/", "GET").hash_code()
        );
        assert_eq!(a.method(), b"GET");
        assert_eq!(a.path(), b"/api");
    }
}
