//! Bridge-side view of an in-flight request.
//!
//! # Responsibilities
//! - Expose method and absolute URL (fetched eagerly, one native call)
//! - Fetch headers lazily, exactly once per request
//! - Read the body at most once, through any clone of the view
//!
//! # Design Decisions
//! - Clones share the header cache and the consumed flag, so a body read
//!   through one clone is visible to all of them
//! - A failed header fetch is not cached; the next call retries

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use url::Url;

use crate::http::error::BridgeError;
use crate::net::{NativeError, NativeListener, RequestId};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Ordered request headers with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self(entries)
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Request handed to a handler.
#[derive(Clone)]
pub struct RequestView {
    id: RequestId,
    method: String,
    url: String,
    parsed: Url,
    native: Arc<dyn NativeListener>,
    headers: Arc<Mutex<Option<Arc<Headers>>>>,
    body_used: Arc<AtomicBool>,
}

impl RequestView {
    /// Materialize a view over a parked request. Fetches method and URL.
    pub fn open(native: Arc<dyn NativeListener>, id: RequestId) -> Result<Self, NativeError> {
        let basic = native.fetch_request_basic_info(id)?;
        let parsed = Url::parse(&basic.url).map_err(|e| NativeError::InvalidUrl(format!("{}: {}", basic.url, e)))?;
        Ok(Self {
            id,
            method: basic.method,
            url: basic.url,
            parsed,
            native,
            headers: Arc::new(Mutex::new(None)),
            body_used: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Absolute URL, e.g. `http://localhost:3000/ping?x=1`.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> String {
        self.parsed.path().to_string()
    }

    pub fn query(&self) -> Option<String> {
        self.parsed.query().map(str::to_string)
    }

    /// Decoded query string pairs.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.parsed.query_pairs().into_owned().collect()
    }

    /// The URL, parsed once when the view was opened.
    pub fn parsed_url(&self) -> &Url {
        &self.parsed
    }

    /// Request headers. The first call asks the listener; later calls and
    /// clones reuse the result.
    pub fn headers(&self) -> Result<Arc<Headers>, BridgeError> {
        let mut cache = self.headers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(headers) = cache.as_ref() {
            return Ok(Arc::clone(headers));
        }
        let headers = Arc::new(Headers::new(self.native.fetch_request_headers(self.id)?));
        *cache = Some(Arc::clone(&headers));
        Ok(headers)
    }

    pub fn header(&self, name: &str) -> Result<Option<String>, BridgeError> {
        Ok(self.headers()?.get(name).map(str::to_string))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.native.peer_addr(self.id)
    }

    /// Whether the body was read through this view or any clone.
    pub fn body_used(&self) -> bool {
        self.body_used.load(Ordering::SeqCst)
    }

    /// Read the raw body. Fails with [`BridgeError::BodyConsumed`] after the first read.
    pub async fn bytes(&self) -> Result<Bytes, BridgeError> {
        if self.body_used.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::BodyConsumed);
        }
        self.native
            .fetch_request_body(self.id)
            .await
            .map_err(|e| match e {
                NativeError::BodyConsumed(_) => BridgeError::BodyConsumed,
                other => BridgeError::Native(other),
            })
    }

    /// Body as UTF-8 text.
    pub async fn text(&self) -> Result<String, BridgeError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| BridgeError::MalformedBody(format!("invalid UTF-8: {}", e)))
    }

    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, BridgeError> {
        let text = self.text().await?;
        serde_json::from_str(&text).map_err(|e| BridgeError::MalformedBody(format!("invalid JSON: {}", e)))
    }

    /// URL-encoded form fields.
    ///
    /// Any other content type yields an empty list and leaves the body unread.
    pub async fn form(&self) -> Result<Vec<(String, String)>, BridgeError> {
        let is_form = self
            .header("content-type")?
            .map(|value| {
                value
                    .split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .eq_ignore_ascii_case(FORM_CONTENT_TYPE)
            })
            .unwrap_or(false);
        if !is_form {
            return Ok(Vec::new());
        }

        let bytes = self.bytes().await?;
        Ok(url::form_urlencoded::parse(&bytes).into_owned().collect())
    }
}

impl std::fmt::Debug for RequestView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestView")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("body_used", &self.body_used())
            .finish()
    }
}
