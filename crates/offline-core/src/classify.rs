//! Request classification
//!
//! Decides which serving strategy applies to an intercepted request.
//! Rules, in order:
//! 1. non-GET or non-http(s) requests bypass the cache entirely
//! 2. same-origin requests are served cache-first
//! 3. cross-origin fonts and stylesheets are network-first with a timeout
//! 4. any other cross-origin request is cache-first into the dynamic partition

use http::Method;
use offline_proxy::FetchRequest;
use url::Url;

/// Request destination, as reported by `Sec-Fetch-Dest`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Document,
    Style,
    Script,
    Font,
    Image,
    Manifest,
    Empty,
    Other,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Document => "document",
            Destination::Style => "style",
            Destination::Script => "script",
            Destination::Font => "font",
            Destination::Image => "image",
            Destination::Manifest => "manifest",
            Destination::Empty => "",
            Destination::Other => "other",
        }
    }

    /// Parse a `Sec-Fetch-Dest` header value
    pub fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Destination::Document,
            "style" => Destination::Style,
            "script" | "worker" | "sharedworker" | "serviceworker" => Destination::Script,
            "font" => Destination::Font,
            "image" => Destination::Image,
            "manifest" => Destination::Manifest,
            "empty" | "" => Destination::Empty,
            _ => Destination::Other,
        }
    }

    /// Guess the destination from the URL's file extension
    pub fn guess_from_url(url: &Url) -> Self {
        let path = url.path();
        if path.ends_with('/') {
            return Destination::Document;
        }

        let Some(mime) = mime_guess::from_path(path).first() else {
            return Destination::Empty;
        };

        match mime.essence_str() {
            "text/html" => Destination::Document,
            "text/css" => Destination::Style,
            "text/javascript" | "application/javascript" => Destination::Script,
            "application/manifest+json" => Destination::Manifest,
            "application/vnd.ms-fontobject" => Destination::Font,
            essence if essence.starts_with("font/") || essence.starts_with("application/font-") => {
                Destination::Font
            }
            essence if essence.starts_with("image/") => Destination::Image,
            _ => Destination::Empty,
        }
    }

    /// Destination of a request: the header if present, otherwise a guess
    pub fn of(request: &FetchRequest) -> Self {
        if let Some(dest) = request.header("sec-fetch-dest") {
            return Self::from_header(dest);
        }
        if request
            .header("accept")
            .is_some_and(|accept| accept.starts_with("text/html"))
        {
            return Destination::Document;
        }
        Self::guess_from_url(&request.url)
    }
}

/// Serving strategy for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Forward to the network without touching any partition
    Bypass,
    /// Same-origin: cache, then network into the dynamic partition
    CacheFirst,
    /// Cross-origin font or style: network with a timeout, then cache
    NetworkFirst,
    /// Other cross-origin: cache, then network into the dynamic partition
    CrossOriginCacheFirst,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Bypass => "bypass",
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::CrossOriginCacheFirst => "cross-origin-cache-first",
        }
    }
}

/// Check whether a cross-origin request is a font or stylesheet
fn is_font_or_style(url: &Url, destination: Destination) -> bool {
    let url = url.as_str();
    let is_font = destination == Destination::Font || url.contains("fonts.");
    let is_css = destination == Destination::Style || url.contains(".css");
    is_font || is_css
}

/// Classify a request against the origin the worker serves
pub fn classify(origin: &Url, request: &FetchRequest, destination: Destination) -> Strategy {
    if request.method != Method::GET || !request.is_http() {
        return Strategy::Bypass;
    }

    if request.url.origin() == origin.origin() {
        Strategy::CacheFirst
    } else if is_font_or_style(&request.url, destination) {
        Strategy::NetworkFirst
    } else {
        Strategy::CrossOriginCacheFirst
    }
}
