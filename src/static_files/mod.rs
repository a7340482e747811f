//! Static file serving.
//!
//! [`StaticFiles`] maps URL paths under a mount prefix onto a directory,
//! refusing anything that would escape it. Files are streamed from disk, or
//! held in a [`StaticFileCache`] when one is configured; either way
//! `If-Modified-Since` is honoured. Directories serve a default document or,
//! when enabled, a generated listing.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use brrtserver::static_files::{StaticFileCache, StaticFiles};
//!
//! let files = StaticFiles::new("./public")?
//!     .mount("/assets")
//!     .auto_index(true)
//!     .cache(StaticFileCache::new(Duration::from_secs(3600)));
//! let _watcher = files.watch()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod cache;
mod index;
mod watch;

pub use cache::{CacheEntry, CacheStats, StaticFileCache};
pub use watch::watch;

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::Method;
use notify::RecommendedWatcher;
use tracing::{debug, warn};

use crate::http::{decode_path, HandlerResponse, ResponseBody};
use crate::middleware::{Middleware, Next, PipelineError};
use crate::server::{SendError, Session};

const HTML: &str = "text/html; charset=utf-8";

/// Where a URL path lands relative to the served directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Not under the mount prefix.
    Outside,
    /// Would escape the root.
    Forbidden,
    Path(PathBuf),
}

/// Files under one root directory, served at one mount prefix.
#[derive(Debug)]
pub struct StaticFiles {
    root: PathBuf,
    mount: String,
    default_documents: Vec<String>,
    auto_index: bool,
    cache: Option<Arc<StaticFileCache>>,
}

impl StaticFiles {
    /// Serve `root` at `/`, with `index.html` as the default document.
    ///
    /// # Errors
    ///
    /// Fails when `root` does not exist or cannot be canonicalised.
    pub fn new<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        Ok(Self {
            root: fs::canonicalize(root)?,
            mount: "/".to_string(),
            default_documents: vec!["index.html".to_string()],
            auto_index: false,
            cache: None,
        })
    }

    #[must_use]
    pub fn mount(mut self, prefix: &str) -> Self {
        let trimmed = prefix.trim_end_matches('/');
        self.mount = if trimmed.is_empty() {
            "/".to_string()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        self
    }

    /// File names tried, in order, when a directory is requested.
    #[must_use]
    pub fn default_documents(mut self, names: &[&str]) -> Self {
        self.default_documents = names.iter().map(|s| s.to_string()).collect();
        self
    }

    #[must_use]
    pub fn auto_index(mut self, enabled: bool) -> Self {
        self.auto_index = enabled;
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: StaticFileCache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn cache_handle(&self) -> Option<&Arc<StaticFileCache>> {
        self.cache.as_ref()
    }

    /// Start invalidating the cache on filesystem changes. `None` when no
    /// cache is configured.
    ///
    /// # Errors
    ///
    /// Propagates watcher creation failures.
    pub fn watch(&self) -> notify::Result<Option<RecommendedWatcher>> {
        match &self.cache {
            Some(cache) => watch(&self.root, Arc::clone(cache)).map(Some),
            None => Ok(None),
        }
    }

    /// Map a raw (still percent-encoded) URL path onto the filesystem.
    ///
    /// Backslashes count as separators and `..` may not climb above the
    /// root. Existing paths are canonicalised so symlinks cannot leave the
    /// root either.
    #[must_use]
    pub fn resolve(&self, url_path: &str) -> Resolved {
        let rest = if self.mount == "/" {
            url_path
        } else {
            match url_path.strip_prefix(self.mount.as_str()) {
                Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
                _ => return Resolved::Outside,
            }
        };
        let decoded = decode_path(rest);
        if decoded.contains('\0') {
            return Resolved::Forbidden;
        }
        let normalized = decoded.replace('\\', "/");

        let mut segments: Vec<&str> = Vec::new();
        for seg in normalized.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Resolved::Forbidden;
                    }
                }
                s if s.contains(':') => return Resolved::Forbidden,
                s => segments.push(s),
            }
        }

        let mut path = self.root.clone();
        path.extend(segments);
        match fs::canonicalize(&path) {
            Ok(real) if real.starts_with(&self.root) => Resolved::Path(real),
            Ok(_) => Resolved::Forbidden,
            Err(_) => Resolved::Path(path),
        }
    }

    /// `Content-Type` for a file, by extension.
    #[must_use]
    pub fn content_type(path: &Path) -> &'static str {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "html" | "htm" => HTML,
            "css" => "text/css; charset=utf-8",
            "js" | "mjs" => "application/javascript; charset=utf-8",
            "json" | "map" => "application/json",
            "txt" => "text/plain; charset=utf-8",
            "md" => "text/markdown; charset=utf-8",
            "csv" => "text/csv; charset=utf-8",
            "xml" => "application/xml",
            "svg" => "image/svg+xml",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "ico" => "image/x-icon",
            "wasm" => "application/wasm",
            "pdf" => "application/pdf",
            "woff" => "font/woff",
            "woff2" => "font/woff2",
            "ttf" => "font/ttf",
            "mp4" => "video/mp4",
            "mp3" => "audio/mpeg",
            "zip" => "application/zip",
            "gz" => "application/gzip",
            _ => "application/octet-stream",
        }
    }

    /// Answer `session` from disk or cache.
    ///
    /// Returns `false`, without sending, for methods other than GET/HEAD,
    /// paths outside the mount, and files that do not exist.
    ///
    /// # Errors
    ///
    /// [`SendError`] if a response was already sent.
    pub fn serve(&self, session: &mut Session) -> Result<bool, SendError> {
        let req = session.request();
        if req.method != Method::GET && req.method != Method::HEAD {
            return Ok(false);
        }
        let raw_path = req
            .target
            .split('?')
            .next()
            .filter(|t| t.starts_with('/'))
            .unwrap_or(req.path.as_str())
            .to_string();
        let since = req
            .header("if-modified-since")
            .and_then(|v| httpdate::parse_http_date(v).ok());

        let path = match self.resolve(&raw_path) {
            Resolved::Outside => return Ok(false),
            Resolved::Forbidden => {
                warn!(path = %raw_path, "Static path escapes root");
                session.send(HandlerResponse::error(403, "Forbidden"))?;
                return Ok(true);
            }
            Resolved::Path(path) => path,
        };
        let Ok(meta) = fs::metadata(&path) else {
            return Ok(false);
        };

        let response = if meta.is_dir() {
            if !raw_path.ends_with('/') {
                let mut location = format!("{raw_path}/");
                let query = &session.request().query_string;
                if !query.is_empty() {
                    location.push('?');
                    location.push_str(query);
                }
                HandlerResponse::new(301).with_header("location", location)
            } else if let Some(doc) = self
                .default_documents
                .iter()
                .map(|d| path.join(d))
                .find(|p| p.is_file())
            {
                self.file_response(&doc, since)
            } else if self.auto_index {
                self.index_response(&path, &raw_path, since)
            } else {
                HandlerResponse::error(404, "Not Found")
            }
        } else {
            self.file_response(&path, since)
        };
        session.send(response)?;
        Ok(true)
    }

    fn file_response(&self, path: &Path, since: Option<SystemTime>) -> HandlerResponse {
        match self.load_file(path, since) {
            Ok(res) => res,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HandlerResponse::error(404, "Not Found"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Static file read failed");
                HandlerResponse::error(500, "Internal Server Error")
            }
        }
    }

    fn load_file(&self, path: &Path, since: Option<SystemTime>) -> io::Result<HandlerResponse> {
        let content_type = Self::content_type(path);
        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(path) {
                return Ok(respond(entry.content_type, entry.last_modified, since, || {
                    ResponseBody::Bytes(entry.bytes.clone())
                }));
            }
            let meta = fs::metadata(path)?;
            if cache.accepts(meta.len()) {
                let bytes = Bytes::from(fs::read(path)?);
                let modified = meta.modified().unwrap_or(UNIX_EPOCH);
                debug!(path = %path.display(), len = bytes.len(), "Static cache miss");
                cache.insert(path.to_path_buf(), bytes.clone(), content_type, modified);
                return Ok(respond(content_type, modified, since, || {
                    ResponseBody::Bytes(bytes)
                }));
            }
        }
        let file = File::open(path)?;
        let meta = file.metadata()?;
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        let len = meta.len();
        Ok(respond(content_type, modified, since, || ResponseBody::File {
            file,
            len,
        }))
    }

    fn index_response(&self, dir: &Path, url_path: &str, since: Option<SystemTime>) -> HandlerResponse {
        if let Some(entry) = self.cache.as_ref().and_then(|c| c.get(dir)) {
            return respond(HTML, entry.last_modified, since, || {
                ResponseBody::Bytes(entry.bytes.clone())
            });
        }
        let modified = fs::metadata(dir)
            .and_then(|m| m.modified())
            .unwrap_or(UNIX_EPOCH);
        match index::render(dir, url_path) {
            Ok(html) => {
                let bytes = Bytes::from(html);
                if let Some(cache) = &self.cache {
                    cache.insert(dir.to_path_buf(), bytes.clone(), HTML, modified);
                }
                respond(HTML, modified, since, || ResponseBody::Bytes(bytes))
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Directory listing failed");
                HandlerResponse::error(500, "Internal Server Error")
            }
        }
    }
}

/// 304 when `since` is at or after `modified` (second precision), else 200
/// with the body.
fn respond(
    content_type: &str,
    modified: SystemTime,
    since: Option<SystemTime>,
    body: impl FnOnce() -> ResponseBody,
) -> HandlerResponse {
    let last_modified = httpdate::fmt_http_date(modified);
    let secs = |t: SystemTime| t.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
    if since.is_some_and(|s| secs(modified) <= secs(s)) {
        return HandlerResponse::not_modified().with_header("last-modified", last_modified);
    }
    let mut res = HandlerResponse::new(200)
        .with_header("content-type", content_type)
        .with_header("last-modified", last_modified);
    res.body = body();
    res
}

/// Serves matching requests from a [`StaticFiles`] and passes the rest on.
#[derive(Debug, Clone)]
pub struct StaticFilesMiddleware {
    files: Arc<StaticFiles>,
}

impl StaticFilesMiddleware {
    #[must_use]
    pub fn new(files: StaticFiles) -> Self {
        Self {
            files: Arc::new(files),
        }
    }

    #[must_use]
    pub fn files(&self) -> &Arc<StaticFiles> {
        &self.files
    }
}

impl Middleware for StaticFilesMiddleware {
    fn name(&self) -> &'static str {
        "static_files"
    }

    fn handle(&self, session: &mut Session, next: &mut Next<'_>) -> Result<(), PipelineError> {
        if self.files.serve(session)? {
            return Ok(());
        }
        next.run(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use std::time::Duration;

    fn tree() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("hello.txt"), "Hello\n").unwrap();
        fs::create_dir(tmp.path().join("docs")).unwrap();
        fs::write(tmp.path().join("docs").join("index.html"), "<h1>docs</h1>").unwrap();
        fs::create_dir(tmp.path().join("empty")).unwrap();
        tmp
    }

    fn get(files: &StaticFiles, target: &str) -> Option<HandlerResponse> {
        let mut session = Session::for_request(Request::new(Method::GET, target));
        files.serve(&mut session).unwrap();
        session.take_response()
    }

    #[test]
    fn test_resolve_guards_root() {
        let tmp = tree();
        let files = StaticFiles::new(tmp.path()).unwrap().mount("/files");
        let root = files.root().to_path_buf();
        assert_eq!(files.resolve("/other/hello.txt"), Resolved::Outside);
        assert_eq!(files.resolve("/filesx/hello.txt"), Resolved::Outside);
        assert_eq!(files.resolve("/files/hello.txt"), Resolved::Path(root.join("hello.txt")));
        assert_eq!(files.resolve("/files/docs/../hello.txt"), Resolved::Path(root.join("hello.txt")));
        assert_eq!(files.resolve("/files/../../etc/passwd"), Resolved::Forbidden);
        assert_eq!(files.resolve("/files/%2e%2e/%2e%2e/etc/passwd"), Resolved::Forbidden);
        assert_eq!(files.resolve("/files/..\\..\\etc\\passwd"), Resolved::Forbidden);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(StaticFiles::content_type(Path::new("a.HTML")), HTML);
        assert_eq!(StaticFiles::content_type(Path::new("a.png")), "image/png");
        assert_eq!(StaticFiles::content_type(Path::new("a")), "application/octet-stream");
    }

    #[test]
    fn test_serve_file_and_conditional_get() {
        let tmp = tree();
        let files = StaticFiles::new(tmp.path()).unwrap();
        let res = get(&files, "/hello.txt").unwrap();
        assert_eq!(res.status, 200);
        assert_eq!(res.get_header("content-type"), Some("text/plain; charset=utf-8"));
        assert!(matches!(res.body, ResponseBody::File { len: 6, .. }));
        let last_modified = res.get_header("last-modified").unwrap().to_string();

        let mut req = Request::new(Method::GET, "/hello.txt");
        req.headers.push("If-Modified-Since", last_modified);
        let mut session = Session::for_request(req);
        assert!(files.serve(&mut session).unwrap());
        assert_eq!(session.take_response().unwrap().status, 304);
    }

    #[test]
    fn test_directories() {
        let tmp = tree();
        let files = StaticFiles::new(tmp.path()).unwrap();
        assert_eq!(get(&files, "/docs").unwrap().status, 301);
        assert_eq!(get(&files, "/docs/").unwrap().status, 200);
        assert_eq!(get(&files, "/empty/").unwrap().status, 404);
        assert!(get(&files, "/missing.txt").is_none());

        let indexed = StaticFiles::new(tmp.path()).unwrap().auto_index(true);
        let res = get(&indexed, "/").unwrap();
        assert_eq!(res.status, 200);
        assert!(String::from_utf8_lossy(res.body_bytes()).contains("hello.txt"));
    }

    #[test]
    fn test_cache_serves_until_invalidated() {
        let tmp = tree();
        let files = StaticFiles::new(tmp.path())
            .unwrap()
            .cache(StaticFileCache::new(Duration::from_secs(3600)));
        assert_eq!(get(&files, "/hello.txt").unwrap().body_bytes(), b"Hello\n");
        fs::write(tmp.path().join("hello.txt"), "Changed\n").unwrap();
        assert_eq!(get(&files, "/hello.txt").unwrap().body_bytes(), b"Hello\n");

        let cache = files.cache_handle().unwrap();
        cache.invalidate(&files.root().join("hello.txt"));
        assert_eq!(get(&files, "/hello.txt").unwrap().body_bytes(), b"Changed\n");
        assert!(cache.stats().hits >= 1);
    }

    #[test]
    fn test_traversal_answers_forbidden() {
        let tmp = tree();
        let files = StaticFiles::new(tmp.path().join("docs")).unwrap().mount("/files");
        let res = get(&files, "/files/../../hello.txt").unwrap();
        assert_eq!(res.status, 403);
        assert!(!String::from_utf8_lossy(res.body_bytes()).contains("Hello"));
    }
}
