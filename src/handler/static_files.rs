use std::path::{Path, PathBuf};

use anyhow::Context;
use percent_encoding::percent_decode_str;
use tracing::debug;
use url::Url;

use crate::handler::{Handler, cgi};
use crate::http::mime;
use crate::http::request::{Method, Request};
use crate::http::response::{FileBody, Response, ResponseBuilder, StatusCode};

const INDEX_FILE: &str = "index.html";
const CGI_DIR: &str = "cgi-bin";

/// Serves files below a root directory.
///
/// Only `GET` and `HEAD` are answered. Any path that does not resolve to a
/// readable file inside the root, symlinks pointing out of it included, is
/// a 404.
///
/// With [`with_cgi`](Self::with_cgi) enabled, files under `/cgi-bin/` are
/// run as CGI scripts instead of being sent.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    cgi: bool,
}

impl StaticFiles {
    pub fn new(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to open root directory {}", root.display()))?;
        if !root.is_dir() {
            anyhow::bail!("{} is not a directory", root.display());
        }
        Ok(Self { root, cgi: false })
    }

    pub fn with_cgi(mut self, enabled: bool) -> Self {
        self.cgi = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a request target to a path below the root, dot-segments removed
    /// and segments percent-decoded.
    ///
    /// A segment that decodes to something other than a plain file name,
    /// i.e. one holding `/`, NUL or invalid UTF-8, maps to nothing. The
    /// result is not checked against the filesystem.
    pub fn resolve(&self, target: &str) -> Option<PathBuf> {
        let base = Url::parse("http://localhost/").ok()?;
        let url = base.join(target).ok()?;

        let mut path = self.root.clone();
        for segment in url.path_segments()? {
            let segment = percent_decode_str(segment).decode_utf8().ok()?;
            if segment.contains(['/', '\0']) {
                debug!(%segment, "Rejecting encoded path separator");
                return None;
            }
            match &*segment {
                "" => {}
                // Decoded dot-segments are not navigation.
                "." | ".." => return None,
                segment => path.push(segment),
            }
        }
        Some(path)
    }

    async fn find_file(&self, target: &str) -> Option<PathBuf> {
        let path = self.resolve(target)?;
        let mut canonical = self.contained(&path).await?;

        if tokio::fs::metadata(&canonical).await.ok()?.is_dir() {
            canonical = self.contained(&canonical.join(INDEX_FILE)).await?;
        }

        let meta = tokio::fs::metadata(&canonical).await.ok()?;
        meta.is_file().then_some(canonical)
    }

    /// Canonical form of `path` if it exists and lies inside the root.
    async fn contained(&self, path: &Path) -> Option<PathBuf> {
        let canonical = match tokio::fs::canonicalize(path).await {
            Ok(canonical) => canonical,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Cannot resolve path");
                return None;
            }
        };
        if !canonical.starts_with(&self.root) {
            debug!(path = %canonical.display(), "Path escapes root directory");
            return None;
        }
        Some(canonical)
    }
}

impl Handler for StaticFiles {
    async fn handle(&self, request: Request) -> Response {
        if !matches!(request.method, Method::GET | Method::HEAD) {
            let mut response = Response::error(StatusCode::MethodNotAllowed);
            response.headers.append("Allow", "GET, HEAD");
            return response;
        }

        let Some(path) = self.find_file(request.path()).await else {
            return Response::not_found();
        };

        if self.cgi && path.starts_with(self.root.join(CGI_DIR)) {
            return cgi::run(&request, &path).await;
        }

        match FileBody::open(&path).await {
            Ok(file) => ResponseBuilder::new(StatusCode::Ok)
                .header("Content-Type", mime::content_type(&path))
                .body(file)
                .build(),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Failed to read file");
                Response::not_found()
            }
        }
    }
}
