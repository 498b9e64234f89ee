//! Static file serving from a directory or an embedded resource namespace.
//!
//! The request path (query excluded) names the file relative to the source root:
//! `/docs/a.txt` under `FileServer::directory("/srv")` reads `/srv/docs/a.txt`.
//! Missing files answer `404` with the body `"Not found"`, paths that try to climb
//! out of the root answer `403`, and any other I/O failure answers `500`.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{trace, warn};

use crate::handler::{BoxFuture, Handler};
use crate::router::NOT_FOUND_BODY;
use crate::{Request, Response, StatusCode};

/// Why a file could not be served.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("no such file: {0}")]
    NotFound(String),

    #[error("path escapes the served root: {0}")]
    Forbidden(String),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl FileError {
    /// The response a client sees for this failure.
    pub fn into_response(self) -> Response {
        match self {
            FileError::NotFound(_) => Response::new(StatusCode::NotFound).body(NOT_FOUND_BODY),
            FileError::Forbidden(_) => Response::new(StatusCode::Forbidden).body("Forbidden"),
            FileError::Io { .. } => {
                Response::new(StatusCode::InternalServerError).body("Internal Server Error")
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Source {
    Directory(PathBuf),
    Embedded(Arc<HashMap<String, Bytes>>),
}

/// A [`Handler`] that answers with file contents.
///
/// # Examples
///
/// ```rust
/// use rttp_chain::files::FileServer;
///
/// let files = FileServer::embedded()
///     .with_resource("test.txt", "Testing the class path")
///     .max_age(3600);
/// ```
#[derive(Debug, Clone)]
pub struct FileServer {
    source: Source,
    max_age: Option<u64>,
}

impl FileServer {
    /// Serve files below `root` on disk.
    pub fn directory(root: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::Directory(root.into()),
            max_age: None,
        }
    }

    /// Serve from an in-memory namespace populated with [`with_resource`](Self::with_resource).
    pub fn embedded() -> Self {
        Self {
            source: Source::Embedded(Arc::new(HashMap::new())),
            max_age: None,
        }
    }

    /// Add a resource to an embedded namespace. Leading `/` in `name` is ignored.
    ///
    /// Has no effect on a directory-backed server.
    #[must_use]
    pub fn with_resource(mut self, name: &str, content: impl Into<Bytes>) -> Self {
        if let Source::Embedded(resources) = &mut self.source {
            Arc::make_mut(resources).insert(name.trim_start_matches('/').to_owned(), content.into());
        }
        self
    }

    /// Advertise `Cache-Control: max-age=<secs>` on successful responses.
    ///
    /// Clients see it; a [`ResponseCache`](crate::cache::ResponseCache) in front of
    /// this server follows it only when built with `honor_max_age(true)`.
    #[must_use]
    pub fn max_age(mut self, secs: u64) -> Self {
        self.max_age = Some(secs);
        self
    }

    async fn load(source: Source, path: String) -> Result<Bytes, FileError> {
        let relative = sanitize(&path)?;
        match source {
            Source::Directory(root) => {
                let full = root.join(&relative);
                match tokio::fs::read(&full).await {
                    Ok(content) => Ok(Bytes::from(content)),
                    Err(e) if is_missing(&e) => Err(FileError::NotFound(path)),
                    Err(source) => Err(FileError::Io { path, source }),
                }
            }
            Source::Embedded(resources) => {
                let key = relative.to_string_lossy().replace('\\', "/");
                resources
                    .get(&key)
                    .cloned()
                    .ok_or(FileError::NotFound(path))
            }
        }
    }
}

impl Handler for FileServer {
    fn call(&self, request: Request) -> BoxFuture {
        let source = self.source.clone();
        let max_age = self.max_age;
        let path = request.path().to_owned();

        Box::pin(async move {
            match FileServer::load(source, path.clone()).await {
                Ok(content) => {
                    trace!(%path, bytes = content.len(), "file served");
                    let mut response = Response::new(StatusCode::Ok)
                        .header("Content-Type", content_type(&path))
                        .body_bytes(content);
                    if let Some(secs) = max_age {
                        response.add_header("Cache-Control", format!("max-age={secs}"));
                    }
                    response
                }
                Err(err) => {
                    if matches!(err, FileError::Io { .. }) {
                        warn!(%path, error = %err, "file read failed");
                    } else {
                        trace!(%path, error = %err, "file not served");
                    }
                    err.into_response()
                }
            }
        })
    }
}

// Turn a request path into a relative path with only normal components.
fn sanitize(path: &str) -> Result<PathBuf, FileError> {
    if path.contains('\0') {
        return Err(FileError::Forbidden(path.to_owned()));
    }

    let mut relative = PathBuf::new();
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FileError::Forbidden(path.to_owned()));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(FileError::NotFound(path.to_owned()));
    }
    Ok(relative)
}

// Directories and missing files look the same to a client.
fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::IsADirectory | io::ErrorKind::NotADirectory
    )
}

fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "txt" => "text/plain; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
