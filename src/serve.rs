//! Development server for the built site.
//!
//! A small `tiny_http` server that serves the output directory, resolving
//! directory URLs to their `index.html`. It runs on the main thread while the
//! watcher rebuilds the site on another.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tiny_http::{Header, Request, Response, Server};

use crate::core::error::{ProcessingError, Result};

/// Port tried first when none is given.
pub const DEFAULT_PORT: u16 = 3000;

/// [`DEFAULT_PORT`] as a command-line default.
pub const DEFAULT_PORT_ARG: &str = "3000";

/// Interface the server listens on.
pub const DEFAULT_INTERFACE: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Try binding to port, retry with incremented port if in use
const MAX_PORT_RETRIES: u16 = 10;

/// A bound HTTP server for one output directory.
pub struct DevServer {
    server: Arc<Server>,
    addr: SocketAddr,
    root: PathBuf,
}

impl std::fmt::Debug for DevServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevServer")
            .field("addr", &self.addr)
            .field("root", &self.root)
            .finish()
    }
}

/// Stops a running [`DevServer`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<Server>);

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ShutdownHandle")
    }
}

impl ShutdownHandle {
    /// Makes [`DevServer::run`] return.
    pub fn shutdown(&self) {
        self.0.unblock();
    }
}

impl DevServer {
    /// Binds to `port` on `interface`, moving up to the next free port when
    /// it is taken.
    pub fn bind(root: &Path, interface: IpAddr, port: u16) -> Result<Self> {
        let (server, addr) = try_bind_port(interface, port, MAX_PORT_RETRIES)?;
        Ok(Self {
            server: Arc::new(server),
            addr,
            root: root.to_path_buf(),
        })
    }

    /// The address actually bound.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// A handle that stops the server.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.server))
    }

    /// Serves requests until shut down.
    pub fn run(&self) {
        log::info!("serving {} at http://{}", self.root.display(), self.addr);
        for request in self.server.incoming_requests() {
            if let Err(e) = handle_request(request, &self.root) {
                log::warn!("request error: {}", e);
            }
        }
    }
}

fn try_bind_port(
    interface: IpAddr,
    base_port: u16,
    max_retries: u16,
) -> Result<(Server, SocketAddr)> {
    let mut last_error = String::new();
    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::new(interface, port);

        match Server::http(addr) {
            Ok(server) => {
                let addr = server.server_addr().to_ip().unwrap_or(addr);
                if offset > 0 {
                    log::info!("port {} in use, using {} instead", base_port, port);
                }
                return Ok((server, addr));
            }
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(ProcessingError::internal_error(format!(
        "failed to bind after {} attempts (ports {}-{}): {}",
        max_retries,
        base_port,
        base_port.saturating_add(max_retries.saturating_sub(1)),
        last_error
    )))
}

/// Maps a request URL to a file under `root`.
///
/// Query strings are ignored, directories resolve to their `index.html`, and
/// URLs that would leave `root` resolve to nothing.
pub fn resolve_request(root: &Path, url: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(url).ok()?;
    let path = decoded.split(['?', '#']).next().unwrap_or_default();
    let relative = Path::new(path.trim_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }

    let local = root.join(relative);
    if local.is_file() {
        return Some(local);
    }
    let index = local.join("index.html");
    index.is_file().then_some(index)
}

fn handle_request(request: Request, root: &Path) -> std::io::Result<()> {
    let Some(path) = resolve_request(root, request.url()) else {
        log::debug!("404 {}", request.url());
        let response =
            Response::from_string("404 Not Found").with_status_code(404);
        return request.respond(response);
    };

    let content = fs::read(&path)?;
    let mut response = Response::from_data(content);
    if let Ok(header) =
        Header::from_bytes("Content-Type", guess_content_type(&path))
    {
        response = response.with_header(header);
    }
    request.respond(response)
}

/// Guess MIME content type from file extension.
fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "application/javascript; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("xml") => "application/xml; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
