//! Development server for the boot page
//!
//! Serves a directory of static files (default `web/`), with the
//! `application/wasm` content type browsers require for streaming
//! compilation.
//!
//! Usage: `serve [port] [root]`

use std::fs;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use tiny_http::{Header, Request, Response, Server};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ROOT: &str = "web";

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut args = std::env::args().skip(1);
    let port = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let root = PathBuf::from(args.next().unwrap_or_else(|| DEFAULT_ROOT.to_string()));

    let addr = format!("0.0.0.0:{}", port);
    let server = Server::http(&addr)?;

    println!("[serve] {} on http://localhost:{}", root.display(), port);

    for request in server.incoming_requests() {
        handle(request, &root);
    }
    Ok(())
}

fn handle(request: Request, root: &Path) {
    let url = request.url().to_string();
    let response = match resolve(root, &url) {
        Some(path) => serve_file(&path),
        None => not_found(),
    };
    println!("[serve] {} {}", response.status_code().0, url);
    let _ = request.respond(response);
}

/// Map a request path onto `root`, refusing anything that climbs out of it
fn resolve(root: &Path, url: &str) -> Option<PathBuf> {
    let path = url.split(['?', '#']).next().unwrap_or("");
    let relative = Path::new(path.trim_start_matches('/'));

    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }

    let mut full = root.join(relative);
    if full.is_dir() {
        full.push("index.html");
    }
    Some(full)
}

fn serve_file(path: &Path) -> Response<Cursor<Vec<u8>>> {
    match fs::read(path) {
        Ok(contents) => with_content_type(Response::from_data(contents), mime_type(path)),
        Err(_) => not_found(),
    }
}

fn not_found() -> Response<Cursor<Vec<u8>>> {
    with_content_type(
        Response::from_string("404 Not Found").with_status_code(404),
        "text/plain",
    )
}

fn with_content_type(
    response: Response<Cursor<Vec<u8>>>,
    mime: &'static str,
) -> Response<Cursor<Vec<u8>>> {
    match Header::from_bytes("Content-Type", mime) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("wasm") => "application/wasm",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
