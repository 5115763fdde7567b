//! In-process stand-in for the remote compression service.
//!
//! Speaks just enough HTTP/1.1 for the client: `POST /shrink` answers with a
//! `Location` and compression stats (or an error status), `GET /output/<n>`
//! serves the stored result. Every response closes the connection.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Basic credentials the batch sends for api key `secret`
pub const AUTH_SECRET: &str = "Basic YXBpOnNlY3JldA==";

/// How the service treats one uploaded body
#[derive(Debug, Clone)]
pub enum Behavior {
    /// 201 with these bytes as the compressed result
    Shrink(Vec<u8>),
    /// Error status with a body
    Reject(u16, String),
    /// 201 announcing `output_size`, but the result is gone when fetched
    LoseOutput(u64),
}

#[derive(Default)]
struct State {
    behaviors: Mutex<HashMap<Vec<u8>, Behavior>>,
    outputs: Mutex<Vec<Option<Vec<u8>>>>,
    authorizations: Mutex<Vec<String>>,
    upload_delay: Mutex<Duration>,
    download_delay: Mutex<Duration>,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    active_uploads: AtomicUsize,
    peak_uploads: AtomicUsize,
    active_downloads: AtomicUsize,
    peak_downloads: AtomicUsize,
}

struct Request {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

pub struct MockService {
    addr: SocketAddr,
    state: Arc<State>,
}

impl MockService {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State::default());

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle(stream, accept_state.clone()));
            }
        });

        Self { addr, state }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/shrink", self.addr)
    }

    /// Register the behavior for an exact upload body
    pub fn on(&self, body: &[u8], behavior: Behavior) {
        self.state
            .behaviors
            .lock()
            .unwrap()
            .insert(body.to_vec(), behavior);
    }

    /// Hold every upload response for `delay`
    pub fn slow_uploads(&self, delay: Duration) {
        *self.state.upload_delay.lock().unwrap() = delay;
    }

    /// Hold every result download for `delay`
    pub fn slow_downloads(&self, delay: Duration) {
        *self.state.download_delay.lock().unwrap() = delay;
    }

    pub fn uploads(&self) -> usize {
        self.state.uploads.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.state.downloads.load(Ordering::SeqCst)
    }

    pub fn peak_uploads(&self) -> usize {
        self.state.peak_uploads.load(Ordering::SeqCst)
    }

    pub fn peak_downloads(&self) -> usize {
        self.state.peak_downloads.load(Ordering::SeqCst)
    }

    pub fn authorizations(&self) -> Vec<String> {
        self.state.authorizations.lock().unwrap().clone()
    }
}

async fn handle(mut stream: TcpStream, state: Arc<State>) {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(_) => return,
    };

    let (status, headers, body) = match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/shrink") => shrink(&request, &state).await,
        ("GET", path) if path.starts_with("/output/") => fetch(path, &state).await,
        _ => (404, Vec::new(), b"not found".to_vec()),
    };

    let _ = write_response(&mut stream, status, &headers, &body).await;
}

async fn shrink(request: &Request, state: &State) -> (u16, Vec<(String, String)>, Vec<u8>) {
    state.uploads.fetch_add(1, Ordering::SeqCst);
    let active = state.active_uploads.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak_uploads.fetch_max(active, Ordering::SeqCst);

    if let Some(auth) = request.headers.get("authorization") {
        state.authorizations.lock().unwrap().push(auth.clone());
    }

    let delay = *state.upload_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let behavior = state
        .behaviors
        .lock()
        .unwrap()
        .get(&request.body)
        .cloned()
        .unwrap_or_else(|| Behavior::Shrink(vec![b'z'; request.body.len() / 2]));

    let input_size = request.body.len() as u64;
    let response = match behavior {
        Behavior::Reject(status, body) => (status, Vec::new(), body.into_bytes()),
        Behavior::Shrink(output) => {
            let output_size = output.len() as u64;
            let location = store_output(state, Some(output));
            created(location, input_size, output_size)
        }
        Behavior::LoseOutput(output_size) => {
            let location = store_output(state, None);
            created(location, input_size, output_size)
        }
    };

    state.active_uploads.fetch_sub(1, Ordering::SeqCst);
    response
}

fn store_output(state: &State, output: Option<Vec<u8>>) -> String {
    let mut outputs = state.outputs.lock().unwrap();
    outputs.push(output);
    // Relative on purpose, the client resolves it against the endpoint
    format!("/output/{}", outputs.len() - 1)
}

fn created(location: String, input_size: u64, output_size: u64) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let ratio = if input_size == 0 {
        0.0
    } else {
        output_size as f64 / input_size as f64
    };
    let body = format!(
        r#"{{"input":{{"size":{},"type":"image/png"}},"output":{{"size":{},"type":"image/png","ratio":{}}}}}"#,
        input_size, output_size, ratio
    );
    (
        201,
        vec![
            ("Location".to_string(), location),
            ("Content-Type".to_string(), "application/json".to_string()),
        ],
        body.into_bytes(),
    )
}

async fn fetch(path: &str, state: &State) -> (u16, Vec<(String, String)>, Vec<u8>) {
    state.downloads.fetch_add(1, Ordering::SeqCst);
    let active = state.active_downloads.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak_downloads.fetch_max(active, Ordering::SeqCst);

    let delay = *state.download_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    state.active_downloads.fetch_sub(1, Ordering::SeqCst);

    let output = path
        .trim_start_matches("/output/")
        .parse::<usize>()
        .ok()
        .and_then(|index| state.outputs.lock().unwrap().get(index).cloned().flatten());

    match output {
        Some(bytes) => (200, Vec::new(), bytes),
        None => (404, Vec::new(), b"gone".to_vec()),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn fill(stream: &mut TcpStream, raw: &mut Vec<u8>) -> io::Result<()> {
    let mut chunk = [0u8; 4096];
    let read = stream.read(&mut chunk).await?;
    if read == 0 {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    raw.extend_from_slice(&chunk[..read]);
    Ok(())
}

async fn read_request(stream: &mut TcpStream) -> io::Result<Request> {
    let mut raw = Vec::new();
    let header_end = loop {
        if let Some(pos) = find(&raw, b"\r\n\r\n") {
            break pos + 4;
        }
        fill(stream, &mut raw).await?;
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    let mut rest = raw.split_off(header_end);
    let body = if let Some(len) = headers.get("content-length").and_then(|v| v.parse::<usize>().ok()) {
        while rest.len() < len {
            fill(stream, &mut rest).await?;
        }
        rest.truncate(len);
        rest
    } else if headers
        .get("transfer-encoding")
        .is_some_and(|v| v.contains("chunked"))
    {
        read_chunked(stream, rest).await?
    } else {
        Vec::new()
    };

    Ok(Request {
        method,
        path,
        headers,
        body,
    })
}

async fn read_chunked(stream: &mut TcpStream, mut raw: Vec<u8>) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line_end = loop {
            if let Some(pos) = find(&raw, b"\r\n") {
                break pos;
            }
            fill(stream, &mut raw).await?;
        };

        let line = String::from_utf8_lossy(&raw[..line_end]).to_string();
        let size = usize::from_str_radix(line.split(';').next().unwrap_or_default().trim(), 16)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        raw.drain(..line_end + 2);

        if size == 0 {
            return Ok(body);
        }
        while raw.len() < size + 2 {
            fill(stream, &mut raw).await?;
        }
        body.extend_from_slice(&raw[..size]);
        raw.drain(..size + 2);
    }
}

async fn write_response(
    stream: &mut TcpStream,
    status: u16,
    headers: &[(String, String)],
    body: &[u8],
) -> io::Result<()> {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        401 => "Unauthorized",
        404 => "Not Found",
        415 => "Unsupported Media Type",
        _ => "Error",
    };

    let mut head = format!("HTTP/1.1 {} {}\r\n", status, reason);
    for (name, value) in headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()));

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    stream.shutdown().await
}
