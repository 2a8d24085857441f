//! Fallback transport: hand-written HTTP/1.0 GET over a raw TCP socket.
//!
//! Plain `http` only. With a proxy configured, the request goes to the proxy
//! using the absolute URI as request target.

use super::proxy::ProxySettings;
use super::Transport;
use crate::error::{BrowscapError, Result};
use reqwest::Url;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Responses larger than this are abandoned.
const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

pub struct SocketTransport {
    user_agent: String,
    proxy: Option<ProxySettings>,
}

impl SocketTransport {
    pub fn new(user_agent: &str, proxy: Option<ProxySettings>) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            proxy,
        }
    }

    fn request(&self, url: &Url, raw_url: &str) -> std::result::Result<(String, u16, String), String> {
        if url.scheme() != "http" {
            return Err(format!("unsupported scheme '{}'", url.scheme()));
        }

        let host = url.host_str().ok_or("url has no host")?;
        let port = url.port_or_known_default().unwrap_or(80);

        let host_header = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let (connect_host, connect_port, target) = match &self.proxy {
            Some(proxy) => (proxy.host.clone(), proxy.port, raw_url.to_string()),
            None => {
                let mut target = url.path().to_string();
                if let Some(query) = url.query() {
                    target.push('?');
                    target.push_str(query);
                }
                (host.to_string(), port, target)
            }
        };

        let mut request = format!(
            "GET {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: {}\r\n",
            target, host_header, self.user_agent
        );
        if let Some(authorization) = self.proxy.as_ref().and_then(ProxySettings::authorization) {
            request.push_str(&format!("Proxy-Authorization: {}\r\n", authorization));
        }
        request.push_str("Connection: Close\r\n\r\n");

        Ok((connect_host, connect_port, request))
    }
}

impl Transport for SocketTransport {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let fail = |message: String| BrowscapError::transport(self.name(), url, message);

        let parsed = Url::parse(url).map_err(|e| fail(e.to_string()))?;
        let (host, port, request) = self.request(&parsed, url).map_err(fail)?;

        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| fail(e.to_string()))?
            .next()
            .ok_or_else(|| fail(format!("could not resolve {}", host)))?;

        // The timeout bounds the whole attempt, not each socket call
        let deadline = Instant::now() + timeout;

        let mut stream =
            TcpStream::connect_timeout(&addr, timeout).map_err(|e| fail(e.to_string()))?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|e| fail(e.to_string()))?;

        stream
            .write_all(request.as_bytes())
            .map_err(|e| fail(e.to_string()))?;

        let response = read_until_deadline(&mut stream, deadline).map_err(fail)?;
        parse_response(&response).map_err(fail)
    }
}

/// Reads to end of stream, giving up at `deadline` or past the size cap.
fn read_until_deadline(stream: &mut TcpStream, deadline: Instant) -> std::result::Result<Vec<u8>, String> {
    let mut response = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or_else(|| format!("response incomplete after {} bytes at deadline", response.len()))?;
        stream
            .set_read_timeout(Some(remaining))
            .map_err(|e| e.to_string())?;

        match stream.read(&mut chunk) {
            Ok(0) => return Ok(response),
            Ok(n) => {
                response.extend_from_slice(&chunk[..n]);
                if response.len() > MAX_RESPONSE_BYTES {
                    return Err(format!("response exceeds {} bytes", MAX_RESPONSE_BYTES));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.to_string()),
        }
    }
}

/// Splits a raw HTTP response, returning the body of a `200` response.
fn parse_response(raw: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let line_end = raw
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| "empty or truncated response".to_string())?;

    let status_line = String::from_utf8_lossy(&raw[..line_end]);
    if status_line.split_whitespace().nth(1) != Some("200") {
        return Err(format!("unexpected status line {:?}", status_line.trim()));
    }

    let body_start = find(raw, b"\r\n\r\n")
        .map(|i| i + 4)
        .or_else(|| find(raw, b"\n\n").map(|i| i + 2))
        .ok_or_else(|| "response has no header terminator".to_string())?;

    Ok(raw[body_start..].to_vec())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
