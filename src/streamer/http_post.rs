//! Periodic HTTP POST output streamer, translated from
//! `Source/IO/HTTPClient.h`/`.cpp`: batches messages over `interval_secs`,
//! then POSTs the batch as one of the community container formats.
//!
//! The original builds a raw HTTP/1.1 request by hand over its own
//! `Protocol::TCP`/`Protocol::TLS` chain rather than pulling in a client
//! library; this keeps that shape, writing the request line and headers
//! itself over this crate's [`crate::transport::Transport`] stack.

use std::io::Write as _;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{error, warn};
use tokio::sync::mpsc;
use tokio::time::{Duration, interval};
use url::Url;

use super::{ChannelReceiver, MessageFormat, community_hub_envelope, render};
use crate::config::HttpContainer;
use crate::frame::Tag;
use crate::message::Message;
use crate::transport::Transport;
use crate::transport::tcp::TcpTransport;
use crate::transport::tls::TlsTransport;

/// Multipart boundary used for the APRS container's `jsonais` field.
const BOUNDARY: &str = "------------------------2e45e7d128457b6d";

/// Batches rendered messages and POSTs them on a timer.
pub struct HttpPostStreamer {
    url: Url,
    interval: Duration,
    container: HttpContainer,
    gzip: bool,
    station_id: i32,
    basic_auth: Option<(String, String)>,
}

impl HttpPostStreamer {
    /// New streamer targeting `url`, draining its batch every `interval`.
    pub fn new(url: &str, interval: Duration, container: HttpContainer) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: Url::parse(url)?,
            interval,
            container,
            gzip: false,
            station_id: 0,
            basic_auth: None,
        })
    }

    /// gzip the request body and set `Content-Encoding: gzip`.
    #[must_use]
    pub fn with_gzip(mut self) -> Self {
        self.gzip = true;
        self
    }

    /// Send `Authorization: Basic` with the given credentials.
    #[must_use]
    pub fn with_basic_auth(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), pass.into()));
        self
    }

    /// Stamp this station's id into the community-hub envelope.
    #[must_use]
    pub fn with_station_id(mut self, station_id: i32) -> Self {
        self.station_id = station_id;
        self
    }

    /// Wire this streamer into a [`crate::stream::Connection`], returning
    /// the `Receiver` half to subscribe and spawning the batch-and-POST
    /// task.
    #[must_use]
    pub fn spawn(self) -> ChannelReceiver {
        let (recv, rx) = ChannelReceiver::new();
        tokio::spawn(self.run(rx));
        recv
    }

    fn host(&self) -> String {
        self.url.host_str().unwrap_or("localhost").to_string()
    }

    fn port(&self) -> u16 {
        self.url
            .port()
            .unwrap_or(if self.url.scheme() == "https" { 443 } else { 80 })
    }

    fn path(&self) -> String {
        let mut p = self.url.path().to_string();
        if p.is_empty() {
            p = "/".to_string();
        }
        if let Some(q) = self.url.query() {
            p.push('?');
            p.push_str(q);
        }
        p
    }

    fn build_transport(&self) -> Box<dyn Transport> {
        let tcp = TcpTransport::new(self.host(), self.port()).non_persistent();
        if self.url.scheme() == "https" {
            Box::new(TlsTransport::new(self.host(), tcp))
        } else {
            Box::new(tcp)
        }
    }

    fn build_body(&self, batch: &[(Message, Tag)]) -> (Vec<u8>, &'static str, bool) {
        match self.container {
            HttpContainer::Aiscatcher | HttpContainer::Airframes => {
                let json = community_hub_envelope(self.station_id, batch);
                (json.into_bytes(), "application/json", true)
            }
            HttpContainer::Nmea => {
                let body = batch
                    .iter()
                    .filter_map(|(m, t)| render(MessageFormat::Nmea, m, t, self.station_id))
                    .map(|r| String::from_utf8_lossy(r.as_bytes()).into_owned())
                    .collect::<Vec<_>>()
                    .join("\r\n");
                (body.into_bytes(), "text/plain", true)
            }
            HttpContainer::Aprs => {
                let json = community_hub_envelope(self.station_id, batch);
                let mut body = Vec::new();
                let _ = write!(
                    body,
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"jsonais\"\r\nContent-Type: application/json\r\n\r\n{json}\r\n--{BOUNDARY}--\r\n"
                );
                (body, "multipart/form-data; boundary=------------------------2e45e7d128457b6d", false)
            }
        }
    }

    fn build_request(&self, body: &[u8], content_type: &str, gzipped: bool) -> Vec<u8> {
        let mut req = format!(
            "POST {} HTTP/1.1\r\nHost: {}:{}\r\nAccept: */*\r\n",
            self.path(),
            self.host(),
            self.port()
        );
        if let Some((user, pass)) = &self.basic_auth {
            let creds = BASE64.encode(format!("{user}:{pass}"));
            req.push_str(&format!("Authorization: Basic {creds}\r\n"));
        }
        req.push_str(&format!("Content-Type: {content_type}\r\n"));
        if gzipped {
            req.push_str("Content-Encoding: gzip\r\n");
        }
        req.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()));
        let mut out = req.into_bytes();
        out.extend_from_slice(body);
        out
    }

    fn gzip_body(body: Vec<u8>) -> Vec<u8> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        if enc.write_all(&body).is_err() {
            return body;
        }
        enc.finish().unwrap_or(body)
    }

    async fn post(&self, batch: &[(Message, Tag)]) {
        if batch.is_empty() {
            return;
        }
        let (mut body, content_type, gzippable) = self.build_body(batch);
        let gzipped = self.gzip && gzippable;
        if gzipped {
            body = Self::gzip_body(body);
        }
        let request = self.build_request(&body, content_type, gzipped);

        let mut transport = self.build_transport();
        if let Err(e) = transport.connect().await {
            warn!("http-post streamer ({}): connect failed: {e}", self.url);
            return;
        }
        if let Err(e) = transport.send(&request).await {
            warn!("http-post streamer ({}): send failed: {e}", self.url);
        }
        let mut resp = Vec::new();
        if let Err(e) = transport.read(&mut resp).await {
            warn!("http-post streamer ({}): read response failed: {e}", self.url);
        } else if let Some(status) = parse_status_line(&resp)
            && !(200..300).contains(&status)
        {
            error!("http-post streamer ({}): server returned status {status}", self.url);
        }
        transport.disconnect().await;
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<(Message, Tag)>) {
        let mut batch = Vec::new();
        let mut ticker = interval(self.interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(m) => batch.push(m),
                        None => {
                            self.post(&batch).await;
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let drained = std::mem::take(&mut batch);
                    self.post(&drained).await;
                }
            }
        }
    }
}

/// Parse the numeric status code out of an HTTP/1.1 response's first line,
/// per `HTTPClient::parseResponse`'s version/status-code split.
fn parse_status_line(resp: &[u8]) -> Option<u16> {
    let line_end = resp.iter().position(|&b| b == b'\n')?;
    let line = std::str::from_utf8(&resp[..line_end]).ok()?;
    line.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_from_response_line() {
        assert_eq!(parse_status_line(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"), Some(200));
        assert_eq!(parse_status_line(b"HTTP/1.1 503 Service Unavailable\r\n"), Some(503));
    }

    #[test]
    fn aprs_body_wraps_in_multipart_boundary() {
        let streamer = HttpPostStreamer::new("http://example.com/post", Duration::from_secs(30), HttpContainer::Aprs).unwrap();
        let mut msg = Message::new();
        msg.set_uint(0, 6, 1).unwrap();
        msg.set_length_bits(168);
        let tag = Tag::default();
        msg.build_nmea(&tag, Some(1));
        let (body, content_type, gzippable) = streamer.build_body(&[(msg, tag)]);
        let body = String::from_utf8(body).unwrap();
        assert!(body.starts_with(&format!("--{BOUNDARY}")));
        assert!(body.ends_with(&format!("--{BOUNDARY}--\r\n")));
        assert!(content_type.contains("multipart/form-data"));
        assert!(!gzippable);
    }

    #[test]
    fn request_includes_basic_auth_header() {
        let streamer = HttpPostStreamer::new("http://example.com/post", Duration::from_secs(30), HttpContainer::Nmea)
            .unwrap()
            .with_basic_auth("alice", "secret");
        let req = streamer.build_request(b"hello", "text/plain", false);
        let req = String::from_utf8(req).unwrap();
        assert!(req.contains("Authorization: Basic"));
        assert!(req.contains("POST /post HTTP/1.1"));
    }
}
