//! Canned-response HTTP server for client tests

use crate::client::IdentityStoreClient;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

/// Identity store id the test clients are bound to
pub const STORE_ID: &str = "d-1234567890";

/// One request as the server saw it
#[derive(Debug, Clone)]
pub struct SeenRequest {
    /// Request line and headers, header names lowercased
    pub head: String,
    pub body: String,
}

impl SeenRequest {
    /// Operation named by the `X-Amz-Target` header
    pub fn operation(&self) -> Option<&str> {
        self.head
            .lines()
            .find_map(|line| line.strip_prefix("x-amz-target:"))
            .and_then(|target| target.trim().rsplit('.').next())
    }
}

/// Serve canned `(status, body)` responses, one per connection, and hand back
/// the requests once every response has been sent.
pub fn serve(responses: Vec<(u16, String)>) -> (String, thread::JoinHandle<Vec<SeenRequest>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for (status, body) in responses {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut head = String::new();
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                let line = match line.split_once(':') {
                    Some((name, value)) => format!("{}:{value}", name.to_ascii_lowercase()),
                    None => line,
                };
                if let Some(v) = line.strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap();
                }
                head.push_str(&line);
            }
            let mut request_body = vec![0; content_length];
            reader.read_exact(&mut request_body).unwrap();
            seen.push(SeenRequest {
                head,
                body: String::from_utf8_lossy(&request_body).into_owned(),
            });

            let mut stream = reader.into_inner();
            write!(
                stream,
                "HTTP/1.1 {status} X\r\nContent-Type: application/x-amz-json-1.1\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            stream.flush().unwrap();
        }
        seen
    });
    (url, handle)
}

/// Client bound to [`STORE_ID`] that sends every request to `url`
pub fn client(url: &str) -> IdentityStoreClient {
    IdentityStoreClient::with_endpoint(url, STORE_ID, Duration::from_secs(5)).unwrap()
}

/// Error body in the AWS JSON 1.1 shape
pub fn error_body(code: &str) -> String {
    format!(r#"{{"__type":"com.amazonaws.identitystore#{code}","message":"{code} from test server"}}"#)
}
