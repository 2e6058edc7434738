//! Verify request preparation against JSON test vectors stored in
//! `test-vectors/`.
//!
//! Each vector file describes what a caller does through the public API and
//! what should reach the transport. Requests are captured by a transport
//! that never answers, so no network is involved.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use xhr_core::http::NoopHandle;
use xhr_core::prepare::{host_header, parse_url};
use xhr_core::{
    Config, EventSink, FsReader, Transport, TransportError, TransportHandle, TransportRequest,
    XhrError, XmlHttpRequest,
};

/// Records every request and drops the sink.
#[derive(Default)]
struct Capture {
    seen: Mutex<Vec<TransportRequest>>,
}

impl Transport for Capture {
    fn request(
        &self,
        request: TransportRequest,
        _sink: EventSink,
    ) -> Result<Box<dyn TransportHandle>, TransportError> {
        self.seen.lock().unwrap().push(request);
        Ok(Box::new(NoopHandle))
    }
}

fn client(capture: &Arc<Capture>) -> XmlHttpRequest {
    XmlHttpRequest::with_parts(
        Config::default(),
        Arc::clone(capture) as Arc<dyn Transport>,
        Arc::new(FsReader),
    )
}

fn strings(value: &Value) -> Vec<&str> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect()
}

// ---------------------------------------------------------------------------
// Host header
// ---------------------------------------------------------------------------

#[test]
fn host_header_vectors() {
    let raw = include_str!("../test-vectors/host_header.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let url = parse_url(case["url"].as_str().unwrap()).unwrap();
        assert_eq!(host_header(&url), case["expected"].as_str().unwrap(), "{name}");
    }
}

// ---------------------------------------------------------------------------
// Forbidden headers and methods
// ---------------------------------------------------------------------------

#[test]
fn forbidden_header_vectors() {
    let raw = include_str!("../test-vectors/forbidden.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let capture = Arc::new(Capture::default());

    for name in strings(&vectors["headers"]["forbidden"]) {
        let mut xhr = client(&capture);
        xhr.open("GET", "http://example.com/").unwrap();
        xhr.set_request_header(name, "vector").unwrap();
        assert_eq!(xhr.get_request_header(name), None, "{name} should be refused");
    }

    for name in strings(&vectors["headers"]["allowed"]) {
        let mut xhr = client(&capture);
        xhr.open("GET", "http://example.com/").unwrap();
        xhr.set_request_header(name, "vector").unwrap();
        assert_eq!(xhr.get_request_header(name), Some("vector"), "{name} should be kept");
    }
}

#[test]
fn forbidden_method_vectors() {
    let raw = include_str!("../test-vectors/forbidden.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let capture = Arc::new(Capture::default());

    for method in strings(&vectors["methods"]["forbidden"]) {
        let mut xhr = client(&capture);
        let err = xhr.open(method, "http://example.com/").unwrap_err();
        assert!(matches!(err, XhrError::Security(_)), "{method}: {err}");
    }

    for method in strings(&vectors["methods"]["allowed"]) {
        let mut xhr = client(&capture);
        xhr.open(method, "http://example.com/").unwrap();
    }
}

// ---------------------------------------------------------------------------
// Outgoing requests
// ---------------------------------------------------------------------------

#[test]
fn request_vectors() {
    let raw = include_str!("../test-vectors/requests.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let capture = Arc::new(Capture::default());
        let mut xhr = client(&capture);

        xhr.open(case["method"].as_str().unwrap(), case["url"].as_str().unwrap())
            .unwrap();
        for pair in case["headers"].as_array().unwrap() {
            let pair = strings(pair);
            xhr.set_request_header(pair[0], pair[1]).unwrap();
        }
        xhr.send(case["body"].as_str()).unwrap();

        let seen = capture.seen.lock().unwrap();
        assert_eq!(seen.len(), 1, "{name}: one request");
        let req = &seen[0];
        let expected = &case["expected"];

        assert_eq!(req.method, expected["method"].as_str().unwrap(), "{name}: method");
        assert_eq!(req.host, expected["host"].as_str().unwrap(), "{name}: host");
        assert_eq!(u64::from(req.port), expected["port"].as_u64().unwrap(), "{name}: port");
        assert_eq!(req.path, expected["path"].as_str().unwrap(), "{name}: path");
        assert_eq!(req.secure, expected["secure"].as_bool().unwrap(), "{name}: secure");
        assert_eq!(
            String::from_utf8_lossy(&req.body),
            expected["body"].as_str().unwrap(),
            "{name}: body"
        );

        for (header, value) in expected["headers"].as_object().unwrap() {
            assert_eq!(req.header(header), value.as_str(), "{name}: header {header}");
        }
    }
}
