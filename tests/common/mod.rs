#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Deterministic, non-repeating-per-chunk test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Knobs the tests flip while a session is running.
#[derive(Clone, Default)]
pub struct Behaviour {
    /// Hold every GET for a long time, so pause/cancel land mid-request.
    pub slow: Arc<AtomicBool>,
    /// Answer 500 to range requests starting at this offset.
    pub fail_from: Arc<Mutex<Option<u64>>>,
}

impl Behaviour {
    pub fn set_slow(&self, slow: bool) {
        self.slow.store(slow, Ordering::SeqCst);
    }

    pub fn fail_range_starting_at(&self, offset: Option<u64>) {
        *self.fail_from.lock().unwrap() = offset;
    }
}

/// Serves one static body, honouring `Range: bytes=a-b` like a file server.
pub struct RangeResponder {
    body: Arc<Vec<u8>>,
    advertise_size: bool,
    accept_ranges: bool,
    behaviour: Behaviour,
}

impl RangeResponder {
    fn parse_range(request: &Request) -> Option<(u64, u64)> {
        let value = request.headers.get("range")?.to_str().ok()?;
        let spec = value.strip_prefix("bytes=")?;
        let (start, end) = spec.split_once('-')?;
        Some((start.parse().ok()?, end.parse().ok()?))
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if request.method.as_str() == "HEAD" {
            let mut template = ResponseTemplate::new(200);
            if self.accept_ranges {
                template = template.insert_header("Accept-Ranges", "bytes");
            }
            if self.advertise_size {
                // The server drops the body of a HEAD reply but keeps its length.
                template = template.set_body_bytes(self.body.as_slice().to_vec());
            }
            return template;
        }

        let delay = if self.behaviour.slow.load(Ordering::SeqCst) {
            Duration::from_secs(60)
        } else {
            Duration::ZERO
        };

        let range = if self.accept_ranges {
            Self::parse_range(request)
        } else {
            None
        };
        let template = match range {
            Some((start, _)) if *self.behaviour.fail_from.lock().unwrap() == Some(start) => {
                ResponseTemplate::new(500)
            }
            Some((start, end)) => {
                let total = self.body.len() as u64;
                let end = end.min(total - 1);
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", format!("bytes {start}-{end}/{total}").as_str())
                    .set_body_bytes(self.body[start as usize..=end as usize].to_vec())
            }
            None => ResponseTemplate::new(200).set_body_bytes(self.body.as_slice().to_vec()),
        };
        template.set_delay(delay)
    }
}

pub struct TestServer {
    pub server: MockServer,
    pub body: Arc<Vec<u8>>,
    pub behaviour: Behaviour,
}

impl TestServer {
    pub async fn start(body: Vec<u8>) -> Self {
        Self::start_with(body, true, true).await
    }

    pub async fn start_with(body: Vec<u8>, advertise_size: bool, accept_ranges: bool) -> Self {
        let server = MockServer::start().await;
        let body = Arc::new(body);
        let behaviour = Behaviour::default();
        Mock::given(wiremock::matchers::path("/file.bin"))
            .respond_with(RangeResponder {
                body: body.clone(),
                advertise_size,
                accept_ranges,
                behaviour: behaviour.clone(),
            })
            .mount(&server)
            .await;
        Self {
            server,
            body,
            behaviour,
        }
    }

    pub fn url(&self) -> String {
        format!("{}/file.bin", self.server.uri())
    }

    /// `Range` header of every GET received so far (`None` for plain GETs).
    pub async fn get_ranges(&self) -> Vec<Option<String>> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == "GET")
            .map(|r| {
                r.headers
                    .get("range")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned)
            })
            .collect()
    }
}
