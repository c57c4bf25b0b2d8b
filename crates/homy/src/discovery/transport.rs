use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::Url;

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Discovery accepts any 2xx or 3xx status.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request to {0} timed out")]
    Timeout(Url),

    #[error("Could not connect to {0}: {1}")]
    Connect(Url, String),

    #[error("Request to {url} failed: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Trait for the single GET request each probe stage issues
///
/// This trait allows for mocking the network for testing purposes
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError>;
}

/// Real transport using reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("homy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
        let map_err = |source: reqwest::Error| {
            if source.is_timeout() {
                TransportError::Timeout(url.clone())
            } else if source.is_connect() {
                TransportError::Connect(url.clone(), source.to_string())
            } else {
                TransportError::Request {
                    url: url.clone(),
                    source,
                }
            }
        };

        let response = self.client.get(url.clone()).send().await.map_err(map_err)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_err)?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Scripted reply of the mock transport
#[cfg(test)]
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond { status: u16, body: String },
    /// Answer 200 with `body` after `delay`
    Delayed(Duration, String),
    Refused,
    Stall,
}

#[cfg(test)]
impl MockReply {
    pub fn ok(body: &str) -> Self {
        MockReply::Respond {
            status: 200,
            body: body.to_string(),
        }
    }
}

/// Mock transport for testing
///
/// Replies are consumed in order; the last one repeats for any further request.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: std::sync::Mutex<std::collections::VecDeque<MockReply>>,
    requests: std::sync::Mutex<Vec<Url>>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new(reply: MockReply) -> Self {
        Self::with_replies(vec![reply])
    }

    pub fn with_replies(replies: Vec<MockReply>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into()),
            requests: std::sync::Mutex::default(),
        }
    }

    /// URLs requested so far
    pub fn requests(&self) -> Vec<Url> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self) -> MockReply {
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().unwrap_or(MockReply::Refused)
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(url.clone());

        match self.next_reply() {
            MockReply::Respond { status, body } => Ok(HttpResponse {
                status,
                body: body.into_bytes(),
            }),
            MockReply::Delayed(delay, body) => {
                tokio::time::sleep(delay).await;
                Ok(HttpResponse {
                    status: 200,
                    body: body.into_bytes(),
                })
            }
            MockReply::Refused => Err(TransportError::Connect(
                url.clone(),
                "connection refused".to_string(),
            )),
            MockReply::Stall => std::future::pending().await,
        }
    }
}
