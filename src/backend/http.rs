//! REST adapter: procedures as `POST {base}/rpc/{name}`, the change feed as
//! a server-sent-events stream at `GET {base}/events/{scope}`.

use futures::StreamExt;
use futures::future::BoxFuture;

use crate::backend::transport::{TransportError, TransportResult};
use crate::backend::{EventStream, RawEvent, RealtimeTransport, RpcEnvelope, RpcTransport, ScopeKey};

/// Backend client over HTTP.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a client for the backend rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl RpcTransport for HttpBackend {
    fn call(
        &self,
        procedure: &str,
        params: serde_json::Value,
    ) -> BoxFuture<'static, TransportResult<RpcEnvelope>> {
        let client = self.client.clone();
        let url = format!("{}/rpc/{}", self.base_url, procedure);
        let procedure = procedure.to_string();
        Box::pin(async move {
            let response = client
                .post(&url)
                .json(&params)
                .send()
                .await
                .map_err(|err| {
                    TransportError::unreachable(format!("procedure `{procedure}` failed"), err)
                })?;

            if !response.status().is_success() {
                return Err(TransportError::MalformedResponse(format!(
                    "procedure `{procedure}` returned {}",
                    response.status()
                )));
            }

            response.json::<RpcEnvelope>().await.map_err(|err| {
                TransportError::MalformedResponse(format!(
                    "procedure `{procedure}` returned an undecodable body: {err}"
                ))
            })
        })
    }
}

impl RealtimeTransport for HttpBackend {
    fn open(&self, scope: &ScopeKey) -> BoxFuture<'static, TransportResult<EventStream>> {
        let client = self.client.clone();
        let url = format!("{}/events/{}", self.base_url, scope);
        let scope_label = scope.to_string();
        Box::pin(async move {
            let response = client
                .get(&url)
                .header("accept", "text/event-stream")
                .send()
                .await
                .map_err(|err| {
                    TransportError::unreachable(format!("subscribe to `{scope_label}` failed"), err)
                })?;

            if !response.status().is_success() {
                return Err(TransportError::ChannelClosed(format!(
                    "subscribe to `{scope_label}` returned {}",
                    response.status()
                )));
            }

            let mut body = response.bytes_stream();
            // Only `data:` lines carry payloads; the payloads are
            // self-tagged, so event-name lines and comments are skipped.
            let stream = async_stream::stream! {
                let mut buffer = String::new();
                while let Some(chunk) = body.next().await {
                    let Ok(chunk) = chunk else { break };
                    buffer.push_str(&String::from_utf8_lossy(&chunk));
                    while let Some(newline) = buffer.find('\n') {
                        let line = buffer[..newline].trim_end_matches('\r').to_string();
                        buffer.drain(..=newline);
                        if let Some(data) = line.strip_prefix("data:") {
                            yield RawEvent {
                                scope: scope_label.clone(),
                                payload: data.trim_start().to_string(),
                            };
                        }
                    }
                }
            };
            Ok(stream.boxed())
        })
    }
}
