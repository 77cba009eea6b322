//! WebSocket-backed [`RelayClient`] (NIP-01 framing over `tokio-tungstenite`,
//! NIP-11 fetch over `reqwest`).
//!
//! `.onion` hosts are dialed through the configured SOCKS5 proxy; clearnet
//! hosts connect directly. The SSRF check in [`crate::url_safety`] runs
//! again here, immediately before dialing, in addition to whatever ran when
//! the URL was first discovered — a URL accepted at discovery time could
//! still resolve to a different, disallowed address by the time it is
//! dialed.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{client_async_tls, MaybeTlsStream, WebSocketStream};

use crate::types::{Event, Nip11Doc};
use crate::url_safety::validate_relay_url;

use super::{Filter, RelayClient, RelayClientError, RelayConnection, RelayMessage};

#[derive(Debug, Clone)]
pub struct WsRelayClientConfig {
    pub socks5_proxy: Option<String>,
    pub url_blocklist: Vec<String>,
    pub user_agent: String,
}

pub struct WsRelayClient {
    config: WsRelayClientConfig,
    http: reqwest::Client,
}

impl WsRelayClient {
    pub fn new(config: WsRelayClientConfig) -> Result<Self, RelayClientError> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(proxy) = &config.socks5_proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| RelayClientError::Connect(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| RelayClientError::Connect(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn is_onion(host: &str) -> bool {
        host.ends_with(".onion")
    }
}

#[async_trait]
impl RelayClient for WsRelayClient {
    async fn open(
        &self,
        relay_url: &str,
        timeout: Duration,
    ) -> Result<Box<dyn RelayConnection>, RelayClientError> {
        let url = validate_relay_url(relay_url, &self.config.url_blocklist)?;
        let host = url.host_str().ok_or_else(|| RelayClientError::Connect("missing host".into()))?;

        let stream = tokio::time::timeout(timeout, dial(host, &url, self.config.socks5_proxy.as_deref()))
            .await
            .map_err(|_| RelayClientError::Timeout)??;

        let (ws, _response) = tokio::time::timeout(timeout, client_async_tls(url.as_str(), stream))
            .await
            .map_err(|_| RelayClientError::Timeout)?
            .map_err(|e| RelayClientError::Connect(e.to_string()))?;

        Ok(Box::new(WsRelayConnection { ws }))
    }

    async fn fetch_nip11(
        &self,
        relay_url: &str,
        timeout: Duration,
    ) -> Result<Option<Nip11Doc>, RelayClientError> {
        let url = validate_relay_url(relay_url, &self.config.url_blocklist)?;
        let http_url = to_http_url(&url);

        let response = tokio::time::timeout(
            timeout,
            self.http
                .get(http_url)
                .header("Accept", "application/nostr+json")
                .send(),
        )
        .await
        .map_err(|_| RelayClientError::Timeout)?;

        let response = match response {
            Ok(r) => r,
            Err(_) => return Ok(None),
        };

        if !response.status().is_success() {
            return Ok(None);
        }

        match response.json::<Nip11Doc>().await {
            Ok(doc) => Ok(Some(doc)),
            Err(_) => Ok(None),
        }
    }
}

fn to_http_url(ws_url: &url::Url) -> String {
    let scheme = if ws_url.scheme() == "wss" { "https" } else { "http" };
    let mut http_url = ws_url.clone();
    let _ = http_url.set_scheme(scheme);
    http_url.to_string()
}

async fn dial(
    host: &str,
    url: &url::Url,
    socks5_proxy: Option<&str>,
) -> Result<MaybeTlsStream<TcpStream>, RelayClientError> {
    let port = url
        .port_or_known_default()
        .unwrap_or(if url.scheme() == "wss" { 443 } else { 80 });

    if WsRelayClient::is_onion(host) {
        let proxy = socks5_proxy.ok_or_else(|| {
            RelayClientError::Connect(".onion relay requires a configured SOCKS5 proxy".into())
        })?;
        let stream = tokio_socks::tcp::Socks5Stream::connect(proxy, (host, port))
            .await
            .map_err(|e| RelayClientError::Connect(e.to_string()))?;
        Ok(MaybeTlsStream::Plain(stream.into_inner()))
    } else {
        let resolved = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| RelayClientError::Connect(e.to_string()))?
            .next()
            .ok_or_else(|| RelayClientError::Connect("dns resolution returned no addresses".into()))?;
        // Re-check the resolved address: a DNS hostname accepted at
        // discovery time (non-IP-literal, so not checked then) could
        // resolve to a loopback/private address here.
        if crate::url_safety::validate_relay_url(&format!("ws://{}", resolved.ip()), &[]).is_err() {
            return Err(RelayClientError::Connect(format!(
                "{host} resolves to a disallowed address"
            )));
        }
        let stream = TcpStream::connect(resolved)
            .await
            .map_err(|e| RelayClientError::Connect(e.to_string()))?;
        Ok(MaybeTlsStream::Plain(stream))
    }
}

struct WsRelayConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RelayConnection for WsRelayConnection {
    async fn subscribe(&mut self, filter: Filter) -> Result<BoxStream<'_, RelayMessage>, RelayClientError> {
        let sub_id = uuid::Uuid::new_v4().to_string();
        let req = build_req_frame(&sub_id, &filter);
        self.ws
            .send(WsMessage::Text(req.into()))
            .await
            .map_err(|e| RelayClientError::Protocol(e.to_string()))?;

        let stream = futures::stream::unfold(&mut self.ws, move |ws| {
            let sub_id = sub_id.clone();
            async move {
                loop {
                    match ws.next().await {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Some(msg) = parse_relay_message(&text, &sub_id) {
                                return Some((msg, ws));
                            }
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(_)) | None => return None,
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn publish(&mut self, event: &Event) -> Result<RelayMessage, RelayClientError> {
        let payload = serde_json::json!(["EVENT", event_to_json(event)]).to_string();
        self.ws
            .send(WsMessage::Text(payload.into()))
            .await
            .map_err(|e| RelayClientError::Protocol(e.to_string()))?;

        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    if let Some(msg @ RelayMessage::Ok { .. }) = parse_relay_message(&text, "") {
                        return Ok(msg);
                    }
                }
                Ok(_) => continue,
                Err(e) => return Err(RelayClientError::Protocol(e.to_string())),
            }
        }
        Err(RelayClientError::Protocol("connection closed before OK".into()))
    }
}

fn build_req_frame(sub_id: &str, filter: &Filter) -> String {
    let mut obj = serde_json::Map::new();
    if let Some(since) = filter.since {
        obj.insert("since".into(), serde_json::json!(since));
    }
    if let Some(until) = filter.until {
        obj.insert("until".into(), serde_json::json!(until));
    }
    if let Some(limit) = filter.limit {
        obj.insert("limit".into(), serde_json::json!(limit));
    }
    if let Some(kinds) = &filter.kinds {
        obj.insert("kinds".into(), serde_json::json!(kinds));
    }
    if let Some(authors) = &filter.authors {
        obj.insert("authors".into(), serde_json::json!(authors));
    }
    if let Some(ids) = &filter.ids {
        obj.insert("ids".into(), serde_json::json!(ids));
    }
    serde_json::json!(["REQ", sub_id, obj]).to_string()
}

fn event_to_json(event: &Event) -> serde_json::Value {
    serde_json::json!({
        "id": event.id,
        "pubkey": event.pubkey,
        "created_at": event.created_at,
        "kind": event.kind,
        "tags": event.tags,
        "content": event.content,
        "sig": event.sig,
    })
}

fn parse_relay_message(text: &str, expected_sub_id: &str) -> Option<RelayMessage> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let array = value.as_array()?;
    let tag = array.first()?.as_str()?;
    match tag {
        "EVENT" => {
            let event_json = array.get(2)?;
            let event: Event = serde_json::from_value(event_json.clone()).ok()?;
            Some(RelayMessage::Event(event))
        }
        "EOSE" => Some(RelayMessage::EndOfStoredEvents),
        "NOTICE" => Some(RelayMessage::Notice(array.get(1)?.as_str()?.to_string())),
        "OK" => Some(RelayMessage::Ok {
            event_id: array.get(1)?.as_str()?.to_string(),
            accepted: array.get(2)?.as_bool()?,
            message: array.get(3).and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        }),
        "CLOSED" if array.get(1)?.as_str()? == expected_sub_id || expected_sub_id.is_empty() => {
            Some(RelayMessage::Closed(
                array.get(2).and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            ))
        }
        _ => None,
    }
}
