//! Client for the etcd v3 JSON gateway
//!
//! Speaks the gRPC-gateway JSON mapping of the v3 API over HTTP(S):
//! 64-bit integers arrive as strings, keys and values are base64.
//! Unary calls go to the first endpoint that answers; status queries
//! target the requested endpoint directly.

use super::{
    prefix_range_end, Alarm, ClusterClient, ClusterConfig, ClusterConnector, ClusterError,
    ClusterResult, EndpointStatus, Member, TlsConfig, WatchEvent, WatchEventKind, WatchResponse,
    WatchStream,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Certificate, Client, Identity};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Timeout for unary gateway calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered watch responses before backpressure applies
const WATCH_BUFFER: usize = 256;

/// Largest unterminated watch message held while waiting for a newline
const MAX_WATCH_LINE: usize = 4 * 1024 * 1024;

/// HTTP client for the v3 JSON gateway
pub struct GatewayClient {
    http: Client,
    endpoints: Vec<String>,
    dial_timeout: Duration,
    closed: AtomicBool,
}

impl GatewayClient {
    /// Build a client without contacting the cluster
    pub async fn new(config: &ClusterConfig) -> ClusterResult<Self> {
        if config.endpoints.is_empty() {
            return Err(ClusterError::NoEndpoints);
        }

        let secure = config.tls.is_some();
        let endpoints = config
            .endpoints
            .iter()
            .map(|e| normalize_endpoint(e, secure))
            .collect::<ClusterResult<Vec<_>>>()?;

        let mut builder = Client::builder()
            .use_rustls_tls()
            .connect_timeout(config.dial_timeout);

        if let Some(tls) = &config.tls {
            builder = apply_tls(builder, tls).await?;
        }

        let http = builder
            .build()
            .map_err(|e| ClusterError::Tls(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoints,
            dial_timeout: config.dial_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Build a client and verify at least one endpoint answers a status query
    pub async fn connect(config: &ClusterConfig) -> ClusterResult<Self> {
        let client = Self::new(config).await?;

        let mut last_error = None;
        for endpoint in &client.endpoints {
            match client.status(endpoint).await {
                Ok(status) => {
                    info!(
                        endpoint = %endpoint,
                        version = %status.version,
                        "Connected to cluster"
                    );
                    return Ok(client);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Endpoint unreachable");
                    last_error = Some(e);
                }
            }
        }

        Err(ClusterError::Unavailable(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    fn ensure_open(&self) -> ClusterResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(ClusterError::Closed)
        } else {
            Ok(())
        }
    }

    /// POST a JSON body to one endpoint and decode the JSON reply
    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        body: &B,
    ) -> ClusterResult<T> {
        self.ensure_open()?;
        let url = format!("{endpoint}{path}");

        let response = self
            .http
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(endpoint, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClusterError::Request {
                endpoint: endpoint.to_string(),
                message: format!("gateway error ({status}): {body}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ClusterError::InvalidResponse {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })
    }

    /// POST to the first configured endpoint that answers
    async fn cluster_post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ClusterResult<T> {
        let mut last_error = None;
        for endpoint in &self.endpoints {
            match self.post(endpoint, path, body).await {
                Ok(value) => return Ok(value),
                Err(ClusterError::Closed) => return Err(ClusterError::Closed),
                Err(e) => {
                    debug!(endpoint = %endpoint, path = %path, error = %e, "Gateway call failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if self.endpoints.len() == 1 => Err(e),
            Some(e) => Err(ClusterError::Unavailable(e.to_string())),
            None => Err(ClusterError::NoEndpoints),
        }
    }
}

#[async_trait]
impl ClusterClient for GatewayClient {
    async fn member_list(&self) -> ClusterResult<Vec<Member>> {
        let resp: MemberListWire = self
            .cluster_post("/v3/cluster/member/list", &json!({}))
            .await?;

        Ok(resp.members.into_iter().map(Member::from).collect())
    }

    async fn status(&self, endpoint: &str) -> ClusterResult<EndpointStatus> {
        let endpoint = normalize_endpoint(endpoint, endpoint.starts_with("https://"))?;
        let resp: StatusWire = self
            .post(&endpoint, "/v3/maintenance/status", &json!({}))
            .await?;

        Ok(resp.into())
    }

    async fn alarm_list(&self) -> ClusterResult<Vec<Alarm>> {
        let resp: AlarmWire = self
            .cluster_post("/v3/maintenance/alarm", &json!({ "action": "GET" }))
            .await?;

        Ok(resp
            .alarms
            .into_iter()
            .filter(|a| a.alarm != "NONE")
            .map(|a| Alarm {
                member_id: a.member_id,
                alarm: a.alarm,
            })
            .collect())
    }

    async fn alarm_disarm(&self, alarm: &Alarm) -> ClusterResult<()> {
        let body = json!({
            "action": "DEACTIVATE",
            "memberID": alarm.member_id.to_string(),
            "alarm": alarm.alarm,
        });
        let _: serde_json::Value = self.cluster_post("/v3/maintenance/alarm", &body).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> ClusterResult<Option<Vec<u8>>> {
        let resp: RangeWire = self
            .cluster_post("/v3/kv/range", &json!({ "key": BASE64.encode(key) }))
            .await?;

        match resp.kvs.into_iter().next() {
            Some(kv) => decode_b64(&kv.value).map(Some),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str) -> ClusterResult<()> {
        let body = json!({
            "key": BASE64.encode(key),
            "value": BASE64.encode(value),
        });
        let _: serde_json::Value = self.cluster_post("/v3/kv/put", &body).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> ClusterResult<u64> {
        let resp: DeleteRangeWire = self
            .cluster_post("/v3/kv/deleterange", &json!({ "key": BASE64.encode(key) }))
            .await?;
        Ok(resp.deleted)
    }

    async fn delete_prefix(&self, prefix: &str) -> ClusterResult<u64> {
        let body = json!({
            "key": BASE64.encode(prefix),
            "range_end": BASE64.encode(prefix_range_end(prefix.as_bytes())),
        });
        let resp: DeleteRangeWire = self.cluster_post("/v3/kv/deleterange", &body).await?;
        Ok(resp.deleted)
    }

    async fn watch_prefix(&self, prefix: &str) -> ClusterResult<WatchStream> {
        self.ensure_open()?;

        let body = json!({
            "create_request": {
                "key": BASE64.encode(prefix),
                "range_end": BASE64.encode(prefix_range_end(prefix.as_bytes())),
                "prev_kv": true,
            }
        });

        let mut last_error = None;
        for endpoint in &self.endpoints {
            // No request timeout: the watch stays open until cancelled
            let result = self
                .http
                .post(format!("{endpoint}/v3/watch"))
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    let (tx, rx) = mpsc::channel(WATCH_BUFFER);
                    tokio::spawn(pump_watch(endpoint.clone(), response, tx, MAX_WATCH_LINE));
                    return Ok(rx);
                }
                Ok(response) => {
                    last_error = Some(ClusterError::Request {
                        endpoint: endpoint.clone(),
                        message: format!("watch rejected ({})", response.status()),
                    });
                }
                Err(e) => last_error = Some(request_error(endpoint, e)),
            }
        }

        Err(last_error.unwrap_or(ClusterError::NoEndpoints))
    }

    async fn close(&self) -> ClusterResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Connector that produces [`GatewayClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayConnector;

#[async_trait]
impl ClusterConnector for GatewayConnector {
    async fn connect(&self, config: &ClusterConfig) -> ClusterResult<Arc<dyn ClusterClient>> {
        let client: Arc<dyn ClusterClient> = Arc::new(GatewayClient::connect(config).await?);
        Ok(client)
    }
}

/// Forward newline-delimited watch messages to the receiver. The stream
/// ends with an error if a message grows past `max_line` bytes unterminated.
async fn pump_watch(
    endpoint: String,
    mut response: reqwest::Response,
    tx: mpsc::Sender<ClusterResult<WatchResponse>>,
    max_line: usize,
) {
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => break,
            chunk = response.chunk() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => {
                pending.extend_from_slice(&bytes);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    let Some(message) = parse_watch_line(&endpoint, &line) else {
                        continue;
                    };
                    if tx.send(message).await.is_err() {
                        return;
                    }
                }

                if pending.len() > max_line {
                    warn!(endpoint = %endpoint, buffered = pending.len(), "Watch message exceeds size limit");
                    let _ = tx
                        .send(Err(ClusterError::InvalidResponse {
                            endpoint: endpoint.clone(),
                            message: format!("watch message exceeds {max_line} bytes"),
                        }))
                        .await;
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(request_error(&endpoint, e))).await;
                break;
            }
        }
    }

    if let Some(message) = parse_watch_line(&endpoint, &pending) {
        let _ = tx.send(message).await;
    }
    debug!(endpoint = %endpoint, "Watch stream closed");
}

/// Decode one watch message. Blank lines yield `None`.
fn parse_watch_line(endpoint: &str, line: &[u8]) -> Option<ClusterResult<WatchResponse>> {
    let trimmed = std::str::from_utf8(line).ok()?.trim();
    if trimmed.is_empty() {
        return None;
    }

    let envelope: WatchEnvelope = match serde_json::from_str(trimmed) {
        Ok(envelope) => envelope,
        Err(e) => {
            return Some(Err(ClusterError::InvalidResponse {
                endpoint: endpoint.to_string(),
                message: format!("malformed watch message: {e}"),
            }))
        }
    };

    if let Some(error) = envelope.error {
        return Some(Err(ClusterError::Request {
            endpoint: endpoint.to_string(),
            message: format!("watch error: {error}"),
        }));
    }

    let result = envelope.result.unwrap_or_default();
    let mut events = Vec::with_capacity(result.events.len());
    for event in result.events {
        let key = match decode_b64(&event.kv.key) {
            Ok(key) => String::from_utf8_lossy(&key).into_owned(),
            Err(e) => return Some(Err(e)),
        };
        let kind = if event.kind.as_deref() == Some("DELETE") {
            WatchEventKind::Delete
        } else {
            WatchEventKind::Put
        };
        events.push(WatchEvent {
            kind,
            key,
            version: event.kv.version,
            mod_revision: event.kv.mod_revision,
        });
    }

    Some(Ok(WatchResponse {
        revision: result.header.map(|h| h.revision).unwrap_or_default(),
        events,
    }))
}

/// Add a scheme when missing and strip trailing slashes
fn normalize_endpoint(endpoint: &str, secure: bool) -> ClusterResult<String> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else if secure {
        format!("https://{trimmed}")
    } else {
        format!("http://{trimmed}")
    };

    let url = url::Url::parse(&with_scheme).map_err(|e| ClusterError::Request {
        endpoint: endpoint.to_string(),
        message: format!("invalid endpoint URL: {e}"),
    })?;
    if url.host_str().is_none() {
        return Err(ClusterError::Request {
            endpoint: endpoint.to_string(),
            message: "no host in endpoint URL".to_string(),
        });
    }

    Ok(with_scheme)
}

async fn apply_tls(
    mut builder: reqwest::ClientBuilder,
    tls: &TlsConfig,
) -> ClusterResult<reqwest::ClientBuilder> {
    if let Some(ca_file) = &tls.ca_file {
        let pem = tokio::fs::read(ca_file)
            .await
            .map_err(|e| ClusterError::Tls(format!("failed to read CA from {ca_file:?}: {e}")))?;
        let ca = Certificate::from_pem(&pem)
            .map_err(|e| ClusterError::Tls(format!("invalid CA certificate: {e}")))?;
        builder = builder.add_root_certificate(ca);
    }

    if let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) {
        let mut pem = tokio::fs::read(cert_file).await.map_err(|e| {
            ClusterError::Tls(format!("failed to read certificate from {cert_file:?}: {e}"))
        })?;
        let key = tokio::fs::read(key_file)
            .await
            .map_err(|e| ClusterError::Tls(format!("failed to read key from {key_file:?}: {e}")))?;
        pem.push(b'\n');
        pem.extend_from_slice(&key);
        let identity = Identity::from_pem(&pem)
            .map_err(|e| ClusterError::Tls(format!("invalid client identity: {e}")))?;
        builder = builder.identity(identity);
    }

    if tls.insecure_skip_verify {
        warn!("TLS verification disabled for cluster connection");
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder)
}

fn request_error(endpoint: &str, e: reqwest::Error) -> ClusterError {
    ClusterError::Request {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    }
}

fn decode_b64(value: &str) -> ClusterResult<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| ClusterError::InvalidResponse {
            endpoint: String::new(),
            message: format!("invalid base64: {e}"),
        })
}

/// Accept 64-bit integers encoded either as JSON numbers or strings
fn de_num<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Str(String),
        Num(T),
    }

    match Raw::<T>::deserialize(deserializer)? {
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        Raw::Num(n) => Ok(n),
    }
}

// Wire types for the gateway JSON mapping

#[derive(Debug, Deserialize)]
struct MemberListWire {
    #[serde(default)]
    members: Vec<MemberWire>,
}

#[derive(Debug, Deserialize)]
struct MemberWire {
    #[serde(rename = "ID", default, deserialize_with = "de_num")]
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(rename = "peerURLs", default)]
    peer_urls: Vec<String>,
    #[serde(rename = "clientURLs", default)]
    client_urls: Vec<String>,
    #[serde(rename = "isLearner", default)]
    is_learner: bool,
}

impl From<MemberWire> for Member {
    fn from(w: MemberWire) -> Self {
        Member {
            id: w.id,
            name: w.name,
            peer_urls: w.peer_urls,
            client_urls: w.client_urls,
            is_learner: w.is_learner,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct HeaderWire {
    #[serde(alias = "memberId", default, deserialize_with = "de_num")]
    member_id: u64,
    #[serde(default, deserialize_with = "de_num")]
    revision: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusWire {
    #[serde(default)]
    header: Option<HeaderWire>,
    #[serde(default)]
    version: String,
    #[serde(default, deserialize_with = "de_num")]
    db_size: i64,
    #[serde(default, deserialize_with = "de_num")]
    db_size_in_use: i64,
    #[serde(default, deserialize_with = "de_num")]
    leader: u64,
    #[serde(default, deserialize_with = "de_num")]
    raft_index: u64,
    #[serde(default, deserialize_with = "de_num")]
    raft_term: u64,
    #[serde(default, deserialize_with = "de_num")]
    raft_applied_index: u64,
    #[serde(default)]
    is_learner: bool,
}

impl From<StatusWire> for EndpointStatus {
    fn from(w: StatusWire) -> Self {
        EndpointStatus {
            member_id: w.header.map(|h| h.member_id).unwrap_or_default(),
            version: w.version,
            db_size: w.db_size,
            db_size_in_use: w.db_size_in_use,
            leader: w.leader,
            raft_index: w.raft_index,
            raft_term: w.raft_term,
            raft_applied_index: w.raft_applied_index,
            is_learner: w.is_learner,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlarmWire {
    #[serde(default)]
    alarms: Vec<AlarmMemberWire>,
}

#[derive(Debug, Deserialize)]
struct AlarmMemberWire {
    #[serde(rename = "memberID", default, deserialize_with = "de_num")]
    member_id: u64,
    #[serde(default = "no_alarm")]
    alarm: String,
}

fn no_alarm() -> String {
    "NONE".to_string()
}

#[derive(Debug, Deserialize)]
struct RangeWire {
    #[serde(default)]
    kvs: Vec<KeyValueWire>,
}

#[derive(Debug, Default, Deserialize)]
struct KeyValueWire {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default, deserialize_with = "de_num")]
    version: i64,
    #[serde(alias = "modRevision", default, deserialize_with = "de_num")]
    mod_revision: i64,
}

#[derive(Debug, Deserialize)]
struct DeleteRangeWire {
    #[serde(default, deserialize_with = "de_num")]
    deleted: u64,
}

#[derive(Debug, Deserialize)]
struct WatchEnvelope {
    #[serde(default)]
    result: Option<WatchResultWire>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct WatchResultWire {
    #[serde(default)]
    header: Option<HeaderWire>,
    #[serde(default)]
    events: Vec<WatchEventWire>,
}

#[derive(Debug, Deserialize)]
struct WatchEventWire {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    kv: KeyValueWire,
}
