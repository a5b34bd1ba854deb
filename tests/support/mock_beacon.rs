use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    sync::{Arc, RwLock},
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const SLOTS_PER_EPOCH: u64 = 32;
pub const EPOCHS_PER_SYNC_COMMITTEE_PERIOD: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Genesis,
    Validators,
    AttesterDuties,
    ProposerDuties,
    SyncDuties,
}

#[derive(Clone)]
struct MockValidator {
    index: u64,
    status: String,
}

struct MockBeaconInner {
    genesis_time: u64,
    validators: Vec<MockValidator>,
    attester_offsets: HashMap<u64, u64>,
    proposals: Vec<(u64, u64)>,
    sync_members: HashMap<u64, HashSet<u64>>,
    failing: HashMap<Endpoint, u16>,
    failing_index: Option<(u64, Option<u64>)>,
    requests: HashMap<Endpoint, u64>,
    attester_batches: Vec<usize>,
}

/// In-memory beacon node state. Attester duties are generated for any epoch from a
/// per-validator offset inside the epoch; proposals and sync membership are explicit.
#[derive(Clone)]
pub struct MockBeacon {
    inner: Arc<RwLock<MockBeaconInner>>,
}

impl MockBeacon {
    pub fn new(genesis_time: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MockBeaconInner {
                genesis_time,
                validators: Vec::new(),
                attester_offsets: HashMap::new(),
                proposals: Vec::new(),
                sync_members: HashMap::new(),
                failing: HashMap::new(),
                failing_index: None,
                requests: HashMap::new(),
                attester_batches: Vec::new(),
            })),
        }
    }

    /// Registers `indices` as `active_ongoing` validators.
    pub fn with_active(self, indices: impl IntoIterator<Item = u64>) -> Self {
        for index in indices {
            self.add_validator(index, "active_ongoing");
        }
        self
    }

    pub fn add_validator(&self, index: u64, status: &str) {
        let mut inner = self.inner.write().expect("mock beacon poisoned");
        inner.validators.push(MockValidator {
            index,
            status: status.to_string(),
        });
    }

    /// Slot offset inside every epoch at which `index` attests. Defaults to
    /// `index % SLOTS_PER_EPOCH`.
    pub fn set_attester_offset(&self, index: u64, offset: u64) {
        let mut inner = self.inner.write().expect("mock beacon poisoned");
        inner
            .attester_offsets
            .insert(index, offset % SLOTS_PER_EPOCH);
    }

    pub fn add_proposal(&self, index: u64, slot: u64) {
        let mut inner = self.inner.write().expect("mock beacon poisoned");
        inner.proposals.push((index, slot));
    }

    pub fn add_sync_member(&self, period: u64, index: u64) {
        let mut inner = self.inner.write().expect("mock beacon poisoned");
        inner.sync_members.entry(period).or_default().insert(index);
    }

    /// Every request to `endpoint` answers with `status` from now on.
    pub fn fail_endpoint(&self, endpoint: Endpoint, status: u16) {
        let mut inner = self.inner.write().expect("mock beacon poisoned");
        inner.failing.insert(endpoint, status);
    }

    /// Duty requests whose body lists `index` answer with 400.
    pub fn fail_requests_containing(&self, index: u64) {
        let mut inner = self.inner.write().expect("mock beacon poisoned");
        inner.failing_index = Some((index, None));
    }

    /// Duty requests for `epoch` whose body lists `index` answer with 400.
    pub fn fail_epoch_requests_containing(&self, epoch: u64, index: u64) {
        let mut inner = self.inner.write().expect("mock beacon poisoned");
        inner.failing_index = Some((index, Some(epoch)));
    }

    pub fn request_count(&self, endpoint: Endpoint) -> u64 {
        let inner = self.inner.read().expect("mock beacon poisoned");
        inner.requests.get(&endpoint).copied().unwrap_or(0)
    }

    /// Number of indices in each attester duty request, in arrival order.
    pub fn attester_batches(&self) -> Vec<usize> {
        let inner = self.inner.read().expect("mock beacon poisoned");
        inner.attester_batches.clone()
    }

    fn record(&self, endpoint: Endpoint) -> Option<u16> {
        let mut inner = self.inner.write().expect("mock beacon poisoned");
        *inner.requests.entry(endpoint).or_default() += 1;
        inner.failing.get(&endpoint).copied()
    }

    fn genesis(&self) -> Value {
        let inner = self.inner.read().expect("mock beacon poisoned");
        json!({
            "data": {
                "genesis_time": inner.genesis_time.to_string(),
                "genesis_validators_root": format!("0x{}", "00".repeat(32)),
                "genesis_fork_version": "0x00000000"
            }
        })
    }

    fn validators(&self, ids: &[String]) -> Value {
        let inner = self.inner.read().expect("mock beacon poisoned");
        let data: Vec<Value> = inner
            .validators
            .iter()
            .filter(|validator| {
                let pubkey = pubkey_hex(validator.index);
                ids.iter()
                    .any(|id| *id == validator.index.to_string() || *id == pubkey)
            })
            .map(|validator| {
                json!({
                    "index": validator.index.to_string(),
                    "balance": "32000000000",
                    "status": validator.status,
                    "validator": {
                        "pubkey": pubkey_hex(validator.index),
                        "effective_balance": "32000000000",
                        "slashed": false
                    }
                })
            })
            .collect();
        json!({ "execution_optimistic": false, "finalized": false, "data": data })
    }

    fn attester_duties(&self, epoch: u64, indices: &[u64]) -> Value {
        let mut inner = self.inner.write().expect("mock beacon poisoned");
        inner.attester_batches.push(indices.len());
        let data: Vec<Value> = indices
            .iter()
            .filter(|index| inner.validators.iter().any(|v| v.index == **index))
            .map(|index| {
                let offset = inner
                    .attester_offsets
                    .get(index)
                    .copied()
                    .unwrap_or(index % SLOTS_PER_EPOCH);
                json!({
                    "pubkey": pubkey_hex(*index),
                    "validator_index": index.to_string(),
                    "committee_index": "0",
                    "committee_length": "128",
                    "committees_at_slot": "1",
                    "validator_committee_index": "0",
                    "slot": (epoch * SLOTS_PER_EPOCH + offset).to_string()
                })
            })
            .collect();
        duties_envelope(data)
    }

    fn proposer_duties(&self, epoch: u64) -> Value {
        let inner = self.inner.read().expect("mock beacon poisoned");
        let data: Vec<Value> = inner
            .proposals
            .iter()
            .filter(|(_, slot)| slot / SLOTS_PER_EPOCH == epoch)
            .map(|(index, slot)| {
                json!({
                    "pubkey": pubkey_hex(*index),
                    "validator_index": index.to_string(),
                    "slot": slot.to_string()
                })
            })
            .collect();
        duties_envelope(data)
    }

    fn sync_duties(&self, epoch: u64, indices: &[u64]) -> Value {
        let inner = self.inner.read().expect("mock beacon poisoned");
        let period = epoch / EPOCHS_PER_SYNC_COMMITTEE_PERIOD;
        let members = inner.sync_members.get(&period);
        let data: Vec<Value> = indices
            .iter()
            .filter(|index| members.is_some_and(|members| members.contains(*index)))
            .map(|index| {
                json!({
                    "pubkey": pubkey_hex(*index),
                    "validator_index": index.to_string(),
                    "validator_sync_committee_indices": ["0"]
                })
            })
            .collect();
        json!({ "execution_optimistic": false, "data": data })
    }

    fn index_fails(&self, epoch: u64, indices: &[u64]) -> bool {
        let inner = self.inner.read().expect("mock beacon poisoned");
        inner.failing_index.is_some_and(|(failing, only_epoch)| {
            indices.contains(&failing) && only_epoch.map_or(true, |only| only == epoch)
        })
    }
}

/// Deterministic 48 byte public key for a validator index.
pub fn pubkey_hex(index: u64) -> String {
    let mut bytes = [0xa0u8; 48];
    bytes[..8].copy_from_slice(&index.to_be_bytes());
    format!("0x{}", hex::encode(bytes))
}

fn duties_envelope(data: Vec<Value>) -> Value {
    json!({
        "dependent_root": format!("0x{}", "11".repeat(32)),
        "execution_optimistic": false,
        "data": data
    })
}

pub struct MockBeaconServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockBeaconServer {
    pub async fn start(beacon: MockBeacon) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock beacon listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let beacon = beacon.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(beacon.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock beacon server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(
    beacon: MockBeacon,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().trim_start_matches('/').to_string();

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return Ok(text_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read body: {err}"),
            ))
        }
    };
    let payload: Value = if bytes.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => {
                return Ok(text_response(
                    StatusCode::BAD_REQUEST,
                    format!("invalid JSON payload: {err}"),
                ))
            }
        }
    };

    let segments: Vec<&str> = path.split('/').collect();
    let route = match (method, segments.as_slice()) {
        (Method::GET, ["eth", "v1", "beacon", "genesis"]) => Some((Endpoint::Genesis, None)),
        (Method::POST, ["eth", "v1", "beacon", "states", "head", "validators"]) => {
            Some((Endpoint::Validators, None))
        }
        (Method::POST, ["eth", "v1", "validator", "duties", "attester", epoch]) => {
            epoch.parse().ok().map(|e| (Endpoint::AttesterDuties, Some(e)))
        }
        (Method::GET, ["eth", "v1", "validator", "duties", "proposer", epoch]) => {
            epoch.parse().ok().map(|e| (Endpoint::ProposerDuties, Some(e)))
        }
        (Method::POST, ["eth", "v1", "validator", "duties", "sync", epoch]) => {
            epoch.parse().ok().map(|e| (Endpoint::SyncDuties, Some(e)))
        }
        _ => None,
    };

    let Some((endpoint, epoch)) = route else {
        return Ok(text_response(
            StatusCode::NOT_FOUND,
            format!("unknown route {path}"),
        ));
    };

    if let Some(status) = beacon.record(endpoint) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Ok(error_response(status, "injected failure"));
    }

    let epoch = epoch.unwrap_or_default();
    let value = match endpoint {
        Endpoint::Genesis => beacon.genesis(),
        Endpoint::Validators => {
            let ids: Vec<String> = payload
                .get("ids")
                .and_then(Value::as_array)
                .map(|ids| {
                    ids.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            beacon.validators(&ids)
        }
        Endpoint::AttesterDuties | Endpoint::SyncDuties => {
            let indices = quoted_indices(&payload);
            if beacon.index_fails(epoch, &indices) {
                return Ok(error_response(StatusCode::BAD_REQUEST, "invalid validator index"));
            }
            if endpoint == Endpoint::AttesterDuties {
                beacon.attester_duties(epoch, &indices)
            } else {
                beacon.sync_duties(epoch, &indices)
            }
        }
        Endpoint::ProposerDuties => beacon.proposer_duties(epoch),
    };

    let mut response = Response::new(Body::from(value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn quoted_indices(payload: &Value) -> Vec<u64> {
    payload
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|raw| raw.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let body = json!({ "code": status.as_u16(), "message": message });
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
}

fn text_response(status: StatusCode, message: String) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}
