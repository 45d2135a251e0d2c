use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::Router;
use serde_json::Value;
use tokio::{net::TcpListener, sync::Mutex};

use crate::{
    error::TransportError,
    transport::{ApiRequest, Method, Transport},
    upload::{UploadBatch, UploadFile},
};

type Scripted = Result<Value, TransportError>;

/// Transport double answering from per-route queues and recording every call.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<(Duration, Scripted)>>>,
    requests: Mutex<Vec<ApiRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

fn route_key(method: Method, path: &str) -> String {
    format!("{} {path}", method.as_str())
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) async fn script(&self, method: Method, path: &str, response: Scripted) {
        self.script_delayed(method, path, Duration::ZERO, response)
            .await;
    }

    /// Queues a response that is held back for `delay` before it is returned.
    pub(crate) async fn script_delayed(
        &self,
        method: Method,
        path: &str,
        delay: Duration,
        response: Scripted,
    ) {
        self.scripts
            .lock()
            .await
            .entry(route_key(method, path))
            .or_default()
            .push_back((delay, response));
    }

    /// Highest number of requests that were outstanding at the same time.
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) async fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().await.clone()
    }

    pub(crate) async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub(crate) async fn calls_to(&self, method: Method, path: &str) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value, TransportError> {
        let key = route_key(request.method, &request.path);
        self.requests.lock().await.push(request);
        let scripted = self
            .scripts
            .lock()
            .await
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        let Some((delay, response)) = scripted else {
            return Err(TransportError::Unreachable(format!("nothing scripted for {key}")));
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// Counts calls passing through to a real transport.
pub(crate) struct CountingTransport<T> {
    inner: T,
    calls: AtomicUsize,
}

impl<T: Transport> CountingTransport<T> {
    pub(crate) fn new(inner: T) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Transport> Transport for CountingTransport<T> {
    async fn send(&self, request: ApiRequest) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.send(request).await
    }
}

pub(crate) async fn spawn_backend(app: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/api")
}

pub(crate) fn photo(name: &str) -> UploadFile {
    UploadFile::new(name, format!("jpeg-bytes-of-{name}").into_bytes())
}

pub(crate) fn photos(count: usize) -> UploadBatch {
    (0..count).map(|i| photo(&format!("sample_{i}.jpg"))).collect()
}
