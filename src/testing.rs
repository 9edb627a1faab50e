//! In-process fakes for the store transport, shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::connection::ConnectionManager;
use crate::error::StoreError;
use crate::executor::{ExecutorSettings, StoreExecutor};
use crate::transport::{RequestBody, StoreRequest, StoreResponse, Transport, TransportFactory};

type Handler = Box<dyn Fn(&StoreRequest) -> Result<StoreResponse, StoreError> + Send + Sync>;

/// A transport that answers from a handler and records every request.
pub(crate) struct FakeStore {
    handler: Handler,
    log: Mutex<Vec<(StoreRequest, Instant)>>,
    closes: AtomicUsize,
}

impl FakeStore {
    /// Answers requests with `responses` in order; a drained script answers 500.
    pub(crate) fn scripted(responses: Vec<Result<StoreResponse, StoreError>>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::routed(move |_| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(StoreResponse::new(500, "script exhausted")))
        })
    }

    pub(crate) fn routed(
        handler: impl Fn(&StoreRequest) -> Result<StoreResponse, StoreError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            log: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn requests(&self) -> Vec<StoreRequest> {
        self.log.lock().unwrap().iter().map(|(r, _)| r.clone()).collect()
    }

    pub(crate) fn request_times(&self) -> Vec<Instant> {
        self.log.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// JSON bodies of requests whose path equals `path`.
    pub(crate) fn json_bodies(&self, path: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .filter_map(|r| match r.body {
                RequestBody::Json(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn ndjson_bodies(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r.body {
                RequestBody::NdJson(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for FakeStore {
    async fn send(&self, request: &StoreRequest) -> Result<StoreResponse, StoreError> {
        self.log
            .lock()
            .unwrap()
            .push((request.clone(), Instant::now()));
        (self.handler)(request)
    }

    fn is_closed(&self) -> bool {
        false
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out the same [`FakeStore`] on every connect, counting connects.
pub(crate) struct FakeFactory {
    store: Arc<FakeStore>,
    connects: AtomicUsize,
}

impl FakeFactory {
    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl TransportFactory for FakeFactory {
    fn connect(&self) -> Result<Arc<dyn Transport>, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.clone())
    }
}

pub(crate) fn executor_with(store: FakeStore) -> (StoreExecutor, Arc<FakeStore>, Arc<FakeFactory>) {
    let store = Arc::new(store);
    let factory = Arc::new(FakeFactory {
        store: store.clone(),
        connects: AtomicUsize::new(0),
    });
    let connections = Arc::new(ConnectionManager::new(factory.clone()));
    let exec = StoreExecutor::new(connections, ExecutorSettings::default());
    (exec, store, factory)
}
