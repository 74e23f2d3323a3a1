//! A single fuzz attempt
//!
//! A [`FuzzProcess`] owns one combination: it injects it into the base
//! request, runs the pre-processors, sends the request, classifies the
//! response, runs the post-processors and notifies its listeners. Listeners
//! and the completion channel fire exactly once, from whichever of
//! [`FuzzProcess::run`] completing or [`FuzzProcess::stop`] comes first.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use super::injector::inject;
use super::location::Combination;
use super::processors::{apply_post_processors, apply_pre_processors, MessagePreProcessor, ResultPostProcessor};
use crate::http::{HttpMessage, HttpSender};

/// Outcome classification of a fuzz attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FuzzResultState {
    Successful,
    /// An injected payload appears in the response body
    Reflected,
    /// The request could not be built or sent
    Error,
    /// Token fetch made on behalf of a fuzzed request
    AntiCsrfTokenRequest,
    Custom(String),
}

impl FuzzResultState {
    pub fn label(&self) -> &str {
        match self {
            FuzzResultState::Successful => "Successful",
            FuzzResultState::Reflected => "Reflected",
            FuzzResultState::Error => "Error",
            FuzzResultState::AntiCsrfTokenRequest => "Anti-CSRF Token Request",
            FuzzResultState::Custom(label) => label,
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            FuzzResultState::Successful => "ok",
            FuzzResultState::Reflected => "reflected",
            FuzzResultState::Error => "error",
            FuzzResultState::AntiCsrfTokenRequest => "token",
            FuzzResultState::Custom(_) => "custom",
        }
    }
}

/// Completed fuzz attempt
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzResult {
    /// Id of the process that produced it
    pub id: usize,
    pub state: FuzzResultState,
    /// The mutated request and its response
    pub message: HttpMessage,
    /// Anti-CSRF token fetches made for this attempt
    pub token_request_messages: Vec<HttpMessage>,
    /// Injected payload values in location order
    pub payloads: Vec<String>,
    /// Error message if the request failed
    pub error: Option<String>,
}

impl FuzzResult {
    pub fn new(id: usize, state: FuzzResultState, message: HttpMessage, payloads: Vec<String>) -> Self {
        Self {
            id,
            state,
            message,
            token_request_messages: Vec::new(),
            payloads,
            error: None,
        }
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Lifecycle of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Running,
    Completed,
    Stopped,
}

/// Receives process lifecycle notifications
pub trait FuzzerListener: Send + Sync {
    fn on_started(&self, _process_id: usize) {}

    fn on_paused(&self, _process_id: usize) {}

    /// Called once per process; `result` is None when stopped before completion
    fn on_complete(&self, process_id: usize, result: Option<&FuzzResult>);
}

/// One fuzz attempt
pub struct FuzzProcess {
    id: usize,
    base: Arc<HttpMessage>,
    sender: Arc<dyn HttpSender>,
    pre_processors: Vec<Arc<dyn MessagePreProcessor>>,
    post_processors: Vec<Arc<dyn ResultPostProcessor>>,
    combination: Mutex<Option<Combination>>,
    state: RwLock<ProcessState>,
    paused: AtomicBool,
    result: RwLock<Option<FuzzResult>>,
    listeners: RwLock<Vec<Arc<dyn FuzzerListener>>>,
    notified: AtomicBool,
    completion_tx: Mutex<Option<oneshot::Sender<Option<FuzzResult>>>>,
    completion_rx: Mutex<Option<oneshot::Receiver<Option<FuzzResult>>>>,
}

impl FuzzProcess {
    pub(crate) fn new(
        id: usize,
        base: Arc<HttpMessage>,
        sender: Arc<dyn HttpSender>,
        pre_processors: Vec<Arc<dyn MessagePreProcessor>>,
        post_processors: Vec<Arc<dyn ResultPostProcessor>>,
    ) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            id,
            base,
            sender,
            pre_processors,
            post_processors,
            combination: Mutex::new(None),
            state: RwLock::new(ProcessState::Created),
            paused: AtomicBool::new(false),
            result: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
            notified: AtomicBool::new(false),
            completion_tx: Mutex::new(Some(tx)),
            completion_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ProcessState {
        *self.state.read()
    }

    pub fn result(&self) -> Option<FuzzResult> {
        self.result.read().clone()
    }

    /// Assign the combination; only valid before `run`
    pub fn set_payload(&self, combination: Combination) {
        if self.state() != ProcessState::Created {
            tracing::warn!(process = self.id, "Ignoring payload set after process start");
            return;
        }
        *self.combination.lock() = Some(combination);
    }

    pub fn add_fuzzer_listener(&self, listener: Arc<dyn FuzzerListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_fuzzer_listener(&self, listener: &Arc<dyn FuzzerListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Receiver for the single completion notification; available once
    pub fn completion(&self) -> Option<oneshot::Receiver<Option<FuzzResult>>> {
        self.completion_rx.lock().take()
    }

    /// Advisory; checked by the dispatcher between processes
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        for listener in self.listeners() {
            listener.on_paused(self.id);
        }
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Notify listeners with whatever result is stored. Does not interrupt
    /// an in-flight request.
    pub fn stop(&self) {
        {
            let mut state = self.state.write();
            if *state != ProcessState::Completed {
                *state = ProcessState::Stopped;
            }
        }
        self.notify_complete();
    }

    /// Execute the attempt. Never fails: errors end up in the result state.
    pub async fn run(&self) {
        {
            let mut state = self.state.write();
            let current = *state;
            if current != ProcessState::Created {
                tracing::warn!(process = self.id, state = ?current, "Process already started or stopped");
                return;
            }
            *state = ProcessState::Running;
        }

        for listener in self.listeners() {
            listener.on_started(self.id);
        }

        let combination = self.combination.lock().clone().unwrap_or_default();
        let payloads: Vec<String> = combination.values().map(|p| p.data().to_string()).collect();

        let result = match inject(&self.base, &combination) {
            Ok(mutated) => self.send_and_classify(mutated, payloads).await,
            Err(e) => {
                tracing::warn!(process = self.id, error = %e, "Failed to inject payloads");
                FuzzResult::new(self.id, FuzzResultState::Error, self.base.clone_request(), payloads)
                    .with_error(e.to_string())
            }
        };

        let result = apply_post_processors(&self.post_processors, result).await;
        tracing::debug!(process = self.id, state = result.state.label(), "Fuzz process finished");

        *self.result.write() = Some(result);
        {
            let mut state = self.state.write();
            if *state == ProcessState::Running {
                *state = ProcessState::Completed;
            }
        }
        self.notify_complete();
    }

    async fn send_and_classify(&self, mutated: HttpMessage, payloads: Vec<String>) -> FuzzResult {
        let mut message = apply_pre_processors(&self.pre_processors, mutated).await;
        let length = message.request_body.len();
        message.set_content_length(length);

        match self.sender.send_and_receive(&mut message).await {
            Ok(()) => {
                let state = if is_reflected(&message, &payloads) {
                    FuzzResultState::Reflected
                } else {
                    FuzzResultState::Successful
                };
                FuzzResult::new(self.id, state, message, payloads)
            }
            Err(e) => {
                tracing::debug!(process = self.id, error = %e, "Fuzzed request failed");
                FuzzResult::new(self.id, FuzzResultState::Error, message, payloads)
                    .with_error(e.to_string())
            }
        }
    }

    fn listeners(&self) -> Vec<Arc<dyn FuzzerListener>> {
        self.listeners.read().clone()
    }

    fn notify_complete(&self) {
        if self.notified.swap(true, Ordering::SeqCst) {
            return;
        }

        let result = self.result();
        for listener in self.listeners() {
            listener.on_complete(self.id, result.as_ref());
        }
        if let Some(tx) = self.completion_tx.lock().take() {
            let _ = tx.send(result);
        }
    }
}

/// A non-empty payload found anywhere in the response body
fn is_reflected(message: &HttpMessage, payloads: &[String]) -> bool {
    payloads
        .iter()
        .any(|p| !p.is_empty() && message.response_body.contains(p.as_str()))
}
