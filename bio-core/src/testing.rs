//! Helpers for exercising operations and the bus in tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::credentials::IdentityBroker;
use crate::error::{BiometryError, Result};
use crate::ipc::Sender;
use crate::operation::{Event, Observer, OperationKind};

/// Observer that keeps every event it receives
pub struct RecordingObserver<K: OperationKind> {
    events: Mutex<Vec<Event<K>>>,
    finished: Notify,
}

impl<K: OperationKind> RecordingObserver<K> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            finished: Notify::new(),
        })
    }

    pub fn events(&self) -> Vec<Event<K>> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(Event::name).collect()
    }

    pub fn terminal(&self) -> Option<Event<K>> {
        self.events.lock().iter().find(|e| e.is_terminal()).cloned()
    }

    /// Wait until a terminal event arrived, or fail after `timeout`
    pub async fn wait_for_terminal(&self, timeout: Duration) -> Result<Event<K>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(event) = self.terminal() {
                return Ok(event);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(BiometryError::Timeout(format!(
                    "{} did not finish, saw {:?}",
                    K::NAME,
                    self.names()
                )));
            }
        }
    }
}

impl<K: OperationKind> Observer<K> for RecordingObserver<K> {
    fn on_event(&self, event: Event<K>) {
        let terminal = event.is_terminal();
        self.events.lock().push(event);
        if terminal {
            self.finished.notify_waiters();
        }
    }
}

/// Identity broker answering with fixed values
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityBroker {
    pub uid: Option<u32>,
    pub label: Option<String>,
    pub fail_uid: bool,
    pub fail_label: bool,
}

impl StaticIdentityBroker {
    pub fn new(uid: u32, label: &str) -> Self {
        Self {
            uid: Some(uid),
            label: Some(label.to_string()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl IdentityBroker for StaticIdentityBroker {
    async fn unix_user_of(&self, _sender: &Sender) -> Result<Option<u32>> {
        if self.fail_uid {
            return Err(BiometryError::generic("uid query failed"));
        }
        Ok(self.uid)
    }

    async fn security_label_of(&self, _sender: &Sender) -> Result<Option<String>> {
        if self.fail_label {
            return Err(BiometryError::generic("label query failed"));
        }
        Ok(self.label.clone())
    }
}
