//! Shared fakes for the core-auth integration tests.
//!
//! Time only moves when a test says so: [`Harness::advance`] steps the
//! [`ManualClock`] and the [`ManualScheduler`] together, one second at a time.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::background::{CancelHandle, ScheduledTask, TaskScheduler};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::{SettingsStore, SettingsTransaction};
use bridge_traits::Clock;
use chrono::{DateTime, TimeZone, Utc};
use core_auth::{AuthManager, ProviderConfig, StoredConfigProvider};
use core_runtime::events::{CoreEvent, Receiver};
use core_runtime::CoreConfig;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// HTTP
// ============================================================================

/// Answers requests from a queue and records every request.
///
/// An empty queue is a transport failure.
#[derive(Default)]
pub struct ScriptedHttp {
    replies: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
    hold: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedHttp {
    pub fn reply(&self, status: u16, body: impl Into<String>) {
        self.replies
            .lock()
            .push_back(HttpResponse::new(status, body.into()));
    }

    pub fn reply_tokens(&self, access: &str, refresh: Option<&str>, expires_in: u64, refresh_expires_in: u64) {
        self.reply(200, token_body(access, refresh, expires_in, refresh_expires_in));
    }

    pub fn reply_profile(&self, username: &str) {
        self.reply(200, profile_body(username));
    }

    /// Park the next request until the returned handle is notified.
    pub fn hold_next(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.hold.lock() = Some(gate.clone());
        gate
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn token_requests(&self) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.ends_with("/protocol/openid-connect/token"))
            .collect()
    }

    pub fn pending_replies(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.lock().push(request);

        let gate = self.hold.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| BridgeError::OperationFailed("connection refused".to_string()))
    }
}

pub fn token_body(access: &str, refresh: Option<&str>, expires_in: u64, refresh_expires_in: u64) -> String {
    let mut body = json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "refresh_expires_in": refresh_expires_in,
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    body.to_string()
}

pub fn profile_body(username: &str) -> String {
    json!({
        "sub": format!("sub-{}", username),
        "preferred_username": username,
        "email": format!("{}@example.com", username),
    })
    .to_string()
}

pub fn form_value(request: &HttpRequest, key: &str) -> Option<String> {
    request
        .form_params()
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

// ============================================================================
// Settings
// ============================================================================

/// In-memory settings with buffered transactions.
#[derive(Default)]
pub struct MemorySettings {
    data: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySettings {
    pub fn raw(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).cloned()
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.data.lock().insert(key.to_string(), value.to_string());
    }

    pub fn stored_accounts(&self) -> Vec<serde_json::Value> {
        self.raw("kc_accounts")
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.insert_raw(key, value);
        Ok(())
    }

    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.raw(key))
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.data.lock().remove(key);
        Ok(())
    }

    async fn begin_transaction(&self) -> BridgeResult<Box<dyn SettingsTransaction + Send>> {
        Ok(Box::new(MemoryTransaction {
            data: self.data.clone(),
            pending: Vec::new(),
        }))
    }
}

struct MemoryTransaction {
    data: Arc<Mutex<HashMap<String, String>>>,
    pending: Vec<(String, Option<String>)>,
}

#[async_trait]
impl SettingsTransaction for MemoryTransaction {
    async fn set_string(&mut self, key: &str, value: &str) -> BridgeResult<()> {
        self.pending.push((key.to_string(), Some(value.to_string())));
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> BridgeResult<()> {
        self.pending.push((key.to_string(), None));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> BridgeResult<()> {
        let MemoryTransaction { data, pending } = *self;
        let mut data = data.lock();
        for (key, value) in pending {
            match value {
                Some(value) => data.insert(key, value),
                None => data.remove(&key),
            };
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> BridgeResult<()> {
        Ok(())
    }
}

// ============================================================================
// Time
// ============================================================================

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn at(timestamp: i64) -> Self {
        let start = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .expect("valid timestamp");
        Self(Mutex::new(start))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock();
        *now += chrono::Duration::from_std(by).expect("small duration");
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

struct Entry {
    id: u64,
    interval: Duration,
    due: Duration,
    task: ScheduledTask,
}

#[derive(Default)]
struct Schedule {
    next_id: u64,
    elapsed: Duration,
    entries: Vec<Entry>,
}

/// Runs scheduled tasks only when advanced.
#[derive(Default)]
pub struct ManualScheduler {
    schedule: Arc<Mutex<Schedule>>,
}

impl ManualScheduler {
    /// Run every tick that falls due within `by`, in order.
    pub async fn advance(&self, by: Duration) {
        let target = self.schedule.lock().elapsed + by;

        loop {
            // Tasks run outside the lock: a tick may cancel a schedule.
            let task = {
                let mut guard = self.schedule.lock();
                let schedule = &mut *guard;
                let next = schedule
                    .entries
                    .iter_mut()
                    .filter(|entry| entry.due <= target)
                    .min_by_key(|entry| entry.due);

                match next {
                    Some(entry) => {
                        let due = entry.due;
                        entry.due += entry.interval;
                        let task = entry.task.clone();
                        schedule.elapsed = due;
                        task
                    }
                    None => break,
                }
            };
            task().await;
        }

        self.schedule.lock().elapsed = target;
    }

    pub fn active(&self) -> usize {
        self.schedule.lock().entries.len()
    }

    pub fn intervals(&self) -> Vec<Duration> {
        self.schedule
            .lock()
            .entries
            .iter()
            .map(|entry| entry.interval)
            .collect()
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule_repeating(&self, interval: Duration, task: ScheduledTask) -> CancelHandle {
        let mut schedule = self.schedule.lock();
        let id = schedule.next_id;
        schedule.next_id += 1;
        let due = schedule.elapsed + interval;
        schedule.entries.push(Entry {
            id,
            interval,
            due,
            task,
        });

        let shared = self.schedule.clone();
        CancelHandle::new(move || {
            shared.lock().entries.retain(|entry| entry.id != id);
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

pub const START: i64 = 1_700_000_000;

pub fn provider_config() -> ProviderConfig {
    ProviderConfig::new(
        "https://idp.example.com/",
        "demo",
        "kc-client",
        "openid profile email",
        "https://app.example.com/callback",
    )
}

pub struct Harness {
    pub http: Arc<ScriptedHttp>,
    pub settings: Arc<MemorySettings>,
    pub clock: Arc<ManualClock>,
    pub scheduler: Arc<ManualScheduler>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            http: Arc::new(ScriptedHttp::default()),
            settings: Arc::new(MemorySettings::default()),
            clock: Arc::new(ManualClock::at(START)),
            scheduler: Arc::new(ManualScheduler::default()),
        }
    }

    pub fn core_config(&self) -> CoreConfig {
        CoreConfig::builder()
            .http_client(self.http.clone())
            .settings_store(self.settings.clone())
            .scheduler(self.scheduler.clone())
            .clock(self.clock.clone())
            .http_timeout(Duration::from_secs(5))
            .build()
            .expect("complete core config")
    }

    /// A manager reading [`provider_config`] unless another one was saved.
    pub fn manager(&self) -> AuthManager {
        let manager = AuthManager::from_config(&self.core_config());
        let provider = StoredConfigProvider::new(manager.store().clone(), provider_config());
        manager.with_config_provider(Arc::new(provider))
    }

    /// Move the clock and the scheduler forward together.
    pub async fn advance(&self, seconds: u64) {
        for _ in 0..seconds {
            self.clock.advance(Duration::from_secs(1));
            self.scheduler.advance(Duration::from_secs(1)).await;
        }
    }

    /// Run a full login that yields an account for `username`.
    pub async fn login(
        &self,
        manager: &AuthManager,
        username: &str,
        expires_in: u64,
        refresh_expires_in: u64,
    ) -> usize {
        manager.begin_login().await.expect("login starts");
        self.http.reply_tokens(
            &format!("{}-access", username),
            Some(&format!("{}-refresh", username)),
            expires_in,
            refresh_expires_in,
        );
        self.http.reply_profile(username);

        manager
            .complete_login("auth-code")
            .await
            .expect("login completes")
            .index
    }
}

/// Everything received so far.
pub fn drain(rx: &mut Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
