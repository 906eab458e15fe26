//! Execution dispatch with a per-(room, user) lease.
//!
//! ```text
//! execute ──► try_acquire ──(held)──► ExecutionResult::busy()
//!                 │
//!                 ▼
//!          presence: executing
//!                 │  simulated latency
//!                 ▼
//!     spawn_blocking(runner.run) ──(panic)──► Failure
//!                 │
//!                 ▼
//!          presence: idle ─► broadcast result ─► drop lease
//!                                                   │ cooldown
//!                                                   ▼
//!                                               released
//! ```
//!
//! `execute` always resolves with an [`ExecutionResult`]; the error
//! taxonomy lives in its `error` field. The body runs on its own task so
//! presence and lease cleanup happen even if the caller stops polling.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinError;

use crate::protocol::{Language, UserId};
use crate::room::RoomRegistry;
use crate::runner::{LanguageRunner, RunOutcome, Runner};

/// Why a run produced no regular output.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ExecutionError {
    /// A run for this (room, user) is in flight or cooling down.
    #[error("Execution already in progress. Please wait for it to finish.")]
    Busy,
    /// Heuristic structural check failed; the message is shown verbatim.
    #[error("{0}")]
    Structural(String),
    /// Unexpected fault inside a runner.
    #[error("Execution failed: {0}")]
    Failure(String),
    /// Rejected at the call boundary.
    #[error("{0}")]
    Validation(String),
}

/// Outcome of one `execute` call, also broadcast to the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub error: Option<ExecutionError>,
    /// Wall-clock milliseconds, rounded to hundredths.
    pub execution_time: f64,
}

impl ExecutionResult {
    pub fn busy() -> Self {
        Self::rejected(ExecutionError::Busy)
    }

    /// A result for a call that never started.
    pub fn rejected(error: ExecutionError) -> Self {
        Self {
            output: String::new(),
            error: Some(error),
            execution_time: 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.error, Some(ExecutionError::Busy))
    }
}

type LeaseKey = (String, UserId);

/// Held for the duration of a run; released `cooldown` after drop.
struct ExecutionLease {
    locks: Arc<Mutex<HashSet<LeaseKey>>>,
    key: Option<LeaseKey>,
    cooldown: Duration,
}

impl Drop for ExecutionLease {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let locks = self.locks.clone();
        let release = move || {
            locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        };

        match Handle::try_current() {
            Ok(handle) if !self.cooldown.is_zero() => {
                let cooldown = self.cooldown;
                handle.spawn(async move {
                    tokio::time::sleep(cooldown).await;
                    release();
                });
            }
            _ => release(),
        }
    }
}

/// Runs code through the language runners under a per-user lease.
///
/// Cheap to clone; clones share leases and registered runners.
#[derive(Clone)]
pub struct ExecutionDispatcher {
    registry: RoomRegistry,
    locks: Arc<Mutex<HashSet<LeaseKey>>>,
    runners: Arc<RwLock<HashMap<Language, Arc<dyn LanguageRunner>>>>,
    cooldown: Duration,
    latency: Duration,
}

impl ExecutionDispatcher {
    /// Dispatcher with the built-in runners registered.
    pub fn new(registry: RoomRegistry, cooldown: Duration, latency: Duration) -> Self {
        let mut runners: HashMap<Language, Arc<dyn LanguageRunner>> = HashMap::new();
        for language in [
            Language::JavaScript,
            Language::Python,
            Language::Java,
            Language::Cpp,
            Language::Ruby,
            Language::Go,
        ] {
            let runner = Runner::for_language(&language);
            runners.insert(language, Arc::new(runner));
        }

        Self {
            registry,
            locks: Arc::new(Mutex::new(HashSet::new())),
            runners: Arc::new(RwLock::new(runners)),
            cooldown,
            latency,
        }
    }

    /// Add or replace the runner for `language`.
    pub fn register_runner(&self, language: Language, runner: Arc<dyn LanguageRunner>) {
        log::debug!("Registered runner for {language}");
        self.runners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(language, runner);
    }

    /// Whether a lease is currently held for (room, user).
    pub fn is_busy(&self, room_id: &str, user_id: UserId) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(room_id.to_string(), user_id))
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Run `code` as `language` on behalf of `user_id` in `room_id`.
    ///
    /// Rejected with [`ExecutionError::Busy`] if this (room, user) already
    /// holds a lease. Other users and other rooms never contend.
    pub async fn execute(
        &self,
        code: &str,
        language: &Language,
        room_id: &str,
        user_id: UserId,
    ) -> ExecutionResult {
        let Some(lease) = self.try_acquire(room_id, user_id) else {
            log::warn!("Execution already in progress for {user_id} in room {room_id}");
            return ExecutionResult::busy();
        };

        let dispatcher = self.clone();
        let code = code.to_string();
        let language = language.clone();
        let room = room_id.to_string();
        let task = tokio::spawn(async move {
            dispatcher
                .run_leased(lease, &code, &language, &room, user_id)
                .await
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Execution task for {user_id} in room {room_id} failed: {e}");
                ExecutionResult::rejected(ExecutionError::Failure(e.to_string()))
            }
        }
    }

    fn try_acquire(&self, room_id: &str, user_id: UserId) -> Option<ExecutionLease> {
        let key = (room_id.to_string(), user_id);
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if !locks.insert(key.clone()) {
            return None;
        }
        Some(ExecutionLease {
            locks: self.locks.clone(),
            key: Some(key),
            cooldown: self.cooldown,
        })
    }

    fn runner_for(&self, language: &Language) -> Arc<dyn LanguageRunner> {
        let runners = self.runners.read().unwrap_or_else(PoisonError::into_inner);
        match runners.get(language) {
            Some(runner) => runner.clone(),
            None => Arc::new(Runner::for_language(language)),
        }
    }

    async fn run_leased(
        &self,
        lease: ExecutionLease,
        code: &str,
        language: &Language,
        room_id: &str,
        user_id: UserId,
    ) -> ExecutionResult {
        let presence = self.registry.presence();
        presence.begin_execution(room_id, user_id).await;
        let started = Instant::now();

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let runner = self.runner_for(language);
        let source = code.to_string();
        let outcome = tokio::task::spawn_blocking(move || runner.run(&source)).await;
        let execution_time = round_hundredths(started.elapsed().as_secs_f64() * 1000.0);

        let result = match outcome {
            Ok(RunOutcome { output, error }) => ExecutionResult {
                output,
                error: error.map(ExecutionError::Structural),
                execution_time,
            },
            Err(e) => {
                let message = panic_message(e);
                log::error!("Runner for {language} failed in room {room_id}: {message}");
                ExecutionResult {
                    output: String::new(),
                    error: Some(ExecutionError::Failure(message)),
                    execution_time,
                }
            }
        };

        presence.end_execution(room_id, user_id).await;
        self.registry
            .publish_execution_result(room_id, user_id, &result);
        drop(lease);
        result
    }
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown error".to_string()
    }
}

fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::protocol::{EventPayload, UserStatus};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn setup(cooldown_ms: u64) -> (RoomRegistry, ExecutionDispatcher) {
        let registry = RoomRegistry::new(EventBus::new(Duration::ZERO), Duration::from_millis(50));
        let dispatcher = ExecutionDispatcher::new(
            registry.clone(),
            Duration::from_millis(cooldown_ms),
            Duration::ZERO,
        );
        (registry, dispatcher)
    }

    struct PanickingRunner;

    impl LanguageRunner for PanickingRunner {
        fn detect_structural_error(&self, _source: &str) -> Option<String> {
            None
        }

        fn extract_output(&self, _source: &str) -> String {
            panic!("runner exploded");
        }
    }

    struct SlowRunner(Duration);

    impl LanguageRunner for SlowRunner {
        fn detect_structural_error(&self, _source: &str) -> Option<String> {
            None
        }

        fn extract_output(&self, source: &str) -> String {
            std::thread::sleep(self.0);
            source.to_uppercase()
        }
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ExecutionError::Failure("boom".into()).to_string(),
            "Execution failed: boom"
        );
        assert_eq!(
            ExecutionError::Structural("SyntaxError: x".into()).to_string(),
            "SyntaxError: x"
        );
    }

    #[test]
    fn test_round_hundredths() {
        assert_eq!(round_hundredths(1.23456), 1.23);
        assert_eq!(round_hundredths(0.005001), 0.01);
    }

    #[tokio::test]
    async fn test_execute_javascript() {
        let (registry, dispatcher) = setup(10);
        let alice = registry.join("r1", "Alice").await;

        let result = dispatcher
            .execute(r#"console.log("hi");"#, &Language::JavaScript, "r1", alice)
            .await;

        assert!(result.is_success());
        assert_eq!(result.output, "hi\n");
        assert!(result.execution_time >= 0.0);
    }

    #[tokio::test]
    async fn test_structural_error_result() {
        let (registry, dispatcher) = setup(10);
        let alice = registry.join("r1", "Alice").await;

        let result = dispatcher
            .execute("function f() {", &Language::JavaScript, "r1", alice)
            .await;

        assert_eq!(result.output, "");
        assert_eq!(
            result.error,
            Some(ExecutionError::Structural(
                "SyntaxError: missing closing curly brace".into()
            ))
        );
    }

    #[tokio::test]
    async fn test_back_to_back_is_busy_until_cooldown() {
        let (registry, dispatcher) = setup(80);
        let alice = registry.join("r1", "Alice").await;

        let first = dispatcher
            .execute("console.log(1);", &Language::JavaScript, "r1", alice)
            .await;
        let second = dispatcher
            .execute("console.log(2);", &Language::JavaScript, "r1", alice)
            .await;

        assert_eq!(first.output, "1\n");
        assert!(second.is_busy());
        assert_eq!(second.output, "");
        assert!(dispatcher.is_busy("r1", alice));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!dispatcher.is_busy("r1", alice));
        let third = dispatcher
            .execute("console.log(3);", &Language::JavaScript, "r1", alice)
            .await;
        assert_eq!(third.output, "3\n");
    }

    #[tokio::test]
    async fn test_lease_is_per_room_and_user() {
        let (registry, dispatcher) = setup(200);
        let alice = registry.join("r1", "Alice").await;
        let bob = registry.join("r1", "Bob").await;

        let js = Language::JavaScript;
        assert!(dispatcher.execute("1", &js, "r1", alice).await.is_success());
        assert!(dispatcher.execute("1", &js, "r1", bob).await.is_success());
        assert!(dispatcher.execute("1", &js, "r2", alice).await.is_success());
        assert!(dispatcher.execute("1", &js, "r1", alice).await.is_busy());
    }

    #[tokio::test]
    async fn test_busy_rejection_leaves_presence_alone() {
        let (registry, dispatcher) = setup(10);
        let alice = registry.join("r1", "Alice").await;
        dispatcher.register_runner(
            Language::Python,
            Arc::new(SlowRunner(Duration::from_millis(100))),
        );

        let running = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.execute("x", &Language::Python, "r1", alice).await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.user_status("r1", alice).await, Some(UserStatus::Executing));

        let rejected = dispatcher.execute("y", &Language::Python, "r1", alice).await;
        assert!(rejected.is_busy());
        assert_eq!(registry.user_status("r1", alice).await, Some(UserStatus::Executing));

        let first = running.await.unwrap();
        assert_eq!(first.output, "X");
        assert_eq!(registry.user_status("r1", alice).await, Some(UserStatus::Idle));
    }

    #[tokio::test]
    async fn test_panicking_runner_becomes_failure() {
        let (registry, dispatcher) = setup(0);
        let alice = registry.join("r1", "Alice").await;
        let custom = Language::from_tag("boom");
        dispatcher.register_runner(custom.clone(), Arc::new(PanickingRunner));

        let result = dispatcher.execute("x", &custom, "r1", alice).await;
        assert_eq!(
            result.error,
            Some(ExecutionError::Failure("runner exploded".into()))
        );
        assert_eq!(result.output, "");
        assert_eq!(registry.user_status("r1", alice).await, Some(UserStatus::Idle));
        assert!(!dispatcher.is_busy("r1", alice));
    }

    #[tokio::test]
    async fn test_unknown_language_falls_back() {
        let (registry, dispatcher) = setup(0);
        let alice = registry.join("r1", "Alice").await;

        let result = dispatcher
            .execute("anything", &Language::from_tag("kotlin"), "r1", alice)
            .await;
        assert!(result.is_success());
        assert!(result.output.contains("Code executed in kotlin"));
    }

    #[tokio::test]
    async fn test_result_is_broadcast() {
        let (registry, dispatcher) = setup(0);
        let alice = registry.join("r1", "Alice").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = registry.bus().subscribe("r1", move |e| {
            if let EventPayload::ExecutionResult { user_id, result } = &e.payload {
                let _ = tx.send((*user_id, result.clone()));
            }
        });

        let result = dispatcher
            .execute("console.log(4 * 5);", &Language::JavaScript, "r1", alice)
            .await;
        let (author, broadcast) = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(author, alice);
        assert_eq!(broadcast, result);
        assert_eq!(broadcast.output, "20\n");
    }

    #[tokio::test]
    async fn test_latency_counts_toward_execution_time() {
        let registry = RoomRegistry::new(EventBus::new(Duration::ZERO), Duration::from_millis(50));
        let dispatcher = ExecutionDispatcher::new(
            registry.clone(),
            Duration::ZERO,
            Duration::from_millis(30),
        );
        let alice = registry.join("r1", "Alice").await;

        let result = dispatcher
            .execute("console.log(1);", &Language::JavaScript, "r1", alice)
            .await;
        assert!(result.execution_time >= 30.0);
    }

    #[tokio::test]
    async fn test_execution_time_starts_after_presence_update() {
        let (registry, dispatcher) = setup(0);
        let alice = registry.join("r1", "Alice").await;

        let holder = registry.clone();
        let hold = tokio::spawn(async move { holder.hold_rooms(Duration::from_millis(80)).await });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let started = std::time::Instant::now();
        let result = dispatcher
            .execute("console.log(1);", &Language::JavaScript, "r1", alice)
            .await;
        hold.await.unwrap();

        // The wait for the executing broadcast is not part of the run.
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(result.execution_time < 60.0, "{}", result.execution_time);
    }
}
