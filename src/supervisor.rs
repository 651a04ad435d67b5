// ===============================
// src/supervisor.rs
// ===============================
//
// ConnectionSupervisor: one reusable reconnect state machine for every
// publisher/subscriber role, instead of a copy-pasted retry loop per task.
//
// Disconnected -> Connecting -> Connected -> (io error) -> Disconnected
// Connecting -> (failure) -> Disconnected, retry counter +1
// After `max_retries` consecutive failures: terminal Failed.
//
// Backoff is a fixed interval, not exponential: worst-case recovery time
// stays predictable.
//
use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::fabric::FabricError;
use crate::metrics::{CONNECT_RETRIES, CONN_STATE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState { Disconnected, Connecting, Connected, Failed }

impl ConnectionState {
    fn gauge_value(&self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Failed => -1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

/// Retry budget exhausted. Unrecoverable within this process instance; the
/// owning component must stop serving and let an external supervisor restart.
#[derive(Debug, Error)]
#[error("{role}: gave up connecting after {attempts} attempts")]
pub struct FatalError {
    pub role: String,
    pub attempts: u32,
}

/// A single connect attempt against the messaging fabric, for one role.
#[async_trait]
pub trait Connect: Send {
    type Handle: Send;
    async fn connect(&mut self) -> Result<Self::Handle, FabricError>;
}

pub struct ConnectionSupervisor<C: Connect> {
    role: String,
    connector: C,
    policy: RetryPolicy,
    state: ConnectionState,
    retries: u32,
    handle: Option<C::Handle>,
}

impl<C: Connect> ConnectionSupervisor<C> {
    pub fn new(role: impl Into<String>, connector: C, policy: RetryPolicy) -> Self {
        Self {
            role: role.into(),
            connector,
            policy,
            state: ConnectionState::Disconnected,
            retries: 0,
            handle: None,
        }
    }

    pub fn state(&self) -> ConnectionState { self.state }
    pub fn retries(&self) -> u32 { self.retries }
    pub fn role(&self) -> &str { &self.role }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        CONN_STATE
            .with_label_values(&[&self.role])
            .set(state.gauge_value());
    }

    /// The active channel handle. Only available while `Connected`.
    pub fn handle_mut(&mut self) -> Result<&mut C::Handle, FabricError> {
        match (self.state, self.handle.as_mut()) {
            (ConnectionState::Connected, Some(h)) => Ok(h),
            _ => Err(FabricError::NotConnected(self.role.clone())),
        }
    }

    /// Drops the active handle after an io error; next `connect` starts over.
    pub fn mark_disconnected(&mut self) {
        if self.state == ConnectionState::Connected {
            warn!(role = %self.role, "connection lost");
        }
        if self.state != ConnectionState::Failed {
            self.handle = None;
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// One connect attempt. Success resets the retry counter and stores the
    /// handle; failure increments it, waits `retry_delay`, and leaves the
    /// retry decision to the caller. The attempt that exhausts the budget
    /// transitions to `Failed` without sleeping.
    pub async fn connect(&mut self) -> Result<(), FabricError> {
        if self.state == ConnectionState::Failed {
            return Err(FabricError::ConnectFailure(
                self.role.clone(),
                "retry budget exhausted".into(),
            ));
        }
        self.set_state(ConnectionState::Connecting);
        match self.connector.connect().await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.retries = 0;
                self.set_state(ConnectionState::Connected);
                info!(role = %self.role, "connected to fabric");
                Ok(())
            }
            Err(e) => {
                self.retries += 1;
                CONNECT_RETRIES.with_label_values(&[&self.role]).inc();
                warn!(
                    role = %self.role,
                    attempt = self.retries,
                    max = self.policy.max_retries,
                    error = %e,
                    "connect failed"
                );
                if self.retries >= self.policy.max_retries {
                    self.set_state(ConnectionState::Failed);
                    return Err(e);
                }
                self.set_state(ConnectionState::Disconnected);
                sleep(self.policy.retry_delay).await;
                Err(e)
            }
        }
    }

    /// Drives `connect` until `Connected`, or `FatalError` once the budget
    /// is spent.
    pub async fn acquire(&mut self) -> Result<(), FatalError> {
        loop {
            match self.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Failed => {
                    return Err(FatalError { role: self.role.clone(), attempts: self.retries })
                }
                _ => {
                    let _ = self.connect().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    struct Scripted {
        outcomes: VecDeque<bool>,
        attempts: u32,
    }

    impl Scripted {
        fn new(outcomes: &[bool]) -> Self {
            Self { outcomes: outcomes.iter().copied().collect(), attempts: 0 }
        }
    }

    #[async_trait]
    impl Connect for Scripted {
        type Handle = ();
        async fn connect(&mut self) -> Result<(), FabricError> {
            self.attempts += 1;
            match self.outcomes.pop_front() {
                Some(true) => Ok(()),
                _ => Err(FabricError::ConnectFailure("test".into(), "down".into())),
            }
        }
    }

    fn policy(max_retries: u32, delay_ms: u64) -> RetryPolicy {
        RetryPolicy { max_retries, retry_delay: Duration::from_millis(delay_ms) }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_after_exactly_n_attempts() {
        let mut sup = ConnectionSupervisor::new("t", Scripted::new(&[]), policy(3, 100));
        let started = Instant::now();
        let err = sup.acquire().await.err().unwrap();
        assert_eq!(err.attempts, 3);
        assert_eq!(sup.state(), ConnectionState::Failed);
        // 3 attempts, fixed delay between them, none after the last
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_retry_counter() {
        let mut sup =
            ConnectionSupervisor::new("t", Scripted::new(&[false, false, true]), policy(5, 100));
        sup.acquire().await.unwrap();
        assert_eq!(sup.state(), ConnectionState::Connected);
        assert_eq!(sup.retries(), 0);
        assert!(sup.handle_mut().is_ok());
    }

    #[tokio::test]
    async fn handle_gated_on_connected_state() {
        let mut sup = ConnectionSupervisor::new("t", Scripted::new(&[true]), policy(1, 1));
        assert!(matches!(sup.handle_mut(), Err(FabricError::NotConnected(_))));
        sup.connect().await.unwrap();
        assert!(sup.handle_mut().is_ok());
        sup.mark_disconnected();
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert!(matches!(sup.handle_mut(), Err(FabricError::NotConnected(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_is_terminal() {
        let mut sup = ConnectionSupervisor::new("t", Scripted::new(&[false, true]), policy(1, 10));
        assert!(sup.connect().await.is_err());
        assert_eq!(sup.state(), ConnectionState::Failed);
        // the scripted success never gets a chance
        assert!(sup.connect().await.is_err());
        assert_eq!(sup.state(), ConnectionState::Failed);
        assert!(sup.acquire().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_io_error_uses_fresh_budget() {
        let mut sup =
            ConnectionSupervisor::new("t", Scripted::new(&[true, false, true]), policy(2, 50));
        sup.acquire().await.unwrap();
        sup.mark_disconnected();
        sup.acquire().await.unwrap();
        assert_eq!(sup.state(), ConnectionState::Connected);
    }
}
