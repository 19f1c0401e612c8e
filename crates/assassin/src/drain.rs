//! Signal-driven graceful drain
//!
//! `Running -> Draining -> Terminated`. The Execution Lock reads the state
//! before every acquisition; the first termination signal moves to
//! `Draining` and arms a timer that ends the process once the grace period
//! has passed, whatever is still in flight.

use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::utils::instance_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DrainState {
    Running = 0,
    Draining = 1,
    Terminated = 2,
}

impl DrainState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DrainState::Running,
            1 => DrainState::Draining,
            _ => DrainState::Terminated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DrainState::Running => "running",
            DrainState::Draining => "draining",
            DrainState::Terminated => "terminated",
        }
    }
}

/// Invoked with the exit code when the grace period expires
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

/// Read side of the drain state
#[derive(Debug, Clone)]
pub struct DrainHandle {
    state: Arc<AtomicU8>,
}

impl DrainHandle {
    pub fn state(&self) -> DrainState {
        DrainState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// True once a termination signal was received
    pub fn is_draining(&self) -> bool {
        self.state() != DrainState::Running
    }
}

pub struct DrainController {
    state: Arc<AtomicU8>,
    grace_period: Duration,
    shutdown: CancellationToken,
    exit_hook: ExitHook,
}

impl DrainController {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(DrainState::Running as u8)),
            grace_period,
            shutdown: CancellationToken::new(),
            exit_hook: Arc::new(|code| std::process::exit(code)),
        }
    }

    /// Replace the forced exit, e.g. to observe it in tests
    pub fn with_exit_hook(mut self, exit_hook: ExitHook) -> Self {
        self.exit_hook = exit_hook;
        self
    }

    pub fn handle(&self) -> DrainHandle {
        DrainHandle {
            state: self.state.clone(),
        }
    }

    /// Cancelled when draining starts
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> DrainState {
        self.handle().state()
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Enter `Draining` and arm the exit timer. Only the first call has an
    /// effect; later calls return `None`.
    pub fn begin_drain(&self) -> Option<JoinHandle<()>> {
        if self
            .state
            .compare_exchange(
                DrainState::Running as u8,
                DrainState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return None;
        }

        info!(
            keyword = "receive_sigterm",
            instance = instance_name(),
            grace_period = ?self.grace_period,
            "Draining: no new executions will be started"
        );
        self.shutdown.cancel();

        let state = self.state.clone();
        let grace_period = self.grace_period;
        let exit_hook = self.exit_hook.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            state.store(DrainState::Terminated as u8, Ordering::SeqCst);
            warn!(
                instance = instance_name(),
                "Grace period of {:?} expired, terminating", grace_period
            );
            exit_hook(0);
        }))
    }

    /// Wait for SIGTERM or SIGINT and start draining. Returns the exit timer
    /// armed by the drain.
    pub async fn listen_for_signals(&self) -> Result<Option<JoinHandle<()>>> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT (Ctrl+C)"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C");
        }

        Ok(self.begin_drain())
    }
}
