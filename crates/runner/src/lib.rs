//! Runs named long-lived processes side by side and shuts them down together.
//!
//! - every app process gets a clone of one `CancellationToken`
//! - SIGINT/SIGTERM, an app error or a panic cancels the token
//! - closers run afterwards under one timeout, whatever the outcome
//!
//! ```no_run
//! use ingest_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_app_process("ticker", |ctx| async move {
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => break,
//!                     _ = tokio::time::sleep(Duration::from_secs(1)) => tracing::info!("tick"),
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer("flush", || async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type BoxedRunFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedRunFuture + Send>;

pub type Closer = Box<dyn FnOnce() -> BoxedRunFuture + Send>;

/// How the app processes ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Cancelled, or every process returned `Ok`
    Stopped,
    /// The first process to fail, and why
    Failed { process: String, error: anyhow::Error },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Stopped => 0,
            RunOutcome::Failed { .. } => 1,
        }
    }
}

pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<(String, Closer)>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
    handle_signals: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Closer timeout defaults to 10 seconds
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
            handle_signals: true,
        }
    }

    pub fn with_app_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.app_processes
            .push((name.into(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// Closers run concurrently once every app process has stopped
    pub fn with_closer<F, Fut>(mut self, name: impl Into<String>, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers
            .push((name.into(), Box::new(|| Box::pin(closer()))));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Share a token so something outside the runner can stop it
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Skip installing SIGINT/SIGTERM handlers
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Run to completion and exit the process with the outcome's exit code
    pub async fn run(self) {
        let outcome = self.run_until_stopped().await;
        match &outcome {
            RunOutcome::Stopped => info!("application exiting normally"),
            RunOutcome::Failed { process, error } => {
                error!(process = %process, "application exiting with error: {:#}", error)
            }
        }
        std::process::exit(outcome.exit_code());
    }

    /// Run app processes until cancellation or the first failure, then closers
    pub async fn run_until_stopped(self) -> RunOutcome {
        let token = self.cancellation_token;

        if self.handle_signals {
            spawn_signal_handlers(token.clone());
        }

        let mut join_set = JoinSet::new();
        for (name, process) in self.app_processes {
            let process_token = token.clone();
            join_set.spawn(async move { (name, process(process_token).await) });
        }

        let mut outcome = RunOutcome::Stopped;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(process = %name, "app process completed"),
                Ok((name, Err(error))) => {
                    if !token.is_cancelled() {
                        error!(process = %name, "app process failed: {:#}", error);
                        outcome = RunOutcome::Failed {
                            process: name,
                            error,
                        };
                        token.cancel();
                    } else {
                        warn!(process = %name, "app process errored during shutdown: {:#}", error);
                    }
                }
                Err(join_error) => {
                    error!("app process panicked: {}", join_error);
                    if !token.is_cancelled() {
                        outcome = RunOutcome::Failed {
                            process: "unknown".to_string(),
                            error: anyhow::anyhow!("app process panicked: {}", join_error),
                        };
                        token.cancel();
                    }
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        // Give the rest a chance to observe cancellation before aborting them
        while let Some(joined) = join_set.join_next().await {
            if let Ok((name, Err(error))) = joined {
                warn!(process = %name, "app process errored during shutdown: {:#}", error);
            }
        }

        run_closers(self.closers, self.closer_timeout).await;
        outcome
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received SIGINT");
                ctrl_c_token.cancel();
            }
            Err(err) => error!("failed to install SIGINT handler: {}", err),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received SIGTERM");
                token.cancel();
            }
            Err(err) => error!("failed to install SIGTERM handler: {}", err),
        }
    });
}

async fn run_closers(closers: Vec<(String, Closer)>, timeout: Duration) {
    if closers.is_empty() {
        return;
    }

    info!("running {} closers with timeout of {:?}", closers.len(), timeout);

    let mut closer_set = JoinSet::new();
    for (name, closer) in closers {
        closer_set.spawn(async move { (name, closer().await) });
    }

    let drain = async {
        while let Some(joined) = closer_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(closer = %name, "closer completed"),
                Ok((name, Err(err))) => error!(closer = %name, "closer failed: {:#}", err),
                Err(err) => error!("closer panicked: {}", err),
            }
        }
    };

    if tokio::time::timeout(timeout, drain).await.is_err() {
        error!("closers timed out after {:?}", timeout);
    }
}
