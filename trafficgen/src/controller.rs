//! The control plane.
//!
//! [`Controller`] owns at most one generation at a time and moves it through
//! `idle -> running -> stopping -> idle`. Starting while running first stops
//! the running generation completely. Every call is safe to make
//! concurrently: lifecycle transitions are serialized, reads are not.

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    config::{StartRequest, ValidationError},
    generator::{self, Generator, Plan, Probe},
};

const RPS_WAIT: Duration = Duration::from_secs(3);

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Controller`].
pub enum Error {
    /// The start request is invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Stop was requested while no generation is running.
    #[error("Generator is not running")]
    NotRunning,
    /// See [`crate::generator::Error`] for details.
    #[error(transparent)]
    Generator(#[from] generator::Error),
}

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No generation
    Idle,
    /// A generation is producing traffic
    Running,
    /// A generation is winding down
    Stopping,
}

/// A point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Lifecycle state
    pub status: Status,
    /// Completed requests in the trailing second
    pub rps: u64,
    /// Simulated users of the current generation
    pub simulated_users: Option<u32>,
    /// Rate limit of the current generation
    pub rate_limit: Option<u32>,
    /// Target of the current generation
    pub target_url: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Summary {
    simulated_users: u32,
    rate_limit: u32,
}

#[derive(Debug)]
struct Shared {
    status: Status,
    summary: Option<(Summary, String)>,
    probe: Option<Probe>,
}

/// Starts, stops and observes generations.
#[derive(Debug)]
pub struct Controller {
    generator: tokio::sync::Mutex<Option<Generator>>,
    shared: Mutex<Shared>,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    /// Create an idle [`Controller`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            generator: tokio::sync::Mutex::new(None),
            shared: Mutex::new(Shared {
                status: Status::Idle,
                summary: None,
                probe: None,
            }),
        }
    }

    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Shared),
    {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut shared);
    }

    /// Start a generation for `request`, stopping the running one first.
    ///
    /// The running generation is stopped before `request` is validated, so a
    /// rejected restart does not keep the old generation alive: the
    /// controller is idle afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if `request` is invalid or the generation cannot be
    /// launched.
    pub async fn start(&self, request: StartRequest) -> Result<(), Error> {
        let mut slot = self.generator.lock().await;
        if let Some(running) = slot.take() {
            info!("Stopping running generation before restart");
            self.shutdown(running).await;
        }

        let plan = Plan::new(request)?;
        let summary = Summary {
            simulated_users: plan.target.sim_users(),
            rate_limit: plan.target.rate_limit().get(),
        };
        let target_url = plan.target.url().to_string();

        let generator = Generator::spawn(plan).await?;
        let probe = generator.probe();
        *slot = Some(generator);
        self.update(|shared| {
            shared.status = Status::Running;
            shared.summary = Some((summary, target_url));
            shared.probe = Some(probe);
        });
        info!(
            "Generator started with {users} users",
            users = summary.simulated_users
        );
        Ok(())
    }

    /// Stop the running generation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] when idle.
    pub async fn stop(&self) -> Result<(), Error> {
        let mut slot = self.generator.lock().await;
        let Some(running) = slot.take() else {
            return Err(Error::NotRunning);
        };
        self.shutdown(running).await;
        Ok(())
    }

    async fn shutdown(&self, generator: Generator) {
        self.update(|shared| {
            shared.status = Status::Stopping;
            shared.probe = None;
        });
        match generator.stop().await {
            Ok(report) if report.abandoned > 0 => {
                warn!("Generator stopped, {n} tasks abandoned", n = report.abandoned);
            }
            Ok(_) => info!("Generator stopped"),
            Err(err) => error!("Generator did not stop cleanly: {err}"),
        }
        self.update(|shared| {
            shared.status = Status::Idle;
            shared.summary = None;
        });
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> Status {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    /// Completed requests in the trailing second, 0 unless running.
    pub async fn current_rps(&self) -> u64 {
        let probe = {
            let shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
            if shared.status != Status::Running {
                return 0;
            }
            shared.probe.clone()
        };
        match probe {
            Some(probe) => probe.current_rps(RPS_WAIT).await.unwrap_or_else(|| {
                warn!("Generation did not report RPS within {RPS_WAIT:?}");
                0
            }),
            None => 0,
        }
    }

    /// A point-in-time view of the controller.
    pub async fn snapshot(&self) -> Snapshot {
        let rps = self.current_rps().await;
        let shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let summary = shared.summary.as_ref();
        Snapshot {
            status: shared.status,
            rps,
            simulated_users: summary.map(|(s, _)| s.simulated_users),
            rate_limit: summary.map(|(s, _)| s.rate_limit),
            target_url: summary.map(|(_, url)| url.clone()),
        }
    }
}
