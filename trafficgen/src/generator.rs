//! The traffic generation engine.
//!
//! A generation runs on its own OS thread inside a single-threaded tokio
//! runtime, hosting one task per simulated user and one metrics reporting
//! task. The control plane never touches that runtime directly: it talks to
//! the generation through a command channel and awaits replies under a
//! timeout, so it stays responsive while generation is busy or winding down.
//!
//! ## Metrics
//!
//! `rps`: Completed requests in the trailing second, refreshed once a second
//!

use std::{io, sync::Arc, thread, time::Duration};

use metrics::gauge;
use tokio::{
    sync::{Semaphore, mpsc, oneshot},
    task::JoinSet,
    time::{self, Instant},
};
use tracing::{Instrument, debug, error, info, info_span, warn};
use trafficgen_signal::{Broadcaster, RegisterError, Watcher};

use crate::{
    config::{StartRequest, ValidationError},
    entropy,
    sitemap::SiteMap,
    target::Target,
    user::User,
    window::Window,
};

const COMMAND_CAPACITY: usize = 16;
const REPORT_INTERVAL: Duration = Duration::from_secs(1);
/// Slack on top of the stop timeout for the stop reply and the thread join.
const STOP_MARGIN: Duration = Duration::from_secs(2);
const RUNTIME_SHUTDOWN: Duration = Duration::from_secs(1);

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Generator`].
pub enum Error {
    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// The generation thread or its runtime could not be created.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The generation thread exited before answering.
    #[error("Generation thread exited unexpectedly")]
    NotReady,
    /// The generation thread did not answer in time.
    #[error("Generation thread did not answer within {0:?}")]
    Unresponsive(Duration),
    /// The generation thread panicked.
    #[error("Generation thread panicked")]
    Panicked,
    /// Shutdown registration failed.
    #[error(transparent)]
    Registration(#[from] RegisterError),
}

/// The validated, immutable input of a generation.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Where traffic goes and how much of it
    pub target: Target,
    /// What traffic is sent
    pub sitemap: SiteMap,
}

impl Plan {
    /// Validate `request`.
    ///
    /// # Errors
    ///
    /// Returns an error if any part of `request` is invalid.
    pub fn new(request: StartRequest) -> Result<Self, ValidationError> {
        Ok(Self {
            target: Target::try_from(request.config)?,
            sitemap: SiteMap::try_from(request.sitemap)?,
        })
    }
}

/// How the tasks of a generation ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Tasks that stopped cleanly
    pub completed: usize,
    /// Tasks that returned an error or panicked
    pub failed: usize,
    /// Tasks still running at the timeout, aborted
    pub abandoned: usize,
}

#[derive(Debug)]
enum Command {
    Rps { reply: oneshot::Sender<u64> },
    Stop { reply: oneshot::Sender<StopReport> },
}

/// A cloneable handle for reading the throughput of a running generation.
#[derive(Debug, Clone)]
pub struct Probe {
    commands: mpsc::Sender<Command>,
}

impl Probe {
    /// Current requests per second, `None` if the generation does not
    /// answer within `wait`.
    pub async fn current_rps(&self, wait: Duration) -> Option<u64> {
        let (reply, answer) = oneshot::channel();
        let exchange = async {
            self.commands.send(Command::Rps { reply }).await.ok()?;
            answer.await.ok()
        };
        time::timeout(wait, exchange).await.ok().flatten()
    }
}

/// A running generation.
#[derive(Debug)]
pub struct Generator {
    commands: mpsc::Sender<Command>,
    thread: thread::JoinHandle<()>,
    stop_timeout: Duration,
}

impl Generator {
    /// Launch a generation for `plan` on a dedicated thread.
    ///
    /// Returns once every task of the generation is spawned.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread, its runtime or the HTTP client cannot
    /// be created.
    pub async fn spawn(plan: Plan) -> Result<Self, Error> {
        let stop_timeout = plan.target.stop_timeout();
        let plan = Arc::new(plan);
        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let (ready, launched) = oneshot::channel::<Result<(), Error>>();

        let thread = thread::Builder::new()
            .name("trafficgen-generation".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready.send(Err(Error::Io(err)));
                        return;
                    }
                };
                runtime.block_on(async move {
                    match Engine::launch(plan) {
                        Ok(engine) => {
                            if ready.send(Ok(())).is_ok() {
                                engine.serve(receiver).await;
                            }
                        }
                        Err(err) => {
                            let _ = ready.send(Err(err));
                        }
                    }
                });
                runtime.shutdown_timeout(RUNTIME_SHUTDOWN);
            })?;

        match launched.await {
            Ok(Ok(())) => Ok(Self {
                commands,
                thread,
                stop_timeout,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::NotReady),
        }
    }

    /// A handle for reading this generation's throughput.
    #[must_use]
    pub fn probe(&self) -> Probe {
        Probe {
            commands: self.commands.clone(),
        }
    }

    /// Stop every task of the generation and release its thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the generation does not answer in time or its
    /// thread panicked. Tasks are abandoned in either case.
    pub async fn stop(self) -> Result<StopReport, Error> {
        let Self {
            commands,
            thread,
            stop_timeout,
        } = self;
        let wait = stop_timeout + STOP_MARGIN;

        let (reply, answer) = oneshot::channel();
        let report = if commands.send(Command::Stop { reply }).await.is_ok() {
            match time::timeout(wait, answer).await {
                Ok(Ok(report)) => Ok(report),
                Ok(Err(_)) => Err(Error::NotReady),
                Err(_) => Err(Error::Unresponsive(wait)),
            }
        } else {
            Err(Error::NotReady)
        };
        drop(commands);

        let join = tokio::task::spawn_blocking(move || thread.join());
        match time::timeout(STOP_MARGIN, join).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(_)) | Err(_)) => return Err(Error::Panicked),
            Err(_) => warn!("Generation thread did not exit within {STOP_MARGIN:?}, detaching"),
        }
        report
    }
}

/// The generation side: lives entirely on the generation thread.
struct Engine {
    plan: Arc<Plan>,
    window: Arc<Window>,
    tasks: JoinSet<Result<(), Error>>,
    shutdown: Broadcaster,
}

impl Engine {
    fn launch(plan: Arc<Plan>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(Error::Client)?;

        let (watcher, shutdown) = trafficgen_signal::signal();
        let permits = usize::try_from(plan.target.rate_limit().get()).unwrap_or(usize::MAX);
        let gate = Arc::new(Semaphore::new(permits));
        let window = Arc::new(Window::default());
        let mut rng = entropy::seeded(plan.target.seed());
        let mut tasks = JoinSet::new();

        for id in 0..plan.target.sim_users() {
            let user = User::new(
                id,
                Arc::clone(&plan),
                client.clone(),
                Arc::clone(&gate),
                Arc::clone(&window),
                entropy::fork(&mut rng),
            );
            let watcher = watcher.register()?;
            tasks.spawn(
                async move {
                    user.spin(watcher).await;
                    Ok(())
                }
                .instrument(info_span!("user", id)),
            );
        }
        tasks.spawn(
            report_rps(Arc::clone(&window), watcher.register()?).instrument(info_span!("rps")),
        );
        drop(watcher);

        info!(
            "Started {users} simulated users against {url} with rate limit {permits}",
            users = plan.target.sim_users(),
            url = plan.target.url(),
        );
        Ok(Self {
            plan,
            window,
            tasks,
            shutdown,
        })
    }

    async fn serve(self, mut commands: mpsc::Receiver<Command>) {
        let reply = loop {
            match commands.recv().await {
                Some(Command::Rps { reply }) => {
                    if reply.send(self.window.current_rps()).is_err() {
                        debug!("RPS reader went away");
                    }
                }
                Some(Command::Stop { reply }) => break Some(reply),
                None => break None,
            }
        };

        let Self {
            plan,
            tasks,
            shutdown,
            ..
        } = self;
        let report = halt(shutdown, tasks, plan.target.stop_timeout()).await;
        if let Some(reply) = reply {
            if reply.send(report).is_err() {
                warn!("Stop requester went away before the report");
            }
        }
    }
}

/// Signal every task to stop and collect them, aborting whatever is still
/// running once `timeout` has passed.
async fn halt(
    shutdown: Broadcaster,
    mut tasks: JoinSet<Result<(), Error>>,
    timeout: Duration,
) -> StopReport {
    let deadline = Instant::now() + timeout;

    info!("Stopping {tasks} tasks", tasks = tasks.len());
    if let Err(err) = shutdown.signal_and_wait(timeout).await {
        warn!("{err}");
    }

    let mut report = StopReport::default();
    loop {
        match time::timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(Ok(Ok(())))) => report.completed += 1,
            Ok(Some(Ok(Err(err)))) => {
                error!("Task failed: {err}");
                report.failed += 1;
            }
            Ok(Some(Err(err))) => {
                if !err.is_cancelled() {
                    error!("Task did not terminate cleanly: {err}");
                }
                report.failed += 1;
            }
            Ok(None) => break,
            Err(_) => {
                report.abandoned = tasks.len();
                error!(
                    "{abandoned} tasks did not stop within {timeout:?}, abandoning them",
                    abandoned = report.abandoned
                );
                tasks.abort_all();
                break;
            }
        }
    }
    info!(
        "Generation stopped: {completed} tasks completed, {failed} failed, {abandoned} abandoned",
        completed = report.completed,
        failed = report.failed,
        abandoned = report.abandoned,
    );
    report
}

async fn report_rps(window: Arc<Window>, shutdown: Watcher) -> Result<(), Error> {
    let mut interval = time::interval(REPORT_INTERVAL);
    let shutdown_wait = shutdown.recv();
    tokio::pin!(shutdown_wait);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let rps = window.current_rps();
                gauge!("rps").set(rps as f64);
                info!("Current RPS: {rps}");
            }
            () = &mut shutdown_wait => {
                info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}
