//! The simulated user task.
//!
//! Each user draws a persona, maybe authenticates, then runs sessions of
//! random length back to back until told to stop. Within a session requests
//! are strictly sequential and every request holds one admission permit for
//! as long as it is in flight.

use std::{sync::Arc, time::Duration};

use http::HeaderValue;
use rand::rngs::StdRng;
use tokio::{
    sync::Semaphore,
    time::{Instant, sleep},
};
use tracing::{debug, info, warn};
use trafficgen_signal::Watcher;

use crate::{
    auth::{Authenticator, Credential},
    entropy::Entropy,
    executor::{Executor, Outcome},
    generator::Plan,
    persona::Persona,
    window::Window,
};

const THINK_TIME_MIN: Duration = Duration::from_millis(100);
const THINK_TIME_MAX: Duration = Duration::from_millis(1_000);

/// Per-user state consulted when building requests.
#[derive(Debug, Clone)]
pub struct SimulatedUser {
    /// Client identity, fixed for the user's lifetime
    pub persona: Persona,
    /// Set once authentication succeeds
    pub credential: Option<Credential>,
}

impl SimulatedUser {
    /// Whether this user holds a credential, token or not.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }

    /// The forwarded-for header value of this user.
    #[must_use]
    pub fn forwarded_for(&self) -> HeaderValue {
        HeaderValue::try_from(self.persona.address.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0.0.0.0"))
    }
}

/// A task generating the traffic of one simulated user.
///
/// Every random decision of the user, from its persona to its think time,
/// is drawn from its own entropy source.
#[derive(Debug)]
pub struct User<E = StdRng> {
    id: u32,
    plan: Arc<Plan>,
    executor: Executor,
    authenticator: Authenticator,
    gate: Arc<Semaphore>,
    window: Arc<Window>,
    rng: E,
}

impl<E> User<E>
where
    E: Entropy + Send,
{
    /// Create a new [`User`].
    #[must_use]
    pub fn new(
        id: u32,
        plan: Arc<Plan>,
        client: reqwest::Client,
        gate: Arc<Semaphore>,
        window: Arc<Window>,
        rng: E,
    ) -> Self {
        Self {
            id,
            executor: Executor::new(Arc::clone(&plan), client.clone()),
            authenticator: Authenticator::new(Arc::clone(&plan), client),
            plan,
            gate,
            window,
            rng,
        }
    }

    /// Run the user until `shutdown` is signaled or the admission gate is
    /// closed. A permit held at that moment is released.
    pub async fn spin(mut self, shutdown: Watcher) {
        let shutdown_wait = shutdown.recv();
        tokio::pin!(shutdown_wait);
        tokio::select! {
            () = self.simulate() => {}
            () = &mut shutdown_wait => {
                info!("shutdown signal received");
            }
        }
    }

    async fn simulate(&mut self) {
        let mut user = SimulatedUser {
            persona: Persona::generate(&mut self.rng),
            credential: None,
        };
        debug!(
            "Simulated user {id} presenting as {address}",
            id = self.id,
            address = user.persona.address
        );

        if self.plan.sitemap.auth().is_some() && self.rng.coin() {
            user.credential = self
                .authenticator
                .authenticate(&user.forwarded_for(), &mut self.rng)
                .await;
        }

        let (min, max) = self.plan.target.session_bounds();
        loop {
            let seconds = self.rng.integer(i64::from(min), i64::from(max));
            let session = Duration::from_secs(u64::try_from(seconds).unwrap_or_default());
            let deadline = Instant::now() + session;
            debug!("Simulated user {id} starting a {seconds}s session", id = self.id);

            while Instant::now() < deadline {
                let Ok(permit) = Arc::clone(&self.gate).acquire_owned().await else {
                    warn!("Admission gate closed, simulated user {id} exiting", id = self.id);
                    return;
                };
                let outcome = self.executor.execute(&user, &mut self.rng).await;
                drop(permit);
                if let Outcome::Completed(_) = outcome {
                    self.window.record_event();
                }
                let think = self.rng.duration(THINK_TIME_MIN, THINK_TIME_MAX);
                sleep(think).await;
            }
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::Ipv4Addr,
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use tokio::sync::Semaphore;
    use warp::Filter;

    use super::{SimulatedUser, User};
    use crate::{
        auth::Credential, entropy::test::Scripted, generator::test::plan, persona::Persona,
        window::Window,
    };

    #[test]
    fn forwarded_for_is_the_persona_address() {
        let mut persona = Persona::generate(&mut Scripted::new(&[]));
        persona.address = Ipv4Addr::new(203, 0, 113, 77);
        let user = SimulatedUser {
            persona,
            credential: None,
        };
        assert_eq!(user.forwarded_for(), "203.0.113.77");
        assert!(!user.is_authenticated());

        let user = SimulatedUser {
            credential: Some(Credential::NoToken),
            ..user
        };
        assert!(user.is_authenticated());
    }

    #[tokio::test]
    async fn authenticated_user_presents_its_token_on_private_paths() {
        let logins = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::<Option<String>>::new()));

        let login_count = Arc::clone(&logins);
        let login = warp::post().and(warp::path("login")).map(move || {
            login_count.fetch_add(1, Ordering::SeqCst);
            warp::reply::json(&serde_json::json!({"token": "t"}))
        });
        let recorded = Arc::clone(&seen);
        let private = warp::path("private")
            .and(warp::header::optional::<String>("authorization"))
            .map(move |authorization: Option<String>| {
                recorded.lock().expect("lock").push(authorization);
                warp::reply()
            });
        let (addr, serve_fut) =
            warp::serve(login.or(private)).bind_ephemeral(([127, 0, 0, 1], 0));
        let _server_handle = tokio::spawn(serve_fut);

        let plan = plan(
            &format!("http://{addr}"),
            r"
has_auth: true
paths: []
paths_auth_req:
  - {method: GET, paths: [/private], traffic_type: web}
auth:
  auth_type: basic
  auth_method: POST
  auth_path: /login
  credentials:
    header:
      Authorization: Basic eDp5
",
        );
        let mut entropy = Scripted::new(&[]);
        entropy.coin = true;
        let user = User::new(
            0,
            plan,
            reqwest::Client::new(),
            Arc::new(Semaphore::new(1)),
            Arc::new(Window::default()),
            entropy,
        );

        let (watcher, broadcaster) = trafficgen_signal::signal();
        let handle = tokio::spawn(user.spin(watcher));
        for _ in 0..50 {
            if seen.lock().expect("lock").len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        broadcaster.signal();
        handle.await.expect("user task joins");

        assert_eq!(logins.load(Ordering::SeqCst), 1);
        let seen = seen.lock().expect("lock");
        assert!(seen.len() >= 2);
        assert!(
            seen.iter()
                .all(|authorization| authorization.as_deref() == Some("Bearer t"))
        );
    }

    #[tokio::test]
    async fn cancelled_request_releases_its_permit() {
        let route = warp::path("slow").and_then(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, warp::Rejection>(warp::reply())
        });
        let (addr, serve_fut) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        let _server_handle = tokio::spawn(serve_fut);

        let plan = plan(
            &format!("http://{addr}"),
            "has_auth: false\npaths:\n  - {method: GET, paths: [/slow], traffic_type: web}\n",
        );
        let gate = Arc::new(Semaphore::new(1));
        let user = User::new(
            0,
            plan,
            reqwest::Client::new(),
            Arc::clone(&gate),
            Arc::new(Window::default()),
            Scripted::new(&[]),
        );

        let (watcher, broadcaster) = trafficgen_signal::signal();
        let handle = tokio::spawn(user.spin(watcher));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(gate.available_permits(), 0);

        broadcaster.signal();
        handle.await.expect("user task joins");
        assert_eq!(gate.available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn user_stops_on_signal_while_waiting_for_a_permit() {
        let plan = plan(
            "http://127.0.0.1:9",
            "has_auth: false\npaths:\n  - {method: GET, paths: [/], traffic_type: web}\n",
        );
        // No permits: the user parks on the gate.
        let gate = Arc::new(Semaphore::new(0));
        let window = Arc::new(Window::default());
        let user = User::new(
            0,
            plan,
            reqwest::Client::new(),
            Arc::clone(&gate),
            Arc::clone(&window),
            Scripted::new(&[]),
        );

        let (watcher, broadcaster) = trafficgen_signal::signal();
        let handle = tokio::spawn(user.spin(watcher));
        tokio::time::sleep(Duration::from_secs(1)).await;
        broadcaster.signal();
        handle.await.expect("user task joins");
        assert_eq!(gate.available_permits(), 0);
        assert_eq!(window.current_rps(), 0);
    }

    #[tokio::test]
    async fn closed_gate_ends_the_user() {
        let plan = plan(
            "http://127.0.0.1:9",
            "has_auth: false\npaths:\n  - {method: GET, paths: [/], traffic_type: web}\n",
        );
        let gate = Arc::new(Semaphore::new(1));
        gate.close();
        let user = User::new(
            0,
            plan,
            reqwest::Client::new(),
            gate,
            Arc::new(Window::default()),
            Scripted::new(&[]),
        );
        // The signal is never sent, the user ends on its own.
        let (watcher, _broadcaster) = trafficgen_signal::signal();
        tokio::time::timeout(Duration::from_secs(5), user.spin(watcher))
            .await
            .expect("user exits on a closed gate");
    }
}
