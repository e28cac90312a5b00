//! Issues one request on behalf of a simulated user.
//!
//! ## Metrics
//!
//! `requests_sent`: Requests handed to the client
//! `request_ok`: Requests answered by the target, labelled by `status_code`
//! `request_failure`: Requests that failed on the network or timed out
//!

use std::{sync::Arc, time::Duration};

use http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE, HOST, USER_AGENT},
};
use metrics::counter;
use tracing::{debug, error, warn};

use crate::{
    entropy::{Entropy, choose},
    generator::Plan,
    sitemap::{PathDefinition, TrafficType},
    user::SimulatedUser,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const IDLE_DELAY: Duration = Duration::from_millis(500);

/// The result of one [`Executor::execute`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The target answered, whatever the status
    Completed(StatusCode),
    /// No path was available to this user
    Skipped,
    /// The request could not be built, sent or read
    Failed,
}

#[derive(thiserror::Error, Debug)]
/// Errors produced while preparing a request.
pub enum Error {
    /// The request could not be assembled.
    #[error("Failed to build request for {url}: {source}")]
    Build {
        /// Request URL
        url: String,
        /// Underlying reqwest error
        #[source]
        source: reqwest::Error,
    },
}

/// Builds and sends requests against the plan's target.
#[derive(Debug, Clone)]
pub struct Executor {
    plan: Arc<Plan>,
    client: reqwest::Client,
}

impl Executor {
    /// Create a new [`Executor`].
    #[must_use]
    pub fn new(plan: Arc<Plan>, client: reqwest::Client) -> Self {
        Self { plan, client }
    }

    /// Make one request as `user`.
    ///
    /// When no path is available the call sleeps briefly and reports
    /// [`Outcome::Skipped`]. Network failures are logged and reported as
    /// [`Outcome::Failed`], never raised.
    pub async fn execute<E>(&self, user: &SimulatedUser, entropy: &mut E) -> Outcome
    where
        E: Entropy + ?Sized,
    {
        let request = match self.prepare(user, entropy) {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("No paths available, idling");
                tokio::time::sleep(IDLE_DELAY).await;
                return Outcome::Skipped;
            }
            Err(err) => {
                error!("{err}");
                counter!("request_failure").increment(1);
                return Outcome::Failed;
            }
        };

        let method = request.method().clone();
        let url = request.url().to_string();
        counter!("requests_sent").increment(1);
        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!("Request failed: {method} {url}: {err}");
                counter!("request_failure").increment(1);
                return Outcome::Failed;
            }
        };

        let status = response.status();
        if let Err(err) = response.bytes().await {
            warn!("Failed to read response body: {method} {url}: {err}");
            counter!("request_failure").increment(1);
            return Outcome::Failed;
        }

        if status.is_server_error() {
            error!("Server error: {method} {url} - Status: {status}");
        } else if status.is_client_error() {
            warn!("Client error: {method} {url} - Status: {status}");
        } else {
            debug!("Request: {method} {url} - Status: {status}");
        }
        counter!("request_ok", "status_code" => status.as_u16().to_string()).increment(1);
        Outcome::Completed(status)
    }

    /// Assemble the next request for `user`, `None` if no path is available.
    ///
    /// # Errors
    ///
    /// Returns an error if the substituted request is not valid HTTP.
    pub fn prepare<E>(
        &self,
        user: &SimulatedUser,
        entropy: &mut E,
    ) -> Result<Option<reqwest::Request>, Error>
    where
        E: Entropy + ?Sized,
    {
        let sitemap = &self.plan.sitemap;
        let target = &self.plan.target;
        let variables = sitemap.variables();

        let public = sitemap.paths();
        let private = if user.is_authenticated() {
            sitemap.paths_auth_req()
        } else {
            &[]
        };
        let available = public.len() + private.len();
        if available == 0 {
            return Ok(None);
        }
        let index = entropy.index(available);
        let Some(definition) = public.get(index).or_else(|| private.get(index - public.len()))
        else {
            return Ok(None);
        };
        let Some(template) = choose(entropy, &definition.templates) else {
            return Ok(None);
        };

        let path = variables.substitute(template, entropy);
        let url = target.url_for(&path);
        let headers = self.headers(user, definition.traffic, &path, entropy);

        let mut builder = self
            .client
            .request(definition.method.clone(), &url)
            .timeout(REQUEST_TIMEOUT);
        if let Some(template) = &definition.body {
            let body = variables.substitute(template, entropy);
            builder = match json_payload(definition, &headers, &body) {
                Some(payload) => builder.json(&payload),
                None => builder.body(body),
            };
        }
        builder
            .headers(headers)
            .build()
            .map(Some)
            .map_err(|source| Error::Build { url, source })
    }

    fn headers<E>(
        &self,
        user: &SimulatedUser,
        traffic: TrafficType,
        path: &str,
        entropy: &mut E,
    ) -> HeaderMap
    where
        E: Entropy + ?Sized,
    {
        let sitemap = &self.plan.sitemap;
        let target = &self.plan.target;

        let mut headers = HeaderMap::new();
        headers.insert(target.forwarded_for().clone(), user.forwarded_for());
        for (name, value) in sitemap.global_headers() {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(host) = target.host_header() {
            headers.insert(HOST, host.clone());
        }
        for (name, value) in user.persona.headers(traffic) {
            headers.insert(
                HeaderName::from_static(*name),
                HeaderValue::from_static(*value),
            );
        }
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(user.persona.user_agent(traffic)),
        );
        if let Some(token) = user.credential.as_ref().and_then(|c| c.bearer()) {
            match HeaderValue::try_from(format!("Bearer {token}")) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("Token is not a valid header value, sending without it"),
            }
        }

        if let Some((pattern, templates)) = sitemap
            .header_override()
            .and_then(|header_override| header_override.select(path))
        {
            debug!("Path {path} matched header override pattern {pattern}");
            for (name, template) in templates {
                let value = sitemap.variables().substitute(template, entropy);
                match HeaderValue::try_from(value) {
                    Ok(value) => {
                        headers.insert(name.clone(), value);
                    }
                    Err(_) => warn!("Override header {name} is not a valid value, skipping"),
                }
            }
        }
        headers
    }
}

/// The body as JSON when it is api traffic declared as JSON and parses.
fn json_payload(
    definition: &PathDefinition,
    headers: &HeaderMap,
    body: &str,
) -> Option<serde_json::Value> {
    if definition.traffic != TrafficType::Api {
        return None;
    }
    let declared_json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().contains("application/json"));
    if !declared_json {
        return None;
    }
    match serde_json::from_str(body) {
        Ok(payload) => Some(payload),
        Err(err) => {
            debug!("Body is not valid JSON, sending as text: {err}");
            None
        }
    }
}
