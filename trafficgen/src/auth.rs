//! Simulated user authentication.
//!
//! ## Metrics
//!
//! `auth_ok`: Authentication requests that yielded a credential
//! `auth_failure`: Authentication requests that did not
//!

use std::{sync::Arc, time::Duration};

use http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode,
    header::{AUTHORIZATION, HOST},
};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{entropy::Entropy, generator::Plan, sitemap::AuthStrategy};

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPTED: [StatusCode; 3] = [StatusCode::OK, StatusCode::CREATED, StatusCode::NO_CONTENT];
const TOKEN_KEYS: [&str; 3] = ["auth_token", "token", "access_token"];

/// What a successful authentication leaves a simulated user with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// A token to present as `Authorization: Bearer`
    Token(String),
    /// Authenticated, but no token was issued
    NoToken,
}

impl Credential {
    /// The bearer token, if one was issued.
    #[must_use]
    pub fn bearer(&self) -> Option<&str> {
        match self {
            Self::Token(token) => Some(token),
            Self::NoToken => None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Authenticator`].
pub enum Error {
    /// The site map declares no authentication.
    #[error("Site map declares no authentication")]
    NotConfigured,
    /// A header value is invalid once substituted.
    #[error("Invalid value for header {name} after substitution")]
    InvalidHeader {
        /// Header name
        name: HeaderName,
    },
    /// The request could not be assembled.
    #[error("Failed to build authentication request for {url}: {source}")]
    Build {
        /// Request URL
        url: String,
        /// Underlying reqwest error
        #[source]
        source: reqwest::Error,
    },
    /// The request failed on the network or timed out.
    #[error("Authentication request to {url} failed: {source}")]
    Request {
        /// Request URL
        url: String,
        /// Underlying reqwest error
        #[source]
        source: reqwest::Error,
    },
    /// The endpoint answered with a status other than 200, 201 or 204.
    #[error("Authentication request to {url} rejected with status {status}: {body}")]
    Rejected {
        /// Request URL
        url: String,
        /// Response status
        status: StatusCode,
        /// Leading part of the response body
        body: String,
    },
    /// The endpoint answered with a body that is not a JSON object.
    #[error("Authentication response from {url} was not a JSON object")]
    Malformed {
        /// Request URL
        url: String,
    },
}

/// Performs the site map's authentication flow on behalf of a user.
#[derive(Debug, Clone)]
pub struct Authenticator {
    plan: Arc<Plan>,
    client: reqwest::Client,
}

impl Authenticator {
    /// Create a new [`Authenticator`].
    #[must_use]
    pub fn new(plan: Arc<Plan>, client: reqwest::Client) -> Self {
        Self { plan, client }
    }

    /// Authenticate a user presenting as `forwarded_for`.
    ///
    /// Failure is never fatal: it is logged and the user proceeds
    /// unauthenticated.
    pub async fn authenticate<E>(
        &self,
        forwarded_for: &HeaderValue,
        entropy: &mut E,
    ) -> Option<Credential>
    where
        E: Entropy + ?Sized,
    {
        match self.try_authenticate(forwarded_for, entropy).await {
            Ok(credential) => {
                counter!("auth_ok").increment(1);
                Some(credential)
            }
            Err(err) => {
                warn!("Authentication failed: {err}");
                counter!("auth_failure").increment(1);
                None
            }
        }
    }

    async fn try_authenticate<E>(
        &self,
        forwarded_for: &HeaderValue,
        entropy: &mut E,
    ) -> Result<Credential, Error>
    where
        E: Entropy + ?Sized,
    {
        let request = self.prepare(forwarded_for, entropy)?;
        let url = request.url().to_string();
        debug!("Auth attempt: {method} {url}", method = request.method());

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|source| Error::Request {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        debug!("Auth request to {url} returned status {status}");

        if !ACCEPTED.contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Rejected {
                url,
                status,
                body: body.chars().take(200).collect(),
            });
        }

        let body = response.bytes().await.map_err(|source| Error::Request {
            url: url.clone(),
            source,
        })?;
        extract_credential(&body).ok_or(Error::Malformed { url })
    }

    /// Assemble the authentication request.
    ///
    /// # Errors
    ///
    /// Returns an error if the site map declares no authentication or the
    /// substituted request is not valid HTTP.
    pub fn prepare<E>(
        &self,
        forwarded_for: &HeaderValue,
        entropy: &mut E,
    ) -> Result<reqwest::Request, Error>
    where
        E: Entropy + ?Sized,
    {
        let target = &self.plan.target;
        let auth = self.plan.sitemap.auth().ok_or(Error::NotConfigured)?;
        let variables = self.plan.sitemap.variables();

        let path = variables.substitute(&auth.path, entropy);
        let mut url = target.url_for(&path);

        let mut headers = HeaderMap::new();
        headers.insert(target.forwarded_for().clone(), forwarded_for.clone());
        if let Some(host) = target.host_header() {
            headers.insert(HOST, host.clone());
        }

        let mut form = None;
        let mut json = None;
        match &auth.strategy {
            AuthStrategy::Basic { authorization } | AuthStrategy::Bearer { authorization } => {
                headers.insert(AUTHORIZATION, authorization.clone());
            }
            AuthStrategy::BodyParams { username, password } => {
                form = Some([
                    ("username", variables.substitute(username, entropy)),
                    ("password", variables.substitute(password, entropy)),
                ]);
            }
            AuthStrategy::JsonBody(body) => {
                json = Some(variables.substitute_json(body, entropy));
            }
            AuthStrategy::QueryParams { username, password } => {
                let query = query_string(&[
                    ("username", variables.substitute(username, entropy)),
                    ("password", variables.substitute(password, entropy)),
                ]);
                if !query.is_empty() {
                    url.push('?');
                    url.push_str(&query);
                }
            }
            AuthStrategy::CustomHeader(templates) => {
                for (name, template) in templates {
                    let value = variables.substitute(template, entropy);
                    let value = HeaderValue::from_str(&value)
                        .map_err(|_| Error::InvalidHeader { name: name.clone() })?;
                    headers.insert(name.clone(), value);
                }
            }
        }

        let mut builder = self
            .client
            .request(auth.method.clone(), &url)
            .headers(headers)
            .timeout(AUTH_TIMEOUT);
        if let Some(form) = form {
            builder = builder.form(&form);
        }
        if let Some(json) = json {
            builder = builder.json(&json);
        }
        builder.build().map_err(|source| Error::Build { url, source })
    }
}

/// `k=v` pairs joined by `&`, empty values omitted.
fn query_string(pairs: &[(&str, String)]) -> String {
    pairs
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Interpret the body of an accepted authentication response.
///
/// An empty body means authenticated without a token. A JSON object yields
/// the first non-empty value under `auth_token`, `token` or `access_token`,
/// or no token if none is present. Anything else is not a credential.
#[must_use]
pub fn extract_credential(body: &[u8]) -> Option<Credential> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Some(Credential::NoToken);
    }
    let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(body) else {
        return None;
    };
    for key in TOKEN_KEYS {
        match fields.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::String(token)) if token.is_empty() => {}
            Some(Value::String(token)) => return Some(Credential::Token(token.clone())),
            Some(other) => return Some(Credential::Token(other.to_string())),
        }
    }
    Some(Credential::NoToken)
}

#[cfg(test)]
mod tests {
    use http::{HeaderValue, Method};
    use warp::Filter;

    use super::{Authenticator, Credential, extract_credential};
    use crate::{entropy::test::Scripted, generator::test::plan};

    const XFF: &str = "198.51.100.4";

    fn authenticator(base_url: &str, auth: &str) -> Authenticator {
        let sitemap = format!(
            r#"
has_auth: true
paths: []
variables:
  user:
    type: list
    value: ["alice"]
auth:
{auth}
"#
        );
        Authenticator::new(plan(base_url, &sitemap), reqwest::Client::new())
    }

    fn prepare(authenticator: &Authenticator) -> reqwest::Request {
        authenticator
            .prepare(&HeaderValue::from_static(XFF), &mut Scripted::new(&[]))
            .expect("request builds")
    }

    fn body_text(request: &reqwest::Request) -> String {
        let bytes = request
            .body()
            .and_then(reqwest::Body::as_bytes)
            .expect("buffered body");
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    #[test]
    fn basic_sets_authorization() {
        let auth = authenticator(
            "http://auth.example.com",
            r"
  auth_type: basic
  auth_method: post
  auth_path: /login/@user
  credentials:
    header:
      Authorization: Basic YWxpY2U6cHc=
",
        );
        let request = prepare(&auth);
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().as_str(), "http://auth.example.com/login/alice");
        assert_eq!(request.headers()["authorization"], "Basic YWxpY2U6cHc=");
        assert_eq!(request.headers()["x-forwarded-for"], XFF);
    }

    #[test]
    fn body_params_are_form_encoded() {
        let auth = authenticator(
            "http://auth.example.com",
            r"
  auth_type: body_params
  auth_method: POST
  auth_path: /login
  credentials:
    body_params:
      username: '@user'
      password: p w
",
        );
        let request = prepare(&auth);
        assert_eq!(
            request.headers()["content-type"],
            "application/x-www-form-urlencoded"
        );
        assert_eq!(body_text(&request), "username=alice&password=p+w");
    }

    #[test]
    fn json_body_is_substituted() {
        let auth = authenticator(
            "http://auth.example.com",
            r#"
  auth_type: json_body
  auth_method: POST
  auth_path: /login
  credentials:
    json_body:
      user: "@user"
      remember: true
"#,
        );
        let request = prepare(&auth);
        let body: serde_json::Value =
            serde_json::from_str(&body_text(&request)).expect("json body");
        assert_eq!(body, serde_json::json!({"user": "alice", "remember": true}));
    }

    #[test]
    fn query_params_skip_empty_values() {
        let auth = authenticator(
            "http://auth.example.com",
            r"
  auth_type: query_params
  auth_method: GET
  auth_path: /login
  credentials:
    body_params:
      username: '@user'
",
        );
        let request = prepare(&auth);
        assert_eq!(
            request.url().as_str(),
            "http://auth.example.com/login?username=alice"
        );
    }

    #[test]
    fn custom_header_values_are_substituted() {
        let auth = authenticator(
            "http://auth.example.com",
            r"
  auth_type: custom_header
  auth_method: GET
  auth_path: /login
  credentials:
    header:
      X-User: '@user'
      X-Api-Key: k1
",
        );
        let request = prepare(&auth);
        assert_eq!(request.headers()["x-user"], "alice");
        assert_eq!(request.headers()["x-api-key"], "k1");
    }

    #[test]
    fn credential_extraction() {
        assert_eq!(extract_credential(b""), Some(Credential::NoToken));
        assert_eq!(
            extract_credential(br#"{"token": "abc", "access_token": "zzz"}"#),
            Some(Credential::Token("abc".to_string()))
        );
        assert_eq!(
            extract_credential(br#"{"auth_token": "", "access_token": "zzz"}"#),
            Some(Credential::Token("zzz".to_string()))
        );
        assert_eq!(
            extract_credential(br#"{"token": 42}"#),
            Some(Credential::Token("42".to_string()))
        );
        assert_eq!(
            extract_credential(br#"{"session": "x"}"#),
            Some(Credential::NoToken)
        );
        assert_eq!(extract_credential(br#"["token"]"#), None);
        assert_eq!(extract_credential(b"<html>"), None);
    }

    #[tokio::test]
    async fn token_is_read_from_accepted_response() {
        let route = warp::post()
            .and(warp::path("login"))
            .and(warp::header::<String>("authorization"))
            .map(|authorization: String| {
                assert_eq!(authorization, "Bearer seed");
                warp::reply::json(&serde_json::json!({"access_token": "t0k"}))
            });
        let (addr, serve_fut) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        let _server_handle = tokio::spawn(serve_fut);

        let auth = authenticator(
            &format!("http://{addr}"),
            r"
  auth_type: bearer
  auth_method: POST
  auth_path: /login
  credentials:
    header:
      Authorization: Bearer seed
",
        );
        let credential = auth
            .authenticate(&HeaderValue::from_static(XFF), &mut Scripted::new(&[]))
            .await;
        assert_eq!(credential, Some(Credential::Token("t0k".to_string())));
    }

    #[tokio::test]
    async fn rejected_response_yields_nothing() {
        let route = warp::path("login").map(|| {
            warp::reply::with_status("nope", warp::http::StatusCode::UNAUTHORIZED)
        });
        let (addr, serve_fut) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        let _server_handle = tokio::spawn(serve_fut);

        let auth = authenticator(
            &format!("http://{addr}"),
            r"
  auth_type: basic
  auth_method: POST
  auth_path: /login
  credentials:
    header:
      Authorization: Basic eDp5
",
        );
        let credential = auth
            .authenticate(&HeaderValue::from_static(XFF), &mut Scripted::new(&[]))
            .await;
        assert_eq!(credential, None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_nothing() {
        // Bind then drop a listener so the port is closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let auth = authenticator(
            &format!("http://{addr}"),
            r"
  auth_type: basic
  auth_method: POST
  auth_path: /login
  credentials:
    header:
      Authorization: Basic eDp5
",
        );
        let credential = auth
            .authenticate(&HeaderValue::from_static(XFF), &mut Scripted::new(&[]))
            .await;
        assert_eq!(credential, None);
    }
}
