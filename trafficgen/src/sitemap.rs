//! The validated site map of a run.
//!
//! Everything a simulated user needs to decide what to request: the path
//! catalog, the authentication flow, header overrides, global headers and
//! placeholder variables. Immutable once built and shared read-only by every
//! user of a run.

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;

use crate::{
    config::{
        AuthConfig, Credentials, HeaderOverrideConfig, PathConfig, SiteMapConfig, ValidationError,
    },
    matcher,
    vars::{Variable, VariableKind, Variables},
};

const ALLOWED_METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::HEAD,
    Method::PATCH,
    Method::OPTIONS,
];

/// Which default headers and user agent a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficType {
    /// Browser-like traffic
    Web,
    /// API client traffic
    Api,
}

impl TrafficType {
    fn parse(name: &str) -> Result<Self, ValidationError> {
        match name.to_ascii_lowercase().as_str() {
            "web" => Ok(Self::Web),
            "api" => Ok(Self::Api),
            _ => Err(ValidationError::UnknownTrafficType(name.to_string())),
        }
    }
}

/// A family of requests sharing a method, body and traffic type.
#[derive(Debug, Clone)]
pub struct PathDefinition {
    /// HTTP method
    pub method: Method,
    /// Path templates, never empty
    pub templates: Vec<String>,
    /// Body template
    pub body: Option<String>,
    /// Traffic type
    pub traffic: TrafficType,
}

impl TryFrom<PathConfig> for PathDefinition {
    type Error = ValidationError;

    fn try_from(config: PathConfig) -> Result<Self, Self::Error> {
        let method = Method::from_bytes(config.method.trim().to_ascii_uppercase().as_bytes())
            .ok()
            .filter(|m| ALLOWED_METHODS.contains(m))
            .ok_or_else(|| ValidationError::UnknownMethod(config.method.clone()))?;
        let traffic = TrafficType::parse(&config.traffic_type)?;
        if config.paths.is_empty() {
            return Err(ValidationError::NoPathTemplates {
                method: method.to_string(),
            });
        }
        Ok(Self {
            method,
            templates: config.paths,
            body: config.body,
            traffic,
        })
    }
}

/// Headers applied to requests whose path matches a pattern.
#[derive(Debug, Clone)]
pub struct HeaderOverride {
    patterns: Vec<String>,
    headers: Vec<(HeaderName, String)>,
}

impl HeaderOverride {
    fn from_config(config: HeaderOverrideConfig) -> Result<Option<Self>, ValidationError> {
        let (Some(patterns), Some(headers)) = (config.paths, config.headers) else {
            return Ok(None);
        };
        if patterns.is_empty() || headers.is_empty() {
            return Ok(None);
        }
        let headers = header_templates(headers)?;
        Ok(Some(Self { patterns, headers }))
    }

    /// The header templates if `path` matches any pattern. The first
    /// matching pattern decides.
    #[must_use]
    pub fn select(&self, path: &str) -> Option<(&str, &[(HeaderName, String)])> {
        matcher::first_match(path, self.patterns.iter().map(String::as_str))
            .map(|pattern| (pattern, self.headers.as_slice()))
    }
}

/// How credentials are presented to the authentication endpoint.
#[derive(Debug, Clone)]
pub enum AuthStrategy {
    /// A fixed `Authorization: Basic` header
    Basic {
        /// The `Authorization` value
        authorization: HeaderValue,
    },
    /// A fixed `Authorization: Bearer` header
    Bearer {
        /// The `Authorization` value
        authorization: HeaderValue,
    },
    /// An urlencoded `username`/`password` body
    BodyParams {
        /// Username template
        username: String,
        /// Password template
        password: String,
    },
    /// A JSON body, every string leaf a template
    JsonBody(Value),
    /// A `username`/`password` query string
    QueryParams {
        /// Username template
        username: String,
        /// Password template
        password: String,
    },
    /// Arbitrary headers, every value a template
    CustomHeader(Vec<(HeaderName, String)>),
}

impl AuthStrategy {
    /// Name of the strategy as configured.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::BodyParams { .. } => "body_params",
            Self::JsonBody(_) => "json_body",
            Self::QueryParams { .. } => "query_params",
            Self::CustomHeader(_) => "custom_header",
        }
    }
}

/// The authentication request a simulated user may make.
#[derive(Debug, Clone)]
pub struct Auth {
    /// HTTP method of the authentication request
    pub method: Method,
    /// Path template of the authentication request
    pub path: String,
    /// Credential presentation
    pub strategy: AuthStrategy,
}

fn authorization(
    auth_type: &'static str,
    credentials: &Credentials,
) -> Result<HeaderValue, ValidationError> {
    let value = credentials
        .header
        .as_ref()
        .and_then(|headers| {
            headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        })
        .map(|(_, value)| value)
        .ok_or(ValidationError::MissingCredential {
            auth_type,
            field: "header.Authorization",
        })?;
    HeaderValue::from_str(value)
        .map_err(|_| ValidationError::InvalidHeaderValue("authorization".to_string()))
}

fn form_pair(
    auth_type: &'static str,
    credentials: Credentials,
) -> Result<(String, String), ValidationError> {
    let form = credentials
        .body_params
        .ok_or(ValidationError::MissingCredential {
            auth_type,
            field: "body_params",
        })?;
    Ok((
        form.username.unwrap_or_default(),
        form.password.unwrap_or_default(),
    ))
}

impl TryFrom<AuthConfig> for Auth {
    type Error = ValidationError;

    fn try_from(config: AuthConfig) -> Result<Self, Self::Error> {
        if config.auth_type.trim().is_empty() {
            return Err(ValidationError::EmptyAuthField("auth_type"));
        }
        if config.auth_method.trim().is_empty() {
            return Err(ValidationError::EmptyAuthField("auth_method"));
        }
        if config.auth_path.trim().is_empty() {
            return Err(ValidationError::EmptyAuthField("auth_path"));
        }

        let method = Method::from_bytes(config.auth_method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| ValidationError::UnknownMethod(config.auth_method.clone()))?;

        let credentials = config.credentials;
        let strategy = match config.auth_type.trim().to_ascii_lowercase().as_str() {
            "basic" => AuthStrategy::Basic {
                authorization: authorization("basic", &credentials)?,
            },
            "bearer" => AuthStrategy::Bearer {
                authorization: authorization("bearer", &credentials)?,
            },
            "body_params" => {
                let (username, password) = form_pair("body_params", credentials)?;
                AuthStrategy::BodyParams { username, password }
            }
            "query_params" => {
                let (username, password) = form_pair("query_params", credentials)?;
                AuthStrategy::QueryParams { username, password }
            }
            "json_body" => AuthStrategy::JsonBody(credentials.json_body.ok_or(
                ValidationError::MissingCredential {
                    auth_type: "json_body",
                    field: "json_body",
                },
            )?),
            "custom_header" => {
                let headers = credentials
                    .header
                    .filter(|headers| !headers.is_empty())
                    .ok_or(ValidationError::MissingCredential {
                        auth_type: "custom_header",
                        field: "header",
                    })?;
                AuthStrategy::CustomHeader(header_templates(headers)?)
            }
            _ => return Err(ValidationError::UnknownAuthType(config.auth_type)),
        };

        Ok(Self {
            method,
            path: config.auth_path,
            strategy,
        })
    }
}

fn header_name(name: &str) -> Result<HeaderName, ValidationError> {
    HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|_| ValidationError::InvalidHeaderName(name.to_string()))
}

/// Header names are checked now. Values are templates, checked once
/// substituted.
fn header_templates<I>(headers: I) -> Result<Vec<(HeaderName, String)>, ValidationError>
where
    I: IntoIterator<Item = (String, String)>,
{
    headers
        .into_iter()
        .map(|(name, value)| Ok((header_name(&name)?, value)))
        .collect()
}

/// The validated site map of a run.
#[derive(Debug, Clone)]
pub struct SiteMap {
    paths: Vec<PathDefinition>,
    paths_auth_req: Vec<PathDefinition>,
    auth: Option<Auth>,
    header_override: Option<HeaderOverride>,
    global_headers: HeaderMap,
    variables: Variables,
}

impl TryFrom<SiteMapConfig> for SiteMap {
    type Error = ValidationError;

    fn try_from(config: SiteMapConfig) -> Result<Self, Self::Error> {
        // Without `has_auth` the auth block is dropped unread.
        let auth = if config.has_auth {
            let raw = config
                .auth
                .filter(Value::is_object)
                .ok_or(ValidationError::MissingAuth)?;
            let auth: AuthConfig = serde_json::from_value(raw)?;
            Some(Auth::try_from(auth)?)
        } else {
            None
        };

        let paths = config
            .paths
            .into_iter()
            .map(PathDefinition::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let paths_auth_req = config
            .paths_auth_req
            .unwrap_or_default()
            .into_iter()
            .map(PathDefinition::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let header_override = match config.path_headers_override {
            Some(header_override) => HeaderOverride::from_config(header_override)?,
            None => None,
        };

        let mut global_headers = HeaderMap::with_capacity(config.global_headers.len());
        for (name, value) in config.global_headers {
            let header_value = HeaderValue::from_str(&value)
                .map_err(|_| ValidationError::InvalidHeaderValue(name.clone()))?;
            global_headers.insert(header_name(&name)?, header_value);
        }

        let variables = config
            .variables
            .into_iter()
            .map(|(name, definition)| {
                let kind = VariableKind::parse(definition.kind.trim()).ok_or_else(|| {
                    ValidationError::UnknownVariableType {
                        name: name.clone(),
                        kind: definition.kind.clone(),
                    }
                })?;
                let variable = Variable::new(kind, definition.value);
                variable
                    .check()
                    .map_err(|source| ValidationError::Variable {
                        name: name.clone(),
                        source,
                    })?;
                Ok((name, variable))
            })
            .collect::<Result<Variables, ValidationError>>()?;

        Ok(Self {
            paths,
            paths_auth_req,
            auth,
            header_override,
            global_headers,
            variables,
        })
    }
}

impl SiteMap {
    /// Paths every user may request.
    #[must_use]
    pub fn paths(&self) -> &[PathDefinition] {
        &self.paths
    }

    /// Paths only authenticated users may request.
    #[must_use]
    pub fn paths_auth_req(&self) -> &[PathDefinition] {
        &self.paths_auth_req
    }

    /// The authentication flow, present only when the site requires it.
    #[must_use]
    pub fn auth(&self) -> Option<&Auth> {
        self.auth.as_ref()
    }

    /// The path header override, present only when it has both patterns and
    /// headers.
    #[must_use]
    pub fn header_override(&self) -> Option<&HeaderOverride> {
        self.header_override.as_ref()
    }

    /// Headers sent with every request.
    #[must_use]
    pub fn global_headers(&self) -> &HeaderMap {
        &self.global_headers
    }

    /// Placeholder variables.
    #[must_use]
    pub fn variables(&self) -> &Variables {
        &self.variables
    }
}

#[cfg(test)]
pub(crate) mod test {
    use crate::config::SiteMapConfig;

    pub(crate) fn config(yaml: &str) -> SiteMapConfig {
        serde_yaml::from_str(yaml).expect("valid sitemap yaml")
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::{AuthStrategy, SiteMap, TrafficType, test::config};
    use crate::config::ValidationError;

    #[test]
    fn has_auth_without_auth_block_is_rejected() {
        let cfg = config("has_auth: true\npaths: []\n");
        assert!(matches!(
            SiteMap::try_from(cfg),
            Err(ValidationError::MissingAuth)
        ));
    }

    #[test]
    fn auth_block_is_discarded_without_has_auth() {
        let cfg = config(
            r"
has_auth: false
paths: []
auth:
  auth_type: 42
  credentials: not-a-map
",
        );
        let sitemap = SiteMap::try_from(cfg).expect("auth block ignored");
        assert!(sitemap.auth().is_none());
    }

    #[test]
    fn empty_auth_fields_are_rejected() {
        let cfg = config(
            r"
has_auth: true
paths: []
auth:
  auth_type: bearer
  auth_method: POST
  auth_path: ''
",
        );
        assert!(matches!(
            SiteMap::try_from(cfg),
            Err(ValidationError::EmptyAuthField("auth_path"))
        ));
    }

    #[test]
    fn auth_type_needs_its_credentials() {
        let cfg = config(
            r"
has_auth: true
paths: []
auth:
  auth_type: Body_Params
  auth_method: post
  auth_path: /login
  credentials:
    header:
      Authorization: Basic Zm9vOmJhcg==
",
        );
        assert!(matches!(
            SiteMap::try_from(cfg),
            Err(ValidationError::MissingCredential {
                auth_type: "body_params",
                ..
            })
        ));
    }

    #[test]
    fn unknown_auth_type_is_rejected() {
        let cfg = config(
            r"
has_auth: true
paths: []
auth:
  auth_type: kerberos
  auth_method: POST
  auth_path: /login
",
        );
        assert!(matches!(
            SiteMap::try_from(cfg),
            Err(ValidationError::UnknownAuthType(_))
        ));
    }

    #[test]
    fn full_sitemap_validates() {
        let cfg = config(
            r#"
has_auth: true
paths:
  - method: get
    paths: ["/products/@id"]
    traffic_type: WEB
paths_auth_req:
  - method: Post
    paths: ["/cart"]
    body: '{"item": "@id"}'
    traffic_type: api
auth:
  auth_type: basic
  auth_method: post
  auth_path: /login
  credentials:
    header:
      authorization: Basic Zm9vOmJhcg==
path_headers_override:
  paths: ["/products/@id"]
  headers:
    X-Product: "@id"
global_headers:
  X-Env: test
variables:
  id:
    type: RANGE
    value: [1, 9]
"#,
        );
        let sitemap = SiteMap::try_from(cfg).expect("valid");
        assert_eq!(sitemap.paths()[0].method, Method::GET);
        assert_eq!(sitemap.paths()[0].traffic, TrafficType::Web);
        assert_eq!(sitemap.paths_auth_req()[0].traffic, TrafficType::Api);
        let auth = sitemap.auth().expect("auth");
        assert_eq!(auth.method, Method::POST);
        assert!(matches!(auth.strategy, AuthStrategy::Basic { .. }));
        assert!(sitemap.header_override().is_some());
        assert_eq!(sitemap.global_headers()["x-env"], "test");
        assert!(sitemap.variables().get("id").is_some());
    }

    #[test]
    fn override_needs_paths_and_headers() {
        let cfg = config(
            r#"
has_auth: false
paths: []
path_headers_override:
  paths: ["/a"]
"#,
        );
        let sitemap = SiteMap::try_from(cfg).expect("valid");
        assert!(sitemap.header_override().is_none());
    }

    #[test]
    fn override_selects_first_matching_pattern() {
        let cfg = config(
            r#"
has_auth: false
paths: []
path_headers_override:
  paths: ["/users/@id", "/users/@name"]
  headers:
    X-Tier: gold
"#,
        );
        let sitemap = SiteMap::try_from(cfg).expect("valid");
        let header_override = sitemap.header_override().expect("override");
        let (pattern, headers) = header_override.select("/users/17").expect("matches");
        assert_eq!(pattern, "/users/@id");
        assert_eq!(headers[0].0.as_str(), "x-tier");
        assert!(header_override.select("/orders/17").is_none());
    }

    #[test]
    fn unsupported_method_and_traffic_type_are_rejected() {
        let cfg = config(
            r#"
has_auth: false
paths:
  - method: TRACE
    paths: ["/"]
    traffic_type: web
"#,
        );
        assert!(matches!(
            SiteMap::try_from(cfg),
            Err(ValidationError::UnknownMethod(_))
        ));

        let cfg = config(
            r#"
has_auth: false
paths:
  - method: GET
    paths: ["/"]
    traffic_type: grpc
"#,
        );
        assert!(matches!(
            SiteMap::try_from(cfg),
            Err(ValidationError::UnknownTrafficType(_))
        ));
    }

    #[test]
    fn path_definition_needs_templates() {
        let cfg = config(
            r"
has_auth: false
paths:
  - method: GET
    paths: []
    traffic_type: web
",
        );
        assert!(matches!(
            SiteMap::try_from(cfg),
            Err(ValidationError::NoPathTemplates { .. })
        ));
    }

    #[test]
    fn invalid_variables_are_rejected() {
        let cfg = config(
            r"
has_auth: false
paths: []
variables:
  ids:
    type: list
    value: []
",
        );
        assert!(matches!(
            SiteMap::try_from(cfg),
            Err(ValidationError::Variable { .. })
        ));

        let cfg = config(
            r"
has_auth: false
paths: []
variables:
  ids:
    type: set
    value: [1]
",
        );
        assert!(matches!(
            SiteMap::try_from(cfg),
            Err(ValidationError::UnknownVariableType { .. })
        ));
    }
}
