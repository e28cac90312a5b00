//! This module controls configuration parsing from the end user. What comes
//! in here is the raw, unvalidated shape of a start request. Validation
//! happens when these types are converted into [`crate::target::Target`] and
//! [`crate::sitemap::SiteMap`], crashes are most likely to originate there.
//!
//! Target configuration accepts both snake case field names and the
//! human-readable names of the traffic generator's control panel, for
//! instance `rate_limit` or `Rate Limit`.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::vars;

/// Errors produced when loading a [`StartRequest`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
}

/// Errors produced when a start request violates the invariants of a run.
#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    /// The target URL does not parse.
    #[error("Invalid target URL {url:?}: {source}")]
    InvalidUrl {
        /// The configured URL
        url: String,
        /// Underlying parse error
        #[source]
        source: url::ParseError,
    },
    /// The target URL is neither http nor https.
    #[error("Target URL {0:?} must use http or https")]
    UnsupportedScheme(String),
    /// The target URL carries no host.
    #[error("Target URL {0:?} has no host")]
    MissingHost(String),
    /// The DNS override is not an IP address.
    #[error("Invalid IP address provided for DNS override: {0:?}")]
    InvalidDnsOverride(String),
    /// Rate limit of zero admits no request at all.
    #[error("Rate limit must be at least 1")]
    ZeroRateLimit,
    /// Maximum session length of zero.
    #[error("Maximum session length must be at least 1 second")]
    ZeroSessionLength,
    /// Session bounds are reversed.
    #[error("Minimum session length {min}s exceeds maximum session length {max}s")]
    SessionBounds {
        /// Configured minimum
        min: u32,
        /// Configured maximum
        max: u32,
    },
    /// A header name is not a valid HTTP header name.
    #[error("Invalid header name {0:?}")]
    InvalidHeaderName(String),
    /// A header value is not a valid HTTP header value.
    #[error("Invalid value for header {0:?}")]
    InvalidHeaderValue(String),
    /// `has_auth` is set but no auth block was supplied.
    #[error("auth configuration object is required when has_auth is true")]
    MissingAuth,
    /// The auth block does not have the expected shape.
    #[error("Malformed auth configuration: {0}")]
    MalformedAuth(#[from] serde_json::Error),
    /// A mandatory auth field is empty.
    #[error("{0} is required and cannot be empty when has_auth is true")]
    EmptyAuthField(&'static str),
    /// The auth type is not one of the supported strategies.
    #[error("auth_type must be one of basic, bearer, body_params, json_body, query_params, custom_header, got {0:?}")]
    UnknownAuthType(String),
    /// The credentials lack what the auth type needs.
    #[error("auth_type {auth_type} requires credentials.{field}")]
    MissingCredential {
        /// The configured auth type
        auth_type: &'static str,
        /// The missing credential field
        field: &'static str,
    },
    /// HTTP method outside the supported set.
    #[error("method must be one of GET, POST, PUT, DELETE, HEAD, PATCH, OPTIONS, got {0:?}")]
    UnknownMethod(String),
    /// Traffic type outside the supported set.
    #[error("traffic_type must be either 'web' or 'api', got {0:?}")]
    UnknownTrafficType(String),
    /// A path definition without templates can never be requested.
    #[error("Path definition {method} has no path templates")]
    NoPathTemplates {
        /// The definition's method
        method: String,
    },
    /// Variable type outside the supported set.
    #[error("Variable type for {name} must be one of list, range, got {kind:?}")]
    UnknownVariableType {
        /// Variable name
        name: String,
        /// Declared type
        kind: String,
    },
    /// A variable definition cannot resolve.
    #[error("Invalid variable {name}: {source}")]
    Variable {
        /// Variable name
        name: String,
        /// Underlying resolution error
        #[source]
        source: vars::Error,
    },
}

/// A full start request: where to send traffic and what traffic to send.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StartRequest {
    /// Target and load parameters
    pub config: TargetConfig,
    /// Paths, authentication and variables
    pub sitemap: SiteMapConfig,
}

impl StartRequest {
    /// Parse a start request from YAML. JSON documents are accepted too.
    ///
    /// # Errors
    ///
    /// Returns an error if `contents` does not deserialize.
    pub fn from_yaml_str(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Read and parse a start request from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not deserialize.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        Self::from_yaml_str(&contents)
    }
}

fn default_stop_timeout_seconds() -> u64 {
    10
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Target and load parameters of a run.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TargetConfig {
    /// The URL traffic is sent to
    #[serde(alias = "Traffic Generator URL")]
    pub traffic_target_url: String,
    /// IP address to connect to in place of resolving the target host. An
    /// empty string is the same as no override.
    #[serde(
        default,
        alias = "Traffic Generator DNS Override",
        deserialize_with = "empty_as_none"
    )]
    pub traffic_target_dns_override: Option<String>,
    /// Header carrying each simulated user's address
    #[serde(alias = "XFF Header Name")]
    pub xff_header_name: String,
    /// Maximum number of requests in flight across all users
    #[serde(alias = "Rate Limit")]
    pub rate_limit: u32,
    /// Number of simulated users
    #[serde(alias = "Simulated Users")]
    pub sim_users: u32,
    /// Shortest session, in seconds
    #[serde(alias = "Minimum Session Length")]
    pub min_session_length: u32,
    /// Longest session, in seconds
    #[serde(alias = "Maximum Session Length")]
    pub max_session_length: u32,
    /// Enable debug logging. Read when the binary installs its log filter,
    /// a generation itself ignores it.
    #[serde(default, alias = "Debug")]
    pub debug: bool,
    /// The seed for random operations of the run
    #[serde(default)]
    pub seed: Option<[u8; 32]>,
    /// Time allowed for the run's tasks to wind down on stop
    #[serde(default = "default_stop_timeout_seconds")]
    pub stop_timeout_seconds: u64,
}

/// The declared shape of the target site.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SiteMapConfig {
    /// Whether the site requires authentication
    pub has_auth: bool,
    /// Paths every user may request
    pub paths: Vec<PathConfig>,
    /// Paths only authenticated users may request
    #[serde(default)]
    pub paths_auth_req: Option<Vec<PathConfig>>,
    /// Authentication flow. Left as a raw value: it is only interpreted when
    /// `has_auth` is set.
    #[serde(default)]
    pub auth: Option<Value>,
    /// Extra headers for requests to matching paths
    #[serde(default)]
    pub path_headers_override: Option<HeaderOverrideConfig>,
    /// Headers sent with every request
    #[serde(default)]
    pub global_headers: FxHashMap<String, String>,
    /// Placeholder variables
    #[serde(default)]
    pub variables: FxHashMap<String, VariableDefinition>,
}

/// A family of requests sharing a method, body and traffic type.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PathConfig {
    /// HTTP method, case-insensitive
    pub method: String,
    /// Path templates, one chosen per request
    pub paths: Vec<String>,
    /// Body template
    #[serde(default)]
    pub body: Option<String>,
    /// `web` or `api`, case-insensitive
    pub traffic_type: String,
}

/// How simulated users authenticate.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// HTTP method of the authentication request
    #[serde(default)]
    pub auth_method: String,
    /// Path template of the authentication request
    #[serde(default)]
    pub auth_path: String,
    /// Credential presentation strategy
    #[serde(default)]
    pub auth_type: String,
    /// Credential material
    #[serde(default)]
    pub credentials: Credentials,
}

/// Credential material for every authentication strategy.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Credentials {
    /// Headers, `Authorization` for basic and bearer
    #[serde(default)]
    pub header: Option<FxHashMap<String, String>>,
    /// Username and password pair
    #[serde(default)]
    pub body_params: Option<FormData>,
    /// Arbitrary JSON body
    #[serde(default)]
    pub json_body: Option<Value>,
}

/// A username and password pair.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FormData {
    /// Username template
    #[serde(default)]
    pub username: Option<String>,
    /// Password template
    #[serde(default)]
    pub password: Option<String>,
}

/// Headers applied to requests whose path matches one of `paths`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct HeaderOverrideConfig {
    /// Path patterns, `@name` segments match any segment
    #[serde(default)]
    pub paths: Option<Vec<String>>,
    /// Header templates
    #[serde(default)]
    pub headers: Option<FxHashMap<String, String>>,
}

/// A declared placeholder variable.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VariableDefinition {
    /// `list` or `range`, case-insensitive
    #[serde(rename = "type")]
    pub kind: String,
    /// List members, or the two range bounds
    pub value: Vec<Value>,
}
