//! Engine kinds and their validated connection configuration.
//!
//! Parameter maps arrive untyped from the credential store. Each engine kind
//! declares its argument catalogue; [`ConnectionConfig::from_params`] rejects
//! unknown keys, checks types, and fills defaults before anything touches
//! the network.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde_json::{json, Value as Json};

use crate::error::{HandlerError, HandlerResult};

/// Untyped connection parameters as supplied by the credential store.
pub type ParameterMap = BTreeMap<String, Json>;

/// Closed set of external systems a connection can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EngineKind {
    FinancialAggregator,
    CalendarService,
    NewSqlDatabase,
}

impl EngineKind {
    pub const ALL: [EngineKind; 3] = [
        EngineKind::FinancialAggregator,
        EngineKind::CalendarService,
        EngineKind::NewSqlDatabase,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FinancialAggregator => "financial-aggregator",
            Self::CalendarService => "calendar-service",
            Self::NewSqlDatabase => "newsql-database",
        }
    }

    /// Argument catalogue for this engine kind, in presentation order.
    pub fn connection_args(self) -> &'static [ConnectionArg] {
        match self {
            Self::FinancialAggregator => FINANCIAL_ARGS,
            Self::CalendarService => CALENDAR_ARGS,
            Self::NewSqlDatabase => NEWSQL_ARGS,
        }
    }

    /// A parameter set that passes validation, for documentation and CLI help.
    pub fn example_params(self) -> ParameterMap {
        let example = match self {
            Self::FinancialAggregator => json!({
                "client_id": "5f3c2b...",
                "secret": "a1b2c3...",
                "access_token": "access-sandbox-8ab9...",
                "environment": "sandbox",
            }),
            Self::CalendarService => json!({
                "credentials_file": "/etc/conduit/calendar-token.json",
                "calendar_id": "primary",
            }),
            Self::NewSqlDatabase => json!({
                "url": "http://127.0.0.1:8765",
                "autocommit": true,
            }),
        };
        match example {
            Json::Object(map) => map.into_iter().collect(),
            _ => ParameterMap::new(),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = HandlerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "financial-aggregator" | "financial" | "plaid" => Ok(Self::FinancialAggregator),
            "calendar-service" | "calendar" | "google-calendar" => Ok(Self::CalendarService),
            "newsql-database" | "newsql" | "phoenix" => Ok(Self::NewSqlDatabase),
            other => Err(HandlerError::configuration(format!(
                "unknown engine kind '{other}'"
            ))),
        }
    }
}

/// Declared type of one connection argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Str,
    Int,
    Bool,
    Path,
    Url,
    Secret,
}

impl ArgType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Path => "path",
            Self::Url => "url",
            Self::Secret => "secret",
        }
    }
}

/// One entry of an engine kind's argument catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionArg {
    pub name: &'static str,
    pub arg_type: ArgType,
    pub required: bool,
    pub description: &'static str,
}

const fn arg(
    name: &'static str,
    arg_type: ArgType,
    required: bool,
    description: &'static str,
) -> ConnectionArg {
    ConnectionArg {
        name,
        arg_type,
        required,
        description,
    }
}

static FINANCIAL_ARGS: &[ConnectionArg] = &[
    arg("client_id", ArgType::Str, true, "Client identifier issued by the aggregator."),
    arg("secret", ArgType::Secret, true, "Client secret issued by the aggregator."),
    arg("access_token", ArgType::Secret, true, "Item access token for the linked institution."),
    arg(
        "environment",
        ArgType::Str,
        false,
        "One of sandbox, development, production. Defaults to sandbox.",
    ),
    arg("base_url", ArgType::Url, false, "Overrides the environment's API host."),
];

static CALENDAR_ARGS: &[ConnectionArg] = &[
    arg(
        "access_token",
        ArgType::Secret,
        false,
        "OAuth bearer token. Either this or credentials_file is required.",
    ),
    arg(
        "credentials_file",
        ArgType::Path,
        false,
        "JSON file holding an access_token, read once on connect.",
    ),
    arg("calendar_id", ArgType::Str, false, "Calendar to expose. Defaults to primary."),
    arg("base_url", ArgType::Url, false, "Overrides the calendar API root."),
];

static NEWSQL_ARGS: &[ConnectionArg] = &[
    arg("url", ArgType::Url, true, "The URL of the query server."),
    arg(
        "max_retries",
        ArgType::Int,
        false,
        "Maximum retries of the connection handshake on a connection error.",
    ),
    arg(
        "autocommit",
        ArgType::Bool,
        false,
        "Switches the connection to autocommit mode. Without it every DML statement is followed by a commit.",
    ),
    arg(
        "auth",
        ArgType::Str,
        false,
        "Authentication mechanism; alias of authentication.",
    ),
    arg(
        "authentication",
        ArgType::Str,
        false,
        "Authentication mechanism mimicking the JDBC driver: NONE, BASIC, DIGEST, SPNEGO.",
    ),
    arg("avatica_user", ArgType::Str, false, "User name for BASIC or DIGEST authentication."),
    arg(
        "avatica_password",
        ArgType::Secret,
        false,
        "Password for BASIC or DIGEST authentication.",
    ),
    arg(
        "user",
        ArgType::Str,
        false,
        "Alias of avatica_user for BASIC or DIGEST; the impersonated user otherwise.",
    ),
    arg("password", ArgType::Secret, false, "Alias of avatica_password."),
];

/// Aggregator deployment tier, which selects the API host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinancialEnvironment {
    Sandbox,
    Development,
    Production,
}

impl FinancialEnvironment {
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Sandbox => "https://sandbox.plaid.com",
            Self::Development => "https://development.plaid.com",
            Self::Production => "https://production.plaid.com",
        }
    }
}

impl FromStr for FinancialEnvironment {
    type Err = HandlerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(HandlerError::configuration(format!(
                "environment must be sandbox, development or production, got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinancialConfig {
    pub client_id: String,
    pub secret: String,
    pub access_token: String,
    pub environment: FinancialEnvironment,
    pub base_url: String,
}

/// Where the calendar bearer token comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum CalendarToken {
    Inline(String),
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarConfig {
    pub token: CalendarToken,
    pub calendar_id: String,
    pub base_url: String,
}

pub const DEFAULT_CALENDAR_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

/// Authentication mechanism of the query server.
#[derive(Debug, Clone, PartialEq)]
pub enum NewSqlAuth {
    /// No credentials; `do_as` impersonates a user when set.
    None { do_as: Option<String> },
    Basic { user: String, password: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSqlConfig {
    pub url: String,
    pub max_retries: u32,
    pub autocommit: bool,
    pub auth: NewSqlAuth,
}

pub const DEFAULT_NEWSQL_MAX_RETRIES: u32 = 3;

/// Validated, engine-kind-indexed connection configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionConfig {
    Financial(FinancialConfig),
    Calendar(CalendarConfig),
    NewSql(NewSqlConfig),
}

impl ConnectionConfig {
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Financial(_) => EngineKind::FinancialAggregator,
            Self::Calendar(_) => EngineKind::CalendarService,
            Self::NewSql(_) => EngineKind::NewSqlDatabase,
        }
    }

    /// Validates `params` against the catalogue of `kind`.
    pub fn from_params(kind: EngineKind, params: &ParameterMap) -> HandlerResult<Self> {
        let reader = ParamReader::new(kind, params)?;
        match kind {
            EngineKind::FinancialAggregator => {
                let environment = match reader.string("environment")? {
                    Some(raw) => raw.parse()?,
                    None => FinancialEnvironment::Sandbox,
                };
                let base_url = reader
                    .string("base_url")?
                    .unwrap_or_else(|| environment.base_url().to_string());
                Ok(Self::Financial(FinancialConfig {
                    client_id: reader.required_string("client_id")?,
                    secret: reader.required_string("secret")?,
                    access_token: reader.required_string("access_token")?,
                    environment,
                    base_url: trim_base(base_url),
                }))
            }
            EngineKind::CalendarService => {
                let token = match (
                    reader.string("access_token")?,
                    reader.string("credentials_file")?,
                ) {
                    (Some(token), _) => CalendarToken::Inline(token),
                    (None, Some(path)) => CalendarToken::File(PathBuf::from(path)),
                    (None, None) => {
                        return Err(HandlerError::configuration(
                            "calendar-service requires access_token or credentials_file",
                        ))
                    }
                };
                Ok(Self::Calendar(CalendarConfig {
                    token,
                    calendar_id: reader
                        .string("calendar_id")?
                        .unwrap_or_else(|| "primary".to_string()),
                    base_url: trim_base(
                        reader
                            .string("base_url")?
                            .unwrap_or_else(|| DEFAULT_CALENDAR_BASE_URL.to_string()),
                    ),
                }))
            }
            EngineKind::NewSqlDatabase => {
                let url = reader.required_string("url")?;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(HandlerError::configuration(format!(
                        "url must be an http(s) URL, got '{url}'"
                    )));
                }
                let max_retries = match reader.int("max_retries")? {
                    Some(value) => u32::try_from(value).map_err(|_| {
                        HandlerError::configuration("max_retries must be a non-negative integer")
                    })?,
                    None => DEFAULT_NEWSQL_MAX_RETRIES,
                };
                let mechanism = reader
                    .string("authentication")?
                    .or(reader.string("auth")?)
                    .unwrap_or_else(|| "NONE".to_string())
                    .to_ascii_uppercase();
                let user = reader.string("avatica_user")?.or(reader.string("user")?);
                let password = reader
                    .string("avatica_password")?
                    .or(reader.string("password")?);
                let auth = match mechanism.as_str() {
                    "NONE" => NewSqlAuth::None {
                        do_as: reader.string("user")?,
                    },
                    "BASIC" => match (user, password) {
                        (Some(user), Some(password)) => NewSqlAuth::Basic { user, password },
                        _ => {
                            return Err(HandlerError::configuration(
                                "BASIC authentication requires avatica_user and avatica_password",
                            ))
                        }
                    },
                    "DIGEST" | "SPNEGO" => {
                        return Err(HandlerError::configuration(format!(
                            "authentication mechanism {mechanism} is not supported"
                        )))
                    }
                    other => {
                        return Err(HandlerError::configuration(format!(
                            "unknown authentication mechanism '{other}'"
                        )))
                    }
                };
                Ok(Self::NewSql(NewSqlConfig {
                    url: trim_base(url),
                    max_retries,
                    autocommit: reader.boolean("autocommit")?.unwrap_or(false),
                    auth,
                }))
            }
        }
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Typed access to a parameter map already checked against a catalogue.
struct ParamReader<'a> {
    kind: EngineKind,
    params: &'a ParameterMap,
}

impl<'a> ParamReader<'a> {
    fn new(kind: EngineKind, params: &'a ParameterMap) -> HandlerResult<Self> {
        let catalogue = kind.connection_args();
        if let Some(unknown) = params
            .keys()
            .find(|key| !catalogue.iter().any(|arg| arg.name == key.as_str()))
        {
            return Err(HandlerError::configuration(format!(
                "unknown parameter '{unknown}' for {kind}"
            )));
        }
        Ok(Self { kind, params })
    }

    /// Returns a present, non-null parameter.
    fn get(&self, name: &str) -> Option<&'a Json> {
        self.params.get(name).filter(|value| !value.is_null())
    }

    fn string(&self, name: &str) -> HandlerResult<Option<String>> {
        match self.get(name) {
            None => Ok(None),
            Some(Json::String(text)) if text.trim().is_empty() => Ok(None),
            Some(Json::String(text)) => Ok(Some(text.clone())),
            Some(Json::Number(number)) => Ok(Some(number.to_string())),
            Some(_) => Err(self.type_error(name, "a string")),
        }
    }

    fn required_string(&self, name: &str) -> HandlerResult<String> {
        self.string(name)?.ok_or_else(|| {
            HandlerError::configuration(format!(
                "missing required parameter '{name}' for {}",
                self.kind
            ))
        })
    }

    fn int(&self, name: &str) -> HandlerResult<Option<i64>> {
        match self.get(name) {
            None => Ok(None),
            Some(Json::Number(number)) => number
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.type_error(name, "an integer")),
            Some(Json::String(text)) => text
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| self.type_error(name, "an integer")),
            Some(_) => Err(self.type_error(name, "an integer")),
        }
    }

    fn boolean(&self, name: &str) -> HandlerResult<Option<bool>> {
        match self.get(name) {
            None => Ok(None),
            Some(Json::Bool(flag)) => Ok(Some(*flag)),
            Some(Json::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Some(true)),
                "false" | "0" | "no" => Ok(Some(false)),
                _ => Err(self.type_error(name, "a boolean")),
            },
            Some(_) => Err(self.type_error(name, "a boolean")),
        }
    }

    fn type_error(&self, name: &str, expected: &str) -> HandlerError {
        HandlerError::configuration(format!(
            "parameter '{name}' for {} must be {expected}",
            self.kind
        ))
    }
}
