//! Event envelope, qualified event names and registration patterns.
//!
//! A delivery is identified by a base event name (`issues`) sent out-of-band in
//! a header, and an optional `action` field inside the payload (`opened`).
//! Together they form the qualified name `issues.opened` that handlers are
//! matched against.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::auth::InstallationId;
use crate::error::{PayloadError, ValidationError};

// ============================================================================
// Event Names
// ============================================================================

/// Qualified event name: a base event with an optional action.
///
/// Parsing splits on the first `.`; a name without a dot, or with an empty
/// action, has no action.
///
/// # Examples
///
/// ```
/// use octoflow::webhook::EventName;
///
/// let name: EventName = "issues.opened".parse().unwrap();
/// assert_eq!(name.base(), "issues");
/// assert_eq!(name.action(), Some("opened"));
/// assert_eq!(name.to_string(), "issues.opened");
///
/// let base: EventName = "push".parse().unwrap();
/// assert_eq!(base.action(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventName {
    base: String,
    action: Option<String>,
}

impl EventName {
    /// Build a name from its parts. An empty action is treated as absent.
    pub fn new(base: impl Into<String>, action: Option<&str>) -> Self {
        Self {
            base: base.into(),
            action: action.filter(|a| !a.is_empty()).map(str::to_string),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// The base event alone, without the action.
    pub fn base_name(&self) -> EventName {
        Self::new(self.base.clone(), None)
    }

    /// Whether a handler registered under `self` should receive an event named `event`.
    ///
    /// A base-only name matches every action of that base; a qualified name
    /// matches only the same action.
    pub fn matches(&self, event: &EventName) -> bool {
        self.base == event.base
            && match &self.action {
                None => true,
                Some(action) => event.action.as_deref() == Some(action.as_str()),
            }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            Some(action) => write!(f, "{}.{}", self.base, action),
            None => write!(f, "{}", self.base),
        }
    }
}

impl FromStr for EventName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (base, action) = match s.split_once('.') {
            Some((base, action)) => (base, Some(action)),
            None => (s, None),
        };

        if base.is_empty() {
            return Err(ValidationError::InvalidFormat {
                field: "event_name".to_string(),
                message: format!("'{}' has an empty base event name", s),
            });
        }

        Ok(Self::new(base, action))
    }
}

/// What a handler registration listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventPattern {
    /// A base event (`issues`) or a qualified one (`issues.opened`).
    Event(EventName),

    /// Every event.
    Any,
}

impl EventPattern {
    /// The wildcard token accepted by [`EventPattern::from_str`].
    pub const WILDCARD: &'static str = "*";

    pub fn matches(&self, event: &EventName) -> bool {
        match self {
            Self::Event(name) => name.matches(event),
            Self::Any => true,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(name) => write!(f, "{}", name),
            Self::Any => write!(f, "{}", Self::WILDCARD),
        }
    }
}

impl FromStr for EventPattern {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim() == Self::WILDCARD {
            return Ok(Self::Any);
        }
        s.parse().map(Self::Event)
    }
}

impl From<EventName> for EventPattern {
    fn from(name: EventName) -> Self {
        Self::Event(name)
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Owner of a repository referenced by a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadOwner {
    #[serde(default)]
    pub login: String,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Repository referenced by a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadRepository {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub full_name: Option<String>,

    #[serde(default)]
    pub owner: Option<PayloadOwner>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Installation referenced by a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadInstallation {
    pub id: InstallationId,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Webhook payload.
///
/// Only the fields the framework relies on are typed; everything else is kept
/// in `extra` for handlers to read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub action: Option<String>,

    #[serde(default)]
    pub repository: Option<PayloadRepository>,

    #[serde(default)]
    pub installation: Option<PayloadInstallation>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WebhookPayload {
    /// Look up an untyped top-level field (`issue`, `pull_request`, `sender`, ...).
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }
}

// ============================================================================
// Event Envelope
// ============================================================================

/// One webhook delivery, parsed.
///
/// Created per delivery and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Delivery identifier, used for logging only.
    pub id: String,

    /// Base event name from the transport.
    pub name: String,

    pub payload: WebhookPayload,
}

impl EventEnvelope {
    /// Build an envelope from transport fields and a raw JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::MissingField`] when `name` or `id` is empty, and
    /// [`PayloadError::InvalidJson`] when the body is not a JSON object.
    pub fn parse(id: &str, name: &str, body: &[u8]) -> Result<Self, PayloadError> {
        let payload = serde_json::from_slice::<WebhookPayload>(body)?;
        Self::new(id, name, payload)
    }

    /// Build an envelope from an already-decoded payload.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        payload: WebhookPayload,
    ) -> Result<Self, PayloadError> {
        let id = id.into();
        let name = name.into();

        if name.trim().is_empty() {
            return Err(PayloadError::MissingField {
                field: "name".to_string(),
            });
        }
        if id.trim().is_empty() {
            return Err(PayloadError::MissingField {
                field: "id".to_string(),
            });
        }

        Ok(Self { id, name, payload })
    }

    /// Qualified event name: `name.action` when the payload has an action.
    pub fn qualified_name(&self) -> EventName {
        EventName::new(self.name.clone(), self.payload.action.as_deref())
    }

    pub fn installation_id(&self) -> Option<InstallationId> {
        self.payload.installation.as_ref().map(|i| i.id)
    }

    pub fn repository_full_name(&self) -> Option<&str> {
        self.payload
            .repository
            .as_ref()
            .and_then(|r| r.full_name.as_deref())
    }

    /// Fields identifying this event in logs.
    pub fn log_context(&self) -> EventLogContext {
        EventLogContext {
            id: self.id.clone(),
            name: self.qualified_name().to_string(),
            repository: self.repository_full_name().map(str::to_string),
            installation: self.installation_id(),
        }
    }
}

/// Compact, loggable description of an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLogContext {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installation: Option<InstallationId>,
}

// ============================================================================
// Raw Delivery
// ============================================================================

/// Raw webhook delivery as handed over by the transport shell.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub id: Option<String>,
    pub name: Option<String>,

    /// `X-Hub-Signature-256` value (`sha256=<hex>`).
    pub signature: Option<String>,

    /// Legacy `X-Hub-Signature` value (`sha1=<hex>`), consulted only when
    /// `signature` is absent.
    pub legacy_signature: Option<String>,

    pub body: Bytes,
}

impl WebhookDelivery {
    pub const EVENT_HEADER: &'static str = "x-github-event";
    pub const DELIVERY_HEADER: &'static str = "x-github-delivery";
    pub const SIGNATURE_256_HEADER: &'static str = "x-hub-signature-256";
    pub const SIGNATURE_HEADER: &'static str = "x-hub-signature";

    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        signature: Option<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            signature,
            legacy_signature: None,
            body: body.into(),
        }
    }

    /// Attach a legacy `X-Hub-Signature` value.
    pub fn with_legacy_signature(mut self, signature: impl Into<String>) -> Self {
        self.legacy_signature = Some(signature.into());
        self
    }

    /// Extract delivery fields from HTTP headers (matched case-insensitively).
    ///
    /// Both signature headers are kept apart so each is only ever verified
    /// with its own algorithm.
    pub fn from_headers<'a, I>(headers: I, body: impl Into<Bytes>) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let headers: HashMap<String, &str> = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        let header = |name: &str| headers.get(name).map(|v| v.to_string());

        Self {
            id: header(Self::DELIVERY_HEADER),
            name: header(Self::EVENT_HEADER),
            signature: header(Self::SIGNATURE_256_HEADER),
            legacy_signature: header(Self::SIGNATURE_HEADER),
            body: body.into(),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
