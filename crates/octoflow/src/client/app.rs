//! GitHub App metadata types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Owner of a GitHub App (user or organization).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppOwner {
    pub login: String,

    #[serde(default)]
    pub id: Option<u64>,

    #[serde(rename = "type", default)]
    pub owner_type: Option<String>,
}

/// GitHub App metadata.
///
/// Represents the authenticated app as returned by the `/app` endpoint.
/// `events` lists the base event names the app is subscribed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    /// Unique numeric identifier for the GitHub App
    pub id: u64,

    /// URL-friendly string identifier for the app
    #[serde(default)]
    pub slug: Option<String>,

    /// Display name of the GitHub App
    pub name: String,

    #[serde(default)]
    pub owner: Option<AppOwner>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub html_url: Option<String>,

    /// Base event names the app receives deliveries for
    #[serde(default)]
    pub events: Vec<String>,

    #[serde(default)]
    pub permissions: HashMap<String, String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
