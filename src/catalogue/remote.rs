//! Remote catalogue interface.
//!
//! The live catalogue is an external collaborator; the store only sees
//! [`RemoteCatalogue`]. The closed set of implementations: the HTTP client
//! (feature `online-catalogue`), an offline mock, and a fault-injecting
//! stub. Remote calls are spaced by [`MinIntervalGate`] so a burst of
//! unresolved names cannot hammer the upstream API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::CardLayout;
use crate::error::{Result, ServiceError};

/// A card record as the remote catalogue reports it.
#[derive(Debug, Clone)]
pub struct RemoteCard {
    pub name: String,
    pub id: Option<String>,
    pub layout: CardLayout,
    pub faces: Vec<String>,
}

#[async_trait]
pub trait RemoteCatalogue: Send + Sync {
    /// Fuzzy-resolve one name. `Ok(None)` means the remote answered but has
    /// no match; errors mean the remote itself failed.
    async fn resolve(&self, name: &str) -> Result<Option<RemoteCard>>;

    /// Prefix/approximate suggestions for a name.
    async fn autocomplete(&self, name: &str) -> Result<Vec<String>>;
}

/// Enforces a minimum spacing between consecutive remote calls.
pub struct MinIntervalGate {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl MinIntervalGate {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval: Duration::from_millis(min_interval_ms),
            last_call: Mutex::new(None),
        }
    }

    /// Wait until the interval since the previous call has elapsed, then
    /// claim the slot.
    pub async fn permit(&self) {
        let wait = {
            let mut last = self.last_call.lock().unwrap_or_else(|p| p.into_inner());
            let now = Instant::now();
            let wait = match *last {
                Some(prev) => self
                    .min_interval
                    .checked_sub(now.duration_since(prev))
                    .unwrap_or(Duration::ZERO),
                None => Duration::ZERO,
            };
            *last = Some(now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Offline mock with a fixed card table.
#[derive(Default)]
pub struct MockRemote {
    cards: HashMap<String, RemoteCard>,
    suggestions: Vec<String>,
    resolve_calls: AtomicUsize,
    autocomplete_calls: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_card(mut self, lookup: &str, card: RemoteCard) -> Self {
        self.cards.insert(lookup.to_lowercase(), card);
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::Relaxed)
    }

    pub fn autocomplete_calls(&self) -> usize {
        self.autocomplete_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RemoteCatalogue for MockRemote {
    async fn resolve(&self, name: &str) -> Result<Option<RemoteCard>> {
        self.resolve_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.cards.get(&name.to_lowercase()).cloned())
    }

    async fn autocomplete(&self, name: &str) -> Result<Vec<String>> {
        self.autocomplete_calls.fetch_add(1, Ordering::Relaxed);
        let needle = name.to_lowercase();
        Ok(self
            .suggestions
            .iter()
            .filter(|s| s.to_lowercase().contains(&needle) || needle.is_empty())
            .cloned()
            .collect())
    }
}

/// Always fails; drives the degraded-path tests.
pub struct FaultyRemote;

#[async_trait]
impl RemoteCatalogue for FaultyRemote {
    async fn resolve(&self, _name: &str) -> Result<Option<RemoteCard>> {
        Err(ServiceError::ExternalService(
            "injected remote catalogue fault".to_string(),
        ))
    }

    async fn autocomplete(&self, _name: &str) -> Result<Vec<String>> {
        Err(ServiceError::ExternalService(
            "injected remote catalogue fault".to_string(),
        ))
    }
}

#[cfg(feature = "online-catalogue")]
pub mod http {
    use super::*;
    use serde::Deserialize;

    /// HTTP client against a Scryfall-shaped API.
    pub struct HttpCatalogue {
        client: reqwest::Client,
        base_url: String,
    }

    #[derive(Deserialize)]
    struct NamedCardBody {
        name: String,
        id: Option<String>,
        #[serde(default)]
        layout: Option<String>,
        #[serde(default)]
        card_faces: Vec<FaceBody>,
    }

    #[derive(Deserialize)]
    struct FaceBody {
        name: String,
    }

    #[derive(Deserialize)]
    struct AutocompleteBody {
        #[serde(default)]
        data: Vec<String>,
    }

    impl HttpCatalogue {
        pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| ServiceError::ExternalService(e.to_string()))?;
            Ok(Self {
                client,
                base_url: base_url.into(),
            })
        }
    }

    #[async_trait]
    impl RemoteCatalogue for HttpCatalogue {
        async fn resolve(&self, name: &str) -> Result<Option<RemoteCard>> {
            let url = format!("{}/cards/named", self.base_url);
            let response = self
                .client
                .get(&url)
                .query(&[("fuzzy", name)])
                .send()
                .await
                .map_err(|e| ServiceError::ExternalService(e.to_string()))?;
            if response.status().as_u16() == 404 {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(ServiceError::ExternalService(format!(
                    "catalogue API status {}",
                    response.status()
                )));
            }
            let body: NamedCardBody = response
                .json()
                .await
                .map_err(|e| ServiceError::ExternalService(e.to_string()))?;
            Ok(Some(RemoteCard {
                name: body.name,
                id: body.id,
                layout: body
                    .layout
                    .as_deref()
                    .map(CardLayout::from_tag)
                    .unwrap_or(CardLayout::Normal),
                faces: body.card_faces.into_iter().map(|f| f.name).collect(),
            }))
        }

        async fn autocomplete(&self, name: &str) -> Result<Vec<String>> {
            let url = format!("{}/cards/autocomplete", self.base_url);
            let response = self
                .client
                .get(&url)
                .query(&[("q", name)])
                .send()
                .await
                .map_err(|e| ServiceError::ExternalService(e.to_string()))?;
            if !response.status().is_success() {
                return Err(ServiceError::ExternalService(format!(
                    "catalogue API status {}",
                    response.status()
                )));
            }
            let body: AutocompleteBody = response
                .json()
                .await
                .map_err(|e| ServiceError::ExternalService(e.to_string()))?;
            Ok(body.data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gate_spaces_consecutive_calls() {
        let gate = MinIntervalGate::new(30);
        let start = Instant::now();
        gate.permit().await;
        gate.permit().await;
        gate.permit().await;
        // Two spacings of ~30ms each.
        assert!(start.elapsed() >= Duration::from_millis(55));
    }

    #[tokio::test]
    async fn mock_resolves_case_insensitively() {
        let remote = MockRemote::new().with_card(
            "lightning bolt",
            RemoteCard {
                name: "Lightning Bolt".to_string(),
                id: Some("clb-1".to_string()),
                layout: CardLayout::Normal,
                faces: Vec::new(),
            },
        );
        let card = remote.resolve("LIGHTNING BOLT").await.unwrap().unwrap();
        assert_eq!(card.name, "Lightning Bolt");
        assert_eq!(remote.resolve_calls(), 1);
    }

    #[tokio::test]
    async fn faulty_remote_reports_external_errors() {
        let err = FaultyRemote.resolve("anything").await.unwrap_err();
        assert_eq!(err.code(), "EXTERNAL_SERVICE_ERROR");
    }
}
