//! Catalogue enrichment of parsed decks.
//!
//! For each parsed entry the resolver gathers local fuzzy candidates
//! (cached two hours in the `fuzzy` layer), optionally runs the full
//! catalogue resolve (cached a day in the `scryfall` layer), merges the
//! candidate lists, and rewrites the entry name to the canonical spelling.
//! Corpus-wide scoring is CPU-bound, so it runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{hash_subkey, CacheStore};
use crate::catalogue::{Candidate, CatalogueStore, Resolution};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::parser::{CardEntry, ParsedDeck};

const FUZZY_TTL: Duration = Duration::from_secs(2 * 3600);
const RESOLVE_TTL: Duration = Duration::from_secs(24 * 3600);

/// A resolved entry carrying the canonical name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCard {
    pub quantity: u32,
    pub name: String,
    #[serde(default)]
    pub catalogue_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDeck {
    pub main: Vec<NormalizedCard>,
    pub side: Vec<NormalizedCard>,
}

impl NormalizedDeck {
    pub fn main_units(&self) -> u32 {
        self.main.iter().map(|c| c.quantity).sum()
    }

    pub fn side_units(&self) -> u32 {
        self.side.iter().map(|c| c.quantity).sum()
    }
}

pub struct Resolver {
    catalogue: Arc<CatalogueStore>,
    cache: Arc<CacheStore>,
}

impl Resolver {
    pub fn new(catalogue: Arc<CatalogueStore>, cache: Arc<CacheStore>) -> Self {
        Self { catalogue, cache }
    }

    /// Enrich every entry with candidates and canonical names.
    pub async fn enrich(&self, deck: ParsedDeck, config: &PipelineConfig) -> Result<ParsedDeck> {
        let main = self.enrich_entries(deck.main, config).await?;
        let side = self.enrich_entries(deck.side, config).await?;
        Ok(ParsedDeck { main, side })
    }

    async fn enrich_entries(
        &self,
        entries: Vec<CardEntry>,
        config: &PipelineConfig,
    ) -> Result<Vec<CardEntry>> {
        let mut enriched = Vec::with_capacity(entries.len());
        for entry in entries {
            let local = self.local_candidates(&entry.name, config.fuzzy_top_k).await?;

            let (canonical, remote_candidates) = if config.always_verify_catalogue {
                let resolution = self.full_resolve(&entry.name, config.fuzzy_top_k).await;
                (resolution.canonical_name, resolution.candidates)
            } else {
                (entry.name.clone(), Vec::new())
            };

            let candidates = merge_candidates(local, remote_candidates);
            enriched.push(CardEntry {
                quantity: entry.quantity,
                name: canonical,
                candidates,
            });
        }
        Ok(enriched)
    }

    async fn local_candidates(&self, raw_name: &str, top_k: usize) -> Result<Vec<Candidate>> {
        let key = format!("fuzzy:{}", hash_subkey(&raw_name.to_lowercase()));
        if let Some(cached) = self.cache.get_json::<Vec<Candidate>>(&key).await {
            return Ok(cached);
        }

        let catalogue = self.catalogue.clone();
        let name = raw_name.to_string();
        let candidates = tokio::task::spawn_blocking(move || catalogue.local_candidates(&name, top_k))
            .await
            .map_err(|e| crate::error::ServiceError::Internal(e.to_string()))?;

        self.cache.set_json(&key, &candidates, Some(FUZZY_TTL)).await;
        Ok(candidates)
    }

    async fn full_resolve(&self, raw_name: &str, top_k: usize) -> Resolution {
        let key = format!("scryfall:{}", hash_subkey(&raw_name.to_lowercase()));
        if let Some(cached) = self.cache.get_json::<Resolution>(&key).await {
            return cached;
        }
        let resolution = self.catalogue.fuzzy_resolve(raw_name, top_k).await;
        self.cache.set_json(&key, &resolution, Some(RESOLVE_TTL)).await;
        resolution
    }

    /// Attach catalogue identifiers to the resolved names.
    pub async fn normalize(&self, deck: &ParsedDeck) -> Result<NormalizedDeck> {
        Ok(NormalizedDeck {
            main: self.normalize_entries(&deck.main)?,
            side: self.normalize_entries(&deck.side)?,
        })
    }

    fn normalize_entries(&self, entries: &[CardEntry]) -> Result<Vec<NormalizedCard>> {
        entries
            .iter()
            .map(|entry| {
                let catalogue_id = self
                    .catalogue
                    .lookup_exact(&entry.name, true)?
                    .into_iter()
                    .next()
                    .and_then(|card| card.catalogue_id);
                Ok(NormalizedCard {
                    quantity: entry.quantity,
                    name: entry.name.clone(),
                    catalogue_id,
                })
            })
            .collect()
    }
}

/// Merge local and remote candidates, first occurrence winning the slot.
fn merge_candidates(local: Vec<Candidate>, remote: Vec<Candidate>) -> Vec<Candidate> {
    let mut merged: Vec<Candidate> = Vec::with_capacity(local.len() + remote.len());
    let mut seen = std::collections::HashSet::new();
    for candidate in local.into_iter().chain(remote) {
        if seen.insert(candidate.name.clone()) {
            merged.push(candidate);
        }
    }
    merged
}
