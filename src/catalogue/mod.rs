//! Offline-first card catalogue.
//!
//! Canonical card records live in a local SQLite snapshot; an in-memory
//! index of normalized names serves exact hits and corpus-wide fuzzy
//! scoring without touching the database. The resolve ladder runs exact →
//! offline fuzzy → online fuzzy → autocomplete → raw, where the online
//! rungs are optional, rate-spaced, and owned by a [`RemoteCatalogue`]
//! implementation.
//!
//! The index is rebuilt atomically on [`CatalogueStore::load_index`];
//! readers clone an `Arc` and never observe a torn index.

pub mod fuzzy;
pub mod phonetic;
pub mod remote;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use fuzzy::{score_candidates, ScoreContext, OFFLINE_ACCEPT_SCORE};
use remote::{MinIntervalGate, RemoteCatalogue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardLayout {
    Normal,
    Transform,
    ModalDfc,
    Split,
    Adventure,
}

impl CardLayout {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "transform" => CardLayout::Transform,
            "modal_dfc" => CardLayout::ModalDfc,
            "split" => CardLayout::Split,
            "adventure" => CardLayout::Adventure,
            _ => CardLayout::Normal,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            CardLayout::Normal => "normal",
            CardLayout::Transform => "transform",
            CardLayout::ModalDfc => "modal_dfc",
            CardLayout::Split => "split",
            CardLayout::Adventure => "adventure",
        }
    }
}

/// Canonical display form for a card given its layout and face names.
///
/// Double-faced layouts show the front face, split cards join both halves
/// with `//`, adventures show the creature face. Face names stay on the
/// record for export surfaces that need them.
pub fn display_name(name: &str, layout: CardLayout, faces: &[String]) -> String {
    match layout {
        CardLayout::Transform | CardLayout::ModalDfc | CardLayout::Adventure => {
            faces.first().cloned().unwrap_or_else(|| name.to_string())
        }
        CardLayout::Split => {
            if faces.len() == 2 {
                format!("{} // {}", faces[0], faces[1])
            } else {
                name.to_string()
            }
        }
        CardLayout::Normal => name.to_string(),
    }
}

/// One canonical catalogue record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueCard {
    pub id: String,
    pub name: String,
    pub name_normalized: String,
    pub layout: CardLayout,
    pub faces: Vec<String>,
    pub catalogue_id: Option<String>,
}

impl CatalogueCard {
    pub fn display_name(&self) -> String {
        display_name(&self.name, self.layout, &self.faces)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Exact,
    OfflineFuzzy,
    OnlineFuzzy,
    Autocomplete,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub score: f64,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub canonical_name: String,
    pub id: Option<String>,
    pub source: ResolutionSource,
    pub candidates: Vec<Candidate>,
}

struct NameIndex {
    names: Arc<Vec<String>>,
    by_normalized: HashMap<String, Vec<String>>,
}

impl NameIndex {
    fn empty() -> Self {
        Self {
            names: Arc::new(Vec::new()),
            by_normalized: HashMap::new(),
        }
    }
}

pub struct CatalogueStore {
    conn: Mutex<Connection>,
    index: RwLock<Arc<NameIndex>>,
    ctx: ScoreContext,
    remote: Option<Arc<dyn RemoteCatalogue>>,
    gate: MinIntervalGate,
    online_enabled: bool,
}

impl CatalogueStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cards (
                 id              TEXT PRIMARY KEY,
                 name            TEXT NOT NULL,
                 name_normalized TEXT NOT NULL,
                 layout          TEXT NOT NULL DEFAULT 'normal',
                 faces           TEXT,
                 catalogue_id    TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_cards_name_normalized
                 ON cards(name_normalized);
             CREATE TABLE IF NOT EXISTS metadata (
                 key        TEXT PRIMARY KEY,
                 value      TEXT,
                 updated_at TEXT NOT NULL
             );",
        )?;
        let store = Self {
            conn: Mutex::new(conn),
            index: RwLock::new(Arc::new(NameIndex::empty())),
            ctx: ScoreContext::default(),
            remote: None,
            gate: MinIntervalGate::new(120),
            online_enabled: false,
        };
        store.load_index()?;
        Ok(store)
    }

    /// Attach a remote catalogue and enable the online rungs.
    pub fn with_remote(
        mut self,
        remote: Arc<dyn RemoteCatalogue>,
        min_interval_ms: u64,
    ) -> Self {
        self.remote = Some(remote);
        self.gate = MinIntervalGate::new(min_interval_ms);
        self.online_enabled = true;
        self
    }

    pub fn set_online_enabled(&mut self, enabled: bool) {
        self.online_enabled = enabled;
    }

    pub fn insert_card(&self, card: &CatalogueCard) -> Result<()> {
        let faces = serde_json::to_string(&card.faces)?;
        let conn = self.lock_conn();
        conn.execute(
            "INSERT OR REPLACE INTO cards
                 (id, name, name_normalized, layout, faces, catalogue_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                card.id,
                card.name,
                card.name_normalized,
                card.layout.tag(),
                faces,
                card.catalogue_id,
            ],
        )?;
        Ok(())
    }

    /// Convenience for snapshot loading: normalizes and derives the record
    /// id when the caller has only raw fields.
    pub fn insert_named(
        &self,
        name: &str,
        layout: CardLayout,
        faces: Vec<String>,
        catalogue_id: Option<String>,
    ) -> Result<CatalogueCard> {
        let name_normalized = self.ctx.normalized(name);
        let card = CatalogueCard {
            id: crate::cache::hash_subkey(&name_normalized),
            name: name.to_string(),
            name_normalized,
            layout,
            faces,
            catalogue_id,
        };
        self.insert_card(&card)?;
        Ok(card)
    }

    pub fn set_snapshot(&self, tag: &str) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value, updated_at)
             VALUES ('snapshot', ?1, ?2)",
            rusqlite::params![tag, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Option<String>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'snapshot'")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Rebuild the in-memory name index from the snapshot. Readers swap to
    /// the new index atomically.
    pub fn load_index(&self) -> Result<()> {
        let mut by_normalized: HashMap<String, Vec<String>> = HashMap::new();
        let mut names = BTreeSet::new();
        {
            let conn = self.lock_conn();
            let mut stmt = conn.prepare("SELECT id, name_normalized FROM cards")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                let normalized: String = row.get(1)?;
                names.insert(normalized.clone());
                by_normalized.entry(normalized).or_default().push(id);
            }
        }
        let index = NameIndex {
            names: Arc::new(names.into_iter().collect()),
            by_normalized,
        };
        let mut guard = self.index.write().unwrap_or_else(|p| p.into_inner());
        *guard = Arc::new(index);
        Ok(())
    }

    /// Immutable list of every normalized name, for corpus-wide scoring.
    pub fn all_normalized_names(&self) -> Arc<Vec<String>> {
        self.current_index().names.clone()
    }

    pub fn card_count(&self) -> Result<usize> {
        let conn = self.lock_conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Exact lookup; `case_insensitive` matches on the normalized form.
    pub fn lookup_exact(&self, name: &str, case_insensitive: bool) -> Result<Vec<CatalogueCard>> {
        if case_insensitive {
            let normalized = self.ctx.normalized(name);
            self.cards_by_normalized(&normalized)
        } else {
            let conn = self.lock_conn();
            let mut stmt = conn.prepare(
                "SELECT id, name, name_normalized, layout, faces, catalogue_id
                 FROM cards WHERE name = ?1",
            )?;
            let mut rows = stmt.query([name])?;
            let mut cards = Vec::new();
            while let Some(row) = rows.next()? {
                cards.push(row_to_card(row)?);
            }
            Ok(cards)
        }
    }

    fn cards_by_normalized(&self, normalized: &str) -> Result<Vec<CatalogueCard>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, name_normalized, layout, faces, catalogue_id
             FROM cards WHERE name_normalized = ?1",
        )?;
        let mut rows = stmt.query([normalized])?;
        let mut cards = Vec::new();
        while let Some(row) = rows.next()? {
            cards.push(row_to_card(row)?);
        }
        Ok(cards)
    }

    /// Resolve a raw OCR name to its canonical spelling.
    pub async fn fuzzy_resolve(&self, raw_name: &str, top_k: usize) -> Resolution {
        let top_k = top_k.max(1);
        let normalized = self.ctx.normalized(raw_name);
        let index = self.current_index();

        // 1. Case-insensitive exact match.
        if index.by_normalized.contains_key(&normalized) {
            if let Ok(cards) = self.cards_by_normalized(&normalized) {
                if let Some(card) = cards.first() {
                    let canonical = card.display_name();
                    return Resolution {
                        canonical_name: canonical.clone(),
                        id: card.catalogue_id.clone(),
                        source: ResolutionSource::Exact,
                        candidates: vec![Candidate {
                            name: canonical,
                            score: 100.0,
                            id: card.catalogue_id.clone(),
                        }],
                    };
                }
            }
        }

        // 2. Weighted fuzzy score over the whole corpus.
        if !index.names.is_empty() {
            let scored = score_candidates(&self.ctx, raw_name, &index.names, top_k);
            if let Some((_, best_score)) = scored.first() {
                if *best_score >= OFFLINE_ACCEPT_SCORE {
                    let candidates: Vec<Candidate> = scored
                        .into_iter()
                        .map(|(norm, score)| self.candidate_for_normalized(norm, score))
                        .collect();
                    let best = &candidates[0];
                    return Resolution {
                        canonical_name: best.name.clone(),
                        id: best.id.clone(),
                        source: ResolutionSource::OfflineFuzzy,
                        candidates,
                    };
                }
            }
        }

        // 3. Online fuzzy resolve.
        if let Some(remote) = self.remote.as_ref().filter(|_| self.online_enabled) {
            self.gate.permit().await;
            match remote.resolve(raw_name).await {
                Ok(Some(card)) => {
                    let canonical = display_name(&card.name, card.layout, &card.faces);
                    return Resolution {
                        canonical_name: canonical.clone(),
                        id: card.id.clone(),
                        source: ResolutionSource::OnlineFuzzy,
                        candidates: vec![Candidate {
                            name: canonical,
                            score: 100.0,
                            id: card.id,
                        }],
                    };
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, name = raw_name, "online resolve failed");
                }
            }

            // 4. Autocomplete suggestions.
            self.gate.permit().await;
            match remote.autocomplete(raw_name).await {
                Ok(suggestions) if !suggestions.is_empty() => {
                    return Resolution {
                        canonical_name: raw_name.to_string(),
                        id: None,
                        source: ResolutionSource::Autocomplete,
                        candidates: suggestions
                            .into_iter()
                            .take(top_k)
                            .map(|name| Candidate {
                                name,
                                score: 0.0,
                                id: None,
                            })
                            .collect(),
                    };
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, name = raw_name, "autocomplete failed");
                }
            }
        }

        // 5. Raw passthrough.
        Resolution {
            canonical_name: raw_name.to_string(),
            id: None,
            source: ResolutionSource::Raw,
            candidates: Vec::new(),
        }
    }

    /// Corpus-wide candidate list without any acceptance threshold, for
    /// callers that merge local scoring with a remote resolve.
    pub fn local_candidates(&self, raw_name: &str, top_k: usize) -> Vec<Candidate> {
        let index = self.current_index();
        if index.names.is_empty() {
            return Vec::new();
        }
        score_candidates(&self.ctx, raw_name, &index.names, top_k.max(1))
            .into_iter()
            .map(|(norm, score)| self.candidate_for_normalized(norm, score))
            .collect()
    }

    fn candidate_for_normalized(&self, normalized: String, score: f64) -> Candidate {
        let card = self
            .cards_by_normalized(&normalized)
            .ok()
            .and_then(|cards| cards.into_iter().next());
        match card {
            Some(card) => Candidate {
                name: card.display_name(),
                score,
                id: card.catalogue_id,
            },
            None => Candidate {
                name: normalized,
                score,
                id: None,
            },
        }
    }

    fn current_index(&self) -> Arc<NameIndex> {
        self.index
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn row_to_card(row: &rusqlite::Row<'_>) -> std::result::Result<CatalogueCard, rusqlite::Error> {
    let layout_tag: String = row.get(3)?;
    let faces_json: Option<String> = row.get(4)?;
    let faces = faces_json
        .as_deref()
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default();
    Ok(CatalogueCard {
        id: row.get(0)?,
        name: row.get(1)?,
        name_normalized: row.get(2)?,
        layout: CardLayout::from_tag(&layout_tag),
        faces,
        catalogue_id: row.get(5)?,
    })
}

impl std::fmt::Debug for CatalogueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogueStore")
            .field("online_enabled", &self.online_enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::remote::{FaultyRemote, MockRemote, RemoteCard};
    use super::*;

    fn seeded_store() -> CatalogueStore {
        let store = CatalogueStore::in_memory().unwrap();
        store
            .insert_named("Lightning Bolt", CardLayout::Normal, vec![], Some("cat-1".into()))
            .unwrap();
        store
            .insert_named("Counterspell", CardLayout::Normal, vec![], Some("cat-2".into()))
            .unwrap();
        store
            .insert_named("Island", CardLayout::Normal, vec![], Some("cat-3".into()))
            .unwrap();
        store
            .insert_named(
                "Delver of Secrets",
                CardLayout::Transform,
                vec!["Delver of Secrets".into(), "Insectile Aberration".into()],
                Some("cat-4".into()),
            )
            .unwrap();
        store
            .insert_named(
                "Fire // Ice",
                CardLayout::Split,
                vec!["Fire".into(), "Ice".into()],
                Some("cat-5".into()),
            )
            .unwrap();
        store
            .insert_named(
                "Bonecrusher Giant",
                CardLayout::Adventure,
                vec!["Bonecrusher Giant".into(), "Stomp".into()],
                Some("cat-6".into()),
            )
            .unwrap();
        store.load_index().unwrap();
        store
    }

    #[tokio::test]
    async fn exact_match_wins_first() {
        let store = seeded_store();
        let res = store.fuzzy_resolve("lightning bolt", 5).await;
        assert_eq!(res.source, ResolutionSource::Exact);
        assert_eq!(res.canonical_name, "Lightning Bolt");
        assert_eq!(res.id.as_deref(), Some("cat-1"));
    }

    #[tokio::test]
    async fn typo_resolves_offline() {
        let store = seeded_store();
        let res = store.fuzzy_resolve("Lightnig Bolt", 5).await;
        assert_eq!(res.source, ResolutionSource::OfflineFuzzy);
        assert_eq!(res.canonical_name, "Lightning Bolt");
        assert!(!res.candidates.is_empty());
        assert!(res.candidates[0].score >= OFFLINE_ACCEPT_SCORE);
    }

    #[tokio::test]
    async fn unresolvable_name_falls_through_to_raw() {
        let store = seeded_store();
        let res = store.fuzzy_resolve("Zzyzx Unknowable", 5).await;
        assert_eq!(res.source, ResolutionSource::Raw);
        assert_eq!(res.canonical_name, "Zzyzx Unknowable");
        assert!(res.candidates.is_empty());
    }

    #[tokio::test]
    async fn online_rung_resolves_when_offline_misses() {
        let remote = Arc::new(MockRemote::new().with_card(
            "snapcaster mage",
            RemoteCard {
                name: "Snapcaster Mage".into(),
                id: Some("remote-1".into()),
                layout: CardLayout::Normal,
                faces: vec![],
            },
        ));
        let store = seeded_store().with_remote(remote.clone(), 1);
        let res = store.fuzzy_resolve("Snapcaster Mage", 5).await;
        assert_eq!(res.source, ResolutionSource::OnlineFuzzy);
        assert_eq!(res.id.as_deref(), Some("remote-1"));
        assert_eq!(remote.resolve_calls(), 1);
    }

    #[tokio::test]
    async fn autocomplete_rung_returns_zero_scores() {
        let remote = Arc::new(
            MockRemote::new().with_suggestions(vec![
                "Thoughtseize".to_string(),
                "Thought Scour".to_string(),
            ]),
        );
        let store = seeded_store().with_remote(remote, 1);
        let res = store.fuzzy_resolve("thought", 5).await;
        assert_eq!(res.source, ResolutionSource::Autocomplete);
        assert_eq!(res.canonical_name, "thought");
        assert!(res.candidates.iter().all(|c| c.score == 0.0));
    }

    #[tokio::test]
    async fn remote_failures_degrade_to_raw() {
        let store = seeded_store().with_remote(Arc::new(FaultyRemote), 1);
        let res = store.fuzzy_resolve("Completely Unknown Card", 5).await;
        assert_eq!(res.source, ResolutionSource::Raw);
    }

    #[tokio::test]
    async fn special_layouts_display_correctly() {
        let store = seeded_store();
        let transform = store.fuzzy_resolve("Delver of Secrets", 3).await;
        assert_eq!(transform.canonical_name, "Delver of Secrets");

        let split = store.fuzzy_resolve("fire ice", 3).await;
        assert_eq!(split.canonical_name, "Fire // Ice");

        let adventure = store.fuzzy_resolve("Bonecrusher Giant", 3).await;
        assert_eq!(adventure.canonical_name, "Bonecrusher Giant");
    }

    #[test]
    fn lookup_exact_is_case_sensitive_when_asked() {
        let store = seeded_store();
        assert_eq!(store.lookup_exact("Lightning Bolt", false).unwrap().len(), 1);
        assert!(store.lookup_exact("LIGHTNING BOLT", false).unwrap().is_empty());
        assert_eq!(store.lookup_exact("LIGHTNING BOLT", true).unwrap().len(), 1);
    }

    #[test]
    fn snapshot_roundtrips_through_metadata() {
        let store = seeded_store();
        assert_eq!(store.snapshot().unwrap(), None);
        store.set_snapshot("2026-08-01").unwrap();
        assert_eq!(store.snapshot().unwrap().as_deref(), Some("2026-08-01"));
    }

    #[test]
    fn index_rebuild_is_visible_to_readers() {
        let store = seeded_store();
        let before = store.all_normalized_names();
        store
            .insert_named("Opt", CardLayout::Normal, vec![], None)
            .unwrap();
        // Not visible until rebuild.
        assert_eq!(store.all_normalized_names().len(), before.len());
        store.load_index().unwrap();
        assert_eq!(store.all_normalized_names().len(), before.len() + 1);
    }
}
