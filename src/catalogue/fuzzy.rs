//! Name normalization and fuzzy scoring.
//!
//! Scores are in [0, 100]. The blend is `0.60·weighted_ratio +
//! 0.35·token_sort_ratio + 0.05·phonetic`, where the phonetic term is 100
//! when both names share a non-empty metaphone head. Normalization and
//! phonetic encoding are the hot inner loop of corpus-wide scoring, so both
//! sit behind bounded caches owned by the store.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::phonetic::metaphone_head;

/// Accepting threshold for offline fuzzy resolution.
pub const OFFLINE_ACCEPT_SCORE: f64 = 85.0;

/// Normalize a card name for matching: strip diacritics, lowercase, collapse
/// runs of non-alphanumerics into single spaces. Idempotent.
pub fn normalize_name(name: &str) -> String {
    let stripped: String = name
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    let spaced: String = stripped
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Plain similarity ratio over the full strings.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Best ratio of the shorter string against every equal-length window of
/// the longer one.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let short_len = short.chars().count();
    if short_len == 0 {
        return 0.0;
    }
    let long_chars: Vec<char> = long.chars().collect();
    if long_chars.len() == short_len {
        return ratio(short, long);
    }

    let mut best = 0.0f64;
    for start in 0..=(long_chars.len() - short_len) {
        let window: String = long_chars[start..start + short_len].iter().collect();
        best = best.max(ratio(short, &window));
        if best >= 100.0 {
            break;
        }
    }
    best
}

/// Ratio over whitespace tokens sorted lexicographically, which forgives
/// word-order swaps in OCR output.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sort_tokens(a), &sort_tokens(b))
}

fn sort_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Full-string ratio, switching to a discounted partial ratio when the
/// lengths diverge enough that a containment match is the likelier signal.
pub fn weighted_ratio(a: &str, b: &str) -> f64 {
    let base = ratio(a, b);
    let (la, lb) = (a.chars().count().max(1), b.chars().count().max(1));
    let length_ratio = la.max(lb) as f64 / la.min(lb) as f64;
    if length_ratio >= 1.5 {
        base.max(partial_ratio(a, b) * 0.9)
    } else {
        base
    }
}

/// Insertion-order bounded map backing the normalization and phonetic
/// caches.
pub struct BoundedCache<V> {
    entries: HashMap<String, V>,
    order: VecDeque<String>,
    cap: usize,
}

impl<V: Clone> BoundedCache<V> {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            cap: cap.max(8),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).cloned()
    }

    pub fn put(&mut self, key: String, value: V) {
        if !self.entries.contains_key(&key) {
            self.order.push_back(key.clone());
            if self.order.len() > self.cap {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
        }
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared caches for one catalogue store instance.
pub struct ScoreContext {
    norm: Mutex<BoundedCache<String>>,
    phonetic: Mutex<BoundedCache<String>>,
}

impl Default for ScoreContext {
    fn default() -> Self {
        Self::new(1024, 256)
    }
}

impl ScoreContext {
    pub fn new(norm_cap: usize, phonetic_cap: usize) -> Self {
        Self {
            norm: Mutex::new(BoundedCache::new(norm_cap)),
            phonetic: Mutex::new(BoundedCache::new(phonetic_cap)),
        }
    }

    pub fn normalized(&self, name: &str) -> String {
        let mut cache = self.norm.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(hit) = cache.get(name) {
            return hit;
        }
        let normalized = normalize_name(name);
        cache.put(name.to_string(), normalized.clone());
        normalized
    }

    pub fn phonetic(&self, normalized: &str) -> String {
        let mut cache = self.phonetic.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(hit) = cache.get(normalized) {
            return hit;
        }
        let code = metaphone_head(normalized);
        cache.put(normalized.to_string(), code.clone());
        code
    }
}

/// Blend score for one (query, candidate) pair of normalized names.
pub fn score_pair(ctx: &ScoreContext, query_norm: &str, candidate_norm: &str) -> f64 {
    let wr = weighted_ratio(query_norm, candidate_norm);
    let ts = token_sort_ratio(query_norm, candidate_norm);
    let q_phon = ctx.phonetic(query_norm);
    let c_phon = ctx.phonetic(candidate_norm);
    let phonetic = if !q_phon.is_empty() && q_phon == c_phon {
        100.0
    } else {
        0.0
    };
    0.60 * wr + 0.35 * ts + 0.05 * phonetic
}

/// Rank the corpus against a raw query and keep the top `limit` candidates.
pub fn score_candidates(
    ctx: &ScoreContext,
    raw_name: &str,
    corpus: &[String],
    limit: usize,
) -> Vec<(String, f64)> {
    let query = ctx.normalized(raw_name);
    if query.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(String, f64)> = corpus
        .iter()
        .map(|candidate| (candidate.clone(), score_pair(ctx, &query, candidate)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_diacritics_and_case() {
        assert_eq!(normalize_name("Île"), "ile");
        assert_eq!(normalize_name("  Fire // Ice "), "fire ice");
        assert_eq!(normalize_name("Lim-Dûl's Vault"), "lim dul s vault");
    }

    #[test]
    fn normalization_is_idempotent() {
        for name in ["Île", "Teferi, Hero of Dominaria", "Æther Vial", "x  y"] {
            let once = normalize_name(name);
            assert_eq!(normalize_name(&once), once);
        }
    }

    #[test]
    fn ratio_bounds() {
        assert_eq!(ratio("abc", "abc"), 100.0);
        assert!(ratio("abc", "xyz") < 40.0);
    }

    #[test]
    fn token_sort_forgives_word_order() {
        let a = "bolt lightning";
        let b = "lightning bolt";
        assert!(token_sort_ratio(a, b) > 99.0);
        assert!(ratio(a, b) < token_sort_ratio(a, b));
    }

    #[test]
    fn partial_ratio_finds_containment() {
        assert!(partial_ratio("bolt", "lightning bolt") > 99.0);
    }

    #[test]
    fn near_miss_scores_above_threshold() {
        let ctx = ScoreContext::default();
        let score = score_pair(&ctx, "lightnig bolt", "lightning bolt");
        assert!(score >= OFFLINE_ACCEPT_SCORE, "score was {score}");
    }

    #[test]
    fn unrelated_names_score_below_threshold() {
        let ctx = ScoreContext::default();
        let score = score_pair(&ctx, "island", "wrath of god");
        assert!(score < OFFLINE_ACCEPT_SCORE, "score was {score}");
    }

    #[test]
    fn score_candidates_ranks_best_first() {
        let ctx = ScoreContext::default();
        let corpus = vec![
            "lightning bolt".to_string(),
            "lightning strike".to_string(),
            "counterspell".to_string(),
        ];
        let ranked = score_candidates(&ctx, "Lightnig Bolt", &corpus, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, "lightning bolt");
        assert!(ranked[0].1 > ranked[1].1);
    }

    #[test]
    fn bounded_cache_evicts_oldest() {
        let mut cache = BoundedCache::new(8);
        for i in 0..20 {
            cache.put(format!("k{i}"), i);
        }
        assert!(cache.len() <= 8);
        assert!(cache.get("k19").is_some());
        assert!(cache.get("k0").is_none());
    }
}
