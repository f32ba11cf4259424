//! Deck parsing from OCR spans.
//!
//! Handles both span shapes seen in the wild: combined lines
//! (`"4 Lightning Bolt"`, `"Lightning Bolt x4"`, `"4x Lightning Bolt"`,
//! and the risky trailing-digit form) and split lines where the quantity
//! follows the name as `x<digits>`. A sideboard marker flips subsequent
//! entries to the side section; MTGO captures ignore markers entirely and
//! are re-split at sixty cumulative main units instead.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::catalogue::Candidate;
use crate::ocr::OcrSpan;

/// A parsed entry, prior to catalogue resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardEntry {
    pub quantity: u32,
    pub name: String,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl CardEntry {
    pub fn new(quantity: u32, name: impl Into<String>) -> Self {
        Self {
            quantity,
            name: name.into(),
            candidates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedDeck {
    pub main: Vec<CardEntry>,
    pub side: Vec<CardEntry>,
}

impl ParsedDeck {
    pub fn main_units(&self) -> u32 {
        self.main.iter().map(|e| e.quantity).sum()
    }

    pub fn side_units(&self) -> u32 {
        self.side.iter().map(|e| e.quantity).sum()
    }
}

const SIDEBOARD_MARKERS: &[&str] = &["sideboard", "side board", "sb", "side", "reserve"];

/// Highest quantity the combined patterns accept outright. The trailing-
/// digit pattern is gated much lower because it collides with UI strings.
const MAX_QUANTITY: u32 = 99;
const MAX_TRAILING_QUANTITY: u32 = 20;
const MAX_NAME_CHARS: usize = 200;

static RE_QTY_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\s+(.+)$").expect("regex"));
static RE_NAME_XQTY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)\s+x\s*(\d+)$").expect("regex"));
static RE_NX_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(\d+)x\s+(.+)$").expect("regex"));
static RE_NAME_QTY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?)\s+(\d+)$").expect("regex"));
static RE_STANDALONE_QTY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^x(\d+)$").expect("regex"));
static RE_COORD_PAIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\s+\d+$").expect("regex"));
static RE_SCORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\s*/\s*\d+$").expect("regex"));
static RE_SET_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\([A-Za-z0-9]{1,6}\)$").expect("regex"));

/// Parse an ordered span sequence into main and side sections.
pub fn parse_spans(spans: &[OcrSpan]) -> ParsedDeck {
    let texts: Vec<String> = spans.iter().map(|s| s.text.trim().to_string()).collect();
    let mtgo_complete = detect_mtgo(&texts);
    if mtgo_complete {
        tracing::info!("desktop-client capture detected, using complete 60+15 mode");
    }

    let mut main = Vec::new();
    let mut side = Vec::new();
    let mut in_side = false;

    fn push(entry: CardEntry, in_side: bool, main: &mut Vec<CardEntry>, side: &mut Vec<CardEntry>) {
        if in_side {
            side.push(entry);
        } else {
            main.push(entry);
        }
    }

    let mut i = 0;
    while i < texts.len() {
        let line = &texts[i];
        if line.len() < 2 {
            i += 1;
            continue;
        }
        let lower = line.to_lowercase();

        if SIDEBOARD_MARKERS.contains(&lower.as_str()) {
            if !mtgo_complete {
                in_side = true;
            }
            i += 1;
            continue;
        }

        // "SB: 2 Duress" both flips sections and carries an entry.
        if let Some(rest) = lower
            .strip_prefix("sb:")
            .map(|_| line[3..].trim().to_string())
        {
            if !mtgo_complete {
                in_side = true;
            }
            if let Some(entry) = parse_combined_line(&rest) {
                push(entry, in_side, &mut main, &mut side);
            }
            i += 1;
            continue;
        }

        if is_ui_line(&lower) {
            i += 1;
            continue;
        }

        // An orphan quantity marker with no preceding name is noise.
        if RE_STANDALONE_QTY.is_match(&lower) {
            i += 1;
            continue;
        }

        if let Some(entry) = parse_combined_line(line) {
            push(entry, in_side, &mut main, &mut side);
            i += 1;
            continue;
        }

        if looks_like_name(line) {
            let name = sanitize_name(line);
            if !name.is_empty() {
                // Split-line shape: a standalone `xN` right after the name
                // carries the quantity. Otherwise the name stands alone.
                let pending_qty = texts
                    .get(i + 1)
                    .and_then(|next| standalone_quantity(next.trim()));
                match pending_qty {
                    Some(qty) if (1..=MAX_QUANTITY).contains(&qty) => {
                        push(CardEntry::new(qty, name), in_side, &mut main, &mut side);
                        i += 2;
                        continue;
                    }
                    _ => push(CardEntry::new(1, name), in_side, &mut main, &mut side),
                }
            }
        }
        i += 1;
    }

    if mtgo_complete {
        let mut all = main;
        all.extend(side);
        redistribute_complete(all)
    } else {
        ParsedDeck { main, side }
    }
}

/// Try the combined-line patterns in order.
pub fn parse_combined_line(line: &str) -> Option<CardEntry> {
    let line = line.trim();

    if let Some(caps) = RE_QTY_NAME.captures(line) {
        let qty: u32 = caps.get(1)?.as_str().parse().ok()?;
        let name = sanitize_name(&strip_set_suffix(caps.get(2)?.as_str()));
        if valid_name(&name) && (1..=MAX_QUANTITY).contains(&qty) {
            return Some(CardEntry::new(qty, name));
        }
        return None;
    }

    if let Some(caps) = RE_NAME_XQTY.captures(line) {
        let name = sanitize_name(caps.get(1)?.as_str());
        let qty: u32 = caps.get(2)?.as_str().parse().ok()?;
        if valid_name(&name) && (1..=MAX_QUANTITY).contains(&qty) {
            return Some(CardEntry::new(qty, name));
        }
        return None;
    }

    if let Some(caps) = RE_NX_NAME.captures(line) {
        let qty: u32 = caps.get(1)?.as_str().parse().ok()?;
        let name = sanitize_name(&strip_set_suffix(caps.get(2)?.as_str()));
        if valid_name(&name) && (1..=MAX_QUANTITY).contains(&qty) {
            return Some(CardEntry::new(qty, name));
        }
        return None;
    }

    // Trailing digits are a conservative last resort: quantities stay
    // small and the name must carry real letters, otherwise UI strings
    // like coordinates slip through.
    if let Some(caps) = RE_NAME_QTY.captures(line) {
        let name = sanitize_name(caps.get(1)?.as_str());
        let qty: u32 = caps.get(2)?.as_str().parse().ok()?;
        let non_digit_chars = name.chars().filter(|c| !c.is_ascii_digit()).count();
        if valid_name(&name) && qty >= 1 && qty <= MAX_TRAILING_QUANTITY && non_digit_chars >= 3 {
            return Some(CardEntry::new(qty, name));
        }
    }

    None
}

fn standalone_quantity(line: &str) -> Option<u32> {
    RE_STANDALONE_QTY
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn detect_mtgo(texts: &[String]) -> bool {
    texts.iter().take(10).any(|t| {
        let lower = t.to_lowercase();
        lower.contains("mtgo") || lower.contains("magic online")
    })
}

fn looks_like_name(line: &str) -> bool {
    let mut chars = line.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    first.is_alphabetic() && first.is_uppercase() && line.chars().any(|c| c.is_alphabetic())
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().any(|c| c.is_alphabetic())
}

/// Reject list for on-screen chrome that is not part of the deck.
fn is_ui_line(lower: &str) -> bool {
    if lower.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if RE_COORD_PAIR.is_match(lower) || RE_SCORE.is_match(lower) {
        return true;
    }
    if !lower.is_empty()
        && lower
            .chars()
            .all(|c| matches!(c, '-' | '=' | '_' | '|' | '\\' | '/' | '~' | '.' | ' '))
    {
        return true;
    }
    matches!(lower, "deck" | "done" | "total" | "cards" | "commander" | "library")
        || lower.contains("best of")
        || lower.contains("mtgo")
        || lower.contains("magic online")
        || lower.starts_with("total")
        || lower.ends_with(" cards")
}

fn strip_set_suffix(name: &str) -> String {
    RE_SET_SUFFIX.replace(name, "").into_owned()
}

/// Collapse whitespace, strip control characters, keep letters, digits,
/// spaces and `,'-/`, clamp to 200 chars.
pub fn sanitize_name(raw: &str) -> String {
    let filtered: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ',' | '\'' | '-' | '/') {
                c
            } else {
                ' '
            }
        })
        .collect();
    let collapsed = filtered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_NAME_CHARS).collect()
}

/// Split a flat entry list so the first sixty main units land in main and
/// the remainder in side, splitting the straddling entry.
fn redistribute_complete(cards: Vec<CardEntry>) -> ParsedDeck {
    const MAIN_UNITS: u32 = 60;

    let mut main = Vec::new();
    let mut side = Vec::new();
    let mut total = 0u32;

    for card in cards {
        if total >= MAIN_UNITS {
            side.push(card);
            continue;
        }
        let remaining = MAIN_UNITS - total;
        if card.quantity <= remaining {
            total += card.quantity;
            main.push(card);
        } else {
            let spill = card.quantity - remaining;
            main.push(CardEntry::new(remaining, card.name.clone()));
            side.push(CardEntry::new(spill, card.name));
            total = MAIN_UNITS;
        }
    }

    ParsedDeck { main, side }
}
