//! Deterministic structural repairs on the normalized deck.

use crate::error::{Result, ServiceError};
use crate::resolver::NormalizedDeck;

const BASIC_LANDS: &[&str] = &["Plains", "Island", "Swamp", "Mountain", "Forest"];

/// Repair the desktop-client miscount where a pair of basic lands comes
/// out as 59 + 1. The pair is rewritten to (20, 4); every other entry is
/// untouched. Applying the rule twice equals applying it once.
pub fn apply_lands_miscount(mut deck: NormalizedDeck) -> NormalizedDeck {
    let total: u32 = deck.main.iter().map(|c| c.quantity).sum();
    if total == 60 {
        return deck;
    }

    let heavy = deck
        .main
        .iter()
        .position(|c| c.quantity == 59 && BASIC_LANDS.contains(&c.name.as_str()));
    let light = deck
        .main
        .iter()
        .position(|c| c.quantity == 1 && BASIC_LANDS.contains(&c.name.as_str()));

    if let (Some(heavy), Some(light)) = (heavy, light) {
        if heavy != light && deck.main[heavy].name != deck.main[light].name {
            tracing::info!(
                heavy = %deck.main[heavy].name,
                light = %deck.main[light].name,
                "repairing 59+1 land miscount"
            );
            deck.main[heavy].quantity = 20;
            deck.main[light].quantity = 4;
        }
    }
    deck
}

/// Structural validation after resolution. A deck with no mainboard is a
/// failed recognition, not a deck.
pub fn validate_and_fill(deck: NormalizedDeck) -> Result<NormalizedDeck> {
    if deck.main.is_empty() {
        return Err(ServiceError::Validation(
            "recognized deck has no mainboard entries".to_string(),
        ));
    }
    Ok(deck)
}
