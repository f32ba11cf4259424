//! Deck export formats.
//!
//! Pure functions from a normalized deck to text; byte-stable under repeat
//! invocation. Each format matches the golden fixtures line for line.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::resolver::NormalizedDeck;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Mtga,
    Moxfield,
    Archidekt,
    Tappedout,
}

impl ExportFormat {
    pub fn parse(tag: &str) -> Result<Self> {
        match tag.to_lowercase().as_str() {
            "mtga" => Ok(ExportFormat::Mtga),
            "moxfield" => Ok(ExportFormat::Moxfield),
            "archidekt" => Ok(ExportFormat::Archidekt),
            "tappedout" => Ok(ExportFormat::Tappedout),
            other => Err(ServiceError::Validation(format!(
                "unknown export format {other:?}"
            ))),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ExportFormat::Mtga => "mtga",
            ExportFormat::Moxfield => "moxfield",
            ExportFormat::Archidekt => "archidekt",
            ExportFormat::Tappedout => "tappedout",
        }
    }
}

pub fn export(format: ExportFormat, deck: &NormalizedDeck) -> String {
    match format {
        ExportFormat::Mtga => export_mtga(deck),
        ExportFormat::Moxfield => export_moxfield(deck),
        ExportFormat::Archidekt => export_archidekt(deck),
        ExportFormat::Tappedout => export_tappedout(deck),
    }
}

/// Arena client: `Deck` header, blank line, `Sideboard` header.
pub fn export_mtga(deck: &NormalizedDeck) -> String {
    let mut lines = vec!["Deck".to_string()];
    for card in &deck.main {
        lines.push(format!("{} {}", card.quantity, card.name));
    }
    lines.push(String::new());
    lines.push("Sideboard".to_string());
    for card in &deck.side {
        lines.push(format!("{} {}", card.quantity, card.name));
    }
    lines.join("\n")
}

/// Plain list with a `Sideboard:` marker line and a single trailing
/// newline.
pub fn export_moxfield(deck: &NormalizedDeck) -> String {
    let mut lines = Vec::new();
    for card in &deck.main {
        lines.push(format!("{} {}", card.quantity, card.name));
    }
    if !deck.side.is_empty() {
        lines.push("Sideboard:".to_string());
        for card in &deck.side {
            lines.push(format!("{} {}", card.quantity, card.name));
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// CSV with a `Categories` column distinguishing the sections.
pub fn export_archidekt(deck: &NormalizedDeck) -> String {
    let mut rows = vec!["Count,Name,Categories".to_string()];
    for card in &deck.main {
        rows.push(format!("{},{},Mainboard", card.quantity, card.name));
    }
    for card in &deck.side {
        rows.push(format!("{},{},Sideboard", card.quantity, card.name));
    }
    rows.join("\n")
}

/// `Nx Name` lines with a blank line and `Sideboard` header between the
/// sections.
pub fn export_tappedout(deck: &NormalizedDeck) -> String {
    let mut lines = Vec::new();
    for card in &deck.main {
        lines.push(format!("{}x {}", card.quantity, card.name));
    }
    lines.push(String::new());
    lines.push("Sideboard".to_string());
    for card in &deck.side {
        lines.push(format!("{}x {}", card.quantity, card.name));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::NormalizedCard;

    fn card(quantity: u32, name: &str) -> NormalizedCard {
        NormalizedCard {
            quantity,
            name: name.to_string(),
            catalogue_id: None,
        }
    }

    fn fixture_deck() -> NormalizedDeck {
        NormalizedDeck {
            main: vec![
                card(4, "Lightning Bolt"),
                card(4, "Counterspell"),
                card(2, "Teferi, Time Raveler"),
                card(24, "Island"),
                card(26, "Mountain"),
            ],
            side: vec![
                card(3, "Surgical Extraction"),
                card(2, "Damping Sphere"),
                card(2, "Pyroblast"),
                card(4, "Relic of Progenitus"),
                card(4, "Blood Moon"),
            ],
        }
    }

    #[test]
    fn mtga_matches_golden_fixture() {
        let expected = "Deck\n4 Lightning Bolt\n4 Counterspell\n2 Teferi, Time Raveler\n24 Island\n26 Mountain\n\nSideboard\n3 Surgical Extraction\n2 Damping Sphere\n2 Pyroblast\n4 Relic of Progenitus\n4 Blood Moon";
        assert_eq!(export_mtga(&fixture_deck()), expected);
    }

    #[test]
    fn moxfield_lists_both_sections_with_marker() {
        let out = export_moxfield(&fixture_deck());
        assert!(out.starts_with("4 Lightning Bolt\n"));
        assert!(out.contains("\nSideboard:\n3 Surgical Extraction\n"));
        assert!(out.ends_with("4 Blood Moon\n"));
        assert!(!out.ends_with("\n\n"));
    }

    #[test]
    fn archidekt_emits_csv_rows() {
        let out = export_archidekt(&fixture_deck());
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("Count,Name,Categories"));
        assert_eq!(lines.next(), Some("4,Lightning Bolt,Mainboard"));
        assert!(out.contains("3,Surgical Extraction,Sideboard"));
    }

    #[test]
    fn tappedout_uses_nx_quantities() {
        let out = export_tappedout(&fixture_deck());
        assert!(out.starts_with("4x Lightning Bolt\n"));
        assert!(out.contains("\n\nSideboard\n3x Surgical Extraction"));
    }

    #[test]
    fn exporters_are_byte_stable() {
        let deck = fixture_deck();
        for format in [
            ExportFormat::Mtga,
            ExportFormat::Moxfield,
            ExportFormat::Archidekt,
            ExportFormat::Tappedout,
        ] {
            assert_eq!(export(format, &deck), export(format, &deck));
        }
    }

    #[test]
    fn format_tags_roundtrip() {
        for tag in ["mtga", "moxfield", "archidekt", "tappedout"] {
            assert_eq!(ExportFormat::parse(tag).unwrap().tag(), tag);
        }
        assert_eq!(ExportFormat::parse("MTGA").unwrap(), ExportFormat::Mtga);
        assert!(ExportFormat::parse("json5").is_err());
    }
}
