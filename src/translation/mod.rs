//! Translation Module - Live-Untertitel
//!
//! Verarbeitet die Untertitel eines externen Übersetzungsdienstes:
//! - unveränderliche `SubtitleData` pro erkannter Äußerung
//! - Transkript und aktuelle Untertitel pro Teilnehmer

mod overlay;
mod subtitle;

pub use overlay::TranslationOverlay;
pub use subtitle::SubtitleData;

/// BCP-47-artiger Sprachcode: `de`, `pt-BR`, `yue` oder `auto`
pub fn is_valid_language_code(code: &str) -> bool {
    if code == "auto" {
        return true;
    }

    let mut parts = code.split('-');
    let primary_ok = parts.next().is_some_and(|primary| {
        (2..=3).contains(&primary.len()) && primary.chars().all(|c| c.is_ascii_lowercase())
    });
    let region_ok = match parts.next() {
        None => true,
        Some(region) => {
            (2..=4).contains(&region.len()) && region.chars().all(|c| c.is_ascii_alphanumeric())
        }
    };

    primary_ok && region_ok && parts.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_codes() {
        for valid in ["de", "en", "pt-BR", "yue", "zh-Hant", "auto"] {
            assert!(is_valid_language_code(valid), "{valid}");
        }
        for invalid in ["", "D", "deutsch", "de-", "de_DE", "en-US-x"] {
            assert!(!is_valid_language_code(invalid), "{invalid}");
        }
    }
}
