//! Deciding whether a page's native text layer is good enough, or whether we
//! need to OCR it.

/// The default minimum number of trimmed characters a native text layer needs
/// before we trust it.
pub const DEFAULT_NATIVE_MIN_CHARS: usize = 50;

/// Where should a page's text come from?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextSource {
    /// The native text layer is long enough to use as-is.
    UseNative,
    /// The page needs to be rasterized and OCRed.
    NeedsOcr,
}

/// Policy for choosing between the native text layer and OCR.
///
/// Sparse native text usually means a scanned page with a stray text
/// artifact, so short-but-genuine pages (a cover with only a title) will be
/// sent to OCR as well. That's an accepted cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerPolicy {
    /// Minimum number of characters, after trimming, for native text to be
    /// used.
    pub native_min_chars: usize,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            native_min_chars: DEFAULT_NATIVE_MIN_CHARS,
        }
    }
}

impl TriggerPolicy {
    /// Decide where this page's text should come from.
    pub fn decide(&self, native_text: Option<&str>) -> TextSource {
        match native_text {
            Some(text) if text.trim().chars().count() >= self.native_min_chars => {
                TextSource::UseNative
            }
            _ => TextSource::NeedsOcr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_text_needs_ocr() {
        let policy = TriggerPolicy::default();
        assert_eq!(policy.decide(None), TextSource::NeedsOcr);
        assert_eq!(policy.decide(Some("")), TextSource::NeedsOcr);
        assert_eq!(policy.decide(Some(" \n\t ")), TextSource::NeedsOcr);
    }

    #[test]
    fn threshold_boundary() {
        let policy = TriggerPolicy::default();
        let short = "x".repeat(49);
        let exact = "x".repeat(50);
        assert_eq!(policy.decide(Some(&short)), TextSource::NeedsOcr);
        assert_eq!(policy.decide(Some(&exact)), TextSource::UseNative);
    }

    #[test]
    fn surrounding_whitespace_does_not_count() {
        let policy = TriggerPolicy::default();
        let padded = format!("\n\n   {}   \n\x0C", "y".repeat(49));
        assert_eq!(policy.decide(Some(&padded)), TextSource::NeedsOcr);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let policy = TriggerPolicy::default();
        // 25 two-byte characters is 50 bytes, but only 25 characters.
        let swedish = "ö".repeat(25);
        assert_eq!(policy.decide(Some(&swedish)), TextSource::NeedsOcr);
        let swedish = "ö".repeat(50);
        assert_eq!(policy.decide(Some(&swedish)), TextSource::UseNative);
    }

    #[test]
    fn threshold_is_configurable() {
        let policy = TriggerPolicy {
            native_min_chars: 5,
        };
        assert_eq!(policy.decide(Some("Titel")), TextSource::UseNative);
        assert_eq!(policy.decide(Some("Tit")), TextSource::NeedsOcr);
    }
}
