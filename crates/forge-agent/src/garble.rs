//! Detects replies whose markers are fused beyond repair.

use regex::Regex;
use std::sync::OnceLock;

fn signature_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"ACTION[A-Z]{3,}ETERS").expect("valid garble regex"))
}

fn line_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:\d+[.)][ \t]*)?(?:[#>*_]+[ \t]*)*ACTION[A-Z]{3,}ETERS")
            .expect("valid garble regex")
    })
}

/// True when the fused-marker signature repeats, or opens a line. Such
/// output goes to format recovery instead of the sanitizer.
pub fn is_garbled(raw: &str) -> bool {
    signature_re().find_iter(raw).nth(1).is_some() || line_start_re().is_match(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_signature_is_garbled() {
        assert!(is_garbled(
            "okay ACTIONXXXETERS: {}\nthen ACTIONXXXETERS: {}"
        ));
    }

    #[test]
    fn line_start_signature_is_garbled() {
        assert!(is_garbled("THOUGHT: hi\nACTIONPARAMETERS: {\"path\": \".\"}"));
        assert!(is_garbled("  2. ACTIONWRITEETERS {"));
    }

    #[test]
    fn single_inline_fusion_is_repairable() {
        assert!(!is_garbled("next stepACTIONPARAMETERS: {\"path\": \".\"}"));
        assert!(!is_garbled("ACTIONMETERS: {}"));
        assert!(!is_garbled("THOUGHT: fine\nACTION: list_files"));
    }
}
