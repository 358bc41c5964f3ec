//! Marker normalization for raw model replies.
//!
//! Local models fuse, decorate, and inline the THOUGHT / ACTION / PARAMETERS
//! markers in many ways. The rules below rewrite the common variants into
//! the canonical form: each marker at the start of its own line, uppercase,
//! followed by `": "`. Rules run in order and the whole list is re-applied
//! until the text stops changing, which makes [`sanitize`] idempotent.

use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Upper bound on full passes over the rule list.
const MAX_PASSES: usize = 8;

enum Rewrite {
    Fixed(&'static str),
    Marker,
}

struct Rule {
    name: &'static str,
    pattern: &'static str,
    rewrite: Rewrite,
}

const RULES: &[Rule] = &[
    Rule {
        name: "line_endings",
        pattern: r"\r\n?",
        rewrite: Rewrite::Fixed("\n"),
    },
    Rule {
        name: "fused_thought_action",
        pattern: r"(?i)THOUGHT[ \t]*ACTION:",
        rewrite: Rewrite::Fixed("THOUGHT:\n\nACTION:"),
    },
    Rule {
        name: "fused_thought_parameters",
        pattern: r"(?i)THOUGHT[ \t]*PARAMETERS:",
        rewrite: Rewrite::Fixed("THOUGHT:\n\nPARAMETERS:"),
    },
    // ACTIONPARAMETERS:, ACTIONMETERS:, ACTIONAMETERS:, ACTIONxxxETERS: plus
    // any uppercase `:` debris glued on behind.
    Rule {
        name: "fused_action_parameters",
        pattern: r"(?i:ACTION[A-Z]*ETERS):[A-Z:]*",
        rewrite: Rewrite::Fixed("ACTION:\n\nPARAMETERS:"),
    },
    Rule {
        name: "marker_after_word",
        pattern: r"([a-zA-Z0-9])(THOUGHT|ACTION|PARAMETERS):",
        rewrite: Rewrite::Fixed("$1\n\n$2:"),
    },
    Rule {
        name: "marker_inline",
        pattern: r"(\S)[ \t]+(THOUGHT|ACTION|PARAMETERS):",
        rewrite: Rewrite::Fixed("$1\n\n$2:"),
    },
    // `1. action:`, `### ACTION:`, `**ACTION:**`, `> __Thought__ :`
    Rule {
        name: "marker_decoration",
        pattern: r"(?im)^[ \t]*(?:\d+[.)][ \t]*)?(?:[#>*_]+[ \t]*)*(thought|action|parameters)[ \t]*[*_]*[ \t]*:[ \t]*(?:[*_]+[ \t]*)*",
        rewrite: Rewrite::Marker,
    },
    Rule {
        name: "collapse_blank_lines",
        pattern: r"\n{3,}",
        rewrite: Rewrite::Fixed("\n\n"),
    },
];

fn compiled() -> &'static [(&'static str, Regex, &'static Rewrite)] {
    static COMPILED: OnceLock<Vec<(&'static str, Regex, &'static Rewrite)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|rule| {
                (
                    rule.name,
                    Regex::new(rule.pattern).expect("valid sanitizer rule"),
                    &rule.rewrite,
                )
            })
            .collect()
    })
}

fn apply_rules(text: &str) -> String {
    let mut out = text.to_string();
    for (_, re, rewrite) in compiled() {
        let next = match rewrite {
            Rewrite::Fixed(replacement) => re.replace_all(&out, *replacement),
            Rewrite::Marker => re.replace_all(&out, |caps: &Captures<'_>| {
                format!("{}: ", caps[1].to_ascii_uppercase())
            }),
        };
        if let std::borrow::Cow::Owned(changed) = next {
            out = changed;
        }
    }
    out
}

pub fn sanitize(raw: &str) -> String {
    let mut current = apply_rules(raw);
    for _ in 1..MAX_PASSES {
        let next = apply_rules(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}
