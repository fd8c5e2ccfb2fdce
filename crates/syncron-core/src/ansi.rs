use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// A run of text sharing one set of `ansi-<param>` style classes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StyledSpan {
    pub classes: BTreeSet<String>,
    pub text: String,
}

impl StyledSpan {
    fn with_classes(classes: BTreeSet<String>) -> Self {
        Self {
            classes,
            text: String::new(),
        }
    }
}

fn csi_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\x1b\[([0-9;,?]*)([@-~])").expect("valid regex"))
}

/// Splits `input` into styled spans. Every SGR sequence closes the open span
/// and starts a new one; other CSI sequences are dropped without splitting.
pub fn segment(input: &str) -> Vec<StyledSpan> {
    let mut spans = Vec::new();
    let mut current = StyledSpan::default();
    let mut cursor = 0usize;
    for caps in csi_pattern().captures_iter(input) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        current.text.push_str(&input[cursor..whole.start()]);
        cursor = whole.end();
        if caps.get(2).map(|m| m.as_str()) != Some("m") {
            continue;
        }
        let params = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let next = StyledSpan::with_classes(sgr_classes(params));
        push_span(&mut spans, std::mem::replace(&mut current, next));
    }
    current.text.push_str(&input[cursor..]);
    push_span(&mut spans, current);
    spans
}

/// The input with every escape sequence removed.
pub fn strip(input: &str) -> String {
    csi_pattern().replace_all(input, "").into_owned()
}

fn sgr_classes(params: &str) -> BTreeSet<String> {
    params
        .split([';', ','])
        .filter_map(|param| param.trim().parse::<u16>().ok())
        .filter(|param| *param != 0)
        .map(|param| format!("ansi-{param}"))
        .collect()
}

fn push_span(spans: &mut Vec<StyledSpan>, span: StyledSpan) {
    if !span.text.is_empty() {
        spans.push(span);
    }
}
