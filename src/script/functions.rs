use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// Non-nested: stops at the first `end` token after the parameter list, which
// may belong to an inner `if`/`for` block.
static FUNC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)function\s+s\.(\w+)\s*\((.*?)\)(.*?)\bend\b").unwrap()
});

/// Names most scripts define for their effects.
pub const CONVENTIONAL_NAMES: &[&str] = &[
    "initial_effect",
    "condition",
    "target",
    "operation",
    "rfilter",
    "tgcond",
    "tgtg",
    "tgop",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub parameters: Vec<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FunctionFilter {
    #[default]
    All,
    Named(Vec<String>),
}

impl FunctionFilter {
    pub fn conventional() -> Self {
        FunctionFilter::Named(CONVENTIONAL_NAMES.iter().map(|n| n.to_string()).collect())
    }

    fn accepts(&self, name: &str) -> bool {
        match self {
            FunctionFilter::All => true,
            FunctionFilter::Named(names) => names.iter().any(|n| n == name),
        }
    }
}

/// Collect every `function s.<name>(<params>) <body> end` definition.
/// A later definition with the same name replaces the earlier one.
pub fn extract(lua: &str, filter: &FunctionFilter) -> BTreeMap<String, FunctionDef> {
    let mut result = BTreeMap::new();
    for caps in FUNC_RE.captures_iter(lua) {
        let name = &caps[1];
        if !filter.accepts(name) {
            continue;
        }
        result.insert(
            name.to_string(),
            FunctionDef {
                parameters: split_params(&caps[2]),
                body: caps[3].trim().to_string(),
            },
        );
    }
    result
}

fn split_params(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
