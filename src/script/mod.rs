pub mod functions;
pub mod meta;

use std::collections::BTreeMap;

use functions::{FunctionDef, FunctionFilter};
use meta::Meta;

/// Everything extracted from one `c<id>.lua` file.
#[derive(Debug, Clone)]
pub struct CardScript {
    pub id: i64,
    pub name_local: String,
    pub name_alt: String,
    pub raw_text: String,
    pub functions: BTreeMap<String, FunctionDef>,
    pub meta: Meta,
}

/// Two-step pipeline over the raw text: lexical patterns → functions.
/// Never fails; unrecognised text yields empty names, functions and flags.
pub fn extract(id: i64, lua: &str, filter: &FunctionFilter) -> CardScript {
    let (name_local, name_alt) = extract_names(lua);
    CardScript {
        id,
        name_local,
        name_alt,
        raw_text: lua.to_string(),
        functions: functions::extract(lua, filter),
        meta: meta::detect(lua),
    }
}

/// First two `--` comment lines, in order. Other lines are passed over.
fn extract_names(lua: &str) -> (String, String) {
    let mut names = lua
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("--"))
        .map(|text| text.trim().to_string());
    let local = names.next().unwrap_or_default();
    let alt = names.next().unwrap_or_default();
    (local, alt)
}
