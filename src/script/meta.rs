use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    Flag(bool),
    Texts(Vec<String>),
    Ints(Vec<i64>),
}

/// Heuristic flags and token lists, keyed by catalog field name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Meta(BTreeMap<&'static str, MetaValue>);

impl Meta {
    /// Names of the boolean fields that came out `true`.
    pub fn raised_flags(&self) -> Vec<&'static str> {
        self.0
            .iter()
            .filter(|(_, v)| matches!(v, MetaValue::Flag(true)))
            .map(|(k, _)| *k)
            .collect()
    }
}

#[cfg(test)]
impl Meta {
    pub fn flag(&self, field: &str) -> bool {
        matches!(self.0.get(field), Some(MetaValue::Flag(true)))
    }

    pub fn texts(&self, field: &str) -> &[String] {
        match self.0.get(field) {
            Some(MetaValue::Texts(v)) => v,
            _ => &[],
        }
    }

    pub fn ints(&self, field: &str) -> &[i64] {
        match self.0.get(field) {
            Some(MetaValue::Ints(v)) => v,
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&&'static str, &MetaValue)> {
        self.0.iter()
    }
}

enum Shape {
    /// true when any pattern matches anywhere
    Flag(&'static [&'static str]),
    /// sorted set of whole matches
    Tokens(&'static [&'static str]),
    /// sorted set of integers from capture group 1
    Codes(&'static str),
    /// group 1 of the first match, comma separated
    BraceTokens(&'static str),
    /// digit runs inside group 1 of the first match
    BraceNumbers(&'static str),
}

struct Rule {
    field: &'static str,
    shape: Shape,
}

// directives appear as `e1:SetCountLimit(...)` or `e.SetCountLimit(...)`
const COUNT_LIMIT_DUEL: &str = r"[.:]SetCountLimit\s*\([^)]*EFFECT_COUNT_CODE_DUEL";
const CATEGORY: &str = r"CATEGORY_[A-Z_]+";

const RULES: &[Rule] = &[
    Rule {
        field: "has_count_limit",
        shape: Shape::Flag(&[r"[.:]SetCountLimit\s*\(\s*([^\)]*)\)"]),
    },
    Rule {
        field: "has_once_per_turn_like",
        shape: Shape::Flag(&[
            r"[.:]SetCountLimit\s*\(\s*1\s*,\s*id\s*\)",
            r"(?i)SetCountLimit\s*\([^)\n]*\)[ \t]*--[^\n]*\bonce\b",
        ]),
    },
    Rule {
        field: "has_once_per_duel",
        shape: Shape::Flag(&[COUNT_LIMIT_DUEL, r"EFFECT_COUNT_CODE_DUEL"]),
    },
    Rule {
        field: "has_duel_count_directive",
        shape: Shape::Flag(&[COUNT_LIMIT_DUEL]),
    },
    Rule {
        field: "listed_series",
        shape: Shape::BraceTokens(r"s\.listed_series\s*=\s*\{([^\}]*)\}"),
    },
    Rule {
        field: "listed_names",
        shape: Shape::BraceNumbers(r"s\.listed_names\s*=\s*\{([^\}]*)\}"),
    },
    Rule { field: "categories", shape: Shape::Tokens(&[CATEGORY]) },
    Rule { field: "events", shape: Shape::Tokens(&[r"EVENT_[A-Z_]+"]) },
    Rule { field: "effect_flags", shape: Shape::Tokens(&[r"EFFECT_FLAG_[A-Z_]+"]) },
    Rule { field: "effect_types", shape: Shape::Tokens(&[r"EFFECT_TYPE_[A-Z_]+"]) },
    Rule {
        field: "has_target_property",
        shape: Shape::Flag(&[r"[.:]SetProperty\s*\(([^)]*)\)", r"EFFECT_FLAG_CARD_TARGET"]),
    },
    Rule {
        field: "has_indestructible",
        shape: Shape::Flag(&[r"EFFECT_INDESTRUCTABLE_EFFECT|EFFECT_INDESTRUCTABLE_BATTLE"]),
    },
    Rule {
        field: "has_cannot_be_target",
        shape: Shape::Flag(&[r"EFFECT_CANNOT_BE_EFFECT_TARGET"]),
    },
    Rule {
        field: "has_cannot_special_summon",
        shape: Shape::Flag(&[r"EFFECT_CANNOT_SPECIAL_SUMMON"]),
    },
    Rule {
        field: "has_custom_activity_counter",
        shape: Shape::Flag(&[r"AddCustomActivityCounter|CustomActivityCounter"]),
    },
    Rule {
        field: "referenced_codes",
        shape: Shape::Codes(r"IsCode\s*\(\s*(\d+)\s*\)"),
    },
    Rule {
        field: "category_calls",
        shape: Shape::Tokens(&[r"Category\.\w+", CATEGORY]),
    },
];

struct CompiledRule {
    field: &'static str,
    kind: Kind,
    patterns: Vec<Regex>,
}

#[derive(Clone, Copy)]
enum Kind {
    Flag,
    Tokens,
    Codes,
    BraceTokens,
    BraceNumbers,
}

static COMPILED: LazyLock<Vec<CompiledRule>> =
    LazyLock::new(|| RULES.iter().map(compile).collect());

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

fn compile(rule: &Rule) -> CompiledRule {
    let (kind, sources): (Kind, Vec<&str>) = match &rule.shape {
        Shape::Flag(p) => (Kind::Flag, p.to_vec()),
        Shape::Tokens(p) => (Kind::Tokens, p.to_vec()),
        Shape::Codes(p) => (Kind::Codes, vec![*p]),
        Shape::BraceTokens(p) => (Kind::BraceTokens, vec![*p]),
        Shape::BraceNumbers(p) => (Kind::BraceNumbers, vec![*p]),
    };
    CompiledRule {
        field: rule.field,
        kind,
        patterns: sources.into_iter().map(|s| Regex::new(s).unwrap()).collect(),
    }
}

/// Run every catalog rule over the script text. Missing patterns give
/// `false` or an empty list; malformed Lua is never an error.
pub fn detect(lua: &str) -> Meta {
    Meta(COMPILED.iter().map(|rule| (rule.field, evaluate(rule, lua))).collect())
}

fn evaluate(rule: &CompiledRule, lua: &str) -> MetaValue {
    match rule.kind {
        Kind::Flag => MetaValue::Flag(rule.patterns.iter().any(|re| re.is_match(lua))),
        Kind::Tokens => {
            let set: BTreeSet<&str> = rule
                .patterns
                .iter()
                .flat_map(|re| re.find_iter(lua).map(|m| m.as_str()))
                .collect();
            MetaValue::Texts(set.into_iter().map(str::to_string).collect())
        }
        Kind::Codes => {
            let set: BTreeSet<i64> = rule
                .patterns
                .iter()
                .flat_map(|re| re.captures_iter(lua))
                .filter_map(|c| c[1].parse().ok())
                .collect();
            MetaValue::Ints(set.into_iter().collect())
        }
        Kind::BraceTokens => {
            let tokens: Vec<String> = first_group(rule, lua)
                .map(|inner| {
                    inner
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            MetaValue::Texts(tokens)
        }
        Kind::BraceNumbers => {
            let numbers: Vec<i64> = first_group(rule, lua)
                .map(|inner| {
                    DIGITS_RE
                        .find_iter(inner)
                        .filter_map(|m| m.as_str().parse().ok())
                        .collect()
                })
                .unwrap_or_default();
            MetaValue::Ints(numbers)
        }
    }
}

fn first_group<'a>(rule: &CompiledRule, lua: &'a str) -> Option<&'a str> {
    rule.patterns
        .iter()
        .find_map(|re| re.captures(lua))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
    }

    #[test]
    fn catalog_is_complete_and_compiles() {
        let meta = detect("");
        assert_eq!(meta.len(), RULES.len());
        for (field, value) in meta.iter() {
            match value {
                MetaValue::Flag(b) => assert!(!b, "{field} should default to false"),
                MetaValue::Texts(v) => assert!(v.is_empty(), "{field} should be empty"),
                MetaValue::Ints(v) => assert!(v.is_empty(), "{field} should be empty"),
            }
        }
    }

    #[test]
    fn listed_series_and_indestructible_only() {
        let lua = "s.listed_series = {SERIES_A, SERIES_B}\ne1:SetCode(EFFECT_INDESTRUCTABLE_EFFECT)\n";
        let meta = detect(lua);
        assert_eq!(meta.texts("listed_series"), ["SERIES_A", "SERIES_B"]);
        assert!(meta.flag("has_indestructible"));

        for (field, value) in meta.iter() {
            if matches!(*field, "listed_series" | "has_indestructible") {
                continue;
            }
            match value {
                MetaValue::Flag(b) => assert!(!b, "{field}"),
                MetaValue::Texts(v) => assert!(v.is_empty(), "{field}"),
                MetaValue::Ints(v) => assert!(v.is_empty(), "{field}"),
            }
        }
    }

    #[test]
    fn hard_once_per_turn() {
        let meta = detect(&fixture("c4001.lua"));
        assert!(meta.flag("has_count_limit"));
        assert!(meta.flag("has_once_per_turn_like"));
        assert!(!meta.flag("has_once_per_duel"));
        assert!(meta.flag("has_target_property"));
        assert_eq!(meta.ints("listed_names"), [89631139, 46986414]);
        assert_eq!(meta.ints("referenced_codes"), [46986414, 89631139]);
        assert_eq!(
            meta.texts("categories"),
            ["CATEGORY_DESTROY", "CATEGORY_SPECIAL_SUMMON"]
        );
        assert_eq!(meta.texts("events"), ["EVENT_SUMMON_SUCCESS"]);
        assert_eq!(meta.texts("effect_flags"), ["EFFECT_FLAG_CARD_TARGET", "EFFECT_FLAG_DELAY"]);
        assert_eq!(meta.texts("effect_types"), ["EFFECT_TYPE_SINGLE", "EFFECT_TYPE_TRIGGER_O"]);
    }

    #[test]
    fn once_comment_marks_turn_limit() {
        let lua = "e1:SetCountLimit(1) -- Once per turn\n";
        let meta = detect(lua);
        assert!(meta.flag("has_count_limit"));
        assert!(meta.flag("has_once_per_turn_like"));

        let lua = "e1:SetCountLimit(2)\n-- once\n";
        assert!(!detect(lua).flag("has_once_per_turn_like"));
    }

    #[test]
    fn duel_scope_rules_stay_separate() {
        let call = detect("e1:SetCountLimit(1,id,EFFECT_COUNT_CODE_DUEL)");
        assert!(call.flag("has_once_per_duel"));
        assert!(call.flag("has_duel_count_directive"));

        let two_args = detect("e1:SetCountLimit(1,EFFECT_COUNT_CODE_DUEL)");
        assert!(two_args.flag("has_duel_count_directive"));

        let bare = detect("local flag=EFFECT_COUNT_CODE_DUEL");
        assert!(bare.flag("has_once_per_duel"));
        assert!(!bare.flag("has_duel_count_directive"));
    }

    #[test]
    fn method_call_directives_are_detected() {
        let lua = "e1:SetProperty(EFFECT_FLAG_DELAY)\n\
                   e1:SetCountLimit(1,id)\n\
                   e2:SetCountLimit(1,{id,1},EFFECT_COUNT_CODE_OATH+EFFECT_COUNT_CODE_DUEL)";
        let meta = detect(lua);
        assert!(meta.flag("has_count_limit"));
        assert!(meta.flag("has_once_per_turn_like"));
        assert!(meta.flag("has_target_property"));
        assert!(meta.flag("has_duel_count_directive"));
        assert!(meta.flag("has_once_per_duel"));

        let dotted = detect("e.SetCountLimit(1,id)\ne.SetProperty(EFFECT_FLAG_DELAY)");
        assert!(dotted.flag("has_once_per_turn_like"));
        assert!(dotted.flag("has_target_property"));
    }

    #[test]
    fn category_calls_cover_both_spellings() {
        let meta = detect("e1:SetCategory(CATEGORY_TOHAND+CATEGORY_SEARCH)\nlocal c=Category.Draw\nlocal d=Category.Draw");
        assert_eq!(
            meta.texts("category_calls"),
            ["CATEGORY_SEARCH", "CATEGORY_TOHAND", "Category.Draw"]
        );
        assert_eq!(meta.texts("categories"), ["CATEGORY_SEARCH", "CATEGORY_TOHAND"]);
    }

    #[test]
    fn counters_and_restrictions() {
        let lua = "Duel.AddCustomActivityCounter(id,ACTIVITY_SPSUMMON,s.counterfilter)\n\
                   e2:SetCode(EFFECT_CANNOT_SPECIAL_SUMMON)\n\
                   e3:SetCode(EFFECT_CANNOT_BE_EFFECT_TARGET)";
        let meta = detect(lua);
        assert!(meta.flag("has_custom_activity_counter"));
        assert!(meta.flag("has_cannot_special_summon"));
        assert!(meta.flag("has_cannot_be_target"));
        assert!(!meta.flag("has_indestructible"));
    }

    #[test]
    fn serializes_as_plain_json_object() {
        let meta = detect("s.listed_names={12345}");
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["listed_names"], serde_json::json!([12345]));
        assert_eq!(value["has_count_limit"], serde_json::json!(false));
    }
}
