use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::db::CardDocument;
use crate::script::functions::FunctionDef;
use crate::script::CardScript;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Updated,
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Inserted => "INSERTED",
            Outcome::Updated => "UPDATED",
            Outcome::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Fields to write for one card. `None` / absent entries are left as stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSet {
    pub name_local: Option<String>,
    pub name_alt: Option<String>,
    pub raw_text: Option<String>,
    pub functions: BTreeMap<String, FunctionDef>,
    pub meta: Option<Value>,
}

impl UpdateSet {
    pub fn is_empty(&self) -> bool {
        self.name_local.is_none()
            && self.name_alt.is_none()
            && self.raw_text.is_none()
            && self.functions.is_empty()
            && self.meta.is_none()
    }

    /// Dotted paths of every field this update touches.
    pub fn field_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        if self.name_local.is_some() {
            paths.push("name_local".to_string());
        }
        if self.name_alt.is_some() {
            paths.push("name_alt".to_string());
        }
        if self.raw_text.is_some() {
            paths.push("raw_text".to_string());
        }
        paths.extend(self.functions.keys().map(|name| format!("functions.{}", name)));
        if self.meta.is_some() {
            paths.push("meta".to_string());
        }
        paths
    }
}

/// Compare a fresh extraction with what is stored and decide what to write.
///
/// Scalars are written when they differ, functions one by one when new or
/// changed (stored functions missing from the extraction are kept), and
/// `meta` as a whole when any key differs.
pub fn plan(
    script: &CardScript,
    existing: Option<&CardDocument>,
) -> Result<(Outcome, UpdateSet), serde_json::Error> {
    let meta = serde_json::to_value(&script.meta)?;

    let Some(doc) = existing else {
        let update = UpdateSet {
            name_local: Some(script.name_local.clone()),
            name_alt: Some(script.name_alt.clone()),
            raw_text: Some(script.raw_text.clone()),
            functions: script.functions.clone(),
            meta: Some(meta),
        };
        return Ok((Outcome::Inserted, update));
    };

    let changed = |stored: &Option<String>, fresh: &str| -> Option<String> {
        (stored.as_deref() != Some(fresh)).then(|| fresh.to_string())
    };

    let update = UpdateSet {
        name_local: changed(&doc.name_local, &script.name_local),
        name_alt: changed(&doc.name_alt, &script.name_alt),
        raw_text: changed(&doc.raw_text, &script.raw_text),
        functions: script
            .functions
            .iter()
            .filter(|(name, def)| doc.functions.get(*name) != Some(*def))
            .map(|(name, def)| (name.clone(), def.clone()))
            .collect(),
        meta: (doc.meta.as_ref() != Some(&meta)).then_some(meta),
    };

    let outcome = if update.is_empty() {
        Outcome::Skipped
    } else {
        Outcome::Updated
    };
    Ok((outcome, update))
}
