use std::collections::{HashMap, HashSet};

use super::resolver::CardInfo;

pub struct DeckRow {
    pub id: i64,
    pub copies: usize,
    pub name: String,
    pub kind: String,
}

pub fn copy_count(ids: &[i64], id: i64) -> usize {
    ids.iter().filter(|&&x| x == id).count()
}

/// One row per distinct id, ordered by first appearance.
pub fn group(ids: &[i64], infos: &HashMap<i64, CardInfo>) -> Vec<DeckRow> {
    let mut seen = HashSet::new();
    ids.iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .map(|id| {
            let (name, kind) = match infos.get(&id) {
                Some(info) => (info.name.clone(), info.kind.clone()),
                None => (CardInfo::UNKNOWN_NAME.to_string(), String::new()),
            };
            DeckRow { id, copies: copy_count(ids, id), name, kind }
        })
        .collect()
}

pub fn print_section(title: &str, ids: &[i64], infos: &HashMap<i64, CardInfo>) {
    println!("\n{} Deck ({} cards)", title, ids.len());
    if ids.is_empty() {
        return;
    }
    println!(
        "{:>3} | {:>2} | {:>9} | {:<36} | {:<24}",
        "#", "x", "Id", "Name", "Type"
    );
    println!("{}", "-".repeat(86));
    for (i, r) in group(ids, infos).iter().enumerate() {
        println!(
            "{:>3} | {:>2} | {:>9} | {:<36} | {:<24}",
            i + 1,
            r.copies,
            r.id,
            truncate(&r.name, 36),
            truncate(&r.kind, 24)
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
