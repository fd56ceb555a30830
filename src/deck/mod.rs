pub mod present;
pub mod resolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Main,
    Extra,
    Side,
}

/// Card ids per deck section, in file order. Repeats are separate copies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeckList {
    pub main: Vec<i64>,
    pub extra: Vec<i64>,
    pub side: Vec<i64>,
}

impl DeckList {
    pub fn sections(&self) -> [(&'static str, &[i64]); 3] {
        [
            ("Main", self.main.as_slice()),
            ("Extra", self.extra.as_slice()),
            ("Side", self.side.as_slice()),
        ]
    }

    /// Every distinct id across all sections, first appearance first.
    pub fn unique_ids(&self) -> Vec<i64> {
        let mut seen = std::collections::HashSet::new();
        self.main
            .iter()
            .chain(&self.extra)
            .chain(&self.side)
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

pub fn parse_bytes(bytes: &[u8]) -> DeckList {
    parse(&String::from_utf8_lossy(bytes))
}

/// Parse `#main` / `#extra` / `#side` (or `!side`) sectioned id lists.
/// Other `#` lines are comments; anything that is not a plain number is
/// ignored, as are numbers before the first section marker.
pub fn parse(text: &str) -> DeckList {
    let mut deck = DeckList::default();
    let mut current: Option<Section> = None;

    for line in text.lines().map(str::trim) {
        match line {
            "" => continue,
            "#main" => current = Some(Section::Main),
            "#extra" => current = Some(Section::Extra),
            "#side" | "!side" => current = Some(Section::Side),
            l if l.starts_with('#') => continue,
            l if l.bytes().all(|b| b.is_ascii_digit()) => {
                let (Some(section), Ok(id)) = (current, l.parse::<i64>()) else {
                    continue;
                };
                match section {
                    Section::Main => deck.main.push(id),
                    Section::Extra => deck.extra.push(id),
                    Section::Side => deck.side.push(id),
                }
            }
            _ => continue,
        }
    }
    deck
}
