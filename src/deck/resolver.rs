use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::{DocumentStore, Extension};
use crate::error::SyncError;

/// Extension key under which resolved card info is cached in the store.
pub const CARD_INFO_KEY: &str = "card_info";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardSet {
    pub set_name: String,
    pub set_code: String,
    pub set_rarity: String,
    pub set_price: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardInfo {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub race: String,
    pub attribute: Option<String>,
    pub level: Option<u32>,
    pub link_value: Option<u32>,
    pub atk: Option<i32>,
    pub def: Option<i32>,
    pub image_url: Option<String>,
    pub image_url_small: Option<String>,
    pub desc: String,
    pub sets: Vec<CardSet>,
    pub prices: BTreeMap<String, String>,
}

impl CardInfo {
    pub const UNKNOWN_NAME: &'static str = "Unknown card";

    pub fn placeholder(id: i64) -> Self {
        CardInfo {
            id,
            name: Self::UNKNOWN_NAME.to_string(),
            ..Default::default()
        }
    }
}

// ── Remote API shape (cardinfo.php) ──

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    data: Vec<ApiCard>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ApiCard {
    id: i64,
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    race: String,
    attribute: Option<String>,
    level: Option<u32>,
    linkval: Option<u32>,
    atk: Option<i32>,
    def: Option<i32>,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    card_sets: Vec<CardSet>,
    #[serde(default)]
    card_images: Vec<ApiImage>,
    #[serde(default)]
    card_prices: Vec<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
struct ApiImage {
    image_url: Option<String>,
    image_url_small: Option<String>,
}

impl From<ApiCard> for CardInfo {
    fn from(c: ApiCard) -> Self {
        let image = c.card_images.into_iter().next();
        CardInfo {
            id: c.id,
            name: c.name,
            kind: c.kind,
            race: c.race,
            attribute: c.attribute,
            level: c.level,
            link_value: c.linkval,
            atk: c.atk,
            def: c.def,
            image_url: image.as_ref().and_then(|i| i.image_url.clone()),
            image_url_small: image.and_then(|i| i.image_url_small),
            desc: c.desc,
            sets: c.card_sets,
            prices: c.card_prices.into_iter().next().unwrap_or_default(),
        }
    }
}

pub fn parse_response(id: i64, body: &str) -> Result<CardInfo, SyncError> {
    let upstream = |reason: String| SyncError::Upstream { id, reason };
    let resp: ApiResponse = serde_json::from_str(body).map_err(|e| upstream(e.to_string()))?;
    if let Some(err) = resp.error {
        return Err(upstream(err));
    }
    resp.data
        .into_iter()
        .next()
        .map(CardInfo::from)
        .ok_or_else(|| upstream("empty response".to_string()))
}

/// Source of card info for ids the store cannot answer.
pub trait CardLookup {
    async fn fetch(&self, id: i64) -> Result<CardInfo, SyncError>;
}

pub struct ApiLookup {
    client: reqwest::Client,
    base_url: String,
}

impl ApiLookup {
    pub fn new(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ignis_sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(ApiLookup {
            client,
            base_url: base_url.to_string(),
        })
    }
}

impl CardLookup for ApiLookup {
    async fn fetch(&self, id: i64) -> Result<CardInfo, SyncError> {
        let upstream = |reason: String| SyncError::Upstream { id, reason };
        debug!(id, "Fetching card info");
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("id", id)])
            .send()
            .await
            .map_err(|e| upstream(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| upstream(e.to_string()))?;
        if !status.is_success() {
            // the API explains misses in the body ({"error": ...})
            return Err(parse_response(id, &body)
                .err()
                .unwrap_or_else(|| upstream(format!("HTTP {}", status))));
        }
        parse_response(id, &body)
    }
}

/// Lookup used with `--offline`: the store is the only source.
pub struct OfflineLookup;

impl CardLookup for OfflineLookup {
    async fn fetch(&self, id: i64) -> Result<CardInfo, SyncError> {
        Err(SyncError::Upstream {
            id,
            reason: "offline".to_string(),
        })
    }
}

/// Resolves ids through an in-memory cache, then the store, then `lookup`.
/// Ids nothing can resolve become placeholders; resolution never fails.
pub struct CardInfoResolver<'a, S, L> {
    store: &'a S,
    lookup: L,
    cache: HashMap<i64, CardInfo>,
    pub fetched: usize,
    pub placeholders: usize,
}

impl<'a, S: DocumentStore, L: CardLookup> CardInfoResolver<'a, S, L> {
    pub fn new(store: &'a S, lookup: L) -> Self {
        CardInfoResolver {
            store,
            lookup,
            cache: HashMap::new(),
            fetched: 0,
            placeholders: 0,
        }
    }

    pub async fn resolve_all(&mut self, ids: &[i64]) -> &HashMap<i64, CardInfo> {
        let mut seen = HashSet::new();
        let missing: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| !self.cache.contains_key(id) && seen.insert(*id))
            .collect();
        if missing.is_empty() {
            return &self.cache;
        }

        let docs = self.store.find_cards(&missing).unwrap_or_else(|e| {
            warn!("Store lookup for {} cards failed: {}", missing.len(), e);
            Vec::new()
        });

        let mut fallback_names = HashMap::new();
        for doc in docs {
            let stored = doc
                .extension
                .get(CARD_INFO_KEY)
                .and_then(|v| serde_json::from_value::<CardInfo>(v.clone()).ok());
            if let Some(info) = stored {
                self.cache.insert(doc.id, info);
            } else if let Some(name) = doc.name_alt.filter(|n| !n.is_empty()) {
                fallback_names.insert(doc.id, name);
            }
        }

        for id in missing {
            if self.cache.contains_key(&id) {
                continue;
            }
            let info = match self.lookup.fetch(id).await {
                Ok(info) => {
                    self.fetched += 1;
                    self.write_back(&info);
                    info
                }
                Err(e) => {
                    warn!(id, "{}", e);
                    self.placeholders += 1;
                    let mut info = CardInfo::placeholder(id);
                    if let Some(name) = fallback_names.remove(&id) {
                        info.name = name;
                    }
                    info
                }
            };
            self.cache.insert(id, info);
        }

        info!(
            cached = self.cache.len(),
            fetched = self.fetched,
            placeholders = self.placeholders,
            "Card info resolved"
        );
        &self.cache
    }

    fn write_back(&self, info: &CardInfo) {
        let value = match serde_json::to_value(info) {
            Ok(v) => v,
            Err(e) => {
                warn!(id = info.id, "Cannot encode card info: {}", e);
                return;
            }
        };
        let mut fields = Extension::new();
        fields.insert(CARD_INFO_KEY.to_string(), value);
        match self.store.merge_extension(info.id, &fields) {
            Ok(true) => debug!(id = info.id, "Cached card info in store"),
            Ok(false) => debug!(id = info.id, "No stored card to attach info to"),
            Err(e) => warn!(id = info.id, "Caching card info failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::db::SqliteStore;
    use crate::merge::UpdateSet;

    const DARK_MAGICIAN: &str = r#"{"data":[{"id":46986414,"name":"Dark Magician","type":"Normal Monster",
        "desc":"The ultimate wizard.","atk":2500,"def":2100,"level":7,"race":"Spellcaster","attribute":"DARK",
        "card_sets":[{"set_name":"Legend of Blue Eyes","set_code":"LOB-005","set_rarity":"Ultra Rare","set_price":"12.5"}],
        "card_images":[{"id":46986414,"image_url":"https://img/46986414.jpg","image_url_small":"https://img/s/46986414.jpg"}],
        "card_prices":[{"cardmarket_price":"0.10","tcgplayer_price":"0.20"}]}]}"#;

    struct StubLookup {
        calls: Cell<usize>,
    }

    impl CardLookup for StubLookup {
        async fn fetch(&self, id: i64) -> Result<CardInfo, SyncError> {
            self.calls.set(self.calls.get() + 1);
            if id == 46986414 {
                parse_response(id, DARK_MAGICIAN)
            } else {
                Err(SyncError::Upstream { id, reason: "not found".into() })
            }
        }
    }

    fn stub() -> StubLookup {
        StubLookup { calls: Cell::new(0) }
    }

    fn store_with(id: i64, name_alt: &str) -> SqliteStore {
        let store = SqliteStore::in_memory();
        let update = UpdateSet {
            name_local: Some(String::new()),
            name_alt: Some(name_alt.to_string()),
            ..Default::default()
        };
        store.upsert_fields(id, &update).unwrap();
        store
    }

    #[test]
    fn api_payload_is_flattened() {
        let info = parse_response(46986414, DARK_MAGICIAN).unwrap();
        assert_eq!(info.name, "Dark Magician");
        assert_eq!(info.kind, "Normal Monster");
        assert_eq!(info.level, Some(7));
        assert_eq!(info.link_value, None);
        assert_eq!(info.atk, Some(2500));
        assert_eq!(info.image_url.as_deref(), Some("https://img/46986414.jpg"));
        assert_eq!(info.sets[0].set_code, "LOB-005");
        assert_eq!(info.prices["tcgplayer_price"], "0.20");
    }

    #[test]
    fn api_error_body_is_upstream_error() {
        let err = parse_response(1, r#"{"error":"No card matching your query was found in the database."}"#)
            .unwrap_err();
        assert!(matches!(err, SyncError::Upstream { id: 1, .. }));
        assert!(parse_response(1, "<html>").is_err());
    }

    #[tokio::test]
    async fn fetches_once_and_writes_back() {
        let store = store_with(46986414, "Dark Magician");
        let mut resolver = CardInfoResolver::new(&store, stub());

        let infos = resolver.resolve_all(&[46986414, 46986414]).await;
        assert_eq!(infos[&46986414].atk, Some(2500));
        resolver.resolve_all(&[46986414]).await;
        assert_eq!(resolver.lookup.calls.get(), 1);

        let doc = store.find_card(46986414).unwrap().unwrap();
        assert_eq!(doc.extension[CARD_INFO_KEY]["name"], "Dark Magician");

        // a fresh resolver is served from the store
        let mut second = CardInfoResolver::new(&store, stub());
        let infos = second.resolve_all(&[46986414]).await;
        assert_eq!(infos[&46986414].name, "Dark Magician");
        assert_eq!(second.lookup.calls.get(), 0);
    }

    #[tokio::test]
    async fn failures_become_placeholders() {
        let store = store_with(4001, "Apprentice of the Dark Arts");
        let mut resolver = CardInfoResolver::new(&store, OfflineLookup);

        let infos = resolver.resolve_all(&[4001, 777]).await;
        assert_eq!(infos[&4001].name, "Apprentice of the Dark Arts");
        assert_eq!(infos[&777], CardInfo::placeholder(777));
        assert_eq!(resolver.placeholders, 2);
        assert_eq!(resolver.fetched, 0);
    }
}
