//! Read-only context blocks for a narrative consumer.
//!
//! Every accessor returns plain text and degrades to an empty string when
//! the graph is missing or unreadable, so callers work with zero graph data.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use holocron_core::RetrievalSettings;
use holocron_core::resolver::{slugify, title_case_id};
use holocron_core::vocabulary::{CONTROLS, EntityType, FACTION_DYNAMICS, PARTICIPATED_IN};
use holocron_db::{DbResult, Direction, Entity, GraphStore, SummaryFilter, SummaryType, Triple};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::budget::trim_to_budget;

pub const CHARACTERS_HEADER: &str = "### Character Relationships";
pub const FACTIONS_HEADER: &str = "### Faction Dynamics";
pub const EVENTS_HEADER: &str = "### Relevant Events";

/// Hard cap on characters rendered per request.
pub const MAX_CHARACTERS: usize = 6;
pub const MAX_FACTION_LINES: usize = 10;
const ARC_EXCERPT_CHARS: usize = 200;
const DOSSIER_EXCERPT_CHARS: usize = 300;
const EVENT_EXCERPT_CHARS: usize = 100;

/// Inputs for the composed accessors.
#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    pub character_ids: Vec<String>,
    pub faction_ids: Vec<String>,
    pub location: Option<String>,
    pub era: String,
    /// Falls back to the configured budget when `None`
    pub token_budget: Option<usize>,
}

const ELLIPSIS: &str = "...";

/// Shorten to at most `max_chars` characters, ellipsis included.
fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let cut = text.char_indices().nth(keep).map_or(text.len(), |(i, _)| i);
    format!("{}{ELLIPSIS}", text[..cut].trim_end())
}

fn degrade<T: Default>(what: &str, result: DbResult<T>) -> T {
    result.unwrap_or_else(|e| {
        debug!(query = what, error = %e, "graph read failed, returning empty");
        T::default()
    })
}

pub struct RuntimeRetriever {
    db_path: Option<PathBuf>,
    store: OnceCell<Option<GraphStore>>,
    settings: RetrievalSettings,
}

impl RuntimeRetriever {
    /// Retriever over the database at `db_path`, opened on first use.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(db_path.into()),
            store: OnceCell::new(),
            settings: RetrievalSettings::default(),
        }
    }

    pub fn from_store(store: GraphStore) -> Self {
        Self {
            db_path: None,
            store: OnceCell::new_with(Some(Some(store))),
            settings: RetrievalSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RetrievalSettings) -> Self {
        self.settings = settings;
        self
    }

    async fn store(&self) -> Option<&GraphStore> {
        self.store
            .get_or_init(|| async {
                let path = self.db_path.as_ref()?;
                match GraphStore::open_read_only(path).await {
                    Ok(store) => Some(store),
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "graph store unavailable");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    async fn display_name(&self, store: &GraphStore, id: &str, names: &mut HashMap<String, String>) -> String {
        if let Some(name) = names.get(id) {
            return name.clone();
        }
        let name = degrade("entity", store.get_entity(id).await)
            .map(|entity| entity.canonical_name)
            .unwrap_or_else(|| title_case_id(id));
        names.insert(id.to_string(), name.clone());
        name
    }

    async fn phrase(&self, store: &GraphStore, triple: &Triple, names: &mut HashMap<String, String>) -> String {
        let subject = self.display_name(store, &triple.subject_id, names).await;
        let object = self.display_name(store, &triple.object_id, names).await;
        format!("{subject} {} {object}", store.vocabulary().label(&triple.predicate))
    }

    /// Relationship block for up to [`MAX_CHARACTERS`] characters.
    pub async fn character_context(&self, ids: &[String], era: &str, max_relationships: usize) -> String {
        let Some(store) = self.store().await else {
            return String::new();
        };
        let mut names = HashMap::new();
        let mut blocks = Vec::new();

        for id in ids.iter().take(MAX_CHARACTERS.min(self.settings.max_characters.max(1))) {
            let Some(entity) = degrade("entity", store.get_entity(id).await) else {
                debug!(entity = %id, "character not in graph");
                continue;
            };
            names.insert(entity.id.clone(), entity.canonical_name.clone());

            let details: Vec<String> = ["species", "role", "faction"]
                .iter()
                .filter_map(|key| entity.property_text(key))
                .filter(|value| !value.is_empty())
                .collect();
            let mut block = if details.is_empty() {
                format!("**{}**", entity.canonical_name)
            } else {
                format!("**{}** ({})", entity.canonical_name, details.join(", "))
            };

            let triples = degrade(
                "triples",
                store.triples_for_entity(&entity.id, Direction::Both, Some(era)).await,
            );
            for triple in triples.iter().take(max_relationships) {
                block.push_str(&format!("\n- {}", self.phrase(store, triple, &mut names).await));
            }

            let arcs = degrade(
                "arc",
                store
                    .summaries(&SummaryFilter::of_type(SummaryType::CharacterArc).entity(entity.id.as_str()).era(era))
                    .await,
            );
            if let Some(arc) = arcs.first() {
                block.push_str(&format!("\nArc: {}", excerpt(&arc.text, ARC_EXCERPT_CHARS)));
            }
            blocks.push(block);
        }

        if blocks.is_empty() {
            return String::new();
        }
        format!("{CHARACTERS_HEADER}\n{}", blocks.join("\n\n"))
    }

    /// Strongest alliance and rivalry triples, optionally limited to triples
    /// touching `faction_ids`.
    pub async fn faction_dynamics(&self, faction_ids: Option<&[String]>, era: &str) -> String {
        let Some(store) = self.store().await else {
            return String::new();
        };
        let wanted: Option<HashSet<&str>> =
            faction_ids.map(|ids| ids.iter().map(String::as_str).collect());

        let mut triples = Vec::new();
        for predicate in FACTION_DYNAMICS {
            triples.extend(degrade("faction triples", store.triples_by_predicate(predicate, Some(era)).await));
        }
        if let Some(wanted) = &wanted {
            triples.retain(|t| wanted.contains(t.subject_id.as_str()) || wanted.contains(t.object_id.as_str()));
        }
        triples.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then(b.confidence.total_cmp(&a.confidence))
                .then(a.id.cmp(&b.id))
        });

        let mut names = HashMap::new();
        let mut lines = Vec::new();
        for triple in triples.iter().take(MAX_FACTION_LINES) {
            lines.push(format!("- {}", self.phrase(store, triple, &mut names).await));
        }
        if lines.is_empty() {
            return String::new();
        }
        format!("{FACTIONS_HEADER}\n{}", lines.join("\n"))
    }

    async fn find_location(&self, store: &GraphStore, name: &str, era: &str) -> Option<Entity> {
        let by_name = degrade("location", store.find_entities_by_name(name.trim(), Some(era)).await);
        if let Some(found) = by_name.into_iter().find(|e| e.kind() == Some(EntityType::Location)) {
            return Some(found);
        }
        let slug = slugify(name);
        if slug.is_empty() {
            return None;
        }
        degrade("location", store.get_entity(&slug).await)
            .filter(|e| e.kind() == Some(EntityType::Location))
    }

    /// Type, region, controlling faction and dossier excerpt for a location.
    pub async fn location_context(&self, name: &str, era: &str) -> String {
        let Some(store) = self.store().await else {
            return String::new();
        };
        let Some(location) = self.find_location(store, name, era).await else {
            debug!(location = name, "location not in graph");
            return String::new();
        };

        let mut lines = vec![format!("### Location: {}", location.canonical_name)];
        let kind = location
            .property_text("type")
            .or_else(|| location.property_text("location_type"))
            .unwrap_or_else(|| location.entity_type.to_lowercase());
        lines.push(format!("Type: {kind}"));
        if let Some(region) = location.property_text("region") {
            lines.push(format!("Region: {region}"));
        }

        let incoming = degrade(
            "control",
            store.triples_for_entity(&location.id, Direction::Incoming, Some(era)).await,
        );
        let mut names = HashMap::new();
        let controller = match incoming.iter().find(|t| t.predicate == CONTROLS) {
            Some(triple) => Some(self.display_name(store, &triple.subject_id, &mut names).await),
            None => location.property_text("controlled_by"),
        };
        if let Some(controller) = controller {
            lines.push(format!("Controlled by: {controller}"));
        }

        let dossiers = degrade(
            "dossier",
            store
                .summaries(&SummaryFilter::of_type(SummaryType::LocationDossier).entity(location.id.as_str()).era(era))
                .await,
        );
        if let Some(dossier) = dossiers.first() {
            lines.push(excerpt(&dossier.text, DOSSIER_EXCERPT_CHARS));
        }
        lines.join("\n")
    }

    /// Events scored by participant overlap (+2 each) and location match (+1).
    /// With neither filter, up to `3 * max_events` events are listed.
    pub async fn relevant_events(
        &self,
        character_ids: &[String],
        location: Option<&str>,
        era: &str,
        max_events: usize,
    ) -> String {
        let Some(store) = self.store().await else {
            return String::new();
        };
        let events = degrade("events", store.entities_by_type(EntityType::Event, Some(era)).await);
        let location = location.map(|l| l.trim().to_lowercase()).filter(|l| !l.is_empty());

        let selected: Vec<&Entity> = if character_ids.is_empty() && location.is_none() {
            events.iter().take(max_events.saturating_mul(3)).collect()
        } else {
            let wanted: HashSet<&str> = character_ids.iter().map(String::as_str).collect();
            let mut participants: HashMap<&str, Vec<&str>> = HashMap::new();
            let participation = degrade(
                "participation",
                store.triples_by_predicate(PARTICIPATED_IN, Some(era)).await,
            );
            for triple in &participation {
                participants
                    .entry(triple.object_id.as_str())
                    .or_default()
                    .push(triple.subject_id.as_str());
            }

            let mut scored: Vec<(usize, &Entity)> = events
                .iter()
                .map(|event| {
                    let overlap = participants
                        .get(event.id.as_str())
                        .map(|ids| ids.iter().filter(|id| wanted.contains(*id)).count())
                        .unwrap_or(0);
                    let at_location = location.as_deref().is_some_and(|wanted_location| {
                        event
                            .property_text("location")
                            .is_some_and(|l| l.to_lowercase().contains(wanted_location))
                    });
                    (overlap * 2 + usize::from(at_location), event)
                })
                .filter(|(score, _)| *score > 0)
                .collect();
            // stable: equal scores keep the store's confidence/id order
            scored.sort_by(|a, b| b.0.cmp(&a.0));
            scored.into_iter().take(max_events).map(|(_, event)| event).collect()
        };

        if selected.is_empty() {
            return String::new();
        }
        let lines: Vec<String> = selected
            .iter()
            .map(|event| match event.property_text("outcome").filter(|o| !o.is_empty()) {
                Some(outcome) => format!("- {}: {}", event.canonical_name, excerpt(&outcome, EVENT_EXCERPT_CHARS)),
                None => format!("- {}", event.canonical_name),
            })
            .collect();
        format!("{EVENTS_HEADER}\n{}", lines.join("\n"))
    }

    /// Characters, factions, location and events for scene direction.
    pub async fn director_context(&self, request: &ContextRequest) -> String {
        let factions = (!request.faction_ids.is_empty()).then_some(request.faction_ids.as_slice());
        let sections = vec![
            self.character_context(&request.character_ids, &request.era, self.settings.max_relationships)
                .await,
            self.faction_dynamics(factions, &request.era).await,
            self.location_section(request).await,
            self.relevant_events(
                &request.character_ids,
                request.location.as_deref(),
                &request.era,
                self.settings.max_events,
            )
            .await,
        ];
        self.compose("## World State (director)", sections, request)
    }

    /// Characters, location and events for prose narration.
    pub async fn narrator_context(&self, request: &ContextRequest) -> String {
        let sections = vec![
            self.character_context(&request.character_ids, &request.era, self.settings.max_relationships)
                .await,
            self.location_section(request).await,
            self.relevant_events(
                &request.character_ids,
                request.location.as_deref(),
                &request.era,
                self.settings.max_events,
            )
            .await,
        ];
        self.compose("## Story Context (narrator)", sections, request)
    }

    async fn location_section(&self, request: &ContextRequest) -> String {
        match &request.location {
            Some(location) => self.location_context(location, &request.era).await,
            None => String::new(),
        }
    }

    fn compose(&self, label: &str, sections: Vec<String>, request: &ContextRequest) -> String {
        let sections: Vec<String> = sections.into_iter().filter(|s| !s.is_empty()).collect();
        if sections.is_empty() {
            return String::new();
        }
        let block = format!("{label}\n\n{}", sections.join("\n\n"));
        trim_to_budget(&block, request.token_budget.unwrap_or(self.settings.token_budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_cuts_on_char_boundary() {
        assert_eq!(excerpt("  short  ", 10), "short");
        assert_eq!(excerpt("abcdef", 6), "abcdef");
        assert_eq!(excerpt("abcdefgh", 6), "abc...");
        assert_eq!(excerpt("ééééé", 4), "é...");
        assert_eq!(excerpt("abc defghi", 7), "abc...");
    }

    #[test]
    fn excerpt_never_exceeds_its_limit() {
        let long = "The Outbound Flight wreck lies buried ".repeat(20);
        for max in [100, 200, 300] {
            let cut = excerpt(&long, max);
            assert!(cut.chars().count() <= max, "{max}: {}", cut.chars().count());
            assert!(cut.ends_with("..."));
        }
    }

    #[tokio::test]
    async fn missing_database_degrades_to_empty() {
        let dir = std::env::temp_dir().join("holocron-retriever-missing");
        let retriever = RuntimeRetriever::new(dir.join("nope.sqlite3"));
        let ids = vec!["luke_skywalker".to_string()];
        assert_eq!(retriever.character_context(&ids, "rebellion", 8).await, "");
        assert_eq!(retriever.faction_dynamics(None, "rebellion").await, "");
        assert_eq!(retriever.location_context("Tatooine", "rebellion").await, "");
        assert_eq!(retriever.relevant_events(&ids, None, "rebellion", 5).await, "");
        let request = ContextRequest {
            character_ids: ids,
            era: "rebellion".to_string(),
            ..ContextRequest::default()
        };
        assert_eq!(retriever.director_context(&request).await, "");
        assert!(!dir.join("nope.sqlite3").exists());
    }
}
