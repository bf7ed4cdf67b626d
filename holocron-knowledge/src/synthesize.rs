//! Second pass: character arcs, location dossiers and contradiction checks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use holocron_core::resolver::title_case_id;
use holocron_core::vocabulary::{CONTROLS, EntityType, MEMBER_OF};
use holocron_db::{Direction, Entity, GraphStore, SummaryFilter, SummaryType, SummaryUpsert, Triple};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::errors::KnowledgeResult;
use crate::json_call::{JsonCallPolicy, call_json};
use crate::llm::LlmClient;

pub const ARC_MAX_WORDS: usize = 200;
pub const DOSSIER_MAX_WORDS: usize = 150;
/// Characters with fewer triples get no arc.
pub const MIN_ARC_TRIPLES: usize = 2;

const SYSTEM_PROMPT: &str = "You write concise reference entries for a story bible. \
Use only the facts provided. Reply with one JSON object: {\"summary\": str}.";

/// Totals for one synthesis pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SynthesisReport {
    pub arcs_written: usize,
    pub dossiers_written: usize,
    pub skipped: usize,
    /// Summaries assembled without the LLM after it fell back
    pub fallbacks: usize,
}

/// Advisory record of conflicting facts about one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contradiction {
    pub entity_id: String,
    pub entity: String,
    pub field: String,
    /// Display names, sorted
    pub values: Vec<String>,
    pub note: String,
}

/// Facts gathered for one entity before summarizing.
#[derive(Debug, Clone)]
struct Dossier {
    name: String,
    kind: EntityType,
    properties: Map<String, Value>,
    books: Vec<String>,
    facts: Vec<String>,
}

impl Dossier {
    fn prompt(&self, max_words: usize) -> String {
        let mut out = format!(
            "Write a summary of at most {max_words} words for the {} \"{}\".\n",
            self.kind.as_str().to_lowercase(),
            self.name
        );
        if !self.properties.is_empty() {
            out.push_str("\nProperties:\n");
            for (key, value) in &self.properties {
                out.push_str(&format!("- {key}: {}\n", render_value(value)));
            }
        }
        if !self.facts.is_empty() {
            out.push_str("\nRelationships:\n");
            for fact in &self.facts {
                out.push_str(&format!("- {fact}\n"));
            }
        }
        if !self.books.is_empty() {
            out.push_str(&format!("\nAppears in: {}\n", self.books.join(", ")));
        }
        out
    }

    /// Summary built from the gathered facts alone.
    fn assemble(&self, max_words: usize) -> String {
        let mut sentences = vec![sentence(&self.name)];
        if let Some(description) = self.properties.get("description").map(render_value)
            && !description.is_empty()
        {
            sentences.push(sentence(&description));
        }
        let traits: Vec<String> = self
            .properties
            .iter()
            .filter(|(key, _)| key.as_str() != "description")
            .map(|(key, value)| format!("{}: {}", key.replace('_', " "), render_value(value)))
            .collect();
        if !traits.is_empty() {
            sentences.push(sentence(&traits.join("; ")));
        }
        if !self.facts.is_empty() {
            sentences.push(sentence(&self.facts.join("; ")));
        }
        if !self.books.is_empty() {
            sentences.push(sentence(&format!("Appears in {}", self.books.join(", "))));
        }
        limit_words(&sentences.join(" "), max_words)
    }
}

/// Capitalize the first letter and end with a period.
fn sentence(text: &str) -> String {
    let text = text.trim();
    let mut chars = text.chars();
    let mut out: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => return String::new(),
    };
    if !out.ends_with(['.', '!', '?']) {
        out.push('.');
    }
    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render_value).collect::<Vec<_>>().join(", "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Keep at most `max_words` whitespace-separated words.
pub fn limit_words(text: &str, max_words: usize) -> String {
    text.split_whitespace().take(max_words).collect::<Vec<_>>().join(" ")
}

fn validate_summary(value: &Value) -> Result<(), String> {
    match value.get("summary") {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(()),
        Some(Value::String(_)) => Err("`summary` must not be empty".to_string()),
        _ => Err("missing string `summary`".to_string()),
    }
}

/// Resolves ids to display names, memoized per pass.
struct Names<'a> {
    store: &'a GraphStore,
    cache: HashMap<String, String>,
}

impl<'a> Names<'a> {
    fn new(store: &'a GraphStore) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    async fn get(&mut self, id: &str) -> KnowledgeResult<String> {
        if let Some(name) = self.cache.get(id) {
            return Ok(name.clone());
        }
        let name = match self.store.get_entity(id).await? {
            Some(entity) => entity.canonical_name,
            None => title_case_id(id),
        };
        self.cache.insert(id.to_string(), name.clone());
        Ok(name)
    }
}

pub struct Synthesizer {
    store: GraphStore,
    llm: Option<Arc<dyn LlmClient>>,
    policy: JsonCallPolicy,
}

impl Synthesizer {
    /// Without an LLM every summary is assembled deterministically.
    pub fn new(store: GraphStore, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self {
            store,
            llm,
            policy: JsonCallPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: JsonCallPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Write missing character arcs and location dossiers for `era`.
    pub async fn synthesize(&self, era: &str) -> KnowledgeResult<SynthesisReport> {
        let mut report = SynthesisReport::default();
        let mut names = Names::new(&self.store);

        for character in self.store.entities_by_type(EntityType::Character, Some(era)).await? {
            let triples = self
                .store
                .triples_for_entity(&character.id, Direction::Both, Some(era))
                .await?;
            if triples.len() < MIN_ARC_TRIPLES || self.has_summary(SummaryType::CharacterArc, &character.id, era).await? {
                report.skipped += 1;
                continue;
            }
            let dossier = self.gather(&character, &triples, &mut names).await?;
            let (text, fell_back) = self.summarize(&dossier, ARC_MAX_WORDS).await;
            self.persist(SummaryType::CharacterArc, &character, era, text, triples.len(), fell_back)
                .await?;
            report.arcs_written += 1;
            report.fallbacks += usize::from(fell_back);
        }

        for location in self.store.entities_by_type(EntityType::Location, Some(era)).await? {
            if self.has_summary(SummaryType::LocationDossier, &location.id, era).await? {
                report.skipped += 1;
                continue;
            }
            let triples = self
                .store
                .triples_for_entity(&location.id, Direction::Both, Some(era))
                .await?;
            let dossier = self.gather(&location, &triples, &mut names).await?;
            let (text, fell_back) = self.summarize(&dossier, DOSSIER_MAX_WORDS).await;
            self.persist(SummaryType::LocationDossier, &location, era, text, triples.len(), fell_back)
                .await?;
            report.dossiers_written += 1;
            report.fallbacks += usize::from(fell_back);
        }

        info!(
            era,
            arcs = report.arcs_written,
            dossiers = report.dossiers_written,
            skipped = report.skipped,
            "synthesis finished"
        );
        Ok(report)
    }

    async fn has_summary(&self, summary_type: SummaryType, entity_id: &str, era: &str) -> KnowledgeResult<bool> {
        let filter = SummaryFilter::of_type(summary_type).entity(entity_id).era(era);
        Ok(!self.store.summaries(&filter).await?.is_empty())
    }

    async fn gather(&self, entity: &Entity, triples: &[Triple], names: &mut Names<'_>) -> KnowledgeResult<Dossier> {
        let vocabulary = self.store.vocabulary();
        let mut facts = Vec::with_capacity(triples.len());
        for triple in triples {
            let subject = names.get(&triple.subject_id).await?;
            let object = names.get(&triple.object_id).await?;
            facts.push(format!("{subject} {} {object}", vocabulary.label(&triple.predicate)));
        }
        Ok(Dossier {
            name: entity.canonical_name.clone(),
            kind: entity.kind().unwrap_or(EntityType::Character),
            properties: entity.properties.clone(),
            books: entity.source_books.clone(),
            facts,
        })
    }

    /// Returns the summary text and whether it was assembled after an LLM
    /// fallback.
    async fn summarize(&self, dossier: &Dossier, max_words: usize) -> (String, bool) {
        let Some(llm) = &self.llm else {
            return (dossier.assemble(max_words), false);
        };
        let outcome = call_json(
            llm.as_ref(),
            SYSTEM_PROMPT,
            &dossier.prompt(max_words),
            self.policy,
            validate_summary,
            json!({"summary": null}),
        )
        .await;
        match outcome.value.get("summary").and_then(Value::as_str) {
            Some(text) if !outcome.fell_back => (limit_words(text, max_words), false),
            _ => {
                warn!(entity = %dossier.name, attempts = outcome.attempts, "summary fell back to assembled text");
                (dossier.assemble(max_words), true)
            }
        }
    }

    async fn persist(
        &self,
        summary_type: SummaryType,
        entity: &Entity,
        era: &str,
        text: String,
        triple_count: usize,
        assembled: bool,
    ) -> KnowledgeResult<()> {
        let source = if self.llm.is_some() && !assembled { "llm" } else { "assembled" };
        let mut metadata = Map::new();
        metadata.insert("source".to_string(), json!(source));
        metadata.insert("triple_count".to_string(), json!(triple_count));
        self.store
            .upsert_summary(
                SummaryUpsert::new(summary_type, era, text)
                    .entity(entity.id.as_str())
                    .metadata(metadata),
            )
            .await?;
        Ok(())
    }

    /// Flag characters in several factions and locations with several
    /// controllers. Read-only.
    pub async fn detect_contradictions(&self, era: &str) -> KnowledgeResult<Vec<Contradiction>> {
        let mut names = Names::new(&self.store);
        let mut found = Vec::new();

        let memberships = self.store.triples_by_predicate(MEMBER_OF, Some(era)).await?;
        for (character_id, factions) in group_ends(&memberships, |t| (&t.subject_id, &t.object_id)) {
            if factions.len() < 2 || !self.is_kind(&character_id, EntityType::Character).await? {
                continue;
            }
            let entity = names.get(&character_id).await?;
            let values = display_names(&factions, &mut names).await?;
            found.push(Contradiction {
                note: format!("{entity} is recorded as a member of {} factions", values.len()),
                entity_id: character_id,
                entity,
                field: "faction".to_string(),
                values,
            });
        }

        let control = self.store.triples_by_predicate(CONTROLS, Some(era)).await?;
        for (location_id, controllers) in group_ends(&control, |t| (&t.object_id, &t.subject_id)) {
            if controllers.len() < 2 || !self.is_kind(&location_id, EntityType::Location).await? {
                continue;
            }
            let entity = names.get(&location_id).await?;
            let values = display_names(&controllers, &mut names).await?;
            found.push(Contradiction {
                note: format!("{entity} is recorded as controlled by {} factions", values.len()),
                entity_id: location_id,
                entity,
                field: "controlled_by".to_string(),
                values,
            });
        }

        if !found.is_empty() {
            warn!(era, count = found.len(), "contradictions detected");
        }
        Ok(found)
    }

    async fn is_kind(&self, id: &str, kind: EntityType) -> KnowledgeResult<bool> {
        Ok(self
            .store
            .get_entity(id)
            .await?
            .is_some_and(|entity| entity.kind() == Some(kind)))
    }
}

/// Group triples by one end, collecting the distinct other ends.
fn group_ends<'t>(
    triples: &'t [Triple],
    ends: impl Fn(&'t Triple) -> (&'t String, &'t String),
) -> BTreeMap<String, BTreeSet<String>> {
    let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for triple in triples {
        let (key, other) = ends(triple);
        grouped.entry(key.clone()).or_default().insert(other.clone());
    }
    grouped
}

/// One display name per id, sorted; names shared by several ids carry the id.
async fn display_names(ids: &BTreeSet<String>, names: &mut Names<'_>) -> KnowledgeResult<Vec<String>> {
    let mut named = Vec::with_capacity(ids.len());
    for id in ids {
        named.push((names.get(id).await?, id));
    }
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (name, _) in &named {
        *seen.entry(name.as_str()).or_default() += 1;
    }
    let mut values: Vec<String> = named
        .iter()
        .map(|(name, id)| match seen.get(name.as_str()) {
            Some(&count) if count > 1 => format!("{name} ({id})"),
            _ => name.clone(),
        })
        .collect();
    values.sort();
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dossier() -> Dossier {
        let mut properties = Map::new();
        properties.insert("description".to_string(), json!("A desert world"));
        properties.insert("region".to_string(), json!("Outer Rim"));
        Dossier {
            name: "Tatooine".to_string(),
            kind: EntityType::Location,
            properties,
            books: vec!["A New Hope".to_string()],
            facts: vec!["Luke Skywalker lives on Tatooine".to_string()],
        }
    }

    #[test]
    fn assemble_uses_properties_facts_and_books() {
        assert_eq!(
            dossier().assemble(DOSSIER_MAX_WORDS),
            "Tatooine. A desert world. Region: Outer Rim. Luke Skywalker lives on Tatooine. Appears in A New Hope."
        );
        assert_eq!(dossier().assemble(3), "Tatooine. A desert");
        assert_eq!(sentence("done already."), "Done already.");
        assert_eq!(sentence("  "), "");
    }

    #[test]
    fn prompt_states_word_limit_and_facts() {
        let prompt = dossier().prompt(150);
        assert!(prompt.starts_with("Write a summary of at most 150 words for the location \"Tatooine\"."));
        assert!(prompt.contains("- region: Outer Rim\n"));
        assert!(prompt.contains("- Luke Skywalker lives on Tatooine\n"));
    }

    #[test]
    fn summary_validation() {
        assert!(validate_summary(&json!({"summary": "ok"})).is_ok());
        assert!(validate_summary(&json!({"summary": "  "})).is_err());
        assert!(validate_summary(&json!({"summary": 3})).is_err());
        assert!(validate_summary(&json!({})).is_err());
    }

    #[test]
    fn limit_words_collapses_whitespace() {
        assert_eq!(limit_words("  a  b\nc d ", 3), "a b c");
        assert_eq!(limit_words("", 3), "");
    }
}
