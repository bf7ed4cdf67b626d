//! Per-batch LLM extraction.
//!
//! A batch goes through four stages: the JSON call, defensive decoding into
//! [`RawExtraction`], pure [`normalize`], then write-through to the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use holocron_core::resolver::{
    AliasTable, SessionCache, merge_properties, remember, resolve, slugify, title_case_id,
};
use holocron_core::vocabulary::{
    EntityType, OCCURRED_AT, PARTICIPATED_IN, Vocabulary, normalize_token,
};
use holocron_db::{EntityUpsert, GraphStore, SummaryType, SummaryUpsert, TripleUpsert};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::chunks::Chunk;
use crate::errors::KnowledgeResult;
use crate::json_call::{JsonCallPolicy, call_json};
use crate::llm::LlmClient;

/// Confidence of rows asserted directly by the LLM when it gives none.
pub const DEFAULT_EXTRACTION_CONFIDENCE: f64 = 1.0;

const SYSTEM_PROMPT_HEADER: &str = "You are a meticulous archivist building a knowledge graph \
from novel excerpts. Extract only what the text states or directly implies.

Reply with one JSON object with exactly these keys:
{
  \"entities\": [{\"name\": str, \"entity_type\": str, \"properties\": object}],
  \"relationships\": [{\"subject\": str, \"predicate\": str, \"object\": str, \"context\": str}],
  \"chapter_summary\": str,
  \"key_events\": [{\"name\": str, \"participants\": [str], \"location\": str, \"outcome\": str}]
}

Rules:
- Use the fullest name the text gives for each entity.
- Useful properties: species, role, faction, homeworld, region, titles (list), description.
- chapter_summary is at most 100 words.
- subject and object are entity names; context is the sentence that supports the relationship.
- Use only the predicates listed below, spelled exactly as shown.
";

/// System prompt for extraction calls.
pub fn system_prompt(vocabulary: &Vocabulary) -> String {
    let types = vocabulary
        .entity_types()
        .iter()
        .map(EntityType::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{SYSTEM_PROMPT_HEADER}\nEntity types: {types}\n\nPredicates:\n{}",
        vocabulary.prompt_listing()
    )
}

/// User prompt for one batch of chunks.
pub fn user_prompt(book: &str, chapter: Option<&str>, chunks: &[Chunk]) -> String {
    let mut out = format!("Book: {book}\n");
    if let Some(chapter) = chapter {
        out.push_str(&format!("Chapter: {chapter}\n"));
    }
    let known: Vec<&str> = {
        let mut seen = HashSet::new();
        chunks
            .iter()
            .flat_map(|c| c.characters.iter())
            .map(String::as_str)
            .filter(|name| seen.insert(*name))
            .collect()
    };
    if !known.is_empty() {
        out.push_str(&format!("Characters tagged in these passages: {}\n", known.join(", ")));
    }
    for chunk in chunks {
        out.push_str(&format!("\n--- passage {} ---\n{}\n", chunk.chunk_index, chunk.text.trim()));
    }
    out
}

/// Empty extraction returned once retries are exhausted.
pub fn fallback_value() -> Value {
    json!({
        "entities": [],
        "relationships": [],
        "chapter_summary": "",
        "key_events": []
    })
}

/// Structural check: `entities` and `relationships` must be lists.
pub fn validate_extraction(value: &Value) -> Result<(), String> {
    let Some(object) = value.as_object() else {
        return Err("reply must be a JSON object".to_string());
    };
    for key in ["entities", "relationships"] {
        match object.get(key) {
            Some(Value::Array(_)) => {}
            Some(_) => return Err(format!("`{key}` must be a list")),
            None => return Err(format!("missing `{key}` list")),
        }
    }
    Ok(())
}

// --- decoding ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntity {
    pub name: String,
    pub entity_type: Option<String>,
    pub properties: Map<String, Value>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRelationship {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub context: String,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEvent {
    pub name: String,
    pub participants: Vec<String>,
    pub location: Option<String>,
    pub outcome: Option<String>,
}

/// LLM reply after tolerant decoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExtraction {
    pub entities: Vec<RawEntity>,
    pub relationships: Vec<RawRelationship>,
    pub chapter_summary: String,
    pub key_events: Vec<RawEvent>,
}

fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn list_of(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| text_of(Some(item)))
            .filter(|s| !s.is_empty())
            .collect(),
        other => text_of(other).filter(|s| !s.is_empty()).into_iter().collect(),
    }
}

fn confidence_of(value: Option<&Value>) -> Option<f64> {
    value?.as_f64().map(|c| c.clamp(0.0, 1.0))
}

fn objects<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Map<String, Value>> {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

impl RawExtraction {
    /// Decode without failing: missing keys default, wrong types are coerced
    /// or dropped.
    pub fn from_value(value: &Value) -> Self {
        let entities = objects(value, "entities")
            .map(|obj| RawEntity {
                name: text_of(obj.get("name")).unwrap_or_default(),
                entity_type: text_of(obj.get("entity_type").or_else(|| obj.get("type")))
                    .filter(|t| !t.is_empty()),
                properties: obj
                    .get("properties")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                confidence: confidence_of(obj.get("confidence")),
            })
            .collect();

        let relationships = objects(value, "relationships")
            .map(|obj| RawRelationship {
                subject: text_of(obj.get("subject")).unwrap_or_default(),
                predicate: text_of(obj.get("predicate")).unwrap_or_default(),
                object: text_of(obj.get("object")).unwrap_or_default(),
                context: text_of(obj.get("context")).unwrap_or_default(),
                confidence: confidence_of(obj.get("confidence")),
            })
            .collect();

        let key_events = objects(value, "key_events")
            .map(|obj| RawEvent {
                name: text_of(obj.get("name")).unwrap_or_default(),
                participants: list_of(obj.get("participants")),
                location: text_of(obj.get("location")).filter(|s| !s.is_empty()),
                outcome: text_of(obj.get("outcome")).filter(|s| !s.is_empty()),
            })
            .collect();

        Self {
            entities,
            relationships,
            chapter_summary: text_of(value.get("chapter_summary")).unwrap_or_default(),
            key_events,
        }
    }
}

// --- normalization ---

/// Inputs shared by every batch of a run.
#[derive(Debug, Clone)]
pub struct NormalizeContext<'a> {
    pub vocabulary: &'a Vocabulary,
    pub aliases: &'a AliasTable,
    pub era: &'a str,
    pub book: &'a str,
    pub chunk_id: Option<&'a str>,
}

/// Store-ready rows for one batch.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub entities: Vec<EntityUpsert>,
    pub triples: Vec<TripleUpsert>,
    pub summary: Option<String>,
    pub warnings: Vec<String>,
    /// First surface form that slugs to each triple endpoint id, used to
    /// name stubs.
    pub endpoint_names: HashMap<String, String>,
}

fn resolve_type(raw: Option<&str>, name: &str, warnings: &mut Vec<String>) -> EntityType {
    let Some(raw) = raw else {
        return EntityType::Character;
    };
    match EntityType::parse_lenient(raw) {
        Some(kind) => kind,
        None => {
            warn!(entity = name, entity_type = raw, "unknown entity type, using CHARACTER");
            warnings.push(format!("unknown entity type '{raw}' for '{name}', using CHARACTER"));
            EntityType::Character
        }
    }
}

/// Collects entities by id, merging duplicates in memory.
#[derive(Default)]
struct EntityAccumulator {
    order: Vec<EntityUpsert>,
    index: HashMap<String, usize>,
}

impl EntityAccumulator {
    fn add(&mut self, upsert: EntityUpsert) {
        match self.index.get(&upsert.id) {
            Some(&i) => {
                let existing = &mut self.order[i];
                merge_properties(&mut existing.properties, &upsert.properties);
                existing.confidence = existing.confidence.max(upsert.confidence);
            }
            None => {
                self.index.insert(upsert.id.clone(), self.order.len());
                self.order.push(upsert);
            }
        }
    }
}

/// Turn a decoded reply into store-ready rows. Pure apart from logging.
pub fn normalize(raw: &RawExtraction, ctx: &NormalizeContext<'_>) -> NormalizedBatch {
    let mut warnings = Vec::new();
    let mut cache = SessionCache::new();

    // Seed the cache so later mentions match earlier spellings.
    let mut seed = |name: &str, kind: Option<EntityType>| {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let id = resolve(name, kind, ctx.aliases, &cache);
        remember(&mut cache, name, &id);
    };
    for entity in &raw.entities {
        let kind = entity.entity_type.as_deref().and_then(EntityType::parse_lenient);
        seed(&entity.name, kind);
    }
    for rel in &raw.relationships {
        seed(&rel.subject, None);
        seed(&rel.object, None);
    }
    for event in &raw.key_events {
        seed(&event.name, Some(EntityType::Event));
        for participant in &event.participants {
            seed(participant, None);
        }
        if let Some(location) = &event.location {
            seed(location, Some(EntityType::Location));
        }
    }

    let id_for = |name: &str, kind: Option<EntityType>| resolve(name.trim(), kind, ctx.aliases, &cache);
    let mut entities = EntityAccumulator::default();
    let mut triples = Vec::new();
    let mut endpoint_names: HashMap<String, String> = HashMap::new();
    // Alias and fuzzy hits keep the title-cased id instead of the surface form.
    let mut name_endpoint = |id: &str, name: &str| {
        if slugify(name) == id {
            endpoint_names
                .entry(id.to_string())
                .or_insert_with(|| name.trim().to_string());
        }
    };

    for entity in &raw.entities {
        let name = entity.name.trim();
        if name.is_empty() {
            warnings.push("skipped entity with empty name".to_string());
            continue;
        }
        let kind = resolve_type(entity.entity_type.as_deref(), name, &mut warnings);
        let id = id_for(name, Some(kind));
        if id.is_empty() {
            warnings.push(format!("skipped entity '{name}': no usable identifier"));
            continue;
        }
        entities.add(
            EntityUpsert::new(id, kind, name, ctx.era)
                .properties(entity.properties.clone())
                .source_book(ctx.book)
                .confidence(entity.confidence.unwrap_or(DEFAULT_EXTRACTION_CONFIDENCE)),
        );
    }

    for rel in &raw.relationships {
        let (subject, predicate, object) =
            (rel.subject.trim(), rel.predicate.trim(), rel.object.trim());
        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            warnings.push(format!(
                "skipped incomplete relationship '{subject}' -[{predicate}]-> '{object}'"
            ));
            continue;
        }
        let Some(canonical) = ctx.vocabulary.closest_predicate(predicate) else {
            warn!(predicate, subject, object, "dropping relationship with unknown predicate");
            warnings.push(format!("dropped unknown predicate '{predicate}'"));
            continue;
        };
        if canonical.name != predicate {
            debug!(from = predicate, to = canonical.name, "predicate corrected");
            if normalize_token(predicate) != canonical.name {
                warnings.push(format!("corrected predicate '{predicate}' to {}", canonical.name));
            }
        }
        let (subject_id, object_id) = (id_for(subject, None), id_for(object, None));
        if subject_id.is_empty() || object_id.is_empty() {
            warnings.push(format!("skipped relationship '{subject}' -> '{object}': no usable identifier"));
            continue;
        }
        name_endpoint(&subject_id, subject);
        name_endpoint(&object_id, object);
        let mut properties = Map::new();
        if !rel.context.is_empty() {
            properties.insert("context".to_string(), Value::String(rel.context.clone()));
        }
        triples.push(triple(
            ctx,
            subject_id,
            canonical.name,
            object_id,
            rel.confidence.unwrap_or(DEFAULT_EXTRACTION_CONFIDENCE),
            properties,
        ));
    }

    for event in &raw.key_events {
        let name = event.name.trim();
        if name.is_empty() {
            warnings.push("skipped key event with empty name".to_string());
            continue;
        }
        let event_id = id_for(name, Some(EntityType::Event));
        if event_id.is_empty() {
            warnings.push(format!("skipped key event '{name}': no usable identifier"));
            continue;
        }

        let mut properties = Map::new();
        properties.insert("participants".to_string(), json!(event.participants));
        if let Some(location) = &event.location {
            properties.insert("location".to_string(), Value::String(location.clone()));
        }
        if let Some(outcome) = &event.outcome {
            properties.insert("outcome".to_string(), Value::String(outcome.clone()));
        }
        entities.add(
            EntityUpsert::new(event_id.as_str(), EntityType::Event, name, ctx.era)
                .properties(properties)
                .source_book(ctx.book)
                .confidence(DEFAULT_EXTRACTION_CONFIDENCE),
        );

        for participant in &event.participants {
            let participant_id = id_for(participant, None);
            if participant_id.is_empty() {
                continue;
            }
            name_endpoint(&participant_id, participant);
            triples.push(triple(
                ctx,
                participant_id,
                PARTICIPATED_IN,
                event_id.clone(),
                DEFAULT_EXTRACTION_CONFIDENCE,
                Map::new(),
            ));
        }
        if let Some(location) = &event.location {
            let location_id = id_for(location, Some(EntityType::Location));
            if !location_id.is_empty() {
                name_endpoint(&location_id, location);
                triples.push(triple(
                    ctx,
                    event_id.clone(),
                    OCCURRED_AT,
                    location_id,
                    DEFAULT_EXTRACTION_CONFIDENCE,
                    Map::new(),
                ));
            }
        }
    }

    let summary = Some(raw.chapter_summary.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    NormalizedBatch {
        entities: entities.order,
        triples,
        summary,
        warnings,
        endpoint_names,
    }
}

fn triple(
    ctx: &NormalizeContext<'_>,
    subject_id: String,
    predicate: &str,
    object_id: String,
    confidence: f64,
    properties: Map<String, Value>,
) -> TripleUpsert {
    let mut upsert = TripleUpsert::new(subject_id, predicate, object_id, ctx.era)
        .confidence(confidence)
        .source_book(ctx.book)
        .properties(properties);
    if let Some(chunk_id) = ctx.chunk_id {
        upsert = upsert.source_chunk(chunk_id);
    }
    upsert
}

// --- write-through ---

/// Where a batch sits inside the corpus.
#[derive(Debug, Clone, Copy)]
pub struct BatchUnit<'a> {
    pub era: &'a str,
    pub book: &'a str,
    pub chapter: Option<&'a str>,
    pub chapter_index: i64,
    /// Batch position inside the chapter
    pub part: i64,
    pub chunks: &'a [Chunk],
}

/// What one batch contributed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub entities: usize,
    pub triples: usize,
    pub summary_written: bool,
    pub fell_back: bool,
    pub warnings: Vec<String>,
}

/// Persist a normalized batch: entities, endpoint stubs, triples, summary.
pub async fn write_through(
    store: &GraphStore,
    batch: NormalizedBatch,
    unit: &BatchUnit<'_>,
    stub_confidence: f64,
) -> KnowledgeResult<BatchOutcome> {
    let mut outcome = BatchOutcome {
        warnings: batch.warnings,
        ..BatchOutcome::default()
    };

    let mut known: HashSet<String> = HashSet::new();
    for entity in batch.entities {
        known.insert(entity.id.clone());
        store.upsert_entity(entity).await?;
        outcome.entities += 1;
    }

    for triple in &batch.triples {
        let (subject_type, object_type) = store.vocabulary().endpoint_types(&triple.predicate);
        for (endpoint, implied) in [
            (&triple.subject_id, subject_type),
            (&triple.object_id, object_type),
        ] {
            if known.contains(endpoint.as_str()) {
                continue;
            }
            if store.get_entity(endpoint).await?.is_none() {
                let kind = implied.unwrap_or(EntityType::Character);
                warn!(entity = %endpoint, entity_type = %kind, book = unit.book, "creating stub entity for relationship endpoint");
                outcome
                    .warnings
                    .push(format!("created stub entity '{endpoint}'"));
                let name = batch
                    .endpoint_names
                    .get(endpoint)
                    .cloned()
                    .unwrap_or_else(|| title_case_id(endpoint));
                store
                    .upsert_entity(
                        EntityUpsert::new(endpoint.as_str(), kind, name, unit.era)
                        .source_book(unit.book)
                        .confidence(stub_confidence)
                        .stub(),
                    )
                    .await?;
            }
            known.insert(endpoint.clone());
        }
    }

    for triple in batch.triples {
        store.upsert_triple(triple).await?;
        outcome.triples += 1;
    }

    if let Some(text) = batch.summary {
        let mut metadata = Map::new();
        metadata.insert(
            "chunk_ids".to_string(),
            json!(unit.chunks.iter().map(|c| c.chunk_id.as_str()).collect::<Vec<_>>()),
        );
        store
            .upsert_summary(
                SummaryUpsert::new(SummaryType::Chapter, unit.era, text)
                    .chapter(unit.book, unit.chapter.map(str::to_string), Some(unit.chapter_index))
                    .part(unit.part)
                    .metadata(metadata),
            )
            .await?;
        outcome.summary_written = true;
    }

    Ok(outcome)
}

/// Runs extraction batches against one LLM and one store.
pub struct Extractor {
    llm: Arc<dyn LlmClient>,
    store: GraphStore,
    vocabulary: Arc<Vocabulary>,
    aliases: Arc<AliasTable>,
    policy: JsonCallPolicy,
    stub_confidence: f64,
    system_prompt: String,
}

impl Extractor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: GraphStore,
        vocabulary: Arc<Vocabulary>,
        aliases: Arc<AliasTable>,
    ) -> Self {
        let system_prompt = system_prompt(&vocabulary);
        Self {
            llm,
            store,
            vocabulary,
            aliases,
            policy: JsonCallPolicy::default(),
            stub_confidence: holocron_db::DEFAULT_STUB_CONFIDENCE,
            system_prompt,
        }
    }

    pub fn with_policy(mut self, policy: JsonCallPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_stub_confidence(mut self, confidence: f64) -> Self {
        self.stub_confidence = confidence;
        self
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Extract one batch. LLM trouble degrades to an empty contribution;
    /// store failures propagate.
    pub async fn extract_batch(&self, unit: &BatchUnit<'_>) -> KnowledgeResult<BatchOutcome> {
        let user = user_prompt(unit.book, unit.chapter, unit.chunks);
        let call = call_json(
            self.llm.as_ref(),
            &self.system_prompt,
            &user,
            self.policy,
            validate_extraction,
            fallback_value(),
        )
        .await;

        let raw = RawExtraction::from_value(&call.value);
        let chunk_id = unit.chunks.first().map(|c| c.chunk_id.as_str());
        let ctx = NormalizeContext {
            vocabulary: &self.vocabulary,
            aliases: &self.aliases,
            era: unit.era,
            book: unit.book,
            chunk_id,
        };
        let mut batch = normalize(&raw, &ctx);
        if call.fell_back {
            warn!(
                book = unit.book,
                chapter = unit.chapter.unwrap_or(""),
                chunk_id = chunk_id.unwrap_or(""),
                attempts = call.attempts,
                "extraction fell back to empty result"
            );
        }
        let mut warnings = call.warnings;
        warnings.append(&mut batch.warnings);
        batch.warnings = warnings;

        let mut outcome = write_through(&self.store, batch, unit, self.stub_confidence).await?;
        outcome.fell_back = call.fell_back;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn ctx<'a>(vocab: &'a Vocabulary, aliases: &'a AliasTable) -> NormalizeContext<'a> {
        NormalizeContext {
            vocabulary: vocab,
            aliases,
            era: "rebellion",
            book: "Heir to the Empire",
            chunk_id: Some("c1"),
        }
    }

    #[test]
    fn validate_requires_entity_and_relationship_lists() {
        assert!(validate_extraction(&fallback_value()).is_ok());
        assert!(validate_extraction(&json!({"entities": []})).is_err());
        assert!(validate_extraction(&json!({"entities": {}, "relationships": []})).is_err());
        assert!(validate_extraction(&json!([1, 2])).is_err());
    }

    #[test]
    fn decoding_coerces_and_drops() {
        let raw = RawExtraction::from_value(&json!({
            "entities": [
                {"name": "Talon Karrde", "entity_type": "person", "properties": {"role": "smuggler"}},
                "not an object",
                {"name": 42},
                {"type": "SHIP"}
            ],
            "relationships": [{"subject": "Mara", "predicate": "serves", "object": "Karrde", "confidence": 7}],
            "chapter_summary": 5,
            "key_events": [{"name": "Escape", "participants": "Mara Jade", "location": ""}]
        }));

        assert_eq!(raw.entities.len(), 3);
        assert_eq!(raw.entities[0].entity_type.as_deref(), Some("person"));
        assert_eq!(raw.entities[1].name, "42");
        assert_eq!(raw.entities[2].name, "");
        assert_eq!(raw.entities[2].entity_type.as_deref(), Some("SHIP"));
        assert_eq!(raw.relationships[0].confidence, Some(1.0));
        assert_eq!(raw.chapter_summary, "5");
        assert_eq!(raw.key_events[0].participants, ["Mara Jade"]);
        assert!(raw.key_events[0].location.is_none());

        assert_eq!(RawExtraction::from_value(&json!("garbage")), RawExtraction::default());
    }

    #[test]
    fn normalize_resolves_merges_and_corrects() {
        let vocab = Vocabulary::standard();
        let aliases = AliasTable::default();
        let raw = RawExtraction::from_value(&json!({
            "entities": [
                {"name": " Mara Jade ", "entity_type": "person", "properties": {"titles": ["Emperor's Hand"]}},
                {"name": "mara jade", "properties": {"titles": ["Smuggler"], "role": "agent"}},
                {"name": "Wild Karrde", "entity_type": "starship"},
                {"name": "Myrkr", "entity_type": "feeling"},
                {"name": "   "}
            ],
            "relationships": [
                {"subject": "Mara Jade", "predicate": "is a member of", "object": "Karrde's organization", "context": "She worked for Karrde."},
                {"subject": "Mara Jade", "predicate": "admires", "object": "Emperor"},
                {"subject": "Mara Jad", "predicate": "PILOTS", "object": "Wild Karrde"},
                {"subject": "", "predicate": "ALLY_OF", "object": "Luke"}
            ],
            "chapter_summary": "  Mara flies.  "
        }));

        let batch = normalize(&raw, &ctx(&vocab, &aliases));

        let ids: Vec<&str> = batch.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["mara_jade", "wild_karrde", "myrkr"]);
        let mara = &batch.entities[0];
        assert_eq!(mara.entity_type, "CHARACTER");
        assert_eq!(mara.properties["titles"], json!(["Emperor's Hand", "Smuggler"]));
        assert_eq!(mara.properties["role"], "agent");
        assert_eq!(mara.source_book.as_deref(), Some("Heir to the Empire"));
        assert_eq!(batch.entities[1].entity_type, "SHIP");
        assert_eq!(batch.entities[2].entity_type, "CHARACTER");

        assert_eq!(batch.triples.len(), 2);
        let member = &batch.triples[0];
        assert_eq!(member.predicate, "MEMBER_OF");
        assert_eq!(member.object_id, "karrdes_organization");
        assert_eq!(member.properties["context"], "She worked for Karrde.");
        assert_eq!(member.source_chunk.as_deref(), Some("c1"));
        // fuzzy match folds the typo into the cached spelling
        assert_eq!(batch.triples[1].subject_id, "mara_jade");
        assert_eq!(batch.triples[1].predicate, "PILOTS");

        assert_eq!(batch.summary.as_deref(), Some("Mara flies."));
        assert!(batch.warnings.iter().any(|w| w.contains("feeling")));
        assert!(batch.warnings.iter().any(|w| w.contains("admires")));
        assert!(batch.warnings.iter().any(|w| w.contains("empty name")));
        assert!(batch.warnings.iter().any(|w| w.contains("incomplete")));
        assert!(batch
            .triples
            .iter()
            .all(|t| vocab.is_valid_predicate(&t.predicate)));
    }

    #[test]
    fn normalize_expands_key_events() {
        let vocab = Vocabulary::standard();
        let mut map = BTreeMap::new();
        map.insert("luke_skywalker".to_string(), vec!["Luke".to_string()]);
        let aliases = AliasTable::from_canonical_map(map);
        let raw = RawExtraction::from_value(&json!({
            "entities": [],
            "relationships": [],
            "key_events": [{
                "name": "Battle of Sluis Van",
                "participants": ["Luke", "Wedge Antilles"],
                "location": "Sluis Van",
                "outcome": "The shipyards were saved."
            }]
        }));

        let batch = normalize(&raw, &ctx(&vocab, &aliases));
        assert_eq!(batch.entities.len(), 1);
        let event = &batch.entities[0];
        assert_eq!(event.id, "battle_of_sluis_van");
        assert_eq!(event.entity_type, "EVENT");
        assert_eq!(event.properties["participants"], json!(["Luke", "Wedge Antilles"]));
        assert_eq!(event.properties["outcome"], "The shipyards were saved.");

        let edges: Vec<(&str, &str, &str)> = batch
            .triples
            .iter()
            .map(|t| (t.subject_id.as_str(), t.predicate.as_str(), t.object_id.as_str()))
            .collect();
        assert_eq!(
            edges,
            [
                ("luke_skywalker", "PARTICIPATED_IN", "battle_of_sluis_van"),
                ("wedge_antilles", "PARTICIPATED_IN", "battle_of_sluis_van"),
                ("battle_of_sluis_van", "OCCURRED_AT", "sluis_van"),
            ]
        );
        assert_eq!(batch.endpoint_names["sluis_van"], "Sluis Van");
        assert_eq!(batch.endpoint_names["wedge_antilles"], "Wedge Antilles");
        assert!(!batch.endpoint_names.contains_key("luke_skywalker"));
    }

    #[test]
    fn normalize_is_deterministic() {
        let vocab = Vocabulary::standard();
        let aliases = AliasTable::default();
        let raw = RawExtraction::from_value(&json!({
            "entities": [{"name": "Gilad Pellaeon"}, {"name": "Thrawn"}],
            "relationships": [{"subject": "Pellaeon", "predicate": "SERVES", "object": "Thrawn"}]
        }));
        let a = normalize(&raw, &ctx(&vocab, &aliases));
        let b = normalize(&raw, &ctx(&vocab, &aliases));
        assert_eq!(
            a.triples.iter().map(|t| &t.subject_id).collect::<Vec<_>>(),
            b.triples.iter().map(|t| &t.subject_id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn user_prompt_lists_passages_and_tagged_characters() {
        let chunk = |i: i64, chars: &[&str]| Chunk {
            chunk_id: format!("c{i}"),
            chunk_index: i,
            book_title: "B".to_string(),
            chapter_title: Some("One".to_string()),
            era: "rebellion".to_string(),
            text: format!(" passage text {i} "),
            characters: chars.iter().map(|s| s.to_string()).collect(),
        };
        let prompt = user_prompt("B", Some("One"), &[chunk(0, &["Luke", "Leia"]), chunk(1, &["Luke"])]);
        assert!(prompt.starts_with("Book: B\nChapter: One\n"));
        assert!(prompt.contains("Characters tagged in these passages: Luke, Leia\n"));
        assert!(prompt.contains("--- passage 1 ---\npassage text 1\n"));
    }

    #[test]
    fn system_prompt_embeds_vocabulary() {
        let prompt = system_prompt(&Vocabulary::standard());
        assert!(prompt.contains("Entity types: CHARACTER, LOCATION, FACTION, SHIP, ARTIFACT, EVENT"));
        assert!(prompt.contains("- FATHER_OF (is the father of)"));
    }
}
