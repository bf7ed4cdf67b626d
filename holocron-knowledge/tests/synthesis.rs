mod common;

use std::sync::Arc;

use holocron_db::test_helpers::create_test_graph_store;
use holocron_db::{EntityUpsert, GraphStore, SummaryFilter, SummaryType, TripleUpsert};
use holocron_knowledge::{Contradiction, Synthesizer};
use serde_json::{Map, json};

use common::{ScriptedLlm, fast_policy};

const ERA: &str = "rebellion";

async fn entity(store: &GraphStore, id: &str, kind: &str, name: &str, properties: serde_json::Value) {
    let properties: Map<String, serde_json::Value> = serde_json::from_value(properties).unwrap();
    store
        .upsert_entity(
            EntityUpsert::new(id, kind, name, ERA)
                .properties(properties)
                .source_book("Heir to the Empire"),
        )
        .await
        .unwrap();
}

async fn triple(store: &GraphStore, subject: &str, predicate: &str, object: &str) {
    store
        .upsert_triple(TripleUpsert::new(subject, predicate, object, ERA))
        .await
        .unwrap();
}

/// Mara in two factions, Myrkr held by two factions, Luke unremarkable.
async fn seeded_store() -> GraphStore {
    let store = create_test_graph_store().await.unwrap();
    entity(&store, "mara_jade", "CHARACTER", "Mara Jade", json!({"role": "smuggler"})).await;
    entity(&store, "luke_skywalker", "CHARACTER", "Luke Skywalker", json!({})).await;
    entity(&store, "galactic_empire", "FACTION", "Galactic Empire", json!({})).await;
    entity(&store, "karrdes_organization", "FACTION", "Karrde's Organization", json!({})).await;
    entity(&store, "new_republic", "FACTION", "New Republic", json!({})).await;
    entity(&store, "myrkr", "LOCATION", "Myrkr", json!({"region": "Outer Rim"})).await;
    entity(&store, "tatooine", "LOCATION", "Tatooine", json!({"region": "Outer Rim"})).await;

    triple(&store, "mara_jade", "MEMBER_OF", "karrdes_organization").await;
    triple(&store, "mara_jade", "MEMBER_OF", "galactic_empire").await;
    triple(&store, "luke_skywalker", "MEMBER_OF", "new_republic").await;
    triple(&store, "karrdes_organization", "CONTROLS", "myrkr").await;
    triple(&store, "galactic_empire", "CONTROLS", "myrkr").await;
    store
}

#[tokio::test]
async fn test_contradictions_are_reported_without_mutation() {
    let store = seeded_store().await;
    let synthesizer = Synthesizer::new(store.clone(), None);
    let before = (
        store.entity_count(None).await.unwrap(),
        store.triple_count(None).await.unwrap(),
    );

    let found = synthesizer.detect_contradictions(ERA).await.unwrap();

    assert_eq!(
        found,
        vec![
            Contradiction {
                entity_id: "mara_jade".to_string(),
                entity: "Mara Jade".to_string(),
                field: "faction".to_string(),
                values: vec!["Galactic Empire".to_string(), "Karrde's Organization".to_string()],
                note: "Mara Jade is recorded as a member of 2 factions".to_string(),
            },
            Contradiction {
                entity_id: "myrkr".to_string(),
                entity: "Myrkr".to_string(),
                field: "controlled_by".to_string(),
                values: vec!["Galactic Empire".to_string(), "Karrde's Organization".to_string()],
                note: "Myrkr is recorded as controlled by 2 factions".to_string(),
            },
        ]
    );
    let after = (
        store.entity_count(None).await.unwrap(),
        store.triple_count(None).await.unwrap(),
    );
    assert_eq!(before, after);
    assert!(synthesizer.detect_contradictions("old_republic").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_synthesis_without_llm_assembles_and_is_idempotent() {
    let store = seeded_store().await;
    let synthesizer = Synthesizer::new(store.clone(), None);

    let report = synthesizer.synthesize(ERA).await.unwrap();
    assert_eq!(report.arcs_written, 1);
    assert_eq!(report.dossiers_written, 2);
    // Luke has a single triple
    assert_eq!(report.skipped, 1);
    assert_eq!(report.fallbacks, 0);

    let arcs = store
        .summaries(&SummaryFilter::of_type(SummaryType::CharacterArc).era(ERA))
        .await
        .unwrap();
    assert_eq!(arcs.len(), 1);
    assert_eq!(arcs[0].entity_id.as_deref(), Some("mara_jade"));
    assert_eq!(
        arcs[0].text,
        "Mara Jade. Role: smuggler. Mara Jade is a member of Karrde's Organization; \
         Mara Jade is a member of Galactic Empire. Appears in Heir to the Empire."
    );
    assert_eq!(arcs[0].metadata["source"], "assembled");

    let tatooine = store
        .summaries(&SummaryFilter::of_type(SummaryType::LocationDossier).entity("tatooine"))
        .await
        .unwrap();
    assert_eq!(
        tatooine[0].text,
        "Tatooine. Region: Outer Rim. Appears in Heir to the Empire."
    );

    let again = synthesizer.synthesize(ERA).await.unwrap();
    assert_eq!((again.arcs_written, again.dossiers_written, again.skipped), (0, 0, 4));
}

#[tokio::test]
async fn test_llm_summaries_are_word_limited() {
    let store = seeded_store().await;
    let long = vec!["word"; 260].join(" ");
    let llm = Arc::new(ScriptedLlm::constant(&json!({"summary": long}).to_string()));
    let synthesizer = Synthesizer::new(store.clone(), Some(llm.clone())).with_policy(fast_policy(0));

    let report = synthesizer.synthesize(ERA).await.unwrap();
    assert_eq!((report.arcs_written, report.dossiers_written, report.fallbacks), (1, 2, 0));
    assert_eq!(llm.calls(), 3);
    assert!(llm.prompts()[0].contains("at most 200 words for the character \"Mara Jade\""));
    assert!(llm.prompts()[0].contains("- Mara Jade is a member of Galactic Empire\n"));

    let arc = &store
        .summaries(&SummaryFilter::of_type(SummaryType::CharacterArc).entity("mara_jade"))
        .await
        .unwrap()[0];
    assert_eq!(arc.text.split_whitespace().count(), 200);
    assert_eq!(arc.metadata["source"], "llm");
    assert_eq!(arc.metadata["triple_count"], 2);

    let dossier = &store
        .summaries(&SummaryFilter::of_type(SummaryType::LocationDossier).entity("myrkr"))
        .await
        .unwrap()[0];
    assert_eq!(dossier.text.split_whitespace().count(), 150);
}

#[tokio::test]
async fn test_llm_fallback_uses_assembled_text() {
    let store = seeded_store().await;
    let llm = Arc::new(ScriptedLlm::new(|_| None));
    let synthesizer = Synthesizer::new(store.clone(), Some(llm)).with_policy(fast_policy(1));

    let report = synthesizer.synthesize(ERA).await.unwrap();
    assert_eq!(report.fallbacks, 3);

    let dossier = &store
        .summaries(&SummaryFilter::of_type(SummaryType::LocationDossier).entity("tatooine"))
        .await
        .unwrap()[0];
    assert_eq!(dossier.text, "Tatooine. Region: Outer Rim. Appears in Heir to the Empire.");
    assert_eq!(dossier.metadata["source"], "assembled");
}

#[tokio::test]
async fn test_same_named_factions_stay_distinct() {
    let store = create_test_graph_store().await.unwrap();
    entity(&store, "gilad_pellaeon", "CHARACTER", "Gilad Pellaeon", json!({})).await;
    entity(&store, "galactic_empire", "FACTION", "The Empire", json!({})).await;
    entity(&store, "imperial_remnant", "FACTION", "The Empire", json!({})).await;
    triple(&store, "gilad_pellaeon", "MEMBER_OF", "galactic_empire").await;
    triple(&store, "gilad_pellaeon", "MEMBER_OF", "imperial_remnant").await;

    let found = Synthesizer::new(store, None)
        .detect_contradictions(ERA)
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(
        found[0].values,
        [
            "The Empire (galactic_empire)".to_string(),
            "The Empire (imperial_remnant)".to_string(),
        ]
    );
    assert_eq!(found[0].note, "Gilad Pellaeon is recorded as a member of 2 factions");
}
