use holocron_db::test_helpers::create_test_graph_store;
use holocron_db::{EntityUpsert, GraphStore, SummaryType, SummaryUpsert, TripleUpsert};
use holocron_knowledge::retrieve::{CHARACTERS_HEADER, EVENTS_HEADER, FACTIONS_HEADER};
use holocron_knowledge::{ContextRequest, RuntimeRetriever, estimate_tokens};
use serde_json::{Map, Value, json};
use tempfile::TempDir;

const ERA: &str = "rebellion";

async fn entity(store: &GraphStore, id: &str, kind: &str, name: &str, properties: Value) {
    let properties: Map<String, Value> = serde_json::from_value(properties).unwrap();
    store
        .upsert_entity(EntityUpsert::new(id, kind, name, ERA).properties(properties))
        .await
        .unwrap();
}

async fn triple(store: &GraphStore, subject: &str, predicate: &str, object: &str, confidence: f64) {
    store
        .upsert_triple(TripleUpsert::new(subject, predicate, object, ERA).confidence(confidence))
        .await
        .unwrap();
}

async fn summary(store: &GraphStore, kind: SummaryType, entity_id: &str, text: &str) {
    store
        .upsert_summary(SummaryUpsert::new(kind, ERA, text).entity(entity_id))
        .await
        .unwrap();
}

async fn galaxy() -> GraphStore {
    let store = create_test_graph_store().await.unwrap();

    entity(
        &store,
        "luke_skywalker",
        "CHARACTER",
        "Luke Skywalker",
        json!({"species": "Human", "role": "Jedi Knight", "faction": "New Republic"}),
    )
    .await;
    entity(&store, "darth_vader", "CHARACTER", "Darth Vader", json!({})).await;
    entity(&store, "leia_organa", "CHARACTER", "Leia Organa", json!({})).await;
    triple(&store, "darth_vader", "FATHER_OF", "luke_skywalker", 1.0).await;
    triple(&store, "darth_vader", "FATHER_OF", "luke_skywalker", 1.0).await;
    triple(&store, "luke_skywalker", "SIBLING_OF", "leia_organa", 0.9).await;
    summary(
        &store,
        SummaryType::CharacterArc,
        "luke_skywalker",
        "A farm boy from Tatooine who becomes the last of the Jedi.",
    )
    .await;

    entity(&store, "new_republic", "FACTION", "New Republic", json!({})).await;
    entity(&store, "galactic_empire", "FACTION", "Galactic Empire", json!({})).await;
    entity(&store, "smugglers_alliance", "FACTION", "Smugglers' Alliance", json!({})).await;
    entity(&store, "hutt_cartel", "FACTION", "Hutt Cartel", json!({})).await;
    triple(&store, "new_republic", "OPPOSES", "galactic_empire", 1.0).await;
    triple(&store, "new_republic", "ALLIED_WITH", "smugglers_alliance", 0.8).await;

    entity(
        &store,
        "tatooine",
        "LOCATION",
        "Tatooine",
        json!({"type": "desert planet", "region": "Outer Rim"}),
    )
    .await;
    triple(&store, "hutt_cartel", "CONTROLS", "tatooine", 1.0).await;
    summary(
        &store,
        SummaryType::LocationDossier,
        "tatooine",
        "A harsh desert world ruled by crime lords.",
    )
    .await;

    entity(
        &store,
        "battle_of_endor",
        "EVENT",
        "Battle of Endor",
        json!({"location": "Forest moon of Endor", "outcome": "The second Death Star is destroyed."}),
    )
    .await;
    entity(
        &store,
        "duel_on_bespin",
        "EVENT",
        "Duel on Bespin",
        json!({
            "location": "Cloud City, Bespin",
            "outcome": "Luke refuses to join Vader, loses his hand, and learns the truth about his father before escaping the city."
        }),
    )
    .await;
    triple(&store, "luke_skywalker", "PARTICIPATED_IN", "battle_of_endor", 1.0).await;
    triple(&store, "luke_skywalker", "PARTICIPATED_IN", "duel_on_bespin", 1.0).await;
    triple(&store, "darth_vader", "PARTICIPATED_IN", "duel_on_bespin", 1.0).await;

    store
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn test_character_context_block() {
    let retriever = RuntimeRetriever::from_store(galaxy().await);

    let block = retriever
        .character_context(&ids(&["luke_skywalker", "nobody"]), ERA, 8)
        .await;
    insta::assert_snapshot!(block, @r"
    ### Character Relationships
    **Luke Skywalker** (Human, Jedi Knight, New Republic)
    - Darth Vader is the father of Luke Skywalker
    - Luke Skywalker took part in Battle of Endor
    - Luke Skywalker took part in Duel on Bespin
    - Luke Skywalker is a sibling of Leia Organa
    Arc: A farm boy from Tatooine who becomes the last of the Jedi.
    ");

    let limited = retriever.character_context(&ids(&["luke_skywalker"]), ERA, 1).await;
    assert_eq!(limited.lines().filter(|l| l.starts_with("- ")).count(), 1);
    assert_eq!(retriever.character_context(&ids(&["nobody"]), ERA, 8).await, "");
}

#[tokio::test]
async fn test_faction_location_and_event_blocks() {
    let retriever = RuntimeRetriever::from_store(galaxy().await);

    insta::assert_snapshot!(retriever.faction_dynamics(None, ERA).await, @r"
    ### Faction Dynamics
    - New Republic opposes Galactic Empire
    - New Republic is allied with Smugglers' Alliance
    ");
    let filtered = retriever
        .faction_dynamics(Some(&ids(&["smugglers_alliance"])), ERA)
        .await;
    assert_eq!(
        filtered,
        "### Faction Dynamics\n- New Republic is allied with Smugglers' Alliance"
    );

    insta::assert_snapshot!(retriever.location_context("tatooine", ERA).await, @r"
    ### Location: Tatooine
    Type: desert planet
    Region: Outer Rim
    Controlled by: Hutt Cartel
    A harsh desert world ruled by crime lords.
    ");
    assert_eq!(retriever.location_context("Coruscant", ERA).await, "");

    insta::assert_snapshot!(
        retriever
            .relevant_events(&ids(&["luke_skywalker", "darth_vader"]), Some("Bespin"), ERA, 5)
            .await,
        @r"
    ### Relevant Events
    - Duel on Bespin: Luke refuses to join Vader, loses his hand, and learns the truth about his father before escaping...
    - Battle of Endor: The second Death Star is destroyed.
    "
    );
    let events = retriever
        .relevant_events(&ids(&["luke_skywalker"]), Some("Bespin"), ERA, 5)
        .await;
    for line in events.lines().skip(1) {
        let (_, outcome) = line.split_once(": ").unwrap();
        assert!(outcome.chars().count() <= 100, "{outcome}");
    }
    let top = retriever
        .relevant_events(&ids(&["darth_vader"]), None, ERA, 5)
        .await;
    assert!(top.starts_with(EVENTS_HEADER));
    assert!(!top.contains("Endor"));

    let unfiltered = retriever.relevant_events(&[], None, ERA, 1).await;
    assert_eq!(unfiltered.lines().count(), 3);
}

#[tokio::test]
async fn test_composed_context_respects_budget() {
    let retriever = RuntimeRetriever::from_store(galaxy().await);
    let request = ContextRequest {
        character_ids: ids(&["luke_skywalker"]),
        location: Some("Tatooine".to_string()),
        era: ERA.to_string(),
        token_budget: Some(10_000),
        ..ContextRequest::default()
    };

    let director = retriever.director_context(&request).await;
    for header in [CHARACTERS_HEADER, FACTIONS_HEADER, "### Location: Tatooine", EVENTS_HEADER] {
        assert!(director.contains(header), "missing {header}");
    }
    let narrator = retriever.narrator_context(&request).await;
    assert!(!narrator.contains(FACTIONS_HEADER));
    assert!(narrator.contains(EVENTS_HEADER));

    let tight = retriever
        .director_context(&ContextRequest {
            token_budget: Some(40),
            ..request.clone()
        })
        .await;
    assert!(estimate_tokens(&tight) <= 40);
    assert!(!tight.is_empty());
    assert!(director.starts_with(&tight));
    // only whole lines survive
    assert!(director.lines().any(|line| line == tight.lines().last().unwrap_or_default()));
}

#[tokio::test]
async fn test_empty_or_foreign_database_degrades_to_empty_blocks() {
    let temp = TempDir::new().expect("tempdir");
    let empty_db = temp.path().join("empty.sqlite3");
    std::fs::write(&empty_db, b"").unwrap();

    let retriever = RuntimeRetriever::new(&empty_db);
    let request = ContextRequest {
        character_ids: ids(&["luke_skywalker"]),
        location: Some("Tatooine".to_string()),
        era: ERA.to_string(),
        ..ContextRequest::default()
    };
    assert_eq!(retriever.director_context(&request).await, "");
    assert_eq!(retriever.narrator_context(&request).await, "");
    assert_eq!(retriever.faction_dynamics(None, ERA).await, "");
    assert_eq!(retriever.relevant_events(&[], None, ERA, 5).await, "");

    let missing = RuntimeRetriever::new(temp.path().join("missing.sqlite3"));
    assert_eq!(missing.narrator_context(&request).await, "");
}
