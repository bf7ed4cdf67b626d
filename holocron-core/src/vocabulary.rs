//! Closed entity-type and relationship vocabulary.
//!
//! The vocabulary is built once and shared (usually behind an `Arc`) by the
//! extractor, synthesizer and retriever. Nothing mutates it after
//! construction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The six kinds of graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Character,
    Location,
    Faction,
    Ship,
    Artifact,
    Event,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        Self::Character,
        Self::Location,
        Self::Faction,
        Self::Ship,
        Self::Artifact,
        Self::Event,
    ];

    /// Database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "CHARACTER",
            Self::Location => "LOCATION",
            Self::Faction => "FACTION",
            Self::Ship => "SHIP",
            Self::Artifact => "ARTIFACT",
            Self::Event => "EVENT",
        }
    }

    /// Parse a type name the way an LLM tends to write it.
    ///
    /// Accepts the canonical names in any case plus a handful of common
    /// synonyms. Returns `None` for anything else.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let key = normalize_token(raw);
        if key.is_empty() {
            return None;
        }
        if let Ok(exact) = key.parse() {
            return Some(exact);
        }
        let mapped = match key.as_str() {
            "PERSON" | "PEOPLE" | "INDIVIDUAL" | "DROID" | "CREATURE" | "BEING" => Self::Character,
            "PLACE" | "PLANET" | "CITY" | "SYSTEM" | "MOON" | "STATION" | "REGION" => {
                Self::Location
            }
            "ORGANIZATION" | "ORGANISATION" | "GROUP" | "GOVERNMENT" | "ORDER" | "ARMY"
            | "MILITARY" => Self::Faction,
            "STARSHIP" | "VESSEL" | "VEHICLE" | "SPACESHIP" | "CRAFT" => Self::Ship,
            "ITEM" | "OBJECT" | "WEAPON" | "RELIC" | "DEVICE" | "TECHNOLOGY" => Self::Artifact,
            "BATTLE" | "INCIDENT" | "OCCURRENCE" | "WAR" | "MISSION" => Self::Event,
            _ => return None,
        };
        Some(mapped)
    }
}

impl FromStr for EntityType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHARACTER" => Ok(Self::Character),
            "LOCATION" => Ok(Self::Location),
            "FACTION" => Ok(Self::Faction),
            "SHIP" => Ok(Self::Ship),
            "ARTIFACT" => Ok(Self::Artifact),
            "EVENT" => Ok(Self::Event),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.as_str().to_string()
    }
}

/// Relationship families, used for prompt grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateGroup {
    Kinship,
    Allegiance,
    Membership,
    Spatial,
    Event,
    FactionDynamics,
    Ownership,
}

impl PredicateGroup {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Kinship => "Kinship",
            Self::Allegiance => "Personal allegiance",
            Self::Membership => "Membership",
            Self::Spatial => "Spatial",
            Self::Event => "Events",
            Self::FactionDynamics => "Faction dynamics",
            Self::Ownership => "Ownership",
        }
    }
}

/// One member of the closed predicate vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Predicate {
    pub name: &'static str,
    pub label: &'static str,
    pub group: PredicateGroup,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub const PARTICIPATED_IN: &str = "PARTICIPATED_IN";
pub const OCCURRED_AT: &str = "OCCURRED_AT";
pub const MEMBER_OF: &str = "MEMBER_OF";
pub const CONTROLS: &str = "CONTROLS";
pub const ALLIED_WITH: &str = "ALLIED_WITH";
pub const OPPOSES: &str = "OPPOSES";
pub const NEUTRAL_TO: &str = "NEUTRAL_TO";
const CAUSED: &str = "CAUSED";
const LOCATED_IN: &str = "LOCATED_IN";
const BORN_ON: &str = "BORN_ON";
const LIVES_ON: &str = "LIVES_ON";
const PILOTS: &str = "PILOTS";
const WIELDS: &str = "WIELDS";

/// Predicates rendered in the faction dynamics block.
pub const FACTION_DYNAMICS: [&str; 3] = [ALLIED_WITH, OPPOSES, NEUTRAL_TO];

const MIN_CORRECTION_LEN: usize = 3;

const STANDARD_PREDICATES: &[Predicate] = &[
    // Kinship
    p("FATHER_OF", "is the father of", PredicateGroup::Kinship),
    p("MOTHER_OF", "is the mother of", PredicateGroup::Kinship),
    p("PARENT_OF", "is a parent of", PredicateGroup::Kinship),
    p("CHILD_OF", "is a child of", PredicateGroup::Kinship),
    p("SIBLING_OF", "is a sibling of", PredicateGroup::Kinship),
    p("SPOUSE_OF", "is married to", PredicateGroup::Kinship),
    p("RELATIVE_OF", "is related to", PredicateGroup::Kinship),
    // Personal allegiance
    p("MENTOR_OF", "is the mentor of", PredicateGroup::Allegiance),
    p("APPRENTICE_OF", "is the apprentice of", PredicateGroup::Allegiance),
    p("FRIEND_OF", "is a friend of", PredicateGroup::Allegiance),
    p("ALLY_OF", "is an ally of", PredicateGroup::Allegiance),
    p("ENEMY_OF", "is an enemy of", PredicateGroup::Allegiance),
    p("RIVAL_OF", "is a rival of", PredicateGroup::Allegiance),
    p("LOYAL_TO", "is loyal to", PredicateGroup::Allegiance),
    p("SERVES", "serves", PredicateGroup::Allegiance),
    p("BETRAYED", "betrayed", PredicateGroup::Allegiance),
    p("KILLED", "killed", PredicateGroup::Allegiance),
    // Membership
    p("MEMBER_OF", "is a member of", PredicateGroup::Membership),
    p("LEADER_OF", "leads", PredicateGroup::Membership),
    p("COMMANDS", "commands", PredicateGroup::Membership),
    p("FOUNDED", "founded", PredicateGroup::Membership),
    // Spatial
    p("LOCATED_IN", "is located in", PredicateGroup::Spatial),
    p("PART_OF", "is part of", PredicateGroup::Spatial),
    p("BORN_ON", "was born on", PredicateGroup::Spatial),
    p("LIVES_ON", "lives on", PredicateGroup::Spatial),
    p("VISITED", "visited", PredicateGroup::Spatial),
    // Events
    p("PARTICIPATED_IN", "took part in", PredicateGroup::Event),
    p("OCCURRED_AT", "took place at", PredicateGroup::Event),
    p("CAUSED", "caused", PredicateGroup::Event),
    // Faction dynamics
    p("ALLIED_WITH", "is allied with", PredicateGroup::FactionDynamics),
    p("OPPOSES", "opposes", PredicateGroup::FactionDynamics),
    p("NEUTRAL_TO", "is neutral toward", PredicateGroup::FactionDynamics),
    p("CONTROLS", "controls", PredicateGroup::FactionDynamics),
    // Ownership
    p("OWNS", "owns", PredicateGroup::Ownership),
    p("PILOTS", "pilots", PredicateGroup::Ownership),
    p("WIELDS", "wields", PredicateGroup::Ownership),
    p("CREATED", "created", PredicateGroup::Ownership),
];

const fn p(name: &'static str, label: &'static str, group: PredicateGroup) -> Predicate {
    Predicate { name, label, group }
}

/// Immutable entity-type and predicate vocabulary.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    predicates: Vec<Predicate>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::standard()
    }
}

impl Vocabulary {
    /// The built-in narrative vocabulary.
    pub fn standard() -> Self {
        Self {
            predicates: STANDARD_PREDICATES.to_vec(),
        }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn entity_types(&self) -> &'static [EntityType] {
        &EntityType::ALL
    }

    /// Exact lookup by canonical predicate name.
    pub fn predicate(&self, name: &str) -> Option<&Predicate> {
        self.predicates.iter().find(|pred| pred.name == name)
    }

    pub fn is_valid_predicate(&self, name: &str) -> bool {
        self.predicate(name).is_some()
    }

    pub fn is_valid_entity_type(&self, name: &str) -> bool {
        name.parse::<EntityType>().is_ok()
    }

    /// Human-readable label, falling back to a lowercased form of the raw
    /// predicate for rows written before a vocabulary change.
    pub fn label(&self, name: &str) -> String {
        match self.predicate(name) {
            Some(pred) => pred.label.to_string(),
            None => name.to_lowercase().replace('_', " "),
        }
    }

    /// Entity types a predicate implies for its subject and object.
    ///
    /// `None` where the role is open (kinship, allegiance and the like are
    /// usually but not always between characters).
    pub fn endpoint_types(&self, predicate: &str) -> (Option<EntityType>, Option<EntityType>) {
        use EntityType as T;
        match predicate {
            PARTICIPATED_IN | CAUSED => (None, Some(T::Event)),
            OCCURRED_AT => (Some(T::Event), Some(T::Location)),
            MEMBER_OF => (None, Some(T::Faction)),
            ALLIED_WITH | OPPOSES | NEUTRAL_TO => (Some(T::Faction), Some(T::Faction)),
            CONTROLS => (Some(T::Faction), Some(T::Location)),
            LOCATED_IN | BORN_ON | LIVES_ON => (None, Some(T::Location)),
            PILOTS => (None, Some(T::Ship)),
            WIELDS => (None, Some(T::Artifact)),
            _ => (None, None),
        }
    }

    /// Map a raw predicate onto the vocabulary.
    ///
    /// Exact matches (after separator/case normalization) win. Otherwise an
    /// entry contained in the candidate, or containing it, is accepted; the
    /// entry with the longest overlap wins and ties go to vocabulary order.
    pub fn closest_predicate(&self, candidate: &str) -> Option<&Predicate> {
        let normalized = normalize_token(candidate);
        if normalized.len() < MIN_CORRECTION_LEN {
            return None;
        }
        if let Some(exact) = self.predicate(&normalized) {
            return Some(exact);
        }

        let mut best: Option<(&Predicate, usize)> = None;
        for pred in &self.predicates {
            let overlap = if normalized.contains(pred.name) {
                pred.name.len()
            } else if pred.name.contains(normalized.as_str()) {
                normalized.len()
            } else {
                continue;
            };
            match best {
                Some((_, current)) if current >= overlap => {}
                _ => best = Some((pred, overlap)),
            }
        }
        best.map(|(pred, _)| pred)
    }

    /// Predicate listing embedded into extraction prompts.
    pub fn prompt_listing(&self) -> String {
        let mut out = String::new();
        let mut current: Option<PredicateGroup> = None;
        for pred in &self.predicates {
            if current != Some(pred.group) {
                if current.is_some() {
                    out.push('\n');
                }
                out.push_str(pred.group.title());
                out.push_str(":\n");
                current = Some(pred.group);
            }
            out.push_str(&format!("- {} ({})\n", pred.name, pred.label));
        }
        out
    }
}

/// Uppercase and collapse any run of separators into a single underscore.
pub fn normalize_token(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_uppercase());
        } else {
            pending_sep = true;
        }
    }
    out
}
