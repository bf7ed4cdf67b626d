//! Entity name resolution.
//!
//! Maps the many surface forms a narrative uses for one identity ("Luke",
//! "Skywalker", "Commander Skywalker") onto a stable canonical id. The
//! resolver itself is pure; callers own the [`SessionCache`] and feed it via
//! [`remember`] as a batch is processed.

mod alias;
mod merge;

use std::collections::BTreeMap;

use tracing::trace;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::vocabulary::EntityType;

pub use alias::{AliasError, AliasResult, AliasTable};
pub use merge::{is_empty_value, merge_properties};

/// Maximum edit distance for a fuzzy match against a cached name.
pub const FUZZY_MAX_DISTANCE: usize = 2;

/// Lowercased name → canonical id, scoped to one extraction batch.
///
/// Ordered so fuzzy tie-breaks do not depend on insertion order.
pub type SessionCache = BTreeMap<String, String>;

/// Resolve a display name to a canonical id.
///
/// Precedence: alias table, exact session-cache hit, fuzzy session-cache
/// hit, then [`slugify`]. Fuzzy ties go to the smallest distance, then the
/// lexicographically smallest cached name.
pub fn resolve(
    name: &str,
    entity_type: Option<EntityType>,
    aliases: &AliasTable,
    cache: &SessionCache,
) -> String {
    let key = name.trim().to_lowercase();

    if let Some(id) = aliases.lookup(&key) {
        trace!(name, ?entity_type, id, "resolved via alias table");
        return id.to_string();
    }

    if let Some(id) = cache.get(&key) {
        return id.clone();
    }

    let slug = slugify(&key);
    let mut best: Option<(usize, &str)> = None;
    for (cached, id) in cache {
        let distance = if !slug.is_empty() && slugify(cached) == slug {
            0
        } else {
            strsim::levenshtein(&key, cached)
        };
        if distance > FUZZY_MAX_DISTANCE {
            continue;
        }
        // BTreeMap iterates in key order, so strict `<` keeps the smallest name
        if best.is_none_or(|(current, _)| distance < current) {
            best = Some((distance, id));
        }
    }
    if let Some((distance, id)) = best {
        trace!(name, ?entity_type, id, distance, "resolved via fuzzy match");
        return id.to_string();
    }

    slug
}

/// Record a resolution so later names in the batch can match it.
pub fn remember(cache: &mut SessionCache, name: &str, id: &str) {
    let key = name.trim().to_lowercase();
    if key.is_empty() || id.is_empty() {
        return;
    }
    cache.entry(key).or_insert_with(|| id.to_string());
}

/// ASCII slug: NFKD, strip marks, lowercase, `[a-z0-9_]` only.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.nfkd().filter(|c| !is_combining_mark(*c)) {
        let ch = ch.to_ascii_lowercase();
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Render an id as a display name: `luke_skywalker` → `Luke Skywalker`.
pub fn title_case_id(id: &str) -> String {
    id.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> AliasTable {
        let mut map = BTreeMap::new();
        map.insert(
            "luke_skywalker".to_string(),
            vec!["Luke".to_string(), "Commander Skywalker".to_string()],
        );
        map.insert("darth_vader".to_string(), vec!["Anakin Skywalker".to_string()]);
        AliasTable::from_canonical_map(map)
    }

    #[test]
    fn slugify_normalizes_unicode_and_separators() {
        assert_eq!(slugify("Luke Skywalker"), "luke_skywalker");
        assert_eq!(slugify("  Padmé   Amidala "), "padme_amidala");
        assert_eq!(slugify("Obi-Wan Kenobi"), "obi_wan_kenobi");
        assert_eq!(slugify("R2-D2"), "r2_d2");
        assert_eq!(slugify("Jabba's  Palace!"), "jabbas_palace");
        assert_eq!(slugify("__X--Wing__"), "x_wing");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn alias_table_wins_case_insensitively() {
        let cache = SessionCache::new();
        let table = aliases();
        assert_eq!(resolve("LUKE", None, &table, &cache), "luke_skywalker");
        assert_eq!(
            resolve("commander skywalker", Some(EntityType::Character), &table, &cache),
            "luke_skywalker"
        );
        // canonical id and its spaced form are registered too
        assert_eq!(resolve("Luke Skywalker", None, &table, &cache), "luke_skywalker");
        assert_eq!(resolve("darth_vader", None, &table, &cache), "darth_vader");
    }

    #[test]
    fn alias_table_precedes_session_cache() {
        let mut cache = SessionCache::new();
        remember(&mut cache, "Luke", "some_other_luke");
        assert_eq!(resolve("Luke", None, &aliases(), &cache), "luke_skywalker");
    }

    #[test]
    fn session_cache_exact_match() {
        let mut cache = SessionCache::new();
        remember(&mut cache, "Mara Jade", "mara_jade");
        assert_eq!(resolve(" mara jade ", None, &AliasTable::default(), &cache), "mara_jade");
    }

    #[test]
    fn fuzzy_match_respects_distance_boundary() {
        let mut cache = SessionCache::new();
        remember(&mut cache, "thrawn", "grand_admiral_thrawn");
        let table = AliasTable::default();

        // distance 1 and 2 match
        assert_eq!(resolve("Thrwn", None, &table, &cache), "grand_admiral_thrawn");
        assert_eq!(resolve("Thrn", None, &table, &cache), "grand_admiral_thrawn");
        // distance 3 falls through to slugify
        assert_eq!(resolve("Thr", None, &table, &cache), "thr");
    }

    #[test]
    fn fuzzy_match_on_identical_slug() {
        let mut cache = SessionCache::new();
        remember(&mut cache, "Obi-Wan Kenobi", "obi_wan_kenobi");
        assert_eq!(
            resolve("obi wan  kenobi!!", None, &AliasTable::default(), &cache),
            "obi_wan_kenobi"
        );
    }

    #[test]
    fn fuzzy_ties_resolve_deterministically() {
        let table = AliasTable::default();
        let mut forward = SessionCache::new();
        remember(&mut forward, "lando", "lando_calrissian");
        remember(&mut forward, "landb", "someone_else");

        let mut reverse = SessionCache::new();
        remember(&mut reverse, "landb", "someone_else");
        remember(&mut reverse, "lando", "lando_calrissian");

        // both at distance 1 from "landc"; "landb" sorts first
        assert_eq!(resolve("landc", None, &table, &forward), "someone_else");
        assert_eq!(resolve("landc", None, &table, &reverse), "someone_else");
        // smaller distance beats lexicographic order
        assert_eq!(resolve("lando!", None, &table, &forward), "lando_calrissian");
    }

    #[test]
    fn remember_keeps_first_binding() {
        let mut cache = SessionCache::new();
        remember(&mut cache, "Han", "han_solo");
        remember(&mut cache, "han", "han_other");
        remember(&mut cache, "", "ignored");
        assert_eq!(cache.get("han").map(String::as_str), Some("han_solo"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn resolution_is_order_independent_for_alias_hits() {
        let table = aliases();
        let mut a = SessionCache::new();
        let mut b = SessionCache::new();
        for name in ["Luke", "Commander Skywalker", "luke skywalker"] {
            let id = resolve(name, None, &table, &a);
            remember(&mut a, name, &id);
        }
        for name in ["luke skywalker", "Luke", "Commander Skywalker"] {
            let id = resolve(name, None, &table, &b);
            remember(&mut b, name, &id);
        }
        assert_eq!(a, b);
        assert!(a.values().all(|id| id == "luke_skywalker"));
    }

    #[test]
    fn title_case_renders_ids() {
        assert_eq!(title_case_id("luke_skywalker"), "Luke Skywalker");
        assert_eq!(title_case_id("r2_d2"), "R2 D2");
        assert_eq!(title_case_id("__x__"), "X");
    }

    #[test]
    fn resolves_the_documented_examples() {
        let mut cache = SessionCache::new();
        remember(&mut cache, "Luke Skywalker", "luke_skywalker");
        let table = aliases();
        let empty = AliasTable::default();

        // alias hit
        assert_eq!(resolve("Commander Skywalker", None, &table, &cache), "luke_skywalker");
        // cache hit
        assert_eq!(resolve("luke skywalker", None, &empty, &cache), "luke_skywalker");
        // fuzzy, one deletion away
        assert_eq!(resolve("Luke Skywalkr", None, &empty, &cache), "luke_skywalker");
        // accented names keep their distance per character
        remember(&mut cache, "padmé", "padme_amidala");
        assert_eq!(resolve("Padme", None, &empty, &cache), "padme_amidala");
        // nothing close enough
        assert_eq!(
            resolve("Grand Admiral Thrawn", None, &empty, &cache),
            "grand_admiral_thrawn"
        );
    }
}
