//! Neighbor-rule autotiling.
//!
//! A config maps tile groups to named rule tables. Each table is an ordered
//! list of `variant -> rules` entries; every entry whose rules all hold
//! overwrites the previous pick, so the last full match in declaration order
//! wins. `"default"` entries match unconditionally.

use log::debug;
use serde::de::{Error as _, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::Result;
use crate::tilemap::{Neighbor, TileStore};
use crate::tuple_keys;
use crate::types::*;

/// Required relation between a tile and one of its neighbors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Relation {
    /// `"any"`: always holds.
    Any,
    /// `"something"`: a tile of any group, or the map edge.
    Something,
    /// `"none"`: no tile and not the edge.
    Empty,
    /// `"self"`: a tile of the same group, or the map edge.
    SameGroup,
    /// `"notself"`: a tile of another group, or nothing.
    OtherGroup,
    /// Any other string names a specific group.
    Group(String),
}

impl From<String> for Relation {
    fn from(s: String) -> Self {
        match s.as_str() {
            "any" => Relation::Any,
            "something" => Relation::Something,
            "none" => Relation::Empty,
            "self" => Relation::SameGroup,
            "notself" => Relation::OtherGroup,
            _ => Relation::Group(s),
        }
    }
}

impl From<Relation> for String {
    fn from(r: Relation) -> Self {
        match r {
            Relation::Any => "any".into(),
            Relation::Something => "something".into(),
            Relation::Empty => "none".into(),
            Relation::SameGroup => "self".into(),
            Relation::OtherGroup => "notself".into(),
            Relation::Group(g) => g,
        }
    }
}

/// `[dx, dy, relation]`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(i32, i32, Relation)", into = "(i32, i32, Relation)")]
pub struct Rule {
    pub offset: CellKey,
    pub relation: Relation,
}

impl From<(i32, i32, Relation)> for Rule {
    fn from((dx, dy, relation): (i32, i32, Relation)) -> Self {
        Rule { offset: (dx, dy), relation }
    }
}

impl From<Rule> for (i32, i32, Relation) {
    fn from(r: Rule) -> Self {
        (r.offset.0, r.offset.1, r.relation)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRuleSet", into = "RawRuleSet")]
pub enum RuleSet {
    Default,
    All(Vec<Rule>),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawRuleSet {
    Marker(String),
    Rules(Vec<Rule>),
}

impl TryFrom<RawRuleSet> for RuleSet {
    type Error = String;

    fn try_from(raw: RawRuleSet) -> std::result::Result<Self, String> {
        match raw {
            RawRuleSet::Marker(m) if m == "default" => Ok(RuleSet::Default),
            RawRuleSet::Marker(m) => Err(format!("unknown rule marker `{m}`")),
            RawRuleSet::Rules(r) => Ok(RuleSet::All(r)),
        }
    }
}

impl From<RuleSet> for RawRuleSet {
    fn from(r: RuleSet) -> Self {
        match r {
            RuleSet::Default => RawRuleSet::Marker("default".into()),
            RuleSet::All(rules) => RawRuleSet::Rules(rules),
        }
    }
}

/// One rule table, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mapping {
    pub variants: Vec<(TileId, RuleSet)>,
}

impl Mapping {
    /// Distinct neighbor offsets referenced by the table, sorted.
    pub fn checks(&self) -> Vec<CellKey> {
        let mut out: Vec<CellKey> = self
            .variants
            .iter()
            .filter_map(|(_, rules)| match rules {
                RuleSet::All(rules) => Some(rules.iter().map(|r| r.offset)),
                RuleSet::Default => None,
            })
            .flatten()
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

// JSON object order is the evaluation order, so the table is read entry by entry.
impl<'de> Deserialize<'de> for Mapping {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        struct MappingVisitor;

        impl<'de> Visitor<'de> for MappingVisitor {
            type Value = Mapping;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of tile ids to rule lists")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Mapping, A::Error> {
                let mut variants = Vec::new();
                while let Some((key, rules)) = access.next_entry::<String, RuleSet>()? {
                    let id = tuple_keys::decode_loose(&key).map_err(A::Error::custom)?;
                    variants.push((TileId::from(id), rules));
                }
                Ok(Mapping { variants })
            }
        }

        d.deserialize_map(MappingVisitor)
    }
}

impl Serialize for Mapping {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let mut out = s.serialize_map(Some(self.variants.len()))?;
        for (id, rules) in &self.variants {
            out.serialize_entry(&tuple_keys::encode((*id).into()), rules)?;
        }
        out.end()
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct AutotileFile {
    mappings: BTreeMap<String, Mapping>,
    assignment: BTreeMap<String, String>,
}

/// `{mappings: {name: {variant: rules | "default"}}, assignment: {group: name}}`
/// with the per-table neighbor checks derived once at load.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AutotileFile", into = "AutotileFile")]
pub struct AutotileConfig {
    pub mappings: BTreeMap<String, Mapping>,
    pub assignment: BTreeMap<String, String>,
    checks: BTreeMap<String, Vec<CellKey>>,
}

impl From<AutotileFile> for AutotileConfig {
    fn from(file: AutotileFile) -> Self {
        AutotileConfig::new(file.mappings, file.assignment)
    }
}

impl From<AutotileConfig> for AutotileFile {
    fn from(c: AutotileConfig) -> Self {
        AutotileFile { mappings: c.mappings, assignment: c.assignment }
    }
}

impl AutotileConfig {
    pub fn new(mappings: BTreeMap<String, Mapping>, assignment: BTreeMap<String, String>) -> Self {
        let checks = mappings.iter().map(|(name, m)| (name.clone(), m.checks())).collect();
        Self { mappings, assignment, checks }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Rule table and neighbor checks assigned to a group, if any.
    pub fn for_group(&self, group: &str) -> Option<(&Mapping, &[CellKey])> {
        let name = self.assignment.get(group)?;
        let mapping = self.mappings.get(name)?;
        let checks = self.checks.get(name).map(Vec::as_slice).unwrap_or(&[]);
        Some((mapping, checks))
    }
}

/// What sits at one neighbor offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NeighborClass {
    /// Outside a dimension-locked map.
    Edge,
    /// Empty cell inside the map (or anywhere on an unlocked map).
    Open,
    Tile { group: String, same: bool },
}

impl NeighborClass {
    pub fn classify(neighbor: Option<&Neighbor<'_>>, own_group: &str) -> Self {
        match neighbor {
            Some(Neighbor::Edge) => NeighborClass::Edge,
            Some(Neighbor::Tile(t)) => NeighborClass::Tile {
                group: t.group.clone(),
                same: t.group == own_group,
            },
            None => NeighborClass::Open,
        }
    }

    pub fn satisfies(&self, relation: &Relation) -> bool {
        match (self, relation) {
            (_, Relation::Any) => true,
            (NeighborClass::Edge, r) => matches!(r, Relation::Something | Relation::SameGroup),
            (NeighborClass::Open, r) => matches!(r, Relation::Empty | Relation::OtherGroup),
            (NeighborClass::Tile { group, same }, r) => match r {
                Relation::Something => true,
                Relation::SameGroup => *same,
                Relation::OtherGroup => !*same,
                Relation::Group(g) => g == group,
                _ => false,
            },
        }
    }
}

/// Last entry of the table whose rules all hold, or `None` when nothing matched.
pub fn choose_variant(
    mapping: &Mapping,
    classes: &HashMap<CellKey, NeighborClass>,
) -> Option<TileId> {
    let mut chosen = None;
    for (variant, rules) in &mapping.variants {
        let pass = match rules {
            RuleSet::Default => true,
            RuleSet::All(rules) => rules.iter().all(|r| {
                classes
                    .get(&r.offset)
                    .unwrap_or(&NeighborClass::Open)
                    .satisfies(&r.relation)
            }),
        };
        if pass {
            chosen = Some(*variant);
        }
    }
    chosen
}

impl TileStore {
    /// Re-pick the variant of every grid tile on `layer` (inside `rect`, or the
    /// whole map). Tiles whose group has no rule table are left alone.
    ///
    /// Every chosen variant is validated against the catalog before anything
    /// changes; an unknown one fails the whole pass with an invalid-reference
    /// error. Returns the number of tiles whose id changed.
    pub fn autotile(
        &mut self,
        config: &AutotileConfig,
        rect: Option<Rect>,
        layer: i32,
    ) -> Result<usize> {
        let positions: Vec<CellKey> = match rect {
            Some(r) => self
                .rect_grid_locs(r)
                .iter()
                .filter(|p| self.tile_at(*p, layer).is_some())
                .collect(),
            None => self.grid_tiles().filter(|t| t.layer == layer).map(|t| t.grid_pos()).collect(),
        };

        let mut changes = Vec::new();
        for pos in positions {
            let Some(tile) = self.tile_at(pos, layer) else { continue };
            let Some((mapping, checks)) = config.for_group(&tile.group) else { continue };
            let neighbors = self.neighbors(pos, layer, checks, true);
            let classes: HashMap<CellKey, NeighborClass> = checks
                .iter()
                .map(|off| (*off, NeighborClass::classify(neighbors.get(off), &tile.group)))
                .collect();
            if let Some(variant) = choose_variant(mapping, &classes) {
                if variant != tile.tile_id {
                    self.catalog().config(&tile.group, variant)?;
                    changes.push((pos, variant));
                }
            }
        }

        let catalog = self.catalog_rc();
        for (pos, variant) in &changes {
            if let Some(tile) = self.tile_at_mut(*pos, layer) {
                tile.change_id(&catalog, *variant)?;
            }
        }
        debug!("autotile layer {}: {} tiles changed", layer, changes.len());
        Ok(changes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{Tile, TileCatalog};
    use glam::{UVec2, Vec2};
    use std::rc::Rc;

    const CONFIG: &str = r#"{
        "mappings": {
            "ground": {
                "t\u0000(0,0)": "default",
                "t\u0000(1,0)": [[0, -1, "none"]],
                "t\u0000(2,0)": [[0, -1, "none"], [1, 0, "notself"]],
                "t\u0000(0,1)": [[0, -1, "self"], [-1, 0, "self"], [1, 0, "self"], [0, 1, "self"]]
            }
        },
        "assignment": {"dirt": "ground"}
    }"#;

    fn setup(w: u32, h: u32) -> TileStore {
        let mut c = TileCatalog::new(Vec2::splat(8.0));
        c.add_group_json("dirt", r#"{"(0,0)": {}, "(1,0)": {}, "(2,0)": {}, "(0,1)": {}}"#)
            .unwrap();
        c.add_group_json("rock", r#"{"(0,0)": {}}"#).unwrap();
        let cfg = TileMapConfig {
            tile_size: UVec2::new(8, 8),
            dimensions: UVec2::new(w, h),
            ..TileMapConfig::default()
        };
        TileStore::new(cfg, Rc::new(c))
    }

    fn place(s: &mut TileStore, group: &str, x: i32, y: i32) {
        let pos = Vec2::new(x as f32, y as f32);
        let t = Tile::new(s.catalog(), group, TileId(0, 0), pos, 0, "").unwrap();
        s.insert(t, true);
    }

    #[test]
    fn test_checks_are_derived_and_order_is_kept() {
        let cfg = AutotileConfig::from_json(CONFIG).unwrap();
        let (mapping, checks) = cfg.for_group("dirt").unwrap();
        assert_eq!(checks, &[(-1, 0), (0, -1), (0, 1), (1, 0)]);
        let order: Vec<TileId> = mapping.variants.iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![TileId(0, 0), TileId(1, 0), TileId(2, 0), TileId(0, 1)]);
        assert!(cfg.for_group("rock").is_none());
    }

    #[test]
    fn test_unknown_marker_is_rejected() {
        let bad = r#"{"mappings": {"g": {"(0,0)": "sometimes"}}, "assignment": {}}"#;
        assert!(AutotileConfig::from_json(bad).is_err());
    }

    #[test]
    fn test_last_full_match_wins() {
        let mut s = setup(4, 4);
        // lone tile at the top-right of a two tile row; right neighbor is rock
        place(&mut s, "dirt", 1, 1);
        place(&mut s, "rock", 2, 1);
        let cfg = AutotileConfig::from_json(CONFIG).unwrap();
        s.autotile(&cfg, None, 0).unwrap();
        // (1,0) and (2,0) both match; (2,0) is declared later
        assert_eq!(s.tile_at((1, 1), 0).unwrap().tile_id, TileId(2, 0));
        // rock has no assignment and is untouched
        assert_eq!(s.tile_at((2, 1), 0).unwrap().tile_id, TileId(0, 0));
    }

    #[test]
    fn test_edges_count_as_self_on_locked_maps() {
        let mut s = setup(1, 1);
        place(&mut s, "dirt", 0, 0);
        let cfg = AutotileConfig::from_json(CONFIG).unwrap();
        s.autotile(&cfg, None, 0).unwrap();
        // every neighbor is an edge: "none" rules fail, the all-"self" entry passes
        assert_eq!(s.tile_at((0, 0), 0).unwrap().tile_id, TileId(0, 1));

        let mut s = setup(1, 1);
        s.cfg.dimensional_lock = false;
        place(&mut s, "dirt", 0, 0);
        s.autotile(&cfg, None, 0).unwrap();
        // unlocked: neighbors are open, (2,0) is the last match
        assert_eq!(s.tile_at((0, 0), 0).unwrap().tile_id, TileId(2, 0));
    }

    #[test]
    fn test_autotile_is_idempotent() {
        let mut s = setup(6, 6);
        for x in 0..6 {
            for y in 2..6 {
                place(&mut s, "dirt", x, y);
            }
        }
        let cfg = AutotileConfig::from_json(CONFIG).unwrap();
        let first = s.autotile(&cfg, None, 0).unwrap();
        assert!(first > 0);
        let snapshot: Vec<(CellKey, TileId)> = {
            let mut v: Vec<_> = s.grid_tiles().map(|t| (t.grid_pos(), t.tile_id)).collect();
            v.sort();
            v
        };
        assert_eq!(s.autotile(&cfg, None, 0).unwrap(), 0);
        let mut again: Vec<_> = s.grid_tiles().map(|t| (t.grid_pos(), t.tile_id)).collect();
        again.sort();
        assert_eq!(snapshot, again);
        assert_eq!(s.tile_at((3, 2), 0).unwrap().tile_id, TileId(1, 0));
        assert_eq!(s.tile_at((3, 4), 0).unwrap().tile_id, TileId(0, 1));
    }

    #[test]
    fn test_region_autotile_touches_only_the_region() {
        let mut s = setup(6, 6);
        place(&mut s, "dirt", 0, 3);
        place(&mut s, "dirt", 5, 3);
        let cfg = AutotileConfig::from_json(CONFIG).unwrap();
        let changed = s.autotile(&cfg, Some(Rect::new(0.0, 24.0, 4.0, 4.0)), 0).unwrap();
        assert_eq!(changed, 1);
        assert_ne!(s.tile_at((0, 3), 0).unwrap().tile_id, TileId(0, 0));
        assert_eq!(s.tile_at((5, 3), 0).unwrap().tile_id, TileId(0, 0));
    }

    #[test]
    fn test_unknown_variant_is_an_invalid_reference() {
        let mut s = setup(4, 4);
        place(&mut s, "dirt", 1, 1);
        let cfg = AutotileConfig::from_json(
            r#"{"mappings": {"g": {"(7,7)": "default"}}, "assignment": {"dirt": "g"}}"#,
        )
        .unwrap();
        let err = s.autotile(&cfg, None, 0).unwrap_err();
        assert!(err.is_invalid_reference());
        assert_eq!(s.tile_at((1, 1), 0).unwrap().tile_id, TileId(0, 0));
    }
}
