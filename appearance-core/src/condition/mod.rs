//! Condition Evaluator
//!
//! Pure predicate evaluation over a world + player snapshot, used to pick
//! which frame set of a variant is active.
//!
//! - A `Condition` leaf is `(field, operator, expected)`, optionally inverted
//! - A `ConditionGroup` is the AND of its leaves and its referenced groups
//! - Named groups live in a per-pack `ConditionLibrary` under
//!   `"{pack_id}.{name}"` (lowercased)
//! - Undefined references and reference cycles evaluate to false and are
//!   logged once per category, never per tick

use parking_lot::Mutex;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::appearance::Facing;

/// Locomotion state of the entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MovementState {
    #[default]
    Idle,
    Walking,
    Running,
}

impl MovementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Walking => "Walking",
            Self::Running => "Running",
        }
    }
}

/// Immutable world + player state captured once per tick per entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSnapshot {
    pub season: String,
    pub weather: String,
    pub location: String,
    /// Host clock, e.g. 600..2600
    pub time_of_day: u32,
    pub facing: Facing,
    pub movement: MovementState,
    pub mounted: bool,
    pub held_item_category: Option<String>,
    /// 0.0..=1.0
    pub health_fraction: f32,
    /// 0.0..=1.0
    pub stamina_fraction: f32,
    pub multiplayer_ready: bool,
    /// Host entity's own animation frame, drives SyncedToBase frame sets
    pub base_frame: u32,
}

impl Default for ConditionSnapshot {
    fn default() -> Self {
        Self {
            season: "spring".into(),
            weather: "sunny".into(),
            location: "town".into(),
            time_of_day: 600,
            facing: Facing::Front,
            movement: MovementState::Idle,
            mounted: false,
            held_item_category: None,
            health_fraction: 1.0,
            stamina_fraction: 1.0,
            multiplayer_ready: false,
            base_frame: 0,
        }
    }
}

/// Snapshot field a condition reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionField {
    Season,
    Weather,
    Location,
    TimeOfDay,
    FacingDirection,
    MovementState,
    IsMounted,
    HeldItemCategory,
    HealthFraction,
    StaminaFraction,
    MultiplayerReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    /// Expected value is a list; true if the field equals any element
    In,
    /// Expected value is an inclusive range
    Between,
}

/// Expected value of a condition, as authored in the pack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Range { min: f64, max: f64 },
    List(Vec<ConditionValue>),
}

/// Value read out of a snapshot
#[derive(Debug, Clone, PartialEq)]
enum FieldValue<'a> {
    Bool(bool),
    Number(f64),
    Text(&'a str),
    Missing,
}

impl ConditionSnapshot {
    fn read(&self, field: ConditionField) -> FieldValue<'_> {
        match field {
            ConditionField::Season => FieldValue::Text(&self.season),
            ConditionField::Weather => FieldValue::Text(&self.weather),
            ConditionField::Location => FieldValue::Text(&self.location),
            ConditionField::TimeOfDay => FieldValue::Number(f64::from(self.time_of_day)),
            ConditionField::FacingDirection => FieldValue::Text(self.facing.as_str()),
            ConditionField::MovementState => FieldValue::Text(self.movement.as_str()),
            ConditionField::IsMounted => FieldValue::Bool(self.mounted),
            ConditionField::HeldItemCategory => match &self.held_item_category {
                Some(category) => FieldValue::Text(category),
                None => FieldValue::Missing,
            },
            ConditionField::HealthFraction => FieldValue::Number(f64::from(self.health_fraction)),
            ConditionField::StaminaFraction => FieldValue::Number(f64::from(self.stamina_fraction)),
            ConditionField::MultiplayerReady => FieldValue::Bool(self.multiplayer_ready),
        }
    }
}

/// Single predicate leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: ConditionField,
    pub operator: Operator,
    pub value: ConditionValue,
    #[serde(default)]
    pub inverse: bool,
}

impl Condition {
    pub fn new(field: ConditionField, operator: Operator, value: ConditionValue) -> Self {
        Self {
            field,
            operator,
            value,
            inverse: false,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.inverse = !self.inverse;
        self
    }

    /// `None` when the operator cannot compare the field with the expected value
    fn check(&self, snapshot: &ConditionSnapshot) -> Option<bool> {
        let actual = snapshot.read(self.field);
        let result = match self.operator {
            Operator::Equals => equals(&actual, &self.value)?,
            Operator::NotEquals => match actual {
                FieldValue::Missing => true,
                _ => !equals(&actual, &self.value)?,
            },
            Operator::GreaterThan => compare(&actual, &self.value, |a, b| a > b)?,
            Operator::LessThan => compare(&actual, &self.value, |a, b| a < b)?,
            Operator::GreaterOrEqual => compare(&actual, &self.value, |a, b| a >= b)?,
            Operator::LessOrEqual => compare(&actual, &self.value, |a, b| a <= b)?,
            Operator::In => match &self.value {
                ConditionValue::List(items) => items
                    .iter()
                    .any(|item| equals(&actual, item).unwrap_or(false)),
                _ => return None,
            },
            Operator::Between => match (&actual, &self.value) {
                (FieldValue::Number(n), ConditionValue::Range { min, max }) => {
                    *n >= *min && *n <= *max
                }
                (FieldValue::Missing, ConditionValue::Range { .. }) => false,
                _ => return None,
            },
        };
        Some(result != self.inverse)
    }
}

fn equals(actual: &FieldValue<'_>, expected: &ConditionValue) -> Option<bool> {
    match (actual, expected) {
        (FieldValue::Missing, _) => Some(false),
        (FieldValue::Text(a), ConditionValue::Text(b)) => Some(a.eq_ignore_ascii_case(b)),
        (FieldValue::Number(a), ConditionValue::Number(b)) => Some(a == b),
        (FieldValue::Bool(a), ConditionValue::Bool(b)) => Some(a == b),
        _ => None,
    }
}

fn compare(
    actual: &FieldValue<'_>,
    expected: &ConditionValue,
    op: impl Fn(f64, f64) -> bool,
) -> Option<bool> {
    match (actual, expected) {
        (FieldValue::Number(a), ConditionValue::Number(b)) => Some(op(*a, *b)),
        (FieldValue::Missing, ConditionValue::Number(_)) => Some(false),
        _ => None,
    }
}

/// AND of leaves and named sub-groups
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Names of other groups; unqualified names resolve inside the owning pack first
    #[serde(default)]
    pub groups: Vec<String>,
}

impl ConditionGroup {
    pub fn all(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            groups: Vec::new(),
        }
    }

    pub fn referencing(mut self, group: &str) -> Self {
        self.groups.push(group.to_string());
        self
    }
}

#[derive(Debug, Clone)]
struct NamedGroup {
    pack_id: String,
    group: ConditionGroup,
}

/// Problems in the named-group graph, surfaced once per load
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionWarning {
    #[error("condition group '{group}' references undefined group '{reference}'")]
    UnresolvedReference { group: String, reference: String },
    #[error("condition groups form a reference cycle: {}", members.join(" -> "))]
    Cycle { members: Vec<String> },
}

/// Named condition groups of every loaded pack
#[derive(Debug, Default)]
pub struct ConditionLibrary {
    groups: HashMap<String, NamedGroup>,
    warned: Mutex<HashSet<String>>,
}

impl ConditionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn qualify(pack_id: &str, name: &str) -> String {
        format!("{}.{}", pack_id, name).to_lowercase()
    }

    pub fn insert(&mut self, pack_id: &str, name: &str, group: ConditionGroup) {
        self.groups.insert(
            Self::qualify(pack_id, name),
            NamedGroup {
                pack_id: pack_id.to_string(),
                group,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Drop every group (or one pack's groups) and forget logged warnings
    pub fn reset(&mut self, pack_filter: Option<&str>) {
        match pack_filter {
            Some(pack_id) => self
                .groups
                .retain(|_, named| !named.pack_id.eq_ignore_ascii_case(pack_id)),
            None => self.groups.clear(),
        }
        self.warned.lock().clear();
    }

    /// Key of the group `name` as seen from `pack_id`
    fn resolve(&self, pack_id: &str, name: &str) -> Option<String> {
        let local = Self::qualify(pack_id, name);
        if self.groups.contains_key(&local) {
            return Some(local);
        }
        let global = name.to_lowercase();
        self.groups.contains_key(&global).then_some(global)
    }

    /// Evaluate a group authored by `pack_id`. An absent group is always true.
    pub fn evaluate(
        &self,
        group: Option<&ConditionGroup>,
        pack_id: &str,
        snapshot: &ConditionSnapshot,
    ) -> bool {
        match group {
            None => true,
            Some(group) => {
                let mut visited = HashSet::new();
                self.evaluate_group(group, pack_id, snapshot, &mut visited)
            }
        }
    }

    fn evaluate_group(
        &self,
        group: &ConditionGroup,
        pack_id: &str,
        snapshot: &ConditionSnapshot,
        visited: &mut HashSet<String>,
    ) -> bool {
        for condition in &group.conditions {
            match condition.check(snapshot) {
                Some(true) => {}
                Some(false) => return false,
                None => {
                    self.warn_once(
                        format!("mismatch:{:?}:{:?}", condition.field, condition.operator),
                        || {
                            format!(
                                "condition {:?} {:?} cannot compare against {:?}",
                                condition.field, condition.operator, condition.value
                            )
                        },
                    );
                    return false;
                }
            }
        }

        for reference in &group.groups {
            let Some(key) = self.resolve(pack_id, reference) else {
                self.warn_once(format!("unresolved:{}", Self::qualify(pack_id, reference)), || {
                    format!(
                        "condition group '{}' is not defined for pack '{}'",
                        reference, pack_id
                    )
                });
                return false;
            };
            if !visited.insert(key.clone()) {
                self.warn_once(format!("cycle:{}", key), || {
                    format!("condition group '{}' references itself", key)
                });
                return false;
            }
            let Some(named) = self.groups.get(&key) else {
                return false;
            };
            let ok = self.evaluate_group(&named.group, &named.pack_id, snapshot, visited);
            visited.remove(&key);
            if !ok {
                return false;
            }
        }
        true
    }

    fn warn_once(&self, category: String, message: impl FnOnce() -> String) {
        if self.warned.lock().insert(category) {
            tracing::warn!(target: "appearance_core::condition", "{}", message());
        }
    }

    /// Find undefined references and reference cycles across all packs
    pub fn validate(&self) -> Vec<ConditionWarning> {
        let mut warnings = Vec::new();
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        let mut keys: Vec<&String> = self.groups.keys().collect();
        keys.sort();
        for key in &keys {
            graph.add_node(key.as_str());
        }

        for key in &keys {
            let Some(named) = self.groups.get(*key) else {
                continue;
            };
            for reference in &named.group.groups {
                match self.resolve(&named.pack_id, reference) {
                    Some(target) => {
                        if let Some((target, _)) = self.groups.get_key_value(&target) {
                            graph.add_edge(key.as_str(), target.as_str(), ());
                        }
                    }
                    None => warnings.push(ConditionWarning::UnresolvedReference {
                        group: (*key).clone(),
                        reference: reference.clone(),
                    }),
                }
            }
        }

        for component in tarjan_scc(&graph) {
            let self_loop = component.len() == 1 && graph.contains_edge(component[0], component[0]);
            if component.len() > 1 || self_loop {
                let mut members: Vec<String> = component.iter().map(|s| s.to_string()).collect();
                members.sort();
                warnings.push(ConditionWarning::Cycle { members });
            }
        }

        for warning in &warnings {
            tracing::warn!(target: "appearance_core::condition", "pack validation: {}", warning);
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn season_is(season: &str) -> Condition {
        Condition::new(
            ConditionField::Season,
            Operator::Equals,
            ConditionValue::Text(season.into()),
        )
    }

    fn winter() -> ConditionSnapshot {
        ConditionSnapshot {
            season: "Winter".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_absent_group_is_true() {
        let lib = ConditionLibrary::new();
        assert!(lib.evaluate(None, "pack", &ConditionSnapshot::default()));
    }

    #[test]
    fn test_text_equals_is_case_insensitive() {
        let lib = ConditionLibrary::new();
        let group = ConditionGroup::all(vec![season_is("winter")]);
        assert!(lib.evaluate(Some(&group), "pack", &winter()));
        assert!(!lib.evaluate(Some(&group), "pack", &ConditionSnapshot::default()));
    }

    #[test]
    fn test_leaves_are_anded() {
        let lib = ConditionLibrary::new();
        let group = ConditionGroup::all(vec![
            season_is("winter"),
            Condition::new(
                ConditionField::IsMounted,
                Operator::Equals,
                ConditionValue::Bool(true),
            ),
        ]);
        assert!(!lib.evaluate(Some(&group), "pack", &winter()));
        let mounted = ConditionSnapshot {
            mounted: true,
            ..winter()
        };
        assert!(lib.evaluate(Some(&group), "pack", &mounted));
    }

    #[test]
    fn test_numeric_operators() {
        let lib = ConditionLibrary::new();
        let snapshot = ConditionSnapshot {
            health_fraction: 0.25,
            time_of_day: 1800,
            ..Default::default()
        };
        let low_health = ConditionGroup::all(vec![Condition::new(
            ConditionField::HealthFraction,
            Operator::LessThan,
            ConditionValue::Number(0.3),
        )]);
        assert!(lib.evaluate(Some(&low_health), "p", &snapshot));

        let evening = ConditionGroup::all(vec![Condition::new(
            ConditionField::TimeOfDay,
            Operator::Between,
            ConditionValue::Range {
                min: 1800.0,
                max: 2600.0,
            },
        )]);
        assert!(lib.evaluate(Some(&evening), "p", &snapshot));

        let after = ConditionGroup::all(vec![Condition::new(
            ConditionField::TimeOfDay,
            Operator::GreaterThan,
            ConditionValue::Number(1800.0),
        )]);
        assert!(!lib.evaluate(Some(&after), "p", &snapshot));
    }

    #[test]
    fn test_set_membership_and_missing_field() {
        let lib = ConditionLibrary::new();
        let holding_tool = ConditionGroup::all(vec![Condition::new(
            ConditionField::HeldItemCategory,
            Operator::In,
            ConditionValue::List(vec![
                ConditionValue::Text("axe".into()),
                ConditionValue::Text("pickaxe".into()),
            ]),
        )]);
        assert!(!lib.evaluate(Some(&holding_tool), "p", &ConditionSnapshot::default()));
        let with_axe = ConditionSnapshot {
            held_item_category: Some("Axe".into()),
            ..Default::default()
        };
        assert!(lib.evaluate(Some(&holding_tool), "p", &with_axe));

        let not_holding = ConditionGroup::all(vec![Condition::new(
            ConditionField::HeldItemCategory,
            Operator::NotEquals,
            ConditionValue::Text("axe".into()),
        )]);
        assert!(lib.evaluate(Some(&not_holding), "p", &ConditionSnapshot::default()));
        assert!(!lib.evaluate(Some(&not_holding), "p", &with_axe));
    }

    #[test]
    fn test_inverse_flag() {
        let lib = ConditionLibrary::new();
        let not_winter = ConditionGroup::all(vec![season_is("winter").inverted()]);
        assert!(!lib.evaluate(Some(&not_winter), "p", &winter()));
        assert!(lib.evaluate(Some(&not_winter), "p", &ConditionSnapshot::default()));
    }

    #[test]
    fn test_type_mismatch_fails_closed() {
        let lib = ConditionLibrary::new();
        let group = ConditionGroup::all(vec![Condition::new(
            ConditionField::Season,
            Operator::GreaterThan,
            ConditionValue::Number(2.0),
        )]);
        assert!(!lib.evaluate(Some(&group), "p", &winter()));
    }

    #[test]
    fn test_named_group_resolves_within_pack_first() {
        let mut lib = ConditionLibrary::new();
        lib.insert("alice.pack", "Cold", ConditionGroup::all(vec![season_is("winter")]));
        lib.insert("bob.pack", "cold", ConditionGroup::all(vec![season_is("summer")]));

        let group = ConditionGroup::default().referencing("cold");
        assert!(lib.evaluate(Some(&group), "alice.pack", &winter()));
        assert!(!lib.evaluate(Some(&group), "bob.pack", &winter()));

        // Fully qualified reference from an unrelated pack
        let qualified = ConditionGroup::default().referencing("Alice.Pack.Cold");
        assert!(lib.evaluate(Some(&qualified), "carol.pack", &winter()));
    }

    #[test]
    fn test_unresolved_reference_is_false() {
        let lib = ConditionLibrary::new();
        let group = ConditionGroup::all(vec![season_is("winter")]).referencing("missing");
        assert!(!lib.evaluate(Some(&group), "p", &winter()));
        // Second evaluation hits the warn-once ledger, still false
        assert!(!lib.evaluate(Some(&group), "p", &winter()));
    }

    #[test]
    fn test_cycle_fails_closed_and_is_reported() {
        let mut lib = ConditionLibrary::new();
        lib.insert("p", "a", ConditionGroup::default().referencing("b"));
        lib.insert("p", "b", ConditionGroup::default().referencing("a"));
        lib.insert("p", "ok", ConditionGroup::all(vec![season_is("winter")]));

        let group = ConditionGroup::default().referencing("a");
        assert!(!lib.evaluate(Some(&group), "p", &winter()));

        let warnings = lib.validate();
        assert!(warnings.contains(&ConditionWarning::Cycle {
            members: vec!["p.a".into(), "p.b".into()]
        }));
    }

    #[test]
    fn test_diamond_reference_is_not_a_cycle() {
        let mut lib = ConditionLibrary::new();
        lib.insert("p", "base", ConditionGroup::all(vec![season_is("winter")]));
        lib.insert("p", "left", ConditionGroup::default().referencing("base"));
        lib.insert("p", "right", ConditionGroup::default().referencing("base"));
        let top = ConditionGroup::default()
            .referencing("left")
            .referencing("right");
        assert!(lib.evaluate(Some(&top), "p", &winter()));
        assert!(lib.validate().is_empty());
    }

    #[test]
    fn test_validate_reports_unresolved() {
        let mut lib = ConditionLibrary::new();
        lib.insert("p", "a", ConditionGroup::default().referencing("ghost"));
        let warnings = lib.validate();
        assert_eq!(
            warnings,
            vec![ConditionWarning::UnresolvedReference {
                group: "p.a".into(),
                reference: "ghost".into()
            }]
        );
    }

    #[test]
    fn test_reset_by_pack() {
        let mut lib = ConditionLibrary::new();
        lib.insert("a", "x", ConditionGroup::default());
        lib.insert("b", "x", ConditionGroup::default());
        lib.reset(Some("A"));
        assert_eq!(lib.len(), 1);
        lib.reset(None);
        assert!(lib.is_empty());
    }

    #[test]
    fn test_condition_value_json_shapes() {
        let json = r#"{"field":"TimeOfDay","operator":"Between","value":{"min":600,"max":1200}}"#;
        let condition: Condition = serde_json::from_str(json).unwrap();
        assert_eq!(
            condition.value,
            ConditionValue::Range {
                min: 600.0,
                max: 1200.0
            }
        );
        assert!(!condition.inverse);
    }
}
