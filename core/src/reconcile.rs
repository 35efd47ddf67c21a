use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::demand::AggregateDemand;
use crate::models::{ListEntry, NewListEntry};
use crate::units::{self, NormalizedQuantity};

/// Quantities closer than this are treated as unchanged.
pub const QUANTITY_EPSILON: f64 = 1e-6;

/// In-place refresh of an existing derived entry. Flags and timestamps are
/// not part of an update and so survive regeneration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryUpdate {
    pub entry_id: i64,
    pub quantity: f64,
    pub unit: String,
    pub meal_ids: Vec<i64>,
    pub unreconciled: Vec<NormalizedQuantity>,
}

/// The minimal set of writes that brings a period's list in line with demand.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcilePlan {
    pub updates: Vec<EntryUpdate>,
    pub creates: Vec<NewListEntry>,
    /// Stale and duplicate derived entries, removed in one step.
    pub removals: Vec<i64>,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub duplicates_removed: usize,
}

impl ReconcilePlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.creates.is_empty() && self.removals.is_empty()
    }

    #[must_use]
    pub fn summary(&self) -> ReconcileSummary {
        ReconcileSummary {
            created: self.creates.len(),
            updated: self.updates.len(),
            removed: self.removals.len(),
            duplicates_removed: self.duplicates,
        }
    }
}

fn same_meals(a: &[i64], b: &[i64]) -> bool {
    let a: HashSet<i64> = a.iter().copied().collect();
    let b: HashSet<i64> = b.iter().copied().collect();
    a == b
}

fn needs_update(entry: &ListEntry, demand: &AggregateDemand) -> bool {
    (entry.quantity - demand.quantity).abs() > QUANTITY_EPSILON
        || entry.unit != demand.unit
        || !same_meals(&entry.meal_ids, &demand.meal_ids)
        || !units::same_totals(&entry.unreconciled, &demand.unreconciled, QUANTITY_EPSILON)
}

/// Diff the current demand against a period's persisted entries.
///
/// `existing` must be the period's entries in creation order; the earliest
/// derived entry for an ingredient is kept and any later ones are duplicates.
/// Manual entries and derived entries without an ingredient are never touched.
#[must_use]
pub fn plan_reconciliation(
    period_id: i64,
    demand: &[AggregateDemand],
    existing: &[ListEntry],
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let mut by_ingredient: HashMap<i64, &ListEntry> = HashMap::new();

    for entry in existing.iter().filter(|e| !e.is_manual) {
        let Some(ingredient_id) = entry.ingredient_id else {
            continue;
        };
        if by_ingredient.contains_key(&ingredient_id) {
            debug!(entry_id = entry.id, ingredient_id, "duplicate derived entry");
            plan.removals.push(entry.id);
            plan.duplicates += 1;
        } else {
            by_ingredient.insert(ingredient_id, entry);
        }
    }

    let mut demanded: HashSet<i64> = HashSet::with_capacity(demand.len());
    for need in demand {
        demanded.insert(need.ingredient_id);
        match by_ingredient.get(&need.ingredient_id) {
            Some(entry) => {
                if needs_update(entry, need) {
                    plan.updates.push(EntryUpdate {
                        entry_id: entry.id,
                        quantity: need.quantity,
                        unit: need.unit.clone(),
                        meal_ids: need.meal_ids.clone(),
                        unreconciled: need.unreconciled.clone(),
                    });
                }
            }
            None => plan.creates.push(NewListEntry {
                period_id: Some(period_id),
                ingredient_id: Some(need.ingredient_id),
                custom_name: None,
                quantity: need.quantity,
                unit: need.unit.clone(),
                category: need.category.clone(),
                is_manual: false,
                pantry_checked: false,
                meal_ids: need.meal_ids.clone(),
                unreconciled: need.unreconciled.clone(),
            }),
        }
    }

    let mut stale: Vec<i64> = by_ingredient
        .iter()
        .filter(|(ingredient_id, _)| !demanded.contains(ingredient_id))
        .map(|(_, entry)| entry.id)
        .collect();
    stale.sort_unstable();
    plan.removals.extend(stale);

    debug!(
        period_id,
        created = plan.creates.len(),
        updated = plan.updates.len(),
        removed = plan.removals.len(),
        "planned list reconciliation"
    );
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demand(ingredient_id: i64, quantity: f64, meal_ids: Vec<i64>) -> AggregateDemand {
        AggregateDemand {
            ingredient_id,
            ingredient_name: format!("Ingredient {ingredient_id}"),
            category: "produce".to_string(),
            quantity,
            unit: "g".to_string(),
            meal_ids,
            unreconciled: Vec::new(),
        }
    }

    fn derived(id: i64, ingredient_id: i64, quantity: f64, meal_ids: Vec<i64>) -> ListEntry {
        ListEntry {
            id,
            uuid: String::new(),
            period_id: Some(1),
            ingredient_id: Some(ingredient_id),
            custom_name: None,
            quantity,
            unit: "g".to_string(),
            category: "produce".to_string(),
            is_manual: false,
            pantry_checked: false,
            is_in_pantry: false,
            is_checked: false,
            created_at: String::new(),
            checked_at: None,
            checked_by: None,
            updated_at: String::new(),
            meal_ids,
            unreconciled: Vec::new(),
            ingredient_name: None,
        }
    }

    #[test]
    fn test_creates_for_new_demand() {
        let plan = plan_reconciliation(1, &[demand(10, 1000.0, vec![5])], &[]);
        assert_eq!(plan.creates.len(), 1);
        let created = &plan.creates[0];
        assert_eq!(created.period_id, Some(1));
        assert_eq!(created.ingredient_id, Some(10));
        assert!(!created.pantry_checked);
        assert!(!created.is_manual);
        assert_eq!(created.meal_ids, vec![5]);
        assert!(plan.updates.is_empty());
        assert!(plan.removals.is_empty());
    }

    #[test]
    fn test_unchanged_entry_produces_empty_plan() {
        let existing = vec![derived(1, 10, 1000.0, vec![5, 6])];
        let plan = plan_reconciliation(1, &[demand(10, 1000.0, vec![6, 5])], &existing);
        assert!(plan.is_empty());
        assert_eq!(plan.summary(), ReconcileSummary::default());
    }

    #[test]
    fn test_updates_quantity_in_place() {
        let existing = vec![derived(1, 10, 1000.0, vec![5])];
        let plan = plan_reconciliation(1, &[demand(10, 1500.0, vec![5])], &existing);
        assert_eq!(
            plan.updates,
            vec![EntryUpdate {
                entry_id: 1,
                quantity: 1500.0,
                unit: "g".to_string(),
                meal_ids: vec![5],
                unreconciled: vec![],
            }]
        );
        assert!(plan.creates.is_empty());
        assert!(plan.removals.is_empty());
    }

    #[test]
    fn test_contributor_change_triggers_update() {
        let existing = vec![derived(1, 10, 1000.0, vec![5])];
        let plan = plan_reconciliation(1, &[demand(10, 1000.0, vec![7])], &existing);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].meal_ids, vec![7]);
    }

    #[test]
    fn test_unreconciled_change_triggers_update() {
        let mut need = demand(10, 20.0, vec![5]);
        need.unreconciled = vec![units::normalize(3.0, "cloves")];
        let existing = vec![derived(1, 10, 20.0, vec![5])];
        let plan = plan_reconciliation(1, std::slice::from_ref(&need), &existing);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].unreconciled, need.unreconciled);

        let mut saved = derived(1, 10, 20.0, vec![5]);
        saved.unreconciled = need.unreconciled.clone();
        assert!(plan_reconciliation(1, &[need], &[saved]).is_empty());
    }

    #[test]
    fn test_stale_entry_removed() {
        let existing = vec![derived(1, 10, 1000.0, vec![5]), derived(2, 11, 3.0, vec![5])];
        let plan = plan_reconciliation(1, &[demand(10, 1000.0, vec![5])], &existing);
        assert_eq!(plan.removals, vec![2]);
        assert_eq!(plan.duplicates, 0);
    }

    #[test]
    fn test_duplicates_removed_and_first_kept() {
        let existing = vec![
            derived(1, 10, 200.0, vec![5]),
            derived(2, 10, 200.0, vec![5]),
            derived(3, 10, 200.0, vec![5]),
        ];
        let plan = plan_reconciliation(1, &[demand(10, 900.0, vec![5])], &existing);
        assert_eq!(plan.removals, vec![2, 3]);
        assert_eq!(plan.duplicates, 2);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].entry_id, 1);
        assert!((plan.updates[0].quantity - 900.0).abs() < f64::EPSILON);
        let summary = plan.summary();
        assert_eq!(summary.removed, 2);
        assert_eq!(summary.duplicates_removed, 2);
    }

    #[test]
    fn test_manual_entries_untouched() {
        let mut manual = derived(1, 10, 1.0, vec![]);
        manual.is_manual = true;
        manual.pantry_checked = true;
        let mut anonymous = derived(2, 0, 1.0, vec![]);
        anonymous.ingredient_id = None;
        let plan = plan_reconciliation(1, &[], &[manual, anonymous]);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_empty_demand_removes_all_derived() {
        let existing = vec![derived(1, 10, 1.0, vec![5]), derived(2, 11, 1.0, vec![5])];
        let plan = plan_reconciliation(1, &[], &existing);
        assert_eq!(plan.removals, vec![1, 2]);
    }
}
