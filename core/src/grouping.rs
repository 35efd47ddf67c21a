//! Merge same-item list entries from several periods into single display rows.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::models::{ListEntry, normalize_name};
use crate::units::{self, NormalizedQuantity};

/// What makes two entries the same row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GroupKey {
    ByIngredient(i64),
    /// Manual entries merge on their normalized name.
    ByManualName(String),
    /// Fallback for manual entries with no name to merge on.
    ByEntryId(i64),
}

impl GroupKey {
    /// `None` for entries with no usable identity.
    #[must_use]
    pub fn for_entry(entry: &ListEntry) -> Option<Self> {
        if !entry.has_identity() {
            return None;
        }
        if !entry.is_manual {
            return entry.ingredient_id.map(Self::ByIngredient);
        }
        match entry.custom_name.as_deref().map(normalize_name) {
            Some(name) if !name.is_empty() => Some(Self::ByManualName(name)),
            _ => Some(Self::ByEntryId(entry.id)),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByIngredient(id) => write!(f, "ingredient:{id}"),
            Self::ByManualName(name) => write!(f, "manual:{name}"),
            Self::ByEntryId(id) => write!(f, "entry:{id}"),
        }
    }
}

impl FromStr for GroupKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((kind, value)) = s.split_once(':') else {
            bail!("Invalid group key '{s}'. Expected ingredient:<id>, manual:<name> or entry:<id>");
        };
        match kind {
            "ingredient" => Ok(Self::ByIngredient(value.parse()?)),
            "entry" => Ok(Self::ByEntryId(value.parse()?)),
            "manual" if !value.trim().is_empty() => Ok(Self::ByManualName(normalize_name(value))),
            _ => bail!("Invalid group key '{s}'"),
        }
    }
}

/// Which entries a grouped view is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListView {
    PantryCheck,
    Shopping,
}

impl ListView {
    #[must_use]
    pub fn includes(self, entry: &ListEntry) -> bool {
        match self {
            Self::PantryCheck => entry.is_pantry_check_item(),
            Self::Shopping => entry.is_shopping_item(),
        }
    }
}

impl FromStr for ListView {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "pantry" | "pantry_check" => Ok(Self::PantryCheck),
            "shop" | "shopping" => Ok(Self::Shopping),
            _ => bail!("Invalid view '{s}'. Must be one of: pantry, shopping"),
        }
    }
}

/// One display row: every entry sharing a key across the viewed periods.
#[derive(Debug, Clone, Serialize)]
pub struct EntryGroup {
    pub key: GroupKey,
    /// Lowest-id member. Its state drives group toggles.
    pub representative_id: i64,
    pub name: String,
    pub category: String,
    pub unit: String,
    /// Sum of the members measured in `unit`.
    pub total_quantity: f64,
    /// Member amounts in other units, summed per unit.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreconciled: Vec<NormalizedQuantity>,
    pub period_ids: Vec<i64>,
    pub all_checked: bool,
    pub any_in_pantry: bool,
    pub members: Vec<ListEntry>,
}

impl EntryGroup {
    fn from_members(key: GroupKey, mut members: Vec<ListEntry>) -> Self {
        members.sort_by_key(|e| e.id);
        let first = &members[0];
        let representative_id = first.id;
        let name = first.display_name().to_string();
        let category = first.category.clone();
        let unit = first.unit.clone();

        let mut total_quantity = 0.0;
        let mut others: Vec<NormalizedQuantity> = Vec::new();
        let amounts = members.iter().flat_map(|member| {
            std::iter::once(NormalizedQuantity {
                quantity: member.quantity,
                unit: member.unit.clone(),
            })
            .chain(member.unreconciled.iter().cloned())
        });
        for amount in amounts {
            if amount.unit == unit {
                total_quantity += amount.quantity;
            } else {
                units::accumulate(&mut others, amount);
            }
        }

        let mut period_ids: Vec<i64> = members.iter().filter_map(|e| e.period_id).collect();
        period_ids.sort_unstable();
        period_ids.dedup();

        let mut group = Self {
            key,
            representative_id,
            name,
            category,
            unit,
            total_quantity,
            unreconciled: others,
            period_ids,
            all_checked: false,
            any_in_pantry: false,
            members,
        };
        group.refresh_flags();
        group
    }

    fn refresh_flags(&mut self) {
        self.all_checked = self.members.iter().all(|e| e.is_checked);
        self.any_in_pantry = self.members.iter().any(|e| e.is_in_pantry);
    }

    #[must_use]
    pub fn representative(&self) -> Option<&ListEntry> {
        self.members.iter().find(|e| e.id == self.representative_id)
    }

    #[must_use]
    pub fn member_ids(&self) -> Vec<i64> {
        self.members.iter().map(|e| e.id).collect()
    }

    /// Apply one checked state to every member. Returns the ids of members
    /// that changed.
    pub fn set_checked(&mut self, checked: bool, by: Option<&str>, now: &str) -> Vec<i64> {
        let changed = self
            .members
            .iter_mut()
            .filter_map(|e| e.set_checked(checked, by, now).then_some(e.id))
            .collect();
        self.refresh_flags();
        changed
    }

    /// Flip the representative's checked state and fan it out to the group.
    pub fn toggle_checked(&mut self, by: Option<&str>, now: &str) -> Vec<i64> {
        let target = !self.representative().is_some_and(|e| e.is_checked);
        self.set_checked(target, by, now)
    }

    pub fn set_in_pantry(&mut self, in_pantry: bool) -> Vec<i64> {
        let changed = self
            .members
            .iter_mut()
            .filter_map(|e| e.set_in_pantry(in_pantry).then_some(e.id))
            .collect();
        self.refresh_flags();
        changed
    }

    pub fn toggle_in_pantry(&mut self) -> Vec<i64> {
        let target = !self.representative().is_some_and(|e| e.is_in_pantry);
        self.set_in_pantry(target)
    }

    /// If any member is in the pantry, put every member there.
    pub fn sync_pantry_state(&mut self) -> Vec<i64> {
        if !self.any_in_pantry {
            return Vec::new();
        }
        let changed = self
            .members
            .iter_mut()
            .filter(|e| !e.is_in_pantry)
            .filter_map(|e| e.set_in_pantry(true).then_some(e.id))
            .collect();
        self.refresh_flags();
        changed
    }
}

/// Bucket the entries the view shows by [`GroupKey`]. Groups come back
/// ordered by name.
#[must_use]
pub fn group_entries(entries: &[ListEntry], view: ListView) -> Vec<EntryGroup> {
    let mut order: Vec<GroupKey> = Vec::new();
    let mut buckets: HashMap<GroupKey, Vec<ListEntry>> = HashMap::new();

    for entry in entries.iter().filter(|e| view.includes(e)) {
        let Some(key) = GroupKey::for_entry(entry) else {
            continue;
        };
        buckets
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(entry.clone());
    }

    let mut groups: Vec<EntryGroup> = order
        .into_iter()
        .filter_map(|key| {
            let members = buckets.remove(&key)?;
            Some(EntryGroup::from_members(key, members))
        })
        .collect();
    groups.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then(a.representative_id.cmp(&b.representative_id))
    });
    groups
}

/// Split groups into per-category sections, categories in alphabetical order.
#[must_use]
pub fn group_by_category(groups: Vec<EntryGroup>) -> Vec<(String, Vec<EntryGroup>)> {
    let mut sections: BTreeMap<String, Vec<EntryGroup>> = BTreeMap::new();
    for group in groups {
        sections.entry(group.category.clone()).or_default().push(group);
    }
    sections.into_iter().collect()
}
