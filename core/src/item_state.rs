use serde::Serialize;

use crate::models::ListEntry;

/// Where an entry sits in the pantry-check then shopping workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Derived and not yet looked at during the pantry check.
    Pending,
    /// On the shopping list, not yet bought.
    Needed,
    /// Already at home, kept off the shopping list.
    InPantry,
    /// Bought.
    Purchased,
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Needed => "needed",
            Self::InPantry => "in pantry",
            Self::Purchased => "purchased",
        };
        f.write_str(label)
    }
}

impl ListEntry {
    #[must_use]
    pub fn state(&self) -> ItemState {
        if !self.pantry_checked {
            ItemState::Pending
        } else if self.is_in_pantry {
            ItemState::InPantry
        } else if self.is_checked {
            ItemState::Purchased
        } else {
            ItemState::Needed
        }
    }

    #[must_use]
    pub fn is_pantry_check_item(&self) -> bool {
        !self.is_manual && self.has_identity()
    }

    #[must_use]
    pub fn is_shopping_item(&self) -> bool {
        self.pantry_checked && !self.is_in_pantry && self.has_identity()
    }

    #[must_use]
    pub fn is_unpurchased(&self) -> bool {
        self.is_shopping_item() && !self.is_checked
    }

    /// Set the in-pantry flag. Touching pantry state always completes the
    /// pantry check. Returns whether anything changed.
    pub fn set_in_pantry(&mut self, in_pantry: bool) -> bool {
        let changed = self.is_in_pantry != in_pantry || !self.pantry_checked;
        self.is_in_pantry = in_pantry;
        self.pantry_checked = true;
        changed
    }

    pub fn mark_in_pantry(&mut self) -> bool {
        self.set_in_pantry(true)
    }

    pub fn unmark_from_pantry(&mut self) -> bool {
        self.set_in_pantry(false)
    }

    pub fn toggle_pantry(&mut self) -> bool {
        self.set_in_pantry(!self.is_in_pantry)
    }

    /// Complete the pantry check without touching the in-pantry flag.
    pub fn mark_needed(&mut self) -> bool {
        let changed = !self.pantry_checked;
        self.pantry_checked = true;
        changed
    }

    /// `now` is stamped into `checked_at` when checking. Unchecking clears
    /// both the time and who checked it.
    pub fn set_checked(&mut self, checked: bool, by: Option<&str>, now: &str) -> bool {
        if checked {
            if self.is_checked {
                return false;
            }
            self.is_checked = true;
            self.checked_at = Some(now.to_string());
            self.checked_by = by.map(str::to_string);
        } else {
            if !self.is_checked && self.checked_at.is_none() && self.checked_by.is_none() {
                return false;
            }
            self.is_checked = false;
            self.checked_at = None;
            self.checked_by = None;
        }
        true
    }

    pub fn check(&mut self, by: Option<&str>, now: &str) -> bool {
        self.set_checked(true, by, now)
    }

    pub fn uncheck(&mut self) -> bool {
        self.set_checked(false, None, "")
    }

    pub fn toggle_checked(&mut self, by: Option<&str>, now: &str) -> bool {
        self.set_checked(!self.is_checked, by, now)
    }
}

/// Complete the pantry check for every entry still pending. Returns the ids
/// of the entries that changed.
pub fn mark_all_remaining_as_needed(entries: &mut [ListEntry]) -> Vec<i64> {
    entries
        .iter_mut()
        .filter(|e| e.has_identity())
        .filter_map(|e| e.mark_needed().then_some(e.id))
        .collect()
}

#[must_use]
pub fn pantry_check_items(entries: &[ListEntry]) -> Vec<&ListEntry> {
    entries.iter().filter(|e| e.is_pantry_check_item()).collect()
}

#[must_use]
pub fn in_pantry_items(entries: &[ListEntry]) -> Vec<&ListEntry> {
    entries
        .iter()
        .filter(|e| e.is_in_pantry && e.has_identity())
        .collect()
}

#[must_use]
pub fn shopping_list_items(entries: &[ListEntry]) -> Vec<&ListEntry> {
    entries.iter().filter(|e| e.is_shopping_item()).collect()
}

#[must_use]
pub fn unpurchased_shopping_items(entries: &[ListEntry]) -> Vec<&ListEntry> {
    entries.iter().filter(|e| e.is_unpurchased()).collect()
}
