//! Tab values and the insertion-ordered tab map.
//!
//! The map is the single piece of live shared state: the hub is its only
//! writer, every other component reads a cloned snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::protocol::Operation;

/// A named text document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: String,
    pub name: String,
    pub content: String,
}

impl Tab {
    /// Create an empty tab.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            content: String::new(),
        }
    }

    /// The tab synthesised when the store holds no tabs at all.
    pub fn default_tab() -> Self {
        Self::new("default", "Main")
    }
}

/// Why an operation left the map untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    /// `update`/`rename` named a tab that does not exist
    UnknownTab,
    /// `delete` would have removed the last remaining tab
    LastTab,
}

/// Result of applying one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The tab was inserted or modified; carries its new value
    Upserted(Tab),
    /// The id is no longer present (it may not have been present before)
    Removed(String),
    Ignored(Ignored),
}

impl Outcome {
    /// Whether the operation should be persisted and broadcast.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Outcome::Ignored(_))
    }
}

/// Tabs keyed by id, iterated in insertion order.
#[derive(Debug, Clone, Default)]
pub struct TabMap {
    tabs: HashMap<String, Tab>,
    order: Vec<String>,
}

impl TabMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tabs(tabs: impl IntoIterator<Item = Tab>) -> Self {
        let mut map = Self::new();
        for tab in tabs {
            map.insert(tab);
        }
        map
    }

    /// Insert or replace by id. A replaced tab keeps its position.
    pub fn insert(&mut self, tab: Tab) -> Option<Tab> {
        if !self.tabs.contains_key(&tab.id) {
            self.order.push(tab.id.clone());
        }
        self.tabs.insert(tab.id.clone(), tab)
    }

    pub fn remove(&mut self, id: &str) -> Option<Tab> {
        let removed = self.tabs.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<&Tab> {
        self.tabs.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tabs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tab> {
        self.order.iter().filter_map(|id| self.tabs.get(id))
    }

    /// Cloned tabs in insertion order.
    pub fn to_vec(&self) -> Vec<Tab> {
        self.iter().cloned().collect()
    }

    /// Apply one operation with last-write-wins semantics.
    pub fn apply(&mut self, op: &Operation) -> Outcome {
        match op {
            Operation::Update { tab_id, content } => match self.tabs.get_mut(tab_id) {
                Some(tab) => {
                    tab.content = content.clone();
                    Outcome::Upserted(tab.clone())
                }
                None => Outcome::Ignored(Ignored::UnknownTab),
            },
            Operation::Create { tab_id, name } => {
                let tab = Tab::new(tab_id.clone(), name.clone());
                self.insert(tab.clone());
                Outcome::Upserted(tab)
            }
            Operation::Rename { tab_id, name } => match self.tabs.get_mut(tab_id) {
                Some(tab) => {
                    tab.name = name.clone();
                    Outcome::Upserted(tab.clone())
                }
                None => Outcome::Ignored(Ignored::UnknownTab),
            },
            Operation::Delete { tab_id } => {
                if self.len() == 1 && self.contains(tab_id) {
                    return Outcome::Ignored(Ignored::LastTab);
                }
                self.remove(tab_id);
                Outcome::Removed(tab_id.clone())
            }
        }
    }
}
