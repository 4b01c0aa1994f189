use std::collections::HashMap;

use crate::riverfront::pool::QueryUnitGroup;
use crate::riverfront::{Error, Result};

/// A named or unnamed bound statement ready for rows to be fetched. The empty
/// name denotes the unnamed portal, which may be re-bound freely.
#[derive(Clone)]
pub struct Portal {
    pub name: String,
    pub unit: QueryUnitGroup,
}

/// Per-connection portal registry. Portals only exist while `in_tx()`; they
/// are cleared wholesale at transaction end (see `PgConnectionView::end_tx`).
#[derive(Default, Clone)]
pub struct PortalRegistry {
    portals: HashMap<String, Portal>,
}

impl PortalRegistry {
    pub fn create(&mut self, name: &str, unit: QueryUnitGroup) -> Result<()> {
        if !name.is_empty() && self.portals.contains_key(name) {
            return Err(Error::internal(format!("portal \"{}\" already exists", name)));
        }
        self.portals.insert(name.to_string(), Portal { name: name.to_string(), unit });
        Ok(())
    }

    pub fn find(&self, name: &str) -> Result<&Portal> {
        self.portals.get(name).ok_or_else(|| Error::invalid_cursor_name(name))
    }

    pub fn close(&mut self, name: &str) -> Result<()> {
        self.portals.remove(name).map(|_| ()).ok_or_else(|| Error::invalid_cursor_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.portals.contains_key(name)
    }

    /// Removes every portal whose name is in `names` (used when rolling back
    /// to a savepoint that introduced them).
    pub fn close_all(&mut self, names: &std::collections::HashSet<String>) {
        for name in names {
            self.portals.remove(name);
        }
    }

    /// Drops every portal (transaction end).
    pub fn clear(&mut self) {
        self.portals.clear();
    }
}
