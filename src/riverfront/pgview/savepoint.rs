use std::collections::{HashSet, VecDeque};

use crate::riverfront::pgview::settings::Settings;

/// One frame of the savepoint stack: the session settings snapshot in effect
/// when the savepoint was declared, plus the set of portal names created
/// since, so `ROLLBACK TO` can drop them.
#[derive(Clone)]
pub struct SavepointFrame {
    pub name: String,
    pub fe_settings: Settings,
    pub fe_local_settings: Settings,
    pub settings: Settings,
    pub new_portals: HashSet<String>,
}

/// The savepoint stack for one (possibly implicit) transaction. `declare`
/// pushes a frame and starts tracking new portals against it; `rollback_to`
/// pops frames until one matches `name`, handing back every portal
/// introduced by the popped frames so the caller can drop them.
#[derive(Default)]
pub struct SavepointStack {
    frames: VecDeque<SavepointFrame>,
    new_portals: HashSet<String>,
}

impl SavepointStack {
    pub fn declare(&mut self, name: &str, fe_settings: Settings, fe_local_settings: Settings, settings: Settings) {
        let portals = std::mem::take(&mut self.new_portals);
        self.frames.push_back(SavepointFrame { name: name.to_string(), fe_settings, fe_local_settings, settings, new_portals: portals });
    }

    /// Records a portal created since the last savepoint, so a later
    /// `rollback_to` targeting an earlier frame will drop it.
    pub fn track_new_portal(&mut self, name: &str) {
        self.new_portals.insert(name.to_string());
    }

    /// Pops frames until one matches `name`. Returns the restored settings
    /// triple and the union of portal names introduced by every popped frame
    /// (including the currently-open, not-yet-pushed set), or `None` if no
    /// frame matches (caller must set `_tx_error`).
    pub fn rollback_to(&mut self, name: &str) -> Option<(Settings, Settings, Settings, HashSet<String>)> {
        if !self.frames.iter().any(|f| f.name == name) {
            return None;
        }
        let mut dropped = std::mem::take(&mut self.new_portals);
        loop {
            let frame = self.frames.pop_back()?;
            dropped.extend(frame.new_portals.iter().cloned());
            if frame.name == name {
                // restore new_portals tracking to an empty set scoped to this frame again
                self.new_portals = HashSet::new();
                return Some((frame.fe_settings, frame.fe_local_settings, frame.settings, dropped));
            }
        }
    }

    /// RELEASE SAVEPOINT name: pops frames up to and including `name`,
    /// merging their tracked portals into the now-current frame (they remain
    /// live, just no longer separately rewindable).
    pub fn release(&mut self, name: &str) -> bool {
        if !self.frames.iter().any(|f| f.name == name) {
            return false;
        }
        loop {
            match self.frames.pop_back() {
                Some(frame) => {
                    self.new_portals.extend(frame.new_portals);
                    if frame.name == name {
                        return true;
                    }
                }
                None => return false,
            }
        }
    }

    pub fn clear(&mut self) -> HashSet<String> {
        self.frames.clear();
        std::mem::take(&mut self.new_portals)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_to_restores_settings_and_drops_later_portals() {
        let mut stack = SavepointStack::default();
        let s0 = Settings::new();
        // p0 exists before any savepoint is declared and is never tracked in a frame.
        stack.declare("s", s0.clone(), s0.clone(), s0.clone());
        stack.track_new_portal("p1");
        let s1 = s0.mutate().set("x", Some("2".into())).finish();
        stack.declare("t", s1.clone(), s1.clone(), s1.clone());
        stack.track_new_portal("p2");

        // Rolling back to "s" discards everything declared since, i.e. both p1 and p2.
        let (settings, _, _, dropped) = stack.rollback_to("s").unwrap();
        assert_eq!(settings, s0);
        assert!(dropped.contains("p1"));
        assert!(dropped.contains("p2"));
    }

    #[test]
    fn rollback_to_unknown_name_returns_none() {
        let mut stack = SavepointStack::default();
        assert!(stack.rollback_to("nope").is_none());
    }
}
