//! Per-connection PostgreSQL session state, decoupled from the pooled backend
//! connection that actually executes statements: settings, transaction
//! nesting, savepoints, and the portal registry.

pub mod settings;
pub mod savepoint;
pub mod portal;

use std::collections::HashMap;

use crate::riverfront::pool::{QueryUnitGroup, TxAction};
use crate::riverfront::{Error, Result};

pub use self::settings::{Settings, SettingValue, is_setting_truthy, parse_global_key};
pub use self::portal::{Portal, PortalRegistry};
pub use self::savepoint::SavepointStack;

/// Per-connection session state for the PostgreSQL frontend. Cloned cheaply
/// (every field is pointer-sized or an `Arc`-backed map) so the extended-query
/// pipeline can pre-play its effects on a throwaway clone and only commit to
/// the real view once the backend confirms success.
#[derive(Clone)]
pub struct PgConnectionView {
    /// backend session GUCs, forwarded to the backend as `SET` statements
    settings: Settings,
    /// frontend-only settings, including `global <mod>::<name>` entries
    fe_settings: Settings,
    in_tx_explicit: bool,
    in_tx_implicit: bool,
    tx_error: bool,
    /// Settings exactly as they were before this transaction began; restored
    /// verbatim on ROLLBACK.
    tx_start_settings: Option<Settings>,
    tx_start_fe_settings: Option<Settings>,
    /// Settings as they will read if this transaction COMMITs: starts equal
    /// to `tx_start_*`, advanced by every non-local `SET`, left untouched by
    /// `SET LOCAL` so local changes revert even on COMMIT.
    tx_commit_settings: Option<Settings>,
    tx_commit_fe_settings: Option<Settings>,
    savepoints: std::sync::Arc<std::sync::Mutex<SavepointStack>>,
    portals: std::sync::Arc<std::sync::Mutex<PortalRegistry>>,
    serialized_state_cache: Option<(usize, std::sync::Arc<str>)>,
}

impl Default for PgConnectionView {
    fn default() -> Self {
        Self {
            settings: Settings::new(),
            fe_settings: Settings::new(),
            in_tx_explicit: false,
            in_tx_implicit: false,
            tx_error: false,
            tx_start_settings: None,
            tx_start_fe_settings: None,
            tx_commit_settings: None,
            tx_commit_fe_settings: None,
            savepoints: Default::default(),
            portals: Default::default(),
            serialized_state_cache: None,
        }
    }
}

impl PgConnectionView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_tx(&self) -> bool {
        self.in_tx_explicit || self.in_tx_implicit
    }

    pub fn tx_error(&self) -> bool {
        self.tx_error
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn fe_settings(&self) -> &Settings {
        &self.fe_settings
    }

    fn ensure_tx_snapshot(&mut self) {
        if self.tx_start_settings.is_none() {
            self.tx_start_settings = Some(self.settings.clone());
            self.tx_start_fe_settings = Some(self.fe_settings.clone());
            self.tx_commit_settings = Some(self.settings.clone());
            self.tx_commit_fe_settings = Some(self.fe_settings.clone());
        }
    }

    pub fn start_implicit(&mut self) -> Result<()> {
        if self.in_tx_implicit {
            return Err(Error::transaction_error("transaction is in an error state"));
        }
        self.ensure_tx_snapshot();
        self.in_tx_implicit = true;
        Ok(())
    }

    /// If an explicit transaction is still open, just clears the implicit
    /// flag; otherwise commits (or rolls back, on `_tx_error`) the implicit
    /// transaction and clears all per-tx state.
    pub fn end_implicit(&mut self) {
        if !self.in_tx_implicit {
            return;
        }
        self.in_tx_implicit = false;
        if !self.in_tx_explicit {
            self.end_tx(!self.tx_error);
        }
    }

    fn end_tx(&mut self, commit: bool) {
        let start_settings = self.tx_start_settings.take();
        let start_fe_settings = self.tx_start_fe_settings.take();
        let commit_settings = self.tx_commit_settings.take();
        let commit_fe_settings = self.tx_commit_fe_settings.take();
        if commit {
            if let Some(s) = commit_settings {
                self.settings = s;
            }
            if let Some(s) = commit_fe_settings {
                self.fe_settings = s;
            }
        } else {
            if let Some(s) = start_settings {
                self.settings = s;
            }
            if let Some(s) = start_fe_settings {
                self.fe_settings = s;
            }
        }
        self.in_tx_explicit = false;
        self.in_tx_implicit = false;
        self.tx_error = false;
        self.savepoints.lock().unwrap().clear();
        self.portals.lock().unwrap().clear();
    }

    pub fn on_error(&mut self) {
        self.tx_error = true;
    }

    /// Dispatches on a completed `QueryUnit`'s transaction action, updating
    /// tx flags, settings, and the savepoint stack as specified.
    pub fn on_success(&mut self, tx_action: TxAction, savepoint_name: Option<&str>) -> Result<()> {
        if self.tx_error && !matches!(tx_action, TxAction::Rollback | TxAction::RollbackToSavepoint) {
            return Err(Error::transaction_error("transaction is in an error state"));
        }
        match tx_action {
            TxAction::None => {}
            TxAction::Start => {
                self.ensure_tx_snapshot();
                self.in_tx_explicit = true;
            }
            TxAction::Commit => self.end_tx(true),
            TxAction::Rollback => self.end_tx(false),
            TxAction::DeclareSavepoint => {
                let name = savepoint_name.ok_or_else(|| Error::internal("missing savepoint name"))?;
                self.ensure_tx_snapshot();
                let mut stack = self.savepoints.lock().unwrap();
                stack.declare(name, self.fe_settings.clone(), self.fe_settings.clone(), self.settings.clone());
            }
            TxAction::RollbackToSavepoint => {
                let name = savepoint_name.ok_or_else(|| Error::internal("missing savepoint name"))?;
                let mut stack = self.savepoints.lock().unwrap();
                match stack.rollback_to(name) {
                    Some((fe_settings, _fe_local, settings, dropped)) => {
                        drop(stack);
                        self.fe_settings = fe_settings;
                        self.settings = settings;
                        self.portals.lock().unwrap().close_all(&dropped);
                    }
                    None => {
                        self.tx_error = true;
                        return Err(Error::internal("no such savepoint"));
                    }
                }
            }
            TxAction::ReleaseSavepoint => {
                let name = savepoint_name.ok_or_else(|| Error::internal("missing savepoint name"))?;
                self.savepoints.lock().unwrap().release(name);
            }
        }
        Ok(())
    }

    pub fn create_portal(&mut self, name: &str, unit: QueryUnitGroup) -> Result<()> {
        if !self.in_tx() {
            return Err(Error::transaction_error("transaction is in an error state"));
        }
        self.portals.lock().unwrap().create(name, unit)?;
        if !name.is_empty() {
            self.savepoints.lock().unwrap().track_new_portal(name);
        }
        Ok(())
    }

    pub fn close_portal(&mut self, name: &str) -> Result<()> {
        self.portals.lock().unwrap().close(name)
    }

    pub fn portal_exists(&self, name: &str) -> bool {
        self.portals.lock().unwrap().contains(name)
    }

    pub fn portal_unit(&self, name: &str) -> Result<QueryUnitGroup> {
        self.portals.lock().unwrap().find(name).map(|p| p.unit.clone())
    }

    /// Applies a batch of `SET`/`RESET` style mutations. `None` keys/values
    /// mean RESET ALL. Outside a transaction `is_local` has no effect (there's
    /// nothing to revert to). Inside one: a non-local `SET` also advances the
    /// commit-time snapshot, so the change survives `COMMIT`; `SET LOCAL`
    /// only ever touches the live settings, so it reverts at `COMMIT` or
    /// `ROLLBACK` alike, per `on_success`/`end_tx`.
    pub fn set_vars(&mut self, vars: &HashMap<Option<String>, Option<String>>, frontend: bool, is_local: bool) {
        let apply = |base: &Settings| -> Settings {
            let mut mutation = base.mutate();
            if vars.len() == 1 && vars.contains_key(&None) {
                mutation = mutation.reset_all();
            } else {
                for (k, v) in vars {
                    if let Some(key) = k {
                        mutation = mutation.set(key, v.as_deref().map(std::sync::Arc::from));
                    }
                }
            }
            mutation.finish()
        };

        if frontend {
            self.fe_settings = apply(&self.fe_settings);
            if !is_local {
                if let Some(commit) = &self.tx_commit_fe_settings {
                    self.tx_commit_fe_settings = Some(apply(commit));
                }
            }
        } else {
            self.settings = apply(&self.settings);
            if !is_local {
                if let Some(commit) = &self.tx_commit_settings {
                    self.tx_commit_settings = Some(apply(commit));
                }
            }
        }
    }

    /// json-encodes backend settings as SQL `SET` syntax, cached by identity
    /// of the settings map so repeated calls between mutations are free.
    pub fn serialize_state(&mut self) -> Result<std::sync::Arc<str>> {
        if self.in_tx() {
            return Err(Error::transaction_error("transaction is in an error state"));
        }
        let identity = self.settings.identity();
        if let Some((cached_id, cached)) = &self.serialized_state_cache {
            if *cached_id == identity {
                return Ok(cached.clone());
            }
        }
        let mut out = String::new();
        for (k, v) in self.settings.iter() {
            match v {
                Some(val) => out.push_str(&format!("SET {} = {};", k, val)),
                None => out.push_str(&format!("RESET {};", k)),
            }
        }
        let out: std::sync::Arc<str> = out.into();
        self.serialized_state_cache = Some((identity, out.clone()));
        Ok(out)
    }
}
