//! Per-connection catalog of client-visible prepared statements, the
//! statement-level SQL `PREPARE`/`EXECUTE`/`DEALLOCATE` table, and the
//! wrapping relationship between them (§4.H).

use std::collections::{HashMap, HashSet};

use crate::riverfront::paramremap::ParamSchema;
use crate::riverfront::pgfrontend::actions::Action;
use crate::riverfront::pgview::Settings;
use crate::riverfront::pool::QueryUnit;
use crate::riverfront::{Error, Result};

/// A cached extended-query `Parse` action, plus the conditions under which
/// it remains valid. Invalidated when the `fe_settings` it was compiled
/// under change, or when a nested prepared statement it depends on gets a
/// new backend name.
#[derive(Clone, Debug)]
pub struct CachedParse {
    pub action: Action,
    pub fe_settings: Settings,
    pub backend_stmt_name: String,
    pub valid: bool,
    /// hidden-parameter schema the Bind argument list must be remapped
    /// against every time this cached Parse is replayed.
    pub param_schema: ParamSchema,
    pub unit: QueryUnit,
}

/// A client-visible prepared statement created via the extended-query `P`
/// (Parse) message.
#[derive(Clone, Debug)]
pub struct PreparedStmt {
    pub parse_action: Option<CachedParse>,
    /// normalized source text, used to detect whether a re-parse is needed
    /// for reasons other than settings drift
    pub source: String,
}

impl PreparedStmt {
    pub fn new(source: String) -> Self {
        PreparedStmt { parse_action: None, source }
    }

    pub fn is_valid(&self, current_fe_settings: &Settings) -> bool {
        match &self.parse_action {
            Some(cached) => cached.valid && cached.fe_settings.identity() == current_fe_settings.identity(),
            None => false,
        }
    }

    pub fn invalidate(&mut self) {
        if let Some(cached) = &mut self.parse_action {
            cached.valid = false;
        }
    }
}

/// Registry of everything §4.H names: extended-query prepared statements,
/// statement-level SQL `PREPARE`s, the user-facing-name to backend-name map
/// those produce, and the inner/outer wrapping graph between them.
#[derive(Default)]
pub struct PreparedStmtRegistry {
    prepared_stmts: HashMap<String, PreparedStmt>,
    sql_prepared_stmts: HashMap<String, QueryUnit>,
    sql_prepared_stmts_map: HashMap<String, String>,
    wrapping_prepared_stmts: HashMap<String, HashSet<String>>,
}

impl PreparedStmtRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- extended-query prepared statements (Parse/P) --

    pub fn add_parse(&mut self, name: &str, stmt: PreparedStmt) -> Result<()> {
        if !name.is_empty() && self.prepared_stmts.contains_key(name) {
            return Err(Error::duplicate_prepared_statement(name));
        }
        self.prepared_stmts.insert(name.to_string(), stmt);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&PreparedStmt> {
        self.prepared_stmts.get(name).ok_or_else(|| Error::invalid_sql_statement_name(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut PreparedStmt> {
        self.prepared_stmts.get_mut(name).ok_or_else(|| Error::invalid_sql_statement_name(name))
    }

    pub fn close_parse(&mut self, name: &str) {
        self.prepared_stmts.remove(name);
    }

    pub fn contains_parse(&self, name: &str) -> bool {
        self.prepared_stmts.contains_key(name)
    }

    // -- statement-level SQL PREPARE/EXECUTE/DEALLOCATE --

    /// Registers a statement-level `PREPARE name AS ...`, under both the
    /// user-visible name and the compiler-generated backend name.
    pub fn prepare_sql(&mut self, user_name: &str, backend_name: &str, unit: QueryUnit) -> Result<()> {
        if self.sql_prepared_stmts_map.contains_key(user_name) {
            return Err(Error::duplicate_prepared_statement(user_name));
        }
        self.sql_prepared_stmts.insert(backend_name.to_string(), unit);
        self.sql_prepared_stmts_map.insert(user_name.to_string(), backend_name.to_string());
        Ok(())
    }

    pub fn backend_name_for(&self, user_name: &str) -> Result<&str> {
        self.sql_prepared_stmts_map
            .get(user_name)
            .map(|s| s.as_str())
            .ok_or_else(|| Error::invalid_sql_statement_name(user_name))
    }

    pub fn sql_unit(&self, backend_name: &str) -> Option<&QueryUnit> {
        self.sql_prepared_stmts.get(backend_name)
    }

    /// DEALLOCATE of a statement-level PREPARE: removes it and invalidates
    /// every extended-query prepared statement that wraps (references) it.
    pub fn deallocate_sql(&mut self, user_name: &str) -> Result<()> {
        let backend_name = self
            .sql_prepared_stmts_map
            .remove(user_name)
            .ok_or_else(|| Error::invalid_sql_statement_name(user_name))?;
        self.sql_prepared_stmts.remove(&backend_name);
        if let Some(outers) = self.wrapping_prepared_stmts.remove(&backend_name) {
            for outer in outers {
                if let Some(stmt) = self.prepared_stmts.get_mut(&outer) {
                    stmt.invalidate();
                }
            }
        }
        Ok(())
    }

    // -- wrapping table: inner backend name -> set of outer statement names --

    pub fn track_wrapping(&mut self, inner_backend_name: &str, outer_name: &str) {
        self.wrapping_prepared_stmts
            .entry(inner_backend_name.to_string())
            .or_default()
            .insert(outer_name.to_string());
    }

    pub fn invalidate_wrapping(&mut self, inner_backend_name: &str) {
        if let Some(outers) = self.wrapping_prepared_stmts.get(inner_backend_name) {
            let outers: Vec<String> = outers.iter().cloned().collect();
            for outer in outers {
                if let Some(stmt) = self.prepared_stmts.get_mut(&outer) {
                    stmt.invalidate();
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.prepared_stmts.clear();
        self.sql_prepared_stmts.clear();
        self.sql_prepared_stmts_map.clear();
        self.wrapping_prepared_stmts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_parse_name_rejected() {
        let mut reg = PreparedStmtRegistry::new();
        reg.add_parse("s1", PreparedStmt::new("select 1".into())).unwrap();
        let err = reg.add_parse("s1", PreparedStmt::new("select 2".into())).unwrap_err();
        assert_eq!(err.client_kind(), crate::riverfront::common::ClientErrorKind::DuplicatePreparedStatement);
    }

    #[test]
    fn unknown_execute_is_invalid_sql_statement_name() {
        let reg = PreparedStmtRegistry::new();
        let err = reg.get("missing").unwrap_err();
        assert_eq!(err.client_kind(), crate::riverfront::common::ClientErrorKind::InvalidSqlStatementName);
    }

    #[test]
    fn deallocate_inner_invalidates_outer() {
        let mut reg = PreparedStmtRegistry::new();
        reg.track_wrapping("inner_be", "outer");
        let mut outer = PreparedStmt::new("select wrapped()".into());
        outer.parse_action = Some(CachedParse {
            action: Action::new(crate::riverfront::pgfrontend::actions::ActionKind::Sync),
            fe_settings: Settings::new(),
            backend_stmt_name: "outer_be".into(),
            valid: true,
            param_schema: ParamSchema::default(),
            unit: dummy_unit(),
        });
        reg.add_parse("outer", outer).unwrap();
        reg.sql_prepared_stmts_map.insert("inner".into(), "inner_be".into());
        reg.sql_prepared_stmts.insert("inner_be".into(), dummy_unit());
        reg.deallocate_sql("inner").unwrap();
        assert!(!reg.get("outer").unwrap().is_valid(&Settings::new()));
    }

    fn dummy_unit() -> QueryUnit {
        QueryUnit {
            sql: "select 1".into(),
            status_tag: "SELECT".into(),
            capabilities: Default::default(),
            tx_action: crate::riverfront::pool::TxAction::None,
            is_ddl: false,
            in_type_id: uuid::Uuid::nil(),
            out_type_id: uuid::Uuid::nil(),
            in_type_data: vec![],
            out_type_data: vec![],
            stmt_op: crate::riverfront::pool::StmtOp::None,
            config_op: crate::riverfront::pool::ConfigOp::None,
        }
    }
}
