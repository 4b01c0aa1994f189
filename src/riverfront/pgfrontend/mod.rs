//! The PostgreSQL wire frontend state machine (Component D): pre-auth
//! startup negotiation (SSLRequest/CancelRequest/GSSENCRequest/StartupMessage)
//! -> auth -> the simple/extended query main loop. Demultiplexed onto this
//! path by `demux::MuxConnection` once the first 4 bytes off the socket are
//! recognized as a PostgreSQL untagged startup frame.

pub mod actions;
mod cancel;

use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::riverfront::auth::{self, scram::ScramExchange, AuthenticatedUser};
use crate::riverfront::config::{conf, AuthMethod, EndpointSecurity, TlsMode};
use crate::riverfront::frontend::FrontendBase;
use crate::riverfront::paramremap::{remap_arguments, remap_parameters};
use crate::riverfront::pg::protocol::{
    AuthType, Message, MessageBuilder, MessageErrorBuilder, MessageParser, MessageReader, ServerParams, StartupParams, Tag,
    PROTOCOL_VERSION, SSL_ALLOWED, SSL_NOT_ALLOWED, SSL_REQUEST,
};
use crate::riverfront::pgfrontend::actions::{Action, ActionKind};
use crate::riverfront::pgfrontend::cancel::CancelRegistry;
use crate::riverfront::pgview::{PgConnectionView, Settings as ViewSettings};
use crate::riverfront::pool::{
    BackendConn, BackendPool, Capabilities, CompilerPool, ConfigOp, OutputFormat, QueryRequestInfo, QueryUnit, QueryUnitGroup, StmtOp, TxAction,
};
use crate::riverfront::preparedstmt::{CachedParse, PreparedStmt, PreparedStmtRegistry};
use crate::riverfront::worker::Worker;
use crate::riverfront::{Error, Result};

/// CancelRequest's special request code (carried where StartupMessage carries
/// `PROTOCOL_VERSION`). Not exported from `pg::protocol::tag` because it is
/// meaningful only at this one call site.
const CANCEL_REQUEST_CODE: i32 = 80877102;
/// GSSENCRequest's special request code, same positioning as `SSL_REQUEST`.
const GSSENC_REQUEST_CODE: i32 = 80877104;

/// Connection-level state for one PostgreSQL-wire client.
pub struct PgFrontend<P: CompilerPool, B: BackendPool> {
    base: Arc<FrontendBase>,
    compiler: Arc<P>,
    backend_pool: Arc<B>,
    scram_store: Arc<dyn auth::ScramVerifierStore>,
    jwt_store: Arc<dyn auth::JwtKeyStore>,
    database: String,
    user: String,
    view: PgConnectionView,
    prepared: PreparedStmtRegistry,
    /// backend key (pid, secret) handed out in BackendKeyData, used to look
    /// this connection up in the cancel registry.
    backend_key: (i32, i32),
}

impl<P: CompilerPool, B: BackendPool> PgFrontend<P, B> {
    pub fn new(
        base: Arc<FrontendBase>,
        compiler: Arc<P>,
        backend_pool: Arc<B>,
        scram_store: Arc<dyn auth::ScramVerifierStore>,
        jwt_store: Arc<dyn auth::JwtKeyStore>,
    ) -> Self {
        PgFrontend {
            base,
            compiler,
            backend_pool,
            scram_store,
            jwt_store,
            database: String::new(),
            user: String::new(),
            view: PgConnectionView::new(),
            prepared: PreparedStmtRegistry::new(),
            backend_key: (0, 0),
        }
    }

    /// Drives the whole connection lifetime. `leading` is whatever bytes the
    /// demultiplexer already consumed off the socket while sniffing the
    /// protocol (the first 4 length bytes of the untagged startup frame).
    pub async fn run(mut self, leading: Bytes) -> Result<()> {
        let mut parser = MessageParser::new_untagged_first();
        parser.bytes_mut().extend_from_slice(&leading);

        let startup = self.negotiate_startup(&mut parser).await?;
        let startup = match startup {
            Some(m) => m,
            None => return Ok(()), // CancelRequest handled, connection closes
        };

        let params = StartupParams::parse(&startup)?;
        self.database = params.get("database").unwrap_or("edgedb").to_string();
        self.user = params.get("user").unwrap_or("edgedb").to_string();

        let authenticated = self.authenticate(&mut parser, &self.user.clone()).await?;
        self.send_auth_ok(&authenticated, &params)?;
        self.base.flush().await?;

        let result = self.main_loop(&mut parser).await;
        cancel::registry().unregister(self.backend_key);
        result
    }

    async fn next_message(&self, parser: &mut MessageParser, report_idling: bool) -> Result<Message> {
        self.base.wait_for_message(parser, report_idling).await?;
        parser.next().expect("has_complete_message guaranteed a message")
    }

    /// Handles the pre-auth phase: a socket may send SSLRequest and/or
    /// GSSENCRequest ahead of the real StartupMessage, each its own untagged
    /// frame. Returns `None` if a CancelRequest was received and serviced
    /// (the connection should simply close after).
    async fn negotiate_startup(&mut self, parser: &mut MessageParser) -> Result<Option<Message>> {
        loop {
            let msg = self.next_message(parser, true).await?;
            let mut r = MessageReader::new_at(&msg, 4);
            let code = r.read_i32();
            match code {
                SSL_REQUEST => {
                    if self.offer_tls() {
                        self.base.write(Bytes::from_static(&[SSL_ALLOWED]))?;
                        self.base.flush().await?;
                        let config = conf().tls_config.clone().ok_or_else(|| Error::internal("tls_config missing"))?;
                        self.base.transport().upgrade(config, conf().client_tls).await?;
                        parser.reset_untagged();
                        parser.bytes_mut().clear();
                    } else {
                        self.base.write(Bytes::from_static(&[SSL_NOT_ALLOWED]))?;
                        self.base.flush().await?;
                        if conf().endpoint_security == EndpointSecurity::TlsRequired {
                            return Err(Error::access_error("TLS is required on this endpoint"));
                        }
                        parser.reset_untagged();
                    }
                }
                GSSENC_REQUEST_CODE => {
                    self.base.write(Bytes::from_static(&[SSL_NOT_ALLOWED]))?;
                    self.base.flush().await?;
                    parser.reset_untagged();
                }
                CANCEL_REQUEST_CODE => {
                    let pid = r.read_i32();
                    let secret = r.read_i32();
                    cancel::registry().trigger((pid, secret));
                    return Ok(None);
                }
                PROTOCOL_VERSION => {
                    if self.requires_tls() && !self.base.transport().is_tls() {
                        return Err(Error::access_error("TLS is required on this endpoint"));
                    }
                    return Ok(Some(msg));
                }
                other => return Err(Error::protocol_violation(format!("unsupported startup request code {}", other))),
            }
        }
    }

    fn offer_tls(&self) -> bool {
        self.base.transport().can_use_tls()
            && conf().tls_config.is_some()
            && !matches!(conf().client_tls, TlsMode::Disabled)
            && !self.base.transport().is_tls()
    }

    fn requires_tls(&self) -> bool {
        conf().endpoint_security == EndpointSecurity::TlsRequired
    }

    /// Runs the configured auth method's handshake, mirroring the binary
    /// frontend's `authenticate` but under PG wire tags.
    async fn authenticate(&self, parser: &mut MessageParser, user: &str) -> Result<AuthenticatedUser> {
        match conf().auth.default_method {
            AuthMethod::Trust => {
                self.send_auth_type(AuthType::Ok, &[])?;
                auth::authenticate_trust(user)
            }
            AuthMethod::Scram => self.authenticate_scram(parser, user).await,
            AuthMethod::Jwt => {
                self.send_auth_type(AuthType::ClearText, &[])?;
                self.base.flush().await?;
                let msg = self.next_message(parser, false).await?;
                if msg.tag() != Tag::PASSWORD_MESSAGE {
                    return Err(Error::protocol_violation("expected bearer token"));
                }
                let mut r = MessageReader::new(&msg);
                let token = r.read_str()?;
                let claims = auth::verify_bearer_token(self.jwt_store.as_ref(), token)?;
                Ok(AuthenticatedUser { user: claims.subject.unwrap_or_else(|| user.to_string()), scopes: claims.scopes })
            }
            AuthMethod::Mtls => self.authenticate_mtls(user),
        }
    }

    /// Binds the username to the CN of the client certificate rustls
    /// verified during the handshake; fails if the transport never upgraded
    /// to TLS or the client presented no certificate.
    fn authenticate_mtls(&self, user: &str) -> Result<AuthenticatedUser> {
        let certs = self.base.transport().peer_certificates().ok_or_else(Error::authentication_failed)?;
        let leaf = certs.first().ok_or_else(Error::authentication_failed)?;
        let cn = auth::username_from_peer_certificate(&leaf.0)?;
        let _ = user;
        Ok(AuthenticatedUser::unscoped(cn))
    }

    async fn authenticate_scram(&self, parser: &mut MessageParser, user: &str) -> Result<AuthenticatedUser> {
        self.send_auth_type(AuthType::SASL, b"SCRAM-SHA-256\0")?;
        self.base.flush().await?;

        let verifier = auth::get_verifier(self.scram_store.as_ref(), user, &conf().auth.mock_nonce_seed, conf().auth.scram_default_iterations);

        let msg = self.next_message(parser, false).await?;
        if msg.tag() != Tag::PASSWORD_MESSAGE {
            return Err(Error::protocol_violation("expected SASL initial response"));
        }
        let mut r = MessageReader::new(&msg);
        let _mechanism = r.read_str()?;
        let client_first_len = r.read_i32();
        let client_first_bytes = r.read_bytes(client_first_len.max(0) as u32)?;
        let client_first = std::str::from_utf8(client_first_bytes).map_err(Error::from)?;
        let exchange = ScramExchange::new(verifier, client_first)?;

        let mut b = MessageBuilder::new(Tag::AUTHENTICATION_OK);
        b.write_i32(AuthType::SASLContinue.as_i32());
        b.write_bytes(exchange.server_first_message().as_bytes());
        self.base.write(b.finish().into_bytes())?;
        self.base.flush().await?;

        let msg = self.next_message(parser, false).await?;
        if msg.tag() != Tag::PASSWORD_MESSAGE {
            return Err(Error::protocol_violation("expected SASL final response"));
        }
        let mut r = MessageReader::new(&msg);
        let client_final = std::str::from_utf8(r.read_to_end()).map_err(Error::from)?;
        let server_final = exchange.verify_client_final(client_final)?;
        if exchange.is_mock() {
            return Err(Error::authentication_failed());
        }

        let mut b = MessageBuilder::new(Tag::AUTHENTICATION_OK);
        b.write_i32(AuthType::SASLFinal.as_i32());
        b.write_bytes(server_final.as_bytes());
        self.base.write(b.finish().into_bytes())?;
        Ok(AuthenticatedUser::unscoped(user))
    }

    fn send_auth_type(&self, kind: AuthType, extra: &[u8]) -> Result<()> {
        let mut b = MessageBuilder::new(Tag::AUTHENTICATION_OK);
        b.write_i32(kind.as_i32());
        b.write_bytes(extra);
        self.base.write(b.finish().into_bytes())
    }

    /// Sends the final AuthenticationOk, ParameterStatus GUCs, BackendKeyData
    /// (registering the (pid, secret) pair for CancelRequest), then ReadyForQuery.
    fn send_auth_ok(&mut self, _user: &AuthenticatedUser, _params: &StartupParams) -> Result<()> {
        let mut b = MessageBuilder::new(Tag::AUTHENTICATION_OK);
        b.write_i32(AuthType::Ok.as_i32());
        self.base.write(b.finish().into_bytes())?;

        let mut params = ServerParams::default();
        params.add("server_version", "14.0 (riverfront)");
        params.add("client_encoding", "UTF8");
        params.add("server_encoding", "UTF8");
        params.add("DateStyle", "ISO, MDY");
        params.add("integer_datetimes", "on");
        params.add("standard_conforming_strings", "on");
        let mut ps = MessageBuilder::new(Tag::PARAMETER_STATUS);
        ps.write_params(&params);
        self.base.write(ps.finish().into_bytes())?;

        let worker = Worker::get();
        let pid = worker.rand32() as i32;
        let secret = worker.rand32() as i32;
        self.backend_key = (pid, secret);
        cancel::registry().register(self.backend_key);

        let mut key = MessageBuilder::new(Tag::BACKEND_KEY_DATA);
        key.write_i32(pid);
        key.write_i32(secret);
        self.base.write(key.finish().into_bytes())?;

        self.send_ready_for_query()
    }

    fn send_ready_for_query(&self) -> Result<()> {
        let status = if self.view.tx_error() {
            b'E'
        } else if self.view.in_tx() {
            b'T'
        } else {
            b'I'
        };
        let mut b = MessageBuilder::new(Tag::READY_FOR_QUERY);
        b.write_byte(status);
        self.base.write(b.finish().into_bytes())
    }

    fn fe_settings(&self) -> &ViewSettings {
        self.view.fe_settings()
    }

    /// Main request loop: simple query (`Q`) and the extended-query pipeline
    /// (`P`/`B`/`D`/`E`/`C`/`H`/`S`/`X`), with `ignore_till_sync` error
    /// recovery matching the wire protocol's error-during-batch contract.
    async fn main_loop(&mut self, parser: &mut MessageParser) -> Result<()> {
        let mut batch = ExtendedBatch::default();
        let mut ignore_till_sync = false;

        loop {
            let msg = self.next_message(parser, true).await?;
            let tag = msg.tag();

            if ignore_till_sync && tag != Tag::SYNC && tag != Tag::TERMINATE {
                continue;
            }

            let outcome = match tag {
                Tag::TERMINATE => return Ok(()),
                Tag::QUERY => self.handle_simple_query(&msg).await,
                Tag::PARSE => self.handle_parse(&msg, &mut batch).await,
                Tag::BIND => self.handle_bind(&msg, &mut batch).await,
                Tag::DESCRIBE => self.handle_describe(&msg, &mut batch),
                Tag::EXECUTE => self.handle_execute(&msg, &mut batch),
                Tag::CLOSE => self.handle_close(&msg, &mut batch),
                Tag::FLUSH => {
                    batch.actions.push(Action::new(ActionKind::Flush));
                    Ok(())
                }
                Tag::SYNC => {
                    let r = self.run_batch(&mut batch).await;
                    ignore_till_sync = false;
                    batch = ExtendedBatch::default();
                    self.send_ready_for_query()?;
                    self.base.flush().await?;
                    r
                }
                other => Err(Error::protocol_violation(format!("unexpected message tag {:?}", other))),
            };

            if let Err(e) = outcome {
                if e.severity() >= crate::riverfront::common::ErrorSeverity::Fatal {
                    return Err(e);
                }
                self.base.write(MessageErrorBuilder::from_error(&e).finish().into_bytes())?;
                if tag == Tag::SYNC || tag == Tag::QUERY {
                    // Sync/simple-query errors are already batch-terminal; no
                    // further suppression needed, ReadyForQuery already sent.
                } else {
                    ignore_till_sync = true;
                }
                self.base.flush().await?;
            }
        }
    }

    /// Compiles and runs a simple-query (`Q`) string: every statement it
    /// contains is bound/executed with the unnamed statement/portal inside
    /// one implicit-transaction-bracketed batch, then a `ReadyForQuery`.
    async fn handle_simple_query(&mut self, msg: &Message) -> Result<()> {
        let mut r = MessageReader::new(msg);
        let sql = r.read_str()?.to_string();
        if r.has_error() {
            return Err(Error::protocol_violation("truncated query message"));
        }

        let compiled = self.compile(sql, OutputFormat::Text, false).await?;
        if !Capabilities::is_allowed(compiled.group.capabilities(), Capabilities::ALL) {
            return Err(Error::disabled_capability("query requires a capability not permitted on this connection"));
        }

        let mut actions = Vec::with_capacity(compiled.group.units.len() * 2 + 1);
        let mut view = self.view.clone();
        let started_implicit = self.prepare_units_for_run(&compiled.group.units, &compiled.group.param_schema, &mut view, &mut actions)?;
        actions.push(Action::new(ActionKind::Sync));

        let result = self.run_action_list(&actions).await;
        if result.is_ok() {
            self.view = view;
        } else if self.view.in_tx() {
            self.view.on_error();
        }
        let _ = started_implicit;
        self.send_ready_for_query()?;
        result
    }

    /// Binds and executes every unit of a compiled group against the unnamed
    /// statement/portal, starting an implicit transaction first if needed.
    /// Applies each unit's `on_success` transaction effect to `view`
    /// optimistically (see the extended-query clone-and-preplay discipline
    /// documented on `ExtendedBatch`).
    fn prepare_units_for_run(
        &mut self,
        units: &[QueryUnit],
        schema: &crate::riverfront::paramremap::ParamSchema,
        view: &mut PgConnectionView,
        actions: &mut Vec<Action>,
    ) -> Result<bool> {
        let mut started_implicit = false;
        if !view.in_tx() {
            view.start_implicit()?;
            actions.push(Action::new(ActionKind::StartImplicitTx));
            started_implicit = true;
        }
        for unit in units {
            let unit = self.resolve_unit(unit)?;
            let oids = remap_parameters(&[], schema);
            actions.push(Action::new(ActionKind::Parse {
                stmt_name: String::new(),
                sql_text: unit.sql.clone(),
                param_type_oids: oids,
                fe_settings: view.fe_settings().clone(),
            }));
            let empty_args = remap_arguments(&[0, 0, 0, 0, 0, 0], schema, view.fe_settings())?;
            view.create_portal("", QueryUnitGroup { units: vec![unit.as_ref().clone()], param_schema: schema.clone() })?;
            actions.push(Action::new(ActionKind::Bind {
                portal: String::new(),
                stmt_name: String::new(),
                args: empty_args,
                query_unit: unit.as_ref().clone(),
            }));
            actions.push(Action::new(ActionKind::Execute { portal: String::new(), max_rows: 0 }));
            let savepoint_name = savepoint_name_from(&unit.sql);
            // ROLLBACK TO SAVEPOINT naming an unknown savepoint outside a
            // transaction is "warn and accept" for simple query, but an
            // error in the extended-query path (handle_execute) — see
            // DESIGN.md Open Questions.
            if unit.tx_action == TxAction::RollbackToSavepoint && !view.in_tx() {
                warn!(savepoint = ?savepoint_name, "ROLLBACK TO SAVEPOINT outside a transaction, ignoring");
            } else {
                view.on_success(unit.tx_action, savepoint_name.as_deref())?;
            }
            self.apply_stmt_op(&unit, view)?;
            apply_config_op(&unit.config_op, view);
            view.close_portal("")?;
        }
        if started_implicit {
            view.end_implicit();
        }
        Ok(started_implicit)
    }

    /// Resolves a `StmtOp::Execute` unit (statement-level SQL `EXECUTE name`)
    /// to the `QueryUnit` that was registered by the matching `PREPARE`.
    fn resolve_unit<'u>(&self, unit: &'u QueryUnit) -> Result<std::borrow::Cow<'u, QueryUnit>> {
        match &unit.stmt_op {
            StmtOp::Execute { user_name } => {
                let backend_name = self.prepared.backend_name_for(user_name)?.to_string();
                let resolved = self
                    .prepared
                    .sql_unit(&backend_name)
                    .cloned()
                    .ok_or_else(|| Error::invalid_sql_statement_name(user_name))?;
                Ok(std::borrow::Cow::Owned(resolved))
            }
            _ => Ok(std::borrow::Cow::Borrowed(unit)),
        }
    }

    /// Applies the statement-level PREPARE/DEALLOCATE bookkeeping a unit's
    /// `stmt_op` calls for. `EXECUTE` needs no bookkeeping of its own: the
    /// resolution already happened in `resolve_unit`.
    fn apply_stmt_op(&mut self, unit: &QueryUnit, view: &PgConnectionView) -> Result<()> {
        let _ = view;
        match &unit.stmt_op {
            StmtOp::None | StmtOp::Execute { .. } => Ok(()),
            StmtOp::Prepare { user_name, backend_name } => {
                self.prepared.prepare_sql(user_name, backend_name, unit.clone())
            }
            StmtOp::Deallocate { user_name } => self.prepared.deallocate_sql(user_name),
        }
    }

    async fn compile(&self, sql: String, output_format: OutputFormat, expect_one: bool) -> Result<crate::riverfront::pool::CompiledQuery> {
        let request = QueryRequestInfo {
            normalized_source: sql,
            protocol_major: 3,
            protocol_minor: 0,
            output_format,
            expect_one,
            implicit_limit: 0,
            inline_typeids: false,
            inline_typenames: false,
            inline_objectids: false,
            allow_capabilities: Capabilities::ALL,
        };
        self.compiler.compile(&self.database, request).await
    }

    /// Parse (`P`): compiles the statement text and stashes the resulting
    /// `Action::Parse` in the prepared-statement registry. Extended-query
    /// Parse does not touch the backend itself; the Parse action is replayed
    /// ahead of whichever Bind first references this name (prepared
    /// statement locality, since pooled backend connections have no
    /// affinity to this client and may never have seen this name before).
    async fn handle_parse(&mut self, msg: &Message, batch: &mut ExtendedBatch) -> Result<()> {
        let mut r = MessageReader::new(msg);
        let stmt_name = r.read_str()?.to_string();
        let sql = r.read_str()?.to_string();
        let n_param_types = r.read_i16();
        let mut param_oids = Vec::with_capacity(n_param_types.max(0) as usize);
        for _ in 0..n_param_types {
            param_oids.push(r.read_i32() as u32);
        }
        if r.has_error() {
            return Err(Error::protocol_violation("truncated parse message"));
        }

        let compiled = self.compile(sql.clone(), OutputFormat::Binary, false).await?;
        if compiled.group.is_multi_statement() {
            return Err(Error::protocol_violation("extended query Parse accepts at most one statement"));
        }
        let unit = compiled.group.units.into_iter().next().unwrap_or(QueryUnit {
            sql: sql.clone(),
            status_tag: String::new(),
            capabilities: Capabilities::NONE,
            tx_action: TxAction::None,
            is_ddl: false,
            in_type_id: uuid::Uuid::nil(),
            out_type_id: uuid::Uuid::nil(),
            in_type_data: Vec::new(),
            out_type_data: Vec::new(),
            stmt_op: StmtOp::None,
            config_op: ConfigOp::None,
        });
        if !Capabilities::is_allowed(unit.capabilities, Capabilities::ALL) {
            return Err(Error::disabled_capability("statement requires a capability not permitted on this connection"));
        }

        let remapped_oids = remap_parameters(&param_oids, &compiled.group.param_schema);
        let action = Action::new(ActionKind::Parse {
            stmt_name: stmt_name.clone(),
            sql_text: unit.sql.clone(),
            param_type_oids: remapped_oids,
            fe_settings: self.fe_settings().clone(),
        });

        self.prepared.add_parse(
            &stmt_name,
            PreparedStmt {
                parse_action: Some(CachedParse {
                    action: action.clone(),
                    fe_settings: self.fe_settings().clone(),
                    backend_stmt_name: stmt_name.clone(),
                    valid: true,
                    param_schema: compiled.group.param_schema.clone(),
                    unit,
                }),
                source: sql,
            },
        )?;

        batch.actions.push(action);
        batch.parsed_this_batch.insert(stmt_name);
        Ok(())
    }

    /// Bind (`B`): resolves the cached Parse, injecting a replay of it ahead
    /// of this Bind if its name hasn't already appeared in this batch
    /// (prepared statement locality), remaps hidden parameters onto the
    /// argument list, and pre-plays the resulting portal/transaction state
    /// onto `batch.view`.
    async fn handle_bind(&mut self, msg: &Message, batch: &mut ExtendedBatch) -> Result<()> {
        let mut r = MessageReader::new(msg);
        let portal = r.read_str()?.to_string();
        let stmt_name = r.read_str()?.to_string();
        let bind_args = r.read_to_end().to_vec();
        if r.has_error() {
            return Err(Error::protocol_violation("truncated bind message"));
        }

        let stmt = self.prepared.get(&stmt_name)?;
        let cached = stmt.parse_action.as_ref().ok_or_else(|| Error::invalid_sql_statement_name(&stmt_name))?;

        if !batch.parsed_this_batch.contains(&stmt_name) {
            batch.actions.push(cached.action.as_injected());
            batch.parsed_this_batch.insert(stmt_name.clone());
        }

        let view = batch.view_mut(&self.view);
        let args = remap_arguments(&bind_args, &cached.param_schema, view.fe_settings())?;
        let unit = cached.unit.clone();

        if !view.in_tx() {
            view.start_implicit()?;
            batch.actions.push(Action::new(ActionKind::StartImplicitTx));
            batch.started_implicit = true;
        }
        view.create_portal(&portal, QueryUnitGroup { units: vec![unit.clone()], param_schema: cached.param_schema.clone() })?;

        batch.actions.push(Action::new(ActionKind::Bind { portal, stmt_name, args, query_unit: unit }));
        Ok(())
    }

    fn handle_describe(&mut self, msg: &Message, batch: &mut ExtendedBatch) -> Result<()> {
        let mut r = MessageReader::new(msg);
        let kind = r.read_byte();
        let name = r.read_str()?.to_string();
        if r.has_error() {
            return Err(Error::protocol_violation("truncated describe message"));
        }
        match kind {
            b'S' => {
                self.prepared.get(&name)?;
                batch.actions.push(Action::new(ActionKind::DescribeStmt { stmt_name: name }));
            }
            b'P' => {
                let view = batch.view_mut(&self.view);
                if !view.portal_exists(&name) {
                    return Err(Error::invalid_cursor_name(&name));
                }
                batch.actions.push(Action::new(ActionKind::DescribePortal { portal: name }));
            }
            other => return Err(Error::protocol_violation(format!("unknown describe target '{}'", other as char))),
        }
        Ok(())
    }

    fn handle_execute(&mut self, msg: &Message, batch: &mut ExtendedBatch) -> Result<()> {
        let mut r = MessageReader::new(msg);
        let portal = r.read_str()?.to_string();
        let max_rows = r.read_i32();
        if r.has_error() {
            return Err(Error::protocol_violation("truncated execute message"));
        }

        let view = batch.view_mut(&self.view);
        let group = view.portal_unit(&portal)?;
        let unit = &group.units[0];
        let savepoint_name = savepoint_name_from(&unit.sql);
        let tx_action = unit.tx_action;
        let config_op = unit.config_op.clone();
        view.on_success(tx_action, savepoint_name.as_deref())?;
        apply_config_op(&config_op, view);

        batch.actions.push(Action::new(ActionKind::Execute { portal, max_rows }));
        Ok(())
    }

    fn handle_close(&mut self, msg: &Message, batch: &mut ExtendedBatch) -> Result<()> {
        let mut r = MessageReader::new(msg);
        let kind = r.read_byte();
        let name = r.read_str()?.to_string();
        if r.has_error() {
            return Err(Error::protocol_violation("truncated close message"));
        }
        match kind {
            b'S' => {
                self.prepared.close_parse(&name);
                batch.actions.push(Action::new(ActionKind::CloseStmt { stmt_name: name }));
            }
            b'P' => {
                let view = batch.view_mut(&self.view);
                let _ = view.close_portal(&name);
                batch.actions.push(Action::new(ActionKind::ClosePortal { portal: name }));
            }
            other => return Err(Error::protocol_violation(format!("unknown close target '{}'", other as char))),
        }
        Ok(())
    }

    /// Runs a fully collected extended-query batch at `Sync`: acquires one
    /// backend connection and executes every action atomically, committing
    /// the preplayed view only if the whole batch succeeds.
    async fn run_batch(&mut self, batch: &mut ExtendedBatch) -> Result<()> {
        if batch.actions.is_empty() {
            return Ok(());
        }
        batch.actions.push(Action::new(ActionKind::Sync));
        let result = self.run_action_list(&batch.actions).await;
        match (result, batch.view.take()) {
            (Ok(()), Some(view)) => {
                self.view = view;
                Ok(())
            }
            (Ok(()), None) => Ok(()),
            (Err(e), _) => {
                if self.view.in_tx() {
                    self.view.on_error();
                }
                Err(e)
            }
        }
    }

    /// Acquires a pooled backend connection, races `run_actions` against a
    /// cancel notification for this connection's backend key, and forwards
    /// every non-injected reply straight to the client.
    async fn run_action_list(&self, actions: &[Action]) -> Result<()> {
        let mut guard = self.backend_pool.acquire(&self.database).await?;
        let base = &self.base;
        let mut on_reply = |action: &Action, bytes: &[u8]| {
            if !action.injected {
                if let Err(e) = base.write(Bytes::copy_from_slice(bytes)) {
                    warn!(%e, "failed writing pg wire reply");
                }
            }
        };
        let notified = cancel::registry().notified(self.backend_key);
        tokio::select! {
            biased;
            _ = notified => {
                guard.mark_faulted();
                let _ = guard.cancel().await;
                Err(Error::new("canceling statement due to user request"))
            }
            r = guard.run_actions(actions, &mut on_reply) => r,
        }
    }
}

/// Dispatches a unit's `ConfigOp` (§4.E `SET`/`RESET`) against the view,
/// translating it into the `HashMap`-batch shape `PgConnectionView::set_vars`
/// expects.
fn apply_config_op(op: &ConfigOp, view: &mut PgConnectionView) {
    match op {
        ConfigOp::None => {}
        ConfigOp::Set { name, value, is_local, frontend } => {
            let mut vars = std::collections::HashMap::with_capacity(1);
            vars.insert(Some(name.clone()), value.clone());
            view.set_vars(&vars, *frontend, *is_local);
        }
        ConfigOp::ResetAll { is_local, frontend } => {
            let mut vars = std::collections::HashMap::with_capacity(1);
            vars.insert(None, None);
            view.set_vars(&vars, *frontend, *is_local);
        }
    }
}

/// Extracts the target of a `SAVEPOINT`/`RELEASE SAVEPOINT`/`ROLLBACK TO
/// SAVEPOINT` statement out of its SQL text, since `QueryUnit` carries a
/// `TxAction` but not the name it applies to.
fn savepoint_name_from(sql: &str) -> Option<String> {
    use std::sync::OnceLock;
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r#"(?i)SAVEPOINT\s+"?([A-Za-z_][A-Za-z0-9_]*)"?"#).unwrap());
    re.captures(sql).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}

/// Accumulates one extended-query pipeline between `Sync` messages:
///
/// Since `P`/`B`/`D`/`E` can arrive in any number before the terminating
/// `Sync`, and the pooled backend connection they eventually run against has
/// no affinity to this client, the frontend must not mutate its real
/// `PgConnectionView` as each message arrives. Instead it clones the view
/// once per batch and plays every speculative effect (portal creation,
/// transaction/savepoint transitions) onto the clone; `run_batch` commits the
/// clone back over `self.view` only once the backend has confirmed the whole
/// action list actually succeeded. `PreparedStmtRegistry` mutations (Parse,
/// Close) are session-scoped rather than transaction-scoped and are applied
/// immediately instead.
#[derive(Default)]
struct ExtendedBatch {
    actions: Vec<Action>,
    view: Option<PgConnectionView>,
    started_implicit: bool,
    /// Names of prepared statements already re-Parsed (or freshly Parsed)
    /// within this batch, so a second Bind of the same name doesn't inject
    /// a redundant replay.
    parsed_this_batch: std::collections::HashSet<String>,
}

impl ExtendedBatch {
    fn view_mut<'a>(&'a mut self, base: &PgConnectionView) -> &'a mut PgConnectionView {
        self.view.get_or_insert_with(|| base.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn savepoint_name_extraction() {
        assert_eq!(savepoint_name_from(r#"SAVEPOINT "sp1""#), Some("sp1".to_string()));
        assert_eq!(savepoint_name_from("ROLLBACK TO SAVEPOINT sp1"), Some("sp1".to_string()));
        assert_eq!(savepoint_name_from("RELEASE SAVEPOINT sp1"), Some("sp1".to_string()));
        assert_eq!(savepoint_name_from("SELECT 1"), None);
    }
}
