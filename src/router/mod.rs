//! Event Router (C5): the wire contract. Parses inbound commands, checks
//! `connection.sessionId` (I4), enforces per-event permissions, applies
//! mutations via the Session State Engine, and fans out to session peers.
//!
//! Handlers never suspend while holding a session lock: mutation methods on
//! [`Session`] acquire and release their own lock internally, and the only
//! suspension points here are the spawned execution call (C7) and the
//! eventual socket write performed by the gateway, not this module.

pub mod events;

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::admission::AdmissionController;
use crate::connection::{ConnectionState, JoinState};
use crate::error::{HubError, HubResult};
use crate::execution::ExecutionDispatcher;
use crate::metrics::MetricsTicker;
use crate::model::{ChatMessageKind, EventTarget, PermissionVector, ProjectMode, ServerEvent, Session};
use crate::registry::SessionRegistry;

use events::ClientCommand;

/// What the gateway should do after a command is handled: send zero or
/// more payloads directly to the sender's socket, and optionally
/// (un)subscribe the connection to the session's broadcast bus.
#[derive(Default)]
pub struct RouterOutcome {
    pub direct: Vec<Value>,
    pub bound_session: Option<Arc<Session>>,
    pub unbound: bool,
}

impl RouterOutcome {
    fn direct_only(payload: Value) -> Self {
        Self {
            direct: vec![payload],
            ..Default::default()
        }
    }

    fn err(error: &HubError) -> Self {
        Self::direct_only(events::error_event(error.wire_event(), error.code(), &error.to_string()))
    }
}

pub struct EventRouter {
    registry: Arc<SessionRegistry>,
    admission: Arc<AdmissionController>,
    execution: Arc<ExecutionDispatcher>,
    metrics: Arc<MetricsTicker>,
}

impl EventRouter {
    pub fn new(
        registry: Arc<SessionRegistry>,
        admission: Arc<AdmissionController>,
        execution: Arc<ExecutionDispatcher>,
        metrics: Arc<MetricsTicker>,
    ) -> Self {
        Self {
            registry,
            admission,
            execution,
            metrics,
        }
    }

    /// Parse and dispatch one raw inbound frame.
    pub fn handle_raw(&self, connection: &Arc<ConnectionState>, raw: &str) -> RouterOutcome {
        let cmd: ClientCommand = match serde_json::from_str(raw) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "ignoring malformed event");
                return RouterOutcome::direct_only(events::error_event(
                    "error",
                    "invalid_payload",
                    &format!("malformed event: {e}"),
                ));
            }
        };
        self.handle(connection, cmd)
    }

    pub fn handle(&self, connection: &Arc<ConnectionState>, cmd: ClientCommand) -> RouterOutcome {
        match cmd {
            ClientCommand::JoinSession { invite_key, session_id } => {
                self.handle_join(connection, invite_key, session_id)
            }
            ClientCommand::LeaveSession => self.handle_leave(connection),
            other => {
                let Some(session_id) = connection.session_id() else {
                    return RouterOutcome::err(&HubError::AccessDenied);
                };
                let Some(session) = self.registry.get(&session_id) else {
                    return RouterOutcome::direct_only(events::session_error("session_deleted"));
                };
                self.dispatch_bound(connection, &session, other)
            }
        }
    }

    /// Implicit leave performed by the gateway on transport close.
    pub fn handle_disconnect(&self, connection: &Arc<ConnectionState>) {
        if connection.session_id().is_some() {
            let _ = self.handle_leave(connection);
        }
    }

    fn handle_join(
        &self,
        connection: &Arc<ConnectionState>,
        invite_key: Option<String>,
        session_id: Option<String>,
    ) -> RouterOutcome {
        if connection.state() != JoinState::Unbound {
            return RouterOutcome::err(&HubError::InvalidPayload(
                "connection is already bound to a session".to_owned(),
            ));
        }

        // `join_session` accepts either an invite key (first-time join) or a
        // bare session id (rejoin within the GC grace window, §4.5 scenario
        // 5); the invite key takes priority when a client sends both.
        let joined = match (invite_key, session_id) {
            (Some(invite_key), _) => self.admission.join_by_invite_key(&invite_key, &connection.principal),
            (None, Some(session_id)) => self.admission.join_by_session_id(&session_id, &connection.principal),
            (None, None) => return RouterOutcome::err(&HubError::InvalidInvite),
        };
        let joined = match joined {
            Ok(j) => j,
            Err(e) => return RouterOutcome::err(&e),
        };

        connection.session_id.lock().replace(joined.session.id.clone());
        *connection.join_state.lock() = JoinState::Bound;

        let member_count = joined.session.member_count();

        if joined.newly_joined {
            joined.session.broadcast(ServerEvent {
                to: EventTarget::Peers(connection.connection_id.clone()),
                payload: events::user_joined_session(&connection.principal.user_id, &connection.principal.display_name),
            });
            joined.session.broadcast(ServerEvent {
                to: EventTarget::Peers(connection.connection_id.clone()),
                payload: events::session_update(member_count),
            });
        }

        let files_snapshot = {
            let inner = joined.session.inner.lock();
            serde_json::to_value(&inner.files).unwrap_or(Value::Array(vec![]))
        };
        let code_snapshot = joined.session.inner.lock().code_buffer.clone();

        RouterOutcome {
            direct: vec![
                events::session_joined(&joined.session.id, member_count, &joined.permissions),
                events::code_update(&code_snapshot),
                events::session_files_state(&files_snapshot),
            ],
            bound_session: Some(joined.session),
            unbound: false,
        }
    }

    fn handle_leave(&self, connection: &Arc<ConnectionState>) -> RouterOutcome {
        let Some(session_id) = connection.session_id() else {
            return RouterOutcome::default();
        };
        let Some(session) = self.registry.get(&session_id) else {
            return RouterOutcome::default();
        };

        let user_fully_left = self
            .admission
            .remove_member(&session, &connection.principal.user_id);
        self.metrics.unsubscribe(&session, &connection.connection_id);
        let member_count = session.member_count();

        connection.session_id.lock().take();
        *connection.join_state.lock() = JoinState::Unbound;

        // A principal holding a second open connection to this session (a
        // reconnect, another tab) is still a member; peers only need to
        // hear about this once the last of their connections drops (I2).
        if user_fully_left {
            session.broadcast(ServerEvent {
                to: EventTarget::Peers(connection.connection_id.clone()),
                payload: events::user_left_session(&connection.principal.user_id),
            });
            session.broadcast(ServerEvent {
                to: EventTarget::Peers(connection.connection_id.clone()),
                payload: events::session_update(member_count),
            });
        }

        RouterOutcome {
            direct: vec![events::session_left()],
            bound_session: None,
            unbound: true,
        }
    }

    fn dispatch_bound(
        &self,
        connection: &Arc<ConnectionState>,
        session: &Arc<Session>,
        cmd: ClientCommand,
    ) -> RouterOutcome {
        let user_id = connection.principal.user_id.clone();
        let conn_id = connection.connection_id.clone();

        let result = match cmd {
            ClientCommand::CodeChange { code } => require(session, &user_id, |p| p.can_edit_files)
                .and_then(|_| session.apply_code_change(&user_id, code))
                .map(|code| {
                    session.broadcast(ServerEvent {
                        to: EventTarget::Peers(conn_id.clone()),
                        payload: events::code_update(&code),
                    });
                }),

            ClientCommand::RealtimeCodeChange { file_path, content } => {
                require(session, &user_id, |p| p.can_edit_files).and_then(|_| {
                    session
                        .apply_realtime_code_change(&user_id, &file_path, content.clone())
                        .map(|_| {
                            session.broadcast(ServerEvent {
                                to: EventTarget::Peers(conn_id.clone()),
                                payload: events::realtime_code_update(&file_path, &content, &user_id),
                            });
                        })
                })
            }

            ClientCommand::FileOperation { action, path, data } => {
                require(session, &user_id, |p| p.can_edit_files).and_then(|_| {
                    session.apply_file_operation(&user_id, &action, &path, data.clone()).map(|_| {
                        session.broadcast(ServerEvent {
                            to: EventTarget::Peers(conn_id.clone()),
                            payload: events::file_operation_echo(&action, &path, &data),
                        });
                    })
                })
            }

            ClientCommand::CreateFile { name, content } => {
                require(session, &user_id, |p| p.can_create_files).and_then(|_| {
                    session.create_file(&user_id, &name, content).map(|path| {
                        session.broadcast(ServerEvent {
                            to: EventTarget::Room,
                            payload: events::file_created(&path),
                        });
                    })
                })
            }

            ClientCommand::CreateFolder { name } => {
                require(session, &user_id, |p| p.can_create_folders).and_then(|_| {
                    session.create_folder(&user_id, &name).map(|path| {
                        session.broadcast(ServerEvent {
                            to: EventTarget::Room,
                            payload: events::folder_created(&path),
                        });
                    })
                })
            }

            ClientCommand::CursorUpdate { file_path, position, selection, color } => {
                require(session, &user_id, |p| p.can_view_files).map(|_| {
                    session.broadcast(ServerEvent {
                        to: EventTarget::Peers(conn_id.clone()),
                        payload: events::cursor_update(&file_path, &position, &selection, &color, &user_id),
                    });
                })
            }

            ClientCommand::FileActivityUpdate { file_path } => {
                require(session, &user_id, |p| p.can_view_files).map(|_| {
                    session.set_current_file(&user_id, file_path.clone());
                    session.broadcast(ServerEvent {
                        to: EventTarget::Peers(conn_id.clone()),
                        payload: events::file_activity_update(&file_path, &user_id),
                    });
                })
            }

            ClientCommand::ChatMessage { content, kind } => {
                require(session, &user_id, |p| p.can_chat).and_then(|_| {
                    let kind = match kind.as_deref() {
                        Some("system") => ChatMessageKind::System,
                        _ => ChatMessageKind::Text,
                    };
                    session
                        .append_chat(&user_id, &connection.principal.display_name, content, kind)
                        .map(|message| {
                            session.broadcast(ServerEvent {
                                to: EventTarget::Room,
                                payload: events::chat_message_event(&message),
                            });
                        })
                })
            }

            ClientCommand::ExecuteCode { code, language, input } => {
                require(session, &user_id, |p| p.can_execute).map(|_| {
                    session.broadcast(ServerEvent {
                        to: EventTarget::Room,
                        payload: events::execution_started(),
                    });
                    self.spawn_execution(session.clone(), language, code, input);
                })
            }

            ClientCommand::UpdateUserPermissions { user_id: target, permissions } => {
                serde_json::from_value::<PermissionVector>(permissions)
                    .map_err(|e| HubError::InvalidPayload(e.to_string()))
                    .and_then(|perms| {
                        session.update_permissions(&user_id, &target, perms).map(|_| {
                            session.broadcast(ServerEvent {
                                to: EventTarget::Room,
                                payload: events::permissions_updated(&target, &perms),
                            });
                        })
                    })
            }

            ClientCommand::ProjectShareInit { data } => {
                session.set_project(&user_id, ProjectMode::Share, None, data.clone()).map(|_| {
                    session.broadcast(ServerEvent {
                        to: EventTarget::Room,
                        payload: events::project_event("project_share_init", &data),
                    });
                })
            }

            ClientCommand::ProjectCreateInit { template, data } => {
                session.set_project(&user_id, ProjectMode::Create, template, data.clone()).map(|_| {
                    session.broadcast(ServerEvent {
                        to: EventTarget::Room,
                        payload: events::project_event("project_create_init", &data),
                    });
                })
            }

            ClientCommand::AccessRightsUpdate { user_id: target, access_level } => session
                .access_rights_update(&user_id, &target, &access_level)
                .map(|perms| {
                    session.broadcast(ServerEvent {
                        to: EventTarget::Room,
                        payload: events::access_rights_update_event(&target, &perms),
                    });
                }),

            ClientCommand::GetSessionUsers => {
                return RouterOutcome::direct_only(self.session_users_snapshot(session));
            }
            ClientCommand::GetSessionInfo => {
                return RouterOutcome::direct_only(self.session_info_snapshot(session));
            }
            ClientCommand::GetSessionFiles => {
                let inner = session.inner.lock();
                let files = serde_json::to_value(&inner.files).unwrap_or(Value::Array(vec![]));
                return RouterOutcome::direct_only(events::session_files_state(&files));
            }
            ClientCommand::StartPerformanceMonitoring => {
                self.metrics.subscribe(session.clone(), conn_id.clone());
                return RouterOutcome::direct_only(events::monitoring_started());
            }

            ClientCommand::JoinSession { .. } | ClientCommand::LeaveSession => unreachable!(),
        };

        match result {
            Ok(()) => RouterOutcome::default(),
            Err(e) => RouterOutcome::err(&e),
        }
    }

    fn spawn_execution(&self, session: Arc<Session>, language: String, code: String, input: Option<String>) {
        let execution = self.execution.clone();
        tokio::spawn(async move {
            let payload = match execution.execute(&language, &code, input.as_deref()).await {
                Ok(result) => serde_json::to_value(result).unwrap_or(Value::Null),
                Err(e) => crate::router::events::error_event("execution_error", e.code(), &e.to_string()),
            };
            session.broadcast(ServerEvent {
                to: EventTarget::Room,
                payload,
            });
        });
    }

    fn session_users_snapshot(&self, session: &Session) -> Value {
        let inner = session.inner.lock();
        let users: Vec<Value> = inner
            .members
            .iter()
            .map(|uid| {
                let presence = inner.presence.get(uid);
                serde_json::json!({
                    "userId": uid,
                    "permissions": inner.permissions.get(uid).copied().unwrap_or_default(),
                    "displayName": presence.map(|p| p.display_name.as_str()).unwrap_or(uid),
                    "role": presence.map(|p| p.role),
                    "currentFile": presence.and_then(|p| p.current_file.clone()),
                    "connections": presence.map(|p| p.connections).unwrap_or(0),
                })
            })
            .collect();
        serde_json::json!({ "type": "session_users", "users": users })
    }

    fn session_info_snapshot(&self, session: &Session) -> Value {
        serde_json::json!({
            "type": "session_info",
            "id": session.id,
            "name": session.name,
            "creatorId": session.creator_id,
            "createdAt": session.created_at,
            "userCount": session.member_count(),
            "settings": {
                "maxUsers": session.settings.max_users,
                "allowGuests": session.settings.allow_guests,
            },
        })
    }
}

fn require(session: &Session, user_id: &str, check: impl Fn(&PermissionVector) -> bool) -> HubResult<()> {
    let permissions = session.permission_of(user_id);
    if check(&permissions) {
        Ok(())
    } else {
        Err(HubError::AccessDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionController;
    use crate::config::AppConfig;
    use crate::execution::ExecutionDispatcher;
    use crate::metrics::MetricsTicker;
    use crate::model::{PrincipalOrigin, Role};
    use crate::connection::ConnectionManager;

    fn router() -> (EventRouter, Arc<AdmissionController>, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        let admission = Arc::new(AdmissionController::new(registry.clone(), AppConfig::default()));
        let execution = Arc::new(ExecutionDispatcher::new(AppConfig::default()));
        let metrics = Arc::new(MetricsTicker::new());
        (
            EventRouter::new(registry.clone(), admission.clone(), execution, metrics),
            admission,
            registry,
        )
    }

    fn principal(id: &str) -> crate::model::Principal {
        crate::model::Principal {
            user_id: id.to_owned(),
            email: format!("{id}@example.com"),
            display_name: id.to_owned(),
            role: Role::User,
            avatar: None,
            origin: PrincipalOrigin::Verified,
        }
    }

    fn connected(conn_mgr: &ConnectionManager, id: &str) -> Arc<ConnectionState> {
        conn_mgr.register(format!("conn-{id}"), principal(id), true)
    }

    #[test]
    fn join_then_code_change_requires_edit_permission() {
        let (router, admission, _registry) = router();
        let conn_mgr = ConnectionManager::new(crate::connection::ConnectionRateLimiter::new(30, 10));

        let alice = principal("alice");
        let created = admission.create_session(&alice, None, None, None);

        let bob_conn = connected(&conn_mgr, "bob");
        let outcome = router.handle(
            &bob_conn,
            ClientCommand::JoinSession {
                invite_key: Some(created.invite_key.clone()),
                session_id: None,
            },
        );
        assert!(outcome.bound_session.is_some());
        assert_eq!(bob_conn.state(), JoinState::Bound);

        // Default member permissions include can_edit_files = true.
        let outcome = router.handle(&bob_conn, ClientCommand::CodeChange { code: "x".to_owned() });
        assert!(outcome.direct.is_empty());
    }

    #[test]
    fn event_without_bound_session_is_access_denied() {
        let (router, _admission, _registry) = router();
        let conn_mgr = ConnectionManager::new(crate::connection::ConnectionRateLimiter::new(30, 10));
        let conn = connected(&conn_mgr, "alice");

        let outcome = router.handle(&conn, ClientCommand::CodeChange { code: "x".to_owned() });
        assert_eq!(outcome.direct.len(), 1);
        assert_eq!(outcome.direct[0]["error"], "access_denied");
    }

    #[test]
    fn permission_demotion_blocks_edit_but_not_chat() {
        let (router, admission, _registry) = router();
        let conn_mgr = ConnectionManager::new(crate::connection::ConnectionRateLimiter::new(30, 10));

        let alice = principal("alice");
        let created = admission.create_session(&alice, None, None, None);
        let alice_conn = connected(&conn_mgr, "alice");
        router.handle(
            &alice_conn,
            ClientCommand::JoinSession {
                invite_key: Some(created.invite_key.clone()),
                session_id: None,
            },
        );

        let bob_conn = connected(&conn_mgr, "bob");
        router.handle(
            &bob_conn,
            ClientCommand::JoinSession {
                invite_key: Some(created.invite_key.clone()),
                session_id: None,
            },
        );

        let mut demoted = PermissionVector::default();
        demoted.can_chat = true;
        router.handle(
            &alice_conn,
            ClientCommand::UpdateUserPermissions {
                user_id: "bob".to_owned(),
                permissions: serde_json::to_value(demoted).unwrap(),
            },
        );

        let outcome = router.handle(&bob_conn, ClientCommand::CodeChange { code: "x".to_owned() });
        assert_eq!(outcome.direct[0]["error"], "access_denied");

        let outcome = router.handle(
            &bob_conn,
            ClientCommand::ChatMessage { content: "hi".to_owned(), kind: None },
        );
        assert!(outcome.direct.is_empty());
    }

    #[test]
    fn session_users_reports_presence_and_tracks_file_activity() {
        let (router, admission, _registry) = router();
        let conn_mgr = ConnectionManager::new(crate::connection::ConnectionRateLimiter::new(30, 10));

        let alice = principal("alice");
        let created = admission.create_session(&alice, None, None, None);
        let alice_conn = connected(&conn_mgr, "alice");
        router.handle(
            &alice_conn,
            ClientCommand::JoinSession {
                invite_key: Some(created.invite_key.clone()),
                session_id: None,
            },
        );

        router.handle(
            &alice_conn,
            ClientCommand::FileActivityUpdate { file_path: "s1/main.rs".to_owned() },
        );

        let outcome = router.handle(&alice_conn, ClientCommand::GetSessionUsers);
        let users = outcome.direct[0]["users"].as_array().unwrap();
        let alice_entry = users.iter().find(|u| u["userId"] == "alice").unwrap();
        assert_eq!(alice_entry["displayName"], "alice");
        assert_eq!(alice_entry["currentFile"], "s1/main.rs");
        assert_eq!(alice_entry["connections"], 1);
    }

    #[test]
    fn leave_from_one_of_two_connections_does_not_notify_peers() {
        let (router, admission, _registry) = router();
        let conn_mgr = ConnectionManager::new(crate::connection::ConnectionRateLimiter::new(30, 10));

        let alice = principal("alice");
        let created = admission.create_session(&alice, None, None, None);

        let bob_conn = connected(&conn_mgr, "bob");
        router.handle(
            &bob_conn,
            ClientCommand::JoinSession {
                invite_key: Some(created.invite_key.clone()),
                session_id: None,
            },
        );

        // Bob opens a second connection (another tab) to the same session.
        let bob_conn_2 = connected(&conn_mgr, "bob");
        router.handle(
            &bob_conn_2,
            ClientCommand::JoinSession {
                invite_key: Some(created.invite_key.clone()),
                session_id: None,
            },
        );

        let mut alice_rx = created.session.bus.subscribe();

        // Closing the first tab should not evict bob from membership, so
        // alice sees no user_left_session/session_update traffic.
        router.handle(&bob_conn, ClientCommand::LeaveSession);
        assert_eq!(created.session.member_count(), 2);
        assert!(alice_rx.try_recv().is_err(), "peers should not be notified while bob's other tab is still joined");

        // Closing the last tab does evict bob and does notify peers.
        router.handle(&bob_conn_2, ClientCommand::LeaveSession);
        assert_eq!(created.session.member_count(), 1);
        assert!(alice_rx.try_recv().is_ok(), "peers should be notified once bob's last connection drops");
    }

    #[test]
    fn rejoin_by_session_id_regains_bound_state_without_invite_key() {
        let (router, admission, _registry) = router();
        let conn_mgr = ConnectionManager::new(crate::connection::ConnectionRateLimiter::new(30, 10));

        let alice = principal("alice");
        let created = admission.create_session(&alice, None, None, None);

        let alice_conn = connected(&conn_mgr, "alice");
        router.handle(
            &alice_conn,
            ClientCommand::JoinSession {
                invite_key: Some(created.invite_key.clone()),
                session_id: None,
            },
        );
        router.handle(&alice_conn, ClientCommand::LeaveSession);
        assert_eq!(created.session.member_count(), 0);

        // Alice reconnects inside the GC grace window, presenting only the
        // session id she already knows (no invite key).
        let alice_conn_2 = connected(&conn_mgr, "alice");
        let outcome = router.handle(
            &alice_conn_2,
            ClientCommand::JoinSession {
                invite_key: None,
                session_id: Some(created.session.id.clone()),
            },
        );
        assert!(outcome.bound_session.is_some());
        assert_eq!(alice_conn_2.state(), JoinState::Bound);
        assert_eq!(created.session.member_count(), 1);
        assert_eq!(created.session.creator_id, "alice");
    }

    #[test]
    fn join_with_unknown_session_id_and_no_invite_key_is_not_found() {
        let (router, _admission, _registry) = router();
        let conn_mgr = ConnectionManager::new(crate::connection::ConnectionRateLimiter::new(30, 10));
        let conn = connected(&conn_mgr, "alice");

        let outcome = router.handle(
            &conn,
            ClientCommand::JoinSession {
                invite_key: None,
                session_id: Some("nope".to_owned()),
            },
        );
        assert_eq!(outcome.direct[0]["error"], "not_found");
    }

    #[tokio::test]
    async fn leave_session_unsubscribes_from_metrics_ticker() {
        let conn_mgr = ConnectionManager::new(crate::connection::ConnectionRateLimiter::new(30, 10));
        let metrics = Arc::new(MetricsTicker::new());
        let registry = Arc::new(SessionRegistry::new());
        let admission = Arc::new(AdmissionController::new(registry.clone(), AppConfig::default()));
        let execution = Arc::new(ExecutionDispatcher::new(AppConfig::default()));
        let router = EventRouter::new(registry, admission.clone(), execution, metrics.clone());

        let alice = principal("alice");
        let created = admission.create_session(&alice, None, None, None);
        let alice_conn = connected(&conn_mgr, "alice");
        router.handle(
            &alice_conn,
            ClientCommand::JoinSession {
                invite_key: Some(created.invite_key.clone()),
                session_id: None,
            },
        );
        router.handle(&alice_conn, ClientCommand::StartPerformanceMonitoring);

        router.handle(&alice_conn, ClientCommand::LeaveSession);

        let mut rx = created.session.bus.subscribe();
        metrics.tick();
        assert!(rx.try_recv().is_err(), "no subscriber should remain after leave");
    }
}
