//! Admission Controller (C3): session creation, invite-key issuance and
//! rotation, member admission/eviction, and garbage collection.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::AppConfig;
use crate::error::{HubError, HubResult};
use crate::model::{PermissionVector, PresenceInfo, Principal, Session, SessionSettings};
use crate::registry::{generate_session_id, SessionRegistry};

/// Result of a successful `create_session` call.
pub struct CreatedSession {
    pub session: Arc<Session>,
    pub invite_key: String,
}

/// Result of a successful `join_by_invite_key` call.
pub struct JoinedSession {
    pub session: Arc<Session>,
    pub permissions: PermissionVector,
    /// `false` when the join was a no-op because the principal was already
    /// a member (idempotent success, per §4.3).
    pub newly_joined: bool,
}

pub struct AdmissionController {
    registry: Arc<SessionRegistry>,
    config: AppConfig,
}

impl AdmissionController {
    pub fn new(registry: Arc<SessionRegistry>, config: AppConfig) -> Self {
        Self { registry, config }
    }

    /// Create a session and auto-join its creator, materializing the
    /// creator's permission row before returning (per §4.3).
    pub fn create_session(
        &self,
        creator: &Principal,
        name: Option<String>,
        max_users: Option<usize>,
        allow_guests: Option<bool>,
    ) -> CreatedSession {
        let settings = SessionSettings::new(
            max_users.unwrap_or(self.config.session.max_users_default),
            allow_guests.unwrap_or(self.config.session.allow_guests_default),
            self.config.session.max_code_change_bytes,
            self.config.session.max_chat_log_len,
        );

        let session_id = generate_session_id();
        let session = Arc::new(Session::new(
            session_id,
            name.unwrap_or_else(|| "untitled session".to_owned()),
            creator.user_id.clone(),
            settings,
        ));

        // Pseudo-join: materialize the creator's permission row and
        // membership before the call returns, without counting a live
        // connection — no realtime connection exists yet at this point, and
        // crediting one here would leave a phantom count behind once the
        // creator's real connection later joins and disconnects, so the
        // session would never drain to empty for GC (§4.3).
        {
            let mut inner = session.inner.lock();
            inner.members.insert(creator.user_id.clone());
            inner
                .permissions
                .insert(creator.user_id.clone(), PermissionVector::creator());
            inner.presence.insert(
                creator.user_id.clone(),
                PresenceInfo {
                    display_name: creator.display_name.clone(),
                    role: creator.role,
                    current_file: None,
                    connections: 0,
                },
            );
        }

        let invite_key = self.registry.insert(session.clone());
        info!(session_id = %session.id, creator = %creator.user_id, "session created");

        CreatedSession { session, invite_key }
    }

    /// Admit `principal` into the session named by `invite_key`.
    pub fn join_by_invite_key(
        &self,
        invite_key: &str,
        principal: &Principal,
    ) -> HubResult<JoinedSession> {
        let session = self
            .registry
            .get_by_invite_key(invite_key)
            .ok_or(HubError::InvalidInvite)?;
        self.admit(session, principal)
    }

    /// Admit `principal` into the session named by `session_id` directly,
    /// without an invite key — the rejoin path for a client (typically the
    /// creator) that already knows the session id and reconnects inside the
    /// GC grace window (§4.5 scenario 5). Admission rules are identical to
    /// `join_by_invite_key`; only session resolution differs.
    pub fn join_by_session_id(&self, session_id: &str, principal: &Principal) -> HubResult<JoinedSession> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| HubError::NotFound(session_id.to_owned()))?;
        self.admit(session, principal)
    }

    fn admit(&self, session: Arc<Session>, principal: &Principal) -> HubResult<JoinedSession> {
        if principal.is_guest() && !session.settings.allow_guests {
            return Err(HubError::GuestDenied);
        }

        let mut inner = session.inner.lock();

        if inner.members.contains(&principal.user_id) {
            let permissions = inner
                .permissions
                .get(&principal.user_id)
                .copied()
                .unwrap_or_default();
            if let Some(presence) = inner.presence.get_mut(&principal.user_id) {
                presence.connections += 1;
            }
            drop(inner);
            return Ok(JoinedSession {
                session,
                permissions,
                newly_joined: false,
            });
        }

        if inner.members.len() >= session.settings.max_users {
            return Err(HubError::SessionFull);
        }

        inner.members.insert(principal.user_id.clone());

        let permissions = inner
            .permissions
            .entry(principal.user_id.clone())
            .or_insert_with(|| {
                let mut p = session.settings.default_permissions;
                if principal.user_id == session.creator_id {
                    p.can_invite_others = true;
                }
                p
            })
            .to_owned();

        inner.presence.insert(
            principal.user_id.clone(),
            PresenceInfo {
                display_name: principal.display_name.clone(),
                role: principal.role,
                current_file: None,
                connections: 1,
            },
        );

        drop(inner);
        info!(session_id = %session.id, user_id = %principal.user_id, "member joined");

        Ok(JoinedSession {
            session,
            permissions,
            newly_joined: true,
        })
    }

    /// Creator-only: atomically replace the session's invite key.
    pub fn rotate_invite_key(&self, session: &Session, requester_id: &str) -> HubResult<String> {
        if requester_id != session.creator_id {
            return Err(HubError::AccessDenied);
        }
        self.registry.rotate_invite_key(&session.id)
    }

    /// Creator-only: purge the session from the registry. The caller is
    /// responsible for broadcasting `session_deleted` before or after this
    /// call; both orders are safe since the registry purge does not touch
    /// the session's own lock.
    pub fn delete_session(&self, session: &Session, requester_id: &str) -> HubResult<()> {
        if requester_id != session.creator_id {
            return Err(HubError::AccessDenied);
        }
        self.registry.remove(&session.id);
        info!(session_id = %session.id, "session deleted");
        Ok(())
    }

    /// Drop one connection's hold on `user_id`'s membership. A principal may
    /// hold more than one open connection bound to the same session (a
    /// reconnect or a second browser tab); `presence.connections` counts
    /// those, so the user only leaves `members` once the last one drops,
    /// per I2. Returns `true` if this was that last connection (the caller
    /// should then notify peers); schedules a GC sweep if the session's
    /// membership drained to empty as a result.
    pub fn remove_member(&self, session: &Arc<Session>, user_id: &str) -> bool {
        let (user_fully_left, session_empty) = {
            let mut inner = session.inner.lock();
            let fully_left = match inner.presence.get_mut(user_id) {
                Some(presence) if presence.connections > 1 => {
                    presence.connections -= 1;
                    false
                }
                _ => {
                    inner.members.remove(user_id);
                    inner.presence.remove(user_id);
                    true
                }
            };
            (fully_left, inner.members.is_empty())
        };

        if session_empty {
            self.schedule_gc(session.clone());
        }
        user_fully_left
    }

    /// Spawn a delayed sweep; re-checks emptiness at fire time so a rejoin
    /// before the grace window elapses cancels the purge. Idempotent: a
    /// session already removed from the registry is simply a no-op get.
    fn schedule_gc(&self, session: Arc<Session>) {
        let registry = self.registry.clone();
        let grace = Duration::from_secs(self.config.session.gc_interval_secs);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if registry.get(&session.id).is_none() {
                return;
            }
            if session.is_empty() {
                registry.remove(&session.id);
                info!(session_id = %session.id, "session garbage collected");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PrincipalOrigin, Role};

    fn principal(id: &str, origin: PrincipalOrigin) -> Principal {
        Principal {
            user_id: id.to_owned(),
            email: format!("{id}@example.com"),
            display_name: id.to_owned(),
            role: if matches!(origin, PrincipalOrigin::Guest) {
                Role::Guest
            } else {
                Role::User
            },
            avatar: None,
            origin,
        }
    }

    fn controller() -> AdmissionController {
        AdmissionController::new(Arc::new(SessionRegistry::new()), AppConfig::default())
    }

    #[test]
    fn create_then_join_succeeds() {
        let ctrl = controller();
        let alice = principal("alice", PrincipalOrigin::Verified);
        let created = ctrl.create_session(&alice, Some("demo".to_owned()), None, None);
        assert_eq!(created.session.member_count(), 1);

        let bob = principal("bob", PrincipalOrigin::Verified);
        let joined = ctrl
            .join_by_invite_key(&created.invite_key, &bob)
            .unwrap();
        assert!(joined.newly_joined);
        assert_eq!(joined.session.member_count(), 2);
    }

    #[test]
    fn unknown_invite_key_rejected() {
        let ctrl = controller();
        let bob = principal("bob", PrincipalOrigin::Verified);
        let result = ctrl.join_by_invite_key("NOPE00000000", &bob);
        assert!(matches!(result, Err(HubError::InvalidInvite)));
    }

    #[test]
    fn guest_denied_when_not_allowed() {
        let ctrl = controller();
        let alice = principal("alice", PrincipalOrigin::Verified);
        let created = ctrl.create_session(&alice, None, None, Some(false));
        let guest = principal("guest-1", PrincipalOrigin::Guest);
        let result = ctrl.join_by_invite_key(&created.invite_key, &guest);
        assert!(matches!(result, Err(HubError::GuestDenied)));
        assert_eq!(created.session.member_count(), 1);
    }

    #[test]
    fn session_full_rejected() {
        let ctrl = controller();
        let alice = principal("alice", PrincipalOrigin::Verified);
        let created = ctrl.create_session(&alice, None, Some(1), None);
        let bob = principal("bob", PrincipalOrigin::Verified);
        let result = ctrl.join_by_invite_key(&created.invite_key, &bob);
        assert!(matches!(result, Err(HubError::SessionFull)));
    }

    #[test]
    fn rejoin_is_idempotent() {
        let ctrl = controller();
        let alice = principal("alice", PrincipalOrigin::Verified);
        let created = ctrl.create_session(&alice, None, None, None);
        let joined = ctrl
            .join_by_invite_key(&created.invite_key, &alice)
            .unwrap();
        assert!(!joined.newly_joined);
        assert_eq!(created.session.member_count(), 1);
    }

    #[test]
    fn creator_pseudo_join_credits_no_connection_until_a_real_one_joins() {
        let ctrl = controller();
        let alice = principal("alice", PrincipalOrigin::Verified);
        let created = ctrl.create_session(&alice, None, None, None);
        assert_eq!(
            created.session.inner.lock().presence.get("alice").unwrap().connections,
            0,
            "pseudo-join materializes the permission row but no live connection exists yet"
        );

        ctrl.join_by_invite_key(&created.invite_key, &alice).unwrap();
        assert_eq!(
            created.session.inner.lock().presence.get("alice").unwrap().connections,
            1
        );
    }

    #[test]
    fn second_connection_rejoin_increments_connection_count_not_membership() {
        let ctrl = controller();
        let alice = principal("alice", PrincipalOrigin::Verified);
        let created = ctrl.create_session(&alice, None, None, None);
        ctrl.join_by_invite_key(&created.invite_key, &alice).unwrap(); // creator's real connection

        // Alice opens a second tab: same invite key, same user, already a member.
        let joined = ctrl.join_by_invite_key(&created.invite_key, &alice).unwrap();
        assert!(!joined.newly_joined);
        assert_eq!(created.session.member_count(), 1, "still one distinct member");
        assert_eq!(
            created.session.inner.lock().presence.get("alice").unwrap().connections,
            2
        );
    }

    #[test]
    fn remove_member_keeps_membership_while_another_connection_remains() {
        let ctrl = controller();
        let alice = principal("alice", PrincipalOrigin::Verified);
        let created = ctrl.create_session(&alice, None, None, None);
        ctrl.join_by_invite_key(&created.invite_key, &alice).unwrap(); // first real connection
        ctrl.join_by_invite_key(&created.invite_key, &alice).unwrap(); // second tab

        let fully_left = ctrl.remove_member(&created.session, "alice");
        assert!(!fully_left, "one of two connections dropping should not remove membership");
        assert_eq!(created.session.member_count(), 1);

        let fully_left = ctrl.remove_member(&created.session, "alice");
        assert!(fully_left, "the last connection dropping should remove membership");
        assert_eq!(created.session.member_count(), 0);
    }

    #[test]
    fn rotate_invite_key_requires_creator() {
        let ctrl = controller();
        let alice = principal("alice", PrincipalOrigin::Verified);
        let created = ctrl.create_session(&alice, None, None, None);
        let result = ctrl.rotate_invite_key(&created.session, "bob");
        assert!(matches!(result, Err(HubError::AccessDenied)));

        let new_key = ctrl.rotate_invite_key(&created.session, "alice").unwrap();
        assert_ne!(new_key, created.invite_key);
    }

    #[test]
    fn delete_session_requires_creator() {
        let ctrl = controller();
        let alice = principal("alice", PrincipalOrigin::Verified);
        let created = ctrl.create_session(&alice, None, None, None);
        assert!(matches!(
            ctrl.delete_session(&created.session, "bob"),
            Err(HubError::AccessDenied)
        ));
        ctrl.delete_session(&created.session, "alice").unwrap();
    }
}
