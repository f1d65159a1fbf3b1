//! Core data model: principals, sessions, permissions, files, chat.
//!
//! `Session` splits its fields into an immutable outer shell and a
//! [`SessionInner`] guarded by one lock, per the concurrency model: a
//! handler snapshots what it needs, drops the lock, then does network I/O.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type UserId = String;
pub type SessionId = String;
pub type ConnectionId = String;

/// Channel capacity for a session's fan-out broadcast. Slow peers drop the
/// oldest events rather than back-pressuring the whole room.
pub const SESSION_BROADCAST_CAPACITY: usize = 256;

// ─── Principal ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Guest,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PrincipalOrigin {
    Verified,
    AutoCreated,
    Guest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub avatar: Option<String>,
    pub origin: PrincipalOrigin,
}

impl Principal {
    pub fn is_guest(&self) -> bool {
        matches!(self.origin, PrincipalOrigin::Guest)
    }
}

// ─── Permission vector ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionVector {
    pub can_view_files: bool,
    pub can_edit_files: bool,
    pub can_create_files: bool,
    pub can_create_folders: bool,
    pub can_delete_files: bool,
    pub can_manage_permissions: bool,
    pub can_invite_others: bool,
    pub can_execute: bool,
    pub can_chat: bool,
}

impl PermissionVector {
    /// The full vector granted to a session's creator.
    pub fn creator() -> Self {
        Self {
            can_view_files: true,
            can_edit_files: true,
            can_create_files: true,
            can_create_folders: true,
            can_delete_files: true,
            can_manage_permissions: true,
            can_invite_others: true,
            can_execute: true,
            can_chat: true,
        }
    }
}

// ─── Settings ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub max_users: usize,
    pub allow_guests: bool,
    pub default_permissions: PermissionVector,
    /// Max bytes accepted in a single `code_change`/`realtime_code_change` payload.
    pub max_code_change_bytes: usize,
    /// Max chat messages retained per session before the oldest is dropped.
    pub max_chat_log_len: usize,
}

impl SessionSettings {
    pub fn new(max_users: usize, allow_guests: bool, max_code_change_bytes: usize, max_chat_log_len: usize) -> Self {
        Self {
            max_users,
            allow_guests,
            max_code_change_bytes,
            max_chat_log_len,
            default_permissions: PermissionVector {
                can_view_files: true,
                can_edit_files: true,
                can_create_files: true,
                can_create_folders: true,
                can_delete_files: false,
                can_manage_permissions: false,
                can_invite_others: false,
                can_execute: true,
                can_chat: true,
            },
        }
    }
}

// ─── Files ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileEntryType {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    #[serde(rename = "type")]
    pub entry_type: FileEntryType,
    pub content: String,
    pub created_by: UserId,
    pub last_edited_by: UserId,
    pub last_modified: DateTime<Utc>,
}

// ─── Chat ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatMessageKind {
    Text,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub user_id: UserId,
    pub display_name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: ChatMessageKind,
    pub timestamp: DateTime<Utc>,
}

// ─── Project ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectMode {
    Share,
    Create,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub mode: ProjectMode,
    pub owner_id: UserId,
    pub template: Option<String>,
    pub data: serde_json::Value,
}

// ─── Session ──────────────────────────────────────────────────────────────

/// Mutable session state, guarded by [`Session::inner`]'s lock.
///
/// All fields the spec's concurrency model lists under one mutual-exclusion
/// domain live here: members, permissions, code buffer, files, chat log,
/// project.
pub struct SessionInner {
    pub members: HashSet<UserId>,
    pub permissions: HashMap<UserId, PermissionVector>,
    pub code_buffer: String,
    pub files: HashMap<String, FileEntry>,
    pub chat_log: VecDeque<ChatMessage>,
    pub project: Option<ProjectState>,
    /// Connections subscribed to the metrics ticker (C8); empty means unsubscribed.
    pub metrics_subscribers: HashSet<ConnectionId>,
    /// Presence summary backing `get_session_users`: display name, role,
    /// last-known open file, and live connection count per member.
    pub presence: HashMap<UserId, PresenceInfo>,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            members: HashSet::new(),
            permissions: HashMap::new(),
            code_buffer: String::new(),
            files: HashMap::new(),
            chat_log: VecDeque::new(),
            project: None,
            metrics_subscribers: HashSet::new(),
            presence: HashMap::new(),
        }
    }
}

/// Presence entry for one member, maintained alongside `members`/`permissions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceInfo {
    pub display_name: String,
    pub role: Role,
    pub current_file: Option<String>,
    /// Number of open realtime connections this user currently holds in
    /// the session (a user may reconnect without losing membership).
    pub connections: usize,
}

/// A live collaboration session.
///
/// `id`, `creator_id`, `created_at`, and `settings.max_users`/`allow_guests`
/// are immutable for the session's life (I6). The invite key lives only in
/// the registry's reverse index, so rotation (I1) is a registry-level
/// operation, not a field mutation here.
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
    pub settings: SessionSettings,
    pub inner: Mutex<SessionInner>,
    /// Per-session fan-out channel; every bound connection holds a receiver.
    pub bus: broadcast::Sender<ServerEvent>,
}

impl Session {
    pub fn new(id: SessionId, name: String, creator_id: UserId, settings: SessionSettings) -> Self {
        let (bus, _rx) = broadcast::channel(SESSION_BROADCAST_CAPACITY);
        Self {
            id,
            name,
            creator_id,
            created_at: Utc::now(),
            settings,
            inner: Mutex::new(SessionInner::new()),
            bus,
        }
    }

    pub fn member_count(&self) -> usize {
        self.inner.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().members.is_empty()
    }

    /// Best-effort broadcast; a lagging or absent receiver is not an error.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.bus.send(event);
    }
}

// ─── ServerEvent ──────────────────────────────────────────────────────────

/// A fan-out unit placed on a session's broadcast channel.
///
/// `to` narrows delivery: `Room` reaches every subscriber, `Peers` excludes
/// the acting connection (used when the sender already got a direct reply),
/// `Sender` targets one connection id.
#[derive(Debug, Clone)]
pub struct ServerEvent {
    pub to: EventTarget,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTarget {
    Room,
    Peers(ConnectionId),
    Sender(ConnectionId),
}
