//! Session State Engine (C6): mutations to a session's code buffer, file
//! map, chat log, permissions, and project state.
//!
//! Every method here acquires the session's own lock for the duration of
//! the mutation and returns the derived event payload; it never touches
//! the registry and never performs I/O. Content size limits and path
//! validation are re-checked here even though the router already checked
//! them, since this is the last line of defense against invariant breakage.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{HubError, HubResult};
use crate::model::{
    ChatMessage, ChatMessageKind, FileEntry, FileEntryType, PermissionVector, ProjectMode,
    ProjectState, Session, UserId,
};

pub const MAX_PATH_LEN: usize = 500;

/// Starter files for a recognized `project_create_init` template. Unknown
/// template names are not an error (the client may pass a free-form label
/// the hub doesn't recognize) — they simply preload nothing.
fn template_files(template: &str) -> Option<&'static [(&'static str, &'static str)]> {
    Some(match template {
        "javascript" => &[("main.js", "console.log(\"hello, world\");\n")],
        "python" => &[("main.py", "print(\"hello, world\")\n")],
        "blank" => &[("README.md", "# New project\n")],
        _ => return None,
    })
}

pub fn validate_path(path: &str) -> HubResult<()> {
    if path.len() > MAX_PATH_LEN {
        return Err(HubError::InvalidPayload(format!("path exceeds {MAX_PATH_LEN} chars")));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(HubError::InvalidPayload("path contains a '..' segment".to_owned()));
    }
    Ok(())
}

fn validate_code_size(content: &str, limit: usize) -> HubResult<()> {
    if content.len() > limit {
        return Err(HubError::InvalidPayload(format!("payload exceeds {limit} bytes")));
    }
    Ok(())
}

impl Session {
    /// `code_change <string>`: overwrite the legacy single-document buffer.
    pub fn apply_code_change(&self, user_id: &UserId, code: String) -> HubResult<String> {
        validate_code_size(&code, self.settings.max_code_change_bytes)?;
        let mut inner = self.inner.lock();
        inner.code_buffer = code.clone();
        let _ = user_id;
        Ok(code)
    }

    /// `realtime_code_change {filePath,content}`: upsert a file entry.
    pub fn apply_realtime_code_change(
        &self,
        user_id: &UserId,
        file_path: &str,
        content: String,
    ) -> HubResult<()> {
        validate_path(file_path)?;
        validate_code_size(&content, self.settings.max_code_change_bytes)?;

        let mut inner = self.inner.lock();
        let now = Utc::now();
        inner
            .files
            .entry(file_path.to_owned())
            .and_modify(|entry| {
                entry.content = content.clone();
                entry.last_edited_by = user_id.clone();
                entry.last_modified = now;
            })
            .or_insert_with(|| FileEntry {
                entry_type: FileEntryType::File,
                content,
                created_by: user_id.clone(),
                last_edited_by: user_id.clone(),
                last_modified: now,
            });
        Ok(())
    }

    /// `file_operation {action,path,data}`: create, delete, rename, or save.
    pub fn apply_file_operation(
        &self,
        user_id: &UserId,
        action: &str,
        path: &str,
        data: Option<String>,
    ) -> HubResult<()> {
        validate_path(path)?;
        let mut inner = self.inner.lock();
        let now = Utc::now();

        match action {
            "create" => {
                inner.files.insert(
                    path.to_owned(),
                    FileEntry {
                        entry_type: FileEntryType::File,
                        content: data.unwrap_or_default(),
                        created_by: user_id.clone(),
                        last_edited_by: user_id.clone(),
                        last_modified: now,
                    },
                );
            }
            "delete" => {
                inner.files.remove(path);
            }
            "save" => {
                if let Some(entry) = inner.files.get_mut(path) {
                    entry.content = data.unwrap_or_default();
                    entry.last_edited_by = user_id.clone();
                    entry.last_modified = now;
                } else {
                    return Err(HubError::NotFound(path.to_owned()));
                }
            }
            "rename" => {
                let new_path = data.ok_or_else(|| HubError::InvalidPayload("rename requires data".to_owned()))?;
                validate_path(&new_path)?;
                let entry = inner
                    .files
                    .remove(path)
                    .ok_or_else(|| HubError::NotFound(path.to_owned()))?;
                inner.files.insert(new_path, entry);
            }
            other => return Err(HubError::InvalidPayload(format!("unknown file action: {other}"))),
        }
        Ok(())
    }

    /// `create_file {name,content}`: insert `files[sessionId/name]`.
    pub fn create_file(&self, user_id: &UserId, name: &str, content: String) -> HubResult<String> {
        validate_path(name)?;
        validate_code_size(&content, self.settings.max_code_change_bytes)?;
        let path = format!("{}/{}", self.id, name);
        let mut inner = self.inner.lock();
        inner.files.insert(
            path.clone(),
            FileEntry {
                entry_type: FileEntryType::File,
                content,
                created_by: user_id.clone(),
                last_edited_by: user_id.clone(),
                last_modified: Utc::now(),
            },
        );
        Ok(path)
    }

    /// `create_folder {name}`: insert `files[sessionId/name/]` (dir).
    pub fn create_folder(&self, user_id: &UserId, name: &str) -> HubResult<String> {
        validate_path(name)?;
        let mut path = format!("{}/{}", self.id, name);
        if !path.ends_with('/') {
            path.push('/');
        }
        let mut inner = self.inner.lock();
        inner.files.insert(
            path.clone(),
            FileEntry {
                entry_type: FileEntryType::Directory,
                content: String::new(),
                created_by: user_id.clone(),
                last_edited_by: user_id.clone(),
                last_modified: Utc::now(),
            },
        );
        Ok(path)
    }

    /// `chat_message {content,type}`: append to the chat log, capped at
    /// `settings.max_chat_log_len` (oldest dropped — not in the original
    /// event table, added since the log is otherwise unbounded).
    pub fn append_chat(
        &self,
        user_id: &UserId,
        display_name: &str,
        content: String,
        kind: ChatMessageKind,
    ) -> HubResult<ChatMessage> {
        if content.is_empty() {
            return Err(HubError::InvalidPayload("chat message is empty".to_owned()));
        }
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            display_name: display_name.to_owned(),
            content,
            kind,
            timestamp: Utc::now(),
        };

        let mut inner = self.inner.lock();
        inner.chat_log.push_back(message.clone());
        while inner.chat_log.len() > self.settings.max_chat_log_len {
            inner.chat_log.pop_front();
        }
        Ok(message)
    }

    /// `update_user_permissions {userId,permissions}`: creator-only,
    /// replace the target's permission vector. `creator_id` is never
    /// touched here, honoring I6.
    pub fn update_permissions(
        &self,
        requester_id: &str,
        target_user_id: &UserId,
        new_permissions: PermissionVector,
    ) -> HubResult<()> {
        if requester_id != self.creator_id {
            return Err(HubError::AccessDenied);
        }
        let mut inner = self.inner.lock();
        inner.permissions.insert(target_user_id.clone(), new_permissions);
        Ok(())
    }

    /// `project_share_init` / `project_create_init`: creator-only, set
    /// `session.project`. For `ProjectMode::Create`, a recognized
    /// `template` preloads its starter files into `files` ahead of the
    /// project record itself (§4.5.1: "if create, preload template files").
    pub fn set_project(
        &self,
        requester_id: &str,
        mode: ProjectMode,
        template: Option<String>,
        data: serde_json::Value,
    ) -> HubResult<()> {
        if requester_id != self.creator_id {
            return Err(HubError::AccessDenied);
        }
        let mut inner = self.inner.lock();

        if mode == ProjectMode::Create {
            if let Some(files) = template.as_deref().and_then(template_files) {
                let now = Utc::now();
                for (name, content) in files {
                    let path = format!("{}/{}", self.id, name);
                    inner.files.insert(
                        path,
                        FileEntry {
                            entry_type: FileEntryType::File,
                            content: content.to_owned(),
                            created_by: requester_id.to_owned(),
                            last_edited_by: requester_id.to_owned(),
                            last_modified: now,
                        },
                    );
                }
            }
        }

        inner.project = Some(ProjectState {
            mode,
            owner_id: requester_id.to_owned(),
            template,
            data,
        });
        Ok(())
    }

    /// `access_rights_update {userId,accessLevel}`: project-owner-only;
    /// recompute `canEditFiles`/`canExecute` from a coarse access level.
    pub fn access_rights_update(
        &self,
        requester_id: &str,
        target_user_id: &UserId,
        access_level: &str,
    ) -> HubResult<PermissionVector> {
        let mut inner = self.inner.lock();
        let owner_id = inner
            .project
            .as_ref()
            .map(|p| p.owner_id.clone())
            .ok_or(HubError::AccessDenied)?;
        if requester_id != owner_id {
            return Err(HubError::AccessDenied);
        }

        let mut permissions = inner
            .permissions
            .get(target_user_id)
            .copied()
            .unwrap_or_default();

        match access_level {
            "full" => {
                permissions.can_edit_files = true;
                permissions.can_execute = true;
            }
            "edit" => {
                permissions.can_edit_files = true;
                permissions.can_execute = false;
            }
            "read" => {
                permissions.can_edit_files = false;
                permissions.can_execute = false;
            }
            other => {
                return Err(HubError::InvalidPayload(format!("unknown access level: {other}")));
            }
        }

        inner.permissions.insert(target_user_id.clone(), permissions);
        Ok(permissions)
    }

    /// `file_activity_update {filePath}`: record the member's last-known
    /// open file for the `get_session_users` presence summary.
    pub fn set_current_file(&self, user_id: &UserId, file_path: String) {
        let mut inner = self.inner.lock();
        if let Some(presence) = inner.presence.get_mut(user_id) {
            presence.current_file = Some(file_path);
        }
    }

    /// Permission check used by the router before applying any mutation.
    pub fn permission_of(&self, user_id: &str) -> PermissionVector {
        self.inner
            .lock()
            .permissions
            .get(user_id)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionSettings;

    const TEST_MAX_CODE_CHANGE_BYTES: usize = 1_000_000;
    const TEST_MAX_CHAT_LOG_LEN: usize = 500;

    fn session() -> Session {
        Session::new(
            "s1".to_owned(),
            "demo".to_owned(),
            "alice".to_owned(),
            SessionSettings::new(10, false, TEST_MAX_CODE_CHANGE_BYTES, TEST_MAX_CHAT_LOG_LEN),
        )
    }

    #[test]
    fn code_change_respects_size_limit() {
        let s = session();
        let ok = "x".repeat(TEST_MAX_CODE_CHANGE_BYTES);
        assert!(s.apply_code_change(&"alice".to_owned(), ok).is_ok());

        let too_big = "x".repeat(TEST_MAX_CODE_CHANGE_BYTES + 1);
        assert!(matches!(
            s.apply_code_change(&"alice".to_owned(), too_big),
            Err(HubError::InvalidPayload(_))
        ));
    }

    #[test]
    fn code_change_limit_is_session_specific() {
        let s = Session::new(
            "s2".to_owned(),
            "demo".to_owned(),
            "alice".to_owned(),
            SessionSettings::new(10, false, 10, TEST_MAX_CHAT_LOG_LEN),
        );
        assert!(s.apply_code_change(&"alice".to_owned(), "x".repeat(10)).is_ok());
        assert!(matches!(
            s.apply_code_change(&"alice".to_owned(), "x".repeat(11)),
            Err(HubError::InvalidPayload(_))
        ));
    }

    #[test]
    fn path_with_dotdot_rejected() {
        let s = session();
        let result = s.apply_realtime_code_change(&"alice".to_owned(), "../etc/passwd", "x".to_owned());
        assert!(matches!(result, Err(HubError::InvalidPayload(_))));
    }

    #[test]
    fn create_file_path_is_namespaced_by_session() {
        let s = session();
        let path = s.create_file(&"alice".to_owned(), "main.js", "console.log(1)".to_owned()).unwrap();
        assert_eq!(path, "s1/main.js");
        assert_eq!(s.inner.lock().files.get(&path).unwrap().content, "console.log(1)");
    }

    #[test]
    fn update_permissions_requires_creator() {
        let s = session();
        let result = s.update_permissions("bob", &"carol".to_owned(), PermissionVector::default());
        assert!(matches!(result, Err(HubError::AccessDenied)));
    }

    #[test]
    fn chat_log_caps_at_max_len() {
        let s = session();
        for i in 0..(TEST_MAX_CHAT_LOG_LEN + 10) {
            s.append_chat(&"alice".to_owned(), "Alice", format!("msg {i}"), ChatMessageKind::Text)
                .unwrap();
        }
        assert_eq!(s.inner.lock().chat_log.len(), TEST_MAX_CHAT_LOG_LEN);
    }

    #[test]
    fn chat_log_limit_is_session_specific() {
        let s = Session::new(
            "s3".to_owned(),
            "demo".to_owned(),
            "alice".to_owned(),
            SessionSettings::new(10, false, TEST_MAX_CODE_CHANGE_BYTES, 2),
        );
        for i in 0..5 {
            s.append_chat(&"alice".to_owned(), "Alice", format!("msg {i}"), ChatMessageKind::Text)
                .unwrap();
        }
        assert_eq!(s.inner.lock().chat_log.len(), 2);
    }

    #[test]
    fn creator_id_never_mutated_by_permission_edits() {
        let s = session();
        s.update_permissions("alice", &"bob".to_owned(), PermissionVector::creator())
            .unwrap();
        assert_eq!(s.creator_id, "alice");
    }

    #[test]
    fn project_create_init_preloads_recognized_template() {
        let s = session();
        s.set_project(
            "alice",
            ProjectMode::Create,
            Some("python".to_owned()),
            serde_json::json!({}),
        )
        .unwrap();

        let inner = s.inner.lock();
        let entry = inner.files.get("s1/main.py").unwrap();
        assert_eq!(entry.content, "print(\"hello, world\")\n");
        assert_eq!(inner.project.as_ref().unwrap().template.as_deref(), Some("python"));
    }

    #[test]
    fn project_create_init_with_unknown_template_preloads_nothing() {
        let s = session();
        s.set_project(
            "alice",
            ProjectMode::Create,
            Some("cobol-enterprise".to_owned()),
            serde_json::json!({}),
        )
        .unwrap();
        assert!(s.inner.lock().files.is_empty());
    }

    #[test]
    fn project_share_init_requires_creator() {
        let s = session();
        let result = s.set_project("bob", ProjectMode::Share, None, serde_json::json!({}));
        assert!(matches!(result, Err(HubError::AccessDenied)));
    }

    #[test]
    fn set_current_file_updates_existing_presence_only() {
        let s = session();
        s.inner.lock().presence.insert(
            "alice".to_owned(),
            crate::model::PresenceInfo {
                display_name: "Alice".to_owned(),
                role: crate::model::Role::User,
                current_file: None,
                connections: 1,
            },
        );

        s.set_current_file(&"alice".to_owned(), "s1/main.js".to_owned());
        assert_eq!(
            s.inner.lock().presence.get("alice").unwrap().current_file.as_deref(),
            Some("s1/main.js")
        );

        // A user with no presence row (never joined) is a no-op, not a panic.
        s.set_current_file(&"ghost".to_owned(), "x".to_owned());
        assert!(s.inner.lock().presence.get("ghost").is_none());
    }
}
