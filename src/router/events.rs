//! Wire contract: the tagged-union command enum clients send, and the
//! helpers that build outbound event payloads.

use serde::Deserialize;
use serde_json::{json, Value};

/// Envelope for every inbound realtime command (§4.5.1).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    JoinSession {
        invite_key: Option<String>,
        session_id: Option<String>,
    },
    LeaveSession,
    CodeChange {
        code: String,
    },
    RealtimeCodeChange {
        file_path: String,
        content: String,
    },
    FileOperation {
        action: String,
        path: String,
        data: Option<String>,
    },
    CreateFile {
        name: String,
        content: String,
    },
    CreateFolder {
        name: String,
    },
    CursorUpdate {
        file_path: String,
        position: Value,
        selection: Option<Value>,
        color: Option<String>,
    },
    FileActivityUpdate {
        file_path: String,
    },
    ChatMessage {
        content: String,
        #[serde(rename = "type", default)]
        kind: Option<String>,
    },
    ExecuteCode {
        code: String,
        language: String,
        input: Option<String>,
    },
    UpdateUserPermissions {
        user_id: String,
        permissions: Value,
    },
    ProjectShareInit {
        data: Value,
    },
    ProjectCreateInit {
        template: Option<String>,
        data: Value,
    },
    AccessRightsUpdate {
        user_id: String,
        access_level: String,
    },
    GetSessionUsers,
    GetSessionInfo,
    GetSessionFiles,
    StartPerformanceMonitoring,
}

/// Build a typed error event for the sender.
pub fn error_event(event_name: &str, code: &str, message: &str) -> Value {
    json!({
        "type": event_name,
        "error": code,
        "message": message,
    })
}

pub fn session_joined(
    session_id: &str,
    user_count: usize,
    permissions: &crate::model::PermissionVector,
) -> Value {
    json!({
        "type": "session_joined",
        "session": {
            "id": session_id,
            "userCount": user_count,
            "userPermissions": permissions,
        }
    })
}

pub fn user_joined_session(user_id: &str, display_name: &str) -> Value {
    json!({
        "type": "user_joined_session",
        "userId": user_id,
        "displayName": display_name,
    })
}

pub fn session_update(user_count: usize) -> Value {
    json!({
        "type": "session_update",
        "userCount": user_count,
    })
}

pub fn code_update(code: &str) -> Value {
    json!({ "type": "code_update", "code": code })
}

pub fn session_files_state(files: &Value) -> Value {
    json!({ "type": "session_files_state", "files": files })
}

pub fn user_left_session(user_id: &str) -> Value {
    json!({ "type": "user_left_session", "userId": user_id })
}

pub fn session_left() -> Value {
    json!({ "type": "session_left" })
}

pub fn realtime_code_update(file_path: &str, content: &str, user_id: &str) -> Value {
    json!({
        "type": "realtime_code_update",
        "filePath": file_path,
        "content": content,
        "userId": user_id,
    })
}

pub fn file_operation_echo(action: &str, path: &str, data: &Option<String>) -> Value {
    json!({
        "type": "file_operation",
        "action": action,
        "path": path,
        "data": data,
    })
}

pub fn file_created(path: &str) -> Value {
    json!({ "type": "file_created", "path": path })
}

pub fn folder_created(path: &str) -> Value {
    json!({ "type": "folder_created", "path": path })
}

pub fn cursor_update(file_path: &str, position: &Value, selection: &Option<Value>, color: &Option<String>, user_id: &str) -> Value {
    json!({
        "type": "cursor_update",
        "filePath": file_path,
        "position": position,
        "selection": selection,
        "color": color,
        "userId": user_id,
    })
}

pub fn file_activity_update(file_path: &str, user_id: &str) -> Value {
    json!({
        "type": "file_activity_update",
        "filePath": file_path,
        "userId": user_id,
    })
}

pub fn chat_message_event(message: &crate::model::ChatMessage) -> Value {
    json!({ "type": "chat_message", "message": message })
}

pub fn execution_started() -> Value {
    json!({ "type": "execution_started" })
}

pub fn permissions_updated(user_id: &str, permissions: &crate::model::PermissionVector) -> Value {
    json!({
        "type": "permissions_updated",
        "userId": user_id,
        "permissions": permissions,
    })
}

pub fn project_event(event_name: &str, data: &Value) -> Value {
    json!({ "type": event_name, "project": data })
}

pub fn access_rights_update_event(user_id: &str, permissions: &crate::model::PermissionVector) -> Value {
    json!({
        "type": "access_rights_update",
        "userId": user_id,
        "permissions": permissions,
    })
}

pub fn monitoring_started() -> Value {
    json!({ "type": "monitoring_started" })
}

pub fn session_error(code: &str) -> Value {
    json!({ "type": "session_error", "error": code })
}

pub fn connection_error(code: &str) -> Value {
    json!({ "type": "connection_error", "error": code })
}

pub fn session_deleted_event() -> Value {
    json!({ "type": "session_deleted" })
}
