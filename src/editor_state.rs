//! Persisted Editor State
//!
//! The minimal `{sessionId, port}` snapshot the host serializes across
//! structural UI operations (tab move, split, restart). Carries no behavior
//! beyond the merge-compatibility rule used to collapse undo/navigation
//! history.

use serde::{Deserialize, Serialize};

/// Snapshot of the identity a UI surface needs to re-attach after a
/// structural move. Both fields are optional: a surface that never finished
/// initializing has nothing to persist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl EditorState {
    pub fn new(session_id: Option<String>, port: Option<u16>) -> Self {
        Self { session_id, port }
    }

    /// Two snapshots represent the same logical session iff their session
    /// ids match (including both being absent). The port is deliberately
    /// ignored: a restarted server changes the port but not the session.
    pub fn can_merge(a: &EditorState, b: &EditorState) -> bool {
        a.session_id == b.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(session_id: Option<&str>, port: Option<u16>) -> EditorState {
        EditorState::new(session_id.map(String::from), port)
    }

    #[test]
    fn test_merge_same_session_ignores_port() {
        let a = state(Some("ses_1"), Some(8080));
        let b = state(Some("ses_1"), Some(9091));
        assert!(EditorState::can_merge(&a, &b));
    }

    #[test]
    fn test_merge_different_sessions() {
        let a = state(Some("ses_1"), Some(8080));
        let b = state(Some("ses_2"), Some(8080));
        assert!(!EditorState::can_merge(&a, &b));
    }

    #[test]
    fn test_merge_absent_ids() {
        let none = state(None, Some(8080));
        let some = state(Some("ses_1"), Some(8080));
        // Both absent merges; exactly one absent does not.
        assert!(EditorState::can_merge(&none, &none.clone()));
        assert!(!EditorState::can_merge(&none, &some));
        assert!(!EditorState::can_merge(&some, &none));
    }

    #[test]
    fn test_merge_symmetry() {
        let cases = [
            state(Some("ses_1"), Some(1)),
            state(Some("ses_2"), None),
            state(None, Some(2)),
            state(None, None),
        ];
        for a in &cases {
            for b in &cases {
                assert_eq!(
                    EditorState::can_merge(a, b),
                    EditorState::can_merge(b, a),
                    "can_merge not symmetric for {:?} / {:?}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_serialized_shape() {
        let full = state(Some("ses_1"), Some(4097));
        let json = serde_json::to_value(&full).unwrap();
        assert_eq!(json["sessionId"], "ses_1");
        assert_eq!(json["port"], 4097);

        // Absent fields are omitted entirely, and an empty object restores
        // to the default snapshot.
        let empty = serde_json::to_string(&EditorState::default()).unwrap();
        assert_eq!(empty, "{}");
        let restored: EditorState = serde_json::from_str("{}").unwrap();
        assert_eq!(restored, EditorState::default());
    }
}
