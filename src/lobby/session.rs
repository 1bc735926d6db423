use serde::{Deserialize, Serialize};

use crate::game::constants::net::{MAX_NAME_LEN, MAX_PROMPT_LEN};
use crate::game::entity::EntityId;

/// Stable per-connection identifier, allocated from 1
pub type SessionId = u32;

/// Cosmetic choices made before gameplay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customization {
    pub color_index: u8,
    pub hat_index: u8,
}

/// One connected client
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    /// Client finished loading into the match scene
    pub joined: bool,
    /// Client finished playing the intro cinematic
    pub cinematic_done: bool,
    /// One slot per prompt phase
    pub prompts: [Option<String>; 2],
    pub customization: Customization,
    /// The session's own avatar, if spawned
    pub avatar: Option<EntityId>,
    /// The boulder the session pushes, if spawned
    pub boulder: Option<EntityId>,
}

impl Session {
    pub fn new(id: SessionId, name: String) -> Self {
        Self {
            id,
            name,
            joined: false,
            cinematic_done: false,
            prompts: [None, None],
            customization: Customization::default(),
            avatar: None,
            boulder: None,
        }
    }
}

/// Trim, strip control and markup characters, cap the length and collapse
/// runs of whitespace. Returns `None` if nothing printable is left.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .filter(|c| *c != '<' && *c != '>' && *c != '&')
        .take(MAX_NAME_LEN)
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Same treatment for prompts, with a longer cap. Line breaks and tabs
/// count as word breaks.
pub fn sanitize_prompt(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !c.is_control())
        .take(MAX_PROMPT_LEN)
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new() {
        let session = Session::new(3, "Sisy".to_string());
        assert_eq!(session.id, 3);
        assert!(!session.joined);
        assert!(!session.cinematic_done);
        assert!(session.avatar.is_none());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  Bob  ").as_deref(), Some("Bob"));
        assert_eq!(sanitize_name("a\u{0}b").as_deref(), Some("ab"));
        assert_eq!(sanitize_name("<b>x</b>").as_deref(), Some("bx/b"));
        assert_eq!(sanitize_name("too   many").as_deref(), Some("too many"));
        assert_eq!(sanitize_name("   "), None);
        assert_eq!(sanitize_name("abcdefghijklmnopqrstuvwxyz").map(|n| n.len()), Some(MAX_NAME_LEN));
    }

    #[test]
    fn test_sanitize_prompt() {
        assert_eq!(sanitize_prompt(" a river\nof lava ").as_deref(), Some("a river of lava"));
        assert_eq!(sanitize_prompt("north\r\n\tsouth").as_deref(), Some("north south"));
        assert_eq!(sanitize_prompt("lava\u{7}pit").as_deref(), Some("lavapit"));
        assert_eq!(sanitize_prompt(""), None);
    }
}
