//! Recognises Docker's "name already in use" create failure.
//!
//! Docker sometimes keeps a name reserved after the object holding it should
//! be gone, and only reports it in the error text. If the wording changes this
//! stops matching and the original error is surfaced unchanged.

use regex::Regex;
use std::sync::LazyLock;

static CONFLICT_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"Conflict\. (?:.)+ is already in use by container "?([0-9a-z]+)"?"#).ok()
});

/// Returns the ID of the object holding the name, if `message` is a name
/// conflict.
pub fn conflicting_container_id(message: &str) -> Option<&str> {
    CONFLICT_RE
        .as_ref()?
        .captures(message)?
        .get(1)
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_daemon_conflict_message() {
        let message = "Error response from daemon: Conflict. The name \"/k8s_pause_foo_bar_1_0\" \
                       is already in use by container \"containerid\". You have to remove (or \
                       rename) that container to be able to reuse that name";
        assert_eq!(conflicting_container_id(message), Some("containerid"));
    }

    #[test]
    fn test_matches_unquoted_id() {
        let message = "Conflict. The container name \"/x\" is already in use by container 0a1b2c";
        assert_eq!(conflicting_container_id(message), Some("0a1b2c"));
    }

    #[test]
    fn test_ignores_other_errors() {
        assert_eq!(conflicting_container_id("random error"), None);
        assert_eq!(
            conflicting_container_id("Error response from daemon: No such container: abc"),
            None
        );
        assert_eq!(
            conflicting_container_id("is already in use by container \"abc\""),
            None
        );
    }
}
