//! Object key derivation for workspaces sharing one bucket
//!
//! Every workspace stores its state under a key derived from the backend's
//! configured base key. The layout is wire-visible: other processes sharing
//! the same bucket derive the same keys, so it must never change shape.

/// Name of the workspace that always exists. Its state lives at the base key
/// itself, with no prefix.
pub const DEFAULT_WORKSPACE: &str = "default";

/// Directory-like prefix under which named workspace objects live. The odd
/// looking colon reduces the chance of colliding with ordinary objects in a
/// shared bucket.
pub const WORKSPACE_KEY_PREFIX: &str = "env:";

/// Derive the object key for a workspace.
///
/// The default workspace maps to `base_key` unchanged; any other workspace
/// `w` maps to `env:/w/<base_key>` (exactly three slash-delimited segments).
pub fn derive_key(workspace: &str, base_key: &str) -> String {
    if workspace == DEFAULT_WORKSPACE {
        base_key.to_string()
    } else {
        format!("{}/{}/{}", WORKSPACE_KEY_PREFIX, workspace, base_key)
    }
}

/// Extract the workspace name from an object key, if the key belongs to the
/// backend configured with `base_key`.
///
/// A matching key splits into exactly three segments: the literal `env:`
/// prefix, the workspace name, and the base key. The last segment must equal
/// `base_key` exactly; several backends with different base keys may share
/// one bucket, and a prefix-only match would leak their workspace names into
/// each other's listings.
pub fn parse_workspace<'a>(key: &'a str, base_key: &str) -> Option<&'a str> {
    let parts: Vec<&str> = key.splitn(3, '/').collect();
    if parts.len() < 3 {
        // no workspace segment here
        return None;
    }

    // shouldn't happen when listing by prefix, but keys can come from anywhere
    if parts[0] != WORKSPACE_KEY_PREFIX {
        return None;
    }

    // not our key; a backend with a different base key shares this bucket
    if parts[2] != base_key {
        return None;
    }

    // an empty segment cannot name a workspace
    if parts[1].is_empty() {
        return None;
    }

    Some(parts[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_default_is_base_key() {
        assert_eq!(derive_key(DEFAULT_WORKSPACE, "pyxis.state.json"), "pyxis.state.json");
        assert_eq!(derive_key(DEFAULT_WORKSPACE, "a/b/state.json"), "a/b/state.json");
    }

    #[test]
    fn test_derive_key_named_workspace() {
        assert_eq!(
            derive_key("staging", "terraform.tfstate"),
            "env:/staging/terraform.tfstate"
        );
    }

    #[test]
    fn test_parse_workspace_round_trip() {
        for workspace in ["dev", "staging", "prod-eu", "Prod"] {
            for base in ["state.json", "team/a/state.json"] {
                let key = derive_key(workspace, base);
                assert_eq!(parse_workspace(&key, base), Some(workspace));
            }
        }
    }

    #[test]
    fn test_parse_workspace_rejects_foreign_base_key() {
        // same bucket, different backend configuration
        assert_eq!(parse_workspace("env:/prod/other.tfstate", "terraform.tfstate"), None);
        assert_eq!(
            parse_workspace("env:/w/a/terraform.tfstate", "b/terraform.tfstate"),
            None
        );
    }

    #[test]
    fn test_parse_workspace_rejects_short_and_unprefixed_keys() {
        assert_eq!(parse_workspace("state.json", "state.json"), None);
        assert_eq!(parse_workspace("env:/dangling", "state.json"), None);
        assert_eq!(parse_workspace("backup/x/state.json", "state.json"), None);
    }

    #[test]
    fn test_parse_workspace_rejects_empty_segment() {
        assert_eq!(parse_workspace("env://state.json", "state.json"), None);
    }

    #[test]
    fn test_parse_workspace_lock_file_does_not_match() {
        // the local backend's lock files live beside the object
        assert_eq!(parse_workspace("env:/dev/state.json.lock", "state.json"), None);
    }
}
