//! Environment composition for spawned servers.
//!
//! The composed map fully replaces the child's environment; nothing from
//! the parent leaks through except what the permission profile admits. A
//! `Legacy` profile (server with no stored profile) passes the parent
//! environment through unchanged to preserve pre-profile behavior.

use std::collections::HashMap;

use mcphost_store::{
    EffectiveProfile, SecretMode, UserProfile, Workspace,
};

/// Parent variables admitted by `allowPath`.
const PATH_VARS: &[&str] = &["PATH", "PATHEXT", "SystemRoot"];
/// Parent variables admitted by `allowHome`.
const HOME_VARS: &[&str] = &["HOME", "USERPROFILE", "HOMEPATH"];
/// Parent variables admitted by `allowLang`.
const LANG_VARS: &[&str] = &["LANG", "LANGUAGE", "LC_ALL", "LC_CTYPE", "LC_MESSAGES"];
/// Parent variables admitted by `allowTemp`.
const TEMP_VARS: &[&str] = &["TEMP", "TMP", "TMPDIR"];
/// Name prefixes admitted by `allowNode`.
const NODE_PREFIXES: &[&str] = &["NODE_", "npm_", "NPM_"];

/// Build the full environment for a spawn.
#[must_use]
pub fn compose(
    profile: &EffectiveProfile,
    workspace: &Workspace,
    user: Option<&UserProfile>,
    secrets: &HashMap<String, String>,
    parent: &HashMap<String, String>,
    port: u16,
) -> HashMap<String, String> {
    let mut env = HashMap::new();

    match profile {
        EffectiveProfile::Legacy => {
            env.extend(parent.iter().map(|(k, v)| (k.clone(), v.clone())));
        },
        EffectiveProfile::Profile(profile) => {
            let mut copy_set = |names: &[&str]| {
                for name in names {
                    if let Some(value) = parent.get(*name) {
                        env.insert((*name).to_string(), value.clone());
                    }
                }
            };
            if profile.env.allow_path {
                copy_set(PATH_VARS);
            }
            if profile.env.allow_home {
                copy_set(HOME_VARS);
            }
            if profile.env.allow_lang {
                copy_set(LANG_VARS);
            }
            if profile.env.allow_temp {
                copy_set(TEMP_VARS);
            }
            if profile.env.allow_node {
                for (name, value) in parent {
                    if NODE_PREFIXES.iter().any(|p| name.starts_with(p)) {
                        env.insert(name.clone(), value.clone());
                    }
                }
            }
            for name in &profile.env.custom_allowlist {
                if let Some(value) = parent.get(name) {
                    env.insert(name.clone(), value.clone());
                }
            }

            if profile.context.allow_project_root
                && let Some(root) = &workspace.project_root
            {
                env.insert(
                    "MCP_PROJECT_ROOT".into(),
                    root.to_string_lossy().into_owned(),
                );
            }
            if profile.context.allow_workspace_id {
                env.insert("MCP_WORKSPACE_ID".into(), workspace.id.clone());
            }
            if profile.context.allow_user_profile
                && let Some(user) = user
            {
                env.insert("MCP_AUTH_TOKEN".into(), user.auth_token());
            }

            match profile.secrets.mode {
                SecretMode::None => {},
                SecretMode::Allowlist => {
                    for name in &profile.secrets.allowlist {
                        if let Some(value) = secrets.get(name) {
                            env.insert(name.clone(), value.clone());
                        }
                    }
                },
                SecretMode::All => {
                    env.extend(secrets.iter().map(|(k, v)| (k.clone(), v.clone())));
                },
            }
        },
    }

    env.insert("PORT".into(), port.to_string());
    if let Some(root) = &workspace.project_root {
        env.insert(
            "MCP_WORKSPACE_PROJECT_ROOT".into(),
            root.to_string_lossy().into_owned(),
        );
    }
    env
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mcphost_store::{
        ContextPermissions, EnvPermissions, PermissionProfile, SecretPermissions,
    };

    fn workspace(id: &str, root: Option<&str>) -> Workspace {
        Workspace {
            id: id.into(),
            label: id.into(),
            project_root: root.map(Into::into),
            auto_cleanup: false,
            source: None,
            session_ttl_secs: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn parent_env() -> HashMap<String, String> {
        HashMap::from([
            ("PATH".into(), "/usr/bin".into()),
            ("HOME".into(), "/home/u".into()),
            ("LANG".into(), "en_US.UTF-8".into()),
            ("TMPDIR".into(), "/tmp".into()),
            ("NODE_OPTIONS".into(), "--max-old-space-size=512".into()),
            ("npm_config_registry".into(), "https://registry.npmjs.org".into()),
            ("AWS_SECRET_ACCESS_KEY".into(), "leak-me-not".into()),
            ("EDITOR".into(), "vi".into()),
        ])
    }

    fn profile(env: EnvPermissions, context: ContextPermissions, secrets: SecretPermissions) -> EffectiveProfile {
        EffectiveProfile::Profile(PermissionProfile {
            env,
            context,
            secrets,
            ai: None,
        })
    }

    #[test]
    fn legacy_passes_parent_through() {
        let ws = workspace("w", Some("/proj"));
        let env = compose(
            &EffectiveProfile::Legacy,
            &ws,
            None,
            &HashMap::new(),
            &parent_env(),
            40_001,
        );
        assert_eq!(env["AWS_SECRET_ACCESS_KEY"], "leak-me-not");
        assert_eq!(env["PORT"], "40001");
        assert_eq!(env["MCP_WORKSPACE_PROJECT_ROOT"], "/proj");
    }

    #[test]
    fn default_profile_admits_nothing_from_parent() {
        let ws = workspace("w", Some("/proj"));
        let env = compose(
            &profile(
                EnvPermissions::default(),
                ContextPermissions::default(),
                SecretPermissions::default(),
            ),
            &ws,
            None,
            &HashMap::from([("SECRET_TOKEN".into(), "t".into())]),
            &parent_env(),
            40_002,
        );
        // Only the always-set pair.
        assert_eq!(env.len(), 2);
        assert_eq!(env["PORT"], "40002");
        assert_eq!(env["MCP_WORKSPACE_PROJECT_ROOT"], "/proj");
    }

    #[test]
    fn allow_flags_copy_their_sets() {
        let ws = workspace("w", None);
        let env = compose(
            &profile(
                EnvPermissions {
                    allow_path: true,
                    allow_lang: true,
                    ..Default::default()
                },
                ContextPermissions::default(),
                SecretPermissions::default(),
            ),
            &ws,
            None,
            &HashMap::new(),
            &parent_env(),
            40_003,
        );
        assert_eq!(env["PATH"], "/usr/bin");
        assert_eq!(env["LANG"], "en_US.UTF-8");
        assert!(!env.contains_key("HOME"));
        assert!(!env.contains_key("TMPDIR"));
    }

    #[test]
    fn allow_node_matches_prefixes() {
        let ws = workspace("w", None);
        let env = compose(
            &profile(
                EnvPermissions {
                    allow_node: true,
                    ..Default::default()
                },
                ContextPermissions::default(),
                SecretPermissions::default(),
            ),
            &ws,
            None,
            &HashMap::new(),
            &parent_env(),
            40_004,
        );
        assert!(env.contains_key("NODE_OPTIONS"));
        assert!(env.contains_key("npm_config_registry"));
        assert!(!env.contains_key("EDITOR"));
    }

    #[test]
    fn custom_allowlist_copies_exact_names() {
        let ws = workspace("w", None);
        let env = compose(
            &profile(
                EnvPermissions {
                    custom_allowlist: vec!["EDITOR".into(), "MISSING".into()],
                    ..Default::default()
                },
                ContextPermissions::default(),
                SecretPermissions::default(),
            ),
            &ws,
            None,
            &HashMap::new(),
            &parent_env(),
            40_005,
        );
        assert_eq!(env["EDITOR"], "vi");
        assert!(!env.contains_key("MISSING"));
    }

    #[test]
    fn context_values_respect_flags_and_global() {
        let user = UserProfile {
            full_name: "Ada".into(),
            email: "ada@example.com".into(),
        };
        let context = ContextPermissions {
            allow_project_root: true,
            allow_workspace_id: true,
            allow_user_profile: true,
        };

        let ws = workspace("w1", Some("/proj"));
        let env = compose(
            &profile(EnvPermissions::default(), context.clone(), SecretPermissions::default()),
            &ws,
            Some(&user),
            &HashMap::new(),
            &HashMap::new(),
            40_006,
        );
        assert_eq!(env["MCP_PROJECT_ROOT"], "/proj");
        assert_eq!(env["MCP_WORKSPACE_ID"], "w1");
        let token: serde_json::Value = serde_json::from_str(&env["MCP_AUTH_TOKEN"]).unwrap();
        assert_eq!(token["email"], "ada@example.com");

        // Global workspace: no project root to inject.
        let global = workspace("global", None);
        let env = compose(
            &profile(EnvPermissions::default(), context, SecretPermissions::default()),
            &global,
            None,
            &HashMap::new(),
            &HashMap::new(),
            40_007,
        );
        assert!(!env.contains_key("MCP_PROJECT_ROOT"));
        assert!(!env.contains_key("MCP_WORKSPACE_PROJECT_ROOT"));
        assert_eq!(env["MCP_WORKSPACE_ID"], "global");
        // No user profile stored: no token even though allowed.
        assert!(!env.contains_key("MCP_AUTH_TOKEN"));
    }

    #[test]
    fn secret_modes() {
        let ws = workspace("w", None);
        let secrets = HashMap::from([
            ("SECRET_TOKEN".into(), "C".into()),
            ("SECRET_OTHER".into(), "x".into()),
        ]);

        let none = compose(
            &profile(EnvPermissions::default(), ContextPermissions::default(), SecretPermissions {
                mode: SecretMode::None,
                allowlist: vec!["SECRET_TOKEN".into()],
            }),
            &ws, None, &secrets, &HashMap::new(), 1,
        );
        assert!(!none.contains_key("SECRET_TOKEN"));

        let allowlist = compose(
            &profile(EnvPermissions::default(), ContextPermissions::default(), SecretPermissions {
                mode: SecretMode::Allowlist,
                allowlist: vec!["SECRET_TOKEN".into()],
            }),
            &ws, None, &secrets, &HashMap::new(), 1,
        );
        assert_eq!(allowlist["SECRET_TOKEN"], "C");
        assert!(!allowlist.contains_key("SECRET_OTHER"));

        let all = compose(
            &profile(EnvPermissions::default(), ContextPermissions::default(), SecretPermissions {
                mode: SecretMode::All,
                allowlist: Vec::new(),
            }),
            &ws, None, &secrets, &HashMap::new(), 1,
        );
        assert_eq!(all["SECRET_TOKEN"], "C");
        assert_eq!(all["SECRET_OTHER"], "x");
    }

    /// No parent variable outside the permitted set may appear for a
    /// non-legacy profile, whatever combination of flags is on.
    #[test]
    fn composed_env_never_exceeds_permitted_set() {
        let ws = workspace("w", Some("/proj"));
        let parent = parent_env();
        let flag_sets = [
            EnvPermissions::default(),
            EnvPermissions { allow_path: true, ..Default::default() },
            EnvPermissions { allow_home: true, allow_temp: true, ..Default::default() },
            EnvPermissions { allow_node: true, custom_allowlist: vec!["EDITOR".into()], ..Default::default() },
            EnvPermissions {
                allow_path: true,
                allow_home: true,
                allow_lang: true,
                allow_temp: true,
                allow_node: true,
                custom_allowlist: vec!["EDITOR".into()],
            },
        ];
        for flags in flag_sets {
            let permitted: std::collections::HashSet<String> = {
                let mut p: std::collections::HashSet<String> = std::collections::HashSet::new();
                if flags.allow_path { p.extend(PATH_VARS.iter().map(|s| s.to_string())); }
                if flags.allow_home { p.extend(HOME_VARS.iter().map(|s| s.to_string())); }
                if flags.allow_lang { p.extend(LANG_VARS.iter().map(|s| s.to_string())); }
                if flags.allow_temp { p.extend(TEMP_VARS.iter().map(|s| s.to_string())); }
                if flags.allow_node {
                    p.extend(parent.keys().filter(|k| {
                        NODE_PREFIXES.iter().any(|pre| k.starts_with(pre))
                    }).cloned());
                }
                p.extend(flags.custom_allowlist.iter().cloned());
                p
            };
            let env = compose(
                &profile(flags, ContextPermissions::default(), SecretPermissions::default()),
                &ws, None, &HashMap::new(), &parent, 9,
            );
            for key in env.keys() {
                let always = key == "PORT" || key == "MCP_WORKSPACE_PROJECT_ROOT";
                assert!(
                    always || permitted.contains(key),
                    "unexpected variable {key} leaked"
                );
            }
        }
    }
}
