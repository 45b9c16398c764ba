//! Group and access policy resolution.
//!
//! Groups live as `id = members` keys of the `groups` section with optional
//! display names in `display`; access policies use the `access` section.
//! Members are re-validated on every read against the provisioned lines.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::line::is_extension;
use crate::store::LayeredConfig;

pub const GROUP_TYPE: &str = "group";
pub const ACCESS_TYPE: &str = "access";

/// Group that resolves even without a `groups` entry.
pub const SYSTEM_GROUP: &str = "system";

/// A named collection of extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Group {
    #[serde(skip)]
    pub id: String,
    pub display: String,
    #[serde(rename = "type")]
    pub group_type: String,
    pub members: Vec<u32>,
}

/// Group and policy ids must not look like extension numbers: numeric ids
/// below 100 are refused.
pub fn is_group_id(id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    if id.bytes().all(|b| b.is_ascii_digit()) {
        return id.parse::<u64>().map_or(true, |n| n >= 100);
    }
    true
}

pub fn group(config: &LayeredConfig, id: &str) -> Option<Group> {
    if !is_group_id(id) {
        return None;
    }
    fetch_group(config, &id.to_lowercase())
}

/// A group of that id if one exists, else an access policy.
pub fn policy(config: &LayeredConfig, id: &str) -> Option<Group> {
    if !is_group_id(id) {
        return None;
    }
    let id = id.to_lowercase();
    fetch_group(config, &id).or_else(|| fetch_policy(config, &id))
}

pub fn all_groups(config: &LayeredConfig) -> BTreeMap<String, Group> {
    let mut out = BTreeMap::new();
    collect(config, "groups", fetch_group, &mut out);
    out
}

/// Policies and groups together; a group replaces a policy of the same id.
pub fn all_policies(config: &LayeredConfig) -> BTreeMap<String, Group> {
    let mut out = BTreeMap::new();
    collect(config, "access", fetch_policy, &mut out);
    collect(config, "groups", fetch_group, &mut out);
    out
}

/// Extension numbers named in a member list, in order, each at most once.
/// Tokens that are not provisioned extensions are dropped.
pub fn parse_members(config: &LayeredConfig, members: &str) -> Vec<u32> {
    let mut out: Vec<u32> = Vec::new();
    let tokens = members
        .split([',', ';', ':', ' ', '\t'])
        .filter(|token| !token.is_empty());
    for token in tokens {
        let Ok(member) = token.parse::<u32>() else {
            continue;
        };
        if !is_extension(member) || !config.has_line(member) {
            continue;
        }
        if !out.contains(&member) {
            out.push(member);
        }
    }
    out
}

fn collect(
    config: &LayeredConfig,
    section: &str,
    fetch: fn(&LayeredConfig, &str) -> Option<Group>,
    out: &mut BTreeMap<String, Group>,
) {
    let Some(section) = config.section(section) else {
        return;
    };
    for id in section.keys() {
        if let Some(group) = fetch(config, id) {
            out.insert(id.to_string(), group);
        }
    }
}

fn fetch_group(config: &LayeredConfig, id: &str) -> Option<Group> {
    let members = config.section("groups").and_then(|s| s.get(id));
    let Some(members) = members else {
        return (id == SYSTEM_GROUP).then(|| Group {
            id: id.to_string(),
            group_type: GROUP_TYPE.to_string(),
            ..Group::default()
        });
    };
    let display = config
        .section("display")
        .and_then(|s| s.get(id))
        .unwrap_or_default();
    Some(Group {
        id: id.to_string(),
        display: display.to_string(),
        group_type: GROUP_TYPE.to_string(),
        members: parse_members(config, members),
    })
}

fn fetch_policy(config: &LayeredConfig, id: &str) -> Option<Group> {
    let members = config.section("access")?.get(id)?;
    Some(Group {
        id: id.to_string(),
        display: String::new(),
        group_type: ACCESS_TYPE.to_string(),
        members: parse_members(config, members),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ini::IniDocument;
    use crate::settings::DirectoryPaths;

    fn config(site: &str) -> LayeredConfig {
        LayeredConfig::from_layers(
            DirectoryPaths::default(),
            [
                IniDocument::new(),
                IniDocument::parse(site).unwrap(),
                IniDocument::new(),
                IniDocument::new(),
            ],
        )
    }

    const SITE: &str = "\
[15]
display = Front
[20]
display = Back
[groups]
sales = 15, 999, abc, 20
lobby = 20;15:20
[display]
sales = Sales Team
[access]
night = 20
sales = 15
";

    #[test]
    fn test_member_filtering() {
        let config = config(SITE);
        assert_eq!(parse_members(&config, "15, 999, abc, 20"), vec![15, 20]);
        assert_eq!(parse_members(&config, "20;15:20\t15"), vec![20, 15]);
        assert_eq!(parse_members(&config, "30 9 -15"), Vec::<u32>::new());
        assert!(parse_members(&config, "").is_empty());
    }

    #[test]
    fn test_group_lookup() {
        let config = config(SITE);
        let sales = group(&config, "sales").unwrap();
        assert_eq!(sales.display, "Sales Team");
        assert_eq!(sales.group_type, "group");
        assert_eq!(sales.members, vec![15, 20]);
        assert!(group(&config, "night").is_none());
        assert!(group(&config, "15").is_none());
        assert!(group(&config, "").is_none());
    }

    #[test]
    fn test_system_fallback() {
        let config = config(SITE);
        let system = group(&config, "system").unwrap();
        assert_eq!(system.group_type, "group");
        assert!(system.members.is_empty());
        assert!(system.display.is_empty());
    }

    #[test]
    fn test_policy_prefers_group() {
        let config = config(SITE);
        assert_eq!(policy(&config, "sales").unwrap().group_type, "group");
        let night = policy(&config, "night").unwrap();
        assert_eq!(night.group_type, "access");
        assert_eq!(night.members, vec![20]);
    }

    #[test]
    fn test_all_policies_merge() {
        let config = config(SITE);
        let groups = all_groups(&config);
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["lobby", "sales"]);

        let policies = all_policies(&config);
        assert_eq!(policies.len(), 3);
        assert_eq!(policies["sales"].group_type, "group");
        assert_eq!(policies["night"].group_type, "access");
    }

    #[test]
    fn test_group_ids() {
        assert!(is_group_id("system"));
        assert!(is_group_id("100"));
        assert!(is_group_id("sales2"));
        assert!(!is_group_id("99"));
        assert!(!is_group_id("42"));
        assert!(!is_group_id(""));
    }

    #[test]
    fn test_json_shape() {
        let config = config(SITE);
        let json = serde_json::to_value(group(&config, "sales").unwrap()).unwrap();
        assert_eq!(json["type"], "group");
        assert_eq!(json["display"], "Sales Team");
        assert_eq!(json["members"], serde_json::json!([15, 20]));
        assert!(json.get("id").is_none());
    }
}
