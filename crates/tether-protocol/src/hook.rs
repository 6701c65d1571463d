//! Hook names
//!
//! Hooks are broadcasts from the host into guests, namespaced by domain.
//! On the wire a hook travels as `{namespace: "hook:<domain>", type: "<event>"}`;
//! the flat string form `hook:<domain>:<event>` is accepted for inbound
//! call types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Hook domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookDomain {
    #[serde(rename = "hook:app")]
    App,
    #[serde(rename = "hook:editor")]
    Editor,
}

impl HookDomain {
    pub fn namespace(&self) -> &'static str {
        match self {
            HookDomain::App => "hook:app",
            HookDomain::Editor => "hook:editor",
        }
    }
}

/// A namespaced hook event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hook {
    #[serde(rename = "namespace")]
    pub domain: HookDomain,
    #[serde(rename = "type")]
    pub event: String,
}

impl Hook {
    /// Create a hook; the event name is normalised to snake_case.
    pub fn new(domain: HookDomain, event: &str) -> Self {
        Self {
            domain,
            event: to_snake_case(event),
        }
    }

    pub fn app(event: &str) -> Self {
        Self::new(HookDomain::App, event)
    }

    pub fn editor(event: &str) -> Self {
        Self::new(HookDomain::Editor, event)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain.namespace(), self.event)
    }
}

impl FromStr for Hook {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("hook:")
            .ok_or_else(|| format!("not a hook name: {s}"))?;
        let (domain, event) = rest
            .split_once(':')
            .ok_or_else(|| format!("hook name without event: {s}"))?;
        let domain = match domain {
            "app" => HookDomain::App,
            "editor" => HookDomain::Editor,
            other => return Err(format!("unknown hook domain: {other}")),
        };
        if event.is_empty() {
            return Err(format!("hook name without event: {s}"));
        }
        Ok(Hook::new(domain, event))
    }
}

/// Convert `camelCase`, `PascalCase`, `kebab-case` or spaced names to `snake_case`.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower_or_digit = false;

    for ch in name.chars() {
        if ch == '-' || ch == ' ' || ch == '_' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower_or_digit = false;
        } else if ch.is_uppercase() {
            if prev_lower_or_digit && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(ch);
            prev_lower_or_digit = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }

    out.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("onRouteChanged"), "on_route_changed");
        assert_eq!(to_snake_case("BlockChanged"), "block_changed");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case("kebab-case name"), "kebab_case_name");
        assert_eq!(to_snake_case("page2Loaded"), "page2_loaded");
    }

    #[test]
    fn test_hook_parse_and_display() {
        let hook: Hook = "hook:editor:onInputSelectionEnd".parse().unwrap();
        assert_eq!(hook.domain, HookDomain::Editor);
        assert_eq!(hook.event, "on_input_selection_end");
        assert_eq!(hook.to_string(), "hook:editor:on_input_selection_end");

        assert!("app:route".parse::<Hook>().is_err());
        assert!("hook:ui:thing".parse::<Hook>().is_err());
        assert!("hook:app:".parse::<Hook>().is_err());
    }

    #[test]
    fn test_hook_wire_shape() {
        let json = serde_json::to_value(Hook::app("routeChanged")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"namespace": "hook:app", "type": "route_changed"})
        );
    }
}
