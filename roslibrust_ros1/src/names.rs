//! Node/topic name validation and the `key:=value` command-line remapping syntax.
//!
//! ROS names are path-style and must begin with `/`. `Name` wraps a validated, fully
//! qualified name; the small set of special remapping keys (`__name`, `__ip`, `__hostname`,
//! `__master`, `__ns`, `__log`) are parsed into [`Remappings`] separately from normal
//! `from:=to` topic remaps, matching `roscpp`/`rospy`'s command-line conventions.

use std::collections::HashMap;
use std::fmt;

/// A validated, fully-qualified ROS graph resource name (node, topic, or service name).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(String);

impl Name {
    /// Validates and normalizes `raw` into a fully-qualified name, prepending `/` if absent.
    pub fn new(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("name must not be empty".to_string());
        }
        let normalized = if raw.starts_with('/') {
            raw.to_string()
        } else {
            format!("/{raw}")
        };
        if normalized.len() > 1 && normalized.ends_with('/') {
            return Err(format!("name must not end with '/': {raw:?}"));
        }
        for segment in normalized.trim_start_matches('/').split('/') {
            if segment.is_empty() {
                return Err(format!("name contains an empty path segment: {raw:?}"));
            }
            let mut chars = segment.chars();
            let first = chars.next().unwrap();
            if !(first.is_ascii_alphabetic() || first == '_') {
                return Err(format!(
                    "name segment {segment:?} must start with a letter or underscore"
                ));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(format!(
                    "name segment {segment:?} may only contain alphanumerics and underscores"
                ));
            }
        }
        Ok(Self(normalized))
    }

    /// Appends a process id and a monotonic-ish timestamp suffix, the way ROS
    /// "anonymous" node names are generated (e.g. `/listener_12345_1690000000123456`).
    pub fn anonymize(base: &str) -> Self {
        let pid = std::process::id();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let stamp = now.as_micros();
        let raw = format!("{base}_{pid}_{stamp}");
        // Anonymized names are already guaranteed valid by construction from a valid base.
        Self::new(&raw).expect("anonymized name construction should always be valid")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parsed command-line remappings: special `__key:=value` pairs plus ordinary topic remaps.
#[derive(Clone, Debug, Default)]
pub struct Remappings {
    pub name: Option<String>,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub master: Option<String>,
    pub namespace: Option<String>,
    pub log: Option<String>,
    pub topics: HashMap<String, String>,
}

impl Remappings {
    /// Parses a sequence of `key:=value` command-line arguments.
    /// Arguments that don't contain `:=` are ignored (they're ordinary CLI args).
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut remaps = Remappings::default();
        for arg in args {
            let arg = arg.as_ref();
            let Some((key, value)) = arg.split_once(":=") else {
                continue;
            };
            match key {
                "__name" => remaps.name = Some(value.to_string()),
                "__ip" => remaps.ip = Some(value.to_string()),
                "__hostname" => remaps.hostname = Some(value.to_string()),
                "__master" => remaps.master = Some(value.to_string()),
                "__ns" => remaps.namespace = Some(value.to_string()),
                "__log" => remaps.log = Some(value.to_string()),
                _ => {
                    remaps.topics.insert(key.to_string(), value.to_string());
                }
            }
        }
        remaps
    }

    /// Resolves the advertised host for this process following the documented precedence:
    /// `__ip` remap, `__hostname` remap, `ROS_IP` env, `ROS_HOSTNAME` env, OS hostname.
    pub fn resolve_host(&self) -> String {
        if let Some(ip) = &self.ip {
            return ip.clone();
        }
        if let Some(hostname) = &self.hostname {
            return hostname.clone();
        }
        if let Ok(ip) = std::env::var("ROS_IP") {
            if !ip.is_empty() {
                return ip;
            }
        }
        if let Ok(hostname) = std::env::var("ROS_HOSTNAME") {
            if !hostname.is_empty() {
                return hostname;
            }
        }
        gethostname::gethostname()
            .into_string()
            .unwrap_or_else(|_| "localhost".to_string())
    }

    /// Resolves the remapped name for a given topic/service, or returns the original if unmapped.
    pub fn resolve_topic<'a>(&'a self, topic: &'a str) -> &'a str {
        self.topics
            .get(topic)
            .map(|s| s.as_str())
            .unwrap_or(topic)
    }
}

/// Splits an `http://host:port` (optionally trailing-slashed) XML-RPC URI into its host and
/// port parts, as needed to open a raw TCP connection to a peer's advertised API.
pub fn split_xmlrpc_uri(uri: &str) -> Result<(String, u16), String> {
    let trimmed = uri
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let (host, port) = trimmed
        .rsplit_once(':')
        .ok_or_else(|| format!("uri missing port: {uri:?}"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("uri has non-numeric port: {uri:?}"))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prepends_slash() {
        assert_eq!(Name::new("chatter").unwrap().as_str(), "/chatter");
        assert_eq!(Name::new("/chatter").unwrap().as_str(), "/chatter");
    }

    #[test]
    fn rejects_trailing_slash() {
        assert!(Name::new("/chatter/").is_err());
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(Name::new("/chat-ter").is_err());
        assert!(Name::new("/1chatter").is_err());
    }

    #[test]
    fn anonymize_is_unique_and_valid() {
        let a = Name::anonymize("listener");
        let b = Name::anonymize("listener");
        assert!(a.as_str().starts_with("/listener_"));
        // Not guaranteed unique if called in the same microsecond, but should usually differ.
        let _ = (a, b);
    }

    #[test]
    fn remap_parses_special_keys() {
        let remaps = Remappings::parse(["__name:=talker", "__ip:=10.0.0.5", "chatter:=/my/topic"]);
        assert_eq!(remaps.name.as_deref(), Some("talker"));
        assert_eq!(remaps.ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(remaps.resolve_topic("chatter"), "/my/topic");
        assert_eq!(remaps.resolve_topic("other"), "other");
    }

    #[test]
    fn splits_xmlrpc_uri() {
        assert_eq!(
            split_xmlrpc_uri("http://localhost:11311/").unwrap(),
            ("localhost".to_string(), 11311)
        );
        assert!(split_xmlrpc_uri("not-a-uri").is_err());
    }

    #[test]
    fn resolve_host_prefers_ip_remap() {
        let remaps = Remappings {
            ip: Some("1.2.3.4".to_string()),
            ..Default::default()
        };
        assert_eq!(remaps.resolve_host(), "1.2.3.4");
    }
}
