//! Shared helpers for command handlers.

use std::path::Path;

use netconf_core::NodePath;
use netconf_proto::{QName, XmlElement};

use crate::error::CliError;

/// Read one XML element from `path`.
pub fn read_xml(path: &Path) -> Result<XmlElement, CliError> {
    let raw = std::fs::read_to_string(path)?;
    XmlElement::parse(&raw).map_err(|e| CliError::Xml {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

pub fn parse_path(raw: &str) -> Result<NodePath, CliError> {
    raw.parse().map_err(|e: netconf_core::CodecError| CliError::Validation {
        field: "path".into(),
        reason: e.to_string(),
    })
}

/// Parse `{namespace}list=key` into list and key names.
pub fn parse_list_key(raw: &str) -> Result<(QName, QName), CliError> {
    let invalid = |reason: &str| CliError::Validation {
        field: "list-key".into(),
        reason: format!("'{raw}': {reason}"),
    };

    let rest = raw
        .strip_prefix('{')
        .ok_or_else(|| invalid("expected {namespace}list=key"))?;
    let (namespace, rest) = rest
        .split_once('}')
        .ok_or_else(|| invalid("unterminated namespace"))?;
    let (list, key) = rest
        .split_once('=')
        .ok_or_else(|| invalid("expected list=key"))?;
    if list.is_empty() || key.is_empty() {
        return Err(invalid("list and key must not be empty"));
    }
    Ok((QName::new(namespace, list), QName::new(namespace, key)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_keys() {
        let (list, key) = parse_list_key("{urn:example}user=name").unwrap();
        assert_eq!(list, QName::new("urn:example", "user"));
        assert_eq!(key, QName::new("urn:example", "name"));

        assert!(parse_list_key("user=name").is_err());
        assert!(parse_list_key("{urn:example}user").is_err());
        assert!(parse_list_key("{urn:example}=name").is_err());
    }
}
