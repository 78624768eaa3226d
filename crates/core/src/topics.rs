// Topic layout helpers for the event and control namespaces on the bus.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

pub const DEFAULT_EVENT_PREFIX: &str = "/isy/event";
pub const DEFAULT_CONTROL_PREFIX: &str = "/isy/control";

// Characters escaped when a node address is embedded in a REST path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Controller wire address (`1E 4 58 1`) to bus form (`1E.4.58.1`).
pub fn normalize_node(address: &str) -> String {
    address.trim().replace(' ', ".")
}

/// Bus form (`1E.4.58.1`) to an escaped REST path segment (`1E%204%2058%201`).
pub fn escape_node(node: &str) -> String {
    let spaced = node.trim().replace('.', " ");
    utf8_percent_encode(&spaced, PATH_SEGMENT).to_string()
}

fn trim_prefix(prefix: &str) -> &str {
    prefix.trim_end_matches('/')
}

pub fn event_topic(prefix: &str, node: &str, suffix: &str) -> String {
    format!("{}/{}/{}", trim_prefix(prefix), node, suffix)
}

pub fn control_wildcard(prefix: &str) -> String {
    format!("{}/#", trim_prefix(prefix))
}

/// Node and optional verb addressed by a message on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTopic {
    pub node: String,
    pub verb: Option<String>,
}

/// Expect: {prefix}/{node}[/{verb}]. Anything past the verb is ignored.
pub fn parse_control_topic(prefix: &str, topic: &str) -> Option<ControlTopic> {
    let rest = topic.strip_prefix(trim_prefix(prefix))?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let node = parts.next().filter(|n| !n.is_empty())?.to_string();
    let verb = parts.next().filter(|v| !v.is_empty()).map(str::to_string);
    Some(ControlTopic { node, verb })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_forms() {
        assert_eq!(normalize_node("1E 4 58 1"), "1E.4.58.1");
        assert_eq!(escape_node("1E.4.58.1"), "1E%204%2058%201");
        assert_eq!(escape_node("1E 4 58 1"), "1E%204%2058%201");
        assert_eq!(escape_node("0032"), "0032");
    }

    #[test]
    fn builds_topics_without_doubled_separators() {
        assert_eq!(event_topic("/isy/event/", "1E.4.58.1", "st"), "/isy/event/1E.4.58.1/st");
        assert_eq!(control_wildcard("/isy/control"), "/isy/control/#");
    }

    #[test]
    fn parses_control_topics() {
        assert_eq!(
            parse_control_topic("/isy/control", "/isy/control/1E.4.58.1/secmd"),
            Some(ControlTopic { node: "1E.4.58.1".into(), verb: Some("secmd".into()) })
        );
        assert_eq!(
            parse_control_topic("/isy/control", "/isy/control/1E.4.58.1"),
            Some(ControlTopic { node: "1E.4.58.1".into(), verb: None })
        );
        assert_eq!(parse_control_topic("/isy/control", "/isy/controller/x"), None);
        assert_eq!(parse_control_topic("/isy/control", "/isy/control/"), None);
        assert_eq!(parse_control_topic("/isy/control", "/isy/event/1E.4.58.1/st"), None);
    }
}
