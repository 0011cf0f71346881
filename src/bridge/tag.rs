//! Sender tags carried in the bus `sender` field.
//!
//! Platform adapters publish `<name>＠<letter>!integration@integrations/<type>/<id>`,
//! applications publish `<name>+!app@apps/<slug>/<originId>`. Anything else
//! (plain IRC `nick!user@host`) is a human sender.

use std::fmt;

use crate::common::types::IntegrationKind;

const INTEGRATION_MARKER: char = '＠';
const APP_MARKER: char = '+';
const MAX_NICK_CHARS: usize = 16;

/// Where a bus message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Human,
    Integration { kind: IntegrationKind, id: i64 },
    Application { slug: String, origin_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderTag {
    pub name: String,
    pub origin: Origin,
}

impl SenderTag {
    pub fn integration(name: &str, kind: IntegrationKind, id: i64) -> Self {
        Self {
            name: sanitize_nickname(name),
            origin: Origin::Integration { kind, id },
        }
    }

    pub fn application(name: &str, slug: &str, origin_id: &str) -> Self {
        Self {
            name: sanitize_nickname(name),
            origin: Origin::Application {
                slug: slug.to_string(),
                origin_id: origin_id.to_string(),
            },
        }
    }

    /// Parse a bus sender. Never fails; unknown shapes are human senders.
    pub fn parse(sender: &str) -> Self {
        let (head, rest) = sender.split_once('!').unwrap_or((sender, ""));

        if let Some((name, origin)) = parse_integration(head, rest) {
            return Self {
                name: name.to_string(),
                origin,
            };
        }

        if let Some(origin) = parse_application(head, rest) {
            return Self {
                name: head.trim_end_matches(APP_MARKER).to_string(),
                origin,
            };
        }

        Self {
            name: head.to_string(),
            origin: Origin::Human,
        }
    }

    /// True if an adapter of `kind` produced this message.
    pub fn is_from(&self, kind: IntegrationKind) -> bool {
        matches!(self.origin, Origin::Integration { kind: k, .. } if k == kind)
    }

    /// Name shown on other platforms. Platform senders keep their marker so
    /// readers can tell where they are.
    pub fn display_name(&self) -> String {
        match &self.origin {
            Origin::Integration { kind, .. } => {
                format!("{}{}{}", self.name, INTEGRATION_MARKER, platform_letter(*kind))
            }
            _ => self.name.clone(),
        }
    }

    /// Identifier shown to gateway clients: the app slug, or `*`.
    pub fn display_origin(&self) -> &str {
        match &self.origin {
            Origin::Application { slug, .. } => slug,
            _ => "*",
        }
    }
}

fn platform_letter(kind: IntegrationKind) -> char {
    match kind {
        IntegrationKind::Discord => 'd',
        IntegrationKind::Slack => 's',
    }
}

fn parse_integration<'a>(head: &'a str, rest: &str) -> Option<(&'a str, Origin)> {
    let path = rest.strip_prefix("integration@integrations/")?;
    let (kind, id) = path.split_once('/')?;
    let kind: IntegrationKind = kind.parse().ok()?;

    let name = head
        .strip_suffix(platform_letter(kind))?
        .strip_suffix(INTEGRATION_MARKER)?;

    Some((
        name,
        Origin::Integration {
            kind,
            id: id.parse().ok()?,
        },
    ))
}

fn parse_application(head: &str, rest: &str) -> Option<Origin> {
    if !head.ends_with(APP_MARKER) {
        return None;
    }
    let path = rest.strip_prefix("app@apps/")?;
    let (slug, origin_id) = path.split_once('/')?;

    Some(Origin::Application {
        slug: slug.to_string(),
        origin_id: origin_id.to_string(),
    })
}

impl fmt::Display for SenderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Origin::Integration { kind, id } => write!(
                f,
                "{}{}{}!integration@integrations/{}/{}",
                self.name,
                INTEGRATION_MARKER,
                platform_letter(*kind),
                kind,
                id
            ),
            Origin::Application { slug, origin_id } => write!(
                f,
                "{}{}!app@apps/{}/{}",
                self.name, APP_MARKER, slug, origin_id
            ),
            Origin::Human => f.write_str(&self.name),
        }
    }
}

/// Reduce a display name to characters the IRC side accepts.
///
/// Keeps ASCII letters and digits, Hangul syllables, `_`, `-` and `.`, and
/// cuts to 16 characters. Falls back to `user`.
pub fn sanitize_nickname(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric()
                || ('\u{AC00}'..='\u{D7A3}').contains(c)
                || matches!(c, '_' | '-' | '.')
        })
        .take(MAX_NICK_CHARS)
        .collect();

    if cleaned.is_empty() {
        "user".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integration_tag_format() {
        let tag = SenderTag::integration("alice", IntegrationKind::Discord, 12);
        assert_eq!(tag.to_string(), "alice＠d!integration@integrations/discord/12");

        let tag = SenderTag::integration("bob", IntegrationKind::Slack, 3);
        assert_eq!(tag.to_string(), "bob＠s!integration@integrations/slack/3");
    }

    #[test]
    fn test_application_tag_format() {
        let tag = SenderTag::application("bot", "weather", "c4");
        assert_eq!(tag.to_string(), "bot+!app@apps/weather/c4");
    }

    #[test]
    fn test_parse_integration_tag() {
        let tag = SenderTag::parse("alice＠d!integration@integrations/discord/12");
        assert_eq!(tag.name, "alice");
        assert_eq!(
            tag.origin,
            Origin::Integration {
                kind: IntegrationKind::Discord,
                id: 12
            }
        );
        assert!(tag.is_from(IntegrationKind::Discord));
        assert!(!tag.is_from(IntegrationKind::Slack));
        assert_eq!(tag.display_origin(), "*");
        assert_eq!(tag.display_name(), "alice＠d");
    }

    #[test]
    fn test_parse_application_tag() {
        let tag = SenderTag::parse("bot+!app@apps/weather/http");
        assert_eq!(tag.name, "bot");
        assert_eq!(tag.display_origin(), "weather");
        assert!(!tag.is_from(IntegrationKind::Discord));
    }

    #[test]
    fn test_irc_user_is_human() {
        let tag = SenderTag::parse("nick!user@irc.example.org");
        assert_eq!(tag.name, "nick");
        assert_eq!(tag.origin, Origin::Human);

        assert_eq!(SenderTag::parse("plain").origin, Origin::Human);
    }

    #[test]
    fn test_mismatched_marker_is_human() {
        // Slack letter with a Discord path is not a valid integration tag.
        let tag = SenderTag::parse("x＠s!integration@integrations/discord/1");
        assert_eq!(tag.origin, Origin::Human);
    }

    #[test]
    fn test_sanitize_nickname() {
        assert_eq!(sanitize_nickname("Alice Smith!"), "AliceSmith");
        assert_eq!(sanitize_nickname("한글이름_ok"), "한글이름_ok");
        assert_eq!(sanitize_nickname("a.very-long_name.that.goes"), "a.very-long_name");
        assert_eq!(sanitize_nickname("@@@"), "user");
    }
}
