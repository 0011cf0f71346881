//! Message transformation between platform markup and plain bus text.
//!
//! Inbound: platform mentions become `@name`, fenced code is flattened to
//! one backticked line per code line, Slack link and entity markup is undone
//! and attachment URLs are appended. Outbound: entities are re-encoded where
//! the platform expects them and known display names become native mentions.

use std::collections::HashMap;

use fancy_regex::Regex;
use tracing::debug;

use crate::common::types::DirectoryEntry;

/// Messages with more lines than this go to a snippet.
pub const MAX_INLINE_LINES: usize = 5;

/// Markup flavour of a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Discord,
    Slack,
}

/// Result of inbound normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Non-empty lines to publish one by one.
    Lines(Vec<String>),
    /// Full text that must be stored as a snippet.
    Long(String),
}

/// Compiled patterns for both directions.
#[derive(Debug, Clone)]
pub struct MessagePipeline {
    /// Discord user mentions (<@123> or <@!123>).
    discord_mention: Regex,
    /// Slack user mentions (<@U123> or <@U123|name>).
    slack_mention: Regex,
    /// Slack broadcast mentions (<!here>, <!channel>, <!everyone>).
    slack_special: Regex,
    /// Slack channel references (<#C123|name>).
    slack_channel: Regex,
    /// Slack labelled links (<url|label>).
    slack_labelled_link: Regex,
    /// Slack bare links (<url>).
    slack_link: Regex,
    /// Fenced code blocks, across lines.
    code_block: Regex,
}

impl Default for MessagePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagePipeline {
    pub fn new() -> Self {
        Self {
            discord_mention: Regex::new(r"<@!?(\d+)>").unwrap(),
            slack_mention: Regex::new(r"<@([UW][A-Z0-9]+)(?:\|([^>]*))?>").unwrap(),
            slack_special: Regex::new(r"<!(here|channel|everyone)(?:\|[^>]*)?>").unwrap(),
            slack_channel: Regex::new(r"<#[CG][A-Z0-9]+\|([^>]+)>").unwrap(),
            slack_labelled_link: Regex::new(r"<((?:https?|mailto):[^|>]+)\|([^>]+)>").unwrap(),
            slack_link: Regex::new(r"<((?:https?|mailto):[^|>]+)>").unwrap(),
            code_block: Regex::new(r"(?s)```(.+?)```").unwrap(),
        }
    }

    /// Replace platform mentions with `@<displayName>`.
    ///
    /// `names` maps user ids to display names. Discord mentions of unknown
    /// users are left alone; Slack falls back to the inline label.
    pub fn resolve_mentions(
        &self,
        dialect: Dialect,
        text: &str,
        names: &HashMap<String, String>,
    ) -> String {
        match dialect {
            Dialect::Discord => self
                .discord_mention
                .replace_all(text, |caps: &fancy_regex::Captures| -> String {
                    match names.get(&caps[1]) {
                        Some(name) => format!("@{}", name),
                        None => caps[0].to_string(),
                    }
                })
                .to_string(),
            Dialect::Slack => self
                .slack_mention
                .replace_all(text, |caps: &fancy_regex::Captures| -> String {
                    let name = names
                        .get(&caps[1])
                        .map(String::as_str)
                        .or_else(|| caps.get(2).map(|m| m.as_str()).filter(|s| !s.is_empty()))
                        .unwrap_or(&caps[1]);
                    format!("@{}", name)
                })
                .to_string(),
        }
    }

    /// User ids mentioned in Slack text, in order, without duplicates.
    pub fn slack_mentioned_ids(&self, text: &str) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for caps in self.slack_mention.captures_iter(text).flatten() {
            let id = caps[1].to_string();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Undo Slack channel, broadcast and link markup.
    pub fn strip_slack_markup(&self, text: &str) -> String {
        let text = self.slack_special.replace_all(text, "@$1");
        let text = self.slack_channel.replace_all(&text, "#$1");
        let text = self.slack_labelled_link.replace_all(&text, "$2");
        self.slack_link.replace_all(&text, "$1").to_string()
    }

    /// Flatten fenced code into one backticked line per code line. Blank code
    /// lines become empty quotes so the line count matches the source.
    pub fn reformat_code_blocks(&self, text: &str) -> String {
        self.code_block
            .replace_all(text, |caps: &fancy_regex::Captures| -> String {
                caps[1]
                    .trim()
                    .lines()
                    .map(|line| format!("`{}`", line))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .to_string()
    }

    /// Full inbound pass: platform text to bus lines.
    pub fn normalize_inbound(
        &self,
        dialect: Dialect,
        text: &str,
        names: &HashMap<String, String>,
        attachments: &[String],
    ) -> Normalized {
        let mut content = self.resolve_mentions(dialect, text, names);

        if dialect == Dialect::Slack {
            content = decode_entities(&self.strip_slack_markup(&content));
        }

        content = self.reformat_code_blocks(&content);

        for url in attachments {
            content.push('\n');
            content.push_str(url);
        }

        if content.lines().count() > MAX_INLINE_LINES {
            return Normalized::Long(content);
        }

        Normalized::Lines(
            content
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Outbound pass: bus text to platform text.
    pub fn specialize_outbound(
        &self,
        dialect: Dialect,
        text: &str,
        members: &[DirectoryEntry],
    ) -> String {
        let content = match dialect {
            Dialect::Slack => encode_entities(text),
            Dialect::Discord => text.to_string(),
        };
        specialize_mentions(&content, members)
    }
}

/// Replace `name` (optionally `@name`) together with the `:`, `,` or space
/// that follows it by `<@id>`, for every member. Case-sensitive.
///
/// Names that are substrings of other names or common words can misfire.
pub fn specialize_mentions(text: &str, members: &[DirectoryEntry]) -> String {
    let mut result = text.to_string();

    for member in members {
        if member.display_name.is_empty() {
            continue;
        }

        let pattern = format!(
            r"(?<![\w@])@?{}[:, ]",
            fancy_regex::escape(&member.display_name)
        );
        let regex = match Regex::new(&pattern) {
            Ok(regex) => regex,
            Err(e) => {
                debug!("Skipping mention pattern for '{}': {}", member.display_name, e);
                continue;
            }
        };

        let mention = format!("<@{}>", member.id);
        result = regex.replace_all(&result, mention.as_str()).to_string();
    }

    result
}

/// Decode the three entities Slack escapes.
pub fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Encode the three entities Slack expects escaped.
pub fn encode_entities(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect()
    }

    fn lines(result: Normalized) -> Vec<String> {
        match result {
            Normalized::Lines(lines) => lines,
            Normalized::Long(text) => panic!("expected lines, got snippet: {}", text),
        }
    }

    #[test]
    fn test_discord_mentions_both_forms() {
        let pipeline = MessagePipeline::new();
        let result = pipeline.resolve_mentions(
            Dialect::Discord,
            "<@123> and <@!123> meet <@999>",
            &names(&[("123", "alice")]),
        );
        assert_eq!(result, "@alice and @alice meet <@999>");
    }

    #[test]
    fn test_slack_mentions_fall_back_to_label() {
        let pipeline = MessagePipeline::new();
        let result = pipeline.resolve_mentions(
            Dialect::Slack,
            "<@U1> <@U2|bob> <@U3>",
            &names(&[("U1", "alice")]),
        );
        assert_eq!(result, "@alice @bob @U3");
    }

    #[test]
    fn test_slack_mentioned_ids_are_unique() {
        let pipeline = MessagePipeline::new();
        assert_eq!(
            pipeline.slack_mentioned_ids("<@U1> hi <@W2|bob> <@U1>"),
            vec!["U1".to_string(), "W2".to_string()]
        );
    }

    #[test]
    fn test_slack_markup_and_entities() {
        let pipeline = MessagePipeline::new();
        let result = pipeline.normalize_inbound(
            Dialect::Slack,
            "<!here> see <#C01|ops> at <https://a.example/x|docs> or <https://b.example> &lt;3 &amp; more",
            &HashMap::new(),
            &[],
        );
        assert_eq!(
            lines(result),
            vec!["@here see #ops at docs or https://b.example <3 & more"]
        );
    }

    #[test]
    fn test_code_block_is_flattened() {
        let pipeline = MessagePipeline::new();
        let result = pipeline.reformat_code_blocks("look:\n```\nfn main() {\n\n}\n```");
        assert_eq!(result, "look:\n`fn main() {`\n``\n`}`");
    }

    #[test]
    fn test_attachments_are_trailing_lines() {
        let pipeline = MessagePipeline::new();
        let result = pipeline.normalize_inbound(
            Dialect::Discord,
            "photo",
            &HashMap::new(),
            &["https://cdn.example/a.png".to_string()],
        );
        assert_eq!(lines(result), vec!["photo", "https://cdn.example/a.png"]);
    }

    #[test]
    fn test_five_lines_inline_six_lines_snippet() {
        let pipeline = MessagePipeline::new();

        let five = "1\n2\n3\n4\n5";
        assert_eq!(
            lines(pipeline.normalize_inbound(Dialect::Discord, five, &HashMap::new(), &[])),
            vec!["1", "2", "3", "4", "5"]
        );

        let six = "1\n2\n3\n4\n5\n6";
        assert_eq!(
            pipeline.normalize_inbound(Dialect::Discord, six, &HashMap::new(), &[]),
            Normalized::Long(six.to_string())
        );
    }

    #[test]
    fn test_empty_lines_are_skipped() {
        let pipeline = MessagePipeline::new();
        let result = pipeline.normalize_inbound(Dialect::Discord, "a\n\nb", &HashMap::new(), &[]);
        assert_eq!(lines(result), vec!["a", "b"]);
    }

    #[test]
    fn test_specialize_requires_delimiter_and_case() {
        let members = vec![DirectoryEntry::new("42", "alice")];

        assert_eq!(specialize_mentions("alice: hi", &members), "<@42> hi");
        assert_eq!(specialize_mentions("hi alice, bye", &members), "hi <@42> bye");
        assert_eq!(specialize_mentions("@alice hi", &members), "<@42>hi");
        assert_eq!(specialize_mentions("Alice: hi", &members), "Alice: hi");
        assert_eq!(specialize_mentions("malice: hi", &members), "malice: hi");
        assert_eq!(specialize_mentions("bye alice", &members), "bye alice");
    }

    #[test]
    fn test_specialize_escapes_names() {
        let members = vec![DirectoryEntry::new("7", "a.b(c)")];
        assert_eq!(specialize_mentions("a.b(c): hello", &members), "<@7> hello");
        assert_eq!(specialize_mentions("axb(c) hello", &members), "axb(c) hello");
    }

    #[test]
    fn test_mention_round_trip() {
        let pipeline = MessagePipeline::new();
        let directory = vec![DirectoryEntry::new("123", "alice")];
        let ids = names(&[("123", "alice")]);

        let inbound = lines(pipeline.normalize_inbound(Dialect::Discord, "<@!123>: ping", &ids, &[]));
        assert_eq!(inbound, vec!["@alice: ping"]);

        let outbound = pipeline.specialize_outbound(Dialect::Discord, &inbound[0], &directory);
        assert_eq!(outbound, "<@123> ping");
    }

    #[test]
    fn test_slack_outbound_encodes_before_mentions() {
        let pipeline = MessagePipeline::new();
        let directory = vec![DirectoryEntry::new("U1", "bob")];
        let result = pipeline.specialize_outbound(Dialect::Slack, "bob, a<b & c", &directory);
        assert_eq!(result, "<@U1> a&lt;b &amp; c");
    }
}
