//! Prompt templates
//!
//! Every user prompt opens with a task marker line so transcripts (and test
//! doubles) can tell the stages apart.

use crate::models::{EventTagConfig, Language, ProfileConfig, ProfileEntry, UserProfileTopic};

pub const EXTRACT_TASK: &str = "[task:extract_profile]";
pub const ORGANIZE_TASK: &str = "[task:organize_profile]";
pub const RESUMMARIZE_TASK: &str = "[task:summarize_profile]";
pub const EVENT_SUMMARY_TASK: &str = "[task:summary_event]";
pub const EVENT_TAG_TASK: &str = "[task:tag_event]";

/// System + user message pair
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

fn language_rule(language: Language) -> String {
    format!("Write every content value in {}.", language.display_name())
}

fn render_schema(topics: &[UserProfileTopic]) -> String {
    topics
        .iter()
        .map(|topic| {
            let subs = topic
                .sub_topics
                .iter()
                .map(|s| match s.description() {
                    Some(d) => format!("{} ({})", s.name(), d),
                    None => s.name().to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            match &topic.description {
                Some(d) => format!("- {} ({}): {}", topic.topic, d, subs),
                None => format!("- {}: {}", topic.topic, subs),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fact extraction over a flushed batch. Expects a JSON object reply.
pub fn extract(config: &ProfileConfig, existing: &[ProfileEntry], conversation: &str) -> Prompt {
    let sep = &config.llm_tab_separator;
    let known = if existing.is_empty() {
        "(none)".to_string()
    } else {
        existing
            .iter()
            .map(|e| format!("- {}{}{}{}{}", e.topic, sep, e.sub_topic, sep, e.content))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let system = format!(
        "You extract durable personal facts about the user from conversations.\n\
         Only record facts the user states or clearly implies about themselves.\n\
         Prefer the topics and sub-topics below; create a new sub-topic only when none fits.\n\
         {}\n\n\
         Topics:\n{}\n\n\
         Reply with a JSON object: \
         {{\"facts\": [{{\"topic\": \"...\", \"sub_topic\": \"...\", \"content\": \"...\"}}]}}. \
         Reply {{\"facts\": []}} when there is nothing to record.",
        language_rule(config.language),
        render_schema(&config.topic_schema()),
    );
    let user = format!(
        "{}\n## Known profile\n{}\n\n## Conversation\n{}",
        EXTRACT_TASK, known, conversation
    );
    Prompt { system, user }
}

/// Consolidation of overflowing sub-topics into a single entry.
pub fn organize(topic: &str, slots: &[(String, String)], sep: &str, language: Language) -> Prompt {
    let system = format!(
        "You merge several facts of one profile topic into a single concise fact.\n\
         Keep every distinct detail, drop repetition.\n\
         {}\n\
         Reply with exactly one line: SUB_TOPIC{}CONTENT, where SUB_TOPIC is a short \
         snake_case name covering all merged facts.",
        language_rule(language),
        sep,
    );
    let lines = slots
        .iter()
        .map(|(sub_topic, content)| format!("- {}{}{}", sub_topic, sep, content))
        .collect::<Vec<_>>()
        .join("\n");
    let user = format!("{}\n## Topic\n{}\n\n## Facts\n{}", ORGANIZE_TASK, topic, lines);
    Prompt { system, user }
}

/// Shortening of one oversized entry.
pub fn resummarize(
    topic: &str,
    sub_topic: &str,
    content: &str,
    max_tokens: usize,
    language: Language,
) -> Prompt {
    let system = format!(
        "You shorten a profile fact while keeping its most important, most recent details.\n\
         The result must stay under {} tokens.\n\
         {}\n\
         Reply with the shortened fact only.",
        max_tokens,
        language_rule(language),
    );
    let user = format!(
        "{}\n## Slot\n{}/{}\n\n## Fact\n{}",
        RESUMMARIZE_TASK, topic, sub_topic, content
    );
    Prompt { system, user }
}

/// One-sentence tip describing a processed batch.
pub fn event_summary(conversation: &str, language: Language) -> Prompt {
    let system = format!(
        "You summarize what happened in a conversation from the user's perspective \
         in one or two short sentences.\n{}\nReply with the summary only.",
        language_rule(language),
    );
    let user = format!("{}\n## Conversation\n{}", EVENT_SUMMARY_TASK, conversation);
    Prompt { system, user }
}

/// Tag classification of an event. Expects `- tag{sep}value` lines.
pub fn event_tags(delta_lines: &str, tip: &str, tags: &[EventTagConfig], sep: &str) -> Prompt {
    let vocabulary = if tags.is_empty() {
        "Choose short snake_case tag names yourself.".to_string()
    } else {
        let names = tags
            .iter()
            .map(|t| match &t.description {
                Some(d) => format!("- {}: {}", t.name, d),
                None => format!("- {}", t.name),
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!("Only use these tags:\n{}", names)
    };
    let system = format!(
        "You classify a user event with at most 5 tags.\n{}\n\
         Reply with one line per tag: - TAG{}VALUE",
        vocabulary, sep,
    );
    let user = format!(
        "{}\n## Event\n{}\n\n## Profile changes\n{}",
        EVENT_TAG_TASK, tip, delta_lines
    );
    Prompt { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProfileAttributes;

    #[test]
    fn test_extract_prompt_lists_schema_and_profile() {
        let config = ProfileConfig::default();
        let existing = vec![ProfileEntry::new(
            "u",
            "p",
            "Gus",
            &ProfileAttributes::new("basic_info", "name"),
        )];
        let prompt = extract(&config, &existing, "user: hi");
        assert!(prompt.user.starts_with(EXTRACT_TASK));
        assert!(prompt.user.contains("- basic_info::name::Gus"));
        assert!(prompt.system.contains("- life_event: marriage, relocation, retirement"));
        assert!(prompt.system.contains("English"));
    }

    #[test]
    fn test_tag_prompt_restricts_vocabulary() {
        let tags = vec![EventTagConfig {
            name: "emotion".into(),
            description: Some("how the user felt".into()),
        }];
        let prompt = event_tags("interest:sports: runs", "Went running", &tags, "::");
        assert!(prompt.system.contains("- emotion: how the user felt"));
        assert!(prompt.system.contains("- TAG::VALUE"));
    }
}
