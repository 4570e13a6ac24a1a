//! 项目画像配置
//!
//! Per-project policy for one pipeline run: the topic schema that steers
//! extraction, the language, the size limits and the prompt separator.

use figment::{
    Figment,
    providers::{Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::config::config::MemoryConfig;
use crate::error::{AppError, Result};
use crate::models::profile::normalize_key;

/// Extraction / summarization language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Zh => "zh",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Zh => "Chinese",
        }
    }
}

/// Sub-topic entry; YAML accepts a bare name or `{name, description}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubTopic {
    Name(String),
    Described {
        name: String,
        #[serde(default)]
        description: Option<String>,
    },
}

impl SubTopic {
    pub fn name(&self) -> &str {
        match self {
            SubTopic::Name(name) => name,
            SubTopic::Described { name, .. } => name,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            SubTopic::Name(_) => None,
            SubTopic::Described { description, .. } => description.as_deref(),
        }
    }
}

/// A recognized profile topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfileTopic {
    pub topic: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sub_topics: Vec<SubTopic>,
}

impl UserProfileTopic {
    pub fn new(topic: &str, sub_topics: &[&str]) -> Self {
        Self {
            topic: topic.to_string(),
            description: None,
            sub_topics: sub_topics
                .iter()
                .map(|s| SubTopic::Name(s.to_string()))
                .collect(),
        }
    }
}

/// Tag vocabulary entry for event classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTagConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Built-in topic schema used when a project does not override it.
pub fn default_profile_topics() -> Vec<UserProfileTopic> {
    vec![
        UserProfileTopic::new(
            "basic_info",
            &["name", "age", "gender", "birth_date", "nationality", "ethnicity", "language_spoken"],
        ),
        UserProfileTopic::new("contact_info", &["email", "phone", "city", "country"]),
        UserProfileTopic::new("education", &["school", "degree", "major"]),
        UserProfileTopic::new(
            "demographics",
            &["marital_status", "number_of_children", "household_income"],
        ),
        UserProfileTopic::new(
            "work",
            &["company", "title", "working_industry", "previous_projects", "work_skills"],
        ),
        UserProfileTopic::new(
            "interest",
            &["books", "movies", "music", "foods", "sports", "exercise"],
        ),
        UserProfileTopic::new(
            "psychological",
            &["personality", "values", "beliefs", "motivations", "goals"],
        ),
        UserProfileTopic::new("life_event", &["marriage", "relocation", "retirement"]),
    ]
}

/// Subset of [`ProfileConfig`] a project may override through YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct ProjectOverrides {
    language: Option<Language>,
    additional_user_profiles: Vec<UserProfileTopic>,
    overwrite_user_profiles: Option<Vec<UserProfileTopic>>,
    event_tags: Vec<EventTagConfig>,
    max_profile_subtopics: Option<usize>,
    max_pre_profile_token_size: Option<usize>,
    llm_tab_separator: Option<String>,
}

/// Effective policy for a single pipeline run or context assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub language: Language,
    pub additional_user_profiles: Vec<UserProfileTopic>,
    pub overwrite_user_profiles: Option<Vec<UserProfileTopic>>,
    pub event_tags: Vec<EventTagConfig>,
    pub max_profile_subtopics: usize,
    pub max_pre_profile_token_size: usize,
    pub llm_tab_separator: String,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self::from_memory(&MemoryConfig::default())
    }
}

impl ProfileConfig {
    pub fn from_memory(memory: &MemoryConfig) -> Self {
        Self {
            language: memory.language,
            additional_user_profiles: memory.additional_user_profiles.clone(),
            overwrite_user_profiles: memory.overwrite_user_profiles.clone(),
            event_tags: Vec::new(),
            max_profile_subtopics: memory.max_profile_subtopics,
            max_pre_profile_token_size: memory.max_pre_profile_token_size,
            llm_tab_separator: memory.llm_tab_separator.clone(),
        }
    }

    /// Parse and validate a project's YAML overrides.
    pub fn parse_project_yaml(memory: &MemoryConfig, yaml: &str) -> Result<Self> {
        let overrides: ProjectOverrides = Figment::from(Yaml::string(yaml))
            .extract()
            .map_err(|e| AppError::Validation(format!("invalid profile config: {}", e)))?;

        let mut config = Self::from_memory(memory);
        if let Some(language) = overrides.language {
            config.language = language;
        }
        config
            .additional_user_profiles
            .extend(overrides.additional_user_profiles);
        if overrides.overwrite_user_profiles.is_some() {
            config.overwrite_user_profiles = overrides.overwrite_user_profiles;
        }
        config.event_tags = overrides.event_tags;
        if let Some(limit) = overrides.max_profile_subtopics {
            config.max_profile_subtopics = limit;
        }
        if let Some(limit) = overrides.max_pre_profile_token_size {
            config.max_pre_profile_token_size = limit;
        }
        if let Some(separator) = overrides.llm_tab_separator {
            config.llm_tab_separator = separator;
        }

        config.validate()?;
        Ok(config)
    }

    /// Effective config for one run; a broken project YAML falls back to
    /// the global defaults.
    pub fn resolve(memory: &MemoryConfig, project_yaml: Option<&str>) -> Self {
        match project_yaml.filter(|y| !y.trim().is_empty()) {
            None => Self::from_memory(memory),
            Some(yaml) => Self::parse_project_yaml(memory, yaml).unwrap_or_else(|e| {
                tracing::warn!("Ignoring project profile config: {}", e);
                Self::from_memory(memory)
            }),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_profile_subtopics == 0 {
            return Err(AppError::Validation(
                "max_profile_subtopics must be greater than 0".into(),
            ));
        }
        if self.max_pre_profile_token_size == 0 {
            return Err(AppError::Validation(
                "max_pre_profile_token_size must be greater than 0".into(),
            ));
        }
        if self.llm_tab_separator.is_empty() {
            return Err(AppError::Validation("llm_tab_separator must not be empty".into()));
        }
        let topics = self
            .additional_user_profiles
            .iter()
            .chain(self.overwrite_user_profiles.iter().flatten());
        for topic in topics {
            if normalize_key(&topic.topic).is_empty() {
                return Err(AppError::Validation("profile topic must not be empty".into()));
            }
        }
        Ok(())
    }

    /// Topic schema offered to the extractor.
    ///
    /// An overwrite list replaces the defaults; additional topics extend
    /// them, merging sub-topics into an existing topic of the same name.
    pub fn topic_schema(&self) -> Vec<UserProfileTopic> {
        let mut schema = match &self.overwrite_user_profiles {
            Some(overwrite) => overwrite.clone(),
            None => default_profile_topics(),
        };

        for extra in &self.additional_user_profiles {
            let key = normalize_key(&extra.topic);
            match schema.iter_mut().find(|t| normalize_key(&t.topic) == key) {
                Some(existing) => {
                    for sub in &extra.sub_topics {
                        let sub_key = normalize_key(sub.name());
                        if !existing
                            .sub_topics
                            .iter()
                            .any(|s| normalize_key(s.name()) == sub_key)
                        {
                            existing.sub_topics.push(sub.clone());
                        }
                    }
                    if existing.description.is_none() {
                        existing.description = extra.description.clone();
                    }
                }
                None => schema.push(extra.clone()),
            }
        }
        schema
    }

    /// Normalized topic allow-list, when the schema is overridden.
    pub fn allowed_topics(&self) -> Option<Vec<String>> {
        self.overwrite_user_profiles.as_ref().map(|topics| {
            topics
                .iter()
                .map(|t| normalize_key(&t.topic))
                .chain(self.additional_user_profiles.iter().map(|t| normalize_key(&t.topic)))
                .collect()
        })
    }

    pub fn is_topic_allowed(&self, topic: &str) -> bool {
        match self.allowed_topics() {
            Some(allowed) => allowed.iter().any(|t| t == topic),
            None => true,
        }
    }
}
