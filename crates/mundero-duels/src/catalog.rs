//! # Duel Catalogs
//!
//! Static registries consumed when creating a duel:
//!
//! - **Metrics**: the countable activity signals two users can compete on
//! - **Templates**: predefined duel recipes (objective, metric, duration,
//!   category, difficulty, rewards)
//!
//! Nothing in here mutates; templates only seed new [`Duel`](crate::Duel)
//! instances.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::duel::Rewards;

// ============================================================================
// Metrics
// ============================================================================

/// Activity signal compared in a duel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelMetric {
    LikesReceived,
    PostsCreated,
    CommentsWritten,
    FollowersGained,
    ProfileViews,
    ConnectionsMade,
    StoriesShared,
    AppsLaunched,
}

/// Display metadata for a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricInfo {
    pub label: &'static str,
    pub description: &'static str,
    /// Singular unit shown next to counters ("like", "post", ...)
    pub unit: &'static str,
    pub icon: &'static str,
}

impl DuelMetric {
    pub const ALL: [DuelMetric; 8] = [
        Self::LikesReceived,
        Self::PostsCreated,
        Self::CommentsWritten,
        Self::FollowersGained,
        Self::ProfileViews,
        Self::ConnectionsMade,
        Self::StoriesShared,
        Self::AppsLaunched,
    ];

    pub fn info(&self) -> MetricInfo {
        match self {
            Self::LikesReceived => MetricInfo {
                label: "Likes received",
                description: "Likes collected on your posts and stories",
                unit: "like",
                icon: "heart",
            },
            Self::PostsCreated => MetricInfo {
                label: "Posts created",
                description: "New posts published to your feed",
                unit: "post",
                icon: "edit",
            },
            Self::CommentsWritten => MetricInfo {
                label: "Comments written",
                description: "Comments left on other members' posts",
                unit: "comment",
                icon: "message-circle",
            },
            Self::FollowersGained => MetricInfo {
                label: "Followers gained",
                description: "New followers during the duel",
                unit: "follower",
                icon: "user-plus",
            },
            Self::ProfileViews => MetricInfo {
                label: "Profile views",
                description: "Visits to your public profile",
                unit: "view",
                icon: "eye",
            },
            Self::ConnectionsMade => MetricInfo {
                label: "Connections made",
                description: "Accepted professional connection requests",
                unit: "connection",
                icon: "link",
            },
            Self::StoriesShared => MetricInfo {
                label: "Stories shared",
                description: "Stories published during the duel",
                unit: "story",
                icon: "camera",
            },
            Self::AppsLaunched => MetricInfo {
                label: "Apps launched",
                description: "Portal apps opened from the launcher",
                unit: "launch",
                icon: "grid",
            },
        }
    }

    /// Natural category for this metric
    pub fn category(&self) -> DuelCategory {
        match self {
            Self::LikesReceived | Self::CommentsWritten | Self::AppsLaunched => DuelCategory::Engagement,
            Self::PostsCreated | Self::StoriesShared => DuelCategory::Content,
            Self::ConnectionsMade => DuelCategory::Networking,
            Self::FollowersGained | Self::ProfileViews => DuelCategory::Growth,
        }
    }
}

// ============================================================================
// Taxonomy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelCategory {
    Engagement,
    Content,
    Networking,
    Growth,
}

impl DuelCategory {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Engagement => "Engagement",
            Self::Content => "Content",
            Self::Networking => "Networking",
            Self::Growth => "Growth",
        }
    }
}

/// Difficulty tier, ordered from easiest to hardest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelDifficulty {
    Easy,
    Medium,
    Hard,
    Extreme,
}

impl DuelDifficulty {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
            Self::Extreme => "Extreme",
        }
    }

    /// Reward multiplier in percent
    pub fn reward_multiplier(&self) -> u64 {
        match self {
            Self::Easy => 100,
            Self::Medium => 150,
            Self::Hard => 200,
            Self::Extreme => 300,
        }
    }
}

// ============================================================================
// Templates
// ============================================================================

/// Immutable duel recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuelTemplate {
    /// Stable catalog key
    pub slug: String,
    pub objective: String,
    pub metric: DuelMetric,
    pub duration_hours: u32,
    pub category: DuelCategory,
    pub difficulty: DuelDifficulty,
    pub rewards: Rewards,
    pub description: String,
}

impl DuelTemplate {
    /// Ad-hoc template; rewards default from the difficulty tier
    pub fn custom(
        objective: impl Into<String>,
        metric: DuelMetric,
        duration_hours: u32,
        difficulty: DuelDifficulty,
        rewards: Option<Rewards>,
    ) -> Self {
        Self {
            slug: "custom".to_string(),
            objective: objective.into(),
            metric,
            duration_hours: duration_hours.max(1),
            category: metric.category(),
            difficulty,
            rewards: rewards.unwrap_or_else(|| Rewards::for_difficulty(difficulty)),
            description: metric.info().description.to_string(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn builtin(
        slug: &str,
        objective: &str,
        metric: DuelMetric,
        duration_hours: u32,
        difficulty: DuelDifficulty,
        winner: u64,
        participant: u64,
        description: &str,
    ) -> Self {
        Self {
            slug: slug.to_string(),
            objective: objective.to_string(),
            metric,
            duration_hours,
            category: metric.category(),
            difficulty,
            rewards: Rewards { winner, participant },
            description: description.to_string(),
        }
    }
}

/// Registry of built-in templates
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, DuelTemplate>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self {
            templates: BTreeMap::new(),
        }
    }

    /// Catalog preloaded with the built-in templates
    pub fn builtin() -> Self {
        use DuelDifficulty::*;
        use DuelMetric::*;

        let mut catalog = Self::new();
        for template in [
            DuelTemplate::builtin(
                "likes-sprint",
                "Get the most likes in 24 hours",
                LikesReceived,
                24,
                Easy,
                150,
                50,
                "A quick popularity contest. Every like on your posts counts.",
            ),
            DuelTemplate::builtin(
                "comment-clash",
                "Write the most comments in 12 hours",
                CommentsWritten,
                12,
                Easy,
                100,
                40,
                "Join the conversation. The most active commenter wins.",
            ),
            DuelTemplate::builtin(
                "app-explorer",
                "Launch the most portal apps in 24 hours",
                AppsLaunched,
                24,
                Easy,
                120,
                40,
                "Explore the launcher and try out the apps you never open.",
            ),
            DuelTemplate::builtin(
                "post-marathon",
                "Publish the most posts in 3 days",
                PostsCreated,
                72,
                Medium,
                250,
                75,
                "Consistency beats bursts. Keep your feed busy for three days.",
            ),
            DuelTemplate::builtin(
                "spotlight",
                "Attract the most profile views in 48 hours",
                ProfileViews,
                48,
                Medium,
                200,
                60,
                "Polish your profile and get noticed.",
            ),
            DuelTemplate::builtin(
                "networker",
                "Make the most new connections in 72 hours",
                ConnectionsMade,
                72,
                Medium,
                250,
                75,
                "Grow your professional network faster than your rival.",
            ),
            DuelTemplate::builtin(
                "story-blitz",
                "Share the most stories in 6 hours",
                StoriesShared,
                6,
                Hard,
                300,
                90,
                "Short and intense. Six hours of non-stop stories.",
            ),
            DuelTemplate::builtin(
                "follower-rush",
                "Gain the most followers in a week",
                FollowersGained,
                168,
                Hard,
                400,
                120,
                "A week-long race for new followers.",
            ),
            DuelTemplate::builtin(
                "likes-legend",
                "Collect the most likes in a week",
                LikesReceived,
                168,
                Extreme,
                600,
                150,
                "Only for the most popular members of the portal.",
            ),
        ] {
            catalog.register(template);
        }
        catalog
    }

    pub fn register(&mut self, template: DuelTemplate) {
        self.templates.insert(template.slug.clone(), template);
    }

    pub fn get(&self, slug: &str) -> Option<&DuelTemplate> {
        self.templates.get(slug)
    }

    pub fn list_all(&self) -> Vec<&DuelTemplate> {
        self.templates.values().collect()
    }

    pub fn list_by_category(&self, category: DuelCategory) -> Vec<&DuelTemplate> {
        self.templates
            .values()
            .filter(|t| t.category == category)
            .collect()
    }

    pub fn list_by_difficulty(&self, difficulty: DuelDifficulty) -> Vec<&DuelTemplate> {
        self.templates
            .values()
            .filter(|t| t.difficulty == difficulty)
            .collect()
    }

    pub fn list_by_metric(&self, metric: DuelMetric) -> Vec<&DuelTemplate> {
        self.templates
            .values()
            .filter(|t| t.metric == metric)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
