//! Configuration model and the closed-set vocabularies shared by every layer.
//!
//! Closed sets are validated at the store boundary: rows are written with
//! `as_str()` and read back with `parse()`, and the schema carries matching
//! CHECK constraints so a bad value can never land on disk.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Configuration (~/.prism/config.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_transcripts_dir")]
    pub transcripts_dir: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Name the user appears under in transcripts. Used for talk-ratio metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub learner: LearnerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transcripts_dir: default_transcripts_dir(),
            database_path: default_database_path(),
            bind_address: default_bind_address(),
            user_name: None,
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            learner: LearnerConfig::default(),
        }
    }
}

impl Config {
    pub fn transcripts_path(&self) -> PathBuf {
        expand_home(&self.transcripts_dir)
    }

    pub fn database_file(&self) -> PathBuf {
        expand_home(&self.database_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_classify_timeout")]
    pub classify_timeout_secs: u64,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_health_ttl")]
    pub health_ttl_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            classify_timeout_secs: default_classify_timeout(),
            query_timeout_secs: default_query_timeout(),
            health_ttl_secs: default_health_ttl(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_soft_token_cap")]
    pub soft_token_cap: usize,
    #[serde(default = "default_hard_token_cap")]
    pub hard_token_cap: usize,
    #[serde(default = "default_gap_seconds")]
    pub gap_seconds: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            debounce_ms: default_debounce_ms(),
            soft_token_cap: default_soft_token_cap(),
            hard_token_cap: default_hard_token_cap(),
            gap_seconds: default_gap_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerConfig {
    /// Six-field cron expression (sec min hour dom mon dow), UTC.
    #[serde(default = "default_learner_schedule")]
    pub schedule: String,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            schedule: default_learner_schedule(),
        }
    }
}

fn default_transcripts_dir() -> String {
    "~/Documents/Prism/transcripts".to_string()
}
fn default_database_path() -> String {
    "~/.prism/prism.db".to_string()
}
fn default_bind_address() -> String {
    "127.0.0.1:3847".to_string()
}
fn default_llm_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_llm_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_classify_timeout() -> u64 {
    60
}
fn default_query_timeout() -> u64 {
    30
}
fn default_health_ttl() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_workers() -> usize {
    2
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_soft_token_cap() -> usize {
    500
}
fn default_hard_token_cap() -> usize {
    1000
}
fn default_gap_seconds() -> u32 {
    60
}
fn default_learner_schedule() -> String {
    "0 0 2 * * *".to_string()
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// Closed sets
// ---------------------------------------------------------------------------

/// Declare a closed-set enum stored as a string column.
macro_rules! closed_set {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $label)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// String label for SQL storage and the wire.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }

            /// Parse a stored label. Unknown labels are rejected.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($label => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

closed_set! {
    /// What a segment conveys. The store keeps this narrower vocabulary;
    /// the classifier's `objection` and `question` labels are folded in by
    /// [`KnowledgeType::from_classifier_label`].
    KnowledgeType {
        ProductKnowledge => "product_knowledge",
        ProcessKnowledge => "process_knowledge",
        PeopleContext => "people_context",
        SalesInsight => "sales_insight",
        AdviceReceived => "advice_received",
        DecisionRationale => "decision_rationale",
        CompetitiveIntel => "competitive_intel",
        SmallTalk => "small_talk",
        Unknown => "unknown",
    }
}

impl KnowledgeType {
    /// Map a classifier label onto the stored vocabulary plus an optional tag.
    pub fn from_classifier_label(label: &str) -> (Self, Option<&'static str>) {
        let normalized = label.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "objection" => (KnowledgeType::SalesInsight, Some("objection")),
            "question" => (KnowledgeType::ProcessKnowledge, Some("question")),
            other => (KnowledgeType::parse(other).unwrap_or(KnowledgeType::Unknown), None),
        }
    }
}

closed_set! {
    RelationshipType {
        Champion => "champion",
        EconomicBuyer => "economic_buyer",
        DecisionMaker => "decision_maker",
        Influencer => "influencer",
        Blocker => "blocker",
        Colleague => "colleague",
        Customer => "customer",
        Partner => "partner",
        Unknown => "unknown",
    }
}

closed_set! {
    DealStatus {
        Prospecting => "prospecting",
        Discovery => "discovery",
        Evaluation => "evaluation",
        Negotiation => "negotiation",
        Won => "won",
        Lost => "lost",
        Stalled => "stalled",
    }
}

impl DealStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, DealStatus::Won | DealStatus::Lost)
    }
}

closed_set! {
    MeddpiccLetter {
        M => "M",
        E => "E",
        D1 => "D1",
        D2 => "D2",
        P => "P",
        I => "I",
        C1 => "C1",
        C2 => "C2",
    }
}

impl MeddpiccLetter {
    pub fn label(&self) -> &'static str {
        match self {
            MeddpiccLetter::M => "Metrics",
            MeddpiccLetter::E => "Economic Buyer",
            MeddpiccLetter::D1 => "Decision Criteria",
            MeddpiccLetter::D2 => "Decision Process",
            MeddpiccLetter::P => "Paper Process",
            MeddpiccLetter::I => "Identify Pain",
            MeddpiccLetter::C1 => "Champion",
            MeddpiccLetter::C2 => "Competition",
        }
    }
}

closed_set! {
    MeddpiccStatus {
        Unknown => "unknown",
        Partial => "partial",
        Identified => "identified",
    }
}

impl MeddpiccStatus {
    /// Ordering used to keep pipeline transitions upward-only.
    pub fn rank(&self) -> u8 {
        match self {
            MeddpiccStatus::Unknown => 0,
            MeddpiccStatus::Partial => 1,
            MeddpiccStatus::Identified => 2,
        }
    }
}

closed_set! {
    Effectiveness {
        Unknown => "unknown",
        Poor => "poor",
        Okay => "okay",
        Good => "good",
        Excellent => "excellent",
    }
}

closed_set! {
    InsightStatus {
        Active => "active",
        Validated => "validated",
        Invalidated => "invalidated",
        Superseded => "superseded",
    }
}

closed_set! {
    InsightType {
        Icp => "icp",
        Pattern => "pattern",
        Coaching => "coaching",
    }
}

closed_set! {
    InsightPriority {
        Low => "low",
        Normal => "normal",
        High => "high",
    }
}

closed_set! {
    ProspectStatus {
        New => "new",
        Researching => "researching",
        Contacted => "contacted",
        Engaged => "engaged",
        Qualified => "qualified",
        Converted => "converted",
        Disqualified => "disqualified",
    }
}

closed_set! {
    Persona {
        Champion => "champion",
        EconomicBuyer => "economic_buyer",
        TechnicalBuyer => "technical_buyer",
        EndUser => "end_user",
        Influencer => "influencer",
        Gatekeeper => "gatekeeper",
        Unknown => "unknown",
    }
}

closed_set! {
    OutreachMethod {
        Email => "email",
        Phone => "phone",
        Linkedin => "linkedin",
        Meeting => "meeting",
        Event => "event",
        Other => "other",
    }
}

closed_set! {
    OutreachDirection {
        Outbound => "outbound",
        Inbound => "inbound",
    }
}

closed_set! {
    OutreachOutcome {
        Pending => "pending",
        NoResponse => "no_response",
        Replied => "replied",
        MeetingBooked => "meeting_booked",
        NotInterested => "not_interested",
        Bounced => "bounced",
    }
}

impl OutreachOutcome {
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            OutreachOutcome::Replied | OutreachOutcome::MeetingBooked | OutreachOutcome::NotInterested
        )
    }
}

closed_set! {
    /// Terminal events used as supervision by the learner.
    OutcomeKind {
        DealWon => "deal_won",
        DealLost => "deal_lost",
        MeetingBooked => "meeting_booked",
        ProspectConverted => "prospect_converted",
        ProspectDisqualified => "prospect_disqualified",
    }
}

closed_set! {
    Intent {
        DealStatus => "deal_status",
        PersonLookup => "person_lookup",
        ObjectionPattern => "objection_pattern",
        Coaching => "coaching",
        MeddpiccGap => "meddpicc_gap",
        Stats => "stats",
        FreeForm => "free_form",
    }
}

closed_set! {
    TranscriptStatus {
        Processing => "processing",
        Processed => "processed",
        NeedsReprocess => "needs_reprocess",
        Error => "error",
    }
}

closed_set! {
    TranscriptFormat {
        Plain => "plain",
        Markdown => "markdown",
        Json => "json",
    }
}

closed_set! {
    EntityKind {
        Deal => "deal",
        Prospect => "prospect",
        Outreach => "outreach",
    }
}

closed_set! {
    AnswerFeedback {
        Helpful => "helpful",
        NotHelpful => "not_helpful",
    }
}

/// Prospect tiers are 1 (hottest) to 3.
pub fn tier_for_score(score: f64, tier1_threshold: f64, tier2_threshold: f64) -> i64 {
    if score >= tier1_threshold {
        1
    } else if score >= tier2_threshold {
        2
    } else {
        3
    }
}

pub fn is_valid_tier(tier: i64) -> bool {
    (1..=3).contains(&tier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.transcripts_dir, "~/Documents/Prism/transcripts");
        assert_eq!(config.pipeline.workers, 2);
        assert_eq!(config.pipeline.debounce_ms, 500);
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.llm.classify_timeout_secs, 60);
        assert_eq!(config.llm.query_timeout_secs, 30);
        assert_eq!(config.llm.health_ttl_secs, 60);
    }

    #[test]
    fn test_config_partial_override() {
        let config: Config =
            serde_json::from_str(r#"{"llm":{"model":"qwen2.5:7b"},"pipeline":{"workers":4}}"#)
                .unwrap();
        assert_eq!(config.llm.model, "qwen2.5:7b");
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.pipeline.soft_token_cap, 500);
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/tmp/prism.db"), PathBuf::from("/tmp/prism.db"));
    }

    #[test]
    fn test_closed_set_round_trip_labels() {
        for kt in KnowledgeType::ALL {
            assert_eq!(KnowledgeType::parse(kt.as_str()), Some(*kt));
        }
        assert_eq!(KnowledgeType::ALL.len(), 9);
        assert_eq!(MeddpiccLetter::ALL.len(), 8);
        assert!(KnowledgeType::parse("objection").is_none());
    }

    #[test]
    fn test_classifier_label_folding() {
        assert_eq!(
            KnowledgeType::from_classifier_label("objection"),
            (KnowledgeType::SalesInsight, Some("objection"))
        );
        assert_eq!(
            KnowledgeType::from_classifier_label("Question"),
            (KnowledgeType::ProcessKnowledge, Some("question"))
        );
        assert_eq!(
            KnowledgeType::from_classifier_label("competitive intel"),
            (KnowledgeType::CompetitiveIntel, None)
        );
        assert_eq!(
            KnowledgeType::from_classifier_label("gossip"),
            (KnowledgeType::Unknown, None)
        );
    }

    #[test]
    fn test_serde_uses_labels() {
        let json = serde_json::to_string(&MeddpiccLetter::D1).unwrap();
        assert_eq!(json, "\"D1\"");
        let status: MeddpiccStatus = serde_json::from_str("\"partial\"").unwrap();
        assert_eq!(status, MeddpiccStatus::Partial);
    }

    #[test]
    fn test_meddpicc_status_rank_is_monotonic() {
        assert!(MeddpiccStatus::Unknown.rank() < MeddpiccStatus::Partial.rank());
        assert!(MeddpiccStatus::Partial.rank() < MeddpiccStatus::Identified.rank());
    }

    #[test]
    fn test_tier_for_score() {
        assert_eq!(tier_for_score(45.0, 70.0, 40.0), 2);
        assert_eq!(tier_for_score(70.0, 70.0, 40.0), 1);
        assert_eq!(tier_for_score(10.0, 70.0, 40.0), 3);
    }
}
