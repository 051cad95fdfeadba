use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The five entity kinds that get a physical table per branch.
///
/// Everything else (registry, audits, tasks, sessions, snapshots, scores,
/// templates, bundles, handoffs) lives in single branch-independent tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Fact,
    Relation,
    Observation,
    Conversation,
    Message,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Fact,
        EntityKind::Relation,
        EntityKind::Observation,
        EntityKind::Conversation,
        EntityKind::Message,
    ];

    /// Bare table name used by the root branch.
    pub fn table_base(&self) -> &'static str {
        match self {
            EntityKind::Fact => "facts",
            EntityKind::Relation => "relations",
            EntityKind::Observation => "observations",
            EntityKind::Conversation => "conversations",
            EntityKind::Message => "messages",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fact => write!(f, "fact"),
            Self::Relation => write!(f, "relation"),
            Self::Observation => write!(f, "observation"),
            Self::Conversation => write!(f, "conversation"),
            Self::Message => write!(f, "message"),
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fact" => Ok(Self::Fact),
            "relation" => Ok(Self::Relation),
            "observation" => Ok(Self::Observation),
            "conversation" => Ok(Self::Conversation),
            "message" => Ok(Self::Message),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// Categories that qualify a fact as durable during task consolidation
/// (together with confidence >= 0.8).
pub const DURABLE_CATEGORIES: [&str; 6] = [
    "bug_fix",
    "architecture",
    "pattern",
    "decision",
    "security",
    "performance",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactStatus {
    Active,
    Superseded,
    Archived,
}

impl std::fmt::Display for FactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Superseded => write!(f, "superseded"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for FactStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "superseded" => Ok(Self::Superseded),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown fact status: {other}")),
        }
    }
}

/// A single versioned knowledge item.
///
/// Supersede chains form a DAG through `parent_id`: the superseded row keeps
/// its id, the replacement is a fresh row pointing back at it. Only the chain
/// head is `active` on its branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub text: String,
    pub category: String,
    /// 0.0–1.0, clamped under dedup boosts.
    pub confidence: f64,
    pub status: FactStatus,
    pub parent_id: Option<String>,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub session_id: Option<String>,
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    pub branch: String,
    pub embedding: Option<Vec<f32>>,
    /// Free-form JSON: verification status, tags, cherry-pick back-refs.
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
    /// Set when this row was superseded; drives point-in-time reads.
    pub superseded_at: Option<String>,
}

/// A typed edge between two entities, never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub source_entity: String,
    pub target_entity: String,
    pub relation_type: String,
    pub properties: serde_json::Value,
    pub confidence: f64,
    pub branch: String,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    ToolUse,
    Discovery,
    Decision,
    Error,
    Insight,
}

impl std::fmt::Display for ObservationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToolUse => write!(f, "tool_use"),
            Self::Discovery => write!(f, "discovery"),
            Self::Decision => write!(f, "decision"),
            Self::Error => write!(f, "error"),
            Self::Insight => write!(f, "insight"),
        }
    }
}

impl std::str::FromStr for ObservationType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool_use" => Ok(Self::ToolUse),
            "discovery" => Ok(Self::Discovery),
            "decision" => Ok(Self::Decision),
            "error" => Ok(Self::Error),
            "insight" => Ok(Self::Insight),
            other => Err(format!("unknown observation type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Error,
    Timeout,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "timeout" => Ok(Self::Timeout),
            other => Err(format!("unknown outcome: {other}")),
        }
    }
}

/// Append-only sensory record of something an agent did or noticed.
/// Raw payloads are truncated to 2000 chars at write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub session_id: String,
    pub obs_type: ObservationType,
    pub tool_name: Option<String>,
    pub summary: String,
    pub raw_input: Option<String>,
    pub raw_output: Option<String>,
    pub outcome: Outcome,
    pub branch: String,
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Completed,
    Archived,
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown conversation status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub branch: String,
    pub title: Option<String>,
    pub status: ConversationStatus,
    pub model: Option<String>,
    pub message_count: u32,
    pub total_tokens: u64,
    /// Set when this conversation was forked from another one.
    pub parent_conversation_id: Option<String>,
    pub fork_point_message_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    ToolCall,
    ToolResult,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::ToolCall => write!(f, "tool_call"),
            Self::ToolResult => write!(f, "tool_result"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool_call" => Ok(Self::ToolCall),
            "tool_result" => Ok(Self::ToolResult),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// One message within a conversation. `sequence_num` starts at 1 and is
/// strictly increasing within the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub thinking: Option<String>,
    /// Serialized tool calls (array of {name, input}), JSON-as-text.
    pub tool_calls: Option<serde_json::Value>,
    pub model: Option<String>,
    pub sequence_num: u32,
    pub token_count: u32,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub branch: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Active,
    Merged,
    Archived,
}

impl std::fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Merged => write!(f, "merged"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for BranchStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "merged" => Ok(Self::Merged),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown branch status: {other}")),
        }
    }
}

/// Registry entry owning one branch's physical tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    /// Empty for the root branch; otherwise chains to the root.
    pub parent: Option<String>,
    pub status: BranchStatus,
    pub description: Option<String>,
    /// Purpose / owner / TTL / tags.
    pub metadata: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Native,
    Auto,
    CherryPick,
    Squash,
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Auto => write!(f, "auto"),
            Self::CherryPick => write!(f, "cherry_pick"),
            Self::Squash => write!(f, "squash"),
        }
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(Self::Native),
            "auto" => Ok(Self::Auto),
            "cherry_pick" => Ok(Self::CherryPick),
            "squash" => Ok(Self::Squash),
            other => Err(format!("unknown merge strategy: {other}")),
        }
    }
}

/// How the native strategy resolves a differing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Keep the target row.
    Skip,
    /// Overwrite the target with the source.
    Accept,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Accept => write!(f, "accept"),
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Self::Skip),
            "accept" => Ok(Self::Accept),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

/// Per-merge tallies, also persisted in the merge history.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MergeCounts {
    pub merged: u64,
    pub skipped: u64,
    pub conflicted: u64,
}

/// Immutable audit row appended after every merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRecord {
    pub id: String,
    pub source: String,
    pub target: String,
    pub strategy: MergeStrategy,
    pub counts: MergeCounts,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveStatus {
    Todo,
    Active,
    Done,
    Blocked,
}

impl std::fmt::Display for ObjectiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Todo => write!(f, "todo"),
            Self::Active => write!(f, "active"),
            Self::Done => write!(f, "done"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

impl std::str::FromStr for ObjectiveStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "active" => Ok(Self::Active),
            "done" => Ok(Self::Done),
            "blocked" => Ok(Self::Blocked),
            other => Err(format!("unknown objective status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    pub description: String,
    pub status: ObjectiveStatus,
    pub agent_id: Option<String>,
}

/// A unit of multi-agent work coordinated through a task branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub task_type: Option<String>,
    pub objectives: Vec<Objective>,
    pub parent_branch: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub parent_session_id: Option<String>,
    pub branch: String,
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    pub status: SessionStatus,
    pub summary: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
}

/// Point-in-time capture of one branch's entity tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub branch: String,
    pub label: String,
    /// Serialized per-entity row sets, or a native-snapshot identifier.
    pub payload: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scorer {
    LlmJudge,
    Heuristic,
    Human,
    Verification,
}

impl std::fmt::Display for Scorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LlmJudge => write!(f, "llm_judge"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::Human => write!(f, "human"),
            Self::Verification => write!(f, "verification"),
        }
    }
}

impl std::str::FromStr for Scorer {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm_judge" => Ok(Self::LlmJudge),
            "heuristic" => Ok(Self::Heuristic),
            "human" => Ok(Self::Human),
            "verification" => Ok(Self::Verification),
            other => Err(format!("unknown scorer: {other}")),
        }
    }
}

/// Immutable quality score for one dimension of one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub id: String,
    pub target_type: String,
    pub target_id: String,
    pub dimension: String,
    /// 0.0–1.0.
    pub value: f64,
    pub scorer: Scorer,
    pub explanation: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verified,
    Unverified,
    Invalidated,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verified => write!(f, "verified"),
            Self::Unverified => write!(f, "unverified"),
            Self::Invalidated => write!(f, "invalidated"),
        }
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verified" => Ok(Self::Verified),
            "unverified" => Ok(Self::Unverified),
            "invalidated" => Ok(Self::Invalidated),
            other => Err(format!("unknown verification status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStatus {
    Active,
    Deprecated,
}

impl std::fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Deprecated => write!(f, "deprecated"),
        }
    }
}

impl std::str::FromStr for TemplateStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "deprecated" => Ok(Self::Deprecated),
            other => Err(format!("unknown template status: {other}")),
        }
    }
}

/// Versioned branch snapshot reusable as a starting point for new work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub source_branch: String,
    /// Serialized branch state at template-creation time.
    pub payload: String,
    pub version: u32,
    pub task_types: Vec<String>,
    pub tags: Vec<String>,
    pub status: TemplateStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Immutable export of a branch's knowledge (facts + conversations + relations).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub id: String,
    pub name: String,
    pub payload: String,
    pub verified_only: bool,
    pub created_at: String,
}

/// Curated package passed from one branch's agent to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    pub id: String,
    pub source_branch: String,
    pub target_branch: String,
    pub handoff_type: String,
    /// Serialized fact subset.
    pub facts: String,
    /// Serialized conversation subset.
    pub conversations: String,
    pub context_summary: String,
    pub verification_status: VerificationStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationLevel {
    Session,
    Agent,
    Task,
}

impl std::fmt::Display for ConsolidationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Agent => write!(f, "agent"),
            Self::Task => write!(f, "task"),
        }
    }
}

impl std::str::FromStr for ConsolidationLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "agent" => Ok(Self::Agent),
            "task" => Ok(Self::Task),
            other => Err(format!("unknown consolidation level: {other}")),
        }
    }
}

/// Audit row appended after every consolidation run, including empty ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationRecord {
    pub id: String,
    pub level: ConsolidationLevel,
    pub source_branch: String,
    pub target_branch: String,
    pub created_count: u64,
    pub updated_count: u64,
    pub deduplicated_count: u64,
    pub observations_processed: u64,
    pub summary: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayStatus {
    Pending,
    Completed,
}

impl std::fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for ReplayStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown replay status: {other}")),
        }
    }
}

/// A conversation forked at a fixed message, configured for an external
/// executor to run again with different parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replay {
    pub id: String,
    /// The forked conversation the executor appends to.
    pub conversation_id: String,
    pub source_conversation_id: String,
    pub fork_at: u32,
    /// Model, temperature, tool filters, extra context.
    pub parameters: serde_json::Value,
    pub status: ReplayStatus,
    pub final_message_ids: Option<Vec<String>>,
    pub created_at: String,
}

/// Fresh time-sortable entity id.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Current instant as the RFC3339 string stored in every timestamp column.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
