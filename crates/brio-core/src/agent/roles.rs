//! Specialist role definitions — who the engine can invoke, and with what
//! contract.
//!
//! Every role ships as a built-in `RoleSpec` with a hardcoded system
//! prompt; operators can override any of them from YAML files:
//!
//! ```yaml
//! role: "copywriter"
//! name: "Copywriter"
//! description: "Writes campaign copy against a chosen concept"
//! system_prompt: |
//!   ## Copywriter
//!   Write copy for the selected concept — nothing else.
//! role_reminder: "Stay on the approved concept."
//! boundaries:
//!   - "Do not invent product claims"
//! heuristics:
//!   - "Produce 3 options, not 1"
//! ```

use std::collections::HashMap;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The named specialist capabilities the phase pipeline draws on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Strategist,
    CreativeDirector,
    Copywriter,
    ArtDirector,
    Producer,
    MediaPlanner,
    Analyst,
}

impl AgentRole {
    pub const ALL: [AgentRole; 7] = [
        AgentRole::Strategist,
        AgentRole::CreativeDirector,
        AgentRole::Copywriter,
        AgentRole::ArtDirector,
        AgentRole::Producer,
        AgentRole::MediaPlanner,
        AgentRole::Analyst,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strategist => "strategist",
            Self::CreativeDirector => "creative_director",
            Self::Copywriter => "copywriter",
            Self::ArtDirector => "art_director",
            Self::Producer => "producer",
            Self::MediaPlanner => "media_planner",
            Self::Analyst => "analyst",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "strategist" => Some(Self::Strategist),
            "creative_director" => Some(Self::CreativeDirector),
            "copywriter" => Some(Self::Copywriter),
            "art_director" => Some(Self::ArtDirector),
            "producer" => Some(Self::Producer),
            "media_planner" => Some(Self::MediaPlanner),
            "analyst" => Some(Self::Analyst),
            _ => None,
        }
    }

    /// The JSON Schema the role's structured output must satisfy.
    pub fn output_schema(&self) -> serde_json::Value {
        let schema = match self {
            Self::Strategist => schemars::schema_for!(StrategyBrief),
            Self::CreativeDirector => schemars::schema_for!(ConceptBatch),
            Self::Copywriter => schemars::schema_for!(CopyPackage),
            Self::ArtDirector => schemars::schema_for!(VisualDirection),
            Self::Producer => schemars::schema_for!(ProductionPlan),
            Self::MediaPlanner => schemars::schema_for!(MediaSchedule),
            Self::Analyst => schemars::schema_for!(PerformanceReport),
        };
        serde_json::to_value(schema).unwrap_or_default()
    }
}

// ─── Structured Output Types ──────────────────────────────────────────────

/// Strategist output: the strategic frame later phases build on.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StrategyBrief {
    pub positioning: String,
    pub audiences: Vec<String>,
    pub channels: Vec<String>,
    pub key_messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConceptOption {
    pub name: String,
    pub premise: String,
    pub rationale: String,
}

/// Creative director output: a small set of competing campaign concepts.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConceptBatch {
    pub concepts: Vec<ConceptOption>,
    pub recommended: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CopyPackage {
    pub headlines: Vec<String>,
    pub body: String,
    pub call_to_action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VisualDirection {
    pub art_direction: String,
    pub formats: Vec<String>,
    pub palette: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetSpec {
    pub name: String,
    pub format: String,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductionPlan {
    pub assets: Vec<AssetSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub channel: String,
    pub window: String,
    pub budget_share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MediaSchedule {
    pub placements: Vec<Placement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub summary: String,
    pub metrics: Vec<String>,
}

// ─── Role Specs ───────────────────────────────────────────────────────────

/// A specialist definition: prompt, boundaries, and heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSpec {
    pub role: AgentRole,

    /// Display name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// The system prompt for this specialist
    pub system_prompt: String,

    /// A brief reminder appended to task prompts
    #[serde(default)]
    pub role_reminder: Option<String>,

    /// Explicit "do not do X" constraints folded into every task
    #[serde(default)]
    pub boundaries: Vec<String>,

    /// Working heuristics folded into every task
    #[serde(default)]
    pub heuristics: Vec<String>,
}

impl RoleSpec {
    /// Parse a role spec from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse role YAML: {}", e))
    }

    /// Load a role spec from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read role file '{}': {}", path, e))?;
        Self::from_yaml(&content)
    }
}

/// Holds the active role specs: builtins, optionally overridden from disk.
pub struct RoleRegistry {
    roles: HashMap<AgentRole, RoleSpec>,
}

impl RoleRegistry {
    /// Registry with only the built-in specs.
    pub fn builtin() -> Self {
        let mut roles = HashMap::new();
        for spec in builtin_roles() {
            roles.insert(spec.role, spec);
        }
        Self { roles }
    }

    /// Load overrides from a directory of `.yaml`/`.yml` files on top of
    /// the builtins.
    pub fn load_dir(&mut self, dir: &str) -> Result<usize, String> {
        let dir_path = Path::new(dir);
        if !dir_path.is_dir() {
            return Err(format!("Role directory '{}' does not exist", dir));
        }

        let mut count = 0;
        for entry in std::fs::read_dir(dir_path)
            .map_err(|e| format!("Failed to read directory '{}': {}", dir, e))?
        {
            let entry = entry.map_err(|e| format!("Directory entry error: {}", e))?;
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext != "yaml" && ext != "yml" {
                continue;
            }
            let spec = RoleSpec::from_file(path.to_str().unwrap_or(""))?;
            tracing::info!("[RoleRegistry] Loaded role override: {}", spec.role.as_str());
            self.roles.insert(spec.role, spec);
            count += 1;
        }

        Ok(count)
    }

    pub fn get(&self, role: AgentRole) -> &RoleSpec {
        // Builtins cover every variant, so the map is total.
        &self.roles[&role]
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Built-in specialist definitions.
pub fn builtin_roles() -> Vec<RoleSpec> {
    vec![
        RoleSpec {
            role: AgentRole::Strategist,
            name: "Strategist".to_string(),
            description: Some("Frames the brief into positioning, audiences, channels".to_string()),
            system_prompt: STRATEGIST_SYSTEM_PROMPT.to_string(),
            role_reminder: Some(
                "Strategy only. Leave concepts, copy, and visuals to the creative team."
                    .to_string(),
            ),
            boundaries: vec![
                "Do not write finished copy or taglines".to_string(),
                "Do not invent audience data not present in the brief or research".to_string(),
            ],
            heuristics: vec![
                "Name 2-4 audiences, never one catch-all segment".to_string(),
                "Every key message must map to a named audience".to_string(),
            ],
        },
        RoleSpec {
            role: AgentRole::CreativeDirector,
            name: "Creative Director".to_string(),
            description: Some("Turns strategy into competing campaign concepts".to_string()),
            system_prompt: CREATIVE_DIRECTOR_SYSTEM_PROMPT.to_string(),
            role_reminder: Some(
                "Concepts must be distinct from each other, not variations on one idea."
                    .to_string(),
            ),
            boundaries: vec![
                "Do not depart from the approved strategy brief".to_string(),
                "Do not write production-ready copy".to_string(),
            ],
            heuristics: vec![
                "Produce 3 options, not 1".to_string(),
                "State a recommendation and why".to_string(),
            ],
        },
        RoleSpec {
            role: AgentRole::Copywriter,
            name: "Copywriter".to_string(),
            description: Some("Writes campaign copy against the chosen concept".to_string()),
            system_prompt: COPYWRITER_SYSTEM_PROMPT.to_string(),
            role_reminder: Some("Stay on the selected concept and brand voice.".to_string()),
            boundaries: vec![
                "Do not invent product claims".to_string(),
                "Do not redesign the concept".to_string(),
            ],
            heuristics: vec![
                "Produce 3 headline options, not 1".to_string(),
                "One call to action per copy block".to_string(),
            ],
        },
        RoleSpec {
            role: AgentRole::ArtDirector,
            name: "Art Director".to_string(),
            description: Some("Specifies the visual system for the chosen concept".to_string()),
            system_prompt: ART_DIRECTOR_SYSTEM_PROMPT.to_string(),
            role_reminder: Some("Specify visuals; generation happens downstream.".to_string()),
            boundaries: vec![
                "Do not generate or reference actual image files".to_string(),
                "Do not contradict existing brand guidelines".to_string(),
            ],
            heuristics: vec![
                "Name concrete formats (feed, story, banner), not \"all channels\"".to_string(),
            ],
        },
        RoleSpec {
            role: AgentRole::Producer,
            name: "Producer".to_string(),
            description: Some("Breaks approved creative into a concrete asset plan".to_string()),
            system_prompt: PRODUCER_SYSTEM_PROMPT.to_string(),
            role_reminder: Some("Every asset needs a format and delivery notes.".to_string()),
            boundaries: vec!["Do not alter approved copy or visual direction".to_string()],
            heuristics: vec!["List assets one per placement format".to_string()],
        },
        RoleSpec {
            role: AgentRole::MediaPlanner,
            name: "Media Planner".to_string(),
            description: Some("Schedules placements across the strategy's channels".to_string()),
            system_prompt: MEDIA_PLANNER_SYSTEM_PROMPT.to_string(),
            role_reminder: Some("Budget shares must sum to 1.0.".to_string()),
            boundaries: vec![
                "Do not add channels missing from the strategy brief".to_string(),
            ],
            heuristics: vec!["Weight placements by audience priority, not evenly".to_string()],
        },
        RoleSpec {
            role: AgentRole::Analyst,
            name: "Analyst".to_string(),
            description: Some("Research at kickoff, measurement framing at wrap".to_string()),
            system_prompt: ANALYST_SYSTEM_PROMPT.to_string(),
            role_reminder: Some("Be evidence-driven; flag assumptions explicitly.".to_string()),
            boundaries: vec!["Do not make creative recommendations".to_string()],
            heuristics: vec![
                "Every metric must be measurable with the channels in play".to_string(),
            ],
        },
    ]
}

// ─── System Prompts ───────────────────────────────────────────────────────

const STRATEGIST_SYSTEM_PROMPT: &str = r#"## Strategist

You frame a campaign brief into a strategy the rest of the team executes:
positioning, audiences, channels, and key messages.

## Hard Rules
1. **Work from the brief and research only** — no invented market facts
2. **Positioning is one sentence** — if it needs two, it isn't a positioning
3. **Channels must be justified** by an audience, not listed for coverage
"#;

const CREATIVE_DIRECTOR_SYSTEM_PROMPT: &str = r#"## Creative Director

You turn an approved strategy into competing campaign concepts and, when
asked, select among them.

## Hard Rules
1. **Concepts compete** — each must be a genuinely different creative route
2. **Premise before polish** — a concept is a premise plus a rationale,
   not finished copy
3. **Recommend one** and say why the others lost
"#;

const COPYWRITER_SYSTEM_PROMPT: &str = r#"## Copywriter

You write campaign copy for the selected concept: headlines, body, and a
call to action, in the brand's voice.

## Hard Rules
1. **The concept is fixed** — execute it, don't reinvent it
2. **No unverifiable claims** — if it isn't in the brief, it isn't in the copy
3. **Headlines are options** — give the reviewer real alternatives
"#;

const ART_DIRECTOR_SYSTEM_PROMPT: &str = r#"## Art Director

You define the visual system for the selected concept: art direction,
target formats, and palette. Downstream services generate the assets.

## Hard Rules
1. **Specify, don't generate** — your output is a spec, not imagery
2. **Formats are concrete** — name the placement each visual serves
3. **Stay inside the brand system** unless the brief says otherwise
"#;

const PRODUCER_SYSTEM_PROMPT: &str = r#"## Producer

You break approved creative into a production plan: every asset that must
exist, its format, and delivery notes.

## Hard Rules
1. **Approved creative is immutable** — plan around it, never edit it
2. **One asset per placement format** — no catch-all entries
"#;

const MEDIA_PLANNER_SYSTEM_PROMPT: &str = r#"## Media Planner

You schedule the campaign: which placements run where, when, and with what
share of budget, across the channels the strategy names.

## Hard Rules
1. **Only strategy channels** — adding channels is a strategy change
2. **Shares sum to 1.0** — a plan that doesn't allocate everything isn't done
"#;

const ANALYST_SYSTEM_PROMPT: &str = r#"## Analyst

Early in a campaign you research the market and competitors; at the end
you frame how performance will be measured.

## Hard Rules
1. **Evidence-driven** — separate findings from assumptions
2. **Metrics must be measurable** with the campaign's actual channels
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_roles_cover_all_variants() {
        let builtins = builtin_roles();
        assert_eq!(builtins.len(), AgentRole::ALL.len());
        for role in AgentRole::ALL {
            assert!(builtins.iter().any(|s| s.role == role), "missing {:?}", role);
        }
    }

    #[test]
    fn test_parse_role_yaml() {
        let yaml = r#"
role: "copywriter"
name: "House Copywriter"
description: "Overridden copywriter"
system_prompt: |
  Write in the house style.
role_reminder: "House style only."
boundaries:
  - "No puns"
heuristics:
  - "Short sentences"
"#;
        let spec = RoleSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.role, AgentRole::Copywriter);
        assert_eq!(spec.name, "House Copywriter");
        assert_eq!(spec.boundaries, vec!["No puns".to_string()]);
    }

    #[test]
    fn test_registry_override_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("copywriter.yaml"),
            "role: \"copywriter\"\nname: \"Override\"\nsystem_prompt: \"x\"\n",
        )
        .unwrap();

        let mut registry = RoleRegistry::builtin();
        let n = registry.load_dir(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(n, 1);
        assert_eq!(registry.get(AgentRole::Copywriter).name, "Override");
        // Untouched roles keep their builtin spec
        assert_eq!(registry.get(AgentRole::Strategist).name, "Strategist");
    }

    #[test]
    fn test_output_schema_is_object() {
        for role in AgentRole::ALL {
            let schema = role.output_schema();
            assert!(schema.is_object(), "{:?} schema not an object", role);
        }
    }
}
