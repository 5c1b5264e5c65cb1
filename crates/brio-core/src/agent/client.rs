//! Agent Client — invokes one specialist with a bounded context and
//! returns a structured result or a typed failure.
//!
//! The client never retries on its own; retry policy belongs to the phase
//! runner so that cost accounting stays accurate per attempt. It is
//! stateless and safely callable concurrently for independent roles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::roles::RoleSpec;

/// Request forwarded to the external completion service.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// JSON Schema the reply's structured block must satisfy, if any.
    pub schema: Option<serde_json::Value>,
    pub max_tokens: u32,
}

/// Reply from the external completion service.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Failure surfaced by a completion backend.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("provider timeout")]
    Timeout,
    #[error("provider error: {0}")]
    Provider(String),
}

/// The outbound seam to the completion provider. Implementations must be
/// safe to call concurrently.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest)
        -> Result<CompletionResponse, CompletionError>;
}

/// What a phase asks of a specialist: objective, output contract, and the
/// constraints folded into the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub objective: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub boundaries: Vec<String>,
    #[serde(default)]
    pub heuristics: Vec<String>,
    /// Reviewer feedback from a `revise` decision, folded into re-runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_feedback: Option<String>,
}

/// Tokens billed for one invocation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCost {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenCost {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Successful result of one specialist invocation.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub content: String,
    /// Parsed JSON block when the task carried an output schema.
    pub structured_fields: Option<serde_json::Value>,
    pub cost: TokenCost,
}

/// Typed failure of one specialist invocation. The caller decides retry
/// policy; the client never retries silently.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed agent output: {0}")]
    MalformedOutput(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("context budget exceeded: {0}")]
    BudgetExceeded(String),
}

#[derive(Debug, Clone)]
pub struct AgentClientConfig {
    /// Upper bound on one invocation, provider-side slowness included.
    pub timeout: Duration,
    /// Cap (in characters) on prior material forwarded to a specialist.
    pub context_budget: usize,
    pub max_tokens: u32,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            context_budget: 24_000,
            max_tokens: 8192,
        }
    }
}

/// Uniform interface for invoking one named specialist.
pub struct AgentClient {
    service: Arc<dyn CompletionService>,
    config: AgentClientConfig,
}

impl AgentClient {
    pub fn new(service: Arc<dyn CompletionService>, config: AgentClientConfig) -> Self {
        Self { service, config }
    }

    /// Invoke `role` with `task`, forwarding at most `context_budget`
    /// characters of prior material.
    pub async fn invoke(
        &self,
        role: &RoleSpec,
        task: &TaskSpec,
        context: &str,
    ) -> Result<AgentResult, AgentError> {
        let user_prompt = self.build_user_prompt(role, task, context)?;

        let request = CompletionRequest {
            system_prompt: role.system_prompt.clone(),
            user_prompt,
            schema: task.output_schema.clone(),
            max_tokens: self.config.max_tokens,
        };

        let response = match tokio::time::timeout(
            self.config.timeout,
            self.service.complete(request),
        )
        .await
        {
            Err(_) => return Err(AgentError::Timeout(self.config.timeout)),
            Ok(Err(CompletionError::Timeout)) => {
                return Err(AgentError::Timeout(self.config.timeout))
            }
            Ok(Err(CompletionError::Provider(msg))) => return Err(AgentError::Provider(msg)),
            Ok(Ok(resp)) => resp,
        };

        let structured_fields = if task.output_schema.is_some() {
            Some(extract_json_block(&response.content).ok_or_else(|| {
                AgentError::MalformedOutput(format!(
                    "no JSON block in {} reply",
                    role.role.as_str()
                ))
            })?)
        } else {
            None
        };

        tracing::debug!(
            role = role.role.as_str(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "agent invocation complete"
        );

        Ok(AgentResult {
            content: response.content,
            structured_fields,
            cost: TokenCost {
                input_tokens: response.input_tokens,
                output_tokens: response.output_tokens,
            },
        })
    }

    /// Assemble the task prompt. Fails with `BudgetExceeded` when the
    /// irreducible (non-context) portion alone overruns the budget.
    fn build_user_prompt(
        &self,
        role: &RoleSpec,
        task: &TaskSpec,
        context: &str,
    ) -> Result<String, AgentError> {
        let mut prompt = String::new();

        prompt.push_str(&format!("# Objective\n{}\n", task.objective));

        let boundaries: Vec<&String> =
            role.boundaries.iter().chain(task.boundaries.iter()).collect();
        if !boundaries.is_empty() {
            prompt.push_str("\n## Boundaries\n");
            for b in boundaries {
                prompt.push_str(&format!("- {}\n", b));
            }
        }

        let heuristics: Vec<&String> =
            role.heuristics.iter().chain(task.heuristics.iter()).collect();
        if !heuristics.is_empty() {
            prompt.push_str("\n## Heuristics\n");
            for h in heuristics {
                prompt.push_str(&format!("- {}\n", h));
            }
        }

        if let Some(ref feedback) = task.revision_feedback {
            prompt.push_str(&format!("\n## Reviewer Feedback\n{}\n", feedback));
        }

        if let Some(ref schema) = task.output_schema {
            prompt.push_str(&format!(
                "\n## Output Contract\nReply with prose followed by one JSON block \
                 matching this schema:\n```json\n{}\n```\n",
                serde_json::to_string_pretty(schema).unwrap_or_default()
            ));
        }

        if prompt.chars().count() > self.config.context_budget {
            return Err(AgentError::BudgetExceeded(format!(
                "task spec alone is {} chars against a budget of {}",
                prompt.chars().count(),
                self.config.context_budget
            )));
        }

        if !context.is_empty() {
            let remaining = self.config.context_budget - prompt.chars().count();
            prompt.push_str("\n## Prior Material\n");
            prompt.push_str(&clamp_context(context, remaining));
            prompt.push('\n');
        }

        if let Some(ref reminder) = role.role_reminder {
            prompt.push_str(&format!("\n**Reminder:** {}\n", reminder));
        }

        Ok(prompt)
    }
}

/// Trim oversized prior material to the budget, keeping the head and tail
/// and eliding the middle, so one phase's context growth cannot inflate
/// another's.
pub fn clamp_context(context: &str, budget_chars: usize) -> String {
    let total = context.chars().count();
    if total <= budget_chars {
        return context.to_string();
    }

    let keep_head = budget_chars * 6 / 10;
    let keep_tail = budget_chars.saturating_sub(keep_head).saturating_sub(64);
    let head: String = context.chars().take(keep_head).collect();
    let tail: String = context
        .chars()
        .skip(total.saturating_sub(keep_tail))
        .collect();
    format!(
        "{}\n…[{} characters elided]…\n{}",
        head,
        total - keep_head - keep_tail,
        tail
    )
}

/// Locate and parse the last JSON object in a reply (specialists reply
/// with prose followed by a JSON block).
pub fn extract_json_block(content: &str) -> Option<serde_json::Value> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&content[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::roles::{builtin_roles, AgentRole};

    struct ScriptedService {
        reply: String,
        delay: Duration,
    }

    #[async_trait]
    impl CompletionService for ScriptedService {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            tokio::time::sleep(self.delay).await;
            Ok(CompletionResponse {
                content: self.reply.clone(),
                model: "test-model".to_string(),
                input_tokens: 100,
                output_tokens: 50,
            })
        }
    }

    fn copywriter() -> RoleSpec {
        builtin_roles()
            .into_iter()
            .find(|s| s.role == AgentRole::Copywriter)
            .unwrap()
    }

    fn task(schema: Option<serde_json::Value>) -> TaskSpec {
        TaskSpec {
            objective: "Write copy".to_string(),
            output_schema: schema,
            boundaries: vec![],
            heuristics: vec![],
            revision_feedback: None,
        }
    }

    #[tokio::test]
    async fn test_invoke_parses_structured_block() {
        let service = Arc::new(ScriptedService {
            reply: "Here you go.\n{\"headlines\":[\"A\"],\"body\":\"b\",\"callToAction\":\"c\"}"
                .to_string(),
            delay: Duration::from_millis(0),
        });
        let client = AgentClient::new(service, AgentClientConfig::default());

        let result = client
            .invoke(
                &copywriter(),
                &task(Some(AgentRole::Copywriter.output_schema())),
                "prior material",
            )
            .await
            .unwrap();

        assert_eq!(result.cost.total(), 150);
        let fields = result.structured_fields.unwrap();
        assert_eq!(fields["headlines"][0], "A");
    }

    #[tokio::test]
    async fn test_invoke_malformed_output() {
        let service = Arc::new(ScriptedService {
            reply: "no json here".to_string(),
            delay: Duration::from_millis(0),
        });
        let client = AgentClient::new(service, AgentClientConfig::default());

        let err = client
            .invoke(
                &copywriter(),
                &task(Some(AgentRole::Copywriter.output_schema())),
                "",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedOutput(_)));
    }

    #[tokio::test]
    async fn test_invoke_timeout() {
        let service = Arc::new(ScriptedService {
            reply: "{}".to_string(),
            delay: Duration::from_millis(200),
        });
        let client = AgentClient::new(
            service,
            AgentClientConfig {
                timeout: Duration::from_millis(10),
                ..Default::default()
            },
        );

        let err = client.invoke(&copywriter(), &task(None), "").await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_budget_exceeded_on_irreducible_task() {
        let service = Arc::new(ScriptedService {
            reply: "ok".to_string(),
            delay: Duration::from_millis(0),
        });
        let client = AgentClient::new(
            service,
            AgentClientConfig {
                context_budget: 50,
                ..Default::default()
            },
        );

        let oversized = TaskSpec {
            objective: "x".repeat(500),
            output_schema: None,
            boundaries: vec![],
            heuristics: vec![],
            revision_feedback: None,
        };
        let err = client
            .invoke(&copywriter(), &oversized, "")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::BudgetExceeded(_)));
    }

    #[test]
    fn test_clamp_context_respects_budget() {
        let context = "a".repeat(10_000);
        let clamped = clamp_context(&context, 1_000);
        assert!(clamped.chars().count() <= 1_100);
        assert!(clamped.contains("elided"));

        let short = "short context";
        assert_eq!(clamp_context(short, 1_000), short);
    }

    #[test]
    fn test_extract_json_block() {
        assert!(extract_json_block("prose only").is_none());
        let v = extract_json_block("text {\"a\": 1} trailing").unwrap();
        assert_eq!(v["a"], 1);
    }
}
