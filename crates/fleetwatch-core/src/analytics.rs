//! Pure analytics over fleet snapshots: totals, agent selection, activity
//! scoring, model cost comparison and budget alerts.

use crate::{AgentId, AgentStatus, AgentSummary, AggregateStats, JobSummary};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Share of lifetime tokens attributed to the current day when the backend
/// does not report it.
const TODAY_SHARE: f64 = 0.15;

const HOUR_MS: i64 = 60 * 60 * 1000;

impl AggregateStats {
    /// Totals computed from the agent and job lists.
    pub fn from_fleet(agents: &[AgentSummary], jobs: &[JobSummary]) -> Self {
        let total_tokens: u64 = agents.iter().map(|a| a.tokens_used).sum();
        let tokens_today = (total_tokens as f64 * TODAY_SHARE).round() as u64;
        Self {
            active_agents: count(agents.iter().filter(|a| a.status == AgentStatus::Active)),
            pending_tasks: count(jobs.iter().filter(|j| j.enabled)),
            total_cost: agents.iter().map(|a| a.cost_accrued).sum(),
            total_tokens,
            tokens_today,
            burn_rate: (tokens_today as f64 / 24.0).round() as u64,
        }
    }
}

fn count<T>(items: impl Iterator<Item = T>) -> u32 {
    u32::try_from(items.count()).unwrap_or(u32::MAX)
}

/// Ordering for [`select_agents`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Name, ascending.
    #[default]
    Name,
    /// Most alive first, then by name.
    Status,
    /// Highest token usage first.
    Tokens,
    /// Highest cost first.
    Cost,
}

/// Agents with the given status (or all of them), ordered by `sort`.
pub fn select_agents(
    agents: &[AgentSummary],
    status: Option<AgentStatus>,
    sort: SortKey,
) -> Vec<&AgentSummary> {
    let mut selected: Vec<_> = agents
        .iter()
        .filter(|a| status.is_none_or(|s| a.status == s))
        .collect();
    selected.sort_by(|a, b| match sort {
        SortKey::Name => by_name(a, b),
        SortKey::Status => b
            .status
            .rank()
            .cmp(&a.status.rank())
            .then_with(|| by_name(a, b)),
        SortKey::Tokens => b.tokens_used.cmp(&a.tokens_used),
        SortKey::Cost => b.cost_accrued.total_cmp(&a.cost_accrued),
    });
    selected
}

fn by_name(a: &AgentSummary, b: &AgentSummary) -> Ordering {
    a.name
        .to_lowercase()
        .cmp(&b.name.to_lowercase())
        .then_with(|| a.name.cmp(&b.name))
}

/// Recency score from 20 (idle for days) to 100 (active within the hour).
pub fn activity_score(agent: &AgentSummary, now_ms: i64) -> u8 {
    let idle_ms = now_ms.saturating_sub(agent.last_activity_at_ms);
    match idle_ms {
        ms if ms < HOUR_MS => 100,
        ms if ms < 6 * HOUR_MS => 80,
        ms if ms < 24 * HOUR_MS => 60,
        ms if ms < 72 * HOUR_MS => 40,
        _ => 20,
    }
}

pub const SONNET: &str = "claude-sonnet-4-20250514";
pub const OPUS: &str = "claude-opus-4-5";
pub const HAIKU: &str = "claude-haiku-3-20240307";

/// Dollar price per thousand tokens, by model identifier.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    prices: HashMap<String, f64>,
    unknown_price: f64,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        let prices = [(SONNET, 0.003), (OPUS, 0.015), (HAIKU, 0.0015)]
            .into_iter()
            .map(|(model, price)| (model.to_string(), price))
            .collect();
        Self {
            prices,
            unknown_price: 0.005,
        }
    }
}

/// Cost of a token volume on two models.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostImpact {
    pub current_cost: f64,
    pub new_cost: f64,
    /// Positive when the proposed model is cheaper.
    pub savings: f64,
    /// `None` when the current cost is zero.
    pub savings_percent: Option<f64>,
}

/// A suggested model switch for one agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRecommendation {
    pub agent_id: AgentId,
    pub recommended: String,
    pub reason: &'static str,
    pub impact: CostImpact,
}

impl ModelCatalog {
    /// Set or override the price of a model.
    pub fn with_price(mut self, model: impl Into<String>, per_1k_tokens: f64) -> Self {
        self.prices.insert(model.into(), per_1k_tokens);
        self
    }

    pub fn price(&self, model: &str) -> f64 {
        self.prices.get(model).copied().unwrap_or(self.unknown_price)
    }

    pub fn cost_impact(&self, current: &str, proposed: &str, tokens: u64) -> CostImpact {
        let thousands = tokens as f64 / 1000.0;
        let current_cost = thousands * self.price(current);
        let new_cost = thousands * self.price(proposed);
        let savings = current_cost - new_cost;
        CostImpact {
            current_cost,
            new_cost,
            savings,
            savings_percent: (current_cost > 0.0).then(|| savings / current_cost * 100.0),
        }
    }

    /// Suggest a better-fitting model for an agent, if any.
    pub fn recommend_model(&self, agent: &AgentSummary) -> Option<ModelRecommendation> {
        let purpose = agent.purpose.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| purpose.contains(w));
        let on_opus = agent.model.contains("opus");

        let (recommended, reason) = if agent.tokens_used > 80_000 && on_opus {
            (SONNET, "High token usage; Sonnet keeps quality at a fifth of the cost")
        } else if agent.tokens_used < 20_000 && mentions(&["reminder", "simple"]) {
            (HAIKU, "Low complexity tasks; Haiku is faster and cheaper")
        } else if mentions(&["analysis", "strategy", "complex"]) && !on_opus {
            (OPUS, "Complex reasoning tasks benefit from Opus")
        } else {
            return None;
        };
        if agent.model == recommended {
            return None;
        }

        Some(ModelRecommendation {
            agent_id: agent.id.clone(),
            recommended: recommended.to_string(),
            reason,
            impact: self.cost_impact(&agent.model, recommended, agent.tokens_used),
        })
    }
}

/// Spend limits in dollars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetThresholds {
    pub daily: f64,
    pub weekly: f64,
    pub monthly: f64,
    pub per_agent: f64,
}

impl Default for BudgetThresholds {
    fn default() -> Self {
        Self {
            daily: 5.0,
            weekly: 30.0,
            monthly: 120.0,
            per_agent: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    High,
    Medium,
    Low,
}

/// A budget problem worth surfacing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetAlert {
    pub priority: AlertPriority,
    pub title: String,
    pub message: String,
    pub agent_id: Option<AgentId>,
}

impl BudgetAlert {
    fn fleet(priority: AlertPriority, title: impl Into<String>, message: String) -> Self {
        Self {
            priority,
            title: title.into(),
            message,
            agent_id: None,
        }
    }
}

/// Offline agents above this cost are flagged as idle spend.
const IDLE_SPEND: f64 = 0.5;

/// Check agent costs (treated as daily spend) against the thresholds.
///
/// Alerts come back most urgent first; order within a priority follows the
/// agent list.
pub fn check_budget(agents: &[AgentSummary], limits: &BudgetThresholds) -> Vec<BudgetAlert> {
    let daily: f64 = agents.iter().map(|a| a.cost_accrued).sum();
    let mut alerts = Vec::new();

    if daily > limits.daily {
        alerts.push(BudgetAlert::fleet(
            AlertPriority::High,
            "Daily budget exceeded",
            format!("Current daily cost: ${daily:.2} (budget: ${:.2})", limits.daily),
        ));
    } else if daily > limits.daily * 0.8 {
        alerts.push(BudgetAlert::fleet(
            AlertPriority::Medium,
            "Daily budget warning",
            format!("Daily cost approaching budget: ${daily:.2}/${:.2}", limits.daily),
        ));
    }

    for (title, days, budget) in [
        ("Weekly budget forecast", 7.0, limits.weekly),
        ("Monthly budget forecast", 30.0, limits.monthly),
    ] {
        let projected = daily * days;
        if projected > budget {
            alerts.push(BudgetAlert::fleet(
                AlertPriority::Medium,
                title,
                format!("Projected cost: ${projected:.2} (budget: ${budget:.2})"),
            ));
        }
    }

    for agent in agents.iter().filter(|a| a.cost_accrued > limits.per_agent) {
        alerts.push(BudgetAlert {
            priority: AlertPriority::Low,
            title: format!("Expensive agent: {}", agent.name),
            message: format!(
                "Daily cost: ${:.2} (limit: ${:.2})",
                agent.cost_accrued, limits.per_agent
            ),
            agent_id: Some(agent.id.clone()),
        });
    }

    let idle_spenders = agents
        .iter()
        .filter(|a| a.status == AgentStatus::Offline && a.cost_accrued > IDLE_SPEND)
        .count();
    if idle_spenders > 0 {
        alerts.push(BudgetAlert::fleet(
            AlertPriority::Low,
            "Inactive expensive agents",
            format!("{idle_spenders} offline agents still accruing cost"),
        ));
    }

    alerts.sort_by_key(|alert| alert.priority);
    alerts
}
