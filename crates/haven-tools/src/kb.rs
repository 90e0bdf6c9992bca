use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::schema::{ParamType, ParameterSchema, PropertySpec};
use crate::{Tool, ToolContext, ToolResult};

const DEFAULT_MAX_RESULTS: u64 = 5;
const MAX_RESULTS_CAP: u64 = 20;

/// A knowledge-base article as returned to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub content: String,
    pub url: String,
    /// Relevance to the query in [0, 1].
    pub relevance: f64,
}

/// The knowledge-base backend seam. The real article index lives elsewhere;
/// this trait is what the tool dispatches against.
#[async_trait]
pub trait KnowledgeBackend: Send + Sync {
    async fn search(
        &self,
        query: &str,
        filters: &HashMap<String, String>,
        max_results: usize,
    ) -> Result<Vec<Article>, String>;
}

/// In-process backend over a seeded article set.
///
/// Scoring is term overlap: the fraction of query terms present in the
/// article title or body. Results come back in strictly descending relevance,
/// ties broken by ascending id.
pub struct StaticKnowledgeBase {
    articles: Vec<SeedArticle>,
}

struct SeedArticle {
    id: String,
    title: String,
    content: String,
    url: String,
    category: String,
}

impl StaticKnowledgeBase {
    pub fn new() -> Self {
        Self {
            articles: seed_articles(),
        }
    }

    pub fn with_articles(
        articles: Vec<(&str, &str, &str, &str, &str)>,
    ) -> Self {
        Self {
            articles: articles
                .into_iter()
                .map(|(id, title, content, url, category)| SeedArticle {
                    id: id.to_string(),
                    title: title.to_string(),
                    content: content.to_string(),
                    url: url.to_string(),
                    category: category.to_string(),
                })
                .collect(),
        }
    }
}

impl Default for StaticKnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeBackend for StaticKnowledgeBase {
    async fn search(
        &self,
        query: &str,
        filters: &HashMap<String, String>,
        max_results: usize,
    ) -> Result<Vec<Article>, String> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Article> = self
            .articles
            .iter()
            .filter(|a| {
                filters
                    .get("category")
                    .map(|c| a.category.eq_ignore_ascii_case(c))
                    .unwrap_or(true)
            })
            .filter_map(|a| {
                let haystack = format!("{} {}", a.title, a.content).to_lowercase();
                let hits = terms.iter().filter(|t| haystack.contains(*t)).count();
                if hits == 0 {
                    return None;
                }
                Some(Article {
                    id: a.id.clone(),
                    title: a.title.clone(),
                    content: a.content.clone(),
                    url: a.url.clone(),
                    relevance: hits as f64 / terms.len() as f64,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(max_results);
        Ok(scored)
    }
}

/// `kb_search` — ranked knowledge-base lookup.
pub struct KbSearchTool {
    backend: Arc<dyn KnowledgeBackend>,
    schema: ParameterSchema,
}

impl KbSearchTool {
    pub fn new(backend: Arc<dyn KnowledgeBackend>) -> Self {
        let schema = ParameterSchema::new()
            .property(
                "query",
                PropertySpec::new(ParamType::String, "Search query keywords or phrase"),
            )
            .property(
                "filters",
                PropertySpec::new(
                    ParamType::Object,
                    "Optional filter map, e.g. {\"category\": \"billing\"}",
                ),
            )
            .property(
                "max_results",
                PropertySpec::new(ParamType::Integer, "Result cap (max 20)")
                    .with_default(json!(DEFAULT_MAX_RESULTS)),
            )
            .require("query");
        Self { backend, schema }
    }
}

#[async_trait]
impl Tool for KbSearchTool {
    fn name(&self) -> &str {
        "kb_search"
    }

    fn description(&self) -> &str {
        "Search the support knowledge base for help articles. \
         Returns ranked results with title, content, and URL."
    }

    fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    async fn execute(&self, params: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        let query = params["query"].as_str().unwrap_or_default();
        let max_results = params["max_results"]
            .as_u64()
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .min(MAX_RESULTS_CAP) as usize;
        let filters: HashMap<String, String> = params["filters"]
            .as_object()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        match self.backend.search(query, &filters, max_results).await {
            Ok(articles) => {
                let total = articles.len();
                ToolResult::ok(json!({
                    "query": query,
                    "results": articles,
                    "total": total,
                }))
            }
            Err(e) => ToolResult::fail(format!("knowledge base search failed: {e}")),
        }
    }
}

fn seed_articles() -> Vec<SeedArticle> {
    let seeds = [
        (
            "kb-001",
            "Resetting your password",
            "Use the 'Forgot password' link on the sign-in page. A reset link \
             is emailed to your registered address and expires after one hour.",
            "/help/password-reset",
            "authentication",
        ),
        (
            "kb-002",
            "Understanding your invoice",
            "Invoices are issued on the first of each month and cover the \
             previous billing period. Line items map to plan charges, seats, \
             and usage overages.",
            "/help/invoices",
            "billing",
        ),
        (
            "kb-003",
            "Requesting a refund",
            "Refunds for annual plans are prorated within 30 days of renewal. \
             Open a billing ticket with your invoice number to start one.",
            "/help/refunds",
            "billing",
        ),
        (
            "kb-004",
            "Enabling two-factor authentication",
            "Two-factor authentication supports TOTP apps and security keys. \
             Enable it under Account Settings, then re-authenticate once.",
            "/help/2fa",
            "security",
        ),
        (
            "kb-005",
            "Troubleshooting connection errors",
            "Connection errors usually clear after refreshing your session. \
             Check the status page for ongoing incidents before opening a \
             technical ticket.",
            "/help/connection-errors",
            "technical",
        ),
        (
            "kb-006",
            "Changing your subscription plan",
            "Plan changes take effect immediately; billing is prorated. \
             Downgrades keep existing data but may lock premium features.",
            "/help/plan-changes",
            "billing",
        ),
    ];
    seeds
        .into_iter()
        .map(|(id, title, content, url, category)| SeedArticle {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            url: url.to_string(),
            category: category.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> KbSearchTool {
        KbSearchTool::new(Arc::new(StaticKnowledgeBase::new()))
    }

    fn ctx() -> ToolContext {
        ToolContext::default()
    }

    #[tokio::test]
    async fn results_are_ranked_descending() {
        let res = tool()
            .execute(json!({ "query": "billing invoice refund", "max_results": 10 }), &ctx())
            .await;
        assert!(res.success);
        let results = res.data["results"].as_array().unwrap();
        assert!(!results.is_empty());
        let relevances: Vec<f64> = results
            .iter()
            .map(|r| r["relevance"].as_f64().unwrap())
            .collect();
        for pair in relevances.windows(2) {
            assert!(pair[0] >= pair[1], "descending relevance: {relevances:?}");
        }
    }

    #[tokio::test]
    async fn ties_break_by_ascending_id() {
        let kb = StaticKnowledgeBase::with_articles(vec![
            ("b-2", "billing help", "billing", "/b2", "billing"),
            ("b-1", "billing guide", "billing", "/b1", "billing"),
        ]);
        let articles = kb.search("billing", &HashMap::new(), 10).await.unwrap();
        assert_eq!(articles[0].id, "b-1");
        assert_eq!(articles[1].id, "b-2");
        assert_eq!(articles[0].relevance, articles[1].relevance);
    }

    #[tokio::test]
    async fn category_filter_narrows_results() {
        let res = tool()
            .execute(
                json!({ "query": "ticket", "filters": { "category": "billing" } }),
                &ctx(),
            )
            .await;
        assert!(res.success);
        for r in res.data["results"].as_array().unwrap() {
            let id = r["id"].as_str().unwrap();
            assert!(["kb-002", "kb-003", "kb-006"].contains(&id), "{id} not billing");
        }
    }

    #[tokio::test]
    async fn max_results_is_capped_at_twenty() {
        let res = tool()
            .execute(json!({ "query": "help", "max_results": 500 }), &ctx())
            .await;
        assert!(res.success);
        assert!(res.data["results"].as_array().unwrap().len() <= 20);
    }

    #[tokio::test]
    async fn relevance_is_within_unit_interval() {
        let res = tool().execute(json!({ "query": "password reset" }), &ctx()).await;
        for r in res.data["results"].as_array().unwrap() {
            let rel = r["relevance"].as_f64().unwrap();
            assert!((0.0..=1.0).contains(&rel));
        }
    }
}
