use std::sync::Arc;

use async_trait::async_trait;
use atlas_core::tools::{Tool, ToolContext, ToolError};
use serde_json::json;

use crate::knowledge::TravelKnowledge;

/// Scores every catalog city against the user's interests, budget range and
/// season, and returns the matches sorted strongest first.
///
/// Scoring: +30 per matching interest, +20 for a daily budget inside the
/// range (+10 if merely under the ceiling), +15 for a matching season. A
/// query with no criteria at all scores every city a flat 50.
pub struct SearchCitiesTool {
    knowledge: Arc<TravelKnowledge>,
}

impl SearchCitiesTool {
    pub fn new(knowledge: Arc<TravelKnowledge>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Tool for SearchCitiesTool {
    fn name(&self) -> &str {
        "search_cities"
    }

    fn description(&self) -> &str {
        "根据用户兴趣、预算和季节偏好搜索匹配的城市"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "interests": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "用户兴趣标签列表，如历史文化、美食"
                },
                "budget_min": {"type": "integer", "description": "每日最低预算（元）"},
                "budget_max": {"type": "integer", "description": "每日最高预算（元）"},
                "season": {"type": "string", "description": "旅行季节，如春季"}
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let interests: Vec<String> = args["interests"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let budget_min = args["budget_min"].as_u64();
        let budget_max = args["budget_max"].as_u64();
        // Both bounds are needed for a range check, matching how the
        // assistant phrases budgets ("500-800元一天").
        let budget = budget_min.zip(budget_max);
        let season = args["season"].as_str();

        let no_criteria = interests.is_empty() && budget.is_none() && season.is_none();

        let mut matched: Vec<serde_json::Value> = Vec::new();
        for city in self.knowledge.cities() {
            let mut score = 0u32;
            let mut match_reasons: Vec<String> = Vec::new();

            for interest in &interests {
                let hit = city.tags.iter().any(|tag| *tag == interest.as_str())
                    || city.tags.iter().any(|tag| tag.contains(interest.as_str()));
                if hit {
                    score += 30;
                    match_reasons.push(format!("符合{interest}兴趣"));
                }
            }

            if let Some((min, max)) = budget {
                let avg = u64::from(city.avg_budget_per_day);
                if min <= avg && avg <= max {
                    score += 20;
                    match_reasons.push("预算适合".to_string());
                } else if avg < max {
                    score += 10;
                }
            }

            if let Some(season) = season {
                if city.best_season.contains(&season) {
                    score += 15;
                    match_reasons.push("季节适宜".to_string());
                }
            }

            if no_criteria {
                score = 50;
            }

            if score > 0 {
                matched.push(json!({
                    "city": city.name,
                    "score": score,
                    "info": city.info_json(),
                    "match_reasons": match_reasons,
                }));
            }
        }

        // Stable sort keeps catalog order among equal scores.
        matched.sort_by_key(|m| std::cmp::Reverse(m["score"].as_u64().unwrap_or(0)));

        Ok(json!({
            "success": true,
            "count": matched.len(),
            "cities": matched,
        }))
    }
}
