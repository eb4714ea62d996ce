use std::sync::Arc;

use async_trait::async_trait;
use atlas_core::tools::{Tool, ToolContext, ToolError};
use serde_json::json;

use crate::knowledge::{CityRecord, TravelKnowledge};

/// Day-by-day itinerary sketch: one headline attraction per day, plus a
/// ticket/stay cost estimate. Days beyond the attraction list are simply
/// not planned; the cost estimate still covers the full stay.
pub struct GenerateRouteTool {
    knowledge: Arc<TravelKnowledge>,
}

impl GenerateRouteTool {
    pub fn new(knowledge: Arc<TravelKnowledge>) -> Self {
        Self { knowledge }
    }

    fn resolve(&self, name: &str) -> Option<&CityRecord> {
        self.knowledge
            .city(name)
            .or_else(|| self.knowledge.cities_in_region(name).first().copied())
    }
}

#[async_trait]
impl Tool for GenerateRouteTool {
    fn name(&self) -> &str {
        "generate_route"
    }

    fn description(&self) -> &str {
        "为指定城市生成按天的旅游路线规划"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["city"],
            "properties": {
                "city": {"type": "string", "description": "目标城市名称"},
                "days": {"type": "integer", "description": "旅行天数，默认3天"}
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let name = args["city"].as_str().unwrap_or_default();
        let days = args["days"].as_i64().unwrap_or(3);
        if days <= 0 {
            return Ok(json!({"success": false, "error": "天数必须大于0"}));
        }
        let days = days as u64;

        let Some(city) = self.resolve(name) else {
            return Ok(json!({"success": false, "error": format!("未找到城市: {name}")}));
        };

        let planned = (days as usize).min(city.attractions.len());
        let route_plan: Vec<serde_json::Value> = city.attractions[..planned]
            .iter()
            .enumerate()
            .map(|(i, attraction)| {
                json!({
                    "day": i + 1,
                    "attractions": [attraction.name],
                    "schedule": format!("游览{}", attraction.name),
                })
            })
            .collect();

        let tickets: u64 = city.attractions[..planned]
            .iter()
            .map(|a| u64::from(a.ticket))
            .sum();

        Ok(json!({
            "success": true,
            "city": name,
            "route_plan": route_plan,
            "total_cost_estimate": {
                "tickets": tickets,
                "total": tickets + u64::from(city.avg_budget_per_day) * days,
            },
        }))
    }
}
