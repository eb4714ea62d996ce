use std::sync::Arc;

use async_trait::async_trait;
use atlas_core::tools::{Tool, ToolContext, ToolError};
use serde_json::json;

use crate::knowledge::TravelKnowledge;

/// Trip cost breakdown for one city. The daily average splits 40% meals,
/// 20% local transport and 30% accommodation; attraction tickets are summed
/// over the whole catalog and a flat 1000 covers getting there and back.
pub struct CalculateBudgetTool {
    knowledge: Arc<TravelKnowledge>,
}

impl CalculateBudgetTool {
    pub fn new(knowledge: Arc<TravelKnowledge>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Tool for CalculateBudgetTool {
    fn name(&self) -> &str {
        "calculate_budget"
    }

    fn description(&self) -> &str {
        "计算指定城市和天数的旅游预算"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["city", "days"],
            "properties": {
                "city": {"type": "string", "description": "目标城市"},
                "days": {"type": "integer", "description": "旅行天数"},
                "include_accommodation": {"type": "boolean", "description": "是否包含住宿费用，默认是"},
                "include_transportation": {"type": "boolean", "description": "是否包含城际交通费用，默认是"}
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let name = args["city"].as_str().unwrap_or_default();
        let days = args["days"].as_i64().unwrap_or(0);
        let include_accommodation = args["include_accommodation"].as_bool().unwrap_or(true);
        let include_transportation = args["include_transportation"].as_bool().unwrap_or(true);

        if days <= 0 {
            return Ok(json!({"success": false, "error": "天数必须大于0"}));
        }
        let days = days as u64;

        let Some(city) = self.knowledge.city(name) else {
            return Ok(json!({"success": false, "error": format!("未找到城市: {name}")}));
        };

        let avg_daily = f64::from(city.avg_budget_per_day);
        let tickets: u64 = city.attractions.iter().map(|a| u64::from(a.ticket)).sum();
        let meals = (avg_daily * 0.4 * days as f64) as u64;
        let local_transport = (avg_daily * 0.2 * days as f64) as u64;

        let mut budget = json!({
            "tickets": tickets,
            "meals": meals,
            "local_transportation": local_transport,
        });
        let mut total = tickets + meals + local_transport;

        if include_accommodation {
            let accommodation = (avg_daily * 0.3 * days as f64) as u64;
            budget["accommodation"] = json!(accommodation);
            total += accommodation;
        }
        if include_transportation {
            budget["inter_city_transportation"] = json!(1000);
            total += 1000;
        }

        budget["total"] = json!(total);
        budget["days"] = json!(days);
        budget["avg_per_day"] = json!(total / days);

        Ok(json!({
            "success": true,
            "city": name,
            "budget": budget,
        }))
    }
}
