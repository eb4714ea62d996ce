use std::sync::Arc;

use async_trait::async_trait;
use atlas_core::tools::{Tool, ToolContext, ToolError};
use serde_json::{json, Map};

use crate::knowledge::TravelKnowledge;

/// Attraction lookup for one or more cities. A name that is actually a
/// region (内蒙古) expands to every city in that region, each entry tagged
/// with the region it came from. Names matching nothing are skipped
/// silently so one typo does not sink a multi-city query.
pub struct QueryAttractionsTool {
    knowledge: Arc<TravelKnowledge>,
}

impl QueryAttractionsTool {
    pub fn new(knowledge: Arc<TravelKnowledge>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Tool for QueryAttractionsTool {
    fn name(&self) -> &str {
        "query_attractions"
    }

    fn description(&self) -> &str {
        "查询指定城市的景点信息"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["cities"],
            "properties": {
                "cities": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "要查询的城市名称列表"
                }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let cities: Vec<&str> = args["cities"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let mut data = Map::new();
        for name in cities {
            if let Some(city) = self.knowledge.city(name) {
                data.insert(
                    name.to_string(),
                    json!({
                        "attractions": city.attractions,
                        "avg_budget_per_day": city.avg_budget_per_day,
                        "recommended_days": city.recommended_days,
                    }),
                );
            } else {
                for city in self.knowledge.cities_in_region(name) {
                    data.insert(
                        city.name.to_string(),
                        json!({
                            "attractions": city.attractions,
                            "avg_budget_per_day": city.avg_budget_per_day,
                            "recommended_days": city.recommended_days,
                            "region": name,
                        }),
                    );
                }
            }
        }

        Ok(json!({
            "success": true,
            "cities_count": data.len(),
            "data": data,
        }))
    }
}
