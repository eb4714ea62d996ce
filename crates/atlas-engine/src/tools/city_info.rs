use std::sync::Arc;

use async_trait::async_trait;
use atlas_core::tools::{Tool, ToolContext, ToolError};
use serde_json::json;

use crate::knowledge::TravelKnowledge;

/// Full record for one city. A region name answers with the first member
/// city's record, flagged `is_region` and listing every member, so the
/// model can follow up per city.
pub struct GetCityInfoTool {
    knowledge: Arc<TravelKnowledge>,
}

impl GetCityInfoTool {
    pub fn new(knowledge: Arc<TravelKnowledge>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Tool for GetCityInfoTool {
    fn name(&self) -> &str {
        "get_city_info"
    }

    fn description(&self) -> &str {
        "获取指定城市的详细信息"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["city"],
            "properties": {
                "city": {"type": "string", "description": "城市名称"}
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let name = args["city"].as_str().unwrap_or_default();

        if let Some(city) = self.knowledge.city(name) {
            return Ok(json!({
                "success": true,
                "city": name,
                "info": city.info_json(),
            }));
        }

        let members = self.knowledge.cities_in_region(name);
        if let Some(first) = members.first() {
            let mut info = first.info_json();
            info["name"] = json!(name);
            info["is_region"] = json!(true);
            info["cities"] = json!(members.iter().map(|c| c.name).collect::<Vec<_>>());
            return Ok(json!({
                "success": true,
                "city": name,
                "info": info,
            }));
        }

        Ok(json!({"success": false, "error": format!("未找到城市: {name}")}))
    }
}
