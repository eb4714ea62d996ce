//! The travel domain tools.
//!
//! All five are pure lookups over [`TravelKnowledge`]: they mutate nothing
//! and answer from the in-process catalog. Results are JSON objects with a
//! `success` flag; a miss that the model should reason about (an unknown
//! city, say) is a successful call with `success: false`, not a `ToolError`.

mod calculate_budget;
mod city_info;
mod generate_route;
mod query_attractions;
mod search_cities;

pub use calculate_budget::CalculateBudgetTool;
pub use city_info::GetCityInfoTool;
pub use generate_route::GenerateRouteTool;
pub use query_attractions::QueryAttractionsTool;
pub use search_cities::SearchCitiesTool;

use std::sync::Arc;

use crate::knowledge::TravelKnowledge;
use crate::registry::ToolRegistry;

/// Register the full travel tool set against one shared knowledge base.
pub fn register_travel_tools(registry: &mut ToolRegistry, knowledge: Arc<TravelKnowledge>) {
    registry.register(Arc::new(SearchCitiesTool::new(knowledge.clone())));
    registry.register(Arc::new(QueryAttractionsTool::new(knowledge.clone())));
    registry.register(Arc::new(GenerateRouteTool::new(knowledge.clone())));
    registry.register(Arc::new(CalculateBudgetTool::new(knowledge.clone())));
    registry.register(Arc::new(GetCityInfoTool::new(knowledge)));
}
