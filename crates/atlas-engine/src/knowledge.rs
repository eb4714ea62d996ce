//! The travel knowledge base consulted by every domain tool.
//!
//! A deployment loads one immutable set of city records at startup; tools
//! only read it. Lookup is by exact city name, with a region fallback for
//! queries like 内蒙古 that name an area rather than a city.

use serde::Serialize;

/// One visitable attraction inside a city.
#[derive(Clone, Debug, Serialize)]
pub struct Attraction {
    pub name: &'static str,
    /// Category shown to the model (历史遗迹, 自然风光, ...).
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Suggested visit length in hours.
    pub duration: u32,
    /// Entry ticket in yuan; 0 for free attractions.
    pub ticket: u32,
}

/// Everything known about one city.
#[derive(Clone, Debug, Serialize)]
pub struct CityRecord {
    #[serde(skip)]
    pub name: &'static str,
    pub region: &'static str,
    pub tags: Vec<&'static str>,
    pub best_season: Vec<&'static str>,
    pub avg_budget_per_day: u32,
    pub recommended_days: u32,
    pub attractions: Vec<Attraction>,
}

impl CityRecord {
    /// The record as the JSON object embedded in tool results. The name is
    /// carried by the enclosing key, not the object itself.
    pub fn info_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Immutable city catalog. Order is fixed so equal-score search results
/// always come back in the same order.
pub struct TravelKnowledge {
    cities: Vec<CityRecord>,
}

impl TravelKnowledge {
    pub fn new(cities: Vec<CityRecord>) -> Self {
        Self { cities }
    }

    pub fn city(&self, name: &str) -> Option<&CityRecord> {
        self.cities.iter().find(|c| c.name == name)
    }

    pub fn cities(&self) -> &[CityRecord] {
        &self.cities
    }

    pub fn city_names(&self) -> Vec<String> {
        self.cities.iter().map(|c| c.name.to_string()).collect()
    }

    /// All cities whose `region` equals `region`, in catalog order.
    pub fn cities_in_region(&self, region: &str) -> Vec<&CityRecord> {
        self.cities.iter().filter(|c| c.region == region).collect()
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    /// The stock catalog shipped with the assistant.
    pub fn builtin() -> Self {
        fn attraction(name: &'static str, kind: &'static str, duration: u32, ticket: u32) -> Attraction {
            Attraction { name, kind, duration, ticket }
        }

        Self::new(vec![
            CityRecord {
                name: "北京",
                region: "华北",
                tags: vec!["历史文化", "首都", "古建筑"],
                best_season: vec!["春季", "秋季"],
                avg_budget_per_day: 500,
                recommended_days: 4,
                attractions: vec![
                    attraction("故宫", "历史遗迹", 4, 60),
                    attraction("长城", "历史遗迹", 6, 40),
                    attraction("天坛", "历史遗迹", 3, 15),
                    attraction("颐和园", "园林", 4, 30),
                ],
            },
            CityRecord {
                name: "上海",
                region: "华东",
                tags: vec!["现代都市", "购物", "美食"],
                best_season: vec!["春季", "秋季"],
                avg_budget_per_day: 600,
                recommended_days: 3,
                attractions: vec![
                    attraction("外滩", "城市景观", 3, 0),
                    attraction("东方明珠", "地标建筑", 2, 180),
                    attraction("迪士尼乐园", "主题乐园", 8, 399),
                    attraction("豫园", "园林", 2, 40),
                ],
            },
            CityRecord {
                name: "杭州",
                region: "华东",
                tags: vec!["自然风光", "人文历史", "休闲"],
                best_season: vec!["春季", "秋季"],
                avg_budget_per_day: 400,
                recommended_days: 3,
                attractions: vec![
                    attraction("西湖", "自然风光", 4, 0),
                    attraction("灵隐寺", "宗教文化", 3, 45),
                    attraction("千岛湖", "自然风光", 6, 150),
                    attraction("宋城", "主题乐园", 4, 310),
                ],
            },
            CityRecord {
                name: "成都",
                region: "西南",
                tags: vec!["美食", "休闲", "熊猫"],
                best_season: vec!["春季", "秋季"],
                avg_budget_per_day: 350,
                recommended_days: 4,
                attractions: vec![
                    attraction("大熊猫繁育研究基地", "动物园", 4, 55),
                    attraction("宽窄巷子", "历史街区", 3, 0),
                    attraction("武侯祠", "历史遗迹", 2, 50),
                    attraction("都江堰", "历史遗迹", 5, 80),
                ],
            },
            CityRecord {
                name: "西安",
                region: "西北",
                tags: vec!["历史文化", "古都", "美食"],
                best_season: vec!["春季", "秋季"],
                avg_budget_per_day: 400,
                recommended_days: 4,
                attractions: vec![
                    attraction("兵马俑", "历史遗迹", 4, 120),
                    attraction("大雁塔", "历史遗迹", 2, 50),
                    attraction("古城墙", "历史遗迹", 3, 54),
                    attraction("华清宫", "历史遗迹", 3, 120),
                ],
            },
            CityRecord {
                name: "厦门",
                region: "华南",
                tags: vec!["海滨", "休闲", "文艺"],
                best_season: vec!["春季", "秋季", "冬季"],
                avg_budget_per_day: 450,
                recommended_days: 3,
                attractions: vec![
                    attraction("鼓浪屿", "海岛", 6, 0),
                    attraction("南普陀寺", "宗教文化", 2, 0),
                    attraction("曾厝垵", "历史街区", 3, 0),
                    attraction("环岛路", "城市景观", 3, 0),
                ],
            },
            CityRecord {
                name: "呼和浩特",
                region: "内蒙古",
                tags: vec!["草原", "历史文化", "美食", "民族风情"],
                best_season: vec!["夏季", "秋季"],
                avg_budget_per_day: 350,
                recommended_days: 3,
                attractions: vec![
                    attraction("大召寺", "宗教文化", 2, 35),
                    attraction("内蒙古博物馆", "博物馆", 2, 0),
                    attraction("昭君墓", "历史遗迹", 2, 65),
                    attraction("敕勒川草原", "自然风光", 4, 0),
                ],
            },
            CityRecord {
                name: "呼伦贝尔",
                region: "内蒙古",
                tags: vec!["草原", "自然风光", "民族风情", "美食"],
                best_season: vec!["夏季", "秋季"],
                avg_budget_per_day: 450,
                recommended_days: 4,
                attractions: vec![
                    attraction("呼伦贝尔大草原", "自然风光", 6, 0),
                    attraction("额尔古纳湿地", "自然风光", 4, 65),
                    attraction("满洲里国门", "历史遗迹", 2, 80),
                    attraction("套娃广场", "主题广场", 2, 0),
                ],
            },
            CityRecord {
                name: "包头",
                region: "内蒙古",
                tags: vec!["草原", "工业", "美食"],
                best_season: vec!["夏季", "秋季"],
                avg_budget_per_day: 300,
                recommended_days: 2,
                attractions: vec![
                    attraction("赛罕塔拉公园", "自然风光", 3, 0),
                    attraction("北方兵器城", "工业旅游", 2, 50),
                    attraction("五当召", "宗教文化", 3, 60),
                ],
            },
        ])
    }
}

impl Default for TravelKnowledge {
    fn default() -> Self {
        Self::builtin()
    }
}
