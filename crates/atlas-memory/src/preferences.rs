//! Durable-preference extraction from user utterances.
//!
//! Lightweight pattern matching over Chinese travel phrasing: budgets
//! (`预算2000元`), trip length (`玩5天`), interest themes, travel season,
//! companions, and known city names. Each hit becomes a keyed signal the
//! long-term store upserts; anything unrecognized simply yields no signals.

use std::sync::OnceLock;

use regex::Regex;

/// One extracted durable preference: a stable key plus display value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreferenceSignal {
    pub key: String,
    pub value: String,
}

impl PreferenceSignal {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("valid regex"))
}

fn days_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*天").expect("valid regex"))
}

/// Interest keyword → canonical theme tag.
const INTEREST_KEYWORDS: &[(&str, &str)] = &[
    ("历史", "历史文化"),
    ("文化", "历史文化"),
    ("古迹", "历史文化"),
    ("自然", "自然风光"),
    ("风景", "自然风光"),
    ("山水", "自然风光"),
    ("美食", "美食"),
    ("小吃", "美食"),
    ("海边", "海滨度假"),
    ("海滨", "海滨度假"),
    ("购物", "现代都市"),
    ("都市", "现代都市"),
    ("休闲", "休闲养生"),
    ("养生", "休闲养生"),
];

const SEASON_KEYWORDS: &[(&str, &str)] = &[
    ("春天", "春季"),
    ("春季", "春季"),
    ("夏天", "夏季"),
    ("夏季", "夏季"),
    ("避暑", "夏季"),
    ("秋天", "秋季"),
    ("秋季", "秋季"),
    ("冬天", "冬季"),
    ("冬季", "冬季"),
];

const COMPANION_KEYWORDS: &[(&str, &str)] = &[
    ("家人", "家庭"),
    ("父母", "家庭"),
    ("孩子", "家庭"),
    ("亲子", "家庭"),
    ("情侣", "情侣"),
    ("女朋友", "情侣"),
    ("男朋友", "情侣"),
    ("蜜月", "情侣"),
    ("朋友", "朋友"),
    ("同事", "朋友"),
    ("一个人", "独自"),
    ("独自", "独自"),
];

/// Extract every durable signal from one user message.
///
/// `known_cities` scopes city detection to the deployment's knowledge base
/// so arbitrary place names in small talk are not remembered.
pub fn extract_signals(text: &str, known_cities: &[String]) -> Vec<PreferenceSignal> {
    let mut signals = Vec::new();

    // Budget: any numbers mentioned alongside money words. Two or more
    // numbers form a range, one number reads as a ceiling.
    if text.contains("预算") || text.contains('元') || text.contains('块') {
        let mut numbers: Vec<u32> = number_re()
            .find_iter(text)
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        // Trip lengths share digits with budgets; drop day counts.
        for captures in days_re().captures_iter(text) {
            if let Ok(days) = captures[1].parse::<u32>() {
                if let Some(pos) = numbers.iter().position(|n| *n == days) {
                    numbers.remove(pos);
                }
            }
        }
        if !numbers.is_empty() {
            let low = *numbers.iter().min().unwrap_or(&0);
            let high = *numbers.iter().max().unwrap_or(&0);
            let value = if numbers.len() >= 2 && low != high {
                format!("{low}-{high}元")
            } else {
                format!("{high}元以内")
            };
            signals.push(PreferenceSignal::new("budget", value));
        }
    }

    if let Some(captures) = days_re().captures(text) {
        signals.push(PreferenceSignal::new("days", format!("{}天", &captures[1])));
    }

    for (keyword, tag) in INTEREST_KEYWORDS {
        if text.contains(keyword) {
            let signal = PreferenceSignal::new(format!("interest:{tag}"), *tag);
            if !signals.contains(&signal) {
                signals.push(signal);
            }
        }
    }

    for (keyword, season) in SEASON_KEYWORDS {
        if text.contains(keyword) {
            signals.push(PreferenceSignal::new("season", *season));
            break;
        }
    }

    for (keyword, companions) in COMPANION_KEYWORDS {
        if text.contains(keyword) {
            signals.push(PreferenceSignal::new("companions", *companions));
            break;
        }
    }

    for city in known_cities {
        if !city.is_empty() && text.contains(city.as_str()) {
            signals.push(PreferenceSignal::new(format!("city:{city}"), city.clone()));
        }
    }

    signals
}

/// Display label for a signal key, used when rendering remembered
/// preferences into the context.
pub fn label_for(key: &str) -> &'static str {
    if key.starts_with("interest:") {
        return "兴趣";
    }
    if key.starts_with("city:") {
        return "关注城市";
    }
    match key {
        "budget" => "预算",
        "days" => "旅行天数",
        "season" => "出行季节",
        "companions" => "同行",
        _ => "偏好",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cities() -> Vec<String> {
        ["北京", "杭州", "三亚"].iter().map(|s| s.to_string()).collect()
    }

    fn keys(signals: &[PreferenceSignal]) -> Vec<&str> {
        signals.iter().map(|s| s.key.as_str()).collect()
    }

    #[test]
    fn extracts_budget_ceiling() {
        let signals = extract_signals("预算2000元左右", &[]);
        assert_eq!(signals, vec![PreferenceSignal::new("budget", "2000元以内")]);
    }

    #[test]
    fn extracts_budget_range() {
        let signals = extract_signals("每天预算500到1000元", &[]);
        assert!(signals.contains(&PreferenceSignal::new("budget", "500-1000元")));
    }

    #[test]
    fn day_count_does_not_pollute_budget() {
        let signals = extract_signals("玩3天，预算2000元", &[]);
        assert!(signals.contains(&PreferenceSignal::new("budget", "2000元以内")));
        assert!(signals.contains(&PreferenceSignal::new("days", "3天")));
    }

    #[test]
    fn extracts_trip_length() {
        let signals = extract_signals("想去玩5天", &[]);
        assert_eq!(signals, vec![PreferenceSignal::new("days", "5天")]);
    }

    #[test]
    fn extracts_interests_without_duplicates() {
        let signals = extract_signals("喜欢历史文化和自然风景", &[]);
        let keys = keys(&signals);
        assert!(keys.contains(&"interest:历史文化"));
        assert!(keys.contains(&"interest:自然风光"));
        assert_eq!(
            keys.iter().filter(|k| **k == "interest:历史文化").count(),
            1
        );
    }

    #[test]
    fn extracts_season_and_companions() {
        let signals = extract_signals("春天想和家人出去玩", &[]);
        assert!(signals.contains(&PreferenceSignal::new("season", "春季")));
        assert!(signals.contains(&PreferenceSignal::new("companions", "家庭")));
    }

    #[test]
    fn city_detection_is_scoped_to_known_cities() {
        let signals = extract_signals("想去杭州或者巴黎", &cities());
        let keys = keys(&signals);
        assert!(keys.contains(&"city:杭州"));
        assert!(!keys.iter().any(|k| k.contains("巴黎")));
    }

    #[test]
    fn small_talk_yields_nothing() {
        assert!(extract_signals("你好呀", &cities()).is_empty());
        assert!(extract_signals("hello there", &[]).is_empty());
    }

    #[test]
    fn labels_cover_all_key_shapes() {
        assert_eq!(label_for("budget"), "预算");
        assert_eq!(label_for("interest:美食"), "兴趣");
        assert_eq!(label_for("city:北京"), "关注城市");
        assert_eq!(label_for("something-else"), "偏好");
    }
}
