use once_cell::sync::Lazy;
use regex::Regex;

fn ci(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){pattern}")).expect("static pattern is valid")
}

pub static TASK_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| ci(r"(?:T-[A-Za-z0-9_-]+|TASK-[A-Za-z0-9_-]+|\d+(?:\.\d+)*)"));

pub static TASK_ID_FULL_PATTERN: Lazy<Regex> =
    Lazy::new(|| ci(r"^(?:T-[A-Za-z0-9_-]+|TASK-[A-Za-z0-9_-]+|\d+(?:\.\d+)*)$"));

pub static TASK_HEADER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*-\s*\[[ xX]\]\s*(.+?)\s*$").unwrap());

pub static CHECK_ITEM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*-\s*\[([ xX])\]\s*(.+?)\s*$").unwrap());

pub static HEADING_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*##+\s+(.+?)\s*$").unwrap());

pub static DEPENDENCY_PATTERN: Lazy<Regex> =
    Lazy::new(|| ci(r"^\s*-\s*(?:依存|depends?\s*on|depends_on)\s*:\s*(.+?)\s*$"));

pub static TARGET_PATHS_PATTERN: Lazy<Regex> =
    Lazy::new(|| ci(r"^\s*-\s*(?:対象|target[_\s-]*paths?)\s*:\s*(.+?)\s*$"));

pub static DESCRIPTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| ci(r"^\s*-\s*(?:成果物|説明|description|deliverable|outcome)\s*:\s*(.+?)\s*$"));

pub static PERSONA_DEFAULTS_PATTERN: Lazy<Regex> =
    Lazy::new(|| ci(r"^\s*-\s*(?:persona[_\s-]*defaults?|ペルソナ(?:既定|デフォルト))\s*:\s*(.+?)\s*$"));

pub static PERSONAS_PATTERN: Lazy<Regex> =
    Lazy::new(|| ci(r"^\s*-\s*(?:personas|ペルソナ(?:定義)?)\s*:\s*(.+?)\s*$"));

pub static DISABLE_PERSONAS_PATTERN: Lazy<Regex> =
    Lazy::new(|| ci(r"^\s*-\s*(?:disable[_\s-]*personas?|利用禁止(?:ペルソナ)?|disable)\s*:\s*(.+?)\s*$"));

pub static TASK_PERSONA_POLICY_PATTERN: Lazy<Regex> =
    Lazy::new(|| ci(r"^\s*-\s*(?:persona[_\s-]*policy|ペルソナ方針)\s*:\s*(.+?)\s*$"));

pub static PHASE_OVERRIDES_PATTERN: Lazy<Regex> =
    Lazy::new(|| ci(r"^\s*-\s*(?:phase[_\s-]*overrides?|フェーズ上書き)\s*:\s*(.+?)\s*$"));

pub static PHASE_ASSIGNMENTS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    ci(r"^\s*-\s*(?:phase[_\s-]*(?:assignments?|owners?|executors?)|フェーズ(?:担当|実行))\s*:\s*(.+?)\s*$")
});

pub static REQUIRES_PLAN_PATTERN: Lazy<Regex> = Lazy::new(|| ci(r"requires_plan\s*=\s*(true|false)"));

pub static REQUIRES_PLAN_TITLE_SUFFIX_PATTERN: Lazy<Regex> =
    Lazy::new(|| ci(r"\s*[（(][^）)]*requires_plan\s*=\s*(?:true|false)[^）)]*[）)]\s*$"));

pub static TASK_HEADER_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    ci(r"^(?P<task_id>(?:T-[A-Za-z0-9_-]+|TASK-[A-Za-z0-9_-]+|\d+(?:\.\d+)*))\s+(?P<title>.+)$")
});
