// 进度字符串解析
//
// yt-dlp 的 `_percent_str` 形如 " 42.3%"，终端下可能带 ANSI 颜色码。
// 统一转换为 0-100 的 f64。

use regex::Regex;
use std::sync::OnceLock;

fn ansi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid ansi regex"))
}

/// 解析百分比字符串，无法解析时返回 `None`
pub fn parse_percent(raw: &str) -> Option<f64> {
    let cleaned = ansi_regex().replace_all(raw, "");
    let value = cleaned.trim().trim_end_matches('%').trim();

    let percent: f64 = value.parse().ok()?;
    if !percent.is_finite() {
        return None;
    }
    Some(percent.clamp(0.0, 100.0))
}
