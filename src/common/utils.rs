use tracing::Level;

/// 表名基本校验
pub fn validate_table_name(name: &str) -> bool {
    // 限定表名为英文字母、下划线、数字，且不能以数字开头
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false)
}

// 把字符串转换成 Level，忽略大小写，不识别时返回 None
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

/// 两位国家代码转国旗 emoji，未知时返回白旗。
pub fn country_flag(code: &str) -> String {
    const WHITE_FLAG: &str = "🏳️";
    if code.len() != 2 || code.eq_ignore_ascii_case("UN") || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return WHITE_FLAG.to_string();
    }
    code.to_ascii_uppercase()
        .chars()
        .filter_map(|c| char::from_u32(c as u32 + 127_397))
        .collect()
}

/// 最小 10、最大 100，缺省 20。
pub fn clamp_page_size(limit: Option<usize>) -> usize {
    limit.unwrap_or(20).clamp(10, 100)
}
