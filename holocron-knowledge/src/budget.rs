//! Token estimation and line-wise trimming for context blocks.

/// Average bytes per token used for estimates.
pub const BYTES_PER_TOKEN: f64 = 3.5;

/// Estimate tokens as `ceil(bytes / 3.5)`.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() as f64 / BYTES_PER_TOKEN).ceil() as usize
}

/// Drop whole trailing lines until the text fits `budget` tokens.
pub fn trim_to_budget(text: &str, budget: usize) -> String {
    if estimate_tokens(text) <= budget {
        return text.to_string();
    }
    let mut lines: Vec<&str> = text.lines().collect();
    while !lines.is_empty() && estimate_tokens(&lines.join("\n")) > budget {
        lines.pop();
        while lines.last().is_some_and(|line| line.trim().is_empty()) {
            lines.pop();
        }
    }
    lines.join("\n")
}
