use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Matches `{{#if VAR}}...{{/if}}` blocks (non-greedy, dotall).
static IF_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{#if\s+(\w+)\}\}(.*?)\{\{/if\}\}")
        .expect("BUG: if_pattern regex is invalid")
});

/// Matches `{{VAR}}` variable placeholders.
static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(\w+)\}\}").expect("BUG: var_pattern regex is invalid")
});

/// Render a template string.
///
/// `{{#if VAR}}…{{/if}}` keeps its body only when `VAR` is set and non-blank;
/// `{{VAR}}` is replaced by its value, unknown variables render empty.
pub fn render_template_str(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut data = template.to_string();

    // Repeat until no block is left so nested blocks get a second pass.
    loop {
        let mut changed = false;
        let new_data = IF_PATTERN
            .replace_all(&data, |caps: &regex::Captures| {
                changed = true;
                match vars.get(&caps[1]) {
                    Some(value) if !value.trim().is_empty() => caps[2].to_string(),
                    _ => String::new(),
                }
            })
            .to_string();

        data = new_data;
        if !changed {
            break;
        }
    }

    VAR_PATTERN
        .replace_all(&data, |caps: &regex::Captures| {
            vars.get(&caps[1]).cloned().unwrap_or_default()
        })
        .to_string()
}
