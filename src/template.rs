use crate::engine::types::Variables;

/// Interpolate `${vars.key}` and `${vars.nested.key}` patterns in a string.
/// Unknown keys render as an empty string.
pub fn interpolate_vars(template: &str, vars: &Variables) -> String {
    const OPEN: &str = "${vars.";

    let mut result = template.to_string();
    let mut start = 0;

    loop {
        let open = match result[start..].find(OPEN) {
            Some(pos) => start + pos,
            None => break,
        };

        let close = match result[open..].find('}') {
            Some(pos) => open + pos,
            None => break,
        };

        let path = &result[open + OPEN.len()..close];
        let value = resolve_path(path, vars)
            .map(display_value)
            .unwrap_or_default();

        result.replace_range(open..=close, &value);
        start = open + value.len();
    }

    result
}

/// Resolve a dotted path (e.g., "employee.email") from variables.
pub fn resolve_path<'a>(path: &str, vars: &'a Variables) -> Option<&'a serde_json::Value> {
    let mut parts = path.split('.');
    let mut current = vars.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

/// Render a JSON value the way a person would read it.
pub fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_interpolation() {
        let mut vars = Variables::new();
        vars.insert("name".to_string(), serde_json::json!("Alice"));

        assert_eq!(interpolate_vars("Hello ${vars.name}!", &vars), "Hello Alice!");
    }

    #[test]
    fn test_nested_interpolation() {
        let mut vars = Variables::new();
        vars.insert(
            "employee".to_string(),
            serde_json::json!({"email": "alice@example.com", "level": 3}),
        );

        assert_eq!(
            interpolate_vars("${vars.employee.email} (L${vars.employee.level})", &vars),
            "alice@example.com (L3)"
        );
    }

    #[test]
    fn test_missing_key() {
        let vars = Variables::new();
        assert_eq!(interpolate_vars("Hello ${vars.missing}!", &vars), "Hello !");
    }

    #[test]
    fn test_unterminated_placeholder_is_left_alone() {
        let vars = Variables::new();
        assert_eq!(interpolate_vars("Hello ${vars.name", &vars), "Hello ${vars.name");
    }
}
