use std::cmp::Ordering;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::engine::definition::{NodeKind, NodeType};
use crate::engine::types::Variables;
use crate::nodes::{ExecutionResult, NodeContext, NodeExecutor};
use crate::template::resolve_path;

pub struct ConditionNode;

#[async_trait]
impl NodeExecutor for ConditionNode {
    fn node_type(&self) -> NodeType {
        NodeType::Condition
    }

    fn description(&self) -> &str {
        "Route on instance variables"
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<ExecutionResult> {
        let NodeKind::Condition(config) = &ctx.node.kind else {
            bail!("node '{}' is not a condition node", ctx.node.id);
        };

        // Stable sort keeps declaration order among equal priorities.
        let mut rules: Vec<_> = config.conditions.iter().collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut matched: Vec<String> = Vec::new();
        for rule in rules {
            if evaluate_expression(&rule.expression, &ctx.instance.variables)
                && !matched.contains(&rule.target)
            {
                matched.push(rule.target.clone());
            }
        }

        // Unlabelled edges are the rule targets themselves, so only an
        // explicit `default` edge is a fallback. Without one the branch ends.
        let (next, message) = if matched.is_empty() {
            let fallback = ctx.definition.default_targets(&ctx.node.id);
            if fallback.is_empty() {
                (Vec::new(), "no condition matched".to_string())
            } else {
                (fallback, "no condition matched; took default path".to_string())
            }
        } else {
            let msg = format!("matched {}", matched.join(", "));
            (matched.clone(), msg)
        };

        let mut vars = Variables::new();
        vars.insert(
            format!("{}_matched", ctx.node.id),
            serde_json::Value::from(matched),
        );

        Ok(ExecutionResult::advance(next, message).with_variables(vars))
    }
}

const OPERATORS: [&str; 6] = ["==", "!=", ">=", "<=", ">", "<"];

/// Evaluate `"<variable> <op> <literal>"` against instance variables.
/// The variable may be a dotted path and may carry a `vars.` prefix.
/// Unparseable expressions evaluate to false.
pub fn evaluate_expression(expression: &str, vars: &Variables) -> bool {
    let Some((pos, op)) = find_operator(expression) else {
        return false;
    };

    let left = expression[..pos].trim();
    let right = expression[pos + op.len()..].trim();
    if left.is_empty() {
        return false;
    }

    let key = left.strip_prefix("vars.").unwrap_or(left);
    compare(resolve_path(key, vars), op, right)
}

/// Leftmost operator; at a tie the two-character form wins.
fn find_operator(expression: &str) -> Option<(usize, &'static str)> {
    OPERATORS
        .iter()
        .filter_map(|op| expression.find(op).map(|pos| (pos, *op)))
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.len().cmp(&a.1.len())))
}

fn compare(left: Option<&serde_json::Value>, op: &str, right: &str) -> bool {
    let left = match left {
        Some(serde_json::Value::Null) | None => return op == "!=",
        Some(v) => v,
    };

    let literal = unquote(right);
    let left_text = match left {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let ordering = match (left_text.trim().parse::<f64>(), literal.parse::<f64>()) {
        (Ok(l), Ok(r)) => match l.partial_cmp(&r) {
            Some(ord) => ord,
            None => return false,
        },
        _ => left_text.as_str().cmp(literal),
    };

    match op {
        "==" => ordering == Ordering::Equal,
        "!=" => ordering != Ordering::Equal,
        ">" => ordering == Ordering::Greater,
        "<" => ordering == Ordering::Less,
        ">=" => ordering != Ordering::Less,
        "<=" => ordering != Ordering::Greater,
        _ => false,
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, serde_json::Value)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_string_equality() {
        let v = vars(&[("priority", json!("high"))]);
        assert!(evaluate_expression("priority == high", &v));
        assert!(evaluate_expression("priority == 'high'", &v));
        assert!(evaluate_expression("vars.priority == \"high\"", &v));
        assert!(!evaluate_expression("priority == low", &v));
    }

    #[test]
    fn test_numeric_comparison() {
        let v = vars(&[("score", json!(5))]);
        assert!(!evaluate_expression("score > 10", &v));
        assert!(evaluate_expression("score <= 5", &v));
        assert!(evaluate_expression("score >= 5", &v));
        assert!(evaluate_expression("score != 6", &v));
    }

    #[test]
    fn test_numeric_string_variable() {
        let v = vars(&[("amount", json!("1500"))]);
        assert!(evaluate_expression("amount > 999", &v));
    }

    #[test]
    fn test_missing_variable_only_satisfies_not_equal() {
        let v = Variables::new();
        assert!(evaluate_expression("level != 3", &v));
        assert!(!evaluate_expression("level == 3", &v));
        assert!(!evaluate_expression("level < 3", &v));
    }

    #[test]
    fn test_dotted_path() {
        let v = vars(&[("employee", json!({"level": 4}))]);
        assert!(evaluate_expression("employee.level >= 3", &v));
    }

    #[test]
    fn test_operator_precedence_in_scan() {
        assert_eq!(find_operator("a >= 1"), Some((2, ">=")));
        assert_eq!(find_operator("a<=1"), Some((1, "<=")));
        assert_eq!(find_operator("a > 1"), Some((2, ">")));
        assert_eq!(find_operator("no operator"), None);
    }

    #[test]
    fn test_lexical_ordering() {
        let v = vars(&[("name", json!("bob"))]);
        assert!(evaluate_expression("name > alice", &v));
        assert!(!evaluate_expression("name < alice", &v));
    }
}
