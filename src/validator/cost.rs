use serde::Serialize;

use crate::sql::{significant_tokens, Token, TokenKind};

const AGGREGATES: &[&str] = &["COUNT", "SUM", "AVG", "MIN", "MAX"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostEstimate {
    pub has_joins: bool,
    pub has_subqueries: bool,
    pub has_aggregations: bool,
    pub has_order_by: bool,
    pub complexity: Complexity,
}

impl CostEstimate {
    /// joins +2, subqueries +3, aggregations +1, ordering +1
    pub fn score(&self) -> u8 {
        let mut score = 0;
        if self.has_joins {
            score += 2;
        }
        if self.has_subqueries {
            score += 3;
        }
        if self.has_aggregations {
            score += 1;
        }
        if self.has_order_by {
            score += 1;
        }
        score
    }
}

fn followed_by(tokens: &[Token], i: usize, pred: impl Fn(&Token) -> bool) -> bool {
    tokens.get(i + 1).is_some_and(pred)
}

/// Rough structural complexity of a query. Unlexable text reports nothing.
pub fn estimate_cost(sql: &str) -> CostEstimate {
    let tokens = significant_tokens(sql).unwrap_or_default();

    let mut has_joins = false;
    let mut has_subqueries = false;
    let mut has_aggregations = false;
    let mut has_order_by = false;

    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Word {
            continue;
        }
        if token.is_keyword(sql, "JOIN") {
            has_joins = true;
        } else if token.is_keyword(sql, "SELECT") && !token.is_top_level() {
            has_subqueries = true;
        } else if AGGREGATES.iter().any(|agg| token.is_keyword(sql, agg)) {
            has_aggregations |= followed_by(&tokens, i, |t| t.kind == TokenKind::LParen);
        } else if token.is_keyword(sql, "GROUP") {
            has_aggregations |= followed_by(&tokens, i, |t| t.is_keyword(sql, "BY"));
        } else if token.is_keyword(sql, "ORDER") {
            has_order_by |= followed_by(&tokens, i, |t| t.is_keyword(sql, "BY"));
        }
    }

    let mut estimate = CostEstimate {
        has_joins,
        has_subqueries,
        has_aggregations,
        has_order_by,
        complexity: Complexity::Low,
    };
    estimate.complexity = match estimate.score() {
        s if s >= 5 => Complexity::High,
        s if s >= 3 => Complexity::Medium,
        _ => Complexity::Low,
    };
    estimate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_select_is_low() {
        let cost = estimate_cost("SELECT id FROM orders");
        assert_eq!(cost.complexity, Complexity::Low);
        assert!(!cost.has_joins && !cost.has_subqueries && !cost.has_aggregations);
    }

    #[test]
    fn join_with_aggregate_is_medium() {
        let cost = estimate_cost(
            "SELECT c.name, count(o.id) FROM customers c JOIN orders o ON o.customer_id = c.id GROUP BY c.name",
        );
        assert!(cost.has_joins && cost.has_aggregations);
        assert_eq!(cost.score(), 3);
        assert_eq!(cost.complexity, Complexity::Medium);
    }

    #[test]
    fn subquery_join_is_high() {
        let cost = estimate_cost(
            "SELECT * FROM orders o JOIN (SELECT id FROM customers) c ON c.id = o.customer_id ORDER BY o.id",
        );
        assert!(cost.has_subqueries && cost.has_order_by);
        assert_eq!(cost.complexity, Complexity::High);
    }

    #[test]
    fn words_in_literals_do_not_count() {
        let cost = estimate_cost("SELECT id FROM notes WHERE body = 'JOIN us, ORDER BY phone'");
        assert_eq!(cost.score(), 0);
    }

    #[test]
    fn column_named_max_is_not_an_aggregate() {
        assert!(!estimate_cost("SELECT max_speed FROM cars").has_aggregations);
        assert!(estimate_cost("SELECT MAX(speed) FROM cars").has_aggregations);
    }
}
