// Column grants enforced on the query text
//
// A grant with an explicit column list restricts what the query may touch, not only what the
// result shows. Every column reference that could resolve to a restricted table must name a
// granted column. The one exception is a bare column in the outermost select list: it passes,
// and its label is hidden from the result, so `SELECT id, region FROM orders` still answers
// with `id` for a caller who cannot see `region`.
//
// References are resolved conservatively. An unqualified name is checked against every
// restricted table in scope, and a qualifier that names a derived table or a CTE is checked
// against every restricted table in the statement.

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, JoinConstraint, JoinOperator,
    ObjectName, Query, Select, SelectItem, SetExpr, TableFactor, TableWithJoins, Value, Visit, Visitor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::ControlFlow;
use thiserror::Error;

use crate::validator::tables::{ident_name, object_name};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("Column '{column}' of table '{table}' is not granted")]
    NotGranted { table: String, column: String },

    #[error("{construct} cannot be used with column-restricted table '{table}'")]
    Untraceable { table: String, construct: &'static str },

    #[error("Could not parse query for column checks")]
    Unparseable,
}

impl ColumnError {
    /// The restricted table behind the refusal
    pub fn table(&self) -> Option<&str> {
        match self {
            ColumnError::NotGranted { table, .. } | ColumnError::Untraceable { table, .. } => Some(table),
            ColumnError::Unparseable => None,
        }
    }
}

/// Result labels a caller may see for one query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnPolicy {
    /// Labels of bare select-list columns that belong to no grant
    hidden: BTreeSet<String>,
    /// Allowed sets a label must be in, one per restricted table a `*` can expand over
    wildcard_limits: Vec<BTreeSet<String>>,
}

impl ColumnPolicy {
    pub fn allows(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        !self.hidden.contains(&label) && self.wildcard_limits.iter().all(|allowed| allowed.contains(&label))
    }

    pub fn is_unrestricted(&self) -> bool {
        self.hidden.is_empty() && self.wildcard_limits.is_empty()
    }
}

/// Check every column reference in `sql` against `limits` (restricted table to granted columns)
/// and work out which result labels the caller may see
pub fn column_policy(sql: &str, limits: &BTreeMap<String, Vec<String>>) -> Result<ColumnPolicy, ColumnError> {
    if limits.is_empty() {
        return Ok(ColumnPolicy::default());
    }
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|_| ColumnError::Unparseable)?;

    let limits: BTreeMap<String, BTreeSet<String>> = limits
        .iter()
        .map(|(table, columns)| (table.clone(), columns.iter().map(|c| c.to_lowercase()).collect()))
        .collect();
    let first_restricted = limits.keys().next().cloned().unwrap_or_default();

    let mut bindings = Bindings::default();
    for statement in &statements {
        let _ = statement.visit(&mut bindings);
    }
    if bindings.renamed {
        return Err(ColumnError::Untraceable {
            table: first_restricted,
            construct: "A column renaming alias",
        });
    }

    let mut audit = ColumnAudit::new(&limits, bindings.resolve());
    for statement in &statements {
        if let ControlFlow::Break(err) = statement.visit(&mut audit) {
            return Err(err);
        }
    }
    let policy = ColumnPolicy {
        hidden: audit.hidden,
        wildcard_limits: audit.wildcard_limits,
    };
    if audit.positional && !policy.is_unrestricted() {
        return Err(ColumnError::Untraceable {
            table: first_restricted,
            construct: "Positional ORDER BY or GROUP BY",
        });
    }
    Ok(policy)
}

/// Where a qualifier's columns come from
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Table(String),
    /// Derived tables, CTEs and anything else that cannot be traced to one table
    Opaque,
}

/// First pass: every name a qualifier can refer to
#[derive(Default)]
struct Bindings {
    ctes: BTreeSet<String>,
    /// (binding name, relation name when the factor is a plain table)
    factors: Vec<(String, Option<String>)>,
    renamed: bool,
}

impl Bindings {
    fn resolve(self) -> HashMap<String, Vec<Source>> {
        let mut map: HashMap<String, Vec<Source>> = HashMap::new();
        for (binding, relation) in self.factors {
            let source = match relation {
                Some(name) if !self.ctes.contains(&name) => Source::Table(name),
                _ => Source::Opaque,
            };
            let sources = map.entry(binding).or_default();
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        map
    }
}

impl Visitor for Bindings {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(ident_name(&cte.alias.name));
                self.renamed |= !cte.alias.columns.is_empty();
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let relation = object_name(name);
                if let Some(last) = name.0.last() {
                    self.factors.push((ident_name(last), Some(relation.clone())));
                }
                if let Some(alias) = alias {
                    self.factors.push((ident_name(&alias.name), Some(relation)));
                    self.renamed |= !alias.columns.is_empty();
                }
            }
            TableFactor::Derived { alias: Some(alias), .. } | TableFactor::NestedJoin { alias: Some(alias), .. } => {
                self.factors.push((ident_name(&alias.name), None));
                self.renamed |= !alias.columns.is_empty();
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

/// Second pass: checks references and collects the label policy
struct ColumnAudit<'a> {
    limits: &'a BTreeMap<String, BTreeSet<String>>,
    bindings: HashMap<String, Vec<Source>>,
    /// FROM sources of each enclosing query level
    frames: Vec<Vec<Source>>,
    /// Queries whose output labels reach an enclosing FROM: CTE bodies and derived tables
    label_carrying: HashSet<*const Query>,
    /// Parenthesized branches of a UNION/INTERSECT/EXCEPT
    set_branches: HashSet<*const Query>,
    /// Bare outermost select-list columns
    passthrough: HashSet<*const Expr>,
    /// ORDER BY entries naming an output alias of the same query
    output_aliases: HashSet<*const Expr>,
    hidden: BTreeSet<String>,
    wildcard_limits: Vec<BTreeSet<String>>,
    positional: bool,
}

impl<'a> ColumnAudit<'a> {
    fn new(limits: &'a BTreeMap<String, BTreeSet<String>>, bindings: HashMap<String, Vec<Source>>) -> Self {
        Self {
            limits,
            bindings,
            frames: Vec::new(),
            label_carrying: HashSet::new(),
            set_branches: HashSet::new(),
            passthrough: HashSet::new(),
            output_aliases: HashSet::new(),
            hidden: BTreeSet::new(),
            wildcard_limits: Vec::new(),
            positional: false,
        }
    }

    /// Restricted tables a reference over `sources` may land in
    fn restricted<'s>(&'s self, sources: &[Source]) -> BTreeSet<&'s String> {
        let mut tables = BTreeSet::new();
        for source in sources {
            match source {
                Source::Table(name) => {
                    if let Some((table, _)) = self.limits.get_key_value(name) {
                        tables.insert(table);
                    }
                }
                Source::Opaque => tables.extend(self.limits.keys()),
            }
        }
        tables
    }

    fn sources_for(&self, qualifier: Option<&str>) -> Vec<Source> {
        match qualifier {
            Some(q) => self.bindings.get(q).cloned().unwrap_or_else(|| vec![Source::Opaque]),
            None => self.frames.iter().flatten().cloned().collect(),
        }
    }

    /// The first restricted table that does not grant `column`
    fn refusing_table(&self, qualifier: Option<&str>, column: &str) -> Option<String> {
        let sources = self.sources_for(qualifier);
        self.restricted(&sources)
            .into_iter()
            .find(|table| self.limits.get(*table).is_some_and(|allowed| !allowed.contains(column)))
            .cloned()
    }

    fn check(&self, qualifier: Option<&str>, column: &str) -> Result<(), ColumnError> {
        match self.refusing_table(qualifier, column) {
            Some(table) => Err(ColumnError::NotGranted {
                table,
                column: column.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn walk_body(&mut self, body: &SetExpr, passthrough: bool, carries_labels: bool, in_set: bool) -> Result<(), ColumnError> {
        match body {
            SetExpr::Select(select) => self.walk_select(select, passthrough, carries_labels, in_set),
            SetExpr::SetOperation { left, right, .. } => {
                self.walk_body(left, false, carries_labels, true)?;
                self.walk_body(right, false, carries_labels, true)
            }
            SetExpr::Query(query) => {
                let query: &Query = query;
                if carries_labels {
                    self.label_carrying.insert(query as *const Query);
                }
                if in_set {
                    self.set_branches.insert(query as *const Query);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn walk_select(&mut self, select: &Select, passthrough: bool, carries_labels: bool, in_set: bool) -> Result<(), ColumnError> {
        let mut sources = Vec::new();
        for from in &select.from {
            self.from_sources(from, &mut sources);
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.extend(sources.iter().cloned());
        }

        let passthrough = passthrough && select.distinct.is_none();
        for item in &select.projection {
            let expanded = match item {
                SelectItem::UnnamedExpr(expr @ (Expr::Identifier(_) | Expr::CompoundIdentifier(_))) if passthrough => {
                    self.passthrough.insert(expr as *const Expr);
                    continue;
                }
                SelectItem::Wildcard(_) => sources.clone(),
                SelectItem::QualifiedWildcard(name, _) => self.sources_for(Some(qualifier_of(name).as_str())),
                _ => continue,
            };

            let tables: Vec<String> = self.restricted(&expanded).into_iter().cloned().collect();
            if tables.is_empty() || !carries_labels {
                continue;
            }
            if in_set {
                return Err(ColumnError::Untraceable {
                    table: tables[0].clone(),
                    construct: "A wildcard inside a compound query",
                });
            }
            for table in tables {
                if let Some(allowed) = self.limits.get(&table) {
                    self.wildcard_limits.push(allowed.clone());
                }
            }
        }

        if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
            self.positional |= exprs.iter().any(is_ordinal);
        }

        for from in &select.from {
            self.check_joins(from)?;
        }
        Ok(())
    }

    fn from_sources(&mut self, from: &TableWithJoins, sources: &mut Vec<Source>) {
        self.factor_sources(&from.relation, sources);
        for join in &from.joins {
            self.factor_sources(&join.relation, sources);
        }
    }

    fn factor_sources(&mut self, factor: &TableFactor, sources: &mut Vec<Source>) {
        match factor {
            TableFactor::Table { name, .. } => {
                let binding = name.0.last().map(ident_name).unwrap_or_default();
                let resolved = self.bindings.get(&binding).cloned().unwrap_or_else(|| vec![Source::Opaque]);
                sources.extend(resolved);
            }
            TableFactor::NestedJoin { table_with_joins, .. } => self.from_sources(table_with_joins, sources),
            TableFactor::Derived { subquery, .. } => {
                let subquery: &Query = subquery;
                self.label_carrying.insert(subquery as *const Query);
                sources.push(Source::Opaque);
            }
            _ => sources.push(Source::Opaque),
        }
    }

    fn check_joins(&self, from: &TableWithJoins) -> Result<(), ColumnError> {
        if let TableFactor::NestedJoin { table_with_joins, .. } = &from.relation {
            self.check_joins(table_with_joins)?;
        }
        for join in &from.joins {
            if let TableFactor::NestedJoin { table_with_joins, .. } = &join.relation {
                self.check_joins(table_with_joins)?;
            }
            let constraint = match &join.join_operator {
                JoinOperator::Inner(c)
                | JoinOperator::LeftOuter(c)
                | JoinOperator::RightOuter(c)
                | JoinOperator::FullOuter(c)
                | JoinOperator::LeftSemi(c)
                | JoinOperator::RightSemi(c)
                | JoinOperator::LeftAnti(c)
                | JoinOperator::RightAnti(c)
                | JoinOperator::AsOf { constraint: c, .. } => c,
                _ => continue,
            };
            match constraint {
                JoinConstraint::Using(columns) => {
                    for column in columns {
                        self.check(None, &ident_name(column).to_lowercase())?;
                    }
                }
                JoinConstraint::Natural => {
                    if let Some(table) = self.limits.keys().next() {
                        return Err(ColumnError::Untraceable {
                            table: table.clone(),
                            construct: "A NATURAL join",
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn is_ordinal(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(Value::Number(..)))
}

fn qualifier_of(name: &ObjectName) -> String {
    name.0.last().map(ident_name).unwrap_or_default()
}

/// `o.*` used as a value, as in `row_to_json(o.*)`
fn whole_row_qualifier(expr: &Expr) -> Option<String> {
    match expr {
        Expr::QualifiedWildcard(name) => Some(qualifier_of(name)),
        Expr::Function(function) => match &function.args {
            FunctionArguments::List(list) => list.args.iter().find_map(|arg| match arg {
                FunctionArg::Unnamed(FunctionArgExpr::QualifiedWildcard(name))
                | FunctionArg::Named {
                    arg: FunctionArgExpr::QualifiedWildcard(name),
                    ..
                } => Some(qualifier_of(name)),
                _ => None,
            }),
            _ => None,
        },
        _ => None,
    }
}

impl Visitor for ColumnAudit<'_> {
    type Break = ColumnError;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        let ptr = query as *const Query;
        let outermost = self.frames.is_empty();
        let carries_labels = outermost || self.label_carrying.contains(&ptr);
        let in_set = self.set_branches.contains(&ptr);

        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let body: &Query = &cte.query;
                self.label_carrying.insert(body as *const Query);
            }
        }

        if let (Some(order_by), Some(select)) = (&query.order_by, query.body.as_select()) {
            let aliases: HashSet<String> = select
                .projection
                .iter()
                .filter_map(|item| match item {
                    SelectItem::ExprWithAlias { alias, .. } => Some(ident_name(alias)),
                    _ => None,
                })
                .collect();
            for entry in &order_by.exprs {
                if let Expr::Identifier(ident) = &entry.expr {
                    if aliases.contains(&ident_name(ident)) {
                        self.output_aliases.insert(&entry.expr as *const Expr);
                    }
                }
            }
        }
        if let Some(order_by) = &query.order_by {
            self.positional |= order_by.exprs.iter().any(|entry| is_ordinal(&entry.expr));
        }

        self.frames.push(Vec::new());
        let passthrough = outermost && query.body.as_select().is_some();
        match self.walk_body(&query.body, passthrough, carries_labels, in_set) {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(err),
        }
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.frames.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        let ptr = expr as *const Expr;
        if self.output_aliases.contains(&ptr) {
            return ControlFlow::Continue(());
        }

        if let Some(qualifier) = whole_row_qualifier(expr) {
            let sources = self.sources_for(Some(qualifier.as_str()));
            if let Some(table) = self.restricted(&sources).into_iter().next() {
                return ControlFlow::Break(ColumnError::Untraceable {
                    table: table.clone(),
                    construct: "A whole-row reference",
                });
            }
            return ControlFlow::Continue(());
        }

        let (qualifier, column) = match expr {
            Expr::Identifier(ident) => (None, ident_name(ident)),
            Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [.., qualifier, column] => (Some(ident_name(qualifier)), ident_name(column)),
                [column] => (None, ident_name(column)),
                [] => return ControlFlow::Continue(()),
            },
            _ => return ControlFlow::Continue(()),
        };
        let column = column.to_lowercase();

        if self.passthrough.contains(&ptr) {
            if self.refusing_table(qualifier.as_deref(), &column).is_some() {
                self.hidden.insert(column);
            }
            return ControlFlow::Continue(());
        }

        match self.check(qualifier.as_deref(), &column) {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(table, columns)| (table.to_string(), columns.iter().map(|c| c.to_string()).collect()))
            .collect()
    }

    fn orders_id_status() -> BTreeMap<String, Vec<String>> {
        limits(&[("orders", &["id", "status"])])
    }

    fn refused(sql: &str) -> ColumnError {
        column_policy(sql, &orders_id_status()).unwrap_err()
    }

    #[test]
    fn no_restrictions_means_no_parsing() {
        let policy = column_policy("not even sql", &BTreeMap::new()).unwrap();
        assert!(policy.is_unrestricted());
    }

    #[test]
    fn bare_outer_columns_are_hidden_not_refused() {
        let policy = column_policy("SELECT id, status, region FROM orders", &orders_id_status()).unwrap();
        assert!(policy.allows("id"));
        assert!(policy.allows("status"));
        assert!(!policy.allows("region"));

        let policy = column_policy("SELECT o FROM orders o", &orders_id_status()).unwrap();
        assert!(!policy.allows("o"));
    }

    #[test]
    fn wildcards_keep_granted_labels_only() {
        let policy = column_policy("SELECT * FROM orders", &orders_id_status()).unwrap();
        assert!(policy.allows("ID"));
        assert!(!policy.allows("region"));

        let policy = column_policy(
            "SELECT c.* FROM customers c JOIN orders o ON o.id = c.order_id",
            &orders_id_status(),
        )
        .unwrap();
        assert!(policy.is_unrestricted());

        let policy = column_policy("SELECT d.region FROM (SELECT * FROM orders) d", &orders_id_status()).unwrap();
        assert!(!policy.allows("region"));
    }

    #[test]
    fn aliases_and_expressions_over_hidden_columns_are_refused() {
        for sql in [
            "SELECT region AS status FROM orders",
            "SELECT upper(region) FROM orders",
            "SELECT id FROM orders WHERE region = 'east'",
            "SELECT id FROM orders ORDER BY region",
            "SELECT count(*) FROM orders GROUP BY region",
            "SELECT DISTINCT region FROM orders",
            "SELECT row_to_json(o) FROM orders o",
            "SELECT id, status FROM orders UNION SELECT id, region FROM orders",
        ] {
            assert!(matches!(refused(sql), ColumnError::NotGranted { .. }), "{}", sql);
        }
    }

    #[test]
    fn join_references_are_resolved_through_aliases() {
        let l = orders_id_status();
        assert!(column_policy(
            "SELECT c.name, o.status FROM customers c JOIN orders o ON o.id = c.last_order_id",
            &l
        )
        .is_ok());
        assert_eq!(
            column_policy("SELECT c.name FROM customers c JOIN orders o ON o.customer_id = c.id", &l).unwrap_err(),
            ColumnError::NotGranted {
                table: "orders".to_string(),
                column: "customer_id".to_string()
            }
        );
        assert!(column_policy("SELECT id FROM orders JOIN refunds USING (region)", &l).is_err());
        assert!(matches!(
            column_policy("SELECT id FROM orders NATURAL JOIN refunds", &l).unwrap_err(),
            ColumnError::Untraceable { .. }
        ));
    }

    #[test]
    fn derived_tables_and_ctes_are_checked_inside() {
        for sql in [
            "SELECT * FROM (SELECT id, region FROM orders) d",
            "WITH w AS (SELECT region AS status FROM orders) SELECT status FROM w",
            "SELECT id, (SELECT region FROM orders o2 WHERE o2.id = o.id) AS status FROM orders o",
        ] {
            assert!(column_policy(sql, &orders_id_status()).is_err(), "{}", sql);
        }

        let policy = column_policy("WITH w AS (SELECT * FROM orders) SELECT * FROM w", &orders_id_status()).unwrap();
        assert!(policy.allows("status"));
        assert!(!policy.allows("region"));
    }

    #[test]
    fn renaming_and_positional_tricks_are_refused() {
        for sql in [
            "SELECT * FROM (SELECT * FROM orders) d(id, status, x)",
            "SELECT * FROM orders AS o(a, b)",
            "SELECT id, region FROM orders ORDER BY 2",
            "SELECT * FROM orders ORDER BY 3",
            "SELECT json_agg(o.*) FROM orders o",
            "SELECT 'x' AS status UNION ALL SELECT * FROM orders",
        ] {
            assert!(matches!(refused(sql), ColumnError::Untraceable { .. }), "{}", sql);
        }
    }

    #[test]
    fn output_aliases_may_be_ordered_by() {
        let policy = column_policy(
            "SELECT status, count(*) AS n FROM orders GROUP BY status ORDER BY n DESC",
            &orders_id_status(),
        )
        .unwrap();
        assert!(policy.allows("n"));
        assert!(policy.allows("status"));
    }
}
