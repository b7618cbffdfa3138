use sqlparser::ast::{Ident, ObjectName, Query, Visit, Visitor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;
use std::ops::ControlFlow;

/// CTE names one query level can reference
struct Scope {
    /// Bound by enclosing WITH clauses
    inherited: Vec<String>,
    /// This query's own CTEs, with the address of each body
    own: Vec<(String, *const Query)>,
    recursive: bool,
}

impl Scope {
    fn binds(&self, name: &str) -> bool {
        self.inherited.iter().any(|n| n == name) || self.own.iter().any(|(n, _)| n == name)
    }
}

/// Collects every relation a statement reads, skipping references that resolve to a CTE in scope
#[derive(Default)]
struct RelationCollector {
    scopes: Vec<Scope>,
    direct: BTreeSet<String>,
    nested: BTreeSet<String>,
}

impl Visitor for RelationCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        let inherited = match self.scopes.last() {
            None => Vec::new(),
            Some(parent) => {
                let mut names = parent.inherited.clone();
                let body = parent.own.iter().position(|(_, q)| std::ptr::eq(*q, query));
                // A non-recursive CTE body sees only the siblings declared before it
                let visible = match body {
                    Some(i) if !parent.recursive => &parent.own[..i],
                    _ => &parent.own[..],
                };
                names.extend(visible.iter().map(|(n, _)| n.clone()));
                names
            }
        };

        let (own, recursive) = match &query.with {
            Some(with) => (
                with.cte_tables
                    .iter()
                    .map(|cte| (ident_name(&cte.alias.name), &*cte.query as *const Query))
                    .collect(),
                with.recursive,
            ),
            None => (Vec::new(), false),
        };
        self.scopes.push(Scope {
            inherited,
            own,
            recursive,
        });
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.scopes.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        let name = object_name(relation);
        if relation.0.len() == 1 && self.scopes.last().is_some_and(|scope| scope.binds(&name)) {
            return ControlFlow::Continue(());
        }
        if self.scopes.len() <= 1 {
            self.direct.insert(name);
        } else {
            self.nested.insert(name);
        }
        ControlFlow::Continue(())
    }
}

/// Unquoted identifiers fold to lower case the way Postgres folds them
pub(crate) fn ident_name(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

pub(crate) fn object_name(name: &ObjectName) -> String {
    name.0.iter().map(ident_name).collect::<Vec<_>>().join(".")
}

/// Where a statement reads its tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableUsage {
    /// Relations of the outermost query's own FROM and JOIN clauses
    direct: BTreeSet<String>,
    /// Relations read inside subqueries, derived tables or CTE bodies
    nested: BTreeSet<String>,
}

impl TableUsage {
    pub fn tables(&self) -> BTreeSet<String> {
        self.direct.union(&self.nested).cloned().collect()
    }

    /// True when every read of `table` happens in the outermost FROM/JOIN, which is the only
    /// place a predicate added to the outer WHERE can constrain
    pub fn is_direct_only(&self, table: &str) -> bool {
        self.direct.contains(table) && !self.nested.contains(table)
    }
}

/// Relation usage of the query text. Empty when the text does not parse.
pub fn table_usage(sql: &str) -> TableUsage {
    let statements = match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        Ok(statements) => statements,
        Err(e) => {
            tracing::debug!("Table extraction failed to parse query: {}", e);
            return TableUsage::default();
        }
    };

    let mut collector = RelationCollector::default();
    for statement in &statements {
        let _ = statement.visit(&mut collector);
    }
    TableUsage {
        direct: collector.direct,
        nested: collector.nested,
    }
}

/// Tables read by the query's FROM and JOIN clauses, including those inside subqueries.
///
/// Schema-qualified references keep their qualifier (`sales.orders`). A name that resolves to
/// a CTE in scope is not a table. Returns an empty set when the text does not parse.
pub fn extract_tables(sql: &str) -> BTreeSet<String> {
    table_usage(sql).tables()
}
