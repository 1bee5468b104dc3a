//! Builds parameterized SELECT statements from a join graph, predicates and ordering.

use crate::sql::expr::{ColumnRef, Predicate};
use serde_json::Value;

/// Label of the row-number column added by partitioned (per-parent) queries.
pub const ROW_NUMBER_LABEL: &str = "__rn";

/// Quote identifier for PostgreSQL (safe: only from metadata).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Clone, Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    pub fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectColumn {
    pub column: ColumnRef,
    /// Caller-facing name of the value in the result row (the attribute's full path).
    pub label: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Left,
    Inner,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    pub on: Predicate,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderTerm {
    pub column: ColumnRef,
    pub descending: bool,
}

/// Keep rows `offset+1 ..= offset+limit` per distinct value of `key` (ROW_NUMBER window).
#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    pub key: ColumnRef,
    /// Label of the selected column carrying `key`; used to order the outer query.
    pub key_label: String,
    pub offset: u32,
    pub limit: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectQuery {
    pub distinct: bool,
    pub columns: Vec<SelectColumn>,
    pub table: String,
    pub alias: String,
    pub joins: Vec<Join>,
    /// ANDed together.
    pub filter: Vec<Predicate>,
    pub order: Vec<OrderTerm>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub partition: Option<Partition>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        SelectQuery {
            distinct: false,
            columns: Vec::new(),
            table: table.into(),
            alias: alias.into(),
            joins: Vec::new(),
            filter: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            partition: None,
        }
    }

    /// Add a column unless one with the same label is already selected.
    pub fn select(&mut self, column: ColumnRef, label: impl Into<String>) {
        let label = label.into();
        if !self.columns.iter().any(|c| c.label == label) {
            self.columns.push(SelectColumn { column, label });
        }
    }

    fn from_clause(&self, buf: &mut QueryBuf) -> String {
        let mut sql = format!(" FROM {} AS {}", quoted(&self.table), quoted(&self.alias));
        for j in &self.joins {
            let kind = match j.kind {
                JoinKind::Left => "LEFT JOIN",
                JoinKind::Inner => "INNER JOIN",
            };
            let on = j.on.render(buf);
            sql.push_str(&format!(" {} {} AS {} ON {}", kind, quoted(&j.table), quoted(&j.alias), on));
        }
        if !self.filter.is_empty() {
            let parts: Vec<String> = self.filter.iter().map(|p| format!("({})", p.render(buf))).collect();
            sql.push_str(" WHERE ");
            sql.push_str(&parts.join(" AND "));
        }
        sql
    }

    fn order_list(&self) -> String {
        self.order
            .iter()
            .map(|o| format!("{} {}", o.column.sql(), if o.descending { "DESC" } else { "ASC" }))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn build(&self) -> QueryBuf {
        let mut buf = QueryBuf::default();
        let mut cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} AS {}", c.column.sql(), quoted(&c.label)))
            .collect();
        if let Some(p) = &self.partition {
            let order = if self.order.is_empty() {
                String::new()
            } else {
                format!(" ORDER BY {}", self.order_list())
            };
            cols.push(format!(
                "ROW_NUMBER() OVER (PARTITION BY {}{}) AS {}",
                p.key.sql(),
                order,
                quoted(ROW_NUMBER_LABEL)
            ));
        }
        let from = self.from_clause(&mut buf);
        let inner = format!(
            "SELECT {}{}{}",
            if self.distinct { "DISTINCT " } else { "" },
            cols.join(", "),
            from
        );

        let mut sql = match &self.partition {
            Some(p) => {
                let rn = quoted(ROW_NUMBER_LABEL);
                let lower = if p.offset > 0 {
                    format!("{} > {} AND ", rn, p.offset)
                } else {
                    String::new()
                };
                format!(
                    "SELECT * FROM ({}) AS \"ranked\" WHERE {}{} <= {} ORDER BY {}, {}",
                    inner,
                    lower,
                    rn,
                    p.offset.saturating_add(p.limit),
                    quoted(&p.key_label),
                    rn
                )
            }
            None => {
                let mut s = inner;
                if !self.order.is_empty() {
                    s.push_str(" ORDER BY ");
                    s.push_str(&self.order_list());
                }
                s
            }
        };
        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        if let Some(n) = self.offset.filter(|n| *n > 0) {
            sql.push_str(&format!(" OFFSET {}", n));
        }
        buf.sql = sql;
        buf
    }

    /// COUNT over the same joins and filters. `pk` is counted distinctly when joins can multiply rows.
    pub fn build_count(&self, pk: &ColumnRef) -> QueryBuf {
        let mut buf = QueryBuf::default();
        let from = self.from_clause(&mut buf);
        let count = if self.distinct {
            format!("COUNT(DISTINCT {})", pk.sql())
        } else {
            "COUNT(*)".to_string()
        };
        buf.sql = format!("SELECT {} AS \"count\"{}", count, from);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_col(name: &str) -> ColumnRef {
        ColumnRef::new("main", name, Some("bigint"))
    }

    #[test]
    fn builds_select_with_join_filter_order_limit() {
        let mut q = SelectQuery::new("posts", "main");
        q.select(main_col("id"), "id");
        q.select(main_col("id"), "id");
        q.joins.push(Join {
            kind: JoinKind::Left,
            table: "authors".into(),
            alias: "main.author".into(),
            on: Predicate::ColumnsEq(main_col("author"), ColumnRef::new("main.author", "id", Some("bigint"))),
        });
        q.filter.push(Predicate::eq(main_col("deleted"), false));
        q.order.push(OrderTerm {
            column: main_col("id"),
            descending: true,
        });
        q.limit = Some(11);
        q.offset = Some(0);
        let buf = q.build();
        assert_eq!(
            buf.sql,
            r#"SELECT "main"."id" AS "id" FROM "posts" AS "main" LEFT JOIN "authors" AS "main.author" ON "main"."author" = "main.author"."id" WHERE ("main"."deleted" = $1::bigint) ORDER BY "main"."id" DESC LIMIT 11"#
        );
        assert_eq!(buf.params, vec![Value::Bool(false)]);
    }

    #[test]
    fn distinct_count_uses_primary_key() {
        let mut q = SelectQuery::new("posts", "main");
        q.distinct = true;
        let buf = q.build_count(&main_col("id"));
        assert_eq!(buf.sql, r#"SELECT COUNT(DISTINCT "main"."id") AS "count" FROM "posts" AS "main""#);
    }

    #[test]
    fn partition_limits_rows_per_key() {
        let mut q = SelectQuery::new("comments", "main");
        q.select(main_col("post"), "__parent");
        q.order.push(OrderTerm {
            column: main_col("id"),
            descending: false,
        });
        q.partition = Some(Partition {
            key: main_col("post"),
            key_label: "__parent".into(),
            offset: 0,
            limit: 3,
        });
        let sql = q.build().sql;
        assert!(sql.starts_with("SELECT * FROM (SELECT "));
        assert!(sql.contains(r#"ROW_NUMBER() OVER (PARTITION BY "main"."post" ORDER BY "main"."id" ASC) AS "__rn""#));
        assert!(sql.ends_with(r#"WHERE "__rn" <= 3 ORDER BY "__parent", "__rn""#));

        q.partition.as_mut().unwrap().offset = 3;
        let sql = q.build().sql;
        assert!(sql.ends_with(r#"WHERE "__rn" > 3 AND "__rn" <= 6 ORDER BY "__parent", "__rn""#));
    }
}
