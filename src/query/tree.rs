//! Per-request attribute tree and join graph.
//!
//! The tree is an arena indexed by node id; each child owns the join alias for
//! its path segment. It is built once from the union of every path a request
//! touches (selected fields, filters, sorts), so a path shared by a filter and
//! a field selection yields exactly one join.

use crate::config::{Relation, DELETED_FIELD, PUBLICATION_STATUS_FIELD};
use crate::query::vector::{AttributeVector, ROOT_ALIAS};
use crate::sql::{ColumnRef, Join, JoinKind, Predicate};
use std::collections::VecDeque;

#[derive(Clone, Debug)]
pub struct TreeNode {
    pub field: String,
    /// `None` only for the root (base table).
    pub relation: Option<Relation>,
    pub alias: String,
    pub children: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct AttributeTree {
    nodes: Vec<TreeNode>,
}

/// Joins emitted for a tree, plus whether any of them can multiply rows.
#[derive(Clone, Debug, Default)]
pub struct JoinGraph {
    pub joins: Vec<Join>,
    pub has_collective: bool,
}

impl Default for AttributeTree {
    fn default() -> Self {
        AttributeTree {
            nodes: vec![TreeNode {
                field: String::new(),
                relation: None,
                alias: ROOT_ALIAS.to_string(),
                children: Vec::new(),
            }],
        }
    }
}

impl AttributeTree {
    pub fn from_vectors<'a>(vectors: impl IntoIterator<Item = &'a AttributeVector>) -> Self {
        let mut tree = AttributeTree::default();
        for v in vectors {
            tree.add(v);
        }
        tree
    }

    /// Insert the relation hops of `vector`, reusing nodes already present for shared prefixes.
    pub fn add(&mut self, vector: &AttributeVector) {
        let mut current = 0;
        for step in &vector.steps {
            let existing = self.nodes[current]
                .children
                .iter()
                .copied()
                .find(|&c| self.nodes[c].field == step.attribute.field);
            current = match existing {
                Some(c) => c,
                None => {
                    let alias = format!("{}.{}", self.nodes[current].alias, step.attribute.field);
                    let id = self.nodes.len();
                    self.nodes.push(TreeNode {
                        field: step.attribute.field.clone(),
                        relation: Some(step.relation.clone()),
                        alias,
                        children: Vec::new(),
                    });
                    self.nodes[current].children.push(id);
                    id
                }
            };
        }
    }

    /// Number of joined paths (root excluded).
    pub fn path_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Breadth-first join emission. Every joined table is scoped by its soft-delete flag and,
    /// when `status` is given, by publication status.
    pub fn build_joins(&self, status: Option<&str>) -> JoinGraph {
        let mut graph = JoinGraph::default();
        let mut queue: VecDeque<usize> = self.nodes[0].children.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            let node = &self.nodes[id];
            let Some(relation) = &node.relation else { continue };
            let parent_alias = self.parent_alias(id);
            graph.has_collective |= relation.is_collective();
            match relation {
                Relation::Lookup(link) | Relation::Collection(link) => {
                    let mut on = vec![Predicate::ColumnsEq(
                        column(parent_alias, &link.source_attribute.field, link.source_attribute.data_type.pg_type()),
                        column(&node.alias, &link.target_attribute.field, link.target_attribute.data_type.pg_type()),
                    )];
                    on.extend(scope_predicates(&node.alias, status));
                    graph.joins.push(Join {
                        kind: JoinKind::Left,
                        table: link.target_entity.table_name.clone(),
                        alias: node.alias.clone(),
                        on: Predicate::All(on),
                    });
                }
                Relation::Junction(j) => {
                    let cross_alias = junction_alias(&node.alias, &j.junction_entity.table_name);
                    let source_pk = j.source_entity.primary_key_attribute();
                    let target_pk = j.target_entity.primary_key_attribute();
                    graph.joins.push(Join {
                        kind: JoinKind::Left,
                        table: j.junction_entity.table_name.clone(),
                        alias: cross_alias.clone(),
                        on: Predicate::All(vec![
                            Predicate::ColumnsEq(
                                column(parent_alias, &source_pk.field, source_pk.data_type.pg_type()),
                                column(&cross_alias, &j.source_attribute.field, j.source_attribute.data_type.pg_type()),
                            ),
                            deleted_is_false(&cross_alias),
                        ]),
                    });
                    let mut on = vec![Predicate::ColumnsEq(
                        column(&cross_alias, &j.target_attribute.field, j.target_attribute.data_type.pg_type()),
                        column(&node.alias, &target_pk.field, target_pk.data_type.pg_type()),
                    )];
                    on.extend(scope_predicates(&node.alias, status));
                    graph.joins.push(Join {
                        kind: JoinKind::Left,
                        table: j.target_entity.table_name.clone(),
                        alias: node.alias.clone(),
                        on: Predicate::All(on),
                    });
                }
            }
            queue.extend(node.children.iter().copied());
        }
        graph
    }

    fn parent_alias(&self, id: usize) -> &str {
        self.nodes
            .iter()
            .find(|n| n.children.contains(&id))
            .map(|n| n.alias.as_str())
            .unwrap_or(ROOT_ALIAS)
    }
}

fn column(alias: &str, field: &str, pg_type: Option<&'static str>) -> ColumnRef {
    ColumnRef::new(alias, field, pg_type)
}

/// Alias of the association table on the way to the junction target at `alias`.
pub fn junction_alias(alias: &str, junction_table: &str) -> String {
    format!("{}:{}", alias, junction_table)
}

pub fn deleted_is_false(alias: &str) -> Predicate {
    Predicate::eq(column(alias, DELETED_FIELD, Some("boolean")), false)
}

/// Soft-delete and optional publication-status scoping for one table.
pub fn scope_predicates(alias: &str, status: Option<&str>) -> Vec<Predicate> {
    let mut out = vec![deleted_is_false(alias)];
    if let Some(s) = status {
        out.push(Predicate::eq(column(alias, PUBLICATION_STATUS_FIELD, Some("text")), s));
    }
    out
}
