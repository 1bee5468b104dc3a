//! Batched relation loading: one secondary query per relation path, keyed by the parent rows' keys.

use crate::config::{Entity, Relation};
use crate::error::AppError;
use crate::query::cursor::ValidPagination;
use crate::query::tree::{deleted_is_false, junction_alias};
use crate::query::{AttributeVector, RelationRequest, ROOT_ALIAS};
use crate::service::executor::Executor;
use crate::service::query::{FieldError, QueryService, SelectionInput};
use crate::service::rows::{distinct_keys, key_of, nest_row};
use crate::sql::{ColumnRef, Join, JoinKind, Partition, Predicate, SelectQuery, ROW_NUMBER_LABEL};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Label carrying the parent key on rows of a Collection or Junction query.
pub const PARENT_LABEL: &str = "__parent";

type Row = Map<String, Value>;
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}

impl QueryService {
    /// Load `requests` for `rows`, then nest every row and attach the loaded relations.
    ///
    /// A relation that fails validation, resolution or execution is reported in `errors` and
    /// left null; timeouts and cancellation abort the whole request.
    pub(crate) fn finish_rows<'a>(
        &'a self,
        exec: &'a mut dyn Executor,
        entity: &'a Arc<Entity>,
        rows: Vec<Row>,
        requests: &'a [RelationRequest],
        prefix: &'a str,
        errors: &'a mut Vec<FieldError>,
    ) -> BoxFuture<'a, Result<Vec<Row>, AppError>> {
        Box::pin(async move {
            let mut loaded = Vec::with_capacity(requests.len());
            for r in requests {
                let path = join_path(prefix, &r.field);
                match self.load_relation(&mut *exec, entity, &rows, r, &path, &mut *errors).await {
                    Ok(values) => loaded.push((r.field.clone(), values)),
                    Err(e @ (AppError::Timeout(_) | AppError::Cancelled)) => return Err(e),
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "relation failed");
                        errors.push(FieldError::from_error(path, &e));
                        loaded.push((r.field.clone(), vec![Value::Null; rows.len()]));
                    }
                }
            }
            let mut out: Vec<Row> = rows.into_iter().map(nest_row).collect();
            for (field, values) in loaded {
                for (row, v) in out.iter_mut().zip(values) {
                    row.insert(field.clone(), v);
                }
            }
            for row in &mut out {
                row.remove(ROW_NUMBER_LABEL);
            }
            Ok(out)
        })
    }

    /// One value per parent row: an object (or null) for Lookup, an array for Collection and Junction.
    async fn load_relation(
        &self,
        exec: &mut dyn Executor,
        parent: &Arc<Entity>,
        rows: &[Row],
        req: &RelationRequest,
        path: &str,
        errors: &mut Vec<FieldError>,
    ) -> Result<Vec<Value>, AppError> {
        let attribute = parent
            .attribute(&req.field)
            .cloned()
            .ok_or_else(|| AppError::validation(path, format!("unknown relation '{}' on {}", req.field, parent.name)))?;
        let relation = self.model.resolve_relation(parent, &attribute)?;
        let target = relation.target().clone();
        let input = SelectionInput {
            fields: &req.fields,
            relations: &req.relations,
            filters: &req.filters,
            sorts: &req.sorts,
        };
        let mut sel = self.build_selection(&target, input, true)?;
        for e in sel.errors.drain(..) {
            errors.push(FieldError {
                path: join_path(path, &e.path),
                ..e
            });
        }
        let target_pk = AttributeVector::primary_key(&target);
        let pk_label = target_pk.full_path.clone();
        let pk_column = target_pk.column()?;
        let parent_pk_label = parent.primary_key.clone();

        let (parent_label, keys) = match &relation {
            Relation::Lookup(link) => (link.source_attribute.field.clone(), distinct_keys(rows, &link.source_attribute.field)),
            Relation::Collection(_) | Relation::Junction(_) => (parent_pk_label.clone(), distinct_keys(rows, &parent_pk_label)),
        };
        let empty = || {
            if relation.is_collective() {
                Value::Array(Vec::new())
            } else {
                Value::Null
            }
        };
        if keys.is_empty() {
            return Ok(rows.iter().map(|_| empty()).collect());
        }
        tracing::debug!(path = %path, keys = keys.len(), "batched relation");

        match &relation {
            Relation::Lookup(_) => {
                sel.query.filter.push(Predicate::In {
                    column: pk_column,
                    values: keys,
                    negated: false,
                });
            }
            Relation::Collection(link) => {
                let fk = ColumnRef::new(
                    ROOT_ALIAS,
                    link.target_attribute.field.clone(),
                    link.target_attribute.data_type.pg_type(),
                );
                self.partition_by(&mut sel.query, fk, keys, req, &target)?;
            }
            Relation::Junction(j) => {
                let cross = junction_alias(ROOT_ALIAS, &j.junction_entity.table_name);
                let source_fk = ColumnRef::new(
                    cross.clone(),
                    j.source_attribute.field.clone(),
                    j.source_attribute.data_type.pg_type(),
                );
                let target_fk = ColumnRef::new(
                    cross.clone(),
                    j.target_attribute.field.clone(),
                    j.target_attribute.data_type.pg_type(),
                );
                sel.query.joins.insert(
                    0,
                    Join {
                        kind: JoinKind::Inner,
                        table: j.junction_entity.table_name.clone(),
                        alias: cross.clone(),
                        on: Predicate::All(vec![Predicate::ColumnsEq(target_fk, pk_column), deleted_is_false(&cross)]),
                    },
                );
                self.partition_by(&mut sel.query, source_fk, keys, req, &target)?;
            }
        }

        let child_rows = exec.fetch_all(&sel.query.build()).await?;
        let children = self
            .finish_rows(&mut *exec, &target, child_rows, &req.relations, path, &mut *errors)
            .await?;

        let values = match &relation {
            Relation::Lookup(_) => {
                let by_key: HashMap<String, Row> = children
                    .into_iter()
                    .filter_map(|c| {
                        let k = key_of(c.get(&pk_label)?);
                        Some((k, c))
                    })
                    .collect();
                rows.iter()
                    .map(|r| {
                        r.get(&parent_label)
                            .and_then(|k| by_key.get(&key_of(k)))
                            .cloned()
                            .map(Value::Object)
                            .unwrap_or(Value::Null)
                    })
                    .collect()
            }
            Relation::Collection(_) | Relation::Junction(_) => {
                let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
                for mut child in children {
                    let Some(key) = child.remove(PARENT_LABEL) else { continue };
                    groups.entry(key_of(&key)).or_default().push(Value::Object(child));
                }
                rows.iter()
                    .map(|r| {
                        r.get(&parent_label)
                            .and_then(|k| groups.get(&key_of(k)))
                            .cloned()
                            .map(Value::Array)
                            .unwrap_or_else(empty)
                    })
                    .collect()
            }
        };
        Ok(values)
    }

    /// Restrict a collective relation query to `keys` and window it per parent.
    fn partition_by(
        &self,
        query: &mut SelectQuery,
        key: ColumnRef,
        keys: Vec<Value>,
        req: &RelationRequest,
        target: &Entity,
    ) -> Result<(), AppError> {
        let window = ValidPagination::resolve(req.pagination.as_ref(), target.default_page_size, &self.settings)?;
        query.select(key.clone(), PARENT_LABEL);
        query.filter.push(Predicate::In {
            column: key.clone(),
            values: keys,
            negated: false,
        });
        query.partition = Some(Partition {
            key,
            key_label: PARENT_LABEL.to_string(),
            offset: window.offset,
            limit: window.limit,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolved::fixtures::blog_model;
    use crate::query::QueryRequest;
    use crate::service::executor::mock::RecordingExecutor;
    use crate::settings::Settings;
    use serde_json::json;

    fn service() -> QueryService {
        QueryService::new(Arc::new(blog_model()), Arc::new(Settings::default()))
    }

    fn request(v: Value) -> QueryRequest {
        serde_json::from_value(v).unwrap()
    }

    #[tokio::test]
    async fn lookup_relation_is_one_batched_query() {
        let req = request(json!({
            "entity": "post",
            "fields": ["title"],
            "relations": [{"field": "author", "fields": ["name"]}]
        }));
        let mut exec = RecordingExecutor::with(vec![
            vec![
                json!({"id": 1, "title": "a", "author": 7}),
                json!({"id": 2, "title": "b", "author": 7}),
                json!({"id": 3, "title": "c", "author": 8}),
                json!({"id": 4, "title": "d", "author": null}),
            ],
            vec![json!({"id": 7, "name": "ann"}), json!({"id": 8, "name": "bob"})],
        ]);
        let result = service().list(&mut exec, &req).await.unwrap();
        assert_eq!(exec.queries.len(), 2);
        assert!(exec.queries[0].sql.contains(r#""main"."author" AS "author""#));
        let child = &exec.queries[1];
        assert!(child.sql.contains(r#""main"."id" IN ($2::bigint, $3::bigint)"#), "{}", child.sql);
        assert_eq!(child.params[1..], [json!(7), json!(8)]);

        assert_eq!(result.data[0]["author"], json!({"id": 7, "name": "ann"}));
        assert_eq!(result.data[1]["author"]["name"], "ann");
        assert_eq!(result.data[2]["author"]["name"], "bob");
        assert_eq!(result.data[3]["author"], Value::Null);
    }

    #[tokio::test]
    async fn collection_relation_is_windowed_per_parent() {
        let req = request(json!({
            "entity": "post",
            "fields": ["title"],
            "relations": [{"field": "comments", "fields": ["text"], "pagination": {"limit": 2}}]
        }));
        let mut exec = RecordingExecutor::with(vec![
            vec![json!({"id": 1, "title": "a"}), json!({"id": 2, "title": "b"})],
            vec![
                json!({"id": 10, "text": "x", "__parent": 1, "__rn": 1}),
                json!({"id": 11, "text": "y", "__parent": 1, "__rn": 2}),
            ],
        ]);
        let result = service().list(&mut exec, &req).await.unwrap();
        let sql = &exec.queries[1].sql;
        assert!(sql.contains(r#"PARTITION BY "main"."post""#), "{}", sql);
        assert!(sql.contains(r#""main"."post" AS "__parent""#));
        assert!(sql.contains(r#"WHERE "__rn" <= 2"#));
        assert_eq!(result.data[0]["comments"], json!([{"id": 10, "text": "x"}, {"id": 11, "text": "y"}]));
        assert_eq!(result.data[1]["comments"], json!([]));
    }

    #[tokio::test]
    async fn junction_relation_joins_association_table() {
        let req = request(json!({
            "entity": "post",
            "fields": ["title"],
            "relations": [{"field": "tags", "fields": ["name"], "sorts": [{"path": "name"}]}]
        }));
        let mut exec = RecordingExecutor::with(vec![
            vec![json!({"id": 1, "title": "a"}), json!({"id": 2, "title": "b"})],
            vec![
                json!({"id": 5, "name": "rust", "__parent": 1, "__rn": 1}),
                json!({"id": 5, "name": "rust", "__parent": 2, "__rn": 1}),
                json!({"id": 6, "name": "sql", "__parent": 2, "__rn": 2}),
            ],
        ]);
        let result = service().list(&mut exec, &req).await.unwrap();
        let sql = &exec.queries[1].sql;
        assert!(sql.contains(r#"INNER JOIN "post_tag" AS "main:post_tag" ON ("main:post_tag"."tag_id" = "main"."id") AND ("main:post_tag"."deleted" = $1::boolean)"#), "{}", sql);
        assert!(sql.contains(r#""main:post_tag"."post_id" AS "__parent""#));
        assert!(sql.contains(r#"ORDER BY "main"."name" ASC, "main"."id" ASC"#));
        assert_eq!(result.data[0]["tags"], json!([{"id": 5, "name": "rust"}]));
        assert_eq!(result.data[1]["tags"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failing_relation_does_not_abort_siblings() {
        let req = request(json!({
            "entity": "category",
            "fields": ["name"],
            "relations": [{"field": "owner"}, {"field": "parent", "fields": ["name"]}, {"field": "name"}]
        }));
        let mut exec = RecordingExecutor::with(vec![
            vec![json!({"id": 1, "name": "a", "parent": 2, "owner": 3})],
            vec![json!({"id": 2, "name": "root"})],
        ]);
        let result = service().list(&mut exec, &req).await.unwrap();
        assert_eq!(result.data[0]["parent"]["name"], "root");
        assert_eq!(result.data[0]["owner"], Value::Null);
        let paths: Vec<(&str, &str)> = result.errors.iter().map(|e| (e.path.as_str(), e.code.as_str())).collect();
        assert_eq!(paths, vec![("owner", "resolution_error"), ("name", "validation_error")]);
    }

    #[tokio::test]
    async fn nested_relations_batch_per_path() {
        let req = request(json!({
            "entity": "author",
            "fields": ["name"],
            "relations": [{"field": "posts", "fields": ["title"], "relations": [{"field": "category", "fields": ["name"]}]}]
        }));
        let mut exec = RecordingExecutor::with(vec![
            vec![json!({"id": 1, "name": "ann"}), json!({"id": 2, "name": "bob"})],
            vec![
                json!({"id": 10, "title": "p1", "category": 100, "__parent": 1, "__rn": 1}),
                json!({"id": 11, "title": "p2", "category": 100, "__parent": 2, "__rn": 1}),
            ],
            vec![json!({"id": 100, "name": "news"})],
        ]);
        let result = service().list(&mut exec, &req).await.unwrap();
        assert_eq!(exec.queries.len(), 3);
        assert!(exec.queries[1].sql.contains(r#""main"."category" AS "category""#));
        assert_eq!(result.data[0]["posts"][0]["category"]["name"], "news");
        assert_eq!(result.data[1]["posts"][0]["category"]["name"], "news");
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn timeout_in_relation_fails_request() {
        let req = request(json!({"entity": "post", "relations": [{"field": "author"}]}));
        let mut exec = RecordingExecutor::with(vec![vec![json!({"id": 1, "author": 2})]]);
        exec.responses.push_back(Err(AppError::Timeout(30_000)));
        let err = service().list(&mut exec, &req).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn nested_filters_cannot_cross_collections() {
        let req = request(json!({
            "entity": "author",
            "relations": [{"field": "posts", "filters": [{"path": "tags.name", "constraints": [{"op": "equals", "values": ["x"]}]}]}]
        }));
        let mut exec = RecordingExecutor::with(vec![vec![json!({"id": 1})]]);
        let result = service().list(&mut exec, &req).await.unwrap();
        assert_eq!(exec.queries.len(), 1);
        assert_eq!(result.errors[0].path, "posts");
        assert_eq!(result.data[0]["posts"], Value::Null);
    }
}
