//! Query binding: composes paths, joins, filters, sorts and cursors into one statement and runs it.

use crate::config::{DataType, Entity, ResolvedModel};
use crate::error::AppError;
use crate::query::cursor::{decode_cursor, page_info, seek_predicate, trim_page};
use crate::query::filter::{coerce, validate_filters};
use crate::query::sort::{order_terms, validate_sorts};
use crate::query::tree::scope_predicates;
use crate::query::{
    AttributeTree, AttributeVector, FilterInput, PageInfo, QueryRequest, RelationRequest, SeekDirection, SortInput,
    ValidFilter, ValidPagination, ValidSort, ROOT_ALIAS,
};
use crate::service::executor::Executor;
use crate::settings::Settings;
use crate::sql::{ColumnRef, Predicate, SelectQuery};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Failure of one requested field or relation, reported next to the data instead of failing the request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub code: String,
    pub message: String,
}

impl FieldError {
    pub fn from_error(path: impl Into<String>, err: &AppError) -> Self {
        FieldError {
            path: path.into(),
            code: err.code().to_string(),
            message: err.public_message(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ListResult {
    pub data: Vec<Value>,
    pub page: PageInfo,
    pub errors: Vec<FieldError>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SingleResult {
    pub data: Value,
    pub errors: Vec<FieldError>,
}

/// Built but not yet executed list statement.
#[derive(Clone, Debug)]
pub struct ListPlan {
    pub root: Arc<Entity>,
    pub query: SelectQuery,
    pub sorts: Vec<ValidSort>,
    pub pagination: ValidPagination,
    pub seek: Option<SeekDirection>,
    pub errors: Vec<FieldError>,
}

pub(crate) struct SelectionInput<'a> {
    pub fields: &'a [String],
    pub relations: &'a [RelationRequest],
    pub filters: &'a [FilterInput],
    pub sorts: &'a [SortInput],
}

impl<'a> SelectionInput<'a> {
    fn of(req: &'a QueryRequest) -> Self {
        SelectionInput {
            fields: &req.fields,
            relations: &req.relations,
            filters: &req.filters,
            sorts: &req.sorts,
        }
    }
}

pub(crate) struct Selection {
    pub query: SelectQuery,
    pub sorts: Vec<ValidSort>,
    pub errors: Vec<FieldError>,
}

/// Per-request query engine over one model snapshot.
#[derive(Clone)]
pub struct QueryService {
    pub(crate) model: Arc<ResolvedModel>,
    pub(crate) settings: Arc<Settings>,
    /// Publication status every joined table is restricted to, when set.
    pub(crate) scope: Option<String>,
}

impl QueryService {
    pub fn new(model: Arc<ResolvedModel>, settings: Arc<Settings>) -> Self {
        QueryService {
            model,
            settings,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    /// SELECT over `root`: fields, filters and sorts share one join tree, scoped and ordered.
    ///
    /// `nested` selections (relation sub-queries) may only traverse Lookup relations.
    pub(crate) fn build_selection(
        &self,
        root: &Arc<Entity>,
        input: SelectionInput<'_>,
        nested: bool,
    ) -> Result<Selection, AppError> {
        let depth = self.settings.max_path_depth;
        let mut errors = Vec::new();
        let paths: Vec<String> = if input.fields.is_empty() {
            root.column_attributes().map(|a| a.field.clone()).collect()
        } else {
            input.fields.to_vec()
        };
        let mut fields = Vec::with_capacity(paths.len());
        for path in &paths {
            match AttributeVector::resolve(&self.model, root, path, depth) {
                Ok(v) if v.is_collective() || !v.attribute.has_column() => {
                    return Err(AppError::validation(
                        path,
                        "collections are selected as relations, not fields",
                    ))
                }
                Ok(v) => fields.push(v),
                Err(e @ AppError::Resolution { .. }) => {
                    tracing::warn!(path = %path, error = %e, "field skipped");
                    errors.push(FieldError::from_error(path, &e));
                }
                Err(e) => return Err(e),
            }
        }

        let filters = validate_filters(&self.model, root, input.filters, depth)?;
        if nested {
            if let Some(f) = filters.iter().find(|f| f.vector.is_collective()) {
                return Err(AppError::validation(
                    &f.vector.full_path,
                    "relation filters cannot traverse collections",
                ));
            }
        }
        let sorts = validate_sorts(&self.model, root, input.sorts, depth)?;

        let tree = AttributeTree::from_vectors(
            fields
                .iter()
                .chain(filters.iter().map(|f| &f.vector))
                .chain(sorts.iter().map(|s| &s.vector)),
        );
        let graph = tree.build_joins(self.scope.as_deref());

        let mut query = SelectQuery::new(root.table_name.clone(), ROOT_ALIAS);
        query.distinct = graph.has_collective;
        query.joins = graph.joins;
        let pk = AttributeVector::primary_key(root);
        query.select(pk.column()?, pk.full_path.clone());
        for v in &fields {
            query.select(v.column()?, v.full_path.clone());
        }
        for s in &sorts {
            query.select(s.column.clone(), s.vector.full_path.clone());
        }
        // Lookup relations are batched by their FK value.
        for r in input.relations {
            if let Some(a) = root.attribute(&r.field).filter(|a| a.data_type == DataType::Lookup) {
                query.select(
                    ColumnRef::new(ROOT_ALIAS, a.field.clone(), a.data_type.pg_type()),
                    a.field.clone(),
                );
            }
        }
        query.filter = scope_predicates(ROOT_ALIAS, self.scope.as_deref());
        query.filter.extend(filters.iter().map(ValidFilter::to_predicate));
        query.order = order_terms(&sorts, false);
        Ok(Selection { query, sorts, errors })
    }

    /// Validate `req` and build its list statement (limit + 1 rows for edge detection).
    pub fn plan_list(&self, req: &QueryRequest) -> Result<ListPlan, AppError> {
        let root = self.model.lookup(&req.entity)?.clone();
        let mut sel = self.build_selection(&root, SelectionInput::of(req), false)?;
        let pagination = ValidPagination::resolve(req.pagination.as_ref(), root.default_page_size, &self.settings)?;
        let seek = match &req.span {
            Some(span) => span.seek()?,
            None => None,
        };
        match seek {
            Some(_) if pagination.offset > 0 => {
                return Err(AppError::validation(
                    "pagination.offset",
                    "offset cannot be combined with a span cursor",
                ))
            }
            Some((direction, token)) => {
                let values = decode_cursor(token, &sel.sorts)?;
                sel.query.filter.push(seek_predicate(&sel.sorts, &values, direction));
                sel.query.order = order_terms(&sel.sorts, direction == SeekDirection::Before);
            }
            None => sel.query.offset = Some(pagination.offset),
        }
        sel.query.limit = Some(pagination.limit.saturating_add(1));
        Ok(ListPlan {
            root,
            query: sel.query,
            sorts: sel.sorts,
            pagination,
            seek: seek.map(|(d, _)| d),
            errors: sel.errors,
        })
    }

    pub async fn list(&self, exec: &mut dyn Executor, req: &QueryRequest) -> Result<ListResult, AppError> {
        let plan = self.plan_list(req)?;
        let rows = exec.fetch_all(&plan.query.build()).await?;
        let (rows, has_previous, has_next) = trim_page(rows, plan.pagination.limit, plan.seek, plan.pagination.offset);
        let page = page_info(&plan.sorts, &rows, has_previous, has_next);
        let mut errors = plan.errors;
        let rows = self
            .finish_rows(exec, &plan.root, rows, &req.relations, "", &mut errors)
            .await?;
        tracing::debug!(entity = %plan.root.name, rows = rows.len(), "list");
        Ok(ListResult {
            data: rows.into_iter().map(Value::Object).collect(),
            page,
            errors,
        })
    }

    /// One row by primary key; NotFound when it is absent, soft-deleted or out of scope.
    pub async fn single(&self, exec: &mut dyn Executor, req: &QueryRequest, id: &str) -> Result<SingleResult, AppError> {
        let root = self.model.lookup(&req.entity)?.clone();
        let mut sel = self.build_selection(&root, SelectionInput::of(req), false)?;
        let pk = AttributeVector::primary_key(&root);
        let key = coerce(pk.attribute.data_type, &Value::String(id.to_string()))
            .ok_or_else(|| AppError::BadRequest(format!("invalid id '{}'", id)))?;
        sel.query.filter.push(Predicate::eq(pk.column()?, key));
        sel.query.limit = Some(1);
        let rows = exec.fetch_all(&sel.query.build()).await?;
        if rows.is_empty() {
            return Err(AppError::NotFound(format!("{} {}", root.name, id)));
        }
        let mut errors = sel.errors;
        let mut rows = self
            .finish_rows(exec, &root, rows, &req.relations, "", &mut errors)
            .await?;
        let data = rows.pop().map(Value::Object).unwrap_or(Value::Null);
        Ok(SingleResult { data, errors })
    }

    /// Number of rows matching the filters, counted by distinct primary key when joins can multiply rows.
    pub async fn count(&self, exec: &mut dyn Executor, req: &QueryRequest) -> Result<u64, AppError> {
        let root = self.model.lookup(&req.entity)?.clone();
        let filters = validate_filters(&self.model, &root, &req.filters, self.settings.max_path_depth)?;
        let graph = AttributeTree::from_vectors(filters.iter().map(|f| &f.vector)).build_joins(self.scope.as_deref());
        let mut query = SelectQuery::new(root.table_name.clone(), ROOT_ALIAS);
        query.distinct = graph.has_collective;
        query.joins = graph.joins;
        query.filter = scope_predicates(ROOT_ALIAS, self.scope.as_deref());
        query.filter.extend(filters.iter().map(ValidFilter::to_predicate));
        let pk = AttributeVector::primary_key(&root).column()?;
        let rows = exec.fetch_all(&query.build_count(&pk)).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}
