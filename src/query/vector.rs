//! Attribute paths: a dot-path from the root entity resolved to an attribute and the join alias it lives under.

use crate::config::{Attribute, Entity, Relation, ResolvedModel};
use crate::error::AppError;
use crate::sql::ColumnRef;
use std::sync::Arc;

/// Alias of the base table. Joined aliases are `main.<path>`, so they never collide with it.
pub const ROOT_ALIAS: &str = "main";

/// Alias for the table reached by following `segments` from the root.
pub fn alias_for<S: AsRef<str>>(segments: &[S]) -> String {
    let mut alias = ROOT_ALIAS.to_string();
    for s in segments {
        alias.push('.');
        alias.push_str(s.as_ref());
    }
    alias
}

/// One relation hop along a path.
#[derive(Clone, Debug)]
pub struct PathStep {
    pub attribute: Attribute,
    pub relation: Relation,
}

#[derive(Clone, Debug)]
pub struct AttributeVector {
    /// Caller-facing dot-path, e.g. `author.name`.
    pub full_path: String,
    /// Join alias of the table owning `attribute`.
    pub table_alias: String,
    pub attribute: Attribute,
    /// Entity owning `attribute`.
    pub entity: Arc<Entity>,
    pub steps: Vec<PathStep>,
}

impl AttributeVector {
    /// Resolve `path` against `root`, following at most `max_depth` relation hops.
    pub fn resolve(
        model: &ResolvedModel,
        root: &Arc<Entity>,
        path: &str,
        max_depth: usize,
    ) -> Result<Self, AppError> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(AppError::validation(path, "malformed attribute path"));
        }
        if segments.len() - 1 > max_depth {
            return Err(AppError::validation(
                path,
                format!("path exceeds the maximum of {} relation hops", max_depth),
            ));
        }

        let mut entity = root.clone();
        let mut steps = Vec::with_capacity(segments.len() - 1);
        let (last, hops) = segments.split_last().ok_or_else(|| AppError::validation(path, "empty path"))?;
        for seg in hops {
            let attribute = entity
                .attribute(seg)
                .cloned()
                .ok_or_else(|| AppError::validation(path, format!("unknown field '{}' on {}", seg, entity.name)))?;
            if !attribute.data_type.is_relation() {
                return Err(AppError::validation(
                    path,
                    format!("'{}' on {} is not a relation", seg, entity.name),
                ));
            }
            let relation = model.resolve_relation(&entity, &attribute)?;
            let next = relation.target().clone();
            steps.push(PathStep { attribute, relation });
            entity = next;
        }
        let attribute = entity
            .attribute(last)
            .cloned()
            .ok_or_else(|| AppError::validation(path, format!("unknown field '{}' on {}", last, entity.name)))?;

        let table_alias = alias_for(hops);
        Ok(AttributeVector {
            full_path: path.to_string(),
            table_alias,
            attribute,
            entity,
            steps,
        })
    }

    /// The root entity's primary key as a vector.
    pub fn primary_key(root: &Arc<Entity>) -> Self {
        let attribute = root.primary_key_attribute();
        AttributeVector {
            full_path: attribute.field.clone(),
            table_alias: ROOT_ALIAS.to_string(),
            attribute,
            entity: root.clone(),
            steps: Vec::new(),
        }
    }

    /// Column backing this vector, or a validation error for collective relations which have none.
    pub fn column(&self) -> Result<ColumnRef, AppError> {
        if !self.attribute.has_column() {
            return Err(AppError::validation(
                self.full_path.clone(),
                format!("'{}' is a collection and has no column", self.attribute.field),
            ));
        }
        Ok(ColumnRef::new(
            self.table_alias.clone(),
            self.attribute.field.clone(),
            self.attribute.data_type.pg_type(),
        ))
    }

    /// Whether any hop can multiply rows.
    pub fn is_collective(&self) -> bool {
        self.steps.iter().any(|s| s.relation.is_collective())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolved::fixtures::blog_model;
    use crate::config::DataType;

    #[test]
    fn resolves_multi_hop_alias() {
        let model = blog_model();
        let post = model.lookup("post").unwrap().clone();
        let v = AttributeVector::resolve(&model, &post, "author.posts.tags.name", 5).unwrap();
        assert_eq!(v.table_alias, "main.author.posts.tags");
        assert_eq!(v.entity.name, "tag");
        assert_eq!(v.steps.len(), 3);
        assert!(v.is_collective());
        assert_eq!(v.column().unwrap().sql(), r#""main.author.posts.tags"."name""#);
    }

    #[test]
    fn root_scalar_lives_on_main() {
        let model = blog_model();
        let post = model.lookup("post").unwrap().clone();
        let v = AttributeVector::resolve(&model, &post, "title", 5).unwrap();
        assert_eq!(v.table_alias, ROOT_ALIAS);
        assert!(v.steps.is_empty());
        assert_eq!(v.attribute.data_type, DataType::String);
    }

    #[test]
    fn rejects_unknown_and_non_relation_hops() {
        let model = blog_model();
        let post = model.lookup("post").unwrap().clone();
        assert!(matches!(
            AttributeVector::resolve(&model, &post, "nope", 5),
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            AttributeVector::resolve(&model, &post, "title.length", 5),
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            AttributeVector::resolve(&model, &post, "author..name", 5),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn self_referential_lookup_is_bounded_by_depth() {
        let model = blog_model();
        let category = model.lookup("category").unwrap().clone();
        assert!(AttributeVector::resolve(&model, &category, "parent.parent.name", 2).is_ok());
        let err = AttributeVector::resolve(&model, &category, "parent.parent.parent.name", 2).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn dangling_relation_surfaces_as_resolution_error() {
        let model = blog_model();
        let category = model.lookup("category").unwrap().clone();
        let err = AttributeVector::resolve(&model, &category, "owner.name", 5).unwrap_err();
        assert!(matches!(err, AppError::Resolution { .. }));
    }

    #[test]
    fn collection_attribute_has_no_column() {
        let model = blog_model();
        let post = model.lookup("post").unwrap().clone();
        let v = AttributeVector::resolve(&model, &post, "tags", 5).unwrap();
        assert!(v.column().is_err());
    }
}
