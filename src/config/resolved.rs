//! Resolved metadata model: config validated and flattened for runtime use.
//!
//! Relation descriptors are resolved lazily per request so that a relation
//! pointing at an unknown entity only fails the request that traverses it.

use crate::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;

/// Soft-delete flag present on every entity and junction table.
pub const DELETED_FIELD: &str = "deleted";
/// Publication status present on every entity table.
pub const PUBLICATION_STATUS_FIELD: &str = "publication_status";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const UPDATED_AT_FIELD: &str = "updated_at";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Int,
    Float,
    Boolean,
    String,
    Text,
    Datetime,
    Date,
    Lookup,
    Junction,
    Collection,
}

impl DataType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "int" | "integer" => DataType::Int,
            "float" | "number" => DataType::Float,
            "boolean" | "bool" => DataType::Boolean,
            "string" => DataType::String,
            "text" => DataType::Text,
            "datetime" => DataType::Datetime,
            "date" => DataType::Date,
            "lookup" => DataType::Lookup,
            "junction" => DataType::Junction,
            "collection" => DataType::Collection,
            _ => return None,
        })
    }

    pub fn is_relation(self) -> bool {
        matches!(self, DataType::Lookup | DataType::Junction | DataType::Collection)
    }

    /// Relations whose join can multiply the row count.
    pub fn is_collective(self) -> bool {
        matches!(self, DataType::Junction | DataType::Collection)
    }

    pub fn is_textual(self) -> bool {
        matches!(self, DataType::String | DataType::Text)
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, DataType::Datetime | DataType::Date)
    }

    /// Types with a total order usable by lt/gt/between and keyset seeks.
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            DataType::Int | DataType::Float | DataType::String | DataType::Text | DataType::Datetime | DataType::Date | DataType::Lookup
        )
    }

    /// PostgreSQL type used for parameter casts and DDL. Lookup is the FK column type.
    pub fn pg_type(self) -> Option<&'static str> {
        match self {
            DataType::Int | DataType::Lookup => Some("bigint"),
            DataType::Float => Some("double precision"),
            DataType::Boolean => Some("boolean"),
            DataType::String | DataType::Text => Some("text"),
            DataType::Datetime => Some("timestamptz"),
            DataType::Date => Some("date"),
            DataType::Junction | DataType::Collection => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub field: String,
    pub data_type: DataType,
    pub options: Option<String>,
}

impl Attribute {
    pub fn new(field: impl Into<String>, data_type: DataType) -> Self {
        Attribute {
            field: field.into(),
            data_type,
            options: None,
        }
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Whether the attribute is backed by a physical column on its own table.
    pub fn has_column(&self) -> bool {
        !self.data_type.is_collective()
    }
}

#[derive(Clone, Debug)]
pub struct Entity {
    pub name: String,
    pub table_name: String,
    pub primary_key: String,
    pub attributes: Vec<Attribute>,
    pub default_page_size: Option<u32>,
}

impl Entity {
    pub fn attribute(&self, field: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.field == field)
    }

    /// Primary key attribute. Resolution guarantees it exists; an Int fallback keeps this total.
    pub fn primary_key_attribute(&self) -> Attribute {
        self.attribute(&self.primary_key)
            .cloned()
            .unwrap_or_else(|| Attribute::new(self.primary_key.clone(), DataType::Int))
    }

    pub fn column_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.has_column())
    }
}

/// Many-to-one (Lookup) or one-to-many (Collection) link between two entities.
#[derive(Clone, Debug)]
pub struct EntityLinkDesc {
    pub source_entity: Arc<Entity>,
    /// Column on the source side of the join condition.
    pub source_attribute: Attribute,
    pub target_entity: Arc<Entity>,
    /// Column on the target side of the join condition.
    pub target_attribute: Attribute,
    pub is_collective: bool,
}

/// Many-to-many link through an association table.
#[derive(Clone, Debug)]
pub struct Junction {
    pub source_entity: Arc<Entity>,
    /// FK column on the junction table referencing the source primary key.
    pub source_attribute: Attribute,
    pub junction_entity: Arc<Entity>,
    pub target_entity: Arc<Entity>,
    /// FK column on the junction table referencing the target primary key.
    pub target_attribute: Attribute,
}

/// Closed set of relation kinds; the join builder dispatches on this with one match.
#[derive(Clone, Debug)]
pub enum Relation {
    Lookup(EntityLinkDesc),
    Collection(EntityLinkDesc),
    Junction(Junction),
}

impl Relation {
    pub fn target(&self) -> &Arc<Entity> {
        match self {
            Relation::Lookup(link) | Relation::Collection(link) => &link.target_entity,
            Relation::Junction(j) => &j.target_entity,
        }
    }

    pub fn is_collective(&self) -> bool {
        match self {
            Relation::Lookup(link) | Relation::Collection(link) => link.is_collective,
            Relation::Junction(_) => true,
        }
    }
}

/// Junction table name: both entity names sorted and joined by `_`.
pub fn junction_table_name(a: &str, b: &str) -> String {
    let mut names = [a, b];
    names.sort_unstable();
    format!("{}_{}", names[0], names[1])
}

/// FK column names on a junction table, `(source side, target side)`.
pub fn junction_columns(source: &str, target: &str) -> (String, String) {
    if source == target {
        ("source_id".to_string(), "target_id".to_string())
    } else {
        (format!("{}_id", source), format!("{}_id", target))
    }
}

/// Synthesized entity describing the association table between `source` and `target`.
pub fn junction_entity(source: &Entity, target: &Entity) -> Entity {
    let table = junction_table_name(&source.name, &target.name);
    let (source_col, target_col) = junction_columns(&source.name, &target.name);
    Entity {
        name: table.clone(),
        table_name: table,
        primary_key: "id".to_string(),
        attributes: vec![
            Attribute::new("id", DataType::Int),
            Attribute::new(source_col, DataType::Lookup).with_options(source.name.clone()),
            Attribute::new(target_col, DataType::Lookup).with_options(target.name.clone()),
            Attribute::new(CREATED_AT_FIELD, DataType::Datetime),
            Attribute::new(UPDATED_AT_FIELD, DataType::Datetime),
            Attribute::new(DELETED_FIELD, DataType::Boolean),
        ],
        default_page_size: None,
    }
}

/// Immutable snapshot of all entities. Rebuilt and swapped on schema change, never mutated.
#[derive(Clone, Debug, Default)]
pub struct ResolvedModel {
    entities: HashMap<String, Arc<Entity>>,
}

impl ResolvedModel {
    pub fn new(entities: Vec<Entity>) -> Self {
        ResolvedModel {
            entities: entities
                .into_iter()
                .map(|e| (e.name.clone(), Arc::new(e)))
                .collect(),
        }
    }

    pub fn lookup(&self, name: &str) -> Result<&Arc<Entity>, AppError> {
        self.entities
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("entity '{}'", name)))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.values()
    }

    /// Turn a relation attribute's options into a concrete descriptor against known entities.
    pub fn resolve_relation(&self, source: &Arc<Entity>, attr: &Attribute) -> Result<Relation, AppError> {
        let options = attr.options.as_deref().unwrap_or("");
        let unresolved = |target: &str| AppError::Resolution {
            entity: source.name.clone(),
            attribute: attr.field.clone(),
            target: target.to_string(),
        };
        match attr.data_type {
            DataType::Lookup => {
                let target = self.entities.get(options).ok_or_else(|| unresolved(options))?;
                Ok(Relation::Lookup(EntityLinkDesc {
                    source_entity: source.clone(),
                    source_attribute: attr.clone(),
                    target_entity: target.clone(),
                    target_attribute: target.primary_key_attribute(),
                    is_collective: false,
                }))
            }
            DataType::Collection => {
                let (target_name, link_field) = options.split_once('.').ok_or_else(|| unresolved(options))?;
                let target = self.entities.get(target_name).ok_or_else(|| unresolved(target_name))?;
                let link = target
                    .attribute(link_field)
                    .filter(|a| a.data_type == DataType::Lookup && a.options.as_deref() == Some(source.name.as_str()))
                    .ok_or_else(|| unresolved(options))?;
                Ok(Relation::Collection(EntityLinkDesc {
                    source_entity: source.clone(),
                    source_attribute: source.primary_key_attribute(),
                    target_entity: target.clone(),
                    target_attribute: link.clone(),
                    is_collective: true,
                }))
            }
            DataType::Junction => {
                let target = self.entities.get(options).ok_or_else(|| unresolved(options))?;
                let junction = junction_entity(source, target);
                let (source_col, target_col) = junction_columns(&source.name, &target.name);
                let source_attribute = junction
                    .attribute(&source_col)
                    .cloned()
                    .ok_or_else(|| unresolved(options))?;
                let target_attribute = junction
                    .attribute(&target_col)
                    .cloned()
                    .ok_or_else(|| unresolved(options))?;
                Ok(Relation::Junction(Junction {
                    source_entity: source.clone(),
                    source_attribute,
                    junction_entity: Arc::new(junction),
                    target_entity: target.clone(),
                    target_attribute,
                }))
            }
            _ => Err(AppError::validation(
                attr.field.clone(),
                format!("'{}' is not a relation", attr.field),
            )),
        }
    }
}
