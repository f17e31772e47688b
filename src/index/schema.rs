use crate::error::{ConfigError, SchemaError};
use crate::query::sort::SortExpr;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Ranking rules the backend understands without a field reference.
pub const BUILTIN_RANKING_RULES: &[&str] =
    &["words", "typo", "proximity", "attribute", "sort", "exactness"];

const MAX_INDEX_NAME_BYTES: usize = 400;

/// Capability a field declares within the index settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeRole {
    Searchable,
    Filterable,
    Sortable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub name: String,
    /// Empty means the field is stored but neither searchable, filterable nor sortable.
    #[serde(default)]
    pub roles: BTreeSet<AttributeRole>,
    #[serde(default)]
    pub is_primary_key: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        FieldSpec {
            name: name.into(),
            roles: BTreeSet::new(),
            is_primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn searchable(self) -> Self {
        self.with_role(AttributeRole::Searchable)
    }

    pub fn filterable(self) -> Self {
        self.with_role(AttributeRole::Filterable)
    }

    pub fn sortable(self) -> Self {
        self.with_role(AttributeRole::Sortable)
    }

    pub fn with_role(mut self, role: AttributeRole) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn has_role(&self, role: AttributeRole) -> bool {
        self.roles.contains(&role)
    }
}

/// Canonical description of one index: its fields, their roles and the
/// ranking configuration. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    pub index_name: String,
    pub primary_key_field: String,
    pub fields: Vec<FieldSpec>,
    pub ranking_rules: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinct_attribute: Option<String>,
}

impl IndexSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_role(&self, name: &str, role: AttributeRole) -> bool {
        self.field(name).is_some_and(|f| f.has_role(role))
    }

    /// Names of fields declaring `role`, in declaration order.
    pub fn attributes_with(&self, role: AttributeRole) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.has_role(role))
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn searchable_attributes(&self) -> Vec<String> {
        self.attributes_with(AttributeRole::Searchable)
    }

    pub fn filterable_attributes(&self) -> Vec<String> {
        self.attributes_with(AttributeRole::Filterable)
    }

    pub fn sortable_attributes(&self) -> Vec<String> {
        self.attributes_with(AttributeRole::Sortable)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if !is_valid_index_name(&self.index_name) {
            return Err(SchemaError::InvalidIndexName(self.index_name.clone()));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
        }

        let flagged: Vec<&FieldSpec> = self.fields.iter().filter(|f| f.is_primary_key).collect();
        let flagged = match flagged.as_slice() {
            [] => return Err(SchemaError::NoPrimaryKey),
            [only] => *only,
            many => {
                return Err(SchemaError::MultiplePrimaryKeys(
                    many.iter().map(|f| f.name.clone()).collect(),
                ))
            }
        };

        self.require_field("primaryKey", &self.primary_key_field)?;
        if flagged.name != self.primary_key_field {
            return Err(SchemaError::PrimaryKeyMismatch {
                declared: self.primary_key_field.clone(),
                flagged: flagged.name.clone(),
            });
        }

        if let Some(distinct) = &self.distinct_attribute {
            self.require_field("distinctAttribute", distinct)?;
        }

        for rule in &self.ranking_rules {
            match ranking_rule_field(rule) {
                Some(field) => self.require_field("rankingRules", &field)?,
                None if BUILTIN_RANKING_RULES.contains(&rule.as_str()) => {}
                None => {
                    return Err(SchemaError::DanglingReference {
                        attribute: "rankingRules".to_string(),
                        reference: rule.clone(),
                    })
                }
            }
        }

        Ok(())
    }

    fn require_field(&self, attribute: &str, name: &str) -> Result<(), SchemaError> {
        if self.field(name).is_some() {
            Ok(())
        } else {
            Err(SchemaError::DanglingReference {
                attribute: attribute.to_string(),
                reference: name.to_string(),
            })
        }
    }
}

/// Field referenced by a custom ranking rule (`fid:desc` or `desc(fid)`).
/// Built-in rules return `None`.
pub fn ranking_rule_field(rule: &str) -> Option<String> {
    if BUILTIN_RANKING_RULES.contains(&rule) {
        return None;
    }
    SortExpr::parse(rule).ok().map(|expr| expr.field)
}

fn is_valid_index_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_INDEX_NAME_BYTES
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Holds the validated schema for the lifetime of the process.
///
/// Components receive the schema by shared reference (or a cloned `Arc`);
/// there is no global instance.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schema: Arc<IndexSchema>,
}

impl SchemaRegistry {
    /// Validate `schema` and freeze it. A failure here must stop startup.
    pub fn validate(schema: IndexSchema) -> Result<Self, SchemaError> {
        schema.validate()?;
        tracing::info!(
            "[SCHEMA {}] validated: {} fields, primary key {}",
            schema.index_name,
            schema.fields.len(),
            schema.primary_key_field
        );
        Ok(SchemaRegistry {
            schema: Arc::new(schema),
        })
    }

    /// Load a schema from a JSON file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let schema: IndexSchema =
            serde_json::from_str(&content).map_err(|e| ConfigError::Unreadable {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::validate(schema)?)
    }

    pub fn get(&self) -> Arc<IndexSchema> {
        Arc::clone(&self.schema)
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }
}

/// The profile index used by Waypoint.
pub fn user_profile_schema() -> IndexSchema {
    IndexSchema {
        index_name: "user_profiles".to_string(),
        primary_key_field: "id".to_string(),
        fields: vec![
            FieldSpec::new("id").primary_key(),
            FieldSpec::new("username").searchable(),
            FieldSpec::new("display_name").searchable(),
            FieldSpec::new("bio").searchable(),
            FieldSpec::new("location").searchable(),
            FieldSpec::new("twitter").searchable(),
            FieldSpec::new("github").searchable(),
            FieldSpec::new("fid").searchable().filterable().sortable(),
            FieldSpec::new("pfp_url"),
            FieldSpec::new("url"),
            FieldSpec::new("updated_at").sortable(),
        ],
        ranking_rules: BUILTIN_RANKING_RULES
            .iter()
            .map(|r| r.to_string())
            .collect(),
        distinct_attribute: Some("username".to_string()),
    }
}
