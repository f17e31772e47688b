use crate::error::SyncError;
use crate::index::schema::{IndexSchema, BUILTIN_RANKING_RULES};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// One independently updatable slice of index settings. Reconciliation
/// issues at most one backend write per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingsGroup {
    PrimaryKey,
    SearchableAttributes,
    FilterableAttributes,
    SortableAttributes,
    RankingRules,
    DistinctAttribute,
}

impl SettingsGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingsGroup::PrimaryKey => "primaryKey",
            SettingsGroup::SearchableAttributes => "searchableAttributes",
            SettingsGroup::FilterableAttributes => "filterableAttributes",
            SettingsGroup::SortableAttributes => "sortableAttributes",
            SettingsGroup::RankingRules => "rankingRules",
            SettingsGroup::DistinctAttribute => "distinctAttribute",
        }
    }

    /// Sub-route under `/indexes/{uid}/settings/`. The primary key has none;
    /// it is set on the index itself.
    pub fn route(&self) -> Option<&'static str> {
        match self {
            SettingsGroup::PrimaryKey => None,
            SettingsGroup::SearchableAttributes => Some("searchable-attributes"),
            SettingsGroup::FilterableAttributes => Some("filterable-attributes"),
            SettingsGroup::SortableAttributes => Some("sortable-attributes"),
            SettingsGroup::RankingRules => Some("ranking-rules"),
            SettingsGroup::DistinctAttribute => Some("distinct-attribute"),
        }
    }
}

impl fmt::Display for SettingsGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings as currently applied by the backend for one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSettings {
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub number_of_documents: u64,
    pub searchable_attributes: Vec<String>,
    pub filterable_attributes: Vec<String>,
    pub sortable_attributes: Vec<String>,
    pub ranking_rules: Vec<String>,
    #[serde(default)]
    pub distinct_attribute: Option<String>,
}

impl BackendSettings {
    /// Settings of a newly created, empty index.
    pub fn fresh(primary_key: Option<String>) -> Self {
        BackendSettings {
            primary_key,
            number_of_documents: 0,
            searchable_attributes: vec!["*".to_string()],
            filterable_attributes: Vec::new(),
            sortable_attributes: Vec::new(),
            ranking_rules: default_ranking_rules(),
            distinct_attribute: None,
        }
    }

    pub fn apply(&mut self, change: &SettingsChange) {
        match change {
            SettingsChange::PrimaryKey(pk) => self.primary_key = Some(pk.clone()),
            SettingsChange::SearchableAttributes(v) => self.searchable_attributes = v.clone(),
            SettingsChange::FilterableAttributes(v) => self.filterable_attributes = v.clone(),
            SettingsChange::SortableAttributes(v) => self.sortable_attributes = v.clone(),
            SettingsChange::RankingRules(v) => self.ranking_rules = v.clone(),
            SettingsChange::DistinctAttribute(v) => self.distinct_attribute = v.clone(),
        }
    }
}

fn default_ranking_rules() -> Vec<String> {
    BUILTIN_RANKING_RULES.iter().map(|r| r.to_string()).collect()
}

/// The desired value for one settings group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsChange {
    PrimaryKey(String),
    SearchableAttributes(Vec<String>),
    FilterableAttributes(Vec<String>),
    SortableAttributes(Vec<String>),
    RankingRules(Vec<String>),
    /// `None` resets the backend to no distinct attribute.
    DistinctAttribute(Option<String>),
}

impl SettingsChange {
    pub fn group(&self) -> SettingsGroup {
        match self {
            SettingsChange::PrimaryKey(_) => SettingsGroup::PrimaryKey,
            SettingsChange::SearchableAttributes(_) => SettingsGroup::SearchableAttributes,
            SettingsChange::FilterableAttributes(_) => SettingsGroup::FilterableAttributes,
            SettingsChange::SortableAttributes(_) => SettingsGroup::SortableAttributes,
            SettingsChange::RankingRules(_) => SettingsGroup::RankingRules,
            SettingsChange::DistinctAttribute(_) => SettingsGroup::DistinctAttribute,
        }
    }

    /// Request body for the group's settings route.
    pub fn to_json(&self) -> Value {
        match self {
            SettingsChange::PrimaryKey(pk) => Value::String(pk.clone()),
            SettingsChange::SearchableAttributes(v)
            | SettingsChange::FilterableAttributes(v)
            | SettingsChange::SortableAttributes(v)
            | SettingsChange::RankingRules(v) => {
                Value::Array(v.iter().cloned().map(Value::String).collect())
            }
            SettingsChange::DistinctAttribute(Some(d)) => Value::String(d.clone()),
            SettingsChange::DistinctAttribute(None) => Value::Null,
        }
    }
}

/// Computes the changes needed to bring `current` in line with `schema`,
/// one entry per differing group in a fixed order.
///
/// Searchable attributes and ranking rules are compared in order; filterable
/// and sortable attributes as sets. Fails without producing any change when
/// the primary key would have to change on an index that holds documents.
pub fn diff_settings(
    schema: &IndexSchema,
    current: &BackendSettings,
) -> Result<Vec<SettingsChange>, SyncError> {
    let mut changes = Vec::new();
    let declared_pk = &schema.primary_key_field;

    match &current.primary_key {
        None => changes.push(SettingsChange::PrimaryKey(declared_pk.clone())),
        Some(pk) if pk != declared_pk => {
            if current.number_of_documents > 0 {
                return Err(SyncError::ImmutablePrimaryKey {
                    current: pk.clone(),
                    declared: declared_pk.clone(),
                });
            }
            changes.push(SettingsChange::PrimaryKey(declared_pk.clone()));
        }
        Some(_) => {}
    }

    let mut searchable = schema.searchable_attributes();
    if searchable.is_empty() {
        searchable.push("*".to_string());
    }
    if searchable != current.searchable_attributes {
        changes.push(SettingsChange::SearchableAttributes(searchable));
    }

    let filterable = schema.filterable_attributes();
    if !same_set(&filterable, &current.filterable_attributes) {
        changes.push(SettingsChange::FilterableAttributes(filterable));
    }

    let sortable = schema.sortable_attributes();
    if !same_set(&sortable, &current.sortable_attributes) {
        changes.push(SettingsChange::SortableAttributes(sortable));
    }

    let ranking = if schema.ranking_rules.is_empty() {
        default_ranking_rules()
    } else {
        schema.ranking_rules.clone()
    };
    if ranking != current.ranking_rules {
        changes.push(SettingsChange::RankingRules(ranking));
    }

    if schema.distinct_attribute != current.distinct_attribute {
        changes.push(SettingsChange::DistinctAttribute(
            schema.distinct_attribute.clone(),
        ));
    }

    Ok(changes)
}

fn same_set(a: &[String], b: &[String]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::schema::user_profile_schema;

    fn converged(schema: &IndexSchema) -> BackendSettings {
        BackendSettings {
            primary_key: Some(schema.primary_key_field.clone()),
            number_of_documents: 12,
            searchable_attributes: schema.searchable_attributes(),
            filterable_attributes: schema.filterable_attributes(),
            sortable_attributes: schema.sortable_attributes(),
            ranking_rules: schema.ranking_rules.clone(),
            distinct_attribute: schema.distinct_attribute.clone(),
        }
    }

    fn groups(changes: &[SettingsChange]) -> Vec<SettingsGroup> {
        changes.iter().map(|c| c.group()).collect()
    }

    #[test]
    fn converged_settings_produce_no_changes() {
        let schema = user_profile_schema();
        assert!(diff_settings(&schema, &converged(&schema)).unwrap().is_empty());
    }

    #[test]
    fn fresh_index_needs_every_group_but_ranking() {
        let schema = user_profile_schema();
        let changes = diff_settings(&schema, &BackendSettings::fresh(None)).unwrap();
        assert_eq!(
            groups(&changes),
            vec![
                SettingsGroup::PrimaryKey,
                SettingsGroup::SearchableAttributes,
                SettingsGroup::FilterableAttributes,
                SettingsGroup::SortableAttributes,
                SettingsGroup::DistinctAttribute,
            ]
        );
    }

    #[test]
    fn filterable_order_is_ignored() {
        let mut schema = user_profile_schema();
        schema.fields[1].roles.insert(crate::index::schema::AttributeRole::Filterable);
        let mut current = converged(&schema);
        current.filterable_attributes.reverse();
        assert!(diff_settings(&schema, &current).unwrap().is_empty());
    }

    #[test]
    fn searchable_order_matters() {
        let schema = user_profile_schema();
        let mut current = converged(&schema);
        current.searchable_attributes.swap(0, 1);
        let changes = diff_settings(&schema, &current).unwrap();
        assert_eq!(
            changes,
            vec![SettingsChange::SearchableAttributes(
                schema.searchable_attributes()
            )]
        );
    }

    #[test]
    fn extra_sortable_attribute_is_removed() {
        let schema = user_profile_schema();
        let mut current = converged(&schema);
        current.sortable_attributes.push("username".to_string());
        let changes = diff_settings(&schema, &current).unwrap();
        assert_eq!(
            changes,
            vec![SettingsChange::SortableAttributes(vec![
                "fid".to_string(),
                "updated_at".to_string()
            ])]
        );
    }

    #[test]
    fn differing_primary_key_on_populated_index_is_immutable() {
        let schema = user_profile_schema();
        let mut current = converged(&schema);
        current.primary_key = Some("uid".to_string());
        current.searchable_attributes.clear();
        assert!(matches!(
            diff_settings(&schema, &current),
            Err(SyncError::ImmutablePrimaryKey { current, declared })
                if current == "uid" && declared == "id"
        ));
    }

    #[test]
    fn differing_primary_key_on_empty_index_is_changed() {
        let schema = user_profile_schema();
        let mut current = converged(&schema);
        current.primary_key = Some("uid".to_string());
        current.number_of_documents = 0;
        let changes = diff_settings(&schema, &current).unwrap();
        assert_eq!(changes, vec![SettingsChange::PrimaryKey("id".to_string())]);
    }

    #[test]
    fn no_searchable_fields_means_wildcard() {
        let mut schema = user_profile_schema();
        for f in &mut schema.fields {
            f.roles.remove(&crate::index::schema::AttributeRole::Searchable);
        }
        let mut current = converged(&schema);
        current.searchable_attributes = vec!["*".to_string()];
        assert!(diff_settings(&schema, &current).unwrap().is_empty());
    }

    #[test]
    fn removed_distinct_attribute_resets() {
        let mut schema = user_profile_schema();
        let current = converged(&schema);
        schema.distinct_attribute = None;
        let changes = diff_settings(&schema, &current).unwrap();
        assert_eq!(changes, vec![SettingsChange::DistinctAttribute(None)]);
        assert_eq!(changes[0].to_json(), Value::Null);
    }

    #[test]
    fn applying_the_diff_converges() {
        let schema = user_profile_schema();
        let mut current = BackendSettings::fresh(None);
        for change in diff_settings(&schema, &current).unwrap() {
            current.apply(&change);
        }
        assert!(diff_settings(&schema, &current).unwrap().is_empty());
    }

    #[test]
    fn group_names_and_routes() {
        assert_eq!(SettingsGroup::RankingRules.to_string(), "rankingRules");
        assert_eq!(
            SettingsGroup::FilterableAttributes.route(),
            Some("filterable-attributes")
        );
        assert_eq!(SettingsGroup::PrimaryKey.route(), None);
        assert_eq!(
            serde_json::to_value(SettingsGroup::DistinctAttribute).unwrap(),
            "distinctAttribute"
        );
    }
}
