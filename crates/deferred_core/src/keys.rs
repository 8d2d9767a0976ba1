use convert_case::{Case, Casing};

const ROOT: &str = "deferred";

/// Builds the staging-store key layout under a configurable prefix.
///
/// Layout, with `{ns}` the namespace prefix and `{entity}` the snake-cased tag:
/// - inserts: `{ns}deferred:insert:{entity}`
/// - updates: `{ns}deferred:update:{entity}_{field}:ids` and `...:values`
/// - increasing updates: `{ns}deferred:update:{entity}_{field}`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StagingKeys {
    namespace: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateKeys {
    pub ids: String,
    pub values: String,
}

impl StagingKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn insert(&self, entity: &str) -> String {
        format!("{}{ROOT}:insert:{}", self.namespace, entity_tag(entity))
    }

    pub fn update(&self, entity: &str, field: &str) -> UpdateKeys {
        let base = self.field_key(entity, field);
        UpdateKeys {
            ids: format!("{base}:ids"),
            values: format!("{base}:values"),
        }
    }

    pub fn increasing(&self, entity: &str, field: &str) -> String {
        self.field_key(entity, field)
    }

    fn field_key(&self, entity: &str, field: &str) -> String {
        format!(
            "{}{ROOT}:update:{}_{field}",
            self.namespace,
            entity_tag(entity)
        )
    }
}

fn entity_tag(entity: &str) -> String {
    entity.to_case(Case::Snake)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_use_namespace_and_snake_case_entity() {
        let keys = StagingKeys::new("app:");
        assert_eq!(keys.insert("PageView"), "app:deferred:insert:page_view");
        assert_eq!(
            keys.increasing("User", "last_seen_at"),
            "app:deferred:update:user_last_seen_at"
        );
    }

    #[test]
    fn update_index_and_values_live_under_distinct_keys() {
        let keys = StagingKeys::default().update("User", "nickname");
        assert_eq!(keys.ids, "deferred:update:user_nickname:ids");
        assert_eq!(keys.values, "deferred:update:user_nickname:values");
        assert_ne!(keys.ids, keys.values);
    }
}
