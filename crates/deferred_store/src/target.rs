use deferred_core::ValueFamily;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsertTarget {
    pub entity: String,
    pub table: String,
}

impl InsertTarget {
    pub fn new(entity: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldTarget {
    pub entity: String,
    pub table: String,
    pub column: String,
    pub family: ValueFamily,
}

impl FieldTarget {
    pub fn new(
        entity: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        family: ValueFamily,
    ) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
            column: column.into(),
            family,
        }
    }
}
