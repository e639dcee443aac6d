//! Entity model: queryable database objects and their attributes.

use crate::error::DbsError;
use crate::parameter::SqlType;
use std::collections::HashMap;
use std::fmt;

/// Qualify `name` with `prefix`, omitting empty segments.
///
/// ```
/// use dbs_connector::entity::qualify;
///
/// assert_eq!(qualify(Some("app"), "users"), "app.users");
/// assert_eq!(qualify(None, "users"), "users");
/// assert_eq!(qualify(Some("db"), &qualify(Some("app"), "users")), "db.app.users");
/// ```
pub fn qualify(prefix: Option<&str>, name: &str) -> String {
    match (prefix.filter(|p| !p.is_empty()), name.is_empty()) {
        (Some(prefix), false) => format!("{prefix}.{name}"),
        (Some(prefix), true) => prefix.to_string(),
        (None, _) => name.to_string(),
    }
}

/// Semantic type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    #[default]
    String,
    Integer,
    Long,
    Double,
    Float,
    Decimal,
    Boolean,
    Date,
    Time,
    Timestamp,
    Binary,
}

impl AttributeType {
    pub fn sql_type(&self) -> SqlType {
        match self {
            AttributeType::String => SqlType::Varchar,
            AttributeType::Integer => SqlType::Integer,
            AttributeType::Long => SqlType::Numeric,
            AttributeType::Double => SqlType::Double,
            AttributeType::Float => SqlType::Float,
            AttributeType::Decimal => SqlType::Decimal,
            AttributeType::Boolean => SqlType::Boolean,
            AttributeType::Date => SqlType::Date,
            AttributeType::Time => SqlType::Time,
            AttributeType::Timestamp => SqlType::Timestamp,
            AttributeType::Binary => SqlType::Binary,
        }
    }
}

/// One column of an [`Entity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    name: String,
    alias: String,
    kind: AttributeType,
    required: bool,
    hidden: bool,
}

impl Attribute {
    /// An attribute whose native column name is `name`, exposed as `alias`.
    pub fn new(name: impl Into<String>, alias: impl Into<String>, kind: AttributeType) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
            kind,
            required: false,
            hidden: false,
        }
    }

    /// Shorthand for a string attribute whose alias equals its column name.
    pub fn column(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(name.clone(), name, AttributeType::String)
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Hidden attributes never show their values in diagnostics.
    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    /// Native column name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn kind(&self) -> AttributeType {
        self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn sql_type(&self) -> SqlType {
        self.kind.sql_type()
    }
}

/// A queryable database object (table or view).
///
/// Built once when the schema is loaded and immutable afterwards. The
/// qualified id and the alias index are computed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    id: String,
    name: String,
    primary: Vec<usize>,
    attributes: Vec<Attribute>,
    alias_index: HashMap<String, usize>,
}

impl Entity {
    /// Build an entity.
    ///
    /// `primary` holds positions into `attributes` forming the identifying key.
    ///
    /// # Errors
    ///
    /// Returns a construction error when the name is empty, the key is empty,
    /// a key position is out of range or repeated, or two attributes share an
    /// alias.
    pub fn build(
        catalog: Option<&str>,
        schema: Option<&str>,
        name: &str,
        primary: &[usize],
        attributes: Vec<Attribute>,
    ) -> Result<Self, DbsError> {
        if name.trim().is_empty() {
            return Err(DbsError::entity_invalid("entity name is empty"));
        }
        if primary.is_empty() {
            return Err(DbsError::entity_invalid(format!(
                "entity {name} declares no primary key"
            )));
        }

        let mut alias_index = HashMap::with_capacity(attributes.len());
        for (position, attribute) in attributes.iter().enumerate() {
            if attribute.name.is_empty() || attribute.alias.is_empty() {
                return Err(DbsError::entity_invalid(format!(
                    "attribute {position} of {name} has an empty name or alias"
                )));
            }
            if alias_index.insert(attribute.alias.clone(), position).is_some() {
                return Err(DbsError::entity_invalid(format!(
                    "alias {} is declared twice in {name}",
                    attribute.alias
                )));
            }
        }

        for (i, position) in primary.iter().enumerate() {
            if *position >= attributes.len() {
                return Err(DbsError::entity_invalid(format!(
                    "primary key position {position} is out of range for {name} ({} attributes)",
                    attributes.len()
                )));
            }
            if primary[..i].contains(position) {
                return Err(DbsError::entity_invalid(format!(
                    "primary key position {position} is repeated in {name}"
                )));
            }
        }

        let id = qualify(catalog, &qualify(schema, name));
        Ok(Self {
            id,
            name: name.to_string(),
            primary: primary.to_vec(),
            attributes,
            alias_index,
        })
    }

    /// Fully qualified name (`catalog.schema.table`)
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Key attributes in key order.
    pub fn primary_keys(&self) -> impl Iterator<Item = &Attribute> + '_ {
        self.primary.iter().map(move |i| &self.attributes[*i])
    }

    /// First key attribute; used for sub-queries and foreign key comparisons.
    pub fn primary(&self) -> &Attribute {
        &self.attributes[self.primary[0]]
    }

    pub fn lookup(&self, alias: &str) -> Option<&Attribute> {
        self.alias_index.get(alias).map(|i| &self.attributes[*i])
    }

    /// Like [`Entity::lookup`] but a miss is an error.
    pub fn attribute(&self, alias: &str) -> Result<&Attribute, DbsError> {
        self.lookup(alias).ok_or_else(|| DbsError::AttributeNotFound {
            attribute: alias.to_string(),
            entity: self.id.clone(),
        })
    }

    /// Attributes that are not hidden, in declaration order.
    pub fn returning(&self) -> Vec<&Attribute> {
        self.attributes.iter().filter(|a| !a.hidden).collect()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Entity {
        Entity::build(
            None,
            Some("app"),
            "users",
            &[0],
            vec![
                Attribute::new("login_id", "uid", AttributeType::String).required(true),
                Attribute::new("email_addr", "mail", AttributeType::String),
                Attribute::new("pwd", "password", AttributeType::String).hidden(true),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_qualify_collapses_empty_segments() {
        assert_eq!(qualify(Some("c"), &qualify(Some("s"), "t")), "c.s.t");
        assert_eq!(qualify(None, &qualify(Some("s"), "t")), "s.t");
        assert_eq!(qualify(Some(""), &qualify(Some("s"), "t")), "s.t");
        assert_eq!(qualify(Some("c"), &qualify(None, "t")), "c.t");
        assert_eq!(qualify(None, &qualify(None, "t")), "t");
    }

    #[test]
    fn test_entity_id_is_qualified() {
        let entity = users();
        assert_eq!(entity.id(), "app.users");
        assert_eq!(entity.name(), "users");
    }

    #[test]
    fn test_lookup_by_alias() {
        let entity = users();
        assert_eq!(entity.lookup("mail").map(Attribute::name), Some("email_addr"));
        assert!(entity.lookup("email_addr").is_none());
        assert!(matches!(
            entity.attribute("nope"),
            Err(DbsError::AttributeNotFound { .. })
        ));
    }

    #[test]
    fn test_primary_is_first_key() {
        let entity = users();
        assert_eq!(entity.primary().name(), "login_id");
        assert_eq!(entity.primary_keys().count(), 1);
    }

    #[test]
    fn test_returning_skips_hidden() {
        let entity = users();
        let aliases: Vec<_> = entity.returning().iter().map(|a| a.alias()).collect();
        assert_eq!(aliases, vec!["uid", "mail"]);
    }

    #[test]
    fn test_build_rejects_out_of_range_key() {
        let err = Entity::build(None, None, "t", &[3], vec![Attribute::column("a")]);
        assert!(matches!(err, Err(DbsError::Construction { .. })));
    }

    #[test]
    fn test_build_rejects_empty_key() {
        let err = Entity::build(None, None, "t", &[], vec![Attribute::column("a")]);
        assert!(err.is_err());
    }

    #[test]
    fn test_build_rejects_duplicate_alias() {
        let err = Entity::build(
            None,
            None,
            "t",
            &[0],
            vec![
                Attribute::new("a", "x", AttributeType::String),
                Attribute::new("b", "x", AttributeType::String),
            ],
        );
        let err = err.unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_build_rejects_repeated_key_position() {
        let err = Entity::build(None, None, "t", &[0, 0], vec![Attribute::column("a")]);
        assert!(err.is_err());
    }
}
