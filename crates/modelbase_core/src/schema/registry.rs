use super::names::{
    column_for, is_valid_field_name, is_valid_model_name, sequence_table_for, table_name_for,
};
use super::tables::create_model_tables;
use super::SchemaError;
use crate::codec::encode_timestamp;
use crate::db::Savepoint;
use crate::error::{NotFound, StoreResult};
use crate::model::{FieldDefinition, FieldType, ModelDefinition};
use log::info;
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;

/// A validated model bound to its storage table.
///
/// Cheap to clone; object store operations take it by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredModel {
    definition: Arc<ModelDefinition>,
    table: Arc<str>,
}

impl RegisteredModel {
    pub(crate) fn new(definition: ModelDefinition, table: String) -> Self {
        Self {
            definition: Arc::new(definition),
            table: Arc::from(table),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn version(&self) -> u32 {
        self.definition.version
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.definition.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.definition.field_named(name)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub(crate) fn column(&self, field: &str) -> String {
        column_for(field)
    }

    pub(crate) fn sequence_table(&self, field: &str) -> String {
        sequence_table_for(&self.table, field)
    }
}

/// In-memory view of `_models`, kept in sync with every registration.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    models: BTreeMap<String, RegisteredModel>,
}

impl SchemaRegistry {
    /// Reloads every persisted definition.
    pub fn load(conn: &Connection) -> StoreResult<Self> {
        let mut stmt =
            conn.prepare("SELECT name, table_name, definition FROM _models ORDER BY name;")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut models = BTreeMap::new();
        for row in rows {
            let (name, table, raw) = row?;
            let definition: ModelDefinition =
                serde_json::from_str(&raw).map_err(|err| SchemaError::StoredDefinition {
                    model: name.clone(),
                    message: err.to_string(),
                })?;
            models.insert(name, RegisteredModel::new(definition, table));
        }
        info!(
            "event=schema_load module=schema status=ok models={}",
            models.len()
        );
        Ok(Self { models })
    }

    /// Validates and registers `definition`, creating its tables on first use.
    ///
    /// # Errors
    /// - `SchemaError` for malformed definitions, version regressions and
    ///   incompatible redefinitions.
    pub fn register(
        &mut self,
        conn: &Connection,
        definition: ModelDefinition,
    ) -> StoreResult<RegisteredModel> {
        validate_definition(&definition, |target| {
            target == definition.name || self.models.contains_key(target)
        })?;

        match self.models.get(&definition.name).cloned() {
            Some(existing) => self.reregister(conn, existing, definition),
            None => self.register_new(conn, definition),
        }
    }

    pub fn lookup(&self, name: &str) -> StoreResult<RegisteredModel> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| NotFound::Model(name.to_string()).into())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredModel> {
        self.models.get(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &RegisteredModel> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    fn register_new(
        &mut self,
        conn: &Connection,
        definition: ModelDefinition,
    ) -> StoreResult<RegisteredModel> {
        let table = table_name_for(&definition.name);
        if let Some(owner) = self.models.values().find(|model| model.table() == table) {
            return Err(SchemaError::TableNameCollision {
                model: definition.name.clone(),
                table: owner.table().to_string(),
            }
            .into());
        }

        let savepoint = Savepoint::begin(conn, "schema_register")?;
        create_model_tables(conn, &table, &definition)?;
        let now = encode_timestamp(OffsetDateTime::now_utc())?;
        conn.execute(
            "INSERT INTO _models (name, table_name, version, definition, registered_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5);",
            params![
                definition.name,
                table,
                definition.version,
                definition_json(&definition)?,
                now
            ],
        )?;
        {
            let mut insert_field = conn.prepare_cached(
                "INSERT INTO _fields (model, position, name, field_type, nullable, sequence, dedup)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            )?;
            for (position, field) in definition.fields.iter().enumerate() {
                insert_field.execute(params![
                    definition.name,
                    position as i64,
                    field.name,
                    field.field_type.label(),
                    field.nullable,
                    field.sequence,
                    field.dedup
                ])?;
            }
        }
        savepoint.commit()?;

        info!(
            "event=schema_register module=schema status=ok outcome=created model={} version={} fields={}",
            definition.name,
            definition.version,
            definition.fields.len()
        );
        let registered = RegisteredModel::new(definition, table);
        self.models
            .insert(registered.name().to_string(), registered.clone());
        Ok(registered)
    }

    fn reregister(
        &mut self,
        conn: &Connection,
        existing: RegisteredModel,
        definition: ModelDefinition,
    ) -> StoreResult<RegisteredModel> {
        let current = existing.definition();
        if *current == definition {
            info!(
                "event=schema_register module=schema status=skip outcome=unchanged model={} version={}",
                definition.name, definition.version
            );
            return Ok(existing);
        }
        if definition.version < current.version {
            return Err(SchemaError::VersionRegression {
                model: definition.name,
                registered: current.version,
                requested: definition.version,
            }
            .into());
        }
        if definition.version == current.version || !current.same_shape(&definition) {
            return Err(SchemaError::IncompatibleRedefinition {
                model: definition.name,
                registered: current.version,
                requested: definition.version,
            }
            .into());
        }

        conn.execute(
            "UPDATE _models SET version = ?1, definition = ?2, updated_at = ?3 WHERE name = ?4;",
            params![
                definition.version,
                definition_json(&definition)?,
                encode_timestamp(OffsetDateTime::now_utc())?,
                definition.name
            ],
        )?;
        info!(
            "event=schema_register module=schema status=ok outcome=version_bumped model={} from_version={} to_version={}",
            definition.name, current.version, definition.version
        );
        let registered = RegisteredModel::new(definition, existing.table().to_string());
        self.models
            .insert(registered.name().to_string(), registered.clone());
        Ok(registered)
    }
}

fn definition_json(definition: &ModelDefinition) -> Result<String, SchemaError> {
    serde_json::to_string(definition).map_err(|err| SchemaError::StoredDefinition {
        model: definition.name.clone(),
        message: err.to_string(),
    })
}

/// Checks names, field uniqueness, enums and reference targets.
fn validate_definition(
    definition: &ModelDefinition,
    target_known: impl Fn(&str) -> bool,
) -> Result<(), SchemaError> {
    let model = &definition.name;
    if !is_valid_model_name(model) {
        return Err(SchemaError::InvalidModelName(model.clone()));
    }
    if definition.fields.is_empty() {
        return Err(SchemaError::NoFields(model.clone()));
    }

    let mut seen = HashSet::new();
    for field in &definition.fields {
        if !is_valid_field_name(&field.name) {
            return Err(SchemaError::InvalidFieldName {
                model: model.clone(),
                field: field.name.clone(),
            });
        }
        if !seen.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                model: model.clone(),
                field: field.name.clone(),
            });
        }
        match &field.field_type {
            FieldType::Enum(definition) => {
                let invalid = |message: &str| SchemaError::InvalidEnum {
                    model: model.clone(),
                    field: field.name.clone(),
                    message: message.to_string(),
                };
                if definition.name.trim().is_empty() {
                    return Err(invalid("enum name is empty"));
                }
                if definition.members.is_empty() {
                    return Err(invalid("enum has no members"));
                }
                let mut members = HashSet::new();
                for member in &definition.members {
                    if member.is_empty() {
                        return Err(invalid("enum member name is empty"));
                    }
                    if !members.insert(member.as_str()) {
                        return Err(invalid(&format!("member `{member}` is repeated")));
                    }
                }
            }
            FieldType::Reference { model: target } if !target_known(target) => {
                return Err(SchemaError::UnknownReferenceTarget {
                    model: model.clone(),
                    field: field.name.clone(),
                    target: target.clone(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_definition;
    use crate::model::{EnumDefinition, FieldDefinition, FieldType, ModelDefinition};
    use crate::schema::SchemaError;

    fn any_target(_: &str) -> bool {
        true
    }

    #[test]
    fn rejects_repeated_enum_members() {
        let definition = ModelDefinition::new("m", 1).field(FieldDefinition::new(
            "kind",
            FieldType::Enum(EnumDefinition::new("Kind", ["a", "a"])),
        ));
        assert!(matches!(
            validate_definition(&definition, any_target),
            Err(SchemaError::InvalidEnum { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_fields_and_bad_names() {
        let duplicate = ModelDefinition::new("m", 1)
            .field(FieldDefinition::new("a", FieldType::Integer))
            .field(FieldDefinition::new("a", FieldType::String));
        assert!(matches!(
            validate_definition(&duplicate, any_target),
            Err(SchemaError::DuplicateField { .. })
        ));

        let bad_field =
            ModelDefinition::new("m", 1).field(FieldDefinition::new("a-b", FieldType::Integer));
        assert!(matches!(
            validate_definition(&bad_field, any_target),
            Err(SchemaError::InvalidFieldName { .. })
        ));

        let empty = ModelDefinition::new("m", 1);
        assert!(matches!(
            validate_definition(&empty, any_target),
            Err(SchemaError::NoFields(_))
        ));
    }

    #[test]
    fn reference_targets_must_be_known() {
        let definition = ModelDefinition::new("child", 1).field(FieldDefinition::new(
            "parent",
            FieldType::Reference {
                model: "parent".to_string(),
            },
        ));
        assert!(matches!(
            validate_definition(&definition, |target| target == "child"),
            Err(SchemaError::UnknownReferenceTarget { .. })
        ));
        assert!(validate_definition(&definition, |target| target == "parent").is_ok());
    }
}
