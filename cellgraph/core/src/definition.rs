//! Registered property types.

use cellgraph_common::types::Name;
use cellgraph_common::value::Value;
use cellgraph_storage::error::{StorageError, StorageResult};
use cellgraph_storage::mutation::Mutation;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    Boolean,
    Int32,
    Int64,
    Float64,
    String,
    Bytes,
}

impl PropertyType {
    /// The type of a non-null value.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Boolean(_) => Some(PropertyType::Boolean),
            Value::Int32(_) => Some(PropertyType::Int32),
            Value::Int64(_) => Some(PropertyType::Int64),
            Value::Float64(_) => Some(PropertyType::Float64),
            Value::String(_) => Some(PropertyType::String),
            Value::Bytes(_) => Some(PropertyType::Bytes),
        }
    }

    #[inline]
    pub fn accepts(&self, value: &Value) -> bool {
        Self::of(value) == Some(*self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: Name,
    pub property_type: PropertyType,
    /// Hint for the search index that values of this property are sorted on.
    pub sortable: bool,
}

impl PropertyDefinition {
    pub fn new(name: impl Into<Name>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            sortable: false,
        }
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }
}

#[derive(Debug, Default)]
pub struct PropertyDefinitions {
    definitions: DashMap<Name, PropertyDefinition>,
}

impl PropertyDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `definition`, replacing any previous definition of the same name.
    pub fn define(&self, definition: PropertyDefinition) -> Option<PropertyDefinition> {
        self.definitions
            .insert(definition.name.clone(), definition)
    }

    pub fn get(&self, name: &str) -> StorageResult<PropertyDefinition> {
        self.definitions
            .get(name)
            .map(|d| d.value().clone())
            .ok_or_else(|| StorageError::PropertyDefinitionNotFound(name.into()))
    }

    /// Checks every property value `mutation` writes against its definition.
    ///
    /// Undefined names are accepted unless `strict` is set.
    pub fn check(&self, mutation: &Mutation, strict: bool) -> StorageResult<()> {
        for (name, value) in mutation.property_writes() {
            let Some(definition) = self.definitions.get(name.as_str()) else {
                if strict {
                    return Err(StorageError::PropertyDefinitionNotFound(name.clone()));
                }
                continue;
            };
            if !definition.property_type.accepts(value) {
                return Err(StorageError::InvalidArgument(format!(
                    "property {name:?} is defined as {:?} but was given a {} value",
                    definition.property_type,
                    value.type_name()
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use cellgraph_security::Visibility;
    use cellgraph_storage::mutation::{ElementMutation, ElementMutationBuilder};

    use super::*;

    fn mutation(value: impl Into<Value>) -> Mutation {
        ElementMutation::vertex("v1", Visibility::empty())
            .set_property("", "age", value, Visibility::empty())
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup_of_undefined_property_fails() {
        let definitions = PropertyDefinitions::new();
        assert!(matches!(
            definitions.get("age"),
            Err(StorageError::PropertyDefinitionNotFound(name)) if name == "age"
        ));
        definitions.define(PropertyDefinition::new("age", PropertyType::Int64).sortable());
        let definition = definitions.get("age").unwrap();
        assert!(definition.sortable);
        assert_eq!(definitions.len(), 1);
    }

    #[test]
    fn test_check_types_and_strictness() {
        let definitions = PropertyDefinitions::new();
        assert!(definitions.check(&mutation(30i64), false).is_ok());
        assert!(matches!(
            definitions.check(&mutation(30i64), true),
            Err(StorageError::PropertyDefinitionNotFound(_))
        ));

        definitions.define(PropertyDefinition::new("age", PropertyType::Int64));
        assert!(definitions.check(&mutation(30i64), true).is_ok());
        assert!(matches!(
            definitions.check(&mutation("thirty"), false),
            Err(StorageError::InvalidArgument(_))
        ));
    }
}
