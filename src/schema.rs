use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::{EndpointInfo, HubError, HubResult};

/// Version tag stamped on schemas parsed from introspection.
pub const INTROSPECTED_SCHEMA_VERSION: &str = "1.0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
    List,
    NonNull,
}

impl TypeKind {
    /// Maps an introspection `kind` string; unknown kinds are treated as objects.
    pub fn from_introspection(kind: &str) -> Self {
        match kind {
            "SCALAR" => TypeKind::Scalar,
            "INTERFACE" => TypeKind::Interface,
            "UNION" => TypeKind::Union,
            "ENUM" => TypeKind::Enum,
            "INPUT_OBJECT" => TypeKind::InputObject,
            "LIST" => TypeKind::List,
            "NON_NULL" => TypeKind::NonNull,
            _ => TypeKind::Object,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeReference {
    pub kind: TypeKind,
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub of_type: Option<Box<TypeReference>>,
}

impl TypeReference {
    pub fn named(kind: TypeKind, name: impl Into<String>) -> Self {
        TypeReference {
            kind,
            name: Some(name.into()),
            of_type: None,
        }
    }

    pub fn is_non_null(&self) -> bool {
        self.kind == TypeKind::NonNull
    }
}

impl fmt::Display for TypeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, &self.of_type) {
            (TypeKind::NonNull, Some(inner)) => write!(f, "{}!", inner),
            (TypeKind::NonNull, None) => f.write_str("Unknown!"),
            (TypeKind::List, Some(inner)) => write!(f, "[{}]", inner),
            (TypeKind::List, None) => f.write_str("[Unknown]"),
            _ => f.write_str(self.name.as_deref().unwrap_or("Unknown")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArgumentInfo {
    pub name: String,
    pub description: Option<String>,
    pub type_ref: Option<TypeReference>,
    pub default_value: Option<String>,
    pub is_required: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub description: Option<String>,
    pub type_ref: Option<TypeReference>,
    #[serde(default)]
    pub args: Vec<ArgumentInfo>,
    #[serde(default)]
    pub is_deprecated: bool,
    pub deprecation_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnumValueInfo {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_deprecated: bool,
    pub deprecation_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub kind: TypeKind,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldInfo>,
    #[serde(default)]
    pub input_fields: Vec<ArgumentInfo>,
    #[serde(default)]
    pub interfaces: Vec<TypeReference>,
    #[serde(default)]
    pub enum_values: Vec<EnumValueInfo>,
    #[serde(default)]
    pub possible_types: Vec<TypeReference>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirectiveInfo {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub args: Vec<ArgumentInfo>,
}

/// Cached introspection result for one endpoint. Replaced wholesale on update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub query_type: Option<TypeReference>,
    pub mutation_type: Option<TypeReference>,
    pub subscription_type: Option<TypeReference>,
    #[serde(default)]
    pub types: Vec<TypeInfo>,
    #[serde(default)]
    pub directives: Vec<DirectiveInfo>,
    pub last_modified: DateTime<Utc>,
    pub version: String,
}

impl SchemaInfo {
    pub fn empty(version: impl Into<String>) -> Self {
        SchemaInfo {
            query_type: None,
            mutation_type: None,
            subscription_type: None,
            types: Vec::new(),
            directives: Vec::new(),
            last_modified: Utc::now(),
            version: version.into(),
        }
    }

    pub fn find_type(&self, name: &str) -> Option<&TypeInfo> {
        self.types.iter().find(|t| t.name == name)
    }

    fn root_type(&self, root: Option<&TypeReference>) -> Option<&TypeInfo> {
        root.and_then(|r| r.name.as_deref())
            .and_then(|name| self.find_type(name))
    }

    pub fn query_root(&self) -> Option<&TypeInfo> {
        self.root_type(self.query_type.as_ref())
    }

    pub fn mutation_root(&self) -> Option<&TypeInfo> {
        self.root_type(self.mutation_type.as_ref())
    }

    pub fn type_names(&self) -> BTreeSet<&str> {
        self.types.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn total_fields(&self) -> usize {
        self.types.iter().map(|t| t.fields.len()).sum()
    }

    /// Number of root query and mutation fields.
    pub fn total_operations(&self) -> usize {
        self.query_root().map_or(0, |t| t.fields.len())
            + self.mutation_root().map_or(0, |t| t.fields.len())
    }
}

// Wire shapes of the standard introspection response.

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSchema {
    query_type: Option<RawTypeRef>,
    mutation_type: Option<RawTypeRef>,
    subscription_type: Option<RawTypeRef>,
    #[serde(default)]
    types: Option<Vec<RawType>>,
    #[serde(default)]
    directives: Option<Vec<RawDirective>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTypeRef {
    kind: Option<String>,
    name: Option<String>,
    of_type: Option<Box<RawTypeRef>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawType {
    kind: Option<String>,
    name: Option<String>,
    description: Option<String>,
    fields: Option<Vec<RawField>>,
    input_fields: Option<Vec<RawInputValue>>,
    interfaces: Option<Vec<RawTypeRef>>,
    enum_values: Option<Vec<RawEnumValue>>,
    possible_types: Option<Vec<RawTypeRef>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawField {
    name: Option<String>,
    description: Option<String>,
    args: Option<Vec<RawInputValue>>,
    #[serde(rename = "type")]
    type_ref: Option<RawTypeRef>,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInputValue {
    name: Option<String>,
    description: Option<String>,
    #[serde(rename = "type")]
    type_ref: Option<RawTypeRef>,
    default_value: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnumValue {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Deserialize)]
struct RawDirective {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    locations: Vec<String>,
    args: Option<Vec<RawInputValue>>,
}

impl From<RawTypeRef> for TypeReference {
    fn from(raw: RawTypeRef) -> Self {
        TypeReference {
            kind: TypeKind::from_introspection(raw.kind.as_deref().unwrap_or_default()),
            name: raw.name,
            of_type: raw.of_type.map(|inner| Box::new((*inner).into())),
        }
    }
}

impl From<RawInputValue> for ArgumentInfo {
    fn from(raw: RawInputValue) -> Self {
        let type_ref: Option<TypeReference> = raw.type_ref.map(Into::into);
        ArgumentInfo {
            name: raw.name.unwrap_or_default(),
            description: raw.description,
            is_required: type_ref.as_ref().is_some_and(TypeReference::is_non_null),
            type_ref,
            default_value: raw.default_value,
        }
    }
}

impl From<RawField> for FieldInfo {
    fn from(raw: RawField) -> Self {
        FieldInfo {
            name: raw.name.unwrap_or_default(),
            description: raw.description,
            type_ref: raw.type_ref.map(Into::into),
            args: convert_all(raw.args),
            is_deprecated: raw.is_deprecated,
            deprecation_reason: raw.deprecation_reason,
        }
    }
}

impl From<RawEnumValue> for EnumValueInfo {
    fn from(raw: RawEnumValue) -> Self {
        EnumValueInfo {
            name: raw.name.unwrap_or_default(),
            description: raw.description,
            is_deprecated: raw.is_deprecated,
            deprecation_reason: raw.deprecation_reason,
        }
    }
}

impl From<RawType> for TypeInfo {
    fn from(raw: RawType) -> Self {
        TypeInfo {
            kind: TypeKind::from_introspection(raw.kind.as_deref().unwrap_or_default()),
            name: raw.name.unwrap_or_default(),
            description: raw.description,
            fields: convert_all(raw.fields),
            input_fields: convert_all(raw.input_fields),
            interfaces: convert_all(raw.interfaces),
            enum_values: convert_all(raw.enum_values),
            possible_types: convert_all(raw.possible_types),
        }
    }
}

impl From<RawDirective> for DirectiveInfo {
    fn from(raw: RawDirective) -> Self {
        DirectiveInfo {
            name: raw.name.unwrap_or_default(),
            description: raw.description,
            locations: raw.locations,
            args: convert_all(raw.args),
        }
    }
}

fn convert_all<R, T: From<R>>(raw: Option<Vec<R>>) -> Vec<T> {
    raw.unwrap_or_default().into_iter().map(T::from).collect()
}

/// Parses the `data` object of an introspection response into a [`SchemaInfo`].
///
/// Built-in introspection types (names starting with `__`) are dropped.
pub fn parse_introspection(data: &Value) -> HubResult<SchemaInfo> {
    let schema = data
        .get("__schema")
        .ok_or_else(|| HubError::Introspection("response has no __schema field".to_string()))?;
    let raw: RawSchema = serde_json::from_value(schema.clone())?;

    let types = raw
        .types
        .unwrap_or_default()
        .into_iter()
        .filter(|t| !t.name.as_deref().unwrap_or_default().starts_with("__"))
        .map(TypeInfo::from)
        .collect();

    Ok(SchemaInfo {
        query_type: raw.query_type.map(Into::into),
        mutation_type: raw.mutation_type.map(Into::into),
        subscription_type: raw.subscription_type.map(Into::into),
        types,
        directives: convert_all(raw.directives),
        last_modified: Utc::now(),
        version: INTROSPECTED_SCHEMA_VERSION.to_string(),
    })
}

/// Derives tool names for an endpoint from its schema's root fields.
///
/// Query fields become `{prefix}_{field}`; mutation fields become
/// `{prefix}_mutation_{field}` and are only emitted when the endpoint allows
/// mutations.
pub fn generate_tool_names(endpoint: &EndpointInfo, schema: &SchemaInfo) -> Vec<String> {
    let prefix = endpoint.effective_tool_prefix();
    let mut tools: Vec<String> = schema
        .query_root()
        .map(|root| {
            root.fields
                .iter()
                .map(|field| format!("{}_{}", prefix, field.name))
                .collect()
        })
        .unwrap_or_default();

    if endpoint.allow_mutations {
        if let Some(root) = schema.mutation_root() {
            tools.extend(
                root.fields
                    .iter()
                    .map(|field| format!("{}_mutation_{}", prefix, field.name)),
            );
        }
    }

    tools
}
