//! Schema generation for request and response types. Every reachable class becomes one
//! named component schema; repeated requests for the same class and generic arguments
//! return the registered name.

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use tracing::debug;

use crate::config::MarkerConfig;
use crate::descriptor::{TypeSignature, parse_field_descriptor, parse_type_parameters, parse_type_signature};
use crate::endpoint::EndpointType;
use crate::error::{AnalysisError, Result};
use crate::ir::{Class, Constant, Field, InstructionKind};
use crate::repository::{ClassRecord, ClassRepository, ClassSubset};
use crate::types::{BuiltInType, is_collection};

const CLASS_DESCRIPTOR: &str = "Ljava/lang/Class;";
const DISCRIMINATOR_TYPE_FIELD: &str = "type";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub(crate) enum Schema {
    Reference {
        #[serde(rename = "$ref")]
        reference: String,
    },
    Scalar {
        #[serde(rename = "type")]
        kind: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<&'static str>,
    },
    Array {
        #[serde(rename = "type")]
        kind: &'static str,
        items: Box<Schema>,
    },
    Enum {
        #[serde(rename = "type")]
        kind: &'static str,
        #[serde(rename = "enum")]
        literals: Vec<String>,
    },
    Object {
        #[serde(rename = "type")]
        kind: &'static str,
        #[serde(serialize_with = "ordered_map")]
        properties: Vec<(String, Schema)>,
    },
    OneOf {
        #[serde(rename = "oneOf")]
        alternatives: Vec<Schema>,
        discriminator: Discriminator,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct Discriminator {
    #[serde(rename = "propertyName")]
    pub(crate) property_name: String,
    #[serde(serialize_with = "ordered_map")]
    pub(crate) mapping: Vec<(String, String)>,
}

/// Serialize pairs as a JSON object, keeping their order.
fn ordered_map<S, V>(entries: &[(String, V)], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

impl Schema {
    pub(crate) fn scalar(built_in: BuiltInType) -> Self {
        let (kind, format) = built_in.type_and_format();
        Schema::Scalar { kind, format }
    }

    pub(crate) fn array(items: Schema) -> Self {
        Schema::Array {
            kind: "array",
            items: Box::new(items),
        }
    }

    pub(crate) fn reference(name: &str) -> Self {
        Schema::Reference {
            reference: reference_to(name),
        }
    }
}

/// `#/components/schemas/<name>` with the name form-encoded.
pub(crate) fn reference_to(name: &str) -> String {
    format!("#/components/schemas/{}", form_encode(name))
}

fn form_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' | b'*' | b'_' => {
                encoded.push(byte as char)
            }
            b' ' => encoded.push('+'),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Type variable bindings of the class whose fields are being rendered.
struct Bindings<'b> {
    owner: &'b str,
    pairs: Vec<(String, &'b str)>,
}

impl Bindings<'_> {
    fn resolve(&self, variable: &str) -> Result<&str> {
        self.pairs
            .iter()
            .find(|(name, _)| name == variable)
            .map(|(_, path)| *path)
            .ok_or_else(|| {
                AnalysisError::unrecognized(
                    "type variable",
                    self.owner,
                    format!("{variable} has no generic argument"),
                )
            })
    }
}

pub(crate) struct SchemaGenerator<'a> {
    repository: &'a ClassRepository,
    markers: &'a MarkerConfig,
    /// Schema name to the (class, generic arguments) it was generated from.
    registry: BTreeMap<String, (String, Vec<String>)>,
    schemas: BTreeMap<String, Schema>,
}

impl<'a> SchemaGenerator<'a> {
    pub(crate) fn new(repository: &'a ClassRepository, markers: &'a MarkerConfig) -> Self {
        Self {
            repository,
            markers,
            registry: BTreeMap::new(),
            schemas: BTreeMap::new(),
        }
    }

    pub(crate) fn into_schemas(self) -> BTreeMap<String, Schema> {
        self.schemas
    }

    /// Inline schema of an endpoint parameter or return type.
    pub(crate) fn endpoint_schema(&mut self, endpoint_type: &EndpointType) -> Result<Schema> {
        match endpoint_type {
            EndpointType::BuiltIn(built_in) => Ok(Schema::scalar(*built_in)),
            EndpointType::Class { path, generics } => {
                let name = self.generate(path, generics)?;
                Ok(Schema::reference(&name))
            }
            EndpointType::Array(items) => Ok(Schema::array(self.endpoint_schema(items)?)),
        }
    }

    /// Generate the named schema of `path` instantiated with `generics`.
    pub(crate) fn generate(&mut self, path: &str, generics: &[String]) -> Result<String> {
        let record = self.repository.lookup(path)?;
        let name = schema_name(record, generics);

        if let Some((existing, existing_generics)) = self.registry.get(&name) {
            if existing == path && existing_generics.as_slice() == generics {
                return Ok(name);
            }
            return Err(AnalysisError::SchemaNameCollision {
                name,
                existing: existing.clone(),
                requested: path.to_string(),
            });
        }
        self.registry
            .insert(name.clone(), (path.to_string(), generics.to_vec()));

        let class = record.info()?;
        let schema = if class.access.is_enum {
            Schema::Enum {
                kind: "string",
                literals: class
                    .fields
                    .iter()
                    .filter(|field| field.access.is_enum)
                    .map(|field| field.name.clone())
                    .collect(),
            }
        } else if class.access.is_interface || class.access.is_abstract {
            self.polymorphic(record)?
        } else {
            self.object(record, class, generics)?
        };

        debug!(schema = %name, class = path, "generated schema");
        self.schemas.insert(name.clone(), schema);
        Ok(name)
    }

    fn object(&mut self, record: &ClassRecord, class: &Class, generics: &[String]) -> Result<Schema> {
        let parameters = match &class.signature {
            Some(signature) => parse_type_parameters(signature)?,
            None => Vec::new(),
        };
        let bindings = Bindings {
            owner: record.path(),
            pairs: parameters
                .into_iter()
                .zip(generics.iter().map(String::as_str))
                .collect(),
        };

        let ignored = format!("L{};", self.markers.json_ignore);
        let mut properties = Vec::new();
        for field in &class.fields {
            if field.access.is_static
                || field.access.is_synthetic
                || field
                    .annotations
                    .iter()
                    .any(|annotation| annotation.descriptor == ignored)
            {
                continue;
            }
            let signature = match &field.signature {
                Some(signature) => parse_type_signature(signature)?,
                None => TypeSignature::from(&parse_field_descriptor(&field.descriptor)?),
            };
            let location = format!("{}.{}", record.path(), field.name);
            properties.push((
                field.name.clone(),
                self.signature_schema(&signature, &bindings, &location)?,
            ));
        }

        Ok(Schema::Object {
            kind: "object",
            properties,
        })
    }

    fn signature_schema(
        &mut self,
        signature: &TypeSignature,
        bindings: &Bindings<'_>,
        location: &str,
    ) -> Result<Schema> {
        match signature {
            TypeSignature::Base(field_type) => BuiltInType::from_descriptor(&field_type.descriptor())
                .map(Schema::scalar)
                .ok_or_else(|| {
                    AnalysisError::unrecognized("field type", location, field_type.descriptor())
                }),
            TypeSignature::Array(component) => {
                Ok(Schema::array(self.signature_schema(component, bindings, location)?))
            }
            TypeSignature::TypeVariable(variable) => {
                let path = bindings.resolve(variable)?.to_string();
                self.class_schema(&path, &[])
            }
            TypeSignature::Class { name, arguments } => {
                if is_collection(name) {
                    let element = arguments
                        .first()
                        .and_then(|argument| argument.bound())
                        .ok_or_else(|| {
                            AnalysisError::unrecognized(
                                "field type",
                                location,
                                format!("{name} without an element type"),
                            )
                        })?;
                    return Ok(Schema::array(self.signature_schema(element, bindings, location)?));
                }

                let mut generics = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    let path = match argument.bound() {
                        Some(TypeSignature::TypeVariable(variable)) => bindings.resolve(variable)?,
                        Some(TypeSignature::Class { name, .. }) => name.as_str(),
                        _ => {
                            return Err(AnalysisError::unrecognized(
                                "generic argument",
                                location,
                                format!("{argument:?} of {name} is not a class"),
                            ));
                        }
                    };
                    generics.push(path.to_string());
                }
                self.class_schema(name, &generics)
            }
        }
    }

    fn class_schema(&mut self, path: &str, generics: &[String]) -> Result<Schema> {
        if let Some(built_in) = BuiltInType::from_class_name(path) {
            return Ok(Schema::scalar(built_in));
        }
        let name = self.generate(path, generics)?;
        Ok(Schema::reference(&name))
    }

    /// `oneOf` over the concrete implementations, discriminated by their common enum field.
    fn polymorphic(&mut self, record: &ClassRecord) -> Result<Schema> {
        let location = record.path();
        let mut implementations = Vec::new();
        for candidate in self
            .repository
            .types_extending(ClassSubset::Types, record.path())?
        {
            let access = candidate.info()?.access;
            if !access.is_interface && !access.is_abstract {
                implementations.push(candidate);
            }
        }
        if implementations.is_empty() {
            return Err(AnalysisError::unrecognized(
                "polymorphic type",
                location,
                "no concrete implementations",
            ));
        }

        let mut alternatives = Vec::with_capacity(implementations.len());
        for implementation in &implementations {
            let name = self.generate(implementation.path(), &[])?;
            alternatives.push(Schema::reference(&name));
        }

        let marker = self.markers.discriminator_enum.as_deref().ok_or_else(|| {
            AnalysisError::unrecognized(
                "polymorphic type",
                location,
                "no discriminator enum marker configured",
            )
        })?;
        let mut common: Option<&Field> = None;
        for implementation in &implementations {
            let field = self.discriminator_field(implementation, marker)?;
            let Some(existing) = common else {
                common = Some(field);
                continue;
            };
            if existing.descriptor != field.descriptor {
                return Err(AnalysisError::unrecognized(
                    "discriminator",
                    implementation.path(),
                    format!(
                        "field {} of type {} deviates from {}",
                        field.name, field.descriptor, existing.descriptor
                    ),
                ));
            }
        }
        let Some(common) = common else {
            return Err(AnalysisError::unrecognized(
                "discriminator",
                location,
                "no discriminator field",
            ));
        };

        let discriminator_enum = self.repository.lookup_descriptor(&common.descriptor)?;
        let mapping = self.discriminator_mapping(discriminator_enum)?;
        Ok(Schema::OneOf {
            alternatives,
            discriminator: Discriminator {
                property_name: common.name.clone(),
                mapping,
            },
        })
    }

    /// The single field of `record` typed by an implementation of `marker`.
    fn discriminator_field(&self, record: &'a ClassRecord, marker: &str) -> Result<&'a Field> {
        let mut found = None;
        for field in &record.info()?.fields {
            if field.access.is_static {
                continue;
            }
            let Ok(field_type) = parse_field_descriptor(&field.descriptor) else {
                continue;
            };
            let Some(type_path) = field_type.class_name() else {
                continue;
            };
            if self.repository.try_lookup(type_path).is_none()
                || !self.repository.extends(type_path, marker)?
            {
                continue;
            }
            if found.is_some() {
                return Err(AnalysisError::unrecognized(
                    "discriminator",
                    record.path(),
                    "more than one discriminator field",
                ));
            }
            found = Some(field);
        }
        found.ok_or_else(|| {
            AnalysisError::unrecognized("discriminator", record.path(), "no discriminator field")
        })
    }

    /// Literal to schema reference, mined from the enum's static initializer: each
    /// constant's construction loads its name first and its `type` class literal at
    /// `1 + index` of the `type` member field.
    fn discriminator_mapping(&mut self, record: &ClassRecord) -> Result<Vec<(String, String)>> {
        let location = record.path();
        let class = record.info()?;
        if !class.access.is_enum {
            return Err(AnalysisError::unrecognized(
                "discriminator",
                location,
                "discriminator type is not an enum",
            ));
        }
        let type_index = class
            .fields
            .iter()
            .filter(|field| !field.access.is_static && !field.access.is_enum)
            .position(|field| field.name == DISCRIMINATOR_TYPE_FIELD && field.descriptor == CLASS_DESCRIPTOR)
            .ok_or_else(|| {
                AnalysisError::unrecognized(
                    "discriminator",
                    location,
                    "missing member field `type` of type Class",
                )
            })?;
        let initializer = class
            .methods
            .iter()
            .find(|method| method.name == "<clinit>")
            .ok_or_else(|| {
                AnalysisError::unrecognized("discriminator", location, "missing static initializer")
            })?;

        let mut mapping = Vec::new();
        let mut loads = 0;
        let mut literal: Option<String> = None;
        for instruction in &initializer.instructions {
            match &instruction.kind {
                InstructionKind::Invoke(call) if call.is_constructor() => loads = 0,
                InstructionKind::Constant(constant) => {
                    if loads == 0 {
                        let Constant::String(name) = constant else {
                            return Err(AnalysisError::unrecognized(
                                "discriminator",
                                location,
                                format!("expected the constant name, found {constant}"),
                            ));
                        };
                        literal = Some(name.clone());
                    }
                    if loads == type_index + 1 {
                        let Constant::Class(type_path) = constant else {
                            return Err(AnalysisError::unrecognized(
                                "discriminator",
                                location,
                                format!("expected a class literal, found {constant}"),
                            ));
                        };
                        let Some(name) = literal.clone() else {
                            return Err(AnalysisError::unrecognized(
                                "discriminator",
                                location,
                                "class literal before its constant name",
                            ));
                        };
                        let schema = self.generate(type_path, &[])?;
                        mapping.push((name, reference_to(&schema)));
                    }
                    loads += 1;
                }
                _ => {}
            }
        }
        Ok(mapping)
    }
}

/// `Simple` or `Simple__Arg1_Arg2`.
fn schema_name(record: &ClassRecord, generics: &[String]) -> String {
    if generics.is_empty() {
        return record.simple_name().to_string();
    }
    let arguments: Vec<&str> = generics
        .iter()
        .map(|path| path.rsplit_once('/').map_or(path.as_str(), |(_, name)| name))
        .collect();
    format!("{}__{}", record.simple_name(), arguments.join("_"))
}
