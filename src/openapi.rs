//! OpenAPI 3.0.1 document assembly from extracted endpoints.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::endpoint::{
    EndpointMethod, EndpointType, HttpMethod, HttpStatus, InputSource, response_status,
};
use crate::error::{AnalysisError, Result};
use crate::ir::Constant;
use crate::repository::ClassRepository;
use crate::schema::{Schema, SchemaGenerator};
use crate::types::BuiltInType;
use crate::validation::{Constraint, FieldTarget, ValidationRule};
use crate::walker::format_call_path;

const OPENAPI_VERSION: &str = "3.0.1";
const JSON_CONTENT_TYPE: &str = "application/json";
const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";

#[derive(Debug, Serialize)]
pub(crate) struct Document {
    pub(crate) openapi: &'static str,
    pub(crate) info: Info,
    pub(crate) servers: Vec<Server>,
    pub(crate) paths: BTreeMap<String, BTreeMap<HttpMethod, Operation>>,
    pub(crate) components: Components,
}

#[derive(Debug, Serialize)]
pub(crate) struct Info {
    pub(crate) title: String,
    pub(crate) version: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct Server {
    pub(crate) url: String,
    pub(crate) description: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct Components {
    pub(crate) schemas: BTreeMap<String, Schema>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Operation {
    pub(crate) tags: Vec<String>,
    pub(crate) parameters: Vec<Parameter>,
    #[serde(rename = "requestBody", skip_serializing_if = "Option::is_none")]
    pub(crate) request_body: Option<Content>,
    pub(crate) responses: BTreeMap<String, Response>,
    #[serde(rename = "x-thrown-exceptions", skip_serializing_if = "Vec::is_empty")]
    pub(crate) thrown_exceptions: Vec<ThrownEntry>,
    #[serde(rename = "x-validation-rules", skip_serializing_if = "Vec::is_empty")]
    pub(crate) validation_rules: Vec<RuleEntry>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Parameter {
    pub(crate) name: String,
    #[serde(rename = "in")]
    pub(crate) location: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub(crate) required: bool,
    pub(crate) schema: Schema,
}

#[derive(Debug, Serialize)]
pub(crate) struct Content {
    pub(crate) content: BTreeMap<String, MediaType>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MediaType {
    pub(crate) schema: Schema,
}

#[derive(Debug, Serialize)]
pub(crate) struct Response {
    pub(crate) description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) content: Option<BTreeMap<String, MediaType>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ThrownEntry {
    #[serde(rename = "type")]
    pub(crate) type_name: String,
    #[serde(rename = "callPath")]
    pub(crate) call_path: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct RuleEntry {
    pub(crate) validator: String,
    pub(crate) field: String,
    pub(crate) constraint: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) other: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) min: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max: Option<Value>,
}

fn single_content(content_type: &str, schema: Schema) -> BTreeMap<String, MediaType> {
    BTreeMap::from([(content_type.to_string(), MediaType { schema })])
}

fn simple_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// First segment of the request path.
fn tag(path: &str) -> Option<String> {
    path.split('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

fn is_upload(endpoint_type: &EndpointType) -> bool {
    match endpoint_type {
        EndpointType::BuiltIn(BuiltInType::MultipartFile) => true,
        EndpointType::Array(items) => is_upload(items),
        _ => false,
    }
}

pub(crate) fn build_document(
    config: &Config,
    repository: &ClassRepository,
    endpoints: &[EndpointMethod],
) -> Result<Document> {
    let mut generator = SchemaGenerator::new(repository, &config.markers);
    let mut paths: BTreeMap<String, BTreeMap<HttpMethod, Operation>> = BTreeMap::new();

    for endpoint in endpoints {
        let operation = operation(&mut generator, repository, endpoint)?;
        let operations = paths.entry(endpoint.path.clone()).or_default();
        if operations.contains_key(&endpoint.http_method) {
            warn!(
                path = %endpoint.path,
                method = ?endpoint.http_method,
                controller = %endpoint.controller,
                "duplicate mapping, keeping the first"
            );
            continue;
        }
        operations.insert(endpoint.http_method, operation);
    }

    Ok(Document {
        openapi: OPENAPI_VERSION,
        info: Info {
            title: config.document.title.clone(),
            version: config.document.version.clone(),
        },
        servers: config
            .document
            .servers
            .iter()
            .map(|server| Server {
                url: server.url.clone(),
                description: server.description.clone(),
            })
            .collect(),
        paths,
        components: Components {
            schemas: generator.into_schemas(),
        },
    })
}

fn operation(
    generator: &mut SchemaGenerator<'_>,
    repository: &ClassRepository,
    endpoint: &EndpointMethod,
) -> Result<Operation> {
    let location = format!("{}#{}", endpoint.controller, endpoint.method_name);
    let mut parameters = Vec::new();
    let mut parts = Vec::new();
    let mut body = None;

    for parameter in &endpoint.parameters {
        match parameter.source {
            InputSource::Path => {
                let EndpointType::BuiltIn(built_in) = parameter.parameter_type else {
                    return Err(AnalysisError::unrecognized(
                        "path parameter",
                        &location,
                        format!("{} is not a built-in type", parameter.name),
                    ));
                };
                parameters.push(Parameter {
                    name: parameter.name.clone(),
                    location: "path",
                    required: true,
                    schema: Schema::scalar(built_in),
                });
            }
            InputSource::Query if is_upload(&parameter.parameter_type) => {
                parts.push((
                    parameter.name.clone(),
                    generator.endpoint_schema(&parameter.parameter_type)?,
                ));
            }
            InputSource::Query => parameters.push(Parameter {
                name: parameter.name.clone(),
                location: "query",
                required: false,
                schema: generator.endpoint_schema(&parameter.parameter_type)?,
            }),
            InputSource::Body => {
                if body.is_some() {
                    return Err(AnalysisError::unrecognized(
                        "request body",
                        &location,
                        "more than one body parameter",
                    ));
                }
                if let EndpointType::BuiltIn(_) = parameter.parameter_type {
                    return Err(AnalysisError::unrecognized(
                        "request body",
                        &location,
                        format!("{} is a built-in type", parameter.name),
                    ));
                }
                body = Some(generator.endpoint_schema(&parameter.parameter_type)?);
            }
        }
    }

    let request_body = match (body, parts.is_empty()) {
        (Some(_), false) => {
            return Err(AnalysisError::unrecognized(
                "request body",
                &location,
                "file uploads mixed with a request body",
            ));
        }
        (Some(schema), true) => Some(Content {
            content: single_content(&endpoint.content_type, schema),
        }),
        (None, false) => Some(Content {
            content: single_content(
                MULTIPART_CONTENT_TYPE,
                Schema::Object {
                    kind: "object",
                    properties: parts,
                },
            ),
        }),
        (None, true) => None,
    };

    let mut responses = BTreeMap::new();
    let success_content = match &endpoint.return_type {
        Some(return_type) => Some(single_content(
            JSON_CONTENT_TYPE,
            generator.endpoint_schema(return_type)?,
        )),
        None => None,
    };
    responses.insert(
        endpoint.status.code.to_string(),
        Response {
            description: endpoint.status.reason.to_string(),
            content: success_content,
        },
    );
    for exception in &endpoint.exceptions {
        if let Some(status) = exception_status(repository, &exception.type_path)? {
            responses
                .entry(status.code.to_string())
                .or_insert_with(|| Response {
                    description: status.reason.to_string(),
                    content: None,
                });
        }
    }

    Ok(Operation {
        tags: tag(&endpoint.path).into_iter().collect(),
        parameters,
        request_body,
        responses,
        thrown_exceptions: endpoint
            .exceptions
            .iter()
            .map(|exception| ThrownEntry {
                type_name: simple_name(&exception.type_path).to_string(),
                call_path: format_call_path(&exception.call_path),
            })
            .collect(),
        validation_rules: endpoint.validations.iter().map(rule_entry).collect(),
    })
}

/// `@ResponseStatus` declared on an exception type or its nearest annotated super type.
fn exception_status(
    repository: &ClassRepository,
    type_path: &str,
) -> Result<Option<HttpStatus>> {
    let mut current = repository.try_lookup(type_path);
    let mut steps = 0;
    while let Some(record) = current {
        let class = record.info()?;
        if let Some(status) = response_status(&class.annotations, record.path())? {
            return Ok(Some(status));
        }
        steps += 1;
        if steps > repository.len() {
            break;
        }
        current = class
            .super_name
            .as_deref()
            .and_then(|parent| repository.try_lookup(parent));
    }
    Ok(None)
}

fn field_label(target: &FieldTarget) -> String {
    format!("{}.{}", simple_name(&target.owner), target.name)
}

fn constant_json(constant: &Constant) -> Value {
    match constant {
        Constant::Int(value) => Value::from(*value),
        Constant::Long(value) => Value::from(*value),
        Constant::Float(value) => Value::from(f64::from(*value)),
        Constant::Double(value) => Value::from(*value),
        Constant::String(value) => Value::from(value.as_str()),
        Constant::Class(name) => Value::from(simple_name(name)),
        other => Value::from(other.to_string()),
    }
}

fn rule_entry(rule: &ValidationRule) -> RuleEntry {
    let mut entry = RuleEntry {
        validator: simple_name(&rule.validator).to_string(),
        field: field_label(&rule.field),
        constraint: "",
        mode: None,
        value: None,
        other: None,
        min: None,
        max: None,
    };
    entry.constraint = match &rule.constraint {
        Constraint::NotNull => "not-null",
        Constraint::NotBlank => "not-blank",
        Constraint::NullOrNotBlank => "null-or-not-blank",
        Constraint::CompareToConstant { mode, value } => {
            entry.mode = Some(mode.clone());
            entry.value = Some(constant_json(value));
            "compare-to-constant"
        }
        Constraint::CompareToField { mode, other } => {
            entry.mode = Some(mode.clone());
            entry.other = Some(field_label(other));
            "compare-to-field"
        }
        Constraint::Between { min, max } => {
            entry.min = Some(constant_json(min));
            entry.max = Some(constant_json(max));
            "between"
        }
    };
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{EndpointExtractor, EndpointParameter};
    use crate::fixtures::{
        ClassBuilder, MethodBuilder, annotation, config, discriminator_enum, enum_value,
        repository, strings,
    };
    use crate::ir::CallKind;
    use crate::opcodes;
    use crate::repository::ClassRecord;
    use crate::walker::{CallFrame, ThrownException};
    use serde_json::json;

    fn document_for(records: Vec<ClassRecord>) -> Result<Value> {
        let config = config();
        let repository = repository(records);
        let endpoints = EndpointExtractor::new(&repository, &config).extract()?;
        let document = build_document(&config, &repository, &endpoints)?;
        Ok(serde_json::to_value(&document).expect("serialize document"))
    }

    fn endpoint(parameters: Vec<EndpointParameter>) -> EndpointMethod {
        EndpointMethod {
            http_method: HttpMethod::Post,
            path: "/files".to_string(),
            content_type: "application/json".to_string(),
            status: HttpStatus::OK,
            parameters,
            return_type: None,
            exceptions: Vec::new(),
            validations: Vec::new(),
            controller: "com/acme/web/Files".to_string(),
            method_name: "upload".to_string(),
        }
    }

    fn parameter(name: &str, source: InputSource, parameter_type: EndpointType) -> EndpointParameter {
        EndpointParameter {
            name: name.to_string(),
            source,
            parameter_type,
        }
    }

    fn item_controller() -> ClassRecord {
        ClassBuilder::new("com/acme/web/ItemController")
            .annotation(annotation(
                "Lorg/springframework/web/bind/annotation/RequestMapping;",
                vec![("value", strings(&["/items"]))],
            ))
            .method(
                MethodBuilder::new("get", "(J)Lcom/acme/dto/Item;")
                    .annotation(annotation(
                        "Lorg/springframework/web/bind/annotation/GetMapping;",
                        vec![("value", strings(&["/{id}"]))],
                    ))
                    .parameter_annotations(vec![vec![annotation(
                        "Lorg/springframework/web/bind/annotation/PathVariable;",
                        Vec::new(),
                    )]])
                    .parameter_names(&["id"])
                    .aload(0)
                    .invoke(CallKind::Virtual, "com/acme/service/ItemService", "find", "()V")
                    .op(opcodes::ARETURN),
            )
            .build()
    }

    fn item_records() -> Vec<ClassRecord> {
        vec![
            item_controller(),
            ClassBuilder::new("com/acme/dto/Item")
                .field("id", "J")
                .field("name", "Ljava/lang/String;")
                .build(),
            ClassBuilder::new("com/acme/service/ItemService")
                .method(
                    MethodBuilder::new("find", "()V")
                        .construct("com/acme/errors/ItemNotFound")
                        .op(opcodes::ATHROW),
                )
                .build(),
            ClassBuilder::new("com/acme/errors/ItemNotFound")
                .extends("com/acme/errors/ApiError")
                .build(),
            ClassBuilder::abstract_class("com/acme/errors/ApiError")
                .extends("java/lang/RuntimeException")
                .annotation(annotation(
                    "Lorg/springframework/web/bind/annotation/ResponseStatus;",
                    vec![(
                        "code",
                        enum_value("Lorg/springframework/http/HttpStatus;", "NOT_FOUND"),
                    )],
                ))
                .build(),
        ]
    }

    #[test]
    fn path_parameter_endpoint_renders_operation_and_schema() {
        let document = document_for(item_records()).expect("document");

        let operation = &document["paths"]["/items/{id}"]["get"];
        assert_eq!(json!(["items"]), operation["tags"]);
        assert_eq!(
            json!([{
                "name": "id",
                "in": "path",
                "required": true,
                "schema": {"type": "integer", "format": "int64"}
            }]),
            operation["parameters"]
        );
        assert_eq!(
            json!({"$ref": "#/components/schemas/Item"}),
            operation["responses"]["200"]["content"]["application/json"]["schema"]
        );
        assert_eq!(json!("NOT_FOUND"), operation["responses"]["404"]["description"]);
        assert_eq!(
            json!([{
                "type": "ItemNotFound",
                "callPath": "com/acme/web/ItemController#get -> com/acme/service/ItemService#find"
            }]),
            operation["x-thrown-exceptions"]
        );
        assert_eq!(
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer", "format": "int64"},
                    "name": {"type": "string"}
                }
            }),
            document["components"]["schemas"]["Item"]
        );
    }

    #[test]
    fn document_matches_openapi_shape() {
        let document = document_for(item_records()).expect("document");
        let shape = json!({
            "type": "object",
            "required": ["openapi", "info", "servers", "paths", "components"],
            "properties": {
                "openapi": {"const": "3.0.1"},
                "info": {
                    "type": "object",
                    "required": ["title", "version"]
                },
                "servers": {
                    "type": "array",
                    "items": {"type": "object", "required": ["url"]}
                },
                "paths": {
                    "type": "object",
                    "additionalProperties": {
                        "type": "object",
                        "propertyNames": {"enum": ["get", "put", "post", "delete", "patch"]},
                        "additionalProperties": {
                            "type": "object",
                            "required": ["tags", "parameters", "responses"]
                        }
                    }
                },
                "components": {
                    "type": "object",
                    "required": ["schemas"]
                }
            }
        });
        let validator = jsonschema::JSONSchema::compile(&shape).expect("compile shape");

        assert!(validator.is_valid(&document));
        assert_eq!(json!("OpenAPI Definition"), document["info"]["title"]);
        assert_eq!(json!("http://localhost:8000"), document["servers"][0]["url"]);
    }

    #[test]
    fn uploads_fold_into_multipart_body() {
        let config = config();
        let repository = repository(Vec::new());
        let endpoints = vec![endpoint(vec![
            parameter(
                "file",
                InputSource::Query,
                EndpointType::BuiltIn(BuiltInType::MultipartFile),
            ),
            parameter("label", InputSource::Query, EndpointType::BuiltIn(BuiltInType::String)),
        ])];

        let document = build_document(&config, &repository, &endpoints).expect("document");
        let value = serde_json::to_value(&document).expect("json");

        let operation = &value["paths"]["/files"]["post"];
        assert_eq!(
            json!({
                "content": {
                    "multipart/form-data": {
                        "schema": {
                            "type": "object",
                            "properties": {"file": {"type": "string", "format": "binary"}}
                        }
                    }
                }
            }),
            operation["requestBody"]
        );
        assert_eq!(json!("label"), operation["parameters"][0]["name"]);
        assert!(operation["parameters"][0].get("required").is_none());
    }

    #[test]
    fn uploads_cannot_mix_with_a_body() {
        let config = config();
        let repository = repository(vec![ClassBuilder::new("com/acme/dto/Meta").build()]);
        let endpoints = vec![endpoint(vec![
            parameter(
                "file",
                InputSource::Query,
                EndpointType::BuiltIn(BuiltInType::MultipartFile),
            ),
            parameter(
                "meta",
                InputSource::Body,
                EndpointType::Class {
                    path: "com/acme/dto/Meta".to_string(),
                    generics: Vec::new(),
                },
            ),
        ])];

        let error = build_document(&config, &repository, &endpoints).expect_err("mixed body");

        assert!(matches!(
            error,
            AnalysisError::Unrecognized { construct: "request body", .. }
        ));
    }

    #[test]
    fn built_in_path_and_body_rules() {
        let config = config();
        let repository = repository(vec![ClassBuilder::new("com/acme/dto/Meta").build()]);

        let class_path = vec![endpoint(vec![parameter(
            "meta",
            InputSource::Path,
            EndpointType::Class {
                path: "com/acme/dto/Meta".to_string(),
                generics: Vec::new(),
            },
        )])];
        assert!(build_document(&config, &repository, &class_path).is_err());

        let scalar_body = vec![endpoint(vec![parameter(
            "text",
            InputSource::Body,
            EndpointType::BuiltIn(BuiltInType::String),
        )])];
        assert!(build_document(&config, &repository, &scalar_body).is_err());
    }

    #[test]
    fn facts_render_as_extensions() {
        let config = config();
        let repository = repository(Vec::new());
        let mut endpoint = endpoint(Vec::new());
        endpoint.exceptions.push(ThrownException {
            type_path: "com/acme/errors/Conflict".to_string(),
            call_path: vec![CallFrame {
                owner: "com/acme/web/Files".to_string(),
                method: "upload".to_string(),
                descriptor: "()V".to_string(),
            }],
        });
        endpoint.validations.push(ValidationRule {
            validator: "com/acme/validation/RangeValidator".to_string(),
            field: FieldTarget {
                owner: "com/acme/dto/Upload".to_string(),
                name: "size".to_string(),
            },
            constraint: Constraint::Between {
                min: Constant::Int(1),
                max: Constant::Long(1024),
            },
        });

        let document = build_document(&config, &repository, &[endpoint]).expect("document");
        let value = serde_json::to_value(&document).expect("json");

        let operation = &value["paths"]["/files"]["post"];
        assert_eq!(
            json!([{"type": "Conflict", "callPath": "com/acme/web/Files#upload"}]),
            operation["x-thrown-exceptions"]
        );
        assert_eq!(
            json!([{
                "validator": "RangeValidator",
                "field": "Upload.size",
                "constraint": "between",
                "min": 1,
                "max": 1024
            }]),
            operation["x-validation-rules"]
        );
        assert!(operation["responses"]["200"].get("content").is_none());
    }

    #[test]
    fn polymorphic_body_becomes_discriminated_union() {
        let mut config = config();
        config.markers.discriminator_enum = Some("com/acme/dto/DiscriminatorEnum".to_string());
        let repository = repository(vec![
            ClassBuilder::new("com/acme/web/ShapeController")
                .annotation(annotation(
                    "Lorg/springframework/web/bind/annotation/RequestMapping;",
                    vec![("value", strings(&["/shapes"]))],
                ))
                .method(
                    MethodBuilder::new("create", "(Lcom/acme/dto/Shape;)V")
                        .annotation(annotation(
                            "Lorg/springframework/web/bind/annotation/PostMapping;",
                            Vec::new(),
                        ))
                        .parameter_annotations(vec![vec![annotation(
                            "Lorg/springframework/web/bind/annotation/RequestBody;",
                            Vec::new(),
                        )]])
                        .parameter_names(&["shape"])
                        .op(opcodes::RETURN),
                )
                .build(),
            ClassBuilder::abstract_class("com/acme/dto/Shape").build(),
            ClassBuilder::new("com/acme/dto/Circle")
                .extends("com/acme/dto/Shape")
                .field("kind", "Lcom/acme/dto/ShapeKind;")
                .field("radius", "D")
                .build(),
            ClassBuilder::new("com/acme/dto/Square")
                .extends("com/acme/dto/Shape")
                .field("kind", "Lcom/acme/dto/ShapeKind;")
                .field("side", "D")
                .build(),
            ClassBuilder::interface("com/acme/dto/DiscriminatorEnum").build(),
            discriminator_enum(
                "com/acme/dto/ShapeKind",
                "com/acme/dto/DiscriminatorEnum",
                &[("CIRCLE", "com/acme/dto/Circle"), ("SQUARE", "com/acme/dto/Square")],
            ),
        ]);
        let endpoints = EndpointExtractor::new(&repository, &config)
            .extract()
            .expect("extract");

        let document = build_document(&config, &repository, &endpoints).expect("document");
        let value = serde_json::to_value(&document).expect("json");

        assert_eq!(
            json!({"$ref": "#/components/schemas/Shape"}),
            value["paths"]["/shapes"]["post"]["requestBody"]["content"]["application/json"]["schema"]
        );
        let shape = &value["components"]["schemas"]["Shape"];
        assert_eq!(2, shape["oneOf"].as_array().expect("alternatives").len());
        assert_eq!(
            json!({
                "propertyName": "kind",
                "mapping": {
                    "CIRCLE": "#/components/schemas/Circle",
                    "SQUARE": "#/components/schemas/Square"
                }
            }),
            shape["discriminator"]
        );
    }

    #[test]
    fn output_is_deterministic() {
        let first = serde_json::to_string(&document_for(item_records()).expect("document"))
            .expect("json");
        let second = serde_json::to_string(&document_for(item_records()).expect("document"))
            .expect("json");

        assert_eq!(first, second);
    }
}
