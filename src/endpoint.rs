//! Controller scanning: request-mapped methods become [`EndpointMethod`]s carrying
//! their parameters, return type, success status and the facts found by the walker.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::descriptor::{
    FieldType, MethodSignature, TypeSignature, parse_method_descriptor, parse_method_signature,
};
use crate::error::{AnalysisError, Result};
use crate::ir::{Annotation, ElementValue, Method};
use crate::repository::{ClassRecord, ClassRepository, ClassSubset};
use crate::types::{BuiltInType, is_collection};
use crate::validation::ValidationRule;
use crate::walker::{CallGraphWalker, ThrownException};

const REQUEST_MAPPING: &str = "Lorg/springframework/web/bind/annotation/RequestMapping;";
const RESPONSE_STATUS: &str = "Lorg/springframework/web/bind/annotation/ResponseStatus;";
const HTTP_STATUS: &str = "Lorg/springframework/http/HttpStatus;";
const RESPONSE_ENTITY: &str = "org/springframework/http/ResponseEntity";
const DEFAULT_CONTENT_TYPE: &str = "application/json";

const MAPPINGS: [(&str, HttpMethod); 5] = [
    ("Lorg/springframework/web/bind/annotation/GetMapping;", HttpMethod::Get),
    ("Lorg/springframework/web/bind/annotation/PostMapping;", HttpMethod::Post),
    ("Lorg/springframework/web/bind/annotation/PutMapping;", HttpMethod::Put),
    ("Lorg/springframework/web/bind/annotation/DeleteMapping;", HttpMethod::Delete),
    ("Lorg/springframework/web/bind/annotation/PatchMapping;", HttpMethod::Patch),
];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Patch,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum InputSource {
    Path,
    Query,
    Body,
}

/// Type of a parameter or return value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum EndpointType {
    BuiltIn(BuiltInType),
    /// A repository class with its generic arguments, in declaration order.
    Class { path: String, generics: Vec<String> },
    Array(Box<EndpointType>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct EndpointParameter {
    pub(crate) name: String,
    pub(crate) source: InputSource,
    pub(crate) parameter_type: EndpointType,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct HttpStatus {
    pub(crate) code: u16,
    pub(crate) reason: &'static str,
}

/// Every `org.springframework.http.HttpStatus` constant, deprecated aliases included.
const STATUSES: &[(&str, u16)] = &[
    ("CONTINUE", 100),
    ("SWITCHING_PROTOCOLS", 101),
    ("PROCESSING", 102),
    ("EARLY_HINTS", 103),
    ("CHECKPOINT", 103),
    ("OK", 200),
    ("CREATED", 201),
    ("ACCEPTED", 202),
    ("NON_AUTHORITATIVE_INFORMATION", 203),
    ("NO_CONTENT", 204),
    ("RESET_CONTENT", 205),
    ("PARTIAL_CONTENT", 206),
    ("MULTI_STATUS", 207),
    ("ALREADY_REPORTED", 208),
    ("IM_USED", 226),
    ("MULTIPLE_CHOICES", 300),
    ("MOVED_PERMANENTLY", 301),
    ("FOUND", 302),
    ("MOVED_TEMPORARILY", 302),
    ("SEE_OTHER", 303),
    ("NOT_MODIFIED", 304),
    ("USE_PROXY", 305),
    ("TEMPORARY_REDIRECT", 307),
    ("PERMANENT_REDIRECT", 308),
    ("BAD_REQUEST", 400),
    ("UNAUTHORIZED", 401),
    ("PAYMENT_REQUIRED", 402),
    ("FORBIDDEN", 403),
    ("NOT_FOUND", 404),
    ("METHOD_NOT_ALLOWED", 405),
    ("NOT_ACCEPTABLE", 406),
    ("PROXY_AUTHENTICATION_REQUIRED", 407),
    ("REQUEST_TIMEOUT", 408),
    ("CONFLICT", 409),
    ("GONE", 410),
    ("LENGTH_REQUIRED", 411),
    ("PRECONDITION_FAILED", 412),
    ("CONTENT_TOO_LARGE", 413),
    ("PAYLOAD_TOO_LARGE", 413),
    ("REQUEST_ENTITY_TOO_LARGE", 413),
    ("URI_TOO_LONG", 414),
    ("REQUEST_URI_TOO_LONG", 414),
    ("UNSUPPORTED_MEDIA_TYPE", 415),
    ("REQUESTED_RANGE_NOT_SATISFIABLE", 416),
    ("EXPECTATION_FAILED", 417),
    ("I_AM_A_TEAPOT", 418),
    ("INSUFFICIENT_SPACE_ON_RESOURCE", 419),
    ("METHOD_FAILURE", 420),
    ("DESTINATION_LOCKED", 421),
    ("UNPROCESSABLE_CONTENT", 422),
    ("UNPROCESSABLE_ENTITY", 422),
    ("LOCKED", 423),
    ("FAILED_DEPENDENCY", 424),
    ("TOO_EARLY", 425),
    ("UPGRADE_REQUIRED", 426),
    ("PRECONDITION_REQUIRED", 428),
    ("TOO_MANY_REQUESTS", 429),
    ("REQUEST_HEADER_FIELDS_TOO_LARGE", 431),
    ("UNAVAILABLE_FOR_LEGAL_REASONS", 451),
    ("INTERNAL_SERVER_ERROR", 500),
    ("NOT_IMPLEMENTED", 501),
    ("BAD_GATEWAY", 502),
    ("SERVICE_UNAVAILABLE", 503),
    ("GATEWAY_TIMEOUT", 504),
    ("HTTP_VERSION_NOT_SUPPORTED", 505),
    ("VARIANT_ALSO_NEGOTIATES", 506),
    ("INSUFFICIENT_STORAGE", 507),
    ("LOOP_DETECTED", 508),
    ("BANDWIDTH_LIMIT_EXCEEDED", 509),
    ("NOT_EXTENDED", 510),
    ("NETWORK_AUTHENTICATION_REQUIRED", 511),
];

impl HttpStatus {
    pub(crate) const OK: HttpStatus = HttpStatus {
        code: 200,
        reason: "OK",
    };

    pub(crate) fn from_name(name: &str) -> Option<Self> {
        STATUSES
            .iter()
            .find(|(reason, _)| *reason == name)
            .map(|(reason, code)| HttpStatus {
                code: *code,
                reason: *reason,
            })
    }
}

#[derive(Clone, Debug)]
pub(crate) struct EndpointMethod {
    pub(crate) http_method: HttpMethod,
    pub(crate) path: String,
    pub(crate) content_type: String,
    pub(crate) status: HttpStatus,
    pub(crate) parameters: Vec<EndpointParameter>,
    pub(crate) return_type: Option<EndpointType>,
    pub(crate) exceptions: Vec<ThrownException>,
    pub(crate) validations: Vec<ValidationRule>,
    pub(crate) controller: String,
    pub(crate) method_name: String,
}

/// Join request path fragments with exactly one `/` between non-empty segments.
pub(crate) fn join_paths(base: &str, path: &str) -> String {
    let segments: Vec<&str> = base
        .split('/')
        .chain(path.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

/// Success status named by a `@ResponseStatus` among `annotations`.
pub(crate) fn response_status(
    annotations: &[Annotation],
    location: &str,
) -> Result<Option<HttpStatus>> {
    let Some(annotation) = annotations
        .iter()
        .find(|annotation| annotation.descriptor == RESPONSE_STATUS)
    else {
        return Ok(None);
    };
    match annotation.value(&["code", "value"]) {
        None => Ok(None),
        Some(ElementValue::Enum { descriptor, name }) if descriptor == HTTP_STATUS => {
            HttpStatus::from_name(name).map(Some).ok_or_else(|| {
                AnalysisError::unrecognized("response status", location, name.clone())
            })
        }
        Some(other) => Err(AnalysisError::unrecognized(
            "response status",
            location,
            format!("expected an HttpStatus constant, found {other:?}"),
        )),
    }
}

fn mapping_paths(annotation: &Annotation) -> Vec<String> {
    let paths: Vec<String> = annotation
        .value(&["value", "path"])
        .map(|value| value.strings().into_iter().map(str::to_string).collect())
        .unwrap_or_default();
    if paths.is_empty() {
        vec![String::new()]
    } else {
        paths
    }
}

pub(crate) struct EndpointExtractor<'a> {
    repository: &'a ClassRepository,
    config: &'a Config,
}

impl<'a> EndpointExtractor<'a> {
    pub(crate) fn new(repository: &'a ClassRepository, config: &'a Config) -> Self {
        Self { repository, config }
    }

    pub(crate) fn extract(&self) -> Result<Vec<EndpointMethod>> {
        let mut endpoints = Vec::new();
        for record in self.repository.records_in(ClassSubset::Controllers) {
            let class = record.info()?;
            let Some(mapping) = class
                .annotations
                .iter()
                .find(|annotation| annotation.descriptor == REQUEST_MAPPING)
            else {
                debug!(class = record.path(), "no request mapping, skipping");
                continue;
            };
            let bases = mapping_paths(mapping);

            for method in &class.methods {
                if !method.access.is_public || method.access.is_bridge {
                    continue;
                }
                let Some((http_method, mapping)) = method.annotations.iter().find_map(|annotation| {
                    MAPPINGS
                        .iter()
                        .find(|(descriptor, _)| *descriptor == annotation.descriptor)
                        .map(|(_, http_method)| (*http_method, annotation))
                }) else {
                    continue;
                };
                self.extract_method(record, method, http_method, mapping, &bases, &mut endpoints)?;
            }
        }
        Ok(endpoints)
    }

    fn extract_method(
        &self,
        record: &'a ClassRecord,
        method: &'a Method,
        http_method: HttpMethod,
        mapping: &Annotation,
        bases: &[String],
        endpoints: &mut Vec<EndpointMethod>,
    ) -> Result<()> {
        let location = format!("{}#{}{}", record.path(), method.name, method.descriptor);
        let descriptor = parse_method_descriptor(&method.descriptor)?;
        let signature = method
            .signature
            .as_deref()
            .map(parse_method_signature)
            .transpose()?;

        let parameters = self.parameters(method, &descriptor.parameters, signature.as_ref(), &location)?;
        let return_type = match (&descriptor.return_type, &signature) {
            (None, _) => None,
            (Some(_), Some(signature)) => match &signature.return_type {
                Some(return_type) => self.return_type(return_type, &location)?,
                None => None,
            },
            (Some(field_type), None) => self.return_type(&TypeSignature::from(field_type), &location)?,
        };

        let consumes = mapping
            .value(&["consumes"])
            .map(ElementValue::strings)
            .unwrap_or_default();
        if consumes.len() > 1 {
            warn!(%location, ?consumes, "multiple content types declared, using the first");
        }
        let content_type = consumes
            .first()
            .map_or(DEFAULT_CONTENT_TYPE, |content_type| *content_type)
            .to_string();
        let status = response_status(&method.annotations, &location)?.unwrap_or(HttpStatus::OK);

        let walk = CallGraphWalker::new(
            self.repository,
            &self.config.markers,
            self.config.walker.max_call_depth,
        )
        .walk(record, method)?;
        debug!(
            %location,
            exceptions = walk.exceptions.len(),
            validations = walk.validations.len(),
            "walked endpoint"
        );

        let paths = mapping_paths(mapping);
        for base in bases {
            for path in &paths {
                endpoints.push(EndpointMethod {
                    http_method,
                    path: join_paths(base, path),
                    content_type: content_type.clone(),
                    status: status.clone(),
                    parameters: parameters.clone(),
                    return_type: return_type.clone(),
                    exceptions: walk.exceptions.clone(),
                    validations: walk.validations.clone(),
                    controller: record.path().to_string(),
                    method_name: method.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn parameters(
        &self,
        method: &Method,
        erased_types: &[FieldType],
        signature: Option<&MethodSignature>,
        location: &str,
    ) -> Result<Vec<EndpointParameter>> {
        let generic_types = signature
            .map(|signature| &signature.parameters)
            .filter(|parameters| parameters.len() == erased_types.len());

        let mut parameters = Vec::with_capacity(erased_types.len());
        let mut slot = if method.access.is_static { 0 } else { 1 };
        for (index, field_type) in erased_types.iter().enumerate() {
            let annotations = method
                .parameter_annotations
                .get(index)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let (source, declared_name) = input_source(annotations, location)?;
            let name = match declared_name {
                Some(name) => name,
                None => compiled_name(method, index, slot).ok_or_else(|| {
                    AnalysisError::unrecognized(
                        "parameter name",
                        location,
                        format!("parameter {index} has no name; compile with -parameters or debug info"),
                    )
                })?,
            };
            let parameter_type = match generic_types {
                Some(generic_types) => self.endpoint_type(&generic_types[index], location)?,
                None => self.endpoint_type(&TypeSignature::from(field_type), location)?,
            };
            parameters.push(EndpointParameter {
                name,
                source,
                parameter_type,
            });
            slot += field_type.slot_size();
        }
        Ok(parameters)
    }

    /// `ResponseEntity<T>` unwraps to `T`; `Void` bodies have no return type.
    fn return_type(&self, signature: &TypeSignature, location: &str) -> Result<Option<EndpointType>> {
        let signature = match signature {
            TypeSignature::Class { name, arguments } if name == RESPONSE_ENTITY => {
                match arguments.first().and_then(|argument| argument.bound()) {
                    Some(inner) => inner,
                    None => {
                        return Err(AnalysisError::unrecognized(
                            "return type",
                            location,
                            "ResponseEntity without a concrete body type",
                        ));
                    }
                }
            }
            other => other,
        };
        if matches!(signature, TypeSignature::Class { name, .. } if name == "java/lang/Void") {
            return Ok(None);
        }
        self.endpoint_type(signature, location).map(Some)
    }

    fn endpoint_type(&self, signature: &TypeSignature, location: &str) -> Result<EndpointType> {
        match signature {
            TypeSignature::Base(field_type) => BuiltInType::from_descriptor(&field_type.descriptor())
                .map(EndpointType::BuiltIn)
                .ok_or_else(|| {
                    AnalysisError::unrecognized("type", location, field_type.descriptor())
                }),
            TypeSignature::Array(component) => Ok(EndpointType::Array(Box::new(
                self.endpoint_type(component, location)?,
            ))),
            TypeSignature::TypeVariable(name) => Err(AnalysisError::unrecognized(
                "type",
                location,
                format!("unresolved type variable {name}"),
            )),
            TypeSignature::Class { name, arguments } => {
                if let Some(built_in) = BuiltInType::from_class_name(name) {
                    return Ok(EndpointType::BuiltIn(built_in));
                }
                if is_collection(name) {
                    let element = arguments
                        .first()
                        .and_then(|argument| argument.bound())
                        .ok_or_else(|| {
                            AnalysisError::unrecognized(
                                "type",
                                location,
                                format!("{name} without an element type"),
                            )
                        })?;
                    return Ok(EndpointType::Array(Box::new(
                        self.endpoint_type(element, location)?,
                    )));
                }

                let record = self.repository.lookup(name)?;
                let mut generics = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    match argument.bound() {
                        Some(TypeSignature::Class { name, .. }) => {
                            generics.push(self.repository.lookup(name)?.path().to_string());
                        }
                        _ => {
                            return Err(AnalysisError::unrecognized(
                                "generic argument",
                                location,
                                format!("{argument:?} of {name} is not a class"),
                            ));
                        }
                    }
                }
                Ok(EndpointType::Class {
                    path: record.path().to_string(),
                    generics,
                })
            }
        }
    }
}

const PATH_VARIABLE: &str = "Lorg/springframework/web/bind/annotation/PathVariable;";
const REQUEST_PARAM: &str = "Lorg/springframework/web/bind/annotation/RequestParam;";
const REQUEST_BODY: &str = "Lorg/springframework/web/bind/annotation/RequestBody;";
const REQUEST_PART: &str = "Lorg/springframework/web/bind/annotation/RequestPart;";
const VALID: [&str; 2] = ["Ljakarta/validation/Valid;", "Ljavax/validation/Valid;"];

/// Input source and explicitly declared name of a parameter. Unannotated parameters
/// are query parameters.
fn input_source(annotations: &[Annotation], location: &str) -> Result<(InputSource, Option<String>)> {
    for annotation in annotations {
        let source = match annotation.descriptor.as_str() {
            PATH_VARIABLE => InputSource::Path,
            REQUEST_PARAM | REQUEST_PART => InputSource::Query,
            REQUEST_BODY => return Ok((InputSource::Body, None)),
            descriptor if VALID.contains(&descriptor) => continue,
            descriptor => {
                return Err(AnalysisError::unrecognized(
                    "parameter annotation",
                    location,
                    descriptor,
                ));
            }
        };
        let name = annotation
            .value(&["name", "value"])
            .and_then(|value| value.strings().first().map(|name| name.to_string()))
            .filter(|name| !name.is_empty());
        return Ok((source, name));
    }
    Ok((InputSource::Query, None))
}

/// Parameter name from `MethodParameters`, falling back to the local variable in
/// the parameter's slot.
fn compiled_name(method: &Method, index: usize, slot: u16) -> Option<String> {
    if let Some(Some(name)) = method.parameter_names.get(index) {
        return Some(name.clone());
    }
    method
        .local_variables
        .iter()
        .find(|local| local.index == slot && local.start_pc == 0)
        .map(|local| local.name.clone())
}
