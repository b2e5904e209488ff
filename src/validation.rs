//! Recovery of field validation rules from validator constructions.
//!
//! A validator is built as `new V; dup; <arguments>; invokespecial V.<init>`. The
//! argument pushes immediately before the constructor call are matched against the
//! shape configured for `V` (or its nearest configured super type).

use serde::{Deserialize, Serialize};

use crate::config::MarkerConfig;
use crate::error::{AnalysisError, Result};
use crate::ir::{Constant, Instruction, InstructionKind, InstructionTag};
use crate::matcher::{InstructionScan, Matcher, OwnerFilter, constant_value};
use crate::opcodes;
use crate::repository::ClassRepository;

/// Constructor argument layout of a validator type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum ValidatorShape {
    NotNull,
    NotBlank,
    NullOrNotBlank,
    /// Field, comparison mode, constant.
    CompareToConstant,
    /// Field, comparison mode, other field.
    CompareToField,
    /// Field, minimum, maximum.
    Between,
}

/// Field of a request type that a rule constrains.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FieldTarget {
    pub(crate) owner: String,
    pub(crate) name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Constraint {
    NotNull,
    NotBlank,
    NullOrNotBlank,
    CompareToConstant { mode: String, value: Constant },
    CompareToField { mode: String, other: FieldTarget },
    Between { min: Constant, max: Constant },
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ValidationRule {
    pub(crate) validator: String,
    pub(crate) field: FieldTarget,
    pub(crate) constraint: Constraint,
}

const WRAPPERS: [&str; 5] = [
    "java/lang/Boolean",
    "java/lang/Integer",
    "java/lang/Long",
    "java/lang/Float",
    "java/lang/Double",
];

/// `PropertyReference1Impl(Class owner, String name, String signature, int flags)`.
const PROPERTY_REFERENCE_INIT: &str = "(Ljava/lang/Class;Ljava/lang/String;Ljava/lang/String;I)V";

/// How the validated field is handed to a validator constructor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FieldForm {
    /// `aload; checkcast?; getfield | getter call`.
    Accessor,
    /// Kotlin `Dto::name` compiled to a singleton: `getstatic Ref.INSTANCE; checkcast?`.
    PropertySingleton,
    /// Kotlin `Dto::name` built in place: `new PropertyReference1Impl(Dto.class, "name", ...)`.
    PropertyReference,
}

const FIELD_FORMS: [FieldForm; 3] = [
    FieldForm::Accessor,
    FieldForm::PropertySingleton,
    FieldForm::PropertyReference,
];

/// One constructor argument of a validator shape.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ArgumentForm {
    Field(FieldForm),
    Mode,
    Literal,
}

/// Value recovered for one argument.
enum ArgumentValue {
    Field(FieldTarget),
    Mode(String),
    Literal(Constant),
}

impl ArgumentForm {
    /// Matchers for this argument, in program order.
    fn matchers(self) -> Vec<Matcher> {
        match self {
            ArgumentForm::Field(FieldForm::Accessor) => vec![
                Matcher::opcode(opcodes::ALOAD),
                Matcher::opcode(opcodes::CHECKCAST).optional(),
                Matcher::any_of(vec![
                    Matcher::field(None, None, None, Some(false)),
                    Matcher::opcode(opcodes::INVOKEVIRTUAL),
                    Matcher::opcode(opcodes::INVOKEINTERFACE),
                ]),
            ],
            ArgumentForm::Field(FieldForm::PropertySingleton) => vec![
                Matcher::field(None, Some("INSTANCE"), None, Some(true)),
                Matcher::opcode(opcodes::CHECKCAST).optional(),
            ],
            ArgumentForm::Field(FieldForm::PropertyReference) => vec![
                Matcher::opcode(opcodes::NEW),
                Matcher::opcode(opcodes::DUP),
                Matcher::constant(),
                Matcher::constant(),
                Matcher::constant(),
                Matcher::constant(),
                Matcher::method(None, Some("<init>"), Some(PROPERTY_REFERENCE_INIT)),
                Matcher::opcode(opcodes::CHECKCAST).optional(),
            ],
            ArgumentForm::Mode => vec![Matcher::field(None, None, None, Some(true))],
            ArgumentForm::Literal => {
                let boxing = WRAPPERS
                    .iter()
                    .map(|wrapper| {
                        Matcher::method(
                            Some(OwnerFilter::Exact((*wrapper).to_string())),
                            Some("valueOf"),
                            None,
                        )
                    })
                    .collect();
                vec![Matcher::constant(), Matcher::any_of(boxing).optional()]
            }
        }
    }

    fn resolve(
        self,
        repository: &ClassRepository,
        captures: &[Option<&Instruction>],
        location: &str,
    ) -> Result<ArgumentValue> {
        Ok(match self {
            ArgumentForm::Field(FieldForm::Accessor) => {
                ArgumentValue::Field(accessor_target(captures[2], location)?)
            }
            ArgumentForm::Field(FieldForm::PropertySingleton) => {
                ArgumentValue::Field(singleton_target(repository, captures[0], location)?)
            }
            ArgumentForm::Field(FieldForm::PropertyReference) => {
                ArgumentValue::Field(reference_target(captures[2], captures[3], location)?)
            }
            ArgumentForm::Mode => ArgumentValue::Mode(mode_name(captures[0], location)?),
            ArgumentForm::Literal => ArgumentValue::Literal(literal_value(captures[0], location)?),
        })
    }
}

/// Every argument layout `shape` may compile to, one entry per field form combination.
fn candidates(shape: ValidatorShape) -> Vec<Vec<ArgumentForm>> {
    let field = ArgumentForm::Field(FieldForm::Accessor);
    let positional = match shape {
        ValidatorShape::NotNull | ValidatorShape::NotBlank | ValidatorShape::NullOrNotBlank => {
            vec![field]
        }
        ValidatorShape::CompareToConstant => {
            vec![field, ArgumentForm::Mode, ArgumentForm::Literal]
        }
        ValidatorShape::CompareToField => vec![field, ArgumentForm::Mode, field],
        ValidatorShape::Between => vec![field, ArgumentForm::Literal, ArgumentForm::Literal],
    };

    let mut layouts: Vec<Vec<ArgumentForm>> = vec![Vec::new()];
    for argument in positional {
        layouts = layouts
            .into_iter()
            .flat_map(|layout| {
                let forms: Vec<ArgumentForm> = match argument {
                    ArgumentForm::Field(_) => FIELD_FORMS.map(ArgumentForm::Field).to_vec(),
                    other => vec![other],
                };
                forms.into_iter().map(move |form| {
                    let mut next = layout.clone();
                    next.push(form);
                    next
                })
            })
            .collect();
    }
    layouts
}

/// Shape of `validator`, looked up on the type itself and then along its supers.
pub(crate) fn shape_of(
    repository: &ClassRepository,
    markers: &MarkerConfig,
    validator: &str,
    location: &str,
) -> Result<ValidatorShape> {
    let mut current = Some(validator.to_string());
    let mut steps = 0;
    while let Some(path) = current {
        if let Some(shape) = markers.validators.get(&path) {
            return Ok(*shape);
        }
        steps += 1;
        if steps > repository.len() {
            break;
        }
        current = match repository.try_lookup(&path) {
            Some(record) => record.info()?.super_name.clone(),
            None => None,
        };
    }
    Err(AnalysisError::unrecognized(
        "validator",
        location,
        format!("{validator} has no configured constructor shape"),
    ))
}

/// Recover the rule built by the validator constructor call at `anchor`.
pub(crate) fn recover_rule(
    repository: &ClassRepository,
    markers: &MarkerConfig,
    location: &str,
    instructions: &[Instruction],
    anchor: usize,
    validator: &str,
) -> Result<ValidationRule> {
    let shape = shape_of(repository, markers, validator, location)?;
    let scan = InstructionScan::backward_from(repository, location, instructions, anchor).anchored();

    for layout in candidates(shape) {
        let spans: Vec<Vec<Matcher>> = layout.iter().map(|form| form.matchers()).collect();
        let idiom: Vec<Matcher> = spans.iter().flatten().cloned().collect();
        let Some(captures) = scan.find(&idiom)? else {
            continue;
        };

        let mut values = Vec::with_capacity(layout.len());
        let mut rest = captures.as_slice();
        for (form, matchers) in layout.iter().zip(&spans) {
            let (own, tail) = rest.split_at(matchers.len());
            values.push(form.resolve(repository, own, location)?);
            rest = tail;
        }
        return build_rule(validator, shape, values, location);
    }

    Err(AnalysisError::IdiomNotMatched {
        idiom: "validator arguments",
        location: location.to_string(),
        dump: scan.dump(),
    })
}

fn build_rule(
    validator: &str,
    shape: ValidatorShape,
    values: Vec<ArgumentValue>,
    location: &str,
) -> Result<ValidationRule> {
    let mut values = values.into_iter();
    let Some(ArgumentValue::Field(field)) = values.next() else {
        return Err(AnalysisError::unrecognized(
            "validated field",
            location,
            "first argument is not a field",
        ));
    };
    let rest: Vec<ArgumentValue> = values.collect();
    let constraint = match (shape, rest.as_slice()) {
        (ValidatorShape::NotNull, []) => Constraint::NotNull,
        (ValidatorShape::NotBlank, []) => Constraint::NotBlank,
        (ValidatorShape::NullOrNotBlank, []) => Constraint::NullOrNotBlank,
        (ValidatorShape::CompareToConstant, [ArgumentValue::Mode(mode), ArgumentValue::Literal(value)]) => {
            Constraint::CompareToConstant {
                mode: mode.clone(),
                value: value.clone(),
            }
        }
        (ValidatorShape::CompareToField, [ArgumentValue::Mode(mode), ArgumentValue::Field(other)]) => {
            Constraint::CompareToField {
                mode: mode.clone(),
                other: other.clone(),
            }
        }
        (ValidatorShape::Between, [ArgumentValue::Literal(min), ArgumentValue::Literal(max)]) => {
            Constraint::Between {
                min: min.clone(),
                max: max.clone(),
            }
        }
        _ => {
            return Err(AnalysisError::unrecognized(
                "validator",
                location,
                format!("arguments do not fit {shape:?}"),
            ));
        }
    };

    Ok(ValidationRule {
        validator: validator.to_string(),
        field,
        constraint,
    })
}

fn accessor_target(capture: Option<&Instruction>, location: &str) -> Result<FieldTarget> {
    match capture.map(|instruction| &instruction.kind) {
        Some(InstructionKind::Field(site)) => Ok(FieldTarget {
            owner: site.owner.clone(),
            name: site.name.clone(),
        }),
        Some(InstructionKind::Invoke(call)) => {
            let property = call
                .descriptor
                .starts_with("()")
                .then(|| property_name(&call.name))
                .flatten()
                .ok_or_else(|| {
                    AnalysisError::unrecognized(
                        "validated field",
                        location,
                        format!("{}#{}{} is not a getter", call.owner, call.name, call.descriptor),
                    )
                })?;
            Ok(FieldTarget {
                owner: call.owner.clone(),
                name: property,
            })
        }
        _ => Err(AnalysisError::unrecognized(
            "validated field",
            location,
            "expected a field read or getter call",
        )),
    }
}

/// Owner class literal and property name pushed into a `PropertyReference1Impl`.
fn reference_target(
    owner: Option<&Instruction>,
    name: Option<&Instruction>,
    location: &str,
) -> Result<FieldTarget> {
    match (owner.and_then(constant_value), name.and_then(constant_value)) {
        (Some(Constant::Class(owner)), Some(Constant::String(name))) => {
            Ok(FieldTarget { owner, name })
        }
        _ => Err(AnalysisError::unrecognized(
            "validated field",
            location,
            "property reference without owner class and name",
        )),
    }
}

/// Read owner and name from the singleton class behind `getstatic Ref.INSTANCE`: its
/// constructor hands them to the property reference super type, or older compilers
/// override `getName` and `getOwner`.
fn singleton_target(
    repository: &ClassRepository,
    capture: Option<&Instruction>,
    location: &str,
) -> Result<FieldTarget> {
    let unrecognized = |detail: String| AnalysisError::unrecognized("validated field", location, detail);
    let Some(InstructionKind::Field(site)) = capture.map(|instruction| &instruction.kind) else {
        return Err(unrecognized("expected a property reference singleton".to_string()));
    };
    let record = repository
        .try_lookup(&site.owner)
        .ok_or_else(|| unrecognized(format!("property reference {} is not on the class path", site.owner)))?;
    let class = record.info()?;
    let method = |name: &str| class.methods.iter().find(|method| method.name == name);

    if let Some(constructor) = method("<init>") {
        let captures = InstructionScan::forward(repository, location, &constructor.instructions)
            .find(&[
                Matcher::constant(),
                Matcher::constant(),
                Matcher::constant(),
                Matcher::constant(),
                Matcher::method(None, Some("<init>"), Some(PROPERTY_REFERENCE_INIT)),
            ])?;
        if let Some(captures) = captures {
            return reference_target(captures[0], captures[1], location);
        }
    }

    let returned = |name: &str| -> Result<Option<Constant>> {
        let Some(getter) = method(name) else {
            return Ok(None);
        };
        let captures = InstructionScan::forward(repository, location, &getter.instructions).find(&[
            Matcher::constant(),
            Matcher::any_of(vec![
                Matcher::kind(InstructionTag::Invoke),
                Matcher::opcode(opcodes::ARETURN),
            ]),
        ])?;
        Ok(captures.and_then(|captures| captures[0].and_then(constant_value)))
    };
    match (returned("getOwner")?, returned("getName")?) {
        (Some(Constant::Class(owner)), Some(Constant::String(name))) => Ok(FieldTarget { owner, name }),
        _ => Err(unrecognized(format!(
            "{} names no property owner and name",
            site.owner
        ))),
    }
}

/// `getFirstName` -> `firstName`, `isActive` -> `active`.
fn property_name(getter: &str) -> Option<String> {
    let rest = getter
        .strip_prefix("get")
        .or_else(|| getter.strip_prefix("is"))?;
    let mut chars = rest.chars();
    let first = chars.next()?;
    if !first.is_uppercase() {
        return None;
    }
    Some(first.to_lowercase().chain(chars).collect())
}

fn mode_name(capture: Option<&Instruction>, location: &str) -> Result<String> {
    match capture.map(|instruction| &instruction.kind) {
        Some(InstructionKind::Field(site)) => Ok(site.name.clone()),
        _ => Err(AnalysisError::unrecognized(
            "comparison mode",
            location,
            "expected a static field read",
        )),
    }
}

fn literal_value(capture: Option<&Instruction>, location: &str) -> Result<Constant> {
    capture.and_then(constant_value).ok_or_else(|| {
        AnalysisError::unrecognized("validation constant", location, "expected a literal push")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ClassBuilder, MethodBuilder, config, repository};
    use crate::ir::CallKind;

    const VALIDATOR_BASE: &str = "com/acme/validation/FieldValidator";

    fn markers() -> MarkerConfig {
        let mut config = config();
        config.markers.validator_base = Some(VALIDATOR_BASE.to_string());
        for (path, shape) in [
            ("com/acme/validation/NotNullValidator", ValidatorShape::NotNull),
            ("com/acme/validation/CompareValidator", ValidatorShape::CompareToConstant),
            ("com/acme/validation/FieldCompareValidator", ValidatorShape::CompareToField),
            ("com/acme/validation/RangeValidator", ValidatorShape::Between),
        ] {
            config.markers.validators.insert(path.to_string(), shape);
        }
        config.markers
    }

    fn validators() -> ClassRepository {
        repository(vec![
            ClassBuilder::abstract_class(VALIDATOR_BASE).build(),
            ClassBuilder::new("com/acme/validation/RangeValidator")
                .extends(VALIDATOR_BASE)
                .build(),
            ClassBuilder::new("com/acme/validation/AgeRangeValidator")
                .extends("com/acme/validation/RangeValidator")
                .build(),
        ])
    }

    fn anchor_of(instructions: &[Instruction]) -> usize {
        instructions
            .iter()
            .rposition(|instruction| {
                matches!(&instruction.kind, InstructionKind::Invoke(call) if call.is_constructor())
            })
            .expect("constructor call")
    }

    #[test]
    fn recovers_between_rule_through_inherited_shape() {
        let repository = validators();
        let instructions = MethodBuilder::new("validate", "(Lcom/acme/CreateUser;)V")
            .new_object("com/acme/validation/AgeRangeValidator")
            .op(opcodes::DUP)
            .aload(1)
            .invoke(CallKind::Virtual, "com/acme/CreateUser", "getAge", "()I")
            .line(12)
            .int_push(opcodes::BIPUSH, 18)
            .invoke(
                CallKind::Static,
                "java/lang/Integer",
                "valueOf",
                "(I)Ljava/lang/Integer;",
            )
            .ldc(Constant::Int(150))
            .invoke(
                CallKind::Special,
                "com/acme/validation/AgeRangeValidator",
                "<init>",
                "(ILjava/lang/Integer;I)V",
            )
            .build()
            .instructions;

        let rule = recover_rule(
            &repository,
            &markers(),
            "com/acme/Service#validate",
            &instructions,
            anchor_of(&instructions),
            "com/acme/validation/AgeRangeValidator",
        )
        .expect("rule");

        assert_eq!(
            FieldTarget {
                owner: "com/acme/CreateUser".to_string(),
                name: "age".to_string(),
            },
            rule.field
        );
        assert_eq!(
            Constraint::Between {
                min: Constant::Int(18),
                max: Constant::Int(150),
            },
            rule.constraint
        );
    }

    #[test]
    fn recovers_comparison_against_other_field() {
        let repository = validators();
        let instructions = MethodBuilder::new("validate", "()V")
            .new_object("com/acme/validation/FieldCompareValidator")
            .op(opcodes::DUP)
            .aload(0)
            .field_insn(opcodes::GETFIELD, "com/acme/Period", "end", "Ljava/time/LocalDateTime;")
            .field_insn(
                opcodes::GETSTATIC,
                "com/acme/validation/Mode",
                "GREATER_THAN",
                "Lcom/acme/validation/Mode;",
            )
            .aload(0)
            .checkcast("com/acme/Period")
            .field_insn(opcodes::GETFIELD, "com/acme/Period", "start", "Ljava/time/LocalDateTime;")
            .invoke(
                CallKind::Special,
                "com/acme/validation/FieldCompareValidator",
                "<init>",
                "()V",
            )
            .build()
            .instructions;

        let rule = recover_rule(
            &repository,
            &markers(),
            "test",
            &instructions,
            anchor_of(&instructions),
            "com/acme/validation/FieldCompareValidator",
        )
        .expect("rule");

        assert_eq!("end", rule.field.name);
        assert_eq!(
            Constraint::CompareToField {
                mode: "GREATER_THAN".to_string(),
                other: FieldTarget {
                    owner: "com/acme/Period".to_string(),
                    name: "start".to_string(),
                },
            },
            rule.constraint
        );
    }

    #[test]
    fn recovers_constant_comparison_with_boxed_literal() {
        let repository = validators();
        let instructions = MethodBuilder::new("validate", "()V")
            .new_object("com/acme/validation/CompareValidator")
            .op(opcodes::DUP)
            .aload(1)
            .invoke(CallKind::Virtual, "com/acme/Order", "isExpress", "()Z")
            .field_insn(
                opcodes::GETSTATIC,
                "com/acme/validation/Mode",
                "EQUAL",
                "Lcom/acme/validation/Mode;",
            )
            .op(opcodes::ICONST_1)
            .invoke(
                CallKind::Static,
                "java/lang/Boolean",
                "valueOf",
                "(Z)Ljava/lang/Boolean;",
            )
            .invoke(CallKind::Special, "com/acme/validation/CompareValidator", "<init>", "()V")
            .build()
            .instructions;

        let rule = recover_rule(
            &repository,
            &markers(),
            "test",
            &instructions,
            anchor_of(&instructions),
            "com/acme/validation/CompareValidator",
        )
        .expect("rule");

        assert_eq!("express", rule.field.name);
        assert_eq!(
            Constraint::CompareToConstant {
                mode: "EQUAL".to_string(),
                value: Constant::Int(1),
            },
            rule.constraint
        );
    }

    #[test]
    fn unconfigured_validator_is_unrecognized() {
        let repository = validators();
        let error = shape_of(
            &repository,
            &markers(),
            "com/acme/validation/EmailValidator",
            "test",
        )
        .expect_err("no shape");

        assert!(matches!(error, AnalysisError::Unrecognized { construct: "validator", .. }));
    }

    #[test]
    fn mismatched_arguments_report_the_idiom() {
        let repository = validators();
        let instructions = MethodBuilder::new("validate", "()V")
            .new_object("com/acme/validation/NotNullValidator")
            .op(opcodes::DUP)
            .ldc(Constant::String("name".to_string()))
            .invoke(CallKind::Special, "com/acme/validation/NotNullValidator", "<init>", "()V")
            .build()
            .instructions;

        let error = recover_rule(
            &repository,
            &markers(),
            "test",
            &instructions,
            anchor_of(&instructions),
            "com/acme/validation/NotNullValidator",
        )
        .expect_err("no match");

        assert!(matches!(
            error,
            AnalysisError::IdiomNotMatched { idiom: "validator arguments", .. }
        ));
    }

    /// Singleton `Owner$validate$N` extending `PropertyReference1Impl`, as kotlinc emits it
    /// for `Dto::property`.
    fn property_singleton(name: &str, owner: &str, property: &str) -> ClassBuilder {
        ClassBuilder::new(name)
            .extends("kotlin/jvm/internal/PropertyReference1Impl")
            .static_field("INSTANCE", "Lkotlin/reflect/KProperty1;")
            .method(
                MethodBuilder::constructor()
                    .aload(0)
                    .ldc(Constant::Class(owner.to_string()))
                    .ldc(Constant::String(property.to_string()))
                    .ldc(Constant::String(format!("get{property}()Ljava/lang/String;")))
                    .op(opcodes::ICONST_0)
                    .invoke(
                        CallKind::Special,
                        "kotlin/jvm/internal/PropertyReference1Impl",
                        "<init>",
                        PROPERTY_REFERENCE_INIT,
                    )
                    .op(opcodes::RETURN),
            )
    }

    fn not_null_with_singleton(singleton: &str) -> Vec<Instruction> {
        MethodBuilder::new("validate", "(Lcom/acme/CreateUser;)V")
            .new_object("com/acme/validation/NotNullValidator")
            .op(opcodes::DUP)
            .field_insn(opcodes::GETSTATIC, singleton, "INSTANCE", "Lkotlin/reflect/KProperty1;")
            .checkcast("kotlin/reflect/KProperty1")
            .invoke(
                CallKind::Special,
                "com/acme/validation/NotNullValidator",
                "<init>",
                "(Lkotlin/reflect/KProperty1;)V",
            )
            .build()
            .instructions
    }

    #[test]
    fn recovers_kotlin_property_reference_singleton() {
        let repository = repository(vec![
            property_singleton("com/acme/UserService$validate$1", "com/acme/CreateUser", "name").build(),
        ]);
        let instructions = not_null_with_singleton("com/acme/UserService$validate$1");

        let rule = recover_rule(
            &repository,
            &markers(),
            "com/acme/UserService#validate",
            &instructions,
            anchor_of(&instructions),
            "com/acme/validation/NotNullValidator",
        )
        .expect("rule");

        assert_eq!(
            FieldTarget {
                owner: "com/acme/CreateUser".to_string(),
                name: "name".to_string(),
            },
            rule.field
        );
        assert_eq!(Constraint::NotNull, rule.constraint);
    }

    #[test]
    fn recovers_property_singleton_with_overridden_accessors() {
        let repository = repository(vec![
            ClassBuilder::new("com/acme/UserService$validate$2")
                .extends("kotlin/jvm/internal/PropertyReference1")
                .static_field("INSTANCE", "Lkotlin/reflect/KProperty1;")
                .method(MethodBuilder::constructor().aload(0).op(opcodes::RETURN))
                .method(
                    MethodBuilder::new("getName", "()Ljava/lang/String;")
                        .ldc(Constant::String("email".to_string()))
                        .op(opcodes::ARETURN),
                )
                .method(
                    MethodBuilder::new("getOwner", "()Lkotlin/reflect/KDeclarationContainer;")
                        .ldc(Constant::Class("com/acme/CreateUser".to_string()))
                        .invoke(
                            CallKind::Static,
                            "kotlin/jvm/internal/Reflection",
                            "getOrCreateKotlinClass",
                            "(Ljava/lang/Class;)Lkotlin/reflect/KClass;",
                        )
                        .op(opcodes::ARETURN),
                )
                .build(),
        ]);
        let instructions = not_null_with_singleton("com/acme/UserService$validate$2");

        let rule = recover_rule(
            &repository,
            &markers(),
            "test",
            &instructions,
            anchor_of(&instructions),
            "com/acme/validation/NotNullValidator",
        )
        .expect("rule");

        assert_eq!("com/acme/CreateUser", rule.field.owner);
        assert_eq!("email", rule.field.name);
    }

    #[test]
    fn recovers_inline_property_reference_next_to_java_accessor() {
        let repository = validators();
        let instructions = MethodBuilder::new("validate", "(Lcom/acme/Period;)V")
            .new_object("com/acme/validation/FieldCompareValidator")
            .op(opcodes::DUP)
            .new_object("kotlin/jvm/internal/PropertyReference1Impl")
            .op(opcodes::DUP)
            .ldc(Constant::Class("com/acme/Period".to_string()))
            .ldc(Constant::String("end".to_string()))
            .ldc(Constant::String("getEnd()Ljava/time/LocalDateTime;".to_string()))
            .op(opcodes::ICONST_0)
            .invoke(
                CallKind::Special,
                "kotlin/jvm/internal/PropertyReference1Impl",
                "<init>",
                PROPERTY_REFERENCE_INIT,
            )
            .checkcast("kotlin/reflect/KProperty1")
            .field_insn(
                opcodes::GETSTATIC,
                "com/acme/validation/Mode",
                "GREATER_THAN",
                "Lcom/acme/validation/Mode;",
            )
            .aload(1)
            .invoke(CallKind::Virtual, "com/acme/Period", "getStart", "()Ljava/time/LocalDateTime;")
            .invoke(
                CallKind::Special,
                "com/acme/validation/FieldCompareValidator",
                "<init>",
                "()V",
            )
            .build()
            .instructions;

        let rule = recover_rule(
            &repository,
            &markers(),
            "test",
            &instructions,
            anchor_of(&instructions),
            "com/acme/validation/FieldCompareValidator",
        )
        .expect("rule");

        assert_eq!(
            FieldTarget {
                owner: "com/acme/Period".to_string(),
                name: "end".to_string(),
            },
            rule.field
        );
        assert_eq!(
            Constraint::CompareToField {
                mode: "GREATER_THAN".to_string(),
                other: FieldTarget {
                    owner: "com/acme/Period".to_string(),
                    name: "start".to_string(),
                },
            },
            rule.constraint
        );
    }

    #[test]
    fn property_singleton_missing_from_class_path_is_unrecognized() {
        let instructions = not_null_with_singleton("com/acme/UserService$validate$9");

        let error = recover_rule(
            &validators(),
            &markers(),
            "test",
            &instructions,
            anchor_of(&instructions),
            "com/acme/validation/NotNullValidator",
        )
        .expect_err("missing singleton");

        assert!(matches!(
            error,
            AnalysisError::Unrecognized { construct: "validated field", .. }
        ));
    }

    #[test]
    fn getter_names_become_property_names() {
        assert_eq!(Some("firstName".to_string()), property_name("getFirstName"));
        assert_eq!(Some("active".to_string()), property_name("isActive"));
        assert_eq!(None, property_name("compute"));
        assert_eq!(None, property_name("getter"));
    }
}
