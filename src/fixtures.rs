//! Hand-built class fixtures for unit tests.

use crate::config::{Config, ScopeConfig};
use crate::ir::{
    Annotation, CallKind, CallSite, Class, ClassAccess, Constant, DynamicCallSite, ElementValue,
    Field, FieldAccess, FieldAccessSite, Instruction, InstructionKind, LocalVariable, Method,
    MethodAccess, MethodHandle,
};
use crate::opcodes;
use crate::repository::{ClassRecord, ClassRepository};

pub(crate) const CONTROLLER_PACKAGE: &str = "com/acme/web";

pub(crate) fn config() -> Config {
    let mut config = Config::default();
    config.scope.controller_packages = vec![CONTROLLER_PACKAGE.to_string()];
    config.normalize();
    config
}

pub(crate) fn repository(records: Vec<ClassRecord>) -> ClassRepository {
    repository_with(records, &config().scope)
}

pub(crate) fn repository_with(records: Vec<ClassRecord>, scope: &ScopeConfig) -> ClassRepository {
    ClassRepository::new(records, scope).expect("build repository")
}

pub(crate) fn annotation(descriptor: &str, values: Vec<(&str, ElementValue)>) -> Annotation {
    Annotation {
        descriptor: descriptor.to_string(),
        values: values
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    }
}

pub(crate) fn strings(values: &[&str]) -> ElementValue {
    ElementValue::Array(
        values
            .iter()
            .map(|value| ElementValue::Const(Constant::String(value.to_string())))
            .collect(),
    )
}

pub(crate) fn string(value: &str) -> ElementValue {
    ElementValue::Const(Constant::String(value.to_string()))
}

pub(crate) fn enum_value(descriptor: &str, name: &str) -> ElementValue {
    ElementValue::Enum {
        descriptor: descriptor.to_string(),
        name: name.to_string(),
    }
}

/// Discriminator enum whose constants carry a label and the class literal they tag,
/// initialized the way javac emits `<clinit>`.
pub(crate) fn discriminator_enum(name: &str, marker: &str, constants: &[(&str, &str)]) -> ClassRecord {
    let descriptor = format!("L{name};");
    let mut initializer = MethodBuilder::new("<clinit>", "()V").make_static();
    for (ordinal, (constant, type_path)) in constants.iter().enumerate() {
        initializer = initializer
            .new_object(name)
            .op(opcodes::DUP)
            .ldc(Constant::String(constant.to_string()))
            .int_push(opcodes::BIPUSH, ordinal as i32)
            .ldc(Constant::String(constant.to_lowercase()))
            .ldc(Constant::Class(type_path.to_string()))
            .invoke(
                CallKind::Special,
                name,
                "<init>",
                "(Ljava/lang/String;ILjava/lang/String;Ljava/lang/Class;)V",
            )
            .field_insn(opcodes::PUTSTATIC, name, constant, &descriptor);
    }
    let names: Vec<&str> = constants.iter().map(|(constant, _)| *constant).collect();
    ClassBuilder::enumeration(name, &names)
        .implements(marker)
        .field("label", "Ljava/lang/String;")
        .field("type", "Ljava/lang/Class;")
        .method(initializer)
        .build()
}

pub(crate) struct ClassBuilder {
    class: Class,
}

impl ClassBuilder {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            class: Class {
                name: name.to_string(),
                super_name: Some("java/lang/Object".to_string()),
                interfaces: Vec::new(),
                access: ClassAccess::default(),
                signature: None,
                annotations: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
            },
        }
    }

    pub(crate) fn interface(name: &str) -> Self {
        let mut builder = Self::new(name);
        builder.class.access.is_interface = true;
        builder.class.access.is_abstract = true;
        builder
    }

    pub(crate) fn abstract_class(name: &str) -> Self {
        let mut builder = Self::new(name);
        builder.class.access.is_abstract = true;
        builder
    }

    pub(crate) fn enumeration(name: &str, constants: &[&str]) -> Self {
        let mut builder = Self::new(name).extends("java/lang/Enum");
        builder.class.access.is_enum = true;
        for constant in constants {
            builder.class.fields.push(Field {
                name: constant.to_string(),
                descriptor: format!("L{name};"),
                access: FieldAccess {
                    is_static: true,
                    is_enum: true,
                    is_synthetic: false,
                },
                signature: None,
                annotations: Vec::new(),
            });
        }
        builder
    }

    pub(crate) fn extends(mut self, super_name: &str) -> Self {
        self.class.super_name = Some(super_name.to_string());
        self
    }

    pub(crate) fn implements(mut self, interface: &str) -> Self {
        self.class.interfaces.push(interface.to_string());
        self
    }

    pub(crate) fn signature(mut self, signature: &str) -> Self {
        self.class.signature = Some(signature.to_string());
        self
    }

    pub(crate) fn annotation(mut self, annotation: Annotation) -> Self {
        self.class.annotations.push(annotation);
        self
    }

    pub(crate) fn field(self, name: &str, descriptor: &str) -> Self {
        self.field_with(name, descriptor, None, Vec::new())
    }

    pub(crate) fn field_with(
        mut self,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        annotations: Vec<Annotation>,
    ) -> Self {
        self.class.fields.push(Field {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access: FieldAccess::default(),
            signature: signature.map(str::to_string),
            annotations,
        });
        self
    }

    pub(crate) fn static_field(mut self, name: &str, descriptor: &str) -> Self {
        self.class.fields.push(Field {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access: FieldAccess {
                is_static: true,
                ..FieldAccess::default()
            },
            signature: None,
            annotations: Vec::new(),
        });
        self
    }

    pub(crate) fn method(mut self, method: MethodBuilder) -> Self {
        self.class.methods.push(method.build());
        self
    }

    pub(crate) fn build_class(self) -> Class {
        self.class
    }

    pub(crate) fn build(self) -> ClassRecord {
        ClassRecord::from_class(self.class)
    }
}

pub(crate) struct MethodBuilder {
    method: Method,
}

impl MethodBuilder {
    pub(crate) fn new(name: &str, descriptor: &str) -> Self {
        Self {
            method: Method {
                name: name.to_string(),
                descriptor: descriptor.to_string(),
                access: MethodAccess {
                    is_public: true,
                    ..MethodAccess::default()
                },
                signature: None,
                annotations: Vec::new(),
                parameter_annotations: Vec::new(),
                parameter_names: Vec::new(),
                local_variables: Vec::new(),
                instructions: Vec::new(),
            },
        }
    }

    pub(crate) fn constructor() -> Self {
        Self::new("<init>", "()V")
    }

    pub(crate) fn make_static(mut self) -> Self {
        self.method.access.is_static = true;
        self
    }

    pub(crate) fn make_abstract(mut self) -> Self {
        self.method.access.is_abstract = true;
        self
    }

    pub(crate) fn make_private(mut self) -> Self {
        self.method.access.is_public = false;
        self
    }

    pub(crate) fn make_bridge(mut self) -> Self {
        self.method.access.is_bridge = true;
        self.method.access.is_synthetic = true;
        self
    }

    pub(crate) fn signature(mut self, signature: &str) -> Self {
        self.method.signature = Some(signature.to_string());
        self
    }

    pub(crate) fn annotation(mut self, annotation: Annotation) -> Self {
        self.method.annotations.push(annotation);
        self
    }

    pub(crate) fn parameter_annotations(mut self, annotations: Vec<Vec<Annotation>>) -> Self {
        self.method.parameter_annotations = annotations;
        self
    }

    pub(crate) fn parameter_names(mut self, names: &[&str]) -> Self {
        self.method.parameter_names = names.iter().map(|name| Some(name.to_string())).collect();
        self
    }

    /// Local variable live across the whole method body.
    pub(crate) fn local(self, index: u16, name: &str, descriptor: &str) -> Self {
        self.local_in(index, name, descriptor, 0, u16::MAX as u32)
    }

    /// Local variable live on `[start_pc, start_pc + length)`; offsets count instructions.
    pub(crate) fn local_in(
        mut self,
        index: u16,
        name: &str,
        descriptor: &str,
        start_pc: u32,
        length: u32,
    ) -> Self {
        self.method.local_variables.push(LocalVariable {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            index,
            start_pc,
            length,
        });
        self
    }

    fn push(mut self, kind: InstructionKind) -> Self {
        let offset = self.method.instructions.len() as u32;
        self.method.instructions.push(Instruction { offset, kind });
        self
    }

    pub(crate) fn label(self) -> Self {
        self.push(InstructionKind::Label)
    }

    pub(crate) fn line(self, line: u16) -> Self {
        self.push(InstructionKind::LineNumber(line))
    }

    pub(crate) fn op(self, opcode: u8) -> Self {
        self.push(InstructionKind::Op(opcode))
    }

    pub(crate) fn int_push(self, opcode: u8, value: i32) -> Self {
        self.push(InstructionKind::IntPush { opcode, value })
    }

    pub(crate) fn ldc(self, constant: Constant) -> Self {
        self.push(InstructionKind::Constant(constant))
    }

    pub(crate) fn aload(self, index: u16) -> Self {
        self.push(InstructionKind::Local {
            opcode: opcodes::ALOAD,
            index,
        })
    }

    pub(crate) fn astore(self, index: u16) -> Self {
        self.push(InstructionKind::Local {
            opcode: opcodes::ASTORE,
            index,
        })
    }

    pub(crate) fn new_object(self, descriptor: &str) -> Self {
        self.push(InstructionKind::Type {
            opcode: opcodes::NEW,
            descriptor: descriptor.to_string(),
        })
    }

    pub(crate) fn checkcast(self, descriptor: &str) -> Self {
        self.push(InstructionKind::Type {
            opcode: opcodes::CHECKCAST,
            descriptor: descriptor.to_string(),
        })
    }

    pub(crate) fn field_insn(self, opcode: u8, owner: &str, name: &str, descriptor: &str) -> Self {
        self.push(InstructionKind::Field(FieldAccessSite {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }))
    }

    pub(crate) fn invoke(self, kind: CallKind, owner: &str, name: &str, descriptor: &str) -> Self {
        self.push(InstructionKind::Invoke(CallSite {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            kind,
        }))
    }

    /// `new T; dup; invokespecial T.<init>()V`.
    pub(crate) fn construct(self, owner: &str) -> Self {
        self.new_object(owner)
            .op(opcodes::DUP)
            .invoke(CallKind::Special, owner, "<init>", "()V")
    }

    /// Lambda call site whose implementation is `owner.name descriptor`.
    pub(crate) fn lambda(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.push(InstructionKind::InvokeDynamic(DynamicCallSite {
            name: "run".to_string(),
            descriptor: "()Ljava/lang/Runnable;".to_string(),
            arguments: vec![
                Constant::MethodType("()V".to_string()),
                Constant::MethodHandle(MethodHandle {
                    kind: 6,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                }),
                Constant::MethodType("()V".to_string()),
            ],
        }))
    }

    pub(crate) fn build(self) -> Method {
        self.method
    }
}
