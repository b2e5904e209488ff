use std::fmt;

/// Intermediate representation for a parsed JVM class.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) access: ClassAccess,
    pub(crate) signature: Option<String>,
    pub(crate) annotations: Vec<Annotation>,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
}

/// Class access flags relevant to hierarchy and schema decisions.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ClassAccess {
    pub(crate) is_interface: bool,
    pub(crate) is_abstract: bool,
    pub(crate) is_enum: bool,
}

/// Field declared by a class.
#[derive(Clone, Debug)]
pub(crate) struct Field {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: FieldAccess,
    pub(crate) signature: Option<String>,
    pub(crate) annotations: Vec<Annotation>,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FieldAccess {
    pub(crate) is_static: bool,
    pub(crate) is_enum: bool,
    pub(crate) is_synthetic: bool,
}

/// Intermediate representation for a method and its decoded bytecode.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: MethodAccess,
    pub(crate) signature: Option<String>,
    pub(crate) annotations: Vec<Annotation>,
    pub(crate) parameter_annotations: Vec<Vec<Annotation>>,
    /// Names from the `MethodParameters` attribute, when compiled with `-parameters`.
    pub(crate) parameter_names: Vec<Option<String>>,
    pub(crate) local_variables: Vec<LocalVariable>,
    pub(crate) instructions: Vec<Instruction>,
}

/// Method access flags used for endpoint and dispatch filtering.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct MethodAccess {
    pub(crate) is_public: bool,
    pub(crate) is_static: bool,
    pub(crate) is_abstract: bool,
    pub(crate) is_synthetic: bool,
    pub(crate) is_bridge: bool,
}

/// Entry of the `LocalVariableTable` attribute.
#[derive(Clone, Debug)]
pub(crate) struct LocalVariable {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) index: u16,
    pub(crate) start_pc: u32,
    pub(crate) length: u32,
}

impl LocalVariable {
    pub(crate) fn is_live_at(&self, offset: u32) -> bool {
        offset >= self.start_pc && offset < self.start_pc + self.length
    }
}

/// Runtime-visible annotation with its element values in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Annotation {
    pub(crate) descriptor: String,
    pub(crate) values: Vec<(String, ElementValue)>,
}

impl Annotation {
    /// First present element among `names`, in the given priority order.
    pub(crate) fn value(&self, names: &[&str]) -> Option<&ElementValue> {
        names.iter().find_map(|wanted| {
            self.values
                .iter()
                .find(|(name, _)| name == wanted)
                .map(|(_, value)| value)
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ElementValue {
    Const(Constant),
    Enum { descriptor: String, name: String },
    Class(String),
    Annotation(Annotation),
    Array(Vec<ElementValue>),
}

impl ElementValue {
    /// Flatten a string or string array into its non-empty strings.
    pub(crate) fn strings(&self) -> Vec<&str> {
        match self {
            ElementValue::Const(Constant::String(value)) => vec![value.as_str()],
            ElementValue::Array(values) => values.iter().flat_map(|value| value.strings()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Loadable constant, as pushed by `ldc` or stored in annotations.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// Internal name of a class literal (`com/acme/Foo` or an array descriptor).
    Class(String),
    MethodType(String),
    MethodHandle(MethodHandle),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(value) => write!(f, "{value}"),
            Constant::Long(value) => write!(f, "{value}L"),
            Constant::Float(value) => write!(f, "{value}F"),
            Constant::Double(value) => write!(f, "{value}D"),
            Constant::String(value) => write!(f, "\"{value}\""),
            Constant::Class(name) => write!(f, "{name}.class"),
            Constant::MethodType(descriptor) => write!(f, "{descriptor}"),
            Constant::MethodHandle(handle) => {
                write!(f, "{}#{}{}", handle.owner, handle.name, handle.descriptor)
            }
        }
    }
}

/// Method handle constant, e.g. the implementation target of a lambda call site.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct MethodHandle {
    pub(crate) kind: u8,
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) kind: InstructionKind,
}

/// Decoded instruction payloads. `Label` and `LineNumber` are markers synthesized
/// from branch targets and the line table; they carry no opcode.
#[derive(Clone, Debug)]
pub(crate) enum InstructionKind {
    Label,
    LineNumber(u16),
    /// Instruction without operands (`athrow`, `dup`, `iconst_1`, ...).
    Op(u8),
    /// `bipush`/`sipush`.
    IntPush { opcode: u8, value: i32 },
    /// `ldc`, `ldc_w`, `ldc2_w`.
    Constant(Constant),
    /// Local variable load/store/ret, with short forms normalized to the indexed opcode.
    Local { opcode: u8, index: u16 },
    Increment { index: u16, delta: i16 },
    /// `new`, `anewarray`, `checkcast`, `instanceof`, `multianewarray`.
    Type { opcode: u8, descriptor: String },
    Field(FieldAccessSite),
    Invoke(CallSite),
    InvokeDynamic(DynamicCallSite),
    Jump { opcode: u8, target: u32 },
    Switch { opcode: u8, default: u32, targets: Vec<u32> },
    Other(u8),
}

/// Field read or write extracted from bytecode.
#[derive(Clone, Debug)]
pub(crate) struct FieldAccessSite {
    pub(crate) opcode: u8,
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl FieldAccessSite {
    pub(crate) fn is_static(&self) -> bool {
        matches!(
            self.opcode,
            crate::opcodes::GETSTATIC | crate::opcodes::PUTSTATIC
        )
    }
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug)]
pub(crate) struct CallSite {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: CallKind,
}

impl CallSite {
    pub(crate) fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

/// `invokedynamic` call site with its static bootstrap arguments.
#[derive(Clone, Debug)]
pub(crate) struct DynamicCallSite {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) arguments: Vec<Constant>,
}

impl DynamicCallSite {
    /// Implementation method embedded in the bootstrap arguments (lambda bodies,
    /// method references). String concatenation sites have none.
    pub(crate) fn target_handle(&self) -> Option<&MethodHandle> {
        self.arguments.iter().find_map(|argument| match argument {
            Constant::MethodHandle(handle) => Some(handle),
            _ => None,
        })
    }
}

/// Call opcode classification used by dispatch resolution.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

/// Coarse instruction kind, used for matcher ignore-sets and kind matchers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) enum InstructionTag {
    Label,
    LineNumber,
    Op,
    IntPush,
    Constant,
    Local,
    Increment,
    Type,
    Field,
    Invoke,
    InvokeDynamic,
    Jump,
    Switch,
    Other,
}

impl Instruction {
    pub(crate) fn tag(&self) -> InstructionTag {
        match &self.kind {
            InstructionKind::Label => InstructionTag::Label,
            InstructionKind::LineNumber(_) => InstructionTag::LineNumber,
            InstructionKind::Op(_) => InstructionTag::Op,
            InstructionKind::IntPush { .. } => InstructionTag::IntPush,
            InstructionKind::Constant(_) => InstructionTag::Constant,
            InstructionKind::Local { .. } => InstructionTag::Local,
            InstructionKind::Increment { .. } => InstructionTag::Increment,
            InstructionKind::Type { .. } => InstructionTag::Type,
            InstructionKind::Field(_) => InstructionTag::Field,
            InstructionKind::Invoke(_) => InstructionTag::Invoke,
            InstructionKind::InvokeDynamic(_) => InstructionTag::InvokeDynamic,
            InstructionKind::Jump { .. } => InstructionTag::Jump,
            InstructionKind::Switch { .. } => InstructionTag::Switch,
            InstructionKind::Other(_) => InstructionTag::Other,
        }
    }

    /// Opcode of a real instruction; markers have none.
    pub(crate) fn opcode(&self) -> Option<u8> {
        match &self.kind {
            InstructionKind::Label | InstructionKind::LineNumber(_) => None,
            InstructionKind::Op(opcode) | InstructionKind::Other(opcode) => Some(*opcode),
            InstructionKind::IntPush { opcode, .. }
            | InstructionKind::Local { opcode, .. }
            | InstructionKind::Type { opcode, .. }
            | InstructionKind::Jump { opcode, .. }
            | InstructionKind::Switch { opcode, .. } => Some(*opcode),
            InstructionKind::Constant(Constant::Long(_) | Constant::Double(_)) => {
                Some(crate::opcodes::LDC2_W)
            }
            InstructionKind::Constant(_) => Some(crate::opcodes::LDC),
            InstructionKind::Increment { .. } => Some(crate::opcodes::IINC),
            InstructionKind::Field(site) => Some(site.opcode),
            InstructionKind::Invoke(call) => Some(match call.kind {
                CallKind::Virtual => crate::opcodes::INVOKEVIRTUAL,
                CallKind::Interface => crate::opcodes::INVOKEINTERFACE,
                CallKind::Special => crate::opcodes::INVOKESPECIAL,
                CallKind::Static => crate::opcodes::INVOKESTATIC,
            }),
            InstructionKind::InvokeDynamic(_) => Some(crate::opcodes::INVOKEDYNAMIC),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().map(crate::opcodes::name).unwrap_or("");
        match &self.kind {
            InstructionKind::Label => write!(f, "LABEL"),
            InstructionKind::LineNumber(line) => write!(f, "LINE\t{line}"),
            InstructionKind::Op(_) | InstructionKind::Other(_) => write!(f, "{name}"),
            InstructionKind::IntPush { value, .. } => write!(f, "{name}\t{value}"),
            InstructionKind::Constant(constant) => write!(f, "{name}\t{constant}"),
            InstructionKind::Local { index, .. } => write!(f, "{name}\t{index}"),
            InstructionKind::Increment { index, delta } => write!(f, "{name}\t{index} {delta}"),
            InstructionKind::Type { descriptor, .. } => write!(f, "{name}\t{descriptor}"),
            InstructionKind::Field(site) => write!(
                f,
                "{name}\t{}#{} {}",
                site.owner, site.name, site.descriptor
            ),
            InstructionKind::Invoke(call) => write!(
                f,
                "{name}\t{}#{} {}",
                call.owner, call.name, call.descriptor
            ),
            InstructionKind::InvokeDynamic(site) => {
                write!(f, "{name}\t{} {}", site.name, site.descriptor)?;
                if let Some(handle) = site.target_handle() {
                    write!(f, " -> {}#{}{}", handle.owner, handle.name, handle.descriptor)?;
                }
                Ok(())
            }
            InstructionKind::Jump { target, .. } => write!(f, "{name}\t@{target}"),
            InstructionKind::Switch { default, targets, .. } => {
                write!(f, "{name}\tdefault @{default} cases {targets:?}")
            }
        }
    }
}
