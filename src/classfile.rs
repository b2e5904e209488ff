//! Conversion of parsed JVM class files into the crate's IR.
//!
//! `jclassfile` parses the container (constant pool, members, attributes); this module
//! resolves the pool references the analysis needs and decodes each `Code` attribute
//! into instructions with synthesized label and line markers.

use std::collections::{BTreeMap, BTreeSet};

use jclassfile::attributes::{
    Annotation as RawAnnotation, Attribute, BootstrapMethodRecord, ElementValue as RawElementValue,
    ExceptionRecord,
};
use jclassfile::class_file::{self, ClassFile, ClassFlags};
use jclassfile::constant_pool::ConstantPool;
use jclassfile::fields::{FieldFlags, FieldInfo};
use jclassfile::methods::{MethodFlags, MethodInfo};

use crate::error::{AnalysisError, Result};
use crate::ir::{
    Annotation, CallKind, CallSite, Class, ClassAccess, Constant, DynamicCallSite,
    ElementValue, Field, FieldAccess, FieldAccessSite, Instruction, InstructionKind,
    LocalVariable, Method, MethodAccess, MethodHandle,
};
use crate::opcodes;

/// Parse and convert one class file.
pub(crate) fn decode(name: &str, data: &[u8]) -> Result<Class> {
    let class_file = class_file::parse(data).map_err(|error| AnalysisError::Decode {
        name: name.to_string(),
        reason: error.to_string(),
    })?;
    convert(name, &class_file)
}

fn convert(name: &str, class_file: &ClassFile) -> Result<Class> {
    let pool = Pool {
        name,
        entries: class_file.constant_pool(),
    };

    let super_name = match class_file.super_class() {
        0 => None,
        index => Some(pool.class_name(index)?.to_string()),
    };
    let interfaces = class_file
        .interfaces()
        .iter()
        .map(|index| pool.class_name(*index).map(str::to_string))
        .collect::<Result<Vec<_>>>()?;

    let mut signature = None;
    let mut annotations = Vec::new();
    let mut bootstrap_methods: &[BootstrapMethodRecord] = &[];
    for attribute in class_file.attributes() {
        match attribute {
            Attribute::Signature { signature_index } => {
                signature = Some(pool.utf8(*signature_index)?.to_string());
            }
            Attribute::RuntimeVisibleAnnotations {
                annotations: raw, ..
            } => annotations = pool.annotations(raw)?,
            Attribute::BootstrapMethods {
                bootstrap_methods: records,
            } => bootstrap_methods = records,
            _ => {}
        }
    }

    let fields = class_file
        .fields()
        .iter()
        .map(|field| convert_field(&pool, field))
        .collect::<Result<Vec<_>>>()?;
    let methods = class_file
        .methods()
        .iter()
        .map(|method| convert_method(&pool, bootstrap_methods, method))
        .collect::<Result<Vec<_>>>()?;

    let flags = class_file.access_flags();
    Ok(Class {
        name: pool.class_name(class_file.this_class())?.to_string(),
        super_name,
        interfaces,
        access: ClassAccess {
            is_interface: flags.contains(ClassFlags::ACC_INTERFACE),
            is_abstract: flags.contains(ClassFlags::ACC_ABSTRACT),
            is_enum: flags.contains(ClassFlags::ACC_ENUM),
        },
        signature,
        annotations,
        fields,
        methods,
    })
}

fn convert_field(pool: &Pool, field: &FieldInfo) -> Result<Field> {
    let mut signature = None;
    let mut annotations = Vec::new();
    for attribute in field.attributes() {
        match attribute {
            Attribute::Signature { signature_index } => {
                signature = Some(pool.utf8(*signature_index)?.to_string());
            }
            Attribute::RuntimeVisibleAnnotations {
                annotations: raw, ..
            } => annotations = pool.annotations(raw)?,
            _ => {}
        }
    }
    let flags = field.access_flags();
    Ok(Field {
        name: pool.utf8(field.name_index())?.to_string(),
        descriptor: pool.utf8(field.descriptor_index())?.to_string(),
        access: FieldAccess {
            is_static: flags.contains(FieldFlags::ACC_STATIC),
            is_enum: flags.contains(FieldFlags::ACC_ENUM),
            is_synthetic: flags.contains(FieldFlags::ACC_SYNTHETIC),
        },
        signature,
        annotations,
    })
}

fn convert_method(
    pool: &Pool,
    bootstrap_methods: &[BootstrapMethodRecord],
    method: &MethodInfo,
) -> Result<Method> {
    let flags = method.access_flags();
    let mut converted = Method {
        name: pool.utf8(method.name_index())?.to_string(),
        descriptor: pool.utf8(method.descriptor_index())?.to_string(),
        access: MethodAccess {
            is_public: flags.contains(MethodFlags::ACC_PUBLIC),
            is_static: flags.contains(MethodFlags::ACC_STATIC),
            is_abstract: flags.contains(MethodFlags::ACC_ABSTRACT),
            is_synthetic: flags.contains(MethodFlags::ACC_SYNTHETIC),
            is_bridge: flags.contains(MethodFlags::ACC_BRIDGE),
        },
        signature: None,
        annotations: Vec::new(),
        parameter_annotations: Vec::new(),
        parameter_names: Vec::new(),
        local_variables: Vec::new(),
        instructions: Vec::new(),
    };
    for attribute in method.attributes() {
        match attribute {
            Attribute::Code {
                code,
                exception_table,
                attributes,
                ..
            } => {
                let body = CodeBody::new(pool, code, exception_table, attributes)?;
                converted.instructions = decode_code(pool, bootstrap_methods, &body)?;
                converted.local_variables = body.local_variables;
            }
            Attribute::Signature { signature_index } => {
                converted.signature = Some(pool.utf8(*signature_index)?.to_string());
            }
            Attribute::RuntimeVisibleAnnotations {
                annotations: raw, ..
            } => converted.annotations = pool.annotations(raw)?,
            Attribute::RuntimeVisibleParameterAnnotations {
                parameter_annotations,
            } => {
                converted.parameter_annotations = parameter_annotations
                    .iter()
                    .map(|raw| pool.annotations(raw))
                    .collect::<Result<Vec<_>>>()?;
            }
            Attribute::MethodParameters { parameters } => {
                converted.parameter_names = parameters
                    .iter()
                    .map(|parameter| match parameter.name_index() {
                        0 => Ok(None),
                        index => pool.utf8(index).map(|name| Some(name.to_string())),
                    })
                    .collect::<Result<Vec<_>>>()?;
            }
            _ => {}
        }
    }
    Ok(converted)
}

/// Resolved view of a `Code` attribute.
struct CodeBody<'a> {
    code: &'a [u8],
    handler_pcs: Vec<u32>,
    lines: BTreeMap<u32, u16>,
    local_variables: Vec<LocalVariable>,
}

impl<'a> CodeBody<'a> {
    fn new(
        pool: &Pool,
        code: &'a [u8],
        exception_table: &[ExceptionRecord],
        attributes: &[Attribute],
    ) -> Result<Self> {
        let mut body = Self {
            code,
            handler_pcs: exception_table
                .iter()
                .map(|record| record.handler_pc() as u32)
                .collect(),
            lines: BTreeMap::new(),
            local_variables: Vec::new(),
        };
        for attribute in attributes {
            match attribute {
                Attribute::LineNumberTable { line_number_table } => {
                    for record in line_number_table {
                        body.lines
                            .entry(record.start_pc() as u32)
                            .or_insert(record.line_number());
                    }
                }
                Attribute::LocalVariableTable {
                    local_variable_table,
                } => {
                    for record in local_variable_table {
                        body.local_variables.push(LocalVariable {
                            name: pool.utf8(record.name_index())?.to_string(),
                            descriptor: pool.utf8(record.descriptor_index())?.to_string(),
                            index: record.index(),
                            start_pc: record.start_pc() as u32,
                            length: record.length() as u32,
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(body)
    }
}

/// Constant pool of one class, resolving indices into the shapes the IR uses.
struct Pool<'a> {
    name: &'a str,
    entries: &'a [ConstantPool],
}

impl Pool<'_> {
    fn malformed(&self, index: u16, expected: &str) -> AnalysisError {
        AnalysisError::Decode {
            name: self.name.to_string(),
            reason: format!("constant pool entry {index} is not a {expected}"),
        }
    }

    fn entry(&self, index: u16) -> Option<&ConstantPool> {
        self.entries.get(index as usize)
    }

    fn utf8(&self, index: u16) -> Result<&str> {
        match self.entry(index) {
            Some(ConstantPool::Utf8 { value }) => Ok(value),
            _ => Err(self.malformed(index, "utf8")),
        }
    }

    fn class_name(&self, index: u16) -> Result<&str> {
        match self.entry(index) {
            Some(ConstantPool::Class { name_index }) => self.utf8(*name_index),
            _ => Err(self.malformed(index, "class")),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.entry(index) {
            Some(ConstantPool::NameAndType {
                name_index,
                descriptor_index,
            }) => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(self.malformed(index, "name and type")),
        }
    }

    /// Owner, name and descriptor of a field or method reference.
    fn member(&self, index: u16) -> Result<(String, String, String)> {
        match self.entry(index) {
            Some(
                ConstantPool::Fieldref {
                    class_index,
                    name_and_type_index,
                }
                | ConstantPool::Methodref {
                    class_index,
                    name_and_type_index,
                }
                | ConstantPool::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                },
            ) => {
                let (name, descriptor) = self.name_and_type(*name_and_type_index)?;
                Ok((
                    self.class_name(*class_index)?.to_string(),
                    name.to_string(),
                    descriptor.to_string(),
                ))
            }
            _ => Err(self.malformed(index, "member reference")),
        }
    }

    fn method_handle(&self, index: u16) -> Result<MethodHandle> {
        match self.entry(index) {
            Some(ConstantPool::MethodHandle {
                reference_kind,
                reference_index,
            }) => {
                let (owner, name, descriptor) = self.member(*reference_index)?;
                Ok(MethodHandle {
                    kind: *reference_kind,
                    owner,
                    name,
                    descriptor,
                })
            }
            _ => Err(self.malformed(index, "method handle")),
        }
    }

    fn constant(&self, index: u16) -> Result<Constant> {
        Ok(match self.entry(index) {
            Some(ConstantPool::Integer { value }) => Constant::Int(*value),
            Some(ConstantPool::Float { value }) => Constant::Float(*value),
            Some(ConstantPool::Long { value }) => Constant::Long(*value),
            Some(ConstantPool::Double { value }) => Constant::Double(*value),
            Some(ConstantPool::String { string_index }) => {
                Constant::String(self.utf8(*string_index)?.to_string())
            }
            Some(ConstantPool::Class { name_index }) => {
                Constant::Class(self.utf8(*name_index)?.to_string())
            }
            Some(ConstantPool::MethodType { descriptor_index }) => {
                Constant::MethodType(self.utf8(*descriptor_index)?.to_string())
            }
            Some(ConstantPool::MethodHandle { .. }) => {
                Constant::MethodHandle(self.method_handle(index)?)
            }
            _ => return Err(self.malformed(index, "loadable constant")),
        })
    }

    /// Bootstrap method index, name and descriptor of an `invokedynamic` entry.
    fn dynamic(&self, index: u16) -> Result<(u16, &str, &str)> {
        match self.entry(index) {
            Some(
                ConstantPool::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                }
                | ConstantPool::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                },
            ) => {
                let (name, descriptor) = self.name_and_type(*name_and_type_index)?;
                Ok((*bootstrap_method_attr_index, name, descriptor))
            }
            _ => Err(self.malformed(index, "invokedynamic")),
        }
    }

    fn annotations(&self, raw: &[RawAnnotation]) -> Result<Vec<Annotation>> {
        raw.iter().map(|annotation| self.annotation(annotation)).collect()
    }

    fn annotation(&self, raw: &RawAnnotation) -> Result<Annotation> {
        let values = raw
            .element_value_pairs()
            .iter()
            .map(|pair| {
                Ok((
                    self.utf8(pair.element_name_index())?.to_string(),
                    self.element_value(pair.value())?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Annotation {
            descriptor: self.utf8(raw.type_index())?.to_string(),
            values,
        })
    }

    fn element_value(&self, raw: &RawElementValue) -> Result<ElementValue> {
        Ok(match raw {
            RawElementValue::ConstValueIndex {
                tag: b's',
                const_value_index,
            } => ElementValue::Const(Constant::String(
                self.utf8(*const_value_index)?.to_string(),
            )),
            RawElementValue::ConstValueIndex {
                const_value_index, ..
            } => ElementValue::Const(self.constant(*const_value_index)?),
            RawElementValue::EnumConstValue {
                type_name_index,
                const_name_index,
                ..
            } => ElementValue::Enum {
                descriptor: self.utf8(*type_name_index)?.to_string(),
                name: self.utf8(*const_name_index)?.to_string(),
            },
            RawElementValue::ClassInfoIndex {
                class_info_index, ..
            } => ElementValue::Class(self.utf8(*class_info_index)?.to_string()),
            RawElementValue::AnnotationValue {
                annotation_value, ..
            } => ElementValue::Annotation(self.annotation(annotation_value)?),
            RawElementValue::ArrayValue { values, .. } => ElementValue::Array(
                values
                    .iter()
                    .map(|value| self.element_value(value))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }
}

fn decode_code(
    pool: &Pool,
    bootstrap_methods: &[BootstrapMethodRecord],
    raw: &CodeBody,
) -> Result<Vec<Instruction>> {
    let code = raw.code;
    let malformed = |pc: usize, reason: &str| AnalysisError::Decode {
        name: pool.name.to_string(),
        reason: format!("{reason} at bytecode offset {pc}"),
    };

    let mut decoded = Vec::new();
    let mut labels: BTreeSet<u32> = raw.handler_pcs.iter().copied().collect();
    let mut pc = 0usize;
    while pc < code.len() {
        let opcode = code[pc];
        let (kind, length) = match opcode {
            opcodes::BIPUSH => (
                InstructionKind::IntPush {
                    opcode,
                    value: read_u8(code, pc + 1)? as i8 as i32,
                },
                2,
            ),
            opcodes::SIPUSH => (
                InstructionKind::IntPush {
                    opcode,
                    value: read_i16(code, pc + 1)? as i32,
                },
                3,
            ),
            opcodes::LDC => (
                InstructionKind::Constant(pool.constant(read_u8(code, pc + 1)? as u16)?),
                2,
            ),
            opcodes::LDC_W | opcodes::LDC2_W => (
                InstructionKind::Constant(pool.constant(read_u16(code, pc + 1)?)?),
                3,
            ),
            opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => (
                InstructionKind::Local {
                    opcode,
                    index: read_u8(code, pc + 1)? as u16,
                },
                2,
            ),
            opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                let shift = opcode - opcodes::ILOAD_0;
                (
                    InstructionKind::Local {
                        opcode: opcodes::ILOAD + shift / 4,
                        index: (shift % 4) as u16,
                    },
                    1,
                )
            }
            opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                let shift = opcode - opcodes::ISTORE_0;
                (
                    InstructionKind::Local {
                        opcode: opcodes::ISTORE + shift / 4,
                        index: (shift % 4) as u16,
                    },
                    1,
                )
            }
            opcodes::IINC => (
                InstructionKind::Increment {
                    index: read_u8(code, pc + 1)? as u16,
                    delta: read_u8(code, pc + 2)? as i8 as i16,
                },
                3,
            ),
            opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
                let target = branch_target(pc, read_i16(code, pc + 1)? as i32);
                labels.insert(target);
                (InstructionKind::Jump { opcode, target }, 3)
            }
            opcodes::GOTO_W | opcodes::JSR_W => {
                let target = branch_target(pc, read_i32(code, pc + 1)?);
                labels.insert(target);
                (InstructionKind::Jump { opcode, target }, 5)
            }
            opcodes::TABLESWITCH => {
                let base = pc + 1 + padding(pc);
                let default = branch_target(pc, read_i32(code, base)?);
                let low = read_i32(code, base + 4)?;
                let high = read_i32(code, base + 8)?;
                let count = high
                    .checked_sub(low)
                    .and_then(|value| value.checked_add(1))
                    .filter(|value| *value >= 0)
                    .ok_or_else(|| malformed(pc, "invalid tableswitch range"))?
                    as usize;
                let mut targets = Vec::with_capacity(count);
                for case in 0..count {
                    targets.push(branch_target(pc, read_i32(code, base + 12 + case * 4)?));
                }
                labels.insert(default);
                labels.extend(targets.iter().copied());
                (
                    InstructionKind::Switch {
                        opcode,
                        default,
                        targets,
                    },
                    base + 12 + count * 4 - pc,
                )
            }
            opcodes::LOOKUPSWITCH => {
                let base = pc + 1 + padding(pc);
                let default = branch_target(pc, read_i32(code, base)?);
                let pairs = read_i32(code, base + 4)?;
                if pairs < 0 {
                    return Err(malformed(pc, "invalid lookupswitch size"));
                }
                let pairs = pairs as usize;
                let mut targets = Vec::with_capacity(pairs);
                for pair in 0..pairs {
                    targets.push(branch_target(pc, read_i32(code, base + 12 + pair * 8)?));
                }
                labels.insert(default);
                labels.extend(targets.iter().copied());
                (
                    InstructionKind::Switch {
                        opcode,
                        default,
                        targets,
                    },
                    base + 8 + pairs * 8 - pc,
                )
            }
            opcodes::GETSTATIC..=opcodes::PUTFIELD => {
                let (owner, member, descriptor) = pool.member(read_u16(code, pc + 1)?)?;
                (
                    InstructionKind::Field(FieldAccessSite {
                        opcode,
                        owner,
                        name: member,
                        descriptor,
                    }),
                    3,
                )
            }
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
                let (owner, member, descriptor) = pool.member(read_u16(code, pc + 1)?)?;
                let (kind, length) = match opcode {
                    opcodes::INVOKEVIRTUAL => (CallKind::Virtual, 3),
                    opcodes::INVOKESPECIAL => (CallKind::Special, 3),
                    opcodes::INVOKESTATIC => (CallKind::Static, 3),
                    _ => (CallKind::Interface, 5),
                };
                (
                    InstructionKind::Invoke(CallSite {
                        owner,
                        name: member,
                        descriptor,
                        kind,
                    }),
                    length,
                )
            }
            opcodes::INVOKEDYNAMIC => {
                let (bootstrap_index, member, descriptor) =
                    pool.dynamic(read_u16(code, pc + 1)?)?;
                let bootstrap = bootstrap_methods
                    .get(bootstrap_index as usize)
                    .ok_or_else(|| malformed(pc, "missing bootstrap method"))?;
                let arguments = bootstrap
                    .bootstrap_arguments()
                    .iter()
                    .map(|argument| pool.constant(*argument))
                    .collect::<Result<Vec<_>>>()?;
                (
                    InstructionKind::InvokeDynamic(DynamicCallSite {
                        name: member.to_string(),
                        descriptor: descriptor.to_string(),
                        arguments,
                    }),
                    5,
                )
            }
            opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => (
                InstructionKind::Type {
                    opcode,
                    descriptor: pool.class_name(read_u16(code, pc + 1)?)?.to_string(),
                },
                3,
            ),
            opcodes::MULTIANEWARRAY => (
                InstructionKind::Type {
                    opcode,
                    descriptor: pool.class_name(read_u16(code, pc + 1)?)?.to_string(),
                },
                4,
            ),
            opcodes::NEWARRAY => (InstructionKind::Other(opcode), 2),
            opcodes::WIDE => {
                let widened = read_u8(code, pc + 1)?;
                let index = read_u16(code, pc + 2)?;
                if widened == opcodes::IINC {
                    (
                        InstructionKind::Increment {
                            index,
                            delta: read_i16(code, pc + 4)?,
                        },
                        6,
                    )
                } else {
                    (
                        InstructionKind::Local {
                            opcode: widened,
                            index,
                        },
                        4,
                    )
                }
            }
            0x00..=0x0f | 0x2e..=0x35 | 0x4f..=0x83 | 0x85..=0x98 | 0xac..=0xb1 | 0xbe | 0xbf
            | 0xc2 | 0xc3 => (InstructionKind::Op(opcode), 1),
            _ => return Err(malformed(pc, &format!("unknown opcode 0x{opcode:02x}"))),
        };
        decoded.push(Instruction {
            offset: pc as u32,
            kind,
        });
        pc += length;
    }

    let mut instructions = Vec::with_capacity(decoded.len() + labels.len() + raw.lines.len());
    for instruction in decoded {
        if labels.contains(&instruction.offset) {
            instructions.push(Instruction {
                offset: instruction.offset,
                kind: InstructionKind::Label,
            });
        }
        if let Some(line) = raw.lines.get(&instruction.offset) {
            instructions.push(Instruction {
                offset: instruction.offset,
                kind: InstructionKind::LineNumber(*line),
            });
        }
        instructions.push(instruction);
    }
    Ok(instructions)
}

fn branch_target(pc: usize, relative: i32) -> u32 {
    (pc as i64 + relative as i64) as u32
}

/// Alignment bytes between a switch opcode and its 4-byte aligned operands.
fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn operand(code: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    code.get(offset..offset + len)
        .ok_or_else(|| AnalysisError::Decode {
            name: "<bytecode>".to_string(),
            reason: format!("operand out of bounds at offset {offset}"),
        })
}

fn read_u8(code: &[u8], offset: usize) -> Result<u8> {
    Ok(operand(code, offset, 1)?[0])
}

fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let bytes = operand(code, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    Ok(read_u16(code, offset)? as i16)
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let bytes = operand(code, offset, 4)?;
    Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
