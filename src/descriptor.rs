//! Parsing of JVM type descriptors (`Ljava/util/List;`, `(IJ)V`) and generic
//! signatures (`Ljava/util/List<TT;>;`). One cursor serves both grammars because
//! signatures are a superset of descriptors.

use crate::error::{AnalysisError, Result};

/// Erased field type as written in a descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    pub(crate) fn descriptor(&self) -> String {
        match self {
            FieldType::Byte => "B".to_string(),
            FieldType::Char => "C".to_string(),
            FieldType::Double => "D".to_string(),
            FieldType::Float => "F".to_string(),
            FieldType::Int => "I".to_string(),
            FieldType::Long => "J".to_string(),
            FieldType::Short => "S".to_string(),
            FieldType::Boolean => "Z".to_string(),
            FieldType::Object(name) => format!("L{name};"),
            FieldType::Array(component) => format!("[{}", component.descriptor()),
        }
    }

    pub(crate) fn class_name(&self) -> Option<&str> {
        match self {
            FieldType::Object(name) => Some(name),
            _ => None,
        }
    }

    /// Number of local variable slots a value of this type occupies.
    pub(crate) fn slot_size(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodDescriptor {
    pub(crate) parameters: Vec<FieldType>,
    /// `None` for `void`.
    pub(crate) return_type: Option<FieldType>,
}

/// Generic type as written in a `Signature` attribute.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TypeSignature {
    Base(FieldType),
    Class {
        name: String,
        arguments: Vec<TypeArgument>,
    },
    TypeVariable(String),
    Array(Box<TypeSignature>),
}

impl From<&FieldType> for TypeSignature {
    /// Signature form of an erased descriptor type, without generic arguments.
    fn from(field_type: &FieldType) -> Self {
        match field_type {
            FieldType::Object(name) => TypeSignature::Class {
                name: name.clone(),
                arguments: Vec::new(),
            },
            FieldType::Array(component) => {
                TypeSignature::Array(Box::new(TypeSignature::from(component.as_ref())))
            }
            base => TypeSignature::Base(base.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TypeArgument {
    Wildcard,
    Exact(TypeSignature),
    Extends(TypeSignature),
    Super(TypeSignature),
}

impl TypeArgument {
    /// The concrete type an argument pins down, if any.
    pub(crate) fn bound(&self) -> Option<&TypeSignature> {
        match self {
            TypeArgument::Exact(signature) | TypeArgument::Extends(signature) => Some(signature),
            TypeArgument::Wildcard | TypeArgument::Super(_) => None,
        }
    }
}

pub(crate) fn parse_field_descriptor(descriptor: &str) -> Result<FieldType> {
    let mut cursor = Cursor::new(descriptor);
    let field_type = cursor.field_type()?;
    cursor.finish()?;
    Ok(field_type)
}

pub(crate) fn parse_method_descriptor(descriptor: &str) -> Result<MethodDescriptor> {
    let mut cursor = Cursor::new(descriptor);
    cursor.expect(b'(')?;
    let mut parameters = Vec::new();
    while cursor.peek() != Some(b')') {
        parameters.push(cursor.field_type()?);
    }
    cursor.expect(b')')?;
    let return_type = if cursor.peek() == Some(b'V') {
        cursor.next();
        None
    } else {
        Some(cursor.field_type()?)
    };
    cursor.finish()?;
    Ok(MethodDescriptor {
        parameters,
        return_type,
    })
}

/// Internal name referenced by an object descriptor (`Lcom/acme/Foo;` -> `com/acme/Foo`).
pub(crate) fn class_name_of(descriptor: &str) -> Result<&str> {
    descriptor
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AnalysisError::Descriptor {
            descriptor: descriptor.to_string(),
            reason: "not a class descriptor".to_string(),
        })
}

pub(crate) fn parse_type_signature(signature: &str) -> Result<TypeSignature> {
    let mut cursor = Cursor::new(signature);
    let parsed = cursor.type_signature()?;
    cursor.finish()?;
    Ok(parsed)
}

/// Names of the formal type parameters declared by a class signature, in order.
pub(crate) fn parse_type_parameters(class_signature: &str) -> Result<Vec<String>> {
    Cursor::new(class_signature).type_parameters()
}

/// Generic parameter and return types from a method `Signature` attribute.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct MethodSignature {
    pub(crate) parameters: Vec<TypeSignature>,
    /// `None` for `void`.
    pub(crate) return_type: Option<TypeSignature>,
}

pub(crate) fn parse_method_signature(method_signature: &str) -> Result<MethodSignature> {
    let mut cursor = Cursor::new(method_signature);
    cursor.type_parameters()?;
    cursor.expect(b'(')?;
    let mut parameters = Vec::new();
    while cursor.peek() != Some(b')') {
        parameters.push(cursor.type_signature()?);
    }
    cursor.expect(b')')?;
    let return_type = if cursor.peek() == Some(b'V') {
        cursor.next();
        None
    } else {
        Some(cursor.type_signature()?)
    };
    // Throws clauses (`^Ljava/io/IOException;`) follow and carry nothing we use.
    Ok(MethodSignature {
        parameters,
        return_type,
    })
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn expect(&mut self, wanted: u8) -> Result<()> {
        match self.next() {
            Some(byte) if byte == wanted => Ok(()),
            _ => Err(self.error(format!("expected '{}' at {}", wanted as char, self.pos))),
        }
    }

    fn finish(&self) -> Result<()> {
        if self.pos == self.text.len() {
            Ok(())
        } else {
            Err(self.error(format!("trailing input at {}", self.pos)))
        }
    }

    fn error(&self, reason: String) -> AnalysisError {
        AnalysisError::Descriptor {
            descriptor: self.text.to_string(),
            reason,
        }
    }

    fn take_until(&mut self, stop: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if stop(byte) {
                break;
            }
            self.pos += 1;
        }
        &self.text[start..self.pos]
    }

    fn base_type(byte: u8) -> Option<FieldType> {
        Some(match byte {
            b'B' => FieldType::Byte,
            b'C' => FieldType::Char,
            b'D' => FieldType::Double,
            b'F' => FieldType::Float,
            b'I' => FieldType::Int,
            b'J' => FieldType::Long,
            b'S' => FieldType::Short,
            b'Z' => FieldType::Boolean,
            _ => return None,
        })
    }

    fn field_type(&mut self) -> Result<FieldType> {
        match self.next() {
            Some(b'L') => {
                let name = self.take_until(|byte| byte == b';');
                self.expect(b';')?;
                if name.is_empty() {
                    return Err(self.error("empty class name".to_string()));
                }
                Ok(FieldType::Object(name.to_string()))
            }
            Some(b'[') => Ok(FieldType::Array(Box::new(self.field_type()?))),
            Some(byte) => Self::base_type(byte)
                .ok_or_else(|| self.error(format!("unexpected '{}'", byte as char))),
            None => Err(self.error("unexpected end".to_string())),
        }
    }

    fn type_signature(&mut self) -> Result<TypeSignature> {
        match self.peek() {
            Some(b'L') => self.class_type_signature(),
            Some(b'T') => {
                self.next();
                let name = self.take_until(|byte| byte == b';');
                self.expect(b';')?;
                Ok(TypeSignature::TypeVariable(name.to_string()))
            }
            Some(b'[') => {
                self.next();
                Ok(TypeSignature::Array(Box::new(self.type_signature()?)))
            }
            Some(byte) => {
                self.next();
                Self::base_type(byte)
                    .map(TypeSignature::Base)
                    .ok_or_else(|| self.error(format!("unexpected '{}'", byte as char)))
            }
            None => Err(self.error("unexpected end".to_string())),
        }
    }

    fn class_type_signature(&mut self) -> Result<TypeSignature> {
        self.expect(b'L')?;
        let mut name = String::new();
        let mut arguments = Vec::new();
        loop {
            name.push_str(self.take_until(|byte| matches!(byte, b'<' | b';' | b'.')));
            match self.next() {
                Some(b'<') => {
                    // Inner classes of a parameterized outer class keep the innermost arguments.
                    arguments = self.type_arguments()?;
                    match self.next() {
                        Some(b';') => break,
                        Some(b'.') => name.push('$'),
                        _ => return Err(self.error("unterminated class signature".to_string())),
                    }
                }
                Some(b'.') => name.push('$'),
                Some(b';') => break,
                _ => return Err(self.error("unterminated class signature".to_string())),
            }
        }
        Ok(TypeSignature::Class { name, arguments })
    }

    fn type_arguments(&mut self) -> Result<Vec<TypeArgument>> {
        let mut arguments = Vec::new();
        loop {
            let argument = match self.peek() {
                Some(b'>') => {
                    self.next();
                    return Ok(arguments);
                }
                Some(b'*') => {
                    self.next();
                    TypeArgument::Wildcard
                }
                Some(b'+') => {
                    self.next();
                    TypeArgument::Extends(self.type_signature()?)
                }
                Some(b'-') => {
                    self.next();
                    TypeArgument::Super(self.type_signature()?)
                }
                Some(_) => TypeArgument::Exact(self.type_signature()?),
                None => return Err(self.error("unterminated type arguments".to_string())),
            };
            arguments.push(argument);
        }
    }

    fn type_parameters(&mut self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if self.peek() != Some(b'<') {
            return Ok(names);
        }
        self.next();
        while self.peek() != Some(b'>') {
            let name = self.take_until(|byte| byte == b':');
            if name.is_empty() {
                return Err(self.error("empty type parameter".to_string()));
            }
            self.expect(b':')?;
            if matches!(self.peek(), Some(b'L' | b'T' | b'[')) {
                self.type_signature()?;
            }
            while self.peek() == Some(b':') {
                self.next();
                self.type_signature()?;
            }
            names.push(name.to_string());
        }
        self.expect(b'>')?;
        Ok(names)
    }
}
