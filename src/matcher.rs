//! Instruction idiom matching.
//!
//! A [`Matcher`] tests one instruction; an [`InstructionScan`] applies a sequence of
//! matchers over a filtered window of a method body, forward or backward from an
//! anchor, and backtracks over optional elements.

use std::collections::HashSet;
use std::fmt::Write as _;

use tracing::trace;

use crate::error::{AnalysisError, Result};
use crate::ir::{Constant, Instruction, InstructionKind, InstructionTag};
use crate::opcodes;
use crate::repository::ClassRepository;

/// Constraint on the owner of a called method.
#[derive(Clone, Debug)]
pub(crate) enum OwnerFilter {
    Exact(String),
    /// The owner is, or extends, the given type.
    Extends(String),
}

#[derive(Clone, Debug)]
pub(crate) enum Matcher {
    Opcode {
        opcode: u8,
        optional: bool,
    },
    Kind {
        tag: InstructionTag,
        optional: bool,
    },
    Field {
        owner: Option<String>,
        name: Option<String>,
        descriptor: Option<String>,
        is_static: Option<bool>,
        optional: bool,
    },
    Method {
        owner: Option<OwnerFilter>,
        name: Option<String>,
        descriptor: Option<String>,
        optional: bool,
    },
    /// Any literal push (`iconst_*`, `bipush`, `ldc`, ...).
    Constant {
        optional: bool,
    },
    AnyOf {
        alternatives: Vec<Matcher>,
        optional: bool,
    },
}

impl Matcher {
    pub(crate) fn opcode(opcode: u8) -> Self {
        Matcher::Opcode {
            opcode,
            optional: false,
        }
    }

    pub(crate) fn kind(tag: InstructionTag) -> Self {
        Matcher::Kind {
            tag,
            optional: false,
        }
    }

    pub(crate) fn field(
        owner: Option<&str>,
        name: Option<&str>,
        descriptor: Option<&str>,
        is_static: Option<bool>,
    ) -> Self {
        Matcher::Field {
            owner: owner.map(str::to_string),
            name: name.map(str::to_string),
            descriptor: descriptor.map(str::to_string),
            is_static,
            optional: false,
        }
    }

    pub(crate) fn method(
        owner: Option<OwnerFilter>,
        name: Option<&str>,
        descriptor: Option<&str>,
    ) -> Self {
        Matcher::Method {
            owner,
            name: name.map(str::to_string),
            descriptor: descriptor.map(str::to_string),
            optional: false,
        }
    }

    pub(crate) fn constant() -> Self {
        Matcher::Constant { optional: false }
    }

    pub(crate) fn any_of(alternatives: Vec<Matcher>) -> Self {
        Matcher::AnyOf {
            alternatives,
            optional: false,
        }
    }

    pub(crate) fn optional(mut self) -> Self {
        match &mut self {
            Matcher::Opcode { optional, .. }
            | Matcher::Kind { optional, .. }
            | Matcher::Field { optional, .. }
            | Matcher::Method { optional, .. }
            | Matcher::Constant { optional }
            | Matcher::AnyOf { optional, .. } => *optional = true,
        }
        self
    }

    pub(crate) fn is_optional(&self) -> bool {
        match self {
            Matcher::Opcode { optional, .. }
            | Matcher::Kind { optional, .. }
            | Matcher::Field { optional, .. }
            | Matcher::Method { optional, .. }
            | Matcher::Constant { optional }
            | Matcher::AnyOf { optional, .. } => *optional,
        }
    }

    pub(crate) fn matches(
        &self,
        instruction: &Instruction,
        repository: &ClassRepository,
    ) -> Result<bool> {
        let matched = match self {
            Matcher::Opcode { opcode, .. } => instruction.opcode() == Some(*opcode),
            Matcher::Kind { tag, .. } => instruction.tag() == *tag,
            Matcher::Field {
                owner,
                name,
                descriptor,
                is_static,
                ..
            } => match &instruction.kind {
                InstructionKind::Field(site) => {
                    owner.as_ref().is_none_or(|owner| *owner == site.owner)
                        && name.as_ref().is_none_or(|name| *name == site.name)
                        && descriptor
                            .as_ref()
                            .is_none_or(|descriptor| *descriptor == site.descriptor)
                        && is_static.is_none_or(|is_static| is_static == site.is_static())
                }
                _ => false,
            },
            Matcher::Method {
                owner,
                name,
                descriptor,
                ..
            } => match &instruction.kind {
                InstructionKind::Invoke(call) => {
                    let owner_matches = match owner {
                        None => true,
                        Some(OwnerFilter::Exact(owner)) => *owner == call.owner,
                        Some(OwnerFilter::Extends(owner)) => {
                            repository.extends(&call.owner, owner)?
                        }
                    };
                    owner_matches
                        && name.as_ref().is_none_or(|name| *name == call.name)
                        && descriptor
                            .as_ref()
                            .is_none_or(|descriptor| *descriptor == call.descriptor)
                }
                _ => false,
            },
            Matcher::Constant { .. } => constant_value(instruction).is_some(),
            Matcher::AnyOf { alternatives, .. } => {
                for alternative in alternatives {
                    if alternative.matches(instruction, repository)? {
                        return Ok(true);
                    }
                }
                false
            }
        };
        Ok(matched)
    }
}

/// Literal pushed by an instruction, normalized across the short forms.
pub(crate) fn constant_value(instruction: &Instruction) -> Option<Constant> {
    match &instruction.kind {
        InstructionKind::Op(opcode) => match *opcode {
            opcodes::ICONST_M1..=opcodes::ICONST_5 => {
                Some(Constant::Int(*opcode as i32 - opcodes::ICONST_0 as i32))
            }
            opcodes::LCONST_0 | opcodes::LCONST_1 => {
                Some(Constant::Long((*opcode - opcodes::LCONST_0) as i64))
            }
            opcodes::FCONST_0..=opcodes::FCONST_2 => {
                Some(Constant::Float((*opcode - opcodes::FCONST_0) as f32))
            }
            opcodes::DCONST_0 | opcodes::DCONST_1 => {
                Some(Constant::Double((*opcode - opcodes::DCONST_0) as f64))
            }
            _ => None,
        },
        InstructionKind::IntPush { value, .. } => Some(Constant::Int(*value)),
        InstructionKind::Constant(constant) => Some(constant.clone()),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Direction {
    Forward,
    Backward,
}

/// A window over one method body in which idioms are searched.
pub(crate) struct InstructionScan<'a> {
    repository: &'a ClassRepository,
    location: &'a str,
    instructions: &'a [Instruction],
    start: usize,
    end: usize,
    direction: Direction,
    ignored: HashSet<InstructionTag>,
    anchored: bool,
}

impl<'a> InstructionScan<'a> {
    fn with_range(
        repository: &'a ClassRepository,
        location: &'a str,
        instructions: &'a [Instruction],
        start: usize,
        end: usize,
        direction: Direction,
    ) -> Self {
        Self {
            repository,
            location,
            instructions,
            start,
            end: end.min(instructions.len()),
            direction,
            ignored: HashSet::from([InstructionTag::Label, InstructionTag::LineNumber]),
            anchored: false,
        }
    }

    /// Scan the whole method front to back.
    pub(crate) fn forward(
        repository: &'a ClassRepository,
        location: &'a str,
        instructions: &'a [Instruction],
    ) -> Self {
        Self::with_range(
            repository,
            location,
            instructions,
            0,
            instructions.len(),
            Direction::Forward,
        )
    }

    /// Scan from the instruction before `anchor` towards the start of the method.
    pub(crate) fn backward_from(
        repository: &'a ClassRepository,
        location: &'a str,
        instructions: &'a [Instruction],
        anchor: usize,
    ) -> Self {
        Self::with_range(
            repository,
            location,
            instructions,
            0,
            anchor,
            Direction::Backward,
        )
    }

    /// Only try the first position of the window.
    pub(crate) fn anchored(mut self) -> Self {
        self.anchored = true;
        self
    }

    fn window(&self) -> Vec<&'a Instruction> {
        let range = self.instructions[self.start..self.end]
            .iter()
            .filter(|instruction| !self.ignored.contains(&instruction.tag()));
        match self.direction {
            Direction::Forward => range.collect(),
            Direction::Backward => range.rev().collect(),
        }
    }

    /// Match `idiom`, written in program order, and return one capture per matcher
    /// (`None` for declined optionals), also in program order.
    pub(crate) fn find(&self, idiom: &[Matcher]) -> Result<Option<Vec<Option<&'a Instruction>>>> {
        let window = self.window();
        let matchers: Vec<&Matcher> = match self.direction {
            Direction::Forward => idiom.iter().collect(),
            Direction::Backward => idiom.iter().rev().collect(),
        };
        let positions = if self.anchored {
            0..1
        } else {
            0..window.len() + 1
        };

        for position in positions {
            let mut captures = Vec::with_capacity(matchers.len());
            if self.match_at(&matchers, &window, position, &mut captures)? {
                trace!(location = self.location, position, "idiom matched");
                if self.direction == Direction::Backward {
                    captures.reverse();
                }
                return Ok(Some(captures));
            }
        }
        Ok(None)
    }

    /// Like [`InstructionScan::find`], failing with a dump when nothing matches.
    pub(crate) fn match_idiom(
        &self,
        idiom_name: &'static str,
        idiom: &[Matcher],
    ) -> Result<Vec<Option<&'a Instruction>>> {
        self.find(idiom)?
            .ok_or_else(|| AnalysisError::IdiomNotMatched {
                idiom: idiom_name,
                location: self.location.to_string(),
                dump: self.dump(),
            })
    }

    fn match_at(
        &self,
        matchers: &[&Matcher],
        window: &[&'a Instruction],
        position: usize,
        captures: &mut Vec<Option<&'a Instruction>>,
    ) -> Result<bool> {
        let Some((matcher, rest)) = matchers.split_first() else {
            return Ok(true);
        };
        if let Some(instruction) = window.get(position) {
            if matcher.matches(instruction, self.repository)? {
                captures.push(Some(*instruction));
                if self.match_at(rest, window, position + 1, captures)? {
                    return Ok(true);
                }
                captures.pop();
            }
        }
        if matcher.is_optional() {
            captures.push(None);
            if self.match_at(rest, window, position, captures)? {
                return Ok(true);
            }
            captures.pop();
        }
        Ok(false)
    }

    /// Scanned instructions in program order, one per line.
    pub(crate) fn dump(&self) -> String {
        let mut dump = String::from("[\n");
        for (index, instruction) in self.instructions[self.start..self.end]
            .iter()
            .enumerate()
            .filter(|(_, instruction)| !self.ignored.contains(&instruction.tag()))
        {
            let _ = writeln!(dump, "{:>5}\t{instruction}", self.start + index);
        }
        dump.push(']');
        dump
    }
}
