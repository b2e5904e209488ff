//! Recursive call-graph traversal from an endpoint method, collecting the exception
//! types it may throw and the validation rules it builds.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, trace};

use crate::config::MarkerConfig;
use crate::descriptor::{FieldType, parse_field_descriptor, parse_method_descriptor};
use crate::error::{AnalysisError, Result};
use crate::ir::{
    CallKind, CallSite, Class, FieldAccessSite, Instruction, InstructionKind, InstructionTag,
    Method, MethodHandle,
};
use crate::matcher::{InstructionScan, Matcher, OwnerFilter};
use crate::opcodes;
use crate::repository::{ClassRecord, ClassRepository, ClassSubset};
use crate::validation::{self, ValidationRule};

/// One method on the current call path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct CallFrame {
    pub(crate) owner: String,
    pub(crate) method: String,
    pub(crate) descriptor: String,
}

impl fmt::Display for CallFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner, self.method)
    }
}

/// Exception type reachable from an endpoint, with the first call path found to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ThrownException {
    pub(crate) type_path: String,
    pub(crate) call_path: Vec<CallFrame>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct WalkResult {
    pub(crate) exceptions: Vec<ThrownException>,
    pub(crate) validations: Vec<ValidationRule>,
}

pub(crate) fn format_call_path(frames: &[CallFrame]) -> String {
    frames
        .iter()
        .map(CallFrame::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Walker state for a single endpoint. Each (owner, name, descriptor) is entered at
/// most once.
pub(crate) struct CallGraphWalker<'a> {
    repository: &'a ClassRepository,
    markers: &'a MarkerConfig,
    max_depth: usize,
    /// Constructor call on any subtype of the configured validator base.
    validator_constructor: Option<Matcher>,
    stack: Vec<CallFrame>,
    visited: BTreeSet<(String, String, String)>,
    thrown_types: BTreeSet<String>,
    result: WalkResult,
}

impl<'a> CallGraphWalker<'a> {
    pub(crate) fn new(
        repository: &'a ClassRepository,
        markers: &'a MarkerConfig,
        max_depth: usize,
    ) -> Self {
        Self {
            repository,
            markers,
            max_depth,
            validator_constructor: markers.validator_base.as_ref().map(|base| {
                Matcher::method(Some(OwnerFilter::Extends(base.clone())), Some("<init>"), None)
            }),
            stack: Vec::new(),
            visited: BTreeSet::new(),
            thrown_types: BTreeSet::new(),
            result: WalkResult::default(),
        }
    }

    pub(crate) fn walk(mut self, record: &'a ClassRecord, method: &'a Method) -> Result<WalkResult> {
        self.visit(record, method)?;
        Ok(self.result)
    }

    fn visit(&mut self, record: &'a ClassRecord, method: &'a Method) -> Result<()> {
        let key = (
            record.path().to_string(),
            method.name.clone(),
            method.descriptor.clone(),
        );
        if !self.visited.insert(key) {
            return Ok(());
        }

        let frame = CallFrame {
            owner: record.path().to_string(),
            method: method.name.clone(),
            descriptor: method.descriptor.clone(),
        };
        if self.stack.len() >= self.max_depth {
            let mut frames = self.stack.clone();
            frames.push(frame);
            return Err(AnalysisError::CallDepthExceeded {
                limit: self.max_depth,
                call_path: format_call_path(&frames),
            });
        }
        trace!(method = %frame, depth = self.stack.len(), "entering method");
        self.stack.push(frame);

        let location = format!("{}#{}{}", record.path(), method.name, method.descriptor);
        for (index, instruction) in method.instructions.iter().enumerate() {
            match &instruction.kind {
                InstructionKind::Op(opcodes::ATHROW) => {
                    self.thrown(method, &location, index)?;
                }
                InstructionKind::Invoke(call) => {
                    if self.is_validator_construction(instruction)? {
                        let rule = validation::recover_rule(
                            self.repository,
                            self.markers,
                            &location,
                            &method.instructions,
                            index,
                            &call.owner,
                        )?;
                        debug!(validator = %call.owner, field = %rule.field.name, "recovered validation rule");
                        self.result.validations.push(rule);
                    } else {
                        self.follow(call)?;
                    }
                }
                InstructionKind::InvokeDynamic(site) => match site.target_handle() {
                    Some(handle) => self.follow(&handle_call(handle))?,
                    None => trace!(name = %site.name, "dynamic call site without implementation"),
                },
                InstructionKind::Field(site) if site.opcode == opcodes::GETSTATIC => {
                    self.static_read(site)?;
                }
                _ => {}
            }
        }

        self.stack.pop();
        Ok(())
    }

    fn is_validator_construction(&self, instruction: &Instruction) -> Result<bool> {
        match &self.validator_constructor {
            Some(matcher) => matcher.matches(instruction, self.repository),
            None => Ok(false),
        }
    }

    /// Resolve the value consumed by the `athrow` at `index`.
    fn thrown(&mut self, method: &Method, location: &str, index: usize) -> Result<()> {
        let captures =
            InstructionScan::backward_from(self.repository, location, &method.instructions, index)
                .anchored()
                .match_idiom(
                    "thrown value",
                    &[
                        Matcher::any_of(vec![
                            Matcher::kind(InstructionTag::Invoke),
                            Matcher::opcode(opcodes::ALOAD),
                        ]),
                        Matcher::opcode(opcodes::CHECKCAST).optional(),
                    ],
                )?;
        let Some(source) = captures[0] else {
            return Err(AnalysisError::unrecognized(
                "throw",
                location,
                "no value source",
            ));
        };

        let thrown_type = match &source.kind {
            InstructionKind::Invoke(call) if call.is_constructor() => call.owner.clone(),
            InstructionKind::Invoke(call) => {
                match parse_method_descriptor(&call.descriptor)?.return_type {
                    Some(FieldType::Object(name)) => name,
                    _ => {
                        return Err(AnalysisError::unrecognized(
                            "throw",
                            location,
                            format!("{source} does not return an object"),
                        ));
                    }
                }
            }
            InstructionKind::Local { index: slot, .. } => {
                match self.local_type(method, location, source, *slot)? {
                    Some(name) => name,
                    None => return Ok(()),
                }
            }
            _ => {
                return Err(AnalysisError::unrecognized(
                    "throw",
                    location,
                    format!("unexpected value source {source}"),
                ));
            }
        };

        if !self.repository.contains(ClassSubset::Traversal, &thrown_type) {
            debug!(%thrown_type, location, "ignoring exception outside traversal packages");
            return Ok(());
        }
        if self.thrown_types.insert(thrown_type.clone()) {
            self.result.exceptions.push(ThrownException {
                type_path: thrown_type,
                call_path: self.stack.clone(),
            });
        }
        Ok(())
    }

    /// Type of the local loaded by `source`, from the local variable table entry live at
    /// its offset. Compiler-generated rethrow slots have no entry and yield `None`.
    fn local_type(
        &self,
        method: &Method,
        location: &str,
        source: &Instruction,
        slot: u16,
    ) -> Result<Option<String>> {
        if method.local_variables.is_empty() {
            return Err(AnalysisError::unrecognized(
                "throw",
                location,
                format!("{source} needs a local variable table"),
            ));
        }
        let Some(local) = method
            .local_variables
            .iter()
            .find(|local| local.index == slot && local.is_live_at(source.offset))
        else {
            debug!(location, slot, "skipping rethrow of synthetic local");
            return Ok(None);
        };
        match parse_field_descriptor(&local.descriptor)? {
            FieldType::Object(name) => Ok(Some(name)),
            _ => Err(AnalysisError::unrecognized(
                "throw",
                location,
                format!("local {} is not an object", local.name),
            )),
        }
    }

    fn follow(&mut self, call: &CallSite) -> Result<()> {
        if !self.repository.contains(ClassSubset::Traversal, &call.owner) {
            trace!(owner = %call.owner, name = %call.name, "skipping call outside traversal packages");
            return Ok(());
        }
        let owner = self.repository.lookup(&call.owner)?;
        self.enter_lambda_body(owner)?;

        let class = owner.info()?;
        let is_dynamic = matches!(call.kind, CallKind::Virtual | CallKind::Interface);
        if is_dynamic && (class.access.is_interface || class.access.is_abstract) {
            return self.dispatch(owner, class, call);
        }

        match self
            .repository
            .resolve_method(owner, &call.name, Some(&call.descriptor))?
        {
            Some((record, method)) => self.visit(record, method),
            None => {
                debug!(owner = %call.owner, name = %call.name, descriptor = %call.descriptor, "no method body to enter");
                Ok(())
            }
        }
    }

    /// Fan a call on an abstract owner out to every concrete implementation.
    fn dispatch(&mut self, owner: &'a ClassRecord, class: &'a Class, call: &CallSite) -> Result<()> {
        let mut implementations = Vec::new();
        for candidate in self
            .repository
            .types_extending(ClassSubset::Traversal, owner.path())?
        {
            let access = candidate.info()?.access;
            if !access.is_interface && !access.is_abstract {
                implementations.push(candidate);
            }
        }

        if implementations.is_empty() {
            let functional = format!("L{};", self.markers.functional_interface);
            if class
                .annotations
                .iter()
                .any(|annotation| annotation.descriptor == functional)
            {
                debug!(owner = %call.owner, name = %call.name, "skipping functional interface without implementations");
                return Ok(());
            }
            return Err(AnalysisError::UnboundedDispatch {
                owner: call.owner.clone(),
                name: call.name.clone(),
                descriptor: call.descriptor.clone(),
                call_path: format_call_path(&self.stack),
            });
        }

        for implementation in implementations {
            let resolved = self.repository.resolve_method(
                implementation,
                &call.name,
                Some(&call.descriptor),
            )?;
            if let Some((record, method)) = resolved {
                self.visit(record, method)?;
                continue;
            }
            match self.repository.resolve_default_method(
                implementation,
                &call.name,
                &call.descriptor,
            )? {
                Some((record, method)) => self.visit(record, method)?,
                None => debug!(
                    implementation = %implementation.path(),
                    name = %call.name,
                    descriptor = %call.descriptor,
                    "no implementation or default method to enter"
                ),
            }
        }
        Ok(())
    }

    fn static_read(&mut self, site: &FieldAccessSite) -> Result<()> {
        if !self.repository.contains(ClassSubset::Traversal, &site.owner) {
            return Ok(());
        }
        let owner = self.repository.lookup(&site.owner)?;
        self.enter_lambda_body(owner)
    }

    /// Visit the functional method of a compiled lambda class.
    fn enter_lambda_body(&mut self, record: &'a ClassRecord) -> Result<()> {
        let class = record.info()?;
        let is_lambda = class
            .super_name
            .as_ref()
            .is_some_and(|parent| self.markers.lambda_bases.contains(parent));
        if !is_lambda {
            return Ok(());
        }

        let bodies: Vec<&Method> = class
            .methods
            .iter()
            .filter(|method| {
                !method.access.is_static
                    && !method.access.is_bridge
                    && !method.access.is_synthetic
                    && method.name != "<init>"
                    && !method.instructions.is_empty()
            })
            .collect();
        match bodies.as_slice() {
            [body] => self.visit(record, body),
            _ => Err(AnalysisError::unrecognized(
                "lambda body",
                record.path(),
                format!("expected one functional method, found {}", bodies.len()),
            )),
        }
    }
}

/// Call equivalent to invoking a method handle.
fn handle_call(handle: &MethodHandle) -> CallSite {
    let kind = match handle.kind {
        5 => CallKind::Virtual,
        6 => CallKind::Static,
        9 => CallKind::Interface,
        _ => CallKind::Special,
    };
    CallSite {
        owner: handle.owner.clone(),
        name: handle.name.clone(),
        descriptor: handle.descriptor.clone(),
        kind,
    }
}
