//! The class universe: every decoded unit keyed by internal name, plus the package
//! subsets and hierarchy queries the analysis is scoped by.

use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use crate::classfile;
use crate::config::ScopeConfig;
use crate::descriptor::class_name_of;
use crate::error::{AnalysisError, Result};
use crate::ir::{Class, Method};
use crate::scan::ClassUnit;

/// One compiled unit. Decoding is deferred to the first structural access and
/// memoized; records compare equal by path alone.
pub(crate) struct ClassRecord {
    path: String,
    bytes: Vec<u8>,
    parsed: OnceCell<Class>,
}

impl ClassRecord {
    pub(crate) fn from_unit(unit: ClassUnit) -> Self {
        Self {
            path: unit.name,
            bytes: unit.bytes,
            parsed: OnceCell::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_class(class: Class) -> Self {
        Self {
            path: class.name.clone(),
            bytes: Vec::new(),
            parsed: OnceCell::from(class),
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    /// Text after the last `/` of the path.
    pub(crate) fn simple_name(&self) -> &str {
        self.path
            .rsplit_once('/')
            .map_or(self.path.as_str(), |(_, name)| name)
    }

    pub(crate) fn info(&self) -> Result<&Class> {
        if let Some(class) = self.parsed.get() {
            return Ok(class);
        }
        let class = classfile::decode(&self.path, &self.bytes)?;
        if class.name != self.path {
            return Err(AnalysisError::Decode {
                name: self.path.clone(),
                reason: format!("unit declares class {}", class.name),
            });
        }
        Ok(self.parsed.get_or_init(|| class))
    }

    #[cfg(test)]
    pub(crate) fn is_parsed(&self) -> bool {
        self.parsed.get().is_some()
    }
}

impl PartialEq for ClassRecord {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for ClassRecord {}

impl std::fmt::Debug for ClassRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassRecord").field("path", &self.path).finish()
    }
}

/// Named subsets derived from the configured package prefixes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ClassSubset {
    Controllers,
    Types,
    Traversal,
}

pub(crate) struct ClassRepository {
    records: BTreeMap<String, ClassRecord>,
    controllers: BTreeSet<String>,
    types: BTreeSet<String>,
    traversal: BTreeSet<String>,
}

impl ClassRepository {
    pub(crate) fn new(
        records: impl IntoIterator<Item = ClassRecord>,
        scope: &ScopeConfig,
    ) -> Result<Self> {
        let mut by_path = BTreeMap::new();
        for record in records {
            if by_path.contains_key(record.path()) {
                return Err(AnalysisError::DuplicateClass(record.path));
            }
            by_path.insert(record.path.clone(), record);
        }

        let mut repository = Self {
            records: by_path,
            controllers: BTreeSet::new(),
            types: BTreeSet::new(),
            traversal: BTreeSet::new(),
        };
        repository.controllers =
            repository.classify(|path| in_any_package(path, &scope.controller_packages));
        repository.types = repository.classify(|path| in_any_package(path, &scope.type_packages));
        repository.traversal =
            repository.classify(|path| in_any_package(path, &scope.traversal_packages));
        debug!(
            classes = repository.records.len(),
            controllers = repository.controllers.len(),
            types = repository.types.len(),
            traversal = repository.traversal.len(),
            "classified class repository"
        );
        Ok(repository)
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn classify(&self, predicate: impl Fn(&str) -> bool) -> BTreeSet<String> {
        self.records
            .keys()
            .filter(|path| predicate(path))
            .cloned()
            .collect()
    }

    fn subset(&self, subset: ClassSubset) -> &BTreeSet<String> {
        match subset {
            ClassSubset::Controllers => &self.controllers,
            ClassSubset::Types => &self.types,
            ClassSubset::Traversal => &self.traversal,
        }
    }

    pub(crate) fn contains(&self, subset: ClassSubset, path: &str) -> bool {
        self.subset(subset).contains(path)
    }

    /// Records of a subset in path order.
    pub(crate) fn records_in(&self, subset: ClassSubset) -> impl Iterator<Item = &ClassRecord> {
        self.subset(subset)
            .iter()
            .filter_map(|path| self.records.get(path))
    }

    pub(crate) fn lookup(&self, path: &str) -> Result<&ClassRecord> {
        self.try_lookup(path)
            .ok_or_else(|| AnalysisError::ClassNotFound(path.to_string()))
    }

    pub(crate) fn try_lookup(&self, path: &str) -> Option<&ClassRecord> {
        self.records.get(path)
    }

    /// Record named by an object descriptor (`Lcom/acme/Foo;`).
    pub(crate) fn lookup_descriptor(&self, descriptor: &str) -> Result<&ClassRecord> {
        self.lookup(class_name_of(descriptor)?)
    }

    /// Whether `path` is `target` or reaches it through super types and interfaces.
    /// Types missing from the repository end the chain without matching.
    pub(crate) fn extends(&self, path: &str, target: &str) -> Result<bool> {
        let mut chain = Vec::new();
        self.extends_along(path, target, &mut chain)
    }

    fn extends_along<'a>(
        &'a self,
        path: &'a str,
        target: &str,
        chain: &mut Vec<&'a str>,
    ) -> Result<bool> {
        if path == target {
            return Ok(true);
        }
        if chain.contains(&path) {
            let mut cycle = chain.join(" -> ");
            cycle.push_str(" -> ");
            cycle.push_str(path);
            return Err(AnalysisError::HierarchyCycle(path.to_string(), cycle));
        }
        let Some(record) = self.try_lookup(path) else {
            return Ok(false);
        };
        let class = record.info()?;

        chain.push(path);
        for parent in class.super_name.iter().chain(class.interfaces.iter()) {
            if self.extends_along(parent, target, chain)? {
                chain.pop();
                return Ok(true);
            }
        }
        chain.pop();
        Ok(false)
    }

    /// Members of `subset` extending `target`, excluding `target` itself.
    pub(crate) fn types_extending(
        &self,
        subset: ClassSubset,
        target: &str,
    ) -> Result<Vec<&ClassRecord>> {
        let mut matches = Vec::new();
        for record in self.records_in(subset) {
            if record.path() != target && self.extends(record.path(), target)? {
                matches.push(record);
            }
        }
        Ok(matches)
    }

    /// Find a method on `record`, continuing up the super chain while the super type
    /// is traversal-eligible. A missing descriptor matches by name only.
    pub(crate) fn resolve_method<'a>(
        &'a self,
        record: &'a ClassRecord,
        name: &str,
        descriptor: Option<&str>,
    ) -> Result<Option<(&'a ClassRecord, &'a Method)>> {
        let mut current = record;
        let mut seen = BTreeSet::new();
        loop {
            if !seen.insert(current.path()) {
                return Err(AnalysisError::HierarchyCycle(
                    current.path().to_string(),
                    seen.into_iter().collect::<Vec<_>>().join(" -> "),
                ));
            }
            let class = current.info()?;
            let found = class.methods.iter().find(|method| {
                method.name == name && descriptor.is_none_or(|wanted| method.descriptor == wanted)
            });
            if let Some(method) = found {
                return Ok(Some((current, method)));
            }
            let next = class
                .super_name
                .as_deref()
                .filter(|parent| self.traversal.contains(*parent))
                .and_then(|parent| self.try_lookup(parent));
            match next {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }

    /// Default method inherited by `record` from any traversal-eligible interface in its
    /// hierarchy, nearest first. Abstract and static interface members are skipped.
    pub(crate) fn resolve_default_method<'a>(
        &'a self,
        record: &'a ClassRecord,
        name: &str,
        descriptor: &str,
    ) -> Result<Option<(&'a ClassRecord, &'a Method)>> {
        let mut queue = VecDeque::from([record]);
        let mut seen = BTreeSet::from([record.path()]);
        while let Some(current) = queue.pop_front() {
            let class = current.info()?;
            if class.access.is_interface {
                let found = class.methods.iter().find(|method| {
                    method.name == name
                        && method.descriptor == descriptor
                        && !method.access.is_abstract
                        && !method.access.is_static
                });
                if let Some(method) = found {
                    return Ok(Some((current, method)));
                }
            }
            for parent in class.super_name.iter().chain(class.interfaces.iter()) {
                if !self.traversal.contains(parent.as_str()) || !seen.insert(parent.as_str()) {
                    continue;
                }
                if let Some(parent) = self.try_lookup(parent) {
                    queue.push_back(parent);
                }
            }
        }
        Ok(None)
    }
}

fn in_any_package(path: &str, packages: &[String]) -> bool {
    packages.iter().any(|package| {
        path.strip_prefix(package.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    })
}
