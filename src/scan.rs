use std::collections::BTreeSet;
use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, trace};
use zip::ZipArchive;

use crate::classfile;
use crate::error::AnalysisError;

/// Raw bytes of one compiled unit, keyed by its logical name (`com/acme/Foo`).
pub(crate) struct ClassUnit {
    pub(crate) name: String,
    pub(crate) bytes: Vec<u8>,
}

/// Snapshot of the units found by a scan.
pub(crate) struct ScanOutput {
    pub(crate) units: Vec<ClassUnit>,
    pub(crate) archive_count: usize,
}

pub(crate) fn scan_input(input: &Path) -> Result<ScanOutput> {
    let mut scan = Scan::default();
    scan.path(input, true)?;
    Ok(ScanOutput {
        units: scan.units,
        archive_count: scan.archive_count,
    })
}

#[derive(Default)]
struct Scan {
    units: Vec<ClassUnit>,
    seen: BTreeSet<String>,
    archive_count: usize,
}

impl Scan {
    fn path(&mut self, path: &Path, strict: bool) -> Result<()> {
        if path.is_dir() {
            return self.dir(path, path);
        }

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        match extension {
            "class" => {
                let data =
                    fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
                // A lone class file has no package directory to derive its name from.
                let name = classfile::decode(&path.display().to_string(), &data)
                    .with_context(|| format!("failed to parse {}", path.display()))?
                    .name;
                self.push(name, data)
            }
            "jar" => {
                let file = fs::File::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                self.jar(file, &path.display().to_string())
            }
            _ => {
                if strict {
                    anyhow::bail!("unsupported input file: {}", path.display())
                } else {
                    Ok(())
                }
            }
        }
    }

    fn dir(&mut self, root: &Path, path: &Path) -> Result<()> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)
            .with_context(|| format!("failed to read directory {}", path.display()))?
        {
            let entry =
                entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
            entries.push(entry.path());
        }

        // Keep deterministic ordering regardless of file system listing order.
        entries.sort();

        for entry in entries {
            if entry.is_dir() {
                self.dir(root, &entry)?;
                continue;
            }
            let relative = entry
                .strip_prefix(root)
                .unwrap_or(&entry)
                .to_string_lossy()
                .replace('\\', "/");
            if is_skipped(&relative) {
                continue;
            }
            match entry.extension().and_then(|ext| ext.to_str()) {
                Some("class") => {
                    let data = fs::read(&entry)
                        .with_context(|| format!("failed to read {}", entry.display()))?;
                    self.push(logical_name(&relative), data)?;
                }
                Some("jar") => self.path(&entry, false)?,
                _ => {}
            }
        }

        Ok(())
    }

    fn jar<R: Read + Seek>(&mut self, reader: R, location: &str) -> Result<()> {
        let mut archive =
            ZipArchive::new(reader).with_context(|| format!("failed to read {location}"))?;
        self.archive_count += 1;

        let mut entry_names = Vec::new();
        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .with_context(|| format!("failed to read {location}"))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            if is_skipped(&name) {
                continue;
            }
            if name.ends_with(".class") || name.ends_with(".jar") {
                entry_names.push(name);
            }
        }

        entry_names.sort();

        for name in entry_names {
            let mut entry = archive
                .by_name(&name)
                .with_context(|| format!("failed to read {location}!/{name}"))?;
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .with_context(|| format!("failed to read {location}!/{name}"))?;
            drop(entry);

            if name.ends_with(".jar") {
                debug!(archive = %location, entry = %name, "descending into nested archive");
                self.jar(Cursor::new(data), &format!("{location}!/{name}"))?;
            } else {
                self.push(logical_name(&name), data)?;
            }
        }

        Ok(())
    }

    fn push(&mut self, name: String, bytes: Vec<u8>) -> Result<()> {
        if !self.seen.insert(name.clone()) {
            return Err(AnalysisError::DuplicateClass(name).into());
        }
        trace!(class = %name, len = bytes.len(), "loaded class unit");
        self.units.push(ClassUnit { name, bytes });
        Ok(())
    }
}

/// Directory-like, signing, and module descriptor entries carry no classes to analyze.
fn is_skipped(name: &str) -> bool {
    name.starts_with("META-INF/")
        || name.ends_with("module-info.class")
        || name.ends_with("package-info.class")
}

/// Class name of an archive entry, with packaging roots of fat jars and wars removed.
fn logical_name(entry_name: &str) -> String {
    let entry_name = ["BOOT-INF/classes/", "WEB-INF/classes/"]
        .iter()
        .find_map(|root| entry_name.strip_prefix(root))
        .unwrap_or(entry_name);
    entry_name
        .strip_suffix(".class")
        .unwrap_or(entry_name)
        .to_string()
}
