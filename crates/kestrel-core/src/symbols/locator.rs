//! Locating the symbol table and line table of an executable image.
//!
//! Toolchains that emit their own runtime tables bracket each table with a
//! pair of boundary symbols: `runtime.symtab`/`runtime.esymtab` and
//! `runtime.pclntab`/`runtime.epclntab` (older toolchains use the names
//! without the `runtime.` prefix). The bytes between a pair are the table.

use std::fs;
use std::path::Path;

use object::{Object, ObjectSection, ObjectSymbol, SymbolSection};
use tracing::debug;

use crate::error::{DebuggerError, Result};
use crate::types::Address;

const SYMTAB: [(&str, &str); 2] = [("runtime.symtab", "runtime.esymtab"), ("symtab", "esymtab")];
const PCLNTAB: [(&str, &str); 2] = [("runtime.pclntab", "runtime.epclntab"), ("pclntab", "epclntab")];

/// The tables located in an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTables
{
    /// Virtual address of `.text` (image base + section RVA for PE), zero if absent
    pub text_start: Address,
    /// Bytes between the symtab boundary symbols
    pub symtab: Vec<u8>,
    /// Bytes between the pclntab boundary symbols
    pub pclntab: Vec<u8>,
}

/// Read and parse the image at `path`, then locate its tables
///
/// ## Errors
///
/// - `Io` if the file cannot be read
/// - `Object` if it is not a recognized object format
/// - `SymbolLookup` if a table cannot be located (see [`locate_tables_in`])
pub fn locate_tables(path: &Path) -> Result<SymbolTables>
{
    let data = fs::read(path)?;
    let file = object::File::parse(&*data)?;
    let tables = locate_tables_in(&file)?;
    debug!(
        path = %path.display(),
        text_start = %tables.text_start,
        symtab = tables.symtab.len(),
        pclntab = tables.pclntab.len(),
        "Located runtime tables"
    );
    Ok(tables)
}

/// Locate the tables in an already parsed image
///
/// Each table is looked up under its primary boundary names first, then its
/// legacy ones. When both fail the error of the primary pair is returned.
///
/// ## Errors
///
/// `SymbolLookup` when a boundary symbol is missing, has no real section, or
/// the two symbols of a pair live in different sections.
pub fn locate_tables_in<'data, O>(file: &O) -> Result<SymbolTables>
where
    O: Object<'data>,
{
    let text_start = file
        .section_by_name(".text")
        .map_or(Address::ZERO, |section| Address::from(section.address()));
    Ok(SymbolTables {
        text_start,
        pclntab: load_with_fallback(file, &PCLNTAB)?,
        symtab: load_with_fallback(file, &SYMTAB)?,
    })
}

fn load_with_fallback<'data, O>(file: &O, pairs: &[(&str, &str); 2]) -> Result<Vec<u8>>
where
    O: Object<'data>,
{
    let (start, end) = pairs[0];
    match load_table(file, start, end) {
        Ok(bytes) => Ok(bytes),
        Err(primary) => {
            let (legacy_start, legacy_end) = pairs[1];
            load_table(file, legacy_start, legacy_end).map_err(|_| primary)
        }
    }
}

/// Address and section index of a named symbol that lives in a real section
fn find_symbol<'data, O>(file: &O, name: &str) -> Result<(u64, object::SectionIndex)>
where
    O: Object<'data>,
{
    let symbol = file
        .symbols()
        .find(|symbol| symbol.name().is_ok_and(|candidate| candidate == name))
        .ok_or_else(|| DebuggerError::SymbolLookup(format!("no {name} symbol found")))?;
    match symbol.section() {
        SymbolSection::Section(index) => Ok((symbol.address(), index)),
        other => Err(DebuggerError::SymbolLookup(format!(
            "symbol {name}: invalid section {other:?}"
        ))),
    }
}

fn load_table<'data, O>(file: &O, start_name: &str, end_name: &str) -> Result<Vec<u8>>
where
    O: Object<'data>,
{
    let (start, start_section) = find_symbol(file, start_name)?;
    let (end, end_section) = find_symbol(file, end_name)?;
    if start_section != end_section {
        return Err(DebuggerError::SymbolLookup(format!(
            "{start_name} and {end_name} symbols must be in the same section"
        )));
    }

    let section = file.section_by_index(start_section)?;
    let data = section.data()?;
    let base = section.address();
    let range = start
        .checked_sub(base)
        .zip(end.checked_sub(base))
        .and_then(|(from, to)| Some(usize::try_from(from).ok()?..usize::try_from(to).ok()?))
        .filter(|range| range.start <= range.end && range.end <= data.len())
        .ok_or_else(|| {
            DebuggerError::SymbolLookup(format!(
                "{start_name}..{end_name} ({start:#x}..{end:#x}) lies outside its section"
            ))
        })?;
    Ok(data[range].to_vec())
}
