//! Symbol resolution for a live process.
//!
//! Every ELF file mapped in the target is parsed with goblin once; addresses
//! are relocated by the load bias observed in `/proc/<pid>/maps`.

use std::collections::HashMap;
use std::fs;

use goblin::elf::program_header::PT_LOAD;
use goblin::elf::section_header::SHN_UNDEF;
use goblin::elf::sym::STT_FUNC;
use goblin::elf::Elf;

use crate::core::DebugError;
use crate::debug::linux::process::{executable_path, read_mappings};
use crate::debug::types::MemoryMapping;

const PAGE_MASK: u64 = !0xfff;

/// Functions defined by one ELF file, at link-time addresses
#[derive(Debug, Default)]
struct ModuleSymbols {
    /// Page-aligned virtual address of the first loadable segment
    first_vaddr: u64,
    entry: u64,
    functions: HashMap<String, u64>,
}

impl ModuleSymbols {
    fn load(path: &str) -> Result<Self, DebugError> {
        let data = fs::read(path)
            .map_err(|e| DebugError::EventError(format!("cannot read {}: {}", path, e)))?;
        let elf = Elf::parse(&data)
            .map_err(|e| DebugError::EventError(format!("cannot parse {}: {}", path, e)))?;

        let first_vaddr = elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == PT_LOAD)
            .map(|ph| ph.p_vaddr & PAGE_MASK)
            .min()
            .unwrap_or(0);

        let mut functions = HashMap::new();
        let tables = [(&elf.syms, &elf.strtab), (&elf.dynsyms, &elf.dynstrtab)];
        for (symbols, strings) in tables {
            for sym in symbols.iter() {
                if sym.st_type() != STT_FUNC
                    || sym.st_value == 0
                    || sym.st_shndx == SHN_UNDEF as usize
                {
                    continue;
                }
                if let Some(name) = strings.get_at(sym.st_name) {
                    functions.entry(name.to_string()).or_insert(sym.st_value);
                }
            }
        }

        Ok(Self {
            first_vaddr,
            entry: elf.entry,
            functions,
        })
    }
}

/// Names tried, in order, when a symbol is looked up
fn candidates(symbol: &str) -> &'static [&'static str] {
    match symbol {
        // glibc < 2.34 only exports dlopen from libdl
        "dlopen" => &["dlopen", "__libc_dlopen_mode"],
        _ => &[],
    }
}

/// Resolves function names to addresses in a traced process
#[derive(Debug, Default)]
pub struct SymbolResolver {
    /// Parsed modules by path; `None` for files that are not ELF
    modules: HashMap<String, Option<ModuleSymbols>>,
}

impl SymbolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn module(&mut self, path: &str) -> Option<&ModuleSymbols> {
        self.modules
            .entry(path.to_string())
            .or_insert_with(|| match ModuleSymbols::load(path) {
                Ok(module) => Some(module),
                Err(e) => {
                    log::trace!("No symbols from {}: {}", path, e);
                    None
                }
            })
            .as_ref()
    }

    /// Files with executable code, in map order, with the address their
    /// first page (file offset 0) is mapped at
    fn loaded_modules(mappings: &[MemoryMapping]) -> Vec<(String, u64)> {
        let mut modules: Vec<(String, u64)> = Vec::new();
        for mapping in mappings.iter().filter(|m| m.executable) {
            let Some(path) = &mapping.path else { continue };
            if modules.iter().any(|(p, _)| p == path) {
                continue;
            }
            let base = mappings
                .iter()
                .filter(|m| m.offset == 0 && m.path.as_ref() == Some(path))
                .map(|m| m.start)
                .min();
            match base {
                Some(base) => modules.push((path.clone(), base)),
                None => log::trace!("{} has no mapping of its first page", path),
            }
        }
        modules
    }

    /// Runtime address of a function in process `pid`
    pub fn lookup(&mut self, pid: u32, symbol: &str) -> Result<u64, DebugError> {
        let mappings = read_mappings(pid)?;
        let modules = Self::loaded_modules(&mappings);

        let names: Vec<&str> = match candidates(symbol) {
            [] => vec![symbol],
            names => names.to_vec(),
        };
        for name in names {
            for (path, base) in &modules {
                let Some(module) = self.module(path) else { continue };
                if let Some(&value) = module.functions.get(name) {
                    let address = base.wrapping_sub(module.first_vaddr).wrapping_add(value);
                    log::trace!("{} = {:#x} ({})", name, address, path);
                    return Ok(address);
                }
            }
        }
        Err(DebugError::SymbolNotFound(symbol.to_string()))
    }

    /// Runtime address of the main executable's entry point
    pub fn entry_point(&mut self, pid: u32) -> Result<u64, DebugError> {
        let exe = executable_path(pid)?;
        let mappings = read_mappings(pid)?;
        let base = Self::loaded_modules(&mappings)
            .into_iter()
            .find(|(path, _)| *path == exe)
            .map(|(_, base)| base)
            .ok_or_else(|| DebugError::EventError(format!("{} is not mapped", exe)))?;
        let module = self
            .module(&exe)
            .ok_or_else(|| DebugError::EventError(format!("cannot read symbols of {}", exe)))?;
        Ok(base.wrapping_sub(module.first_vaddr).wrapping_add(module.entry))
    }

    /// Drop cached files, e.g. after the target was replaced
    pub fn clear(&mut self) {
        self.modules.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    #[no_mangle]
    pub extern "C" fn sqlpeek_resolver_marker() -> u32 {
        42
    }

    #[test]
    fn test_loaded_modules_lowest_start() {
        let mappings: Vec<MemoryMapping> = [
            "00400000-00401000 r--p 00000000 08:01 1 /bin/app",
            "00401000-00402000 r-xp 00001000 08:01 1 /bin/app",
            "7f0000000000-7f0000001000 r--p 00000000 08:01 2 /lib/libc.so.6",
            "7f0000001000-7f0000002000 r-xp 00001000 08:01 2 /lib/libc.so.6",
            "7ffd00000000-7ffd00001000 rw-p 00000000 00:00 0 [stack]",
        ]
        .iter()
        .filter_map(|line| MemoryMapping::parse(line))
        .collect();

        let modules = SymbolResolver::loaded_modules(&mappings);
        assert_eq!(
            modules,
            vec![
                ("/bin/app".to_string(), 0x400000),
                ("/lib/libc.so.6".to_string(), 0x7f0000000000)
            ]
        );
    }

    #[test]
    fn test_loaded_modules_skip_data_files() {
        let mappings: Vec<MemoryMapping> = [
            "00400000-00401000 r-xp 00000000 08:01 1 /bin/app",
            "7e0000000000-7e0000100000 r--p 00000000 08:01 3 /usr/lib/locale/locale-archive",
            // Executable segment without the file header mapped
            "7f0000001000-7f0000002000 r-xp 00001000 08:01 4 /tmp/odd.so",
        ]
        .iter()
        .filter_map(|line| MemoryMapping::parse(line))
        .collect();

        let modules = SymbolResolver::loaded_modules(&mappings);
        assert_eq!(modules, vec![("/bin/app".to_string(), 0x400000)]);
    }

    #[test]
    fn test_lookup_own_function() {
        let mut resolver = SymbolResolver::new();
        match resolver.lookup(std::process::id(), "sqlpeek_resolver_marker") {
            Ok(address) => assert_eq!(address, sqlpeek_resolver_marker as usize as u64),
            // Stripped test binaries carry no symbol table
            Err(e) => println!("lookup skipped: {}", e),
        }
        assert_eq!(sqlpeek_resolver_marker(), 42);
    }

    #[test]
    fn test_lookup_libc_free() {
        let mut resolver = SymbolResolver::new();
        let address = resolver.lookup(std::process::id(), "free").unwrap();
        assert_ne!(address, 0);
    }

    #[test]
    fn test_missing_symbol() {
        let mut resolver = SymbolResolver::new();
        let err = resolver
            .lookup(std::process::id(), "sqlpeek_no_such_function")
            .unwrap_err();
        assert!(matches!(err, DebugError::SymbolNotFound(_)));
    }
}
