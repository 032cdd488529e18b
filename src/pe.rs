//! PE image reader (external collaborator, §6).
//!
//! Wraps `goblin::pe::PE` to expose exactly what the recovery driver needs:
//! section bytes by RVA, and the three entry-point sources
//! `original_source/src/pe/{import,export,tls}.c` each walk by hand (import
//! thunks, export table, TLS callback array). goblin parses all three
//! directories itself; this module just reshapes them into the crate's own
//! [`Rva`]-keyed types instead of re-deriving the directory walk.

use std::collections::HashMap;

use thiserror::Error;

use crate::addr::Rva;

#[derive(Debug, Error)]
pub enum PeError {
    #[error("failed to parse PE image: {0}")]
    Parse(#[from] goblin::error::Error),

    #[error("image has no executable sections")]
    NoExecutableSections,

    #[error("rva {0} does not map to any section")]
    UnmappedRva(Rva),

    #[error("image is not a PE32+ (x86-64) binary")]
    NotAmd64,
}

#[derive(Debug, Clone)]
pub struct SectionInfo {
    pub name: String,
    pub virtual_addr: Rva,
    pub virtual_size: u64,
    pub file_offset: usize,
    pub file_size: usize,
    pub executable: bool,
}

#[derive(Debug, Clone)]
pub struct ImportEntry {
    pub module: String,
    pub name: String,
    /// RVA of the IAT slot this thunk occupies; a `call [rip+disp]`/`jmp
    /// [rip+disp]` whose target resolves here is a call into `module!name`,
    /// not an indirect branch the resolver needs to slice (§4.6).
    pub thunk_rva: Rva,
}

#[derive(Debug, Clone)]
pub struct ExportEntry {
    pub name: Option<String>,
    pub ordinal: u32,
    pub rva: Rva,
}

/// A loaded PE image, addressed entirely in RVA space.
pub struct PeImage {
    bytes: Vec<u8>,
    sections: Vec<SectionInfo>,
    entry_point: Rva,
    image_base: u64,
    imports: Vec<ImportEntry>,
    exports: Vec<ExportEntry>,
    tls_callbacks: Vec<Rva>,
}

impl PeImage {
    pub fn parse(bytes: Vec<u8>) -> Result<Self, PeError> {
        let pe = goblin::pe::PE::parse(&bytes)?;

        if !pe.is_64 {
            return Err(PeError::NotAmd64);
        }

        let image_base = pe.image_base as u64;

        let sections = pe
            .sections
            .iter()
            .map(|s| SectionInfo {
                name: s.name().unwrap_or("").trim_end_matches('\0').to_string(),
                virtual_addr: Rva::new(s.virtual_address as u64),
                virtual_size: s.virtual_size as u64,
                file_offset: s.pointer_to_raw_data as usize,
                file_size: s.size_of_raw_data as usize,
                executable: s.characteristics & goblin::pe::section_table::IMAGE_SCN_MEM_EXECUTE != 0,
            })
            .collect::<Vec<_>>();

        if sections.iter().all(|s| !s.executable) {
            return Err(PeError::NoExecutableSections);
        }

        let imports = pe
            .imports
            .iter()
            .map(|imp| ImportEntry {
                module: imp.dll.to_string(),
                name: imp.name.to_string(),
                thunk_rva: Rva::new(imp.rva as u64),
            })
            .collect();

        let exports = pe
            .exports
            .iter()
            .map(|exp| ExportEntry {
                name: exp.name.map(str::to_string),
                ordinal: exp.ordinal_base_subtracted_out_of as u32,
                rva: Rva::new(exp.rva as u64),
            })
            .collect();

        let tls_callbacks = pe
            .tls_data
            .as_ref()
            .map(|tls| {
                tls.callbacks
                    .iter()
                    .filter(|&&addr| addr != 0)
                    .map(|&addr| Rva::new(addr.saturating_sub(image_base)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            entry_point: Rva::new(pe.entry as u64),
            image_base,
            bytes,
            sections,
            imports,
            exports,
            tls_callbacks,
        })
    }

    pub fn entry_point(&self) -> Rva {
        self.entry_point
    }

    pub fn image_base(&self) -> u64 {
        self.image_base
    }

    pub fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }

    pub fn imports(&self) -> &[ImportEntry] {
        &self.imports
    }

    pub fn exports(&self) -> &[ExportEntry] {
        &self.exports
    }

    pub fn tls_callbacks(&self) -> &[Rva] {
        &self.tls_callbacks
    }

    /// Every entry point an exhaustive recovery run should seed: the PE
    /// entry point, every export, and every TLS callback (§4.6/§9).
    pub fn all_entry_points(&self) -> Vec<Rva> {
        let mut out = vec![self.entry_point];
        out.extend(self.exports.iter().map(|e| e.rva));
        out.extend(self.tls_callbacks.iter().copied());
        out.sort_by_key(Rva::value);
        out.dedup();
        out
    }

    fn section_for(&self, rva: Rva) -> Option<&SectionInfo> {
        self.sections
            .iter()
            .find(|s| s.virtual_addr.contains(s.virtual_size, rva))
    }

    /// Reads up to `max_len` bytes starting at `rva`, truncated to the
    /// containing section's bounds. Returns fewer bytes than requested near
    /// a section's end rather than erroring, matching the decoder-empty
    /// retry loop in §4.6/§9 (a short read is not itself a failure).
    pub fn read_bytes(&self, rva: Rva, max_len: usize) -> Result<&[u8], PeError> {
        let section = self.section_for(rva).ok_or(PeError::UnmappedRva(rva))?;
        let offset_in_section = (rva.value() - section.virtual_addr.value()) as usize;
        let start = section.file_offset + offset_in_section;
        let section_remaining = (section.virtual_size as usize).saturating_sub(offset_in_section);
        let file_remaining = section.file_size.saturating_sub(offset_in_section);
        let len = max_len.min(section_remaining).min(file_remaining).min(self.bytes.len().saturating_sub(start));
        Ok(&self.bytes[start..start + len])
    }

    pub fn is_executable(&self, rva: Rva) -> bool {
        self.section_for(rva).is_some_and(|s| s.executable)
    }

    /// Looks up an IAT thunk RVA back to the import it resolves to, used by
    /// `resolve::classify_call` to recognize `call [rip+disp]` into an
    /// imported function instead of treating it as an unresolved indirect
    /// call.
    pub fn import_at_thunk(&self, thunk_rva: Rva) -> Option<&ImportEntry> {
        self.imports.iter().find(|i| i.thunk_rva == thunk_rva)
    }

    pub fn import_index(&self) -> HashMap<Rva, &ImportEntry> {
        self.imports.iter().map(|i| (i.thunk_rva, i)).collect()
    }
}
