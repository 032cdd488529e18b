//! Hand-assembled PE64 image builder for the end-to-end recovery tests.
//!
//! Real test binaries aren't available in this environment, so each test
//! supplies raw machine code for a `.text` section and this module wraps it
//! in the smallest PE32+ header goblin will accept: a DOS stub, an NT
//! header, one data directory table (all empty except when noted), and a
//! single executable section.

const SECTION_ALIGN: u32 = 0x1000;
const FILE_ALIGN: u32 = 0x200;
const IMAGE_BASE: u64 = 0x1_4000_0000;

fn pad_to(buf: &mut Vec<u8>, align: u32) {
    let rem = buf.len() % align as usize;
    if rem != 0 {
        buf.extend(std::iter::repeat(0u8).take(align as usize - rem));
    }
}

/// Builds a minimal PE32+ image with a single executable `.text` section
/// containing `code`, entry point at `entry_offset` bytes into that
/// section. Returns the raw image bytes and the `.text` section's RVA.
pub fn build_pe(code: &[u8], entry_offset: u32) -> (Vec<u8>, u32) {
    let mut buf = Vec::new();

    // --- DOS header (64 bytes) ---
    buf.extend_from_slice(b"MZ");
    buf.extend(std::iter::repeat(0u8).take(0x3c - 2));
    buf.extend_from_slice(&0x40u32.to_le_bytes()); // e_lfanew

    pad_to(&mut buf, 1);
    while buf.len() < 0x40 {
        buf.push(0);
    }

    let nt_header_offset = buf.len() as u32;
    assert_eq!(nt_header_offset, 0x40);

    // --- NT signature + file header ---
    buf.extend_from_slice(b"PE\0\0");
    buf.extend_from_slice(&0x8664u16.to_le_bytes()); // Machine: AMD64
    buf.extend_from_slice(&1u16.to_le_bytes()); // NumberOfSections
    buf.extend_from_slice(&0u32.to_le_bytes()); // TimeDateStamp
    buf.extend_from_slice(&0u32.to_le_bytes()); // PointerToSymbolTable
    buf.extend_from_slice(&0u32.to_le_bytes()); // NumberOfSymbols
    let opt_header_size = 112 + 16 * 8;
    buf.extend_from_slice(&(opt_header_size as u16).to_le_bytes());
    buf.extend_from_slice(&0x0022u16.to_le_bytes()); // Characteristics: EXECUTABLE_IMAGE | LARGE_ADDRESS_AWARE

    let opt_header_offset = buf.len();

    // --- optional header (PE32+) ---
    buf.extend_from_slice(&0x20bu16.to_le_bytes()); // Magic: PE32+
    buf.push(14); // MajorLinkerVersion
    buf.push(0); // MinorLinkerVersion
    let section_va = SECTION_ALIGN; // first section starts at 0x1000
    let section_size_aligned = {
        let rem = code.len() as u32 % SECTION_ALIGN;
        if rem == 0 { code.len() as u32 } else { code.len() as u32 - rem + SECTION_ALIGN }
    };
    buf.extend_from_slice(&(code.len() as u32).to_le_bytes()); // SizeOfCode
    buf.extend_from_slice(&0u32.to_le_bytes()); // SizeOfInitializedData
    buf.extend_from_slice(&0u32.to_le_bytes()); // SizeOfUninitializedData
    buf.extend_from_slice(&(section_va + entry_offset).to_le_bytes()); // AddressOfEntryPoint
    buf.extend_from_slice(&section_va.to_le_bytes()); // BaseOfCode
    buf.extend_from_slice(&IMAGE_BASE.to_le_bytes()); // ImageBase
    buf.extend_from_slice(&SECTION_ALIGN.to_le_bytes()); // SectionAlignment
    buf.extend_from_slice(&FILE_ALIGN.to_le_bytes()); // FileAlignment
    buf.extend_from_slice(&6u16.to_le_bytes()); // MajorOSVersion
    buf.extend_from_slice(&0u16.to_le_bytes()); // MinorOSVersion
    buf.extend_from_slice(&0u16.to_le_bytes()); // MajorImageVersion
    buf.extend_from_slice(&0u16.to_le_bytes()); // MinorImageVersion
    buf.extend_from_slice(&6u16.to_le_bytes()); // MajorSubsystemVersion
    buf.extend_from_slice(&0u16.to_le_bytes()); // MinorSubsystemVersion
    buf.extend_from_slice(&0u32.to_le_bytes()); // Win32VersionValue
    let size_of_image = section_va + section_size_aligned;
    buf.extend_from_slice(&size_of_image.to_le_bytes()); // SizeOfImage, patched below
    let size_of_headers_placeholder = buf.len();
    buf.extend_from_slice(&0u32.to_le_bytes()); // SizeOfHeaders, patched below
    buf.extend_from_slice(&0u32.to_le_bytes()); // CheckSum
    buf.extend_from_slice(&3u16.to_le_bytes()); // Subsystem: CONSOLE
    buf.extend_from_slice(&0u16.to_le_bytes()); // DllCharacteristics
    buf.extend_from_slice(&0x100000u64.to_le_bytes()); // SizeOfStackReserve
    buf.extend_from_slice(&0x1000u64.to_le_bytes()); // SizeOfStackCommit
    buf.extend_from_slice(&0x100000u64.to_le_bytes()); // SizeOfHeapReserve
    buf.extend_from_slice(&0x1000u64.to_le_bytes()); // SizeOfHeapCommit
    buf.extend_from_slice(&0u32.to_le_bytes()); // LoaderFlags
    buf.extend_from_slice(&16u32.to_le_bytes()); // NumberOfRvaAndSizes

    for _ in 0..16 {
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
    }

    assert_eq!(buf.len() - opt_header_offset, opt_header_size);

    // --- section header ---
    let mut name = [0u8; 8];
    name[..5].copy_from_slice(b".text");
    buf.extend_from_slice(&name);
    buf.extend_from_slice(&(code.len() as u32).to_le_bytes()); // VirtualSize
    buf.extend_from_slice(&section_va.to_le_bytes()); // VirtualAddress
    let raw_size = {
        let rem = code.len() as u32 % FILE_ALIGN;
        if rem == 0 { code.len() as u32 } else { code.len() as u32 - rem + FILE_ALIGN }
    };
    buf.extend_from_slice(&raw_size.to_le_bytes()); // SizeOfRawData, patched after headers padded
    let ptr_raw_data_offset = buf.len();
    buf.extend_from_slice(&0u32.to_le_bytes()); // PointerToRawData, patched below
    buf.extend_from_slice(&0u32.to_le_bytes()); // PointerToRelocations
    buf.extend_from_slice(&0u32.to_le_bytes()); // PointerToLinenumbers
    buf.extend_from_slice(&0u16.to_le_bytes()); // NumberOfRelocations
    buf.extend_from_slice(&0u16.to_le_bytes()); // NumberOfLinenumbers
    buf.extend_from_slice(&0x6000_0020u32.to_le_bytes()); // Characteristics: CODE|EXECUTE|READ

    pad_to(&mut buf, FILE_ALIGN);
    let size_of_headers = buf.len() as u32;
    buf[size_of_headers_placeholder..size_of_headers_placeholder + 4].copy_from_slice(&size_of_headers.to_le_bytes());

    let ptr_raw_data = buf.len() as u32;
    buf[ptr_raw_data_offset..ptr_raw_data_offset + 4].copy_from_slice(&ptr_raw_data.to_le_bytes());

    buf.extend_from_slice(code);
    pad_to(&mut buf, FILE_ALIGN);

    (buf, section_va)
}
