//! End-to-end recovery scenarios against hand-assembled PE images.
//!
//! Each test builds a tiny `.text` section directly from encoded bytes
//! (no assembler available in this environment) and runs it through
//! [`ucfg::recover::recover`] exactly as the CLI would.

mod common;

use ucfg::addr::Rva;
use ucfg::decoder::ZydisDecoder;
use ucfg::pe::PeImage;
use ucfg::recover;

fn recover_from(code: &[u8], entry_offset: u32) -> (PeImage, recover::Recovery) {
    let (bytes, section_va) = common::build_pe(code, entry_offset);
    let image = PeImage::parse(bytes).expect("synthetic image should parse");
    let decoder = ZydisDecoder::new_amd64();
    let entry = Rva::new((section_va + entry_offset) as u64);
    let recovery = recover::recover(&image, &decoder, &[entry]).expect("recovery should not error");
    (image, recovery)
}

/// `mov eax, 1; add eax, 2; ret` — one function, one block, no branches.
#[test]
fn straight_line_code_is_a_single_block() {
    #[rustfmt::skip]
    let code = [
        0xB8, 0x01, 0x00, 0x00, 0x00, // mov eax, 1
        0x83, 0xC0, 0x02,             // add eax, 2
        0xC3,                         // ret
    ];

    let (_image, recovery) = recover_from(&code, 0);
    assert_eq!(recovery.cfg.function_count(), 1);
    assert_eq!(recovery.cfg.block_count(), 1);
}

/// `xor eax,eax; cmp eax,eax; je taken; mov ebx,1; taken: mov ecx,2; ret`.
/// The comparison is tautological, so the opaque predicate resolves to
/// "always taken": the dead fallthrough arm (`mov ebx, 1`) never becomes
/// part of any block.
#[test]
fn always_taken_predicate_skips_the_fallthrough_arm() {
    #[rustfmt::skip]
    let code = [
        0x31, 0xC0,                   // xor eax, eax
        0x39, 0xC0,                   // cmp eax, eax
        0x74, 0x05,                   // je +5 (-> offset 11)
        0xBB, 0x01, 0x00, 0x00, 0x00, // mov ebx, 1  (dead)
        0xB9, 0x02, 0x00, 0x00, 0x00, // mov ecx, 2  (offset 11, jump target)
        0xC3,                         // ret
    ];

    let (image, recovery) = recover_from(&code, 0);
    assert_eq!(recovery.cfg.function_count(), 1);
    assert_eq!(recovery.cfg.block_count(), 2);

    let section_va = image.sections()[0].virtual_addr.value();
    assert!(!recovery.cfg.is_address_visited(Rva::new(section_va + 6)));
    assert!(recovery.cfg.is_address_visited(Rva::new(section_va + 11)));
}

/// `mov ecx,3; loop: dec ecx; cmp ecx,0; jne loop; ret`. The jump target
/// lands inside the block that contains its own terminator, forcing
/// [`ucfg::cfg::Cfg::split_basic_block`] to split the block the driver is
/// currently processing rather than some earlier, already-settled one.
///
/// The resolver only simulates a single pass, so it sees `ecx` go 3 -> 2
/// and reports the branch as always-taken; it has no way to know the loop
/// eventually reaches zero. That's a real limitation of single-pass
/// simulation, not a test bug — the assertions below only check the shape
/// of the recovered graph, not whether the loop "actually" terminates.
#[test]
fn self_referential_back_edge_splits_the_current_block() {
    #[rustfmt::skip]
    let code = [
        0xB9, 0x03, 0x00, 0x00, 0x00, // mov ecx, 3
        0xFF, 0xC9,                   // dec ecx       (offset 5, loop top)
        0x83, 0xF9, 0x00,             // cmp ecx, 0
        0x75, 0xF9,                   // jne -7 (-> offset 5)
        0xC3,                         // ret (unreached by this driver)
    ];

    let (image, recovery) = recover_from(&code, 0);
    assert_eq!(recovery.cfg.function_count(), 1);
    assert_eq!(recovery.cfg.block_count(), 2);

    let section_va = image.sections()[0].virtual_addr.value();
    let loop_top = Rva::new(section_va + 5);
    assert!(recovery.cfg.is_address_visited(loop_top));

    let header = recovery.cfg.block_at(Rva::new(section_va)).unwrap();
    let tail = recovery.cfg.block_at(loop_top).unwrap();
    assert_ne!(header, tail);
    assert!(recovery.cfg.block_preds(tail).contains(&header));
    assert!(recovery.cfg.block_preds(tail).contains(&tail));
    assert!(!recovery.cfg.is_address_visited(Rva::new(section_va + 12)));
}

/// `call callee; mov eax,0; ret` / `callee: ret`. A direct call both links
/// a new function into the call graph and continues the caller at the
/// return address.
#[test]
fn direct_call_links_callee_and_continues_at_return_address() {
    #[rustfmt::skip]
    let code = [
        0xE8, 0x06, 0x00, 0x00, 0x00, // call +6 (-> offset 11)
        0xB8, 0x00, 0x00, 0x00, 0x00, // mov eax, 0
        0xC3,                         // ret        (offset 10)
        0xC3,                         // ret        (offset 11, callee)
    ];

    let (image, recovery) = recover_from(&code, 0);
    assert_eq!(recovery.cfg.function_count(), 2);
    assert_eq!(recovery.cfg.block_count(), 3);

    let section_va = image.sections()[0].virtual_addr.value();
    assert!(recovery.cfg.is_address_visited(Rva::new(section_va + 5)));
    assert!(recovery.cfg.is_address_visited(Rva::new(section_va + 11)));
}

/// `mov rax, [rbx]; call rax; ret`. `rbx` is never initialized anywhere in
/// the function, so the backward register slice for the indirect call
/// target runs off the top of the entry block with no predecessor to fall
/// back to: the call is recorded as unresolvable, but the driver still
/// continues at the return address.
#[test]
fn indirect_call_with_no_known_target_is_unresolvable_but_continues() {
    #[rustfmt::skip]
    let code = [
        0x48, 0x8B, 0x03, // mov rax, [rbx]
        0xFF, 0xD0,       // call rax
        0xC3,             // ret
    ];

    let (_image, recovery) = recover_from(&code, 0);
    assert_eq!(recovery.cfg.function_count(), 1);
    assert_eq!(recovery.cfg.block_count(), 2);
}
