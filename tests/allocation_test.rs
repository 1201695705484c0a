//! Compiling, scanning and dropping rules returns every byte it allocated.

use scan_engine::{compile, Compiler, ScanConfig};
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

struct CountingAllocator;

thread_local! {
    static LIVE_BYTES: Cell<isize> = const { Cell::new(0) };
}

fn adjust(delta: isize) {
    let _ = LIVE_BYTES.try_with(|live| live.set(live.get() + delta));
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            adjust(layout.size() as isize);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        adjust(-(layout.size() as isize));
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            adjust(new_size as isize - layout.size() as isize);
        }
        new_ptr
    }
}

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

fn live_bytes() -> isize {
    LIVE_BYTES.with(Cell::get)
}

const SOURCE: &str = r#"
global rule non_empty { condition: filesize > 0 }
private rule header { strings: $mz = { 4D 5A } condition: $mz at 0 }
rule everything : demo {
    meta:
        author = "tests"
    strings:
        $a = "alpha" nocase wide ascii
        $b = "beta" xor(1-8)
        $c = /gam+a/
        $d = { 64 [1-3] 65 ?? 74 }
        $e = "delta" base64
    condition:
        header and 2 of them and for any of ($a, $b) : (# >= 1)
}
"#;

fn compile_scan_drop() {
    let mut compiler = Compiler::new();
    compiler.define_global("limit", 10).unwrap();
    compiler.add_source(SOURCE).unwrap();
    let _ = compiler.add_source("rule broken { condition: missing }");
    let rules = compiler.build().unwrap();

    let config = ScanConfig {
        include_match_data: true,
        ..Default::default()
    };
    let results = rules.scan_with_config(b"MZ ALPHA gammma d..e.t", &config).unwrap();
    assert!(results.matched("everything"));
    assert!(!results.to_json().unwrap().is_empty());
}

#[test]
fn test_compile_scan_drop_releases_memory() {
    // Warm up lazily initialised statics (tracing callsites, std buffers).
    compile_scan_drop();

    let baseline = live_bytes();
    for _ in 0..3 {
        compile_scan_drop();
    }
    assert_eq!(live_bytes(), baseline);
}

#[test]
fn test_failed_compilation_releases_memory() {
    let sources = [
        "rule a { strings: $x = { 4D [2-] } condition: $x }",
        "rule a { condition: b } rule b { condition: a }",
        "rule {",
    ];
    for source in sources {
        assert!(compile(source).is_err());
    }

    let baseline = live_bytes();
    for source in sources {
        assert!(compile(source).is_err());
    }
    assert_eq!(live_bytes(), baseline);
}
