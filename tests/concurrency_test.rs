//! Compiled rules are shared read-only between threads; every scan owns its
//! scratch state.

use scan_engine::{compile, Rules, ScanResults, Scanner};
use std::thread;

const RULES: &str = r#"
rule literal { strings: $a = "alpha" condition: $a }
rule counted { strings: $b = "beta" condition: #b >= 2 }
rule hex { strings: $h = { 67 61 [1-2] 6D 61 } condition: $h }
rule combined { condition: literal and not counted }
"#;

fn buffers() -> Vec<Vec<u8>> {
    (0..200)
        .map(|i| {
            let mut data = format!("record {i}: ").into_bytes();
            if i % 2 == 0 {
                data.extend_from_slice(b"alpha ");
            }
            for _ in 0..(i % 4) {
                data.extend_from_slice(b"beta ");
            }
            if i % 5 == 0 {
                data.extend_from_slice(b"ga__ma");
            }
            data
        })
        .collect()
}

fn sequential(rules: &Rules, buffers: &[Vec<u8>]) -> Vec<ScanResults> {
    buffers.iter().map(|data| rules.scan(data)).collect()
}

#[test]
fn test_scan_many_matches_sequential_order() {
    let rules = compile(RULES).unwrap();
    let buffers = buffers();
    let slices: Vec<&[u8]> = buffers.iter().map(Vec::as_slice).collect();

    let parallel = rules.scan_many(&slices);
    assert_eq!(parallel.len(), buffers.len());
    assert_eq!(parallel, sequential(&rules, &buffers));
    assert!(parallel[0].matched("literal"));
    assert!(parallel[0].matched("hex"));
    assert!(parallel[3].matched("counted"));
}

#[test]
fn test_threads_share_rules() {
    let rules = compile(RULES).unwrap();
    let buffers = buffers();
    let expected = sequential(&rules, &buffers);

    thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let rules = &rules;
                let buffers = &buffers;
                s.spawn(move || {
                    let mut scanner = Scanner::new(rules);
                    buffers
                        .iter()
                        .skip(worker)
                        .step_by(4)
                        .map(|data| scanner.scan(data))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for (worker, handle) in handles.into_iter().enumerate() {
            let results = handle.join().unwrap();
            let wanted: Vec<&ScanResults> = expected.iter().skip(worker).step_by(4).collect();
            assert_eq!(results.iter().collect::<Vec<_>>(), wanted);
        }
    });
}

#[test]
fn test_rules_are_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Rules>();
    assert_send_sync::<ScanResults>();
}

#[test]
fn test_scanners_with_different_globals_do_not_interfere() {
    let mut compiler = scan_engine::Compiler::new();
    compiler
        .define_global("needle", "alpha")
        .unwrap()
        .add_source("rule has_needle { condition: needle == \"alpha\" }")
        .unwrap();
    let rules = compiler.build().unwrap();

    thread::scope(|s| {
        let changed = s.spawn(|| {
            let mut scanner = Scanner::new(&rules);
            scanner.set_global("needle", "gamma").unwrap();
            (0..100).all(|_| scanner.scan(b"").is_empty())
        });
        let untouched = s.spawn(|| {
            let mut scanner = Scanner::new(&rules);
            (0..100).all(|_| scanner.scan(b"").matched("has_needle"))
        });
        assert!(changed.join().unwrap());
        assert!(untouched.join().unwrap());
    });
}
