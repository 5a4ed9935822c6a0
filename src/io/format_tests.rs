use anyhow::format_err;

use crate::io::format::{boxed, log_section, section_marker, yes_no, RULE_WIDTH};

#[test]
fn test_format_boxed_title() {
    let lines = boxed("CASPT2 Equation Generation");
    let widths = lines.iter().map(|line| line.chars().count()).collect::<Vec<_>>();
    assert_eq!(widths, vec![RULE_WIDTH + 4; 3]);
    assert!(lines[1].starts_with("│ ") && lines[1].ends_with(" │"));
    assert!(lines[1].contains("CASPT2 Equation Generation"));

    let long = "x".repeat(RULE_WIDTH + 10);
    let lines = boxed(&long);
    assert_eq!(lines[0].chars().count(), RULE_WIDTH + 14);
    assert_eq!(lines[1], format!("│ {long} │"));
}

#[test]
fn test_format_section_markers() {
    let open = section_marker("residual", false);
    let close = section_marker("residual", true);
    assert_eq!(open, format!("<<< [Begin] residual {}", "<".repeat(RULE_WIDTH - 21)));
    assert!(close.starts_with(">>> [ End ] residual >"));
    assert_eq!(open.chars().count(), RULE_WIDTH);
    assert_eq!(close.chars().count(), RULE_WIDTH);

    let long = "y".repeat(RULE_WIDTH);
    assert_eq!(section_marker(&long, true), format!(">>> [ End ] {long} "));
}

#[test]
fn test_format_log_section_passes_result_through() {
    let value = log_section("energy", || Ok(42)).unwrap();
    assert_eq!(value, 42);

    let mut ran = false;
    let err = log_section("density", || -> Result<(), anyhow::Error> {
        ran = true;
        Err(format_err!("No equations defined for `density`."))
    })
    .unwrap_err();
    assert!(ran);
    assert_eq!(err.to_string(), "No equations defined for `density`.");
}

#[test]
fn test_format_yes_no() {
    assert_eq!(yes_no(true), "yes");
    assert_eq!(yes_no(false), "no");
}
