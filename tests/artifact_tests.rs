use std::path::Path;

use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::Value;

use login_flow_explorer::artifacts::annotate::{MarkerAnnotator, annotate_in_place};
use login_flow_explorer::artifacts::store::{ACTION_LOG_FILE, ArtifactStore, SUMMARY_FILE, sanitize_url};
use login_flow_explorer::error::ErrorKind;
use login_flow_explorer::explorer::combinations::Combination;
use login_flow_explorer::trace::logger::ActionLog;
use login_flow_explorer::trace::trace::{ClickPoint, FlowRecord, Termination};

mod common;
use common::fakes::FailingAnnotator;

fn blank_png(path: &Path) {
    RgbaImage::from_pixel(32, 32, Rgba([0, 0, 255, 255]))
        .save_with_format(path, ImageFormat::Png)
        .unwrap();
}

// ============================================================================
// Layout
// ============================================================================

#[test]
fn sanitize_drops_scheme_and_non_word_characters() {
    assert_eq!(sanitize_url("https://www.bank.com"), "www_bank_com");
    assert_eq!(sanitize_url("http://bank.com/login?next=/home"), "bank_com_login_next__home");
    assert_eq!(sanitize_url("bank-online.com"), "bank_online_com");
}

#[test]
fn sanitize_replaces_non_ascii_letters() {
    assert_eq!(sanitize_url("https://bücher.de"), "b_cher_de");
    assert_eq!(sanitize_url("http://банк.рф/вход"), "____________");
}

#[test]
fn flow_directories_nest_under_sanitized_url() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(tmp.path().join("screenshot_flows"));

    let url_dir = store.url_dir("https://www.bank.com").unwrap();
    let flow = url_dir.flow_dir(3).unwrap();

    let expected = tmp.path().join("screenshot_flows").join("www_bank_com").join("flow_3");
    assert_eq!(flow.path(), expected);
    assert!(expected.is_dir());
    assert_eq!(flow.screenshot_path(1), expected.join("page_1.png"));
    assert_eq!(flow.markup_path(2), expected.join("page_2.html"));
    assert_eq!(flow.action_log_path(), expected.join(ACTION_LOG_FILE));
}

// ============================================================================
// Action log
// ============================================================================

#[test]
fn action_log_json_uses_wire_field_names() {
    let tmp = tempfile::tempdir().unwrap();
    let flow = ArtifactStore::new(tmp.path()).url_dir("bank.com").unwrap().flow_dir(0).unwrap();

    let mut log = ActionLog::new();
    log.record(
        ClickPoint::new(120, 45),
        "<button>Log in</button>".into(),
        &flow.screenshot_path(1),
        "https://bank.com/",
    );
    flow.write_action_log(&log).unwrap();

    let raw: Value =
        serde_json::from_str(&std::fs::read_to_string(flow.action_log_path()).unwrap()).unwrap();
    let step = &raw[0];
    assert_eq!(step["step"], 1);
    assert_eq!(step["clickPosition"]["x"], 120);
    assert_eq!(step["clickPosition"]["y"], 45);
    assert_eq!(step["elementHTML"], "<button>Log in</button>");
    assert_eq!(step["url"], "https://bank.com/");
    assert_eq!(step["screenshot"], flow.screenshot_path(1).display().to_string());
}

#[test]
fn action_log_reads_back_what_was_written() {
    let tmp = tempfile::tempdir().unwrap();
    let flow = ArtifactStore::new(tmp.path()).url_dir("bank.com").unwrap().flow_dir(0).unwrap();

    let mut log = ActionLog::new();
    for i in 1..=3 {
        log.record(
            ClickPoint::new(i, i),
            format!("<a id=\"{}\">", i),
            &flow.screenshot_path(i as u32),
            "https://bank.com/",
        );
    }
    flow.write_action_log(&log).unwrap();

    let steps = flow.read_action_log().unwrap();
    assert_eq!(steps, log.steps());
    let numbers: Vec<u32> = steps.iter().map(|s| s.step).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(log.last_element(), Some("<a id=\"3\">"));
}

#[test]
fn empty_log_is_an_empty_array() {
    let tmp = tempfile::tempdir().unwrap();
    let flow = ArtifactStore::new(tmp.path()).url_dir("bank.com").unwrap().flow_dir(0).unwrap();

    flow.write_action_log(&ActionLog::new()).unwrap();

    let raw = std::fs::read_to_string(flow.action_log_path()).unwrap();
    assert_eq!(raw.trim(), "[]");
}

#[test]
fn rewriting_log_leaves_no_temp_files() {
    let tmp = tempfile::tempdir().unwrap();
    let flow = ArtifactStore::new(tmp.path()).url_dir("bank.com").unwrap().flow_dir(0).unwrap();

    let mut log = ActionLog::new();
    flow.write_action_log(&log).unwrap();
    log.record(ClickPoint::new(1, 2), "<a>".into(), &flow.screenshot_path(1), "u");
    flow.write_action_log(&log).unwrap();

    let names: Vec<String> = std::fs::read_dir(flow.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![ACTION_LOG_FILE.to_string()]);
    assert_eq!(flow.read_action_log().unwrap().len(), 1);
}

#[test]
fn summary_lists_flows_with_termination() {
    let tmp = tempfile::tempdir().unwrap();
    let url_dir = ArtifactStore::new(tmp.path()).url_dir("bank.com").unwrap();

    let records = vec![
        FlowRecord {
            flow: 0,
            combination: Combination::new(vec!["personal".into()]),
            termination: Termination::NoTarget,
            steps: 2,
        },
        FlowRecord {
            flow: 1,
            combination: Combination::new(vec!["business".into()]),
            termination: Termination::ProtocolError("timed out".into()),
            steps: 0,
        },
    ];
    let path = url_dir.write_summary(&records).unwrap();
    assert_eq!(path, url_dir.path().join(SUMMARY_FILE));

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw[0]["combination"][0], "personal");
    assert_eq!(raw[0]["termination"]["reason"], "no_target");
    assert_eq!(raw[1]["termination"]["reason"], "protocol_error");
    assert_eq!(raw[1]["termination"]["detail"], "timed out");

    let back: Vec<FlowRecord> = serde_json::from_value(raw).unwrap();
    assert_eq!(back, records);
}

// ============================================================================
// Annotation
// ============================================================================

#[test]
fn marker_is_drawn_in_place() {
    let tmp = tempfile::tempdir().unwrap();
    let shot = tmp.path().join("page_1.png");
    blank_png(&shot);

    annotate_in_place(&MarkerAnnotator::default(), &shot, ClickPoint::new(16, 16)).unwrap();

    let img = image::open(&shot).unwrap().to_rgba8();
    assert_eq!(img.dimensions(), (32, 32));
    assert_eq!(img.get_pixel(16, 16).0, [255, 0, 0, 255]);
    assert_eq!(img.get_pixel(16, 8).0, [255, 0, 0, 255]);
    assert_eq!(img.get_pixel(0, 0).0, [0, 0, 255, 255]);
}

#[test]
fn failed_annotation_leaves_original_bytes() {
    let tmp = tempfile::tempdir().unwrap();
    let shot = tmp.path().join("page_1.png");
    blank_png(&shot);
    let before = std::fs::read(&shot).unwrap();

    let err = annotate_in_place(&FailingAnnotator, &shot, ClickPoint::new(4, 4)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Annotation);

    assert_eq!(std::fs::read(&shot).unwrap(), before);
    let entries = std::fs::read_dir(tmp.path()).unwrap().count();
    assert_eq!(entries, 1);
}

#[test]
fn undecodable_screenshot_is_an_annotation_error() {
    let tmp = tempfile::tempdir().unwrap();
    let shot = tmp.path().join("page_1.png");
    std::fs::write(&shot, b"not an image").unwrap();

    let err = annotate_in_place(&MarkerAnnotator::default(), &shot, ClickPoint::new(1, 1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Annotation);
    assert_eq!(std::fs::read(&shot).unwrap(), b"not an image");
}
