use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, TimeZone, Utc};
use serde_json::{Value, json};
use tempfile::tempdir;

use safety_corpus::apps::run_curate;
use safety_corpus::validator::ViolationKind;
use safety_corpus::{
    CanonicalRecord, Category, CurationConfig, CurationError, CurationPipeline, PendingItem,
    ResolutionMethod, SplitLabel,
};

const TOPICS: [&str; 8] = [
    "train timings for the weekend",
    "recipe for mango pickle",
    "cricket score from last night",
    "exam results were announced",
    "power cut in our area again",
    "new phone camera review",
    "movie tickets for sunday",
    "monsoon flooding near the station",
];

fn annotation(
    item: &str,
    annotator: &str,
    category: &str,
    language: &str,
    minute: i64,
    text: &str,
) -> Value {
    let created_at = Utc.with_ymd_and_hms(2025, 2, 25, 9, 0, 0).unwrap() + Duration::minutes(minute);
    let severity = if category == "safe" { Value::Null } else { json!("medium") };
    json!({
        "item_id": item,
        "annotator_id": annotator,
        "text": text,
        "primary_category": category,
        "severity": severity,
        "language_tag": language,
        "confidence": 0.8,
        "created_at": created_at.to_rfc3339(),
    })
}

fn filler(prefix: &str, category: &str, count: usize) -> Vec<Value> {
    (0..count)
        .map(|idx| {
            let language = if idx % 2 == 0 { "en" } else { "en-hi" };
            let text = format!(
                "{} #{prefix}{idx} {}",
                TOPICS[idx % TOPICS.len()],
                "x".repeat(idx % 13)
            );
            annotation(
                &format!("{prefix}{idx:03}"),
                "A9",
                category,
                language,
                idx as i64,
                &text,
            )
        })
        .collect()
}

fn write_jsonl(path: &Path, rows: &[Value]) {
    let body: String = rows.iter().map(|row| format!("{row}\n")).collect();
    fs::write(path, body).unwrap();
}

fn scenario_rows() -> Vec<Value> {
    let mut rows = vec![
        annotation("X1", "A1", "hate_speech", "en", 0, "you people should leave this country"),
        annotation("X1", "A2", "hate_speech", "en", 1, "you people should leave this country"),
        annotation("X2", "A1", "phishing", "en-hi", 2, "apna KYC update karo warna account band"),
        annotation("X2", "A2", "phishing", "en-hi", 3, "apna KYC update karo warna account band"),
        annotation("X2", "A3", "safe", "en-hi", 4, "apna KYC update karo warna account band"),
        annotation("X3", "A1", "safe", "te", 5, "meeru repu vastara?"),
        annotation("X3", "A2", "violence", "te", 6, "meeru repu vastara?"),
        annotation("X4", "A1", "safe", "en", 7, "see you at the library at five"),
        annotation("D1", "A1", "phishing", "en", 8, "Claim your FREE prize now"),
        annotation("D2", "A2", "phishing", "en", 9, "claim your free   prize NOW"),
        annotation("B1", "A1", "malware", "en", 10, "install this apk to watch free"),
    ];
    let mut bad = annotation("B1", "A2", "malware", "en", 11, "install this apk to watch free");
    bad["confidence"] = json!(1.5);
    rows.push(bad);
    rows.extend(filler("S", "safe", 60));
    rows.extend(filler("P", "phishing", 30));
    rows
}

fn read_records(path: &Path) -> Vec<CanonicalRecord> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn input_dir(rows: &[Value]) -> (tempfile::TempDir, PathBuf) {
    let temp = tempdir().unwrap();
    let dir = temp.path().join("annotations");
    fs::create_dir_all(&dir).unwrap();
    write_jsonl(&dir.join("batch_01.jsonl"), rows);
    (temp, dir)
}

#[test]
fn scenarios_resolve_as_documented() {
    let (_temp, dir) = input_dir(&scenario_rows());
    let pipeline = CurationPipeline::new(CurationConfig::default()).unwrap();
    let output = pipeline.run_paths(&[dir]).unwrap();

    let x1 = output.corpus.get("X1").expect("X1 merged");
    assert_eq!(x1.resolution_method, ResolutionMethod::Unanimous);
    assert_eq!(x1.agreement_score, Some(1.0));

    let x2 = output.corpus.get("X2").expect("X2 merged");
    assert_eq!(x2.primary_category, Category::Phishing);
    assert_eq!(x2.resolution_method, ResolutionMethod::Majority);

    assert!(output.corpus.get("X3").is_none());
    assert_eq!(
        output
            .pending
            .iter()
            .map(|item| item.item_id.as_str())
            .collect::<Vec<_>>(),
        vec!["X3"]
    );

    let x4 = output.corpus.get("X4").expect("X4 merged");
    assert_eq!(x4.resolution_method, ResolutionMethod::SingleRater);
    assert_eq!(x4.agreement_score, None);

    // One bad annotation blocks the whole item.
    assert!(output.corpus.get("B1").is_none());
    assert!(
        output
            .validation
            .by_kind
            .contains_key(&ViolationKind::RangeViolation)
    );
    assert_eq!(output.validation.invalid(), 1);
}

#[test]
fn duplicates_are_collapsed_before_splitting() {
    let (_temp, dir) = input_dir(&scenario_rows());
    let output = CurationPipeline::new(CurationConfig::default())
        .unwrap()
        .run_paths(&[dir])
        .unwrap();

    assert_eq!(output.duplicates.removed_records, 1);
    assert_eq!(output.duplicates.exact_clusters[0].survivor, "D1");
    let split_ids: HashSet<String> = [SplitLabel::Train, SplitLabel::Validation, SplitLabel::Test]
        .into_iter()
        .flat_map(|label| output.splits.records(label).iter().map(|r| r.item_id.clone()))
        .collect();
    assert!(split_ids.contains("D1"));
    assert!(!split_ids.contains("D2"));
    assert!(!split_ids.contains("X3"));
    assert_eq!(output.splits.len(), output.corpus.len() - 1);
    let d1 = output
        .splits
        .records(SplitLabel::Train)
        .iter()
        .chain(output.splits.validation.iter())
        .chain(output.splits.test.iter())
        .find(|r| r.item_id == "D1")
        .unwrap();
    assert_eq!(d1.contributing_annotator_ids, vec!["A1", "A2"]);
}

#[test]
fn written_corpus_is_complete_and_reproducible() {
    let (temp, dir) = input_dir(&scenario_rows());
    let pipeline = CurationPipeline::new(CurationConfig::default()).unwrap();
    let first_out = temp.path().join("run_a");
    let second_out = temp.path().join("run_b");
    pipeline
        .run_paths(&[dir.clone()])
        .unwrap()
        .write_to(&first_out)
        .unwrap();
    pipeline
        .run_paths(&[dir])
        .unwrap()
        .write_to(&second_out)
        .unwrap();

    for name in [
        "train.jsonl",
        "validation.jsonl",
        "test.jsonl",
        "pending.jsonl",
        "validation_report.json",
        "agreement_report.json",
        "duplicate_report.json",
        "stats.json",
        "report.txt",
    ] {
        assert!(first_out.join(name).exists(), "missing {name}");
    }
    assert!(!first_out.join(".staging").exists());

    for name in [
        "train.jsonl",
        "validation.jsonl",
        "test.jsonl",
        "stats.json",
        "report.txt",
    ] {
        assert_eq!(
            fs::read(first_out.join(name)).unwrap(),
            fs::read(second_out.join(name)).unwrap(),
            "{name} differs between runs"
        );
    }

    let train = read_records(&first_out.join("train.jsonl"));
    assert!(!train.is_empty());
    assert!(
        train
            .iter()
            .all(|r| r.split_assignment() == Some(SplitLabel::Train))
    );
    let pending: Vec<PendingItem> = fs::read_to_string(first_out.join("pending.jsonl"))
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(pending[0].item_id, "X3");

    let stats: Value =
        serde_json::from_str(&fs::read_to_string(first_out.join("stats.json")).unwrap()).unwrap();
    assert!(stats["balance"].is_null());
    assert!(stats["statistics"]["per_split"]["train"]["total"].as_u64().unwrap() > 0);
}

#[test]
fn raters_must_be_independent_across_files() {
    let temp = tempdir().unwrap();
    let first = temp.path().join("a.jsonl");
    let second = temp.path().join("b.jsonl");
    let text = "aaj raat party pakka";
    let mut unreadable = annotation("", "A1", "safe", "en-hi", 0, text);
    unreadable.as_object_mut().unwrap().remove("item_id");
    let mut own_tie_break = annotation("X5", "A1", "safe", "en-hi", 4, text);
    own_tie_break["adjudication"] = json!(true);

    let mut first_rows = vec![
        annotation("X5", "A1", "phishing", "en-hi", 1, text),
        annotation("X5", "A2", "safe", "en-hi", 2, text),
        unreadable.clone(),
    ];
    first_rows.extend(filler("S", "safe", 10));
    write_jsonl(&first, &first_rows);
    write_jsonl(
        &second,
        &[
            unreadable,
            annotation("X5", "A1", "phishing", "en-hi", 3, text),
            own_tie_break,
        ],
    );

    let output = CurationPipeline::new(CurationConfig::default())
        .unwrap()
        .run_paths(&[first.clone(), second.clone()])
        .unwrap();

    // A1 voting twice and then adjudicating does not outvote A2.
    assert!(output.corpus.get("X5").is_none());
    assert_eq!(output.pending.len(), 1);
    assert_eq!(output.pending[0].item_id, "X5");
    assert_eq!(output.pending[0].annotator_ids, vec!["A1", "A2"]);
    assert_eq!(output.validation.warnings.len(), 2);

    let sources: Vec<(&Path, Option<usize>)> = output
        .validation
        .violations
        .iter()
        .map(|v| (v.source.as_deref().unwrap(), v.line))
        .collect();
    assert_eq!(
        sources,
        vec![(first.as_path(), Some(3)), (second.as_path(), Some(1))]
    );
    assert_ne!(
        output.validation.violations[0].item_id,
        output.validation.violations[1].item_id
    );
}

#[test]
fn feasible_balance_feeds_the_splitter() {
    let mut rows = filler("S", "safe", 60);
    rows.extend(filler("P", "phishing", 30));
    rows.extend(filler("M", "malware", 5));
    let (_temp, dir) = input_dir(&rows);

    let mut config = CurationConfig::default();
    config.balance.target = BTreeMap::from([(Category::Safe, 0.6), (Category::Phishing, 0.4)]);
    let output = CurationPipeline::new(config).unwrap().run_paths(&[dir]).unwrap();

    let balance = output.report.balance.as_ref().expect("balance ran");
    assert_eq!(balance.output_total, 95);
    assert_eq!(balance.dropped_categories, vec![(Category::Malware, 5)]);
    assert_eq!(output.splits.len(), 95);

    let mut labels: HashMap<String, HashSet<SplitLabel>> = HashMap::new();
    for label in [SplitLabel::Train, SplitLabel::Validation, SplitLabel::Test] {
        for record in output.splits.records(label) {
            assert_ne!(record.primary_category, Category::Malware);
            labels
                .entry(record.item_id.clone())
                .or_default()
                .insert(label);
        }
    }
    assert!(labels.values().all(|set| set.len() == 1));
    let overall = &output.report.statistics.overall;
    let phishing = overall
        .categories
        .iter()
        .find(|share| share.key == Category::Phishing)
        .unwrap();
    assert!((phishing.share - 0.4).abs() <= 0.05);
}

#[test]
fn infeasible_target_aborts_without_output() {
    let mut rows = filler("S", "safe", 40);
    rows.extend(filler("V", "violence", 4));
    let (temp, dir) = input_dir(&rows);

    let mut config = CurationConfig::default();
    config.balance.target = BTreeMap::from([(Category::Safe, 0.5), (Category::Violence, 0.5)]);
    let err = CurationPipeline::new(config.clone())
        .unwrap()
        .run_paths(&[dir.clone()])
        .unwrap_err();
    assert!(matches!(err, CurationError::InfeasibleTarget { .. }));

    let config_path = temp.path().join("config.json");
    fs::write(&config_path, serde_json::to_string(&config).unwrap()).unwrap();
    let out = temp.path().join("corpus");
    let result = run_curate(
        [
            "--input".to_string(),
            dir.display().to_string(),
            "--output-dir".to_string(),
            out.display().to_string(),
            "--config".to_string(),
            config_path.display().to_string(),
        ]
        .into_iter(),
    );
    assert!(result.is_err());
    assert!(!out.join("train.jsonl").exists());
}

#[test]
fn malformed_line_is_fatal() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("broken.jsonl");
    fs::write(
        &path,
        format!("{}\nnot json at all\n", annotation("X1", "A1", "safe", "en", 0, "hello")),
    )
    .unwrap();
    let err = CurationPipeline::new(CurationConfig::default())
        .unwrap()
        .run_paths(&[path])
        .unwrap_err();
    assert!(matches!(err, CurationError::MalformedInput { line: 2, .. }));
}

#[test]
fn bad_configuration_is_rejected_up_front() {
    let mut config = CurationConfig::default();
    config.split.ratios.train = 0.9;
    assert!(matches!(
        CurationPipeline::new(config).unwrap_err(),
        CurationError::Configuration(_)
    ));
}

#[test]
fn cli_runs_end_to_end() {
    let (temp, dir) = input_dir(&scenario_rows());
    let out = temp.path().join("cli_out");
    run_curate(
        [
            "--input",
            dir.to_str().unwrap(),
            "--output-dir",
            out.to_str().unwrap(),
            "--seed",
            "7",
            "--split-ratios",
            "0.8,0.1,0.1",
            "--no-balance",
        ]
        .into_iter()
        .map(str::to_string),
    )
    .unwrap();
    let total: usize = ["train.jsonl", "validation.jsonl", "test.jsonl"]
        .iter()
        .map(|name| read_records(&out.join(name)).len())
        .sum();
    // 97 items minus pending X3, blocked B1 and duplicate D2.
    assert_eq!(total, 94);
    let summary = fs::read_to_string(out.join("report.txt")).unwrap();
    assert!(summary.contains("seed 7"));
}
