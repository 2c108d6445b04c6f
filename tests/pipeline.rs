use physio_fusion::config::{FusionConfig, PipelineConfig};
use physio_fusion::pipeline::{default_processor, fuse_directories, process_directory, FUSED_FILENAME};
use physio_fusion::{LabelTable, Modality};
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

const START_EPOCH: f64 = 1_700_000_000.0;

fn write_recording(path: &Path, column: &str, rate: f64, seconds: f64, signal: impl Fn(f64) -> f64) {
    let n = (seconds * rate) as usize;
    let mut text = format!("LocalTimestamp,{column}\n");
    for i in 0..n {
        let t = i as f64 / rate;
        text.push_str(&format!("{:.3},{:.6}\n", START_EPOCH + t, signal(t)));
    }
    fs::write(path, text).unwrap();
}

fn labels() -> LabelTable {
    LabelTable::from_json_str(
        r#"{"label": [
            {"id": "S01", "gender": "F", "bmi": 22.5},
            {"id": "S02", "gender": "M", "bmi": 27.1}
        ]}"#,
    )
    .unwrap()
}

fn setup(root: &Path) {
    let eda = root.join("Raw/eda");
    let ppg = root.join("Raw/ppg");
    fs::create_dir_all(&eda).unwrap();
    fs::create_dir_all(&ppg).unwrap();

    let pulse = |t: f64| (2.0 * PI * 1.2 * t).sin().max(0.0).powi(3);
    let conductance = |t: f64| 2.0 + 0.01 * t + 0.3 * (-((t - 30.0) / 2.0).powi(2)).exp();

    write_recording(&ppg.join("S01_ppg.csv"), "PG", 100.0, 120.0, pulse);
    write_recording(&eda.join("S01_eda.csv"), "EA", 15.0, 120.0, conductance);
    // No label for S99; it must be skipped without stopping the batch.
    write_recording(&ppg.join("S99_ppg.csv"), "PG", 100.0, 10.0, pulse);
}

#[test]
fn process_then_fuse_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    setup(root);
    let labels = labels();

    let mut reports = Vec::new();
    for modality in [Modality::Eda, Modality::Ppg] {
        let input = root.join("Raw").join(modality.prefix().to_lowercase());
        let output = root.join("Processed").join(modality.prefix().to_lowercase());
        let processor = default_processor(modality);
        let config = PipelineConfig::for_modality(modality);
        reports.push(process_directory(&input, &output, &labels, processor.as_ref(), &config).unwrap());
    }
    assert_eq!(reports[0].written.len(), 1);
    assert_eq!(reports[1].written.len(), 1);
    assert_eq!(reports[1].skipped.len(), 1);

    let ppg_text = fs::read_to_string(root.join("Processed/ppg/S01_ppg.csv")).unwrap();
    let ppg_header = ppg_text.lines().next().unwrap();
    assert!(ppg_header.starts_with("DateTime,PPG_Raw,PPG_Clean,PPG_Peaks,PPG_Rate"));
    assert!(ppg_header.contains("HRV_RMSSD"));
    assert!(ppg_header.ends_with("RR_Mean,RMSSD,SDNN,id,gender,bmi"));
    assert_eq!(ppg_text.lines().count(), 121);

    let out_dir = root.join("Combined/eda_ppg");
    let report = fuse_directories(
        &root.join("Processed/eda"),
        &root.join("Processed/ppg"),
        &out_dir,
        chrono_tz::Asia::Bangkok,
        &FusionConfig::default(),
    )
    .unwrap();
    assert_eq!(report.output, out_dir.join(FUSED_FILENAME));
    assert_eq!(report.fused_subjects, vec!["S01".to_string()]);
    assert_eq!(report.rows, 120);

    let fused = fs::read_to_string(&report.output).unwrap();
    let header = fused.lines().next().unwrap();
    assert!(header.starts_with("DateTime,EDA_Raw"));
    assert!(header.contains("PPG_Rate"));
    assert!(header.ends_with(",id,gender,bmi"));
    assert_eq!(header.matches(",id").count(), 1);
    let first = fused.lines().nth(1).unwrap();
    assert!(first.starts_with("2023-11-15 05:13:20+07:00,"));
    assert!(first.contains(",S01,F,"));
}

#[test]
fn missing_input_directory_aborts_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let processor = default_processor(Modality::Eda);
    let result = process_directory(
        &dir.path().join("absent"),
        &dir.path().join("out"),
        &labels(),
        processor.as_ref(),
        &PipelineConfig::for_modality(Modality::Eda),
    );
    assert!(result.is_err());
}

#[test]
fn unpaired_subjects_are_left_out_of_the_fusion() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let eda = root.join("eda");
    let ppg = root.join("ppg");
    fs::create_dir_all(&eda).unwrap();
    fs::create_dir_all(&ppg).unwrap();
    fs::write(
        eda.join("S01_eda.csv"),
        "DateTime,EDA_Clean,id\n2023-11-15 05:13:20+07:00,1.5,S01\n",
    )
    .unwrap();
    fs::write(
        ppg.join("S02_ppg.csv"),
        "DateTime,PPG_Rate,id\n2023-11-15 05:13:20+07:00,61,S02\n",
    )
    .unwrap();

    let report = fuse_directories(
        &eda,
        &ppg,
        &root.join("out"),
        chrono_tz::Asia::Bangkok,
        &FusionConfig::default(),
    )
    .unwrap();
    assert!(report.fused_subjects.is_empty());
    assert_eq!(report.rows, 0);
    assert_eq!(
        fs::read_to_string(&report.output).unwrap().trim(),
        "DateTime"
    );
}

#[test]
fn recording_with_a_stray_epoch_is_skipped_and_the_batch_continues() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let input = root.join("Raw/eda");
    fs::create_dir_all(&input).unwrap();
    let level = |t: f64| 2.0 + 0.01 * t;
    write_recording(&input.join("S01_eda.csv"), "EA", 15.0, 30.0, level);
    write_recording(&input.join("S02_eda.csv"), "EA", 15.0, 30.0, level);
    let mut text = fs::read_to_string(input.join("S02_eda.csv")).unwrap();
    text.push_str("0,2.5\n");
    fs::write(input.join("S02_eda.csv"), text).unwrap();

    let processor = default_processor(Modality::Eda);
    let report = process_directory(
        &input,
        &root.join("Processed/eda"),
        &labels(),
        processor.as_ref(),
        &PipelineConfig::for_modality(Modality::Eda),
    )
    .unwrap();
    assert_eq!(report.written, vec![root.join("Processed/eda/S01_eda.csv")]);
    assert_eq!(report.skipped, vec![input.join("S02_eda.csv")]);
}

#[test]
fn text_attributes_survive_fusion() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let eda = root.join("eda");
    let ppg = root.join("ppg");
    fs::create_dir_all(&eda).unwrap();
    fs::create_dir_all(&ppg).unwrap();
    fs::write(
        eda.join("S01_eda.csv"),
        "DateTime,EDA_Clean,id,site\n2023-11-15 05:13:20+07:00,1.5,S01,clinicA\n",
    )
    .unwrap();
    fs::write(
        ppg.join("S01_ppg.csv"),
        "DateTime,PPG_Rate,id,site\n2023-11-15 05:13:20+07:00,61,S01,clinicA\n",
    )
    .unwrap();

    let report = fuse_directories(
        &eda,
        &ppg,
        &root.join("out"),
        chrono_tz::Asia::Bangkok,
        &FusionConfig::default(),
    )
    .unwrap();
    let fused = fs::read_to_string(&report.output).unwrap();
    let lines: Vec<&str> = fused.lines().collect();
    assert_eq!(lines[0], "DateTime,EDA_Clean,site_eda,PPG_Rate,site_ppg,id");
    assert_eq!(
        lines[1],
        "2023-11-15 05:13:20+07:00,1.500000,clinicA,61.000000,clinicA,S01"
    );
}
