use std::fs;
use std::path::PathBuf;

use autotowers_lib::{process_files, PostProcessConfig, TowerError};

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("autotowers-{}-{}", std::process::id(), name))
}

fn sliced_tower(layer_count: usize) -> String {
    let mut text = String::from(";FLAVOR:Marlin\n;LAYER_COUNT:80\nM82\n");
    for layer in 0..layer_count {
        text.push_str(&format!(";LAYER:{layer}\nM107\nG1 X10 Y10 E0.5\n"));
        if layer == 45 {
            text.push_str("M900 K0.3\n");
        }
    }
    text.push_str("M104 S0\n");
    text
}

#[test]
fn tower_is_post_processed_into_new_file() {
    let input = scratch_path("tower-in.gcode");
    let output = scratch_path("tower-out.gcode");
    fs::write(&input, sliced_tower(80)).unwrap();

    let report = process_files(&input, &output, &PostProcessConfig::default()).unwrap();
    assert_eq!(report.kfactors, vec![0.0, 0.02]);
    assert_eq!(report.neutralized_lines, 1);

    let text = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    let setters: Vec<&str> = lines.iter().copied().filter(|line| line.starts_with("M900")).collect();
    assert_eq!(
        setters,
        vec![
            "M900 K0.00 ;AutoTowersGenerator: setting K-factor to 0.00",
            "M900 K0.02 ;AutoTowersGenerator: setting K-factor to 0.02",
        ]
    );
    assert!(lines.contains(&";M900 K0.3 ;AutoTowersGenerator: preventing K-factor change within the tower section"));
    assert!(lines.contains(&";AutoTowersGenerator: Starting K-factor = 0"));
    // Header comments stay in the header, ahead of the first layer.
    let first_layer = lines.iter().position(|line| *line == ";LAYER:0").unwrap();
    let header_end = lines.iter().rposition(|line| line.starts_with(";AutoTowersGenerator: ")).unwrap();
    assert!(header_end < first_layer);
    assert_eq!(lines[first_layer + 2], setters[0]);
    assert!(text.ends_with("M104 S0\n"));
    assert!(input.exists());

    let mut tmp = output.clone().into_os_string();
    tmp.push(".tmp");
    assert!(!PathBuf::from(tmp).exists());

    fs::remove_file(&input).unwrap();
    fs::remove_file(&output).unwrap();
}

#[test]
fn tower_is_post_processed_in_place() {
    let path = scratch_path("tower-in-place.gcode");
    fs::write(&path, sliced_tower(40)).unwrap();

    let config = PostProcessConfig::from_json_str(
        r#"{"tower": {"preset_index": null, "start_kfactor": "0.1"}, "enable_lcd_messages": true, "enable_advanced_gcode_comments": false}"#,
    )
    .unwrap();
    let report = process_files(&path, &path, &config).unwrap();
    assert_eq!(report.sections(), 1);

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains(";LAYER:0\nM107\nM900 K0.10\nM117 K 0.10\nG1 X10 Y10 E0.5\n"));
    assert!(!text.contains("AutoTowersGenerator: setting"));

    fs::remove_file(&path).unwrap();
}

#[test]
fn missing_input_is_reported_with_its_path() {
    let input = scratch_path("does-not-exist.gcode");
    let output = scratch_path("never-written.gcode");
    match process_files(&input, &output, &PostProcessConfig::default()) {
        Err(TowerError::Io { path, .. }) => assert_eq!(path, input),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!output.exists());
}

#[test]
fn conflicting_settings_stop_before_writing() {
    let input = scratch_path("conflict-in.gcode");
    let output = scratch_path("conflict-out.gcode");
    fs::write(&input, sliced_tower(2)).unwrap();

    let config =
        PostProcessConfig::from_json_str(r#"{"print_settings": {"global": {"adhesion_type": "skirt"}}}"#).unwrap();
    let result = process_files(&input, &output, &config);
    assert!(matches!(result, Err(TowerError::ConflictingSettings(_))));
    assert!(!output.exists());

    fs::remove_file(&input).unwrap();
}

#[test]
fn crlf_file_without_final_newline_keeps_its_endings() {
    let input = scratch_path("crlf-in.gcode");
    let output = scratch_path("crlf-out.gcode");
    let original = ";FLAVOR:Marlin\r\nG28\r\nM82\r\n;LAYER:0\r\nM107\r\nG1 X10 Y10 E0.5\r\n;LAYER:1\r\nM107\r\nM900 K0.3\r\nM104 S0";
    fs::write(&input, original).unwrap();

    let report = process_files(&input, &output, &PostProcessConfig::default()).unwrap();
    assert_eq!(report.neutralized_lines, 1);

    let text = fs::read_to_string(&output).unwrap();
    assert!(text.starts_with(";FLAVOR:Marlin\r\nG28\r\nM82\r\n"));
    assert_eq!(text.matches('\n').count(), text.matches("\r\n").count());
    assert!(text.contains(";LAYER:0\r\nM107\r\nM900 K0.00 ;AutoTowersGenerator: setting K-factor to 0.00\r\nG1 X10 Y10 E0.5\r\n"));
    assert!(text.contains("\r\n;M900 K0.3 ;AutoTowersGenerator: preventing K-factor change within the tower section\r\n"));
    assert!(text.ends_with("\r\nM104 S0"));

    fs::remove_file(&input).unwrap();
    fs::remove_file(&output).unwrap();
}

#[test]
fn failed_replace_leaves_no_temporary_file() {
    let input = scratch_path("blocked-in.gcode");
    // A directory can't be replaced by the finished file.
    let output = scratch_path("blocked-out");
    fs::write(&input, sliced_tower(2)).unwrap();
    fs::create_dir_all(output.join("keep")).unwrap();

    match process_files(&input, &output, &PostProcessConfig::default()) {
        Err(TowerError::Io { path, .. }) => assert_eq!(path, output),
        other => panic!("unexpected {other:?}"),
    }
    let mut tmp = output.clone().into_os_string();
    tmp.push(".tmp");
    assert!(!PathBuf::from(tmp).exists());
    assert!(output.join("keep").is_dir());

    fs::remove_file(&input).unwrap();
    fs::remove_dir_all(&output).unwrap();
}
