// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use st_synth::{GeneratorConfig, PerAxis, SynthError};

fn unique_temp_dir() -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    dir.push(format!("st_synth_config_{nanos}"));
    dir
}

const BASE: &str = r#"
labels_shape = [12, 12, 12]
generation_labels = [0, 2, 3, 41, 42]
output_labels = [0, 2, 41]
n_neutral_labels = 1
atlas_res = 1.0
reference_orientation = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 1.0]]
"#;

#[test]
fn toml_document_builds_a_graph() {
    let config = GeneratorConfig::from_toml_str(BASE).unwrap();
    assert_eq!(config.atlas_res, PerAxis::Uniform(1.0));
    assert_eq!(config.gamma_std, 0.5);
    let built = config.build().unwrap();
    assert_eq!(built.plan().output_shape, vec![12, 12, 12]);
    assert_eq!(
        built.graph().input_names(),
        vec!["labels", "means", "std_devs", "affine", "nonlinear_field"]
    );
}

#[test]
fn layers_override_earlier_keys() {
    let root = unique_temp_dir();
    fs::create_dir_all(&root).unwrap();
    let base = root.join("base.toml");
    fs::write(&base, BASE).unwrap();
    let run = root.join("run.json");
    fs::write(
        &run,
        r#"{"output_shape": 8, "output_div_by_n": 4, "apply_bias_field": false, "flip_prob": 0.25}"#,
    )
    .unwrap();

    let config = GeneratorConfig::load_layered(&[&base, &run]).unwrap();
    assert_eq!(config.generation_labels, vec![0, 2, 3, 41, 42]);
    assert_eq!(config.output_shape, Some(PerAxis::Uniform(8)));
    assert!(!config.apply_bias_field);
    assert_eq!(config.flip_prob, 0.25);

    let built = config.build().unwrap();
    assert_eq!(built.plan().crop_shape, vec![8, 8, 8]);
    assert!(built.graph().describe().contains(&"random_crop"));
    assert!(!built.graph().describe().contains(&"bias_field/ch0"));

    let _ = fs::remove_file(base);
    let _ = fs::remove_file(run);
    let _ = fs::remove_dir(root);
}

#[test]
fn missing_layer_is_an_io_error() {
    let path = unique_temp_dir().join("absent.toml");
    let err = GeneratorConfig::load_layered(&[path]).unwrap_err();
    assert!(matches!(err, SynthError::Io { .. }));
}

#[test]
fn malformed_documents_are_rejected() {
    assert!(matches!(
        GeneratorConfig::from_toml_str("labels_shape = \"big\""),
        Err(SynthError::Toml(_))
    ));
    assert!(matches!(
        GeneratorConfig::from_json_str("{\"n_channels\": -1}"),
        Err(SynthError::Json(_))
    ));
}

#[test]
fn subset_violation_fails_at_build() {
    let config = GeneratorConfig {
        labels_shape: vec![4, 4],
        generation_labels: vec![0, 1],
        output_labels: Some(vec![0, 7]),
        flipping: false,
        ..GeneratorConfig::default()
    };
    assert!(matches!(
        config.build(),
        Err(SynthError::OutputLabelNotGenerated { label: 7 })
    ));
}
