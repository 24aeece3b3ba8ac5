mod common;

use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};
use seqclass::classifier::utils::argmax;
use seqclass::{ClassifierChain, ClassifierError, ComputeDevice, Dataset, Record};

use common::{
    init, quality_builder, quality_builder_with, quality_checkpoint, Failing, NanOnBad, WrongWidth, QUALITY_LABELS,
};

fn probabilities(value: Option<&Value>) -> Vec<f32> {
    value.and_then(Value::as_array)
        .expect("probability column is an array")
        .iter()
        .map(|v| v.as_f64().expect("numeric probability") as f32)
        .collect()
}

fn labels(dataset: &Dataset, column: &str) -> Vec<String> {
    dataset.column(column)
        .into_iter()
        .map(|v| v.and_then(Value::as_str).expect("label column is a string").to_string())
        .collect()
}

#[test]
fn test_low_medium_high_scenario() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let dir = tempfile::tempdir()?;
    let classifier = quality_builder(&quality_checkpoint(dir.path(), "quality.safetensors", "")).build()?;

    let dataset = Dataset::from_texts("text", [
        "this product is bad",
        "it was okay I guess",
        "great great service",
    ], 1024);
    let scored = classifier.score(dataset)?;

    assert_eq!(scored.columns(), ["text", "quality_pred", "quality_prob"]);
    assert_eq!(labels(&scored, "quality_pred"), vec!["Low", "Medium", "High"]);
    for record in scored.records() {
        let probs = probabilities(record.get("quality_prob"));
        assert_eq!(probs.len(), 3);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }
    Ok(())
}

#[test]
fn test_label_is_argmax_of_probabilities() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let classifier = quality_builder(&quality_checkpoint(dir.path(), "quality.safetensors", ""))
        .with_batch_size(2)
        .build()?;

    let texts = ["bad okay okay", "great bad", "", "unknown words only", "okay great great bad"];
    let scored = classifier.score(Dataset::from_texts("text", texts, 2))?;

    assert_eq!(scored.len(), texts.len());
    for record in scored.records() {
        let probs = probabilities(record.get("quality_prob"));
        let label = record["quality_pred"].as_str().expect("string label");
        assert_eq!(label, QUALITY_LABELS[argmax(&probs).expect("non-empty")]);
    }
    Ok(())
}

#[test]
fn test_empty_text_yields_uniform_first_label() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let classifier = quality_builder(&quality_checkpoint(dir.path(), "quality.safetensors", "")).build()?;

    let predictions = classifier.predict(&[""])?;
    assert_eq!(predictions[0].label, "Low");
    for p in &predictions[0].probabilities {
        assert!((p - 1.0 / 3.0).abs() < 1e-6);
    }
    Ok(())
}

#[test]
fn test_empty_dataset_gets_schema_only() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let classifier = quality_builder(&quality_checkpoint(dir.path(), "quality.safetensors", "")).build()?;

    let scored = classifier.score(Dataset::from_texts("text", Vec::<String>::new(), 16))?;
    assert!(scored.is_empty());
    assert_eq!(scored.columns(), ["text", "quality_pred", "quality_prob"]);
    Ok(())
}

#[test]
fn test_truncation_is_deterministic_and_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let classifier = quality_builder(&quality_checkpoint(dir.path(), "quality.safetensors", ""))
        .with_max_chars(9)
        .build()?;

    // Only "great bad" survives the cut; "okay" words beyond it are ignored.
    let long = "great bad okay okay okay okay";
    let prefix = "great bad";
    let first = classifier.predict(&[long, prefix])?;
    let second = classifier.predict(&[long, prefix])?;

    assert_eq!(first, second);
    assert_eq!(first[0], first[1]);
    assert_ne!(first[0].label, "Medium");
    Ok(())
}

#[test]
fn test_filter_keeps_only_allowed_labels_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let classifier = quality_builder(&quality_checkpoint(dir.path(), "quality.safetensors", ""))
        .with_filter(vec!["High"])
        .build()?;

    let records: Vec<Record> = [(1, "great"), (2, "bad"), (3, "okay"), (4, "great great"), (5, "bad bad")]
        .into_iter()
        .map(|(id, text)| match json!({"id": id, "text": text}) {
            Value::Object(record) => record,
            _ => unreachable!(),
        })
        .collect();
    let scored = classifier.score(Dataset::from_records(records, 2))?;

    assert_eq!(scored.num_partitions(), 3);
    let ids: Vec<_> = scored.column("id").into_iter().map(|v| v.cloned()).collect();
    assert_eq!(ids, vec![Some(json!(1)), Some(json!(4))]);
    assert!(labels(&scored, "quality_pred").iter().all(|l| l == "High"));
    Ok(())
}

#[test]
fn test_ensemble_chain_appends_suffixed_columns() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let dir = tempfile::tempdir()?;

    let mut chain = ClassifierChain::new();
    for i in 0..5 {
        let checkpoint = quality_checkpoint(dir.path(), &format!("quality_{}.safetensors", i), "");
        chain = chain.then(
            quality_builder(&checkpoint)
                .with_prediction_column(format!("pred_{}", i))
                .with_probability_column(format!("prob_{}", i))
                .build()?,
        );
    }

    let texts = ["bad", "okay", "great"];
    let scored = chain.run(Dataset::from_texts("text", texts, 2))?;

    let mut expected = vec!["text".to_string()];
    for i in 0..5 {
        expected.push(format!("pred_{}", i));
        expected.push(format!("prob_{}", i));
    }
    assert_eq!(scored.columns(), expected.as_slice());

    let text: Vec<_> = scored.column("text").into_iter().map(|v| v.and_then(Value::as_str)).collect();
    assert_eq!(text, vec![Some("bad"), Some("okay"), Some("great")]);
    for i in 0..5 {
        assert_eq!(labels(&scored, &format!("pred_{}", i)), vec!["Low", "Medium", "High"]);
    }
    Ok(())
}

#[test]
fn test_existing_result_column_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let classifier = quality_builder(&quality_checkpoint(dir.path(), "quality.safetensors", "")).build()?;

    let scored = classifier.score(Dataset::from_texts("text", ["bad"], 1))?;
    let result = classifier.score(scored);
    assert!(matches!(result, Err(ClassifierError::ConfigurationError(_))));
    Ok(())
}

#[test]
fn test_missing_text_field() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let classifier = quality_builder(&quality_checkpoint(dir.path(), "quality.safetensors", "")).build()?;

    let result = classifier.score(Dataset::from_texts("body", ["bad"], 1));
    assert!(matches!(result, Err(ClassifierError::DatasetError(_))));

    let record = match json!({"text": 42}) {
        Value::Object(record) => record,
        _ => unreachable!(),
    };
    let result = classifier.score(Dataset::from_records(vec![record], 1));
    assert!(matches!(result, Err(ClassifierError::DatasetError(_))));
    Ok(())
}

#[test]
fn test_custom_text_field() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let classifier = quality_builder(&quality_checkpoint(dir.path(), "quality.safetensors", ""))
        .with_text_field("body")
        .without_probabilities()
        .build()?;

    let scored = classifier.score(Dataset::from_texts("body", ["okay"], 1))?;
    assert_eq!(scored.columns(), ["body", "quality_pred"]);
    assert_eq!(labels(&scored, "quality_pred"), vec!["Medium"]);
    Ok(())
}

#[test]
fn test_full_precision_matches_cpu() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let checkpoint = quality_checkpoint(dir.path(), "quality.safetensors", "");
    let texts = ["bad okay", "great okay okay", "bad bad great"];

    let cpu = quality_builder(&checkpoint).with_device(ComputeDevice::Cpu).build()?;
    let accelerator_full = quality_builder(&checkpoint)
        .with_device(ComputeDevice::Accelerator)
        .with_reduced_precision(false)
        .build()?;
    let accelerator_half = quality_builder(&checkpoint)
        .with_device(ComputeDevice::Accelerator)
        .build()?;

    let cpu = cpu.predict(&texts)?;
    assert_eq!(accelerator_full.predict(&texts)?, cpu);

    let half = accelerator_half.predict(&texts)?;
    for (h, c) in half.iter().zip(&cpu) {
        assert_eq!(h.label, c.label);
        for (a, b) in h.probabilities.iter().zip(&c.probabilities) {
            assert!((a - b).abs() < 1e-2);
        }
    }
    Ok(())
}

#[test]
fn test_parallel_partitions_match_sequential() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let checkpoint = quality_checkpoint(dir.path(), "quality.safetensors", "");
    let texts: Vec<String> = (0..40)
        .map(|i| ["bad", "okay", "great", "okay great", "bad bad okay"][i % 5].to_string())
        .collect();

    let sequential = quality_builder(&checkpoint).with_batch_size(3).build()?;
    let parallel = quality_builder(&checkpoint)
        .with_batch_size(3)
        .with_parallel_partitions(true)
        .build()?;

    let a = sequential.score(Dataset::from_texts("text", texts.clone(), 7))?;
    let b = parallel.score(Dataset::from_texts("text", texts, 7))?;
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn test_parallel_with_more_partitions_than_cores() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let checkpoint = quality_checkpoint(dir.path(), "quality.safetensors", "");
    let texts: Vec<String> = (0..2000)
        .map(|i| ["bad", "okay", "great"][i % 3].to_string())
        .collect();

    let parallel = quality_builder(&checkpoint)
        .with_parallel_partitions(true)
        .build()?;
    let scored = parallel.score(Dataset::from_texts("text", texts, 1))?;

    assert_eq!(scored.num_partitions(), 2000);
    let expected: Vec<&str> = (0..2000).map(|i| ["Low", "Medium", "High"][i % 3]).collect();
    assert_eq!(labels(&scored, "quality_pred"), expected);
    Ok(())
}

#[test]
fn test_failing_encoder_aborts_scoring() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let checkpoint = quality_checkpoint(dir.path(), "quality.safetensors", "");
    let texts = ["bad", "okay", "great", "okay"];

    for parallel in [false, true] {
        let classifier = quality_builder_with(&checkpoint, Arc::new(Failing))
            .with_parallel_partitions(parallel)
            .build()?;
        let result = classifier.score(Dataset::from_texts("text", texts, 2));
        assert!(matches!(result, Err(ClassifierError::InferenceError(_))));
    }
    Ok(())
}

#[test]
fn test_wrong_feature_width_is_inference_error() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let classifier = quality_builder_with(&quality_checkpoint(dir.path(), "quality.safetensors", ""), Arc::new(WrongWidth))
        .build()?;

    let result = classifier.score(Dataset::from_texts("text", ["bad", "okay"], 1));
    assert!(matches!(result, Err(ClassifierError::InferenceError(_))));
    Ok(())
}

#[test]
fn test_non_finite_logits_abort_the_call() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let classifier = quality_builder_with(&quality_checkpoint(dir.path(), "quality.safetensors", ""), Arc::new(NanOnBad))
        .build()?;

    assert_eq!(classifier.predict(&["great"])?[0].label, "High");
    // The finite first partition is not returned on its own.
    let result = classifier.score(Dataset::from_texts("text", ["okay", "great", "bad"], 2));
    assert!(matches!(result, Err(ClassifierError::InferenceError(_))));
    Ok(())
}

#[test]
fn test_dataset_error_reports_dataset_row() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let classifier = quality_builder(&quality_checkpoint(dir.path(), "quality.safetensors", "")).build()?;

    let records: Vec<Record> = [json!({"text": "bad"}), json!({"text": "okay"}), json!({"text": "great"}),
        json!({"text": "okay"}), json!({"body": "great"})]
        .into_iter()
        .map(|value| match value {
            Value::Object(record) => record,
            _ => unreachable!(),
        })
        .collect();

    match classifier.score(Dataset::from_records(records, 2)) {
        Err(ClassifierError::DatasetError(message)) => {
            assert!(message.contains("Row 4"), "{}", message);
            assert!(message.contains("partition 2"), "{}", message);
        }
        other => panic!("expected a dataset error, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_shared_across_threads() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let classifier = Arc::new(
        quality_builder(&quality_checkpoint(dir.path(), "quality.safetensors", "")).build()?,
    );

    let mut handles = vec![];
    for i in 0..4 {
        let classifier = Arc::clone(&classifier);
        handles.push(thread::spawn(move || {
            let text = ["bad", "okay", "great", "great"][i];
            let scored = classifier.score(Dataset::from_texts("text", [text], 1)).unwrap();
            labels(&scored, "quality_pred").remove(0)
        }));
    }

    let results: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec!["Low", "Medium", "High", "High"]);
    assert!(classifier.is_loaded());
    Ok(())
}
