//! Validates contract fixtures and live encodings against frozen JSON schemas.

use cardgate_analysis_contract::{CardAnalysisResult, DocumentType, TextLine, classify};
use cardgate_license::VerifyRequest;
use jsonschema::JSONSchema;
use serde_json::{Value, json};

fn contract_path(relative: &str) -> String {
    format!("{}/../../contracts/{relative}", env!("CARGO_MANIFEST_DIR"))
}

fn load_json(relative: &str) -> Value {
    let raw = std::fs::read_to_string(contract_path(relative)).expect("json file should be readable");
    serde_json::from_str(&raw).expect("json file should be valid")
}

fn compile_validator(schema: &str) -> JSONSchema {
    let schema = load_json(schema);
    JSONSchema::compile(&schema).expect("schema should compile")
}

fn sample_result() -> CardAnalysisResult {
    let mut result = CardAnalysisResult::empty("card.png");
    result.lines = vec![
        TextLine {
            text: "PASSPORT".to_string(),
            confidence: 0.9,
        },
        TextLine {
            text: "M12345678".to_string(),
            confidence: 0.7,
        },
    ];
    result.detected_type = Some(DocumentType::Passport);
    result
}

#[test]
fn classification_fixture_matches_schema() {
    let validator = compile_validator("classification.schema.json");
    let fixture = load_json("fixtures/classification.valid.json");
    assert!(
        validator.is_valid(&fixture),
        "classification fixture should validate against schema"
    );
}

#[test]
fn analysis_result_fixture_matches_schema() {
    let validator = compile_validator("card-analysis-result.schema.json");
    let fixture = load_json("fixtures/card-analysis-result.valid.json");
    assert!(
        validator.is_valid(&fixture),
        "analysis result fixture should validate against schema"
    );
}

#[test]
fn verify_request_fixture_matches_schema() {
    let validator = compile_validator("license-verify-request.schema.json");
    let fixture = load_json("fixtures/license-verify-request.valid.json");
    assert!(validator.is_valid(&fixture));
}

#[test]
fn encoded_values_match_schemas() {
    let result = sample_result();
    let classification_json = classify(&result).to_json().expect("classification should encode");
    let classification: Value =
        serde_json::from_str(&classification_json).expect("classification JSON should parse");
    assert!(compile_validator("classification.schema.json").is_valid(&classification));

    let unidentified = classify(&CardAnalysisResult::empty("blank.png"));
    let unidentified = serde_json::to_value(&unidentified).expect("classification should encode");
    assert!(compile_validator("classification.schema.json").is_valid(&unidentified));

    let result = serde_json::to_value(&result).expect("result should encode");
    assert!(compile_validator("card-analysis-result.schema.json").is_valid(&result));

    let request = serde_json::to_value(VerifyRequest {
        license_key: "LICENS_EKEY".to_string(),
    })
    .expect("request should encode");
    assert!(compile_validator("license-verify-request.schema.json").is_valid(&request));
}

#[test]
fn schema_rejects_out_of_range_confidence() {
    let validator = compile_validator("classification.schema.json");
    let invalid = json!({
        "schema_version": "v1",
        "result": true,
        "type": "passport",
        "confidence": 1.5,
        "line_count": 1
    });
    assert!(!validator.is_valid(&invalid));
}
