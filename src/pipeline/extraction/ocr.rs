//! OCR collaborator adapters.
//!
//! Every engine-specific result shape is handled here and nowhere else; the
//! rest of the pipeline only ever sees `OcrBlock`s in reading order.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use serde_json::Value;

use super::types::{BoundingBox, BoundingRegion, OcrBlock, OcrConfig, OcrEngine, OcrEngineKind};
use super::ExtractionError;

/// Confidence assumed for PaddleOCR entries that carry no score.
const PADDLE_DEFAULT_CONFIDENCE: f32 = 0.9;

const DEFAULT_TESSERACT_COMMAND: &str = "tesseract";
const DEFAULT_PADDLE_COMMAND: &str = "paddleocr-dump";

/// Build the configured OCR engine.
pub fn build_ocr_engine(config: &OcrConfig) -> Box<dyn OcrEngine + Send + Sync> {
    match config.engine {
        OcrEngineKind::Tesseract => Box::new(TesseractCli::new(
            config.command.as_deref().unwrap_or(DEFAULT_TESSERACT_COMMAND),
            &config.language,
        )),
        OcrEngineKind::Paddle => Box::new(PaddleOcrCommand::new(
            config.command.as_deref().unwrap_or(DEFAULT_PADDLE_COMMAND),
        )),
    }
}

// ──────────────────────────────────────────────
// Tesseract
// ──────────────────────────────────────────────

/// Tesseract driven through its command line, TSV output.
pub struct TesseractCli {
    command: String,
    language: String,
}

impl TesseractCli {
    pub fn new(command: &str, language: &str) -> Self {
        Self {
            command: command.to_string(),
            language: language.to_string(),
        }
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, image_path: &Path) -> Result<Vec<OcrBlock>, ExtractionError> {
        let output = Command::new(&self.command)
            .arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .output()
            .map_err(|e| ExtractionError::OcrLaunch {
                command: self.command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ExtractionError::OcrProcessing(format!(
                "{} exited with {} for {}: {}",
                self.command,
                output.status.code().unwrap_or(-1),
                image_path.display(),
                single_line(&String::from_utf8_lossy(&output.stderr))
            )));
        }

        let tsv = String::from_utf8(output.stdout)
            .map_err(|e| ExtractionError::EncodingError(e.to_string()))?;
        Ok(parse_tsv_lines(&tsv))
    }
}

#[derive(Default)]
struct LineAccumulator {
    words: Vec<String>,
    region: Option<BoundingBox>,
    confidence_sum: f32,
    confidence_count: usize,
}

/// Group Tesseract TSV word rows (level 5) into line blocks.
///
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text.
/// Lines are keyed by (page, block, paragraph, line) and kept in first-seen order.
/// Negative word confidences (unassigned) do not enter the line mean.
pub fn parse_tsv_lines(tsv: &str) -> Vec<OcrBlock> {
    let mut order: Vec<(u32, u32, u32, u32)> = Vec::new();
    let mut lines: HashMap<(u32, u32, u32, u32), LineAccumulator> = HashMap::new();

    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        if fields[0].trim().parse::<i32>().ok() != Some(5) {
            continue;
        }
        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }
        let Some(key) = parse_line_key(&fields[1..5]) else {
            continue;
        };
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        let bbox = parse_bounding_box(fields[6], fields[7], fields[8], fields[9]);

        let line = lines.entry(key).or_insert_with(|| {
            order.push(key);
            LineAccumulator::default()
        });
        line.words.push(word.to_string());
        if conf >= 0.0 {
            line.confidence_sum += conf / 100.0;
            line.confidence_count += 1;
        }
        line.region = match (line.region, bbox) {
            (Some(acc), Some(b)) => Some(acc.union(&b)),
            (None, b) => b,
            (acc, None) => acc,
        };
    }

    order
        .into_iter()
        .filter_map(|key| lines.remove(&key))
        .map(|line| {
            let confidence = if line.confidence_count == 0 {
                0.0
            } else {
                line.confidence_sum / line.confidence_count as f32
            };
            OcrBlock::new(
                line.region.map(BoundingRegion::Box),
                &line.words.join(" "),
                confidence,
            )
        })
        .collect()
}

fn parse_line_key(fields: &[&str]) -> Option<(u32, u32, u32, u32)> {
    Some((
        fields[0].trim().parse().ok()?,
        fields[1].trim().parse().ok()?,
        fields[2].trim().parse().ok()?,
        fields[3].trim().parse().ok()?,
    ))
}

/// Returns None if any field fails to parse.
fn parse_bounding_box(left: &str, top: &str, width: &str, height: &str) -> Option<BoundingBox> {
    Some(BoundingBox {
        x: left.trim().parse().ok()?,
        y: top.trim().parse().ok()?,
        width: width.trim().parse().ok()?,
        height: height.trim().parse().ok()?,
    })
}

// ──────────────────────────────────────────────
// PaddleOCR
// ──────────────────────────────────────────────

/// A PaddleOCR wrapper command: `<command> <image>` printing the raw result as JSON.
pub struct PaddleOcrCommand {
    command: String,
}

impl PaddleOcrCommand {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

impl OcrEngine for PaddleOcrCommand {
    fn recognize(&self, image_path: &Path) -> Result<Vec<OcrBlock>, ExtractionError> {
        let output = Command::new(&self.command)
            .arg(image_path)
            .output()
            .map_err(|e| ExtractionError::OcrLaunch {
                command: self.command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ExtractionError::OcrProcessing(format!(
                "{} exited with {}: {}",
                self.command,
                output.status.code().unwrap_or(-1),
                single_line(&String::from_utf8_lossy(&output.stderr))
            )));
        }

        let value: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractionError::OcrOutput(format!("not JSON: {e}")))?;
        normalize_paddle_output(&value)
    }
}

/// Flatten any PaddleOCR result shape into blocks.
///
/// Accepted shapes, per page:
/// - legacy lines `[[bbox, [text, confidence]], ...]`
/// - result mapping `{"rec_texts": [...], "dt_polys": [...], "rec_scores": [...]}`
/// - bare strings `["text", ...]`
///
/// The whole result may be a single page or a list of pages; `null` pages are empty.
pub fn normalize_paddle_output(value: &Value) -> Result<Vec<OcrBlock>, ExtractionError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(_) => page_blocks(value),
        Value::Array(items) => {
            let single_page = items.iter().any(|item| is_legacy_line(item) || item.is_string());
            if single_page {
                return page_blocks(value);
            }
            let mut blocks = Vec::new();
            for page in items {
                blocks.extend(page_blocks(page)?);
            }
            Ok(blocks)
        }
        other => Err(ExtractionError::OcrOutput(format!(
            "expected a list or mapping, got {}",
            json_kind(other)
        ))),
    }
}

fn page_blocks(page: &Value) -> Result<Vec<OcrBlock>, ExtractionError> {
    match page {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => {
            let Some(texts) = map.get("rec_texts").and_then(Value::as_array) else {
                return Err(ExtractionError::OcrOutput(
                    "result mapping has no rec_texts".into(),
                ));
            };
            let polys = map.get("dt_polys").and_then(Value::as_array);
            let scores = map.get("rec_scores").and_then(Value::as_array);

            let blocks = texts
                .iter()
                .enumerate()
                .filter_map(|(i, text)| {
                    let text = text.as_str()?.trim();
                    if text.is_empty() {
                        return None;
                    }
                    let confidence = scores
                        .and_then(|s| s.get(i))
                        .and_then(Value::as_f64)
                        .map(|c| c as f32)
                        .unwrap_or(PADDLE_DEFAULT_CONFIDENCE);
                    let region = polys
                        .and_then(|p| p.get(i))
                        .map(parse_region)
                        .unwrap_or_else(|| BoundingRegion::Label(format!("bbox_{i}")));
                    Some(OcrBlock::new(Some(region), text, confidence))
                })
                .collect();
            Ok(blocks)
        }
        Value::Array(items) => Ok(items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                Value::String(s) if !s.trim().is_empty() => Some(OcrBlock::new(
                    Some(BoundingRegion::Label(format!("bbox_{i}"))),
                    s.trim(),
                    PADDLE_DEFAULT_CONFIDENCE,
                )),
                line if is_legacy_line(line) => legacy_line_block(line),
                _ => None,
            })
            .collect()),
        other => Err(ExtractionError::OcrOutput(format!(
            "unexpected page shape: {}",
            json_kind(other)
        ))),
    }
}

/// `[bbox, [text, confidence]]` or `[bbox, text]`.
fn is_legacy_line(value: &Value) -> bool {
    let Some(parts) = value.as_array() else {
        return false;
    };
    if parts.len() < 2 || !parts[0].is_array() {
        return false;
    }
    match &parts[1] {
        Value::String(_) => true,
        Value::Array(info) => info.first().is_some_and(Value::is_string),
        _ => false,
    }
}

fn legacy_line_block(line: &Value) -> Option<OcrBlock> {
    let parts = line.as_array()?;
    let (text, confidence) = match &parts[1] {
        Value::String(s) => (s.as_str(), PADDLE_DEFAULT_CONFIDENCE),
        Value::Array(info) => (
            info.first()?.as_str()?,
            info.get(1).and_then(Value::as_f64).unwrap_or(0.0) as f32,
        ),
        _ => return None,
    };
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(OcrBlock::new(Some(parse_region(&parts[0])), text, confidence))
}

/// Polygon from `[[x, y], ...]`; anything else is kept as its JSON text.
fn parse_region(value: &Value) -> BoundingRegion {
    let points: Option<Vec<[f64; 2]>> = value.as_array().and_then(|pts| {
        pts.iter()
            .map(|p| {
                let xy = p.as_array()?;
                Some([xy.first()?.as_f64()?, xy.get(1)?.as_f64()?])
            })
            .collect()
    });
    match points {
        Some(points) if !points.is_empty() => BoundingRegion::Polygon(points),
        _ => match value {
            Value::String(s) => BoundingRegion::Label(s.clone()),
            other => BoundingRegion::Label(other.to_string()),
        },
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ──────────────────────────────────────────────
// Mock
// ──────────────────────────────────────────────

/// Mock OCR engine for unit testing without an OCR install.
/// Emits one block per non-empty line of the configured text.
pub struct MockOcrEngine {
    pub text: String,
    pub confidence: f32,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
        }
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(&self, _image_path: &Path) -> Result<Vec<OcrBlock>, ExtractionError> {
        Ok(self
            .text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| OcrBlock::new(None, l, self.confidence))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn mock_ocr_emits_line_blocks() {
        let engine = MockOcrEngine::new("Policy: AP-1\n\n  VIN: 123  ", 0.92);
        let blocks = engine.recognize(Path::new("ignored.png")).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].text, "VIN: 123");
        assert!((blocks[0].confidence - 0.92).abs() < f32::EPSILON);
    }

    #[test]
    fn tsv_words_grouped_into_lines() {
        let tsv = format!(
            "{HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t600\t800\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t95\tPolicy\n\
             5\t1\t1\t1\t1\t2\t100\t22\t60\t30\t85\tAP-1\n\
             5\t1\t1\t1\t2\t1\t10\t60\t120\t30\t70.5\tEffective\n"
        );
        let blocks = parse_tsv_lines(&tsv);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text, "Policy AP-1");
        assert!((blocks[0].confidence - 0.90).abs() < 1e-6);
        assert_eq!(
            blocks[0].region,
            Some(BoundingRegion::Box(BoundingBox { x: 10, y: 20, width: 150, height: 32 }))
        );
        assert_eq!(blocks[1].text, "Effective");
        assert!((blocks[1].confidence - 0.705).abs() < 1e-6);
    }

    #[test]
    fn tsv_negative_confidence_excluded_from_mean() {
        let tsv = format!(
            "{HEADER}\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t-1\tgarbled\n\
             5\t1\t1\t1\t1\t2\t100\t20\t80\t30\t80\tVIN\n"
        );
        let blocks = parse_tsv_lines(&tsv);
        assert_eq!(blocks.len(), 1);
        assert!((blocks[0].confidence - 0.80).abs() < 1e-6);
    }

    #[test]
    fn tsv_oversized_coordinates_clamp_instead_of_overflowing() {
        let tsv = format!(
            "{HEADER}\n\
             5\t1\t1\t1\t1\t1\t4294967290\t20\t100\t30\t90\tPolicy\n\
             5\t1\t1\t1\t1\t2\t10\t22\t60\t30\t80\tAP-9\n"
        );
        let blocks = parse_tsv_lines(&tsv);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "Policy AP-9");
        assert_eq!(
            blocks[0].region,
            Some(BoundingRegion::Box(BoundingBox { x: 10, y: 20, width: u32::MAX - 10, height: 32 }))
        );
    }

    #[test]
    fn tsv_skips_malformed_and_empty_rows() {
        let tsv = format!(
            "{HEADER}\n\
             too\tfew\tfields\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t90\t\n\
             notanumber\t1\t1\t1\t1\t1\t10\t20\t80\t30\t50\tbad\n\
             5\t1\t1\t1\t1\t2\t100\t20\t80\t30\t85\tvalid\n"
        );
        let blocks = parse_tsv_lines(&tsv);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "valid");
    }

    #[test]
    fn tsv_empty_and_header_only() {
        assert!(parse_tsv_lines("").is_empty());
        assert!(parse_tsv_lines(HEADER).is_empty());
    }

    #[test]
    fn paddle_legacy_single_page() {
        let value = json!([
            [[[10, 10], [90, 10], [90, 30], [10, 30]], ["Policy No: AP-9", 0.98]],
            [[[10, 40], [90, 40], [90, 60], [10, 60]], ["  ", 0.5]],
            [[[10, 70], [90, 70], [90, 90], [10, 90]], ["VIN: 1HG", 0.81]]
        ]);
        let blocks = normalize_paddle_output(&value).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text, "Policy No: AP-9");
        assert!((blocks[0].confidence - 0.98).abs() < 1e-6);
        assert!(matches!(blocks[0].region, Some(BoundingRegion::Polygon(ref p)) if p.len() == 4));
    }

    #[test]
    fn paddle_legacy_wrapped_in_pages() {
        let value = json!([
            [
                [[[0, 0], [1, 0], [1, 1], [0, 1]], ["page one", 0.9]],
                [[[0, 2], [1, 2], [1, 3], [0, 3]], ["line two", 0.8]]
            ],
            null
        ]);
        let blocks = normalize_paddle_output(&value).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].text, "line two");
    }

    #[test]
    fn paddle_result_mapping_shape() {
        let value = json!([{
            "rec_texts": ["Agent: Kim", "", "Premium $512"],
            "rec_scores": [0.97],
            "dt_polys": [[[0, 0], [5, 0], [5, 5], [0, 5]]]
        }]);
        let blocks = normalize_paddle_output(&value).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!((blocks[0].confidence - 0.97).abs() < 1e-6);
        assert!((blocks[1].confidence - PADDLE_DEFAULT_CONFIDENCE).abs() < 1e-6);
        assert_eq!(blocks[1].region, Some(BoundingRegion::Label("bbox_2".into())));
    }

    #[test]
    fn paddle_bare_strings() {
        let value = json!(["Effective 01/01/2024", "  "]);
        let blocks = normalize_paddle_output(&value).unwrap();
        assert_eq!(blocks.len(), 1);
        assert!((blocks[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn paddle_text_without_score() {
        let value = json!([[[[0, 0], [1, 1]], "Driver: Ana"]]);
        let blocks = normalize_paddle_output(&value).unwrap();
        assert_eq!(blocks[0].text, "Driver: Ana");
    }

    #[test]
    fn paddle_null_result_is_empty() {
        assert!(normalize_paddle_output(&Value::Null).unwrap().is_empty());
        assert!(normalize_paddle_output(&json!([null])).unwrap().is_empty());
    }

    #[test]
    fn paddle_rejects_scalars_and_bad_mappings() {
        assert!(matches!(
            normalize_paddle_output(&json!(42)),
            Err(ExtractionError::OcrOutput(_))
        ));
        assert!(normalize_paddle_output(&json!({"texts": []})).is_err());
    }

    #[test]
    fn missing_command_reports_launch_error() {
        let engine = TesseractCli::new("definitely-not-an-ocr-binary-xyz", "eng");
        let err = engine.recognize(Path::new("missing.png")).unwrap_err();
        assert!(matches!(err, ExtractionError::OcrLaunch { .. }));
    }
}
