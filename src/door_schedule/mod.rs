//! Door schedule recognition and cost estimation.
//!
//! Rows are first recognized directly from the extracted text. When that
//! finds nothing, the chat model can be asked to return the schedule as JSON
//! (see [`DoorScheduleParser::parse_with_model`]). Each door is then priced
//! by area through a [`PriceSource`].

pub mod pricing;


use fancy_regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::answer::{ChatMessage, ChatModel, ChatRole};
use crate::Result;

pub use pricing::{PriceQuote, PriceSource, PriceTable};

const EXTRACTION_PROMPT: &str = "The following text was extracted from an architectural document, possibly via OCR. \
Extract ONLY the DOOR SCHEDULE table, if it exists. Do NOT include the WINDOW SCHEDULE. \
Return the door schedule as a JSON array of objects, each object containing the fields: \
'door_id' (string), 'count' (integer), 'width_cm' (number), 'height_cm' (number), \
'material' (string), 'remarks' (string). \
Assume that all dimensions are in centimeters (cm), unless explicitly stated otherwise.";

static DOOR_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)D-?\d+[A-Z]?$").expect("valid regex"));

static SIZE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*(?:cm)?\s*[xX×*]\s*(\d+(?:\.\d+)?)").expect("valid regex")
});

static JSON_FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json(.*?)```").expect("valid regex"));

static JSON_ARRAY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(\[.*\])").expect("valid regex"));

/// One row of a door schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoorEntry {
    #[serde(deserialize_with = "lenient_string")]
    pub door_id: String,
    #[serde(default = "one", deserialize_with = "lenient_count")]
    pub count: u32,
    #[serde(default, deserialize_with = "lenient_number")]
    pub width_cm: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub height_cm: Option<f64>,
    #[serde(default, alias = "finish", deserialize_with = "lenient_string")]
    pub material: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub remarks: String,
}

/// A door with its estimated cost, fields are `None` when the size is unusable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoorCost {
    #[serde(flatten)]
    pub entry: DoorEntry,
    pub area_sqm: Option<f64>,
    pub price_per_sqm: Option<f64>,
    pub material_cost: Option<f64>,
    pub labor_cost: Option<f64>,
    pub installation_cost: Option<f64>,
    pub total_cost: Option<f64>,
}

fn one() -> u32 {
    1
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<f64>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s
            .trim()
            .trim_end_matches("cm")
            .trim()
            .parse()
            .ok(),
        _ => None,
    })
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
    let number = lenient_number(deserializer)?;
    Ok(number
        .filter(|n| n.is_finite() && *n >= 1.0 && *n <= f64::from(u32::MAX))
        .map_or(1, |n| n.round() as u32))
}

/// Area in square meters from centimeters, rounded to three decimals
#[inline]
pub fn calculate_area_sqm(width_cm: f64, height_cm: f64) -> f64 {
    round_to((width_cm / 100.0) * (height_cm / 100.0), 3)
}

/// Area of a size string such as `90x210` or `80 × 200`, `0.0` when unparseable
#[inline]
pub fn area_from_size(size: &str) -> f64 {
    parse_size(size).map_or(0.0, |(width, height)| calculate_area_sqm(width, height))
}

/// Width and height in centimeters from a size string
#[inline]
pub fn parse_size(size: &str) -> Option<(f64, f64)> {
    let captures = SIZE_REGEX.captures(size).ok()??;
    let width: f64 = captures.get(1)?.as_str().parse().ok()?;
    let height: f64 = captures.get(2)?.as_str().parse().ok()?;
    (width > 0.0 && height > 0.0).then_some((width, height))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn is_door_id(token: &str) -> bool {
    DOOR_ID_REGEX.is_match(token).unwrap_or(false)
}

fn is_count(token: &str) -> Option<u32> {
    let digits = token
        .trim_end_matches(|c: char| c.is_ascii_alphabetic() || c == '.')
        .trim();
    digits.parse::<u32>().ok().filter(|n| (1..100).contains(n))
}

/// Cells of one line: `|` separated when present, whitespace separated otherwise
fn cells(line: &str) -> Vec<String> {
    if line.contains('|') {
        line.split('|')
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
            .map(ToString::to_string)
            .collect()
    } else {
        // Keep "90 x 210" together before splitting on whitespace
        let joined = SIZE_REGEX
            .replace_all(line, "${1}x${2}")
            .into_owned();
        joined
            .split_whitespace()
            .map(|token| token.trim_matches(|c: char| matches!(c, ',' | ';')).to_string())
            .filter(|token| !token.is_empty())
            .collect()
    }
}

/// Recognize a single schedule row, `None` when the line has no door id
#[inline]
pub fn parse_row(line: &str) -> Option<DoorEntry> {
    let cells = cells(line);
    let id_index = cells.iter().position(|cell| is_door_id(cell))?;

    let mut count = None;
    let mut size = None;
    let mut words: Vec<&str> = Vec::new();
    let mut pending_width: Option<f64> = None;

    for cell in cells.iter().skip(id_index + 1) {
        if size.is_none() {
            if let Some(parsed) = parse_size(cell) {
                size = Some(parsed);
                continue;
            }
            // Width and height in separate columns
            if let Ok(value) = cell.parse::<f64>() {
                if value >= 40.0 {
                    match pending_width.take() {
                        Some(width) => size = Some((width, value)),
                        None => pending_width = Some(value),
                    }
                    continue;
                }
            }
        }
        if count.is_none() && size.is_none() {
            if let Some(n) = is_count(cell) {
                count = Some(n);
                continue;
            }
        }
        if cell.chars().any(char::is_alphabetic) {
            words.push(cell.as_str());
        }
    }

    let (width_cm, height_cm) = size.map_or((None, None), |(w, h)| (Some(w), Some(h)));
    let material = words.first().map(|w| w.to_lowercase()).unwrap_or_default();
    let remarks = words.iter().skip(1).copied().collect::<Vec<_>>().join(" ");

    Some(DoorEntry {
        door_id: cells[id_index].to_uppercase(),
        count: count.unwrap_or(1),
        width_cm,
        height_cm,
        material,
        remarks,
    })
}

/// Every recognizable door row in `text`, first occurrence of each id wins
#[inline]
pub fn parse_schedule_rows(text: &str) -> Vec<DoorEntry> {
    let mut entries: Vec<DoorEntry> = Vec::new();
    for line in text.lines() {
        let Some(entry) = parse_row(line) else {
            continue;
        };
        if entry.width_cm.is_none() {
            continue;
        }
        if entries.iter().any(|existing| existing.door_id == entry.door_id) {
            continue;
        }
        entries.push(entry);
    }
    entries
}

/// Door entries from a chat model reply.
///
/// Accepts a fenced `json` block or the outermost bare array. Anything else
/// yields an empty list.
#[inline]
pub fn parse_model_reply(content: &str) -> Vec<DoorEntry> {
    let json_text = match JSON_FENCE_REGEX.captures(content) {
        Ok(Some(captures)) => captures.get(1).map(|m| m.as_str().trim().to_string()),
        _ => match JSON_ARRAY_REGEX.captures(content) {
            Ok(Some(captures)) => captures.get(1).map(|m| m.as_str().trim().to_string()),
            _ => None,
        },
    };

    let Some(json_text) = json_text else {
        warn!("No JSON found in model reply");
        return Vec::new();
    };

    let values: Vec<serde_json::Value> = match serde_json::from_str(&json_text) {
        Ok(values) => values,
        Err(e) => {
            warn!("Model reply is not a JSON array: {}", e);
            return Vec::new();
        }
    };

    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<DoorEntry>(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable door entry: {}", e);
                None
            }
        })
        .collect()
}

/// Price each door; entries without a usable size are kept with `None` costs
#[inline]
pub fn estimate_costs(entries: Vec<DoorEntry>, prices: &dyn PriceSource, labor_per_sqm: f64) -> Vec<DoorCost> {
    entries
        .into_iter()
        .map(|entry| {
            let size = entry
                .width_cm
                .zip(entry.height_cm)
                .filter(|(w, h)| w.is_finite() && h.is_finite() && *w > 0.0 && *h > 0.0);

            let Some((width, height)) = size else {
                warn!("Door {} has no usable size, skipping cost", entry.door_id);
                return DoorCost {
                    entry,
                    area_sqm: None,
                    price_per_sqm: None,
                    material_cost: None,
                    labor_cost: None,
                    installation_cost: None,
                    total_cost: None,
                };
            };

            let area = calculate_area_sqm(width, height);
            let quote = prices.quote(&entry.material);
            let count = f64::from(entry.count);
            let material_cost = round_to(count * area * quote.price_per_sqm, 2);
            let labor_cost = round_to(count * area * labor_per_sqm, 2);
            let installation_cost = round_to(count * quote.installation, 2);

            DoorCost {
                area_sqm: Some(area),
                price_per_sqm: Some(quote.price_per_sqm),
                material_cost: Some(material_cost),
                labor_cost: Some(labor_cost),
                installation_cost: Some(installation_cost),
                total_cost: Some(round_to(material_cost + labor_cost + installation_cost, 2)),
                entry,
            }
        })
        .collect()
}

/// Combined cost of every priced door
#[inline]
pub fn total_cost(costs: &[DoorCost]) -> f64 {
    round_to(costs.iter().filter_map(|cost| cost.total_cost).sum(), 2)
}

/// Recognizes door schedules in document text and prices them
pub struct DoorScheduleParser {
    prices: Box<dyn PriceSource>,
    labor_per_sqm: f64,
}

impl std::fmt::Debug for DoorScheduleParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoorScheduleParser")
            .field("labor_per_sqm", &self.labor_per_sqm)
            .finish_non_exhaustive()
    }
}

impl DoorScheduleParser {
    #[inline]
    pub fn new(prices: Box<dyn PriceSource>, labor_per_sqm: f64) -> Self {
        Self {
            prices,
            labor_per_sqm,
        }
    }

    #[inline]
    pub fn from_config(config: &crate::config::DoorScheduleConfig) -> Self {
        Self::new(
            Box::new(PriceTable::from_config(config)),
            config.labor_cost_per_sqm,
        )
    }

    /// Rows recognized directly from the text, priced
    #[inline]
    pub fn parse(&self, text: &str) -> Vec<DoorCost> {
        let entries = parse_schedule_rows(text);
        if !entries.is_empty() {
            info!("Recognized {} door schedule rows", entries.len());
        }
        estimate_costs(entries, self.prices.as_ref(), self.labor_per_sqm)
    }

    /// Like [`Self::parse`], asking `model` for the schedule when no rows are recognized
    #[inline]
    pub async fn parse_with_model(&self, text: &str, model: &dyn ChatModel) -> Result<Vec<DoorCost>> {
        let direct = self.parse(text);
        if !direct.is_empty() || !mentions_doors(text) {
            return Ok(direct);
        }

        debug!("No door rows recognized, asking the chat model");
        let messages = [
            ChatMessage::new(ChatRole::System, EXTRACTION_PROMPT),
            ChatMessage::new(ChatRole::User, text),
        ];
        let reply = model.complete(&messages).await?;
        let entries = parse_model_reply(&reply);
        info!("Chat model returned {} door schedule rows", entries.len());
        Ok(estimate_costs(entries, self.prices.as_ref(), self.labor_per_sqm))
    }
}

/// Whether the text looks like it could hold a door schedule at all
#[inline]
pub fn mentions_doors(text: &str) -> bool {
    text.to_lowercase().contains("door")
}
