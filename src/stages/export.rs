//! Serialise a record's data into a text export.
//!
//! `export_config` picks the data source, filters and optionally flattens
//! it, and names the output format. The rendered document and its stats are
//! written to `export_result`; an unknown format writes `export_error`
//! instead and leaves a warning.

use crate::{
    error::{StageError, StageResult},
    exec_ctx::ExecCtx,
    record::{DerivedKey, Record},
    stage::{BoxFut, Stage},
    stages::value_text,
    types::RequestKind,
};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::{debug, warn};

const NAME: &str = "export";

static XML_TAG_INVALID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_]").expect("Invalid XML tag regex"));
static TEMPLATE_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]*)\}").expect("Invalid template field regex"));

/// Output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Xml,
    /// Tab-separated; also requested as `excel`.
    Tsv,
    Txt,
    #[cfg(feature = "yaml")]
    Yaml,
}

impl FromStr for ExportFormat {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "xml" => Ok(ExportFormat::Xml),
            "tsv" | "excel" => Ok(ExportFormat::Tsv),
            "txt" => Ok(ExportFormat::Txt),
            #[cfg(feature = "yaml")]
            "yaml" => Ok(ExportFormat::Yaml),
            other => Err(StageError::Unsupported(format!("export format '{}'", other))),
        }
    }
}

fn default_format() -> String {
    "json".to_string()
}
fn default_source() -> String {
    "payload".to_string()
}
fn default_indent() -> usize {
    2
}
fn default_true() -> bool {
    true
}
fn default_root() -> String {
    "data".to_string()
}
fn default_item() -> String {
    "item".to_string()
}
fn default_separator() -> String {
    ": ".to_string()
}
fn default_line_ending() -> String {
    "\n".to_string()
}

/// The `export_config` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportOptions {
    #[serde(default = "default_format")]
    pub format: String,
    /// `payload`, `enriched_payload`, `transformed_payload`, `full`, or any
    /// other top-level key of the record body.
    #[serde(default = "default_source")]
    pub source: String,
    /// Keep only these top-level fields.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_fields: Vec<String>,
    /// Collapse nesting into `parent.child` / `parent[i]` keys.
    #[serde(default)]
    pub flatten: bool,
    #[serde(default)]
    pub filename: Option<String>,

    /// JSON: spaces per level, 0 for compact output.
    #[serde(default = "default_indent")]
    pub indent: usize,
    #[serde(default)]
    pub sort_keys: bool,

    /// CSV/TSV column order for arrays of objects; defaults to the first row's keys.
    #[serde(default)]
    pub fieldnames: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub include_header: bool,

    #[serde(default = "default_root")]
    pub root_element: String,
    #[serde(default = "default_item")]
    pub item_element: String,

    /// TXT: `{field}` placeholders filled from top-level fields.
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default = "default_line_ending")]
    pub line_ending: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: default_format(),
            source: default_source(),
            fields: None,
            exclude_fields: Vec::new(),
            flatten: false,
            filename: None,
            indent: default_indent(),
            sort_keys: false,
            fieldnames: None,
            include_header: true,
            root_element: default_root(),
            item_element: default_item(),
            template: None,
            separator: default_separator(),
            line_ending: default_line_ending(),
        }
    }
}

impl ExportOptions {
    /// Pick the source value from the record body, then filter and flatten it.
    fn select(&self, data: &Map<String, Value>) -> Value {
        let payload = || data.get("payload").cloned().unwrap_or_else(|| json!({}));
        let mut selected = match self.source.as_str() {
            "payload" => payload(),
            "enriched_payload" => data
                .get(DerivedKey::Enriched.as_str())
                .cloned()
                .unwrap_or_else(payload),
            "transformed_payload" | "transformed_data" => data
                .get(DerivedKey::Transformed.as_str())
                .cloned()
                .unwrap_or_else(payload),
            "full" => Value::Object(data.clone()),
            other => data.get(other).cloned().unwrap_or_else(|| json!({})),
        };

        if let Value::Object(map) = &mut selected {
            if let Some(fields) = &self.fields {
                let kept: Map<String, Value> = fields
                    .iter()
                    .filter_map(|f| map.get(f).map(|v| (f.clone(), v.clone())))
                    .collect();
                *map = kept;
            }
            for field in &self.exclude_fields {
                map.remove(field);
            }
        }

        if self.flatten {
            selected = match selected {
                Value::Object(map) => Value::Object(flatten(&map)),
                Value::Array(items) => Value::Array(
                    items
                        .into_iter()
                        .map(|item| match item {
                            Value::Object(map) => Value::Object(flatten(&map)),
                            other => other,
                        })
                        .collect(),
                ),
                other => other,
            };
        }
        selected
    }
}

/// Flatten nested objects and arrays into dotted/indexed keys.
///
/// ```
/// use record_pipeline::stages::export::flatten;
/// use serde_json::json;
///
/// let flat = flatten(json!({"a": {"b": 1}, "c": [{"d": 2}, 3]}).as_object().unwrap());
/// assert_eq!(serde_json::Value::Object(flat), json!({"a.b": 1, "c[0].d": 2, "c[1]": 3}));
/// ```
pub fn flatten(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(&mut out, "", map);
    out
}

fn flatten_into(out: &mut Map<String, Value>, prefix: &str, map: &Map<String, Value>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) => flatten_into(out, &path, inner),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let indexed = format!("{}[{}]", path, i);
                    match item {
                        Value::Object(inner) => flatten_into(out, &indexed, inner),
                        other => {
                            out.insert(indexed, other.clone());
                        }
                    }
                }
            }
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

/// Arrays count their items; objects count their longest array field (at least 1).
pub fn record_count(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map
            .values()
            .filter_map(Value::as_array)
            .map(Vec::len)
            .max()
            .filter(|n| *n > 0)
            .unwrap_or(1),
        _ => 1,
    }
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

fn render_json(value: &Value, opts: &ExportOptions) -> StageResult<String> {
    let value = if opts.sort_keys {
        sort_keys(value.clone())
    } else {
        value.clone()
    };
    if opts.indent == 0 {
        return Ok(serde_json::to_string(&value)?);
    }
    let pad = " ".repeat(opts.indent);
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(|e| StageError::Other(e.to_string()))
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// Rows of cells for tabular formats, plus the header.
fn tabulate(value: &Value, opts: &ExportOptions, key_header: [&str; 2]) -> (Vec<String>, Vec<Vec<String>>) {
    match value {
        Value::Array(items) if items.first().is_some_and(Value::is_object) => {
            let header: Vec<String> = match &opts.fieldnames {
                Some(names) => names.clone(),
                None => items[0].as_object().map(|m| m.keys().cloned().collect()).unwrap_or_default(),
            };
            let rows = items
                .iter()
                .map(|row| header.iter().map(|h| row.get(h).map(value_text).unwrap_or_default()).collect())
                .collect();
            (header, rows)
        }
        Value::Array(items) => (
            vec!["value".to_string()],
            items.iter().map(|v| vec![value_text(v)]).collect(),
        ),
        Value::Object(map) => (
            key_header.iter().map(|h| h.to_string()).collect(),
            map.iter().map(|(k, v)| vec![k.clone(), value_text(v)]).collect(),
        ),
        other => (vec!["value".to_string()], vec![vec![value_text(other)]]),
    }
}

fn render_csv(value: &Value, opts: &ExportOptions) -> String {
    let (header, rows) = tabulate(value, opts, ["key", "value"]);
    let mut out = String::new();
    let mut line = |cells: &[String]| {
        let joined: Vec<String> = cells.iter().map(|c| csv_field(c)).collect();
        out.push_str(&joined.join(","));
        out.push_str("\r\n");
    };
    if opts.include_header {
        line(&header);
    }
    for row in &rows {
        line(row);
    }
    out
}

fn render_tsv(value: &Value, opts: &ExportOptions) -> String {
    let (header, rows) = tabulate(value, opts, ["Key", "Value"]);
    let header = opts.include_header.then_some(&header);
    let mut out = String::new();
    for cells in header.into_iter().chain(rows.iter()) {
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    out
}

fn xml_tag(key: &str) -> String {
    let clean = XML_TAG_INVALID.replace_all(key, "_");
    match clean.chars().next() {
        None => "field".to_string(),
        Some(c) if !c.is_alphabetic() => format!("field_{}", clean),
        Some(_) => clean.into_owned(),
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn xml_element(out: &mut String, tag: &str, value: &Value, level: usize, item_tag: &str) {
    let pad = "  ".repeat(level);
    let children: Vec<(String, &Value)> = match value {
        Value::Object(map) => map.iter().map(|(k, v)| (xml_tag(k), v)).collect(),
        Value::Array(items) => items.iter().map(|v| (item_tag.to_string(), v)).collect(),
        scalar => {
            let _ = writeln!(out, "{}<{}>{}</{}>", pad, tag, xml_escape(&value_text(scalar)), tag);
            return;
        }
    };
    if children.is_empty() {
        let _ = writeln!(out, "{}<{} />", pad, tag);
        return;
    }
    let _ = writeln!(out, "{}<{}>", pad, tag);
    for (child_tag, child) in children {
        // Arrays nested below the top level always use `item`.
        xml_element(out, &child_tag, child, level + 1, "item");
    }
    let _ = writeln!(out, "{}</{}>", pad, tag);
}

fn render_xml(value: &Value, opts: &ExportOptions) -> String {
    let mut out = String::new();
    xml_element(&mut out, &xml_tag(&opts.root_element), value, 0, &opts.item_element);
    out.truncate(out.trim_end().len());
    out
}

fn render_template(value: &Value, template: &str) -> String {
    let empty = Map::new();
    let fields = value.as_object().unwrap_or(&empty);
    if let Some(missing) = TEMPLATE_FIELD
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .find(|k| !fields.contains_key(k))
    {
        return format!("template error: missing key '{}'", missing);
    }
    TEMPLATE_FIELD
        .replace_all(template, |c: &regex::Captures| {
            fields.get(&c[1]).map(value_text).unwrap_or_default()
        })
        .into_owned()
}

fn render_text(value: &Value, opts: &ExportOptions, level: usize) -> String {
    let pad = "  ".repeat(level);
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::Object(_) | Value::Array(_) => {
                    format!("{}{}:{}{}", pad, k, opts.line_ending, render_text(v, opts, level + 1))
                }
                scalar => format!("{}{}{}{}", pad, k, opts.separator, value_text(scalar)),
            })
            .collect::<Vec<_>>()
            .join(&opts.line_ending),
        Value::Array(items) => items
            .iter()
            .map(|item| format!("{}- {}", pad, render_text(item, opts, 0)))
            .collect::<Vec<_>>()
            .join(&opts.line_ending),
        scalar => format!("{}{}", pad, value_text(scalar)),
    }
}

fn render(format: ExportFormat, value: &Value, opts: &ExportOptions) -> StageResult<String> {
    let content = match format {
        ExportFormat::Json => render_json(value, opts)?,
        ExportFormat::Csv => render_csv(value, opts),
        ExportFormat::Xml => render_xml(value, opts),
        ExportFormat::Tsv => render_tsv(value, opts),
        ExportFormat::Txt => match &opts.template {
            Some(template) => render_template(value, template),
            None => render_text(value, opts, 0),
        },
        #[cfg(feature = "yaml")]
        ExportFormat::Yaml => serde_yaml::to_string(value).map_err(|e| StageError::Other(e.to_string()))?,
    };
    Ok(content)
}

/// Renders the configured source into `export_result`.
#[derive(Debug, Clone, Default)]
pub struct ExportStage;

impl ExportStage {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for ExportStage {
    fn kind(&self) -> RequestKind {
        RequestKind::Export
    }

    fn name(&self) -> &str {
        NAME
    }

    fn apply<'a>(&'a self, _ctx: &'a ExecCtx, record: &'a mut Record) -> BoxFut<'a, StageResult<()>> {
        Box::pin(async move {
            let raw_config = record.config("export_config").cloned().unwrap_or_else(|| json!({}));
            let opts: ExportOptions = serde_json::from_value(raw_config.clone())?;
            let requested = opts.format.to_lowercase();

            let format = match requested.parse::<ExportFormat>() {
                Ok(format) => format,
                Err(e) => {
                    warn!(format = %requested, "unsupported export format");
                    record.add_warning(NAME, e.to_string());
                    record.insert_derived(
                        DerivedKey::ExportError,
                        Value::String(format!("unsupported format: {}", requested)),
                    );
                    return Ok(());
                }
            };

            let selected = opts.select(record.data());
            let content = render(format, &selected, &opts)?;
            let count = record_count(&selected);
            let now = Utc::now();
            let filename = opts
                .filename
                .clone()
                .unwrap_or_else(|| format!("export_{}.{}", now.timestamp(), requested));

            debug!(format = %requested, bytes = content.len(), records = count, "export rendered");
            record.insert_derived(
                DerivedKey::ExportResult,
                json!({
                    "format": requested,
                    "size_bytes": content.len(),
                    "content": content,
                    "record_count": count,
                    "exported_at": now.to_rfc3339(),
                    "filename": filename,
                    "config": raw_config,
                }),
            );
            record.info(
                NAME,
                format!("exported {} records as {}", count, requested.to_uppercase()),
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn export(body: Value) -> Record {
        let mut record = Record::from_value(RequestKind::Export, body);
        ExportStage::new()
            .apply(&ExecCtx::default(), &mut record)
            .await
            .unwrap();
        record
    }

    fn content(record: &Record) -> &str {
        record.derived(DerivedKey::ExportResult).unwrap()["content"]
            .as_str()
            .unwrap()
    }

    #[tokio::test]
    async fn test_default_json_export() {
        let record = export(json!({"payload": {"b": 1, "a": [1, 2, 3]}})).await;
        let result = record.derived(DerivedKey::ExportResult).unwrap();

        assert_eq!(result["format"], "json");
        assert_eq!(result["record_count"], 3);
        assert_eq!(content(&record), "{\n  \"b\": 1,\n  \"a\": [\n    1,\n    2,\n    3\n  ]\n}");
        assert_eq!(result["size_bytes"], content(&record).len());
        assert!(result["filename"].as_str().unwrap().ends_with(".json"));
        assert_eq!(record.log()[0].message, "exported 3 records as JSON");
    }

    #[tokio::test]
    async fn test_json_sorted_compact_with_filters() {
        let record = export(json!({
            "payload": {"c": 3, "b": 2, "a": 1, "secret": "x"},
            "export_config": {"indent": 0, "sort_keys": true, "fields": ["c", "a", "secret"], "exclude_fields": ["secret"], "filename": "out.json"}
        }))
        .await;
        assert_eq!(content(&record), r#"{"a":1,"c":3}"#);
        assert_eq!(record.derived(DerivedKey::ExportResult).unwrap()["filename"], "out.json");
    }

    #[tokio::test]
    async fn test_csv_object_and_rows() {
        let record = export(json!({
            "payload": {"name": "Ada, Countess", "age": 36},
            "export_config": {"format": "CSV"}
        }))
        .await;
        assert_eq!(content(&record), "key,value\r\nname,\"Ada, Countess\"\r\nage,36\r\n");

        let record = export(json!({
            "payload": {"rows": [{"id": 1, "v": "a"}, {"id": 2, "v": "b"}]},
            "export_config": {"format": "csv", "source": "rows_source"},
            "rows_source": [{"id": 1, "v": "a"}, {"id": 2}]
        }))
        .await;
        assert_eq!(content(&record), "id,v\r\n1,a\r\n2,\r\n");
        assert_eq!(record.derived(DerivedKey::ExportResult).unwrap()["record_count"], 2);
    }

    #[tokio::test]
    async fn test_excel_is_tsv() {
        let record = export(json!({
            "payload": {"a": 1},
            "export_config": {"format": "excel"}
        }))
        .await;
        assert_eq!(content(&record), "Key\tValue\na\t1\n");
        assert_eq!(record.derived(DerivedKey::ExportResult).unwrap()["format"], "excel");

        let record = export(json!({
            "payload": {"a": 1, "b": "two"},
            "export_config": {"format": "tsv", "include_header": false}
        }))
        .await;
        assert_eq!(content(&record), "a\t1\nb\ttwo\n");
    }

    #[tokio::test]
    async fn test_xml_export() {
        let record = export(json!({
            "payload": {"name": "A & B", "tags": ["x", "y"], "1st": true, "empty": {}},
            "export_config": {"format": "xml", "root_element": "person"}
        }))
        .await;
        assert_eq!(
            content(&record),
            "<person>\n  <name>A &amp; B</name>\n  <tags>\n    <item>x</item>\n    <item>y</item>\n  </tags>\n  <field_1st>true</field_1st>\n  <empty />\n</person>"
        );
    }

    #[tokio::test]
    async fn test_txt_template_and_plain() {
        let record = export(json!({
            "payload": {"name": "Ada", "age": 36},
            "export_config": {"format": "txt", "template": "{name} is {age}"}
        }))
        .await;
        assert_eq!(content(&record), "Ada is 36");

        let record = export(json!({
            "payload": {"name": "Ada"},
            "export_config": {"format": "txt", "template": "{name} from {city}"}
        }))
        .await;
        assert_eq!(content(&record), "template error: missing key 'city'");

        let record = export(json!({
            "payload": {"name": "Ada", "langs": ["en", "fr"], "addr": {"city": "London"}},
            "export_config": {"format": "txt", "separator": " = "}
        }))
        .await;
        assert_eq!(content(&record), "name = Ada\nlangs:\n  - en\n  - fr\naddr:\n  city = London");
    }

    #[tokio::test]
    async fn test_source_falls_back_to_payload_and_flattens() {
        let record = export(json!({
            "payload": {"user": {"name": "Ada", "roles": [{"id": 1}, "admin"]}},
            "export_config": {"source": "enriched_payload", "flatten": true, "indent": 0}
        }))
        .await;
        assert_eq!(
            content(&record),
            r#"{"user.name":"Ada","user.roles[0].id":1,"user.roles[1]":"admin"}"#
        );
    }

    #[tokio::test]
    async fn test_unsupported_format_warns() {
        let record = export(json!({
            "payload": {"a": 1},
            "export_config": {"format": "pdf"}
        }))
        .await;
        assert!(record.errors().is_empty());
        assert_eq!(record.warnings().len(), 1);
        assert_eq!(record.derived(DerivedKey::ExportError).unwrap(), "unsupported format: pdf");
        assert!(record.derived(DerivedKey::ExportResult).is_none());
    }

    #[cfg(feature = "yaml")]
    #[tokio::test]
    async fn test_yaml_export() {
        let record = export(json!({
            "payload": {"name": "Ada"},
            "export_config": {"format": "yaml"}
        }))
        .await;
        assert_eq!(content(&record), "name: Ada\n");
    }

    #[test]
    fn test_record_count() {
        assert_eq!(record_count(&json!([1, 2])), 2);
        assert_eq!(record_count(&json!({"a": 1})), 1);
        assert_eq!(record_count(&json!({"a": [], "b": [1, 2, 3]})), 3);
        assert_eq!(record_count(&json!("x")), 1);
    }
}
