//! Decoding of SRS MARC records from their JSON form into rows.
//!
//! A MARC record arrives as a JSON object with a `leader` string and a
//! `fields` array. Each element of `fields` maps one 3-character tag to
//! either a string (control field) or an object carrying two indicators and
//! a `subfields` array (data field). Decoding walks that structure in
//! document order and emits one [`MarcRow`] per control field, leader, or
//! subfield value, with a line number that is contiguous from 1 and a
//! per-tag occurrence counter.
//!
//! Only a record considered current is emitted, where current means
//! `state = "ACTUAL"` and some content present in 999$i (indicators `ff`),
//! which holds the instance identifier. For a record that is not current,
//! [`transform`] returns an empty row set and an empty instance identifier.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::bail;
use crate::error::{ErrorKind, MarctabResult};

/// Synthetic tag under which the leader is emitted.
pub const LEADER_FIELD: &str = "000";

/// Tag of the control identifier; the leader row is emitted just before it.
const CONTROL_ID_FIELD: &str = "001";

/// One row of data extracted from part of a MARC record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarcRow {
    pub line: i16,
    pub field: String,
    pub ind1: String,
    pub ind2: String,
    pub ord: i16,
    pub sf: String,
    pub content: String,
}

/// Returns the 1000 3-digit MARC field names `000` through `999`.
pub fn all_field_names() -> Vec<String> {
    (0..1000).map(|n| format!("{n:03}")).collect()
}

/// Decodes a MARC record in JSON form into rows.
///
/// Returns the rows and the instance identifier, or an empty row set and an
/// empty identifier if the record is not current. Any shape violation in
/// the JSON is a parse error; the caller is expected to skip the record.
pub fn transform(marc_json: &str, state: &str) -> MarctabResult<(Vec<MarcRow>, String)> {
    let value: Value = serde_json::from_str(marc_json)?;
    let Some(record) = value.as_object() else {
        bail!(ErrorKind::Parse, "parsing", "record is not an object");
    };
    let leader = match record.get("leader") {
        Some(Value::String(leader)) => leader.as_str(),
        Some(_) => bail!(ErrorKind::Parse, "parsing", "\"leader\" is not a string"),
        None => bail!(ErrorKind::Parse, "parsing", "\"leader\" not found"),
    };
    let fields = match record.get("fields") {
        Some(Value::Array(fields)) => fields,
        Some(_) => bail!(ErrorKind::Parse, "parsing", "\"fields\" is not an array"),
        None => bail!(ErrorKind::Parse, "parsing", "\"fields\" not found"),
    };

    let mut rows: Vec<MarcRow> = Vec::new();
    let mut line: i16 = 1;
    let mut field_counts: HashMap<String, i16> = HashMap::new();
    for element in fields {
        let Some(field) = element.as_object() else {
            bail!(
                ErrorKind::Parse,
                "parsing",
                "\"fields\" element is not an object"
            );
        };
        if field.len() != 1 {
            bail!(
                ErrorKind::Parse,
                "parsing",
                format!("\"fields\" element has {} entries", field.len())
            );
        }
        for (tag, value) in field {
            let ord = next_ord(&mut field_counts, tag)?;
            match value {
                Value::String(content) => {
                    // The leader is attached to the control identifier: each
                    // 001 is preceded by a synthetic 000 row with the same ord.
                    if tag == CONTROL_ID_FIELD {
                        rows.push(MarcRow {
                            line,
                            field: LEADER_FIELD.to_string(),
                            ind1: String::new(),
                            ind2: String::new(),
                            ord,
                            sf: String::new(),
                            content: leader.to_string(),
                        });
                        line = next_line(line)?;
                    }
                    rows.push(MarcRow {
                        line,
                        field: tag.clone(),
                        ind1: String::new(),
                        ind2: String::new(),
                        ord,
                        sf: String::new(),
                        content: content.clone(),
                    });
                    line = next_line(line)?;
                }
                Value::Object(subvalue) => {
                    transform_subfields(&mut rows, &mut line, tag, ord, subvalue)?;
                }
                _ => bail!(
                    ErrorKind::Parse,
                    "parsing",
                    format!("unknown data type in field \"{tag}\"")
                ),
            }
        }
    }

    let instance_id = find_instance_id(&rows);
    if !is_current(state, &instance_id) {
        return Ok((Vec::new(), String::new()));
    }
    Ok((rows, instance_id))
}

/// Emits one row per subfield value of a data field.
fn transform_subfields(
    rows: &mut Vec<MarcRow>,
    line: &mut i16,
    field: &str,
    ord: i16,
    subvalue: &Map<String, Value>,
) -> MarctabResult<()> {
    let ind1 = match subvalue.get("ind1") {
        Some(Value::String(ind1)) => ind1,
        Some(_) => bail!(ErrorKind::Parse, "parsing", "\"ind1\" wrong type"),
        None => bail!(ErrorKind::Parse, "parsing", "\"ind1\" not found"),
    };
    let ind2 = match subvalue.get("ind2") {
        Some(Value::String(ind2)) => ind2,
        Some(_) => bail!(ErrorKind::Parse, "parsing", "\"ind2\" wrong type"),
        None => bail!(ErrorKind::Parse, "parsing", "\"ind2\" not found"),
    };
    let subfields = match subvalue.get("subfields") {
        Some(Value::Array(subfields)) => subfields,
        Some(_) => bail!(ErrorKind::Parse, "parsing", "\"subfields\" is not an array"),
        None => bail!(ErrorKind::Parse, "parsing", "\"subfields\" not found"),
    };
    for subfield in subfields {
        let Some(entries) = subfield.as_object() else {
            bail!(
                ErrorKind::Parse,
                "parsing",
                "\"subfields\" element is not an object"
            );
        };
        for (code, value) in entries {
            let Value::String(content) = value else {
                bail!(ErrorKind::Parse, "parsing", "subfield value is not a string");
            };
            rows.push(MarcRow {
                line: *line,
                field: field.to_string(),
                ind1: ind1.clone(),
                ind2: ind2.clone(),
                ord,
                sf: code.clone(),
                content: content.clone(),
            });
            *line = next_line(*line)?;
        }
    }
    Ok(())
}

fn next_line(line: i16) -> MarctabResult<i16> {
    match line.checked_add(1) {
        Some(next) => Ok(next),
        None => bail!(ErrorKind::Parse, "parsing", "record produces too many rows"),
    }
}

fn next_ord(field_counts: &mut HashMap<String, i16>, tag: &str) -> MarctabResult<i16> {
    let count = field_counts.entry(tag.to_string()).or_insert(0);
    match count.checked_add(1) {
        Some(next) => {
            *count = next;
            Ok(next)
        }
        None => bail!(
            ErrorKind::Parse,
            "parsing",
            format!("too many occurrences of field \"{tag}\"")
        ),
    }
}

/// The instance identifier is the first non-empty 999$i with indicators `ff`.
fn find_instance_id(rows: &[MarcRow]) -> String {
    rows.iter()
        .find(|row| {
            row.field == "999"
                && row.ind1 == "f"
                && row.ind2 == "f"
                && row.sf == "i"
                && !row.content.is_empty()
        })
        .map(|row| row.content.clone())
        .unwrap_or_default()
}

fn is_current(state: &str, instance_id: &str) -> bool {
    state == "ACTUAL" && !instance_id.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const MINIMAL: &str = r#"{"leader":"L","fields":[
        {"001":"ctl"},
        {"999":{"ind1":"f","ind2":"f","subfields":[{"i":"INST1"}]}}
    ]}"#;

    fn row(
        line: i16,
        field: &str,
        ind1: &str,
        ind2: &str,
        ord: i16,
        sf: &str,
        content: &str,
    ) -> MarcRow {
        MarcRow {
            line,
            field: field.to_string(),
            ind1: ind1.to_string(),
            ind2: ind2.to_string(),
            ord,
            sf: sf.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn field_names_cover_all_partitions() {
        let names = all_field_names();
        assert_eq!(names.len(), 1000);
        assert_eq!(names[0], "000");
        assert_eq!(names[1], "001");
        assert_eq!(names[999], "999");
    }

    #[test]
    fn minimal_current_record() {
        let (rows, instance_id) = transform(MINIMAL, "ACTUAL").unwrap();
        assert_eq!(instance_id, "INST1");
        assert_eq!(
            rows,
            vec![
                row(1, "000", "", "", 1, "", "L"),
                row(2, "001", "", "", 1, "", "ctl"),
                row(3, "999", "f", "f", 1, "i", "INST1"),
            ]
        );
    }

    #[test]
    fn non_actual_state_emits_nothing() {
        let (rows, instance_id) = transform(MINIMAL, "DELETED").unwrap();
        assert!(rows.is_empty());
        assert!(instance_id.is_empty());
    }

    #[test]
    fn missing_instance_id_emits_nothing() {
        let data = r#"{"leader":"L","fields":[{"001":"ctl"}]}"#;
        let (rows, instance_id) = transform(data, "ACTUAL").unwrap();
        assert!(rows.is_empty());
        assert!(instance_id.is_empty());
    }

    #[test]
    fn empty_instance_id_emits_nothing() {
        let data = r#"{"leader":"L","fields":[
            {"001":"ctl"},
            {"999":{"ind1":"f","ind2":"f","subfields":[{"i":""}]}}
        ]}"#;
        let (rows, _) = transform(data, "ACTUAL").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn repeated_control_identifier_repeats_leader() {
        let data = r#"{"leader":"L","fields":[
            {"001":"a"},
            {"001":"b"},
            {"999":{"ind1":"f","ind2":"f","subfields":[{"i":"INST1"}]}}
        ]}"#;
        let (rows, _) = transform(data, "ACTUAL").unwrap();
        assert_eq!(
            rows,
            vec![
                row(1, "000", "", "", 1, "", "L"),
                row(2, "001", "", "", 1, "", "a"),
                row(3, "000", "", "", 2, "", "L"),
                row(4, "001", "", "", 2, "", "b"),
                row(5, "999", "f", "f", 1, "i", "INST1"),
            ]
        );
    }

    #[test]
    fn ord_counts_per_tag() {
        let data = r#"{"leader":"L","fields":[
            {"001":"ctl"},
            {"650":{"ind1":" ","ind2":"0","subfields":[{"a":"Cats"}]}},
            {"100":{"ind1":"1","ind2":" ","subfields":[{"a":"Author"}]}},
            {"650":{"ind1":" ","ind2":"0","subfields":[{"a":"Dogs"}]}},
            {"999":{"ind1":"f","ind2":"f","subfields":[{"i":"INST1"}]}}
        ]}"#;
        let (rows, _) = transform(data, "ACTUAL").unwrap();
        let ords: Vec<(String, i16)> = rows
            .iter()
            .filter(|r| r.field == "650")
            .map(|r| (r.content.clone(), r.ord))
            .collect();
        assert_eq!(
            ords,
            vec![("Cats".to_string(), 1), ("Dogs".to_string(), 2)]
        );
        let author = rows.iter().find(|r| r.field == "100").unwrap();
        assert_eq!(author.ord, 1);
    }

    #[test]
    fn lines_are_contiguous_from_one() {
        let data = r#"{"leader":"L","fields":[
            {"001":"ctl"},
            {"005":"20240101"},
            {"245":{"ind1":"1","ind2":"0","subfields":[{"a":"Title"},{"b":"Sub"}]}},
            {"999":{"ind1":"f","ind2":"f","subfields":[{"i":"INST1"},{"s":"SRS1"}]}}
        ]}"#;
        let (rows, _) = transform(data, "ACTUAL").unwrap();
        let lines: Vec<i16> = rows.iter().map(|r| r.line).collect();
        let expected: Vec<i16> = (1..=rows.len() as i16).collect();
        assert_eq!(lines, expected);
    }

    #[test]
    fn emission_count_matches_structure() {
        // one leader synth + two control fields + three subfield values
        let data = r#"{"leader":"L","fields":[
            {"001":"ctl"},
            {"008":"fixed"},
            {"245":{"ind1":"1","ind2":"0","subfields":[{"a":"Title"},{"b":"Sub"}]}},
            {"999":{"ind1":"f","ind2":"f","subfields":[{"i":"INST1"}]}}
        ]}"#;
        let (rows, _) = transform(data, "ACTUAL").unwrap();
        assert_eq!(rows.len(), 1 + 2 + 3);
    }

    #[test]
    fn instance_id_shared_and_taken_from_gating_subfield() {
        let data = r#"{"leader":"L","fields":[
            {"999":{"ind1":"x","ind2":"y","subfields":[{"i":"WRONG"}]}},
            {"999":{"ind1":"f","ind2":"f","subfields":[{"i":"RIGHT"}]}}
        ]}"#;
        let (_, instance_id) = transform(data, "ACTUAL").unwrap();
        assert_eq!(instance_id, "RIGHT");
    }

    #[test]
    fn emission_completeness_on_generated_records() {
        // For a current record, the row count must equal the number of 001
        // occurrences (leader rows) plus control-field occurrences plus the
        // total number of subfield values.
        for control_count in 0..4usize {
            for data_count in 0..4usize {
                for subfields_per_field in 1..3usize {
                    let mut fields = Vec::new();
                    for n in 0..control_count {
                        fields.push(serde_json::json!({ "001": format!("c{n}") }));
                    }
                    for n in 0..data_count {
                        let subfields: Vec<serde_json::Value> = (0..subfields_per_field)
                            .map(|s| serde_json::json!({ "a": format!("v{n}-{s}") }))
                            .collect();
                        fields.push(serde_json::json!({
                            "650": { "ind1": " ", "ind2": "0", "subfields": subfields }
                        }));
                    }
                    fields.push(serde_json::json!({
                        "999": { "ind1": "f", "ind2": "f", "subfields": [{ "i": "INST1" }] }
                    }));
                    let record = serde_json::json!({ "leader": "L", "fields": fields });

                    let (rows, instance_id) =
                        transform(&record.to_string(), "ACTUAL").unwrap();
                    let expected = control_count * 2 + data_count * subfields_per_field + 1;
                    assert_eq!(rows.len(), expected);
                    assert_eq!(instance_id, "INST1");
                    let lines: Vec<i16> = rows.iter().map(|r| r.line).collect();
                    let want: Vec<i16> = (1..=rows.len() as i16).collect();
                    assert_eq!(lines, want);
                }
            }
        }
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = transform("{not json", "ACTUAL").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn shape_violations_are_parse_errors() {
        let cases = [
            r#"[1,2,3]"#,
            r#"{"fields":[]}"#,
            r#"{"leader":7,"fields":[]}"#,
            r#"{"leader":"L"}"#,
            r#"{"leader":"L","fields":{}}"#,
            r#"{"leader":"L","fields":[7]}"#,
            r#"{"leader":"L","fields":[{"245":7}]}"#,
            r#"{"leader":"L","fields":[{"245":{"ind2":" ","subfields":[]}}]}"#,
            r#"{"leader":"L","fields":[{"245":{"ind1":" ","subfields":[]}}]}"#,
            r#"{"leader":"L","fields":[{"245":{"ind1":" ","ind2":" "}}]}"#,
            r#"{"leader":"L","fields":[{"245":{"ind1":" ","ind2":" ","subfields":{}}}]}"#,
            r#"{"leader":"L","fields":[{"245":{"ind1":" ","ind2":" ","subfields":[7]}}]}"#,
            r#"{"leader":"L","fields":[{"245":{"ind1":" ","ind2":" ","subfields":[{"a":7}]}}]}"#,
            r#"{"leader":"L","fields":[{"245":{"ind1":7,"ind2":" ","subfields":[]}}]}"#,
        ];
        for data in cases {
            let err = transform(data, "ACTUAL").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Parse, "case: {data}");
        }
    }

    #[test]
    fn multi_entry_field_object_is_a_parse_error() {
        let data = r#"{"leader":"L","fields":[{"001":"a","005":"b"}]}"#;
        let err = transform(data, "ACTUAL").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn multi_pair_subfield_entries_emit_in_document_order() {
        let data = r#"{"leader":"L","fields":[
            {"900":{"ind1":" ","ind2":" ","subfields":[{"z":"first","a":"second"}]}},
            {"999":{"ind1":"f","ind2":"f","subfields":[{"i":"INST1"}]}}
        ]}"#;
        let (rows, _) = transform(data, "ACTUAL").unwrap();
        let codes: Vec<&str> = rows
            .iter()
            .filter(|r| r.field == "900")
            .map(|r| r.sf.as_str())
            .collect();
        assert_eq!(codes, vec!["z", "a"]);
    }

    #[test]
    fn empty_subfields_array_emits_no_rows_but_counts_ord() {
        let data = r#"{"leader":"L","fields":[
            {"650":{"ind1":" ","ind2":" ","subfields":[]}},
            {"650":{"ind1":" ","ind2":" ","subfields":[{"a":"Dogs"}]}},
            {"999":{"ind1":"f","ind2":"f","subfields":[{"i":"INST1"}]}}
        ]}"#;
        let (rows, _) = transform(data, "ACTUAL").unwrap();
        let dogs = rows.iter().find(|r| r.content == "Dogs").unwrap();
        assert_eq!(dogs.ord, 2);
    }
}
