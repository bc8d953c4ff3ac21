// ⚖️ Conflict Resolver - turns (policy, batch) into one conflict-safe upsert
//
// The storage engine already enforces the business key as unique. All the
// resolver decides is what happens on a key collision, field by field:
//
//   DiscardOnConflict      → keep every existing field (incoming row dropped)
//   ConditionalFieldMerge  → no marker:  overwrite every field
//                            marker:     overwrite only if incoming marker = 1
//
// The revision marker itself follows the same rule as any other field.

use crate::catalog::{PolicyClass, TableIdentity};
use crate::error::{IngestError, IngestResult};
use crate::row::{Row, Value};
use chrono::NaiveDate;

// ============================================================================
// FIELD MERGE RULE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Existing value always survives
    Keep,
    /// Incoming value always wins
    Overwrite,
    /// Incoming value wins only when the incoming row is a revision
    OverwriteIfRevised { marker: &'static str },
}

impl FieldRule {
    /// Rule applied to every non-key column of `table` under `policy`
    pub fn for_table(table: &TableIdentity, policy: PolicyClass) -> FieldRule {
        match (policy, table.revision_marker) {
            (PolicyClass::DiscardOnConflict, _) => FieldRule::Keep,
            (PolicyClass::ConditionalFieldMerge, None) => FieldRule::Overwrite,
            (PolicyClass::ConditionalFieldMerge, Some(marker)) => {
                FieldRule::OverwriteIfRevised { marker }
            }
        }
    }

    /// F(existing, incoming) → stored value. Reference form of `render`,
    /// checked against what the rendered SQL actually stores.
    #[cfg(test)]
    pub fn decide(&self, existing: &Value, incoming: &Value, incoming_revised: bool) -> Value {
        match self {
            FieldRule::Keep => existing.clone(),
            FieldRule::Overwrite => incoming.clone(),
            FieldRule::OverwriteIfRevised { .. } => {
                if incoming_revised {
                    incoming.clone()
                } else {
                    existing.clone()
                }
            }
        }
    }

    /// SQL expression for the SET clause of an upsert
    fn render(&self, table: &str, column: &str) -> String {
        match self {
            FieldRule::Keep => format!("{col} = {tbl}.{col}", col = quote(column), tbl = quote(table)),
            FieldRule::Overwrite => format!("{col} = excluded.{col}", col = quote(column)),
            FieldRule::OverwriteIfRevised { marker } => format!(
                "{col} = CASE WHEN excluded.{m} = 1 THEN excluded.{col} ELSE {tbl}.{col} END",
                col = quote(column),
                tbl = quote(table),
                m = quote(marker),
            ),
        }
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

// ============================================================================
// MERGE STATEMENT
// ============================================================================

/// Parameterized upsert for one table; one parameter per column, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStatement {
    pub table: &'static str,
    pub columns: Vec<&'static str>,
    pub sql: String,
}

/// Build the upsert for (table, key, field rule).
///
/// Statement construction knows nothing about policies; it only renders the
/// rule it is handed.
pub fn upsert_statement(table: &TableIdentity, rule: FieldRule) -> MergeStatement {
    let columns: Vec<&'static str> = table.column_names().collect();
    let column_list = columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let key_list = table.key.iter().map(|k| quote(k)).collect::<Vec<_>>().join(", ");

    let payload: Vec<&str> = table.payload_columns().map(|c| c.name).collect();

    let conflict_action = if rule == FieldRule::Keep || payload.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let assignments = payload
            .iter()
            .map(|c| rule.render(table.name, c))
            .collect::<Vec<_>>()
            .join(", ");
        // Without the guard a non-revision collision still counts as a change.
        match rule {
            FieldRule::OverwriteIfRevised { marker } => format!(
                "DO UPDATE SET {} WHERE excluded.{} = 1",
                assignments,
                quote(marker)
            ),
            _ => format!("DO UPDATE SET {}", assignments),
        }
    };

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        quote(table.name),
        column_list,
        placeholders,
        key_list,
        conflict_action
    );

    MergeStatement {
        table: table.name,
        columns,
        sql,
    }
}

// ============================================================================
// MERGE PLAN
// ============================================================================

/// A validated batch, ready to bind against its statement
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub statement: MergeStatement,
    pub policy: PolicyClass,
    pub rows: Vec<Vec<Value>>,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

// ============================================================================
// CONFLICT RESOLVER
// ============================================================================

pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        ConflictResolver
    }

    /// Validate a batch and bind it to the policy's upsert.
    ///
    /// One bad row rejects the whole batch. An empty batch yields an empty plan.
    pub fn resolve(
        &self,
        table: &TableIdentity,
        policy: PolicyClass,
        rows: &[Row],
    ) -> IngestResult<MergePlan> {
        let statement = upsert_statement(table, FieldRule::for_table(table, policy));

        let mut bound = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            bound.push(self.bind_row(table, index, row)?);
        }

        Ok(MergePlan {
            statement,
            policy,
            rows: bound,
        })
    }

    fn bind_row(&self, table: &TableIdentity, index: usize, row: &Row) -> IngestResult<Vec<Value>> {
        let malformed = |reason: String| IngestError::MalformedRow {
            table: table.name.to_string(),
            row_index: index,
            reason,
        };

        for key in table.key {
            match row.get(key) {
                None | Some(Value::Null) => {
                    return Err(malformed(format!("missing key field '{}'", key)));
                }
                Some(Value::Text(s)) if s.trim().is_empty() => {
                    return Err(malformed(format!("empty key field '{}'", key)));
                }
                Some(value) if key.ends_with("_date") => {
                    let text = match value {
                        Value::Text(s) => s.trim().to_string(),
                        Value::Integer(i) => i.to_string(),
                        _ => String::new(),
                    };
                    if NaiveDate::parse_from_str(&text, "%Y%m%d").is_err() {
                        return Err(malformed(format!(
                            "key field '{}' is not a YYYYMMDD date: {:?}",
                            key, value
                        )));
                    }
                }
                Some(_) => {}
            }
        }

        let mut values = Vec::with_capacity(table.columns.len());
        for column in table.column_names() {
            let value = row.get(column).cloned().unwrap_or(Value::Null);
            if table.revision_marker == Some(column) {
                let flag = normalize_marker(&value).ok_or_else(|| {
                    malformed(format!("revision marker '{}' is not 0/1: {:?}", column, value))
                })?;
                values.push(Value::Integer(flag));
            } else {
                values.push(value);
            }
        }

        Ok(values)
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Missing marker means "not a revision"
fn normalize_marker(value: &Value) -> Option<i64> {
    match value {
        Value::Null => Some(0),
        Value::Integer(i @ (0 | 1)) => Some(*i),
        Value::Real(f) if *f == 0.0 => Some(0),
        Value::Real(f) if *f == 1.0 => Some(1),
        Value::Text(s) => match s.trim() {
            "" | "0" => Some(0),
            "1" => Some(1),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RecordType;
    use crate::db;
    use rusqlite::{params_from_iter, Connection};

    fn income_row(end_date: &str, n_income: f64, flag: &str) -> Row {
        Row::new()
            .with("ts_code", "601398.SH")
            .with("end_date", end_date)
            .with("n_income", n_income)
            .with("update_flag", flag)
    }

    #[test]
    fn test_field_rule_per_policy() {
        assert_eq!(
            FieldRule::for_table(RecordType::Dividend.table(), PolicyClass::DiscardOnConflict),
            FieldRule::Keep
        );
        assert_eq!(
            FieldRule::for_table(RecordType::Indicator.table(), PolicyClass::ConditionalFieldMerge),
            FieldRule::Overwrite
        );
        assert_eq!(
            FieldRule::for_table(RecordType::Income.table(), PolicyClass::ConditionalFieldMerge),
            FieldRule::OverwriteIfRevised { marker: "update_flag" }
        );
    }

    #[test]
    fn test_decide_revision_protection() {
        let rule = FieldRule::OverwriteIfRevised { marker: "update_flag" };
        let existing = Value::Real(10.0);
        let incoming = Value::Real(99.0);

        assert_eq!(rule.decide(&existing, &incoming, false), Value::Real(10.0));
        assert_eq!(rule.decide(&existing, &incoming, true), Value::Real(99.0));

        // marker follows the same rule
        assert_eq!(rule.decide(&Value::Integer(1), &Value::Integer(0), false), Value::Integer(1));
    }

    #[test]
    fn test_decide_keep_and_overwrite() {
        let existing = Value::from("P1");
        let incoming = Value::from("P2");

        assert_eq!(FieldRule::Keep.decide(&existing, &incoming, true), existing);
        assert_eq!(FieldRule::Overwrite.decide(&existing, &incoming, false), incoming);
    }

    #[test]
    fn test_rendered_sql_agrees_with_decide() {
        let cases = [
            (RecordType::Dividend, "cash_div"),
            (RecordType::Indicator, "roe"),
            (RecordType::Income, "n_income"),
        ];

        for (rt, column) in cases {
            for revised in [false, true] {
                let conn = Connection::open_in_memory().unwrap();
                db::setup_database(&conn).unwrap();
                let table = rt.table();
                let row = |v: f64, flag: i64| {
                    let mut r = Row::new()
                        .with("ts_code", "601398.SH")
                        .with("end_date", "20231231")
                        .with(column, v);
                    if rt == RecordType::Dividend {
                        r.set("div_proc", "实施");
                    }
                    if table.has_revision_marker() {
                        r.set("update_flag", flag);
                    }
                    r
                };

                let plan = ConflictResolver::new()
                    .resolve(table, rt.policy(), &[row(1.0, 0), row(2.0, revised as i64)])
                    .unwrap();
                for values in &plan.rows {
                    conn.execute(&plan.statement.sql, params_from_iter(values.iter()))
                        .unwrap();
                }

                let mut key = vec![Value::from("601398.SH"), Value::from("20231231")];
                if rt == RecordType::Dividend {
                    key.push(Value::from("实施"));
                }
                let stored = db::get_row(&conn, table, &key).unwrap().unwrap();
                let expected = FieldRule::for_table(table, rt.policy()).decide(
                    &Value::Real(1.0),
                    &Value::Real(2.0),
                    revised,
                );
                assert_eq!(stored.get(column), Some(&expected), "{rt} revised={revised}");
            }
        }
    }

    #[test]
    fn test_discard_statement_shape() {
        let table = RecordType::Dividend.table();
        let stmt = upsert_statement(table, FieldRule::Keep);

        assert!(stmt.sql.starts_with("INSERT INTO \"t_dividend\""));
        assert!(stmt.sql.ends_with("ON CONFLICT (\"ts_code\", \"end_date\", \"div_proc\") DO NOTHING"));
        assert_eq!(stmt.columns.len(), table.columns.len());
        assert!(stmt.sql.contains(&format!("?{}", table.columns.len())));
    }

    #[test]
    fn test_revision_statement_never_sets_keys() {
        let table = RecordType::Income.table();
        let stmt = upsert_statement(table, FieldRule::for_table(table, PolicyClass::ConditionalFieldMerge));

        let set_clause = stmt.sql.split("DO UPDATE SET").nth(1).unwrap();
        assert!(!set_clause.contains("\"ts_code\" ="));
        assert!(!set_clause.contains("\"end_date\" ="));
        assert!(set_clause.contains(
            "\"update_flag\" = CASE WHEN excluded.\"update_flag\" = 1 THEN excluded.\"update_flag\" ELSE \"t_income\".\"update_flag\" END"
        ));
        assert!(set_clause.ends_with("WHERE excluded.\"update_flag\" = 1"));
    }

    #[test]
    fn test_overwrite_statement_has_no_guard() {
        let table = RecordType::Indicator.table();
        let stmt = upsert_statement(table, FieldRule::Overwrite);

        assert!(stmt.sql.contains("\"roe\" = excluded.\"roe\""));
        assert!(!stmt.sql.contains("WHERE"));
    }

    #[test]
    fn test_resolve_empty_batch_is_noop() {
        let resolver = ConflictResolver::new();
        let plan = resolver
            .resolve(RecordType::Income.table(), PolicyClass::ConditionalFieldMerge, &[])
            .unwrap();

        assert!(plan.is_empty());
    }

    #[test]
    fn test_resolve_normalizes_marker() {
        let resolver = ConflictResolver::new();
        let table = RecordType::Income.table();
        let rows = vec![
            income_row("20231231", 1.0, "1"),
            income_row("20230930", 2.0, ""),
            Row::new().with("ts_code", "601398.SH").with("end_date", "20230630"),
        ];

        let plan = resolver.resolve(table, PolicyClass::ConditionalFieldMerge, &rows).unwrap();
        let marker_idx = plan.statement.columns.iter().position(|c| *c == "update_flag").unwrap();

        assert_eq!(plan.rows[0][marker_idx], Value::Integer(1));
        assert_eq!(plan.rows[1][marker_idx], Value::Integer(0));
        assert_eq!(plan.rows[2][marker_idx], Value::Integer(0));
    }

    #[test]
    fn test_resolve_projects_onto_declared_columns() {
        let resolver = ConflictResolver::new();
        let table = RecordType::Indicator.table();
        let row = Row::new()
            .with("ts_code", "601398.SH")
            .with("end_date", "20231231")
            .with("roe", 10.5)
            .with("not_a_column", "ignored");

        let plan = resolver.resolve(table, PolicyClass::ConditionalFieldMerge, &[row]).unwrap();

        assert_eq!(plan.rows[0].len(), table.columns.len());
        let roe_idx = plan.statement.columns.iter().position(|c| *c == "roe").unwrap();
        assert_eq!(plan.rows[0][roe_idx], Value::Real(10.5));
        let bps_idx = plan.statement.columns.iter().position(|c| *c == "bps").unwrap();
        assert_eq!(plan.rows[0][bps_idx], Value::Null);
    }

    #[test]
    fn test_malformed_row_rejects_batch() {
        let resolver = ConflictResolver::new();
        let table = RecordType::Income.table();
        let mut rows: Vec<Row> = (1..=9)
            .map(|m| income_row(&format!("2023{:02}28", m), m as f64, "0"))
            .collect();
        rows.insert(4, Row::new().with("ts_code", "601398.SH").with("n_income", 5.0));

        let err = resolver
            .resolve(table, PolicyClass::ConditionalFieldMerge, &rows)
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::MalformedRow { row_index: 4, ref reason, .. } if reason.contains("end_date")
        ));
    }

    #[test]
    fn test_bad_key_date_and_bad_marker_rejected() {
        let resolver = ConflictResolver::new();
        let table = RecordType::Income.table();

        let bad_date = income_row("2023-12-31", 1.0, "0");
        assert!(resolver
            .resolve(table, PolicyClass::ConditionalFieldMerge, &[bad_date])
            .is_err());

        let bad_flag = income_row("20231231", 1.0, "yes");
        assert!(resolver
            .resolve(table, PolicyClass::ConditionalFieldMerge, &[bad_flag])
            .is_err());

        let blank_code = Row::new().with("ts_code", "  ").with("end_date", "20231231");
        assert!(resolver
            .resolve(table, PolicyClass::ConditionalFieldMerge, &[blank_code])
            .is_err());
    }
}
