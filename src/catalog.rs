// 📚 Source Catalog - record types → tables → conflict policy
//
// Closed mapping: every RecordType carries its table layout and policy
// statically. The catalog itself is just the ordered subset a run uses.

use crate::error::{IngestError, IngestResult};
use serde::{Deserialize, Serialize};

// ============================================================================
// RECORD TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// Income statement (statement-A)
    Income,
    /// Balance sheet (statement-B)
    BalanceSheet,
    /// Financial indicators
    Indicator,
    /// Dividend distributions
    Dividend,
}

impl RecordType {
    pub const ALL: [RecordType; 4] = [
        RecordType::Income,
        RecordType::BalanceSheet,
        RecordType::Indicator,
        RecordType::Dividend,
    ];

    /// Name of the provider endpoint serving this record type
    pub fn api_name(&self) -> &'static str {
        match self {
            RecordType::Income => "income",
            RecordType::BalanceSheet => "balancesheet",
            RecordType::Indicator => "fina_indicator",
            RecordType::Dividend => "dividend",
        }
    }

    pub fn from_api_name(name: &str) -> IngestResult<RecordType> {
        RecordType::ALL
            .into_iter()
            .find(|rt| rt.api_name() == name.trim())
            .ok_or_else(|| IngestError::UnknownRecordType(name.to_string()))
    }

    pub fn policy(&self) -> PolicyClass {
        match self {
            RecordType::Dividend => PolicyClass::DiscardOnConflict,
            _ => PolicyClass::ConditionalFieldMerge,
        }
    }

    pub fn table(&self) -> &'static TableIdentity {
        match self {
            RecordType::Income => &INCOME_TABLE,
            RecordType::BalanceSheet => &BALANCESHEET_TABLE,
            RecordType::Indicator => &INDICATOR_TABLE,
            RecordType::Dividend => &DIVIDEND_TABLE,
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.api_name())
    }
}

// ============================================================================
// POLICY CLASS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyClass {
    /// Existing row wins; incoming duplicate is dropped
    DiscardOnConflict,
    /// Non-key fields overwritten per field merge rule
    ConditionalFieldMerge,
}

impl PolicyClass {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyClass::DiscardOnConflict => "discard-on-conflict",
            PolicyClass::ConditionalFieldMerge => "conditional-field-merge",
        }
    }
}

// ============================================================================
// TABLE IDENTITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Real,
    Integer,
}

impl ColumnKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Text => "TEXT",
            ColumnKind::Real => "REAL",
            ColumnKind::Integer => "INTEGER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn text(name: &'static str) -> Column {
    Column { name, kind: ColumnKind::Text }
}

const fn real(name: &'static str) -> Column {
    Column { name, kind: ColumnKind::Real }
}

const fn integer(name: &'static str) -> Column {
    Column { name, kind: ColumnKind::Integer }
}

/// Target table: name, unique business key, declared columns.
///
/// Key columns are listed in `columns` too, first, in key order.
#[derive(Debug, PartialEq, Eq)]
pub struct TableIdentity {
    pub name: &'static str,
    pub key: &'static [&'static str],
    pub columns: &'static [Column],
    pub revision_marker: Option<&'static str>,
}

impl TableIdentity {
    pub fn is_key(&self, column: &str) -> bool {
        self.key.contains(&column)
    }

    pub fn has_revision_marker(&self) -> bool {
        self.revision_marker.is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    /// Non-key columns, in declaration order
    pub fn payload_columns(&self) -> impl Iterator<Item = &'static Column> + '_ {
        self.columns.iter().filter(move |c| !self.is_key(c.name))
    }
}

pub const REVISION_MARKER: &str = "update_flag";

static INCOME_TABLE: TableIdentity = TableIdentity {
    name: "t_income",
    key: &["ts_code", "end_date"],
    columns: &[
        text("ts_code"),
        text("end_date"),
        text("ann_date"),
        text("f_ann_date"),
        text("report_type"),
        text("comp_type"),
        real("basic_eps"),
        real("diluted_eps"),
        real("total_revenue"),
        real("revenue"),
        real("int_income"),
        real("int_exp"),
        real("comm_income"),
        real("comm_exp"),
        real("n_commis_income"),
        real("n_oth_income"),
        real("oper_exp"),
        real("admin_exp"),
        real("biz_tax_surchg"),
        real("assets_impair_loss"),
        real("operate_profit"),
        real("non_oper_income"),
        real("non_oper_exp"),
        real("total_profit"),
        real("income_tax"),
        real("n_income"),
        real("n_income_attr_p"),
        real("minority_gain"),
        integer(REVISION_MARKER),
    ],
    revision_marker: Some(REVISION_MARKER),
};

static BALANCESHEET_TABLE: TableIdentity = TableIdentity {
    name: "t_balancesheet",
    key: &["ts_code", "end_date"],
    columns: &[
        text("ts_code"),
        text("end_date"),
        text("ann_date"),
        text("f_ann_date"),
        text("report_type"),
        text("comp_type"),
        real("total_share"),
        real("cash_reser_cb"),
        real("depos_in_oth_bfi"),
        real("loanto_oth_bank_fi"),
        real("trad_asset"),
        real("decr_in_disbur"),
        real("htm_invest"),
        real("fa_avail_for_sale"),
        real("total_assets"),
        real("cb_borr"),
        real("depos"),
        real("depos_oth_bfi"),
        real("loan_oth_bank"),
        real("total_liab"),
        real("total_hldr_eqy_exc_min_int"),
        real("total_hldr_eqy_inc_min_int"),
        real("total_liab_hldr_eqy"),
        integer(REVISION_MARKER),
    ],
    revision_marker: Some(REVISION_MARKER),
};

static INDICATOR_TABLE: TableIdentity = TableIdentity {
    name: "t_fina_indicator",
    key: &["ts_code", "end_date"],
    columns: &[
        text("ts_code"),
        text("end_date"),
        text("ann_date"),
        real("eps"),
        real("dt_eps"),
        real("bps"),
        real("ocfps"),
        real("roe"),
        real("roe_waa"),
        real("roe_dt"),
        real("roa"),
        real("netprofit_margin"),
        real("debt_to_assets"),
        real("assets_to_eqt"),
        real("netprofit_yoy"),
        real("or_yoy"),
        real("equity_yoy"),
    ],
    revision_marker: None,
};

static DIVIDEND_TABLE: TableIdentity = TableIdentity {
    name: "t_dividend",
    key: &["ts_code", "end_date", "div_proc"],
    columns: &[
        text("ts_code"),
        text("end_date"),
        text("div_proc"),
        text("ann_date"),
        real("stk_div"),
        real("stk_bo_rate"),
        real("stk_co_rate"),
        real("cash_div"),
        real("cash_div_tax"),
        text("record_date"),
        text("ex_date"),
        text("pay_date"),
        text("div_listdate"),
        text("imp_ann_date"),
        text("base_date"),
        real("base_share"),
    ],
    revision_marker: None,
};

// ============================================================================
// SOURCE CATALOG
// ============================================================================

/// Ordered set of record types registered for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCatalog {
    entries: Vec<RecordType>,
}

impl SourceCatalog {
    /// All record types, in canonical order
    pub fn standard() -> Self {
        SourceCatalog {
            entries: RecordType::ALL.to_vec(),
        }
    }

    /// Build a catalog from provider API names, keeping the given order.
    pub fn from_api_names<S: AsRef<str>>(names: &[S]) -> IngestResult<Self> {
        let mut entries = Vec::new();
        for name in names {
            let rt = RecordType::from_api_name(name.as_ref())?;
            if !entries.contains(&rt) {
                entries.push(rt);
            }
        }
        Ok(SourceCatalog { entries })
    }

    pub fn record_types(&self) -> &[RecordType] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_registered(&self, rt: RecordType) -> IngestResult<()> {
        if self.entries.contains(&rt) {
            Ok(())
        } else {
            Err(IngestError::UnknownRecordType(rt.api_name().to_string()))
        }
    }

    pub fn policy_for(&self, rt: RecordType) -> IngestResult<PolicyClass> {
        self.ensure_registered(rt)?;
        Ok(rt.policy())
    }

    pub fn table_for(&self, rt: RecordType) -> IngestResult<&'static TableIdentity> {
        self.ensure_registered(rt)?;
        Ok(rt.table())
    }
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_assignment() {
        let catalog = SourceCatalog::standard();

        assert_eq!(
            catalog.policy_for(RecordType::Dividend).unwrap(),
            PolicyClass::DiscardOnConflict
        );
        for rt in [RecordType::Income, RecordType::BalanceSheet, RecordType::Indicator] {
            assert_eq!(catalog.policy_for(rt).unwrap(), PolicyClass::ConditionalFieldMerge);
        }
    }

    #[test]
    fn test_table_names_and_markers() {
        let catalog = SourceCatalog::standard();

        assert_eq!(catalog.table_for(RecordType::Income).unwrap().name, "t_income");
        assert_eq!(catalog.table_for(RecordType::BalanceSheet).unwrap().name, "t_balancesheet");
        assert_eq!(catalog.table_for(RecordType::Indicator).unwrap().name, "t_fina_indicator");
        assert_eq!(catalog.table_for(RecordType::Dividend).unwrap().name, "t_dividend");

        assert!(RecordType::Income.table().has_revision_marker());
        assert!(RecordType::BalanceSheet.table().has_revision_marker());
        assert!(!RecordType::Indicator.table().has_revision_marker());
        assert!(!RecordType::Dividend.table().has_revision_marker());
    }

    #[test]
    fn test_key_columns_lead_column_list() {
        for rt in RecordType::ALL {
            let table = rt.table();
            let leading: Vec<&str> = table.column_names().take(table.key.len()).collect();
            assert_eq!(leading, table.key.to_vec(), "{} key must lead its columns", table.name);
            if let Some(marker) = table.revision_marker {
                assert!(table.column_names().any(|c| c == marker));
            }
        }
    }

    #[test]
    fn test_unregistered_record_type_fails() {
        let catalog = SourceCatalog::from_api_names(&["income", "dividend"]).unwrap();

        assert_eq!(catalog.record_types(), &[RecordType::Income, RecordType::Dividend]);
        assert!(matches!(
            catalog.policy_for(RecordType::Indicator),
            Err(IngestError::UnknownRecordType(name)) if name == "fina_indicator"
        ));
        assert!(catalog.table_for(RecordType::BalanceSheet).is_err());
    }

    #[test]
    fn test_unknown_api_name_fails() {
        let err = SourceCatalog::from_api_names(&["income", "cashflow"]).unwrap_err();
        assert!(matches!(err, IngestError::UnknownRecordType(name) if name == "cashflow"));
    }

    #[test]
    fn test_duplicate_names_collapse_keeping_order() {
        let catalog =
            SourceCatalog::from_api_names(&["dividend", "income", "dividend"]).unwrap();
        assert_eq!(catalog.record_types(), &[RecordType::Dividend, RecordType::Income]);
    }
}
