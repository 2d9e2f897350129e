use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One row of the transaction ledger.
///
/// Field names follow the CSV headers of the source corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "id_transacao")]
    pub id: String,
    #[serde(rename = "data")]
    pub date: NaiveDate,
    #[serde(rename = "funcionario")]
    pub employee: String,
    #[serde(rename = "cargo")]
    pub role: String,
    #[serde(rename = "descricao")]
    pub description: String,
    #[serde(rename = "valor")]
    pub amount: f64,
    #[serde(rename = "categoria")]
    pub category: String,
    #[serde(rename = "departamento")]
    pub department: String,
}

/// Parsed ledger plus the rows that failed type coercion.
///
/// A malformed row (unparsable amount or date) is skipped and reported; it
/// never aborts the load or hides the remaining rows.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    transactions: Vec<Transaction>,
    parse_errors: Vec<String>,
}

impl Ledger {
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening ledger {}", path.display()))?;
        Ok(Self::from_reader(&mut reader))
    }

    pub fn from_csv(content: &str) -> Self {
        let mut reader = csv::Reader::from_reader(content.as_bytes());
        Self::from_reader(&mut reader)
    }

    fn from_reader<R: std::io::Read>(reader: &mut csv::Reader<R>) -> Self {
        let mut transactions = Vec::new();
        let mut parse_errors = Vec::new();

        for (row, result) in reader.deserialize::<Transaction>().enumerate() {
            match result {
                Ok(tx) => transactions.push(tx),
                Err(e) => {
                    // Ledger row numbers are 1-based and follow the header
                    parse_errors.push(format!("ledger row {}: {}", row + 2, e));
                }
            }
        }

        Self {
            transactions,
            parse_errors,
        }
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn parse_errors(&self) -> &[String] {
        &self.parse_errors
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Case-insensitive substring match on the employee name.
    pub fn search_by_employee(&self, employee: &str) -> Vec<&Transaction> {
        let needle = employee.to_lowercase();
        self.transactions
            .iter()
            .filter(|t| t.employee.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn search_by_value_range(&self, min: f64, max: f64) -> Vec<&Transaction> {
        self.transactions
            .iter()
            .filter(|t| t.amount >= min && t.amount <= max)
            .collect()
    }

    pub fn high_value(&self, threshold: f64) -> Vec<&Transaction> {
        self.search_by_value_range(threshold, f64::INFINITY)
    }

    /// Total spend per employee, in stable name order.
    pub fn totals_by_employee(&self) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        for tx in &self.transactions {
            *totals.entry(tx.employee.clone()).or_insert(0.0) += tx.amount;
        }
        totals
    }

    /// Serializes the rows back to CSV with the source headers.
    pub fn to_csv(transactions: &[Transaction]) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for tx in transactions {
            writer.serialize(tx)?;
        }
        let bytes = writer.into_inner()?;
        Ok(String::from_utf8(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
id_transacao,data,funcionario,cargo,descricao,valor,categoria,departamento
TX-001,2024-03-10,Ryan Howard,Temp,Assinatura WUPHF,700.00,Tecnologia,Vendas
TX-002,2024-03-10,Michael Scott,Gerente Regional,Jantar no Chili's,89.50,Refeições,Gerência
TX-003,2024-03-11,Kevin Malone,Contador,Chili em grande quantidade,45.00,Diversos,Contabilidade
";

    #[test]
    fn parses_typed_rows() {
        let ledger = Ledger::from_csv(SAMPLE);
        assert_eq!(ledger.len(), 3);
        assert!(ledger.parse_errors().is_empty());
        let tx = &ledger.transactions()[0];
        assert_eq!(tx.id, "TX-001");
        assert_eq!(tx.date, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(tx.amount, 700.00);
    }

    #[test]
    fn malformed_row_is_skipped_and_reported() {
        let bad = "\
id_transacao,data,funcionario,cargo,descricao,valor,categoria,departamento
TX-001,2024-03-10,Ryan Howard,Temp,Assinatura WUPHF,700.00,Tecnologia,Vendas
TX-002,not-a-date,Michael Scott,Gerente Regional,Jantar,89.50,Refeições,Gerência
TX-003,2024-03-11,Kevin Malone,Contador,Chili,muito,Diversos,Contabilidade
";
        let ledger = Ledger::from_csv(bad);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.parse_errors().len(), 2);
        assert!(ledger.parse_errors()[0].contains("row 3"));
    }

    #[test]
    fn csv_round_trip_preserves_rows() {
        let ledger = Ledger::from_csv(SAMPLE);
        let serialized = Ledger::to_csv(ledger.transactions()).unwrap();
        let reparsed = Ledger::from_csv(&serialized);
        assert_eq!(reparsed.transactions(), ledger.transactions());
    }

    #[test]
    fn employee_search_is_substring_and_case_insensitive() {
        let ledger = Ledger::from_csv(SAMPLE);
        assert_eq!(ledger.search_by_employee("ryan").len(), 1);
        assert_eq!(ledger.search_by_employee("MALONE").len(), 1);
        assert!(ledger.search_by_employee("dwight").is_empty());
    }

    #[test]
    fn value_helpers_filter_by_amount() {
        let ledger = Ledger::from_csv(SAMPLE);
        assert_eq!(ledger.high_value(500.0).len(), 1);
        assert_eq!(ledger.search_by_value_range(40.0, 100.0).len(), 2);
        let totals = ledger.totals_by_employee();
        assert_eq!(totals["Ryan Howard"], 700.00);
    }
}
