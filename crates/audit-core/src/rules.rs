//! Deterministic compliance rules over ledger transactions.
//!
//! Per-record checks run in a fixed order and are a pure function of the
//! transaction plus the static tables below; smurfing detection is the only
//! cross-record rule.

use crate::corpus::Transaction;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Category A floor: anything above this needs an approved purchase order.
pub const APPROVAL_LIMIT: f64 = 500.00;
/// Category C ceiling: employee autonomy band.
pub const AUTONOMY_LIMIT: f64 = 50.00;
/// The catch-all category stops being acceptable above this amount.
pub const MISC_CATEGORY_FLOOR: f64 = 5.00;
/// Default same-day aggregate that triggers smurfing detection.
pub const SMURFING_THRESHOLD: f64 = 500.00;

/// Conflict-of-interest section; keyword hits here are elevated.
const CONFLICT_RULE_REF: &str = "Seção 3.3";

// Keyword denylist (Seção 3). Keywords are matched case-insensitively as
// substrings of the transaction description, in corpus language.
const BANNED_ITEMS: &[(&str, &str, &str)] = &[
    ("mágica", "Seção 3.1", "Magic/entertainment kit is not a business expense"),
    ("magica", "Seção 3.1", "Magic/entertainment kit is not a business expense"),
    ("algemas", "Seção 3.1", "Entertainment equipment is prohibited"),
    ("houdini", "Seção 3.1", "Entertainment equipment is prohibited"),
    ("karaokê", "Seção 3.1", "Entertainment equipment is prohibited"),
    ("karaoke", "Seção 3.1", "Entertainment equipment is prohibited"),
    ("helicóptero", "Seção 3.1", "Toys are not a valid expense"),
    ("brinquedo", "Seção 3.1", "Toys are not a valid expense"),
    ("arma", "Seção 3.2", "Weaponry is prohibited"),
    ("airsoft", "Seção 3.2", "Weaponry is prohibited"),
    ("ninja", "Seção 3.2", "Weaponry is prohibited"),
    ("nunchaku", "Seção 3.2", "Weaponry is prohibited"),
    ("armadilha", "Seção 3.2", "Traps are prohibited"),
    ("vigilância", "Seção 3.2", "Unauthorized surveillance equipment"),
    ("binóculo", "Seção 3.2", "Surveillance equipment"),
    ("visão noturna", "Seção 3.2", "Tactical equipment is prohibited"),
    ("wuphf", "Seção 3.3", "Investment in a personal side business"),
    ("startup", "Seção 3.3", "Investment in a personal startup"),
    ("vela", "Seção 3.3", "Spouse/relative product, conflict of interest"),
    ("serenity", "Seção 3.3", "Spouse product, Serenity by Jan"),
    ("beterraba", "Seção 3.3", "Agrotourism/farm produce is prohibited"),
];

// Venue denylist for meals (Seção 2.1).
const BANNED_VENUES: &[&str] = &["hooters"];

// Vendors with known problems (Seção 3.3).
const SUSPECT_VENDORS: &[(&str, &str)] = &[
    ("wcs supplies", "Unregistered vendor, possible fraud front"),
    ("tech solutions", "Possible front for personal expenses"),
    ("a. sparkles", "Personal veterinary expense"),
    ("sprinkles", "Personal veterinary expense"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    LimitExceeded,
    BannedItem,
    BannedVenue,
    SuspectVendor,
    CategoryMisuse,
    Smurfing,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::LimitExceeded => "limit_exceeded",
            ViolationKind::BannedItem => "banned_item",
            ViolationKind::BannedVenue => "banned_venue",
            ViolationKind::SuspectVendor => "suspect_vendor",
            ViolationKind::CategoryMisuse => "category_misuse",
            ViolationKind::Smurfing => "smurfing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceViolation {
    pub kind: ViolationKind,
    /// Policy section the violation cites, e.g. `Seção 3.1`.
    pub rule_ref: String,
    pub description: String,
    pub severity: Severity,
}

/// Stateless rule engine; construct once and share.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluates every per-record rule against one transaction, in fixed
    /// order. Same input always yields the same violation list.
    pub fn evaluate(&self, tx: &Transaction) -> Vec<ComplianceViolation> {
        let mut violations = Vec::new();
        self.check_value_limit(tx, &mut violations);
        self.check_banned_items(tx, &mut violations);
        self.check_banned_venues(tx, &mut violations);
        self.check_suspect_vendors(tx, &mut violations);
        self.check_category_misuse(tx, &mut violations);
        violations
    }

    fn check_value_limit(&self, tx: &Transaction, out: &mut Vec<ComplianceViolation>) {
        let is_manager = tx.role.to_lowercase().contains("gerente");

        if tx.amount > APPROVAL_LIMIT {
            if !is_manager {
                out.push(ComplianceViolation {
                    kind: ViolationKind::LimitExceeded,
                    rule_ref: "Seção 1.3".to_string(),
                    description: format!(
                        "Amount ${:.2} exceeds the ${:.2} limit and requires an approved purchase order",
                        tx.amount, APPROVAL_LIMIT
                    ),
                    severity: Severity::High,
                });
            }
        } else if tx.amount > AUTONOMY_LIMIT {
            // Category B needs manager approval, which this data cannot
            // confirm either way. Intentionally not flagged.
        }
    }

    fn check_banned_items(&self, tx: &Transaction, out: &mut Vec<ComplianceViolation>) {
        let description = tx.description.to_lowercase();
        for (keyword, rule_ref, reason) in BANNED_ITEMS {
            if description.contains(keyword) {
                let severity = if *rule_ref == CONFLICT_RULE_REF {
                    Severity::High
                } else {
                    Severity::Medium
                };
                out.push(ComplianceViolation {
                    kind: ViolationKind::BannedItem,
                    rule_ref: (*rule_ref).to_string(),
                    description: format!("{reason}. Description: '{}'", tx.description),
                    severity,
                });
            }
        }
    }

    fn check_banned_venues(&self, tx: &Transaction, out: &mut Vec<ComplianceViolation>) {
        let description = tx.description.to_lowercase();
        for venue in BANNED_VENUES {
            if description.contains(venue) {
                out.push(ComplianceViolation {
                    kind: ViolationKind::BannedVenue,
                    rule_ref: "Seção 2.1".to_string(),
                    description: format!("Venue '{venue}' is on the banned list"),
                    severity: Severity::Medium,
                });
            }
        }
    }

    fn check_suspect_vendors(&self, tx: &Transaction, out: &mut Vec<ComplianceViolation>) {
        let description = tx.description.to_lowercase();
        for (vendor, reason) in SUSPECT_VENDORS {
            if description.contains(vendor) {
                out.push(ComplianceViolation {
                    kind: ViolationKind::SuspectVendor,
                    rule_ref: "Seção 3.3".to_string(),
                    description: format!("{reason}. Vendor: '{vendor}'"),
                    severity: Severity::High,
                });
            }
        }
    }

    fn check_category_misuse(&self, tx: &Transaction, out: &mut Vec<ComplianceViolation>) {
        if tx.category.to_lowercase() == "diversos" && tx.amount > MISC_CATEGORY_FLOOR {
            out.push(ComplianceViolation {
                kind: ViolationKind::CategoryMisuse,
                rule_ref: "Seção 2".to_string(),
                description: format!(
                    "Category 'Diversos' is not acceptable above ${MISC_CATEGORY_FLOOR:.2}; amount: ${:.2}",
                    tx.amount
                ),
                severity: Severity::Low,
            });
        }
    }

    /// Cross-record check: multiple same-day transactions by one employee
    /// whose sum crosses `threshold` all receive a critical smurfing
    /// violation citing the group total and size.
    ///
    /// Returns `(transaction id, violation)` pairs in input order; the
    /// caller's slice is never reordered or deduplicated.
    pub fn detect_smurfing(
        &self,
        transactions: &[Transaction],
        employee: &str,
        date: NaiveDate,
        threshold: f64,
    ) -> Vec<(String, ComplianceViolation)> {
        let needle = employee.to_lowercase();
        let group: Vec<&Transaction> = transactions
            .iter()
            .filter(|t| t.employee.to_lowercase().contains(&needle) && t.date == date)
            .collect();

        if group.len() <= 1 {
            return Vec::new();
        }

        let total: f64 = group.iter().map(|t| t.amount).sum();
        if total <= threshold {
            return Vec::new();
        }

        group
            .iter()
            .map(|t| {
                (
                    t.id.clone(),
                    ComplianceViolation {
                        kind: ViolationKind::Smurfing,
                        rule_ref: "Seção 1.3".to_string(),
                        description: format!(
                            "Possible transaction splitting: {} transactions on {} totaling ${total:.2}",
                            group.len(),
                            date
                        ),
                        severity: Severity::Critical,
                    },
                )
            })
            .collect()
    }
}
