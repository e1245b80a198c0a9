// src/margin/mod.rs

mod calculator;

pub use calculator::{calculate, round2};

use serde::{Deserialize, Deserializer, Serialize};

/// One recurring payroll deduction (a "consignação") read from the statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// The free-text "rubrica". Sole input to classification.
    pub description: String,
    /// Installment amount per period, in BRL.
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installment_index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

impl LineItem {
    pub fn new(description: impl Into<String>, value: f64) -> Self {
        Self {
            description: description.into(),
            value,
            bank: None,
            contract: None,
            installment_index: None,
            start_date: None,
            end_date: None,
        }
    }

    /// Description as used for matching: trimmed and uppercased.
    pub fn normalized_description(&self) -> String {
        self.description.trim().to_uppercase()
    }
}

/// Who the payslip belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayslipIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servidor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matricula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orgao: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competencia: Option<String>,
}

/// Everything the extraction service gives back for one analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedData {
    #[serde(rename = "baseIR", default, deserialize_with = "null_as_default")]
    pub base_ir: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<LineItem>,
    #[serde(
        rename = "contrachequeData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub identity: Option<PayslipIdentity>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The three margin buckets a deduction can count against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarginCategory {
    Loan,
    CreditCard,
    BenefitCard,
}

impl MarginCategory {
    pub const ALL: [MarginCategory; 3] = [
        MarginCategory::Loan,
        MarginCategory::CreditCard,
        MarginCategory::BenefitCard,
    ];

    /// Substring that must appear in the normalized description.
    pub fn trigger(self) -> &'static str {
        match self {
            MarginCategory::Loan => "EMPREST",
            MarginCategory::CreditCard => "AMORT CARTAO CREDITO",
            MarginCategory::BenefitCard => "AMORT CARTAO BENEFICIO",
        }
    }

    /// Share of the base IR this category may consume.
    pub fn rate(self) -> f64 {
        match self {
            MarginCategory::Loan => 0.35,
            MarginCategory::CreditCard | MarginCategory::BenefitCard => 0.05,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MarginCategory::Loan => "Empréstimo (35%)",
            MarginCategory::CreditCard => "Cartão Crédito (5%)",
            MarginCategory::BenefitCard => "Cartão Benefício (5%)",
        }
    }

    pub fn matches(self, item: &LineItem) -> bool {
        item.normalized_description().contains(self.trigger())
    }
}

/// Margin usage for one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCalculation {
    pub used: f64,
    pub items: Vec<LineItem>,
    pub limit: f64,
    pub available: f64,
    pub is_negative: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationResult {
    #[serde(rename = "baseIR")]
    pub base_ir: f64,
    pub loan: CategoryCalculation,
    pub credit_card: CategoryCalculation,
    pub benefit_card: CategoryCalculation,
    pub raw_items: Vec<LineItem>,
}

impl CalculationResult {
    pub fn category(&self, category: MarginCategory) -> &CategoryCalculation {
        match category {
            MarginCategory::Loan => &self.loan,
            MarginCategory::CreditCard => &self.credit_card,
            MarginCategory::BenefitCard => &self.benefit_card,
        }
    }

    /// All categories in display order.
    pub fn categories(&self) -> impl Iterator<Item = (MarginCategory, &CategoryCalculation)> {
        MarginCategory::ALL.into_iter().map(|c| (c, self.category(c)))
    }

    pub fn negatives(&self) -> impl Iterator<Item = (MarginCategory, &CategoryCalculation)> {
        self.categories().filter(|(_, calc)| calc.is_negative)
    }

    pub fn has_negative_margin(&self) -> bool {
        self.negatives().next().is_some()
    }
}
