use super::{CalculationResult, CategoryCalculation, ExtractedData, LineItem, MarginCategory};
use rust_decimal::prelude::*;

/// Tolerance below zero before a margin counts as overdrawn.
const NEGATIVE_TOLERANCE: f64 = -0.01;

/// Round to cents, half away from zero, on the exact binary value of `value`.
///
/// Scaling by 100 first would move values such as `150.004999…` onto the
/// midpoint and round them up, so the cents are decided in decimal instead.
pub fn round2(value: f64) -> f64 {
    Decimal::from_f64_retain(value)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_string().parse().ok())
        .unwrap_or(value)
}

/// Derive the three margin buckets from an extraction.
///
/// Each category filters the full item list on its own, so an item whose
/// description carries more than one trigger counts in every matching
/// bucket. `limit` is rounded before `available` is derived from it and
/// `used` is never rounded.
pub fn calculate(data: &ExtractedData) -> CalculationResult {
    CalculationResult {
        base_ir: data.base_ir,
        loan: calculate_category(MarginCategory::Loan, data.base_ir, &data.items),
        credit_card: calculate_category(MarginCategory::CreditCard, data.base_ir, &data.items),
        benefit_card: calculate_category(MarginCategory::BenefitCard, data.base_ir, &data.items),
        raw_items: data.items.clone(),
    }
}

fn calculate_category(category: MarginCategory, base_ir: f64, items: &[LineItem]) -> CategoryCalculation {
    let matching: Vec<LineItem> = items
        .iter()
        .filter(|item| category.matches(item))
        .cloned()
        .collect();

    let used: f64 = matching.iter().map(|item| item.value).sum();
    let limit = round2(base_ir * category.rate());
    let available = round2(limit - used);

    CategoryCalculation {
        used,
        items: matching,
        limit,
        available,
        is_negative: available < NEGATIVE_TOLERANCE,
    }
}
