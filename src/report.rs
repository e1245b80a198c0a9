// src/report.rs

use crate::margin::{CalculationResult, CategoryCalculation, LineItem};
use crate::session::AnalysisRecord;
use regex::Regex;
use std::sync::LazyLock;
use time::format_description::well_known::Rfc3339;

static INSTALLMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{1,3})\s*/\s*(\d{1,3})\s*$").expect("static regex"));

/// Format as Brazilian reais: `R$ 1.234,56`, `-R$ 10,00`.
pub fn format_brl(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let negative = value < 0.0 && cents > 0;

    let units = (cents / 100).to_string();
    let mut grouped = String::with_capacity(units.len() + units.len() / 3);
    for (i, ch) in units.chars().enumerate() {
        if i > 0 && (units.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("{}R$ {},{:02}", if negative { "-" } else { "" }, grouped, cents % 100)
}

/// Share of the limit already used, clamped to 0..=100.
pub fn usage_percent(calc: &CategoryCalculation) -> f64 {
    if calc.limit <= 0.0 {
        return if calc.used > 0.0 { 100.0 } else { 0.0 };
    }
    (calc.used / calc.limit * 100.0).clamp(0.0, 100.0)
}

/// Contract type shown in the ledger. First match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    Loan,
    CreditCard,
    BenefitCard,
    Other,
}

impl LedgerKind {
    pub fn classify(item: &LineItem) -> Self {
        let desc = item.description.to_uppercase();
        if desc.contains("EMPREST") {
            LedgerKind::Loan
        } else if desc.contains("CARTAO CREDITO") {
            LedgerKind::CreditCard
        } else if desc.contains("CARTAO BENEFICIO") {
            LedgerKind::BenefitCard
        } else {
            LedgerKind::Other
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LedgerKind::Loan => "Empréstimo",
            LedgerKind::CreditCard => "Cartão Crédito",
            LedgerKind::BenefitCard => "Cartão Benefício",
            LedgerKind::Other => "Outros",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Installment {
    pub current: u32,
    pub total: u32,
}

impl Installment {
    pub fn parse(s: &str) -> Option<Self> {
        let caps = INSTALLMENT_RE.captures(s)?;
        let current = caps[1].parse().ok()?;
        let total = caps[2].parse().ok()?;
        (current <= total).then_some(Self { current, total })
    }

    pub fn remaining(self) -> u32 {
        self.total - self.current
    }
}

/// Ledger rows, highest installment first. Ties keep extraction order.
pub fn ledger_rows(result: &CalculationResult) -> Vec<&LineItem> {
    let mut rows: Vec<&LineItem> = result.raw_items.iter().collect();
    rows.sort_by(|a, b| b.value.total_cmp(&a.value));
    rows
}

pub fn render_dashboard(record: &AnalysisRecord) -> String {
    let result = &record.result;
    let identity = record.data.identity.clone().unwrap_or_default();
    let or_dash = |field: &Option<String>| field.clone().unwrap_or_else(|| "--".to_string());

    let mut lines = vec![
        "== Dados extraídos SIAPE ==".to_string(),
        identity
            .servidor
            .as_deref()
            .unwrap_or("Servidor identificado")
            .to_uppercase(),
        format!(
            "Matrícula: {}   Órgão: {}",
            or_dash(&identity.matricula),
            or_dash(&identity.orgao)
        ),
        format!("Renda base IR: {}", format_brl(result.base_ir)),
        format!("Competência: {}", or_dash(&identity.competencia)),
    ];
    lines.extend(record.documents.iter().map(|doc| {
        let short = &doc.fingerprint[..12.min(doc.fingerprint.len())];
        format!("Documento: {} (sha256 {short})", doc.name)
    }));
    if let Ok(ts) = record.analyzed_at.format(&Rfc3339) {
        lines.push(format!("Analisado em: {ts}"));
    }

    for (category, calc) in result.categories() {
        let status = if calc.is_negative { "  [MARGEM NEGATIVA]" } else { "" };
        lines.push(String::new());
        lines.push(format!("-- {}{status} --", category.label()));
        lines.push(format!("  Margem disponível: {}", format_brl(calc.available)));
        lines.push(format!("  Total permitido:   {}", format_brl(calc.limit)));
        lines.push(format!("  Utilizado:         {}", format_brl(calc.used)));
        lines.push(format!(
            "  Uso: {:>5.1}% ({} contrato(s))",
            usage_percent(calc),
            calc.items.len()
        ));
        if calc.is_negative {
            lines.push(format!(
                "  O cliente estourou o limite em {}.",
                format_brl(calc.available.abs())
            ));
        }
    }

    block(lines)
}

/// Alert block listing overdrawn categories, if any.
pub fn render_negative_alert(result: &CalculationResult) -> Option<String> {
    if !result.has_negative_margin() {
        return None;
    }

    let mut lines = vec![
        "!! ALERTA CRÍTICO: MARGEM NEGATIVA !!".to_string(),
        format!(
            "Comprometimento acima do limite legal para a renda de {}.",
            format_brl(result.base_ir)
        ),
    ];
    lines.extend(result.negatives().map(|(category, calc)| {
        format!(
            "  {}: {} (limite {}, utilizado {})",
            category.label(),
            format_brl(calc.available),
            format_brl(calc.limit),
            format_brl(calc.used)
        )
    }));
    Some(block(lines))
}

pub fn render_ledger(result: &CalculationResult) -> String {
    let rows = ledger_rows(result);
    let mut lines = vec![format!(
        "== Histórico consolidado de crédito ({} contratos ativos) ==",
        rows.len()
    )];
    if rows.is_empty() {
        lines.push("Nenhum contrato identificado nos documentos.".to_string());
        return block(lines);
    }

    lines.push(format!(
        "{:<20} {:<16} {:<18} {:<16} {:>14}",
        "Banco", "Contrato", "Tipo", "Parcela", "Valor"
    ));
    for item in rows {
        let installment = match item.installment_index.as_deref() {
            Some(idx) => match Installment::parse(idx) {
                Some(parsed) => format!("{idx} (faltam {})", parsed.remaining()),
                None => idx.to_string(),
            },
            None => "N/A".to_string(),
        };
        lines.push(format!(
            "{:<20} {:<16} {:<18} {:<16} {:>14}",
            item.bank.as_deref().unwrap_or("Banco"),
            item.contract.as_deref().unwrap_or("S/ Nº"),
            LedgerKind::classify(item).label(),
            installment,
            format_brl(item.value)
        ));
        lines.push(format!(
            "    {}  {} até {}",
            item.description.split('-').next().unwrap_or_default().trim(),
            item.start_date.as_deref().unwrap_or(""),
            item.end_date.as_deref().unwrap_or("")
        ));
    }

    block(lines)
}

/// Join report lines, newline-terminated.
fn block(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub fn render_json(result: &CalculationResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::margin::{ExtractedData, PayslipIdentity, calculate};
    use crate::session::DocumentRef;
    use time::OffsetDateTime;

    fn sample() -> ExtractedData {
        let mut loan = LineItem::new("34228 - EMPREST BCO PRIVADOS - PAN", 200.0);
        loan.bank = Some("PAN".to_string());
        loan.contract = Some("123456".to_string());
        loan.installment_index = Some("44/96".to_string());
        loan.start_date = Some("01/2022".to_string());
        loan.end_date = Some("12/2029".to_string());
        ExtractedData {
            base_ir: 1000.0,
            items: vec![
                LineItem::new("AMORT CARTAO CREDITO XYZ", 60.0),
                loan,
                LineItem::new("CONTRIB SINDICAL", 15.0),
            ],
            identity: Some(PayslipIdentity {
                servidor: Some("Maria da Silva".to_string()),
                matricula: Some("1160815".to_string()),
                orgao: None,
                competencia: Some("03/2025".to_string()),
            }),
        }
    }

    #[test]
    fn test_format_brl() {
        assert_eq!(format_brl(0.0), "R$ 0,00");
        assert_eq!(format_brl(-0.001), "R$ 0,00");
        assert_eq!(format_brl(1234.56), "R$ 1.234,56");
        assert_eq!(format_brl(1234567.8), "R$ 1.234.567,80");
        assert_eq!(format_brl(-10.0), "-R$ 10,00");
        assert_eq!(format_brl(999.999), "R$ 1.000,00");
    }

    #[test]
    fn test_usage_percent_is_clamped() {
        let result = calculate(&sample());
        assert_eq!(usage_percent(&result.credit_card), 100.0);
        assert!((usage_percent(&result.loan) - 57.142857).abs() < 1e-4);
        assert_eq!(usage_percent(&result.benefit_card), 0.0);

        let empty = calculate(&ExtractedData::default());
        assert_eq!(usage_percent(&empty.loan), 0.0);
    }

    #[test]
    fn test_ledger_kind_first_match_wins() {
        assert_eq!(LedgerKind::classify(&LineItem::new("emprest cartao credito", 1.0)), LedgerKind::Loan);
        assert_eq!(LedgerKind::classify(&LineItem::new("CARTAO CREDITO", 1.0)), LedgerKind::CreditCard);
        assert_eq!(LedgerKind::classify(&LineItem::new("CARTAO BENEFICIO", 1.0)), LedgerKind::BenefitCard);
        assert_eq!(LedgerKind::classify(&LineItem::new("PLANO SAUDE", 1.0)), LedgerKind::Other);
    }

    #[test]
    fn test_installment_parse() {
        let parsed = Installment::parse("44/96").unwrap();
        assert_eq!(parsed.remaining(), 52);
        assert_eq!(Installment::parse(" 5 / 60 ").unwrap().current, 5);
        assert_eq!(Installment::parse("97/96"), None);
        assert_eq!(Installment::parse("05/2025 a 12/2029"), None);
    }

    #[test]
    fn test_ledger_sorted_by_value_desc() {
        let result = calculate(&sample());
        let values: Vec<f64> = ledger_rows(&result).iter().map(|i| i.value).collect();
        assert_eq!(values, vec![200.0, 60.0, 15.0]);
    }

    #[test]
    fn test_render_ledger_defaults_and_details() {
        let text = render_ledger(&calculate(&sample()));
        assert!(text.contains("3 contratos ativos"));
        assert!(text.contains("44/96 (faltam 52)"));
        assert!(text.contains("S/ Nº"));
        assert!(text.contains("Outros"));
        assert!(text.contains("01/2022 até 12/2029"));
        assert!(text.contains("34228"));
    }

    #[test]
    fn test_render_empty_ledger() {
        let text = render_ledger(&calculate(&ExtractedData::default()));
        assert!(text.contains("Nenhum contrato identificado"));
    }

    #[test]
    fn test_negative_alert_lists_only_negatives() {
        let result = calculate(&sample());
        let alert = render_negative_alert(&result).unwrap();
        assert!(alert.contains("Cartão Crédito (5%): -R$ 10,00"));
        assert!(!alert.contains("Empréstimo"));

        let clean = calculate(&ExtractedData::default());
        assert!(render_negative_alert(&clean).is_none());
    }

    #[test]
    fn test_render_dashboard() {
        let data = sample();
        let record = AnalysisRecord {
            result: calculate(&data),
            data,
            documents: vec![DocumentRef {
                name: "contracheque.pdf".to_string(),
                fingerprint: "ab".repeat(32),
            }],
            analyzed_at: OffsetDateTime::UNIX_EPOCH,
        };
        let text = render_dashboard(&record);
        assert!(text.contains("MARIA DA SILVA"));
        assert!(text.contains("Renda base IR: R$ 1.000,00"));
        assert!(text.contains("Órgão: --"));
        assert!(text.contains("sha256 abababababab"));
        assert!(text.contains("O cliente estourou o limite em R$ 10,00."));
        assert!(text.contains("Margem disponível: R$ 150,00"));
    }

    #[test]
    fn test_blocks_end_with_one_newline() {
        let result = calculate(&sample());
        let alert = render_negative_alert(&result).unwrap();
        assert!(alert.starts_with("!! ALERTA CRÍTICO"));
        assert!(alert.ends_with("utilizado R$ 60,00)\n"));
        assert_eq!(alert.lines().count(), 3);

        let empty = render_ledger(&calculate(&ExtractedData::default()));
        assert_eq!(
            empty,
            "== Histórico consolidado de crédito (0 contratos ativos) ==\nNenhum contrato identificado nos documentos.\n"
        );
    }

    #[test]
    fn test_json_uses_camel_case() {
        let json = render_json(&calculate(&sample())).unwrap();
        assert!(json.contains("\"baseIR\""));
        assert!(json.contains("\"creditCard\""));
        assert!(json.contains("\"isNegative\": true"));
        assert!(json.contains("\"rawItems\""));
    }
}
