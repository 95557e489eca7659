//! Ideal-customer-profile synthesis from won deals.

use std::collections::HashMap;

use chrono::DateTime;
use serde_json::json;

use super::sample_confidence;
use crate::db::{DbDeal, InsightDraft};
use crate::types::{DealStatus, InsightPriority, InsightType};

pub const ICP_KEY: &str = "icp.profile";

/// Most common value and its share of the samples that have one.
fn mode<'a>(values: impl Iterator<Item = &'a str>) -> Option<(String, f64)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut total = 0;
    for value in values {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        *counts.entry(value).or_default() += 1;
        total += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(value, count)| (value.to_string(), count as f64 / total as f64))
}

fn cycle_days(deal: &DbDeal) -> Option<f64> {
    let created = DateTime::parse_from_rfc3339(&deal.created_at).ok()?;
    let closed = DateTime::parse_from_rfc3339(deal.closed_at.as_deref()?).ok()?;
    let seconds = (closed - created).num_seconds();
    (seconds >= 0).then(|| seconds as f64 / 86_400.0)
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Profile of the deals that were won. `None` below three wins.
pub fn synthesize(closed: &[DbDeal]) -> Option<InsightDraft> {
    let won: Vec<&DbDeal> = closed.iter().filter(|d| d.status == DealStatus::Won).collect();
    let n = won.len();
    let confidence = sample_confidence(n)?;

    let industry = mode(won.iter().filter_map(|d| d.industry.as_deref()));
    let employees = mode(won.iter().filter_map(|d| d.employee_range.as_deref()));
    let values: Vec<f64> = won.iter().filter_map(|d| d.value_amount).collect();
    let cycles: Vec<f64> = won.iter().filter_map(|d| cycle_days(d)).collect();
    let average_value = mean(&values);
    let average_cycle = mean(&cycles);

    let mut traits = Vec::new();
    if let Some((industry, share)) = &industry {
        traits.push(format!("{} ({:.0}% of wins)", industry, share * 100.0));
    }
    if let Some((range, share)) = &employees {
        traits.push(format!("{} employees ({:.0}%)", range, share * 100.0));
    }
    if let Some(value) = average_value {
        traits.push(format!("average value {:.0}", value));
    }
    if let Some(days) = average_cycle {
        traits.push(format!("{:.0}-day sales cycle", days));
    }
    let hypothesis = if traits.is_empty() {
        format!("{} won deals so far, without enough firmographic detail to profile them.", n)
    } else {
        format!("Won deals tend to be {}.", traits.join(", "))
    };

    Some(InsightDraft {
        insight_type: InsightType::Icp,
        insight_key: ICP_KEY.to_string(),
        title: "Ideal customer profile".to_string(),
        hypothesis,
        confidence,
        evidence: json!({
            "topIndustry": industry.as_ref().map(|(v, _)| v),
            "industryShare": industry.as_ref().map(|(_, s)| s),
            "topEmployeeRange": employees.as_ref().map(|(v, _)| v),
            "employeeRangeShare": employees.as_ref().map(|(_, s)| s),
            "averageValue": average_value,
            "averageCycleDays": average_cycle,
            "wonDeals": n,
            "closedDeals": closed.len(),
        }),
        sample_size: n as i64,
        priority: InsightPriority::Normal,
    })
}
