use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::info;

use crate::domain::FusedRecord;

/// Dense ranks of the compound risk score (1 = highest) and within-country
/// shares of population and agricultural value.
pub struct Ranker;

impl Ranker {
    pub fn rank(records: &mut [FusedRecord]) {
        let continental = dense_ranks(records.iter().enumerate().map(|(i, r)| (i, r.scores.compound_risk_score)));
        for (i, rank) in continental {
            records[i].ranks.continental_rank = rank;
        }

        let mut by_country: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, record) in records.iter().enumerate() {
            by_country.entry(record.key.country.clone()).or_default().push(i);
        }

        for indices in by_country.values() {
            let national = dense_ranks(indices.iter().map(|&i| (i, records[i].scores.compound_risk_score)));
            for (i, rank) in national {
                records[i].ranks.national_rank = rank;
            }

            let population_total: f64 = indices.iter().filter_map(|&i| records[i].raw.population).sum();
            let value_total: f64 = indices.iter().filter_map(|&i| records[i].raw.agricultural_value).sum();
            for &i in indices {
                let record = &mut records[i];
                record.ranks.population_share = share(record.raw.population, population_total);
                record.ranks.agricultural_value_share = share(record.raw.agricultural_value, value_total);
            }
        }

        info!(records = records.len(), countries = by_country.len(), "Ranked records");
    }
}

fn share(value: Option<f64>, total: f64) -> Option<f64> {
    value.filter(|_| total != 0.0).map(|v| v / total)
}

/// Dense descending rank per index. Null scores get no rank.
fn dense_ranks(scores: impl Iterator<Item = (usize, Option<f64>)>) -> Vec<(usize, Option<u32>)> {
    let mut scored: Vec<(usize, f64)> = Vec::new();
    let mut ranked = Vec::new();
    for (i, score) in scores {
        match score {
            Some(s) => scored.push((i, s)),
            None => ranked.push((i, None)),
        }
    }
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut rank = 0u32;
    let mut previous: Option<f64> = None;
    for (i, s) in scored {
        if previous != Some(s) {
            rank += 1;
            previous = Some(s);
        }
        ranked.push((i, Some(rank)));
    }
    ranked
}
