use std::collections::{BTreeMap, BTreeSet};

use harness_api::{GapReport, ObservationRecord, ProducerSpec, VerificationResult};

// ═══════════════════════════════════════════════════════════════
//  OrderingVerifier
// ═══════════════════════════════════════════════════════════════

/// Стабильное разбиение лога по группам: внутри группы записи остаются
/// в порядке получения, пересортировки нет.
pub fn partition(records: &[ObservationRecord]) -> BTreeMap<&str, Vec<&ObservationRecord>> {
    let mut groups: BTreeMap<&str, Vec<&ObservationRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.group_id.as_str()).or_default().push(record);
    }
    groups
}

/// Проверить, что внутри каждой группы sequence_id строго возрастает
/// в порядке получения.
///
/// Чистая функция: пустой лог → пустой результат, группа из одной
/// записи → ok. Повтор sequence_id (например, redelivery) тоже нарушение.
pub fn verify(records: &[ObservationRecord]) -> BTreeMap<String, VerificationResult> {
    partition(records)
        .into_iter()
        .map(|(group, observed)| {
            let first_violation_index = observed
                .windows(2)
                .find(|pair| pair[1].sequence_id <= pair[0].sequence_id)
                .map(|pair| pair[1].arrival_index);

            let result = VerificationResult {
                group_id: group.to_string(),
                ok: first_violation_index.is_none(),
                first_violation_index,
                observed: observed.len(),
            };
            (group.to_string(), result)
        })
        .collect()
}

/// Пропуски: sequence_id из диапазона producer'а, которых нет в логе.
///
/// В результат попадают только группы, где чего-то не хватает.
pub fn find_gaps(records: &[ObservationRecord], producers: &[ProducerSpec]) -> BTreeMap<String, GapReport> {
    let groups = partition(records);
    let mut gaps = BTreeMap::new();

    for spec in producers {
        let seen: BTreeSet<u64> = groups
            .get(spec.message_group.as_str())
            .map(|observed| {
                observed
                    .iter()
                    .map(|r| r.sequence_id)
                    .filter(|seq| (spec.start_sequence..spec.end_sequence()).contains(seq))
                    .collect()
            })
            .unwrap_or_default();

        let missing: Vec<u64> = (spec.start_sequence..spec.end_sequence())
            .filter(|seq| !seen.contains(seq))
            .collect();
        if missing.is_empty() {
            continue;
        }

        gaps.insert(
            spec.message_group.clone(),
            GapReport {
                group_id: spec.message_group.clone(),
                expected: spec.message_count,
                received_distinct: seen.len() as u64,
                missing,
            },
        );
    }
    gaps
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    /// Лог из пар (группа, sequence) в порядке получения.
    fn log(entries: &[(&str, u64)]) -> Vec<ObservationRecord> {
        entries
            .iter()
            .enumerate()
            .map(|(i, (group, seq))| ObservationRecord {
                group_id: group.to_string(),
                sequence_id: *seq,
                arrival_index: i as u64,
                payload_id: format!("{group}-{seq}"),
                redelivered: false,
            })
            .collect()
    }

    fn producer(group: &str, start: u64, count: u64) -> ProducerSpec {
        ProducerSpec {
            producer_id: format!("producer-{group}"),
            message_group: group.to_string(),
            message_count: count,
            start_sequence: start,
            id_prefix: format!("{group}-"),
            start_delay: Duration::ZERO,
        }
    }

    #[test]
    fn empty_log_yields_empty_mapping() {
        assert!(verify(&[]).is_empty());
    }

    #[test]
    fn single_record_group_is_ok() {
        let results = verify(&log(&[("A", 42)]));
        assert!(results["A"].ok);
        assert_eq!(results["A"].first_violation_index, None);
        assert_eq!(results["A"].observed, 1);
    }

    #[test]
    fn in_order_sequence_passes() {
        let results = verify(&log(&[("A", 0), ("A", 1), ("A", 2), ("A", 3), ("A", 4)]));
        assert!(results["A"].ok);
    }

    #[test]
    fn swapped_pair_reports_position_of_late_message() {
        let results = verify(&log(&[("A", 0), ("A", 2), ("A", 1), ("A", 3), ("A", 4)]));
        assert!(!results["A"].ok);
        assert_eq!(results["A"].first_violation_index, Some(2));
    }

    #[test]
    fn repeated_sequence_is_a_violation() {
        let results = verify(&log(&[("A", 0), ("A", 1), ("A", 1), ("A", 2)]));
        assert!(!results["A"].ok);
        assert_eq!(results["A"].first_violation_index, Some(2));
    }

    #[test]
    fn cross_group_interleaving_is_ignored() {
        let results = verify(&log(&[
            ("B", 15000),
            ("A", 10000),
            ("C", 20000),
            ("A", 10001),
            ("B", 15001),
            ("C", 20001),
        ]));
        assert_eq!(results.len(), 3);
        assert!(results.values().all(|r| r.ok && r.observed == 2));
    }

    #[test]
    fn violation_index_is_global_arrival_index() {
        let results = verify(&log(&[("A", 1), ("B", 5), ("B", 6), ("A", 0)]));
        assert!(results["B"].ok);
        assert_eq!(results["A"].first_violation_index, Some(3));
    }

    #[test]
    fn only_first_violation_is_reported() {
        let results = verify(&log(&[("A", 3), ("A", 2), ("A", 1)]));
        assert_eq!(results["A"].first_violation_index, Some(1));
    }

    #[test]
    fn verification_is_idempotent() {
        let records = log(&[("A", 0), ("B", 7), ("A", 2), ("A", 1), ("B", 8)]);
        assert_eq!(verify(&records), verify(&records));
    }

    #[test]
    fn gaps_are_reported_separately_from_order() {
        let records = log(&[("A", 10), ("A", 11), ("A", 13), ("B", 20), ("B", 21)]);
        let producers = [producer("A", 10, 4), producer("B", 20, 2)];

        let results = verify(&records);
        assert!(results["A"].ok);

        let gaps = find_gaps(&records, &producers);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps["A"].missing, vec![12]);
        assert_eq!(gaps["A"].received_distinct, 3);
        assert_eq!(gaps["A"].expected, 4);
    }

    #[test]
    fn group_never_seen_is_fully_missing() {
        let gaps = find_gaps(&[], &[producer("C", 0, 3)]);
        assert_eq!(gaps["C"].missing, vec![0, 1, 2]);
        assert_eq!(gaps["C"].received_distinct, 0);
    }
}
