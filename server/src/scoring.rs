//! Round scoring: defense submissions versus committed attacks
//!
//! The scorer runs once per round over three inputs: the committed attack
//! list, the accumulated defense submissions, and the player roster. It is
//! pure; applying the deltas to the registry is the round engine's job.
//!
//! A correct identification defuses that source address: the first hit from
//! it is defended for free. Additional hits from the same address still
//! land, so a one-entry defense never neutralises a whole burst.

use crate::attack::CommittedAttack;
use shared::{score_weights, HP_DAMAGE_PER_ATTACK};
use std::collections::{HashMap, HashSet};

/// Per-player outcome of one round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub score_delta: i32,
    pub hp_delta: i32,
    pub correct_count: usize,
    pub wrong_count: usize,
    pub missed_count: usize,
    /// True when nothing was wrong and nothing slipped through; carried as
    /// the `correct` flag of the SCORE message
    pub all_clear: bool,
    pub reason: String,
}

/// Scores every player for one round.
///
/// For each player: `correct` is the set of submitted addresses that really
/// attacked them (counted once per address), `wrong` is everything submitted
/// that did not (decoy victims land here), and `missed_count` counts hits
/// that slipped through: all hits from unsubmitted addresses, plus every
/// hit after the first from submitted ones.
pub fn score_round(
    player_ids: &[String],
    committed: &[CommittedAttack],
    submissions: &HashMap<String, HashSet<String>>,
    round: u32,
) -> HashMap<String, RoundOutcome> {
    let (correct_pts, wrong_pts, missed_pts) = score_weights(round);
    let empty = HashSet::new();

    let mut outcomes = HashMap::new();
    for player_id in player_ids {
        // Multiset of attacker addresses that actually hit this player
        let mut hits: HashMap<&str, usize> = HashMap::new();
        for attack in committed.iter().filter(|a| &a.target_id == player_id) {
            *hits.entry(attack.attacker_ip.as_str()).or_insert(0) += 1;
        }

        let submitted = submissions.get(player_id).unwrap_or(&empty);

        let correct_count = hits.keys().filter(|ip| submitted.contains(**ip)).count();
        let wrong_count = submitted
            .iter()
            .filter(|ip| !hits.contains_key(ip.as_str()))
            .count();
        let missed_count: usize = hits
            .iter()
            .map(|(ip, &multiplicity)| {
                if submitted.contains(*ip) {
                    multiplicity - 1
                } else {
                    multiplicity
                }
            })
            .sum();

        let score_delta = correct_count as i32 * correct_pts
            + wrong_count as i32 * wrong_pts
            + missed_count as i32 * missed_pts;
        let hp_delta = -(missed_count as i32) * HP_DAMAGE_PER_ATTACK;

        let mut reason_parts = Vec::new();
        if correct_count > 0 {
            reason_parts.push(format!(
                "correct: {} (+{})",
                correct_count,
                correct_count as i32 * correct_pts
            ));
        }
        if wrong_count > 0 {
            reason_parts.push(format!(
                "wrong: {} ({})",
                wrong_count,
                wrong_count as i32 * wrong_pts
            ));
        }
        if missed_count > 0 {
            reason_parts.push(format!(
                "missed: {} ({} pts, {} HP)",
                missed_count,
                missed_count as i32 * missed_pts,
                hp_delta
            ));
        }
        let reason = if reason_parts.is_empty() {
            "no attacks received".to_string()
        } else {
            reason_parts.join(", ")
        };

        outcomes.insert(
            player_id.clone(),
            RoundOutcome {
                score_delta,
                hp_delta,
                correct_count,
                wrong_count,
                missed_count,
                all_clear: wrong_count == 0 && missed_count == 0,
                reason,
            },
        );
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attack(attacker_id: &str, target_id: &str, attacker_ip: &str) -> CommittedAttack {
        CommittedAttack {
            attacker_id: attacker_id.to_string(),
            target_id: target_id.to_string(),
            attacker_ip: attacker_ip.to_string(),
            timestamp: 0.0,
        }
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn submit(player_id: &str, ips: &[&str]) -> HashMap<String, HashSet<String>> {
        let mut map = HashMap::new();
        map.insert(
            player_id.to_string(),
            ips.iter().map(|s| s.to_string()).collect(),
        );
        map
    }

    #[test]
    fn test_single_attack_correctly_identified() {
        let committed = vec![attack("A", "B", "10.0.0.1")];
        let submissions = submit("B", &["10.0.0.1"]);
        let outcomes = score_round(&ids(&["A", "B"]), &committed, &submissions, 1);

        let b = &outcomes["B"];
        assert_eq!(b.score_delta, 10);
        assert_eq!(b.hp_delta, 0);
        assert!(b.all_clear);

        // The attacker's own defense round is untouched by attacking
        let a = &outcomes["A"];
        assert_eq!(a.score_delta, 0);
        assert_eq!(a.reason, "no attacks received");
        assert!(a.all_clear);
    }

    #[test]
    fn test_missed_attack_damages_hp() {
        let committed = vec![attack("A", "B", "10.0.0.1")];
        let submissions = HashMap::new();
        let outcomes = score_round(&ids(&["B"]), &committed, &submissions, 1);

        let b = &outcomes["B"];
        assert_eq!(b.missed_count, 1);
        assert_eq!(b.score_delta, -3);
        assert_eq!(b.hp_delta, -10);
        assert!(!b.all_clear);
    }

    #[test]
    fn test_decoy_victim_pays_wrong_penalty() {
        // Round 5: B blames C's address, but no real attack occurred
        let committed = vec![];
        let submissions = submit("B", &["10.0.0.3"]);
        let outcomes = score_round(&ids(&["B"]), &committed, &submissions, 5);

        let b = &outcomes["B"];
        assert_eq!(b.correct_count, 0);
        assert_eq!(b.wrong_count, 1);
        assert_eq!(b.score_delta, -10);
        assert_eq!(b.hp_delta, 0);
        assert!(!b.all_clear);
    }

    #[test]
    fn test_burst_partial_defense() {
        // Two hits from the same address, one submission: first hit is
        // defended, the second slips through
        let committed = vec![attack("A", "B", "10.0.0.1"), attack("A", "B", "10.0.0.1")];
        let submissions = submit("B", &["10.0.0.1"]);
        let outcomes = score_round(&ids(&["B"]), &committed, &submissions, 3);

        let b = &outcomes["B"];
        assert_eq!(b.correct_count, 1);
        assert_eq!(b.missed_count, 1);
        assert_eq!(b.score_delta, 10 - 3);
        assert_eq!(b.hp_delta, -10);
    }

    #[test]
    fn test_unsubmitted_burst_counts_every_hit() {
        let committed = vec![
            attack("A", "B", "10.0.0.1"),
            attack("A", "B", "10.0.0.1"),
            attack("A", "B", "10.0.0.1"),
        ];
        let submissions = HashMap::new();
        let outcomes = score_round(&ids(&["B"]), &committed, &submissions, 2);

        let b = &outcomes["B"];
        assert_eq!(b.missed_count, 3);
        assert_eq!(b.score_delta, -9);
        assert_eq!(b.hp_delta, -30);
    }

    #[test]
    fn test_final_round_weights() {
        let committed = vec![attack("A", "B", "10.0.0.1")];
        let submissions = submit("B", &["10.0.0.1", "10.0.0.9"]);
        let outcomes = score_round(&ids(&["B"]), &committed, &submissions, 5);

        let b = &outcomes["B"];
        assert_eq!(b.correct_count, 1);
        assert_eq!(b.wrong_count, 1);
        assert_eq!(b.score_delta, 15 - 10);
    }

    #[test]
    fn test_adding_correct_address_never_lowers_score() {
        let committed = vec![attack("A", "B", "10.0.0.1"), attack("C", "B", "10.0.0.3")];

        let partial = submit("B", &["10.0.0.1"]);
        let full = submit("B", &["10.0.0.1", "10.0.0.3"]);

        for round in 1..=5 {
            let before = score_round(&ids(&["B"]), &committed, &partial, round);
            let after = score_round(&ids(&["B"]), &committed, &full, round);
            assert!(after["B"].score_delta >= before["B"].score_delta);
        }
    }

    #[test]
    fn test_submission_is_set_semantics() {
        // A set can only hold an address once, so scoring a set built from a
        // doubled submission equals scoring the single submission
        let committed = vec![attack("A", "B", "10.0.0.1")];
        let mut doubled: HashMap<String, HashSet<String>> = HashMap::new();
        let entry = doubled.entry("B".to_string()).or_default();
        entry.insert("10.0.0.1".to_string());
        entry.insert("10.0.0.1".to_string());

        let single = submit("B", &["10.0.0.1"]);
        assert_eq!(
            score_round(&ids(&["B"]), &committed, &doubled, 1),
            score_round(&ids(&["B"]), &committed, &single, 1)
        );
    }

    #[test]
    fn test_mixed_sources_and_reason_text() {
        let committed = vec![
            attack("A", "B", "10.0.0.1"),
            attack("A", "B", "10.0.0.1"),
            attack("C", "B", "10.0.0.3"),
        ];
        let submissions = submit("B", &["10.0.0.1", "10.0.0.7"]);
        let outcomes = score_round(&ids(&["B"]), &committed, &submissions, 4);

        let b = &outcomes["B"];
        assert_eq!(b.correct_count, 1); // 10.0.0.1
        assert_eq!(b.wrong_count, 1); // 10.0.0.7
        assert_eq!(b.missed_count, 2); // second 10.0.0.1 hit + 10.0.0.3
        assert_eq!(b.score_delta, 10 - 5 - 6);
        assert_eq!(b.hp_delta, -20);
        assert!(b.reason.contains("correct: 1"));
        assert!(b.reason.contains("wrong: 1"));
        assert!(b.reason.contains("missed: 2"));
    }
}
