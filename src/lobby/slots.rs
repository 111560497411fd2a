//! Slot layout of every lobby format and requirement gating
//!
//! A lobby of type `T` has `2 * class_count(T)` slots. Red occupies
//! `[0, class_count)` in roster order and blu the same classes shifted by
//! `class_count`.

use crate::error::{LobbyError, Result};
use crate::types::{LobbyType, PlayerStats, Requirement, Team};

const DEBUG: &[&str] = &["player"];
const SIXES: &[&str] = &["scout1", "scout2", "roamer", "pocket", "demoman", "medic"];
const HIGHLANDER: &[&str] = &[
    "scout", "soldier", "pyro", "demoman", "heavy", "engineer", "medic", "sniper", "spy",
];
const ULTIDUO: &[&str] = &["soldier", "medic"];
const BBALL: &[&str] = &["soldier1", "soldier2"];
const FOURS: &[&str] = &["scout", "soldier", "demoman", "medic"];

/// Class roster of one team, in slot order
pub fn classes(lobby_type: LobbyType) -> &'static [&'static str] {
    match lobby_type {
        LobbyType::Debug => DEBUG,
        LobbyType::Sixes => SIXES,
        LobbyType::Highlander => HIGHLANDER,
        LobbyType::Ultiduo => ULTIDUO,
        LobbyType::Bball => BBALL,
        LobbyType::Fours => FOURS,
    }
}

/// Players per team
pub fn class_count(lobby_type: LobbyType) -> usize {
    classes(lobby_type).len()
}

/// Total slots across both teams
pub fn slot_count(lobby_type: LobbyType) -> usize {
    2 * class_count(lobby_type)
}

/// Resolve a team/class pair to its slot index
pub fn slot_index(lobby_type: LobbyType, team: &str, class: &str) -> Result<usize> {
    let team = Team::from_name(team).ok_or_else(|| invalid_pair(lobby_type, team, class))?;
    let position = classes(lobby_type)
        .iter()
        .position(|c| *c == class)
        .ok_or_else(|| invalid_pair(lobby_type, team.name(), class))?;

    Ok(match team {
        Team::Red => position,
        Team::Blu => position + class_count(lobby_type),
    })
}

/// Team and class of a slot index; `None` when out of range
pub fn slot_info(lobby_type: LobbyType, slot: usize) -> Option<(Team, &'static str)> {
    let count = class_count(lobby_type);
    let roster = classes(lobby_type);
    if slot < count {
        Some((Team::Red, roster[slot]))
    } else if slot < 2 * count {
        Some((Team::Blu, roster[slot - count]))
    } else {
        None
    }
}

fn invalid_pair(lobby_type: LobbyType, team: &str, class: &str) -> anyhow::Error {
    LobbyError::invalid(format!(
        "Invalid team/class {}/{} for a {} lobby",
        team, class, lobby_type
    ))
    .into()
}

/// Whether a player's stats satisfy a slot's requirement
///
/// A slot without a requirement admits everyone.
pub fn is_eligible(stats: &PlayerStats, requirement: Option<&Requirement>) -> bool {
    check_eligibility(stats, requirement).is_ok()
}

/// Like [`is_eligible`] but names the first unmet requirement
pub fn check_eligibility(stats: &PlayerStats, requirement: Option<&Requirement>) -> Result<()> {
    let Some(req) = requirement else {
        return Ok(());
    };

    let reason = if stats.hours < req.hours {
        format!("You don't have enough hours, slot requires {} hours", req.hours)
    } else if stats.lobbies < req.lobbies {
        format!(
            "You haven't played enough lobbies, slot requires {} lobbies",
            req.lobbies
        )
    } else if stats.reliability < req.reliability {
        format!(
            "Your reliability is too low, slot requires {:.2}",
            req.reliability
        )
    } else {
        return Ok(());
    };

    Err(LobbyError::NotEligible { reason }.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn stats(hours: u32, lobbies: u32, reliability: f64) -> PlayerStats {
        PlayerStats {
            hours,
            lobbies,
            reliability,
        }
    }

    #[test]
    fn test_class_counts() {
        assert_eq!(class_count(LobbyType::Debug), 1);
        assert_eq!(class_count(LobbyType::Sixes), 6);
        assert_eq!(class_count(LobbyType::Highlander), 9);
        assert_eq!(class_count(LobbyType::Ultiduo), 2);
        assert_eq!(class_count(LobbyType::Bball), 2);
        assert_eq!(class_count(LobbyType::Fours), 4);
        assert_eq!(slot_count(LobbyType::Sixes), 12);
    }

    #[test]
    fn test_slot_index_layout() {
        assert_eq!(slot_index(LobbyType::Sixes, "red", "scout1").unwrap(), 0);
        assert_eq!(slot_index(LobbyType::Sixes, "red", "medic").unwrap(), 5);
        assert_eq!(slot_index(LobbyType::Sixes, "blu", "scout1").unwrap(), 6);
        assert_eq!(slot_index(LobbyType::Highlander, "blu", "spy").unwrap(), 17);
    }

    #[test]
    fn test_invalid_pairs_error() {
        let err = slot_index(LobbyType::Sixes, "red", "spy").unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::Validation);
        assert!(slot_index(LobbyType::Sixes, "green", "medic").is_err());
        assert!(slot_index(LobbyType::Ultiduo, "red", "scout").is_err());
        assert!(slot_info(LobbyType::Fours, 8).is_none());
    }

    #[test]
    fn test_slot_index_is_bijection_for_every_type() {
        for lobby_type in LobbyType::ALL {
            let mut seen = HashSet::new();
            for team in ["red", "blu"] {
                for class in classes(lobby_type) {
                    let slot = slot_index(lobby_type, team, class).unwrap();
                    assert!(slot < slot_count(lobby_type));
                    assert!(seen.insert(slot), "duplicate slot {} for {}", slot, lobby_type);
                }
            }
            assert_eq!(seen.len(), slot_count(lobby_type));
        }
    }

    #[test]
    fn test_eligibility() {
        let req = Requirement {
            hours: 20,
            lobbies: 5,
            reliability: 0.0,
        };

        assert!(is_eligible(&stats(50, 10, 1.0), Some(&req)));
        assert!(is_eligible(&stats(0, 0, 0.0), None));
        assert!(!is_eligible(&stats(5, 10, 1.0), Some(&req)));
        assert!(!is_eligible(&stats(50, 4, 1.0), Some(&req)));

        let err = check_eligibility(&stats(5, 10, 1.0), Some(&req)).unwrap_err();
        assert!(err.to_string().contains("requires 20 hours"));
        assert_eq!(error_kind(&err), ErrorKind::StateConflict);
    }

    #[test]
    fn test_reliability_threshold_inclusive() {
        let req = Requirement {
            hours: 0,
            lobbies: 0,
            reliability: 0.8,
        };
        assert!(is_eligible(&stats(0, 0, 0.8), Some(&req)));
        assert!(!is_eligible(&stats(0, 0, 0.79), Some(&req)));
    }

    fn lobby_type_strategy() -> impl Strategy<Value = LobbyType> {
        prop::sample::select(LobbyType::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_slot_info_inverts_slot_index(lobby_type in lobby_type_strategy(), slot in 0usize..20) {
            match slot_info(lobby_type, slot) {
                Some((team, class)) => {
                    prop_assert_eq!(slot_index(lobby_type, team.name(), class).unwrap(), slot);
                }
                None => prop_assert!(slot >= slot_count(lobby_type)),
            }
        }

        #[test]
        fn prop_unknown_class_always_errors(lobby_type in lobby_type_strategy(), class in "[a-z]{1,12}") {
            let known = classes(lobby_type).contains(&class.as_str());
            prop_assert_eq!(slot_index(lobby_type, "red", &class).is_ok(), known);
        }
    }
}
