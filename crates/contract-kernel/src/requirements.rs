use std::collections::BTreeSet;

use contracts::{ContractDefinition, RequirementStatus};

/// Tiered availability of a definition.
///
/// Rank gating is evaluated strictly before prerequisite gating. A dimension
/// that is exactly one step short yields its "almost" tier; anything further
/// away is `Locked`.
pub fn requirement_status(
    definition: &ContractDefinition,
    completed_ids: &BTreeSet<String>,
    current_rank: u32,
) -> RequirementStatus {
    let Some(requirements) = definition.requirements.as_ref() else {
        return RequirementStatus::Available;
    };

    if let Some(required_rank) = requirements.min_rank {
        if current_rank < required_rank {
            return if required_rank - current_rank == 1 {
                RequirementStatus::AlmostAvailableRank
            } else {
                RequirementStatus::Locked
            };
        }
    }

    let missing = requirements
        .contracts
        .iter()
        .filter(|contract_id| !completed_ids.contains(contract_id.as_str()))
        .count();

    match missing {
        0 => RequirementStatus::Available,
        1 => RequirementStatus::AlmostAvailableContracts,
        _ => RequirementStatus::Locked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::goals::GoalsSpec;
    use contracts::RequirementsSpec;

    fn definition(min_rank: Option<u32>, prerequisites: &[&str]) -> ContractDefinition {
        ContractDefinition {
            contract_id: "$c".to_string(),
            title: "c".to_string(),
            description: String::new(),
            advance: 0,
            reward: 0,
            fee: 0,
            requirements: Some(RequirementsSpec {
                min_rank,
                contracts: prerequisites.iter().map(|id| id.to_string()).collect(),
            }),
            goals: GoalsSpec::new(),
        }
    }

    fn completed(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn no_requirements_is_available() {
        let mut def = definition(None, &[]);
        def.requirements = None;
        assert_eq!(
            requirement_status(&def, &completed(&[]), 0),
            RequirementStatus::Available
        );
    }

    #[test]
    fn rank_one_short_is_almost() {
        let def = definition(Some(3), &[]);
        assert_eq!(
            requirement_status(&def, &completed(&[]), 2),
            RequirementStatus::AlmostAvailableRank
        );
        assert_eq!(
            requirement_status(&def, &completed(&[]), 1),
            RequirementStatus::Locked
        );
        assert_eq!(
            requirement_status(&def, &completed(&[]), 3),
            RequirementStatus::Available
        );
    }

    #[test]
    fn prerequisite_tiers() {
        let def = definition(None, &["$a", "$b"]);
        assert_eq!(
            requirement_status(&def, &completed(&["$a"]), 0),
            RequirementStatus::AlmostAvailableContracts
        );
        assert_eq!(
            requirement_status(&def, &completed(&[]), 0),
            RequirementStatus::Locked
        );
        assert_eq!(
            requirement_status(&def, &completed(&["$a", "$b"]), 0),
            RequirementStatus::Available
        );
    }

    #[test]
    fn rank_gate_is_reported_before_prerequisites() {
        let def = definition(Some(2), &["$a", "$b"]);
        // Rank one short wins even though two prerequisites are missing.
        assert_eq!(
            requirement_status(&def, &completed(&[]), 1),
            RequirementStatus::AlmostAvailableRank
        );
        // Rank met, one prerequisite missing.
        assert_eq!(
            requirement_status(&def, &completed(&["$b"]), 5),
            RequirementStatus::AlmostAvailableContracts
        );
        // Both far off.
        assert_eq!(
            requirement_status(&def, &completed(&[]), 0),
            RequirementStatus::Locked
        );
    }
}
