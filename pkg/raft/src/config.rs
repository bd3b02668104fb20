use std::collections::HashSet;

use crate::log::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub voters: HashSet<NodeId>,
    pub learners: HashSet<NodeId>,
}

impl Configuration {
    pub fn new(voters: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            voters: voters.into_iter().collect(),
            learners: HashSet::new(),
        }
    }

    fn has_majority(&self, acks: &HashSet<NodeId>) -> bool {
        if self.voters.is_empty() {
            return true;
        }
        let count = self.voters.intersection(acks).count();
        count * 2 > self.voters.len()
    }
}

/// A configuration in flight. `new` is `Some` while a reconfiguration is
/// mid-transition through joint consensus; the change commits only once it
/// has majority support in both the old and new voter sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointConfig {
    pub old: Configuration,
    pub new: Option<Configuration>,
}

impl JointConfig {
    pub fn stable(voters: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            old: Configuration::new(voters),
            new: None,
        }
    }

    pub fn is_joint(&self) -> bool {
        self.new.is_some()
    }

    pub fn has_majority(&self, acks: &HashSet<NodeId>) -> bool {
        self.old.has_majority(acks) && self.new.as_ref().map_or(true, |c| c.has_majority(acks))
    }

    pub fn all_voters(&self) -> HashSet<NodeId> {
        let mut all = self.old.voters.clone();
        if let Some(new) = &self.new {
            all.extend(new.voters.iter().copied());
        }
        all
    }

    /// Learners receive log entries and snapshots but never vote.
    pub fn all_learners(&self) -> HashSet<NodeId> {
        let mut all = self.old.learners.clone();
        if let Some(new) = &self.new {
            all.extend(new.learners.iter().copied());
        }
        all
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChangeOutcome {
    /// The change was accepted and a joint-consensus entry was appended.
    Accepted,
    /// Identical to the currently active configuration; nothing appended.
    NoopIdentical,
    /// The submitted term was stale; treated as a no-op.
    NoopStaleTerm,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_requires_both_halves_of_joint_config() {
        let joint = JointConfig {
            old: Configuration::new([1, 2, 3]),
            new: Some(Configuration::new([3, 4, 5])),
        };

        let mut acks = HashSet::new();
        acks.insert(1);
        acks.insert(2);
        // Majority of old (1,2 of 1,2,3) but nothing from new.
        assert!(!joint.has_majority(&acks));

        acks.insert(3);
        acks.insert(4);
        // Now 1,2,3 satisfy old and 3,4 satisfy new.
        assert!(joint.has_majority(&acks));
    }

    #[test]
    fn stable_config_has_no_new_half() {
        let joint = JointConfig::stable([1, 2, 3]);
        assert!(!joint.is_joint());
    }
}
