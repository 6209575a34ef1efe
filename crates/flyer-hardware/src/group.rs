//! Channel groups.
//!
//! A [`ChannelGroup`] drives an ordered list of flyers as one unit. Members
//! whose role is `disabled` are skipped by every operation. Operations visit
//! members in definition order and stop at the first error; nothing already
//! done is rolled back, so callers recover with [`ChannelGroup::unstage`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use flyer_core::{
    ArmOutcome, CollectRecord, Describe, Flyer, FlyerError, HarvestOutcome, Result, Status,
    TriggerRole,
};
use futures::future::join_all;
use tracing::{debug, info};

use crate::trigger::validate_roles;

/// Records and per-member outcomes of a group harvest.
#[derive(Debug, Clone, Default)]
pub struct GroupHarvest {
    /// Records of all members, member by member in definition order
    pub records: Vec<CollectRecord>,
    /// `(member, outcome)` in definition order
    pub outcomes: Vec<(String, HarvestOutcome)>,
}

impl GroupHarvest {
    /// Outcome reported by `member`.
    pub fn outcome(&self, member: &str) -> Option<&HarvestOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, outcome)| outcome)
    }
}

/// Ordered collection of flyers operated together.
pub struct ChannelGroup {
    name: String,
    members: Vec<Arc<dyn Flyer>>,
}

impl std::fmt::Debug for ChannelGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members: Vec<_> = self.members.iter().map(|m| (m.name(), m.role())).collect();
        f.debug_struct("ChannelGroup")
            .field("name", &self.name)
            .field("members", &members)
            .finish()
    }
}

impl ChannelGroup {
    /// Group `members` under `name`.
    ///
    /// Member names must be unique, and each trigger line must have exactly
    /// one master among its active members.
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn Flyer>>) -> Result<Self> {
        let name = name.into();
        {
            let mut seen = HashSet::new();
            let mut lines: BTreeMap<&str, Vec<TriggerRole>> = BTreeMap::new();
            for member in &members {
                if !seen.insert(member.name()) {
                    return Err(FlyerError::Configuration(format!(
                        "Group '{}': duplicate member '{}'",
                        name,
                        member.name()
                    )));
                }
                if let Some(line) = member.trigger_line() {
                    lines.entry(line).or_default().push(member.role());
                }
            }
            for (line, roles) in &lines {
                validate_roles(line, roles)?;
            }
        }
        Ok(Self { name, members })
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All members, in definition order.
    pub fn members(&self) -> &[Arc<dyn Flyer>] {
        &self.members
    }

    /// Member named `name`.
    pub fn member(&self, name: &str) -> Option<&Arc<dyn Flyer>> {
        self.members.iter().find(|m| m.name() == name)
    }

    /// Members that take part in group operations.
    pub fn active(&self) -> impl Iterator<Item = &Arc<dyn Flyer>> {
        self.members.iter().filter(|m| m.role().is_active())
    }

    /// Arm every active member.
    pub async fn stage(&self) -> Result<Vec<(String, ArmOutcome)>> {
        let mut outcomes = Vec::new();
        for member in self.active() {
            let outcome = member.arm().await?;
            outcomes.push((member.name().to_string(), outcome));
        }
        info!(group = %self.name, members = outcomes.len(), "Group staged");
        Ok(outcomes)
    }

    /// Unstage every active member.
    pub async fn unstage(&self) -> Result<()> {
        for member in self.active() {
            member.unstage().await?;
        }
        debug!(group = %self.name, "Group unstaged");
        Ok(())
    }

    /// Start every active member; the status completes when all of theirs do.
    ///
    /// Fails with [`FlyerError::EmptyGroup`] if no member is active.
    pub async fn start(&self) -> Result<Status> {
        let mut statuses = Vec::new();
        for member in self.active() {
            statuses.push(member.start().await?);
        }
        if statuses.is_empty() {
            return Err(FlyerError::EmptyGroup(self.name.clone()));
        }
        info!(group = %self.name, members = statuses.len(), "Group started");
        Ok(Status::all(statuses))
    }

    /// Stop every active member.
    pub async fn stop(&self) -> Result<Status> {
        let mut statuses = Vec::new();
        for member in self.active() {
            statuses.push(member.stop().await?);
        }
        Ok(Status::all(statuses))
    }

    /// Harvest every active member.
    ///
    /// Members harvest concurrently so their settle delays overlap; records
    /// are still concatenated in definition order. If any member fails, the
    /// first failure in definition order is returned once all have finished.
    pub async fn harvest(&self) -> Result<GroupHarvest> {
        let results = join_all(self.active().map(|m| m.harvest())).await;
        let mut harvest = GroupHarvest::default();
        for result in results {
            let member = result?;
            harvest.records.extend(member.records);
            harvest.outcomes.push((member.channel, member.outcome));
        }
        info!(group = %self.name, records = harvest.records.len(), "Group harvested");
        Ok(harvest)
    }

    /// Merged describe payload of every active member.
    pub async fn describe(&self) -> Result<Describe> {
        let mut merged = Describe::new();
        for member in self.active() {
            merged.extend(member.describe().await?);
        }
        Ok(merged)
    }
}
