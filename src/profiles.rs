//! Rate-limit profiles, stored as gateway consumer groups carrying a
//! `limit-count` plugin.
//!
//! Nothing is cached: every update fetches the current group, merges the
//! requested fields over it and writes the whole document back, so fields set
//! out of band survive. The gateway cannot rename a group, a rename is a
//! create-new then delete-old saga (see [`ProfileReconciler::rename_profile`]).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::accounts::validation::{ensure, valid_profile_name};
use crate::error::{Error, Result};
use crate::gateway::types::{
    DEFAULT_POLICY, DEFAULT_REJECTED_CODE, DEFAULT_REJECTED_MSG, DEFAULT_TIME_WINDOW,
};
use crate::gateway::{ConsumerGroup, Gateway, LimitCount};

pub const BASIC_PROFILE: &str = "basic";
pub const BASIC_PROFILE_COUNT: u64 = 10;
pub const BASIC_PROFILE_MSG: &str = "Basic user limit exceeded.";
pub const PRO_PROFILE: &str = "pro";
pub const PRO_PROFILE_COUNT: u64 = 40;
pub const PRO_PROFILE_MSG: &str = "Pro user limit exceeded.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RateLimitProfile {
    pub name: String,
    pub count: u64,
    pub time_window: u64,
    pub rejected_code: u16,
    pub rejected_msg: String,
    pub policy: String,
    pub show_limit_quota_header: bool,
}

impl RateLimitProfile {
    fn from_group(name: &str, group: &ConsumerGroup) -> Option<Self> {
        let plugin = group.plugins.limit_count.as_ref()?;

        Some(Self {
            name: name.to_string(),
            count: plugin.count,
            time_window: plugin.time_window,
            rejected_code: plugin.rejected_code,
            rejected_msg: plugin.rejected_msg.clone(),
            policy: plugin.policy.clone(),
            show_limit_quota_header: plugin.show_limit_quota_header,
        })
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewProfile {
    pub name: String,
    pub count: u64,
    #[serde(default = "default_time_window")]
    pub time_window: u64,
    #[serde(default = "default_rejected_code")]
    pub rejected_code: u16,
    #[serde(default = "default_rejected_msg")]
    pub rejected_msg: String,
    #[serde(default = "default_policy")]
    pub policy: String,
    #[serde(default = "default_show_header")]
    pub show_limit_quota_header: bool,
}

impl NewProfile {
    /// Profile with the gateway defaults for everything but the quota.
    #[must_use]
    pub fn new(name: &str, count: u64) -> Self {
        Self {
            name: name.to_string(),
            count,
            time_window: DEFAULT_TIME_WINDOW,
            rejected_code: DEFAULT_REJECTED_CODE,
            rejected_msg: DEFAULT_REJECTED_MSG.to_string(),
            policy: DEFAULT_POLICY.to_string(),
            show_limit_quota_header: true,
        }
    }

    #[must_use]
    pub fn with_rejected_msg(mut self, message: impl Into<String>) -> Self {
        self.rejected_msg = message.into();
        self
    }
}

/// The `basic` and `pro` profiles every deployment starts from.
#[must_use]
pub fn default_profiles() -> Vec<NewProfile> {
    vec![
        NewProfile::new(BASIC_PROFILE, BASIC_PROFILE_COUNT).with_rejected_msg(BASIC_PROFILE_MSG),
        NewProfile::new(PRO_PROFILE, PRO_PROFILE_COUNT).with_rejected_msg(PRO_PROFILE_MSG),
    ]
}

/// Fields left as `None` keep whatever the gateway currently holds.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ProfileUpdate {
    pub count: Option<u64>,
    pub time_window: Option<u64>,
    pub rejected_code: Option<u16>,
    pub rejected_msg: Option<String>,
    pub policy: Option<String>,
    pub show_limit_quota_header: Option<bool>,
}

impl ProfileUpdate {
    fn apply(&self, plugin: &mut LimitCount) {
        if let Some(count) = self.count {
            plugin.count = count;
        }
        if let Some(time_window) = self.time_window {
            plugin.time_window = time_window;
        }
        if let Some(code) = self.rejected_code {
            plugin.rejected_code = code;
        }
        if let Some(message) = &self.rejected_msg {
            plugin.rejected_msg.clone_from(message);
        }
        if let Some(policy) = &self.policy {
            plugin.policy.clone_from(policy);
        }
        if let Some(show) = self.show_limit_quota_header {
            plugin.show_limit_quota_header = show;
        }
    }

    fn is_empty(&self) -> bool {
        self.count.is_none()
            && self.time_window.is_none()
            && self.rejected_code.is_none()
            && self.rejected_msg.is_none()
            && self.policy.is_none()
            && self.show_limit_quota_header.is_none()
    }
}

impl From<&NewProfile> for ProfileUpdate {
    fn from(new: &NewProfile) -> Self {
        Self {
            count: Some(new.count),
            time_window: Some(new.time_window),
            rejected_code: Some(new.rejected_code),
            rejected_msg: Some(new.rejected_msg.clone()),
            policy: Some(new.policy.clone()),
            show_limit_quota_header: Some(new.show_limit_quota_header),
        }
    }
}

/// Per-profile result of [`ProfileReconciler::sync_defaults`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub errors: Vec<String>,
}

/// Result of the rename saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameOutcome {
    pub profile: RateLimitProfile,
    /// False when the old group could not be deleted and is now orphaned.
    pub old_removed: bool,
}

fn group_description(name: &str) -> String {
    format!("Profile group for {name} users")
}

#[derive(Clone)]
pub struct ProfileReconciler {
    gateway: Arc<dyn Gateway>,
}

impl ProfileReconciler {
    #[must_use]
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// True when a group named `name` exists and carries a rate-limit plugin.
    ///
    /// # Errors
    /// Returns an error if the gateway cannot be reached.
    pub async fn ensure_profile(&self, name: &str) -> Result<bool> {
        Ok(self.get_profile(name).await?.is_some())
    }

    /// # Errors
    /// Returns an error if the gateway cannot be reached.
    pub async fn get_profile(&self, name: &str) -> Result<Option<RateLimitProfile>> {
        let group = self.gateway.get_group(name).await?;
        Ok(group.and_then(|group| RateLimitProfile::from_group(name, &group)))
    }

    /// # Errors
    /// Returns an error if the gateway cannot be reached.
    pub async fn list_profiles(&self) -> Result<Vec<RateLimitProfile>> {
        let groups = self.gateway.list_groups().await?;

        Ok(groups
            .iter()
            .filter_map(|group| {
                let name = group.id.as_deref()?;
                RateLimitProfile::from_group(name, group)
            })
            .collect())
    }

    /// Creates the group for `new`. A same-named group without a rate-limit
    /// plugin is converted in place, keeping its other plugins.
    ///
    /// # Errors
    /// `ProfileAlreadyExists` if a rate-limit profile with that name exists,
    /// gateway errors otherwise.
    pub async fn create_profile(&self, new: NewProfile) -> Result<RateLimitProfile> {
        ensure(valid_profile_name(&new.name), "invalid profile name")?;

        let mut group = match self.gateway.get_group(&new.name).await? {
            Some(group) if group.plugins.limit_count.is_some() => {
                return Err(Error::ProfileAlreadyExists(new.name));
            }
            Some(group) => {
                warn!(
                    profile = %new.name,
                    "consumer group exists without a rate-limit plugin, converting it"
                );
                group
            }
            None => ConsumerGroup::default(),
        };

        group.desc = Some(group_description(&new.name));
        group.plugins.limit_count = Some(LimitCount {
            count: new.count,
            time_window: new.time_window,
            rejected_code: new.rejected_code,
            rejected_msg: new.rejected_msg,
            policy: new.policy,
            show_limit_quota_header: new.show_limit_quota_header,
            ..LimitCount::default()
        });

        self.gateway.put_group(&new.name, &group).await?;

        info!(profile = %new.name, "rate-limit profile created");

        self.read_back(&new.name).await
    }

    /// Merges `update` over the current remote profile and writes it back,
    /// under `new_name` when it differs from `name`.
    ///
    /// # Errors
    /// `ProfileNotFound` when `name` is not a rate-limit profile,
    /// `ProfileAlreadyExists` when `new_name` is taken, gateway errors otherwise.
    pub async fn update_profile(
        &self,
        name: &str,
        update: &ProfileUpdate,
        new_name: Option<&str>,
    ) -> Result<RateLimitProfile> {
        let mut group = self.current_group(name).await?;
        let rename_to = new_name.filter(|target| *target != name);

        if let Some(plugin) = group.plugins.limit_count.as_mut() {
            update.apply(plugin);
        }

        if let Some(target) = rename_to {
            return Ok(self.rename_profile(name, target, group).await?.profile);
        }

        if update.is_empty() {
            return self.read_back(name).await;
        }

        self.gateway.put_group(name, &group).await?;

        info!(profile = %name, "rate-limit profile updated");

        self.read_back(name).await
    }

    /// Moves `group` from `name` to `new_name`: the new group is written first
    /// and the old one deleted only afterwards, so some profile is always
    /// reachable. A failed delete still counts as a successful rename and
    /// leaves the old group orphaned for manual cleanup.
    ///
    /// # Errors
    /// `ProfileAlreadyExists` when `new_name` is already a profile, or the
    /// gateway error from writing the new group (the old group is untouched).
    pub async fn rename_profile(
        &self,
        name: &str,
        new_name: &str,
        mut group: ConsumerGroup,
    ) -> Result<RenameOutcome> {
        ensure(valid_profile_name(new_name), "invalid profile name")?;

        if self.ensure_profile(new_name).await? {
            return Err(Error::ProfileAlreadyExists(new_name.to_string()));
        }

        group.id = None;
        group.desc = Some(group_description(new_name));

        // step 1: the new group must exist before the old one goes away
        self.gateway.put_group(new_name, &group).await?;

        // step 2
        let old_removed = match self.gateway.delete_group(name).await {
            Ok(()) => true,
            Err(err) => {
                error!(
                    profile = %name,
                    renamed_to = %new_name,
                    "rename left an orphaned profile, delete it manually: {err}"
                );
                false
            }
        };

        info!(profile = %name, renamed_to = %new_name, "rate-limit profile renamed");

        Ok(RenameOutcome {
            profile: self.read_back(new_name).await?,
            old_removed,
        })
    }

    /// Creates each of `defaults`, or overwrites its quota fields when the
    /// profile already exists. One failing profile does not stop the others.
    pub async fn sync_defaults(&self, defaults: &[NewProfile]) -> SyncReport {
        let mut report = SyncReport::default();

        for profile in defaults {
            match self.create_profile(profile.clone()).await {
                Ok(_) => report.created.push(profile.name.clone()),
                Err(Error::ProfileAlreadyExists(_)) => {
                    match self
                        .update_profile(&profile.name, &ProfileUpdate::from(profile), None)
                        .await
                    {
                        Ok(_) => report.updated.push(profile.name.clone()),
                        Err(err) => {
                            warn!(profile = %profile.name, "default profile not updated: {err}");
                            report.errors.push(format!("{}: {err}", profile.name));
                        }
                    }
                }
                Err(err) => {
                    warn!(profile = %profile.name, "default profile not created: {err}");
                    report.errors.push(format!("{}: {err}", profile.name));
                }
            }
        }

        info!(
            created = report.created.len(),
            updated = report.updated.len(),
            errors = report.errors.len(),
            "default profiles synced"
        );

        report
    }

    /// Missing groups count as deleted.
    ///
    /// # Errors
    /// Returns an error if the gateway rejects the delete.
    pub async fn delete_profile(&self, name: &str) -> Result<bool> {
        self.gateway.delete_group(name).await?;

        info!(profile = %name, "rate-limit profile deleted");

        Ok(true)
    }

    async fn current_group(&self, name: &str) -> Result<ConsumerGroup> {
        match self.gateway.get_group(name).await? {
            Some(group) if group.plugins.limit_count.is_some() => Ok(group),
            _ => Err(Error::ProfileNotFound(name.to_string())),
        }
    }

    async fn read_back(&self, name: &str) -> Result<RateLimitProfile> {
        self.get_profile(name)
            .await?
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))
    }
}

const fn default_time_window() -> u64 {
    DEFAULT_TIME_WINDOW
}

const fn default_rejected_code() -> u16 {
    DEFAULT_REJECTED_CODE
}

fn default_rejected_msg() -> String {
    DEFAULT_REJECTED_MSG.to_string()
}

fn default_policy() -> String {
    DEFAULT_POLICY.to_string()
}

const fn default_show_header() -> bool {
    true
}
