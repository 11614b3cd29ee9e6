//! From a bound DN to a [`User`]

use sextant_core::config::GroupRoleNaming;
use sextant_core::utils::{leading_rdn_value, rdn_value};
use sextant_core::{User, METADATA_LDAP_DN, METADATA_LDAP_GROUPS};
use std::sync::Arc;

use crate::error::DirectoryError;
use crate::ldap::directory::DirectoryHandle;
use crate::ldap::groups::GroupResolver;
use crate::roles::DnRoleMapper;

pub struct RoleResolver {
    groups: GroupResolver,
    naming: GroupRoleNaming,
    mapper: Arc<DnRoleMapper>,
}

impl RoleResolver {
    pub fn new(groups: GroupResolver, naming: GroupRoleNaming, mapper: Arc<DnRoleMapper>) -> Self {
        Self {
            groups,
            naming,
            mapper,
        }
    }

    pub fn mapper(&self) -> &Arc<DnRoleMapper> {
        &self.mapper
    }

    /// Role named after a group, if the naming rule yields one
    pub fn group_role(&self, group_dn: &str) -> Option<String> {
        match &self.naming {
            GroupRoleNaming::LeadingRdn => leading_rdn_value(group_dn),
            GroupRoleNaming::Attribute(attribute) => rdn_value(group_dn, attribute),
            GroupRoleNaming::Dn => Some(group_dn.to_string()),
            GroupRoleNaming::None => None,
        }
        .filter(|role| !role.is_empty())
    }

    /// Group roles first, then mapped roles. Any directory error fails the
    /// whole resolution; a user is never returned with a partial role set.
    pub async fn resolve(
        &self,
        handle: &mut DirectoryHandle,
        username: &str,
        user_dn: &str,
    ) -> Result<User, DirectoryError> {
        let groups = self.groups.resolve(handle, user_dn, username).await?;
        let mapped = self.mapper.resolve_roles(user_dn, &groups);

        let user = User::new(username)
            .with_roles(groups.iter().filter_map(|dn| self.group_role(dn)))
            .with_roles(mapped)
            .with_metadata(METADATA_LDAP_DN, user_dn)
            .with_metadata(METADATA_LDAP_GROUPS, groups);

        Ok(user)
    }
}
