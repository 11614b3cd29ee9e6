//! Group membership lookup

use sextant_core::config::{GroupSearchSettings, LdapRealmSettings, SearchScope};
use tracing::debug;

use crate::error::DirectoryError;
use crate::ldap::directory::{DirectoryHandle, SearchRequest};

/// Where a user's groups come from
#[derive(Debug, Clone)]
pub enum GroupResolver {
    /// Search for group entries naming the user as a member
    Search(GroupSearchSettings),
    /// Read group DNs from an attribute of the user entry
    UserAttribute(String),
}

impl GroupResolver {
    pub fn from_settings(settings: &LdapRealmSettings) -> Self {
        match &settings.group_search {
            Some(search) => GroupResolver::Search(search.clone()),
            None => GroupResolver::UserAttribute(settings.user_group_attribute.clone()),
        }
    }

    /// Group DNs of the user in directory order, without exact duplicates
    pub async fn resolve(
        &self,
        handle: &mut DirectoryHandle,
        user_dn: &str,
        username: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let groups: Vec<String> = match self {
            GroupResolver::Search(search) => {
                let filter = substitute(
                    &search.filter,
                    &[&ldap3::ldap_escape(user_dn), &ldap3::ldap_escape(username)],
                );
                let request = SearchRequest::new(search.base_dn.clone(), search.scope, filter);
                handle
                    .search(&request)
                    .await?
                    .into_iter()
                    .map(|entry| entry.dn)
                    .collect()
            }
            GroupResolver::UserAttribute(attribute) => {
                let request = SearchRequest::new(user_dn, SearchScope::Base, "(objectClass=*)")
                    .with_attributes([attribute.as_str()]);
                handle
                    .search(&request)
                    .await?
                    .iter()
                    .flat_map(|entry| entry.values(attribute).iter().cloned())
                    .collect()
            }
        };

        let groups = dedup(groups);
        debug!(user_dn, count = groups.len(), "Resolved groups");
        Ok(groups)
    }
}

/// Replace `{0}`, `{1}`, ... in one pass, so substituted text is never rescanned
fn substitute(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let arg = tail.find('}').and_then(|end| {
            tail[..end]
                .parse::<usize>()
                .ok()
                .and_then(|idx| args.get(idx))
                .map(|arg| (end, *arg))
        });

        match arg {
            Some((end, arg)) => {
                out.push_str(arg);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }

    out.push_str(rest);
    out
}

fn dedup(groups: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(groups.len());
    for group in groups {
        if !out.contains(&group) {
            out.push(group);
        }
    }
    out
}
